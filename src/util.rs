use crate::errors::{GsmError, GsmResult};
use num::FromPrimitive;

pub trait GsmFromPrimitive where Self: Sized {
    fn from_integer(i: u32) -> GsmResult<Self>;
}
impl<T> GsmFromPrimitive for T where T: FromPrimitive {
    fn from_integer(i: u32) -> GsmResult<T> {
        if let Some(s) = T::from_u32(i) {
            Ok(s)
        }
        else {
            Err(GsmError::ValueOutOfRange(i))
        }
    }
}
