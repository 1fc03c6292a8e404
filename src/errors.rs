//! Error handling.
use crate::error_codes::CmsError;
use crate::pdu::MessageEncoding;
use std::io;

/// Error `enum` for everything that can go wrong when talking to a modem.
///
/// Exhaustive matching is NOT guaranteed by the library API (!).
#[derive(Fail, Debug)]
pub enum GsmError {
    /// Some random I/O error.
    #[fail(display = "An I/O error occurred: {}", _0)]
    IoError(#[cause] io::Error),
    /// An error from the serial port layer.
    #[fail(display = "Serial port error: {}", _0)]
    SerialError(#[cause] ::serial::Error),
    /// An operation was attempted without a connected session.
    #[fail(display = "Not connected to a modem.")]
    NotConnected,
    /// `connect()` was called on a session that is already up.
    #[fail(display = "Already connected to a modem.")]
    AlreadyConnected,
    /// The modem did not produce any response before the command timeout,
    /// even after the configured retries.
    #[fail(display = "No response from the modem.")]
    NoResponse,
    /// The serial link failed mid-command; the session is unusable.
    #[fail(display = "The serial link died.")]
    LinkDead,
    /// The modem answered a command with `ERROR` (or a CME error).
    #[fail(display = "Error from modem: {}", _0)]
    AtError(String),
    /// A typed SMS-related error from the modem.
    #[fail(display = "An SMS-related error occurred: {}", _0)]
    CmsError(#[cause] CmsError),
    /// A part of an outgoing message was rejected by the modem.
    #[fail(display = "The modem refused to send the message.")]
    SendFailed,
    /// The SIM wants a PIN, and none was configured.
    #[fail(display = "A SIM PIN is required, but none was configured.")]
    NoPin,
    /// The SIM wants a PIN2, and none was configured.
    #[fail(display = "A SIM PIN2 is required, but none was configured.")]
    NoPin2,
    /// The configured SIM PIN was rejected.
    #[fail(display = "The configured SIM PIN was rejected by the SIM.")]
    InvalidPin,
    /// The configured SIM PIN2 was rejected.
    #[fail(display = "The configured SIM PIN2 was rejected by the SIM.")]
    InvalidPin2,
    /// The SIM is blocked and wants a PUK. Entering one is deliberately not
    /// automated; guessing PUKs is how SIMs get bricked.
    #[fail(display = "The SIM requires a PUK to be entered.")]
    PukRequired,
    /// The modem could not register on the network.
    #[fail(display = "Network registration failed: {}", _0)]
    RegistrationFailed(&'static str),
    /// An error occurred parsing or generating a PDU.
    #[fail(display = "Invalid PDU: {}", _0)]
    InvalidPdu(&'static str),
    /// An address had more digits than a PDU address field can carry.
    #[fail(display = "Address too long: {} digits", _0)]
    AddressTooLong(usize),
    /// Unsupported user data encoding. The raw bytes are provided for your
    /// edification.
    #[fail(display = "Data of unknown encoding {:?}: {:?}", _0, _1)]
    UnsupportedEncoding(MessageEncoding, Vec<u8>),
    /// An error parsing data from the modem.
    #[fail(display = "There was an error parsing data.")]
    ParseError(::nom::ErrorKind),
    /// A value provided by the modem was out of range.
    #[fail(display = "Value out of range: {}", _0)]
    ValueOutOfRange(u32),
    /// The modem or the selected protocol cannot do what was asked.
    #[fail(display = "Operation not supported: {}", _0)]
    Unsupported(&'static str),
    /// This shouldn't be shown, and is designed to stop you matching on this `enum` exhaustively.
    /// If you do that, yo' code gonna break!
    #[fail(display = "[this should never be shown]")]
    #[doc(hidden)]
    __Nonexhaustive
}
impl From<io::Error> for GsmError {
    fn from(e: io::Error) -> GsmError {
        GsmError::IoError(e)
    }
}
impl From<::serial::Error> for GsmError {
    fn from(e: ::serial::Error) -> GsmError {
        GsmError::SerialError(e)
    }
}
impl From<::nom::ErrorKind> for GsmError {
    fn from(e: ::nom::ErrorKind) -> GsmError {
        GsmError::ParseError(e)
    }
}
impl From<CmsError> for GsmError {
    fn from(e: CmsError) -> GsmError {
        GsmError::CmsError(e)
    }
}
/// Bog-standard result type alias.
pub type GsmResult<T> = Result<T, GsmError>;
