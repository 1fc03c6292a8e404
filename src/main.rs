//! Quick command-line front end: connect to a modem, print what it is,
//! then list stored messages or send one.
//!
//! ```text
//! gsm-modem <port> list
//! gsm-modem <port> send <number> <text...>
//! ```

extern crate env_logger;
extern crate gsm_modem;

use gsm_modem::{InboundMessage, MessageClass, ModemSession, OutgoingMessage,
                SessionConfig};
use std::env;
use std::process;

fn usage() -> ! {
    eprintln!("usage: gsm-modem <port> list");
    eprintln!("       gsm-modem <port> send <number> <text...>");
    process::exit(2);
}

fn main() {
    env_logger::init().unwrap();
    let args: Vec<String> = env::args().skip(1).collect();
    if args.len() < 2 {
        usage();
    }
    let mut session = ModemSession::new(SessionConfig {
        port: args[0].clone(),
        ..SessionConfig::default()
    });
    if let Err(e) = session.connect() {
        eprintln!("connect failed: {}", e);
        process::exit(1);
    }
    let info = session.device_info().unwrap();
    println!("{} {} (s/n {}, firmware {}), signal {}%",
             info.manufacturer, info.model, info.serial_no, info.sw_version,
             info.signal_percent);
    let result = match args[1].as_str() {
        "list" => list(&mut session),
        "send" if args.len() >= 4 => send(&mut session, &args[2], &args[3..].join(" ")),
        _ => {
            session.disconnect();
            usage();
        }
    };
    session.disconnect();
    if let Err(e) = result {
        eprintln!("{}", e);
        process::exit(1);
    }
}

fn list(session: &mut ModemSession) -> gsm_modem::GsmResult<()> {
    let msgs = session.read_messages(MessageClass::All)?;
    println!("{} message(s) stored", msgs.len());
    for msg in msgs {
        match msg {
            InboundMessage::Sms(m) => {
                match m.payload.as_text() {
                    Some(text) => println!("[{}] {}: {}", m.mem_index, m.originator, text),
                    None => println!("[{}] {}: <{} bytes of data>", m.mem_index,
                                     m.originator,
                                     m.payload.as_binary().map(|b| b.len()).unwrap_or(0))
                }
            },
            InboundMessage::StatusReport(r) => {
                println!("[{}] status report for ref {} to {}: {}",
                         r.mem_index, r.ref_no, r.recipient, r.text);
            }
        }
    }
    Ok(())
}

fn send(session: &mut ModemSession, number: &str, text: &str) -> gsm_modem::GsmResult<()> {
    let mut msg = OutgoingMessage::new(number, text)?;
    let parts = session.send_message(&mut msg)?;
    println!("sent as {} part(s), ref {}", parts, msg.assigned_ref);
    Ok(())
}
