//! TOUPPERC - conversational round-trip.
//!
//! The client keeps the send token for three messages, hands it over with
//! the last one and then receives until the service terminates.
//!
//! ```text
//! RUST_LOG=tpwire=debug cargo run --example conversation
//! ```

use tpwire::buffer::Buffer;
use tpwire::transport::flags;
use tpwire::transport::loopback::Loopback;
use tpwire::{Conversation, Disposition, ServiceHandle};
use tracing_subscriber::EnvFilter;

fn toupperc(mut svc: ServiceHandle) {
    let mut received = Vec::new();
    while svc.conversation().in_receive_mode() {
        match svc.conversation().receive(flags::NONE, None) {
            Ok(message) => received.push(message.as_str().unwrap_or_default().to_uppercase()),
            Err(e) => {
                tracing::warn!("Receive failed: {}", e);
                return;
            }
        }
    }

    let last = received.pop();
    for text in &received {
        if let Err(e) = svc.conversation().send(&Buffer::string(text), flags::NONE) {
            tracing::warn!("Send failed: {}", e);
            return;
        }
    }
    svc.reply(Disposition::Success, last.map(|t| Buffer::string(&t)), None);
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let domain = Loopback::new()?;
    let ctx = domain.client();
    ctx.advertise("TOUPPERC", toupperc)?;

    let mut conv = Conversation::new(&ctx);
    conv.connect("TOUPPERC", &Buffer::new(), flags::SENDONLY)?;
    conv.send(&Buffer::string("hello"), flags::NONE)?;
    conv.send(&Buffer::string("world"), flags::NONE)?;
    conv.send(&Buffer::string("foo"), flags::RECVONLY)?;

    let mut recycled = Buffer::new();
    while conv.in_receive_mode() {
        let reply = conv.receive(flags::NONE, Some(&mut recycled))?;
        println!("received {}", reply.as_str()?);
    }
    println!("closed gracefully: {}", conv.closed_gracefully());

    Ok(())
}
