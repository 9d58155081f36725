//! TOUPPER - synchronous request/response.
//!
//! This example demonstrates:
//! - Advertising a service routine on a loopback domain
//! - Calling it synchronously and reusing one output buffer
//! - Inspecting a service failure and its payload
//!
//! ```text
//! RUST_LOG=tpwire=debug cargo run --example toupper -- hello world
//! ```

use tpwire::buffer::{Buffer, BufferType};
use tpwire::transport::flags;
use tpwire::transport::loopback::Loopback;
use tpwire::{Disposition, ServiceHandle};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let domain = Loopback::new()?;
    let ctx = domain.client();

    ctx.advertise("TOUPPER", |mut svc: ServiceHandle| {
        match svc.request().as_str() {
            Ok(text) => {
                let upper = text.to_uppercase();
                svc.reply(Disposition::Success, Some(Buffer::string(&upper)), None);
            }
            Err(_) => {
                svc.reply(Disposition::Fail, Some(Buffer::string("not text")), Some(-1));
            }
        }
    })?;

    let words: Vec<String> = std::env::args().skip(1).collect();
    let words = if words.is_empty() {
        vec!["hello".to_string()]
    } else {
        words
    };

    let mut output = Buffer::alloc(BufferType::String, 64);
    for word in &words {
        let reply = ctx.call("TOUPPER", &Buffer::string(word), flags::NONE, Some(&mut output))?;
        println!("{} -> {}", word, reply.as_str()?);
    }

    match ctx.call("TOUPPER", &Buffer::carray(&[0xff, 0xfe]), flags::NONE, None) {
        Ok(_) => println!("unexpected success"),
        Err(e) => {
            if let Some(failure) = e.service_failure() {
                println!(
                    "{} failed with code {}: {}",
                    failure.service(),
                    failure.user_code(),
                    failure.buffer().as_str()?
                );
            }
        }
    }

    Ok(())
}
