//! SLOW_TOUPPER - asynchronous calls drained in arrival order.
//!
//! This example demonstrates:
//! - Submitting several calls with continuations attached
//! - Draining the context with a deadline
//! - Routing service failures to an error handler
//!
//! ```text
//! RUST_LOG=tpwire=debug cargo run --example drain
//! ```

use std::time::Duration;

use tpwire::buffer::Buffer;
use tpwire::transport::flags;
use tpwire::transport::loopback::Loopback;
use tpwire::{AsyncCall, ClientConfig, Context, Disposition, Granularity, ServiceHandle};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let domain = Loopback::new()?;
    let config = ClientConfig::default()
        .granularity(Granularity::Millis)
        .limit_drain_timeout(Duration::from_millis(500));
    let ctx = Context::with_config(domain.context(), config);

    ctx.advertise("SLOW_TOUPPER", |mut svc: ServiceHandle| {
        let text = svc.request().as_str().unwrap_or_default().to_uppercase();
        // Longer inputs take longer, so replies arrive out of order.
        std::thread::sleep(Duration::from_millis(200 / (text.len() as u64).max(1)));
        if text == "FAIL" {
            svc.reply(Disposition::Fail, Some(Buffer::string("refused")), Some(-1));
        } else {
            svc.reply(Disposition::Success, Some(Buffer::string(&text)), None);
        }
    })?;

    let mut calls = Vec::new();
    for input in ["a", "bb", "ccc", "fail"] {
        let mut call = AsyncCall::new(&ctx);
        call.on_error(move |e| {
            println!("{} failed: {}", input, e);
            Ok(())
        })
        .then(move |reply| {
            println!("{} -> {}", input, reply.as_str()?);
            Ok(())
        })
        .start("SLOW_TOUPPER", &Buffer::string(input), flags::NONE);
        calls.push(call);
    }

    println!("{} calls pending", ctx.pending_async_calls());
    let drained = ctx.process_pending_async_calls(Duration::from_secs(2));
    println!("drained: {}", drained);

    Ok(())
}
