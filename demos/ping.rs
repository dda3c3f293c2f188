//! Parent fires pings at a listener running in a child process.
//!
//! The demo re-launches its own executable as the listener and hands it the
//! receiving end of the dispatcher as stdin.
//!
//! Run with: `RUST_LOG=debug cargo run --example ping`

#[cfg(unix)]
fn main() -> anyhow::Result<()> {
    use std::process::Command;

    use mpdispatch::{Args, Dispatcher, Receiver, ReceiverConfig, Signature};
    use tracing_subscriber::EnvFilter;

    const LISTENER: &str = "PING_DEMO_LISTENER";

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    if std::env::var_os(LISTENER).is_some() {
        let mut receiver = Receiver::from_stdin(ReceiverConfig::default())?;
        receiver.connect(
            "ping",
            Signature::new().required("seq").optional("note"),
            |call| {
                let seq: u32 = call.parse("seq")?;
                let note = call.get("note").and_then(|v| v.as_str()).unwrap_or("-");
                println!("[listener {}] ping #{seq} ({note})", std::process::id());
                Ok(())
            },
        );
        let summary = receiver.handle_until_closed()?;
        println!("[listener] closed after {} events", summary.events);
        return Ok(());
    }

    let (mut sender, receiver) = Dispatcher::new()?.into_parts();
    let mut child = Command::new(std::env::current_exe()?)
        .env(LISTENER, "1")
        .stdin(receiver.into_stdio()?)
        .spawn()?;

    for seq in 1..=5 {
        let args = Args::new().arg(seq);
        let args = if seq % 2 == 0 {
            args.kwarg("note", "even")
        } else {
            args
        };
        sender.fire("ping", args)?;
        println!("[parent {}] fired ping #{seq}", std::process::id());
    }
    sender.fire("pong", Args::new())?;
    sender.close()?;

    let status = child.wait()?;
    println!("[parent] listener exited with {status}");
    Ok(())
}

#[cfg(not(unix))]
fn main() {
    eprintln!("the ping demo needs the Unix socket transport");
}
