//! Sender and receiver in separate OS processes.
//!
//! Each test re-executes this test binary as the child, selecting the child's
//! role through an environment variable and passing the transport endpoint as
//! the child's stdin. The child reports what its handlers saw on stdout.
#![cfg(unix)]

use std::process::{Child, Command, Stdio};
use std::time::Duration;

use mpdispatch::config::DEFAULT_MAX_FRAME_LEN;
use mpdispatch::{
    Args, DispatchError, Dispatcher, Receiver, ReceiverConfig, Sender, Signature, Step,
    TransportError,
};

const ROLE: &str = "MPDISPATCH_TEST_ROLE";

fn spawn_child(role: &str, stdin: Stdio) -> Child {
    Command::new(std::env::current_exe().unwrap())
        .args(["--exact", "child_entry", "--nocapture", "--test-threads=1", "-q"])
        .env(ROLE, role)
        .stdin(stdin)
        .stdout(Stdio::piped())
        .spawn()
        .unwrap()
}

fn reported(child: Child) -> Vec<String> {
    let output = child.wait_with_output().unwrap();
    assert!(output.status.success(), "child failed: {output:?}");
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .filter_map(|l| l.strip_prefix("REPORT ").map(str::to_owned))
        .collect()
}

/// Entry point of the child process. A no-op in the parent test run.
#[test]
fn child_entry() {
    let Ok(role) = std::env::var(ROLE) else {
        return;
    };
    match role.as_str() {
        "receiver" => {
            let mut receiver = Receiver::from_stdin(ReceiverConfig::default()).unwrap();
            receiver.connect("cb", Signature::new().required("n"), |call| {
                let n: i64 = call.parse("n")?;
                println!("REPORT cb {n}");
                Ok(())
            });
            let summary = receiver.handle_until_closed().unwrap();
            println!("REPORT closed after {}", summary.events);
        }
        "sender" => {
            let mut sender = Sender::from_stdin(DEFAULT_MAX_FRAME_LEN).unwrap();
            sender.fire("cb", Args::new().arg(54)).unwrap();
            sender.fire("cb", Args::new().kwarg("n", 55)).unwrap();
            sender.close().unwrap();
        }
        "crashing-sender" => {
            let mut sender = Sender::from_stdin(DEFAULT_MAX_FRAME_LEN).unwrap();
            sender.fire("cb", Args::new().arg(1)).unwrap();
            // Exit without closing.
        }
        other => panic!("unknown child role {other:?}"),
    }
}

#[test]
fn handlers_run_in_the_child() {
    let (mut sender, receiver) = Dispatcher::new().unwrap().into_parts();
    let child = spawn_child("receiver", receiver.into_stdio().unwrap());

    sender.fire("cb", Args::new().arg(54)).unwrap();
    sender.fire("unrelated", Args::new().arg("ignored")).unwrap();
    sender.fire("cb", Args::new().arg(55)).unwrap();
    sender.close().unwrap();

    assert_eq!(
        reported(child),
        ["cb 54", "cb 55", "closed after 3"]
    );
}

#[test]
fn handlers_run_in_the_parent() {
    let (sender, mut receiver) = Dispatcher::new().unwrap().into_parts();
    let child = spawn_child("sender", sender.into_stdio().unwrap());

    let seen = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
    let sink = std::sync::Arc::clone(&seen);
    receiver.connect("cb", Signature::new().required("n"), move |call| {
        sink.lock().unwrap().push(call.parse::<i64>("n")?);
        Ok(())
    });

    assert_eq!(
        receiver.handle_next_timeout(Duration::from_secs(10)).unwrap(),
        Some(Step::Dispatched { handlers: 1 })
    );
    let summary = receiver.handle_until_closed().unwrap();
    assert_eq!(summary.events, 1);
    assert_eq!(*seen.lock().unwrap(), vec![54, 55]);
    assert!(reported(child).is_empty());
}

#[test]
fn dead_sender_is_a_transport_error() {
    let (sender, mut receiver) = Dispatcher::new().unwrap().into_parts();
    let child = spawn_child("crashing-sender", sender.into_stdio().unwrap());
    reported(child);

    assert_eq!(
        receiver.handle_next().unwrap(),
        Step::Dispatched { handlers: 0 }
    );
    assert!(matches!(
        receiver.handle_next(),
        Err(DispatchError::Transport(TransportError::Disconnected))
    ));
    assert!(!receiver.is_closed());
}

#[test]
fn closed_sender_cannot_be_handed_off() {
    let (mut sender, receiver) = Dispatcher::new().unwrap().into_parts();
    sender.close().unwrap();
    assert!(matches!(
        sender.into_stdio(),
        Err(DispatchError::DispatcherClosed)
    ));

    let mut receiver = Receiver::from_owned_fd(
        receiver.into_owned_fd().unwrap(),
        ReceiverConfig::default(),
    );
    assert_eq!(receiver.handle_next().unwrap(), Step::Closed);
    assert!(matches!(
        receiver.into_owned_fd(),
        Err(DispatchError::AlreadyClosed)
    ));
}
