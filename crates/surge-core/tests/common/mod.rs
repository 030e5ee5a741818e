pub mod range_server;

use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use surge_core::events::Event;

/// Drains an event receiver into a shared log a test can poll.
pub fn spawn_event_log(rx: Receiver<Event>) -> Arc<Mutex<Vec<Event>>> {
    let log = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&log);
    std::thread::spawn(move || {
        for event in rx {
            sink.lock().unwrap().push(event);
        }
    });
    log
}

/// Polls `pred` against the event log until it holds or the timeout runs out.
pub fn wait_for_event<F>(log: &Arc<Mutex<Vec<Event>>>, timeout: Duration, pred: F) -> bool
where
    F: Fn(&[Event]) -> bool,
{
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if pred(&log.lock().unwrap()) {
            return true;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    false
}

/// Polls an arbitrary condition until it holds or the timeout runs out.
pub fn wait_until<F>(timeout: Duration, pred: F) -> bool
where
    F: Fn() -> bool,
{
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if pred() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    false
}
