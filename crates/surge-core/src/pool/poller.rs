//! Progress event emission.
//!
//! Pull-based: samples the shared progress state every 150 ms and publishes
//! a `Progress` event while the download is neither paused nor done. The
//! polled session speed gets EMA smoothing so the UI doesn't flicker.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::events::{Event, EventBus};
use crate::progress::ProgressState;

pub(super) const PROGRESS_INTERVAL: Duration = Duration::from_millis(150);

pub(super) fn run(
    state: Arc<ProgressState>,
    events: EventBus,
    stop: Arc<AtomicBool>,
    alpha: f64,
) {
    let mut ema = 0.0f64;
    let mut first = true;
    loop {
        if stop.load(Ordering::Acquire) {
            return;
        }
        if !state.is_paused() && !state.is_done() {
            let snap = state.snapshot();
            let instant = snap.session_speed();
            ema = if first {
                first = false;
                instant
            } else {
                (1.0 - alpha) * ema + alpha * instant
            };
            events.emit(Event::Progress {
                id: state.id(),
                downloaded: snap.downloaded,
                total: snap.total_size,
                speed: ema,
                active_connections: snap.active_workers,
            });
        }
        std::thread::sleep(PROGRESS_INTERVAL);
    }
}
