//! Periodic liveness polling for a connected printer.
//!
//! Every interval the monitor queries battery state through the shared
//! command channel. Successes reset the failure counter; failures are
//! reported with the running count. The monitor never disconnects on its own;
//! escalation is left to whoever watches the `heartbeatfailed` events.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::channel::CommandChannel;
use crate::events::{EventEmitter, HeartbeatData, PrinterEvent};
use crate::protocol::Command;

/// Default delay between polls.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

/// Owns at most one running poll loop.
pub struct HeartbeatMonitor {
    interval: Duration,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl HeartbeatMonitor {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            task: Mutex::new(None),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .map(|slot| slot.as_ref().is_some_and(|handle| !handle.is_finished()))
            .unwrap_or(false)
    }

    /// Start polling, replacing any loop that is already running.
    pub fn start(&self, channel: Arc<CommandChannel>, events: EventEmitter) {
        self.stop();
        tracing::debug!(interval_ms = self.interval.as_millis() as u64, "Starting heartbeat");
        let handle = tokio::spawn(run(channel, events, self.interval));
        if let Ok(mut slot) = self.task.lock() {
            *slot = Some(handle);
        }
    }

    pub fn stop(&self) {
        let handle = self.task.lock().ok().and_then(|mut slot| slot.take());
        if let Some(handle) = handle {
            tracing::debug!("Stopping heartbeat");
            handle.abort();
        }
    }
}

impl Default for HeartbeatMonitor {
    fn default() -> Self {
        Self::new(HEARTBEAT_INTERVAL)
    }
}

impl Drop for HeartbeatMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Consecutive failure count since the last successful poll.
#[derive(Debug, Default)]
struct FailureCounter {
    count: u32,
}

impl FailureCounter {
    fn reset(&mut self) {
        self.count = 0;
    }

    fn record(&mut self) -> u32 {
        self.count = self.count.saturating_add(1);
        self.count
    }
}

async fn run(channel: Arc<CommandChannel>, events: EventEmitter, interval: Duration) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut failures = FailureCounter::default();

    loop {
        ticker.tick().await;

        let outcome = channel
            .request(Command::get_battery().as_bytes())
            .await
            .map(|r| HeartbeatData::from_battery_response(&r));

        match outcome {
            Ok(Some(data)) => {
                failures.reset();
                tracing::trace!(charge = data.charge_level, charging = data.charging, "Heartbeat");
                events.emit(PrinterEvent::Heartbeat { data });
            }
            Ok(None) => {
                let failed_attempts = failures.record();
                tracing::warn!(failed_attempts, "Heartbeat got no valid battery response");
                events.emit(PrinterEvent::HeartbeatFailed { failed_attempts });
            }
            Err(e) => {
                let failed_attempts = failures.record();
                tracing::warn!(failed_attempts, error = %e, "Heartbeat poll failed");
                events.emit(PrinterEvent::HeartbeatFailed { failed_attempts });
            }
        }
    }
}
