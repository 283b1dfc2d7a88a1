//! Recurring ETA refresh timer.
//!
//! The timer task only sends ticks; the owner applies them. Each tick carries
//! the session epoch it was started for, so ticks still queued after a
//! `clear()` are recognised and dropped.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, trace};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RefreshTick {
    pub epoch: u64,
}

pub type TickSink = mpsc::UnboundedSender<RefreshTick>;

#[derive(Debug)]
pub struct RefreshTimer {
    epoch: u64,
    handle: JoinHandle<()>,
}

impl RefreshTimer {
    /// Start ticking every `period`, first tick one period from now.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(period: Duration, epoch: u64, ticks: TickSink) -> Self {
        debug!(epoch, period_secs = period.as_secs_f64(), "starting refresh timer");

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                interval.tick().await;
                trace!(epoch, "refresh tick");
                if ticks.send(RefreshTick { epoch }).is_err() {
                    break;
                }
            }
        });

        Self { epoch, handle }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    pub fn stop(self) {
        debug!(epoch = self.epoch, "stopping refresh timer");
        // abort happens in Drop
    }
}

impl Drop for RefreshTimer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
