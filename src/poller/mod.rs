//! The polling scheduler (spec §3 "Poller", §5), grounded in
//! `frappy/modulebase.py`'s `PollInfo`/`Module.__pollThread`.
//!
//! frappy runs one thread per module with its own sleep/poll loop; a single
//! `tokio` task per module achieves the same isolation (a wedged module's
//! hardware I/O can't stall another module's cadence) without a thread per
//! module.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::module::Module;

/// Per-module poll bookkeeping (frappy `PollInfo`): tracks the two
/// independent cadences a module polls at — the fast group on every main
/// loop iteration, the slow group round-robin on its own, longer interval
/// (spec §3 `pollinterval`/`slowinterval`, §4.5).
#[derive(Debug, Clone)]
pub struct PollInfo {
    /// Seconds between fast-group polls of this module.
    pub interval: f64,
    /// Seconds between slow-group polls of this module.
    pub slow_interval: f64,
    pub last_main: f64,
    pub last_slow: f64,
    /// Parameters forced onto the fast cadence regardless of the
    /// round-robin slow schedule (frappy `setFastPoll`).
    pub fast_parameters: BTreeSet<String>,
    /// True while `setFastPoll(True, ...)` is active (e.g. a Drivable is
    /// busy and wants tighter polling of `status`/`value`).
    pub fast_flag: bool,
    pub fast_interval: f64,
}

impl PollInfo {
    pub fn new(interval: f64, slow_interval: f64) -> Self {
        PollInfo {
            interval,
            slow_interval,
            last_main: 0.0,
            last_slow: 0.0,
            fast_parameters: BTreeSet::new(),
            fast_flag: false,
            fast_interval: interval / 5.0,
        }
    }

    pub fn effective_interval(&self) -> f64 {
        if self.fast_flag { self.fast_interval } else { self.interval }
    }

    pub fn due(&self, now: f64) -> bool {
        now - self.last_main >= self.effective_interval()
    }

    pub fn slow_due(&self, now: f64) -> bool {
        now - self.last_slow >= self.slow_interval
    }
}

/// Drives one module's read cadence: fast-group parameters every
/// `interval`, the rest round-robin across a separate, independent
/// `slow_interval` (frappy: "only one parameter from the slow group is
/// polled per iteration of the main loop", but that loop iterates at the
/// fast cadence, so the slow group only actually gets read once
/// `slow_interval` has elapsed since its last read).
pub struct ModulePoller {
    module: Arc<Module>,
    fast_parameters: Vec<String>,
    slow_parameters: Vec<String>,
    interval: Duration,
    info: PollInfo,
}

impl ModulePoller {
    pub fn new(module: Arc<Module>, interval: Duration, slow_interval: Duration) -> Self {
        let mut fast_parameters = Vec::new();
        let mut slow_parameters = Vec::new();
        for (name, param) in &module.parameters {
            if param.constant.is_some() {
                continue;
            }
            // `value`/`status` are the canonical fast-group members on any
            // Readable/Drivable (spec §3); everything else is slow-polled.
            if name == "value" || name == "status" {
                fast_parameters.push(name.clone());
            } else {
                slow_parameters.push(name.clone());
            }
        }
        let info = PollInfo::new(interval.as_secs_f64(), slow_interval.as_secs_f64());
        ModulePoller { module, fast_parameters, slow_parameters, interval, info }
    }

    /// Runs until `cancel` fires. The fast group is read every tick; the
    /// slow group advances one parameter, round-robin, only once
    /// `slow_interval` seconds have actually elapsed since its last read.
    pub async fn run(mut self, cancel: CancellationToken, clock_start: Instant) {
        let mut slow_index = 0usize;
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let now = clock_start.elapsed().as_secs_f64();
                    for p in &self.fast_parameters {
                        let _ = self.module.read(p, now).await;
                    }
                    self.info.last_main = now;
                    if !self.slow_parameters.is_empty() && self.info.slow_due(now) {
                        let p = &self.slow_parameters[slow_index % self.slow_parameters.len()];
                        let _ = self.module.read(p, now).await;
                        slow_index = slow_index.wrapping_add(1);
                        self.info.last_slow = now;
                    }
                }
            }
        }
    }
}
