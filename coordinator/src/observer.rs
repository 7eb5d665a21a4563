use std::cell::{Cell, RefCell};
use std::time::{Duration, Instant};

use tracing::debug;

use monitor::{MemoryMonitor, MemoryThresholds, MonitorConfig};
use procs::MemoryCondition;

/// Converts the continuous free-memory signal into discrete conditions on a
/// schedule.
///
/// The observer keeps a single deadline rather than a timer: the coordinator
/// drives it with `poll(now)` from the main loop, and each evaluation
/// reschedules the next one. A forced condition override replaces the
/// deadline the same way, so the polling cadence always survives.
pub struct MemoryConditionObserver {
    monitor: RefCell<Box<dyn MemoryMonitor>>,
    thresholds: MemoryThresholds,
    poll_interval: Duration,
    next_poll_at: Cell<Option<Instant>>,
}

impl MemoryConditionObserver {
    pub fn new(
        monitor: Box<dyn MemoryMonitor>,
        thresholds: MemoryThresholds,
        config: MonitorConfig,
    ) -> Self {
        Self {
            monitor: RefCell::new(monitor),
            thresholds,
            poll_interval: config.poll_interval,
            next_poll_at: Cell::new(None),
        }
    }

    /// Schedules the next evaluation `delay` from `now`, superseding any
    /// previously scheduled one.
    pub fn schedule_update_condition(&self, now: Instant, delay: Duration) {
        self.next_poll_at.set(Some(now + delay));
    }

    /// Runs a scheduled evaluation if one is due, then reschedules.
    ///
    /// Returns the classified condition when sampling succeeds. `None` means
    /// either "not due yet" or a failed sample; both leave the condition
    /// unchanged and keep the loop alive.
    pub fn poll(&self, now: Instant) -> Option<MemoryCondition> {
        match self.next_poll_at.get() {
            Some(deadline) if now >= deadline => {}
            _ => return None,
        }
        self.schedule_update_condition(now, self.poll_interval);

        match self.monitor.borrow_mut().available_mb() {
            Some(available_mb) => Some(self.thresholds.classify(available_mb)),
            None => {
                debug!("memory sample unavailable, condition unchanged");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedMonitor(Option<u64>);

    impl MemoryMonitor for FixedMonitor {
        fn available_mb(&mut self) -> Option<u64> {
            self.0
        }
    }

    fn observer(available_mb: Option<u64>) -> MemoryConditionObserver {
        MemoryConditionObserver::new(
            Box::new(FixedMonitor(available_mb)),
            MemoryThresholds::default(),
            MonitorConfig::default(),
        )
    }

    #[test]
    fn nothing_happens_before_the_deadline() {
        let now = Instant::now();
        let observer = observer(Some(4096));
        observer.schedule_update_condition(now, Duration::from_secs(1));

        assert_eq!(observer.poll(now), None);
        assert_eq!(
            observer.poll(now + Duration::from_secs(1)),
            Some(MemoryCondition::Normal)
        );
    }

    #[test]
    fn evaluation_reschedules_at_the_poll_interval() {
        let now = Instant::now();
        let observer = observer(Some(100));
        observer.schedule_update_condition(now, Duration::ZERO);

        assert_eq!(observer.poll(now), Some(MemoryCondition::Critical));
        // Same instant again: the fresh deadline is an interval away.
        assert_eq!(observer.poll(now), None);
        assert_eq!(
            observer.poll(now + MonitorConfig::default().poll_interval),
            Some(MemoryCondition::Critical)
        );
    }

    #[test]
    fn failed_samples_keep_the_cadence() {
        let now = Instant::now();
        let observer = observer(None);
        observer.schedule_update_condition(now, Duration::ZERO);

        assert_eq!(observer.poll(now), None);
        // The failure still rescheduled the next evaluation.
        let later = now + MonitorConfig::default().poll_interval;
        assert_eq!(observer.poll(later), None);
    }
}
