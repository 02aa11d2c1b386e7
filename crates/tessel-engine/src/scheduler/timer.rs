use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tessel_events::ItemId;
use tracing::trace;

use super::command_pass::CommandPlugin;

/// Receives the item of every script whose timer fired
pub type TimerSink = Box<dyn Fn(ItemId) + Send + Sync>;

/// A repeating timer
#[derive(Debug, Clone, Copy)]
struct Timer {
    interval: Duration,
    next_fire: Instant,
}

/// Turns `llSetTimerEvent` schedules into `timer` events
pub struct TimerPlugin {
    timers: Mutex<HashMap<ItemId, Timer>>,
    sink: Mutex<Option<TimerSink>>,
}

impl TimerPlugin {
    pub fn new() -> Self {
        Self {
            timers: Mutex::new(HashMap::new()),
            sink: Mutex::new(None),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ItemId, Timer>> {
        self.timers.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Where fired timers are delivered; replaces any earlier sink
    pub fn set_sink(&self, sink: TimerSink) {
        *self.sink.lock().unwrap_or_else(|e| e.into_inner()) = Some(sink);
    }

    /// Start or replace the item's timer; a zero interval cancels it
    pub fn schedule(&self, item: ItemId, interval: Duration) {
        if interval.is_zero() {
            self.cancel(item);
            return;
        }
        self.lock().insert(
            item,
            Timer {
                interval,
                next_fire: Instant::now() + interval,
            },
        );
    }

    pub fn cancel(&self, item: ItemId) -> bool {
        self.lock().remove(&item).is_some()
    }

    pub fn interval_of(&self, item: ItemId) -> Option<Duration> {
        self.lock().get(&item).map(|t| t.interval)
    }

    /// Items whose timer is due at `now`; each is rescheduled one interval later
    pub fn tick(&self, now: Instant) -> Vec<ItemId> {
        let mut fired = Vec::new();
        for (item, timer) in self.lock().iter_mut() {
            if now >= timer.next_fire {
                fired.push(*item);
                timer.next_fire = now + timer.interval;
            }
        }
        fired
    }

    pub fn active_count(&self) -> usize {
        self.lock().len()
    }
}

impl Default for TimerPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandPlugin for TimerPlugin {
    fn name(&self) -> &str {
        "timers"
    }

    fn poll(&self, now: Instant) -> bool {
        let fired = self.tick(now);
        if !fired.is_empty() {
            trace!(target: "scheduler", "{} timer(s) fired", fired.len());
            if let Some(sink) = self.sink.lock().unwrap_or_else(|e| e.into_inner()).as_ref() {
                for item in fired {
                    sink(item);
                }
            }
        }
        self.active_count() > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread::sleep;

    #[test]
    fn test_timer_repeats() {
        let timers = TimerPlugin::new();
        timers.schedule(ItemId(1), Duration::from_millis(50));

        assert!(timers.tick(Instant::now()).is_empty());

        sleep(Duration::from_millis(60));
        assert_eq!(timers.tick(Instant::now()), vec![ItemId(1)]);
        assert_eq!(timers.active_count(), 1);

        sleep(Duration::from_millis(60));
        assert_eq!(timers.tick(Instant::now()), vec![ItemId(1)]);
    }

    #[test]
    fn test_zero_interval_cancels() {
        let timers = TimerPlugin::new();
        timers.schedule(ItemId(1), Duration::from_secs(10));
        assert_eq!(timers.interval_of(ItemId(1)), Some(Duration::from_secs(10)));

        timers.schedule(ItemId(1), Duration::ZERO);
        assert_eq!(timers.active_count(), 0);
        assert!(!timers.cancel(ItemId(1)));
    }

    #[test]
    fn test_poll_feeds_sink_and_reports_pending_work() {
        let timers = TimerPlugin::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink_seen = Arc::clone(&seen);
        timers.set_sink(Box::new(move |item| sink_seen.lock().unwrap().push(item)));

        assert!(!timers.poll(Instant::now()));

        timers.schedule(ItemId(7), Duration::from_millis(10));
        assert!(timers.poll(Instant::now() + Duration::from_millis(20)));
        assert_eq!(*seen.lock().unwrap(), vec![ItemId(7)]);
    }
}
