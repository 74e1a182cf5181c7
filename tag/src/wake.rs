use core::time::Duration;
use log::info;

/// Bookkeeping for the periodic wake-up timer. The first expiry comes one
/// interval after start, then one every interval.
#[derive(Debug, Clone)]
pub struct WakeTimer {
    interval: Duration,
    ticks: u64,
}

impl WakeTimer {
    pub fn new(interval: Duration) -> Self {
        Self { interval, ticks: 0 }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Timer expiry callback
    pub fn on_tick(&mut self) {
        self.ticks += 1;
        info!("Periodic wake-up! (#{})", self.ticks);
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Sleeps one interval before every tick, `limit` ticks or forever
    pub fn run(&mut self, mut sleep: impl FnMut(Duration), limit: Option<u64>) {
        while limit.is_none_or(|limit| self.ticks < limit) {
            sleep(self.interval);
            self.on_tick();
        }
    }
}

/// One iteration of the main loop: log, sleep, log
#[derive(Debug, Clone)]
pub struct SleepCycle {
    period: Duration,
    cycles: u64,
}

impl SleepCycle {
    pub fn new(period: Duration) -> Self {
        Self { period, cycles: 0 }
    }

    pub fn run_once(&mut self, sleep: impl FnOnce(Duration)) {
        info!("Entering sleep mode...");
        sleep(self.period);
        self.cycles += 1;
        info!("Woke up!");
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SLEEP_PERIOD, WAKEUP_INTERVAL};
    use alloc::vec::Vec;

    #[test]
    fn each_tick_follows_one_interval() {
        let mut timer = WakeTimer::new(WAKEUP_INTERVAL);
        let mut clock = Duration::ZERO;
        let mut ticks_at = Vec::new();
        let mut ticks_seen = 0;
        timer.run(
            |interval| {
                clock += interval;
                ticks_at.push((ticks_seen, clock));
                ticks_seen += 1;
            },
            Some(3),
        );
        assert_eq!(timer.ticks(), 3);
        assert_eq!(
            ticks_at,
            [
                (0, Duration::from_secs(5)),
                (1, Duration::from_secs(10)),
                (2, Duration::from_secs(15)),
            ]
        );
    }

    #[test]
    fn run_resumes_from_current_count() {
        let mut timer = WakeTimer::new(WAKEUP_INTERVAL);
        timer.run(|_| {}, Some(2));
        timer.run(|_| {}, Some(5));
        assert_eq!(timer.ticks(), 5);
        timer.run(|_| panic!("no sleep past the limit"), Some(5));
    }

    #[test]
    fn ticks_keep_counting() {
        let mut timer = WakeTimer::new(WAKEUP_INTERVAL);
        for _ in 0..1000 {
            timer.on_tick();
        }
        assert_eq!(timer.ticks(), 1000);
    }

    #[test]
    fn sleep_cycle_sleeps_for_period() {
        let mut cycle = SleepCycle::new(SLEEP_PERIOD);
        let mut slept = Duration::ZERO;
        cycle.run_once(|d| slept += d);
        cycle.run_once(|d| slept += d);
        assert_eq!(slept, Duration::from_secs(10));
        assert_eq!(cycle.cycles(), 2);
    }
}
