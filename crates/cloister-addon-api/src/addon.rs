use std::time::{Duration, Instant, SystemTime};

use anyhow::{anyhow, Result};
use serde::Serialize;

/// The surface an addon author implements.
///
/// Hooks run inside whatever execution context hosts the addon (an isolation
/// domain worker for sandboxed addons, the host itself for trusted ones);
/// they must not assume a particular thread.
pub trait Addon: Send {
    /// Invoked on the Stopped -> Running transition.
    fn on_start(&mut self) -> Result<()> {
        Ok(())
    }

    /// Invoked on the Running -> Stopped transition, before the transition
    /// is committed.
    fn on_stop(&mut self) -> Result<()> {
        Ok(())
    }

    /// Method dispatch. Arguments and result cross the hosting boundary by
    /// value as JSON text.
    fn call(&mut self, method: &str, args_json: &str) -> Result<String> {
        let _ = args_json;
        Err(anyhow!("method `{method}` is not supported"))
    }
}

/// Start/Stop bookkeeping for one addon instance.
///
/// Wall-clock stamps carry the Date* surface; run durations are accumulated
/// from a monotonic clock so they stay correct across wall-clock jumps.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunStats {
    pub is_running: bool,
    pub last_started: Option<SystemTime>,
    pub last_stopped: Option<SystemTime>,
    pub start_count: u64,
    pub stop_count: u64,
    pub overall_run: Duration,
    pub last_run: Duration,
}

/// An addon paired with its lifecycle state machine.
///
/// `start` and `stop` enforce the uniform transition rules; calling `start`
/// while running or `stop` while stopped is a no-op.
pub struct AddonCell {
    addon: Box<dyn Addon>,
    stats: RunStats,
    started_at: Option<Instant>,
}

impl AddonCell {
    pub fn new(addon: Box<dyn Addon>) -> Self {
        Self {
            addon,
            stats: RunStats::default(),
            started_at: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.stats.is_running
    }

    pub fn stats(&self) -> RunStats {
        self.stats.clone()
    }

    /// Stopped -> Running. The transition (count, stamps, running flag) is
    /// committed before the start hook runs; a failing hook leaves the
    /// addon running and propagates, so callers may still `stop` it.
    pub fn start(&mut self) -> Result<()> {
        if self.stats.is_running {
            return Ok(());
        }
        self.stats.start_count += 1;
        self.stats.last_started = Some(SystemTime::now());
        self.stats.last_stopped = None;
        self.started_at = Some(Instant::now());
        self.stats.is_running = true;
        self.addon.on_start()
    }

    /// Running -> Stopped. The stop hook runs first; if it fails the
    /// transition is aborted and the addon stays running.
    pub fn stop(&mut self) -> Result<()> {
        if !self.stats.is_running {
            return Ok(());
        }
        self.addon.on_stop()?;
        let elapsed = self
            .started_at
            .take()
            .map(|t| t.elapsed())
            .unwrap_or_default();
        self.stats.stop_count += 1;
        self.stats.last_stopped = Some(SystemTime::now());
        self.stats.last_run = elapsed;
        self.stats.overall_run += elapsed;
        self.stats.is_running = false;
        Ok(())
    }

    pub fn call(&mut self, method: &str, args_json: &str) -> Result<String> {
        self.addon.call(method, args_json)
    }
}

#[cfg(test)]
mod tests {
    use std::thread::sleep;
    use std::time::Duration;

    use super::*;

    #[derive(Default)]
    struct Probe {
        starts: u32,
        stops: u32,
        fail_stop: bool,
    }

    impl Addon for Probe {
        fn on_start(&mut self) -> Result<()> {
            self.starts += 1;
            Ok(())
        }

        fn on_stop(&mut self) -> Result<()> {
            if self.fail_stop {
                return Err(anyhow!("stop hook refused"));
            }
            self.stops += 1;
            Ok(())
        }

        fn call(&mut self, method: &str, _args_json: &str) -> Result<String> {
            Ok(format!("{method}:{}", self.starts))
        }
    }

    #[test]
    fn start_then_stop_updates_counters_and_durations() {
        let mut cell = AddonCell::new(Box::new(Probe::default()));
        assert!(!cell.is_running());

        cell.start().expect("start");
        let stats = cell.stats();
        assert!(stats.is_running);
        assert_eq!(stats.start_count, 1);
        assert!(stats.last_started.is_some());
        assert!(stats.last_stopped.is_none());

        sleep(Duration::from_millis(5));
        cell.stop().expect("stop");
        let stats = cell.stats();
        assert!(!stats.is_running);
        assert_eq!(stats.stop_count, 1);
        assert!(stats.last_stopped.is_some());
        assert!(stats.last_run >= Duration::from_millis(1));
        assert_eq!(stats.overall_run, stats.last_run);
    }

    #[test]
    fn second_cycle_accumulates_overall_run() {
        let mut cell = AddonCell::new(Box::new(Probe::default()));
        cell.start().expect("start 1");
        sleep(Duration::from_millis(3));
        cell.stop().expect("stop 1");
        let first = cell.stats().last_run;

        cell.start().expect("start 2");
        sleep(Duration::from_millis(3));
        cell.stop().expect("stop 2");
        let stats = cell.stats();
        assert_eq!(stats.start_count, 2);
        assert_eq!(stats.stop_count, 2);
        assert_eq!(stats.overall_run, first + stats.last_run);
    }

    #[test]
    fn redundant_start_and_stop_are_no_ops() {
        let mut cell = AddonCell::new(Box::new(Probe::default()));
        cell.stop().expect("stop while stopped");
        assert_eq!(cell.stats().stop_count, 0);

        cell.start().expect("start");
        cell.start().expect("start while running");
        assert_eq!(cell.stats().start_count, 1);

        cell.stop().expect("stop");
        cell.stop().expect("stop while stopped");
        assert_eq!(cell.stats().stop_count, 1);
    }

    #[test]
    fn failing_stop_hook_keeps_addon_running() {
        let mut cell = AddonCell::new(Box::new(Probe {
            fail_stop: true,
            ..Probe::default()
        }));
        cell.start().expect("start");
        assert!(cell.stop().is_err());
        let stats = cell.stats();
        assert!(stats.is_running);
        assert_eq!(stats.stop_count, 0);
    }
}
