use std::time::{Duration, Instant};
use super::consts::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    Idle,
    Moving,
    Settling,
    Done,
    Timeout,
    NoMovement,
}

impl MonitorState {
    pub fn is_finished(self) -> bool {
        matches!(self, Self::Done|Self::Timeout|Self::NoMovement)
    }
}

/// Raw stepper encoder counts
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct StepperPosition {
    pub ra_steps:  f64,
    pub dec_steps: f64,
}

impl StepperPosition {
    fn is_moved_from(&self, other: &StepperPosition) -> bool {
        f64::abs(self.ra_steps - other.ra_steps) > MOTION_THRESHOLD_STEPS ||
        f64::abs(self.dec_steps - other.dec_steps) > MOTION_THRESHOLD_STEPS
    }
}

/// Decides when slew is complete by watching encoder counts.
/// Motor encoders are used instead of coordinates because
/// coordinates change all the time while mount is tracking
pub struct GotoMonitor {
    timeout:      Duration,
    state:        MonitorState,
    prev:         Option<StepperPosition>,
    stable_count: usize,
    motion_seen:  bool,
}

impl GotoMonitor {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            state:        MonitorState::Idle,
            prev:         None,
            stable_count: 0,
            motion_seen:  false,
        }
    }

    pub fn state(&self) -> MonitorState {
        self.state
    }

    /// Processes next sample. `elapsed` is time since goto command.
    /// Samples that could not be read are skipped
    pub fn feed(
        &mut self,
        sample:  Option<StepperPosition>,
        elapsed: Duration,
    ) -> MonitorState {
        if self.state.is_finished() {
            return self.state;
        }
        if elapsed >= self.timeout {
            self.state = MonitorState::Timeout;
            return self.state;
        }
        let Some(sample) = sample else {
            return self.state;
        };
        let Some(prev) = self.prev.replace(sample) else {
            // baseline
            return self.state;
        };

        if sample.is_moved_from(&prev) {
            self.motion_seen = true;
            self.stable_count = 0;
            self.state = MonitorState::Moving;
        } else {
            self.stable_count += 1;
            self.state = if self.motion_seen {
                if self.stable_count >= STABLE_SAMPLES_DONE {
                    MonitorState::Done
                } else {
                    MonitorState::Settling
                }
            } else if self.stable_count >= STABLE_SAMPLES_NO_MOVEMENT {
                MonitorState::NoMovement
            } else {
                MonitorState::Idle
            };
        }
        self.state
    }

    /// Polls `read_fn` every `poll_period` until motion is finished
    pub fn wait(
        &mut self,
        poll_period: Duration,
        mut read_fn: impl FnMut() -> Option<StepperPosition>,
    ) -> MonitorState {
        let start = Instant::now();
        loop {
            let sample = read_fn();
            let state = self.feed(sample, start.elapsed());
            if state.is_finished() {
                return state;
            }
            sleep(poll_period);
        }
    }
}

#[cfg(test)]
fn feed_deltas(monitor: &mut GotoMonitor, deltas: &[f64]) -> Vec<MonitorState> {
    let mut ra = 1000.0;
    let mut result = Vec::new();
    monitor.feed(Some(StepperPosition { ra_steps: ra, dec_steps: 0.0 }), Duration::ZERO);
    for delta in deltas {
        ra += delta;
        let pos = StepperPosition { ra_steps: ra, dec_steps: 0.0 };
        result.push(monitor.feed(Some(pos), Duration::ZERO));
    }
    result
}

#[test]
fn test_goto_monitor_done() {
    use MonitorState::*;
    let mut monitor = GotoMonitor::new(Duration::from_secs(120));
    assert_eq!(monitor.state(), Idle);
    let states = feed_deltas(&mut monitor, &[150.0, 150.0, 150.0, 20.0, 10.0, 5.0, 5.0]);
    assert_eq!(states, [Moving, Moving, Moving, Settling, Settling, Settling, Done]);

    // finished monitor ignores further samples
    let pos = StepperPosition { ra_steps: 0.0, dec_steps: 0.0 };
    assert_eq!(monitor.feed(Some(pos), Duration::from_secs(500)), Done);
}

#[test]
fn test_goto_monitor_motion_resumes() {
    use MonitorState::*;
    let mut monitor = GotoMonitor::new(Duration::from_secs(120));
    let states = feed_deltas(&mut monitor, &[500.0, 0.0, 0.0, 300.0, 0.0, 0.0, 0.0, 0.0]);
    assert_eq!(states, [Moving, Settling, Settling, Moving, Settling, Settling, Settling, Done]);
}

#[test]
fn test_goto_monitor_dec_axis_motion() {
    let mut monitor = GotoMonitor::new(Duration::from_secs(120));
    monitor.feed(Some(StepperPosition { ra_steps: 0.0, dec_steps: 0.0 }), Duration::ZERO);
    let state = monitor.feed(
        Some(StepperPosition { ra_steps: 0.0, dec_steps: -101.0 }),
        Duration::ZERO
    );
    assert_eq!(state, MonitorState::Moving);
}

#[test]
fn test_goto_monitor_no_movement() {
    use MonitorState::*;
    let mut monitor = GotoMonitor::new(Duration::from_secs(120));
    let states = feed_deltas(&mut monitor, &[0.0, 10.0, 0.0, 50.0, 0.0, 0.0]);
    assert_eq!(states, [Idle, Idle, Idle, Idle, Idle, NoMovement]);
}

#[test]
fn test_goto_monitor_timeout() {
    let mut monitor = GotoMonitor::new(Duration::from_secs(10));
    let mut ra = 0.0;
    let mut state = MonitorState::Idle;
    for i in 0..100 {
        ra += 1000.0;
        let pos = StepperPosition { ra_steps: ra, dec_steps: 0.0 };
        state = monitor.feed(Some(pos), Duration::from_millis(500 * i));
        if state.is_finished() {
            break;
        }
    }
    assert_eq!(state, MonitorState::Timeout);
}

#[test]
fn test_goto_monitor_skips_missing_samples() {
    use MonitorState::*;
    let mut monitor = GotoMonitor::new(Duration::from_secs(120));
    assert_eq!(monitor.feed(None, Duration::ZERO), Idle);
    monitor.feed(Some(StepperPosition { ra_steps: 0.0, dec_steps: 0.0 }), Duration::ZERO);
    assert_eq!(monitor.feed(Some(StepperPosition { ra_steps: 200.0, dec_steps: 0.0 }), Duration::ZERO), Moving);
    assert_eq!(monitor.feed(None, Duration::ZERO), Moving);
    for _ in 0..10 {
        assert_eq!(monitor.feed(None, Duration::ZERO), Moving);
    }
}

#[test]
fn test_goto_monitor_wait() {
    let samples = [0.0, 400.0, 800.0, 800.0, 800.0, 800.0, 800.0];
    let mut idx = 0;
    let mut monitor = GotoMonitor::new(Duration::from_secs(120));
    let state = monitor.wait(Duration::ZERO, || {
        let ra = samples[idx.min(samples.len() - 1)];
        idx += 1;
        Some(StepperPosition { ra_steps: ra, dec_steps: 0.0 })
    });
    assert_eq!(state, MonitorState::Done);
    assert_eq!(idx, samples.len());
}
