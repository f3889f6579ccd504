//! Read-only per-tick observers
//!
//! Observers see each tick after it has been judged. They cannot influence
//! the race; renderers, loggers and trace recorders hang off this hook.

use serde::{Deserialize, Serialize};

use super::judge::Verdict;
use super::physics::{Command, RobotState};
use super::sensor::Observation;

/// Everything that happened in one tick
#[derive(Debug, Clone, Copy)]
pub struct TickFrame<'a> {
    pub tick: u64,
    /// Simulated time after the tick (seconds)
    pub elapsed: f64,
    /// What the strategy saw at the start of the tick
    pub observation: &'a Observation,
    /// Command that was integrated (stop on overrun or failure)
    pub command: Command,
    /// Robot after integration
    pub state: &'a RobotState,
    pub lateral_offset: f64,
    /// Lap progress including completed laps and backward motion
    pub unwrapped_progress: f64,
    pub verdict: Verdict,
}

pub trait RaceObserver {
    fn on_tick(&mut self, frame: &TickFrame<'_>);
}

/// Ignores every tick
#[derive(Debug, Clone, Copy, Default)]
pub struct NullObserver;

impl RaceObserver for NullObserver {
    fn on_tick(&mut self, _frame: &TickFrame<'_>) {}
}

/// One recorded tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEntry {
    pub tick: u64,
    pub elapsed: f64,
    pub readings: Vec<f64>,
    pub command: Command,
    pub state: RobotState,
    pub lateral_offset: f64,
    pub progress: f64,
    pub verdict: Verdict,
}

/// Keeps every tick in memory
#[derive(Debug, Clone, Default)]
pub struct TraceRecorder {
    pub entries: Vec<TraceEntry>,
}

impl TraceRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serialize as JSON lines, one tick per line
    pub fn to_json_lines(&self) -> serde_json::Result<String> {
        let mut out = String::new();
        for entry in &self.entries {
            out.push_str(&serde_json::to_string(entry)?);
            out.push('\n');
        }
        Ok(out)
    }
}

impl RaceObserver for TraceRecorder {
    fn on_tick(&mut self, frame: &TickFrame<'_>) {
        self.entries.push(TraceEntry {
            tick: frame.tick,
            elapsed: frame.elapsed,
            readings: frame.observation.readings.clone(),
            command: frame.command,
            state: *frame.state,
            lateral_offset: frame.lateral_offset,
            progress: frame.unwrapped_progress,
            verdict: frame.verdict,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RaceConfig, SensorConfig};
    use crate::sim::control::ControlMode;
    use crate::sim::judge::RaceJudge;
    use crate::sim::strategies::CenterlineOracle;
    use crate::sim::track::TrackShape;

    fn short_race() -> RaceJudge {
        let mut config = RaceConfig::default();
        config.track.shape = TrackShape::Circle { radius: 1.0 };
        config.sensors = SensorConfig::signed_center(0.12, 0.15);
        config.physics.tick_duration = 0.02;
        config.control.mode = ControlMode::Inline;
        config.control.decision_budget_ms = 2000;
        RaceJudge::from_config(&config, Box::new(CenterlineOracle::new(1.0))).unwrap()
    }

    #[test]
    fn test_frames_match_judge_after_each_tick() {
        let mut judge = short_race();
        let mut trace = TraceRecorder::new();
        for _ in 0..20 {
            judge.tick_observed(&mut trace);
            let last = trace.entries.last().unwrap();
            assert_eq!(last.tick, judge.ticks());
            assert_eq!(last.elapsed, judge.elapsed().as_secs());
            assert_eq!(last.state, *judge.state());
            assert_eq!(last.verdict, judge.verdict());
            assert_eq!(last.readings.len(), 1);
        }
        assert_eq!(trace.entries.len(), 20);
    }

    #[test]
    fn test_json_lines_parse_back() {
        let mut judge = short_race();
        let mut trace = TraceRecorder::new();
        for _ in 0..10 {
            judge.tick_observed(&mut trace);
        }

        let text = trace.to_json_lines().unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), trace.entries.len());
        for (line, entry) in lines.iter().zip(&trace.entries) {
            let parsed: TraceEntry = serde_json::from_str(line).unwrap();
            assert_eq!(parsed.tick, entry.tick);
            assert!((parsed.elapsed - entry.elapsed).abs() < 1e-12);
            assert_eq!(parsed.verdict, entry.verdict);
            assert!((parsed.state.position - entry.state.position).length() < 1e-12);
        }
    }

    #[test]
    fn test_null_observer_changes_nothing() {
        let mut watched = short_race();
        let mut unwatched = short_race();
        let mut trace = TraceRecorder::new();
        for _ in 0..15 {
            watched.tick_observed(&mut trace);
            unwatched.tick();
        }
        assert_eq!(watched.state(), unwatched.state());
        assert_eq!(watched.elapsed(), unwatched.elapsed());
    }
}
