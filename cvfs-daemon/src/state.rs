//! Daemon control state.
//!
//! One struct with named fields: the current phase of the cycle, which indexes
//! exist, and the rebuild watermarks.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::debug;

use cvfs_core::{Error, Result, Timestamp};

/// Where the daemon is in its loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    Optimizing,
    ProcessingQueries,
}

impl Phase {
    /// `Idle -> Optimizing -> ProcessingQueries -> Idle`; any phase may fall
    /// back to `Idle` when a cycle is cut short.
    pub fn can_enter(self, next: Phase) -> bool {
        matches!(
            (self, next),
            (Phase::Idle, Phase::Optimizing)
                | (Phase::Optimizing, Phase::ProcessingQueries)
                | (_, Phase::Idle)
        )
    }
}

/// Last crossed multiple of a rebuild interval
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Watermark {
    multiple: usize,
}

impl Watermark {
    /// True when `count` has reached a multiple of `every` above the last one
    /// seen. A shrinking store lowers the mark without firing, so growing back
    /// past the threshold rebuilds again.
    pub fn crossed(&mut self, count: usize, every: usize) -> bool {
        if every == 0 {
            return false;
        }
        let multiple = count / every;
        if multiple > self.multiple {
            self.multiple = multiple;
            true
        } else {
            self.multiple = multiple;
            false
        }
    }

    pub fn multiple(&self) -> usize {
        self.multiple
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineState {
    pub phase: Phase,
    pub hnsw_built: bool,
    pub ivf_built: bool,
    pub pq_built: bool,
    pub queries_processed: u64,
    pub cycles_completed: u64,
    pub last_operation: String,
    pub hnsw_mark: Watermark,
    pub ivf_mark: Watermark,
    pub pq_mark: Watermark,
}

impl Default for EngineState {
    fn default() -> Self {
        Self {
            phase: Phase::Idle,
            hnsw_built: false,
            ivf_built: false,
            pq_built: false,
            queries_processed: 0,
            cycles_completed: 0,
            last_operation: "none".to_string(),
            hnsw_mark: Watermark::default(),
            ivf_mark: Watermark::default(),
            pq_mark: Watermark::default(),
        }
    }
}

impl EngineState {
    pub fn enter(&mut self, next: Phase) -> Result<()> {
        if !self.phase.can_enter(next) {
            return Err(Error::Internal {
                message: format!("invalid phase transition {:?} -> {:?}", self.phase, next),
            });
        }
        debug!("Daemon phase {:?} -> {:?}", self.phase, next);
        self.phase = next;
        Ok(())
    }

    pub fn note(&mut self, operation: impl Into<String>) {
        self.last_operation = operation.into();
    }
}

/// Written to `daemon_state.txt` on shutdown
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalState {
    pub queries_processed: u64,
    pub vectors_count: usize,
    pub hnsw_built: bool,
    pub last_operation: String,
    pub shutdown_time: Timestamp,
}

impl FinalState {
    pub fn capture(state: &EngineState, vectors_count: usize) -> Self {
        Self {
            queries_processed: state.queries_processed,
            vectors_count,
            hnsw_built: state.hnsw_built,
            last_operation: state.last_operation.clone(),
            shutdown_time: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_cycle() {
        let mut state = EngineState::default();
        state.enter(Phase::Optimizing).unwrap();
        state.enter(Phase::ProcessingQueries).unwrap();
        state.enter(Phase::Idle).unwrap();
        assert!(state.enter(Phase::ProcessingQueries).is_err());
        assert_eq!(state.phase, Phase::Idle);
    }

    #[test]
    fn test_watermark_fires_once_per_multiple() {
        let mut mark = Watermark::default();
        assert!(!mark.crossed(999, 1000));
        assert!(mark.crossed(1000, 1000));
        assert!(!mark.crossed(1500, 1000));
        assert!(mark.crossed(3200, 1000));
        assert_eq!(mark.multiple(), 3);
    }

    #[test]
    fn test_watermark_rearms_after_shrinking() {
        let mut mark = Watermark::default();
        assert!(mark.crossed(1000, 1000));
        assert!(!mark.crossed(400, 1000));
        assert!(mark.crossed(1001, 1000));
    }

    #[test]
    fn test_final_state_serializes() {
        let mut state = EngineState::default();
        state.queries_processed = 3;
        state.hnsw_built = true;
        let json = serde_json::to_value(FinalState::capture(&state, 42)).unwrap();
        assert_eq!(json["queries_processed"], 3);
        assert_eq!(json["vectors_count"], 42);
        assert_eq!(json["hnsw_built"], true);
        assert!(json["shutdown_time"].is_string());
    }
}
