//! Per-request stage tracking: single pass, forward only.

use crate::error::ClimatologyError;
use log::debug;
use serde::Serialize;
use std::fmt;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    ResolvingLocation,
    SelectingWindow,
    Fetching,
    Aggregating,
    Estimating,
    Done,
    Failed,
}

impl Stage {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Done | Stage::Failed)
    }

    /// The stage that follows on success.
    pub fn next(&self) -> Option<Stage> {
        match self {
            Stage::ResolvingLocation => Some(Stage::SelectingWindow),
            Stage::SelectingWindow => Some(Stage::Fetching),
            Stage::Fetching => Some(Stage::Aggregating),
            Stage::Aggregating => Some(Stage::Estimating),
            Stage::Estimating => Some(Stage::Done),
            Stage::Done | Stage::Failed => None,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::ResolvingLocation => "resolving location",
            Stage::SelectingWindow => "selecting window",
            Stage::Fetching => "fetching",
            Stage::Aggregating => "aggregating",
            Stage::Estimating => "estimating",
            Stage::Done => "done",
            Stage::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Where a request is in the pipeline.
#[derive(Debug)]
pub struct PipelineState {
    stage: Stage,
    failed_at: Option<Stage>,
    started: Instant,
}

impl Default for PipelineState {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineState {
    pub fn new() -> Self {
        Self {
            stage: Stage::ResolvingLocation,
            failed_at: None,
            started: Instant::now(),
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// The stage that was running when the request failed.
    pub fn failed_at(&self) -> Option<Stage> {
        self.failed_at
    }

    /// Moves to the next stage. Only the immediate successor is accepted.
    pub fn advance(&mut self, to: Stage) -> Result<(), ClimatologyError> {
        if self.stage.next() != Some(to) {
            return Err(ClimatologyError::InvalidTransition {
                from: self.stage,
                to,
            });
        }
        debug!(
            "Pipeline {} -> {} after {:?}",
            self.stage,
            to,
            self.started.elapsed()
        );
        self.stage = to;
        Ok(())
    }

    /// Moves straight to `Failed` from any running stage and returns that stage.
    pub fn fail(&mut self) -> Stage {
        let at = self.failed_at.unwrap_or(self.stage);
        if !self.stage.is_terminal() {
            debug!("Pipeline failed while {}", self.stage);
            self.failed_at = Some(self.stage);
            self.stage = Stage::Failed;
        }
        at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runs_forward_to_done() {
        let mut state = PipelineState::new();
        let mut stage = state.stage();
        while let Some(next) = stage.next() {
            state.advance(next).unwrap();
            stage = next;
        }
        assert_eq!(state.stage(), Stage::Done);
        assert!(state.stage().is_terminal());
    }

    #[test]
    fn test_rejects_skips_and_backward_moves() {
        let mut state = PipelineState::new();
        assert!(state.advance(Stage::Fetching).is_err());
        state.advance(Stage::SelectingWindow).unwrap();
        assert!(state.advance(Stage::ResolvingLocation).is_err());
        assert!(state.advance(Stage::Failed).is_err());
        assert_eq!(state.stage(), Stage::SelectingWindow);
    }

    #[test]
    fn test_fail_records_originating_stage() {
        let mut state = PipelineState::new();
        state.advance(Stage::SelectingWindow).unwrap();
        state.advance(Stage::Fetching).unwrap();
        assert_eq!(state.fail(), Stage::Fetching);
        assert_eq!(state.stage(), Stage::Failed);
        assert_eq!(state.failed_at(), Some(Stage::Fetching));
        // Failed is terminal.
        assert!(state.advance(Stage::Aggregating).is_err());
        assert_eq!(state.fail(), Stage::Fetching);
    }
}
