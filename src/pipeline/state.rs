//! Per-asset state machine.

use std::fmt;

use serde::Serialize;

use crate::{ErrorKind, PrepError};

/// Asset processing state.
///
/// `Queued → Extracting → Reconciling → Writing → Validated →
/// [Sampling] → Done`, or `Failed` from any non-terminal state.
/// `Skipped` is only reachable from `Queued`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AssetState {
    Queued,
    Extracting,
    Reconciling,
    /// Container rewrite, telemetry mux and GPX export, run concurrently.
    Writing,
    Validated,
    Sampling,
    Done,
    Failed(ErrorKind),
    Skipped,
}

impl AssetState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed(_) | Self::Skipped)
    }

    fn can_enter(&self, next: &AssetState) -> bool {
        use AssetState::*;
        match (self, next) {
            (s, _) if s.is_terminal() => false,
            (_, Failed(_)) => true,
            (Queued, Extracting | Skipped)
            | (Extracting, Reconciling)
            | (Reconciling, Writing)
            | (Writing, Validated)
            | (Validated, Sampling | Done)
            | (Sampling, Done) => true,
            _ => false,
        }
    }
}

impl fmt::Display for AssetState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed(kind) => write!(f, "Failed({kind})"),
            other => write!(f, "{other:?}"),
        }
    }
}

/// Tracks one asset's state, logging each transition.
#[derive(Debug)]
pub(crate) struct StateTracker {
    asset: String,
    state: AssetState,
}

impl StateTracker {
    pub(crate) fn new(asset: &str) -> Self {
        Self { asset: asset.to_owned(), state: AssetState::Queued }
    }

    pub(crate) fn state(&self) -> AssetState {
        self.state
    }

    /// Moves to `next`. An invalid transition is a logic error,
    /// surfaced as `InvalidConfig` rather than a panic.
    pub(crate) fn enter(&mut self, next: AssetState) -> Result<(), PrepError> {
        if !self.state.can_enter(&next) {
            return Err(PrepError::InvalidConfig(format!(
                "{}: invalid transition {} -> {next}", self.asset, self.state
            )));
        }
        log::debug!("{}: {} -> {next}", self.asset, self.state);
        self.state = next;
        Ok(())
    }

    /// Moves to `Failed` unless already terminal.
    pub(crate) fn fail(&mut self, kind: ErrorKind) {
        if !self.state.is_terminal() {
            log::debug!("{}: {} -> Failed({kind})", self.asset, self.state);
            self.state = AssetState::Failed(kind);
        }
    }
}
