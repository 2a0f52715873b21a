//! Nested transaction accounting.
//!
//! A handle is always in one of three states. The transition tables differ by
//! execution mode:
//!
//! | state  | begin (live) | begin (debug)  | commit/rollback (live) | commit/rollback (debug) |
//! |--------|--------------|----------------|------------------------|-------------------------|
//! | NONE   | OPEN + BEGIN | OPEN + BEGIN   | error                  | error                   |
//! | OPEN   | error        | NESTED         | NONE + COMMIT/ROLLBACK | error                   |
//! | NESTED | error        | error          | error                  | OPEN                    |
//!
//! In debug mode the physical transaction opened by the outer `begin` is never
//! finished, so nothing done during a debug request is persisted.

use crate::error::{DbError, DbResult};
use crate::models::ExecutionMode;
use serde::Serialize;

/// Transaction state of a single handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TxState {
    #[default]
    None,
    Open,
    Nested,
}

impl TxState {
    pub fn depth(&self) -> u32 {
        match self {
            TxState::None => 0,
            TxState::Open => 1,
            TxState::Nested => 2,
        }
    }

    /// Maximum depth a handle may reach in the given mode.
    pub fn ceiling(mode: ExecutionMode) -> u32 {
        match mode {
            ExecutionMode::Live => 1,
            ExecutionMode::Debug => 2,
        }
    }

    /// Compute the result of `begin` without applying it.
    pub fn begin(self, mode: ExecutionMode) -> DbResult<Transition> {
        match (self, mode) {
            (TxState::None, _) => Ok(Transition::physical(TxState::Open, TxAction::Begin)),
            (TxState::Open, ExecutionMode::Debug) => Ok(Transition::logical(TxState::Nested)),
            (TxState::Open, ExecutionMode::Live) => Err(DbError::transaction_state(
                "A transaction has already been started; nested transactions are not supported in live mode",
                self.depth(),
            )),
            (TxState::Nested, _) => Err(DbError::transaction_state(
                "Maximum transaction nesting reached",
                self.depth(),
            )),
        }
    }

    /// Compute the result of `commit` without applying it.
    pub fn commit(self, mode: ExecutionMode) -> DbResult<Transition> {
        self.finish(mode, TxAction::Commit)
    }

    /// Compute the result of `rollback` without applying it.
    pub fn rollback(self, mode: ExecutionMode) -> DbResult<Transition> {
        self.finish(mode, TxAction::Rollback)
    }

    fn finish(self, mode: ExecutionMode, action: TxAction) -> DbResult<Transition> {
        let verb = action.verb();
        match (self, mode) {
            (TxState::None, _) => Err(DbError::transaction_state(
                format!("Failed to {verb}. No transaction exists"),
                0,
            )),
            (TxState::Open, ExecutionMode::Live) => {
                Ok(Transition::physical(TxState::None, action))
            }
            (TxState::Open, ExecutionMode::Debug) => Err(DbError::transaction_state(
                format!("Failed to {verb}. No true transaction exists"),
                1,
            )),
            (TxState::Nested, ExecutionMode::Debug) => Ok(Transition::logical(TxState::Open)),
            (TxState::Nested, ExecutionMode::Live) => Err(DbError::transaction_state(
                format!("Failed to {verb}. Nested state is not reachable in live mode"),
                2,
            )),
        }
    }
}

impl std::fmt::Display for TxState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TxState::None => "NONE",
            TxState::Open => "OPEN",
            TxState::Nested => "NESTED",
        };
        write!(f, "{}", name)
    }
}

/// Statement to send to the physical connection for a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxAction {
    Begin,
    Commit,
    Rollback,
}

impl TxAction {
    fn verb(&self) -> &'static str {
        match self {
            TxAction::Begin => "begin",
            TxAction::Commit => "commit",
            TxAction::Rollback => "roll back",
        }
    }
}

/// Outcome of a permitted transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub next: TxState,
    /// `None` when the transition is purely logical.
    pub action: Option<TxAction>,
}

impl Transition {
    fn physical(next: TxState, action: TxAction) -> Self {
        Self {
            next,
            action: Some(action),
        }
    }

    fn logical(next: TxState) -> Self {
        Self { next, action: None }
    }
}
