use thiserror::Error;
use std::io;

use crate::engine::phases::Phase;

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Configuration error: {0}")]
    InvalidConfig(String),

    #[error("No lanes registered in the market model")]
    NoLanes,

    #[error("Region '{0}' has no configured boards")]
    RegionNotConfigured(String),

    #[error("Scoring oracle error: {0}")]
    Oracle(String),

    #[error("Notification error: {0}")]
    Notification(String),

    #[error("Unknown worker: {0}")]
    UnknownWorker(String),

    #[error("Unknown decision: {0}")]
    UnknownDecision(String),

    #[error("Outcome already recorded for decision {0}")]
    OutcomeAlreadyRecorded(String),

    #[error("No threshold review is pending")]
    NoReviewPending,

    #[error("Illegal phase transition {from:?} -> {to:?}")]
    PhaseTransition { from: Phase, to: Phase },

    #[error("Ledger error: {0}")]
    Ledger(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl DispatchError {
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    pub fn oracle_error(msg: impl Into<String>) -> Self {
        Self::Oracle(msg.into())
    }

    pub fn notification_error(msg: impl Into<String>) -> Self {
        Self::Notification(msg.into())
    }

    pub fn ledger_error(msg: impl Into<String>) -> Self {
        Self::Ledger(msg.into())
    }

    /// Configuration errors are surfaced to the caller and never retried.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::InvalidConfig(_) | Self::NoLanes | Self::RegionNotConfigured(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, DispatchError>;
