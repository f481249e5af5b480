//! Error types for the match rule engine

use afbus_types::ParseError;
use thiserror::Error;

/// Errors from match maker operations
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MatchError {
    #[error("Invalid match rule: {0}")]
    Parse(#[from] ParseError),

    #[error("Match rule not found: {0}")]
    RuleNotFound(String),
}

impl From<MatchError> for afbus_types::BusError {
    fn from(err: MatchError) -> Self {
        match err {
            MatchError::Parse(e) => afbus_types::BusError::Parse(e),
            MatchError::RuleNotFound(rule) => {
                afbus_types::BusError::InvalidArgument(format!("no such match rule: {rule}"))
            }
        }
    }
}
