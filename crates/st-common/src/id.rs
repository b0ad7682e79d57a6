//! Session and process identity types.
//!
//! Appliance sessions are identified by a positive integer assigned by the
//! appliance. The OS process backing a session is identified by its PID.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors parsing an identifier from operator input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseIdError {
    #[error("identifier is empty")]
    Empty,
    #[error("identifier must be numeric, got {0:?}")]
    NotNumeric(String),
    #[error("identifier must be greater than zero")]
    Zero,
}

/// Appliance-assigned session identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for SessionId {
    fn from(id: u64) -> Self {
        SessionId(id)
    }
}

impl FromStr for SessionId {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_positive(s).map(SessionId)
    }
}

/// OS process ID wrapper with display formatting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProcessId(pub u32);

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for ProcessId {
    fn from(pid: u32) -> Self {
        ProcessId(pid)
    }
}

impl FromStr for ProcessId {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = parse_positive(s)?;
        u32::try_from(value)
            .map(ProcessId)
            .map_err(|_| ParseIdError::NotNumeric(s.trim().to_string()))
    }
}

fn parse_positive(s: &str) -> Result<u64, ParseIdError> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return Err(ParseIdError::Empty);
    }
    // u64::from_str accepts a leading '+', which operators never mean.
    if !trimmed.chars().all(|c| c.is_ascii_digit()) {
        return Err(ParseIdError::NotNumeric(trimmed.to_string()));
    }
    let value = trimmed
        .parse::<u64>()
        .map_err(|_| ParseIdError::NotNumeric(trimmed.to_string()))?;
    if value == 0 {
        return Err(ParseIdError::Zero);
    }
    Ok(value)
}
