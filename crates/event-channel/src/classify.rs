//! Mapping of transport results to send outcomes.

use serde::{Deserialize, Serialize};

/// What the transport reported for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportResult {
    /// The server answered with this status code.
    Status(u16),
    /// The request never produced a response.
    NetworkError(String),
}

/// Classified result of delivering one batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Success,
    RecoverableFailure(String),
    FatalFailure(String),
}

impl SendOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::RecoverableFailure(_))
    }
}

/// A status code or inclusive range of codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StatusMatcher {
    Exact(u16),
    Range(u16, u16),
}

impl StatusMatcher {
    pub fn matches(&self, status: u16) -> bool {
        match *self {
            Self::Exact(code) => code == status,
            Self::Range(low, high) => (low..=high).contains(&status),
        }
    }
}

/// Which statuses count as delivered and which are worth retrying.
///
/// Anything matching neither list is fatal and the batch is dropped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassificationTable {
    pub success: Vec<StatusMatcher>,
    pub recoverable: Vec<StatusMatcher>,
    pub network_errors_recoverable: bool,
}

impl Default for ClassificationTable {
    fn default() -> Self {
        Self {
            success: vec![StatusMatcher::Range(200, 299)],
            recoverable: vec![
                StatusMatcher::Exact(408),
                StatusMatcher::Exact(429),
                StatusMatcher::Range(500, 599),
            ],
            network_errors_recoverable: true,
        }
    }
}

/// Classify a transport result.
pub fn classify(result: &TransportResult, table: &ClassificationTable) -> SendOutcome {
    match result {
        TransportResult::Status(status) => {
            if table.success.iter().any(|m| m.matches(*status)) {
                SendOutcome::Success
            } else if table.recoverable.iter().any(|m| m.matches(*status)) {
                SendOutcome::RecoverableFailure(format!("HTTP {}", status))
            } else {
                SendOutcome::FatalFailure(format!("HTTP {}", status))
            }
        }
        TransportResult::NetworkError(err) => {
            if table.network_errors_recoverable {
                SendOutcome::RecoverableFailure(err.clone())
            } else {
                SendOutcome::FatalFailure(err.clone())
            }
        }
    }
}
