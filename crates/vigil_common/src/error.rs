//! Error taxonomy shared across probes, workflows and the HTTP surface.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Normalized failure kind.
///
/// Probe failures and workflow failures both collapse into one of these, so
/// clients can branch on the kind without parsing messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Timeout,
    ConnectionRefused,
    ProtocolError,
    InvalidRequest,
    DependencyUnavailable,
    InternalError,
    Cancelled,
    NoRecommendations,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::ConnectionRefused => "connection_refused",
            Self::ProtocolError => "protocol_error",
            Self::InvalidRequest => "invalid_request",
            Self::DependencyUnavailable => "dependency_unavailable",
            Self::InternalError => "internal_error",
            Self::Cancelled => "cancelled",
            Self::NoRecommendations => "no_recommendations",
        }
    }

    /// Transport-level kinds are the only ones a probe can report
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Timeout | Self::ConnectionRefused | Self::ProtocolError
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("unknown error kind: {0}")]
pub struct UnknownErrorKind(pub String);

impl FromStr for ErrorKind {
    type Err = UnknownErrorKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "timeout" => Ok(Self::Timeout),
            "connection_refused" => Ok(Self::ConnectionRefused),
            "protocol_error" => Ok(Self::ProtocolError),
            "invalid_request" => Ok(Self::InvalidRequest),
            "dependency_unavailable" => Ok(Self::DependencyUnavailable),
            "internal_error" => Ok(Self::InternalError),
            "cancelled" => Ok(Self::Cancelled),
            "no_recommendations" => Ok(Self::NoRecommendations),
            other => Err(UnknownErrorKind(other.to_string())),
        }
    }
}
