//! Outbound HTTP client shared by the HTTP checker and the collaborators.

use crate::probe::ProbeError;
use std::time::Duration;
use vigil_common::ErrorKind;

/// Build a client with a hard request timeout
pub fn build_client(timeout: Duration) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .connect_timeout(timeout)
        .user_agent(concat!("vigild/", env!("CARGO_PKG_VERSION")))
        .build()
}

/// Classify a request error into the shared taxonomy
pub fn classify_error(err: &reqwest::Error) -> ErrorKind {
    if err.is_timeout() {
        ErrorKind::Timeout
    } else if err.is_connect() || err.is_request() {
        ErrorKind::ConnectionRefused
    } else {
        ErrorKind::ProtocolError
    }
}

impl From<reqwest::Error> for ProbeError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProbeError::Timeout
        } else if err.is_connect() {
            ProbeError::ConnectionRefused(err.to_string())
        } else if err.is_request() {
            // Failed mid-request, typically a reset
            ProbeError::ConnectionReset(err.to_string())
        } else {
            ProbeError::Protocol(err.to_string())
        }
    }
}
