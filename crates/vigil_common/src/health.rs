//! Health report types.

use crate::error::ErrorKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Status of a single dependency as seen by one probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeStatus {
    Available,
    Degraded,
    Unavailable,
}

impl ProbeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Available => "available",
            Self::Degraded => "degraded",
            Self::Unavailable => "unavailable",
        }
    }
}

/// How much a dependency matters to the overall verdict
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Criticality {
    Critical,
    #[default]
    Optional,
}

/// Overall verdict of a health report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverallStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl OverallStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Unhealthy => "unhealthy",
        }
    }

    /// Degraded still serves traffic; only unhealthy does not
    pub fn is_serving(&self) -> bool {
        !matches!(self, Self::Unhealthy)
    }
}

/// Outcome of one probe invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeResult {
    pub name: String,
    pub status: ProbeStatus,
    /// End-to-end probe latency, in milliseconds on the wire
    #[serde(with = "duration_ms")]
    pub response_time: Duration,
    pub last_check: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ProbeResult {
    pub fn available(name: &str, response_time: Duration) -> Self {
        Self {
            name: name.to_string(),
            status: ProbeStatus::Available,
            response_time,
            last_check: Utc::now(),
            error: None,
            message: None,
        }
    }

    pub fn degraded(name: &str, response_time: Duration, reason: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            status: ProbeStatus::Degraded,
            response_time,
            last_check: Utc::now(),
            error: None,
            message: Some(reason.into()),
        }
    }

    pub fn unavailable(
        name: &str,
        response_time: Duration,
        kind: ErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            name: name.to_string(),
            status: ProbeStatus::Unavailable,
            response_time,
            last_check: Utc::now(),
            error: Some(kind),
            message: Some(message.into()),
        }
    }

    /// Result for a probe abandoned at the aggregate deadline
    pub fn timed_out(name: &str, response_time: Duration) -> Self {
        Self::unavailable(
            name,
            response_time,
            ErrorKind::Timeout,
            "probe did not finish before the aggregate deadline",
        )
    }
}

/// Full health document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: OverallStatus,
    pub timestamp: DateTime<Utc>,
    pub service: String,
    pub version: String,
    /// Seconds since process start
    pub uptime: u64,
    pub dependencies: Vec<ProbeResult>,
    pub metrics: BTreeMap<String, f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_metrics: Option<BTreeMap<String, f64>>,
}

impl HealthReport {
    pub fn dependency(&self, name: &str) -> Option<&ProbeResult> {
        self.dependencies.iter().find(|d| d.name == name)
    }

    pub fn summary(&self) -> HealthSummary {
        HealthSummary {
            status: if self.status.is_serving() {
                SummaryStatus::Healthy
            } else {
                SummaryStatus::Unhealthy
            },
            timestamp: self.timestamp,
            service: self.service.clone(),
        }
    }
}

/// Binary status used by the summary endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SummaryStatus {
    Healthy,
    Unhealthy,
}

/// Liveness/readiness summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSummary {
    pub status: SummaryStatus,
    pub timestamp: DateTime<Utc>,
    pub service: String,
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis().min(u64::MAX as u128) as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}
