//! Escalation rules: dependency states -> overall verdict
//!
//! - any critical dependency unavailable -> unhealthy
//! - else any dependency degraded, or any optional one unavailable -> degraded
//! - else healthy
//!
//! The result depends only on the multiset of (criticality, status) pairs,
//! never on their order.

use vigil_common::{Criticality, OverallStatus, ProbeStatus};

pub fn escalate<I>(entries: I) -> OverallStatus
where
    I: IntoIterator<Item = (Criticality, ProbeStatus)>,
{
    let mut degraded = false;

    for entry in entries {
        match entry {
            (Criticality::Critical, ProbeStatus::Unavailable) => return OverallStatus::Unhealthy,
            (_, ProbeStatus::Degraded) | (Criticality::Optional, ProbeStatus::Unavailable) => {
                degraded = true
            }
            (_, ProbeStatus::Available) => {}
        }
    }

    if degraded {
        OverallStatus::Degraded
    } else {
        OverallStatus::Healthy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use Criticality::*;
    use ProbeStatus::*;

    #[test]
    fn test_empty_is_healthy() {
        assert_eq!(escalate(Vec::new()), OverallStatus::Healthy);
    }

    #[test]
    fn test_all_available_healthy() {
        assert_eq!(
            escalate(vec![(Critical, Available), (Optional, Available)]),
            OverallStatus::Healthy
        );
    }

    #[test]
    fn test_critical_unavailable_unhealthy() {
        assert_eq!(
            escalate(vec![(Optional, Available), (Critical, Unavailable)]),
            OverallStatus::Unhealthy
        );
    }

    #[test]
    fn test_critical_degraded_is_only_degraded() {
        assert_eq!(escalate(vec![(Critical, Degraded)]), OverallStatus::Degraded);
    }

    #[test]
    fn test_optional_unavailable_degraded() {
        assert_eq!(
            escalate(vec![(Critical, Available), (Optional, Unavailable)]),
            OverallStatus::Degraded
        );
    }

    #[test]
    fn test_order_independent() {
        let entries = vec![
            (Optional, Degraded),
            (Critical, Available),
            (Optional, Unavailable),
            (Critical, Unavailable),
        ];
        let forward = escalate(entries.clone());
        let backward = escalate(entries.into_iter().rev());
        assert_eq!(forward, backward);
        assert_eq!(forward, OverallStatus::Unhealthy);
    }
}
