use crate::error::ApiError;

const TRANSIENT_STATUSES: [u16; 3] = [502, 503, 504];
const TRANSIENT_STATUS_RANGE: std::ops::RangeInclusive<u16> = 520..=529;

const NETWORK_FAILURE_PATTERNS: [&str; 9] = [
    "connection refused",
    "connection reset",
    "connection closed",
    "failed to fetch",
    "error sending request",
    "dns error",
    "network unreachable",
    "timed out",
    "broken pipe",
];

/// Decides whether a failed call is worth retrying.
///
/// Every poller and the commit retry loop consult the same instance, so
/// batch jobs, deferred search and unit commits share one retry policy.
#[derive(Debug, Default, Clone, Copy)]
pub struct TransientErrorClassifier;

static SHARED: TransientErrorClassifier = TransientErrorClassifier;

impl TransientErrorClassifier {
    pub fn shared() -> &'static TransientErrorClassifier {
        &SHARED
    }

    pub fn is_transient(&self, error: &ApiError) -> bool {
        if let Some(explicit) = error.transient {
            return explicit;
        }
        if let Some(status) = error.status {
            return TRANSIENT_STATUSES.contains(&status) || TRANSIENT_STATUS_RANGE.contains(&status);
        }
        let lower = error.message.to_lowercase();
        NETWORK_FAILURE_PATTERNS
            .iter()
            .any(|pattern| lower.contains(pattern))
    }
}

pub fn is_transient(error: &ApiError) -> bool {
    TransientErrorClassifier::shared().is_transient(error)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gateway_and_origin_statuses_are_transient() {
        for status in [502, 503, 504, 520, 524, 529] {
            assert!(is_transient(&ApiError::http(status, "upstream")), "{status}");
        }
    }

    #[test]
    fn other_statuses_are_terminal() {
        for status in [400, 401, 404, 409, 422, 500, 501, 505, 519, 530] {
            assert!(!is_transient(&ApiError::http(status, "nope")), "{status}");
        }
    }

    #[test]
    fn explicit_override_wins_over_status() {
        let forced = ApiError::http(400, "rate limited").with_transient(true);
        assert!(is_transient(&forced));
        let vetoed = ApiError::http(503, "maintenance").with_transient(false);
        assert!(!is_transient(&vetoed));
    }

    #[test]
    fn network_signatures_are_transient_without_status() {
        assert!(is_transient(&ApiError::network(
            "error sending request for url (http://127.0.0.1:1/units/a)"
        )));
        assert!(is_transient(&ApiError::network("Connection refused (os error 111)")));
        assert!(!is_transient(&ApiError::network("certificate has expired")));
    }
}
