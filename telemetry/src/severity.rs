use serde::Serialize;

/// Severity band of a shard's request-rate utilization.
///
/// Storage utilization has no severity mapping; only the request rate is
/// banded.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum Severity {
    #[default]
    Normal,
    Warning,
    Danger,
}

impl Severity {
    /// Band a request utilization percentage: `danger` above 80, `warning`
    /// above 65, `normal` otherwise.
    pub fn from_request_utilization(pct: f64) -> Self {
        if pct > 80.0 {
            Severity::Danger
        } else if pct > 65.0 {
            Severity::Warning
        } else {
            Severity::Normal
        }
    }
}

/// Round to two decimal places, the backend dashboard's display precision.
pub fn round2(n: f64) -> f64 {
    (n * 100.0).round() / 100.0
}

/// Request-rate utilization percentage, capped at 100 for display.
pub fn request_utilization(value: u64, capacity: u64) -> f64 {
    if capacity == 0 {
        return 0.0;
    }
    round2(value as f64 / capacity as f64 * 100.0).clamp(0.0, 100.0)
}

/// Storage utilization percentage. Deliberately not capped: values above
/// 100 indicate overcommit and are shown as such.
pub fn storage_utilization(stored: u64, capacity: u64) -> f64 {
    if capacity == 0 {
        return 0.0;
    }
    round2(stored as f64 / capacity as f64 * 100.0)
}
