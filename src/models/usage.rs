use serde::{Deserialize, Serialize};

/// Pre-call quota view of one user.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QuotaStatus {
    pub available: bool,
    pub remaining_minutes: f64,
    pub unlimited: bool,
}

impl QuotaStatus {
    /// What the guard reports when the backend can't be reached.
    pub fn fail_open() -> Self {
        Self {
            available: true,
            remaining_minutes: 0.0,
            unlimited: false,
        }
    }
}

/// Balance as the usage backend reports it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MinutesBalance {
    #[serde(default)]
    pub remaining_minutes: f64,
    #[serde(default)]
    pub total_minutes: f64,
    #[serde(default)]
    pub used_minutes: f64,
}

impl MinutesBalance {
    pub fn status(&self) -> QuotaStatus {
        let unlimited = self.total_minutes <= 0.0;
        QuotaStatus {
            available: unlimited || self.remaining_minutes > 0.0,
            remaining_minutes: self.remaining_minutes,
            unlimited,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeductionOutcome {
    #[serde(default)]
    pub minutes_deducted: u64,
    #[serde(default)]
    pub new_used: f64,
    #[serde(default)]
    pub minutes_limit: f64,
    #[serde(default)]
    pub remaining_minutes: f64,
    #[serde(default)]
    pub exceeded_limit: bool,
}

/// Whole minutes billed for `seconds`, rounded up.
pub fn billable_minutes(seconds: u64) -> u64 {
    seconds.div_ceil(60)
}
