use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::models::usage::billable_minutes;
use crate::models::{DeductionOutcome, MinutesBalance, QuotaStatus};

/// External minute ledger keyed by user id.
#[async_trait]
pub trait UsageBackend: Send + Sync {
    async fn balance(&self, user_id: &str) -> anyhow::Result<MinutesBalance>;
    async fn deduct(&self, user_id: &str, minutes: u64) -> anyhow::Result<DeductionOutcome>;
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    success: bool,
    data: Option<T>,
    #[serde(default)]
    error: Option<String>,
}

impl<T> Envelope<T> {
    fn into_data(self, what: &str) -> anyhow::Result<T> {
        if !self.success {
            anyhow::bail!(
                "usage API {what} failed: {}",
                self.error.unwrap_or_else(|| "unknown error".to_string())
            );
        }
        self.data
            .ok_or_else(|| anyhow::anyhow!("usage API {what} response has no data"))
    }
}

pub struct HttpUsageBackend {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl HttpUsageBackend {
    pub fn new(base_url: String, api_key: String) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
        }
    }
}

#[async_trait]
impl UsageBackend for HttpUsageBackend {
    async fn balance(&self, user_id: &str) -> anyhow::Result<MinutesBalance> {
        let resp = self
            .client
            .get(format!("{}/api/v1/users/{user_id}/minutes", self.base_url))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .context("failed to call usage API")?;

        let status = resp.status();
        if !status.is_success() {
            anyhow::bail!("usage API error ({status})");
        }
        let envelope: Envelope<MinutesBalance> = resp
            .json()
            .await
            .context("failed to parse usage balance")?;
        envelope.into_data("balance")
    }

    async fn deduct(&self, user_id: &str, minutes: u64) -> anyhow::Result<DeductionOutcome> {
        let resp = self
            .client
            .post(format!("{}/api/v1/minutes/deduct", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&json!({ "userId": user_id, "minutes": minutes }))
            .send()
            .await
            .context("failed to call usage API")?;

        let status = resp.status();
        if !status.is_success() {
            anyhow::bail!("usage API error ({status})");
        }
        let envelope: Envelope<DeductionOutcome> = resp
            .json()
            .await
            .context("failed to parse deduction response")?;
        envelope.into_data("deduct")
    }
}

/// Pre-call quota gate and post-call deduction. Backend failures never block
/// a call and are never retried.
pub struct UsageGuard {
    backend: Option<Arc<dyn UsageBackend>>,
}

impl UsageGuard {
    pub fn new(backend: Option<Arc<dyn UsageBackend>>) -> Self {
        Self { backend }
    }

    pub fn disabled() -> Self {
        Self { backend: None }
    }

    pub async fn check_available(&self, user_id: &str) -> QuotaStatus {
        let Some(backend) = &self.backend else {
            return QuotaStatus::fail_open();
        };
        match backend.balance(user_id).await {
            Ok(balance) => {
                let status = balance.status();
                tracing::info!(
                    user_id,
                    available = status.available,
                    unlimited = status.unlimited,
                    remaining = status.remaining_minutes,
                    "minutes checked"
                );
                status
            }
            Err(e) => {
                tracing::warn!(user_id, error = %e, "minutes check failed, allowing call");
                QuotaStatus::fail_open()
            }
        }
    }

    pub async fn deduct(&self, user_id: &str, seconds_used: u64) -> Option<DeductionOutcome> {
        let backend = self.backend.as_ref()?;
        let minutes = billable_minutes(seconds_used);
        if minutes == 0 {
            return None;
        }
        match backend.deduct(user_id, minutes).await {
            Ok(outcome) => {
                tracing::info!(
                    user_id,
                    minutes,
                    remaining = outcome.remaining_minutes,
                    exceeded = outcome.exceeded_limit,
                    "minutes deducted"
                );
                if outcome.exceeded_limit {
                    tracing::warn!(user_id, used = outcome.new_used, limit = outcome.minutes_limit, "minutes limit exceeded");
                }
                Some(outcome)
            }
            Err(e) => {
                tracing::error!(user_id, minutes, error = %e, "minutes deduction failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct FailingBackend;

    #[async_trait]
    impl UsageBackend for FailingBackend {
        async fn balance(&self, _user_id: &str) -> anyhow::Result<MinutesBalance> {
            anyhow::bail!("connection refused")
        }
        async fn deduct(&self, _user_id: &str, _minutes: u64) -> anyhow::Result<DeductionOutcome> {
            anyhow::bail!("connection refused")
        }
    }

    struct RecordingBackend {
        deducted: Mutex<Vec<u64>>,
    }

    #[async_trait]
    impl UsageBackend for RecordingBackend {
        async fn balance(&self, _user_id: &str) -> anyhow::Result<MinutesBalance> {
            Ok(MinutesBalance {
                remaining_minutes: 0.0,
                total_minutes: 10.0,
                used_minutes: 10.0,
            })
        }
        async fn deduct(&self, _user_id: &str, minutes: u64) -> anyhow::Result<DeductionOutcome> {
            self.deducted.lock().unwrap().push(minutes);
            Ok(DeductionOutcome {
                minutes_deducted: minutes,
                new_used: 10.0 + minutes as f64,
                minutes_limit: 10.0,
                remaining_minutes: 0.0,
                exceeded_limit: true,
            })
        }
    }

    #[tokio::test]
    async fn test_backend_failure_fails_open() {
        let guard = UsageGuard::new(Some(Arc::new(FailingBackend)));
        assert!(guard.check_available("u1").await.available);
        assert!(guard.deduct("u1", 90).await.is_none());
    }

    #[tokio::test]
    async fn test_exhausted_quota_and_rounded_deduction() {
        let backend = Arc::new(RecordingBackend {
            deducted: Mutex::new(vec![]),
        });
        let guard = UsageGuard::new(Some(backend.clone()));
        assert!(!guard.check_available("u1").await.available);

        let outcome = guard.deduct("u1", 61).await.unwrap();
        assert!(outcome.exceeded_limit);
        assert!(guard.deduct("u1", 0).await.is_none());
        assert_eq!(*backend.deducted.lock().unwrap(), vec![2]);
    }

    #[test]
    fn test_envelope_parsing() {
        let env: Envelope<MinutesBalance> = serde_json::from_str(
            r#"{"success":true,"data":{"remainingMinutes":5,"totalMinutes":0,"usedMinutes":3}}"#,
        )
        .unwrap();
        assert!(env.into_data("balance").unwrap().status().unlimited);

        let env: Envelope<MinutesBalance> =
            serde_json::from_str(r#"{"success":false,"error":"user not found"}"#).unwrap();
        let err = env.into_data("balance").unwrap_err();
        assert!(err.to_string().contains("user not found"));
    }
}
