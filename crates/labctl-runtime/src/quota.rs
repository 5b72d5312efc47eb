//! Pre-launch quota gate.
//!
//! [`HttpUsageGate`] asks the host's usage endpoint right before each launch;
//! [`CachedUsageGate`] decides from a snapshot in the config. Missing usage
//! data never blocks a launch.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use labctl_core::error::QuotaInfo;

/// Verdict consulted before a launch is attempted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuotaDecision {
    Allow,
    /// Launch proceeds but the user should be told time is short.
    Low { minutes_remaining: u64 },
    /// Launch must not be attempted.
    Exhausted(QuotaInfo),
}

#[async_trait]
pub trait QuotaGate: Send + Sync {
    async fn check(&self) -> QuotaDecision;
}

/// Gate used when no usage data is available.
pub struct AlwaysAllow;

#[async_trait]
impl QuotaGate for AlwaysAllow {
    async fn check(&self) -> QuotaDecision {
        QuotaDecision::Allow
    }
}

/// Usage snapshot as reported by the usage endpoint (cached in config).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuotaUsage {
    pub plan: Option<String>,
    pub consumed_minutes: u64,
    pub quota_minutes: u64,
    pub resets_at: Option<String>,
    pub unlimited: bool,
}

impl QuotaUsage {
    pub fn minutes_remaining(&self) -> u64 {
        self.quota_minutes.saturating_sub(self.consumed_minutes)
    }

    pub fn decide(&self, low_threshold_minutes: u64) -> QuotaDecision {
        if self.unlimited {
            return QuotaDecision::Allow;
        }
        if self.consumed_minutes >= self.quota_minutes {
            return QuotaDecision::Exhausted(QuotaInfo {
                plan: self.plan.clone(),
                consumed_minutes: self.consumed_minutes,
                quota_minutes: self.quota_minutes,
                resets_at: self.resets_at.clone(),
            });
        }
        let minutes_remaining = self.minutes_remaining();
        if minutes_remaining < low_threshold_minutes {
            QuotaDecision::Low { minutes_remaining }
        } else {
            QuotaDecision::Allow
        }
    }
}

/// Gate over a fixed usage snapshot.
pub struct CachedUsageGate {
    usage: QuotaUsage,
    low_threshold_minutes: u64,
}

impl CachedUsageGate {
    pub fn new(usage: QuotaUsage, low_threshold_minutes: u64) -> Self {
        Self {
            usage,
            low_threshold_minutes,
        }
    }
}

#[async_trait]
impl QuotaGate for CachedUsageGate {
    async fn check(&self) -> QuotaDecision {
        self.usage.decide(self.low_threshold_minutes)
    }
}

// ─── Live usage ───────────────────────────────────────────────────

/// Body of the usage endpoint. `hours_limit` is a number or `"Unlimited"`;
/// numeric fields may arrive as strings.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct UsageReport {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub plan: Option<String>,
    #[serde(default)]
    pub hours_used: Value,
    #[serde(default)]
    pub hours_limit: Value,
    #[serde(default)]
    pub percentage: Value,
    #[serde(default)]
    pub minutes_remaining: Value,
    #[serde(default)]
    pub reset_date: Option<String>,
}

fn lenient_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn hours_to_minutes(hours: Option<f64>) -> u64 {
    hours.map_or(0, |h| (h.max(0.0) * 60.0).round() as u64)
}

impl UsageReport {
    pub fn is_unlimited(&self) -> bool {
        self.hours_limit
            .as_str()
            .is_some_and(|s| s.eq_ignore_ascii_case("unlimited"))
    }

    /// `percentage >= 100` blocks; fewer than `low_threshold_minutes` left warns.
    pub fn decide(&self, low_threshold_minutes: u64) -> QuotaDecision {
        if self.is_unlimited() {
            return QuotaDecision::Allow;
        }
        if lenient_f64(&self.percentage).is_some_and(|p| p >= 100.0) {
            return QuotaDecision::Exhausted(QuotaInfo {
                plan: self.plan.clone(),
                consumed_minutes: hours_to_minutes(lenient_f64(&self.hours_used)),
                quota_minutes: hours_to_minutes(lenient_f64(&self.hours_limit)),
                resets_at: self.reset_date.clone(),
            });
        }
        match lenient_f64(&self.minutes_remaining) {
            Some(left) if left < low_threshold_minutes as f64 => QuotaDecision::Low {
                minutes_remaining: left.max(0.0).floor() as u64,
            },
            _ => QuotaDecision::Allow,
        }
    }
}

/// Gate that fetches current usage before every launch.
pub struct HttpUsageGate {
    client: Client,
    usage_url: String,
    low_threshold_minutes: u64,
}

impl HttpUsageGate {
    pub fn new(client: Client, usage_url: String, low_threshold_minutes: u64) -> Self {
        Self {
            client,
            usage_url,
            low_threshold_minutes,
        }
    }

    async fn fetch(&self) -> Result<UsageReport, String> {
        let resp = self
            .client
            .get(&self.usage_url)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| e.to_string())?;
        let status = resp.status();
        if !status.is_success() {
            return Err(format!("HTTP {}", status.as_u16()));
        }
        let report: UsageReport = resp.json().await.map_err(|e| e.to_string())?;
        if !report.success {
            return Err(report
                .message
                .unwrap_or_else(|| "usage endpoint reported failure".to_owned()));
        }
        Ok(report)
    }
}

#[async_trait]
impl QuotaGate for HttpUsageGate {
    async fn check(&self) -> QuotaDecision {
        match self.fetch().await {
            Ok(report) => report.decide(self.low_threshold_minutes),
            Err(e) => {
                tracing::warn!("usage check failed, launching anyway: {e}");
                QuotaDecision::Allow
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usage(consumed: u64, quota: u64) -> QuotaUsage {
        QuotaUsage {
            consumed_minutes: consumed,
            quota_minutes: quota,
            ..QuotaUsage::default()
        }
    }

    #[test]
    fn full_usage_blocks() {
        match usage(600, 600).decide(10) {
            QuotaDecision::Exhausted(info) => {
                assert_eq!(info.consumed_minutes, 600);
                assert_eq!(info.hours(), (10.0, 10.0));
            }
            other => panic!("expected exhausted, got {other:?}"),
        }
        assert!(matches!(usage(700, 600).decide(10), QuotaDecision::Exhausted(_)));
    }

    #[test]
    fn few_minutes_left_is_low() {
        assert_eq!(
            usage(595, 600).decide(10),
            QuotaDecision::Low {
                minutes_remaining: 5
            }
        );
        assert_eq!(usage(590, 600).decide(10), QuotaDecision::Allow);
    }

    #[test]
    fn unlimited_plan_always_allows() {
        let u = QuotaUsage {
            unlimited: true,
            ..usage(10_000, 0)
        };
        assert_eq!(u.decide(10), QuotaDecision::Allow);
    }

    fn report(body: serde_json::Value) -> UsageReport {
        serde_json::from_value(body).expect("usage report")
    }

    #[test]
    fn usage_report_percentage_blocks() {
        let r = report(serde_json::json!({
            "success": true,
            "plan": "basic",
            "hours_used": 10,
            "hours_limit": 10,
            "percentage": 100,
            "minutes_remaining": 0,
            "reset_date": "2026-04-01"
        }));
        match r.decide(10) {
            QuotaDecision::Exhausted(info) => {
                assert_eq!(info.plan.as_deref(), Some("basic"));
                assert_eq!((info.consumed_minutes, info.quota_minutes), (600, 600));
                assert_eq!(info.resets_at.as_deref(), Some("2026-04-01"));
            }
            other => panic!("expected exhausted, got {other:?}"),
        }
    }

    #[test]
    fn usage_report_low_and_unlimited() {
        let low = report(serde_json::json!({
            "success": true,
            "hours_limit": "10",
            "percentage": "99.2",
            "minutes_remaining": "4"
        }));
        assert_eq!(
            low.decide(10),
            QuotaDecision::Low {
                minutes_remaining: 4
            }
        );
        let unlimited = report(serde_json::json!({
            "success": true,
            "hours_limit": "Unlimited",
            "percentage": 250,
            "minutes_remaining": 0
        }));
        assert_eq!(unlimited.decide(10), QuotaDecision::Allow);
    }

    #[tokio::test]
    async fn gates() {
        assert_eq!(AlwaysAllow.check().await, QuotaDecision::Allow);
        let gate = CachedUsageGate::new(usage(600, 600), 10);
        assert!(matches!(gate.check().await, QuotaDecision::Exhausted(_)));
    }
}
