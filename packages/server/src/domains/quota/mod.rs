//! Plan quota resolution.
//!
//! Plans describe ceilings as raw feature values: `true` or `null` means
//! unlimited, `false` means the feature is off (a ceiling of zero), and a
//! number is the ceiling itself. Everything here is pure except
//! [`StaticPlanProvider`], which only reads configuration.

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::common::OrganizationId;
use crate::kernel::BasePlanProvider;

/// A raw plan feature value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "serde_json::Value", into = "serde_json::Value")]
pub enum FeatureValue {
    #[default]
    Unlimited,
    Disabled,
    Limit(u64),
}

impl FeatureValue {
    pub fn from_json(value: &serde_json::Value) -> Result<Self> {
        match value {
            serde_json::Value::Null | serde_json::Value::Bool(true) => Ok(FeatureValue::Unlimited),
            serde_json::Value::Bool(false) => Ok(FeatureValue::Disabled),
            serde_json::Value::Number(n) => n
                .as_u64()
                .map(FeatureValue::Limit)
                .ok_or_else(|| anyhow!("feature limit must be a non-negative integer, got {}", n)),
            other => bail!("unsupported feature value: {}", other),
        }
    }
}

impl TryFrom<serde_json::Value> for FeatureValue {
    type Error = anyhow::Error;

    fn try_from(value: serde_json::Value) -> Result<Self> {
        FeatureValue::from_json(&value)
    }
}

impl From<FeatureValue> for serde_json::Value {
    fn from(value: FeatureValue) -> Self {
        match value {
            FeatureValue::Unlimited => serde_json::Value::Bool(true),
            FeatureValue::Disabled => serde_json::Value::Bool(false),
            FeatureValue::Limit(n) => serde_json::Value::from(n),
        }
    }
}

impl FromStr for FeatureValue {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "true" | "null" => Ok(FeatureValue::Unlimited),
            "false" => Ok(FeatureValue::Disabled),
            other => other
                .parse::<u64>()
                .map(FeatureValue::Limit)
                .map_err(|_| anyhow!("expected true, false, null or a non-negative integer, got '{}'", s)),
        }
    }
}

/// A resolved numeric ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Limit {
    Unlimited,
    Finite(u64),
}

impl Limit {
    pub fn min(self, other: Limit) -> Limit {
        match (self, other) {
            (Limit::Unlimited, x) | (x, Limit::Unlimited) => x,
            (Limit::Finite(a), Limit::Finite(b)) => Limit::Finite(a.min(b)),
        }
    }

    /// What is left after `used` units, clamped at zero.
    pub fn remaining_after(self, used: i64) -> Limit {
        match self {
            Limit::Unlimited => Limit::Unlimited,
            Limit::Finite(n) => {
                let left = n as i128 - used as i128;
                Limit::Finite(left.clamp(0, u64::MAX as i128) as u64)
            }
        }
    }

    /// Whether a total of `n` units stays within the ceiling.
    pub fn allows(&self, n: u64) -> bool {
        match self {
            Limit::Unlimited => true,
            Limit::Finite(max) => n <= *max,
        }
    }

    pub fn as_finite(&self) -> Option<u64> {
        match self {
            Limit::Unlimited => None,
            Limit::Finite(n) => Some(*n),
        }
    }

    pub fn is_zero(&self) -> bool {
        matches!(self, Limit::Finite(0))
    }
}

impl fmt::Display for Limit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Limit::Unlimited => write!(f, "unlimited"),
            Limit::Finite(n) => write!(f, "{}", n),
        }
    }
}

pub fn resolve_limit(value: FeatureValue) -> Limit {
    match value {
        FeatureValue::Unlimited => Limit::Unlimited,
        FeatureValue::Disabled => Limit::Finite(0),
        FeatureValue::Limit(n) => Limit::Finite(n),
    }
}

/// Raw feature flags of a tenant's plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanFeatures {
    pub link_sources: FeatureValue,
    pub total_pages: FeatureValue,
    pub pages_per_crawl: FeatureValue,
    pub size_limit_bytes: FeatureValue,
}

/// Resolved ceilings, computed per request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaSnapshot {
    pub link_source_limit: Limit,
    pub total_pages_limit: Limit,
    pub crawl_pages_per_source_limit: Limit,
    pub size_limit_bytes: Limit,
}

impl QuotaSnapshot {
    pub fn from_features(features: &PlanFeatures) -> Self {
        Self {
            link_source_limit: resolve_limit(features.link_sources),
            total_pages_limit: resolve_limit(features.total_pages),
            crawl_pages_per_source_limit: resolve_limit(features.pages_per_crawl),
            size_limit_bytes: resolve_limit(features.size_limit_bytes),
        }
    }

    /// Page allowance for one crawl given the pages already used elsewhere.
    pub fn crawl_limit(&self, used_pages: i64) -> Limit {
        effective_crawl_limit(
            self.crawl_pages_per_source_limit,
            self.total_pages_limit,
            used_pages,
        )
    }

    /// Byte budget left for one source given the bytes used elsewhere.
    pub fn remaining_bytes(&self, used_bytes: i64) -> Limit {
        self.size_limit_bytes.remaining_after(used_bytes)
    }
}

/// `max(0, min(per_source, total - used))`, or `per_source` when the total is unlimited.
pub fn effective_crawl_limit(per_source: Limit, total: Limit, used_pages: i64) -> Limit {
    per_source.min(total.remaining_after(used_pages))
}

/// Plan source backed by configuration: one default plan plus per-organization overrides.
#[derive(Debug, Clone, Default)]
pub struct StaticPlanProvider {
    default: PlanFeatures,
    overrides: HashMap<OrganizationId, PlanFeatures>,
}

impl StaticPlanProvider {
    pub fn new(default: PlanFeatures) -> Self {
        Self {
            default,
            overrides: HashMap::new(),
        }
    }

    pub fn with_override(mut self, organization_id: OrganizationId, features: PlanFeatures) -> Self {
        self.overrides.insert(organization_id, features);
        self
    }
}

#[async_trait]
impl BasePlanProvider for StaticPlanProvider {
    async fn features_for(&self, organization_id: OrganizationId) -> Result<PlanFeatures> {
        Ok(self
            .overrides
            .get(&organization_id)
            .copied()
            .unwrap_or(self.default))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn resolves_the_three_way_mapping() {
        assert_eq!(resolve_limit(FeatureValue::from_json(&json!(true)).unwrap()), Limit::Unlimited);
        assert_eq!(resolve_limit(FeatureValue::from_json(&json!(null)).unwrap()), Limit::Unlimited);
        assert_eq!(resolve_limit(FeatureValue::from_json(&json!(false)).unwrap()), Limit::Finite(0));
        for n in [0u64, 1, 50, 10_000] {
            assert_eq!(
                resolve_limit(FeatureValue::from_json(&json!(n)).unwrap()),
                Limit::Finite(n)
            );
        }
    }

    #[test]
    fn rejects_nonsense_feature_values() {
        assert!(FeatureValue::from_json(&json!(-1)).is_err());
        assert!(FeatureValue::from_json(&json!(2.5)).is_err());
        assert!(FeatureValue::from_json(&json!("lots")).is_err());
    }

    #[test]
    fn parses_from_strings() {
        assert_eq!("true".parse::<FeatureValue>().unwrap(), FeatureValue::Unlimited);
        assert_eq!("NULL".parse::<FeatureValue>().unwrap(), FeatureValue::Unlimited);
        assert_eq!("false".parse::<FeatureValue>().unwrap(), FeatureValue::Disabled);
        assert_eq!(" 25 ".parse::<FeatureValue>().unwrap(), FeatureValue::Limit(25));
        assert!("-3".parse::<FeatureValue>().is_err());
    }

    #[test]
    fn plan_features_deserialize_from_raw_json() {
        let features: PlanFeatures = serde_json::from_value(json!({
            "linkSources": 5,
            "totalPages": null,
            "pagesPerCrawl": false,
            "sizeLimitBytes": true
        }))
        .unwrap();

        let quota = QuotaSnapshot::from_features(&features);
        assert_eq!(quota.link_source_limit, Limit::Finite(5));
        assert_eq!(quota.total_pages_limit, Limit::Unlimited);
        assert_eq!(quota.crawl_pages_per_source_limit, Limit::Finite(0));
        assert_eq!(quota.size_limit_bytes, Limit::Unlimited);
    }

    #[test]
    fn effective_limit_is_min_of_ceilings_clamped_at_zero() {
        let cases = [
            // (per source, total, used, expected)
            (Limit::Finite(50), Limit::Finite(100), 20, Limit::Finite(50)),
            (Limit::Finite(50), Limit::Finite(100), 70, Limit::Finite(30)),
            (Limit::Finite(50), Limit::Finite(100), 100, Limit::Finite(0)),
            (Limit::Finite(50), Limit::Finite(100), 180, Limit::Finite(0)),
            (Limit::Finite(50), Limit::Unlimited, 10_000, Limit::Finite(50)),
            (Limit::Unlimited, Limit::Finite(100), 40, Limit::Finite(60)),
            (Limit::Unlimited, Limit::Unlimited, 40, Limit::Unlimited),
            (Limit::Finite(0), Limit::Unlimited, 0, Limit::Finite(0)),
        ];

        for (per_source, total, used, expected) in cases {
            assert_eq!(
                effective_crawl_limit(per_source, total, used),
                expected,
                "per_source={per_source} total={total} used={used}"
            );
        }
    }

    #[test]
    fn limit_allows_up_to_ceiling() {
        assert!(Limit::Finite(10).allows(10));
        assert!(!Limit::Finite(10).allows(11));
        assert!(Limit::Unlimited.allows(u64::MAX));
        assert!(Limit::Finite(0).is_zero());
    }

    #[tokio::test]
    async fn static_provider_prefers_overrides() {
        let org = OrganizationId::new();
        let premium = PlanFeatures {
            total_pages: FeatureValue::Limit(5000),
            ..Default::default()
        };
        let provider = StaticPlanProvider::new(PlanFeatures::default()).with_override(org, premium);

        assert_eq!(provider.features_for(org).await.unwrap(), premium);
        assert_eq!(
            provider.features_for(OrganizationId::new()).await.unwrap(),
            PlanFeatures::default()
        );
    }
}
