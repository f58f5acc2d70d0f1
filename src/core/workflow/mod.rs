pub mod brand;
pub mod brief;
pub mod domain_site;
pub mod onboarding;
pub mod templates;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Completion identifiers recorded per attempted pipeline stage. Distinct
/// from the in-flight `WorkflowState` ids carried on progress events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepId {
    ConfigValidated,
    DomainChecked,
    DomainRegistered,
    SiteCreated,
    SiteReady,
    DomainMapped,
    CloudflareZoneCreated,
    DnsRecordsSet,
    NameserversUpdated,
    SecurityConfigured,
    SslPending,
    DeploymentApplied,
    ContentGenerated,
    ContentPushed,
    // onboarding
    SourceScraped,
    BriefBuilt,
    SiteAnalyzed,
    BrandExtracted,
    TemplateMatched,
    ContextsBuilt,
    ContextsValidated,
    // terminal for caller-driven aborts
    Cancelled,
}

impl StepId {
    pub fn as_str(self) -> &'static str {
        match self {
            StepId::ConfigValidated => "config_validated",
            StepId::DomainChecked => "domain_checked",
            StepId::DomainRegistered => "domain_registered",
            StepId::SiteCreated => "site_created",
            StepId::SiteReady => "site_ready",
            StepId::DomainMapped => "domain_mapped",
            StepId::CloudflareZoneCreated => "cloudflare_zone_created",
            StepId::DnsRecordsSet => "dns_records_set",
            StepId::NameserversUpdated => "nameservers_updated",
            StepId::SecurityConfigured => "security_configured",
            StepId::SslPending => "ssl_pending",
            StepId::DeploymentApplied => "deployment_applied",
            StepId::ContentGenerated => "content_generated",
            StepId::ContentPushed => "content_pushed",
            StepId::SourceScraped => "source_scraped",
            StepId::BriefBuilt => "brief_built",
            StepId::SiteAnalyzed => "site_analyzed",
            StepId::BrandExtracted => "brand_extracted",
            StepId::TemplateMatched => "template_matched",
            StepId::ContextsBuilt => "contexts_built",
            StepId::ContextsValidated => "contexts_validated",
            StepId::Cancelled => "cancelled",
        }
    }
}

/// Canonical order for the domain+site pipeline. Conditional stages are
/// skipped, never reordered; recorded ids always form a subsequence.
pub const DOMAIN_SITE_STEP_ORDER: &[StepId] = &[
    StepId::ConfigValidated,
    StepId::DomainChecked,
    StepId::DomainRegistered,
    StepId::SiteCreated,
    StepId::SiteReady,
    StepId::DomainMapped,
    StepId::CloudflareZoneCreated,
    StepId::DnsRecordsSet,
    StepId::NameserversUpdated,
    StepId::SecurityConfigured,
    StepId::SslPending,
    StepId::DeploymentApplied,
    StepId::ContentGenerated,
    StepId::ContentPushed,
    StepId::Cancelled,
];

/// Canonical order for both onboarding variants (scrape/brief stages are
/// variant-exclusive).
pub const ONBOARDING_STEP_ORDER: &[StepId] = &[
    StepId::SourceScraped,
    StepId::BriefBuilt,
    StepId::SiteAnalyzed,
    StepId::BrandExtracted,
    StepId::TemplateMatched,
    StepId::ContextsBuilt,
    StepId::ContextsValidated,
    StepId::Cancelled,
];

/// True when the recorded ids advance monotonically through `order`.
pub fn records_follow_canonical_order(records: &[StepRecord], order: &[StepId]) -> bool {
    let mut cursor = 0usize;
    for record in records {
        match order[cursor..].iter().position(|s| *s == record.step) {
            Some(offset) => cursor += offset + 1,
            None => return false,
        }
    }
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkflowKind {
    DomainSiteCopy,
    DomainSiteVoice,
    SimpleSite,
}

/// One entry per attempted pipeline stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    pub step: StepId,
    pub success: bool,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub data: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StepRecord {
    pub fn ok(step: StepId, data: serde_json::Value) -> Self {
        Self {
            step,
            success: true,
            data,
            error: None,
        }
    }

    pub fn failed(step: StepId, error: impl Into<String>) -> Self {
        Self {
            step,
            success: false,
            data: serde_json::Value::Null,
            error: Some(error.into()),
        }
    }
}

/// Transient value owned by a single caller; never persisted by the core.
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowRun {
    pub id: Uuid,
    pub kind: WorkflowKind,
    #[serde(skip_serializing_if = "serde_json::Value::is_null")]
    pub params: serde_json::Value,
    pub steps: Vec<StepRecord>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "serde_json::Value::is_null")]
    pub result: serde_json::Value,
}

impl WorkflowRun {
    pub fn new(kind: WorkflowKind) -> Self {
        Self::with_params(kind, serde_json::Value::Null)
    }

    pub fn with_params(kind: WorkflowKind, params: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            params,
            steps: Vec::new(),
            success: false,
            error: None,
            result: serde_json::Value::Null,
        }
    }

    pub fn record(&mut self, record: StepRecord) {
        self.steps.push(record);
    }

    pub fn fail(&mut self, error: impl Into<String>) {
        self.success = false;
        self.error = Some(error.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(step: StepId) -> StepRecord {
        StepRecord::ok(step, serde_json::Value::Null)
    }

    #[test]
    fn full_happy_path_is_canonical() {
        let records = vec![
            rec(StepId::ConfigValidated),
            rec(StepId::SiteCreated),
            rec(StepId::SiteReady),
            rec(StepId::DomainMapped),
            rec(StepId::CloudflareZoneCreated),
            rec(StepId::DnsRecordsSet),
            rec(StepId::SecurityConfigured),
            rec(StepId::SslPending),
        ];
        assert!(records_follow_canonical_order(
            &records,
            DOMAIN_SITE_STEP_ORDER
        ));
    }

    #[test]
    fn registration_arc_is_canonical() {
        let records = vec![
            rec(StepId::ConfigValidated),
            rec(StepId::DomainChecked),
            rec(StepId::DomainRegistered),
            rec(StepId::SiteCreated),
        ];
        assert!(records_follow_canonical_order(
            &records,
            DOMAIN_SITE_STEP_ORDER
        ));
    }

    #[test]
    fn out_of_order_records_are_rejected() {
        let records = vec![rec(StepId::SiteCreated), rec(StepId::ConfigValidated)];
        assert!(!records_follow_canonical_order(
            &records,
            DOMAIN_SITE_STEP_ORDER
        ));
    }

    #[test]
    fn duplicate_step_is_rejected() {
        let records = vec![rec(StepId::SiteCreated), rec(StepId::SiteCreated)];
        assert!(!records_follow_canonical_order(
            &records,
            DOMAIN_SITE_STEP_ORDER
        ));
    }

    #[test]
    fn step_ids_serialize_snake_case() {
        assert_eq!(
            serde_json::to_string(&StepId::CloudflareZoneCreated).unwrap(),
            "\"cloudflare_zone_created\""
        );
        assert_eq!(StepId::SslPending.as_str(), "ssl_pending");
    }
}
