use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// How long a sink may block an emitting workflow before the event is
/// dropped instead.
const SLOW_SINK_BUDGET: Duration = Duration::from_millis(100);

/// Workflow stage identifiers carried on progress events. Versioned: new
/// stages append, existing discriminants never change meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowState {
    ValidatingConfig,
    CheckingDomain,
    RegisteringDomain,
    CreatingSite,
    WaitingForSite,
    MappingDomain,
    CreatingCloudflareZone,
    SettingDnsRecords,
    UpdatingNameservers,
    ConfiguringSecurity,
    ApplyingDeployment,
    GeneratingContent,
    PushingContent,
    // onboarding
    Scraping,
    CollectingAnswers,
    Analyzing,
    ExtractingBrand,
    BuildingBrief,
    MatchingTemplate,
    BuildingContexts,
    ValidatingContexts,
    // terminal markers on the event stream
    Complete,
    Error,
    Cancelled,
}

impl WorkflowState {
    pub fn as_str(self) -> &'static str {
        match self {
            WorkflowState::ValidatingConfig => "validating_config",
            WorkflowState::CheckingDomain => "checking_domain",
            WorkflowState::RegisteringDomain => "registering_domain",
            WorkflowState::CreatingSite => "creating_site",
            WorkflowState::WaitingForSite => "waiting_for_site",
            WorkflowState::MappingDomain => "mapping_domain",
            WorkflowState::CreatingCloudflareZone => "creating_cloudflare_zone",
            WorkflowState::SettingDnsRecords => "setting_dns_records",
            WorkflowState::UpdatingNameservers => "updating_nameservers",
            WorkflowState::ConfiguringSecurity => "configuring_security",
            WorkflowState::ApplyingDeployment => "applying_deployment",
            WorkflowState::GeneratingContent => "generating_content",
            WorkflowState::PushingContent => "pushing_content",
            WorkflowState::Scraping => "scraping",
            WorkflowState::CollectingAnswers => "collecting_answers",
            WorkflowState::Analyzing => "analyzing",
            WorkflowState::ExtractingBrand => "extracting_brand",
            WorkflowState::BuildingBrief => "building_brief",
            WorkflowState::MatchingTemplate => "matching_template",
            WorkflowState::BuildingContexts => "building_contexts",
            WorkflowState::ValidatingContexts => "validating_contexts",
            WorkflowState::Complete => "complete",
            WorkflowState::Error => "error",
            WorkflowState::Cancelled => "cancelled",
        }
    }
}

/// One message on the per-run progress stream.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ProgressEvent {
    pub step: String,
    pub timestamp: DateTime<Utc>,
    pub message: String,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub payload: serde_json::Value,
}

impl ProgressEvent {
    pub fn new(state: WorkflowState, message: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            step: state.as_str().to_string(),
            timestamp: Utc::now(),
            message: message.into(),
            payload,
        }
    }
}

/// Caller-supplied consumer of ordered progress events for one run.
///
/// A closed sink (subscriber went away) doubles as the run's cancellation
/// signal; workflows check `is_closed` at every stage boundary.
#[derive(Clone)]
pub struct ProgressSink {
    tx: Option<mpsc::Sender<ProgressEvent>>,
    dropped: Arc<AtomicU64>,
}

impl ProgressSink {
    /// Sink fanning out to an mpsc subscriber (the SSE adapter reads the
    /// receiving end).
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<ProgressEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            Self {
                tx: Some(tx),
                dropped: Arc::new(AtomicU64::new(0)),
            },
            rx,
        )
    }

    /// Sink with no subscriber; events go to the debug log only.
    pub fn discard() -> Self {
        Self {
            tx: None,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    pub async fn emit(&self, state: WorkflowState, message: &str, payload: serde_json::Value) {
        self.emit_event(ProgressEvent::new(state, message, payload))
            .await;
    }

    pub async fn emit_event(&self, event: ProgressEvent) {
        debug!(step = %event.step, "{}", event.message);
        let Some(tx) = &self.tx else { return };

        // A subscriber slower than the budget loses the event rather than
        // stalling the workflow.
        let send = tokio::time::timeout(SLOW_SINK_BUDGET, tx.send(event));
        match send.await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => {
                // Receiver gone; the workflow will observe is_closed shortly.
            }
            Err(_) => {
                let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(dropped_total = total, "slow progress sink, event dropped");
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.as_ref().is_some_and(|tx| tx.is_closed())
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
