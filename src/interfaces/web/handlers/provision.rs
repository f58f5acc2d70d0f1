use axum::{Json, extract::State};
use serde::Deserialize;

use crate::core::context::{ContentContext, DeploymentContext};
use crate::core::deploy::SiteApplicator;
use crate::core::progress::WorkflowState;
use crate::core::providers::host::HostedSite;
use crate::core::workflow::domain_site::DomainSiteParams;
use crate::core::workflow::{StepId, StepRecord, WorkflowKind, WorkflowRun};

use super::super::{AppState, sse};

/// `POST /api/provision/domain-site` — the full pipeline, streamed as SSE.
pub async fn start_domain_site(
    State(state): State<AppState>,
    Json(params): Json<DomainSiteParams>,
) -> axum::response::Response {
    let workflow = state.domain_site.clone();
    sse::stream_workflow(move |sink| async move { workflow.run(params, &sink).await })
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyRequest {
    pub site: HostedSite,
    #[serde(default)]
    pub deployment_context: Option<DeploymentContext>,
    #[serde(default)]
    pub content_context: Option<ContentContext>,
}

/// `POST /api/provision/apply` — apply contexts to an already-provisioned
/// site. Every stage is soft-failed into its StepRecord.
pub async fn apply_contexts(
    State(state): State<AppState>,
    Json(request): Json<ApplyRequest>,
) -> axum::response::Response {
    if request.deployment_context.is_none() && request.content_context.is_none() {
        return sse::error_stream(
            "at least one of deploymentContext / contentContext is required".to_string(),
        );
    }

    let applicator = state.applicator.clone();
    sse::stream_workflow(move |sink| async move {
        let mut run = WorkflowRun::new(WorkflowKind::SimpleSite);
        let site = request.site;

        if let Some(deployment) = &request.deployment_context {
            sink.emit(
                WorkflowState::ApplyingDeployment,
                "Applying deployment context",
                serde_json::Value::Null,
            )
            .await;
            let report = applicator
                .apply_deployment(&site, deployment, request.content_context.as_ref())
                .await;
            run.record(report_record(StepId::DeploymentApplied, &report));
        }

        if let Some(content) = &request.content_context {
            sink.emit(
                WorkflowState::GeneratingContent,
                "Generating page content",
                serde_json::Value::Null,
            )
            .await;
            let pages = applicator.generate_pages(content).await;
            run.record(StepRecord::ok(
                StepId::ContentGenerated,
                serde_json::json!({ "pages": pages.len() }),
            ));

            sink.emit(
                WorkflowState::PushingContent,
                "Publishing pages",
                serde_json::Value::Null,
            )
            .await;
            let report = applicator.push_pages(&site, &pages).await;
            run.record(report_record(StepId::ContentPushed, &report));
        }

        run.success = true;
        run.result = serde_json::json!({ "steps": run.steps });
        sink.emit(
            WorkflowState::Complete,
            "Contexts applied",
            serde_json::Value::Null,
        )
        .await;
        run
    })
}

fn report_record(step: StepId, report: &crate::core::deploy::ApplyReport) -> StepRecord {
    if report.failed() == 0 {
        StepRecord::ok(
            step,
            serde_json::to_value(report).unwrap_or(serde_json::Value::Null),
        )
    } else {
        StepRecord {
            step,
            success: false,
            data: serde_json::to_value(report).unwrap_or(serde_json::Value::Null),
            error: Some(format!("{} task(s) failed", report.failed())),
        }
    }
}
