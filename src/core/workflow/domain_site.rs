use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::config::RegistrantDefaults;
use crate::core::context::{ContentContext, DeploymentContext};
use crate::core::deploy::SiteApplicator;
use crate::core::error::{AppError, ProviderErrorKind};
use crate::core::progress::{ProgressSink, WorkflowState};
use crate::core::providers::dns::DnsApi;
use crate::core::providers::host::{CreateSiteOptions, HostApi, HostedSite, MapDomainOptions};
use crate::core::providers::registrar::{DomainContact, RegistrarApi};
use crate::core::retry::{RetryPolicy, with_retries};

use super::{StepId, StepRecord, WorkflowKind, WorkflowRun};

/// Polling budget for site readiness.
const READY_BUDGET: Duration = Duration::from_secs(300);
const READY_INTERVAL: Duration = Duration::from_secs(10);

fn default_true() -> bool {
    true
}

fn default_years() -> u32 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainSiteParams {
    pub domain: String,
    #[serde(default)]
    pub register_new_domain: bool,
    #[serde(default = "default_true")]
    pub include_www: bool,
    #[serde(default = "default_years")]
    pub years: u32,
    #[serde(default)]
    pub site_name: Option<String>,
    #[serde(default)]
    pub contact: Option<DomainContact>,
    #[serde(default)]
    pub deployment_context: Option<DeploymentContext>,
    #[serde(default)]
    pub content_context: Option<ContentContext>,
}

/// Drives registrar, host, and DNS provider through the provisioning
/// sequence. No hidden state: everything a step needs arrives as a value.
/// Completed external side effects are never rolled back (registrar charges
/// are not refundable); recovery is operator-driven.
pub struct DomainSiteWorkflow {
    registrar: Option<Arc<dyn RegistrarApi>>,
    dns: Option<Arc<dyn DnsApi>>,
    host: Option<Arc<dyn HostApi>>,
    applicator: Option<Arc<dyn SiteApplicator>>,
    registrant_defaults: Option<RegistrantDefaults>,
}

/// Outcome of one fatal-style stage: either a value or the terminal error.
enum Stage<T> {
    Done(T),
    Abort(String),
    Cancelled,
}

impl DomainSiteWorkflow {
    pub fn new(
        registrar: Option<Arc<dyn RegistrarApi>>,
        dns: Option<Arc<dyn DnsApi>>,
        host: Option<Arc<dyn HostApi>>,
        applicator: Option<Arc<dyn SiteApplicator>>,
        registrant_defaults: Option<RegistrantDefaults>,
    ) -> Self {
        Self {
            registrar,
            dns,
            host,
            applicator,
            registrant_defaults,
        }
    }

    pub async fn run(&self, params: DomainSiteParams, sink: &ProgressSink) -> WorkflowRun {
        let mut run = WorkflowRun::with_params(
            WorkflowKind::SimpleSite,
            serde_json::to_value(&params).unwrap_or(serde_json::Value::Null),
        );

        match self.run_inner(&params, sink, &mut run).await {
            Ok(result) => {
                run.success = true;
                run.result = result.clone();
                sink.emit(WorkflowState::Complete, "Provisioning complete", result)
                    .await;
            }
            Err(AppError::Canceled) => {
                run.record(StepRecord::failed(StepId::Cancelled, "caller disconnected"));
                run.fail("operation canceled by caller");
                info!(run_id = %run.id, domain = %params.domain, "workflow cancelled");
            }
            Err(e) => {
                let message = e.to_string();
                error!(run_id = %run.id, domain = %params.domain, "workflow failed: {message}");
                run.fail(&message);
                sink.emit(
                    WorkflowState::Error,
                    &message,
                    serde_json::json!({ "error": message }),
                )
                .await;
            }
        }

        run
    }

    fn checkpoint(&self, sink: &ProgressSink) -> Result<(), AppError> {
        if sink.is_closed() {
            return Err(AppError::Canceled);
        }
        Ok(())
    }

    async fn run_inner(
        &self,
        params: &DomainSiteParams,
        sink: &ProgressSink,
        run: &mut WorkflowRun,
    ) -> Result<serde_json::Value, AppError> {
        // ── validating_config ──
        self.checkpoint(sink)?;
        sink.emit(
            WorkflowState::ValidatingConfig,
            "Validating configuration",
            serde_json::json!({ "domain": params.domain }),
        )
        .await;

        if params.domain.trim().is_empty() {
            return Err(AppError::Validation("domain is required".into()));
        }
        let host = self
            .host
            .clone()
            .ok_or_else(|| AppError::Configuration("INSTA_WP_API_KEY".into()))?;
        let dns = self.dns.clone().ok_or_else(|| {
            AppError::Configuration("CLOUDFLARE_API_KEY / CLOUDFLARE_EMAIL / CLOUDFLARE_ACCOUNT_ID".into())
        })?;
        let registrar = if params.register_new_domain {
            Some(self.registrar.clone().ok_or_else(|| {
                AppError::Configuration(
                    "NAMECHEAP_API_KEY / NAMECHEAP_USERNAME / NAMECHEAP_CLIENT_IP".into(),
                )
            })?)
        } else {
            None
        };
        let contact = if params.register_new_domain {
            Some(
                params
                    .contact
                    .clone()
                    .or_else(|| self.registrant_defaults.clone().map(DomainContact::from))
                    .ok_or_else(|| {
                        AppError::Validation(
                            "registration requires contact details (none supplied or configured)"
                                .into(),
                        )
                    })?,
            )
        } else {
            None
        };
        run.record(StepRecord::ok(
            StepId::ConfigValidated,
            serde_json::json!({ "domain": params.domain, "registerNewDomain": params.register_new_domain }),
        ));

        // ── conditional registration arc ──
        if let (Some(registrar), Some(contact)) = (&registrar, &contact) {
            match self.register_domain(params, registrar.as_ref(), contact, sink, run).await? {
                Stage::Done(()) => {}
                Stage::Abort(msg) => return Err(AppError::Validation(msg)),
                Stage::Cancelled => return Err(AppError::Canceled),
            }
        }

        // ── creating_site ──
        self.checkpoint(sink)?;
        sink.emit(
            WorkflowState::CreatingSite,
            "Creating site on host",
            serde_json::Value::Null,
        )
        .await;
        let options = CreateSiteOptions::for_domain(&params.domain, params.site_name.clone());
        let site = with_retries(RetryPolicy::default(), || host.create_site(&options))
            .await
            .map_err(AppError::Upstream)?;
        run.record(StepRecord::ok(
            StepId::SiteCreated,
            serde_json::json!({ "siteId": site.id, "wpUrl": site.wp_url }),
        ));

        // ── waiting_for_site ──
        self.checkpoint(sink)?;
        sink.emit(
            WorkflowState::WaitingForSite,
            "Waiting for site to become ready",
            serde_json::json!({ "siteId": site.id }),
        )
        .await;
        let site = match host
            .wait_until_ready(&site.id, READY_BUDGET, READY_INTERVAL)
            .await
        {
            Ok(site) => site,
            Err(e) if e.kind == ProviderErrorKind::Timeout => return Err(AppError::NotReady),
            Err(e) => return Err(AppError::Upstream(e)),
        };
        run.record(StepRecord::ok(
            StepId::SiteReady,
            serde_json::json!({ "siteId": site.id }),
        ));

        // ── mapping_domain ──
        self.checkpoint(sink)?;
        sink.emit(
            WorkflowState::MappingDomain,
            "Mapping custom domain",
            serde_json::json!({ "domain": params.domain }),
        )
        .await;
        let mapping = host
            .map_domain(
                &site.id,
                &params.domain,
                MapDomainOptions {
                    www: params.include_www,
                    route_www: params.include_www,
                },
            )
            .await
            .map_err(AppError::Upstream)?;
        run.record(StepRecord::ok(
            StepId::DomainMapped,
            serde_json::json!({ "aRecords": mapping.a_records }),
        ));

        // DNS phase needs at least one apex IP; without it the zone would
        // point nowhere.
        if mapping.a_records.is_empty() {
            return Err(AppError::Validation(format!(
                "Failed to get A record IPs for {} from domain mapping",
                params.domain
            )));
        }

        // ── creating_cloudflare_zone ──
        self.checkpoint(sink)?;
        sink.emit(
            WorkflowState::CreatingCloudflareZone,
            "Creating DNS zone",
            serde_json::Value::Null,
        )
        .await;
        let zone = with_retries(RetryPolicy::default(), || {
            dns.get_or_create_zone(&params.domain)
        })
        .await
        .map_err(AppError::Upstream)?;
        run.record(StepRecord::ok(
            StepId::CloudflareZoneCreated,
            serde_json::json!({ "zoneId": zone.zone_id, "nameservers": zone.nameservers }),
        ));

        // ── setting_dns_records ──
        self.checkpoint(sink)?;
        sink.emit(
            WorkflowState::SettingDnsRecords,
            "Setting A records",
            serde_json::json!({ "ips": mapping.a_records }),
        )
        .await;
        dns.set_a_records(
            &zone.zone_id,
            &params.domain,
            &mapping.a_records,
            params.include_www,
        )
        .await
        .map_err(AppError::Upstream)?;
        run.record(StepRecord::ok(
            StepId::DnsRecordsSet,
            serde_json::json!({ "count": mapping.a_records.len(), "includeWww": params.include_www }),
        ));

        // ── updating_nameservers | nameserver instructions ──
        let mut nameserver_instructions = None;
        if let Some(registrar) = &registrar {
            self.checkpoint(sink)?;
            sink.emit(
                WorkflowState::UpdatingNameservers,
                "Pointing domain at the new zone",
                serde_json::json!({ "nameservers": zone.nameservers }),
            )
            .await;
            registrar
                .set_custom_nameservers(&params.domain, &zone.nameservers)
                .await
                .map_err(AppError::Upstream)?;
            run.record(StepRecord::ok(
                StepId::NameserversUpdated,
                serde_json::json!({ "nameservers": zone.nameservers }),
            ));
        } else {
            // The workflow did not register the domain, so the operator must
            // repoint it; surface the target nameservers instead.
            nameserver_instructions =
                Some(serde_json::json!({ "nameservers": zone.nameservers }));
        }

        // ── configuring_security (best-effort) ──
        self.checkpoint(sink)?;
        sink.emit(
            WorkflowState::ConfiguringSecurity,
            "Applying edge security defaults",
            serde_json::Value::Null,
        )
        .await;
        match dns.configure_security(&zone.zone_id).await {
            Ok(()) => run.record(StepRecord::ok(StepId::SecurityConfigured, serde_json::Value::Null)),
            Err(e) => run.record(StepRecord::failed(StepId::SecurityConfigured, e.to_string())),
        }

        // SSL state is informational; propagation can lag provisioning.
        match host.check_ssl_status(&site.id).await {
            Ok(ssl) => run.record(StepRecord::ok(
                StepId::SslPending,
                serde_json::json!({ "enabled": ssl.enabled, "status": ssl.status }),
            )),
            Err(e) => run.record(StepRecord::failed(StepId::SslPending, e.to_string())),
        }

        // ── optional deployment/content tail (soft-failed) ──
        self.apply_contexts(params, &site, sink, run).await?;

        let result = serde_json::json!({
            "finalUrls": {
                "site": format!("https://{}", params.domain),
                "admin": format!("https://{}/wp-admin", params.domain),
            },
            "site": {
                "id": site.id,
                "wpUrl": site.wp_url,
                "wpUsername": site.wp_username,
            },
            "zone": { "id": zone.zone_id, "nameservers": zone.nameservers },
            "nameserverInstructions": nameserver_instructions,
        });
        Ok(result)
    }

    async fn register_domain(
        &self,
        params: &DomainSiteParams,
        registrar: &dyn RegistrarApi,
        contact: &DomainContact,
        sink: &ProgressSink,
        run: &mut WorkflowRun,
    ) -> Result<Stage<()>, AppError> {
        if sink.is_closed() {
            return Ok(Stage::Cancelled);
        }
        sink.emit(
            WorkflowState::CheckingDomain,
            "Checking domain availability",
            serde_json::json!({ "domain": params.domain }),
        )
        .await;

        let availability = with_retries(RetryPolicy::default(), || registrar.check(&params.domain))
            .await
            .map_err(AppError::Upstream)?;
        run.record(StepRecord::ok(
            StepId::DomainChecked,
            serde_json::json!({
                "available": availability.available,
                "premium": availability.premium,
            }),
        ));

        if !availability.available {
            let message = match (availability.premium, availability.premium_price) {
                (true, Some(price)) => format!(
                    "Domain {} is a premium name (registration {price:.2} USD); not registering automatically",
                    params.domain
                ),
                _ => format!("Domain {} is not available", params.domain),
            };
            return Ok(Stage::Abort(message));
        }

        if sink.is_closed() {
            return Ok(Stage::Cancelled);
        }
        sink.emit(
            WorkflowState::RegisteringDomain,
            "Registering domain",
            serde_json::json!({ "years": params.years }),
        )
        .await;
        let registration = registrar
            .register(&params.domain, params.years, contact)
            .await
            .map_err(AppError::Upstream)?;
        run.record(StepRecord::ok(
            StepId::DomainRegistered,
            serde_json::json!({
                "domain": registration.domain,
                "chargedAmount": registration.charged_amount,
            }),
        ));
        Ok(Stage::Done(()))
    }

    /// Deployment/content stages are soft-failed: provisioning has already
    /// succeeded and content remains recoverable through the editor.
    async fn apply_contexts(
        &self,
        params: &DomainSiteParams,
        site: &HostedSite,
        sink: &ProgressSink,
        run: &mut WorkflowRun,
    ) -> Result<(), AppError> {
        let Some(applicator) = &self.applicator else {
            return Ok(());
        };

        if let Some(deployment) = &params.deployment_context {
            self.checkpoint(sink)?;
            sink.emit(
                WorkflowState::ApplyingDeployment,
                "Applying deployment context",
                serde_json::Value::Null,
            )
            .await;
            let report = applicator
                .apply_deployment(site, deployment, params.content_context.as_ref())
                .await;
            let record = if report.failed() == 0 {
                StepRecord::ok(
                    StepId::DeploymentApplied,
                    serde_json::to_value(&report).unwrap_or(serde_json::Value::Null),
                )
            } else {
                StepRecord {
                    step: StepId::DeploymentApplied,
                    success: false,
                    data: serde_json::to_value(&report).unwrap_or(serde_json::Value::Null),
                    error: Some(format!("{} applicator task(s) failed", report.failed())),
                }
            };
            run.record(record);
        }

        if let Some(content) = &params.content_context {
            self.checkpoint(sink)?;
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

            self.checkpoint(sink)?;
            sink.emit(
                WorkflowState::PushingContent,
                "Publishing pages",
                serde_json::Value::Null,
            )
            .await;
            let report = applicator.push_pages(site, &pages).await;
            let record = if report.failed() == 0 {
                StepRecord::ok(
                    StepId::ContentPushed,
                    serde_json::to_value(&report).unwrap_or(serde_json::Value::Null),
                )
            } else {
                StepRecord {
                    step: StepId::ContentPushed,
                    success: false,
                    data: serde_json::to_value(&report).unwrap_or(serde_json::Value::Null),
                    error: Some(format!("{} page(s) failed to publish", report.failed())),
                }
            };
            run.record(record);
        }

        Ok(())
    }
}
