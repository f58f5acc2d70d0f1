use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use crate::config::{NamecheapConfig, RegistrantDefaults};
use crate::core::error::{ProviderError, ProviderErrorKind};

const PROVIDER: &str = "namecheap";
const PRODUCTION_URL: &str = "https://api.namecheap.com/xml.response";
const SANDBOX_URL: &str = "https://api.sandbox.namecheap.com/xml.response";

/// One contact record; the registrar requires it for all four roles
/// (registrant/admin/tech/billing), filled from the same record.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct DomainContact {
    pub first_name: String,
    pub last_name: String,
    pub address1: String,
    pub city: String,
    pub state_province: String,
    pub postal_code: String,
    pub country: String,
    pub phone: String,
    pub email: String,
}

impl From<RegistrantDefaults> for DomainContact {
    fn from(d: RegistrantDefaults) -> Self {
        Self {
            first_name: d.first_name,
            last_name: d.last_name,
            address1: d.address1,
            city: d.city,
            state_province: d.state_province,
            postal_code: d.postal_code,
            country: d.country,
            phone: d.phone,
            email: d.email,
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct DomainAvailability {
    pub available: bool,
    pub premium: bool,
    pub premium_price: Option<f64>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct DomainRegistration {
    pub domain: String,
    pub charged_amount: f64,
    pub domain_id: Option<String>,
    pub transaction_id: Option<String>,
    pub order_id: Option<String>,
}

#[async_trait]
pub trait RegistrarApi: Send + Sync {
    async fn check(&self, domain: &str) -> Result<DomainAvailability, ProviderError>;

    async fn register(
        &self,
        domain: &str,
        years: u32,
        contact: &DomainContact,
    ) -> Result<DomainRegistration, ProviderError>;

    async fn set_custom_nameservers(
        &self,
        domain: &str,
        nameservers: &[String],
    ) -> Result<(), ProviderError>;
}

// ── Namecheap XML response shapes ──

#[derive(Deserialize, Debug)]
struct ApiResponse {
    #[serde(rename = "@Status")]
    status: String,
    #[serde(rename = "Errors", default)]
    errors: Option<ApiErrors>,
    #[serde(rename = "CommandResponse", default)]
    command_response: Option<CommandResponse>,
}

#[derive(Deserialize, Default, Debug)]
struct ApiErrors {
    #[serde(rename = "Error", default)]
    errors: Vec<ApiErrorEntry>,
}

#[derive(Deserialize, Debug)]
struct ApiErrorEntry {
    #[serde(rename = "$text", default)]
    message: String,
}

#[derive(Deserialize, Default, Debug)]
struct CommandResponse {
    #[serde(rename = "DomainCheckResult", default)]
    check: Option<DomainCheckResult>,
    #[serde(rename = "DomainCreateResult", default)]
    create: Option<DomainCreateResult>,
    #[serde(rename = "DomainDNSSetCustomResult", default)]
    set_custom: Option<DomainDnsSetCustomResult>,
}

#[derive(Deserialize, Debug)]
struct DomainCheckResult {
    #[serde(rename = "@Available")]
    available: String,
    #[serde(rename = "@IsPremiumName", default)]
    is_premium: Option<String>,
    #[serde(rename = "@PremiumRegistrationPrice", default)]
    premium_price: Option<String>,
}

#[derive(Deserialize, Debug)]
struct DomainCreateResult {
    #[serde(rename = "@Domain")]
    domain: String,
    #[serde(rename = "@Registered")]
    registered: String,
    #[serde(rename = "@ChargedAmount", default)]
    charged_amount: Option<String>,
    #[serde(rename = "@DomainID", default)]
    domain_id: Option<String>,
    #[serde(rename = "@TransactionID", default)]
    transaction_id: Option<String>,
    #[serde(rename = "@OrderID", default)]
    order_id: Option<String>,
}

#[derive(Deserialize, Debug)]
struct DomainDnsSetCustomResult {
    #[serde(rename = "@Updated")]
    updated: String,
}

fn xml_bool(raw: &str) -> bool {
    raw.eq_ignore_ascii_case("true")
}

fn parse_response(body: &str) -> Result<ApiResponse, ProviderError> {
    let parsed: ApiResponse = quick_xml::de::from_str(body).map_err(|e| {
        ProviderError::new(
            PROVIDER,
            ProviderErrorKind::UpstreamInvalid,
            format!("unparseable registrar XML: {e}"),
        )
    })?;

    if !parsed.status.eq_ignore_ascii_case("OK") {
        let message = parsed
            .errors
            .as_ref()
            .and_then(|e| e.errors.first())
            .map(|e| e.message.clone())
            .unwrap_or_else(|| "registrar reported an error".to_string());
        let kind = if message.to_lowercase().contains("not available")
            || message.to_lowercase().contains("already registered")
        {
            ProviderErrorKind::Conflict
        } else {
            ProviderErrorKind::UpstreamFailure
        };
        return Err(ProviderError::new(PROVIDER, kind, message));
    }

    Ok(parsed)
}

/// Split `example.co.uk` into SLD + TLD the way the registrar expects.
fn split_domain(domain: &str) -> (String, String) {
    match domain.split_once('.') {
        Some((sld, tld)) => (sld.to_string(), tld.to_string()),
        None => (domain.to_string(), String::new()),
    }
}

pub struct NamecheapClient {
    api_key: String,
    username: String,
    client_ip: String,
    base_url: String,
    client: Client,
}

impl NamecheapClient {
    pub fn from_config(cfg: &NamecheapConfig) -> Option<Self> {
        let (api_key, username, client_ip) = match (
            cfg.api_key.clone(),
            cfg.username.clone(),
            cfg.client_ip.clone(),
        ) {
            (Some(k), Some(u), Some(ip)) => (k, u, ip),
            _ => return None,
        };
        Some(Self {
            api_key,
            username,
            client_ip,
            base_url: if cfg.sandbox {
                SANDBOX_URL.to_string()
            } else {
                PRODUCTION_URL.to_string()
            },
            client: super::http_client(),
        })
    }

    #[cfg(test)]
    pub fn with_base_url(base_url: String) -> Self {
        Self {
            api_key: "test-key".into(),
            username: "tester".into(),
            client_ip: "127.0.0.1".into(),
            base_url,
            client: super::http_client(),
        }
    }

    fn base_params(&self, command: &str) -> Vec<(String, String)> {
        vec![
            ("ApiUser".into(), self.username.clone()),
            ("ApiKey".into(), self.api_key.clone()),
            ("UserName".into(), self.username.clone()),
            ("ClientIp".into(), self.client_ip.clone()),
            ("Command".into(), command.into()),
        ]
    }

    async fn call(&self, params: &[(String, String)]) -> Result<ApiResponse, ProviderError> {
        let res = self
            .client
            .get(&self.base_url)
            .query(params)
            .send()
            .await
            .map_err(|e| ProviderError::from_transport(PROVIDER, e))?;

        let status = res.status();
        let body = res
            .text()
            .await
            .map_err(|e| ProviderError::from_transport(PROVIDER, e))?;

        if !status.is_success() {
            return Err(ProviderError::from_status(PROVIDER, status.as_u16(), body));
        }
        parse_response(&body)
    }
}

/// Contact fields for one role, e.g. `RegistrantFirstName`.
fn push_contact_params(params: &mut Vec<(String, String)>, role: &str, c: &DomainContact) {
    let fields = [
        ("FirstName", &c.first_name),
        ("LastName", &c.last_name),
        ("Address1", &c.address1),
        ("City", &c.city),
        ("StateProvince", &c.state_province),
        ("PostalCode", &c.postal_code),
        ("Country", &c.country),
        ("Phone", &c.phone),
        ("EmailAddress", &c.email),
    ];
    for (field, value) in fields {
        params.push((format!("{role}{field}"), value.clone()));
    }
}

#[async_trait]
impl RegistrarApi for NamecheapClient {
    async fn check(&self, domain: &str) -> Result<DomainAvailability, ProviderError> {
        let mut params = self.base_params("namecheap.domains.check");
        params.push(("DomainList".into(), domain.to_string()));

        let response = self.call(&params).await?;
        let result = response
            .command_response
            .and_then(|c| c.check)
            .ok_or_else(|| {
                ProviderError::new(
                    PROVIDER,
                    ProviderErrorKind::UpstreamInvalid,
                    "check response missing DomainCheckResult",
                )
            })?;

        Ok(DomainAvailability {
            available: xml_bool(&result.available),
            premium: result.is_premium.as_deref().map(xml_bool).unwrap_or(false),
            premium_price: result.premium_price.and_then(|p| p.parse().ok()),
        })
    }

    async fn register(
        &self,
        domain: &str,
        years: u32,
        contact: &DomainContact,
    ) -> Result<DomainRegistration, ProviderError> {
        let mut params = self.base_params("namecheap.domains.create");
        params.push(("DomainName".into(), domain.to_string()));
        params.push(("Years".into(), years.to_string()));
        // All four roles are mandatory and share the same record.
        for role in ["Registrant", "Tech", "Admin", "AuxBilling"] {
            push_contact_params(&mut params, role, contact);
        }

        let response = self.call(&params).await?;
        let result = response
            .command_response
            .and_then(|c| c.create)
            .ok_or_else(|| {
                ProviderError::new(
                    PROVIDER,
                    ProviderErrorKind::UpstreamInvalid,
                    "create response missing DomainCreateResult",
                )
            })?;

        if !xml_bool(&result.registered) {
            return Err(ProviderError::new(
                PROVIDER,
                ProviderErrorKind::UpstreamFailure,
                format!("registrar refused registration of {}", result.domain),
            ));
        }

        Ok(DomainRegistration {
            domain: result.domain,
            charged_amount: result
                .charged_amount
                .and_then(|c| c.parse().ok())
                .unwrap_or(0.0),
            domain_id: result.domain_id,
            transaction_id: result.transaction_id,
            order_id: result.order_id,
        })
    }

    async fn set_custom_nameservers(
        &self,
        domain: &str,
        nameservers: &[String],
    ) -> Result<(), ProviderError> {
        let (sld, tld) = split_domain(domain);
        let mut params = self.base_params("namecheap.domains.dns.setCustom");
        params.push(("SLD".into(), sld));
        params.push(("TLD".into(), tld));
        params.push(("Nameservers".into(), nameservers.join(",")));

        let response = self.call(&params).await?;
        let result = response
            .command_response
            .and_then(|c| c.set_custom)
            .ok_or_else(|| {
                ProviderError::new(
                    PROVIDER,
                    ProviderErrorKind::UpstreamInvalid,
                    "setCustom response missing DomainDNSSetCustomResult",
                )
            })?;

        if !xml_bool(&result.updated) {
            return Err(ProviderError::new(
                PROVIDER,
                ProviderErrorKind::UpstreamFailure,
                format!("nameserver update for {domain} was not applied"),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_available_check_result() {
        let xml = r#"<?xml version="1.0"?>
            <ApiResponse Status="OK">
              <CommandResponse>
                <DomainCheckResult Domain="alpha.example" Available="true" IsPremiumName="false"/>
              </CommandResponse>
            </ApiResponse>"#;
        let parsed = parse_response(xml).unwrap();
        let check = parsed.command_response.unwrap().check.unwrap();
        assert!(xml_bool(&check.available));
    }

    #[test]
    fn parses_premium_price_attribute() {
        let xml = r#"<ApiResponse Status="OK">
              <CommandResponse>
                <DomainCheckResult Domain="gold.example" Available="true"
                    IsPremiumName="true" PremiumRegistrationPrice="104.99"/>
              </CommandResponse>
            </ApiResponse>"#;
        let parsed = parse_response(xml).unwrap();
        let check = parsed.command_response.unwrap().check.unwrap();
        assert!(xml_bool(check.is_premium.as_deref().unwrap()));
        assert_eq!(check.premium_price.as_deref(), Some("104.99"));
    }

    #[test]
    fn error_status_surfaces_vendor_message() {
        let xml = r#"<ApiResponse Status="ERROR">
              <Errors><Error Number="2030280">TLD is not supported</Error></Errors>
            </ApiResponse>"#;
        let err = parse_response(xml).unwrap_err();
        assert!(err.vendor_message.contains("TLD is not supported"));
    }

    #[test]
    fn already_registered_maps_to_conflict() {
        let xml = r#"<ApiResponse Status="ERROR">
              <Errors><Error Number="2033409">Domain is already registered</Error></Errors>
            </ApiResponse>"#;
        let err = parse_response(xml).unwrap_err();
        assert_eq!(err.kind, ProviderErrorKind::Conflict);
    }

    #[test]
    fn splits_multi_label_domain_at_first_dot() {
        assert_eq!(
            split_domain("alpha.co.uk"),
            ("alpha".to_string(), "co.uk".to_string())
        );
    }

    #[tokio::test]
    async fn check_sends_command_and_parses_availability() {
        let server = httpmock::MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(httpmock::Method::GET)
                    .query_param("Command", "namecheap.domains.check")
                    .query_param("DomainList", "alpha.example");
                then.status(200).body(
                    r#"<ApiResponse Status="OK"><CommandResponse>
                       <DomainCheckResult Domain="alpha.example" Available="true" IsPremiumName="false"/>
                       </CommandResponse></ApiResponse>"#,
                );
            })
            .await;

        let client = NamecheapClient::with_base_url(server.base_url());
        let availability = client.check("alpha.example").await.unwrap();
        assert!(availability.available);
        assert!(!availability.premium);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn set_custom_nameservers_joins_with_commas() {
        let server = httpmock::MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(httpmock::Method::GET)
                    .query_param("Command", "namecheap.domains.dns.setCustom")
                    .query_param("SLD", "alpha")
                    .query_param("TLD", "example")
                    .query_param("Nameservers", "ns1,ns2");
                then.status(200).body(
                    r#"<ApiResponse Status="OK"><CommandResponse>
                       <DomainDNSSetCustomResult Domain="alpha.example" Updated="true"/>
                       </CommandResponse></ApiResponse>"#,
                );
            })
            .await;

        let client = NamecheapClient::with_base_url(server.base_url());
        client
            .set_custom_nameservers("alpha.example", &["ns1".into(), "ns2".into()])
            .await
            .unwrap();
        mock.assert_async().await;
    }

    #[test]
    fn contact_params_cover_all_roles() {
        let contact = DomainContact {
            first_name: "Ada".into(),
            last_name: "Lovelace".into(),
            address1: "1 Analytical Way".into(),
            city: "London".into(),
            state_province: "LDN".into(),
            postal_code: "E1".into(),
            country: "GB".into(),
            phone: "+44.2000000000".into(),
            email: "ada@example.com".into(),
        };
        let mut params = Vec::new();
        for role in ["Registrant", "Tech", "Admin", "AuxBilling"] {
            push_contact_params(&mut params, role, &contact);
        }
        assert_eq!(params.len(), 36);
        assert!(params.iter().any(|(k, _)| k == "RegistrantFirstName"));
        assert!(params.iter().any(|(k, _)| k == "AuxBillingEmailAddress"));
    }
}
