//! VTpass vendor adapter
//!
//! Fulfils data, airtime, cable and electricity orders through the VTpass
//! REST API. Pay and requery are POSTs authenticated with api/secret key
//! headers; the plan catalog is a public-key GET.

use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{info, warn};

use crate::error::{AppError, AppResult};
use crate::model::{ServiceType, VendorConfig};
use crate::vendors::traits::VendorAdapter;
use crate::vendors::types::{DispatchOutcome, PlanQuote, PurchaseOrder, VerifyOutcome};

fn default_base_url() -> String {
    "https://vtpass.com".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_verify_retries() -> u32 {
    3
}

/// Connection settings, deserialized from the vendor config `settings` column.
#[derive(Debug, Clone, Deserialize)]
pub struct VtPassSettings {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    pub api_key: String,
    pub secret_key: String,
    #[serde(default)]
    pub public_key: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_verify_retries")]
    pub verify_retries: u32,
}

pub struct VtPassAdapter {
    adapter_id: String,
    services: Vec<ServiceType>,
    settings: VtPassSettings,
    client: Client,
}

impl VtPassAdapter {
    pub fn from_config(config: &VendorConfig) -> Result<Self, String> {
        let settings: VtPassSettings = serde_json::from_value(config.settings.clone())
            .map_err(|e| format!("invalid vtpass settings: {}", e))?;

        let client = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(|e| format!("failed to build http client: {}", e))?;

        Ok(Self {
            adapter_id: config.adapter_id.clone(),
            services: config.service_types(),
            settings,
            client,
        })
    }

    fn build_pay_request(&self, order: &PurchaseOrder) -> Result<(String, Value), String> {
        let service_id = service_id_for(order.service_type, &order.network);
        let amount = order.amount.to_string();

        let body = match order.service_type {
            ServiceType::Airtime => serde_json::json!({
                "request_id": order.request_id,
                "serviceID": service_id,
                "amount": amount,
                "phone": order.recipient,
            }),
            ServiceType::Data => {
                let plan = order
                    .param("plan_code")
                    .ok_or("data purchase requires plan_code")?;
                serde_json::json!({
                    "request_id": order.request_id,
                    "serviceID": service_id,
                    "billersCode": order.recipient,
                    "variation_code": plan,
                    "amount": amount,
                    "phone": order.recipient,
                })
            }
            ServiceType::Cable => {
                let plan = order
                    .param("plan_code")
                    .ok_or("cable purchase requires plan_code")?;
                let phone = order.param("phone").unwrap_or(order.recipient.as_str());
                serde_json::json!({
                    "request_id": order.request_id,
                    "serviceID": service_id,
                    "billersCode": order.recipient,
                    "variation_code": plan,
                    "amount": amount,
                    "phone": phone,
                    "subscription_type": order.param("subscription_type").unwrap_or("change"),
                })
            }
            ServiceType::Electricity => {
                let meter_type = order
                    .param("meter_type")
                    .ok_or("electricity purchase requires meter_type")?;
                let phone = order.param("phone").unwrap_or(order.recipient.as_str());
                serde_json::json!({
                    "request_id": order.request_id,
                    "serviceID": service_id,
                    "billersCode": order.recipient,
                    "variation_code": meter_type,
                    "amount": amount,
                    "phone": phone,
                })
            }
        };

        Ok((service_id, body))
    }
}

#[async_trait]
impl VendorAdapter for VtPassAdapter {
    fn id(&self) -> &str {
        &self.adapter_id
    }

    fn supports(&self, service_type: ServiceType) -> bool {
        self.services.contains(&service_type)
    }

    async fn quote(&self, service_type: ServiceType, network: &str) -> AppResult<Vec<PlanQuote>> {
        let service_id = service_id_for(service_type, network);
        let url = format!(
            "{}/api/service-variations?serviceID={}",
            self.settings.base_url, service_id
        );

        let mut request = self.client.get(&url).header("api-key", &self.settings.api_key);
        if let Some(ref public_key) = self.settings.public_key {
            request = request.header("public-key", public_key);
        }

        let response = request.send().await.map_err(|e| {
            AppError::Internal(format!("vtpass variations request failed: {}", e))
        })?;
        if !response.status().is_success() {
            return Err(AppError::Internal(format!(
                "vtpass variations returned HTTP {}",
                response.status()
            )));
        }

        let parsed: VtPassVariationsResponse = response.json().await.map_err(|e| {
            AppError::Internal(format!("vtpass variations response unreadable: {}", e))
        })?;

        let variations = parsed
            .content
            .and_then(|c| c.variations)
            .unwrap_or_default();
        let plans = variations
            .into_iter()
            .filter_map(|v| {
                let amount = v.variation_amount.trim().parse::<Decimal>().ok()?;
                Some(PlanQuote {
                    plan_code: v.variation_code,
                    name: v.name,
                    amount,
                    validity: None,
                })
            })
            .collect();
        Ok(plans)
    }

    async fn execute(&self, order: &PurchaseOrder) -> DispatchOutcome {
        let (service_id, body) = match self.build_pay_request(order) {
            Ok(pair) => pair,
            Err(reason) => return DispatchOutcome::Rejected { reason },
        };

        info!(
            "Dispatching to vtpass: service_id={}, request_id={}",
            service_id, order.request_id
        );

        let url = format!("{}/api/pay", self.settings.base_url);
        let response = self
            .client
            .post(&url)
            .header("api-key", &self.settings.api_key)
            .header("secret-key", &self.settings.secret_key)
            .json(&body)
            .send()
            .await;

        let response = match response {
            Ok(r) => r,
            Err(e) if e.is_timeout() => {
                return DispatchOutcome::Unavailable {
                    reason: format!("vtpass request timed out: {}", e),
                }
            }
            Err(e) => {
                return DispatchOutcome::Unavailable {
                    reason: format!("vtpass transport error: {}", e),
                }
            }
        };

        let status = response.status();
        let body_text = response.text().await.unwrap_or_default();

        if status.as_u16() == 401 || status.as_u16() == 403 {
            return DispatchOutcome::Unavailable {
                reason: format!("vtpass auth rejected: HTTP {}", status),
            };
        }
        if status.is_client_error() {
            return DispatchOutcome::Rejected {
                reason: format!("vtpass rejected request: HTTP {}: {}", status, snippet(&body_text)),
            };
        }
        if !status.is_success() {
            return DispatchOutcome::Unavailable {
                reason: format!("vtpass HTTP {}", status),
            };
        }

        let parsed: VtPassResponse = match serde_json::from_str(&body_text) {
            Ok(p) => p,
            Err(e) => {
                warn!(
                    "Unreadable vtpass response for {}: {}",
                    order.request_id, e
                );
                return DispatchOutcome::Unavailable {
                    reason: "vtpass returned an unreadable response".to_string(),
                };
            }
        };

        let tx = parsed.content.as_ref().and_then(|c| c.transactions.as_ref());
        let tx_status = tx.and_then(|t| t.status.as_deref());
        match classify_pay_code(&parsed.code, tx_status) {
            PayClass::Delivered => DispatchOutcome::Delivered {
                vendor_reference: tx.and_then(|t| t.transaction_id.clone()),
                cost_price: tx.and_then(|t| decimal_from_value(t.total_amount.as_ref())),
                payload: serde_json::from_str(&body_text).ok(),
            },
            PayClass::Rejected => DispatchOutcome::Rejected {
                reason: parsed
                    .response_description
                    .unwrap_or_else(|| format!("vtpass code {}", parsed.code)),
            },
            PayClass::Unavailable => DispatchOutcome::Unavailable {
                reason: parsed
                    .response_description
                    .unwrap_or_else(|| format!("vtpass code {}", parsed.code)),
            },
        }
    }

    async fn verify(&self, request_id: &str) -> VerifyOutcome {
        let url = format!("{}/api/requery", self.settings.base_url);
        let body = serde_json::json!({ "request_id": request_id });

        for attempt in 0..self.settings.verify_retries {
            let response = self
                .client
                .post(&url)
                .header("api-key", &self.settings.api_key)
                .header("secret-key", &self.settings.secret_key)
                .json(&body)
                .send()
                .await;

            match response {
                Ok(resp) if resp.status().is_success() => {
                    let text = resp.text().await.unwrap_or_default();
                    let parsed: VtPassResponse = match serde_json::from_str(&text) {
                        Ok(p) => p,
                        Err(e) => {
                            warn!("Unreadable vtpass requery response for {}: {}", request_id, e);
                            return VerifyOutcome::Unknown;
                        }
                    };

                    let tx = parsed.content.as_ref().and_then(|c| c.transactions.as_ref());
                    let tx_status = tx.and_then(|t| t.status.as_deref());
                    return match classify_requery(&parsed.code, tx_status) {
                        RequeryClass::Confirmed => VerifyOutcome::Confirmed {
                            vendor_reference: tx.and_then(|t| t.transaction_id.clone()),
                        },
                        RequeryClass::Failed => VerifyOutcome::Failed {
                            reason: parsed
                                .response_description
                                .unwrap_or_else(|| format!("vtpass code {}", parsed.code)),
                        },
                        RequeryClass::Unknown => VerifyOutcome::Unknown,
                    };
                }
                Ok(resp) => {
                    warn!(
                        "vtpass requery HTTP {} for {} (attempt {})",
                        resp.status(),
                        request_id,
                        attempt + 1
                    );
                }
                Err(e) => {
                    warn!(
                        "vtpass requery transport error for {} (attempt {}): {}",
                        request_id,
                        attempt + 1,
                        e
                    );
                }
            }

            if attempt + 1 < self.settings.verify_retries {
                let backoff = 2_u64.pow(attempt);
                tokio::time::sleep(Duration::from_secs(backoff)).await;
            }
        }

        VerifyOutcome::Unknown
    }
}

/// VTpass uses "etisalat" where the rest of the market says "9mobile".
fn vtpass_network(network: &str) -> &str {
    match network {
        "9mobile" => "etisalat",
        other => other,
    }
}

fn service_id_for(service_type: ServiceType, network: &str) -> String {
    let network = vtpass_network(network);
    match service_type {
        ServiceType::Data => format!("{}-data", network),
        ServiceType::Airtime | ServiceType::Cable | ServiceType::Electricity => {
            network.to_string()
        }
    }
}

#[derive(Debug, PartialEq)]
enum PayClass {
    Delivered,
    Rejected,
    Unavailable,
}

/// Maps a VTpass response code (plus the transaction status for code 000)
/// onto the dispatch taxonomy. Codes that read as "your order is wrong" are
/// rejections; vendor-side trouble such as a drained float account or a
/// duplicate request id must not stop the fallback chain or cause a refund.
fn classify_pay_code(code: &str, tx_status: Option<&str>) -> PayClass {
    match code {
        "000" => match tx_status.unwrap_or("delivered") {
            "failed" | "reversed" => PayClass::Rejected,
            _ => PayClass::Delivered,
        },
        // 010 unknown variation, 011 invalid arguments, 012 no product,
        // 013 below minimum, 016 failed, 017 above maximum
        "010" | "011" | "012" | "013" | "016" | "017" => PayClass::Rejected,
        // 014 duplicate request id, 018 vendor float exhausted, 085 auth
        "014" | "018" | "085" => PayClass::Unavailable,
        _ => PayClass::Unavailable,
    }
}

#[derive(Debug, PartialEq)]
enum RequeryClass {
    Confirmed,
    Failed,
    Unknown,
}

fn classify_requery(code: &str, tx_status: Option<&str>) -> RequeryClass {
    match code {
        "000" => match tx_status.unwrap_or("") {
            "delivered" => RequeryClass::Confirmed,
            "failed" | "reversed" => RequeryClass::Failed,
            _ => RequeryClass::Unknown,
        },
        // The vendor has no such transaction, so it cannot have fulfilled it.
        "010" | "011" | "012" | "016" => RequeryClass::Failed,
        // 099: still processing
        _ => RequeryClass::Unknown,
    }
}

fn decimal_from_value(value: Option<&Value>) -> Option<Decimal> {
    match value? {
        Value::String(s) => s.trim().parse().ok(),
        Value::Number(n) => n.to_string().parse().ok(),
        _ => None,
    }
}

fn snippet(body: &str) -> String {
    body.chars().take(200).collect()
}

// VTpass API response envelopes

#[derive(Debug, Deserialize)]
struct VtPassResponse {
    code: String,
    #[serde(default)]
    response_description: Option<String>,
    #[serde(default)]
    content: Option<VtPassContent>,
}

#[derive(Debug, Deserialize)]
struct VtPassContent {
    #[serde(default)]
    transactions: Option<VtPassTransaction>,
}

#[derive(Debug, Deserialize)]
struct VtPassTransaction {
    #[serde(default, rename = "transactionId")]
    transaction_id: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    total_amount: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct VtPassVariationsResponse {
    #[serde(default)]
    content: Option<VtPassVariationsContent>,
}

#[derive(Debug, Deserialize)]
struct VtPassVariationsContent {
    // The live API spells the field "varations".
    #[serde(default, rename = "varations", alias = "variations")]
    variations: Option<Vec<VtPassVariation>>,
}

#[derive(Debug, Deserialize)]
struct VtPassVariation {
    variation_code: String,
    name: String,
    variation_amount: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn test_config() -> VendorConfig {
        VendorConfig {
            id: Uuid::new_v4(),
            adapter_id: "vtpass".to_string(),
            display_name: "VTpass".to_string(),
            services: vec!["data".to_string(), "airtime".to_string()],
            is_enabled: true,
            priority: 1,
            settings: serde_json::json!({
                "api_key": "test-api-key",
                "secret_key": "test-secret-key",
            }),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn settings_defaults_fill_in() {
        let adapter = VtPassAdapter::from_config(&test_config()).unwrap();
        assert_eq!(adapter.settings.base_url, "https://vtpass.com");
        assert_eq!(adapter.settings.timeout_secs, 30);
        assert!(adapter.supports(ServiceType::Data));
        assert!(!adapter.supports(ServiceType::Electricity));
    }

    #[test]
    fn missing_credentials_fail_config_parse() {
        let mut config = test_config();
        config.settings = serde_json::json!({ "api_key": "only-half" });
        assert!(VtPassAdapter::from_config(&config).is_err());
    }

    #[test]
    fn service_ids_follow_vendor_catalog() {
        assert_eq!(service_id_for(ServiceType::Data, "mtn"), "mtn-data");
        assert_eq!(service_id_for(ServiceType::Data, "9mobile"), "etisalat-data");
        assert_eq!(service_id_for(ServiceType::Airtime, "glo"), "glo");
        assert_eq!(service_id_for(ServiceType::Cable, "dstv"), "dstv");
        assert_eq!(
            service_id_for(ServiceType::Electricity, "ikeja-electric"),
            "ikeja-electric"
        );
    }

    #[test]
    fn pay_code_classification() {
        assert_eq!(
            classify_pay_code("000", Some("delivered")),
            PayClass::Delivered
        );
        assert_eq!(classify_pay_code("000", Some("pending")), PayClass::Delivered);
        assert_eq!(classify_pay_code("000", None), PayClass::Delivered);
        assert_eq!(classify_pay_code("000", Some("failed")), PayClass::Rejected);
        assert_eq!(classify_pay_code("016", None), PayClass::Rejected);
        assert_eq!(classify_pay_code("013", None), PayClass::Rejected);
        assert_eq!(classify_pay_code("018", None), PayClass::Unavailable);
        assert_eq!(classify_pay_code("014", None), PayClass::Unavailable);
        assert_eq!(classify_pay_code("077", None), PayClass::Unavailable);
    }

    #[test]
    fn requery_classification() {
        assert_eq!(
            classify_requery("000", Some("delivered")),
            RequeryClass::Confirmed
        );
        assert_eq!(
            classify_requery("000", Some("pending")),
            RequeryClass::Unknown
        );
        assert_eq!(classify_requery("000", Some("failed")), RequeryClass::Failed);
        assert_eq!(classify_requery("016", None), RequeryClass::Failed);
        assert_eq!(classify_requery("011", None), RequeryClass::Failed);
        assert_eq!(classify_requery("099", None), RequeryClass::Unknown);
    }

    #[test]
    fn data_order_without_plan_code_is_rejected_locally() {
        let adapter = VtPassAdapter::from_config(&test_config()).unwrap();
        let order = PurchaseOrder {
            request_id: "pur_x-1".to_string(),
            service_type: ServiceType::Data,
            network: "mtn".to_string(),
            recipient: "08031234567".to_string(),
            amount: Decimal::new(1000, 0),
            params: serde_json::json!({}),
        };
        assert!(adapter.build_pay_request(&order).is_err());
    }

    #[test]
    fn variations_parse_with_vendor_misspelling() {
        let raw = r#"{
            "response_description": "000",
            "content": {
                "ServiceName": "MTN Data",
                "varations": [
                    {"variation_code": "mtn-1gb", "name": "1GB - 30 days", "variation_amount": "1000.00", "fixedPrice": "Yes"}
                ]
            }
        }"#;
        let parsed: VtPassVariationsResponse = serde_json::from_str(raw).unwrap();
        let variations = parsed.content.unwrap().variations.unwrap();
        assert_eq!(variations.len(), 1);
        assert_eq!(variations[0].variation_code, "mtn-1gb");
    }
}
