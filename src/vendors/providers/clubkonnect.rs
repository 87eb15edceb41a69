//! ClubKonnect vendor adapter
//!
//! ClubKonnect exposes a query-string API: every operation is a GET with the
//! credentials in the URL, and the order state comes back as an upper-case
//! status token. Responses are usually JSON but error paths sometimes return
//! the bare token as text.

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
    "https://www.nellobytesystems.com".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_verify_retries() -> u32 {
    3
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClubKonnectSettings {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    pub user_id: String,
    pub api_key: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_verify_retries")]
    pub verify_retries: u32,
}

pub struct ClubKonnectAdapter {
    adapter_id: String,
    services: Vec<ServiceType>,
    settings: ClubKonnectSettings,
    client: Client,
}

impl ClubKonnectAdapter {
    pub fn from_config(config: &VendorConfig) -> Result<Self, String> {
        let settings: ClubKonnectSettings = serde_json::from_value(config.settings.clone())
            .map_err(|e| format!("invalid clubkonnect settings: {}", e))?;

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

    fn build_order(&self, order: &PurchaseOrder) -> Result<(String, Vec<(String, String)>), String> {
        let mut params = vec![
            ("UserID".to_string(), self.settings.user_id.clone()),
            ("APIKey".to_string(), self.settings.api_key.clone()),
            ("RequestID".to_string(), order.request_id.clone()),
        ];

        let endpoint = match order.service_type {
            ServiceType::Data => {
                let code = network_code(&order.network).ok_or_else(|| {
                    format!("clubkonnect does not serve network '{}'", order.network)
                })?;
                let plan = order
                    .param("plan_code")
                    .ok_or("data purchase requires plan_code")?;
                params.push(("MobileNetwork".to_string(), code.to_string()));
                params.push(("DataPlan".to_string(), plan.to_string()));
                params.push(("MobileNumber".to_string(), order.recipient.clone()));
                "APIDatabaseV1.asp"
            }
            ServiceType::Airtime => {
                let code = network_code(&order.network).ok_or_else(|| {
                    format!("clubkonnect does not serve network '{}'", order.network)
                })?;
                params.push(("MobileNetwork".to_string(), code.to_string()));
                params.push(("Amount".to_string(), order.amount.to_string()));
                params.push(("MobileNumber".to_string(), order.recipient.clone()));
                "APIAirtimeV1.asp"
            }
            ServiceType::Cable => {
                let plan = order
                    .param("plan_code")
                    .ok_or("cable purchase requires plan_code")?;
                let phone = order.param("phone").unwrap_or(order.recipient.as_str());
                params.push(("CableTV".to_string(), order.network.clone()));
                params.push(("Package".to_string(), plan.to_string()));
                params.push(("SmartCardNo".to_string(), order.recipient.clone()));
                params.push(("PhoneNo".to_string(), phone.to_string()));
                "APICableTVV1.asp"
            }
            ServiceType::Electricity => {
                let meter_type = order
                    .param("meter_type")
                    .ok_or("electricity purchase requires meter_type")?;
                let phone = order.param("phone").unwrap_or(order.recipient.as_str());
                params.push(("ElectricCompany".to_string(), order.network.clone()));
                params.push(("MeterType".to_string(), meter_type.to_string()));
                params.push(("MeterNo".to_string(), order.recipient.clone()));
                params.push(("Amount".to_string(), order.amount.to_string()));
                params.push(("PhoneNo".to_string(), phone.to_string()));
                "APIElectricityV1.asp"
            }
        };

        Ok((format!("{}/{}", self.settings.base_url, endpoint), params))
    }
}

#[async_trait]
impl VendorAdapter for ClubKonnectAdapter {
    fn id(&self) -> &str {
        &self.adapter_id
    }

    fn supports(&self, service_type: ServiceType) -> bool {
        self.services.contains(&service_type)
    }

    async fn quote(&self, service_type: ServiceType, network: &str) -> AppResult<Vec<PlanQuote>> {
        // The public catalog endpoint only covers data bundles.
        if service_type != ServiceType::Data {
            return Ok(Vec::new());
        }
        let network_key = match network {
            "mtn" => "MTN",
            "glo" => "Glo",
            "airtel" => "Airtel",
            "9mobile" | "etisalat" => "m_9mobile",
            _ => return Ok(Vec::new()),
        };

        let url = format!("{}/APIDatabasePlansV2.asp", self.settings.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[
                ("UserID", self.settings.user_id.as_str()),
                ("APIKey", self.settings.api_key.as_str()),
            ])
            .send()
            .await
            .map_err(|e| AppError::Internal(format!("clubkonnect plans request failed: {}", e)))?;
        if !response.status().is_success() {
            return Err(AppError::Internal(format!(
                "clubkonnect plans returned HTTP {}",
                response.status()
            )));
        }

        let catalog: Value = response.json().await.map_err(|e| {
            AppError::Internal(format!("clubkonnect plans response unreadable: {}", e))
        })?;

        let mut plans = Vec::new();
        let groups = catalog
            .get("MOBILE_NETWORK")
            .and_then(|m| m.get(network_key))
            .and_then(|v| v.as_array());
        if let Some(groups) = groups {
            for group in groups {
                let Some(products) = group.get("PRODUCT").and_then(|p| p.as_array()) else {
                    continue;
                };
                for product in products {
                    let code = product
                        .get("PRODUCT_CODE")
                        .or_else(|| product.get("PRODUCT_ID"))
                        .and_then(|v| v.as_str());
                    let name = product.get("PRODUCT_NAME").and_then(|v| v.as_str());
                    let amount = product
                        .get("PRODUCT_AMOUNT")
                        .and_then(|v| decimal_from_value(Some(v)));
                    if let (Some(code), Some(name), Some(amount)) = (code, name, amount) {
                        plans.push(PlanQuote {
                            plan_code: code.to_string(),
                            name: name.to_string(),
                            amount,
                            validity: None,
                        });
                    }
                }
            }
        }
        Ok(plans)
    }

    async fn execute(&self, order: &PurchaseOrder) -> DispatchOutcome {
        let (url, params) = match self.build_order(order) {
            Ok(pair) => pair,
            Err(reason) => return DispatchOutcome::Rejected { reason },
        };

        // The URL carries credentials, so log the service instead.
        info!(
            "Dispatching to clubkonnect: service={}, request_id={}",
            order.service_type, order.request_id
        );

        let response = self.client.get(&url).query(&params).send().await;
        let response = match response {
            Ok(r) => r,
            Err(e) if e.is_timeout() => {
                return DispatchOutcome::Unavailable {
                    reason: format!("clubkonnect request timed out: {}", e),
                }
            }
            Err(e) => {
                return DispatchOutcome::Unavailable {
                    reason: format!("clubkonnect transport error: {}", e),
                }
            }
        };

        let status = response.status();
        let body_text = response.text().await.unwrap_or_default();

        if status.as_u16() == 401 || status.as_u16() == 403 {
            return DispatchOutcome::Unavailable {
                reason: format!("clubkonnect auth rejected: HTTP {}", status),
            };
        }
        if status.is_client_error() {
            return DispatchOutcome::Rejected {
                reason: format!("clubkonnect rejected request: HTTP {}", status),
            };
        }
        if !status.is_success() {
            return DispatchOutcome::Unavailable {
                reason: format!("clubkonnect HTTP {}", status),
            };
        }

        let (status_text, order_id) = match serde_json::from_str::<ClubKonnectResponse>(&body_text)
        {
            Ok(parsed) => (
                parsed.status.clone().unwrap_or_default(),
                parsed.order_reference(),
            ),
            // Error paths return the bare token as text.
            Err(_) => (body_text.trim().to_string(), None),
        };
        if status_text.is_empty() {
            return DispatchOutcome::Unavailable {
                reason: "clubkonnect returned no status".to_string(),
            };
        }

        match classify_status(&status_text) {
            OrderClass::Delivered => DispatchOutcome::Delivered {
                vendor_reference: order_id,
                cost_price: serde_json::from_str::<ClubKonnectResponse>(&body_text)
                    .ok()
                    .and_then(|p| decimal_from_value(p.amountcharged.as_ref())),
                payload: serde_json::from_str(&body_text).ok(),
            },
            OrderClass::Rejected => DispatchOutcome::Rejected {
                reason: format!("clubkonnect: {}", status_text),
            },
            OrderClass::Unavailable => DispatchOutcome::Unavailable {
                reason: format!("clubkonnect: {}", status_text),
            },
        }
    }

    async fn verify(&self, request_id: &str) -> VerifyOutcome {
        let url = format!("{}/APIQueryV1.asp", self.settings.base_url);

        for attempt in 0..self.settings.verify_retries {
            let response = self
                .client
                .get(&url)
                .query(&[
                    ("UserID", self.settings.user_id.as_str()),
                    ("APIKey", self.settings.api_key.as_str()),
                    ("RequestID", request_id),
                ])
                .send()
                .await;

            match response {
                Ok(resp) if resp.status().is_success() => {
                    let text = resp.text().await.unwrap_or_default();
                    let (status_text, order_id) =
                        match serde_json::from_str::<ClubKonnectResponse>(&text) {
                            Ok(parsed) => (
                                parsed.status.clone().unwrap_or_default(),
                                parsed.order_reference(),
                            ),
                            Err(_) => (text.trim().to_string(), None),
                        };
                    return match classify_query_status(&status_text) {
                        QueryClass::Confirmed => VerifyOutcome::Confirmed {
                            vendor_reference: order_id,
                        },
                        QueryClass::Failed => VerifyOutcome::Failed {
                            reason: format!("clubkonnect: {}", status_text),
                        },
                        QueryClass::Unknown => VerifyOutcome::Unknown,
                    };
                }
                Ok(resp) => {
                    warn!(
                        "clubkonnect query HTTP {} for {} (attempt {})",
                        resp.status(),
                        request_id,
                        attempt + 1
                    );
                }
                Err(e) => {
                    warn!(
                        "clubkonnect query transport error for {} (attempt {}): {}",
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

fn network_code(network: &str) -> Option<&'static str> {
    match network {
        "mtn" => Some("01"),
        "glo" => Some("02"),
        "9mobile" | "etisalat" => Some("03"),
        "airtel" => Some("04"),
        _ => None,
    }
}

#[derive(Debug, PartialEq)]
enum OrderClass {
    Delivered,
    Rejected,
    Unavailable,
}

/// ORDER_RECEIVED already counts as delivered: the vendor has accepted the
/// order and owns it from there. INVALID_* tokens describe our order, so a
/// second vendor would fail the same way; balance and credential problems
/// are the vendor's and the route should move on.
fn classify_status(status: &str) -> OrderClass {
    let token = status.trim().to_uppercase();
    match token.as_str() {
        "ORDER_RECEIVED" | "ORDER_COMPLETED" | "ORDER_ONHOLD" | "ORDER_PROCESSING" => {
            OrderClass::Delivered
        }
        "INVALID_DATAPLAN" | "INVALID_SMARTCARDNO" | "INVALID_METERNO" | "INVALID_AMOUNT"
        | "BELOW_MINIMUM_AMOUNT" | "ABOVE_MAXIMUM_AMOUNT" | "ORDER_FAILED" | "ORDER_CANCELLED" => {
            OrderClass::Rejected
        }
        _ if token.starts_with("INVALID_MOBILE") => OrderClass::Rejected,
        "INSUFFICIENT_BALANCE" | "INVALID_CREDENTIALS" | "INVALID_APIKEY" | "MISSING_APIKEY"
        | "MISSING_USERID" | "SERVER_ERROR" => OrderClass::Unavailable,
        _ => OrderClass::Unavailable,
    }
}

#[derive(Debug, PartialEq)]
enum QueryClass {
    Confirmed,
    Failed,
    Unknown,
}

fn classify_query_status(status: &str) -> QueryClass {
    let token = status.trim().to_uppercase();
    match token.as_str() {
        "ORDER_COMPLETED" => QueryClass::Confirmed,
        "ORDER_FAILED" | "ORDER_CANCELLED" | "ORDER_NOT_FOUND" | "INVALID_ORDERID"
        | "INVALID_REQUESTID" => QueryClass::Failed,
        _ => QueryClass::Unknown,
    }
}

fn decimal_from_value(value: Option<&Value>) -> Option<Decimal> {
    match value? {
        Value::String(s) => s.trim().parse().ok(),
        Value::Number(n) => n.to_string().parse().ok(),
        _ => None,
    }
}

#[derive(Debug, Deserialize)]
struct ClubKonnectResponse {
    #[serde(default)]
    orderid: Option<Value>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    amountcharged: Option<Value>,
}

impl ClubKonnectResponse {
    fn order_reference(&self) -> Option<String> {
        match self.orderid.as_ref()? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}
