/// Payment gateway lookup
///
/// Payments are never trusted from the client: the HTTP layer only receives a
/// gateway transaction id and asks the gateway what actually happened.

use crate::{
    config::GatewayConfig,
    error::{AppError, Result},
    membership::types::{PaymentNotification, PaymentStatus},
};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Fetch the payment identified by `transaction_id`
    async fn fetch_payment(&self, transaction_id: &str) -> Result<PaymentNotification>;
}

/// REST client for a Razorpay-style `/payments/{id}` endpoint
#[derive(Debug, Clone)]
pub struct HttpPaymentGateway {
    client: reqwest::Client,
    config: GatewayConfig,
}

/// The fields we read from the gateway's payment entity
#[derive(Debug, Deserialize)]
struct GatewayPayment {
    id: String,
    amount: i64,
    status: String,
}

impl HttpPaymentGateway {
    pub fn new(config: GatewayConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| AppError::Gateway(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    async fn fetch_payment(&self, transaction_id: &str) -> Result<PaymentNotification> {
        if transaction_id.is_empty() || !transaction_id.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(AppError::Validation(format!("invalid transaction id: {}", transaction_id)));
        }

        let url = format!("{}/payments/{}", self.config.base_url.trim_end_matches('/'), transaction_id);
        tracing::debug!("🌐 Fetching payment from gateway: {}", url);

        let response = self
            .client
            .get(&url)
            .basic_auth(&self.config.key_id, Some(&self.config.key_secret))
            .send()
            .await
            .map_err(|e| AppError::Gateway(e.to_string()))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(AppError::NotFound("payment"));
        }
        if !response.status().is_success() {
            return Err(AppError::Gateway(format!(
                "gateway returned {} for payment {}",
                response.status(),
                transaction_id
            )));
        }

        let body: Value = response.json().await.map_err(|e| AppError::Gateway(e.to_string()))?;
        parse_payment(body)
    }
}

/// Turn a gateway payment entity into a notification, keeping the raw body as meta
fn parse_payment(body: Value) -> Result<PaymentNotification> {
    let payment: GatewayPayment = serde_json::from_value(body.clone())
        .map_err(|e| AppError::Gateway(format!("unexpected payment payload: {}", e)))?;

    Ok(PaymentNotification {
        transaction_id: payment.id,
        amount: payment.amount,
        status: payment.status.parse::<PaymentStatus>().map_err(|_| {
            AppError::Gateway(format!("unknown payment status: {}", payment.status))
        })?,
        meta: body,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_gateway_payment_entities() {
        let body = json!({
            "id": "pay_29QQoUBi66xm2f",
            "entity": "payment",
            "amount": 50000,
            "currency": "INR",
            "status": "captured"
        });
        let notification = parse_payment(body.clone()).unwrap();
        assert_eq!(notification.transaction_id, "pay_29QQoUBi66xm2f");
        assert_eq!(notification.amount, 50000);
        assert_eq!(notification.status, PaymentStatus::Captured);
        assert_eq!(notification.meta, body);
    }

    #[test]
    fn unknown_statuses_are_gateway_errors() {
        let body = json!({ "id": "pay_1", "amount": 1, "status": "teleported" });
        assert!(matches!(parse_payment(body), Err(AppError::Gateway(_))));
    }

    #[tokio::test]
    async fn rejects_suspicious_transaction_ids() {
        let gateway = HttpPaymentGateway::new(GatewayConfig {
            base_url: "http://127.0.0.1:9".into(),
            key_id: String::new(),
            key_secret: String::new(),
        })
        .unwrap();
        let result = gateway.fetch_payment("../admin").await;
        assert!(matches!(result, Err(AppError::Validation(_))));
    }
}
