use std::time::Duration;

use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::Deserialize;
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::config::StripeConfig;
use crate::error::{msg, AppError, Result};

type HmacSha256 = Hmac<Sha256>;

/// Outbound calls carry a bounded timeout; the provider's webhook retry
/// policy is the outer retry loop, so a hung request must not pin a worker.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Line item descriptor sent to the provider. `unit_amount` is in the
/// currency's smallest sub-unit.
#[derive(Debug, Clone)]
pub struct ProviderLineItem {
    pub name: String,
    pub unit_amount: i64,
    pub quantity: i64,
    pub image: Option<String>,
}

/// Shipping/contact fields attached as session metadata so the webhook can
/// recover them even when the provider omits customer details.
#[derive(Debug, Clone, Default)]
pub struct CheckoutContact {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateCheckoutSessionResponse {
    pub id: String,
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct StripeClient {
    client: Client,
    secret_key: String,
    webhook_secret: String,
    api_base: String,
}

impl StripeClient {
    pub fn new(config: &StripeConfig) -> Self {
        Self {
            client: Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .expect("failed to build HTTP client"),
            secret_key: config.secret_key.clone(),
            webhook_secret: config.webhook_secret.clone(),
            api_base: "https://api.stripe.com".to_string(),
        }
    }

    /// Point the client at a different API host. Used by tests to target a
    /// mock server.
    pub fn with_api_base(mut self, api_base: &str) -> Self {
        self.api_base = api_base.trim_end_matches('/').to_string();
        self
    }

    async fn send_form(&self, path: &str, form: &[(String, String)]) -> Result<reqwest::Response> {
        let response = self
            .client
            .post(format!("{}{}", self.api_base, path))
            .basic_auth(&self.secret_key, None::<&str>)
            .form(form)
            .send()
            .await
            .map_err(|e| AppError::PaymentProvider(format!("Stripe API error: {}", e)))?;
        Ok(response)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T> {
        let response = self
            .client
            .get(format!("{}{}", self.api_base, path))
            .basic_auth(&self.secret_key, None::<&str>)
            .query(query)
            .send()
            .await
            .map_err(|e| AppError::PaymentProvider(format!("Stripe API error: {}", e)))?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(AppError::PaymentProvider(format!(
                "Stripe API error: {}",
                error_text
            )));
        }

        response
            .json()
            .await
            .map_err(|e| AppError::PaymentProvider(format!("Failed to parse Stripe response: {}", e)))
    }

    /// Create a hosted checkout session with ad-hoc price data built from the
    /// cart. The order id rides along twice - as `client_reference_id` and as
    /// metadata on both the session and its payment intent - because some
    /// event types drop one channel.
    pub async fn create_checkout_session(
        &self,
        order_id: &str,
        currency: &str,
        line_items: &[ProviderLineItem],
        contact: &CheckoutContact,
        success_url: &str,
        cancel_url: &str,
    ) -> Result<CreateCheckoutSessionResponse> {
        let mut form: Vec<(String, String)> = vec![
            ("mode".into(), "payment".into()),
            ("payment_method_types[0]".into(), "card".into()),
            ("success_url".into(), success_url.into()),
            ("cancel_url".into(), cancel_url.into()),
            ("client_reference_id".into(), order_id.into()),
            ("payment_intent_data[metadata][order_id]".into(), order_id.into()),
            ("metadata[order_id]".into(), order_id.into()),
            (
                "metadata[customer_name]".into(),
                contact.name.clone().unwrap_or_default(),
            ),
            (
                "metadata[email]".into(),
                contact.email.clone().unwrap_or_default(),
            ),
            (
                "metadata[phone]".into(),
                contact.phone.clone().unwrap_or_default(),
            ),
            (
                "metadata[address]".into(),
                contact.address.clone().unwrap_or_default(),
            ),
        ];

        for (i, item) in line_items.iter().enumerate() {
            form.push((
                format!("line_items[{}][price_data][currency]", i),
                currency.to_lowercase(),
            ));
            form.push((
                format!("line_items[{}][price_data][product_data][name]", i),
                item.name.clone(),
            ));
            if let Some(ref image) = item.image {
                form.push((
                    format!("line_items[{}][price_data][product_data][images][0]", i),
                    image.clone(),
                ));
            }
            form.push((
                format!("line_items[{}][price_data][unit_amount]", i),
                item.unit_amount.to_string(),
            ));
            form.push((format!("line_items[{}][quantity]", i), item.quantity.to_string()));
        }

        let response = self.send_form("/v1/checkout/sessions", &form).await?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(AppError::PaymentProvider(format!(
                "Stripe API error: {}",
                error_text
            )));
        }

        response
            .json()
            .await
            .map_err(|e| AppError::PaymentProvider(format!("Failed to parse Stripe response: {}", e)))
    }

    /// Re-retrieve the full checkout session by id. Webhook payloads can be
    /// abbreviated; this is the authoritative copy, with the payment intent
    /// expanded inline.
    pub async fn retrieve_checkout_session(&self, session_id: &str) -> Result<StripeCheckoutSession> {
        self.get_json(
            &format!("/v1/checkout/sessions/{}", session_id),
            &[("expand[]", "payment_intent")],
        )
        .await
    }

    /// Fetch the finalized line items for a checkout session.
    pub async fn list_line_items(&self, session_id: &str) -> Result<Vec<StripeLineItem>> {
        let list: StripeList<StripeLineItem> = self
            .get_json(
                &format!("/v1/checkout/sessions/{}/line_items", session_id),
                &[],
            )
            .await?;
        Ok(list.data)
    }

    /// Fetch the customer-facing receipt link from the payment's latest
    /// charge. Callers treat failure as non-fatal enrichment.
    pub async fn fetch_receipt_url(&self, payment_intent_id: &str) -> Result<Option<String>> {
        let intent: StripePaymentIntent = self
            .get_json(
                &format!("/v1/payment_intents/{}", payment_intent_id),
                &[("expand[]", "latest_charge")],
            )
            .await?;
        Ok(intent.receipt_url())
    }

    /// Maximum age of a webhook timestamp before it's rejected (in seconds).
    /// Stripe recommends 300 seconds (5 minutes).
    const WEBHOOK_TIMESTAMP_TOLERANCE_SECS: i64 = 300;

    /// Verify a `stripe-signature` header against the raw request body.
    ///
    /// The MAC is computed over the exact bytes received - re-serializing the
    /// payload would silently break verification for reformatted bodies.
    pub fn verify_webhook_signature(&self, payload: &[u8], signature: &str) -> Result<bool> {
        // Stripe signature format: t=timestamp,v1=signature
        let mut timestamp = None;
        let mut sig_v1 = None;

        for part in signature.split(',') {
            if let Some(t) = part.strip_prefix("t=") {
                timestamp = Some(t);
            } else if let Some(s) = part.strip_prefix("v1=") {
                sig_v1 = Some(s);
            }
        }

        let timestamp_str =
            timestamp.ok_or_else(|| AppError::BadRequest(msg::INVALID_SIGNATURE_FORMAT.into()))?;
        let sig_v1 =
            sig_v1.ok_or_else(|| AppError::BadRequest(msg::INVALID_SIGNATURE_FORMAT.into()))?;

        // Reject stale timestamps to limit replay windows.
        let timestamp: i64 = timestamp_str
            .parse()
            .map_err(|_| AppError::BadRequest(msg::INVALID_TIMESTAMP_IN_SIGNATURE.into()))?;

        let now = chrono::Utc::now().timestamp();
        let age = now - timestamp;

        if age > Self::WEBHOOK_TIMESTAMP_TOLERANCE_SECS {
            tracing::warn!(
                "Stripe webhook rejected: timestamp too old (age={}s, max={}s)",
                age,
                Self::WEBHOOK_TIMESTAMP_TOLERANCE_SECS
            );
            return Ok(false);
        }

        // Clock skew tolerance for timestamps from the future: 60 seconds
        if age < -60 {
            tracing::warn!(
                "Stripe webhook rejected: timestamp in the future (age={}s)",
                age
            );
            return Ok(false);
        }

        let mut mac = HmacSha256::new_from_slice(self.webhook_secret.as_bytes())
            .map_err(|_| AppError::Internal(msg::INVALID_WEBHOOK_SECRET.into()))?;
        mac.update(timestamp_str.as_bytes());
        mac.update(b".");
        mac.update(payload);
        let expected = hex::encode(mac.finalize().into_bytes());

        // Constant-time comparison to prevent timing attacks. The length
        // check is not constant-time, but signature length is not secret
        // (always 64 hex chars for SHA-256).
        let expected_bytes = expected.as_bytes();
        let provided_bytes = sig_v1.as_bytes();
        if expected_bytes.len() != provided_bytes.len() {
            return Ok(false);
        }

        Ok(expected_bytes.ct_eq(provided_bytes).into())
    }
}

/// Generic Stripe webhook event - object is parsed based on event_type
#[derive(Debug, Deserialize)]
pub struct StripeWebhookEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: StripeEventData,
}

#[derive(Debug, Deserialize)]
pub struct StripeEventData {
    pub object: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct StripeList<T> {
    data: Vec<T>,
}

// ============ checkout.session.completed ============

#[derive(Debug, Deserialize)]
pub struct StripeCheckoutSession {
    pub id: String,
    pub client_reference_id: Option<String>,
    /// Final charged total in sub-units, after provider-side discounts.
    pub amount_total: Option<i64>,
    /// String id, or the expanded object when retrieved with `expand`.
    #[serde(default)]
    pub payment_intent: Option<serde_json::Value>,
    #[serde(default)]
    pub customer_details: Option<StripeCustomerDetails>,
    #[serde(default)]
    pub metadata: Option<StripeSessionMetadata>,
}

impl StripeCheckoutSession {
    pub fn payment_intent_id(&self) -> Option<String> {
        match self.payment_intent.as_ref()? {
            serde_json::Value::String(id) => Some(id.clone()),
            serde_json::Value::Object(obj) => {
                obj.get("id").and_then(|v| v.as_str()).map(String::from)
            }
            _ => None,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct StripeSessionMetadata {
    pub order_id: Option<String>,
    pub customer_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StripeCustomerDetails {
    pub name: Option<String>,
    pub email: Option<String>,
}

// ============ line items ============

#[derive(Debug, Deserialize)]
pub struct StripeLineItem {
    pub description: Option<String>,
    pub quantity: Option<i64>,
    /// Line total in sub-units.
    pub amount_total: Option<i64>,
    pub price: Option<StripePrice>,
}

#[derive(Debug, Deserialize)]
pub struct StripePrice {
    pub unit_amount: Option<i64>,
}

// ============ payment_intent.succeeded ============

#[derive(Debug, Deserialize)]
pub struct StripePaymentIntent {
    pub id: String,
    #[serde(default)]
    pub metadata: Option<StripeIntentMetadata>,
    /// String id, or the expanded charge object.
    #[serde(default)]
    pub latest_charge: Option<serde_json::Value>,
}

impl StripePaymentIntent {
    pub fn order_id(&self) -> Option<String> {
        self.metadata.as_ref()?.order_id.clone()
    }

    pub fn receipt_url(&self) -> Option<String> {
        match self.latest_charge.as_ref()? {
            serde_json::Value::Object(obj) => obj
                .get("receipt_url")
                .and_then(|v| v.as_str())
                .map(String::from),
            _ => None,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct StripeIntentMetadata {
    pub order_id: Option<String>,
}
