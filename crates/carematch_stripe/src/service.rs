// --- File: crates/carematch_stripe/src/service.rs ---
//! Stripe implementation of [`PaymentService`]: manual-capture payment intents with a
//! destination transfer to the therapist's connected account.

use carematch_common::services::{
    BoxFuture, HeldChargeRequest, PaymentIntentResult, PaymentService,
};
use carematch_common::HTTP_CLIENT;
use carematch_config::StripeConfig;
use reqwest::{RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::error::StripeError;

/// Payment intent fields we read back from the API.
#[derive(Deserialize, Debug)]
struct StripePaymentIntentResponse {
    id: String,
    status: String,
    amount: i64,
    currency: String,
    client_secret: Option<String>,
}

/// Customer fields we read back from the API.
#[derive(Deserialize, Debug)]
struct StripeCustomerResponse {
    id: String,
    #[serde(default)]
    invoice_settings: Option<StripeInvoiceSettings>,
}

#[derive(Deserialize, Debug)]
struct StripeInvoiceSettings {
    default_payment_method: Option<String>,
}

impl From<StripePaymentIntentResponse> for PaymentIntentResult {
    fn from(pi: StripePaymentIntentResponse) -> Self {
        PaymentIntentResult {
            id: pi.id,
            status: pi.status,
            amount: pi.amount,
            currency: pi.currency,
            client_secret: pi.client_secret,
        }
    }
}

/// Form body for a held charge. Amounts go out in the smallest currency unit. The intent
/// is confirmed off-session in the same call so it lands in `requires_capture`.
pub(crate) fn held_charge_form(request: &HeldChargeRequest) -> Vec<(String, String)> {
    let mut form_body: Vec<(String, String)> = vec![
        ("amount".to_string(), request.amount_cents.to_string()),
        ("currency".to_string(), request.currency.to_lowercase()),
        ("customer".to_string(), request.payer_reference.clone()),
        ("payment_method".to_string(), request.payment_method.clone()),
        ("confirm".to_string(), "true".to_string()),
        ("off_session".to_string(), "true".to_string()),
        ("capture_method".to_string(), "manual".to_string()),
        (
            "application_fee_amount".to_string(),
            request.platform_fee_cents.to_string(),
        ),
        (
            "transfer_data[destination]".to_string(),
            request.payee_account.clone(),
        ),
        ("metadata[booking_id]".to_string(), request.booking_id.clone()),
    ];
    if let Some(description) = &request.description {
        form_body.push(("description".to_string(), description.clone()));
    }
    form_body
}

/// Pulls `error.message` and `error.code` out of a Stripe error body, falling back to the
/// raw text.
fn parse_api_error(status: StatusCode, body_text: String) -> StripeError {
    let (message, code) = match serde_json::from_str::<serde_json::Value>(&body_text) {
        Ok(json_body) => {
            let error = json_body.get("error");
            let message = error
                .and_then(|e| e.get("message"))
                .and_then(|m| m.as_str())
                .map(String::from)
                .unwrap_or_else(|| body_text.clone());
            let code = error
                .and_then(|e| e.get("code"))
                .and_then(|c| c.as_str())
                .map(String::from);
            (message, code)
        }
        Err(_) => (body_text, None),
    };
    StripeError::ApiError {
        status_code: status.as_u16(),
        message,
        code,
    }
}

/// Stripe payment service implementation
#[derive(Clone)]
pub struct StripePaymentService {
    api_base: String,
    secret_key: String,
}

impl std::fmt::Debug for StripePaymentService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StripePaymentService")
            .field("api_base", &self.api_base)
            .finish_non_exhaustive()
    }
}

impl StripePaymentService {
    pub fn new(api_base: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            api_base: api_base.into().trim_end_matches('/').to_string(),
            secret_key: secret_key.into(),
        }
    }

    pub fn from_config(config: &StripeConfig) -> Result<Self, StripeError> {
        if config.secret_key.is_empty() {
            return Err(StripeError::ConfigError);
        }
        Ok(Self::new(config.api_base(), config.secret_key.clone()))
    }

    async fn send(&self, request: RequestBuilder) -> Result<PaymentIntentResult, StripeError> {
        let intent: StripePaymentIntentResponse = self.send_json(request).await?;
        Ok(intent.into())
    }

    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, StripeError> {
        let response = request
            .basic_auth(&self.secret_key, None::<&str>)
            .send()
            .await?;

        let status = response.status();
        let body_text = response.text().await?;
        debug!("[Stripe] API response status: {}", status);

        if status.is_success() {
            Ok(serde_json::from_str(&body_text)?)
        } else {
            let err = parse_api_error(status, body_text);
            warn!("[Stripe] API request failed: {}", err);
            Err(err)
        }
    }

    fn intent_url(&self, payment_intent_id: &str, action: Option<&str>) -> String {
        match action {
            Some(action) => format!(
                "{}/payment_intents/{}/{}",
                self.api_base, payment_intent_id, action
            ),
            None => format!("{}/payment_intents/{}", self.api_base, payment_intent_id),
        }
    }
}

impl PaymentService for StripePaymentService {
    type Error = StripeError;

    fn default_payment_method(
        &self,
        payer_reference: &str,
    ) -> BoxFuture<'_, Option<String>, Self::Error> {
        let url = format!("{}/customers/{}", self.api_base, payer_reference);
        Box::pin(async move {
            let customer: StripeCustomerResponse = self.send_json(HTTP_CLIENT.get(url)).await?;
            let payment_method = customer
                .invoice_settings
                .and_then(|settings| settings.default_payment_method);
            debug!(
                customer = %customer.id,
                has_payment_method = payment_method.is_some(),
                "[Stripe] Looked up default payment method"
            );
            Ok(payment_method)
        })
    }

    fn create_held_charge(
        &self,
        request: HeldChargeRequest,
    ) -> BoxFuture<'_, PaymentIntentResult, Self::Error> {
        Box::pin(async move {
            info!(
                booking_id = %request.booking_id,
                amount = request.amount_cents,
                fee = request.platform_fee_cents,
                "[Stripe] Creating held charge"
            );
            let form_body = held_charge_form(&request);
            let builder = HTTP_CLIENT
                .post(format!("{}/payment_intents", self.api_base))
                .header("Idempotency-Key", &request.idempotency_key)
                .form(&form_body);
            self.send(builder).await
        })
    }

    fn retrieve_payment_intent(
        &self,
        payment_intent_id: &str,
    ) -> BoxFuture<'_, PaymentIntentResult, Self::Error> {
        let url = self.intent_url(payment_intent_id, None);
        Box::pin(async move { self.send(HTTP_CLIENT.get(url)).await })
    }

    fn capture_payment_intent(
        &self,
        payment_intent_id: &str,
    ) -> BoxFuture<'_, PaymentIntentResult, Self::Error> {
        let url = self.intent_url(payment_intent_id, Some("capture"));
        let idempotency_key = format!("capture-{}", payment_intent_id);
        Box::pin(async move {
            info!(url = %url, "[Stripe] Capturing payment intent");
            self.send(HTTP_CLIENT.post(url).header("Idempotency-Key", idempotency_key))
                .await
        })
    }

    fn cancel_payment_intent(
        &self,
        payment_intent_id: &str,
    ) -> BoxFuture<'_, PaymentIntentResult, Self::Error> {
        let url = self.intent_url(payment_intent_id, Some("cancel"));
        let idempotency_key = format!("cancel-{}", payment_intent_id);
        Box::pin(async move {
            info!(url = %url, "[Stripe] Cancelling payment intent");
            self.send(HTTP_CLIENT.post(url).header("Idempotency-Key", idempotency_key))
                .await
        })
    }
}

#[cfg(any(test, feature = "test-util"))]
pub mod mock {
    use super::*;
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;

    /// Which mock operation an injected failure applies to.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum MockPaymentOp {
        Create,
        Retrieve,
        Capture,
        Cancel,
    }

    /// Statuses from which Stripe lets an intent be cancelled.
    const CANCELABLE_STATUSES: &[&str] = &[
        "requires_payment_method",
        "requires_confirmation",
        "requires_action",
        "requires_capture",
        "processing",
    ];

    #[derive(Default)]
    struct MockPaymentState {
        intents: HashMap<String, PaymentIntentResult>,
        by_idempotency_key: HashMap<String, String>,
        requests: Vec<HeldChargeRequest>,
        failures: VecDeque<(MockPaymentOp, u16, String)>,
        customers_without_payment_method: Vec<String>,
        next_create_status: Option<String>,
        create_calls: usize,
        capture_calls: usize,
        cancel_calls: usize,
        next_id: usize,
    }

    /// In-memory payment processor that follows Stripe's manual-capture state rules. Every
    /// payer has a default payment method `pm_<payer>` unless it was removed.
    #[derive(Default)]
    pub struct MockPaymentService {
        state: Mutex<MockPaymentState>,
    }

    impl MockPaymentService {
        pub fn new() -> Self {
            Self::default()
        }

        /// The next call of `op` fails with an API error carrying `status`.
        pub fn fail_next(&self, op: MockPaymentOp, status: u16, message: &str) {
            self.lock()
                .failures
                .push_back((op, status, message.to_string()));
        }

        /// The payer has no saved payment method from now on.
        pub fn remove_payment_method(&self, payer_reference: &str) {
            self.lock()
                .customers_without_payment_method
                .push(payer_reference.to_string());
        }

        /// The next confirmed charge ends in `status` instead of `requires_capture`,
        /// e.g. `requires_action` when the card asks for authentication.
        pub fn next_create_status(&self, status: &str) {
            self.lock().next_create_status = Some(status.to_string());
        }

        /// Moves an intent to `status` behind the orchestrator's back.
        pub fn set_status(&self, payment_intent_id: &str, status: &str) {
            if let Some(intent) = self.lock().intents.get_mut(payment_intent_id) {
                intent.status = status.to_string();
            }
        }

        pub fn intent(&self, payment_intent_id: &str) -> Option<PaymentIntentResult> {
            self.lock().intents.get(payment_intent_id).cloned()
        }

        pub fn requests(&self) -> Vec<HeldChargeRequest> {
            self.lock().requests.clone()
        }

        pub fn create_calls(&self) -> usize {
            self.lock().create_calls
        }

        pub fn capture_calls(&self) -> usize {
            self.lock().capture_calls
        }

        pub fn cancel_calls(&self) -> usize {
            self.lock().cancel_calls
        }

        fn lock(&self) -> std::sync::MutexGuard<'_, MockPaymentState> {
            self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
        }

        fn take_failure(&self, op: MockPaymentOp) -> Result<(), StripeError> {
            let mut state = self.lock();
            match state.failures.iter().position(|(o, _, _)| *o == op) {
                Some(idx) => match state.failures.remove(idx) {
                    Some((_, status_code, message)) => Err(StripeError::ApiError {
                        status_code,
                        message,
                        code: None,
                    }),
                    None => Ok(()),
                },
                None => Ok(()),
            }
        }

        fn transition(
            &self,
            payment_intent_id: &str,
            target: &str,
            allowed_from: &[&str],
        ) -> Result<PaymentIntentResult, StripeError> {
            let mut state = self.lock();
            let intent = state.intents.get_mut(payment_intent_id).ok_or_else(|| {
                StripeError::ApiError {
                    status_code: 404,
                    message: format!("No such payment_intent: '{}'", payment_intent_id),
                    code: Some("resource_missing".to_string()),
                }
            })?;
            if !allowed_from.contains(&intent.status.as_str()) {
                return Err(StripeError::ApiError {
                    status_code: 400,
                    message: format!(
                        "This PaymentIntent could not be moved to {} because it has a status of {}.",
                        target, intent.status
                    ),
                    code: Some("payment_intent_unexpected_state".to_string()),
                });
            }
            intent.status = target.to_string();
            Ok(intent.clone())
        }
    }

    impl PaymentService for MockPaymentService {
        type Error = StripeError;

        fn default_payment_method(
            &self,
            payer_reference: &str,
        ) -> BoxFuture<'_, Option<String>, Self::Error> {
            let removed = self
                .lock()
                .customers_without_payment_method
                .iter()
                .any(|c| c == payer_reference);
            let payment_method = (!removed).then(|| format!("pm_{}", payer_reference));
            Box::pin(async move { Ok(payment_method) })
        }

        fn create_held_charge(
            &self,
            request: HeldChargeRequest,
        ) -> BoxFuture<'_, PaymentIntentResult, Self::Error> {
            let result = self.take_failure(MockPaymentOp::Create).map(|_| {
                let mut state = self.lock();
                state.create_calls += 1;
                if let Some(existing) = state
                    .by_idempotency_key
                    .get(&request.idempotency_key)
                    .and_then(|id| state.intents.get(id))
                {
                    return existing.clone();
                }
                state.next_id += 1;
                let id = format!("pi_mock_{}", state.next_id);
                let status = if request.payment_method.is_empty() {
                    "requires_payment_method".to_string()
                } else {
                    state
                        .next_create_status
                        .take()
                        .unwrap_or_else(|| "requires_capture".to_string())
                };
                let intent = PaymentIntentResult {
                    id: id.clone(),
                    status,
                    amount: request.amount_cents,
                    currency: request.currency.clone(),
                    client_secret: Some(format!("{}_secret", id)),
                };
                state
                    .by_idempotency_key
                    .insert(request.idempotency_key.clone(), id.clone());
                state.intents.insert(id, intent.clone());
                state.requests.push(request);
                intent
            });
            Box::pin(async move { result })
        }

        fn retrieve_payment_intent(
            &self,
            payment_intent_id: &str,
        ) -> BoxFuture<'_, PaymentIntentResult, Self::Error> {
            let result = self.take_failure(MockPaymentOp::Retrieve).and_then(|_| {
                self.intent(payment_intent_id)
                    .ok_or_else(|| StripeError::ApiError {
                        status_code: 404,
                        message: format!("No such payment_intent: '{}'", payment_intent_id),
                        code: Some("resource_missing".to_string()),
                    })
            });
            Box::pin(async move { result })
        }

        fn capture_payment_intent(
            &self,
            payment_intent_id: &str,
        ) -> BoxFuture<'_, PaymentIntentResult, Self::Error> {
            self.lock().capture_calls += 1;
            let result = self
                .take_failure(MockPaymentOp::Capture)
                .and_then(|_| {
                    self.transition(payment_intent_id, "succeeded", &["requires_capture"])
                });
            Box::pin(async move { result })
        }

        fn cancel_payment_intent(
            &self,
            payment_intent_id: &str,
        ) -> BoxFuture<'_, PaymentIntentResult, Self::Error> {
            self.lock().cancel_calls += 1;
            let result = self
                .take_failure(MockPaymentOp::Cancel)
                .and_then(|_| {
                    self.transition(payment_intent_id, "canceled", CANCELABLE_STATUSES)
                });
            Box::pin(async move { result })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> HeldChargeRequest {
        HeldChargeRequest {
            amount_cents: 10000,
            currency: "USD".to_string(),
            payer_reference: "cus_1".to_string(),
            payment_method: "pm_card_1".to_string(),
            payee_account: "acct_1".to_string(),
            platform_fee_cents: 1500,
            booking_id: "b-1".to_string(),
            idempotency_key: "booking-b-1".to_string(),
            description: Some("Therapy session".to_string()),
        }
    }

    #[test]
    fn test_held_charge_form_uses_manual_capture_and_destination() {
        let form = held_charge_form(&request());
        let get = |key: &str| {
            form.iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.as_str())
        };
        assert_eq!(get("amount"), Some("10000"));
        assert_eq!(get("currency"), Some("usd"));
        assert_eq!(get("capture_method"), Some("manual"));
        assert_eq!(get("customer"), Some("cus_1"));
        assert_eq!(get("payment_method"), Some("pm_card_1"));
        assert_eq!(get("confirm"), Some("true"));
        assert_eq!(get("off_session"), Some("true"));
        assert_eq!(get("application_fee_amount"), Some("1500"));
        assert_eq!(get("transfer_data[destination]"), Some("acct_1"));
        assert_eq!(get("metadata[booking_id]"), Some("b-1"));
    }

    #[test]
    fn test_api_error_body_is_parsed() {
        let body = r#"{"error":{"message":"Your card was declined.","code":"card_declined"}}"#;
        match parse_api_error(StatusCode::PAYMENT_REQUIRED, body.to_string()) {
            StripeError::ApiError {
                status_code,
                message,
                code,
            } => {
                assert_eq!(status_code, 402);
                assert_eq!(message, "Your card was declined.");
                assert_eq!(code.as_deref(), Some("card_declined"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
        match parse_api_error(StatusCode::BAD_GATEWAY, "upstream".to_string()) {
            StripeError::ApiError { message, .. } => assert_eq!(message, "upstream"),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_missing_secret_is_config_error() {
        let config = StripeConfig {
            secret_key: String::new(),
            webhook_secret: None,
            currency: None,
            platform_fee_percent: None,
            api_base: None,
        };
        assert!(matches!(
            StripePaymentService::from_config(&config),
            Err(StripeError::ConfigError)
        ));
    }

    #[tokio::test]
    async fn test_mock_replays_idempotency_key_and_rejects_double_capture() {
        let payments = mock::MockPaymentService::new();
        let first = payments.create_held_charge(request()).await.unwrap();
        let replay = payments.create_held_charge(request()).await.unwrap();
        assert_eq!(first.id, replay.id);
        assert_eq!(payments.requests().len(), 1);

        assert!(first.is_held());

        let captured = payments.capture_payment_intent(&first.id).await.unwrap();
        assert!(captured.is_captured());
        let err = payments.capture_payment_intent(&first.id).await.unwrap_err();
        assert!(matches!(err, StripeError::ApiError { status_code: 400, .. }));
    }

    #[tokio::test]
    async fn test_mock_charge_without_payment_method_is_not_held() {
        let payments = mock::MockPaymentService::new();
        assert_eq!(
            payments.default_payment_method("cus_1").await.unwrap().as_deref(),
            Some("pm_cus_1")
        );
        payments.remove_payment_method("cus_1");
        assert_eq!(payments.default_payment_method("cus_1").await.unwrap(), None);

        let mut unconfirmed = request();
        unconfirmed.payment_method = String::new();
        let intent = payments.create_held_charge(unconfirmed).await.unwrap();
        assert_eq!(intent.status, "requires_payment_method");
        assert!(!intent.is_held());
        assert!(payments.capture_payment_intent(&intent.id).await.is_err());
        assert!(payments.cancel_payment_intent(&intent.id).await.unwrap().is_canceled());
    }

    #[test]
    fn test_customer_default_payment_method_is_read() {
        let body = r#"{"id":"cus_1","object":"customer","invoice_settings":{"default_payment_method":"pm_1","footer":null}}"#;
        let customer: StripeCustomerResponse = serde_json::from_str(body).unwrap();
        assert_eq!(
            customer.invoice_settings.and_then(|s| s.default_payment_method).as_deref(),
            Some("pm_1")
        );
        let bare: StripeCustomerResponse = serde_json::from_str(r#"{"id":"cus_2"}"#).unwrap();
        assert!(bare.invoice_settings.is_none());
    }
}
