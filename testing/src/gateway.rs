//! Scripted payment gateway.

use async_trait::async_trait;
use rsvp_core::{
    CheckoutRequestId, GatewayError, MerchantRequestId, PaymentGateway, PaymentInitiation,
    PaymentRequest, StatusReport,
};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

type Scripted<T> = Result<T, GatewayError>;

/// Payment gateway with programmable responses.
///
/// Unscripted initiations succeed with ids `ws_CO_1`, `ws_CO_2`, …; unscripted
/// status queries answer as the provider does for a push still awaiting the
/// payer's PIN.
#[derive(Debug, Clone, Default)]
pub struct ScriptedGateway {
    initiations: Arc<Mutex<VecDeque<Scripted<PaymentInitiation>>>>,
    statuses: Arc<Mutex<HashMap<CheckoutRequestId, VecDeque<Scripted<StatusReport>>>>>,
    requests: Arc<Mutex<Vec<PaymentRequest>>>,
    queries: Arc<Mutex<Vec<CheckoutRequestId>>>,
    counter: Arc<AtomicU64>,
    latency: Option<Duration>,
}

impl ScriptedGateway {
    /// Gateway that accepts every push
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every call, to widen race windows in concurrency tests
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Fail the next initiation with `error`
    pub fn fail_next_initiation(&self, error: GatewayError) {
        if let Ok(mut queue) = self.initiations.lock() {
            queue.push_back(Err(error));
        }
    }

    /// Answer the next status query for `checkout_request_id`
    pub fn push_status(&self, checkout_request_id: &CheckoutRequestId, report: Scripted<StatusReport>) {
        if let Ok(mut statuses) = self.statuses.lock() {
            statuses
                .entry(checkout_request_id.clone())
                .or_default()
                .push_back(report);
        }
    }

    /// Every initiation request received, in order
    #[must_use]
    pub fn requests(&self) -> Vec<PaymentRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    /// Every queried checkout id, in order
    #[must_use]
    pub fn queries(&self) -> Vec<CheckoutRequestId> {
        self.queries.lock().map(|q| q.clone()).unwrap_or_default()
    }

    /// Response for a push still awaiting the payer
    #[must_use]
    pub fn still_processing() -> GatewayError {
        GatewayError::Rejected {
            code: "500.001.1001".to_string(),
            description: "The transaction is being processed".to_string(),
        }
    }

    fn lock_error() -> GatewayError {
        GatewayError::Network("scripted gateway lock poisoned".to_string())
    }

    async fn simulate_latency(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl PaymentGateway for ScriptedGateway {
    async fn initiate_payment(&self, request: &PaymentRequest) -> Result<PaymentInitiation, GatewayError> {
        self.requests
            .lock()
            .map_err(|_| Self::lock_error())?
            .push(request.clone());

        self.simulate_latency().await;

        let scripted = self.initiations.lock().map_err(|_| Self::lock_error())?.pop_front();
        if let Some(response) = scripted {
            return response;
        }

        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(PaymentInitiation {
            checkout_request_id: CheckoutRequestId::new(format!("ws_CO_{n}")),
            merchant_request_id: MerchantRequestId::new(format!("mr_{n}")),
            customer_message: Some("Success. Request accepted for processing".to_string()),
        })
    }

    async fn query_status(&self, checkout_request_id: &CheckoutRequestId) -> Result<StatusReport, GatewayError> {
        self.queries
            .lock()
            .map_err(|_| Self::lock_error())?
            .push(checkout_request_id.clone());

        self.simulate_latency().await;

        self.statuses
            .lock()
            .map_err(|_| Self::lock_error())?
            .get_mut(checkout_request_id)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| Err(Self::still_processing()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn request() -> PaymentRequest {
        PaymentRequest {
            phone: "254712345678".to_string(),
            amount: 500,
            account_reference: "Event-1".to_string(),
            description: "Event Payment".to_string(),
        }
    }

    #[tokio::test]
    async fn test_unscripted_initiations_get_sequential_ids() {
        let gateway = ScriptedGateway::new();
        let first = gateway.initiate_payment(&request()).await.unwrap();
        let second = gateway.initiate_payment(&request()).await.unwrap();
        assert_eq!(first.checkout_request_id.as_str(), "ws_CO_1");
        assert_eq!(second.checkout_request_id.as_str(), "ws_CO_2");
        assert_eq!(gateway.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_scripted_failure_then_default() {
        let gateway = ScriptedGateway::new();
        gateway.fail_next_initiation(GatewayError::Network("timeout".into()));
        assert!(gateway.initiate_payment(&request()).await.is_err());
        assert!(gateway.initiate_payment(&request()).await.is_ok());
    }

    #[tokio::test]
    async fn test_status_queue() {
        let gateway = ScriptedGateway::new();
        let id = CheckoutRequestId::new("ws_CO_9");
        gateway.push_status(
            &id,
            Ok(StatusReport {
                result_code: "0".into(),
                result_desc: "paid".into(),
            }),
        );

        assert_eq!(gateway.query_status(&id).await.unwrap().result_code, "0");
        assert_eq!(
            gateway.query_status(&id).await.unwrap_err(),
            ScriptedGateway::still_processing()
        );
        assert_eq!(gateway.queries().len(), 2);
    }
}
