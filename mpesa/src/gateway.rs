//! [`PaymentGateway`] implementation backed by Daraja.

use crate::client::MpesaClient;
use crate::error::MpesaError;
use async_trait::async_trait;
use rsvp_core::{
    CheckoutRequestId, GatewayError, MerchantRequestId, PaymentGateway, PaymentInitiation,
    PaymentRequest, StatusReport,
};

impl From<MpesaError> for GatewayError {
    fn from(error: MpesaError) -> Self {
        match error {
            MpesaError::InvalidPhone(_) | MpesaError::InvalidAmount(_) | MpesaError::Config(_) => {
                Self::Validation(error.to_string())
            }
            MpesaError::Auth(message) => Self::Auth(message),
            MpesaError::Timeout | MpesaError::Network(_) | MpesaError::ResponseParse(_) => {
                Self::Network(error.to_string())
            }
            MpesaError::Rejected { code, description } => Self::Rejected { code, description },
        }
    }
}

#[async_trait]
impl PaymentGateway for MpesaClient {
    async fn initiate_payment(&self, request: &PaymentRequest) -> Result<PaymentInitiation, GatewayError> {
        let push = self
            .initiate_payment_with_desc(
                &request.phone,
                request.amount,
                &request.account_reference,
                &request.description,
            )
            .await?;

        Ok(PaymentInitiation {
            checkout_request_id: CheckoutRequestId::new(push.checkout_request_id),
            merchant_request_id: MerchantRequestId::new(push.merchant_request_id),
            customer_message: push.customer_message,
        })
    }

    async fn query_status(&self, checkout_request_id: &CheckoutRequestId) -> Result<StatusReport, GatewayError> {
        let query = MpesaClient::query_status(self, checkout_request_id.as_str()).await?;

        if query.response_code != "0" {
            return Err(GatewayError::Rejected {
                code: query.response_code,
                description: query.response_description,
            });
        }

        Ok(StatusReport {
            result_code: query.result_code,
            result_desc: query.result_desc,
        })
    }
}
