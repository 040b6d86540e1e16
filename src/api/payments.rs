use crate::database::payment_repository::Payment;
use crate::middleware::error::{app_error_response, get_request_id_from_headers, ErrorResponse};
use crate::payments::types::{PaymentDetails, PaymentMode, PaymentReason};
use crate::services::payments::{CreatePaymentInput, PaymentService};
use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;

#[derive(Clone)]
pub struct PaymentsState {
    pub service: Arc<PaymentService>,
}

#[derive(Debug, Deserialize)]
pub struct CreatePaymentApiRequest {
    pub reason: String,
    pub mode: String,
    pub amount: String,
    pub item_code: String,
    pub user_code: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub card_token: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PaymentView {
    pub id: i64,
    pub reason: PaymentReason,
    pub kind: crate::payments::types::PaymentKind,
    pub mode: PaymentMode,
    pub status: crate::payments::types::PaymentStatus,
    pub amount: String,
    pub item_code: String,
    pub user_code: String,
    pub issued_at: chrono::DateTime<chrono::Utc>,
    pub processing_at: Option<chrono::DateTime<chrono::Utc>>,
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkout_url: Option<String>,
}

impl PaymentView {
    fn from_payment(payment: &Payment, checkout_url: Option<String>) -> Self {
        let checkout_url = checkout_url.or_else(|| match payment.typed_details() {
            Ok(PaymentDetails::External { checkout_url }) => checkout_url,
            _ => None,
        });
        Self {
            id: payment.id,
            reason: payment.reason,
            kind: payment.kind,
            mode: payment.mode,
            status: payment.status,
            amount: payment.amount.to_string(),
            item_code: payment.item_code.clone(),
            user_code: payment.user_code.clone(),
            issued_at: payment.issued_at,
            processing_at: payment.processing_at,
            completed_at: payment.completed_at,
            checkout_url,
        }
    }
}

type ApiError = (StatusCode, Json<ErrorResponse>);

pub async fn create_payment(
    State(state): State<PaymentsState>,
    headers: HeaderMap,
    Json(payload): Json<CreatePaymentApiRequest>,
) -> Result<Json<PaymentView>, ApiError> {
    let request_id = get_request_id_from_headers(&headers);

    let reason = PaymentReason::from_str(&payload.reason)
        .map_err(|e| app_error_response(e.into(), request_id.clone()))?;
    let mode = PaymentMode::from_str(&payload.mode)
        .map_err(|e| app_error_response(e.into(), request_id.clone()))?;
    let amount = BigDecimal::from_str(payload.amount.trim()).map_err(|_| {
        app_error_response(
            crate::payments::error::PaymentError::Validation {
                message: format!("invalid decimal amount: {}", payload.amount),
                field: Some("amount".to_string()),
            }
            .into(),
            request_id.clone(),
        )
    })?;

    let payment = state
        .service
        .create_payment(CreatePaymentInput {
            reason,
            mode,
            amount,
            item_code: payload.item_code,
            user_code: payload.user_code,
            email: payload.email,
            phone: payload.phone,
            card_token: payload.card_token,
        })
        .await
        .map_err(|e| app_error_response(e, request_id))?;

    Ok(Json(PaymentView::from_payment(&payment, None)))
}

pub async fn initiate_payment(
    State(state): State<PaymentsState>,
    Path(id): Path<i64>,
    headers: HeaderMap,
) -> Result<Json<PaymentView>, ApiError> {
    let request_id = get_request_id_from_headers(&headers);

    let initiated = state
        .service
        .initiate_payment(id)
        .await
        .map_err(|e| app_error_response(e, request_id))?;

    Ok(Json(PaymentView::from_payment(
        &initiated.payment,
        initiated.checkout_url,
    )))
}

pub async fn get_payment(
    State(state): State<PaymentsState>,
    Path(id): Path<i64>,
    headers: HeaderMap,
) -> Result<Json<PaymentView>, ApiError> {
    let request_id = get_request_id_from_headers(&headers);

    let payment = state
        .service
        .get_payment(id)
        .await
        .map_err(|e| app_error_response(e, request_id))?;

    Ok(Json(PaymentView::from_payment(&payment, None)))
}
