use axum::{
    extract::{rejection::JsonRejection, Path, State},
    routing::post,
    Extension, Json, Router,
};
use uuid::Uuid;

use crate::controllers::{BookingController, PaymentController};
use crate::dto::api_response::ApiResponse;
use crate::dto::payment_dto::{
    CreatePaymentRequest, PaymentFlowResponse, PaymentResponse, RefundRequest, VerifyPaymentRequest,
};
use crate::models::auth::AuthenticatedUser;
use crate::state::AppState;
use crate::utils::errors::AppError;

/// Rutas de cobro del cliente, montadas en la raíz
pub fn create_checkout_router() -> Router<AppState> {
    Router::new()
        .route("/create-payment", post(create_payment))
        .route("/verify-payment", post(verify_payment))
}

/// Ajustes sobre pagos registrados
pub fn create_payment_router() -> Router<AppState> {
    Router::new().route("/:id/refund", post(refund_payment))
}

async fn create_payment(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    payload: Result<Json<CreatePaymentRequest>, JsonRejection>,
) -> Result<Json<PaymentFlowResponse>, AppError> {
    let Json(request) = payload?;
    let controller = PaymentController::new(&state);
    let response = controller.create_payment(&user, request).await?;
    Ok(Json(response))
}

async fn verify_payment(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    payload: Result<Json<VerifyPaymentRequest>, JsonRejection>,
) -> Result<Json<PaymentFlowResponse>, AppError> {
    let Json(request) = payload?;
    let controller = PaymentController::new(&state);
    let response = controller.verify_payment(&user, request).await?;
    Ok(Json(response))
}

async fn refund_payment(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<Uuid>,
    payload: Result<Json<RefundRequest>, JsonRejection>,
) -> Result<Json<ApiResponse<PaymentResponse>>, AppError> {
    let Json(request) = payload?;
    let controller = BookingController::new(&state);
    let response = controller.refund(&user, id, request).await?;
    Ok(Json(response))
}
