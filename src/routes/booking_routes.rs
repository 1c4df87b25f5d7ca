use axum::{
    extract::{rejection::JsonRejection, Path, State},
    routing::{get, post},
    Extension, Json, Router,
};
use uuid::Uuid;

use crate::controllers::BookingController;
use crate::dto::api_response::ApiResponse;
use crate::dto::booking_dto::{
    ApproveBookingRequest, BookingResponse, CancelBookingRequest, CreateBookingRequest,
    RejectBookingRequest,
};
use crate::dto::payment_dto::{ManualPaymentRequest, PaymentResponse};
use crate::models::auth::AuthenticatedUser;
use crate::state::AppState;
use crate::utils::errors::AppError;

pub fn create_booking_router() -> Router<AppState> {
    Router::new()
        .route("/", post(create_booking))
        .route("/:id", get(get_booking))
        .route("/:id/approve", post(approve_booking))
        .route("/:id/reject", post(reject_booking))
        .route("/:id/cancel", post(cancel_booking))
        .route("/:id/payments", get(list_payments))
        .route("/:id/payments/manual", post(add_manual_payment))
}

async fn create_booking(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    payload: Result<Json<CreateBookingRequest>, JsonRejection>,
) -> Result<Json<ApiResponse<BookingResponse>>, AppError> {
    let Json(request) = payload?;
    let controller = BookingController::new(&state);
    let response = controller.create(&user, request).await?;
    Ok(Json(response))
}

async fn get_booking(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<BookingResponse>>, AppError> {
    let controller = BookingController::new(&state);
    let response = controller.get(&user, id).await?;
    Ok(Json(ApiResponse::success(response)))
}

// El cuerpo es opcional: sin él se usa el plazo por defecto
async fn approve_booking(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<Uuid>,
    payload: Option<Json<ApproveBookingRequest>>,
) -> Result<Json<ApiResponse<BookingResponse>>, AppError> {
    let request = payload.map(|Json(r)| r).unwrap_or_default();
    let controller = BookingController::new(&state);
    let response = controller.approve(&user, id, request).await?;
    Ok(Json(response))
}

async fn reject_booking(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<Uuid>,
    payload: Result<Json<RejectBookingRequest>, JsonRejection>,
) -> Result<Json<ApiResponse<BookingResponse>>, AppError> {
    let Json(request) = payload?;
    let controller = BookingController::new(&state);
    let response = controller.reject(&user, id, request).await?;
    Ok(Json(response))
}

async fn cancel_booking(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<Uuid>,
    payload: Option<Json<CancelBookingRequest>>,
) -> Result<Json<ApiResponse<BookingResponse>>, AppError> {
    let request = payload.map(|Json(r)| r).unwrap_or_default();
    let controller = BookingController::new(&state);
    let response = controller.cancel(&user, id, request).await?;
    Ok(Json(response))
}

async fn list_payments(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<Vec<PaymentResponse>>>, AppError> {
    let controller = BookingController::new(&state);
    let response = controller.list_payments(&user, id).await?;
    Ok(Json(ApiResponse::success(response)))
}

async fn add_manual_payment(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<Uuid>,
    payload: Result<Json<ManualPaymentRequest>, JsonRejection>,
) -> Result<Json<ApiResponse<PaymentResponse>>, AppError> {
    let Json(request) = payload?;
    let controller = BookingController::new(&state);
    let response = controller.add_manual_payment(&user, id, request).await?;
    Ok(Json(response))
}
