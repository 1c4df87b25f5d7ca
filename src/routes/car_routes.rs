use axum::{
    extract::{rejection::QueryRejection, Path, Query, State},
    routing::get,
    Json, Router,
};
use uuid::Uuid;

use crate::controllers::BookingController;
use crate::dto::api_response::ApiResponse;
use crate::dto::booking_dto::{AvailabilityQuery, AvailabilityResponse};
use crate::state::AppState;
use crate::utils::errors::AppError;

pub fn create_car_router() -> Router<AppState> {
    Router::new().route("/:id/availability", get(get_availability))
}

async fn get_availability(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    query: Result<Query<AvailabilityQuery>, QueryRejection>,
) -> Result<Json<ApiResponse<AvailabilityResponse>>, AppError> {
    let Query(query) = query?;
    let controller = BookingController::new(&state);
    let response = controller.availability(id, query).await?;
    Ok(Json(ApiResponse::success(response)))
}
