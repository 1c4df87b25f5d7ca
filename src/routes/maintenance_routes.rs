use axum::{extract::State, routing::post, Extension, Json, Router};

use crate::controllers::MaintenanceController;
use crate::dto::api_response::CountResponse;
use crate::models::auth::AuthenticatedUser;
use crate::state::AppState;
use crate::utils::errors::AppError;

pub fn create_maintenance_router() -> Router<AppState> {
    Router::new()
        .route("/cleanup-expired", post(cleanup_expired))
        .route("/complete-active", post(complete_active))
        .route("/reconcile", post(reconcile))
}

async fn cleanup_expired(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<Json<CountResponse>, AppError> {
    let controller = MaintenanceController::new(&state);
    Ok(Json(controller.cleanup_expired(&user).await?))
}

async fn complete_active(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<Json<CountResponse>, AppError> {
    let controller = MaintenanceController::new(&state);
    Ok(Json(controller.complete_active(&user).await?))
}

async fn reconcile(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<Json<CountResponse>, AppError> {
    let controller = MaintenanceController::new(&state);
    Ok(Json(controller.reconcile(&user).await?))
}
