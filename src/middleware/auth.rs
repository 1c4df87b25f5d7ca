//! Middleware de autenticación JWT
//!
//! Valida el token Bearer y inyecta el `AuthenticatedUser` en las
//! extensions de la request. La autorización por recurso la hacen los
//! controladores.

use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};

use crate::{
    models::auth::AuthenticatedUser,
    state::AppState,
    utils::{
        errors::AppError,
        jwt::{extract_token_from_header, verify_token},
    },
};

/// Middleware de autenticación JWT
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let auth_header = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| AppError::Unauthorized("authorization token required".to_string()))?;

    let token = extract_token_from_header(auth_header)?;
    let claims = verify_token(token, &state.jwt)?;
    let user = AuthenticatedUser::from(claims);

    tracing::debug!(user_id = %user.user_id, role = user.role.as_str(), "request authenticated");
    request.extensions_mut().insert(user);

    Ok(next.run(request).await)
}
