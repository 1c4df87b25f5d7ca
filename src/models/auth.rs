use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::booking::Booking;
use crate::utils::errors::{forbidden_error, AppResult};

/// Roles del sistema
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    Customer,
    BranchManager,
    Admin,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Customer => "customer",
            UserRole::BranchManager => "branch_manager",
            UserRole::Admin => "admin",
        }
    }
}

/// Claims del JWT
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid, // user_id
    pub role: UserRole,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch_id: Option<Uuid>, // Solo para branch managers
    pub exp: i64,
    pub iat: i64,
}

/// Usuario autenticado que se inyecta en las requests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub user_id: Uuid,
    pub role: UserRole,
    pub branch_id: Option<Uuid>,
}

impl From<Claims> for AuthenticatedUser {
    fn from(claims: Claims) -> Self {
        Self {
            user_id: claims.sub,
            role: claims.role,
            branch_id: claims.branch_id,
        }
    }
}

impl AuthenticatedUser {
    pub fn is_admin(&self) -> bool {
        self.role == UserRole::Admin
    }

    pub fn is_staff(&self) -> bool {
        matches!(self.role, UserRole::Admin | UserRole::BranchManager)
    }

    /// Admin gestiona todas las sucursales, un manager solo la suya
    pub fn manages_branch(&self, branch_id: Uuid) -> bool {
        match self.role {
            UserRole::Admin => true,
            UserRole::BranchManager => self.branch_id == Some(branch_id),
            UserRole::Customer => false,
        }
    }

    pub fn can_view(&self, booking: &Booking) -> bool {
        booking.customer_id == self.user_id || self.manages_branch(booking.branch_id)
    }

    pub fn ensure_can_view(&self, booking: &Booking) -> AppResult<()> {
        if self.can_view(booking) {
            Ok(())
        } else {
            Err(forbidden_error("access booking", "not your booking or branch"))
        }
    }

    pub fn ensure_manages(&self, branch_id: Uuid, operation: &str) -> AppResult<()> {
        if self.manages_branch(branch_id) {
            Ok(())
        } else {
            Err(forbidden_error(operation, "requires staff of the booking's branch"))
        }
    }

    pub fn ensure_admin(&self, operation: &str) -> AppResult<()> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(forbidden_error(operation, "administrator role required"))
        }
    }
}
