// src/middleware/rbac.rs

use axum::{extract::FromRequestParts, http::request::Parts};
use std::marker::PhantomData;

use crate::{common::error::AppError, middleware::auth::AuthenticatedUser, models::auth::StaffRole};

/// A set of roles allowed through a route.
pub trait RoleDef: Send + Sync + 'static {
    fn allowed() -> &'static [StaffRole];
}

/// Rejects the request unless the authenticated staff member holds one of
/// `T::allowed()`. Must run behind `auth_guard`.
pub struct RequireRole<T>(pub PhantomData<T>);

impl<T, S> FromRequestParts<S> for RequireRole<T>
where
    T: RoleDef,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let AuthenticatedUser(user) = AuthenticatedUser::from_request_parts(parts, state).await?;

        if !T::allowed().contains(&user.role) {
            tracing::warn!(user_id = %user.id, role = %user.role, "role not allowed for this route");
            return Err(AppError::Forbidden(user.role.to_string()));
        }

        Ok(RequireRole(PhantomData))
    }
}

// ---
// ROLE SETS
// ---

pub struct OwnerOnly;
impl RoleDef for OwnerOnly {
    fn allowed() -> &'static [StaffRole] {
        &[StaffRole::Owner]
    }
}
