//! Identity provider boundary.
//!
//! Authentication happens in front of this service; the gateway forwards the
//! caller as `x-user-id` and `x-user-role` headers.

use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

use crate::utils::error::AppError;

pub const CALLER_ID_HEADER: &str = "x-user-id";
pub const CALLER_ROLE_HEADER: &str = "x-user-role";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Organizer,
    #[default]
    User,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Role::Admin => "admin",
            Role::Organizer => "organizer",
            Role::User => "user",
        })
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "admin" => Ok(Role::Admin),
            "organizer" => Ok(Role::Organizer),
            "user" => Ok(Role::User),
            other => Err(format!("unknown role '{other}'")),
        }
    }
}

pub trait IdentityProvider: Send + Sync {
    fn current_caller_id(&self) -> Option<String>;

    fn current_role(&self) -> Role {
        Role::User
    }
}

/// An authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub id: String,
    pub role: Role,
}

impl Caller {
    pub fn new(id: impl Into<String>, role: Role) -> Self {
        Self {
            id: id.into(),
            role,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn can_organize(&self) -> bool {
        matches!(self.role, Role::Admin | Role::Organizer)
    }

    /// Owners and admins may manage a resource.
    pub fn may_manage(&self, owner_id: &str) -> bool {
        self.is_admin() || self.id == owner_id
    }
}

impl IdentityProvider for Caller {
    fn current_caller_id(&self) -> Option<String> {
        Some(self.id.clone())
    }

    fn current_role(&self) -> Role {
        self.role
    }
}

/// Whoever the gateway says is calling, possibly nobody.
#[derive(Debug, Clone, Default)]
pub struct RequestIdentity(pub Option<Caller>);

impl RequestIdentity {
    pub fn from_parts(parts: &Parts) -> Self {
        let id = parts
            .headers
            .get(CALLER_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|id| !id.is_empty());
        let Some(id) = id else {
            return Self(None);
        };

        let role = match parts
            .headers
            .get(CALLER_ROLE_HEADER)
            .and_then(|value| value.to_str().ok())
        {
            None => Role::User,
            Some(raw) => raw.parse().unwrap_or_else(|e| {
                tracing::warn!(caller_id = %id, error = %e, "Ignoring unknown role header");
                Role::User
            }),
        };

        Self(Some(Caller::new(id, role)))
    }
}

impl IdentityProvider for RequestIdentity {
    fn current_caller_id(&self) -> Option<String> {
        self.0.as_ref().map(|caller| caller.id.clone())
    }

    fn current_role(&self) -> Role {
        self.0.as_ref().map_or(Role::User, |caller| caller.role)
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for RequestIdentity
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self::from_parts(parts))
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        RequestIdentity::from_parts(parts)
            .0
            .ok_or_else(|| AppError::AuthError("Sign in to continue".to_string()))
    }
}
