use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::{header, request::Parts};

use super::domain::{Actor, UserId};
use super::events::Audience;
use super::lifecycle::LifecycleError;
use crate::config::AccessConfig;

/// Header carrying the portal account of a member of the public.
pub const REQUESTER_HEADER: &str = "x-requester-id";

const ANONYMOUS_REQUESTER: &str = "anonymous";

/// Staff bearer tokens known to the server.
#[derive(Debug, Clone, Default)]
pub struct StaffDirectory {
    tokens: HashMap<String, UserId>,
}

impl StaffDirectory {
    pub fn from_config(config: &AccessConfig) -> Self {
        let tokens = config
            .staff_tokens
            .iter()
            .map(|(token, user)| (token.clone(), UserId(user.clone())))
            .collect();
        Self { tokens }
    }

    pub fn with_token(mut self, token: impl Into<String>, user: UserId) -> Self {
        self.tokens.insert(token.into(), user);
        self
    }

    pub fn resolve(&self, token: &str) -> Option<&UserId> {
        self.tokens.get(token)
    }
}

/// Who is calling, as established by the server rather than the request body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Caller {
    Staff(UserId),
    Requester(UserId),
}

impl Caller {
    /// A bearer token found in the directory makes the caller staff; anything else is
    /// treated as a member of the public.
    pub fn identify(parts: &Parts, directory: Option<&StaffDirectory>) -> Self {
        let staff = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .and_then(|token| directory.and_then(|directory| directory.resolve(token.trim())));
        if let Some(user) = staff {
            return Caller::Staff(user.clone());
        }

        let requester = parts
            .headers
            .get(REQUESTER_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .unwrap_or(ANONYMOUS_REQUESTER);
        Caller::Requester(UserId(requester.to_string()))
    }

    pub fn is_staff(&self) -> bool {
        matches!(self, Caller::Staff(_))
    }

    pub fn actor(&self) -> Actor {
        match self {
            Caller::Staff(user) => Actor::Agency(user.clone()),
            Caller::Requester(user) => Actor::Requester(user.clone()),
        }
    }

    /// Only staff may read agency-internal events.
    pub fn audience(&self, requested: Audience) -> Result<Audience, LifecycleError> {
        match (requested, self.is_staff()) {
            (Audience::Agency, false) => Err(LifecycleError::Forbidden(
                "agency timeline requires staff credentials".to_string(),
            )),
            (audience, _) => Ok(audience),
        }
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let directory = parts.extensions.get::<Arc<StaffDirectory>>().cloned();
        Ok(Caller::identify(parts, directory.as_deref()))
    }
}
