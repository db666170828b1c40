use async_trait::async_trait;
use axum::{
    extract::{FromRef, FromRequestParts},
    http::{header::AUTHORIZATION, request::Parts, HeaderMap},
};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::config::ApiKey;
use crate::error::AppError;

/// The caller an authenticated request acts for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub organization_id: Uuid,
    pub subject: String,
}

impl Principal {
    /// Rejects access to another organization's resources.
    pub fn ensure_org(&self, organization_id: Uuid) -> Result<(), AppError> {
        if self.organization_id == organization_id {
            Ok(())
        } else {
            tracing::warn!(
                subject = %self.subject,
                principal_org = %self.organization_id,
                requested_org = %organization_id,
                "Cross-organization access denied"
            );
            Err(AppError::Forbidden(format!(
                "not permitted to access organization {}",
                organization_id
            )))
        }
    }
}

/// Resolves a bearer token into a principal.
pub trait PrincipalVerifier: Send + Sync {
    fn verify(&self, token: &str) -> Option<Principal>;
}

/// Static API keys loaded from configuration.
#[derive(Debug, Default, Clone)]
pub struct ApiKeyPrincipals {
    keys: HashMap<String, Principal>,
}

impl ApiKeyPrincipals {
    pub fn new(keys: &[ApiKey]) -> Self {
        let keys = keys
            .iter()
            .map(|key| {
                (
                    key.token.clone(),
                    Principal {
                        organization_id: key.organization_id,
                        subject: key.subject.clone(),
                    },
                )
            })
            .collect();
        Self { keys }
    }

    pub fn with_key(mut self, token: &str, organization_id: Uuid) -> Self {
        self.keys.insert(
            token.to_string(),
            Principal {
                organization_id,
                subject: "api-key".to_string(),
            },
        );
        self
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl PrincipalVerifier for ApiKeyPrincipals {
    fn verify(&self, token: &str) -> Option<Principal> {
        self.keys.get(token).cloned()
    }
}

/// Accepts `Authorization: Bearer <token>` or the bare token.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?.trim();
    let token = value.strip_prefix("Bearer ").unwrap_or(value).trim();
    (!token.is_empty()).then_some(token)
}

#[async_trait]
impl<S> FromRequestParts<S> for Principal
where
    S: Send + Sync,
    Arc<dyn PrincipalVerifier>: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers)
            .ok_or_else(|| AppError::Unauthorized("missing bearer token".to_string()))?;
        let verifier = Arc::<dyn PrincipalVerifier>::from_ref(state);
        verifier
            .verify(token)
            .ok_or_else(|| AppError::Unauthorized("invalid credentials".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_bearer_token_forms() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer abc"));
        assert_eq!(bearer_token(&headers), Some("abc"));

        headers.insert(AUTHORIZATION, HeaderValue::from_static("abc"));
        assert_eq!(bearer_token(&headers), Some("abc"));

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer "));
        assert_eq!(bearer_token(&headers), None);
    }

    #[test]
    fn test_api_keys_resolve_principal() {
        let org = Uuid::new_v4();
        let verifier = ApiKeyPrincipals::default().with_key("k1", org);
        assert_eq!(verifier.verify("k1").map(|p| p.organization_id), Some(org));
        assert!(verifier.verify("k2").is_none());
    }

    #[test]
    fn test_ensure_org() {
        let principal = Principal {
            organization_id: Uuid::new_v4(),
            subject: "pos".to_string(),
        };
        assert!(principal.ensure_org(principal.organization_id).is_ok());
        assert!(matches!(
            principal.ensure_org(Uuid::new_v4()),
            Err(AppError::Forbidden(_))
        ));
    }
}
