//! Bearer-token authentication against the external identity provider.

use async_trait::async_trait;
use axum::http::{header, HeaderMap, StatusCode};
use serde::Deserialize;
use uuid::Uuid;

use crate::utils::error::{AppError, AppResult};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AuthenticatedUser {
    pub id: Uuid,
    #[serde(default)]
    pub email: Option<String>,
}

#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self, token: &str) -> AppResult<AuthenticatedUser>;
}

pub fn bearer_token(headers: &HeaderMap) -> AppResult<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or_else(|| AppError::AuthError("Missing bearer token".to_string()))
}

/// Resolves tokens through the provider's `GET /user` endpoint.
#[derive(Clone)]
pub struct HttpAuthenticator {
    http: reqwest::Client,
    api_base: String,
}

impl HttpAuthenticator {
    pub fn new(api_base: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_base: api_base.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl Authenticator for HttpAuthenticator {
    async fn authenticate(&self, token: &str) -> AppResult<AuthenticatedUser> {
        let response = self
            .http
            .get(format!("{}/user", self.api_base))
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| {
                AppError::ExternalServiceError(format!("Identity provider unreachable: {e}"))
            })?;

        match response.status() {
            status if status.is_success() => response.json().await.map_err(|e| {
                AppError::ExternalServiceError(format!("Unexpected identity response: {e}"))
            }),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err(AppError::AuthError("Invalid or expired token".to_string()))
            }
            status => Err(AppError::ExternalServiceError(format!(
                "Identity provider returned {status}"
            ))),
        }
    }
}
