use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::EmailConfig;
use crate::utils::error::{AppError, AppResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingEmail {
    pub to: String,
    pub subject: String,
    pub html: String,
}

#[async_trait]
pub trait EmailProvider: Send + Sync {
    /// Returns the provider's message id once the email is accepted.
    async fn send(&self, email: &OutgoingEmail) -> AppResult<String>;
}

/// Client for a Resend-compatible `POST /emails` API.
#[derive(Clone)]
pub struct ResendEmailClient {
    http: reqwest::Client,
    api_base: String,
    api_key: String,
    from: String,
}

#[derive(Serialize)]
struct SendEmailBody<'a> {
    from: &'a str,
    to: [&'a str; 1],
    subject: &'a str,
    html: &'a str,
}

#[derive(Deserialize)]
struct SendEmailResponse {
    id: String,
}

impl ResendEmailClient {
    pub fn new(config: &EmailConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_base: config.api_base.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            from: config.from.clone(),
        }
    }
}

#[async_trait]
impl EmailProvider for ResendEmailClient {
    async fn send(&self, email: &OutgoingEmail) -> AppResult<String> {
        let response = self
            .http
            .post(format!("{}/emails", self.api_base))
            .bearer_auth(&self.api_key)
            .json(&SendEmailBody {
                from: &self.from,
                to: [&email.to],
                subject: &email.subject,
                html: &email.html,
            })
            .send()
            .await
            .map_err(|e| AppError::ExternalServiceError(format!("Email provider unreachable: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::ExternalServiceError(format!(
                "Email provider returned {status}: {body}"
            )));
        }

        let accepted: SendEmailResponse = response.json().await.map_err(|e| {
            AppError::ExternalServiceError(format!("Unexpected email provider response: {e}"))
        })?;
        Ok(accepted.id)
    }
}
