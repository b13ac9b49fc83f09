use std::env;
use std::str::FromStr;
use std::time::Duration;

pub mod cors;
pub mod security;

pub use cors::create_cors_layer;
pub use security::create_security_headers_layer;

const DEFAULT_PORT: u16 = 3001;
const DEFAULT_OUTBOX_POLL_INTERVAL_SECS: u64 = 30;
const DEFAULT_AUDIT_LOOKBACK_DAYS: i64 = 90;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    pub site_url: String,
    pub currency: String,
    pub stripe: StripeConfig,
    pub email: EmailConfig,
    pub auth_api_base: String,
    pub outbox_poll_interval: Duration,
    pub audit_lookback_days: i64,
}

#[derive(Debug, Clone)]
pub struct StripeConfig {
    pub api_base: String,
    pub secret_key: String,
    /// Empty means every webhook is rejected.
    pub webhook_secret: String,
}

#[derive(Debug, Clone)]
pub struct EmailConfig {
    pub api_base: String,
    pub api_key: String,
    pub from: String,
}

impl Config {
    pub fn from_env() -> Self {
        let stripe = StripeConfig {
            api_base: var_or("STRIPE_API_BASE", "https://api.stripe.com"),
            secret_key: var_or("STRIPE_SECRET_KEY", ""),
            webhook_secret: var_or("STRIPE_WEBHOOK_SECRET", ""),
        };
        if stripe.webhook_secret.is_empty() {
            tracing::warn!("STRIPE_WEBHOOK_SECRET is not set, all webhooks will be rejected");
        }

        Self {
            database_url: var_or("DATABASE_URL", "postgres://localhost/booking"),
            port: parsed_or("PORT", DEFAULT_PORT),
            site_url: var_or("SITE_URL", "http://localhost:5173"),
            currency: var_or("CURRENCY", "eur"),
            stripe,
            email: EmailConfig {
                api_base: var_or("EMAIL_API_BASE", "https://api.resend.com"),
                api_key: var_or("EMAIL_API_KEY", ""),
                from: var_or("EMAIL_FROM", "Reservations <reservations@localhost>"),
            },
            auth_api_base: var_or("AUTH_API_BASE", "http://localhost:54321/auth/v1"),
            outbox_poll_interval: Duration::from_secs(parsed_or(
                "OUTBOX_POLL_INTERVAL_SECS",
                DEFAULT_OUTBOX_POLL_INTERVAL_SECS,
            )),
            audit_lookback_days: parsed_or(
                "PAYMENT_AUDIT_LOOKBACK_DAYS",
                DEFAULT_AUDIT_LOOKBACK_DAYS,
            ),
        }
    }
}

fn var_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parsed_or<T>(key: &str, default: T) -> T
where
    T: FromStr + Copy,
{
    match env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!("Config: invalid value '{}' for {}, using default", raw, key);
            default
        }),
        Err(_) => default,
    }
}
