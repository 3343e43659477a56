use std::env;

use crate::error::{AppError, Result};

/// Stripe credentials resolved at startup.
#[derive(Debug, Clone)]
pub struct StripeConfig {
    pub secret_key: String,
    pub webhook_secret: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_path: String,
    /// Public storefront base URL, used to build checkout redirect targets.
    pub site_url: String,
    /// ISO currency code the store sells in (Stripe side uses its sub-units).
    pub currency: String,
    pub stripe: StripeConfig,
    /// Set only when the insecure webhook test mode is explicitly enabled.
    /// `None` means signature verification can never be bypassed.
    pub webhook_test_token: Option<String>,
}

/// Read the first environment variable in `names` that is set and non-empty.
///
/// Deployment platforms have historically used two names for the site URL;
/// the fallback is resolved here exactly once, never at request time.
fn env_first_of(names: &[&str]) -> Option<String> {
    names
        .iter()
        .filter_map(|name| env::var(name).ok())
        .find(|v| !v.is_empty())
}

fn require(names: &[&str]) -> Result<String> {
    env_first_of(names).ok_or_else(|| AppError::Configuration(names[0].to_string()))
}

impl Config {
    /// Load configuration from the environment, failing fast on anything
    /// required. Called once at process start; request handlers never read
    /// environment variables.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let host = env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port: u16 = env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(3000);

        let stripe = StripeConfig {
            secret_key: require(&["STRIPE_SECRET_KEY"])?,
            webhook_secret: require(&["STRIPE_WEBHOOK_SECRET"])?,
        };

        let site_url = require(&["PUBLIC_SITE_URL", "SITE_URL"])?;

        // Insecure test mode needs BOTH the explicit opt-in flag and a token.
        // Either one alone leaves verification fully enforced.
        let test_mode_enabled = env::var("WEBHOOK_TEST_MODE")
            .map(|v| v == "insecure")
            .unwrap_or(false);
        let webhook_test_token = match env::var("WEBHOOK_TEST_TOKEN") {
            Ok(token) if test_mode_enabled && !token.is_empty() => {
                tracing::warn!("Insecure webhook test mode ENABLED - do not use in production");
                Some(token)
            }
            _ => None,
        };

        Ok(Self {
            host,
            port,
            database_path: env::var("DATABASE_PATH")
                .unwrap_or_else(|_| "storegate.db".to_string()),
            site_url,
            currency: env::var("STORE_CURRENCY").unwrap_or_else(|_| "pkr".to_string()),
            stripe,
            webhook_test_token,
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
