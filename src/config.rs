//! Gateway configuration from environment variables

use std::env;

use rand::RngCore;
use tracing::warn;

/// Default listen port
const DEFAULT_PORT: u16 = 5000;

/// Default rate-limit window (15 minutes)
const DEFAULT_RATE_WINDOW_MS: u64 = 15 * 60 * 1000;

/// Default request budget per window
const DEFAULT_RATE_MAX_REQUESTS: u32 = 100;

/// Runtime configuration, read once at startup and immutable afterwards.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Listen port for both the control and stream planes
    pub port: u16,

    /// Allowed CORS origin (`*` when unset)
    pub cors_origin: Option<String>,

    /// Token-signing secret
    pub jwt_secret: String,

    /// Credential-encryption secret (defaults to `jwt_secret`)
    pub encryption_key: String,

    /// Database URL (sqlite)
    pub database_url: String,

    /// Global rate limit: admitted requests per window
    pub rate_limit_max_requests: u32,

    /// Rate-limit window in milliseconds
    pub rate_limit_window_ms: u64,

    /// OpenAI API key (assistant provider)
    pub openai_api_key: Option<String>,

    /// Anthropic API key (assistant provider)
    pub anthropic_api_key: Option<String>,
}

impl GatewayConfig {
    /// Read configuration from the process environment.
    ///
    /// Missing values fall back to development defaults; `JWT_SECRET` must
    /// be set in production; without it a random ephemeral secret is
    /// generated and every token dies with the process.
    pub fn from_env() -> Self {
        let jwt_secret = match env::var("JWT_SECRET") {
            Ok(s) if !s.is_empty() => s,
            _ => {
                warn!("JWT_SECRET not set, generating ephemeral secret (tokens will not survive restart)");
                let mut buf = [0u8; 32];
                rand::rngs::OsRng.fill_bytes(&mut buf);
                hex_encode(&buf)
            }
        };

        // Separate duty from token signing where the operator provides it;
        // fall back to the signing secret for compatibility.
        let encryption_key = env::var("ENCRYPTION_KEY")
            .ok()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| jwt_secret.clone());

        Self {
            port: parse_env("PORT", DEFAULT_PORT),
            cors_origin: env::var("CORS_ORIGIN").ok().filter(|s| !s.is_empty()),
            jwt_secret,
            encryption_key,
            database_url: env::var("DATABASE_URL")
                .ok()
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| "sqlite://shellgate.db?mode=rwc".to_string()),
            rate_limit_max_requests: parse_env("RATE_LIMIT_MAX_REQUESTS", DEFAULT_RATE_MAX_REQUESTS),
            rate_limit_window_ms: parse_env("RATE_LIMIT_WINDOW_MS", DEFAULT_RATE_WINDOW_MS),
            openai_api_key: env::var("OPENAI_API_KEY").ok().filter(|s| !s.is_empty()),
            anthropic_api_key: env::var("ANTHROPIC_API_KEY").ok().filter(|s| !s.is_empty()),
        }
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, default: T) -> T {
    match env::var(name) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            warn!("Invalid value for {}, using default", name);
            default
        }),
        Err(_) => default,
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_encode() {
        assert_eq!(hex_encode(&[0x00, 0xff, 0x10]), "00ff10");
    }
}
