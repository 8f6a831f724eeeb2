//! NATS connection for the lease server: server list and auth from the
//! environment, plus reconnect handling tuned for a long-running lease store.

use std::time::Duration;

use async_nats::{Client, ConnectOptions, Event};
use tracing::{error, info, instrument, warn};

use crate::env::ReadEnv;

pub const ENV_NATS_URL: &str = "NATS_URL";
pub const ENV_NATS_USER: &str = "NATS_USER";
pub const ENV_NATS_PASSWORD: &str = "NATS_PASSWORD";
pub const ENV_NATS_TOKEN: &str = "NATS_TOKEN";

pub const DEFAULT_NATS_URL: &str = "localhost:4222";

const CLIENT_NAME: &str = "tolkien";
const CONNECTION_TIMEOUT: Duration = Duration::from_secs(10);
const BASE_RECONNECT_DELAY: Duration = Duration::from_millis(250);
const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(30);

/// NATS authentication method.
///
/// Resolved from the environment in this order: `NATS_USER` + `NATS_PASSWORD`,
/// then `NATS_TOKEN`, then no auth.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NatsAuth {
    UserPassword { user: String, password: String },
    Token(String),
    None,
}

impl NatsAuth {
    pub fn description(&self) -> &'static str {
        match self {
            Self::UserPassword { .. } => "user/password",
            Self::Token(_) => "token",
            Self::None => "none",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NatsConfig {
    pub servers: Vec<String>,
    pub auth: NatsAuth,
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self::from_url(DEFAULT_NATS_URL)
    }
}

impl NatsConfig {
    pub fn from_url(url: impl Into<String>) -> Self {
        Self {
            servers: vec![url.into()],
            auth: NatsAuth::None,
        }
    }

    /// Overlay `NATS_*` variables on `self`. Unset variables keep the
    /// current value.
    pub fn merge_env<E: ReadEnv>(mut self, env: &E) -> Self {
        if let Ok(raw) = env.var(ENV_NATS_URL) {
            let servers = parse_servers(&raw);
            if !servers.is_empty() {
                self.servers = servers;
            }
        }
        if let (Ok(user), Ok(password)) = (env.var(ENV_NATS_USER), env.var(ENV_NATS_PASSWORD)) {
            self.auth = NatsAuth::UserPassword { user, password };
        } else if let Ok(token) = env.var(ENV_NATS_TOKEN) {
            self.auth = NatsAuth::Token(token);
        }
        self
    }

    pub fn from_env<E: ReadEnv>(env: &E) -> Self {
        Self::default().merge_env(env)
    }
}

/// Split a comma-separated server list, dropping blanks.
pub fn parse_servers(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

#[derive(Debug, thiserror::Error)]
#[error("failed to connect to NATS servers {servers:?}: {source}")]
pub struct ConnectError {
    pub servers: Vec<String>,
    #[source]
    pub source: async_nats::ConnectError,
}

/// Exponential backoff from `BASE_RECONNECT_DELAY`, capped, with ±20% jitter
/// so several lease servers do not reconnect in lockstep.
fn reconnect_delay(attempts: usize) -> Duration {
    let factor = 0.8 + rand::random::<f64>() * 0.4;
    let delay = backoff(attempts).mul_f64(factor).min(MAX_RECONNECT_DELAY);
    info!(attempts, delay_ms = delay.as_millis() as u64, "NATS reconnect delay");
    delay
}

fn backoff(attempts: usize) -> Duration {
    let exp = u32::try_from(attempts).unwrap_or(u32::MAX).min(16);
    BASE_RECONNECT_DELAY
        .saturating_mul(1 << exp)
        .min(MAX_RECONNECT_DELAY)
}

/// While disconnected every lease request fails with a store error and the
/// scheduler stops ageing leases, so outages are logged at `warn`/`error`.
async fn handle_event(event: Event) {
    match event {
        Event::Connected => info!("NATS connected, lease store reachable"),
        Event::Disconnected => {
            error!("NATS disconnected, lease requests will fail and leases stop ageing until reconnect")
        }
        Event::LameDuckMode => warn!("NATS server entering lame duck mode, expect a reconnect"),
        Event::SlowConsumer(sid) => warn!(sid, "NATS slow consumer"),
        Event::ServerError(err) => warn!(error = %err, "NATS server error"),
        Event::ClientError(err) => warn!(error = %err, "NATS client error"),
        Event::Draining => info!("NATS connection draining"),
        Event::Closed => info!("NATS connection closed"),
    }
}

fn options(auth: &NatsAuth) -> ConnectOptions {
    let opts = match auth {
        NatsAuth::UserPassword { user, password } => {
            ConnectOptions::with_user_and_password(user.clone(), password.clone())
        }
        NatsAuth::Token(token) => ConnectOptions::with_token(token.clone()),
        NatsAuth::None => ConnectOptions::new(),
    };
    opts.name(CLIENT_NAME)
        .retry_on_initial_connect()
        .connection_timeout(CONNECTION_TIMEOUT)
        .reconnect_delay_callback(reconnect_delay)
        .event_callback(|event| async move { handle_event(event).await })
}

/// Connect to NATS with automatic reconnection and event logging.
#[instrument(name = "nats.connect", skip(config), fields(servers = ?config.servers, auth = %config.auth.description()))]
pub async fn connect(config: &NatsConfig) -> Result<Client, ConnectError> {
    info!("Connecting to NATS");
    options(&config.auth)
        .connect(&config.servers)
        .await
        .map_err(|source| ConnectError {
            servers: config.servers.clone(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::InMemoryEnv;

    #[test]
    fn from_env_defaults_to_localhost_with_no_auth() {
        let config = NatsConfig::from_env(&InMemoryEnv::new());

        assert_eq!(config.servers, vec!["localhost:4222"]);
        assert_eq!(config.auth, NatsAuth::None);
    }

    #[test]
    fn from_env_parses_comma_separated_servers() {
        let env = InMemoryEnv::new();
        env.set("NATS_URL", "host1:4222 , host2:4222,, host3:4222");

        let config = NatsConfig::from_env(&env);

        assert_eq!(config.servers, vec!["host1:4222", "host2:4222", "host3:4222"]);
    }

    #[test]
    fn blank_url_keeps_previous_servers() {
        let env = InMemoryEnv::new();
        env.set("NATS_URL", " , ");

        let config = NatsConfig::from_url("nats-1:4222").merge_env(&env);

        assert_eq!(config.servers, vec!["nats-1:4222"]);
    }

    #[test]
    fn user_password_takes_priority_over_token() {
        let env = InMemoryEnv::new();
        env.set("NATS_USER", "tolkien");
        env.set("NATS_PASSWORD", "secret");
        env.set("NATS_TOKEN", "some-token");

        let config = NatsConfig::from_env(&env);

        assert_eq!(
            config.auth,
            NatsAuth::UserPassword {
                user: "tolkien".into(),
                password: "secret".into()
            }
        );
    }

    #[test]
    fn user_without_password_falls_through_to_token() {
        let env = InMemoryEnv::new();
        env.set("NATS_USER", "tolkien");
        env.set("NATS_TOKEN", "some-token");

        let config = NatsConfig::from_env(&env);

        assert_eq!(config.auth, NatsAuth::Token("some-token".into()));
        assert_eq!(config.auth.description(), "token");
    }

    #[test]
    fn backoff_doubles_up_to_cap() {
        assert_eq!(backoff(0), Duration::from_millis(250));
        assert_eq!(backoff(3), Duration::from_secs(2));
        assert_eq!(backoff(40), MAX_RECONNECT_DELAY);
        assert_eq!(backoff(usize::MAX), MAX_RECONNECT_DELAY);
    }

    #[test]
    fn reconnect_delay_stays_within_jitter_band() {
        for attempts in [0, 2, 5] {
            let base = backoff(attempts);
            let delay = reconnect_delay(attempts);
            assert!(delay >= base.mul_f64(0.8), "{attempts}: {delay:?}");
            assert!(delay <= base.mul_f64(1.2), "{attempts}: {delay:?}");
        }
        assert!(reconnect_delay(40) <= MAX_RECONNECT_DELAY);
    }
}
