use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tolkien_lease::{ConfigError, LeaseConfig, TokenAlphabet, kv};
use tracing::warn;

use crate::env::ReadEnv;
use crate::nats::{NatsAuth, NatsConfig, parse_servers};

const DEFAULT_PORT: u16 = 3333;
const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(90);
const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(120);

/// Configuration for the lease server.
///
/// Built from defaults, then an optional TOML file, then environment
/// variables (see the crate docs for the full list). Later sources win.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub read_timeout: Duration,
    /// Upper bound on a single request's lease operation.
    pub write_timeout: Duration,
    pub idle_timeout: Duration,
    pub lease: LeaseConfig,
    pub pool_bucket: String,
    pub tombstone_bucket: String,
    pub nats: NatsConfig,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error(transparent)]
    Invalid(#[from] ConfigError),
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            read_timeout: DEFAULT_READ_TIMEOUT,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            lease: LeaseConfig::default(),
            pool_bucket: kv::POOL_BUCKET.to_string(),
            tombstone_bucket: kv::TOMBSTONE_BUCKET.to_string(),
            nats: NatsConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn from_env<E: ReadEnv>(env: &E) -> Result<Self, LoadError> {
        Self::load(None, env)
    }

    /// Resolve the configuration, reading `path` first when given.
    pub fn load<E: ReadEnv>(path: Option<&Path>, env: &E) -> Result<Self, LoadError> {
        let mut config = Self::default();

        if let Some(path) = path {
            let contents = fs::read_to_string(path).map_err(|source| LoadError::Read {
                path: path.to_path_buf(),
                source,
            })?;
            let file: FileConfig = toml::from_str(&contents).map_err(|source| LoadError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
            config = config.merge_file(file)?;
        }

        let config = config.merge_env(env)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.lease.validate()?;
        if let Some(c) = self
            .lease
            .alphabet
            .chars()
            .iter()
            .find(|c| !is_kv_key_char(**c))
        {
            return Err(ConfigError::Invalid {
                key: "token.charset".to_string(),
                reason: format!("{c:?} is not allowed in a KV key"),
            });
        }
        if self.write_timeout.is_zero() {
            return Err(ConfigError::ZeroDuration {
                name: "write_timeout",
            });
        }
        for (key, bucket) in [
            ("pool_bucket", &self.pool_bucket),
            ("tombstone_bucket", &self.tombstone_bucket),
        ] {
            if bucket.trim().is_empty() {
                return Err(ConfigError::Invalid {
                    key: key.to_string(),
                    reason: "bucket name must not be empty".to_string(),
                });
            }
        }
        if self.pool_bucket == self.tombstone_bucket {
            return Err(ConfigError::Invalid {
                key: "tombstone_bucket".to_string(),
                reason: "must differ from pool_bucket".to_string(),
            });
        }
        if self.nats.servers.is_empty() {
            return Err(ConfigError::Invalid {
                key: "nats.servers".to_string(),
                reason: "at least one server is required".to_string(),
            });
        }
        Ok(())
    }

    fn merge_file(mut self, file: FileConfig) -> Result<Self, ConfigError> {
        let FileConfig {
            app,
            token,
            lease,
            nats,
        } = file;

        set(&mut self.port, app.port);
        set_secs(&mut self.read_timeout, app.read_timeout_secs);
        set_secs(&mut self.write_timeout, app.write_timeout_secs);
        set_secs(&mut self.idle_timeout, app.idle_timeout_secs);

        set(&mut self.lease.token_length, token.length);
        if let Some(charset) = token.charset {
            self.lease.alphabet = TokenAlphabet::new(&charset)?;
        }

        set(&mut self.lease.pool_size, lease.pool_size);
        set(&mut self.lease.lease_secs, lease.lease_secs);
        set(&mut self.lease.renewal_secs, lease.renewal_secs);
        if let Some(ms) = lease.sweep_interval_ms {
            self.lease.sweep_interval = Duration::from_millis(ms);
        }
        set_secs(&mut self.lease.pool_ttl, lease.pool_ttl_secs);

        set(&mut self.pool_bucket, nats.pool_bucket);
        set(&mut self.tombstone_bucket, nats.tombstone_bucket);
        set(&mut self.nats.servers, nats.servers);
        match (nats.user, nats.password, nats.token) {
            (Some(user), Some(password), _) => {
                self.nats.auth = NatsAuth::UserPassword { user, password }
            }
            (_, _, Some(token)) => self.nats.auth = NatsAuth::Token(token),
            _ => {}
        }

        Ok(self)
    }

    fn merge_env<E: ReadEnv>(mut self, env: &E) -> Result<Self, ConfigError> {
        set(&mut self.port, parse_var(env, "TOLKIEN_PORT"));
        set_secs(&mut self.read_timeout, parse_var(env, "TOLKIEN_READ_TIMEOUT_SECS"));
        set_secs(&mut self.write_timeout, parse_var(env, "TOLKIEN_WRITE_TIMEOUT_SECS"));
        set_secs(&mut self.idle_timeout, parse_var(env, "TOLKIEN_IDLE_TIMEOUT_SECS"));

        set(&mut self.lease.token_length, parse_var(env, "TOLKIEN_TOKEN_LENGTH"));
        if let Ok(charset) = env.var("TOLKIEN_TOKEN_CHARSET") {
            self.lease.alphabet = TokenAlphabet::new(&charset)?;
        }
        set(&mut self.lease.pool_size, parse_var(env, "TOLKIEN_POOL_SIZE"));
        set(&mut self.lease.lease_secs, parse_var(env, "TOLKIEN_LEASE_SECS"));
        set(&mut self.lease.renewal_secs, parse_var(env, "TOLKIEN_RENEWAL_SECS"));
        if let Some(ms) = parse_var(env, "TOLKIEN_SWEEP_INTERVAL_MS") {
            self.lease.sweep_interval = Duration::from_millis(ms);
        }
        set_secs(&mut self.lease.pool_ttl, parse_var(env, "TOLKIEN_POOL_TTL_SECS"));

        set(&mut self.pool_bucket, env.var("TOLKIEN_POOL_BUCKET").ok());
        set(&mut self.tombstone_bucket, env.var("TOLKIEN_TOMBSTONE_BUCKET").ok());

        self.nats = self.nats.merge_env(env);
        Ok(self)
    }
}

/// Tokens are used verbatim as KV keys.
fn is_kv_key_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '=' | '/')
}

fn set<T>(slot: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *slot = value;
    }
}

fn set_secs(slot: &mut Duration, secs: Option<u64>) {
    set(slot, secs.map(Duration::from_secs));
}

/// Unparsable values are ignored with a warning so the previous value stays.
fn parse_var<E: ReadEnv, T: FromStr>(env: &E, key: &str) -> Option<T> {
    let raw = env.var(key).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(key, value = %raw, "Ignoring unparsable environment variable");
            None
        }
    }
}

// ── TOML file layout ──────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    app: AppSection,
    token: TokenSection,
    lease: LeaseSection,
    nats: NatsSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct AppSection {
    port: Option<u16>,
    read_timeout_secs: Option<u64>,
    write_timeout_secs: Option<u64>,
    idle_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct TokenSection {
    length: Option<usize>,
    charset: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct LeaseSection {
    pool_size: Option<usize>,
    lease_secs: Option<u64>,
    renewal_secs: Option<u64>,
    sweep_interval_ms: Option<u64>,
    pool_ttl_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct NatsSection {
    #[serde(deserialize_with = "servers_from_toml")]
    servers: Option<Vec<String>>,
    user: Option<String>,
    password: Option<String>,
    token: Option<String>,
    pool_bucket: Option<String>,
    tombstone_bucket: Option<String>,
}

/// Accepts either `servers = ["a:4222", "b:4222"]` or `servers = "a:4222,b:4222"`.
fn servers_from_toml<'de, D>(deserializer: D) -> Result<Option<Vec<String>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Servers {
        List(Vec<String>),
        Csv(String),
    }

    Ok(match Servers::deserialize(deserializer)? {
        Servers::List(list) => Some(
            list.into_iter()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
        ),
        Servers::Csv(raw) => Some(parse_servers(&raw)),
    })
}
