//! streamlagd.toml configuration.
//!
//! ```toml
//! [server]
//! listen = "0.0.0.0:8080"
//! poll_timeout = "10s"
//!
//! [[triggers]]
//! name = "orders"
//! replicas = { min = 0, max = 4 }
//!
//! [triggers.metadata]
//! hostsFromEnv = "REDIS_HOSTS"
//! ports = [26379]
//! sentinelMaster = "mymaster"
//! stream = "orders"
//! consumerGroup = "workers"
//! lagCount = 12
//!
//! [triggers.auth]
//! password = { env = "REDIS_PASSWORD" }
//! sentinelPassword = { file = "/run/secrets/sentinel-password" }
//! ```
//!
//! Metadata values may be strings, numbers, booleans, or lists (joined
//! with commas). Credentials are always references, never inline.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, anyhow, bail};
use serde::Deserialize;

use streamlag_core::config::parse_duration;
use streamlag_core::{ReplicaBounds, TriggerMetadata};

#[derive(Debug, Clone, Deserialize)]
pub struct DaemonConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub triggers: Vec<TriggerConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen: SocketAddr,
    pub poll_timeout: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 8080)),
            poll_timeout: "10s".to_string(),
        }
    }
}

impl ServerConfig {
    pub fn poll_timeout(&self) -> anyhow::Result<Duration> {
        parse_duration(&self.poll_timeout)
            .filter(|d| !d.is_zero())
            .ok_or_else(|| anyhow!("invalid server.poll_timeout `{}`", self.poll_timeout))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TriggerConfig {
    pub name: String,
    pub metadata: HashMap<String, toml::Value>,
    #[serde(default)]
    pub auth: HashMap<String, SecretRef>,
    pub replicas: Option<ReplicaBounds>,
}

/// Where a credential comes from.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecretRef {
    Env(String),
    File(PathBuf),
}

impl SecretRef {
    fn resolve(&self, env: &dyn Fn(&str) -> Option<String>) -> anyhow::Result<String> {
        match self {
            SecretRef::Env(var) => {
                env(var).ok_or_else(|| anyhow!("environment variable `{var}` is not set"))
            }
            SecretRef::File(path) => {
                let content = std::fs::read_to_string(path)
                    .with_context(|| format!("reading secret file {}", path.display()))?;
                Ok(content.trim_end_matches(['\r', '\n']).to_string())
            }
        }
    }
}

impl DaemonConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::from_toml(&content).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        let config: DaemonConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        self.server.poll_timeout()?;
        let mut seen = std::collections::HashSet::new();
        for trigger in &self.triggers {
            if trigger.name.trim().is_empty() {
                bail!("trigger with empty name");
            }
            if !seen.insert(trigger.name.as_str()) {
                bail!("duplicate trigger name `{}`", trigger.name);
            }
            if let Some(bounds) = trigger.replicas
                && bounds.min > bounds.max
            {
                bail!(
                    "trigger `{}`: replicas.min ({}) exceeds replicas.max ({})",
                    trigger.name,
                    bounds.min,
                    bounds.max
                );
            }
        }
        Ok(())
    }
}

impl TriggerConfig {
    /// Flatten into the metadata shape the scaler parses.
    ///
    /// `...FromEnv` keys are resolved through `env`; a variable that is not
    /// set is left out so the scaler reports which key referenced it.
    pub fn to_metadata(
        &self,
        trigger_index: usize,
        env: &dyn Fn(&str) -> Option<String>,
    ) -> anyhow::Result<TriggerMetadata> {
        let mut meta = TriggerMetadata::new(trigger_index);

        for (key, value) in &self.metadata {
            let value = metadata_value(value)
                .with_context(|| format!("trigger `{}`: metadata key `{key}`", self.name))?;
            if key.ends_with("FromEnv")
                && let Some(resolved) = env(&value)
            {
                meta.resolved_env.insert(value.clone(), resolved);
            }
            meta.metadata.insert(key.clone(), value);
        }

        for (key, secret) in &self.auth {
            let value = secret
                .resolve(env)
                .with_context(|| format!("trigger `{}`: auth `{key}`", self.name))?;
            meta.auth_params.insert(key.clone(), value);
        }

        Ok(meta)
    }
}

fn metadata_value(value: &toml::Value) -> anyhow::Result<String> {
    match value {
        toml::Value::String(s) => Ok(s.clone()),
        toml::Value::Integer(i) => Ok(i.to_string()),
        toml::Value::Boolean(b) => Ok(b.to_string()),
        toml::Value::Array(items) => Ok(items
            .iter()
            .map(metadata_value)
            .collect::<anyhow::Result<Vec<_>>>()?
            .join(",")),
        other => bail!("unsupported value `{other}`"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[server]
listen = "127.0.0.1:9090"
poll_timeout = "3s"

[[triggers]]
name = "orders"
replicas = { min = 0, max = 4 }

[triggers.metadata]
hostsFromEnv = "REDIS_HOSTS"
ports = [26379, 26380]
sentinelMaster = "mymaster"
stream = "orders"
consumerGroup = "workers"
lagCount = 12
activationLagCount = "10"

[triggers.auth]
password = { env = "REDIS_PASSWORD" }
"#;

    fn env(var: &str) -> Option<String> {
        match var {
            "REDIS_HOSTS" => Some("s0,s1".to_string()),
            "REDIS_PASSWORD" => Some("admin".to_string()),
            _ => None,
        }
    }

    #[test]
    fn parses_sample() {
        let config = DaemonConfig::from_toml(SAMPLE).unwrap();
        assert_eq!(config.server.listen, "127.0.0.1:9090".parse::<SocketAddr>().unwrap());
        assert_eq!(config.server.poll_timeout().unwrap(), Duration::from_secs(3));
        assert_eq!(config.triggers.len(), 1);
        assert_eq!(
            config.triggers[0].replicas,
            Some(ReplicaBounds { min: 0, max: 4 })
        );
        assert_eq!(
            config.triggers[0].auth["password"],
            SecretRef::Env("REDIS_PASSWORD".into())
        );
    }

    #[test]
    fn flattens_to_metadata() {
        let config = DaemonConfig::from_toml(SAMPLE).unwrap();
        let meta = config.triggers[0].to_metadata(0, &env).unwrap();

        assert_eq!(meta.metadata["ports"], "26379,26380");
        assert_eq!(meta.metadata["lagCount"], "12");
        assert_eq!(meta.resolved_env["REDIS_HOSTS"], "s0,s1");
        assert_eq!(meta.auth_params["password"], "admin");

        let scaler = streamlag_core::ScalerConfig::from_metadata(&meta).unwrap();
        assert_eq!(scaler.endpoints.len(), 2);
        assert_eq!(scaler.thresholds.lag_count, 12);
        assert_eq!(scaler.thresholds.activation_lag_count, 10);
    }

    #[test]
    fn missing_secret_env_fails() {
        let config = DaemonConfig::from_toml(SAMPLE).unwrap();
        let err = config.triggers[0].to_metadata(0, &|_| None).unwrap_err();
        assert!(format!("{err:#}").contains("REDIS_PASSWORD"));
    }

    #[test]
    fn defaults_apply() {
        let config = DaemonConfig::from_toml("").unwrap();
        assert_eq!(config.server.listen.port(), 8080);
        assert_eq!(config.server.poll_timeout().unwrap(), Duration::from_secs(10));
        assert!(config.triggers.is_empty());
    }

    #[test]
    fn rejects_duplicate_names() {
        let toml = r#"
[[triggers]]
name = "a"
metadata = {}

[[triggers]]
name = "a"
metadata = {}
"#;
        assert!(DaemonConfig::from_toml(toml).is_err());
    }

    #[test]
    fn rejects_inverted_replica_bounds() {
        let toml = r#"
[[triggers]]
name = "a"
metadata = {}
replicas = { min = 5, max = 1 }
"#;
        assert!(DaemonConfig::from_toml(toml).is_err());
    }

    #[test]
    fn rejects_bad_poll_timeout() {
        assert!(DaemonConfig::from_toml("[server]\npoll_timeout = \"0s\"").is_err());
        assert!(DaemonConfig::from_toml("[server]\npoll_timeout = \"soon\"").is_err());
    }

    #[test]
    fn rejects_inline_secrets() {
        let toml = r#"
[[triggers]]
name = "a"
metadata = {}
auth = { password = "hunter2" }
"#;
        assert!(DaemonConfig::from_toml(toml).is_err());
    }

    #[test]
    fn reads_secret_files() {
        let path = std::env::temp_dir().join(format!("streamlagd-secret-{}", std::process::id()));
        std::fs::write(&path, "s3cret\n").unwrap();
        let secret = SecretRef::File(path.clone());
        assert_eq!(secret.resolve(&|_| None).unwrap(), "s3cret");
        std::fs::remove_file(path).unwrap();
    }
}
