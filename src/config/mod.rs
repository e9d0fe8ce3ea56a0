use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use config::{Config, ConfigError, File, FileFormat};
use serde::Deserialize;

use crate::waitlist::canonical_wallet;

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub admin: AdminConfig,
    #[serde(default)]
    pub rewards: RewardsConfig,
    pub cache: CacheConfig,
    #[serde(default)]
    pub realtime: RealtimeConfig,
}

impl ApiConfig {
    pub fn load() -> Result<Self> {
        let configured_path =
            std::env::var("REVA_API_CONFIG").unwrap_or_else(|_| "config/api.toml".to_string());
        assert!(
            !configured_path.is_empty(),
            "Configuration path must be non-empty"
        );

        let mut builder = Config::builder()
            .add_source(File::new(&configured_path, FileFormat::Toml).required(true));

        if let Ok(env_override) = std::env::var("REVA_API_ENV") {
            if !env_override.is_empty() {
                let env_file = format!("config/api.{}.toml", env_override);
                if Path::new(&env_file).exists() {
                    builder = builder.add_source(File::new(&env_file, FileFormat::Toml));
                }
            }
        }

        let settings = builder
            .build()
            .map_err(|err| map_config_error(err, &configured_path))?;
        Self::from_settings(settings)
    }

    fn from_settings(settings: Config) -> Result<Self> {
        let mut config: Self = settings
            .try_deserialize()
            .context("Failed to deserialize API configuration")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&mut self) -> Result<()> {
        if self.database.url.is_empty() {
            bail!("Database URL must be specified");
        }
        if self.server.port == 0 {
            bail!("Server port must be greater than zero");
        }
        if self.database.max_connections < self.database.min_connections.unwrap_or(1) {
            bail!("Max connections must be >= min connections");
        }
        if self.database.max_connections > 128 {
            bail!("Connection pool oversized");
        }
        self.admin.wallet =
            canonical_wallet(&self.admin.wallet).context("Invalid admin wallet address")?;
        self.rewards.ensure_bounds()?;
        self.cache.ensure_bounds()?;
        self.realtime.ensure_bounds()?;
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: Option<IpAddr>,
    pub port: u16,
}

impl ServerConfig {
    pub fn address(&self) -> SocketAddr {
        let host = self.host.unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST));
        SocketAddr::new(host, self.port)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AdminConfig {
    /// The single wallet allowed to manage quests and points.
    pub wallet: String,
    /// Public site URL used to build `?ref=` invite links.
    #[serde(default = "AdminConfig::default_site_url")]
    pub site_url: String,
}

impl AdminConfig {
    fn default_site_url() -> String {
        "https://noxara.xyz".to_string()
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct RewardsConfig {
    pub starting_points: i64,
    pub referral_bonus: i64,
    pub default_quest_reward: i64,
}

impl Default for RewardsConfig {
    fn default() -> Self {
        Self {
            starting_points: 10_000,
            referral_bonus: 2_500,
            default_quest_reward: 200,
        }
    }
}

impl RewardsConfig {
    fn ensure_bounds(&self) -> Result<()> {
        if self.starting_points < 0 {
            bail!("Starting points cannot be negative");
        }
        if self.referral_bonus < 0 {
            bail!("Referral bonus cannot be negative");
        }
        if self.default_quest_reward <= 0 {
            bail!("Default quest reward must be positive");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    pub users_max_capacity: u64,
    pub users_ttl_seconds: u64,
    pub referrals_max_capacity: u64,
    pub referrals_ttl_seconds: u64,
    #[serde(default = "CacheConfig::default_session_idle_seconds")]
    pub sessions_idle_seconds: u64,
    #[serde(default = "CacheConfig::default_sessions_max_capacity")]
    pub sessions_max_capacity: u64,
    /// When set, visit flags of each session are persisted as JSON files here.
    pub sessions_dir: Option<PathBuf>,
}

impl CacheConfig {
    fn ensure_bounds(&self) -> Result<()> {
        if self.users_max_capacity < 100 {
            bail!("User cache capacity must be at least 100");
        }
        if self.users_ttl_seconds > 86_400 || self.referrals_ttl_seconds > 86_400 {
            bail!("Cache TTL cannot exceed one day");
        }
        if self.sessions_idle_seconds == 0 {
            bail!("Session idle timeout must be positive");
        }
        Ok(())
    }

    pub fn users_ttl(&self) -> Duration {
        Duration::from_secs(self.users_ttl_seconds)
    }

    pub fn referrals_ttl(&self) -> Duration {
        Duration::from_secs(self.referrals_ttl_seconds)
    }

    pub fn sessions_idle(&self) -> Duration {
        Duration::from_secs(self.sessions_idle_seconds)
    }

    const fn default_session_idle_seconds() -> u64 {
        7 * 86_400
    }

    const fn default_sessions_max_capacity() -> u64 {
        100_000
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct RealtimeConfig {
    pub channel_capacity: usize,
    pub page_size: u64,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 1024,
            page_size: 100,
        }
    }
}

impl RealtimeConfig {
    fn ensure_bounds(&self) -> Result<()> {
        if self.channel_capacity == 0 {
            bail!("Change channel capacity must be positive");
        }
        if self.page_size == 0 || self.page_size > 1_000 {
            bail!("Page size must be within 1..=1000");
        }
        Ok(())
    }
}

fn map_config_error(err: ConfigError, path: &str) -> ConfigError {
    match err {
        ConfigError::NotFound(_) => ConfigError::NotFound(path.to_string()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [server]
        port = 8080

        [database]
        url = "sqlite::memory:"
        max_connections = 4

        [admin]
        wallet = "0x6bA6285C16880fbACED253C48B5F575C429fD884"

        [cache]
        users_max_capacity = 1000
        users_ttl_seconds = 30
        referrals_max_capacity = 1000
        referrals_ttl_seconds = 30
    "#;

    fn parse(source: &str) -> Result<ApiConfig> {
        let settings = Config::builder()
            .add_source(File::from_str(source, FileFormat::Toml))
            .build()?;
        ApiConfig::from_settings(settings)
    }

    #[test]
    fn defaults_match_launch_rewards() {
        let config = parse(SAMPLE).expect("sample config parses");
        assert_eq!(config.rewards.starting_points, 10_000);
        assert_eq!(config.rewards.referral_bonus, 2_500);
        assert_eq!(config.realtime.page_size, 100);
        assert_eq!(
            config.admin.wallet,
            "0x6ba6285c16880fbaced253c48b5f575c429fd884"
        );
        assert_eq!(config.server.address().port(), 8080);
    }

    #[test]
    fn zero_port_is_rejected() {
        let source = SAMPLE.replace("port = 8080", "port = 0");
        assert!(parse(&source).is_err());
    }

    #[test]
    fn negative_bonus_is_rejected() {
        let source = format!("{SAMPLE}\n[rewards]\nreferral_bonus = -1\n");
        assert!(parse(&source).is_err());
    }
}
