use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

// Wire-level constants shared by the gateway and the protocol crate.
pub const DEFAULT_PORT: u16 = 8420;
pub const DEFAULT_BIND: &str = "127.0.0.1";
pub const MAX_PAYLOAD_BYTES: usize = 64 * 1024; // hard cap per WS frame
pub const HANDSHAKE_TIMEOUT_MS: u64 = 10_000; // close if client doesn't auth in 10s

/// Top-level config (relay.toml + RELAY_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RelayConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub magic_link: MagicLinkConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub presence: PresenceConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
    #[serde(default)]
    pub audit: AuditConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// One entry in the rotating bearer-signing key table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SigningKey {
    /// Key id embedded in issued tokens, e.g. `1`.
    pub id: u32,
    /// Hex- or plain-text secret; at least 32 bytes recommended.
    pub secret: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// All keys that may validate a token. Tokens are issued under
    /// `active_key_id`; older keys stay listed until their tokens age out.
    #[serde(default = "default_signing_keys")]
    pub signing_keys: Vec<SigningKey>,
    #[serde(default = "default_active_key_id")]
    pub active_key_id: u32,
    /// Resolve fails once now - last_used exceeds this, token expiry aside.
    #[serde(default = "default_session_idle_ttl")]
    pub session_idle_ttl_secs: u64,
    #[serde(default = "default_session_absolute_ttl")]
    pub session_absolute_ttl_secs: u64,
    /// Consecutive failed logins before lockout.
    #[serde(default = "default_lockout_threshold")]
    pub lockout_threshold: u32,
    #[serde(default = "default_lockout_secs")]
    pub lockout_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            signing_keys: default_signing_keys(),
            active_key_id: default_active_key_id(),
            session_idle_ttl_secs: default_session_idle_ttl(),
            session_absolute_ttl_secs: default_session_absolute_ttl(),
            lockout_threshold: default_lockout_threshold(),
            lockout_secs: default_lockout_secs(),
        }
    }
}

impl AuthConfig {
    pub fn key_secret(&self, id: u32) -> Option<&str> {
        self.signing_keys
            .iter()
            .find(|k| k.id == id)
            .map(|k| k.secret.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MagicLinkConfig {
    /// Base URL the token is appended to when building the emailed link.
    #[serde(default = "default_link_base_url")]
    pub base_url: String,
    /// Generations allowed per (email, purpose) per rolling hour.
    #[serde(default = "default_rate_per_hour")]
    pub rate_per_hour: u32,
    /// Active links per (user, purpose); oldest is evicted beyond this.
    #[serde(default = "default_active_cap")]
    pub active_cap: u32,
    // Per-purpose TTLs (seconds).
    #[serde(default = "default_ttl_login")]
    pub ttl_login_secs: u64,
    #[serde(default = "default_ttl_password_reset")]
    pub ttl_password_reset_secs: u64,
    #[serde(default = "default_ttl_registration")]
    pub ttl_registration_secs: u64,
    #[serde(default = "default_ttl_account_recover")]
    pub ttl_account_recover_secs: u64,
    #[serde(default = "default_ttl_email_verify")]
    pub ttl_email_verify_secs: u64,
}

impl Default for MagicLinkConfig {
    fn default() -> Self {
        Self {
            base_url: default_link_base_url(),
            rate_per_hour: default_rate_per_hour(),
            active_cap: default_active_cap(),
            ttl_login_secs: default_ttl_login(),
            ttl_password_reset_secs: default_ttl_password_reset(),
            ttl_registration_secs: default_ttl_registration(),
            ttl_account_recover_secs: default_ttl_account_recover(),
            ttl_email_verify_secs: default_ttl_email_verify(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Token-bucket capacity per (user, conversation).
    #[serde(default = "default_rate_capacity")]
    pub message_rate_capacity: u32,
    /// Tokens restored per second.
    #[serde(default = "default_rate_refill")]
    pub message_refill_per_sec: u32,
    #[serde(default = "default_max_content_chars")]
    pub max_content_chars: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            message_rate_capacity: default_rate_capacity(),
            message_refill_per_sec: default_rate_refill(),
            max_content_chars: default_max_content_chars(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceConfig {
    /// Outbound frames buffered per connection before the slow-consumer cut.
    #[serde(default = "default_queue_highwater")]
    pub queue_highwater: usize,
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,
    /// Missed-heartbeat grace, as a multiple of the interval.
    #[serde(default = "default_heartbeat_grace")]
    pub heartbeat_grace_multiplier: u32,
    #[serde(default = "default_typing_ttl")]
    pub typing_ttl_secs: u64,
    /// Un-acked message ids retained for replay on reconnect.
    #[serde(default = "default_replay_window_messages")]
    pub replay_window_messages: usize,
    #[serde(default = "default_replay_window_secs")]
    pub replay_window_secs: u64,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            queue_highwater: default_queue_highwater(),
            heartbeat_interval_secs: default_heartbeat_interval(),
            heartbeat_grace_multiplier: default_heartbeat_grace(),
            typing_ttl_secs: default_typing_ttl(),
            replay_window_messages: default_replay_window_messages(),
            replay_window_secs: default_replay_window_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyConfig {
    #[serde(default = "default_notify_queue_size")]
    pub queue_size: usize,
    #[serde(default = "default_worker_pool_size")]
    pub worker_pool_size: usize,
    #[serde(default = "default_retry_initial_delay")]
    pub retry_initial_delay_secs: u64,
    #[serde(default = "default_retry_max_delay")]
    pub retry_max_delay_secs: u64,
    #[serde(default = "default_retry_max_attempts")]
    pub retry_max_attempts: u32,
    /// How often the janitor sweeps expired notifications.
    #[serde(default = "default_janitor_interval")]
    pub janitor_interval_secs: u64,
    #[serde(default)]
    pub channels: ChannelFlags,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            queue_size: default_notify_queue_size(),
            worker_pool_size: default_worker_pool_size(),
            retry_initial_delay_secs: default_retry_initial_delay(),
            retry_max_delay_secs: default_retry_max_delay(),
            retry_max_attempts: default_retry_max_attempts(),
            janitor_interval_secs: default_janitor_interval(),
            channels: ChannelFlags::default(),
        }
    }
}

/// Per-channel enable flags. Live and in-app are always on; the external
/// channels default off until a sender is configured.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ChannelFlags {
    #[serde(default)]
    pub email: bool,
    #[serde(default)]
    pub sms: bool,
    #[serde(default)]
    pub push: bool,
    #[serde(default)]
    pub webhook: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            retention_days: default_retention_days(),
        }
    }
}

fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.relay/relay.db", home)
}
fn default_signing_keys() -> Vec<SigningKey> {
    vec![SigningKey {
        id: 1,
        secret: "change-me-before-production".to_string(),
    }]
}
fn default_active_key_id() -> u32 {
    1
}
fn default_session_idle_ttl() -> u64 {
    30 * 60
}
fn default_session_absolute_ttl() -> u64 {
    24 * 60 * 60
}
fn default_lockout_threshold() -> u32 {
    5
}
fn default_lockout_secs() -> u64 {
    15 * 60
}
fn default_link_base_url() -> String {
    "http://localhost:8420/auth/magic-link/consume".to_string()
}
fn default_rate_per_hour() -> u32 {
    5
}
fn default_active_cap() -> u32 {
    3
}
fn default_ttl_login() -> u64 {
    15 * 60
}
fn default_ttl_password_reset() -> u64 {
    30 * 60
}
fn default_ttl_registration() -> u64 {
    60 * 60
}
fn default_ttl_account_recover() -> u64 {
    60 * 60
}
fn default_ttl_email_verify() -> u64 {
    24 * 60 * 60
}
fn default_rate_capacity() -> u32 {
    10
}
fn default_rate_refill() -> u32 {
    1
}
fn default_max_content_chars() -> usize {
    4000
}
fn default_queue_highwater() -> usize {
    256
}
fn default_heartbeat_interval() -> u64 {
    30
}
fn default_heartbeat_grace() -> u32 {
    2
}
fn default_typing_ttl() -> u64 {
    5
}
fn default_replay_window_messages() -> usize {
    500
}
fn default_replay_window_secs() -> u64 {
    5 * 60
}
fn default_notify_queue_size() -> usize {
    1024
}
fn default_worker_pool_size() -> usize {
    5
}
fn default_retry_initial_delay() -> u64 {
    2
}
fn default_retry_max_delay() -> u64 {
    5 * 60
}
fn default_retry_max_attempts() -> u32 {
    5
}
fn default_janitor_interval() -> u64 {
    60
}
fn default_retention_days() -> u32 {
    90
}

impl RelayConfig {
    /// Load config from a TOML file with RELAY_* env var overrides.
    ///
    /// Checks in order:
    ///   1. Explicit path argument
    ///   2. ./relay.toml
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path.unwrap_or("relay.toml");

        let config: RelayConfig = Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("RELAY_").split("__"))
            .extract()
            .map_err(|e| crate::error::CoreError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that cannot possibly run.
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.auth.signing_keys.is_empty() {
            return Err(crate::error::CoreError::Config(
                "auth.signing_keys must not be empty".to_string(),
            ));
        }
        if self.auth.key_secret(self.auth.active_key_id).is_none() {
            return Err(crate::error::CoreError::Config(format!(
                "auth.active_key_id {} is not in auth.signing_keys",
                self.auth.active_key_id
            )));
        }
        if self.notify.worker_pool_size == 0 {
            return Err(crate::error::CoreError::Config(
                "notify.worker_pool_size must be at least 1".to_string(),
            ));
        }
        if self.limits.message_rate_capacity == 0 || self.limits.message_refill_per_sec == 0 {
            return Err(crate::error::CoreError::Config(
                "limits.message_rate_capacity and refill must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        RelayConfig::default().validate().unwrap();
    }

    #[test]
    fn active_key_must_exist() {
        let mut cfg = RelayConfig::default();
        cfg.auth.active_key_id = 99;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn purpose_ttl_defaults_match_policy() {
        let cfg = MagicLinkConfig::default();
        assert_eq!(cfg.ttl_login_secs, 15 * 60);
        assert_eq!(cfg.ttl_password_reset_secs, 30 * 60);
        assert_eq!(cfg.ttl_email_verify_secs, 24 * 60 * 60);
    }
}
