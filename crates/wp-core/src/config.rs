//! Configuration management
//!
//! 設定は以下の優先順位で読み込まれます:
//! 1. 環境変数
//! 2. wp-gateway.toml 設定ファイル
//! 3. デフォルト値
//!
//! 設定ファイル内では `${VAR_NAME}` 形式で環境変数を展開できます。

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::Error;

/// Default config file name looked up by [`Config::load`]
pub const DEFAULT_CONFIG_FILE: &str = "wp-gateway.toml";

/// Main configuration for wp-gateway
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// HTTP / WebSocket server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Pairing session lifecycle configuration
    #[serde(default)]
    pub session: SessionConfig,

    /// Messaging-library bridge process configuration
    #[serde(default)]
    pub bridge: BridgeConfig,

    /// Credential delivery configuration
    #[serde(default)]
    pub delivery: DeliveryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address
    #[serde(default = "default_host")]
    pub host: String,

    /// Port for the HTTP server
    #[serde(default = "default_port")]
    pub port: u16,

    /// Directory served as static files (browser client)
    #[serde(default = "default_static_dir")]
    pub static_dir: Option<String>,

    /// Bearer token required on API routes (none = open)
    #[serde(default)]
    pub api_key: Option<String>,

    /// Allowed CORS origins. If unset, CORS is permissive
    #[serde(default)]
    pub allowed_origins: Option<Vec<String>>,

    /// Session-creation requests allowed per client per minute
    #[serde(default = "default_rate_limit")]
    pub rate_limit_per_minute: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            static_dir: default_static_dir(),
            api_key: None,
            allowed_origins: None,
            rate_limit_per_minute: default_rate_limit(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Lifetime of a pairing session before it expires
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// How long a completed session directory is kept on disk
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,

    /// Interval of the expiry / retention sweeper
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Root directory for per-session auth state
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    /// Delay between client start and the pairing-code request
    #[serde(default = "default_pairing_delay_ms")]
    pub pairing_delay_ms: u64,

    /// Reconnect attempts after an unexpected disconnect
    #[serde(default = "default_max_reconnects")]
    pub max_reconnects: u32,

    /// How long `POST /pair` waits for the pairing code
    #[serde(default = "default_pair_wait_secs")]
    pub pair_wait_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            retention_secs: default_retention_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            data_dir: default_data_dir(),
            pairing_delay_ms: default_pairing_delay_ms(),
            max_reconnects: default_max_reconnects(),
            pair_wait_secs: default_pair_wait_secs(),
        }
    }
}

impl SessionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        // tokio::time::interval panics on a zero period
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    pub fn pairing_delay(&self) -> Duration {
        Duration::from_millis(self.pairing_delay_ms)
    }

    pub fn pair_wait(&self) -> Duration {
        Duration::from_secs(self.pair_wait_secs)
    }

    pub fn data_path(&self) -> PathBuf {
        PathBuf::from(&self.data_dir)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Executable hosting the messaging library
    #[serde(default = "default_bridge_command")]
    pub command: String,

    /// Arguments passed before `--auth-dir <dir>`
    #[serde(default = "default_bridge_args")]
    pub args: Vec<String>,

    /// Timeout for a single bridge request
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            command: default_bridge_command(),
            args: default_bridge_args(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl BridgeConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// Send the credentials blob to the paired number once connected
    #[serde(default = "default_send_credentials")]
    pub send_credentials: bool,

    /// Unlink the device after the credentials are delivered
    #[serde(default)]
    pub logout_after_delivery: bool,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            send_credentials: default_send_credentials(),
            logout_after_delivery: false,
        }
    }
}

fn default_static_dir() -> Option<String> {
    Some("static".to_string())
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_rate_limit() -> u32 {
    30
}

fn default_timeout_secs() -> u64 {
    30 * 60
}

fn default_retention_secs() -> u64 {
    10 * 60
}

fn default_sweep_interval_secs() -> u64 {
    30
}

fn default_data_dir() -> String {
    "session".to_string()
}

fn default_pairing_delay_ms() -> u64 {
    2000
}

fn default_max_reconnects() -> u32 {
    1
}

fn default_pair_wait_secs() -> u64 {
    60
}

fn default_bridge_command() -> String {
    "node".to_string()
}

fn default_bridge_args() -> Vec<String> {
    vec!["wa-bridge.mjs".to_string()]
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_send_credentials() -> bool {
    true
}

fn parse_list(value: &str, sep: char) -> Vec<String> {
    value
        .split(sep)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn parse_bool(value: &str) -> bool {
    value.to_lowercase() != "false" && value != "0"
}

impl Config {
    /// 設定ファイルから環境変数を展開する
    ///
    /// `${VAR_NAME}` 形式の文字列を環境変数の値に置換します。
    /// 環境変数が存在しない場合は空文字列になります。
    fn expand_env_vars(value: &str) -> String {
        let mut result = String::new();
        let mut chars = value.chars().peekable();

        while let Some(c) = chars.next() {
            if c == '$' && chars.peek() == Some(&'{') {
                chars.next(); // '{' を消費

                let mut var_name = String::new();
                while let Some(c) = chars.next() {
                    if c == '}' {
                        break;
                    }
                    var_name.push(c);
                }

                if let Ok(env_value) = std::env::var(&var_name) {
                    result.push_str(&env_value);
                }
            } else {
                result.push(c);
            }
        }

        result
    }

    /// TOML 設定ファイルから設定を読み込む
    ///
    /// 設定ファイル内の `${VAR_NAME}` は環境変数の値に置換され、
    /// その後、環境変数による上書きが適用されます。
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let path = path.as_ref();

        let toml_content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read config file: {}", e)))?;

        let mut cfg = Self::from_toml_str(&toml_content)?;

        // 既存の環境変数で上書き（環境変数が優先）
        cfg.apply_env_overrides();

        Ok(cfg)
    }

    /// TOML 文字列をパースする (環境変数の上書きなし)
    pub fn from_toml_str(content: &str) -> crate::Result<Self> {
        let expanded_content = Self::expand_env_vars(content);

        toml::from_str(&expanded_content)
            .map_err(|e| Error::Config(format!("Failed to parse TOML: {}", e)))
    }

    /// デフォルトパスから設定を読み込む
    ///
    /// `./wp-gateway.toml` があればそれを使い、
    /// 見つからない場合は環境変数のみで構成します。
    pub fn load() -> crate::Result<Self> {
        if Path::new(DEFAULT_CONFIG_FILE).exists() {
            return Self::from_toml_file(DEFAULT_CONFIG_FILE);
        }

        Self::from_env()
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> crate::Result<Self> {
        let mut cfg = Self::default();
        cfg.apply_env_overrides();
        Ok(cfg)
    }

    /// 環境変数で設定を上書きする
    fn apply_env_overrides(&mut self) {
        // Server 設定
        if let Ok(host) = std::env::var("SERVER_HOST") {
            if !host.is_empty() {
                self.server.host = host;
            }
        }
        for var in ["API_PORT", "PORT"] {
            if let Some(p) = std::env::var(var).ok().and_then(|p| p.parse().ok()) {
                self.server.port = p;
            }
        }
        // 空文字列で静的ファイル配信を無効化
        if let Ok(dir) = std::env::var("STATIC_DIR") {
            self.server.static_dir = Some(dir).filter(|d| !d.is_empty());
        }
        if let Ok(key) = std::env::var("API_KEY") {
            if !key.is_empty() {
                self.server.api_key = Some(key);
            }
        }
        if let Ok(origins) = std::env::var("API_ALLOWED_ORIGINS") {
            self.server.allowed_origins = Some(parse_list(&origins, ','));
        }
        if let Some(n) = env_parse("RATE_LIMIT_PER_MINUTE") {
            self.server.rate_limit_per_minute = n;
        }

        // Session 設定
        if let Some(n) = env_parse("SESSION_TIMEOUT_SECS") {
            self.session.timeout_secs = n;
        }
        if let Some(n) = env_parse("SESSION_RETENTION_SECS") {
            self.session.retention_secs = n;
        }
        if let Some(n) = env_parse("SESSION_SWEEP_INTERVAL_SECS") {
            self.session.sweep_interval_secs = n;
        }
        if let Ok(dir) = std::env::var("SESSION_DIR") {
            if !dir.is_empty() {
                self.session.data_dir = dir;
            }
        }
        if let Some(n) = env_parse("PAIRING_DELAY_MS") {
            self.session.pairing_delay_ms = n;
        }
        if let Some(n) = env_parse("MAX_RECONNECTS") {
            self.session.max_reconnects = n;
        }
        if let Some(n) = env_parse("PAIR_WAIT_SECS") {
            self.session.pair_wait_secs = n;
        }

        // Bridge 設定
        if let Ok(command) = std::env::var("BRIDGE_COMMAND") {
            if !command.is_empty() {
                self.bridge.command = command;
            }
        }
        if let Ok(args) = std::env::var("BRIDGE_ARGS") {
            self.bridge.args = args.split_whitespace().map(str::to_string).collect();
        }
        if let Some(n) = env_parse("BRIDGE_REQUEST_TIMEOUT_SECS") {
            self.bridge.request_timeout_secs = n;
        }

        // Delivery 設定
        if let Ok(send) = std::env::var("SEND_CREDENTIALS") {
            self.delivery.send_credentials = parse_bool(&send);
        }
        if let Ok(logout) = std::env::var("LOGOUT_AFTER_DELIVERY") {
            self.delivery.logout_after_delivery = parse_bool(&logout);
        }
    }

    /// Socket address string for the HTTP listener
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 3000);
        assert_eq!(config.host, "0.0.0.0");
        assert!(config.api_key.is_none());
        assert_eq!(config.static_dir.as_deref(), Some("static"));
        assert_eq!(config.rate_limit_per_minute, 30);
    }

    #[test]
    fn test_session_config_default() {
        let config = SessionConfig::default();
        assert_eq!(config.timeout(), Duration::from_secs(1800));
        assert_eq!(config.pairing_delay(), Duration::from_millis(2000));
        assert_eq!(config.max_reconnects, 1);
        assert_eq!(config.data_dir, "session");
    }

    #[test]
    fn test_sweep_interval_never_zero() {
        let config = SessionConfig {
            sweep_interval_secs: 0,
            ..Default::default()
        };
        assert_eq!(config.sweep_interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_bridge_config_default() {
        let config = BridgeConfig::default();
        assert_eq!(config.command, "node");
        assert_eq!(config.args, vec!["wa-bridge.mjs".to_string()]);
    }

    #[test]
    fn test_expand_env_vars() {
        // テスト用環境変数を設定
        unsafe {
            std::env::set_var("WP_GATEWAY_TEST_VAR", "test_value");
        }

        let result = Config::expand_env_vars("prefix_${WP_GATEWAY_TEST_VAR}_suffix");
        assert_eq!(result, "prefix_test_value_suffix");

        // 存在しない環境変数
        let result = Config::expand_env_vars("prefix_${WP_GATEWAY_NONEXISTENT}_suffix");
        assert_eq!(result, "prefix__suffix");

        unsafe {
            std::env::remove_var("WP_GATEWAY_TEST_VAR");
        }
    }

    #[test]
    fn test_expand_env_vars_no_braces() {
        let result = Config::expand_env_vars("no $vars here");
        assert_eq!(result, "no $vars here");
    }

    #[test]
    fn test_expand_env_vars_empty_name() {
        let result = Config::expand_env_vars("${}_content");
        assert_eq!(result, "_content");
    }

    #[test]
    fn test_toml_config_parsing() {
        let toml_content = r#"
[server]
port = 8080
api_key = "secret"
allowed_origins = ["https://example.com"]

[session]
timeout_secs = 60
data_dir = "/tmp/wp-sessions"
max_reconnects = 3

[bridge]
command = "deno"
args = ["run", "-A", "bridge.ts"]

[delivery]
send_credentials = false
logout_after_delivery = true
"#;

        let config = Config::from_toml_str(toml_content).unwrap();

        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.api_key.as_deref(), Some("secret"));
        assert_eq!(
            config.server.allowed_origins,
            Some(vec!["https://example.com".to_string()])
        );

        assert_eq!(config.session.timeout_secs, 60);
        assert_eq!(config.session.data_dir, "/tmp/wp-sessions");
        assert_eq!(config.session.max_reconnects, 3);
        // 未指定のフィールドはデフォルト値
        assert_eq!(config.session.pairing_delay_ms, 2000);

        assert_eq!(config.bridge.command, "deno");
        assert_eq!(config.bridge.args.len(), 3);

        assert!(!config.delivery.send_credentials);
        assert!(config.delivery.logout_after_delivery);
    }

    #[test]
    fn test_empty_toml_uses_defaults() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.server.static_dir.as_deref(), Some("static"));
        assert_eq!(config.session.timeout_secs, 1800);
        assert!(config.delivery.send_credentials);
        assert!(!config.delivery.logout_after_delivery);
    }

    #[test]
    fn test_invalid_toml() {
        let err = Config::from_toml_str("[server\nport = ").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_parse_list_and_bool() {
        assert_eq!(parse_list("a, b,,c ", ','), vec!["a", "b", "c"]);
        assert!(parse_bool("true"));
        assert!(parse_bool("yes"));
        assert!(!parse_bool("FALSE"));
        assert!(!parse_bool("0"));
    }

    #[test]
    fn test_bind_addr() {
        let config = Config::default();
        assert_eq!(config.bind_addr(), "0.0.0.0:3000");
    }
}
