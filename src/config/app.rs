use chrono::Duration;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

use super::expand::{expand_home, expand_tree};

/// 配置加载错误
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration: {0}")]
    Load(#[from] config::ConfigError),
    #[error("invalid configuration: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
    #[error("invalid bind address {0}")]
    Address(String),
}

/// 应用程序配置
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// 服务器地址、端口和TLS
    pub app: ServerConfig,
    /// 会话Cookie
    pub cookie: CookieConfig,
    /// JWT签名参数
    pub jwt: JwtConfig,
    /// 数据库配置
    pub sql: SqlConfig,
    /// 日志配置
    #[serde(default, alias = "log")]
    pub logging: LoggingConfig,
}

/// 服务器配置
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// 服务器主机地址
    pub host: String,
    /// 服务器端口
    #[serde(deserialize_with = "de::number")]
    pub port: u16,
    /// TLS配置（可选）
    #[serde(default)]
    pub tls: Option<TlsConfig>,
    /// 路由前缀
    #[serde(default)]
    pub path_prefix: String,
    /// CORS配置
    #[serde(default)]
    pub cors: CorsConfig,
}

/// TLS配置
#[derive(Debug, Clone, Deserialize)]
pub struct TlsConfig {
    #[serde(default, deserialize_with = "de::flag")]
    pub is_enabled: bool,
    #[serde(default)]
    pub certfile: Option<String>,
    #[serde(default)]
    pub keyfile: Option<String>,
}

/// CORS配置
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CorsConfig {
    /// 允许的来源，为空时不做限制
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

/// 会话Cookie配置
#[derive(Debug, Clone, Deserialize)]
pub struct CookieConfig {
    pub name: String,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default = "default_cookie_path")]
    pub path: String,
    /// 会话有效期 (ISO 8601)
    #[serde(deserialize_with = "de::duration")]
    pub expiry: Duration,
}

/// JWT配置
#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    /// JWT密钥
    pub secret: String,
    /// 签发者
    pub issuer: String,
    /// 令牌有效期 (ISO 8601)
    #[serde(deserialize_with = "de::duration")]
    pub expiry: Duration,
}

/// 数据库配置 - SQLite版本
#[derive(Debug, Clone, Deserialize)]
pub struct SqlConfig {
    /// 数据库URL (sqlite://auth.db 或 sqlite+aiosqlite:///auth.db)
    pub url: String,
    /// 最大连接数
    #[serde(default = "default_max_connections", deserialize_with = "de::number")]
    pub max_connections: u32,
    /// 初始管理员账号
    #[serde(default)]
    pub admin: AdminConfig,
}

/// 管理员配置
#[derive(Debug, Clone, Deserialize)]
pub struct AdminConfig {
    #[serde(default = "default_admin")]
    pub username: String,
    #[serde(default = "default_admin")]
    pub password: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            username: default_admin(),
            password: default_admin(),
        }
    }
}

/// 日志输出格式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Plain,
    Compact,
    Json,
}

/// 日志配置
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub format: LogFormat,
    /// 根日志级别
    #[serde(default = "default_log_level")]
    pub level: String,
    /// 各模块日志级别
    #[serde(default)]
    pub loggers: BTreeMap<String, String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::default(),
            level: default_log_level(),
            loggers: BTreeMap::new(),
        }
    }
}

fn default_cookie_path() -> String {
    "/".to_string()
}

fn default_max_connections() -> u32 {
    5
}

fn default_admin() -> String {
    "admin".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl AppConfig {
    /// 从YAML配置文件加载
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let source = config::Config::builder()
            .add_source(config::File::from(path.as_ref()).format(config::FileFormat::Yaml))
            .build()?;
        Self::from_source(source)
    }

    /// 从YAML文本加载
    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        let source = config::Config::builder()
            .add_source(config::File::from_str(text, config::FileFormat::Yaml))
            .build()?;
        Self::from_source(source)
    }

    fn from_source(source: config::Config) -> Result<Self, ConfigError> {
        let tree: Value = source.try_deserialize()?;
        let config: Self = serde_json::from_value(expand_tree(tree))?;
        config.validate()?;
        Ok(config)
    }

    /// 检查必填字段和相互依赖的字段
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.jwt.secret.trim().is_empty() {
            return Err(ConfigError::Invalid("jwt.secret must not be empty".into()));
        }
        if self.jwt.issuer.trim().is_empty() {
            return Err(ConfigError::Invalid("jwt.issuer must not be empty".into()));
        }
        if self.jwt.expiry <= Duration::zero() {
            return Err(ConfigError::Invalid("jwt.expiry must be positive".into()));
        }
        if self.cookie.name.trim().is_empty() {
            return Err(ConfigError::Invalid("cookie.name must not be empty".into()));
        }
        if self.cookie.expiry <= Duration::zero() {
            return Err(ConfigError::Invalid("cookie.expiry must be positive".into()));
        }
        if let Some(tls) = self.app.tls.as_ref().filter(|tls| tls.is_enabled) {
            if tls.certfile.as_deref().map_or(true, str::is_empty) {
                return Err(ConfigError::Invalid(
                    "app.tls.certfile is required when TLS is enabled".into(),
                ));
            }
            if tls.keyfile.as_deref().map_or(true, str::is_empty) {
                return Err(ConfigError::Invalid(
                    "app.tls.keyfile is required when TLS is enabled".into(),
                ));
            }
        }
        if self.sql.url.trim().is_empty() {
            return Err(ConfigError::Invalid("sql.url must not be empty".into()));
        }
        if self.sql.max_connections == 0 {
            return Err(ConfigError::Invalid("sql.max_connections must be at least 1".into()));
        }
        self.logging.env_filter()?;
        Ok(())
    }

    /// 获取Socket地址
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        let address = format!("{}:{}", self.app.host, self.app.port);
        if let Ok(addr) = address.parse() {
            return Ok(addr);
        }
        (self.app.host.as_str(), self.app.port)
            .to_socket_addrs()
            .ok()
            .and_then(|mut addrs| addrs.next())
            .ok_or(ConfigError::Address(address))
    }

    /// 是否启用TLS
    pub fn tls(&self) -> Option<&TlsConfig> {
        self.app.tls.as_ref().filter(|tls| tls.is_enabled)
    }
}

impl ServerConfig {
    /// 规范化后的路由前缀，空前缀返回 None
    pub fn route_prefix(&self) -> Option<String> {
        let trimmed = self.path_prefix.trim().trim_end_matches('/');
        if trimmed.is_empty() {
            None
        } else if trimmed.starts_with('/') {
            Some(trimmed.to_string())
        } else {
            Some(format!("/{trimmed}"))
        }
    }
}

impl TlsConfig {
    pub fn certfile_path(&self) -> Option<PathBuf> {
        self.certfile.as_deref().map(expand_home)
    }

    pub fn keyfile_path(&self) -> Option<PathBuf> {
        self.keyfile.as_deref().map(expand_home)
    }
}

impl SqlConfig {
    /// 转换为sqlx可识别的连接URL
    ///
    /// `sqlite+<driver>:///path` 按 SQLAlchemy 的约定解析，其余原样返回。
    pub fn connect_url(&self) -> String {
        let url = self.url.trim();
        let Some(rest) = url.strip_prefix("sqlite+") else {
            return url.to_string();
        };
        let Some((_, after_scheme)) = rest.split_once(':') else {
            return url.to_string();
        };
        let path = after_scheme
            .strip_prefix("///")
            .or_else(|| after_scheme.strip_prefix("//"))
            .unwrap_or(after_scheme);
        if path.is_empty() || path == ":memory:" {
            "sqlite::memory:".to_string()
        } else {
            format!("sqlite://{path}")
        }
    }

    /// 是否为内存数据库
    pub fn is_memory(&self) -> bool {
        let url = self.connect_url();
        url.contains(":memory:") || url.contains("mode=memory")
    }
}

impl LoggingConfig {
    /// 生成 tracing 过滤指令，例如 `info,auth_server_sqlite=debug`
    pub fn filter_directives(&self) -> Result<String, ConfigError> {
        let mut directives = vec![normalize_level(&self.level)?];
        for (target, level) in &self.loggers {
            directives.push(format!(
                "{}={}",
                target.replace('.', "::"),
                normalize_level(level)?
            ));
        }
        Ok(directives.join(","))
    }

    /// 根据配置构建过滤器
    pub fn env_filter(&self) -> Result<EnvFilter, ConfigError> {
        EnvFilter::try_new(self.filter_directives()?)
            .map_err(|e| ConfigError::Invalid(format!("logging: {e}")))
    }
}

/// 将常见的日志级别写法转换为 tracing 级别
fn normalize_level(level: &str) -> Result<String, ConfigError> {
    let level = level.trim().to_ascii_lowercase();
    let level = match level.as_str() {
        "warning" => "warn",
        "critical" | "fatal" => "error",
        "notset" | "" => "trace",
        other => other,
    };
    level
        .parse::<LevelFilter>()
        .map(|_| level.to_string())
        .map_err(|_| ConfigError::Invalid(format!("logging: unknown level \"{level}\"")))
}

mod de {
    use serde::de::{Deserializer, Error};
    use serde::Deserialize;
    use std::fmt::Display;
    use std::str::FromStr;

    use crate::config::duration::parse_duration;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Scalar<T> {
        Native(T),
        Text(String),
    }

    /// 数字既可以是原生值，也可以是环境变量展开后的字符串
    pub fn number<'de, D, T>(deserializer: D) -> Result<T, D::Error>
    where
        D: Deserializer<'de>,
        T: Deserialize<'de> + FromStr,
        T::Err: Display,
    {
        match Scalar::<T>::deserialize(deserializer)? {
            Scalar::Native(value) => Ok(value),
            Scalar::Text(text) => text.trim().parse().map_err(D::Error::custom),
        }
    }

    pub fn flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Scalar::<bool>::deserialize(deserializer)? {
            Scalar::Native(value) => Ok(value),
            // 未展开的 `$VAR` 等其余文本都视为 false
            Scalar::Text(text) => Ok(matches!(
                text.trim().to_ascii_lowercase().as_str(),
                "true" | "yes" | "on" | "1"
            )),
        }
    }

    pub fn duration<'de, D>(deserializer: D) -> Result<chrono::Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let text = String::deserialize(deserializer)?;
        parse_duration(text.trim()).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SAMPLE: &str = r#"
app:
  host: 127.0.0.1
  port: 10001
  path_prefix: /auth/api/
cookie:
  name: auth-token
  domain: example.com
  path: /
  expiry: P1D
jwt:
  secret: trustno1
  issuer: example.com
  expiry: PT1H
sql:
  url: sqlite+aiosqlite:///auth.db
logging:
  format: json
  level: WARNING
  loggers:
    auth_server_sqlite: debug
"#;

    #[test]
    fn loads_sample_configuration() {
        let config = AppConfig::from_yaml_str(SAMPLE).unwrap();
        assert_eq!(config.app.host, "127.0.0.1");
        assert_eq!(config.app.port, 10001);
        assert!(config.app.tls.is_none());
        assert_eq!(config.app.route_prefix(), Some("/auth/api".to_string()));
        assert_eq!(config.cookie.domain.as_deref(), Some("example.com"));
        assert_eq!(config.cookie.expiry, Duration::days(1));
        assert_eq!(config.jwt.expiry, Duration::hours(1));
        assert_eq!(config.sql.connect_url(), "sqlite://auth.db");
        assert_eq!(config.sql.max_connections, 5);
        assert_eq!(config.sql.admin.username, "admin");
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(
            config.logging.filter_directives().unwrap(),
            "warn,auth_server_sqlite=debug"
        );
        assert_eq!(
            config.socket_addr().unwrap(),
            "127.0.0.1:10001".parse::<SocketAddr>().unwrap()
        );
    }

    #[test]
    fn substitutes_environment_variables() {
        std::env::set_var("AUTH_CFG_TEST_PORT", "10042");
        std::env::set_var("AUTH_CFG_TEST_TLS", "true");
        let text = SAMPLE.replace("port: 10001", "port: $AUTH_CFG_TEST_PORT").replace(
            "  path_prefix: /auth/api/",
            "  path_prefix: /auth/api/\n  tls:\n    is_enabled: ${AUTH_CFG_TEST_TLS}\n    certfile: /etc/cert.pem\n    keyfile: /etc/key.pem",
        );
        let config = AppConfig::from_yaml_str(&text).unwrap();
        assert_eq!(config.app.port, 10042);
        let tls = config.tls().unwrap();
        assert_eq!(tls.certfile_path(), Some(PathBuf::from("/etc/cert.pem")));
        assert_eq!(tls.keyfile_path(), Some(PathBuf::from("/etc/key.pem")));
    }

    #[test]
    fn unset_tls_flag_disables_tls() {
        std::env::remove_var("AUTH_CFG_TEST_UNSET_TLS");
        let text = SAMPLE.replace(
            "  path_prefix: /auth/api/",
            "  path_prefix: /auth/api/\n  tls:\n    is_enabled: $AUTH_CFG_TEST_UNSET_TLS",
        );
        let config = AppConfig::from_yaml_str(&text).unwrap();
        assert!(config.app.tls.is_some());
        assert!(config.tls().is_none());

        let text = SAMPLE.replace(
            "  path_prefix: /auth/api/",
            "  path_prefix: /auth/api/\n  tls:\n    is_enabled: \"nope\"",
        );
        assert!(AppConfig::from_yaml_str(&text).unwrap().tls().is_none());
    }

    #[test]
    fn rejects_tls_without_key_material() {
        let text = SAMPLE.replace(
            "  path_prefix: /auth/api/",
            "  path_prefix: /auth/api/\n  tls:\n    is_enabled: true",
        );
        let error = AppConfig::from_yaml_str(&text).unwrap_err();
        assert!(matches!(error, ConfigError::Invalid(message) if message.contains("certfile")));
    }

    #[test]
    fn rejects_empty_secret_and_bad_duration() {
        let text = SAMPLE.replace("secret: trustno1", "secret: \"\"");
        assert!(matches!(
            AppConfig::from_yaml_str(&text),
            Err(ConfigError::Invalid(_))
        ));

        let text = SAMPLE.replace("expiry: PT1H", "expiry: one hour");
        assert!(matches!(
            AppConfig::from_yaml_str(&text),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn rejects_unknown_log_level() {
        let text = SAMPLE.replace("level: WARNING", "level: verbose");
        assert!(matches!(
            AppConfig::from_yaml_str(&text),
            Err(ConfigError::Invalid(message)) if message.contains("verbose")
        ));
    }

    #[test]
    fn normalizes_sql_urls() {
        let sql = |url: &str| SqlConfig {
            url: url.to_string(),
            max_connections: 1,
            admin: AdminConfig::default(),
        };
        assert_eq!(
            sql("sqlite+aiosqlite:////var/lib/auth.db").connect_url(),
            "sqlite:///var/lib/auth.db"
        );
        assert_eq!(sql("sqlite+aiosqlite://").connect_url(), "sqlite::memory:");
        assert_eq!(
            sql("sqlite+aiosqlite:///:memory:").connect_url(),
            "sqlite::memory:"
        );
        assert_eq!(
            sql("sqlite://auth.db?mode=rwc").connect_url(),
            "sqlite://auth.db?mode=rwc"
        );
        assert!(sql("sqlite::memory:").is_memory());
        assert!(!sql("sqlite://auth.db").is_memory());
    }

    #[test]
    fn empty_prefix_mounts_at_root() {
        let mut config = AppConfig::from_yaml_str(SAMPLE).unwrap();
        config.app.path_prefix = "/".to_string();
        assert_eq!(config.app.route_prefix(), None);
        config.app.path_prefix = "auth".to_string();
        assert_eq!(config.app.route_prefix(), Some("/auth".to_string()));
    }
}
