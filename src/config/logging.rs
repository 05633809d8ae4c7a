use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use super::app::{ConfigError, LogFormat, LoggingConfig};

/// 选择过滤指令：`RUST_LOG` 非空且有效时优先，否则使用配置
pub fn select_directives(
    config: &LoggingConfig,
    rust_log: Option<&str>,
) -> Result<String, ConfigError> {
    if let Some(directives) = rust_log.map(str::trim).filter(|d| !d.is_empty()) {
        if EnvFilter::try_new(directives).is_ok() {
            return Ok(directives.to_string());
        }
    }
    config.filter_directives()
}

/// 初始化日志，`RUST_LOG` 存在时覆盖配置中的级别
pub fn init_tracing(config: &LoggingConfig) -> Result<(), ConfigError> {
    let rust_log = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let directives = select_directives(config, rust_log.as_deref())?;
    let filter = EnvFilter::try_new(&directives)
        .map_err(|e| ConfigError::Invalid(format!("logging: {e}")))?;

    let registry = tracing_subscriber::registry().with(filter);
    let result = match config.format {
        LogFormat::Plain => registry.with(fmt::layer()).try_init(),
        LogFormat::Compact => registry.with(fmt::layer().compact()).try_init(),
        LogFormat::Json => registry.with(fmt::layer().json()).try_init(),
    };

    result.map_err(|e| ConfigError::Invalid(format!("logging: {e}")))
}
