pub mod app;
pub mod duration;
pub mod expand;
pub mod logging;

pub use app::AppConfig;
pub use app::ConfigError;
pub use app::CookieConfig;
pub use app::CorsConfig;
pub use app::JwtConfig;
pub use app::LogFormat;
pub use app::LoggingConfig;
pub use app::ServerConfig;
pub use app::SqlConfig;
pub use app::TlsConfig;
pub use duration::parse_duration;
pub use logging::init_tracing;
