use std::path::Path;

use auth_server_sqlite::config::{AppConfig, LogFormat};
use chrono::Duration;
use pretty_assertions::assert_eq;

#[test]
fn loads_bundled_deployment_config() {
    std::env::set_var("APP_HOST", "127.0.0.1");
    std::env::set_var("APP_PORT", "10001");
    std::env::set_var("APP_TLS_IS_ENABLED", "false");
    std::env::set_var("JWT_SECRET", "trustno1");
    std::env::set_var("LOG_LEVEL", "DEBUG");
    std::env::set_var("LOG_ROOT_LEVEL", "WARNING");

    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("etc/config.yaml");
    let config = AppConfig::load(&path).unwrap();

    assert_eq!(config.socket_addr().unwrap().to_string(), "127.0.0.1:10001");
    assert!(config.tls().is_none());
    assert_eq!(config.app.route_prefix(), Some("/auth/api".to_string()));
    assert_eq!(config.jwt.secret, "trustno1");
    assert_eq!(config.jwt.expiry, Duration::minutes(20));
    assert_eq!(config.cookie.expiry, Duration::hours(1));
    assert_eq!(config.sql.connect_url(), "sqlite://auth.db");
    assert_eq!(config.logging.format, LogFormat::Plain);
    assert_eq!(
        config.logging.filter_directives().unwrap(),
        "warn,auth_server_sqlite=debug,tower_http=debug"
    );
}
