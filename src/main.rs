use std::path::PathBuf;

use auth_server_sqlite::{
    config::{init_tracing, AppConfig},
    server,
};
use clap::Parser;
use tracing::info;

/// 基于SQLite的JWT认证服务器
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// YAML配置文件路径
    #[arg(short = 'f', long = "config-file", env = "AUTH_SERVER_CONFIG")]
    config_file: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env 中的变量可用于配置文件中的 ${VAR}
    dotenv::dotenv().ok();
    let args = Args::parse();

    // 加载配置
    let config = AppConfig::load(&args.config_file)?;

    // 初始化日志
    init_tracing(&config.logging)?;

    info!("应用启动中...");
    info!("配置文件: {}", args.config_file.display());

    server::run(config).await
}
