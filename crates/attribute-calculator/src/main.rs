//! IAM 网关属性计算服务
//!
//! 根据声明式规则为各目标系统计算账号属性。

use anyhow::Context;
use calculator::cli::{Cli, CommandRunner, Commands};
use clap::Parser;
use gateway_shared::config::AppConfig;
use gateway_shared::observability;

const SERVICE_NAME: &str = "iam-gateway";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::load(SERVICE_NAME).context("加载服务配置失败")?;
    if let Some(rules) = cli.rules {
        config.rules.path = rules;
    }

    let mut obs_config = config.observability.clone().with_service_name(&config.service_name);
    if let Some(level) = cli.log_level {
        obs_config = obs_config.with_log_level(level);
    }
    // 一次性命令不启动指标导出
    if !matches!(cli.command, Commands::Serve { .. }) {
        obs_config.metrics_enabled = false;
    }
    let _guard = observability::init(&obs_config).await?;

    let runner = CommandRunner::new(config);

    match cli.command {
        Commands::Serve { port, watch } => runner.run_serve(port, watch).await?,
        Commands::Calculate { input, targets, pretty } => runner.run_calculate(&input, targets, pretty)?,
        Commands::Validate => runner.run_validate()?,
    }

    Ok(())
}
