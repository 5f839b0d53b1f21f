//! 命令执行器

use std::io::Read as _;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use gateway_shared::config::AppConfig;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::engine::CalculatorOptions;
use crate::http::{AppState, router};
use crate::models::{EvaluationContext, RuleSet};
use crate::store::RuleStore;
use crate::template::UndefinedBehavior;
use crate::watcher::{FileRulesWatcher, RulesWatcher};

/// 命令执行器，持有合并了命令行覆盖项的配置
pub struct CommandRunner {
    config: AppConfig,
}

impl CommandRunner {
    pub fn new(config: AppConfig) -> Self {
        Self { config }
    }

    fn rules_path(&self) -> &Path {
        &self.config.rules.path
    }

    fn calculator_options(&self) -> CalculatorOptions {
        CalculatorOptions {
            undefined: if self.config.rules.strict_undefined {
                UndefinedBehavior::Strict
            } else {
                UndefinedBehavior::Lenient
            },
        }
    }

    /// 加载规则存储，规则无效时不能提供服务
    fn load_store(&self) -> Result<RuleStore> {
        let store = RuleStore::from_file(self.rules_path())
            .with_context(|| format!("加载规则文件失败: {}", self.rules_path().display()))?
            .with_options(self.calculator_options());
        Ok(store)
    }

    /// 执行 serve 命令
    pub async fn run_serve(&self, port: Option<u16>, watch: bool) -> Result<()> {
        let store = self.load_store()?;
        info!(
            path = %self.rules_path().display(),
            targets = store.load().target_count(),
            "规则集已加载"
        );

        let watcher = if watch || self.config.rules.watch {
            let watcher = FileRulesWatcher::new(
                self.rules_path(),
                Duration::from_millis(self.config.rules.debounce_ms),
                store.clone(),
            );
            watcher.start().await?;
            Some(watcher)
        } else {
            None
        };

        let state = AppState::new(store, &self.config.service_name);
        let app = router(state, Duration::from_secs(self.config.server.request_timeout_seconds));

        let addr = match port {
            Some(port) => format!("{}:{}", self.config.server.host, port),
            None => self.config.server_addr(),
        };
        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("绑定地址失败: {}", addr))?;
        info!("Listening on {}", addr);

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .context("服务器运行失败")?;

        if let Some(watcher) = watcher {
            watcher.stop().await?;
        }

        info!("Server shutdown complete");
        Ok(())
    }

    /// 执行 calculate 命令
    pub fn run_calculate(&self, input: &str, targets: Vec<String>, pretty: bool) -> Result<()> {
        let raw = read_input(input)?;
        let mut request: EvaluationContext = serde_json::from_str(&raw).context("请求 JSON 格式无效")?;
        if !targets.is_empty() {
            request.targets = Some(targets);
        }

        let calculator = self.load_store()?.calculator();
        let result = calculator.evaluate(&request)?;

        let output = if pretty {
            serde_json::to_string_pretty(&result)?
        } else {
            serde_json::to_string(&result)?
        };
        println!("{}", output);
        Ok(())
    }

    /// 执行 validate 命令
    ///
    /// 除结构校验外，还检查每个模板能否编译；存在无法编译的公式时返回错误。
    pub fn run_validate(&self) -> Result<()> {
        let path = self.rules_path();
        let rule_set =
            RuleSet::from_file(path).with_context(|| format!("规则文件无效: {}", path.display()))?;

        println!("规则文件有效: {}", path.display());
        println!("{}", "-".repeat(48));

        let mut broken = 0;
        for (name, target) in rule_set.targets() {
            let dynamic = target.rules().values().filter(|f| f.is_dynamic()).count();
            println!(
                "  {:<16} {} 个模板属性, {} 个字面量属性, {} 个元数据项",
                name,
                dynamic,
                target.rules().len() - dynamic,
                target.metadata().len()
            );

            for (attribute, formula) in target.rules() {
                if let Some(e) = formula.compile_error() {
                    broken += 1;
                    println!("    ✗ {}: {}", attribute, e);
                }
            }
        }
        println!("{}", "-".repeat(48));
        println!("目标数量: {}", rule_set.target_count());
        println!("全局常量: {}", rule_set.globals().len());

        let empty: Vec<&str> = rule_set
            .targets()
            .filter(|(_, target)| target.is_empty())
            .map(|(name, _)| name)
            .collect();
        if !empty.is_empty() {
            warn!(targets = ?empty, "部分目标没有配置 rules");
        }

        if broken > 0 {
            anyhow::bail!("{} 个属性的模板无法编译", broken);
        }
        Ok(())
    }
}

fn read_input(input: &str) -> Result<String> {
    if input == "-" {
        let mut raw = String::new();
        std::io::stdin().read_to_string(&mut raw).context("读取标准输入失败")?;
        return Ok(raw);
    }
    std::fs::read_to_string(input).with_context(|| format!("读取请求文件失败: {}", input))
}

/// 监听关闭信号
///
/// K8s 通过 SIGTERM 通知 Pod 停止，本地开发通过 Ctrl+C。
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "注册 Ctrl+C 处理器失败");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "注册 SIGTERM 处理器失败");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, initiating graceful shutdown..."),
        _ = terminate => info!("Received SIGTERM, initiating graceful shutdown..."),
    }
}
