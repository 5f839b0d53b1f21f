//! CLI 命令定义

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// IAM 网关属性计算服务
#[derive(Parser, Debug)]
#[command(name = "iam-gateway")]
#[command(version, about = "IAM 网关目标系统属性计算服务")]
#[command(propagate_version = true)]
pub struct Cli {
    /// 规则文件路径，覆盖配置中的 rules.path
    #[arg(short, long, global = true, env = "GATEWAY_RULES_FILE")]
    pub rules: Option<PathBuf>,

    /// 日志级别 (trace, debug, info, warn, error)，覆盖配置
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// 启动 HTTP 服务
    Serve {
        /// 监听端口，覆盖配置
        #[arg(short, long)]
        port: Option<u16>,

        /// 监听规则文件变更并热更新
        #[arg(long)]
        watch: bool,
    },

    /// 对一个请求文件执行一次计算并输出 JSON
    ///
    /// 请求格式与 POST /calculate 相同：
    /// {"sourceAttributes": {...}, "accountId": ..., "targets": [...]}
    Calculate {
        /// 请求文件路径，`-` 表示从标准输入读取
        #[arg(short, long)]
        input: String,

        /// 只计算指定目标，可重复，覆盖请求中的 targets
        #[arg(short, long = "target")]
        targets: Vec<String>,

        /// 格式化输出
        #[arg(long)]
        pretty: bool,
    },

    /// 校验规则文件并输出目标摘要
    Validate,
}
