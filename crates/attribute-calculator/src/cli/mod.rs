//! CLI 模块
//!
//! - `serve` - 启动 HTTP 服务
//! - `calculate` - 对请求文件执行一次计算
//! - `validate` - 校验规则文件
//!
//! # 使用示例
//!
//! ```bash
//! iam-gateway --rules config/rules.yaml serve --watch
//! echo '{"sourceAttributes": {"firstname": "Jean", "lastname": "Dupont"}, "accountId": 1}' \
//!     | iam-gateway calculate --input - --target LDAP
//! iam-gateway validate
//! ```

pub mod commands;
pub mod runner;

pub use commands::{Cli, Commands};
pub use runner::CommandRunner;
