use clap::{Parser, Subcommand};

impl Cli {
    /// 解析命令行参数
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }
}

/// chatfeed - 基于消息代理中继的实时聊天推送服务
#[derive(Parser, Debug, Default)]
#[command(name = "chatfeed")]
#[command(version)]
#[command(about = "消息变更经代理中继后实时推送给会话参与者", long_about = None)]
pub struct Cli {
    /// 配置文件路径
    #[arg(long, value_name = "FILE", help = "指定配置文件路径")]
    pub config_file: Option<String>,

    /// 服务器监听地址
    #[arg(long, value_name = "ADDRESS", help = "服务器监听地址")]
    pub host: Option<String>,

    /// HTTP 端口
    #[arg(long, value_name = "PORT", help = "HTTP 端口")]
    pub port: Option<u16>,

    /// 消息代理 URL
    #[arg(long, value_name = "URL", help = "amqp://... 或 memory://")]
    pub broker_url: Option<String>,

    /// 数据库连接 URL
    #[arg(long, value_name = "URL", help = "数据库连接字符串（不配置则使用内存存储）")]
    pub database_url: Option<String>,

    /// CORS 允许的来源
    #[arg(long, value_name = "ORIGIN", help = "允许跨域访问的前端地址")]
    pub cors_origin: Option<String>,

    /// JWT 密钥
    #[arg(long, value_name = "SECRET", help = "JWT 签名密钥")]
    pub jwt_secret: Option<String>,

    /// 日志级别
    #[arg(
        long,
        value_name = "LEVEL",
        help = "日志级别: trace, debug, info, warn, error"
    )]
    pub log_level: Option<String>,

    /// 日志格式
    #[arg(long, value_name = "FORMAT", help = "日志格式: pretty, json, compact")]
    pub log_format: Option<String>,

    /// 日志文件路径
    #[arg(long, value_name = "PATH", help = "日志输出文件路径（按天滚动）")]
    pub log_file: Option<String>,

    /// 详细输出（可重复使用：-v, -vv, -vvv）
    #[arg(short, action = clap::ArgAction::Count, help = "详细输出级别")]
    pub verbose: u8,

    /// 静默模式
    #[arg(long, short = 'q', help = "静默模式（只输出错误）")]
    pub quiet: bool,

    /// 开发模式（等同于 --log-level debug --log-format pretty）
    #[arg(long, help = "启用开发模式")]
    pub dev: bool,

    /// 子命令
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// 生成默认配置文件
    GenerateConfig {
        /// 输出文件路径
        #[arg(value_name = "PATH", default_value = "config.toml")]
        path: String,
    },
    /// 验证配置文件
    ValidateConfig {
        /// 配置文件路径
        #[arg(value_name = "PATH", default_value = "config.toml")]
        path: String,
    },
    /// 显示最终配置（合并后的配置）
    ShowConfig,
    /// 执行数据库迁移
    Migrate,
}

impl Cli {
    /// 获取日志级别（考虑 verbose 和 quiet）
    pub fn get_log_level(&self) -> Option<String> {
        if self.quiet {
            return Some("error".to_string());
        }

        if self.dev {
            return Some("debug".to_string());
        }

        if let Some(level) = &self.log_level {
            return Some(level.clone());
        }

        match self.verbose {
            0 => None, // 使用默认或配置文件
            1 => Some("info".to_string()),
            2 => Some("debug".to_string()),
            _ => Some("trace".to_string()),
        }
    }

    /// 获取日志格式
    pub fn get_log_format(&self) -> Option<String> {
        if self.dev {
            return Some("pretty".to_string());
        }
        self.log_format.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_and_subcommand() {
        let cli = <Cli as Parser>::try_parse_from([
            "chatfeed",
            "--port",
            "4000",
            "--broker-url",
            "memory://",
            "-vv",
            "migrate",
        ])
        .unwrap();

        assert_eq!(cli.port, Some(4000));
        assert_eq!(cli.broker_url.as_deref(), Some("memory://"));
        assert_eq!(cli.get_log_level().as_deref(), Some("debug"));
        assert!(matches!(cli.command, Some(Commands::Migrate)));
    }

    #[test]
    fn test_quiet_wins_over_dev() {
        let cli = <Cli as Parser>::try_parse_from(["chatfeed", "--dev", "-q"]).unwrap();
        assert_eq!(cli.get_log_level().as_deref(), Some("error"));
        assert_eq!(cli.get_log_format().as_deref(), Some("pretty"));
    }
}
