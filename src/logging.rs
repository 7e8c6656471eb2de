use std::path::Path;

use anyhow::Result;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// 初始化日志系统
///
/// 配置了日志文件时返回 `WorkerGuard`，调用方必须持有到进程退出，否则缓冲的日志会丢失。
pub fn init_logging(
    log_level: &str,
    log_format: Option<&str>,
    log_file: Option<&str>,
    quiet: bool,
) -> Result<Option<WorkerGuard>> {
    // 如果静默模式，只输出错误
    let level = if quiet { "error" } else { log_level };

    // RUST_LOG 优先
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let (writer, guard) = match log_file {
        Some(path) => {
            let path = Path::new(path);
            let directory = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
            let file_name = path
                .file_name()
                .map(|f| f.to_string_lossy().to_string())
                .unwrap_or_else(|| "chatfeed.log".to_string());
            let appender = tracing_appender::rolling::daily(directory, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (LogTarget::File(writer), Some(guard))
        }
        None => (LogTarget::Stdout, None),
    };

    match (log_format, writer) {
        (Some("json"), LogTarget::File(w)) => tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json().with_writer(w))
            .try_init()?,
        (Some("json"), LogTarget::Stdout) => tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json())
            .try_init()?,
        (Some("pretty") | Some("dev"), LogTarget::File(w)) => tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().pretty().with_ansi(false).with_writer(w))
            .try_init()?,
        (Some("pretty") | Some("dev"), LogTarget::Stdout) => tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().pretty())
            .try_init()?,
        (_, LogTarget::File(w)) => tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().compact().with_ansi(false).with_writer(w))
            .try_init()?,
        (_, LogTarget::Stdout) => tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().compact())
            .try_init()?,
    }

    Ok(guard)
}

/// 输出目标
enum LogTarget {
    Stdout,
    File(tracing_appender::non_blocking::NonBlocking),
}
