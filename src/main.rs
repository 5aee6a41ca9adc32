use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Arg, Command};
use taskmanager_core::{logging::init_tracing, TaskManagerConfig};
use tokio::signal;
use tracing::{error, info, warn};

mod app;
mod shutdown;

use app::Application;
use shutdown::ShutdownManager;

#[tokio::main]
async fn main() -> Result<()> {
    // 解析命令行参数
    let matches = Command::new("taskmanager")
        .version(env!("CARGO_PKG_VERSION"))
        .about("分布式任务管理器节点")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("配置文件路径，缺省时查找 config/taskmanager.toml"),
        )
        .arg(
            Arg::new("node-id")
                .long("node-id")
                .value_name("ID")
                .help("节点标识，覆盖配置文件"),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("日志级别，覆盖配置文件")
                .value_parser(["trace", "debug", "info", "warn", "error"]),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .value_name("FORMAT")
                .help("日志格式，覆盖配置文件")
                .value_parser(["json", "pretty"]),
        )
        .get_matches();

    let config_path = matches.get_one::<String>("config");

    // 加载配置
    let mut config = TaskManagerConfig::load(config_path.map(String::as_str))
        .with_context(|| format!("加载配置失败: {}", config_path.map_or("<默认>", |p| p)))?;
    if let Some(node_id) = matches.get_one::<String>("node-id") {
        config.node.node_id = Some(node_id.clone());
    }
    if let Some(level) = matches.get_one::<String>("log-level") {
        config.observability.log_level = level.clone();
    }
    if let Some(format) = matches.get_one::<String>("log-format") {
        config.observability.log_format = format.clone();
    }

    // 初始化日志系统
    init_tracing(
        &config.observability.log_level,
        &config.observability.log_format,
    )?;

    info!("启动任务管理器节点 {}", config.node_id());
    if let Some(path) = config_path {
        info!("配置文件: {path}");
    }

    let shutdown_timeout = config.scheduler.wait_on_shutdown() + Duration::from_secs(10);
    let app = Arc::new(Application::new(config).await?);
    let shutdown_manager = ShutdownManager::new();

    let app_handle = {
        let shutdown_rx = shutdown_manager.subscribe().await;
        let app = Arc::clone(&app);
        tokio::spawn(async move { app.run(shutdown_rx).await })
    };

    // 启动失败时不再等待信号
    let run_result = tokio::select! {
        _ = wait_for_shutdown_signal() => {
            info!("收到关闭信号，开始优雅关闭...");
            shutdown_manager.shutdown().await;
            None
        }
        joined = app_handle => Some(joined),
    };

    let mut exit_error = None;
    if let Some(joined) = run_result {
        match joined {
            Ok(Ok(())) => info!("管理接口已退出"),
            Ok(Err(e)) => {
                error!("任务管理器运行失败: {e:#}");
                exit_error = Some(e);
            }
            Err(e) => {
                error!("任务管理器运行任务异常结束: {e}");
                exit_error = Some(anyhow::anyhow!("运行任务异常结束: {e}"));
            }
        }
    }

    app.shutdown(shutdown_timeout).await;
    info!("任务管理器节点已退出");

    match exit_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// 等待 Ctrl+C 或 SIGTERM
async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("安装Ctrl+C信号处理器失败: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("安装SIGTERM信号处理器失败: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("收到Ctrl+C信号");
        },
        _ = terminate => {
            info!("收到SIGTERM信号");
        },
    }
}
