use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use keysync_lib::config::{default_config_dir, AppConfig};
use keysync_lib::core::{KeyGenerator, LogProgress, RandomKeyGenerator};
use keysync_lib::logging::{get_log_dir, LogConfig, SizeRotatingWriter};
use keysync_lib::session::{JsonSessionStore, SessionRecord, SessionStore};
use keysync_lib::{create_gateway, SyncConfig, SyncEngine, SyncMode, SyncRequest, SyncStatus};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::prelude::*;

#[derive(Parser)]
#[command(name = "keysync", version, about = "Share files through an object store by sync key")]
struct Cli {
    /// 配置目录（默认为平台配置目录下的 keysync）
    #[arg(long, global = true, env = "KEYSYNC_CONFIG_DIR")]
    config_dir: Option<PathBuf>,

    /// 输出 debug 日志
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Upload a file or directory and print its sync key
    Host {
        source: PathBuf,
        /// Reuse an existing key
        #[arg(short, long)]
        key: Option<String>,
        /// Overwrite objects under the key when the local copy is newer
        #[arg(short, long, requires = "key")]
        replace: bool,
    },
    /// Download everything under a sync key
    Sync { key: String, dest: PathBuf },
    /// Repeat the last successful run
    Resync,
}

/// 初始化日志系统
fn init_logging(config_dir: &Path, config: &LogConfig, verbose: bool) {
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        config.tracing_level()
    };
    let env_filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(level.into())
        .add_directive(
            "hyper=warn"
                .parse()
                .unwrap_or_else(|_| tracing::Level::WARN.into()),
        );

    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false);

    let file_layer = if config.enabled {
        match SizeRotatingWriter::new(&get_log_dir(config_dir), config.max_size_mb) {
            Ok(file_writer) => Some(
                tracing_subscriber::fmt::layer()
                    .with_writer(file_writer)
                    .with_ansi(false)
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_thread_names(false),
            ),
            Err(e) => {
                eprintln!("failed to open log file: {e}");
                None
            }
        }
    } else {
        None
    };

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer);
    let _ = tracing::subscriber::set_global_default(subscriber);
}

/// host 模式下确定 key：显式给出的 key，或新生成的 key
fn resolve_host_key(key: Option<String>, generator: &dyn KeyGenerator) -> String {
    key.unwrap_or_else(|| generator.generate())
}

fn resolve_request(command: Command, store: &dyn SessionStore) -> Result<SyncRequest> {
    match command {
        Command::Host {
            source,
            key,
            replace,
        } => Ok(SyncRequest::Host {
            source,
            key: resolve_host_key(key, &RandomKeyGenerator::default()),
            replace_existing: replace,
        }),
        Command::Sync { key, dest } => Ok(SyncRequest::Sync { key, dest }),
        Command::Resync => store
            .load()?
            .context("no previous sync session found")?
            .resync_request(),
    }
}

async fn run(cli: Cli, config: AppConfig) -> Result<()> {
    let store = JsonSessionStore::default_location()?;
    let request = resolve_request(cli.command, &store)?;

    let gateway = create_gateway(&config.store).await?;
    let engine = SyncEngine::with_config(
        gateway,
        SyncConfig::from(&config.transfer),
        Arc::new(LogProgress::default()),
    );

    let report = engine.run(&request).await?;
    info!(
        "运行结束: {} {} - 计划 {}, 跳过 {}, 传输 {}",
        report.mode, report.key, report.planned, report.skipped, report.transferred
    );

    let record = SessionRecord::from_request(&request, &report.key, Utc::now());
    if let Err(e) = store.save(&record) {
        error!("保存会话失败: {:#}", e);
    }

    if report.status == SyncStatus::UpToDate {
        println!("Everything is up to date");
    }
    if report.mode == SyncMode::Host {
        println!("Sync key: {}", report.key);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_dir = cli.config_dir.clone().unwrap_or_else(default_config_dir);
    let config = AppConfig::load(&config_dir)?;
    init_logging(&config_dir, &config.log, cli.verbose);

    run(cli, config).await.inspect_err(|e| error!("{:#}", e))
}
