//! Property Notify CLI
//!
//! 查看物业通知、标记已读、检查会话并实时监听推送

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use property_notify::{
    ClientConfig, FeedFetcher, HttpBackend, NotificationBackend, NotificationCenter,
    NotificationRecord, NotificationSnapshot, NotificationStore, SessionEndReason, SessionMonitor,
};
use std::sync::Arc;
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "pnotify")]
#[command(about = "Property Notify - 物业管理通知客户端")]
#[command(version)]
struct Cli {
    /// REST 基础地址（覆盖配置文件与环境变量）
    #[arg(long, global = true)]
    api_url: Option<String>,
    /// 推送通道基础地址
    #[arg(long, global = true)]
    ws_url: Option<String>,
    /// 会话凭证
    #[arg(long, global = true)]
    token: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 拉取并列出通知
    List {
        /// 输出 JSON 格式
        #[arg(long)]
        json: bool,
    },
    /// 显示未读数量
    Unread {
        /// 使用服务端计数而不是本地统计
        #[arg(long)]
        server: bool,
    },
    /// 标记服务端通知为已读
    MarkRead {
        /// 通知 ID
        id: i64,
    },
    /// 确认会话仍然有效（无效时退出码为 1）
    CheckSession,
    /// 实时监听通知，直到 Ctrl+C 或会话失效
    Watch {
        /// 会话检查间隔（秒）
        #[arg(long, short)]
        interval: Option<u64>,
        /// 每次变化输出一行 JSON
        #[arg(long)]
        json: bool,
    },
}

impl Cli {
    fn config(&self) -> Result<ClientConfig> {
        let mut config = ClientConfig::auto_load()?;
        if let Some(url) = &self.api_url {
            config.api_base_url = url.clone();
        }
        if let Some(url) = &self.ws_url {
            config.ws_base_url = url.clone();
        }
        if let Some(token) = &self.token {
            config.token = Some(token.clone());
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // 通过 RUST_LOG 控制日志级别，例如: RUST_LOG=debug pnotify watch
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("property_notify=info,pnotify=info"));

    fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .init();

    let cli = Cli::parse();
    let mut config = cli.config()?;

    match cli.command {
        Commands::List { json } => {
            let backend = http_backend(&config)?;
            let store = fetch_store(backend).await?;
            let snapshot = store.snapshot();

            if json {
                println!("{}", serde_json::to_string_pretty(&snapshot.records)?);
            } else {
                println!(
                    "共 {} 条通知，{} 条未读:\n",
                    snapshot.len(),
                    snapshot.unread_count
                );
                for record in &snapshot.records {
                    println!("{}", format_record(record));
                }
            }
        }
        Commands::Unread { server } => {
            let backend = http_backend(&config)?;
            let count = if server {
                backend.unread_count().await?
            } else {
                fetch_store(backend).await?.unread_count() as u64
            };
            println!("{}", count);
        }
        Commands::MarkRead { id } => {
            let backend = http_backend(&config)?;
            backend
                .mark_read(id)
                .await
                .with_context(|| format!("Failed to mark notification {} as read", id))?;
            println!("✅ 通知 {} 已标记为已读", id);
        }
        Commands::CheckSession => {
            if config.token.is_none() {
                bail!("No session token configured (use --token or PNOTIFY_TOKEN)");
            }
            let backend = http_backend(&config)?;
            let monitor = SessionMonitor::new(backend);
            if monitor.check_now().await {
                println!("✅ 会话有效");
            } else {
                let reason = monitor.state().ended.unwrap_or(SessionEndReason::Unreachable);
                println!("❌ 会话无效: {}", describe_end(reason));
                std::process::exit(1);
            }
        }
        Commands::Watch { interval, json } => {
            if let Some(secs) = interval {
                config.session_check_interval_secs = secs;
            }
            watch(config, json).await?;
        }
    }

    Ok(())
}

fn http_backend(config: &ClientConfig) -> Result<Arc<dyn NotificationBackend>> {
    let backend = HttpBackend::new(config.clone()).context("Failed to build HTTP client")?;
    Ok(Arc::new(backend))
}

/// 拉取一页并合并进临时存储，得到有序列表与未读计数
async fn fetch_store(backend: Arc<dyn NotificationBackend>) -> Result<NotificationStore> {
    let page = FeedFetcher::new(backend)
        .fetch_page()
        .await
        .context("Failed to load notifications")?;
    let mut store = NotificationStore::new();
    store.ingest_fetched_page(page);
    Ok(store)
}

async fn watch(config: ClientConfig, json: bool) -> Result<()> {
    let backend = http_backend(&config)?;
    let mut center = NotificationCenter::new(config, backend);

    let report = center.start().await?;
    match &report.initial_fetch {
        Ok(count) => info!(count, "Initial notifications loaded"),
        Err(e) => warn!(error = %e, "Initial fetch failed, waiting for pushes"),
    }

    let mut notifications = center.subscribe();
    let mut session = center.subscribe_session();
    let mut previous = center.snapshot();
    print_snapshot(&previous, json)?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, stopping");
                break;
            }
            changed = notifications.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = notifications.borrow_and_update().clone();
                print_changes(&previous, &current, json)?;
                previous = current;
            }
            changed = session.changed() => {
                let ended = session.borrow_and_update().ended;
                if changed.is_err() || ended.is_some() {
                    let reason = ended.unwrap_or(SessionEndReason::Stopped);
                    eprintln!("❌ 会话已结束: {}，请重新登录", describe_end(reason));
                    break;
                }
            }
        }
    }

    center.stop();
    Ok(())
}

fn print_snapshot(snapshot: &NotificationSnapshot, json: bool) -> Result<()> {
    if json {
        for record in snapshot.records.iter().rev() {
            println!("{}", serde_json::to_string(record)?);
        }
    } else {
        println!("📬 {} 条通知，{} 条未读", snapshot.len(), snapshot.unread_count);
        for record in &snapshot.records {
            println!("{}", format_record(record));
        }
    }
    Ok(())
}

/// 只输出新出现的记录与未读数变化
fn print_changes(
    previous: &NotificationSnapshot,
    current: &NotificationSnapshot,
    json: bool,
) -> Result<()> {
    let added: Vec<&NotificationRecord> = current
        .records
        .iter()
        .filter(|r| previous.get(r.id).is_none())
        .collect();
    debug!(added = added.len(), unread = current.unread_count, "Notifications changed");

    for record in added.iter().rev() {
        if json {
            println!("{}", serde_json::to_string(record)?);
        } else {
            println!("{}", format_record(record));
        }
    }
    if !json && current.unread_count != previous.unread_count {
        println!("🔔 未读: {}", current.unread_count);
    }
    Ok(())
}

fn format_record(record: &NotificationRecord) -> String {
    let marker = if record.is_read { " " } else { "●" };
    format!(
        "  {} [{}] {} | {} | {} | {}",
        marker,
        record.id,
        record.created_at.format("%Y-%m-%d %H:%M"),
        record.kind.as_str(),
        record.title,
        record.message
    )
}

fn describe_end(reason: SessionEndReason) -> &'static str {
    match reason {
        SessionEndReason::Unauthorized => "凭证已失效",
        SessionEndReason::Unreachable => "无法连接身份服务",
        SessionEndReason::Stopped => "已停止",
    }
}
