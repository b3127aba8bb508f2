use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use notepolish_core_sdk::{
    db,
    models::{DocumentRef, SettingKey},
    refine::{Notifier, RefineOutcome, Refiner, Trigger},
    server,
    store::{FsDocumentStore, SettingsStore, SqliteSettingsStore},
    telemetry,
};

/**
 * \brief CLI 程序入口：整理 Markdown 笔记并管理配置。
 */
#[derive(Parser, Debug)]
#[command(name = "notepolish", version, about = "Tidy Markdown notes with a hosted language model")]
struct Cli {
    /** \brief 诊断日志目录，优先于 NOTEPOLISH_LOG_DIR */
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /**
     * \brief 查看或修改配置，每次修改立即保存。
     */
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /**
     * \brief 开关诊断日志。
     */
    Telemetry {
        #[arg(value_parser = ["on", "off"])]
        state: String,
    },

    /**
     * \brief 整理一篇文档并整体覆盖原文。
     * \param path         目标文档；缺省时视为没有活动文档
     * \param context_menu 以右键菜单方式触发（仅 Markdown 文档）
     */
    Refine {
        path: Option<PathBuf>,
        #[arg(long, default_value_t = false)]
        context_menu: bool,
    },

    /**
     * \brief 启动本地编辑器桥接服务。
     */
    Serve {
        #[arg(long, default_value = "127.0.0.1:5173")]
        addr: String,
        #[arg(long)]
        docs_root: Option<PathBuf>,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /** \brief 以 JSON 输出当前配置（密钥已隐藏） */
    Show,
    /** \brief 修改单个字段，如 `config set modelId gpt-4o` */
    Set { key: String, value: String },
    /** \brief 从 JSON 文件导入配置，文件中缺省的字段保留当前值 */
    Import { file: PathBuf },
    /** \brief 恢复默认配置 */
    Reset,
}

/**
 * \brief 终端提示：进度与失败写 stderr，成功写 stdout。
 */
struct ConsoleNotifier;

impl Notifier for ConsoleNotifier {
    fn busy_started(&self, doc: &DocumentRef) {
        eprintln!("Refining {}...", doc.name());
    }

    fn busy_finished(&self) {}

    fn success(&self, doc: &DocumentRef) {
        println!("Refined {}", doc.name());
    }

    fn failure(&self, message: &str) {
        eprintln!("{}", message);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    if let Some(dir) = &cli.log_dir {
        telemetry::set_log_dir(dir.clone());
    }

    let conn = db::open_default_db().context("open database failed")?;
    db::migrate(&conn).context("apply migrations failed")?;
    let telemetry_enabled = db::get_telemetry_enabled(&conn).unwrap_or(false);
    telemetry::set_enabled(telemetry_enabled);

    match cli.command {
        Commands::Config { action } => {
            let store = SqliteSettingsStore::new(conn).context("open settings failed")?;
            let config = match action {
                ConfigAction::Show => store.load().context("load settings failed")?,
                ConfigAction::Set { key, value } => {
                    let key: SettingKey = key.parse()?;
                    let config = store
                        .set_field(key, &value)
                        .with_context(|| format!("save {} failed", key))?;
                    telemetry::log_event("cli.config", &format!("set key={}", key));
                    config
                }
                ConfigAction::Import { file } => {
                    let raw = std::fs::read_to_string(&file)
                        .with_context(|| format!("read {} failed", file.display()))?;
                    let patch: serde_json::Value = serde_json::from_str(&raw)
                        .with_context(|| format!("parse {} failed", file.display()))?;
                    let config = store
                        .with_conn(|conn| db::import_configuration(conn, &patch))
                        .context("import settings failed")?;
                    telemetry::log_event("cli.config", &format!("import file={}", file.display()));
                    config
                }
                ConfigAction::Reset => store
                    .with_conn(|conn| {
                        db::reset_configuration(conn)?;
                        db::load_configuration(conn)
                    })
                    .context("reset settings failed")?,
            };
            println!("{}", serde_json::to_string_pretty(&config.masked())?);
        }
        Commands::Telemetry { state } => {
            let enabled = state == "on";
            db::set_telemetry_enabled(&conn, enabled).context("save telemetry failed")?;
            telemetry::set_enabled(enabled);
            if enabled {
                println!("Diagnostics enabled ({})", telemetry::log_path().display());
            } else {
                println!(
                    "Diagnostics disabled (failures are still recorded in {})",
                    telemetry::log_path().display()
                );
            }
        }
        Commands::Refine { path, context_menu } => {
            let store = SqliteSettingsStore::new(conn).context("open settings failed")?;
            let trigger = if context_menu {
                Trigger::ContextMenu
            } else {
                Trigger::Command
            };
            let refiner = Refiner::new(store, FsDocumentStore::new(), ConsoleNotifier);
            let active = path.map(DocumentRef::new);
            match refiner.refine(trigger, active.as_ref()).await {
                RefineOutcome::Skipped => eprintln!("No active Markdown document to refine."),
                RefineOutcome::Succeeded { .. } => {}
                RefineOutcome::Failed { .. } => std::process::exit(1),
            }
        }
        Commands::Serve { addr, docs_root } => {
            drop(conn);
            server::run(
                &addr,
                server::AppState {
                    db_path: db::default_db_path(),
                    docs_root,
                },
            )
            .await?;
        }
    }

    Ok(())
}
