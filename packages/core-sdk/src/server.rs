use std::{
    path::PathBuf,
    sync::{Arc, Mutex},
};

use anyhow::Result;
use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::{
    db,
    models::{Configuration, DocumentRef, SettingKey},
    refine::{Notifier, RefineOutcome, Refiner, Trigger},
    store::{FsDocumentStore, SettingsStore, SqliteSettingsStore},
    telemetry,
};

/**
 * \brief 编辑器桥接服务的共享状态。
 */
#[derive(Debug, Clone)]
pub struct AppState {
    /** \brief 配置数据库路径 */
    pub db_path: PathBuf,
    /** \brief 相对文档路径的解析根目录 */
    pub docs_root: Option<PathBuf>,
}

impl AppState {
    fn settings(&self) -> Result<SqliteSettingsStore> {
        SqliteSettingsStore::new(db::open_db(&self.db_path)?)
    }

    fn documents(&self) -> FsDocumentStore {
        match &self.docs_root {
            Some(root) => FsDocumentStore::with_root(root),
            None => FsDocumentStore::new(),
        }
    }
}

/**
 * \brief 启动本地 HTTP 服务，供宿主编辑器触发整理与修改配置。
 * \param addr 监听地址，如 "127.0.0.1:5173"
 */
pub async fn run(addr: &str, state: AppState) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    println!("Server listening on http://{}", addr);
    axum::serve(listener, router(state)).await?;
    Ok(())
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/config", get(get_config).post(set_config))
        .route("/api/config/reset", post(reset_config))
        .route("/api/refine", post(refine))
        .with_state(state)
}

#[derive(Deserialize, Debug)]
struct ConfigFieldInput {
    /** \brief 字段名，如 "modelId" */
    key: String,
    /** \brief 新值 */
    value: String,
}

#[derive(Deserialize, Debug)]
struct RefineRequest {
    /** \brief 当前活动文档，缺省表示没有活动文档 */
    #[serde(default)]
    path: Option<String>,
    /** \brief "command" 或 "context_menu" */
    #[serde(default)]
    trigger: Option<String>,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "kind", content = "text", rename_all = "snake_case")]
enum Notice {
    Busy(String),
    Idle,
    Success(String),
    Failure(String),
}

#[derive(Serialize, Debug)]
struct RefineResponse {
    /** \brief skipped / succeeded / failed */
    outcome: &'static str,
    document: Option<String>,
    notices: Vec<Notice>,
}

/**
 * \brief 收集提示信号，随响应返回给编辑器。
 */
#[derive(Default, Clone)]
struct CollectingNotifier {
    notices: Arc<Mutex<Vec<Notice>>>,
}

impl CollectingNotifier {
    fn push(&self, notice: Notice) {
        if let Ok(mut list) = self.notices.lock() {
            list.push(notice);
        }
    }

    fn take(&self) -> Vec<Notice> {
        self.notices
            .lock()
            .map(|mut l| std::mem::take(&mut *l))
            .unwrap_or_default()
    }
}

impl Notifier for CollectingNotifier {
    fn busy_started(&self, doc: &DocumentRef) {
        self.push(Notice::Busy(format!("Refining {}...", doc.name())));
    }

    fn busy_finished(&self) {
        self.push(Notice::Idle);
    }

    fn success(&self, doc: &DocumentRef) {
        self.push(Notice::Success(format!("Refined {}", doc.name())));
    }

    fn failure(&self, message: &str) {
        self.push(Notice::Failure(message.to_string()));
    }
}

fn parse_trigger(raw: Option<&str>) -> Result<Trigger, (axum::http::StatusCode, String)> {
    match raw.unwrap_or("command") {
        "command" => Ok(Trigger::Command),
        "context_menu" => Ok(Trigger::ContextMenu),
        other => Err(bad_request(format!("unknown trigger: {}", other))),
    }
}

/**
 * \brief 获取当前配置（密钥已隐藏）。
 */
async fn get_config(
    State(state): State<AppState>,
) -> Result<Json<Configuration>, (axum::http::StatusCode, String)> {
    let store = state.settings().map_err(internal_err)?;
    let config = store.load().map_err(internal_err)?;
    Ok(Json(config.masked()))
}

/**
 * \brief 修改单个配置字段并立即保存。
 */
async fn set_config(
    State(state): State<AppState>,
    Json(input): Json<ConfigFieldInput>,
) -> Result<Json<Configuration>, (axum::http::StatusCode, String)> {
    let key: SettingKey = input.key.parse().map_err(bad_request)?;
    let store = state.settings().map_err(internal_err)?;
    let config = store.set_field(key, &input.value).map_err(bad_request)?;
    telemetry::log_event("server.config", &format!("set key={}", key));
    Ok(Json(config.masked()))
}

/**
 * \brief 恢复默认配置。
 */
async fn reset_config(
    State(state): State<AppState>,
) -> Result<Json<Configuration>, (axum::http::StatusCode, String)> {
    let store = state.settings().map_err(internal_err)?;
    let config = store
        .with_conn(|conn| {
            db::reset_configuration(conn)?;
            db::load_configuration(conn)
        })
        .map_err(internal_err)?;
    telemetry::log_event("server.config", "reset");
    Ok(Json(config.masked()))
}

/**
 * \brief 整理指定文档。失败只返回通用提示，细节写入诊断日志。
 */
async fn refine(
    State(state): State<AppState>,
    Json(req): Json<RefineRequest>,
) -> Result<Json<RefineResponse>, (axum::http::StatusCode, String)> {
    let trigger = parse_trigger(req.trigger.as_deref())?;
    let settings = state.settings().map_err(internal_err)?;
    let notifier = CollectingNotifier::default();
    let refiner = Refiner::new(settings, state.documents(), notifier.clone());

    let active = req.path.map(DocumentRef::new);
    let outcome = refiner.refine(trigger, active.as_ref()).await;
    let (label, document) = match &outcome {
        RefineOutcome::Skipped => ("skipped", None),
        RefineOutcome::Succeeded { document } => ("succeeded", Some(document.to_string())),
        RefineOutcome::Failed { document, .. } => ("failed", Some(document.to_string())),
    };
    Ok(Json(RefineResponse {
        outcome: label,
        document,
        notices: notifier.take(),
    }))
}

fn internal_err<E: std::fmt::Display>(e: E) -> (axum::http::StatusCode, String) {
    (axum::http::StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

fn bad_request<E: std::fmt::Display>(e: E) -> (axum::http::StatusCode, String) {
    (axum::http::StatusCode::BAD_REQUEST, e.to_string())
}
