use anyhow::{anyhow, Result};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use std::{
    path::{Path, PathBuf},
    thread,
    time::Duration,
};

use crate::{
    models::{Configuration, SettingKey},
    telemetry,
};

/**
 * \brief 打开默认数据库文件（本地目录下的 notepolish.db，可由 NOTEPOLISH_DB 覆盖）。
 */
pub fn open_default_db() -> Result<Connection> {
    open_db(default_db_path())
}

pub fn default_db_path() -> PathBuf {
    PathBuf::from(std::env::var("NOTEPOLISH_DB").unwrap_or_else(|_| "notepolish.db".to_string()))
}

/**
 * \brief 打开指定路径的数据库文件。
 */
pub fn open_db(path: impl AsRef<Path>) -> Result<Connection> {
    let conn = Connection::open(path)?;
    conn.busy_timeout(Duration::from_secs(5))?;
    Ok(conn)
}

/**
 * \brief 运行数据库迁移，创建必要表结构。
 */
pub fn migrate(conn: &Connection) -> Result<()> {
    retry_on_locked(|| {
        conn.execute_batch(
            r#"
        PRAGMA journal_mode=WAL;
        CREATE TABLE IF NOT EXISTS app_config (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );
        "#,
        )
    })?;
    Ok(())
}

fn set_config(conn: &Connection, key: &str, value: &str) -> Result<()> {
    retry_on_locked(|| {
        conn.execute(
            "INSERT INTO app_config (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value=excluded.value",
            params![key, value],
        )
    })?;
    Ok(())
}

fn get_config(conn: &Connection, key: &str) -> Result<Option<String>> {
    conn.query_row(
        "SELECT value FROM app_config WHERE key=?1",
        params![key],
        |row| row.get::<_, String>(0),
    )
    .optional()
    .map_err(Into::into)
}

fn set_bool_config(conn: &Connection, key: &str, value: bool) -> Result<()> {
    set_config(conn, key, if value { "1" } else { "0" })
}

fn get_bool_config(conn: &Connection, key: &str, default: bool) -> Result<bool> {
    let val = get_config(conn, key)?;
    Ok(val.map(|s| s == "1").unwrap_or(default))
}

/**
 * \brief 读取整理配置：逐字段覆盖默认值，缺失或无法解析的字段保留默认值。
 */
pub fn load_configuration(conn: &Connection) -> Result<Configuration> {
    let mut config = Configuration::default();
    for key in SettingKey::ALL {
        if let Some(value) = get_config(conn, key.as_str())? {
            // 无法解析的旧值按默认处理
            if let Err(err) = config.set_field(key, &value) {
                telemetry::log_error(
                    "db",
                    &format!("ignored stored {}={:?}: {:#}", key, value, err),
                );
            }
        }
    }
    Ok(config)
}

/**
 * \brief 更新单个配置字段并立即保存。
 */
pub fn set_config_field(conn: &Connection, key: SettingKey, value: &str) -> Result<Configuration> {
    let mut config = load_configuration(conn)?;
    config.set_field(key, value)?;
    set_config(conn, key.as_str(), &config.field(key))?;
    Ok(config)
}

/**
 * \brief 保存全部配置字段。
 */
pub fn save_configuration(conn: &Connection, config: &Configuration) -> Result<()> {
    for key in SettingKey::ALL {
        set_config(conn, key.as_str(), &config.field(key))?;
    }
    Ok(())
}

/**
 * \brief 以 JSON 对象覆盖当前配置并整体保存；对象中缺省的字段保留当前值，未知字段忽略。
 */
pub fn import_configuration(conn: &Connection, patch: &serde_json::Value) -> Result<Configuration> {
    let fields = patch
        .as_object()
        .ok_or_else(|| anyhow!("settings import must be a JSON object"))?;
    let mut merged = serde_json::to_value(load_configuration(conn)?)?;
    if let Some(target) = merged.as_object_mut() {
        for (key, value) in fields {
            target.insert(key.clone(), value.clone());
        }
    }
    let config: Configuration = serde_json::from_value(merged)?;
    save_configuration(conn, &config)?;
    Ok(config)
}

/**
 * \brief 清除已保存的配置字段，之后读取将得到默认值。
 */
pub fn reset_configuration(conn: &Connection) -> Result<()> {
    for key in SettingKey::ALL {
        retry_on_locked(|| {
            conn.execute("DELETE FROM app_config WHERE key=?1", params![key.as_str()])
        })?;
    }
    Ok(())
}

/**
 * \brief 读取诊断日志开关。
 */
pub fn get_telemetry_enabled(conn: &Connection) -> Result<bool> {
    get_bool_config(conn, "telemetry_enabled", false)
}

/**
 * \brief 更新诊断日志开关。
 */
pub fn set_telemetry_enabled(conn: &Connection, enabled: bool) -> Result<()> {
    set_bool_config(conn, "telemetry_enabled", enabled)
}

/**
 * \brief 针对 SQLite 锁冲突的重试助手。
 * \details 捕获 `database is locked`/`database table is locked` 等错误并线性退避，最大尝试 6 次。
 */
fn retry_on_locked<T, F>(mut action: F) -> Result<T>
where
    F: FnMut() -> rusqlite::Result<T>,
{
    const MAX_RETRIES: usize = 5;
    for attempt in 0..=MAX_RETRIES {
        match action() {
            Ok(value) => return Ok(value),
            Err(rusqlite::Error::SqliteFailure(err, _))
                if matches!(
                    err.code,
                    ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked
                ) && attempt < MAX_RETRIES =>
            {
                let backoff = Duration::from_millis(200 * (attempt as u64 + 1));
                thread::sleep(backoff);
                continue;
            }
            Err(e) => return Err(e.into()),
        }
    }
    unreachable!("retry_on_locked should have returned within the loop");
}
