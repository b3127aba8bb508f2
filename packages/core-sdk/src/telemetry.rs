use std::{fs::OpenOptions, io::Write, path::PathBuf};

use anyhow::Result;
use once_cell::sync::Lazy;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

const LOG_FILE: &str = "notepolish.log";

static TELEMETRY_ENABLED: Lazy<std::sync::RwLock<bool>> =
    Lazy::new(|| std::sync::RwLock::new(false));

static LOG_DIR: Lazy<std::sync::RwLock<Option<PathBuf>>> =
    Lazy::new(|| std::sync::RwLock::new(None));

/**
 * \brief 更新诊断日志开关状态。
 */
pub fn set_enabled(enabled: bool) {
    if let Ok(mut guard) = TELEMETRY_ENABLED.write() {
        *guard = enabled;
    }
}

/**
 * \brief 查询当前诊断日志开关状态。
 */
pub fn is_enabled() -> bool {
    TELEMETRY_ENABLED.read().map(|g| *g).unwrap_or(false)
}

/**
 * \brief 记录常规事件，仅在开关打开时写入。
 */
pub fn log_event(category: &str, message: &str) {
    if !is_enabled() {
        return;
    }
    if let Err(err) = write_line("INFO", category, message) {
        eprintln!("telemetry write failed: {}", err);
    }
}

/**
 * \brief 记录错误事件。错误诊断不受开关控制，始终写入。
 */
pub fn log_error(category: &str, message: &str) {
    if let Err(err) = write_line("ERROR", category, message) {
        eprintln!("telemetry write failed: {}", err);
    }
}

/**
 * \brief 在进程内指定日志目录，优先于 NOTEPOLISH_LOG_DIR。
 */
pub fn set_log_dir(dir: impl Into<PathBuf>) {
    if let Ok(mut guard) = LOG_DIR.write() {
        *guard = Some(dir.into());
    }
}

/**
 * \brief 日志文件路径，目录可由 set_log_dir 或 NOTEPOLISH_LOG_DIR 覆盖，默认 logs/。
 */
pub fn log_path() -> PathBuf {
    let configured = LOG_DIR.read().ok().and_then(|g| g.clone());
    configured.unwrap_or_else(default_log_dir).join(LOG_FILE)
}

#[cfg(not(test))]
fn default_log_dir() -> PathBuf {
    PathBuf::from(std::env::var("NOTEPOLISH_LOG_DIR").unwrap_or_else(|_| "logs".to_string()))
}

/** \brief 测试进程内所有日志都写进同一个临时目录。 */
#[cfg(test)]
fn default_log_dir() -> PathBuf {
    static DIR: Lazy<tempfile::TempDir> =
        Lazy::new(|| tempfile::tempdir().expect("log tempdir"));
    DIR.path().to_path_buf()
}

#[cfg(test)]
pub(crate) fn read_test_log() -> String {
    std::fs::read_to_string(log_path()).unwrap_or_default()
}

fn format_line(timestamp: &str, level: &str, category: &str, message: &str) -> String {
    format!("{} [{}] {} - {}", timestamp, level, category, message)
}

fn write_line(level: &str, category: &str, message: &str) -> Result<()> {
    let path = log_path();
    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() && !dir.exists() {
            std::fs::create_dir_all(dir)?;
        }
    }
    let timestamp = OffsetDateTime::now_utc().format(&Rfc3339)?;
    let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
    writeln!(file, "{}", format_line(&timestamp, level, category, message))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_line_layout() {
        let line = format_line(
            "2024-01-01T00:00:00Z",
            "ERROR",
            "refine",
            "kind=api_status status=500",
        );
        assert_eq!(
            line,
            "2024-01-01T00:00:00Z [ERROR] refine - kind=api_status status=500"
        );
    }

    #[test]
    fn test_errors_are_written_while_disabled() {
        assert!(!is_enabled());
        log_error("test", "marker-errors-written-while-disabled");
        log_event("test", "marker-info-skipped-while-disabled");
        let log = read_test_log();
        assert!(log.contains("[ERROR] test - marker-errors-written-while-disabled"));
        assert!(!log.contains("marker-info-skipped-while-disabled"));
    }
}
