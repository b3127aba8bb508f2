use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    sync::Mutex,
};

use anyhow::{anyhow, Context, Result};
use rusqlite::Connection;

use crate::{
    db,
    models::{Configuration, DocumentRef, SettingKey},
};

/**
 * \brief 配置存储契约：读取合并后的配置，逐字段修改并立即保存。
 */
pub trait SettingsStore: Send + Sync {
    fn load(&self) -> Result<Configuration>;
    fn set_field(&self, key: SettingKey, value: &str) -> Result<Configuration>;
}

/**
 * \brief 文档存储契约：整体读取与整体替换。
 */
pub trait DocumentStore: Send + Sync {
    fn read(&self, doc: &DocumentRef) -> Result<String>;
    fn write(&self, doc: &DocumentRef, text: &str) -> Result<()>;
}

/**
 * \brief 基于 SQLite app_config 表的配置存储。
 */
pub struct SqliteSettingsStore {
    conn: Mutex<Connection>,
}

impl SqliteSettingsStore {
    /**
     * \brief 包装已有连接并执行迁移。
     */
    pub fn new(conn: Connection) -> Result<Self> {
        db::migrate(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_default() -> Result<Self> {
        Self::new(db::open_default_db()?)
    }

    /**
     * \brief 在持有锁的情况下访问底层连接。
     */
    pub fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| anyhow!("settings connection poisoned"))?;
        f(&conn)
    }
}

impl SettingsStore for SqliteSettingsStore {
    fn load(&self) -> Result<Configuration> {
        self.with_conn(db::load_configuration)
    }

    fn set_field(&self, key: SettingKey, value: &str) -> Result<Configuration> {
        self.with_conn(|conn| db::set_config_field(conn, key, value))
    }
}

/**
 * \brief 内存配置存储，用于测试与嵌入场景。
 */
#[derive(Default)]
pub struct MemorySettingsStore {
    config: Mutex<Configuration>,
}

impl MemorySettingsStore {
    pub fn new(config: Configuration) -> Self {
        Self {
            config: Mutex::new(config),
        }
    }
}

impl SettingsStore for MemorySettingsStore {
    fn load(&self) -> Result<Configuration> {
        self.config
            .lock()
            .map(|c| c.clone())
            .map_err(|_| anyhow!("settings poisoned"))
    }

    fn set_field(&self, key: SettingKey, value: &str) -> Result<Configuration> {
        let mut guard = self
            .config
            .lock()
            .map_err(|_| anyhow!("settings poisoned"))?;
        guard.set_field(key, value)?;
        Ok(guard.clone())
    }
}

/**
 * \brief 文件系统文档存储；相对路径基于 root 解析。
 */
#[derive(Debug, Clone, Default)]
pub struct FsDocumentStore {
    root: Option<PathBuf>,
}

impl FsDocumentStore {
    pub fn new() -> Self {
        Self { root: None }
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
        }
    }

    fn resolve(&self, doc: &DocumentRef) -> PathBuf {
        match &self.root {
            Some(root) if doc.path().is_relative() => root.join(doc.path()),
            _ => doc.path().to_path_buf(),
        }
    }
}

impl DocumentStore for FsDocumentStore {
    fn read(&self, doc: &DocumentRef) -> Result<String> {
        let path = self.resolve(doc);
        fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))
    }

    /**
     * \brief 先写入同目录临时文件再重命名，正文要么整体替换要么保持原样。
     */
    fn write(&self, doc: &DocumentRef, text: &str) -> Result<()> {
        let path = self.resolve(doc);
        let tmp = temp_sibling(&path);
        let replaced = fs::write(&tmp, text)
            .with_context(|| format!("write {}", tmp.display()))
            .and_then(|()| {
                fs::rename(&tmp, &path).with_context(|| format!("replace {}", path.display()))
            });
        if replaced.is_err() {
            // 写入中途失败也可能留下半截临时文件
            let _ = fs::remove_file(&tmp);
        }
        replaced
    }
}

fn temp_sibling(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{}.notepolish.tmp", name))
}

/**
 * \brief 内存文档存储。
 */
#[derive(Default)]
pub struct MemoryDocumentStore {
    docs: Mutex<HashMap<DocumentRef, String>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, doc: DocumentRef, body: impl Into<String>) {
        if let Ok(mut docs) = self.docs.lock() {
            docs.insert(doc, body.into());
        }
    }

    pub fn get(&self, doc: &DocumentRef) -> Option<String> {
        self.docs.lock().ok().and_then(|d| d.get(doc).cloned())
    }
}

impl DocumentStore for MemoryDocumentStore {
    fn read(&self, doc: &DocumentRef) -> Result<String> {
        self.get(doc)
            .ok_or_else(|| anyhow!("document not found: {}", doc))
    }

    fn write(&self, doc: &DocumentRef, text: &str) -> Result<()> {
        let mut docs = self.docs.lock().map_err(|_| anyhow!("documents poisoned"))?;
        docs.insert(doc.clone(), text.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fs_store_replaces_body_whole() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FsDocumentStore::with_root(dir.path());
        let doc = DocumentRef::new("note.md");
        fs::write(dir.path().join("note.md"), "old body\nwith two lines").expect("seed");

        assert_eq!(store.read(&doc).expect("read"), "old body\nwith two lines");
        store.write(&doc, "new").expect("write");
        assert_eq!(store.read(&doc).expect("read"), "new");
        assert!(!temp_sibling(&dir.path().join("note.md")).exists());
    }

    #[test]
    fn test_fs_store_failed_replace_cleans_temp() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FsDocumentStore::with_root(dir.path());
        let target = dir.path().join("folder.md");
        fs::create_dir(&target).expect("dir in place of note");
        fs::write(target.join("inner.txt"), "x").expect("seed");

        assert!(store.write(&DocumentRef::new("folder.md"), "new").is_err());
        assert!(!temp_sibling(&target).exists());
        assert!(target.join("inner.txt").exists());
    }

    #[test]
    fn test_fs_store_failed_temp_write_keeps_body() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FsDocumentStore::with_root(dir.path());
        let doc = DocumentRef::new("note.md");
        fs::write(dir.path().join("note.md"), "old").expect("seed");
        fs::create_dir(temp_sibling(&dir.path().join("note.md"))).expect("block temp path");

        let err = store.write(&doc, "new").expect_err("temp write fails");
        assert!(format!("{:#}", err).contains("notepolish.tmp"));
        assert_eq!(store.read(&doc).expect("read"), "old");
    }

    #[test]
    fn test_fs_store_missing_file_errors() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FsDocumentStore::with_root(dir.path());
        assert!(store.read(&DocumentRef::new("absent.md")).is_err());
    }

    #[test]
    fn test_sqlite_settings_store_round_trip() {
        let conn = Connection::open_in_memory().expect("open");
        let store = SqliteSettingsStore::new(conn).expect("store");
        store
            .set_field(SettingKey::PreferredTags, "#todo")
            .expect("set");
        assert_eq!(store.load().expect("load").preferred_tags, "#todo");
    }

    #[test]
    fn test_memory_settings_store_keeps_value_on_bad_input() {
        let store = MemorySettingsStore::default();
        assert!(store
            .set_field(SettingKey::UseAlternateProvider, "perhaps")
            .is_err());
        assert!(!store.load().expect("load").use_alternate_provider);
    }
}
