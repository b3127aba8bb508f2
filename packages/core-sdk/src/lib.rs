pub mod db;
pub mod error;
pub mod llm;
pub mod models;
pub mod prompt;
pub mod refine;
pub mod server;
pub mod store;
pub mod telemetry;

/**
 * \brief SDK 预导入集合，方便外部引用常用模块。
 */
pub mod prelude {
    pub use crate::db;
    pub use crate::error::{CompletionError, RefineError};
    pub use crate::llm;
    pub use crate::models::{Configuration, DocumentRef, ProviderMode, SettingKey};
    pub use crate::prompt;
    pub use crate::refine::{Notifier, RefineOutcome, RefineState, Refiner, Trigger};
    pub use crate::server;
    pub use crate::store::{DocumentStore, FsDocumentStore, SettingsStore, SqliteSettingsStore};
    pub use crate::telemetry;
}
