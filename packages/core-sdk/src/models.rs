use std::{
    fmt,
    path::{Path, PathBuf},
    str::FromStr,
};

use anyhow::{anyhow, bail, Result};
use serde::{Deserialize, Serialize};

/** \brief 默认模型名。 */
pub const DEFAULT_MODEL_ID: &str = "gpt-4o-mini";
/** \brief 默认的标准形态接口地址。 */
pub const DEFAULT_ENDPOINT_URL: &str = "https://api.openai.com/v1/chat/completions";

/**
 * \brief 整理流程所需的全部配置，每次整理时读取一次快照。
 */
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Configuration {
    /** \brief API 密钥，可为空 */
    pub credential: String,
    /** \brief 模型名 */
    pub model_id: String,
    /** \brief 完整的请求地址（非基地址） */
    pub endpoint_url: String,
    /** \brief 逗号分隔的标签提示 */
    pub preferred_tags: String,
    /** \brief 用户附加指令 */
    pub extra_instructions: String,
    /** \brief 为 true 时使用自托管服务的 generate 形态 */
    pub use_alternate_provider: bool,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            credential: String::new(),
            model_id: DEFAULT_MODEL_ID.to_string(),
            endpoint_url: DEFAULT_ENDPOINT_URL.to_string(),
            preferred_tags: String::new(),
            extra_instructions: String::new(),
            use_alternate_provider: false,
        }
    }
}

impl Configuration {
    /**
     * \brief 当前配置对应的请求形态。
     */
    pub fn provider_mode(&self) -> ProviderMode {
        if self.use_alternate_provider {
            ProviderMode::Alternate
        } else {
            ProviderMode::Standard
        }
    }

    /**
     * \brief 以字符串形式读取单个字段。
     */
    pub fn field(&self, key: SettingKey) -> String {
        match key {
            SettingKey::Credential => self.credential.clone(),
            SettingKey::ModelId => self.model_id.clone(),
            SettingKey::EndpointUrl => self.endpoint_url.clone(),
            SettingKey::PreferredTags => self.preferred_tags.clone(),
            SettingKey::ExtraInstructions => self.extra_instructions.clone(),
            SettingKey::UseAlternateProvider => self.use_alternate_provider.to_string(),
        }
    }

    /**
     * \brief 写入单个字段；布尔字段无法解析时返回错误，原值保持不变。
     */
    pub fn set_field(&mut self, key: SettingKey, value: &str) -> Result<()> {
        match key {
            SettingKey::Credential => self.credential = value.to_string(),
            SettingKey::ModelId => self.model_id = value.to_string(),
            SettingKey::EndpointUrl => self.endpoint_url = value.to_string(),
            SettingKey::PreferredTags => self.preferred_tags = value.to_string(),
            SettingKey::ExtraInstructions => self.extra_instructions = value.to_string(),
            SettingKey::UseAlternateProvider => {
                self.use_alternate_provider = parse_bool(value)
                    .ok_or_else(|| anyhow!("invalid boolean for {}: {}", key, value))?;
            }
        }
        Ok(())
    }

    /**
     * \brief 返回隐藏密钥后的副本，用于展示。
     */
    pub fn masked(&self) -> Self {
        let mut copy = self.clone();
        if !copy.credential.is_empty() {
            copy.credential = "********".to_string();
        }
        copy
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/**
 * \brief 持久化记录中的字段键。
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SettingKey {
    Credential,
    ModelId,
    EndpointUrl,
    PreferredTags,
    ExtraInstructions,
    UseAlternateProvider,
}

impl SettingKey {
    pub const ALL: [SettingKey; 6] = [
        SettingKey::Credential,
        SettingKey::ModelId,
        SettingKey::EndpointUrl,
        SettingKey::PreferredTags,
        SettingKey::ExtraInstructions,
        SettingKey::UseAlternateProvider,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SettingKey::Credential => "credential",
            SettingKey::ModelId => "modelId",
            SettingKey::EndpointUrl => "endpointUrl",
            SettingKey::PreferredTags => "preferredTags",
            SettingKey::ExtraInstructions => "extraInstructions",
            SettingKey::UseAlternateProvider => "useAlternateProvider",
        }
    }
}

impl fmt::Display for SettingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SettingKey {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match SettingKey::ALL.iter().find(|k| k.as_str() == s) {
            Some(key) => Ok(*key),
            None => bail!("unknown setting key: {}", s),
        }
    }
}

/**
 * \brief 两种互斥的请求形态。
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderMode {
    /** \brief chat-completions 形态，携带 Bearer 鉴权 */
    Standard,
    /** \brief 自托管 generate 形态，无鉴权，读取顶层 response */
    Alternate,
}

impl ProviderMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderMode::Standard => "standard",
            ProviderMode::Alternate => "alternate",
        }
    }
}

/**
 * \brief 消息结构，与 OpenAI Chat 消息格式对齐。
 */
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /** \brief 角色：system/user/assistant */
    pub role: String,
    /** \brief 内容 */
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/**
 * \brief 文档引用，以路径标识。
 */
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocumentRef {
    path: PathBuf,
}

impl DocumentRef {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /**
     * \brief 用于提示信息的文档名（文件名，缺失时退回完整路径）。
     */
    pub fn name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string())
    }

    /**
     * \brief 是否为 Markdown 文档。
     */
    pub fn is_markdown(&self) -> bool {
        self.path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("md") || e.eq_ignore_ascii_case("markdown"))
            .unwrap_or(false)
    }
}

impl fmt::Display for DocumentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path.display())
    }
}
