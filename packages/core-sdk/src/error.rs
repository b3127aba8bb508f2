use thiserror::Error;

/**
 * \brief 一次补全交换可能出现的失败。
 */
#[derive(Debug, Error)]
pub enum CompletionError {
    /** \brief 接口地址为空或无法解析 */
    #[error("invalid endpoint url {url:?}: {reason}")]
    InvalidEndpoint { url: String, reason: String },

    /** \brief 无法到达接口（DNS、连接被拒、TLS 等） */
    #[error("transport failure: {0}")]
    Transport(#[from] reqwest::Error),

    /** \brief 接口返回非 2xx 状态 */
    #[error("request failed: {status} {status_text} -> {body}")]
    ApiStatus {
        status: u16,
        status_text: String,
        body: String,
    },

    /** \brief 2xx 响应但缺少期望的文本字段 */
    #[error("response did not contain generated text")]
    EmptyResponse,
}

impl CompletionError {
    pub fn kind(&self) -> &'static str {
        match self {
            CompletionError::InvalidEndpoint { .. } => "invalid_endpoint",
            CompletionError::Transport(_) => "transport",
            CompletionError::ApiStatus { .. } => "api_status",
            CompletionError::EmptyResponse => "empty_response",
        }
    }
}

/**
 * \brief 整理流程在编排层汇总的失败类型，仅用于诊断日志。
 */
#[derive(Debug, Error)]
pub enum RefineError {
    #[error("no active document")]
    NoActiveDocument,

    #[error("endpoint url is not configured")]
    MissingEndpoint,

    #[error("load settings failed: {0:#}")]
    Settings(anyhow::Error),

    #[error("document {document} i/o failed: {cause:#}")]
    Document {
        document: String,
        cause: anyhow::Error,
    },

    #[error(transparent)]
    Completion(#[from] CompletionError),
}

impl RefineError {
    pub fn kind(&self) -> &'static str {
        match self {
            RefineError::NoActiveDocument => "no_active_document",
            RefineError::MissingEndpoint => "missing_endpoint",
            RefineError::Settings(_) => "settings",
            RefineError::Document { .. } => "document",
            RefineError::Completion(inner) => inner.kind(),
        }
    }

    /**
     * \brief 诊断日志行：错误类型加上可用的状态码与响应体。
     */
    pub fn diagnostic(&self) -> String {
        match self {
            RefineError::Completion(CompletionError::ApiStatus {
                status,
                status_text,
                body,
            }) => format!(
                "kind={} status={} status_text={:?} body={:?}",
                self.kind(),
                status,
                status_text,
                body
            ),
            other => format!("kind={} detail={}", other.kind(), other),
        }
    }
}
