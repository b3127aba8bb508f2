use reqwest::{
    header::{AUTHORIZATION, CONTENT_TYPE},
    Url,
};
use serde_json::{json, Value};

use crate::{
    error::CompletionError,
    models::{Configuration, Message, ProviderMode},
    telemetry,
};

const TEMPERATURE: f64 = 0.3;
const ALTERNATE_MAX_TOKENS: u32 = 512;

/**
 * \brief 单次补全：发送一次请求并提取生成文本，不重试，超时沿用传输层默认值。
 */
pub async fn complete(prompt: &str, config: &Configuration) -> Result<String, CompletionError> {
    let url = parse_endpoint(&config.endpoint_url)?;
    let mode = config.provider_mode();
    telemetry::log_event(
        "llm.complete",
        &format!(
            "mode={} endpoint={} model={} prompt_len={}",
            mode.as_str(),
            url,
            config.model_id,
            prompt.len()
        ),
    );

    let client = reqwest::Client::builder().build()?;
    let body = request_body(mode, &config.model_id, prompt);

    let mut req = client
        .post(url)
        .header(CONTENT_TYPE, "application/json")
        .json(&body);
    if mode == ProviderMode::Standard {
        req = req.header(AUTHORIZATION, format!("Bearer {}", config.credential));
    }
    let resp = req.send().await?;

    let status = resp.status();
    if !status.is_success() {
        let text = resp.text().await.unwrap_or_default();
        return Err(CompletionError::ApiStatus {
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or("").to_string(),
            body: text,
        });
    }

    let text = resp.text().await?;
    let v: Value = match serde_json::from_str(&text) {
        Ok(v) => v,
        Err(_) => return Err(CompletionError::EmptyResponse),
    };
    extract_text(mode, &v).ok_or(CompletionError::EmptyResponse)
}

fn parse_endpoint(raw: &str) -> Result<Url, CompletionError> {
    let trimmed = raw.trim();
    Url::parse(trimmed).map_err(|e| CompletionError::InvalidEndpoint {
        url: raw.to_string(),
        reason: e.to_string(),
    })
}

fn request_body(mode: ProviderMode, model: &str, prompt: &str) -> Value {
    let messages = [Message::user(prompt)];
    match mode {
        ProviderMode::Standard => json!({
            "model": model,
            "messages": messages,
            "temperature": TEMPERATURE
        }),
        ProviderMode::Alternate => json!({
            "model": model,
            "messages": messages,
            "max_tokens": ALTERNATE_MAX_TOKENS,
            "temperature": TEMPERATURE
        }),
    }
}

fn extract_text(mode: ProviderMode, v: &Value) -> Option<String> {
    let text = match mode {
        ProviderMode::Standard => extract_openai_content(v),
        ProviderMode::Alternate => v.get("response").and_then(|r| r.as_str()),
    }?;
    if text.is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}

fn extract_openai_content(v: &Value) -> Option<&str> {
    v.get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
}

#[cfg(test)]
pub(crate) mod mock {
    use std::sync::{Arc, Mutex};

    use axum::{
        extract::State,
        http::{HeaderMap, StatusCode},
        routing::post,
        Router,
    };

    /**
     * \brief 测试用的本地补全接口：记录收到的请求并返回固定响应。
     */
    #[derive(Clone)]
    pub struct MockEndpoint {
        pub url: String,
        pub requests: Arc<Mutex<Vec<CapturedRequest>>>,
    }

    #[derive(Debug, Clone)]
    pub struct CapturedRequest {
        pub authorization: Option<String>,
        pub content_type: Option<String>,
        pub body: serde_json::Value,
    }

    #[derive(Clone)]
    struct MockState {
        status: StatusCode,
        reply: String,
        requests: Arc<Mutex<Vec<CapturedRequest>>>,
    }

    async fn handle(
        State(state): State<MockState>,
        headers: HeaderMap,
        body: String,
    ) -> (StatusCode, String) {
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(|s| s.to_string())
        };
        state.requests.lock().unwrap().push(CapturedRequest {
            authorization: header("authorization"),
            content_type: header("content-type"),
            body: serde_json::from_str(&body).unwrap_or(serde_json::Value::Null),
        });
        (state.status, state.reply.clone())
    }

    pub async fn spawn(status: u16, reply: &str) -> MockEndpoint {
        let requests = Arc::new(Mutex::new(Vec::new()));
        let state = MockState {
            status: StatusCode::from_u16(status).expect("status"),
            reply: reply.to_string(),
            requests: requests.clone(),
        };
        let app = Router::new()
            .route("/v1/chat", post(handle))
            .with_state(state);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock");
        let addr = listener.local_addr().expect("mock addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        MockEndpoint {
            url: format!("http://{}/v1/chat", addr),
            requests,
        }
    }

    impl MockEndpoint {
        pub fn captured(&self) -> Vec<CapturedRequest> {
            self.requests.lock().unwrap().clone()
        }
    }
}
