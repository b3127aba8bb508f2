use crate::{
    error::RefineError,
    llm,
    models::DocumentRef,
    prompt,
    store::{DocumentStore, SettingsStore},
    telemetry,
};

/** \brief 任何失败路径统一展示给用户的提示。 */
pub const REFINE_FAILED_NOTICE: &str = "Refine failed. The note was left unchanged.";

/**
 * \brief 整理流程状态：Idle → Running → Succeeded/Failed，调用方观察终态后回到 Idle。
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefineState {
    Idle,
    Running,
    Succeeded,
    Failed,
}

/**
 * \brief 触发入口。两者最终汇合到同一个编排入口。
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /** \brief 用户显式执行命令 */
    Command,
    /** \brief 右键菜单，仅对 Markdown 文档生效 */
    ContextMenu,
}

impl Trigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Trigger::Command => "command",
            Trigger::ContextMenu => "context_menu",
        }
    }

    /**
     * \brief 解析触发时的目标文档；不满足入口条件时视为没有活动文档。
     */
    pub fn target<'a>(&self, active: Option<&'a DocumentRef>) -> Option<&'a DocumentRef> {
        match self {
            Trigger::Command => active,
            Trigger::ContextMenu => active.filter(|doc| doc.is_markdown()),
        }
    }
}

/**
 * \brief 面向用户的提示信号。
 */
pub trait Notifier: Send + Sync {
    /** \brief 显示忙碌指示 */
    fn busy_started(&self, doc: &DocumentRef);
    /** \brief 关闭忙碌指示 */
    fn busy_finished(&self);
    fn success(&self, doc: &DocumentRef);
    /** \brief 失败提示，内容固定为通用文案 */
    fn failure(&self, message: &str);
}

/**
 * \brief 忙碌指示的作用域守卫：创建时显示，Drop 时关闭（包括 panic 展开）。
 */
pub struct BusyGuard<'a> {
    notifier: &'a dyn Notifier,
}

impl<'a> BusyGuard<'a> {
    pub fn acquire(notifier: &'a dyn Notifier, doc: &DocumentRef) -> Self {
        notifier.busy_started(doc);
        Self { notifier }
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.notifier.busy_finished();
    }
}

/**
 * \brief 一次整理的结果。
 */
#[derive(Debug)]
pub enum RefineOutcome {
    /** \brief 没有目标文档，未做任何事 */
    Skipped,
    Succeeded { document: DocumentRef },
    Failed {
        document: DocumentRef,
        error: RefineError,
    },
}

impl RefineOutcome {
    /**
     * \brief 终态；Skipped 从未离开 Idle。
     */
    pub fn state(&self) -> RefineState {
        match self {
            RefineOutcome::Skipped => RefineState::Idle,
            RefineOutcome::Succeeded { .. } => RefineState::Succeeded,
            RefineOutcome::Failed { .. } => RefineState::Failed,
        }
    }

    pub fn error(&self) -> Option<&RefineError> {
        match self {
            RefineOutcome::Failed { error, .. } => Some(error),
            _ => None,
        }
    }
}

/**
 * \brief 整理编排器：读取文档 → 组装提示词 → 一次补全 → 整体写回。
 * \details 不对同一文档的并发调用做串行化，后写入者覆盖先写入者。
 */
pub struct Refiner<S, D, N> {
    settings: S,
    documents: D,
    notifier: N,
}

impl<S, D, N> Refiner<S, D, N>
where
    S: SettingsStore,
    D: DocumentStore,
    N: Notifier,
{
    pub fn new(settings: S, documents: D, notifier: N) -> Self {
        Self {
            settings,
            documents,
            notifier,
        }
    }

    pub fn documents(&self) -> &D {
        &self.documents
    }

    pub fn notifier(&self) -> &N {
        &self.notifier
    }

    /**
     * \brief 整理当前活动文档。所有失败都在此处被捕获并转换为提示，不向宿主传播。
     */
    pub async fn refine(&self, trigger: Trigger, active: Option<&DocumentRef>) -> RefineOutcome {
        let Some(doc) = trigger.target(active) else {
            telemetry::log_event(
                "refine",
                &format!("trigger={} skipped: {}", trigger.as_str(), RefineError::NoActiveDocument),
            );
            return RefineOutcome::Skipped;
        };

        let _busy = BusyGuard::acquire(&self.notifier, doc);
        log_transition(doc, RefineState::Idle, RefineState::Running);
        let outcome = match self.run(doc).await {
            Ok(()) => RefineOutcome::Succeeded {
                document: doc.clone(),
            },
            Err(error) => RefineOutcome::Failed {
                document: doc.clone(),
                error,
            },
        };

        // 提示先于忙碌指示的释放
        match &outcome {
            RefineOutcome::Succeeded { document } => {
                log_transition(document, RefineState::Running, RefineState::Succeeded);
                self.notifier.success(document);
            }
            RefineOutcome::Failed { document, error } => {
                log_transition(document, RefineState::Running, RefineState::Failed);
                telemetry::log_error(
                    "refine",
                    &format!("document={} {}", document, error.diagnostic()),
                );
                self.notifier.failure(REFINE_FAILED_NOTICE);
            }
            RefineOutcome::Skipped => {}
        }
        outcome
    }

    async fn run(&self, doc: &DocumentRef) -> Result<(), RefineError> {
        let body = self
            .documents
            .read(doc)
            .map_err(|cause| RefineError::Document {
                document: doc.to_string(),
                cause,
            })?;

        let config = self.settings.load().map_err(RefineError::Settings)?;
        if config.endpoint_url.trim().is_empty() {
            return Err(RefineError::MissingEndpoint);
        }

        let prompt = prompt::build_prompt(&body, &config);
        let text = llm::complete(&prompt, &config).await?;

        self.documents
            .write(doc, &text)
            .map_err(|cause| RefineError::Document {
                document: doc.to_string(),
                cause,
            })
    }
}

fn log_transition(doc: &DocumentRef, from: RefineState, to: RefineState) {
    telemetry::log_event(
        "refine",
        &format!("document={} state {:?} -> {:?}", doc, from, to),
    );
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::{
        error::CompletionError,
        llm::mock,
        models::Configuration,
        store::{MemoryDocumentStore, MemorySettingsStore},
    };

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Signal {
        BusyStarted(String),
        BusyFinished,
        Success(String),
        Failure(String),
    }

    #[derive(Default, Clone)]
    struct RecordingNotifier {
        signals: Arc<Mutex<Vec<Signal>>>,
    }

    impl RecordingNotifier {
        fn signals(&self) -> Vec<Signal> {
            self.signals.lock().unwrap().clone()
        }
    }

    impl Notifier for RecordingNotifier {
        fn busy_started(&self, doc: &DocumentRef) {
            self.signals
                .lock()
                .unwrap()
                .push(Signal::BusyStarted(doc.name()));
        }

        fn busy_finished(&self) {
            self.signals.lock().unwrap().push(Signal::BusyFinished);
        }

        fn success(&self, doc: &DocumentRef) {
            self.signals.lock().unwrap().push(Signal::Success(doc.name()));
        }

        fn failure(&self, message: &str) {
            self.signals
                .lock()
                .unwrap()
                .push(Signal::Failure(message.to_string()));
        }
    }

    struct PanickingDocuments;

    impl DocumentStore for PanickingDocuments {
        fn read(&self, _doc: &DocumentRef) -> anyhow::Result<String> {
            panic!("document store blew up");
        }

        fn write(&self, _doc: &DocumentRef, _text: &str) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn scenario_config(url: &str) -> Configuration {
        Configuration {
            credential: "k".to_string(),
            model_id: "m".to_string(),
            endpoint_url: url.to_string(),
            preferred_tags: "#todo".to_string(),
            extra_instructions: String::new(),
            use_alternate_provider: false,
        }
    }

    fn refiner(
        config: Configuration,
        doc: &DocumentRef,
        body: &str,
    ) -> Refiner<MemorySettingsStore, MemoryDocumentStore, RecordingNotifier> {
        let documents = MemoryDocumentStore::new();
        documents.insert(doc.clone(), body);
        Refiner::new(
            MemorySettingsStore::new(config),
            documents,
            RecordingNotifier::default(),
        )
    }

    #[tokio::test]
    async fn test_end_to_end_success_replaces_body() {
        let server = mock::spawn(
            200,
            r##"{"choices":[{"message":{"content":"- [ ] buy milk #todo\n- [ ] call mom #todo"}}]}"##,
        )
        .await;
        let doc = DocumentRef::new("Errands.md");
        let r = refiner(scenario_config(&server.url), &doc, "buy milk\ncall mom");

        let outcome = r.refine(Trigger::Command, Some(&doc)).await;
        assert_eq!(outcome.state(), RefineState::Succeeded);

        let reqs = server.captured();
        assert_eq!(reqs.len(), 1);
        assert_eq!(reqs[0].authorization.as_deref(), Some("Bearer k"));
        let content = reqs[0].body["messages"][0]["content"]
            .as_str()
            .expect("content");
        assert!(content.contains("#todo"));
        assert!(content.contains("not only headers"));
        assert!(content.ends_with("buy milk\ncall mom"));

        assert_eq!(
            r.documents().get(&doc).as_deref(),
            Some("- [ ] buy milk #todo\n- [ ] call mom #todo")
        );
        assert_eq!(
            r.notifier().signals(),
            vec![
                Signal::BusyStarted("Errands.md".to_string()),
                Signal::Success("Errands.md".to_string()),
                Signal::BusyFinished,
            ]
        );
    }

    #[tokio::test]
    async fn test_end_to_end_server_error_leaves_body() {
        let server = mock::spawn(500, "server error").await;
        let doc = DocumentRef::new("Errands.md");
        let r = refiner(scenario_config(&server.url), &doc, "buy milk\ncall mom");

        let outcome = r.refine(Trigger::Command, Some(&doc)).await;
        assert_eq!(outcome.state(), RefineState::Failed);
        assert_eq!(
            r.documents().get(&doc).as_deref(),
            Some("buy milk\ncall mom")
        );

        let error = outcome.error().expect("error");
        match error {
            RefineError::Completion(CompletionError::ApiStatus { status, body, .. }) => {
                assert_eq!(*status, 500);
                assert_eq!(body, "server error");
            }
            other => panic!("unexpected error: {:?}", other),
        }
        let diagnostic = error.diagnostic();
        assert!(diagnostic.contains("status=500"));
        assert!(diagnostic.contains("server error"));

        assert_eq!(
            r.notifier().signals(),
            vec![
                Signal::BusyStarted("Errands.md".to_string()),
                Signal::Failure(REFINE_FAILED_NOTICE.to_string()),
                Signal::BusyFinished,
            ]
        );
    }

    #[tokio::test]
    async fn test_server_error_diagnostic_reaches_log_while_telemetry_off() {
        let server = mock::spawn(500, "server error").await;
        let doc = DocumentRef::new("Outage-500.md");
        let r = refiner(scenario_config(&server.url), &doc, "buy milk");

        assert!(!telemetry::is_enabled());
        let outcome = r.refine(Trigger::Command, Some(&doc)).await;
        assert_eq!(outcome.state(), RefineState::Failed);

        let log = telemetry::read_test_log();
        let line = log
            .lines()
            .find(|line| line.contains("document=Outage-500.md"))
            .expect("diagnostic line");
        assert!(line.contains("[ERROR] refine"));
        assert!(line.contains("status=500"));
        assert!(line.contains("server error"));
    }

    #[tokio::test]
    async fn test_empty_response_leaves_body() {
        let server = mock::spawn(200, r#"{"choices":[]}"#).await;
        let doc = DocumentRef::new("n.md");
        let r = refiner(scenario_config(&server.url), &doc, "keep me");

        let outcome = r.refine(Trigger::Command, Some(&doc)).await;
        assert!(matches!(
            outcome.error(),
            Some(RefineError::Completion(CompletionError::EmptyResponse))
        ));
        assert_eq!(r.documents().get(&doc).as_deref(), Some("keep me"));
    }

    #[tokio::test]
    async fn test_no_active_document_is_noop() {
        let doc = DocumentRef::new("n.md");
        let r = refiner(scenario_config("http://127.0.0.1:9/unused"), &doc, "body");

        let outcome = r.refine(Trigger::Command, None).await;
        assert_eq!(outcome.state(), RefineState::Idle);
        assert!(matches!(outcome, RefineOutcome::Skipped));
        assert!(r.notifier().signals().is_empty());
    }

    #[tokio::test]
    async fn test_context_menu_only_targets_markdown() {
        let server = mock::spawn(200, r#"{"choices":[{"message":{"content":"done"}}]}"#).await;
        let txt = DocumentRef::new("plain.txt");
        let r = refiner(scenario_config(&server.url), &txt, "body");

        let outcome = r.refine(Trigger::ContextMenu, Some(&txt)).await;
        assert!(matches!(outcome, RefineOutcome::Skipped));
        assert!(server.captured().is_empty());

        let outcome = r.refine(Trigger::Command, Some(&txt)).await;
        assert_eq!(outcome.state(), RefineState::Succeeded);
        assert_eq!(r.documents().get(&txt).as_deref(), Some("done"));
    }

    #[tokio::test]
    async fn test_missing_endpoint_fails_without_request() {
        let doc = DocumentRef::new("n.md");
        let r = refiner(scenario_config("   "), &doc, "body");

        let outcome = r.refine(Trigger::Command, Some(&doc)).await;
        assert!(matches!(outcome.error(), Some(RefineError::MissingEndpoint)));
        assert_eq!(r.documents().get(&doc).as_deref(), Some("body"));
        assert_eq!(
            r.notifier().signals(),
            vec![
                Signal::BusyStarted("n.md".to_string()),
                Signal::Failure(REFINE_FAILED_NOTICE.to_string()),
                Signal::BusyFinished,
            ]
        );
    }

    #[tokio::test]
    async fn test_missing_document_reports_failure() {
        let doc = DocumentRef::new("n.md");
        let r = refiner(scenario_config("http://127.0.0.1:9/unused"), &doc, "body");
        let other = DocumentRef::new("gone.md");

        let outcome = r.refine(Trigger::Command, Some(&other)).await;
        assert!(matches!(outcome.error(), Some(RefineError::Document { .. })));
        assert_eq!(r.notifier().signals().len(), 3);
    }

    #[tokio::test]
    async fn test_busy_indicator_released_on_panic() {
        let notifier = RecordingNotifier::default();
        let r = Arc::new(Refiner::new(
            MemorySettingsStore::new(scenario_config("http://127.0.0.1:9/unused")),
            PanickingDocuments,
            notifier.clone(),
        ));
        let doc = DocumentRef::new("n.md");

        let handle = tokio::spawn({
            let r = r.clone();
            async move { r.refine(Trigger::Command, Some(&doc)).await }
        });
        let joined = handle.await;
        assert!(joined.expect_err("task should panic").is_panic());
        assert_eq!(
            notifier.signals(),
            vec![Signal::BusyStarted("n.md".to_string()), Signal::BusyFinished]
        );
    }
}
