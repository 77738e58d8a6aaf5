use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use eduflow::diagnostics::GenerationLog;
use eduflow::{
    extract_topic, CardGenerator, CardService, CompletionBackend, CompletionRequest, CreateUserRequest, Database,
    FallbackCatalog, GenerationBackend, GenerationPolicy, LLMProviderFactory, LLMProviderType, User,
};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Replays canned completions and records every user prompt it receives.
struct ScriptedBackend {
    responses: Mutex<VecDeque<String>>,
    prompts: Arc<Mutex<Vec<String>>>,
}

impl ScriptedBackend {
    fn new(responses: &[&str]) -> (Self, Arc<Mutex<Vec<String>>>) {
        let prompts = Arc::new(Mutex::new(Vec::new()));
        let backend = Self {
            responses: Mutex::new(responses.iter().map(|r| r.to_string()).collect()),
            prompts: prompts.clone(),
        };
        (backend, prompts)
    }
}

#[async_trait]
impl CompletionBackend for ScriptedBackend {
    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        self.prompts.lock().unwrap().push(request.user_prompt.clone());
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| anyhow!("script exhausted"))
    }

    fn provider_name(&self) -> &str {
        "scripted"
    }
}

async fn setup(backend: GenerationBackend, history_window: u32) -> (CardService, Database) {
    let db = Database::new("sqlite::memory:").await.unwrap();
    let generator = CardGenerator::new(
        backend,
        FallbackCatalog::builtin(),
        GenerationPolicy::default(),
        GenerationLog::disabled(),
    );
    (CardService::new(db.clone(), generator, history_window), db)
}

async fn learner(service: &CardService, subjects: &[&str]) -> User {
    service
        .create_user(CreateUserRequest {
            name: "测试学生".to_string(),
            phase: "初中".to_string(),
            grade: "初三".to_string(),
            subjects: subjects.iter().map(|s| s.to_string()).collect(),
        })
        .await
        .unwrap()
}

fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 9, d).unwrap()
}

#[tokio::test]
async fn test_historical_topic_triggers_retry() {
    let (backend, prompts) = ScriptedBackend::new(&["勾股定理：再讲一遍", "圆周率：约等于 3.14159"]);
    let (service, db) = setup(GenerationBackend::configured(backend), 15).await;
    let user = learner(&service, &["数学"]).await;
    db.insert_entry(user.id, day(1), "数学", "勾股定理：a²+b²=c²").await.unwrap();

    let cards = service.generate_cards(user.id, day(2), false).await.unwrap();

    assert_eq!(cards[0].content, "圆周率：约等于 3.14159");
    let prompts = prompts.lock().unwrap();
    assert_eq!(prompts.len(), 2);
    assert!(prompts[0].contains("勾股定理"));
}

#[tokio::test]
async fn test_second_subject_avoids_first_subject_topic() {
    let (backend, prompts) = ScriptedBackend::new(&[
        "能量守恒：能量不会凭空产生",
        "能量守恒：换个说法",
        "牛顿第一定律：惯性",
    ]);
    let (service, _db) = setup(GenerationBackend::configured(backend), 15).await;
    let user = learner(&service, &["物理", "化学"]).await;

    let cards = service.generate_cards(user.id, day(3), false).await.unwrap();

    assert_eq!(extract_topic(&cards[0].content), "能量守恒");
    assert_eq!(extract_topic(&cards[1].content), "牛顿第一定律");
    let prompts = prompts.lock().unwrap();
    assert_eq!(prompts.len(), 3);
    assert!(prompts[1].contains("能量守恒"), "second subject prompt should list the first topic");
}

#[tokio::test]
async fn test_exhausted_retries_keep_last_candidate() {
    let (backend, prompts) = ScriptedBackend::new(&[
        "光合作用：第一次",
        "光合作用：第二次",
        "光合作用：第三次",
        "光合作用：第四次",
        "细胞分裂：不会被请求",
    ]);
    let (service, db) = setup(GenerationBackend::configured(backend), 15).await;
    let user = learner(&service, &["生物"]).await;
    db.insert_entry(user.id, day(1), "生物", "光合作用：植物制造养分").await.unwrap();

    let cards = service.generate_cards(user.id, day(2), false).await.unwrap();

    assert_eq!(cards[0].content, "光合作用：第四次");
    assert_eq!(prompts.lock().unwrap().len(), 4);
}

#[tokio::test]
async fn test_history_window_limits_exclusions() {
    let (backend, prompts) = ScriptedBackend::new(&["化学键：原子间的作用力"]);
    let (service, db) = setup(GenerationBackend::configured(backend), 1).await;
    let user = learner(&service, &["化学"]).await;
    db.insert_entry(user.id, day(1), "化学", "化学键：较早的卡片").await.unwrap();
    db.insert_entry(user.id, day(2), "化学", "元素周期表：较新的卡片").await.unwrap();

    let cards = service.generate_cards(user.id, day(3), false).await.unwrap();

    // Only the most recent entry is inside the window.
    assert_eq!(cards[0].content, "化学键：原子间的作用力");
    assert_eq!(prompts.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_unreachable_provider_falls_back_to_catalog() {
    let provider = LLMProviderFactory::create_provider(
        LLMProviderType::OpenAI,
        "test-key".to_string(),
        Some("http://127.0.0.1:9".to_string()),
        None,
    );
    let db = Database::new("sqlite::memory:").await.unwrap();
    let generator = CardGenerator::new(
        GenerationBackend::configured(provider),
        FallbackCatalog::builtin(),
        GenerationPolicy {
            card_timeout: Duration::from_secs(2),
            ..GenerationPolicy::default()
        },
        GenerationLog::disabled(),
    );
    let service = CardService::new(db, generator, 15);
    let user = learner(&service, &["数学"]).await;

    let cards = service.generate_cards(user.id, day(4), false).await.unwrap();

    let candidates = FallbackCatalog::builtin().candidates("数学", "初中");
    assert!(candidates.contains(&cards[0].content));
}

#[tokio::test]
async fn test_backend_error_mid_call_only_affects_that_subject() {
    // One scripted answer: the second subject hits an error and uses the catalog.
    let (backend, _prompts) = ScriptedBackend::new(&["词根词缀：un- 表示否定"]);
    let (service, _db) = setup(GenerationBackend::configured(backend), 15).await;
    let user = learner(&service, &["英语", "数学"]).await;

    let cards = service.generate_cards(user.id, day(5), false).await.unwrap();

    assert_eq!(cards[0].content, "词根词缀：un- 表示否定");
    let candidates = FallbackCatalog::builtin().candidates("数学", "初中");
    assert!(candidates.contains(&cards[1].content));
}
