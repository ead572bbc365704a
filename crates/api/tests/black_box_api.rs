use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde_json::{Value, json};

use lotwise_ai::{CompletionClient, ScriptedCompletionClient, Usage};
use lotwise_api::app::{AppState, BatchLimits, SharedProcessor, build_app};
use lotwise_core::{JobId, SystemClock, UserId};
use lotwise_infra::jobs::{
    FixedJitter, InMemoryJobStore, Job, JobProcessor, JobStats, JobStatus, JobStore,
    JobStoreError, RetryPolicy,
};
use lotwise_infra::usage::{InMemoryUsageLedger, UsageLedger};

const TOKEN: &str = "worker-secret";

struct TestServer {
    base_url: String,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn(store: Arc<dyn JobStore>, client: Arc<ScriptedCompletionClient>) -> Self {
        let client: Arc<dyn CompletionClient> = client;
        let ledger: Arc<dyn UsageLedger> = InMemoryUsageLedger::arc();
        let processor: SharedProcessor = JobProcessor::new(
            store,
            client,
            ledger,
            Arc::new(SystemClock),
        )
        .with_retry_policy(RetryPolicy::new(Arc::new(FixedJitter(0.0))));

        let state = AppState {
            processor: Arc::new(processor),
            batch_limits: BatchLimits {
                default_size: 10,
                max_size: 50,
            },
        };

        // Same router as prod, bound to an ephemeral port.
        let app = build_app(state, TOKEN);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { base_url, handle }
    }

    /// Empty in-memory queue, provider with nothing scripted.
    async fn empty() -> Self {
        Self::spawn(InMemoryJobStore::arc(), Arc::new(ScriptedCompletionClient::new())).await
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn enqueue(store: &InMemoryJobStore, job_type: &str, payload: Value) -> JobId {
    store
        .enqueue(Job::with_type_name(UserId::new(), job_type, payload, Utc::now()))
        .await
        .unwrap()
}

#[tokio::test]
async fn health_is_public() {
    let server = TestServer::empty().await;
    let res = reqwest::get(server.url("/health")).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn process_batch_requires_worker_token() {
    let server = TestServer::empty().await;
    let client = reqwest::Client::new();

    let missing = client.post(server.url("/jobs/process-batch")).send().await.unwrap();
    assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);
    let body: Value = missing.json().await.unwrap();
    assert_eq!(body["error"], "unauthorized");

    let wrong = client
        .post(server.url("/jobs/process-batch"))
        .bearer_auth("not-the-token")
        .send()
        .await
        .unwrap();
    assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);

    let stats = client.get(server.url("/jobs/stats")).send().await.unwrap();
    assert_eq!(stats.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn empty_pool_returns_empty_report() {
    let server = TestServer::empty().await;
    let res = reqwest::Client::new()
        .post(server.url("/jobs/process-batch"))
        .bearer_auth(TOKEN)
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body, json!({"processed": 0, "results": []}));
}

#[tokio::test]
async fn invalid_batch_sizes_are_rejected() {
    let server = TestServer::empty().await;
    let client = reqwest::Client::new();

    for body in [json!({"batchSize": 0}), json!({"batchSize": 51}), json!({"batchSize": -1})] {
        let res = client
            .post(server.url("/jobs/process-batch"))
            .bearer_auth(TOKEN)
            .json(&body)
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST, "body {body}");
        let err: Value = res.json().await.unwrap();
        assert_eq!(err["error"], "invalid_batch_size");
    }

    let res = client
        .post(server.url("/jobs/process-batch?batchSize=lots"))
        .bearer_auth(TOKEN)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn processes_claimed_jobs_and_reports_each() {
    let store = InMemoryJobStore::arc();
    let scripted = Arc::new(ScriptedCompletionClient::new());
    let normalize = enqueue(&store, "NORMALIZE", json!({"title": "vintage levis 501"})).await;
    let unknown = enqueue(&store, "TRANSLATE", json!({"text": "hola"})).await;
    scripted.push_text(
        r#"{"title": "Vintage Levi's 501", "brand": "Levi's", "confidence": 0.92}"#,
        Usage::new(120, 30),
    );

    let server = TestServer::spawn(store.clone(), scripted).await;
    let res = reqwest::Client::new()
        .post(server.url("/jobs/process-batch"))
        .bearer_auth(TOKEN)
        .json(&json!({"batchSize": 5}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let body: Value = res.json().await.unwrap();
    assert_eq!(body["processed"], 2);
    let results = body["results"].as_array().unwrap();
    assert_eq!(results.len(), 2);

    let find = |id: JobId| {
        results
            .iter()
            .find(|r| r["jobId"] == id.to_string())
            .cloned()
            .unwrap()
    };
    let ok = find(normalize);
    assert_eq!(ok["status"], "SUCCEEDED");
    assert_eq!(ok["tokensUsed"], 150);
    assert!(ok["costEstimateUSD"].as_f64().unwrap() > 0.0);

    let failed = find(unknown);
    assert_eq!(failed["status"], "FAILED");
    assert_eq!(failed["tokensUsed"], 0);

    let stored = store.get(unknown).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Failed);
    assert_eq!(stored.attempts, 0);
}

#[tokio::test]
async fn query_batch_size_limits_claim() {
    let store = InMemoryJobStore::arc();
    let scripted = Arc::new(ScriptedCompletionClient::new());
    for i in 0..3 {
        enqueue(&store, "NORMALIZE", json!({"title": format!("item {i}")})).await;
        scripted.push_text(r#"{"title": "Item", "confidence": 0.9}"#, Usage::new(10, 5));
    }

    let server = TestServer::spawn(store.clone(), scripted).await;
    let client = reqwest::Client::new();
    let res = client
        .post(server.url("/jobs/process-batch?batchSize=1"))
        .bearer_auth(TOKEN)
        .send()
        .await
        .unwrap();
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["processed"], 1);

    let stats: Value = client
        .get(server.url("/jobs/stats"))
        .bearer_auth(TOKEN)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stats["pending"], 2);
    assert_eq!(stats["succeeded"], 1);
    assert_eq!(stats["needsReview"], 0);
}

/// Store whose backend is unreachable.
struct UnreachableStore;

#[async_trait]
impl JobStore for UnreachableStore {
    async fn enqueue(&self, _job: Job) -> Result<JobId, JobStoreError> {
        Err(JobStoreError::Storage("connection refused".to_string()))
    }

    async fn get(&self, _job_id: JobId) -> Result<Option<Job>, JobStoreError> {
        Err(JobStoreError::Storage("connection refused".to_string()))
    }

    async fn claim_batch(
        &self,
        _limit: usize,
        _now: DateTime<Utc>,
    ) -> Result<Vec<Job>, JobStoreError> {
        Err(JobStoreError::Storage("connection refused".to_string()))
    }

    async fn save_claimed(&self, _job: &Job) -> Result<(), JobStoreError> {
        Err(JobStoreError::Storage("connection refused".to_string()))
    }

    async fn stats(&self) -> Result<JobStats, JobStoreError> {
        Err(JobStoreError::Storage("connection refused".to_string()))
    }
}

#[tokio::test]
async fn persistence_failure_maps_to_503() {
    let scripted = Arc::new(ScriptedCompletionClient::new());
    let server = TestServer::spawn(Arc::new(UnreachableStore), scripted).await;
    let client = reqwest::Client::new();

    let res = client
        .post(server.url("/jobs/process-batch"))
        .bearer_auth(TOKEN)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "persistence_error");

    let stats = client
        .get(server.url("/jobs/stats"))
        .bearer_auth(TOKEN)
        .send()
        .await
        .unwrap();
    assert_eq!(stats.status(), StatusCode::SERVICE_UNAVAILABLE);
}
