#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use epdd_algo::retry::RetryPolicy;
use epdd_algo::{
    Ack, CancelResponse, FrameStatus, HealthStatus, ProgressFrame, ProgressFrames, RpcError,
    SubmitTask, WorkerRpc,
};
use epdd_core::job_events::WsEnvelope;
use epdd_core::scheme::Scheme;
use epdd_core::submission::SubmitJob;
use epdd_db::cache::MemoryCache;
use epdd_db::memory::MemoryJobStore;
use epdd_db::models::job::Job;
use epdd_db::models::status::JobStatus;
use epdd_events::{BroadcastHub, HubConfig, HubMessage, Subscription};
use epdd_pipeline::{IdempotencyGuard, JobLifecycle, JobService, LifecycleConfig};
use futures::channel::mpsc;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;

// ---------------------------------------------------------------------------
// Fake worker
// ---------------------------------------------------------------------------

/// One scripted answer to `watch_progress`.
pub enum Script {
    Frames(Vec<Result<ProgressFrame, RpcError>>),
    Live(mpsc::UnboundedReceiver<Result<ProgressFrame, RpcError>>),
    OpenError(RpcError),
}

/// In-process [`WorkerRpc`] with scripted answers.
///
/// `watch_progress` pops the next [`Script`]; with none queued it returns a
/// stream that never yields, so relays sit idle.
pub struct FakeWorker {
    pub schemes: Mutex<Vec<Scheme>>,
    pub list_error: Mutex<Option<RpcError>>,
    pub submit_error: Mutex<Option<RpcError>>,
    /// Worker-side status returned from `cancel`.
    pub cancel_status: Mutex<String>,
    pub health_error: Mutex<Option<RpcError>>,
    scripts: Mutex<VecDeque<Script>>,
    pub submit_calls: AtomicUsize,
    pub cancel_calls: AtomicUsize,
    pub watch_calls: AtomicUsize,
}

impl FakeWorker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            schemes: Mutex::new(vec![scheme("KBM-WF01", &["window"])]),
            list_error: Mutex::new(None),
            submit_error: Mutex::new(None),
            cancel_status: Mutex::new("CANCELLED".to_string()),
            health_error: Mutex::new(None),
            scripts: Mutex::new(VecDeque::new()),
            submit_calls: AtomicUsize::new(0),
            cancel_calls: AtomicUsize::new(0),
            watch_calls: AtomicUsize::new(0),
        })
    }

    pub fn script(&self, script: Script) {
        self.scripts.lock().unwrap().push_back(script);
    }

    /// Queue a live stream and return its sending half.
    pub fn live_stream(&self) -> mpsc::UnboundedSender<Result<ProgressFrame, RpcError>> {
        let (tx, rx) = mpsc::unbounded();
        self.script(Script::Live(rx));
        tx
    }
}

#[async_trait]
impl WorkerRpc for FakeWorker {
    async fn list_schemes(&self) -> Result<Vec<Scheme>, RpcError> {
        if let Some(e) = self.list_error.lock().unwrap().clone() {
            return Err(e);
        }
        Ok(self.schemes.lock().unwrap().clone())
    }

    async fn submit(&self, task: &SubmitTask) -> Result<Ack, RpcError> {
        self.submit_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(e) = self.submit_error.lock().unwrap().clone() {
            return Err(e);
        }
        Ok(Ack {
            success: true,
            message: task.task_id.clone(),
        })
    }

    async fn watch_progress(&self, _job_id: &str) -> Result<ProgressFrames, RpcError> {
        self.watch_calls.fetch_add(1, Ordering::SeqCst);
        let next = self.scripts.lock().unwrap().pop_front();
        match next {
            Some(Script::Frames(frames)) => Ok(futures::stream::iter(frames).boxed()),
            Some(Script::Live(rx)) => Ok(rx.boxed()),
            Some(Script::OpenError(e)) => Err(e),
            None => Ok(futures::stream::pending().boxed()),
        }
    }

    async fn cancel(&self, job_id: &str, _force: bool) -> Result<CancelResponse, RpcError> {
        self.cancel_calls.fetch_add(1, Ordering::SeqCst);
        Ok(CancelResponse {
            accepted: true,
            message: job_id.to_string(),
            status: self.cancel_status.lock().unwrap().clone(),
        })
    }

    async fn health(&self) -> Result<HealthStatus, RpcError> {
        if let Some(e) = self.health_error.lock().unwrap().clone() {
            return Err(e);
        }
        Ok(HealthStatus {
            status: "SERVING".to_string(),
            metrics: [("gpu".to_string(), "idle".to_string())].into(),
        })
    }
}

// ---------------------------------------------------------------------------
// Builders
// ---------------------------------------------------------------------------

pub fn scheme(code: &str, required: &[&str]) -> Scheme {
    Scheme {
        model: "KBM".to_string(),
        code: code.to_string(),
        name: format!("Scheme {code}"),
        class_name: "KbmWf01".to_string(),
        resource_type: "cpu".to_string(),
        description: String::new(),
        required_params: required.iter().map(|s| s.to_string()).collect(),
    }
}

pub fn request(scheme: &str) -> SubmitJob {
    SubmitJob {
        scheme: scheme.to_string(),
        data_id: "sample_001".to_string(),
        params: serde_json::json!({"window": 5}),
        user_id: "u1".to_string(),
    }
}

pub fn frame(job_id: &str, percentage: i32, message: &str) -> ProgressFrame {
    ProgressFrame {
        task_id: job_id.to_string(),
        percentage,
        message: message.to_string(),
        stage: None,
        metrics: Default::default(),
        timestamp: 0,
        status: None,
        result: None,
        error: None,
    }
}

pub fn success_frame(job_id: &str, result: serde_json::Value) -> ProgressFrame {
    ProgressFrame {
        status: Some(FrameStatus::Success),
        result: Some(result),
        ..frame(job_id, 100, "done")
    }
}

pub fn fast_relay_policy() -> RetryPolicy {
    RetryPolicy {
        initial_backoff: Duration::from_millis(10),
        max_backoff: Duration::from_millis(40),
        ..Default::default()
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub struct Harness {
    pub store: Arc<MemoryJobStore>,
    pub cache: Arc<MemoryCache>,
    pub hub: BroadcastHub,
    pub lifecycle: Arc<JobLifecycle>,
    pub worker: Arc<FakeWorker>,
    pub service: JobService,
    pub cancel: CancellationToken,
}

/// Wire every component against in-process collaborators.
pub fn harness() -> Harness {
    let store = Arc::new(MemoryJobStore::new());
    let cache = Arc::new(MemoryCache::new());
    let cancel = CancellationToken::new();
    let (hub, _hub_task) = BroadcastHub::spawn(HubConfig::default(), cancel.clone());
    let lifecycle = Arc::new(JobLifecycle::new(
        store.clone(),
        cache.clone(),
        hub.clone(),
        LifecycleConfig::default(),
    ));
    let worker = FakeWorker::new();
    let service = JobService::new(
        lifecycle.clone(),
        worker.clone(),
        IdempotencyGuard::new(cache.clone(), IdempotencyGuard::DEFAULT_TTL),
        fast_relay_policy(),
        cancel.clone(),
    );
    Harness {
        store,
        cache,
        hub,
        lifecycle,
        worker,
        service,
        cancel,
    }
}

// ---------------------------------------------------------------------------
// Waiting helpers
// ---------------------------------------------------------------------------

/// Poll until the job reaches `status`, panicking after two seconds.
pub async fn wait_for_status(lifecycle: &JobLifecycle, job_id: &str, status: JobStatus) -> Job {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        let job = lifecycle.get_job(job_id).await.unwrap();
        if job.status == status {
            return job;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "job {job_id} stuck in {} waiting for {status}",
            job.status
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Next payload envelope on a subscription, skipping heartbeat pings.
pub async fn next_envelope(sub: &mut Subscription) -> WsEnvelope {
    loop {
        let message = tokio::time::timeout(Duration::from_secs(2), sub.receiver.recv())
            .await
            .expect("timed out waiting for a hub message")
            .expect("subscription closed");
        if let HubMessage::Payload(bytes) = message {
            return serde_json::from_slice(&bytes).unwrap();
        }
    }
}

/// Assert nothing is queued for the subscriber once the hub has drained
/// its command queue.
pub async fn assert_no_envelope(hub: &BroadcastHub, sub: &mut Subscription) {
    // Counting round-trips through the hub loop, so earlier publishes have
    // been delivered by the time it returns.
    hub.subscriber_count(&sub.handle.job_id).await.unwrap();
    assert!(sub.receiver.try_recv().is_err(), "unexpected hub message");
}
