//! Shared in-memory doubles for the service, watcher and handler tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use uuid::Uuid;

use shared::error::{AppError, Result};
use shared::storage::ObjectStore;

use crate::analysis::AnalysisClient;
use crate::repo::{TaskMetadata, TaskRepository};
use crate::watcher::Clock;

/// Clock whose time only moves when something sleeps on it.
pub struct ManualClock {
    start: Instant,
    elapsed: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            elapsed: Mutex::new(Duration::ZERO),
        }
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.start + *self.elapsed.lock().unwrap()
    }

    async fn sleep(&self, duration: Duration) {
        *self.elapsed.lock().unwrap() += duration;
    }
}

/// One scripted existence-check response.
#[derive(Debug, Clone, Copy)]
pub enum Step {
    Present,
    Missing,
    Error,
}

/// Object store whose `object_exists` answers follow a script; once the
/// script runs out, `fallback` repeats forever.
pub struct ScriptedStore {
    script: Vec<Step>,
    fallback: Step,
    checks: AtomicUsize,
}

impl ScriptedStore {
    pub fn script(script: Vec<Step>, fallback: Step) -> Self {
        Self {
            script,
            fallback,
            checks: AtomicUsize::new(0),
        }
    }

    pub fn always(step: Step) -> Self {
        Self::script(Vec::new(), step)
    }

    pub fn checks(&self) -> usize {
        self.checks.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectStore for ScriptedStore {
    async fn list_keys(&self) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    async fn get_object(&self, key: &str) -> Result<Vec<u8>> {
        Err(AppError::NotFound(format!("object {key} not found")))
    }

    async fn object_exists(&self, _key: &str) -> Result<bool> {
        let index = self.checks.fetch_add(1, Ordering::SeqCst);
        let step = self.script.get(index).copied().unwrap_or(self.fallback);
        match step {
            Step::Present => Ok(true),
            Step::Missing => Ok(false),
            Step::Error => Err(AppError::Unavailable("store briefly down".into())),
        }
    }

    fn presigned_put_url(&self, key: &str, _expires: Duration) -> Result<String> {
        Ok(format!("mem://put/{key}"))
    }

    fn presigned_get_url(&self, key: &str, _expires: Duration) -> Result<String> {
        Ok(format!("mem://get/{key}"))
    }
}

/// Object store backed by a plain map, for the service-level tests.
#[derive(Default)]
pub struct MemStore {
    objects: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemStore {
    pub fn put(&self, key: &str, bytes: &[u8]) {
        self.objects
            .lock()
            .unwrap()
            .insert(key.to_string(), bytes.to_vec());
    }
}

#[async_trait]
impl ObjectStore for MemStore {
    async fn list_keys(&self) -> Result<Vec<String>> {
        Ok(self.objects.lock().unwrap().keys().cloned().collect())
    }

    async fn get_object(&self, key: &str) -> Result<Vec<u8>> {
        self.objects
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("object {key} not found")))
    }

    async fn object_exists(&self, key: &str) -> Result<bool> {
        Ok(self.objects.lock().unwrap().contains_key(key))
    }

    fn presigned_put_url(&self, key: &str, _expires: Duration) -> Result<String> {
        Ok(format!("mem://put/{key}"))
    }

    fn presigned_get_url(&self, key: &str, _expires: Duration) -> Result<String> {
        Ok(format!("mem://get/{key}"))
    }
}

enum ClientMode {
    Return(bool),
    Fail,
}

/// Analysis client that records every call.
pub struct RecordingClient {
    mode: ClientMode,
    recorded: Mutex<Vec<(Uuid, String)>>,
}

impl RecordingClient {
    pub fn succeeding() -> Self {
        Self::returning(true)
    }

    pub fn returning(status: bool) -> Self {
        Self {
            mode: ClientMode::Return(status),
            recorded: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            mode: ClientMode::Fail,
            recorded: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<(Uuid, String)> {
        self.recorded.lock().unwrap().clone()
    }
}

#[async_trait]
impl AnalysisClient for RecordingClient {
    async fn analyse_task(&self, task_id: Uuid, object_key: &str) -> Result<bool> {
        self.recorded
            .lock()
            .unwrap()
            .push((task_id, object_key.to_string()));
        match self.mode {
            ClientMode::Return(status) => Ok(status),
            ClientMode::Fail => Err(AppError::Unavailable("analysis service down".into())),
        }
    }
}

#[derive(Default)]
pub struct MemTaskRepo {
    tasks: Mutex<HashMap<Uuid, TaskMetadata>>,
}

impl MemTaskRepo {
    pub fn len(&self) -> usize {
        self.tasks.lock().unwrap().len()
    }
}

#[async_trait]
impl TaskRepository for MemTaskRepo {
    async fn create_task(&self, task: &TaskMetadata) -> Result<()> {
        self.tasks.lock().unwrap().insert(task.id, task.clone());
        Ok(())
    }

    async fn get_task(&self, id: Uuid) -> Result<TaskMetadata> {
        self.tasks
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("no task {id}")))
    }
}
