//! In-process container runtime for tests

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use workspace_runtime::{
    ContainerInspect, ContainerRef, ContainerRuntime, ContainerSpec, ContainerStatus, ExecOutput,
    RuntimeError,
};

#[derive(Debug, Clone)]
struct FakeContainer {
    id: String,
    spec: ContainerSpec,
    status: ContainerStatus,
}

struct FakeInner {
    operations: Mutex<Vec<String>>,
    containers: Mutex<HashMap<String, FakeContainer>>,
    failures: Mutex<HashSet<String>>,
    delays: Mutex<HashMap<String, Duration>>,
    profiles_loaded: AtomicBool,
    next_id: AtomicU64,
}

/// Records every call as `"op:arg"`; failures and delays are programmable per op.
///
/// Ops: `create`, `start`, `stop`, `remove`, `inspect`, `exec`, `profile`.
/// `exec` echoes its command line on stdout.
#[derive(Clone)]
pub struct FakeRuntime {
    inner: Arc<FakeInner>,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(FakeInner {
                operations: Mutex::new(Vec::new()),
                containers: Mutex::new(HashMap::new()),
                failures: Mutex::new(HashSet::new()),
                delays: Mutex::new(HashMap::new()),
                profiles_loaded: AtomicBool::new(true),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn without_profiles(self) -> Self {
        self.inner.profiles_loaded.store(false, Ordering::SeqCst);
        self
    }

    pub fn fail_on(&self, op: &str) {
        self.inner.failures.lock().insert(op.to_string());
    }

    pub fn clear_failure(&self, op: &str) {
        self.inner.failures.lock().remove(op);
    }

    /// Sleep before answering `op`. For `create` the container exists
    /// before the delay starts.
    pub fn delay(&self, op: &str, duration: Duration) {
        self.inner.delays.lock().insert(op.to_string(), duration);
    }

    pub fn operations(&self) -> Vec<String> {
        self.inner.operations.lock().clone()
    }

    /// Number of recorded calls of `op`
    pub fn count(&self, op: &str) -> usize {
        let prefix = format!("{}:", op);
        self.inner
            .operations
            .lock()
            .iter()
            .filter(|o| o.starts_with(&prefix))
            .count()
    }

    pub fn container_count(&self) -> usize {
        self.inner.containers.lock().len()
    }

    pub fn status_of(&self, container: &ContainerRef) -> Option<ContainerStatus> {
        let containers = self.inner.containers.lock();
        Self::find(&containers, container.as_str()).map(|c| c.status)
    }

    /// Most recently created container spec
    pub fn last_spec(&self) -> Option<ContainerSpec> {
        let containers = self.inner.containers.lock();
        containers
            .values()
            .max_by_key(|c| c.id.clone())
            .map(|c| c.spec.clone())
    }

    /// Delete a container behind the orchestrator's back
    pub fn vanish(&self, container: &ContainerRef) {
        let mut containers = self.inner.containers.lock();
        if let Some(id) = Self::find(&containers, container.as_str()).map(|c| c.id.clone()) {
            containers.remove(&id);
        }
    }

    fn find<'a>(
        containers: &'a HashMap<String, FakeContainer>,
        key: &str,
    ) -> Option<&'a FakeContainer> {
        containers
            .get(key)
            .or_else(|| containers.values().find(|c| c.spec.name == key))
    }

    async fn enter(&self, op: &str, arg: &str) -> Result<(), RuntimeError> {
        self.inner.operations.lock().push(format!("{}:{}", op, arg));
        if op != "create" {
            self.pause(op).await;
        }
        if self.inner.failures.lock().contains(op) {
            return Err(RuntimeError::Docker(format!("injected {} failure", op)));
        }
        Ok(())
    }

    async fn pause(&self, op: &str) {
        let delay = self.inner.delays.lock().get(op).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    fn set_status(&self, key: &str, status: ContainerStatus) -> Result<(), RuntimeError> {
        let mut containers = self.inner.containers.lock();
        let id = Self::find(&containers, key)
            .map(|c| c.id.clone())
            .ok_or_else(|| RuntimeError::NotFound(key.to_string()))?;
        if let Some(container) = containers.get_mut(&id) {
            container.status = status;
        }
        Ok(())
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn create_container(&self, spec: &ContainerSpec) -> Result<ContainerRef, RuntimeError> {
        self.enter("create", &spec.name).await?;

        let id = format!("fake-{:04}", self.inner.next_id.fetch_add(1, Ordering::SeqCst));
        {
            let mut containers = self.inner.containers.lock();
            if containers.values().any(|c| c.spec.name == spec.name) {
                return Err(RuntimeError::AlreadyExists(spec.name.clone()));
            }
            containers.insert(
                id.clone(),
                FakeContainer {
                    id: id.clone(),
                    spec: spec.clone(),
                    status: ContainerStatus::Created,
                },
            );
        }

        self.pause("create").await;
        Ok(ContainerRef::new(id))
    }

    async fn start(&self, container: &ContainerRef) -> Result<(), RuntimeError> {
        self.enter("start", container.as_str()).await?;
        self.set_status(container.as_str(), ContainerStatus::Running)
    }

    async fn stop(&self, container: &ContainerRef, _grace: Duration) -> Result<(), RuntimeError> {
        self.enter("stop", container.as_str()).await?;
        self.set_status(container.as_str(), ContainerStatus::Exited)
    }

    async fn remove(&self, container: &ContainerRef) -> Result<(), RuntimeError> {
        self.enter("remove", container.as_str()).await?;
        let mut containers = self.inner.containers.lock();
        let id = Self::find(&containers, container.as_str())
            .map(|c| c.id.clone())
            .ok_or_else(|| RuntimeError::NotFound(container.to_string()))?;
        containers.remove(&id);
        Ok(())
    }

    async fn inspect(&self, container: &ContainerRef) -> Result<ContainerInspect, RuntimeError> {
        self.enter("inspect", container.as_str()).await?;
        let containers = self.inner.containers.lock();
        let found = Self::find(&containers, container.as_str())
            .ok_or_else(|| RuntimeError::NotFound(container.to_string()))?;
        Ok(ContainerInspect {
            container: ContainerRef::new(found.id.clone()),
            name: found.spec.name.clone(),
            status: found.status,
            image: found.spec.image.clone(),
            created_at: chrono::Utc::now(),
            labels: found.spec.labels.clone(),
        })
    }

    async fn exec(
        &self,
        container: &ContainerRef,
        command: &[String],
    ) -> Result<ExecOutput, RuntimeError> {
        self.enter("exec", container.as_str()).await?;
        let containers = self.inner.containers.lock();
        let found = Self::find(&containers, container.as_str())
            .ok_or_else(|| RuntimeError::NotFound(container.to_string()))?;
        if found.status != ContainerStatus::Running {
            return Err(RuntimeError::Docker(format!(
                "container {} is not running",
                container
            )));
        }
        Ok(ExecOutput {
            stdout: format!("{}\n", command.join(" ")),
            stderr: String::new(),
            exit_code: 0,
        })
    }

    async fn confinement_profile_loaded(&self, profile: &str) -> Result<bool, RuntimeError> {
        self.enter("profile", profile).await?;
        Ok(self.inner.profiles_loaded.load(Ordering::SeqCst))
    }
}
