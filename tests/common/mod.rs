#![allow(dead_code)]

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use jobsched::backend::{JobBackend, JobEvent, JobResource, JobWatch};
use jobsched::error::{Error, Result};
use jobsched::models::JobSpec;

/// In-memory orchestrator stub: records created resources, optionally fails
/// every create call, and lets tests feed lifecycle events to the
/// reconciler through the returned sender.
pub struct StubBackend {
  fail_with: Option<String>,
  pub created: Mutex<Vec<JobResource>>,
  events_rx: Mutex<Option<mpsc::Receiver<JobEvent>>>,
}

impl StubBackend {
  pub fn succeeding() -> (Arc<Self>, mpsc::Sender<JobEvent>) {
    Self::new(None)
  }

  pub fn failing(message: &str) -> (Arc<Self>, mpsc::Sender<JobEvent>) {
    Self::new(Some(message.to_string()))
  }

  fn new(fail_with: Option<String>) -> (Arc<Self>, mpsc::Sender<JobEvent>) {
    let (events_tx, events_rx) = mpsc::channel(16);
    let stub = Arc::new(Self {
      fail_with,
      created: Mutex::new(Vec::new()),
      events_rx: Mutex::new(Some(events_rx)),
    });
    (stub, events_tx)
  }
}

#[async_trait]
impl JobBackend for StubBackend {
  async fn create_job(&self, resource: JobResource) -> Result<()> {
    if let Some(message) = &self.fail_with {
      return Err(Error::Backend(message.clone()));
    }
    self.created.lock().await.push(resource);
    Ok(())
  }

  async fn subscribe(&self, _shutdown: CancellationToken) -> Result<JobWatch> {
    let events = self
      .events_rx
      .lock()
      .await
      .take()
      .ok_or_else(|| Error::Backend("stub supports a single subscription".into()))?;
    // No pre-existing resources: the initial sync completes immediately.
    let (ready_tx, ready) = oneshot::channel();
    let _ = ready_tx.send(());
    Ok(JobWatch { events, ready })
  }
}

pub fn spec(name: &str, priority: i32) -> JobSpec {
  JobSpec {
    name: name.into(),
    priority,
    template: serde_json::json!({"image": "alpine", "cmd": ["true"]}),
  }
}

/// Poll `condition` every 10ms until it holds, panicking after 5 seconds.
pub async fn wait_until<F, Fut>(description: &str, mut condition: F)
where
  F: FnMut() -> Fut,
  Fut: Future<Output = bool>,
{
  let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
  while tokio::time::Instant::now() < deadline {
    if condition().await {
      return;
    }
    tokio::time::sleep(Duration::from_millis(10)).await;
  }
  panic!("timed out waiting for {description}");
}
