use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Serialize, Deserialize};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::error::Result;

/// Label marking a resource as created by this scheduler; the watch
/// subscription filters on it.
pub const LABEL_OWNER: &str = "jobsched/owner";
/// Label carrying the correlation id assigned at enqueue time.
pub const LABEL_JOB_ID: &str = "jobsched/job-id";
/// Label carrying the admission priority.
pub const LABEL_PRIORITY: &str = "jobsched/priority";

/// Execution outcome counters reported by the backend. A resource is
/// terminal once either counter is positive.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourceStatus {
  #[serde(default)]
  pub succeeded: u32,
  #[serde(default)]
  pub failed: u32,
}

/// The backend-facing job resource: what we create, and what lifecycle
/// notifications describe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResource {
  pub name: String,
  pub namespace: String,
  #[serde(default)]
  pub labels: HashMap<String, String>,
  #[serde(default)]
  pub template: serde_json::Value,
  #[serde(default)]
  pub status: ResourceStatus,
}

impl JobResource {
  pub fn correlation_id(&self) -> Option<&str> {
    self.labels.get(LABEL_JOB_ID).map(String::as_str)
  }

  pub fn is_terminal(&self) -> bool {
    self.status.succeeded > 0 || self.status.failed > 0
  }
}

/// Lifecycle notification for a job resource, in backend delivery order.
#[derive(Debug, Clone)]
pub enum JobEvent {
  Added(JobResource),
  Updated(JobResource),
  Deleted(JobResource),
}

/// A live subscription to job resource events.
pub struct JobWatch {
  pub events: mpsc::Receiver<JobEvent>,
  /// Resolves once every pre-existing owned resource has been delivered
  /// (the initial-sync barrier).
  pub ready: oneshot::Receiver<()>,
}

/// The orchestration backend as the scheduler sees it: a create call and a
/// filtered event subscription. Everything else about job execution is the
/// backend's business.
#[async_trait]
pub trait JobBackend: Send + Sync {
  /// Create a remote job resource. The error text is surfaced verbatim on
  /// the failed record.
  async fn create_job(&self, resource: JobResource) -> Result<()>;

  /// Open a subscription scoped to resources this scheduler created. The
  /// stream ends on cancellation or backend disconnect.
  async fn subscribe(&self, shutdown: CancellationToken) -> Result<JobWatch>;
}
