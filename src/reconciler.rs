use std::collections::HashMap;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};
use uuid::Uuid;

use crate::backend::{JobEvent, JobResource};
use crate::models::{JobRecord, JobStatus};
use crate::scheduler::InflightTable;

/// Folds backend lifecycle notifications into the in-flight table. This is
/// the only path by which a successfully dispatched job reaches a terminal
/// state.
pub struct Reconciler {
  inflight: InflightTable,
  shutdown: CancellationToken,
}

impl Reconciler {
  pub fn new(inflight: InflightTable, shutdown: CancellationToken) -> Self {
    Self { inflight, shutdown }
  }

  /// Consume events until cancellation or stream end. Records that never
  /// receive a terminal notification are abandoned in memory on shutdown.
  pub async fn run(self, mut events: mpsc::Receiver<JobEvent>) {
    info!("reconciler started");
    loop {
      let event = tokio::select! {
        _ = self.shutdown.cancelled() => break,
        event = events.recv() => match event {
          Some(event) => event,
          None => break,
        },
      };
      match event {
        // Creation events are informational only; a resource existing is
        // not proof of eventual success.
        JobEvent::Added(resource) => {
          debug!(name = %resource.name, "job resource added in cluster");
        }
        JobEvent::Updated(resource) => self.handle_updated(resource).await,
        JobEvent::Deleted(resource) => self.handle_deleted(resource).await,
      }
    }
    info!("reconciler stopped");
  }

  async fn handle_updated(&self, resource: JobResource) {
    if !resource.is_terminal() {
      return;
    }
    info!(
      name = %resource.name,
      succeeded = resource.status.succeeded,
      failed = resource.status.failed,
      "job finished in cluster"
    );
    let mut inflight = self.inflight.lock().await;
    let Some(id) = match_record(&inflight, &resource) else {
      // Already removed or never tracked; expected under races.
      trace!(name = %resource.name, "no in-flight record for terminal update");
      return;
    };
    if let Some(mut record) = inflight.remove(&id) {
      record.finished_at = Some(Utc::now());
      record.status = if resource.status.succeeded > 0 {
        JobStatus::Completed
      } else {
        JobStatus::Failed
      };
      info!(id = %id, status = %record.status, "job reconciled");
    }
  }

  async fn handle_deleted(&self, resource: JobResource) {
    let mut inflight = self.inflight.lock().await;
    if let Some(id) = match_record(&inflight, &resource) {
      // Fate unknown: the backend resource is gone, so no terminal status.
      inflight.remove(&id);
      debug!(id = %id, name = %resource.name, "job resource deleted, dropping record");
    }
  }
}

/// Correlation id label first; resource-name equality only as a legacy
/// fallback for resources dispatched without the label. A resource carrying
/// a correlation id matches by that id or not at all: a foreign resource
/// with a colliding name must never claim one of our records.
fn match_record(inflight: &HashMap<Uuid, JobRecord>, resource: &JobResource) -> Option<Uuid> {
  if let Some(raw) = resource.correlation_id() {
    if let Ok(id) = Uuid::parse_str(raw) {
      return inflight.contains_key(&id).then_some(id);
    }
  }
  inflight
    .iter()
    .find(|(_, record)| record.name == resource.name)
    .map(|(id, _)| *id)
}
