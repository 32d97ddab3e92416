use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use uuid::Uuid;

use crate::backend::{JobBackend, JobResource, LABEL_JOB_ID, LABEL_OWNER, LABEL_PRIORITY};
use crate::error::{Error, Result};
use crate::models::{JobRecord, JobStatus};
use crate::queue::{PriorityQueue, QueueEntry};
use crate::reconciler::Reconciler;

/// The in-flight table: id -> record for every dispatched job that has not
/// been reconciled away. One lock guards all reads and mutations; worker
/// loops, dispatch tasks and the reconciler all serialize through it.
pub type InflightTable = Arc<Mutex<HashMap<Uuid, JobRecord>>>;

/// The worker pool plus reconciler, started and stopped as one unit.
///
/// N consumer loops pull from the queue and record each entry as Running
/// before handing it to a dispatch task, so queue draining is never gated by
/// backend call latency. True backend-call concurrency is bounded by a
/// semaphore with N permits. Records that fail at dispatch time stay in the
/// table (so pollers can observe the error text); records that reach a
/// terminal state through reconciliation are removed immediately.
pub struct Scheduler {
  queue: Arc<PriorityQueue>,
  backend: Arc<dyn JobBackend>,
  inflight: InflightTable,
  dispatch_permits: Arc<Semaphore>,
  namespace: String,
  workers: usize,
  shutdown: CancellationToken,
  handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Scheduler {
  pub fn new(
    queue: Arc<PriorityQueue>,
    backend: Arc<dyn JobBackend>,
    workers: usize,
    namespace: String,
    shutdown: CancellationToken,
  ) -> Arc<Self> {
    Arc::new(Self {
      queue,
      backend,
      inflight: Arc::new(Mutex::new(HashMap::new())),
      dispatch_permits: Arc::new(Semaphore::new(workers)),
      namespace,
      workers,
      shutdown,
      handles: Mutex::new(Vec::new()),
    })
  }

  /// Spawn the reconciler and the worker loops, then wait for the backend
  /// subscription's initial-sync barrier. Submissions may already be queued
  /// before this returns; they only enter the queue and do not depend on
  /// reconciliation readiness.
  pub async fn start(self: Arc<Self>) -> Result<()> {
    let watch = self.backend.subscribe(self.shutdown.clone()).await?;
    let ready = watch.ready;

    let mut handles = self.handles.lock().await;
    let reconciler = Reconciler::new(self.inflight.clone(), self.shutdown.clone());
    handles.push(tokio::spawn(reconciler.run(watch.events)));
    for worker_id in 0..self.workers {
      let this = self.clone();
      handles.push(tokio::spawn(async move { this.worker_loop(worker_id).await }));
    }
    drop(handles);

    ready
      .await
      .map_err(|_| Error::Backend("watch ended before initial sync completed".into()))?;
    info!(workers = self.workers, namespace = %self.namespace, "scheduler started");
    Ok(())
  }

  /// Cancel the shared token, close the queue, and join every worker loop
  /// and the reconciler. No internal timeout; the caller applies an outer
  /// deadline if it needs one.
  pub async fn stop(&self) {
    info!("stopping scheduler");
    self.shutdown.cancel();
    self.queue.close().await;
    let mut handles = self.handles.lock().await;
    for handle in handles.drain(..) {
      if let Err(e) = handle.await {
        error!(error = %e, "scheduler task panicked");
      }
    }
    info!("all workers and reconciler stopped");
  }

  /// Unordered snapshot of the in-flight table.
  pub async fn list_running(&self) -> Vec<JobRecord> {
    let inflight = self.inflight.lock().await;
    inflight.values().cloned().collect()
  }

  async fn worker_loop(self: Arc<Self>, worker_id: usize) {
    info!(worker_id, "worker started");
    loop {
      if self.shutdown.is_cancelled() {
        info!(worker_id, "worker stopping");
        return;
      }
      let Some(entry) = self.queue.dequeue_blocking().await else {
        info!(worker_id, "queue drained, worker exiting");
        return;
      };
      {
        let mut inflight = self.inflight.lock().await;
        inflight.insert(entry.id, entry.running_record(Utc::now()));
      }
      let this = self.clone();
      tokio::spawn(async move { this.dispatch(entry).await });
    }
  }

  /// One dispatch task per dequeued entry. Runs concurrently with the
  /// consumer loops but holds a semaphore permit across the backend call,
  /// capping backend concurrency at the configured limit.
  async fn dispatch(self: Arc<Self>, entry: QueueEntry) {
    let _permit = match self.dispatch_permits.clone().acquire_owned().await {
      Ok(permit) => permit,
      Err(_) => return,
    };
    let resource = self.build_resource(&entry);
    let job_name = resource.name.clone();
    match self.backend.create_job(resource).await {
      Ok(()) => {
        // The record stays Running until the reconciler observes a
        // terminal notification.
        info!(id = %entry.id, job_name = %job_name, "job dispatched");
      }
      Err(e) => {
        error!(id = %entry.id, job_name = %job_name, error = %e, "dispatch failed");
        let mut inflight = self.inflight.lock().await;
        if let Some(record) = inflight.get_mut(&entry.id) {
          record.status = JobStatus::Failed;
          record.error_message = Some(e.to_string());
          record.finished_at = Some(Utc::now());
        }
      }
    }
  }

  fn build_resource(&self, entry: &QueueEntry) -> JobResource {
    let id = entry.id.to_string();
    let labels = HashMap::from([
      (LABEL_OWNER.to_string(), "true".to_string()),
      (LABEL_JOB_ID.to_string(), id.clone()),
      (LABEL_PRIORITY.to_string(), entry.spec.priority.to_string()),
    ]);
    JobResource {
      name: format!("{}-{}", entry.spec.name, &id[..8]),
      namespace: self.namespace.clone(),
      labels,
      template: entry.spec.template.clone(),
      status: Default::default(),
    }
  }
}
