use std::cmp::Ordering;
use std::collections::BinaryHeap;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, Notify};
use tracing::info;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::{JobRecord, JobSpec, JobStatus};

/// An admitted submission waiting to be dispatched. Owned by the queue until
/// popped; ownership transfers to the worker pool on dequeue.
#[derive(Debug, Clone)]
pub struct QueueEntry {
  pub id: Uuid,
  pub spec: JobSpec,
  pub inserted_at: DateTime<Utc>,
  seq: u64,
}

impl QueueEntry {
  pub fn pending_record(&self) -> JobRecord {
    JobRecord {
      id: self.id,
      name: self.spec.name.clone(),
      priority: self.spec.priority,
      status: JobStatus::Pending,
      created_at: self.inserted_at,
      started_at: None,
      finished_at: None,
      error_message: None,
    }
  }

  pub fn running_record(&self, started_at: DateTime<Utc>) -> JobRecord {
    JobRecord {
      id: self.id,
      name: self.spec.name.clone(),
      priority: self.spec.priority,
      status: JobStatus::Running,
      created_at: self.inserted_at,
      started_at: Some(started_at),
      finished_at: None,
      error_message: None,
    }
  }
}

// Max-heap on priority; the admission sequence number breaks ties so equal
// priorities dequeue in insertion order.
impl PartialEq for QueueEntry {
  fn eq(&self, other: &Self) -> bool {
    self.seq == other.seq
  }
}

impl Eq for QueueEntry {}

impl PartialOrd for QueueEntry {
  fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
    Some(self.cmp(other))
  }
}

impl Ord for QueueEntry {
  fn cmp(&self, other: &Self) -> Ordering {
    self
      .spec
      .priority
      .cmp(&other.spec.priority)
      .then_with(|| other.seq.cmp(&self.seq))
  }
}

#[derive(Debug, Default)]
struct Inner {
  heap: BinaryHeap<QueueEntry>,
  next_seq: u64,
  closed: bool,
}

/// Thread-safe, priority-ordered admission buffer with blocking consumption
/// and drain-to-empty close semantics.
#[derive(Debug, Default)]
pub struct PriorityQueue {
  inner: Mutex<Inner>,
  notify: Notify,
}

impl PriorityQueue {
  pub fn new() -> Self {
    Self::default()
  }

  /// Admit a spec, assigning it a fresh id. Never blocks and never fails for
  /// capacity reasons; rejects only once the queue has been closed.
  pub async fn enqueue(&self, spec: JobSpec) -> Result<Uuid> {
    let mut inner = self.inner.lock().await;
    if inner.closed {
      return Err(Error::QueueClosed);
    }
    let entry = QueueEntry {
      id: Uuid::new_v4(),
      inserted_at: Utc::now(),
      seq: inner.next_seq,
      spec,
    };
    inner.next_seq += 1;
    let id = entry.id;
    info!(id = %id, name = %entry.spec.name, priority = entry.spec.priority, "job enqueued");
    inner.heap.push(entry);
    drop(inner);
    self.notify.notify_one();
    Ok(id)
  }

  /// Pop the highest-priority entry, suspending while the queue is empty and
  /// open. Returns `None` only when the queue is closed AND fully drained,
  /// signaling the consumer to exit permanently.
  pub async fn dequeue_blocking(&self) -> Option<QueueEntry> {
    let notified = self.notify.notified();
    tokio::pin!(notified);
    loop {
      // Register for a wakeup before checking the predicate, so an enqueue
      // or close landing between the check and the await is not lost.
      notified.as_mut().enable();
      {
        let mut inner = self.inner.lock().await;
        if let Some(entry) = inner.heap.pop() {
          if !inner.heap.is_empty() {
            // A single Notify permit can coalesce several enqueues; pass
            // the wakeup along while work remains.
            self.notify.notify_one();
          }
          info!(id = %entry.id, name = %entry.spec.name, priority = entry.spec.priority, "job dequeued");
          return Some(entry);
        }
        if inner.closed {
          return None;
        }
      }
      notified.as_mut().await;
      notified.set(self.notify.notified());
    }
  }

  /// Mark the queue closed and wake all blocked consumers. Idempotent.
  /// Entries already queued remain poppable; only new admissions are refused.
  pub async fn close(&self) {
    let mut inner = self.inner.lock().await;
    inner.closed = true;
    drop(inner);
    self.notify.notify_waiters();
  }

  /// Snapshot of queued entries in insertion order, all Pending. Does not
  /// mutate the queue.
  pub async fn list_pending(&self) -> Vec<JobRecord> {
    let inner = self.inner.lock().await;
    let mut entries: Vec<&QueueEntry> = inner.heap.iter().collect();
    entries.sort_by_key(|entry| entry.seq);
    entries.iter().map(|entry| entry.pending_record()).collect()
  }

  pub async fn len(&self) -> usize {
    self.inner.lock().await.heap.len()
  }

  pub async fn is_empty(&self) -> bool {
    self.inner.lock().await.heap.is_empty()
  }
}
