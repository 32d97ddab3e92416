use serde::{Serialize, Deserialize};
use uuid::Uuid;
use chrono::{DateTime, Utc};

/// A user-submitted job: a display name, an urgency, and an opaque template
/// handed verbatim to the orchestration backend. Immutable once accepted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSpec {
  pub name: String,
  pub priority: i32,
  pub template: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
  Pending,
  Running,
  Completed,
  Failed,
}

impl std::fmt::Display for JobStatus {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      JobStatus::Pending => write!(f, "pending"),
      JobStatus::Running => write!(f, "running"),
      JobStatus::Completed => write!(f, "completed"),
      JobStatus::Failed => write!(f, "failed"),
    }
  }
}

/// Observable status of an accepted submission, from enqueue until the
/// process forgets it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
  pub id: Uuid,
  pub name: String,
  pub priority: i32,
  pub status: JobStatus,
  pub created_at: DateTime<Utc>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub started_at: Option<DateTime<Utc>>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub finished_at: Option<DateTime<Utc>>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub error_message: Option<String>,
}
