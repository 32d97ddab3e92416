use std::convert::Infallible;
use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info};
use uuid::Uuid;
use warp::Filter;
use warp::http::StatusCode;

use crate::error::Error;
use crate::models::JobSpec;
use crate::queue::PriorityQueue;
use crate::scheduler::Scheduler;

#[derive(Serialize)]
struct SubmitResponse {
  id: Uuid,
}

#[derive(Debug)]
struct ShuttingDown;
impl warp::reject::Reject for ShuttingDown {}

pub fn submit_route(
  queue: Arc<PriorityQueue>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
  warp::path("jobs")
    .and(warp::path::end())
    .and(warp::post())
    .and(warp::body::json())
    .and(with_queue(queue))
    .and_then(handle_submit)
}

pub fn pending_route(
  queue: Arc<PriorityQueue>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
  warp::path!("jobs" / "pending")
    .and(warp::get())
    .and(with_queue(queue))
    .and_then(handle_pending)
}

pub fn running_route(
  scheduler: Arc<Scheduler>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
  warp::path!("jobs" / "running")
    .and(warp::get())
    .and(with_scheduler(scheduler))
    .and_then(handle_running)
}

fn with_queue(
  queue: Arc<PriorityQueue>,
) -> impl Filter<Extract = (Arc<PriorityQueue>,), Error = Infallible> + Clone {
  warp::any().map(move || queue.clone())
}

fn with_scheduler(
  scheduler: Arc<Scheduler>,
) -> impl Filter<Extract = (Arc<Scheduler>,), Error = Infallible> + Clone {
  warp::any().map(move || scheduler.clone())
}

async fn handle_submit(
  spec: JobSpec,
  queue: Arc<PriorityQueue>,
) -> Result<impl warp::Reply, warp::Rejection> {
  match queue.enqueue(spec).await {
    Ok(id) => {
      info!(id = %id, "job accepted");
      Ok(warp::reply::json(&SubmitResponse { id }))
    }
    // Enqueue only fails once the queue has been closed for shutdown.
    Err(Error::QueueClosed) => {
      error!("queue closed, cannot accept job");
      Err(warp::reject::custom(ShuttingDown))
    }
    Err(e) => {
      error!(error = %e, "enqueue failed");
      Err(warp::reject::custom(ShuttingDown))
    }
  }
}

async fn handle_pending(queue: Arc<PriorityQueue>) -> Result<impl warp::Reply, warp::Rejection> {
  Ok(warp::reply::json(&queue.list_pending().await))
}

async fn handle_running(scheduler: Arc<Scheduler>) -> Result<impl warp::Reply, warp::Rejection> {
  Ok(warp::reply::json(&scheduler.list_running().await))
}

pub async fn handle_rejection(err: warp::Rejection) -> Result<impl warp::Reply, warp::Rejection> {
  let (status, message) = if err.find::<ShuttingDown>().is_some() {
    (StatusCode::SERVICE_UNAVAILABLE, "service shutting down")
  } else if err.find::<warp::filters::body::BodyDeserializeError>().is_some() {
    (StatusCode::BAD_REQUEST, "invalid payload")
  } else if err.is_not_found() {
    (StatusCode::NOT_FOUND, "not found")
  } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
    (StatusCode::METHOD_NOT_ALLOWED, "method not allowed")
  } else {
    (StatusCode::INTERNAL_SERVER_ERROR, "internal error")
  };
  Ok(warp::reply::with_status(
    warp::reply::json(&serde_json::json!({ "error": message })),
    status,
  ))
}
