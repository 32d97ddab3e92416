mod common;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use common::{StubBackend, spec, wait_until};
use jobsched::models::JobRecord;
use jobsched::queue::PriorityQueue;
use jobsched::routes::routes;
use jobsched::scheduler::Scheduler;

fn api_under_test(backend: Arc<StubBackend>) -> (Arc<PriorityQueue>, Arc<Scheduler>) {
  let queue = Arc::new(PriorityQueue::new());
  let scheduler = Scheduler::new(
    queue.clone(),
    backend,
    1,
    "default".into(),
    CancellationToken::new(),
  );
  (queue, scheduler)
}

#[tokio::test]
async fn submit_returns_the_assigned_id() {
  let (backend, _events) = StubBackend::succeeding();
  let (queue, scheduler) = api_under_test(backend);
  let api = routes(queue.clone(), scheduler);

  let resp = warp::test::request()
    .method("POST")
    .path("/jobs")
    .json(&spec("hello", 5))
    .reply(&api)
    .await;
  assert_eq!(resp.status(), 200);

  let body: serde_json::Value = serde_json::from_slice(resp.body()).unwrap();
  let id = body["id"].as_str().unwrap();
  let pending = queue.list_pending().await;
  assert_eq!(pending.len(), 1);
  assert_eq!(pending[0].id.to_string(), id);
}

#[tokio::test]
async fn malformed_submission_is_a_400() {
  let (backend, _events) = StubBackend::succeeding();
  let (queue, scheduler) = api_under_test(backend);
  let api = routes(queue, scheduler);

  let resp = warp::test::request()
    .method("POST")
    .path("/jobs")
    .body(r#"{"name": 42}"#)
    .reply(&api)
    .await;
  assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn submission_after_close_is_a_503() {
  let (backend, _events) = StubBackend::succeeding();
  let (queue, scheduler) = api_under_test(backend);
  let api = routes(queue.clone(), scheduler);
  queue.close().await;

  let resp = warp::test::request()
    .method("POST")
    .path("/jobs")
    .json(&spec("late", 1))
    .reply(&api)
    .await;
  assert_eq!(resp.status(), 503);
}

#[tokio::test]
async fn pending_listing_is_insertion_ordered() {
  let (backend, _events) = StubBackend::succeeding();
  let (queue, scheduler) = api_under_test(backend);
  let api = routes(queue.clone(), scheduler);

  // Scheduler not started: everything stays queued.
  queue.enqueue(spec("one", 2)).await.unwrap();
  queue.enqueue(spec("two", 9)).await.unwrap();
  queue.enqueue(spec("three", 5)).await.unwrap();

  let resp = warp::test::request().path("/jobs/pending").reply(&api).await;
  assert_eq!(resp.status(), 200);
  let records: Vec<JobRecord> = serde_json::from_slice(resp.body()).unwrap();
  let names: Vec<&str> = records.iter().map(|r| r.name.as_str()).collect();
  assert_eq!(names, vec!["one", "two", "three"]);
}

#[tokio::test]
async fn running_listing_reflects_the_inflight_table() {
  let (backend, _events) = StubBackend::succeeding();
  let (queue, scheduler) = api_under_test(backend.clone());
  let api = routes(queue.clone(), scheduler.clone());
  scheduler.clone().start().await.unwrap();

  queue.enqueue(spec("worker-bee", 1)).await.unwrap();
  wait_until("dispatch to reach the backend", || async {
    !backend.created.lock().await.is_empty()
  })
  .await;

  let resp = warp::test::request().path("/jobs/running").reply(&api).await;
  assert_eq!(resp.status(), 200);
  let records: Vec<JobRecord> = serde_json::from_slice(resp.body()).unwrap();
  assert_eq!(records.len(), 1);
  assert_eq!(records[0].name, "worker-bee");

  scheduler.stop().await;
}
