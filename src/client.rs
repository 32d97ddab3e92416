use serde::Deserialize;
use tokio_stream::StreamExt;
use tokio::sync::{mpsc, oneshot};
use tokio_retry::Retry;
use tokio_retry::strategy::ExponentialBackoff;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use async_trait::async_trait;

use crate::backend::{JobBackend, JobEvent, JobResource, JobWatch, LABEL_OWNER};
use crate::config::Config;
use crate::error::{Error, Result};

static MAX_RETRIES: usize = 5;
static DELAY: u64 = 100;

const EVENT_CHANNEL_CAPACITY: usize = 64;
const RECONNECT_CEILING: std::time::Duration = std::time::Duration::from_secs(30);

/// One line of the backend's newline-delimited watch stream.
#[derive(Debug, Deserialize)]
struct WatchLine {
  #[serde(rename = "type")]
  kind: String,
  object: JobResource,
}

/// REST client for the orchestration backend. Job resources live under
/// `{base}/namespaces/{ns}/jobs`; the same collection endpoint serves
/// creation (POST), listing (GET) and watching (GET ?watch=true, one JSON
/// event per line).
pub struct HttpBackend {
  http: reqwest::Client,
  base_url: String,
  namespace: String,
}

impl HttpBackend {
  /// Build a client and verify the backend is reachable, retrying with
  /// exponential backoff. A failure here is fatal to startup: the scheduler
  /// cannot run without a working backend connection.
  pub async fn connect(config: &Config) -> Result<Self> {
    let mut headers = reqwest::header::HeaderMap::new();
    if let Some(token) = &config.backend_token {
      let value = format!("Bearer {token}")
        .parse()
        .map_err(|_| Error::Config("BACKEND_TOKEN is not a valid header value".into()))?;
      headers.insert(reqwest::header::AUTHORIZATION, value);
    }
    let http = reqwest::Client::builder().default_headers(headers).build()?;

    let backend = Self {
      http,
      base_url: config.backend_url.trim_end_matches('/').to_string(),
      namespace: config.namespace.clone(),
    };
    Retry::spawn(ExponentialBackoff::from_millis(DELAY).take(MAX_RETRIES), || {
      backend.probe()
    })
    .await?;
    info!(url = %backend.base_url, namespace = %backend.namespace, "connected to orchestration backend");
    Ok(backend)
  }

  async fn probe(&self) -> Result<()> {
    let resp = self.http.get(self.jobs_url()).send().await?;
    if !resp.status().is_success() {
      return Err(Error::Backend(format!("backend probe returned {}", resp.status())));
    }
    Ok(())
  }

  fn jobs_url(&self) -> String {
    format!("{}/namespaces/{}/jobs", self.base_url, self.namespace)
  }

  fn owner_selector() -> (&'static str, String) {
    ("labelSelector", format!("{LABEL_OWNER}=true"))
  }
}

#[async_trait]
impl JobBackend for HttpBackend {
  async fn create_job(&self, resource: JobResource) -> Result<()> {
    let resp = self.http.post(self.jobs_url()).json(&resource).send().await?;
    let status = resp.status();
    if !status.is_success() {
      let body = resp.text().await.unwrap_or_default();
      return Err(Error::Backend(format!("create job returned {status}: {body}")));
    }
    Ok(())
  }

  async fn subscribe(&self, shutdown: CancellationToken) -> Result<JobWatch> {
    let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    let (ready_tx, ready_rx) = oneshot::channel();
    let watcher = Watcher {
      http: self.http.clone(),
      jobs_url: self.jobs_url(),
    };
    tokio::spawn(async move {
      // A failure before the initial sync surfaces as a dropped `ready`
      // channel, which the scheduler treats as a fatal startup error.
      if let Err(e) = watcher.run(events_tx, ready_tx, shutdown).await {
        error!(error = %e, "backend watch terminated");
      }
    });
    Ok(JobWatch { events: events_rx, ready: ready_rx })
  }
}

struct Watcher {
  http: reqwest::Client,
  jobs_url: String,
}

/// Why a single list+watch cycle stopped.
enum WatchExit {
  /// Cancelled, or the event receiver was dropped. Do not reconnect.
  Finished,
  /// The stream ended or broke mid-run. Reconnect after a backoff.
  Disconnected,
}

impl Watcher {
  /// Run list+watch cycles until cancellation. A failure before the initial
  /// sync is fatal and propagates (dropping `ready` aborts startup); after
  /// that, every disconnect is retried with exponential backoff.
  async fn run(
    &self,
    events: mpsc::Sender<JobEvent>,
    ready: oneshot::Sender<()>,
    shutdown: CancellationToken,
  ) -> Result<()> {
    let mut ready = Some(ready);
    let mut delays = ExponentialBackoff::from_millis(DELAY).max_delay(RECONNECT_CEILING);
    loop {
      match self.sync_and_watch(&events, &mut ready, &shutdown).await {
        Ok(WatchExit::Finished) => {
          info!("backend watch stopped");
          return Ok(());
        }
        Ok(WatchExit::Disconnected) => {
          // The connection was healthy before it dropped; start the
          // backoff schedule over.
          warn!("backend watch stream ended, reconnecting");
          delays = ExponentialBackoff::from_millis(DELAY).max_delay(RECONNECT_CEILING);
        }
        Err(e) if ready.is_some() => return Err(e),
        Err(e) => warn!(error = %e, "backend watch failed, reconnecting"),
      }
      let delay = delays.next().unwrap_or(RECONNECT_CEILING);
      tokio::select! {
        _ = shutdown.cancelled() => {
          info!("backend watch stopped");
          return Ok(());
        }
        _ = tokio::time::sleep(delay) => {}
      }
    }
  }

  /// One cycle: list the owned resources, replay them, then stream events
  /// until the connection drops. The first list is delivered as Added and
  /// releases the readiness barrier; later lists are resyncs and deliver
  /// Updated, so terminal states reached while disconnected still reconcile.
  async fn sync_and_watch(
    &self,
    events: &mpsc::Sender<JobEvent>,
    ready: &mut Option<oneshot::Sender<()>>,
    shutdown: &CancellationToken,
  ) -> Result<WatchExit> {
    let initial = ready.is_some();
    let existing: Vec<JobResource> = self
      .http
      .get(&self.jobs_url)
      .query(&[HttpBackend::owner_selector()])
      .send()
      .await?
      .error_for_status()?
      .json()
      .await?;
    debug!(count = existing.len(), initial, "job resource sync");
    for resource in existing {
      let event = if initial {
        JobEvent::Added(resource)
      } else {
        JobEvent::Updated(resource)
      };
      if events.send(event).await.is_err() {
        return Ok(WatchExit::Finished);
      }
    }
    if let Some(barrier) = ready.take() {
      let _ = barrier.send(());
    }

    let resp = self
      .http
      .get(&self.jobs_url)
      .query(&[HttpBackend::owner_selector(), ("watch", "true".to_string())])
      .send()
      .await?
      .error_for_status()?;
    let mut stream = resp.bytes_stream();
    let mut buf: Vec<u8> = Vec::new();

    loop {
      let chunk = tokio::select! {
        _ = shutdown.cancelled() => return Ok(WatchExit::Finished),
        chunk = stream.next() => match chunk {
          Some(chunk) => chunk?,
          None => return Ok(WatchExit::Disconnected),
        },
      };
      buf.extend_from_slice(&chunk);
      while let Some(pos) = buf.iter().position(|&b| b == b'\n') {
        let line: Vec<u8> = buf.drain(..=pos).collect();
        let line = &line[..line.len() - 1];
        if line.is_empty() {
          continue;
        }
        let Some(event) = parse_watch_line(line) else { continue };
        if events.send(event).await.is_err() {
          return Ok(WatchExit::Finished);
        }
      }
    }
  }
}

fn parse_watch_line(line: &[u8]) -> Option<JobEvent> {
  match serde_json::from_slice::<WatchLine>(line) {
    Ok(watch_line) => match watch_line.kind.as_str() {
      "ADDED" => Some(JobEvent::Added(watch_line.object)),
      "MODIFIED" => Some(JobEvent::Updated(watch_line.object)),
      "DELETED" => Some(JobEvent::Deleted(watch_line.object)),
      other => {
        warn!(kind = other, "ignoring unknown watch event kind");
        None
      }
    },
    Err(e) => {
      warn!(error = %e, "ignoring malformed watch line");
      None
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::collections::HashMap;
  use std::sync::Arc;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::time::Duration;
  use warp::{Filter, Reply};

  // Serves the jobs collection endpoint: an empty list, and a watch stream
  // that delivers one terminal event and then closes.
  fn short_lived_backend(watch_hits: Arc<AtomicUsize>) -> std::net::SocketAddr {
    let route = warp::path!("namespaces" / String / "jobs")
      .and(warp::query::<HashMap<String, String>>())
      .map(move |_ns: String, query: HashMap<String, String>| {
        if query.contains_key("watch") {
          watch_hits.fetch_add(1, Ordering::SeqCst);
          let line = concat!(
            r#"{"type":"MODIFIED","object":{"name":"j-1","namespace":"default","status":{"succeeded":1}}}"#,
            "\n"
          );
          line.to_string().into_response()
        } else {
          warp::reply::json(&Vec::<JobResource>::new()).into_response()
        }
      });
    let (addr, server) = warp::serve(route).bind_ephemeral(([127, 0, 0, 1], 0));
    tokio::spawn(server);
    addr
  }

  #[tokio::test]
  async fn watch_reconnects_after_stream_ends() {
    let watch_hits = Arc::new(AtomicUsize::new(0));
    let addr = short_lived_backend(watch_hits.clone());

    let config = Config {
      server_port: 0,
      max_concurrency: 1,
      namespace: "default".into(),
      backend_url: format!("http://{addr}"),
      backend_token: None,
    };
    let backend = HttpBackend::connect(&config).await.unwrap();
    let shutdown = CancellationToken::new();
    let mut watch = backend.subscribe(shutdown.clone()).await.unwrap();
    watch.ready.await.unwrap();

    // Every watch attempt closes immediately, so a second hit proves the
    // watcher re-established the stream instead of exiting.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while watch_hits.load(Ordering::SeqCst) < 2 {
      assert!(
        tokio::time::Instant::now() < deadline,
        "watch was never re-established"
      );
      tokio::time::sleep(Duration::from_millis(10)).await;
    }

    // Events from reconnected streams keep flowing to the subscriber.
    match watch.events.recv().await {
      Some(JobEvent::Updated(resource)) => assert!(resource.is_terminal()),
      other => panic!("unexpected event: {other:?}"),
    }
    shutdown.cancel();
  }

  #[test]
  fn parses_watch_lines() {
    let line = br#"{"type":"MODIFIED","object":{"name":"j-1","namespace":"default","status":{"succeeded":1}}}"#;
    match parse_watch_line(line) {
      Some(JobEvent::Updated(resource)) => {
        assert_eq!(resource.name, "j-1");
        assert!(resource.is_terminal());
      }
      other => panic!("unexpected event: {other:?}"),
    }
  }

  #[test]
  fn unknown_kind_and_garbage_are_skipped() {
    assert!(parse_watch_line(br#"{"type":"BOOKMARK","object":{"name":"x","namespace":"d"}}"#).is_none());
    assert!(parse_watch_line(b"not json").is_none());
  }
}
