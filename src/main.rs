use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use jobsched::client::HttpBackend;
use jobsched::config::Config;
use jobsched::queue::PriorityQueue;
use jobsched::routes::routes;
use jobsched::scheduler::Scheduler;
use jobsched::shutdown;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt::init();
  let config = Config::from_env().context("loading configuration")?;
  info!(
    port = config.server_port,
    max_concurrency = config.max_concurrency,
    namespace = %config.namespace,
    "starting jobsched"
  );

  // No backend, no scheduler: connectivity failure here halts startup.
  let backend = HttpBackend::connect(&config)
    .await
    .context("connecting to orchestration backend")?;

  let token = shutdown::install();
  let queue = Arc::new(PriorityQueue::new());
  let scheduler = Scheduler::new(
    queue.clone(),
    Arc::new(backend),
    config.max_concurrency,
    config.namespace.clone(),
    token.clone(),
  );
  scheduler.clone().start().await.context("starting scheduler")?;

  let api = routes(queue.clone(), scheduler.clone());
  let server_token = token.clone();
  let (addr, server) = warp::serve(api).bind_with_graceful_shutdown(
    ([0, 0, 0, 0], config.server_port),
    async move { server_token.cancelled().await },
  );
  info!(%addr, "http server listening");
  server.await;

  // HTTP is down; stop accepting, drain, and join everything.
  scheduler.stop().await;
  info!("shutdown complete");
  Ok(())
}
