use tokio::signal::unix::{SignalKind, signal};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Install a handler for SIGTERM and SIGINT. Returns a token that is
/// cancelled when either signal arrives; every subsystem watches it and
/// drains before exit.
pub fn install() -> CancellationToken {
  let token = CancellationToken::new();
  let handler_token = token.clone();

  tokio::spawn(async move {
    let mut sigterm = match signal(SignalKind::terminate()) {
      Ok(sig) => sig,
      Err(e) => {
        error!(error = %e, "failed to install SIGTERM handler");
        return;
      }
    };
    let mut sigint = match signal(SignalKind::interrupt()) {
      Ok(sig) => sig,
      Err(e) => {
        error!(error = %e, "failed to install SIGINT handler");
        return;
      }
    };

    tokio::select! {
      _ = sigterm.recv() => info!("received SIGTERM, initiating graceful shutdown"),
      _ = sigint.recv() => info!("received SIGINT, initiating graceful shutdown"),
    }
    handler_token.cancel();
  });

  token
}
