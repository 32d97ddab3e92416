use std::env;

use crate::error::{Error, Result};

/// Server configuration, read from the environment. `BACKEND_URL` is the
/// only required variable; everything else has a default.
#[derive(Debug, Clone)]
pub struct Config {
  pub server_port: u16,
  pub max_concurrency: usize,
  pub namespace: String,
  pub backend_url: String,
  pub backend_token: Option<String>,
}

impl Config {
  pub fn from_env() -> Result<Self> {
    Self::from_lookup(|key| env::var(key).ok())
  }

  fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
    let backend_url = get("BACKEND_URL")
      .ok_or_else(|| Error::Config("BACKEND_URL must be set".into()))?;

    let server_port = match get("SERVER_PORT") {
      Some(raw) => raw
        .parse()
        .map_err(|_| Error::Config(format!("SERVER_PORT is not a valid port: {raw}")))?,
      None => 8080,
    };

    let max_concurrency = match get("MAX_CONCURRENCY") {
      Some(raw) => raw
        .parse::<usize>()
        .map_err(|_| Error::Config(format!("MAX_CONCURRENCY is not a number: {raw}")))?
        .max(1),
      None => 3,
    };

    Ok(Self {
      server_port,
      max_concurrency,
      namespace: get("JOB_NAMESPACE").unwrap_or_else(|| "default".into()),
      backend_url,
      backend_token: get("BACKEND_TOKEN"),
    })
  }
}
