use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
  #[error("queue closed, not accepting jobs")]
  QueueClosed,

  #[error("invalid configuration: {0}")]
  Config(String),

  #[error("backend error: {0}")]
  Backend(String),

  #[error("backend request failed: {0}")]
  Http(#[from] reqwest::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
