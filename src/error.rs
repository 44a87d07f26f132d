//! Typed errors for requests made through the resilience layer.

use thiserror::Error;

/// Message substrings that mark an untyped ([`ErrorKind::Other`]) error as transient.
pub const RETRYABLE_PATTERNS: &[&str] = &["timeout", "network", "429", "500", "502", "503", "504"];

/// Classification of a failed request, produced at the call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
  /// The per-request deadline elapsed
  Timeout,
  /// Connection refused, reset, DNS failure and similar
  Network,
  /// Attempt skipped because the tracker reported no connectivity
  Offline,
  /// HTTP 429
  RateLimited,
  /// HTTP 5xx
  Server(u16),
  /// HTTP 4xx other than 429 and validation failures
  Client(u16),
  /// Rejected input (HTTP 400/422, malformed body)
  Validation,
  /// Response body could not be decoded
  Decode,
  Other,
}

impl ErrorKind {
  /// Whether failures of this kind are worth retrying.
  pub fn is_transient(&self) -> bool {
    matches!(
      self,
      ErrorKind::Timeout
        | ErrorKind::Network
        | ErrorKind::Offline
        | ErrorKind::RateLimited
        | ErrorKind::Server(_)
    )
  }

  /// Map an HTTP status code to a kind.
  pub fn from_status(status: u16) -> Self {
    match status {
      429 => ErrorKind::RateLimited,
      400 | 422 => ErrorKind::Validation,
      500..=599 => ErrorKind::Server(status),
      _ => ErrorKind::Client(status),
    }
  }
}

/// A failed request, with its kind and a human readable message.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct RequestError {
  pub kind: ErrorKind,
  pub message: String,
}

impl RequestError {
  pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
    Self {
      kind,
      message: message.into(),
    }
  }

  /// Synthetic error used when an attempt is skipped while disconnected.
  pub fn offline() -> Self {
    Self::new(ErrorKind::Offline, "Network is offline")
  }

  pub fn timeout(message: impl Into<String>) -> Self {
    Self::new(ErrorKind::Timeout, message)
  }

  pub fn network(message: impl Into<String>) -> Self {
    Self::new(ErrorKind::Network, message)
  }

  pub fn validation(message: impl Into<String>) -> Self {
    Self::new(ErrorKind::Validation, message)
  }

  pub fn other(message: impl Into<String>) -> Self {
    Self::new(ErrorKind::Other, message)
  }

  /// Build an error from a non-success HTTP response.
  pub fn from_status(status: u16, body: &str) -> Self {
    let message = if body.is_empty() {
      format!("HTTP {}", status)
    } else {
      format!("HTTP {}: {}", status, body)
    };
    Self::new(ErrorKind::from_status(status), message)
  }

  /// Case-insensitive substring match against the message.
  pub fn message_contains_any<S: AsRef<str>>(&self, patterns: &[S]) -> bool {
    let message = self.message.to_lowercase();
    patterns
      .iter()
      .any(|p| message.contains(&p.as_ref().to_lowercase()))
  }

  /// Default retry classification.
  ///
  /// Typed errors are decided by their kind alone, so a response body can
  /// never turn a 4xx into a retry. Only [`ErrorKind::Other`] falls back to
  /// matching the message against [`RETRYABLE_PATTERNS`].
  pub fn is_retryable(&self) -> bool {
    match self.kind {
      ErrorKind::Other => self.message_contains_any(RETRYABLE_PATTERNS),
      kind => kind.is_transient(),
    }
  }
}

impl From<reqwest::Error> for RequestError {
  fn from(err: reqwest::Error) -> Self {
    if err.is_timeout() {
      RequestError::timeout(format!("Request timeout: {}", err))
    } else if err.is_decode() {
      RequestError::new(ErrorKind::Decode, format!("Failed to decode response: {}", err))
    } else if let Some(status) = err.status() {
      RequestError::from_status(status.as_u16(), "")
    } else if err.is_connect() || err.is_request() {
      RequestError::network(format!("Network error: {}", err))
    } else {
      RequestError::other(err.to_string())
    }
  }
}
