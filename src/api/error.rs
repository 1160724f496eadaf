use thiserror::Error;

/// Failure talking to the REST endpoint.
///
/// The client never retries; callers decide whether to fall back or surface it.
#[derive(Error, Debug)]
pub enum RemoteError {
  #[error("Network error: {0}")]
  Transport(#[from] reqwest::Error),

  #[error("Server responded {status}: {body}")]
  Status { status: u16, body: String },

  #[error("Invalid response: {0}")]
  Decode(String),

  #[error("Endpoint unreachable: {0}")]
  Offline(String),

  #[error("Invalid endpoint URL: {0}")]
  Url(#[from] url::ParseError),
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

impl RemoteError {
  pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
    RemoteError::Status {
      status: status.as_u16(),
      body: truncate_body(body),
    }
  }

  /// Whether the server reported the requested record does not exist.
  pub fn is_not_found(&self) -> bool {
    matches!(self, RemoteError::Status { status: 404, .. })
  }
}

fn truncate_body(body: &str) -> String {
  if body.len() <= MAX_ERROR_BODY_LENGTH {
    return body.to_string();
  }
  let mut end = MAX_ERROR_BODY_LENGTH;
  while !body.is_char_boundary(end) {
    end -= 1;
  }
  format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
}
