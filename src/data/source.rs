//! Course source abstraction
//!
//! A [`CourseSource`] performs a single attempt at listing the learner's
//! courses. [`fetch_with_retry`] wraps any source with the bounded retry
//! policy so the cache manager never sees a transport-specific type.

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, warn};

use super::retry::RetryPolicy;
use super::Course;

/// Errors that can occur when fetching the course list
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// No session, or the portal rejected the session
    #[error("Not authenticated: {0}")]
    Auth(String),

    /// Network failure, HTTP error status or server-reported exception
    #[error("Request failed: {0}")]
    Transport(String),

    /// The server answered but the payload did not have the expected shape
    #[error("Unexpected response: {0}")]
    MalformedResponse(String),
}

impl FetchError {
    pub fn is_auth(&self) -> bool {
        matches!(self, FetchError::Auth(_))
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            FetchError::MalformedResponse(err.to_string())
        } else {
            FetchError::Transport(err.to_string())
        }
    }
}

impl From<serde_json::Error> for FetchError {
    fn from(err: serde_json::Error) -> Self {
        FetchError::MalformedResponse(err.to_string())
    }
}

/// Something that can list enrolled courses for a session
#[async_trait]
pub trait CourseSource: Send + Sync {
    /// Short name used in log output
    fn name(&self) -> &'static str;

    /// Makes one attempt at fetching all enrolled courses
    ///
    /// `session_token` is `None` when the host page exposed no token; sources
    /// must answer that with [`FetchError::Auth`].
    async fn fetch_once(&self, session_token: Option<&str>) -> Result<Vec<Course>, FetchError>;
}

/// Fetches courses from `source`, retrying according to `policy`
///
/// Returns the last error once the policy gives up. Authentication errors are
/// returned immediately.
pub async fn fetch_with_retry(
    source: &dyn CourseSource,
    session_token: Option<&str>,
    policy: &RetryPolicy,
) -> Result<Vec<Course>, FetchError> {
    let mut attempt = 1;
    loop {
        match source.fetch_once(session_token).await {
            Ok(courses) => {
                debug!(
                    source = source.name(),
                    attempt,
                    count = courses.len(),
                    "fetched courses"
                );
                return Ok(courses);
            }
            Err(err) if policy.should_retry(attempt, &err) => {
                let delay = policy.backoff_delay(attempt);
                warn!(
                    source = source.name(),
                    "course fetch failed (attempt {}/{}), retrying in {:?}: {}",
                    attempt,
                    policy.max_attempts,
                    delay,
                    err
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => {
                warn!(
                    source = source.name(),
                    attempt, "course fetch gave up: {}", err
                );
                return Err(err);
            }
        }
    }
}
