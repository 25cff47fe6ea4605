//! Course cache manager
//!
//! Owns the cached [`CourseSnapshot`], decides when it is stale and drives the
//! refresh through a [`CourseSource`]. Every call resolves to a defined value:
//! `None` means the courses cannot be determined and the learner has to log
//! in, `Some(vec![])` means logged in with no courses.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};

use super::store::{read_value, write_value, KeyValueStore, StoreError};
use crate::data::{fetch_with_retry, Course, CourseSnapshot, CourseSource, RetryPolicy};
use crate::session::SessionGate;

/// Store key holding the cached course list
pub const COURSES_CACHE_KEY: &str = "courses-cache";

/// Store key holding the time of the last successful fetch
pub const LAST_FETCH_KEY: &str = "courses-last-fetch";

/// Default time-to-live of the course cache
pub const DEFAULT_TTL: Duration = Duration::from_secs(60 * 60);

/// Capacity of the snapshot update channel
const UPDATE_CHANNEL_CAPACITY: usize = 16;

/// Caches the learner's course list in a persistent store
pub struct CacheManager {
    store: Arc<dyn KeyValueStore>,
    source: Arc<dyn CourseSource>,
    session: Arc<dyn SessionGate>,
    ttl: Duration,
    retry: RetryPolicy,
    /// At most one refresh in flight
    refresh_lock: Mutex<()>,
    updates: broadcast::Sender<Arc<CourseSnapshot>>,
}

impl CacheManager {
    /// Creates a manager with the default TTL and retry policy
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        source: Arc<dyn CourseSource>,
        session: Arc<dyn SessionGate>,
    ) -> Self {
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        Self {
            store,
            source,
            session,
            ttl: DEFAULT_TTL,
            retry: RetryPolicy::default(),
            refresh_lock: Mutex::new(()),
            updates,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Returns the current courses, refreshing them when stale
    ///
    /// The session is checked first: when logged out the cache is cleared and
    /// `None` is returned whatever its freshness. `force_refresh` skips the
    /// TTL check but not the session check.
    pub async fn get_courses(&self, force_refresh: bool) -> Option<Vec<Course>> {
        if !self.session.is_authenticated() {
            info!("session is logged out, clearing course cache");
            self.invalidate().await;
            return None;
        }

        if !force_refresh {
            if let Some(snapshot) = self.snapshot().await {
                let age = snapshot.age(Utc::now());
                if age < self.ttl {
                    debug!(?age, count = snapshot.courses.len(), "serving cached courses");
                    return Some(snapshot.courses);
                }
                debug!(?age, "course cache is stale");
            }
        }

        self.refresh().await
    }

    /// Refreshes unconditionally (still logged-out aware)
    pub async fn force_refresh(&self) -> Option<Vec<Course>> {
        self.get_courses(true).await
    }

    /// Reads the cached snapshot without refreshing or checking the session
    pub async fn snapshot(&self) -> Option<CourseSnapshot> {
        match self.load_snapshot().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!("failed to read course cache: {}", e);
                None
            }
        }
    }

    /// Removes the cached snapshot from the store
    pub async fn invalidate(&self) {
        for key in [COURSES_CACHE_KEY, LAST_FETCH_KEY] {
            if let Err(e) = self.store.remove(key).await {
                warn!(key, "failed to clear course cache: {}", e);
            }
        }
    }

    /// Receives every snapshot published by a successful refresh
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<CourseSnapshot>> {
        self.updates.subscribe()
    }

    async fn refresh(&self) -> Option<Vec<Course>> {
        let requested_at = Utc::now();
        let _guard = self.refresh_lock.lock().await;

        let previous = self.snapshot().await;

        // A refresh that finished while we waited for the lock already has the answer
        if let Some(snapshot) = &previous {
            if snapshot.fetched_at >= requested_at {
                debug!("reusing snapshot from concurrent refresh");
                return Some(snapshot.courses.clone());
            }
        }

        let token = self.session.session_token();
        match fetch_with_retry(self.source.as_ref(), token.as_deref(), &self.retry).await {
            Ok(courses) => {
                let snapshot = CourseSnapshot::new(courses, Utc::now());
                if let Err(e) = self.persist(&snapshot).await {
                    // Unpublished: the caller gets the courses, the cache keeps its old state
                    warn!("failed to persist course cache: {}", e);
                    return Some(snapshot.courses);
                }
                info!(
                    source = self.source.name(),
                    count = snapshot.courses.len(),
                    "course cache refreshed"
                );

                let courses = snapshot.courses.clone();
                let _ = self.updates.send(Arc::new(snapshot));
                Some(courses)
            }
            Err(e) if e.is_auth() => {
                warn!("course refresh rejected, clearing cache: {}", e);
                self.invalidate().await;
                None
            }
            Err(e) => {
                warn!(
                    has_stale = previous.is_some(),
                    "course refresh failed: {}", e
                );
                previous.map(|s| s.courses)
            }
        }
    }

    async fn load_snapshot(&self) -> Result<Option<CourseSnapshot>, StoreError> {
        let store = self.store.as_ref();
        let courses: Option<Vec<Course>> = read_value(store, COURSES_CACHE_KEY).await?;
        let fetched_at: Option<DateTime<Utc>> = read_value(store, LAST_FETCH_KEY).await?;

        Ok(match (courses, fetched_at) {
            (Some(courses), Some(fetched_at)) => Some(CourseSnapshot::new(courses, fetched_at)),
            _ => None,
        })
    }

    /// Writes the course list before its timestamp so a torn write reads as stale
    async fn persist(&self, snapshot: &CourseSnapshot) -> Result<(), StoreError> {
        let store = self.store.as_ref();
        write_value(store, COURSES_CACHE_KEY, &snapshot.courses).await?;
        write_value(store, LAST_FETCH_KEY, &snapshot.fetched_at).await
    }
}
