//! Semester selection
//!
//! Remembers the semester the learner last picked and corrects it when the
//! latest course list no longer contains it.

use std::sync::Arc;

use tracing::{info, warn};

use crate::cache::store::{read_value, write_value, KeyValueStore, StoreError};
use crate::data::{categories, Course};

/// Store key holding the selected semester
pub const SELECTED_SEMESTER_KEY: &str = "courses-selected-semester";

/// Selection value that matches every course
pub const ALL_SEMESTERS: &str = "All";

/// Reads and writes the selected semester
#[derive(Clone)]
pub struct SemesterSelector {
    store: Arc<dyn KeyValueStore>,
}

impl SemesterSelector {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// The stored selection, if any
    pub async fn selected(&self) -> Result<Option<String>, StoreError> {
        read_value(self.store.as_ref(), SELECTED_SEMESTER_KEY).await
    }

    /// Stores `semester` as the current selection
    ///
    /// Used both for explicit choices and for automatic corrections.
    pub async fn select(&self, semester: &str) -> Result<(), StoreError> {
        write_value(self.store.as_ref(), SELECTED_SEMESTER_KEY, semester).await
    }

    /// Returns the selection to render for `categories`
    ///
    /// `categories` is expected newest first (see [`categories`]).
    /// A missing or unknown selection is replaced by the first category and the
    /// replacement is stored before returning. `None` only when there are no
    /// categories at all.
    pub async fn resolve(&self, categories: &[String]) -> Result<Option<String>, StoreError> {
        let stored = self.selected().await?;

        if let Some(current) = &stored {
            if current == ALL_SEMESTERS || categories.contains(current) {
                return Ok(stored);
            }
        }

        let Some(latest) = categories.first() else {
            return Ok(stored);
        };

        match &stored {
            Some(old) => info!(from = %old, to = %latest, "selected semester no longer exists"),
            None => info!(to = %latest, "no semester selected yet"),
        }
        self.select(latest).await?;
        Ok(Some(latest.clone()))
    }

    /// Resolves the selection against `courses` and returns the matching ones
    pub async fn filtered_view(
        &self,
        courses: &[Course],
    ) -> Result<(Option<String>, Vec<Course>), StoreError> {
        let selection = self.resolve(&categories(courses)).await?;
        let courses = match &selection {
            Some(semester) => filter_courses(courses, semester),
            None => {
                warn!("no semester to filter by");
                Vec::new()
            }
        };
        Ok((selection, courses))
    }
}

/// Courses belonging to `semester`, or all of them for [`ALL_SEMESTERS`]
pub fn filter_courses(courses: &[Course], semester: &str) -> Vec<Course> {
    courses
        .iter()
        .filter(|c| semester == ALL_SEMESTERS || c.category == semester)
        .cloned()
        .collect()
}
