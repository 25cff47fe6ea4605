//! Core data models for moodlenav
//!
//! This module contains the course types shared by every course source and by
//! the cache manager, plus the sources themselves.

pub mod api;
pub mod html;
pub mod retry;
pub mod source;

pub use api::MoodleApiSource;
pub use html::{HtmlCourseSource, HtmlSelectors};
pub use retry::RetryPolicy;
pub use source::{fetch_with_retry, CourseSource, FetchError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Category used when neither the source nor the title names a semester
pub const UNCATEGORIZED: &str = "Uncategorized";

/// An enrolled course
///
/// `category` is a best-effort semester label and is never empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Course {
    /// Full course name as shown by the portal
    pub title: String,
    /// Link to the course page
    pub href: String,
    /// Semester label used for grouping
    pub category: String,
}

impl Course {
    /// Builds a course, deriving the category when the source has none
    ///
    /// Precedence: a non-blank `explicit_category`, then the first bracketed
    /// token in the title, then [`UNCATEGORIZED`].
    pub fn new(
        title: impl Into<String>,
        href: impl Into<String>,
        explicit_category: Option<&str>,
    ) -> Self {
        let title = title.into();
        let category = explicit_category
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| semester_from_title(&title));

        Self {
            title,
            href: href.into(),
            category,
        }
    }
}

/// Extracts the first `[...]` token from a course title
///
/// Returns [`UNCATEGORIZED`] when there is no bracketed token or it is blank.
pub fn semester_from_title(title: &str) -> String {
    let token = title
        .find('[')
        .and_then(|start| {
            let rest = &title[start + 1..];
            rest.find(']').map(|end| &rest[..end])
        })
        .map(str::trim)
        .filter(|t| !t.is_empty());

    match token {
        Some(t) => t.to_string(),
        None => UNCATEGORIZED.to_string(),
    }
}

/// The cached course list together with the time it was fetched
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CourseSnapshot {
    /// Courses in the order the source returned them
    pub courses: Vec<Course>,
    /// When the courses were fetched
    pub fetched_at: DateTime<Utc>,
}

impl CourseSnapshot {
    pub fn new(courses: Vec<Course>, fetched_at: DateTime<Utc>) -> Self {
        Self {
            courses,
            fetched_at,
        }
    }

    /// Age of the snapshot relative to `now`, clamped at zero
    pub fn age(&self, now: DateTime<Utc>) -> std::time::Duration {
        (now - self.fetched_at).to_std().unwrap_or_default()
    }

    /// Distinct categories, newest-looking semester first
    pub fn categories(&self) -> Vec<String> {
        categories(&self.courses)
    }
}

/// Distinct categories of `courses`, sorted descending so that later
/// semester tokens come first
pub fn categories(courses: &[Course]) -> Vec<String> {
    let mut categories: Vec<String> = courses.iter().map(|c| c.category.clone()).collect();
    categories.sort_unstable_by(|a, b| b.cmp(a));
    categories.dedup();
    categories
}
