//! Application state and command handling
//!
//! Wires the configured course source, session gate and store into a
//! [`CacheManager`] and renders the result of each command as text.

use std::fmt::Write as _;
use std::sync::Arc;

use reqwest::Client;
use thiserror::Error;
use tracing::debug;

use crate::cache::{CacheManager, KeyValueStore, StoreError};
use crate::cli::Command;
use crate::config::{Config, ConfigError, SourceKind};
use crate::data::html::HtmlSelectorError;
use crate::data::{categories, Course, CourseSource, FetchError, HtmlCourseSource, MoodleApiSource};
use crate::prefs::{Preference, PreferenceValues, Preferences};
use crate::semester::{filter_courses, SemesterSelector, ALL_SEMESTERS};
use crate::session::{PageSession, PortalSession, SessionGate, StaticSession};

/// Shown instead of a course list when the session is missing or rejected
pub const LOGIN_HINT: &str =
    "Not logged in. Log in to the portal, then pass --sesskey or --cookie (or set MOODLE_SESSKEY / MOODLE_SESSION).";

/// Errors that can stop a command
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Failed to set up HTTP client: {0}")]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Selector(#[from] HtmlSelectorError),

    /// The dashboard could not be loaded to check the session
    #[error("Could not check the portal session: {0}")]
    Session(#[from] FetchError),

    #[error("Unknown semester '{semester}'. Available: {}", .available.join(", "))]
    UnknownSemester {
        semester: String,
        available: Vec<String>,
    },
}

/// Credentials given on the command line or in the environment
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    /// `sesskey` taken from a logged-in page
    pub sesskey: Option<String>,
    /// `MoodleSession` cookie value
    pub cookie: Option<String>,
}

/// Main application state
pub struct App {
    courses: CacheManager,
    selector: SemesterSelector,
    prefs: Preferences,
    base_url: Option<String>,
}

impl App {
    /// Builds the application from explicit parts
    pub fn with_parts(
        store: Arc<dyn KeyValueStore>,
        source: Arc<dyn CourseSource>,
        session: Arc<dyn SessionGate>,
        config: &Config,
    ) -> Self {
        let courses = CacheManager::new(store.clone(), source, session)
            .with_ttl(config.ttl())
            .with_retry_policy(config.retry_policy());

        Self {
            courses,
            selector: SemesterSelector::new(store.clone()),
            prefs: Preferences::new(store),
            base_url: config.base_url.clone(),
        }
    }

    /// Builds the application for the portal named in `config`
    ///
    /// Whenever a session cookie is available the dashboard is loaded first and
    /// decides whether the learner is still logged in, so an expired cookie
    /// clears the cache instead of serving it. The API source sends the
    /// dashboard's sesskey (or `--sesskey` when the page has none); the HTML
    /// source sends the cookie. A sesskey without a cookie cannot be checked
    /// against the portal and is trusted until the API rejects it.
    pub async fn connect(
        config: &Config,
        credentials: Credentials,
        store: Arc<dyn KeyValueStore>,
    ) -> Result<Self, AppError> {
        let base_url = config.require_base_url()?;
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()?;

        let cookie = credentials.cookie.filter(|c| !c.trim().is_empty());
        let page = match &cookie {
            Some(cookie) => Some(PageSession::fetch(&client, base_url, Some(cookie)).await?),
            None => None,
        };

        let (source, session): (Arc<dyn CourseSource>, Arc<dyn SessionGate>) = match config.source
        {
            SourceKind::Api => {
                let session: Arc<dyn SessionGate> = match page {
                    Some(page) => {
                        let sesskey = page.session_token().or(credentials.sesskey);
                        Arc::new(PortalSession::new(page, sesskey))
                    }
                    None => Arc::new(StaticSession::new(credentials.sesskey)),
                };
                let source: Arc<dyn CourseSource> = Arc::new(
                    MoodleApiSource::new(client, base_url).with_session_cookie(cookie),
                );
                (source, session)
            }
            SourceKind::Html => {
                let source: Arc<dyn CourseSource> =
                    Arc::new(HtmlCourseSource::new(client, base_url, &config.html)?);
                let session: Arc<dyn SessionGate> =
                    Arc::new(PortalSession::new(page.unwrap_or_default(), cookie));
                (source, session)
            }
        };
        debug!(source = source.name(), "course source selected");

        Ok(Self::with_parts(store, source, session, config))
    }

    pub fn cache(&self) -> &CacheManager {
        &self.courses
    }

    /// Runs one command and returns the text to print
    pub async fn run(&self, command: Command) -> Result<String, AppError> {
        match command {
            Command::Courses {
                refresh,
                semester,
                all,
            } => self.list_courses(refresh, semester.as_deref(), all).await,
            Command::Semesters => self.list_semesters().await,
            Command::Select { semester } => self.select_semester(&semester).await,
            Command::Refresh => self.refresh().await,
            Command::Clear => {
                self.courses.invalidate().await;
                Ok("Course cache cleared.".to_string())
            }
            Command::Prefs {
                auto_login,
                focus_mode,
            } => {
                if let Some(value) = auto_login {
                    self.prefs.set(Preference::AutoLogin, value.into()).await?;
                }
                if let Some(value) = focus_mode {
                    self.prefs.set(Preference::FocusMode, value.into()).await?;
                }
                Ok(render_prefs(&self.prefs.load().await?))
            }
        }
    }

    async fn list_courses(
        &self,
        refresh: bool,
        semester: Option<&str>,
        all: bool,
    ) -> Result<String, AppError> {
        let Some(courses) = self.courses.get_courses(refresh).await else {
            return self.logged_out().await;
        };
        if courses.is_empty() {
            return Ok("No courses found.".to_string());
        }

        if let Some(semester) = semester {
            self.select_known(semester, &courses).await?;
        }

        let (selection, shown) = if all {
            (ALL_SEMESTERS.to_string(), courses.clone())
        } else {
            let (selection, shown) = self.selector.filtered_view(&courses).await?;
            (selection.unwrap_or_else(|| ALL_SEMESTERS.to_string()), shown)
        };

        let focus = self.prefs.get(Preference::FocusMode).await?;
        Ok(render_courses(&selection, &shown, focus))
    }

    async fn list_semesters(&self) -> Result<String, AppError> {
        let Some(courses) = self.courses.get_courses(false).await else {
            return self.logged_out().await;
        };
        let available = categories(&courses);
        if available.is_empty() {
            return Ok("No courses found.".to_string());
        }

        let selected = self.selector.resolve(&available).await?;
        let mut out = String::new();
        for category in &available {
            let marker = if selected.as_deref() == Some(category.as_str()) {
                '*'
            } else {
                ' '
            };
            let count = filter_courses(&courses, category).len();
            let _ = writeln!(out, "{} {} ({})", marker, category, count);
        }
        Ok(out.trim_end().to_string())
    }

    async fn select_semester(&self, semester: &str) -> Result<String, AppError> {
        let Some(courses) = self.courses.get_courses(false).await else {
            return self.logged_out().await;
        };
        self.select_known(semester, &courses).await?;
        Ok(format!("Selected semester: {}", semester))
    }

    async fn refresh(&self) -> Result<String, AppError> {
        match self.courses.force_refresh().await {
            Some(courses) => Ok(format!("{} courses available.", courses.len())),
            None => self.logged_out().await,
        }
    }

    /// Selects `semester` if the course list knows it
    async fn select_known(&self, semester: &str, courses: &[Course]) -> Result<(), AppError> {
        let available = categories(courses);
        if semester != ALL_SEMESTERS && !available.iter().any(|c| c == semester) {
            return Err(AppError::UnknownSemester {
                semester: semester.to_string(),
                available,
            });
        }
        self.selector.select(semester).await?;
        Ok(())
    }

    /// Login prompt, with the login page URL when auto-login is on
    async fn logged_out(&self) -> Result<String, AppError> {
        let mut out = LOGIN_HINT.to_string();
        if self.prefs.get(Preference::AutoLogin).await? {
            if let Some(base) = &self.base_url {
                let _ = write!(
                    out,
                    "\nLogin page: {}/login/index.php",
                    base.trim_end_matches('/')
                );
            }
        }
        Ok(out)
    }
}

fn render_courses(selection: &str, courses: &[Course], focus: bool) -> String {
    if courses.is_empty() {
        return format!("No courses found for {}", selection);
    }

    let mut out = String::new();
    if !focus {
        let _ = writeln!(out, "Semester: {}", selection);
    }
    for course in courses {
        if focus {
            let _ = writeln!(out, "{}", course.title);
        } else {
            let _ = writeln!(out, "  {}\n    {}", course.title, course.href);
        }
    }
    out.trim_end().to_string()
}

fn render_prefs(values: &PreferenceValues) -> String {
    let on_off = |v: bool| if v { "on" } else { "off" };
    format!(
        "{}: {}\n{}: {}",
        Preference::AutoLogin.label(),
        on_off(values.auto_login),
        Preference::FocusMode.label(),
        on_off(values.focus_mode)
    )
}
