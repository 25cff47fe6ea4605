//! HTML course list scraper
//!
//! Alternative to the AJAX client for portals where the web service is
//! disabled: loads the "My courses" page with the session cookie and reads the
//! course cards with CSS selectors.

use async_trait::async_trait;
use reqwest::{header, Client, Url};
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use super::source::{CourseSource, FetchError};
use super::Course;

/// Page listing the learner's courses, relative to the portal root
const COURSES_PAGE: &str = "/my/courses.php";

/// Elements that only appear on the login page
const LOGIN_FORM_SELECTOR: &str = "form#login, input[name=\"logintoken\"]";

/// Errors raised when the configured selectors are not valid CSS
#[derive(Debug, Error)]
pub enum HtmlSelectorError {
    #[error("Invalid {field} selector '{selector}'")]
    Invalid { field: &'static str, selector: String },
}

/// CSS selectors locating course entries on the courses page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HtmlSelectors {
    /// One match per course entry
    pub item: String,
    /// Link inside an entry; its text is the title
    pub link: String,
    /// Category label inside an entry
    pub category: String,
}

impl Default for HtmlSelectors {
    fn default() -> Self {
        Self {
            item: ".coursebox, .course-listitem, [data-region=\"course-content\"]".to_string(),
            link: "a.aalink, .coursename a".to_string(),
            category: ".categoryname, .course-category".to_string(),
        }
    }
}

/// Parsed form of [`HtmlSelectors`]
#[derive(Debug)]
struct CompiledSelectors {
    item: Selector,
    link: Selector,
    category: Selector,
    login: Selector,
}

impl CompiledSelectors {
    fn compile(selectors: &HtmlSelectors) -> Result<Self, HtmlSelectorError> {
        Ok(Self {
            item: parse_selector("item", &selectors.item)?,
            link: parse_selector("link", &selectors.link)?,
            category: parse_selector("category", &selectors.category)?,
            login: parse_selector("login", LOGIN_FORM_SELECTOR)?,
        })
    }
}

fn parse_selector(field: &'static str, selector: &str) -> Result<Selector, HtmlSelectorError> {
    Selector::parse(selector).map_err(|_| HtmlSelectorError::Invalid {
        field,
        selector: selector.to_string(),
    })
}

/// Course source that scrapes the "My courses" page
#[derive(Debug)]
pub struct HtmlCourseSource {
    client: Client,
    base_url: String,
    selectors: CompiledSelectors,
}

impl HtmlCourseSource {
    /// Creates a scraper for the portal at `base_url`
    ///
    /// The session token handed to [`CourseSource::fetch_once`] is sent as the
    /// `MoodleSession` cookie.
    pub fn new(
        client: Client,
        base_url: impl Into<String>,
        selectors: &HtmlSelectors,
    ) -> Result<Self, HtmlSelectorError> {
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            selectors: CompiledSelectors::compile(selectors)?,
        })
    }

    /// Extracts courses from a courses page
    fn parse_page(&self, body: &str) -> Result<Vec<Course>, FetchError> {
        let document = Html::parse_document(body);
        let base = Url::parse(&self.base_url).ok();

        let courses: Vec<Course> = document
            .select(&self.selectors.item)
            .filter_map(|item| self.parse_item(item, base.as_ref()))
            .collect();

        if courses.is_empty() && document.select(&self.selectors.login).next().is_some() {
            return Err(FetchError::Auth("redirected to login page".to_string()));
        }

        Ok(courses)
    }

    fn parse_item(&self, item: ElementRef<'_>, base: Option<&Url>) -> Option<Course> {
        let link = item.select(&self.selectors.link).next()?;
        let title = collapse_whitespace(&link.text().collect::<String>());
        if title.is_empty() {
            return None;
        }

        let raw_href = link.value().attr("href").unwrap_or_default();
        let href = match base.and_then(|b| b.join(raw_href).ok()) {
            Some(url) => url.to_string(),
            None => raw_href.to_string(),
        };

        let category = item
            .select(&self.selectors.category)
            .next()
            .map(|el| collapse_whitespace(&el.text().collect::<String>()));

        Some(Course::new(title, href, category.as_deref()))
    }
}

#[async_trait]
impl CourseSource for HtmlCourseSource {
    fn name(&self) -> &'static str {
        "html"
    }

    async fn fetch_once(&self, session_token: Option<&str>) -> Result<Vec<Course>, FetchError> {
        let cookie = session_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| FetchError::Auth("session cookie not found".to_string()))?;

        let response = self
            .client
            .get(format!("{}{}", self.base_url, COURSES_PAGE))
            .header(header::COOKIE, format!("MoodleSession={}", cookie))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Transport(format!("HTTP {}", status)));
        }

        let body = response.text().await?;
        debug!(bytes = body.len(), "received courses page");
        self.parse_page(&body)
    }
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    const COURSES_PAGE_HTML: &str = r#"
        <html><body>
          <div class="course-listitem">
            <a class="aalink" href="/course/view.php?id=7">
              Operating Systems [2024/JAN]
            </a>
            <span class="categoryname">Year 2 Semester 1</span>
          </div>
          <div class="course-listitem">
            <a class="aalink" href="https://lms.example.edu/course/view.php?id=8">Networks [2023/JUL]</a>
          </div>
          <div class="course-listitem">
            <a class="aalink" href="/course/view.php?id=9">Study Skills</a>
            <span class="categoryname">  </span>
          </div>
          <div class="course-listitem"><span>no link here</span></div>
        </body></html>
    "#;

    const LOGIN_PAGE_HTML: &str = r#"
        <html><body>
          <form id="login" action="/login/index.php" method="post">
            <input type="hidden" name="logintoken" value="abc">
          </form>
        </body></html>
    "#;

    fn source() -> HtmlCourseSource {
        HtmlCourseSource::new(
            Client::new(),
            "https://lms.example.edu/",
            &HtmlSelectors::default(),
        )
        .expect("default selectors are valid")
    }

    #[test]
    fn test_parse_courses_page() {
        let courses = source().parse_page(COURSES_PAGE_HTML).expect("Should parse");

        assert_eq!(courses.len(), 3);
        assert_eq!(courses[0].title, "Operating Systems [2024/JAN]");
        assert_eq!(
            courses[0].href,
            "https://lms.example.edu/course/view.php?id=7"
        );
        assert_eq!(courses[0].category, "Year 2 Semester 1");
        assert_eq!(courses[1].category, "2023/JUL");
        assert_eq!(courses[2].category, "Uncategorized");
    }

    #[test]
    fn test_login_page_is_auth_error() {
        let err = source().parse_page(LOGIN_PAGE_HTML).unwrap_err();
        assert!(err.is_auth());
    }

    #[test]
    fn test_page_without_courses_is_empty_list() {
        let courses = source()
            .parse_page("<html><body><p>You are not enrolled in any course.</p></body></html>")
            .expect("Should parse");
        assert!(courses.is_empty());
    }

    #[test]
    fn test_invalid_selector_is_rejected() {
        let selectors = HtmlSelectors {
            item: "div[".to_string(),
            ..Default::default()
        };
        let err = HtmlCourseSource::new(Client::new(), "https://lms.example.edu", &selectors)
            .unwrap_err();
        assert!(err.to_string().contains("item"));
    }

    #[tokio::test]
    async fn test_missing_cookie_is_auth_error() {
        let err = source().fetch_once(None).await.unwrap_err();
        assert!(err.is_auth());
    }
}
