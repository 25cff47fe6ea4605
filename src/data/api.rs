//! Moodle AJAX web service client
//!
//! Lists enrolled courses through `core_course_get_enrolled_courses_by_timeline_classification`,
//! the same call the Moodle dashboard uses, authenticated with the page's `sesskey`.

use async_trait::async_trait;
use reqwest::{header, Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::source::{CourseSource, FetchError};
use super::Course;

/// Path of the AJAX service endpoint relative to the portal root
const AJAX_ENDPOINT: &str = "/lib/ajax/service.php";

/// Web service method returning the dashboard course list
const COURSES_METHOD: &str = "core_course_get_enrolled_courses_by_timeline_classification";

/// Moodle error codes meaning the session is gone rather than the call failed
const AUTH_ERROR_CODES: &[&str] = &["servicerequireslogin", "invalidsesskey", "requireloginerror"];

/// One call in the AJAX batch payload
#[derive(Debug, Serialize)]
struct AjaxCall {
    index: u32,
    methodname: &'static str,
    args: CourseQuery,
}

/// Arguments asking for every course in every classification
#[derive(Debug, Serialize)]
struct CourseQuery {
    offset: u32,
    /// 0 means no limit
    limit: u32,
    classification: &'static str,
    sort: &'static str,
}

/// One entry of the AJAX response array
#[derive(Debug, Deserialize)]
struct AjaxResponse {
    #[serde(default)]
    error: bool,
    exception: Option<AjaxException>,
    data: Option<CoursesData>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum AjaxException {
    Message(String),
    Detailed {
        message: Option<String>,
        errorcode: Option<String>,
    },
}

#[derive(Debug, Deserialize)]
struct CoursesData {
    courses: Vec<RawCourse>,
}

/// A course record as returned by the web service
#[derive(Debug, Deserialize)]
struct RawCourse {
    fullname: String,
    viewurl: String,
    #[serde(default)]
    coursecategory: Option<String>,
}

/// Course source backed by the Moodle AJAX API
#[derive(Debug, Clone)]
pub struct MoodleApiSource {
    client: Client,
    base_url: String,
    session_cookie: Option<String>,
}

impl MoodleApiSource {
    /// Creates a source for the portal at `base_url` (e.g. `https://courseweb.example.edu`)
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            session_cookie: None,
        }
    }

    /// Sends `MoodleSession=<cookie>` with every request
    pub fn with_session_cookie(mut self, cookie: Option<String>) -> Self {
        self.session_cookie = cookie;
        self
    }

    fn endpoint(&self) -> String {
        format!("{}{}", self.base_url, AJAX_ENDPOINT)
    }
}

#[async_trait]
impl CourseSource for MoodleApiSource {
    fn name(&self) -> &'static str {
        "api"
    }

    async fn fetch_once(&self, session_token: Option<&str>) -> Result<Vec<Course>, FetchError> {
        let sesskey = session_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| FetchError::Auth("sesskey not found".to_string()))?;

        let payload = build_payload();
        let mut request = self
            .client
            .post(self.endpoint())
            .query(&[("sesskey", sesskey), ("info", COURSES_METHOD)])
            .json(&payload);
        if let Some(cookie) = &self.session_cookie {
            request = request.header(header::COOKIE, format!("MoodleSession={}", cookie));
        }

        let response = request.send().await?;
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(FetchError::Auth(format!("HTTP {}", status)));
        }
        if !status.is_success() {
            return Err(FetchError::Transport(format!("HTTP {}", status)));
        }

        let text = response.text().await?;
        debug!(bytes = text.len(), "received AJAX response");
        parse_response(&text)
    }
}

fn build_payload() -> Vec<AjaxCall> {
    vec![AjaxCall {
        index: 0,
        methodname: COURSES_METHOD,
        args: CourseQuery {
            offset: 0,
            limit: 0,
            classification: "all",
            sort: "fullname",
        },
    }]
}

/// Parses the AJAX response body into courses
fn parse_response(body: &str) -> Result<Vec<Course>, FetchError> {
    let responses: Vec<AjaxResponse> = serde_json::from_str(body)?;
    let first = responses
        .into_iter()
        .next()
        .ok_or_else(|| FetchError::MalformedResponse("empty response array".to_string()))?;

    if first.error {
        return Err(exception_to_error(first.exception));
    }

    let data = first
        .data
        .ok_or_else(|| FetchError::MalformedResponse("missing data.courses".to_string()))?;

    Ok(data
        .courses
        .into_iter()
        .map(|raw| Course::new(raw.fullname, raw.viewurl, raw.coursecategory.as_deref()))
        .collect())
}

fn exception_to_error(exception: Option<AjaxException>) -> FetchError {
    match exception {
        Some(AjaxException::Detailed { message, errorcode }) => {
            let message = message.unwrap_or_else(|| "unknown exception".to_string());
            match errorcode {
                Some(code) if AUTH_ERROR_CODES.contains(&code.as_str()) => {
                    FetchError::Auth(format!("{} ({})", message, code))
                }
                Some(code) => FetchError::Transport(format!("{} ({})", message, code)),
                None => FetchError::Transport(message),
            }
        }
        Some(AjaxException::Message(message)) => FetchError::Transport(message),
        None => FetchError::Transport("server reported an error".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Sample successful response with one categorized and one bracketed course
    const VALID_RESPONSE: &str = r#"[{
        "error": false,
        "data": {
            "courses": [
                {
                    "id": 101,
                    "fullname": "Software Engineering [2024/JAN]",
                    "viewurl": "https://lms.example.edu/course/view.php?id=101",
                    "coursecategory": "2024 January"
                },
                {
                    "id": 102,
                    "fullname": "Data Structures [2023/JUL]",
                    "viewurl": "https://lms.example.edu/course/view.php?id=102"
                },
                {
                    "id": 103,
                    "fullname": "Library Orientation",
                    "viewurl": "https://lms.example.edu/course/view.php?id=103",
                    "coursecategory": ""
                }
            ],
            "nextoffset": 3
        }
    }]"#;

    #[test]
    fn test_parse_valid_response() {
        let courses = parse_response(VALID_RESPONSE).expect("Should parse");

        assert_eq!(courses.len(), 3);
        assert_eq!(courses[0].title, "Software Engineering [2024/JAN]");
        assert_eq!(
            courses[0].href,
            "https://lms.example.edu/course/view.php?id=101"
        );
        assert_eq!(courses[0].category, "2024 January");
        assert_eq!(courses[1].category, "2023/JUL");
        assert_eq!(courses[2].category, "Uncategorized");
    }

    #[test]
    fn test_parse_empty_course_list() {
        let courses = parse_response(r#"[{"error": false, "data": {"courses": []}}]"#)
            .expect("Should parse");
        assert!(courses.is_empty());
    }

    #[test]
    fn test_parse_server_exception_is_transport_error() {
        let body = r#"[{"error": true, "exception": {"message": "Database error", "errorcode": "dmlreadexception"}}]"#;
        let err = parse_response(body).unwrap_err();
        assert_eq!(
            err,
            FetchError::Transport("Database error (dmlreadexception)".to_string())
        );
    }

    #[test]
    fn test_parse_login_exception_is_auth_error() {
        let body = r#"[{"error": true, "exception": {"message": "Invalid sesskey", "errorcode": "invalidsesskey"}}]"#;
        assert!(parse_response(body).unwrap_err().is_auth());
    }

    #[test]
    fn test_parse_string_exception() {
        let body = r#"[{"error": true, "exception": "Something broke"}]"#;
        assert_eq!(
            parse_response(body).unwrap_err(),
            FetchError::Transport("Something broke".to_string())
        );
    }

    #[test]
    fn test_parse_missing_data_is_malformed() {
        let err = parse_response(r#"[{"error": false}]"#).unwrap_err();
        assert!(matches!(err, FetchError::MalformedResponse(_)));
    }

    #[test]
    fn test_parse_non_json_is_malformed() {
        let err = parse_response("<html>Login</html>").unwrap_err();
        assert!(matches!(err, FetchError::MalformedResponse(_)));
    }

    #[test]
    fn test_parse_empty_array_is_malformed() {
        let err = parse_response("[]").unwrap_err();
        assert!(matches!(err, FetchError::MalformedResponse(_)));
    }

    #[test]
    fn test_payload_shape() {
        let json = serde_json::to_value(build_payload()).unwrap();
        assert_eq!(json[0]["index"], 0);
        assert_eq!(json[0]["methodname"], COURSES_METHOD);
        assert_eq!(json[0]["args"]["offset"], 0);
        assert_eq!(json[0]["args"]["limit"], 0);
        assert_eq!(json[0]["args"]["classification"], "all");
        assert_eq!(json[0]["args"]["sort"], "fullname");
    }

    #[test]
    fn test_endpoint_trims_trailing_slash() {
        let source = MoodleApiSource::new(Client::new(), "https://lms.example.edu/");
        assert_eq!(
            source.endpoint(),
            "https://lms.example.edu/lib/ajax/service.php"
        );
    }

    #[tokio::test]
    async fn test_missing_token_is_auth_error_without_request() {
        // Unroutable base URL: the call must fail before any request is made
        let source = MoodleApiSource::new(Client::new(), "http://127.0.0.1:9");
        let err = source.fetch_once(None).await.unwrap_err();
        assert!(err.is_auth());

        let err = source.fetch_once(Some("")).await.unwrap_err();
        assert!(err.is_auth());
    }
}
