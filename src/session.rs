//! Session detection
//!
//! The session gate decides whether the learner is logged in and provides the
//! token a course source needs. Session state is never stored: it is derived
//! from the current page or the credentials given on the command line every
//! time it is asked for.

use reqwest::{header, Client};
use scraper::{Html, Selector};
use tracing::debug;

use crate::data::FetchError;

/// Links carrying the session key (the logout link always does)
const SESSKEY_LINK_SELECTOR: &str = "a[href*=\"sesskey=\"]";

/// Elements offering a login
const LOGIN_SELECTOR: &str =
    "form#login, input[name=\"logintoken\"], a[href*=\"/login/index.php\"]";

/// Page fetched to discover the session key
const DASHBOARD_PAGE: &str = "/my/";

/// Predicate telling whether the current context is authenticated
pub trait SessionGate: Send + Sync {
    fn is_authenticated(&self) -> bool;

    /// Token handed to the course source, if one is available
    fn session_token(&self) -> Option<String>;
}

/// Session whose token is known up front (flag, environment or config)
#[derive(Debug, Clone, Default)]
pub struct StaticSession {
    token: Option<String>,
}

impl StaticSession {
    pub fn new(token: Option<String>) -> Self {
        Self {
            token: token.filter(|t| !t.trim().is_empty()),
        }
    }
}

impl SessionGate for StaticSession {
    fn is_authenticated(&self) -> bool {
        self.token.is_some()
    }

    fn session_token(&self) -> Option<String> {
        self.token.clone()
    }
}

/// Session state read from a portal page
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageSession {
    sesskey: Option<String>,
    login_offered: bool,
}

impl PageSession {
    /// Scans a page for a session key and for login affordances
    pub fn from_html(body: &str) -> Self {
        let document = Html::parse_document(body);

        let sesskey = Selector::parse(SESSKEY_LINK_SELECTOR).ok().and_then(|sel| {
            document
                .select(&sel)
                .filter_map(|a| a.value().attr("href"))
                .find_map(sesskey_from_href)
        });

        let login_offered = Selector::parse(LOGIN_SELECTOR)
            .map(|sel| document.select(&sel).next().is_some())
            .unwrap_or(false);

        Self {
            sesskey,
            login_offered,
        }
    }

    /// Loads the dashboard with the session cookie and scans it
    ///
    /// Without a cookie the result is an unauthenticated session.
    pub async fn fetch(
        client: &Client,
        base_url: &str,
        session_cookie: Option<&str>,
    ) -> Result<Self, FetchError> {
        let Some(cookie) = session_cookie.filter(|c| !c.is_empty()) else {
            return Ok(Self::default());
        };

        let url = format!("{}{}", base_url.trim_end_matches('/'), DASHBOARD_PAGE);
        let response = client
            .get(&url)
            .header(header::COOKIE, format!("MoodleSession={}", cookie))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Transport(format!("HTTP {}", status)));
        }

        let session = Self::from_html(&response.text().await?);
        debug!(
            authenticated = session.is_authenticated(),
            "scanned dashboard for session"
        );
        Ok(session)
    }
}

impl SessionGate for PageSession {
    /// A logout link with a session key means logged in, unless the page
    /// also asks for a login
    fn is_authenticated(&self) -> bool {
        self.sesskey.is_some() && !self.login_offered
    }

    fn session_token(&self) -> Option<String> {
        self.sesskey.clone()
    }
}

/// Login state read from the portal, paired with the token a source needs
///
/// The page decides whether the session is alive. The token is whichever
/// credential the course source sends (sesskey for the API, the session
/// cookie for the HTML page).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PortalSession {
    page: PageSession,
    token: Option<String>,
}

impl PortalSession {
    pub fn new(page: PageSession, token: Option<String>) -> Self {
        Self {
            page,
            token: token.filter(|t| !t.trim().is_empty()),
        }
    }

    /// Session key found on the scanned page
    pub fn page_sesskey(&self) -> Option<&str> {
        self.page.sesskey.as_deref()
    }
}

impl SessionGate for PortalSession {
    fn is_authenticated(&self) -> bool {
        self.token.is_some() && self.page.is_authenticated()
    }

    fn session_token(&self) -> Option<String> {
        self.token.clone()
    }
}

/// Extracts the `sesskey` query value from a link
fn sesskey_from_href(href: &str) -> Option<String> {
    let start = href.find("sesskey=")? + "sesskey=".len();
    let value = href[start..].split(['&', '#']).next()?;
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}
