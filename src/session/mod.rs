use serde::{Deserialize, Serialize};
use std::time::Duration;

pub mod webdriver;
pub use webdriver::{BrowserOptions, WebDriverSession, DEFAULT_WEBDRIVER_URL};

/// Element locator understood by the UI session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "by", content = "value", rename_all = "snake_case")]
pub enum Locator {
    Css(String),
    #[serde(rename = "xpath")]
    XPath(String),
    Id(String),
}

impl Locator {
    pub fn css(value: impl Into<String>) -> Self {
        Locator::Css(value.into())
    }

    pub fn xpath(value: impl Into<String>) -> Self {
        Locator::XPath(value.into())
    }

    pub fn id(value: impl Into<String>) -> Self {
        Locator::Id(value.into())
    }

    /// W3C WebDriver locator strategy plus selector text.
    pub fn strategy(&self) -> (&'static str, String) {
        match self {
            Locator::Css(value) => ("css selector", value.clone()),
            Locator::XPath(value) => ("xpath", value.clone()),
            Locator::Id(value) => ("css selector", format!(r#"[id="{value}"]"#)),
        }
    }
}

impl std::fmt::Display for Locator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Locator::Css(value) => write!(f, "css `{value}`"),
            Locator::XPath(value) => write!(f, "xpath `{value}`"),
            Locator::Id(value) => write!(f, "id `{value}`"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The condition was not met within the wait window. Distinct from
    /// `NotFound`: the element may have existed but never satisfied the
    /// awaited condition.
    #[error("timed out after {after_secs}s waiting on {locator}")]
    Timeout { locator: String, after_secs: u64 },
    #[error("element never existed: {locator}")]
    NotFound { locator: String },
    #[error("stale element reference at {locator}")]
    Stale { locator: String },
    #[error("click intercepted at {locator}")]
    Intercepted { locator: String },
    #[error("navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },
    #[error("driver error: {0}")]
    Driver(String),
}

impl SessionError {
    /// Short kind tag used in persisted `Error - <kind>` statuses.
    pub fn kind(&self) -> &'static str {
        match self {
            SessionError::Timeout { .. } => "timeout",
            SessionError::NotFound { .. } => "element not found",
            SessionError::Stale { .. } => "stale element",
            SessionError::Intercepted { .. } => "click intercepted",
            SessionError::Navigation { .. } => "navigation failed",
            SessionError::Driver(_) => "driver failure",
        }
    }

    /// Whether a retry of the same row could plausibly observe the element
    /// later (slow render), as opposed to a broken driver or page.
    pub fn is_wait_failure(&self) -> bool {
        matches!(
            self,
            SessionError::Timeout { .. } | SessionError::NotFound { .. }
        )
    }
}

/// Single exclusively-owned automation handle driving the remote UI for a
/// whole batch. All waits are timeout-bounded, never unbounded.
pub trait UiSession {
    fn navigate(&mut self, url: &str) -> Result<(), SessionError>;
    /// Waits for the element to be displayed and enabled, scrolls it into
    /// view, and clicks; falls back to a script click when the normal click
    /// is intercepted or the element reference goes stale.
    fn wait_until_clickable_then_click(
        &mut self,
        locator: &Locator,
        timeout: Duration,
    ) -> Result<(), SessionError>;
    fn wait_until_present(&mut self, locator: &Locator, timeout: Duration)
        -> Result<(), SessionError>;
    /// Non-waiting existence probe, used for detect-or-open decisions.
    fn is_present(&mut self, locator: &Locator) -> Result<bool, SessionError>;
    fn clear_and_type(&mut self, locator: &Locator, text: &str) -> Result<(), SessionError>;
    fn wait_until_invisible(
        &mut self,
        locator: &Locator,
        timeout: Duration,
    ) -> Result<(), SessionError>;
    fn close(&mut self) -> Result<(), SessionError>;
}

/// Session that records every interaction and always succeeds. Backs the
/// `--dry-run` mode so an operator can audit what a batch would do.
#[derive(Debug, Default)]
pub struct DryRunSession {
    actions: Vec<String>,
}

impl DryRunSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn actions(&self) -> &[String] {
        &self.actions
    }
}

impl UiSession for DryRunSession {
    fn navigate(&mut self, url: &str) -> Result<(), SessionError> {
        self.actions.push(format!("navigate {url}"));
        Ok(())
    }

    fn wait_until_clickable_then_click(
        &mut self,
        locator: &Locator,
        _timeout: Duration,
    ) -> Result<(), SessionError> {
        self.actions.push(format!("click {locator}"));
        Ok(())
    }

    fn wait_until_present(
        &mut self,
        locator: &Locator,
        _timeout: Duration,
    ) -> Result<(), SessionError> {
        self.actions.push(format!("wait present {locator}"));
        Ok(())
    }

    fn is_present(&mut self, locator: &Locator) -> Result<bool, SessionError> {
        self.actions.push(format!("probe {locator}"));
        Ok(false)
    }

    fn clear_and_type(&mut self, locator: &Locator, text: &str) -> Result<(), SessionError> {
        self.actions.push(format!("type into {locator}: {text}"));
        Ok(())
    }

    fn wait_until_invisible(
        &mut self,
        locator: &Locator,
        _timeout: Duration,
    ) -> Result<(), SessionError> {
        self.actions.push(format!("wait invisible {locator}"));
        Ok(())
    }

    fn close(&mut self) -> Result<(), SessionError> {
        self.actions.push("close".to_string());
        Ok(())
    }
}
