use crate::session::{Locator, DEFAULT_WEBDRIVER_URL};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ROLE_OPTION_INDEX_TOKEN: &str = "{index}";
pub const ROW_URL_IDENTITY_TOKEN: &str = "{identity}";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Case-insensitive equality filter on one categorical column.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RowFilter {
    #[serde(default = "default_filter_field")]
    pub field: String,
    pub value: String,
}

fn default_filter_field() -> String {
    "Creator".to_string()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BrowserSettings {
    #[serde(default = "default_webdriver_url")]
    pub webdriver_url: String,
    #[serde(default)]
    pub headless: bool,
    #[serde(default)]
    pub user_data_dir: Option<String>,
    #[serde(default)]
    pub profile_dir: Option<String>,
}

fn default_webdriver_url() -> String {
    DEFAULT_WEBDRIVER_URL.to_string()
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            webdriver_url: default_webdriver_url(),
            headless: false,
            user_data_dir: None,
            profile_dir: None,
        }
    }
}

/// Locator set for the target form. Defaults match the account-creation
/// surface this tool was built against.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UiSelectors {
    #[serde(default = "default_nav_tab")]
    pub nav_tab: Locator,
    #[serde(default = "default_open_form")]
    pub open_form: Locator,
    #[serde(default = "default_save_button")]
    pub save_button: Locator,
    #[serde(default = "default_identity_field")]
    pub identity_field: Locator,
    #[serde(default = "default_password_field")]
    pub password_field: Locator,
    #[serde(default = "default_confirm_password_field")]
    pub confirm_password_field: Locator,
    #[serde(default = "default_full_name_field")]
    pub full_name_field: Locator,
    #[serde(default = "default_email_field")]
    pub email_field: Locator,
    /// XPath template; `{index}` is replaced with the 1-based role rank.
    #[serde(default = "default_role_option_xpath")]
    pub role_option_xpath: String,
}

fn default_nav_tab() -> Locator {
    Locator::xpath("(//a[@ng-click='select($event)'])[2]")
}

fn default_open_form() -> Locator {
    Locator::xpath("//button[@ng-click=\"vm.addAclUser(vm.AclAgents,'lg')\"]")
}

fn default_save_button() -> Locator {
    Locator::xpath("//button[@type='submit' and contains(@class,'btn-primary')]")
}

fn default_identity_field() -> Locator {
    Locator::id("acl-user-id")
}

fn default_password_field() -> Locator {
    Locator::id("acl-user-newpwd")
}

fn default_confirm_password_field() -> Locator {
    Locator::id("acl-user-confnewpwd")
}

fn default_full_name_field() -> Locator {
    Locator::id("acl-user-name")
}

fn default_email_field() -> Locator {
    Locator::id("acl-user-email")
}

fn default_role_option_xpath() -> String {
    "//*[@id='acl-user-roles']/label[{index}]".to_string()
}

impl Default for UiSelectors {
    fn default() -> Self {
        Self {
            nav_tab: default_nav_tab(),
            open_form: default_open_form(),
            save_button: default_save_button(),
            identity_field: default_identity_field(),
            password_field: default_password_field(),
            confirm_password_field: default_confirm_password_field(),
            full_name_field: default_full_name_field(),
            email_field: default_email_field(),
            role_option_xpath: default_role_option_xpath(),
        }
    }
}

impl UiSelectors {
    /// Positional option locator for a computed role rank (1-based).
    pub fn role_option(&self, rank: usize) -> Locator {
        Locator::xpath(
            self.role_option_xpath
                .replace(ROLE_OPTION_INDEX_TOKEN, &rank.to_string()),
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct Timeouts {
    #[serde(default = "default_ui_wait_secs")]
    pub ui_wait_secs: u64,
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
}

fn default_ui_wait_secs() -> u64 {
    20
}

fn default_settle_ms() -> u64 {
    300
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            ui_wait_secs: default_ui_wait_secs(),
            settle_ms: default_settle_ms(),
        }
    }
}

impl Timeouts {
    pub fn ui_wait(&self) -> Duration {
        Duration::from_secs(self.ui_wait_secs)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }
}

/// Immutable run configuration, built once at startup and threaded into the
/// batch driver. No ambient globals.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RunConfig {
    pub source_path: PathBuf,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub start_url: String,
    /// Optional per-row navigation target; `{identity}` is replaced with the
    /// row's URL-encoded identity token.
    #[serde(default)]
    pub row_url_template: Option<String>,
    #[serde(default)]
    pub interactive: bool,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default)]
    pub filter: Option<RowFilter>,
    #[serde(default)]
    pub browser: BrowserSettings,
    #[serde(default)]
    pub selectors: UiSelectors,
    #[serde(default)]
    pub timeouts: Timeouts,
}

impl RunConfig {
    pub fn new(source_path: impl Into<PathBuf>) -> Self {
        Self {
            source_path: source_path.into(),
            password: String::new(),
            start_url: String::new(),
            row_url_template: None,
            interactive: false,
            dry_run: false,
            filter: None,
            browser: BrowserSettings::default(),
            selectors: UiSelectors::default(),
            timeouts: Timeouts::default(),
        }
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            source: e,
        })?;
        serde_yaml::from_str(&raw).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            source: e,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.source_path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("source_path is required".to_string()));
        }
        if !self
            .selectors
            .role_option_xpath
            .contains(ROLE_OPTION_INDEX_TOKEN)
        {
            return Err(ConfigError::Invalid(format!(
                "selectors.role_option_xpath must contain `{ROLE_OPTION_INDEX_TOKEN}`"
            )));
        }
        if let Some(template) = &self.row_url_template {
            if !template.contains(ROW_URL_IDENTITY_TOKEN) {
                return Err(ConfigError::Invalid(format!(
                    "row_url_template must contain `{ROW_URL_IDENTITY_TOKEN}`"
                )));
            }
        }
        if !self.dry_run {
            if self.start_url.trim().is_empty() {
                return Err(ConfigError::Invalid(
                    "start_url is required unless running with --dry-run".to_string(),
                ));
            }
            if self.password.trim().is_empty() {
                return Err(ConfigError::Invalid(
                    "password is required unless running with --dry-run".to_string(),
                ));
            }
        }
        if let Some(filter) = &self.filter {
            if filter.field.trim().is_empty() || filter.value.trim().is_empty() {
                return Err(ConfigError::Invalid(
                    "filter requires both a field and a value".to_string(),
                ));
            }
        }
        Ok(())
    }
}
