use super::{Locator, SessionError, UiSession};
use serde_json::{json, Value};
use std::thread;
use std::time::{Duration, Instant};

pub const DEFAULT_WEBDRIVER_URL: &str = "http://localhost:9515";

const POLL_INTERVAL: Duration = Duration::from_millis(250);
const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";

/// Browser launch options forwarded as vendor capabilities.
#[derive(Debug, Clone, Default)]
pub struct BrowserOptions {
    pub headless: bool,
    pub user_data_dir: Option<String>,
    pub profile_dir: Option<String>,
}

impl BrowserOptions {
    fn args(&self) -> Vec<String> {
        let mut args = vec![
            "--start-maximized".to_string(),
            "--disable-gpu".to_string(),
            "--no-sandbox".to_string(),
        ];
        if self.headless {
            args.push("--headless=new".to_string());
        }
        if let Some(dir) = &self.user_data_dir {
            args.push(format!("user-data-dir={dir}"));
            if let Some(profile) = &self.profile_dir {
                args.push(format!("profile-directory={profile}"));
            }
        }
        args
    }
}

enum WireFailure {
    /// WebDriver-level error response with its standard error code string.
    Protocol { error: String, message: String },
    Transport(String),
}

impl WireFailure {
    fn for_locator(self, locator: &Locator) -> SessionError {
        match self {
            WireFailure::Protocol { error, message } => match error.as_str() {
                "no such element" => SessionError::NotFound {
                    locator: locator.to_string(),
                },
                "stale element reference" => SessionError::Stale {
                    locator: locator.to_string(),
                },
                "element click intercepted" | "element not interactable" => {
                    SessionError::Intercepted {
                        locator: locator.to_string(),
                    }
                }
                _ => SessionError::Driver(message),
            },
            WireFailure::Transport(reason) => SessionError::Driver(reason),
        }
    }

    fn into_driver(self) -> SessionError {
        match self {
            WireFailure::Protocol { message, .. } => SessionError::Driver(message),
            WireFailure::Transport(reason) => SessionError::Driver(reason),
        }
    }
}

fn failure_from(err: ureq::Error) -> WireFailure {
    match err {
        ureq::Error::Status(_, response) => {
            let body: Value = response.into_json().unwrap_or(Value::Null);
            let value = body.get("value").cloned().unwrap_or(Value::Null);
            WireFailure::Protocol {
                error: value
                    .get("error")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown error")
                    .to_string(),
                message: value
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("webdriver request failed")
                    .to_string(),
            }
        }
        ureq::Error::Transport(transport) => WireFailure::Transport(transport.to_string()),
    }
}

/// W3C WebDriver client over HTTP. One instance owns one browsing context
/// for the lifetime of a batch.
pub struct WebDriverSession {
    endpoint: String,
    session_id: String,
    default_wait: Duration,
    settle: Duration,
}

impl WebDriverSession {
    /// Creates a remote session against a running WebDriver server
    /// (chromedriver/msedgedriver compatible).
    pub fn connect(
        endpoint: &str,
        options: &BrowserOptions,
        default_wait: Duration,
        settle: Duration,
    ) -> Result<Self, SessionError> {
        let endpoint = endpoint.trim_end_matches('/').to_string();
        let vendor_opts = json!({ "args": options.args() });
        let body = json!({
            "capabilities": {
                "alwaysMatch": {
                    "ms:edgeOptions": vendor_opts.clone(),
                    "goog:chromeOptions": vendor_opts,
                }
            }
        });
        let value = ureq::post(&format!("{endpoint}/session"))
            .send_json(body)
            .map_err(|e| failure_from(e).into_driver())
            .and_then(|response| {
                response
                    .into_json::<Value>()
                    .map_err(|e| SessionError::Driver(e.to_string()))
            })?;
        let session_id = value
            .get("value")
            .and_then(|v| v.get("sessionId"))
            .and_then(Value::as_str)
            .ok_or_else(|| {
                SessionError::Driver("webdriver session response had no sessionId".to_string())
            })?
            .to_string();
        Ok(Self {
            endpoint,
            session_id,
            default_wait,
            settle,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/session/{}/{path}", self.endpoint, self.session_id)
    }

    fn post(&self, path: &str, body: Value) -> Result<Value, WireFailure> {
        ureq::post(&self.url(path))
            .send_json(body)
            .map_err(failure_from)?
            .into_json::<Value>()
            .map(|v| v.get("value").cloned().unwrap_or(Value::Null))
            .map_err(|e| WireFailure::Transport(e.to_string()))
    }

    fn get(&self, path: &str) -> Result<Value, WireFailure> {
        ureq::get(&self.url(path))
            .call()
            .map_err(failure_from)?
            .into_json::<Value>()
            .map(|v| v.get("value").cloned().unwrap_or(Value::Null))
            .map_err(|e| WireFailure::Transport(e.to_string()))
    }

    /// Finds one element; absence is an `Ok(None)`, every other failure is a
    /// hard error.
    fn find_element(&self, locator: &Locator) -> Result<Option<String>, SessionError> {
        let (using, value) = locator.strategy();
        match self.post("element", json!({ "using": using, "value": value })) {
            Ok(found) => Ok(found
                .get(ELEMENT_KEY)
                .and_then(Value::as_str)
                .map(|s| s.to_string())),
            Err(WireFailure::Protocol { error, .. }) if error == "no such element" => Ok(None),
            Err(other) => Err(other.for_locator(locator)),
        }
    }

    fn element_flag(&self, element_id: &str, check: &str) -> Result<bool, WireFailure> {
        self.get(&format!("element/{element_id}/{check}"))
            .map(|value| value.as_bool().unwrap_or(false))
    }

    fn execute_on_element(
        &self,
        element_id: &str,
        script: &str,
    ) -> Result<(), WireFailure> {
        self.post(
            "execute/sync",
            json!({
                "script": script,
                "args": [{ ELEMENT_KEY: element_id }],
            }),
        )
        .map(|_| ())
    }

    /// Polls `probe` until it yields a value or the window closes. The probe
    /// reports `(element_existed, ready_value)`. Expiry reports `Timeout`
    /// when the element was observed at least once and `NotFound` when it
    /// never existed.
    fn wait_for<T>(
        &self,
        locator: &Locator,
        timeout: Duration,
        mut probe: impl FnMut() -> Result<(bool, Option<T>), SessionError>,
    ) -> Result<T, SessionError> {
        let started = Instant::now();
        let mut seen = false;
        loop {
            let (existed, ready) = probe()?;
            seen = seen || existed;
            if let Some(value) = ready {
                return Ok(value);
            }
            if started.elapsed() >= timeout {
                return Err(if seen {
                    SessionError::Timeout {
                        locator: locator.to_string(),
                        after_secs: timeout.as_secs(),
                    }
                } else {
                    SessionError::NotFound {
                        locator: locator.to_string(),
                    }
                });
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    fn wait_for_clickable(
        &self,
        locator: &Locator,
        timeout: Duration,
    ) -> Result<String, SessionError> {
        self.wait_for(locator, timeout, || {
            let Some(element_id) = self.find_element(locator)? else {
                return Ok((false, None));
            };
            let displayed = self
                .element_flag(&element_id, "displayed")
                .map_err(|e| e.for_locator(locator))?;
            let enabled = self
                .element_flag(&element_id, "enabled")
                .map_err(|e| e.for_locator(locator))?;
            Ok((true, (displayed && enabled).then_some(element_id)))
        })
    }
}

impl UiSession for WebDriverSession {
    fn navigate(&mut self, url: &str) -> Result<(), SessionError> {
        self.post("url", json!({ "url": url }))
            .map(|_| ())
            .map_err(|failure| {
                let reason = match failure {
                    WireFailure::Protocol { message, .. } => message,
                    WireFailure::Transport(reason) => reason,
                };
                SessionError::Navigation {
                    url: url.to_string(),
                    reason,
                }
            })
    }

    fn wait_until_clickable_then_click(
        &mut self,
        locator: &Locator,
        timeout: Duration,
    ) -> Result<(), SessionError> {
        let element_id = self.wait_for_clickable(locator, timeout)?;
        self.execute_on_element(&element_id, "arguments[0].scrollIntoView({block: 'center'});")
            .map_err(|e| e.for_locator(locator))?;
        thread::sleep(self.settle);

        match self.post(&format!("element/{element_id}/click"), json!({})) {
            Ok(_) => Ok(()),
            Err(failure) => match failure.for_locator(locator) {
                // A covered or re-rendered element still accepts a script
                // click, same as the driver-level fallback in the UI.
                SessionError::Intercepted { .. } | SessionError::Stale { .. } => self
                    .execute_on_element(&element_id, "arguments[0].click();")
                    .map_err(|e| e.for_locator(locator)),
                other => Err(other),
            },
        }
    }

    fn wait_until_present(
        &mut self,
        locator: &Locator,
        timeout: Duration,
    ) -> Result<(), SessionError> {
        self.wait_for(locator, timeout, || match self.find_element(locator)? {
            Some(_) => Ok((true, Some(()))),
            None => Ok((false, None)),
        })
    }

    fn is_present(&mut self, locator: &Locator) -> Result<bool, SessionError> {
        Ok(self.find_element(locator)?.is_some())
    }

    fn clear_and_type(&mut self, locator: &Locator, text: &str) -> Result<(), SessionError> {
        let timeout = self.default_wait;
        let element_id = self.wait_for(locator, timeout, || match self.find_element(locator)? {
            Some(id) => Ok((true, Some(id))),
            None => Ok((false, None)),
        })?;
        // Some inputs refuse clear(); typing still works, so the failure is
        // dropped on purpose.
        let _ = self.post(&format!("element/{element_id}/clear"), json!({}));
        self.post(
            &format!("element/{element_id}/value"),
            json!({ "text": text }),
        )
        .map(|_| ())
        .map_err(|e| e.for_locator(locator))
    }

    fn wait_until_invisible(
        &mut self,
        locator: &Locator,
        timeout: Duration,
    ) -> Result<(), SessionError> {
        let started = Instant::now();
        loop {
            let gone = match self.find_element(locator)? {
                None => true,
                Some(element_id) => match self.element_flag(&element_id, "displayed") {
                    Ok(displayed) => !displayed,
                    // The element vanished between find and probe.
                    Err(WireFailure::Protocol { error, .. })
                        if error == "stale element reference" =>
                    {
                        true
                    }
                    Err(other) => return Err(other.for_locator(locator)),
                },
            };
            if gone {
                return Ok(());
            }
            if started.elapsed() >= timeout {
                return Err(SessionError::Timeout {
                    locator: locator.to_string(),
                    after_secs: timeout.as_secs(),
                });
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    fn close(&mut self) -> Result<(), SessionError> {
        ureq::delete(&format!(
            "{}/session/{}",
            self.endpoint, self.session_id
        ))
        .call()
        .map(|_| ())
        .map_err(|e| failure_from(e).into_driver())
    }
}
