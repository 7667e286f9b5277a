//! Configuration for the jukebox engine.
//!
//! Settings are read from a TOML file. Only the application credentials and
//! the preferred device are required; everything else has a default:
//!
//! ```toml
//! client_id = "0123456789abcdef0123456789abcdef"
//! client_secret = "secret"
//! redirect_uri = "https://example.ngrok.io/spotify"
//! preferred_device_id = "d1e2v3i4c5e6"
//! fallback_context_uri = "spotify:playlist:37i9dQZF1DXcBWIGoYBM5M"
//!
//! [login]
//! username = "someone@example.com"
//! password = "hunter2"
//!
//! [timings]
//! heartbeat_interval = 30
//! stale_after = 600
//! ```

use std::{fs, path::Path, time::Duration};

use serde::Deserialize;
use serde_with::{serde_as, DurationMilliSeconds, DurationSeconds};
use url::Url;
use uuid::Uuid;
use veil::Redact;

use crate::error::{Error, Result};

/// Complete engine configuration.
#[derive(Clone, Deserialize, Redact)]
pub struct Config {
    /// Application client id from the Spotify developer dashboard.
    pub client_id: String,

    /// Application client secret.
    #[redact]
    pub client_secret: String,

    /// Redirect URI registered for the application. The authorization code
    /// is read from the browser once it lands here.
    pub redirect_uri: Url,

    /// Refresh token from an earlier authorization. When present, the
    /// interactive authorization-code flow is skipped.
    #[redact]
    #[serde(default)]
    pub refresh_token: Option<String>,

    /// Device that the bot plays on.
    pub preferred_device_id: String,

    /// Context to start when there is nothing to resume.
    #[serde(default)]
    pub fallback_context_uri: Option<String>,

    /// Name under which the browser's web player shows up in the device list.
    #[serde(default = "default_web_player_name")]
    pub web_player_name: String,

    /// Two-letter language code sent with requests.
    #[serde(default = "default_app_lang")]
    pub app_lang: String,

    /// Overrides the generated `User-Agent`.
    #[serde(default, rename = "user_agent")]
    user_agent_override: Option<String>,

    /// Account credentials used when the browser session asks to log in.
    #[serde(default)]
    pub login: Login,

    #[serde(default)]
    pub webdriver: WebDriver,

    #[serde(default)]
    pub timings: Timings,

    #[serde(default)]
    pub endpoints: Endpoints,

    /// Generated on load.
    #[serde(skip)]
    pub user_agent: String,

    /// Stable per-machine id for registering with the connect service.
    /// Generated on load.
    #[serde(skip)]
    pub device_id: Uuid,
}

/// Account credentials for the browser login flow.
///
/// Username and password take precedence; otherwise the flow logs in
/// through Facebook, whose credentials may already be cached by the browser
/// profile.
#[derive(Clone, Default, Deserialize, Redact)]
pub struct Login {
    pub username: Option<String>,

    #[redact]
    pub password: Option<String>,

    pub facebook_email: Option<String>,

    #[redact]
    pub facebook_password: Option<String>,
}

/// Browser automation settings.
#[serde_as]
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct WebDriver {
    /// Address of a running WebDriver server such as chromedriver.
    pub url: Url,

    /// Command-line arguments for the browser, for example `--headless` or
    /// `user-data-dir=chromeprofile`.
    pub args: Vec<String>,

    /// Wait ceiling for each discrete UI step.
    #[serde_as(as = "DurationSeconds<u64>")]
    pub step_timeout: Duration,
}

/// Timing policy of the engine.
#[serde_as]
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Timings {
    /// Interval between heartbeat pings on the realtime connection.
    #[serde_as(as = "DurationSeconds<u64>")]
    pub heartbeat_interval: Duration,

    /// Delay before reconnecting a closed realtime connection.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub reconnect_delay: Duration,

    /// How long the playback state may go without updates before a resync
    /// is forced.
    #[serde_as(as = "DurationSeconds<u64>")]
    pub stale_after: Duration,

    /// Pause between tearing down and reinitializing the automation session.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub reinit_delay: Duration,

    /// Total attempts of the bounded retry wrapper.
    pub retry_attempts: u32,
}

/// Service endpoints. Overridable to point at test doubles.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Endpoints {
    pub accounts: Url,
    pub api: Url,
    pub web_token: Url,
    pub spclient: Url,
    pub dealer: Url,
    pub web_player: Url,
}

fn default_web_player_name() -> String {
    "Web Player (Chrome)".to_owned()
}

fn default_app_lang() -> String {
    "en".to_owned()
}

fn parse_static(url: &'static str) -> Url {
    Url::parse(url).expect("invalid built-in url")
}

impl Default for WebDriver {
    fn default() -> Self {
        Self {
            url: parse_static("http://localhost:9515"),
            args: vec!["--headless".to_owned(), "--disable-gpu".to_owned()],
            step_timeout: Duration::from_secs(30),
        }
    }
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(30),
            reconnect_delay: Duration::from_secs(2),
            stale_after: Duration::from_secs(600),
            reinit_delay: Duration::from_secs(2),
            retry_attempts: 5,
        }
    }
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            accounts: parse_static("https://accounts.spotify.com/"),
            api: parse_static("https://api.spotify.com/v1/"),
            web_token: parse_static("https://open.spotify.com/get_access_token"),
            spclient: parse_static("https://gew-spclient.spotify.com/"),
            dealer: parse_static("wss://gew1-dealer.spotify.com/"),
            web_player: parse_static("https://open.spotify.com/browse/featured"),
        }
    }
}

impl Config {
    /// Largest configuration file that will be read.
    const MAX_FILE_SIZE: u64 = 64 * 1024;

    /// Reads and validates a configuration file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, is too large, is not
    /// valid TOML, or misses required settings.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        // Prevent out-of-memory condition: the file should be small.
        let file_size = fs::metadata(path)?.len();
        if file_size > Self::MAX_FILE_SIZE {
            return Err(Error::invalid_argument(format!(
                "{} is too large ({file_size} bytes)",
                path.display()
            )));
        }

        let contents = fs::read_to_string(path)?;
        contents.parse()
    }

    fn finalize(mut self) -> Result<Self> {
        if self.client_id.is_empty() || self.client_secret.is_empty() {
            return Err(Error::invalid_argument(
                "client id and client secret must be set",
            ));
        }

        if self.preferred_device_id.is_empty() {
            return Err(Error::invalid_argument("preferred device id must be set"));
        }

        if self.timings.retry_attempts == 0 {
            return Err(Error::invalid_argument(
                "retry attempts must be at least one",
            ));
        }

        if self.timings.heartbeat_interval.is_zero() {
            return Err(Error::invalid_argument(
                "heartbeat interval must not be zero",
            ));
        }

        self.user_agent = match self.user_agent_override.take() {
            Some(user_agent) => user_agent,
            None => Self::default_user_agent(&self.app_lang)?,
        };
        trace!("user agent: {}", self.user_agent);

        self.device_id = match machine_uid::get() {
            Ok(machine_id) => {
                let namespace = Uuid::new_v5(&Uuid::NAMESPACE_DNS, b"spotify.com");
                Uuid::new_v5(&namespace, machine_id.as_bytes())
            }
            Err(e) => {
                warn!("could not get machine id, using random device id: {e}");
                Uuid::new_v4()
            }
        };
        trace!("device uuid: {}", self.device_id);

        Ok(self)
    }

    /// Builds a `User-Agent` in the form
    /// `name/version (Rust; os/version; Desktop; lang)`.
    fn default_user_agent(app_lang: &str) -> Result<String> {
        let app_name = env!("CARGO_PKG_NAME");
        let app_version = env!("CARGO_PKG_VERSION");

        let illegal_chars = |chr| chr == '/' || chr == ';';
        if app_lang.chars().count() != 2 || app_lang.contains(illegal_chars) {
            return Err(Error::invalid_argument(format!(
                "application language invalid (\"{app_lang}\")"
            )));
        }

        let os_name = match std::env::consts::OS {
            "macos" => "osx",
            other => other,
        };
        let os_version = sysinfo::System::os_version().unwrap_or_else(|| String::from("0"));
        if os_name.is_empty()
            || os_name.contains(illegal_chars)
            || os_version.is_empty()
            || os_version.contains(illegal_chars)
        {
            return Err(Error::invalid_argument(format!(
                "os name and/or version invalid (\"{os_name}\"; \"{os_version}\")"
            )));
        }

        Ok(format!(
            "{app_name}/{app_version} (Rust; {os_name}/{os_version}; Desktop; {app_lang})"
        ))
    }

    /// Whether account credentials are configured for the browser login.
    #[must_use]
    pub fn has_login(&self) -> bool {
        self.login.username.is_some() || self.login.facebook_email.is_some()
    }
}

impl std::str::FromStr for Config {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let config: Self = toml::from_str(s)?;
        config.finalize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        client_id = "id"
        client_secret = "secret"
        redirect_uri = "https://example.com/spotify"
        preferred_device_id = "kitchen"
    "#;

    #[test]
    fn minimal_config_gets_defaults() {
        let config: Config = MINIMAL.parse().unwrap();

        assert_eq!(config.timings.heartbeat_interval, Duration::from_secs(30));
        assert_eq!(config.timings.reconnect_delay, Duration::from_secs(2));
        assert_eq!(config.timings.stale_after, Duration::from_secs(600));
        assert_eq!(config.timings.retry_attempts, 5);
        assert_eq!(config.webdriver.step_timeout, Duration::from_secs(30));
        assert_eq!(config.web_player_name, "Web Player (Chrome)");
        assert!(config.user_agent.starts_with("jukebox/"));
        assert!(config.fallback_context_uri.is_none());
    }

    #[test]
    fn timings_are_overridable() {
        let toml = format!(
            "{MINIMAL}\n[timings]\nheartbeat_interval = 5\nreconnect_delay = 250\n"
        );
        let config: Config = toml.parse().unwrap();

        assert_eq!(config.timings.heartbeat_interval, Duration::from_secs(5));
        assert_eq!(config.timings.reconnect_delay, Duration::from_millis(250));
        assert_eq!(config.timings.stale_after, Duration::from_secs(600));
    }

    #[test]
    fn secrets_are_redacted() {
        let toml = format!("{MINIMAL}\nrefresh_token = \"very-secret-token\"\n");
        let config: Config = toml.parse().unwrap();

        let debug = format!("{config:?}");
        assert!(!debug.contains("very-secret-token"));
        assert!(!debug.contains("\"secret\""));
    }

    #[test]
    fn missing_device_is_rejected() {
        let toml = MINIMAL.replace("\"kitchen\"", "\"\"");
        let err = toml.parse::<Config>().unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::InvalidArgument);
    }
}
