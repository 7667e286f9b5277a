//! [`Browser`] over the W3C WebDriver protocol.
//!
//! Talks JSON over HTTP to a running WebDriver server such as
//! `chromedriver --port=9515`. Each [`Launcher::launch`] opens a new
//! browser session with the configured command-line arguments.
//!
//! Every response wraps its result in a `value` member:
//!
//! ```json
//! {"value": [{"element-6066-11e4-a52e-4f735466cecf": "f.1A2B.d.3C4D.e.5"}]}
//! {"value": {"error": "no such element", "message": "...", "stacktrace": ""}}
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{header::CONTENT_TYPE, Method};
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use url::Url;

use super::{Browser, Cookie, Element, Selector};
use crate::{
    config::Config,
    error::{Error, Result},
    http::Client,
};

/// Key under which element references are returned.
const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";

/// Error reported by the WebDriver server.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{error}: {message}")]
pub struct Failure {
    /// Error code such as `no such element` or `stale element reference`.
    pub error: String,
    pub message: String,
}

#[derive(Deserialize)]
struct Response {
    #[serde(default)]
    value: serde_json::Value,
}

#[derive(Deserialize)]
struct NewSession {
    #[serde(rename = "sessionId")]
    session_id: String,
}

#[derive(Deserialize)]
struct WireCookie {
    name: String,
    value: String,
}

/// Sends one command and returns its `value`.
async fn command(
    http: &reqwest::Client,
    method: Method,
    url: Url,
    body: Option<serde_json::Value>,
) -> Result<serde_json::Value> {
    trace!("{method} {url}");

    let mut request = http.request(method, url);
    if let Some(body) = body {
        request = request
            .header(CONTENT_TYPE, Client::JSON_CONTENT)
            .body(body.to_string());
    }

    let response = request.send().await.map_err(Error::automation)?;
    let status = response.status();
    let text = response.text().await.map_err(Error::automation)?;
    let response: Response = serde_json::from_str(&text).map_err(Error::automation)?;

    if status.is_success() {
        Ok(response.value)
    } else {
        let failure = Failure {
            error: response.value["error"]
                .as_str()
                .unwrap_or("unknown error")
                .to_owned(),
            message: response.value["message"]
                .as_str()
                .unwrap_or_default()
                .to_owned(),
        };
        Err(Error::automation(failure))
    }
}

/// Opens WebDriver sessions.
pub struct Launcher {
    http: reqwest::Client,
    url: Url,
    args: Vec<String>,
}

impl Launcher {
    #[must_use]
    pub fn new(config: &Config, http: &Client) -> Self {
        Self {
            http: http.unlimited.clone(),
            url: config.webdriver.url.clone(),
            args: config.webdriver.args.clone(),
        }
    }
}

#[async_trait]
impl super::Launcher for Launcher {
    async fn launch(&self) -> Result<Arc<dyn Browser>> {
        let capabilities = json!({
            "capabilities": {
                "alwaysMatch": {
                    "browserName": "chrome",
                    "goog:chromeOptions": { "args": self.args },
                }
            }
        });

        let value = command(
            &self.http,
            Method::POST,
            self.url.join("session")?,
            Some(capabilities),
        )
        .await?;
        let NewSession { session_id } =
            serde_json::from_value(value).map_err(Error::automation)?;
        debug!("webdriver session {session_id} started");

        let base = self.url.join(&format!("session/{session_id}/"))?;
        Ok(Arc::new(Session {
            http: self.http.clone(),
            base,
            id: session_id,
        }))
    }
}

/// A WebDriver browser session.
pub struct Session {
    http: reqwest::Client,
    base: Url,
    id: String,
}

impl Session {
    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<serde_json::Value> {
        command(&self.http, method, self.base.join(path)?, body).await
    }

    fn locator(selector: &Selector) -> serde_json::Value {
        let (using, value) = match selector {
            Selector::Id(id) => ("css selector", format!("[id=\"{id}\"]")),
            Selector::Css(css) => ("css selector", css.clone()),
            Selector::XPath(xpath) => ("xpath", xpath.clone()),
        };
        json!({ "using": using, "value": value })
    }
}

#[async_trait]
impl Browser for Session {
    async fn navigate(&self, url: &Url) -> Result<()> {
        debug!("navigating to {}", url.as_str());
        self.send(Method::POST, "url", Some(json!({ "url": url.as_str() })))
            .await
            .map(drop)
    }

    async fn current_url(&self) -> Result<Url> {
        let value = self.send(Method::GET, "url", None).await?;
        let url = value
            .as_str()
            .ok_or_else(|| Error::automation("current url is not a string"))?;
        Url::parse(url).map_err(Error::automation)
    }

    async fn find_elements(&self, selector: &Selector) -> Result<Vec<Element>> {
        let value = self
            .send(Method::POST, "elements", Some(Self::locator(selector)))
            .await?;

        let elements = value
            .as_array()
            .map(|elements| {
                elements
                    .iter()
                    .filter_map(|element| element[ELEMENT_KEY].as_str())
                    .map(|id| Element(id.to_owned()))
                    .collect()
            })
            .unwrap_or_default();
        Ok(elements)
    }

    async fn click(&self, element: &Element) -> Result<()> {
        self.send(
            Method::POST,
            &format!("element/{}/click", element.0),
            Some(json!({})),
        )
        .await
        .map(drop)
    }

    async fn send_keys(&self, element: &Element, text: &str) -> Result<()> {
        self.send(
            Method::POST,
            &format!("element/{}/value", element.0),
            Some(json!({ "text": text })),
        )
        .await
        .map(drop)
    }

    async fn clear(&self, element: &Element) -> Result<()> {
        self.send(
            Method::POST,
            &format!("element/{}/clear", element.0),
            Some(json!({})),
        )
        .await
        .map(drop)
    }

    async fn is_stale(&self, element: &Element) -> Result<bool> {
        match self
            .send(Method::GET, &format!("element/{}/name", element.0), None)
            .await
        {
            Ok(_) => Ok(false),
            Err(e) => {
                let detached = e.downcast::<Failure>().is_some_and(|failure| {
                    failure.error == "stale element reference"
                        || failure.error == "no such element"
                });
                if detached {
                    Ok(true)
                } else {
                    Err(e)
                }
            }
        }
    }

    async fn cookies(&self) -> Result<Vec<Cookie>> {
        let value = self.send(Method::GET, "cookie", None).await?;
        let cookies: Vec<WireCookie> = serde_json::from_value(value).map_err(Error::automation)?;
        Ok(cookies
            .into_iter()
            .map(|cookie| Cookie {
                name: cookie.name,
                value: cookie.value,
            })
            .collect())
    }

    async fn quit(&self) -> Result<()> {
        debug!("ending webdriver session {}", self.id);
        // The session resource itself, without trailing slash.
        let url = self.base.join(&format!("../{}", self.id))?;
        command(&self.http, Method::DELETE, url, None).await.map(drop)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_selectors_use_css() {
        let locator = Session::locator(&Selector::id("login-button"));
        assert_eq!(locator["using"], "css selector");
        assert_eq!(locator["value"], "[id=\"login-button\"]");

        let locator = Session::locator(&Selector::xpath("//button"));
        assert_eq!(locator["using"], "xpath");
    }

    #[test]
    fn quit_targets_session_resource() {
        let base = Url::parse("http://localhost:9515/session/abc/").unwrap();
        let url = base.join("../abc").unwrap();
        assert_eq!(url.as_str(), "http://localhost:9515/session/abc");
    }
}
