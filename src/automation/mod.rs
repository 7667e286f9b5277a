//! Browser automation capability.
//!
//! Some operations are only available to a logged-in web player: deriving
//! a web token from its cookies, the interactive OAuth consent and starting
//! radio contexts. This module abstracts the browser that drives those flows
//! as a [`Browser`], created by a [`Launcher`].
//!
//! # Submodules
//!
//! * [`channel`] - serializes work on the one shared browser session and
//!   recovers it when it breaks
//! * [`login`] - login and authorization flows
//! * [`webdriver`] - [`Browser`] over the W3C WebDriver protocol
//!
//! # Waiting
//!
//! Pages render asynchronously. [`wait_until`] polls a [`Condition`] until
//! it holds or a step timeout passes; a timeout is an
//! [`Automation`](crate::error::ErrorKind::Automation) failure.

pub mod channel;
pub mod login;
pub mod webdriver;

use std::{fmt, sync::Arc, time::Duration};

use async_trait::async_trait;
use url::Url;
use veil::Redact;

use crate::error::{Error, Result};

pub use channel::Channel;

/// How an element is located.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Selector {
    /// Element `id` attribute.
    Id(String),
    /// XPath expression.
    XPath(String),
    /// CSS selector.
    Css(String),
}

impl Selector {
    #[must_use]
    pub fn id(id: &str) -> Self {
        Self::Id(id.to_owned())
    }

    #[must_use]
    pub fn xpath(xpath: &str) -> Self {
        Self::XPath(xpath.to_owned())
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(id) => write!(f, "#{id}"),
            Self::XPath(xpath) => f.write_str(xpath),
            Self::Css(css) => f.write_str(css),
        }
    }
}

/// Opaque reference to an element on the current page.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Element(pub String);

/// Browser cookie.
#[derive(Clone, PartialEq, Eq, Hash, Redact)]
pub struct Cookie {
    pub name: String,

    #[redact]
    pub value: String,
}

/// Formats cookies as a `Cookie` request header value.
#[must_use]
pub fn cookie_header(cookies: &[Cookie]) -> String {
    cookies
        .iter()
        .map(|cookie| format!("{}={}", cookie.name, cookie.value))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Something to wait for.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Condition {
    /// At least one element matches.
    Located(Selector),
    /// The element was removed from the page, typically by a navigation.
    StalenessOf(Element),
    /// The current URL starts with the given prefix.
    UrlStartsWith(String),
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Located(selector) => write!(f, "element {selector}"),
            Self::StalenessOf(element) => write!(f, "staleness of element {}", element.0),
            Self::UrlStartsWith(prefix) => write!(f, "url {prefix}"),
        }
    }
}

/// A live browser session.
///
/// Implementations report every failure as an
/// [`Automation`](crate::error::ErrorKind::Automation) error.
#[async_trait]
pub trait Browser: Send + Sync {
    async fn navigate(&self, url: &Url) -> Result<()>;

    async fn current_url(&self) -> Result<Url>;

    /// All elements matching `selector`. Empty when nothing matches.
    async fn find_elements(&self, selector: &Selector) -> Result<Vec<Element>>;

    async fn click(&self, element: &Element) -> Result<()>;

    /// Types `text` into an element.
    async fn send_keys(&self, element: &Element, text: &str) -> Result<()>;

    async fn clear(&self, element: &Element) -> Result<()>;

    /// Whether the element is no longer attached to the page.
    async fn is_stale(&self, element: &Element) -> Result<bool>;

    async fn cookies(&self) -> Result<Vec<Cookie>>;

    /// Ends the session. The session must not be used afterwards.
    async fn quit(&self) -> Result<()>;
}

/// Creates browser sessions.
#[async_trait]
pub trait Launcher: Send + Sync {
    async fn launch(&self) -> Result<Arc<dyn Browser>>;
}

/// Brings a freshly launched or recovered session into a usable,
/// authenticated state.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn initialize(&self, browser: &dyn Browser) -> Result<()>;
}

/// Poll interval of [`wait_until`].
const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// The first element matching `selector`.
///
/// # Errors
///
/// Returns an `Automation` error if nothing matches.
pub async fn find_element(browser: &dyn Browser, selector: &Selector) -> Result<Element> {
    browser
        .find_elements(selector)
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| Error::automation(format!("no element matches {selector}")))
}

/// Waits until `condition` holds.
///
/// Returns the first matching element for [`Condition::Located`], `None`
/// otherwise.
///
/// # Errors
///
/// Returns an `Automation` error when `timeout` passes first, or the first
/// error of the browser.
pub async fn wait_until(
    browser: &dyn Browser,
    condition: &Condition,
    timeout: Duration,
) -> Result<Option<Element>> {
    tokio::time::timeout(timeout, poll(browser, condition)).await.map_err(|_| {
        Error::automation(format!(
            "timed out after {}s waiting for {condition}",
            timeout.as_secs()
        ))
    })?
}

async fn poll(browser: &dyn Browser, condition: &Condition) -> Result<Option<Element>> {
    loop {
        let holds = match condition {
            Condition::Located(selector) => {
                if let Some(element) = browser.find_elements(selector).await?.into_iter().next() {
                    return Ok(Some(element));
                }
                false
            }
            Condition::StalenessOf(element) => browser.is_stale(element).await?,
            Condition::UrlStartsWith(prefix) => browser
                .current_url()
                .await?
                .as_str()
                .starts_with(prefix.as_str()),
        };

        if holds {
            return Ok(None);
        }

        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    /// Browser whose page gains an element after a number of polls.
    struct SlowPage {
        polls: Mutex<u32>,
        appears_after: u32,
    }

    #[async_trait]
    impl Browser for SlowPage {
        async fn navigate(&self, _url: &Url) -> Result<()> {
            Ok(())
        }

        async fn current_url(&self) -> Result<Url> {
            Ok(Url::parse("https://example.com/").unwrap())
        }

        async fn find_elements(&self, _selector: &Selector) -> Result<Vec<Element>> {
            let mut polls = self.polls.lock().unwrap();
            *polls += 1;
            if *polls > self.appears_after {
                Ok(vec![Element("e1".to_owned())])
            } else {
                Ok(Vec::new())
            }
        }

        async fn click(&self, _element: &Element) -> Result<()> {
            Ok(())
        }

        async fn send_keys(&self, _element: &Element, _text: &str) -> Result<()> {
            Ok(())
        }

        async fn clear(&self, _element: &Element) -> Result<()> {
            Ok(())
        }

        async fn is_stale(&self, _element: &Element) -> Result<bool> {
            Ok(false)
        }

        async fn cookies(&self) -> Result<Vec<Cookie>> {
            Ok(Vec::new())
        }

        async fn quit(&self) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn waits_for_element() {
        let page = SlowPage {
            polls: Mutex::new(0),
            appears_after: 2,
        };

        let element = wait_until(
            &page,
            &Condition::Located(Selector::id("login-button")),
            Duration::from_secs(5),
        )
        .await
        .unwrap();

        assert_eq!(element, Some(Element("e1".to_owned())));
    }

    #[tokio::test]
    async fn wait_timeout_is_an_automation_failure() {
        let page = SlowPage {
            polls: Mutex::new(0),
            appears_after: u32::MAX,
        };

        let err = wait_until(
            &page,
            &Condition::UrlStartsWith("https://example.com/spotify".to_owned()),
            Duration::from_millis(300),
        )
        .await
        .unwrap_err();

        assert_eq!(err.kind, crate::error::ErrorKind::Automation);
    }

    #[test]
    fn formats_cookie_header() {
        let cookies = [
            Cookie {
                name: "sp_dc".to_owned(),
                value: "abc".to_owned(),
            },
            Cookie {
                name: "sp_key".to_owned(),
                value: "def".to_owned(),
            },
        ];

        assert_eq!(cookie_header(&cookies), "sp_dc=abc; sp_key=def");
        assert!(!format!("{:?}", cookies[0]).contains("abc"));
    }
}
