//! Login and authorization flows on the web player.
//!
//! Two flows are driven on the browser:
//! * [`Flow::verify_logged_in`] makes sure the web player session is logged
//!   in, so that its cookies can be exchanged for web tokens
//! * [`Flow::authorization_code`] runs the OAuth authorization-code flow and
//!   returns the code from the redirect
//!
//! Logging in uses the configured username and password. Without those,
//! the flow continues through Facebook, whose credentials may already be
//! cached by the browser profile.

use std::time::Duration;

use url::Url;
use uuid::Uuid;

use super::{find_element, wait_until, Browser, Condition, Selector};
use crate::{
    config::{self, Config},
    error::{Error, Result},
};

/// Scopes requested from the account owner.
const SCOPES: &str =
    "user-modify-playback-state user-read-currently-playing user-read-playback-state streaming";

const LOGIN_BUTTON: &str = "//button[normalize-space()='Log in']";
const USER_WIDGET: &str = "//span[@data-testid='user-widget-name']";
const FACEBOOK_LINK: &str = "//a[normalize-space()='Log in with Facebook']";

/// Poll interval while waiting for the authorization redirect.
const REDIRECT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Login and authorization flows.
#[derive(Clone, Debug)]
pub struct Flow {
    web_player: Url,
    authorize: Url,
    redirect_uri: Url,
    account: config::Login,
    timeout: Duration,
}

impl Flow {
    /// Creates the flows for the configured application and account.
    ///
    /// # Errors
    ///
    /// Returns an error if the authorize URL cannot be built.
    pub fn new(config: &Config) -> Result<Self> {
        let authorize = config.endpoints.accounts.join("authorize")?;
        Ok(Self {
            web_player: config.endpoints.web_player.clone(),
            authorize,
            redirect_uri: config.redirect_uri.clone(),
            account: config.login.clone(),
            timeout: config.webdriver.step_timeout,
        })
    }

    /// Builds the authorize URL with a fresh `state`.
    fn authorize_url(&self, client_id: &str, state: &str) -> Url {
        let mut url = self.authorize.clone();
        url.query_pairs_mut()
            .append_pair("client_id", client_id)
            .append_pair("response_type", "code")
            .append_pair("redirect_uri", self.redirect_uri.as_str())
            .append_pair("scope", SCOPES)
            .append_pair("state", state);
        url
    }

    /// Opens the web player and logs in unless a user is already shown.
    ///
    /// # Errors
    ///
    /// Returns an `Automation` error if a step fails or times out.
    pub async fn verify_logged_in(&self, browser: &dyn Browser) -> Result<()> {
        browser.navigate(&self.web_player).await?;

        // Whichever shows up first tells the state of the session.
        let either = Selector::xpath(&format!("{LOGIN_BUTTON} | {USER_WIDGET}"));
        wait_until(browser, &Condition::Located(either), self.timeout).await?;

        let login_buttons = browser.find_elements(&Selector::xpath(LOGIN_BUTTON)).await?;
        let Some(login_button) = login_buttons.into_iter().next() else {
            debug!("web player already logged in");
            return Ok(());
        };

        info!("logging in to the web player");
        browser.click(&login_button).await?;
        wait_until(
            browser,
            &Condition::StalenessOf(login_button),
            self.timeout,
        )
        .await?;
        self.do_login(browser).await?;

        browser.navigate(&self.web_player).await?;
        wait_until(
            browser,
            &Condition::Located(Selector::xpath(USER_WIDGET)),
            self.timeout,
        )
        .await?;
        info!("web player logged in");

        Ok(())
    }

    /// Fills in the login form.
    async fn do_login(&self, browser: &dyn Browser) -> Result<()> {
        if let (Some(username), Some(password)) = (&self.account.username, &self.account.password)
        {
            let username_field = wait_until(
                browser,
                &Condition::Located(Selector::id("login-username")),
                self.timeout,
            )
            .await?
            .ok_or_else(|| Error::automation("username field disappeared"))?;
            browser.clear(&username_field).await?;
            browser.send_keys(&username_field, username).await?;

            let password_field = find_element(browser, &Selector::id("login-password")).await?;
            browser.send_keys(&password_field, password).await?;

            let login_button = find_element(browser, &Selector::id("login-button")).await?;
            browser.click(&login_button).await?;
            wait_until(browser, &Condition::StalenessOf(login_button), self.timeout).await?;

            return Ok(());
        }

        let facebook = wait_until(
            browser,
            &Condition::Located(Selector::xpath(FACEBOOK_LINK)),
            self.timeout,
        )
        .await?
        .ok_or_else(|| Error::automation("facebook login link disappeared"))?;
        browser.click(&facebook).await?;
        wait_until(browser, &Condition::StalenessOf(facebook), self.timeout).await?;

        // Facebook credentials may be cached by the browser profile.
        if let Some(login_button) = browser
            .find_elements(&Selector::id("loginbutton"))
            .await?
            .into_iter()
            .next()
        {
            let (Some(email), Some(password)) = (
                &self.account.facebook_email,
                &self.account.facebook_password,
            ) else {
                return Err(Error::automation(
                    "facebook asks for credentials but none are configured",
                ));
            };

            debug!("logging in through facebook");
            let email_field = find_element(browser, &Selector::id("email")).await?;
            browser.send_keys(&email_field, email).await?;
            let password_field = find_element(browser, &Selector::id("pass")).await?;
            browser.send_keys(&password_field, password).await?;
            browser.click(&login_button).await?;
            wait_until(browser, &Condition::StalenessOf(login_button), self.timeout).await?;
        }

        self.accept_consent(browser).await
    }

    /// Clicks the consent button if it is shown.
    async fn accept_consent(&self, browser: &dyn Browser) -> Result<()> {
        if let Some(accept) = browser
            .find_elements(&Selector::id("auth-accept"))
            .await?
            .into_iter()
            .next()
        {
            debug!("accepting consent");
            browser.click(&accept).await?;
            wait_until(browser, &Condition::StalenessOf(accept), self.timeout).await?;
        }
        Ok(())
    }

    /// Runs the authorization-code flow and returns the code.
    ///
    /// # Errors
    ///
    /// * `Auth` if the account owner denied access or the redirect does not
    ///   carry the expected state
    /// * `Automation` if a step fails or times out
    pub async fn authorization_code(&self, browser: &dyn Browser, client_id: &str) -> Result<String> {
        let state = Uuid::new_v4().simple().to_string();
        let url = self.authorize_url(client_id, &state);
        info!("authorization required, opening {}", self.authorize.as_str());
        browser.navigate(&url).await?;

        // Connections to the accounts service are intermittently closed
        // before the page loads.
        if let Some(reload) = browser
            .find_elements(&Selector::id("reload-button"))
            .await?
            .into_iter()
            .next()
        {
            debug!("page did not load, reloading");
            browser.click(&reload).await?;
            browser.navigate(&url).await?;
        }

        if !browser
            .find_elements(&Selector::id("login-button"))
            .await?
            .is_empty()
        {
            self.do_login(browser).await?;
        }

        let redirected = tokio::time::timeout(self.timeout, self.await_redirect(browser))
            .await
            .map_err(|_| {
                Error::automation(format!(
                    "timed out after {}s waiting for authorization",
                    self.timeout.as_secs()
                ))
            })??;

        Self::code_from(&redirected, &state)
    }

    /// Accepts consent as it shows up until the browser lands on the
    /// redirect URI.
    async fn await_redirect(&self, browser: &dyn Browser) -> Result<Url> {
        loop {
            let url = browser.current_url().await?;
            if url.as_str().starts_with(self.redirect_uri.as_str()) {
                return Ok(url);
            }

            self.accept_consent(browser).await?;
            tokio::time::sleep(REDIRECT_POLL_INTERVAL).await;
        }
    }

    fn code_from(redirected: &Url, state: &str) -> Result<String> {
        let mut code = None;
        let mut returned_state = None;
        for (key, value) in redirected.query_pairs() {
            match key.as_ref() {
                "code" => code = Some(value.into_owned()),
                "state" => returned_state = Some(value.into_owned()),
                "error" => return Err(Error::auth(format!("authorization denied: {value}"))),
                _ => {}
            }
        }

        if returned_state.as_deref() != Some(state) {
            return Err(Error::auth("authorization state mismatch"));
        }

        code.ok_or_else(|| Error::auth("authorization redirect without code"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn flow() -> Flow {
        let config: Config = r#"
            client_id = "id"
            client_secret = "secret"
            redirect_uri = "https://example.com/spotify"
            preferred_device_id = "kitchen"
        "#
        .parse()
        .unwrap();
        Flow::new(&config).unwrap()
    }

    #[test]
    fn authorize_url_carries_scopes_and_redirect() {
        let url = flow().authorize_url("id", "s1");
        assert!(url.as_str().starts_with("https://accounts.spotify.com/authorize?"));

        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert!(pairs.contains(&("response_type".to_owned(), "code".to_owned())));
        assert!(pairs.contains(&(
            "redirect_uri".to_owned(),
            "https://example.com/spotify".to_owned()
        )));
        assert!(pairs.contains(&("scope".to_owned(), SCOPES.to_owned())));
    }

    #[test]
    fn reads_code_from_redirect() {
        let url = Url::parse("https://example.com/spotify?code=abc&state=s1").unwrap();
        assert_eq!(Flow::code_from(&url, "s1").unwrap(), "abc");

        let err = Flow::code_from(&url, "other").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Auth);

        let url = Url::parse("https://example.com/spotify?error=access_denied&state=s1").unwrap();
        assert_eq!(Flow::code_from(&url, "s1").unwrap_err().kind, ErrorKind::Auth);
    }
}
