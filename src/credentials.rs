//! Bearer token lifecycle.
//!
//! Two independent tokens are tracked:
//! * [`TokenKind::Official`] - OAuth token for the published Web API,
//!   refreshed with a refresh token at the accounts service
//! * [`TokenKind::Web`] - token of the web player for unpublished
//!   endpoints, derived from the logged-in browser session's cookies
//!
//! Both are acquired by [`Credentials::initialize`] on a browser session and
//! refreshed on demand afterwards. Callers only ever receive owned copies of
//! the token values through [`Credentials::token`].
//!
//! # Expiry
//!
//! Tokens are treated as expired a minute before their reported expiry, so
//! that requests in flight do not race the deadline.

use std::{
    fmt,
    sync::Arc,
    time::{Duration, SystemTime},
};

use async_trait::async_trait;
use tokio::sync::Mutex;
use veil::Redact;

use crate::{
    automation::{self, login::Flow, Authenticator, Browser},
    config::Config,
    error::{Error, ErrorKind, Result},
    protocol::auth::{OAuthToken, WebToken},
};

/// Kind of bearer token.
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq)]
pub enum TokenKind {
    Official,
    Web,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Official => f.write_str("official"),
            Self::Web => f.write_str("web"),
        }
    }
}

/// Exchanges grants for tokens.
#[async_trait]
pub trait Authorizer: Send + Sync {
    /// Exchanges an authorization code.
    async fn exchange_code(&self, code: &str) -> Result<OAuthToken>;

    /// Exchanges a refresh token.
    async fn refresh(&self, refresh_token: &str) -> Result<OAuthToken>;

    /// Derives a web token from the cookies of a web player session.
    async fn web_token(&self, cookies: &str) -> Result<WebToken>;
}

#[derive(Clone, Redact)]
struct Credential {
    #[redact]
    token: String,
    expires_at: SystemTime,
}

impl Credential {
    fn is_valid(&self) -> bool {
        self.expires_at > SystemTime::now()
    }
}

#[derive(Default)]
struct State {
    official: Option<Credential>,
    refresh_token: Option<String>,
    web: Option<Credential>,
    cookies: Option<String>,
}

impl State {
    fn slot(&mut self, kind: TokenKind) -> &mut Option<Credential> {
        match kind {
            TokenKind::Official => &mut self.official,
            TokenKind::Web => &mut self.web,
        }
    }
}

/// Token store and refresher.
pub struct Credentials {
    authorizer: Arc<dyn Authorizer>,
    flow: Flow,
    client_id: String,
    state: Mutex<State>,
}

impl Credentials {
    /// Margin before the reported expiry at which tokens are refreshed.
    const EXPIRY_SKEW: Duration = Duration::from_secs(60);

    /// Creates the store, seeded with the configured refresh token if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the login flow cannot be set up.
    pub fn new(config: &Config, authorizer: Arc<dyn Authorizer>) -> Result<Self> {
        let state = State {
            refresh_token: config.refresh_token.clone(),
            ..State::default()
        };

        Ok(Self {
            authorizer,
            flow: Flow::new(config)?,
            client_id: config.client_id.clone(),
            state: Mutex::new(state),
        })
    }

    /// Whether a token of `kind` exists and has not expired.
    pub async fn is_valid(&self, kind: TokenKind) -> bool {
        self.state
            .lock()
            .await
            .slot(kind)
            .as_ref()
            .is_some_and(Credential::is_valid)
    }

    /// Replaces the token of `kind` with a fresh one.
    ///
    /// # Errors
    ///
    /// Returns an `Auth` error if there is nothing to refresh from or the
    /// exchange fails.
    pub async fn refresh(&self, kind: TokenKind) -> Result<()> {
        let mut state = self.state.lock().await;
        self.refresh_locked(&mut state, kind).await
    }

    /// Returns a valid token of `kind`, refreshing it first if needed.
    ///
    /// # Errors
    ///
    /// Returns an `Auth` error if a refresh was needed and failed.
    pub async fn token(&self, kind: TokenKind) -> Result<String> {
        let mut state = self.state.lock().await;
        if let Some(credential) = state.slot(kind).as_ref().filter(|c| c.is_valid()) {
            return Ok(credential.token.clone());
        }

        self.refresh_locked(&mut state, kind).await?;
        state
            .slot(kind)
            .as_ref()
            .map(|credential| credential.token.clone())
            .ok_or_else(|| Error::internal(format!("{kind} token missing after refresh")))
    }

    async fn refresh_locked(&self, state: &mut State, kind: TokenKind) -> Result<()> {
        debug!("refreshing {kind} token");

        let credential = match kind {
            TokenKind::Official => {
                let refresh_token = state.refresh_token.as_deref().ok_or_else(|| {
                    Error::auth("no refresh token, authorization required")
                })?;
                let token = self
                    .authorizer
                    .refresh(refresh_token)
                    .await
                    .map_err(|e| Self::exchange_failed(kind, e))?;
                Self::official(state, token)
            }
            TokenKind::Web => {
                let cookies = state
                    .cookies
                    .as_deref()
                    .ok_or_else(|| Error::auth("no web session, login required"))?;
                let token = self
                    .authorizer
                    .web_token(cookies)
                    .await
                    .map_err(|e| Self::exchange_failed(kind, e))?;
                Self::web(token)?
            }
        };

        *state.slot(kind) = Some(credential);
        Ok(())
    }

    /// Reports exchange failures as `Auth` errors, keeping the cause.
    fn exchange_failed(kind: TokenKind, e: Error) -> Error {
        error!("{kind} token exchange failed: {e}");
        if e.kind == ErrorKind::Auth {
            e
        } else {
            Error::auth(e)
        }
    }

    /// Stores a rotated refresh token and converts the access token.
    fn official(state: &mut State, token: OAuthToken) -> Credential {
        if let Some(refresh_token) = token.refresh_token {
            state.refresh_token = Some(refresh_token);
        }

        let expires_at = SystemTime::now() + token.expires_in.saturating_sub(Self::EXPIRY_SKEW);
        Credential {
            token: token.access_token,
            expires_at,
        }
    }

    fn web(token: WebToken) -> Result<Credential> {
        if token.is_anonymous {
            return Err(Error::auth("web session is not logged in"));
        }

        let expires_at = token
            .expires_at
            .checked_sub(Self::EXPIRY_SKEW)
            .unwrap_or(token.expires_at);
        Ok(Credential {
            token: token.access_token,
            expires_at,
        })
    }
}

#[async_trait]
impl Authenticator for Credentials {
    /// Logs the browser in and acquires both tokens.
    ///
    /// Skips every step that is already satisfied: a logged-in web player is
    /// not logged in again, and a valid official token or a usable refresh
    /// token avoids the interactive consent.
    async fn initialize(&self, browser: &dyn Browser) -> Result<()> {
        self.flow.verify_logged_in(browser).await?;

        let cookies = automation::cookie_header(&browser.cookies().await?);
        let mut state = self.state.lock().await;
        state.cookies = Some(cookies);
        self.refresh_locked(&mut state, TokenKind::Web).await?;

        if state.official.as_ref().is_some_and(Credential::is_valid) {
            return Ok(());
        }

        if state.refresh_token.is_some() {
            match self.refresh_locked(&mut state, TokenKind::Official).await {
                Ok(()) => return Ok(()),
                Err(e) => warn!("refresh token rejected, authorizing again: {e}"),
            }
        }

        let code = self.flow.authorization_code(browser, &self.client_id).await?;
        let token = self
            .authorizer
            .exchange_code(&code)
            .await
            .map_err(|e| Self::exchange_failed(TokenKind::Official, e))?;
        let credential = Self::official(&mut state, token);
        state.official = Some(credential);
        info!("authorized");

        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    /// Hands out numbered tokens: `official-1`, `official-2`, ...
    #[derive(Default)]
    pub(crate) struct CountingAuthorizer {
        pub refreshes: AtomicU32,
        pub web_tokens: AtomicU32,
        pub fail: std::sync::atomic::AtomicBool,
        pub anonymous: std::sync::atomic::AtomicBool,
    }

    #[async_trait]
    impl Authorizer for CountingAuthorizer {
        async fn exchange_code(&self, _code: &str) -> Result<OAuthToken> {
            self.refresh("code").await
        }

        async fn refresh(&self, _refresh_token: &str) -> Result<OAuthToken> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(Error::from_status(
                    http::StatusCode::BAD_REQUEST,
                    "invalid_grant",
                ));
            }
            let n = self.refreshes.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(OAuthToken {
                access_token: format!("official-{n}"),
                refresh_token: None,
                expires_in: Duration::from_secs(3600),
                scope: String::new(),
                token_type: "Bearer".to_owned(),
            })
        }

        async fn web_token(&self, _cookies: &str) -> Result<WebToken> {
            let n = self.web_tokens.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(WebToken {
                access_token: format!("web-{n}"),
                expires_at: SystemTime::now() + Duration::from_secs(3600),
                is_anonymous: self.anonymous.load(Ordering::SeqCst),
                client_id: String::new(),
            })
        }
    }

    pub(crate) fn config(refresh_token: Option<&str>) -> Config {
        let mut toml = r#"
            client_id = "id"
            client_secret = "secret"
            redirect_uri = "https://example.com/spotify"
            preferred_device_id = "kitchen"
            fallback_context_uri = "spotify:playlist:fallback"
        "#
        .to_owned();
        if let Some(token) = refresh_token {
            toml.push_str(&format!("refresh_token = \"{token}\"\n"));
        }
        toml.parse().unwrap()
    }

    pub(crate) fn credentials(authorizer: Arc<CountingAuthorizer>) -> Credentials {
        Credentials::new(&config(Some("seed")), authorizer).unwrap()
    }

    /// Gives `credentials` a web session as if a browser had logged in.
    pub(crate) async fn logged_in(credentials: &Credentials) {
        credentials.state.lock().await.cookies = Some("sp_dc=test".to_owned());
    }

    #[tokio::test]
    async fn token_refreshes_lazily_and_is_then_cached() {
        let authorizer = Arc::new(CountingAuthorizer::default());
        let credentials = credentials(authorizer.clone());

        assert!(!credentials.is_valid(TokenKind::Official).await);
        assert_eq!(credentials.token(TokenKind::Official).await.unwrap(), "official-1");
        assert!(credentials.is_valid(TokenKind::Official).await);
        assert_eq!(credentials.token(TokenKind::Official).await.unwrap(), "official-1");
        assert_eq!(authorizer.refreshes.load(Ordering::SeqCst), 1);

        credentials.refresh(TokenKind::Official).await.unwrap();
        assert_eq!(credentials.token(TokenKind::Official).await.unwrap(), "official-2");
    }

    #[tokio::test]
    async fn failed_exchange_is_an_auth_error() {
        let authorizer = Arc::new(CountingAuthorizer::default());
        authorizer.fail.store(true, Ordering::SeqCst);
        let credentials = credentials(authorizer);

        let err = credentials.refresh(TokenKind::Official).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Auth);
        assert!(!credentials.is_valid(TokenKind::Official).await);
    }

    #[tokio::test]
    async fn web_token_requires_a_session() {
        let credentials = credentials(Arc::new(CountingAuthorizer::default()));

        let err = credentials.token(TokenKind::Web).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Auth);
    }

    #[tokio::test]
    async fn anonymous_web_token_is_rejected() {
        let authorizer = Arc::new(CountingAuthorizer::default());
        authorizer.anonymous.store(true, Ordering::SeqCst);
        let credentials = credentials(authorizer);
        credentials.state.lock().await.cookies = Some("sp_t=1".to_owned());

        let err = credentials.refresh(TokenKind::Web).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Auth);
        assert!(!credentials.is_valid(TokenKind::Web).await);
    }

    #[test]
    fn expiry_is_skewed() {
        let expires_at = SystemTime::now() + Duration::from_secs(30);
        let credential = Credentials::web(WebToken {
            access_token: "web".to_owned(),
            expires_at,
            is_anonymous: false,
            client_id: String::new(),
        })
        .unwrap();

        assert!(!credential.is_valid());
    }
}
