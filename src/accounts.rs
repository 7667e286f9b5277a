//! Token exchanges with the accounts service and the web player.
//!
//! * `POST /api/token` on the accounts service for the authorization-code
//!   and refresh-token grants, authenticated with the application's client
//!   credentials
//! * `GET /get_access_token` on the web player, authenticated with the
//!   session cookies of a logged-in browser

use std::sync::Arc;

use async_trait::async_trait;
use url::{form_urlencoded, Url};

use crate::{
    config::Config,
    credentials::Authorizer,
    error::{Error, Result},
    http::Client as HttpClient,
    protocol::{
        self,
        auth::{AccountsError, OAuthToken, WebToken},
    },
};

/// [`Authorizer`] backed by the Spotify services.
pub struct Accounts {
    http: Arc<HttpClient>,
    client_id: String,
    client_secret: String,
    redirect_uri: Url,
    token_url: Url,
    web_token_url: Url,
}

impl Accounts {
    /// # Errors
    ///
    /// Returns an error if the endpoint URLs cannot be built.
    pub fn new(config: &Config, http: Arc<HttpClient>) -> Result<Self> {
        let mut web_token_url = config.endpoints.web_token.clone();
        web_token_url
            .query_pairs_mut()
            .append_pair("reason", "transport")
            .append_pair("productType", "web_player");

        Ok(Self {
            http,
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            redirect_uri: config.redirect_uri.clone(),
            token_url: config.endpoints.accounts.join("api/token")?,
            web_token_url,
        })
    }

    async fn grant(&self, params: &[(&str, &str)]) -> Result<OAuthToken> {
        let body = form_urlencoded::Serializer::new(String::new())
            .extend_pairs(params)
            .finish();

        let mut request = self.http.post(self.token_url.clone(), body);
        HttpClient::basic(&mut request, &self.client_id, &self.client_secret)?;
        HttpClient::content_type(&mut request, HttpClient::FORM_CONTENT)?;

        match self.http.text(request, "token").await {
            Ok(body) => protocol::json(&body, "token"),
            Err(e) => Err(Self::describe(e)),
        }
    }

    /// Replaces raw error bodies of the accounts service by their
    /// description.
    fn describe(e: Error) -> Error {
        let described = e.error.to_string().split_once(": ").and_then(|(_, body)| {
            serde_json::from_str::<AccountsError>(body).ok()
        });

        match described {
            Some(AccountsError {
                error,
                error_description,
            }) => Error::auth(format!("{error}: {error_description}")),
            None => e,
        }
    }
}

#[async_trait]
impl Authorizer for Accounts {
    async fn exchange_code(&self, code: &str) -> Result<OAuthToken> {
        self.grant(&[
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.redirect_uri.as_str()),
        ])
        .await
    }

    async fn refresh(&self, refresh_token: &str) -> Result<OAuthToken> {
        self.grant(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ])
        .await
    }

    async fn web_token(&self, cookies: &str) -> Result<WebToken> {
        let mut request = self.http.get(self.web_token_url.clone(), "");
        HttpClient::cookies(&mut request, cookies)?;

        let body = self.http.text(request, "web token").await?;
        protocol::json(&body, "web token")
    }
}

#[cfg(test)]
mod tests {
    use http::StatusCode;

    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn describes_accounts_errors() {
        let e = Error::from_status(
            StatusCode::BAD_REQUEST,
            r#"token returned 400 Bad Request: {"error":"invalid_grant","error_description":"Invalid refresh token"}"#,
        );

        let described = Accounts::describe(e);
        assert_eq!(described.kind, ErrorKind::Auth);
        assert!(described.to_string().contains("Invalid refresh token"));
    }

    #[test]
    fn keeps_other_errors() {
        let e = Error::from_status(StatusCode::BAD_GATEWAY, "token returned 502: <html>");
        assert_eq!(Accounts::describe(e).kind, ErrorKind::Unavailable);
    }
}
