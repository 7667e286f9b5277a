//! Unpublished endpoints of the web player.
//!
//! These endpoints take the [`Web`](TokenKind::Web) token and are what the
//! realtime connection and radio playback rest on:
//! * subscribing a dealer connection to the account's notifications
//! * joining the connect-state cluster as a hidden observer, which returns
//!   the current cluster and makes the service push cluster updates
//! * sending player commands from one device to another

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::{HeaderName, HeaderValue};
use url::Url;

use crate::{
    config::Config,
    credentials::{Credentials, TokenKind},
    error::{Error, Result},
    http::Client as HttpClient,
    protocol::{
        self,
        connect_state::{Cluster, PlayCommand, PutStateRequest},
    },
};

/// Connection id header on connect-state requests.
const CONNECTION_ID: HeaderName = HeaderName::from_static("x-spotify-connection-id");

/// Operations on the web player's connect-state service.
#[async_trait]
pub trait ConnectApi: Send + Sync {
    /// Subscribes a dealer connection to the account's notifications.
    async fn register_notifications(&self, connection_id: &str) -> Result<()>;

    /// Joins the cluster as a hidden observer on `connection_id` and returns
    /// its current state.
    async fn connect_state(&self, connection_id: &str) -> Result<Cluster>;

    /// Plays `uri` on device `to`, sent on behalf of device `from`.
    async fn play_command(&self, from: &str, to: &str, uri: &str) -> Result<()>;
}

/// [`ConnectApi`] over HTTP.
pub struct Client {
    http: Arc<HttpClient>,
    credentials: Arc<Credentials>,
    api: Url,
    spclient: Url,
    observer_id: String,
}

impl Client {
    /// Longest device id the connect-state service accepts.
    const MAX_DEVICE_ID_LEN: usize = 40;

    #[must_use]
    pub fn new(config: &Config, http: Arc<HttpClient>, credentials: Arc<Credentials>) -> Self {
        Self {
            http,
            credentials,
            api: config.endpoints.api.clone(),
            spclient: config.endpoints.spclient.clone(),
            observer_id: Self::observer_id(&config.device_id.simple().to_string()),
        }
    }

    /// Id under which this process joins the cluster: the observer prefix
    /// and at most 35 characters of the device id.
    fn observer_id(device_id: &str) -> String {
        let prefix = "hobs_";
        let keep = Self::MAX_DEVICE_ID_LEN - prefix.len();
        let device_id: String = device_id.chars().take(keep).collect();
        format!("{prefix}{device_id}")
    }

    fn endpoint(base: &Url, segments: &[&str]) -> Result<Url> {
        let mut url = base.clone();
        url.path_segments_mut()
            .map_err(|()| Error::invalid_argument(format!("{base} cannot be a base")))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn send(&self, mut request: reqwest::Request, origin: &str) -> Result<String> {
        let token = self.credentials.token(TokenKind::Web).await?;
        HttpClient::bearer(&mut request, &token)?;
        self.http.text(request, origin).await
    }
}

#[async_trait]
impl ConnectApi for Client {
    async fn register_notifications(&self, connection_id: &str) -> Result<()> {
        let mut url = Self::endpoint(&self.api, &["me", "notifications", "user"])?;
        url.query_pairs_mut()
            .append_pair("connection_id", connection_id);

        let request = self.http.put(url, "");
        self.send(request, "notifications").await.map(drop)
    }

    async fn connect_state(&self, connection_id: &str) -> Result<Cluster> {
        let url = Self::endpoint(
            &self.spclient,
            &["connect-state", "v1", "devices", &self.observer_id],
        )?;
        let body = serde_json::to_string(&PutStateRequest::observer())?;

        let mut request = self.http.put(url, body);
        HttpClient::content_type(&mut request, HttpClient::JSON_CONTENT)?;
        request
            .headers_mut()
            .try_insert(CONNECTION_ID, HeaderValue::from_str(connection_id)?)?;

        let body = self.send(request, "connect state").await?;
        protocol::json(&body, "connect state")
    }

    async fn play_command(&self, from: &str, to: &str, uri: &str) -> Result<()> {
        let url = Self::endpoint(
            &self.spclient,
            &[
                "connect-state",
                "v1",
                "player",
                "command",
                "from",
                from,
                "to",
                to,
            ],
        )?;
        let body = serde_json::to_string(&PlayCommand::play(uri))?;

        let mut request = self.http.post(url, body);
        HttpClient::content_type(&mut request, HttpClient::JSON_CONTENT)?;

        self.send(request, "player command").await.map(drop)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn observer_id_is_bounded() {
        let id = Client::observer_id("0123456789abcdef0123456789abcdef01234567");
        assert_eq!(id.len(), Client::MAX_DEVICE_ID_LEN);
        assert_eq!(id, "hobs_0123456789abcdef0123456789abcdef012");

        let id = Client::observer_id("0123456789abcdef0123456789abcdef");
        assert_eq!(id, "hobs_0123456789abcdef0123456789abcdef");

        assert_eq!(Client::observer_id("short"), "hobs_short");
    }

    #[test]
    fn command_endpoint_escapes_device_ids() {
        let base = Url::parse("https://gew-spclient.spotify.com/").unwrap();
        let url = Client::endpoint(&base, &["connect-state", "v1", "from", "a b"]).unwrap();
        assert_eq!(
            url.as_str(),
            "https://gew-spclient.spotify.com/connect-state/v1/from/a%20b"
        );
    }
}
