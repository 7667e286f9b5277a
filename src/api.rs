//! Client of the official Spotify Web API.
//!
//! Calls are authenticated with the [`Official`](TokenKind::Official) token
//! and classified by status: a rejected token surfaces as
//! [`Unauthorized`](crate::error::ErrorKind::Unauthorized), so that a
//! [`Retry`](crate::retry::Retry) wrapper can refresh it and try again.

use std::{fmt::Debug, sync::Arc};

use async_trait::async_trait;
use reqwest::Method;
use serde::de::DeserializeOwned;
use url::Url;

use crate::{
    config::Config,
    credentials::{Credentials, TokenKind},
    error::{Error, Result},
    http::Client as HttpClient,
    protocol::{
        self,
        uri::ContextKind,
        web_api::{
            Album, ApiError, Artist, Device, Devices, Paging, Playback, Playlist, PlaylistItem,
            RepeatState, SearchResults, Track, Tracks,
        },
    },
};

/// Largest number of ids per batched track lookup.
pub const MAX_TRACK_IDS: usize = 50;

/// Operations of the official Web API.
#[async_trait]
pub trait WebApi: Send + Sync {
    async fn devices(&self) -> Result<Vec<Device>>;

    /// Current playback, or `None` when nothing is loaded.
    async fn playback(&self) -> Result<Option<Playback>>;

    /// Starts `context_uri` on the device, or resumes when `None`.
    async fn play(&self, device_id: &str, context_uri: Option<&str>) -> Result<()>;

    async fn pause(&self) -> Result<()>;

    async fn next(&self) -> Result<()>;

    async fn set_volume(&self, percent: u8) -> Result<()>;

    async fn set_shuffle(&self, state: bool) -> Result<()>;

    async fn set_repeat(&self, state: RepeatState) -> Result<()>;

    async fn queue(&self, device_id: &str, uri: &str) -> Result<()>;

    async fn transfer(&self, device_id: &str, play: bool) -> Result<()>;

    /// Looks up to [`MAX_TRACK_IDS`] tracks. Unknown ids yield `None` at
    /// their position.
    async fn tracks(&self, ids: &[String]) -> Result<Vec<Option<Track>>>;

    async fn track(&self, id: &str) -> Result<Track>;

    async fn album(&self, id: &str) -> Result<Album>;

    async fn album_tracks(&self, id: &str, offset: u32, limit: u32) -> Result<Paging<Track>>;

    async fn artist(&self, id: &str) -> Result<Artist>;

    async fn artist_albums(&self, id: &str, offset: u32, limit: u32) -> Result<Paging<Album>>;

    async fn playlist(&self, id: &str) -> Result<Playlist>;

    async fn playlist_tracks(
        &self,
        id: &str,
        offset: u32,
        limit: u32,
    ) -> Result<Paging<PlaylistItem>>;

    async fn search(
        &self,
        terms: &str,
        kinds: &[ContextKind],
        offset: u32,
        limit: u32,
    ) -> Result<SearchResults>;
}

/// [`WebApi`] over HTTP.
pub struct Client {
    http: Arc<HttpClient>,
    credentials: Arc<Credentials>,
    base: Url,
}

impl Client {
    #[must_use]
    pub fn new(config: &Config, http: Arc<HttpClient>, credentials: Arc<Credentials>) -> Self {
        Self {
            http,
            credentials,
            base: config.endpoints.api.clone(),
        }
    }

    /// Builds an endpoint URL from path segments and query parameters.
    /// Segments are percent-encoded.
    fn endpoint(&self, segments: &[&str], query: &[(&str, &str)]) -> Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|()| Error::invalid_argument(format!("{} cannot be a base", self.base)))?
            .pop_if_empty()
            .extend(segments);
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }
        Ok(url)
    }

    async fn send(&self, method: Method, url: Url, body: Option<String>) -> Result<String> {
        let origin = url.path().to_owned();
        let token = self.credentials.token(TokenKind::Official).await?;

        let has_body = body.is_some();
        let mut request = self.http.request(method, url, body.unwrap_or_default());
        HttpClient::bearer(&mut request, &token)?;
        if has_body {
            HttpClient::content_type(&mut request, HttpClient::JSON_CONTENT)?;
        }

        self.http
            .text(request, &origin)
            .await
            .map_err(Self::describe)
    }

    async fn get<T>(&self, segments: &[&str], query: &[(&str, &str)]) -> Result<T>
    where
        T: DeserializeOwned + Debug,
    {
        let url = self.endpoint(segments, query)?;
        let origin = url.path().to_owned();
        let body = self.send(Method::GET, url, None).await?;
        protocol::json(&body, &origin)
    }

    async fn command(
        &self,
        method: Method,
        segments: &[&str],
        query: &[(&str, &str)],
        body: Option<serde_json::Value>,
    ) -> Result<()> {
        let url = self.endpoint(segments, query)?;
        self.send(method, url, body.map(|body| body.to_string()))
            .await
            .map(drop)
    }

    /// Uses the message of a Web API error body as details.
    fn describe(e: Error) -> Error {
        let message = e.error.to_string().split_once(": ").and_then(|(_, body)| {
            serde_json::from_str::<ApiError>(body)
                .ok()
                .map(|api_error| api_error.error.message)
        });

        match message {
            Some(message) if !message.is_empty() => Error::new(e.kind, message),
            _ => e,
        }
    }

    fn parse_playback(body: &str) -> Result<Option<Playback>> {
        if body.trim().is_empty() {
            return Ok(None);
        }
        protocol::json(body, "playback").map(Some)
    }
}

#[async_trait]
impl WebApi for Client {
    async fn devices(&self) -> Result<Vec<Device>> {
        let devices: Devices = self.get(&["me", "player", "devices"], &[]).await?;
        Ok(devices.devices)
    }

    async fn playback(&self) -> Result<Option<Playback>> {
        let url = self.endpoint(&["me", "player"], &[])?;
        let body = self.send(Method::GET, url, None).await?;
        Self::parse_playback(&body)
    }

    async fn play(&self, device_id: &str, context_uri: Option<&str>) -> Result<()> {
        let body = context_uri.map(|uri| serde_json::json!({ "context_uri": uri }));
        self.command(
            Method::PUT,
            &["me", "player", "play"],
            &[("device_id", device_id)],
            body,
        )
        .await
    }

    async fn pause(&self) -> Result<()> {
        self.command(Method::PUT, &["me", "player", "pause"], &[], None)
            .await
    }

    async fn next(&self) -> Result<()> {
        self.command(Method::POST, &["me", "player", "next"], &[], None)
            .await
    }

    async fn set_volume(&self, percent: u8) -> Result<()> {
        let percent = percent.to_string();
        self.command(
            Method::PUT,
            &["me", "player", "volume"],
            &[("volume_percent", &percent)],
            None,
        )
        .await
    }

    async fn set_shuffle(&self, state: bool) -> Result<()> {
        let state = state.to_string();
        self.command(
            Method::PUT,
            &["me", "player", "shuffle"],
            &[("state", &state)],
            None,
        )
        .await
    }

    async fn set_repeat(&self, state: RepeatState) -> Result<()> {
        let state = state.to_string();
        self.command(
            Method::PUT,
            &["me", "player", "repeat"],
            &[("state", &state)],
            None,
        )
        .await
    }

    async fn queue(&self, device_id: &str, uri: &str) -> Result<()> {
        self.command(
            Method::POST,
            &["me", "player", "queue"],
            &[("uri", uri), ("device_id", device_id)],
            None,
        )
        .await
    }

    async fn transfer(&self, device_id: &str, play: bool) -> Result<()> {
        let body = serde_json::json!({ "device_ids": [device_id], "play": play });
        self.command(Method::PUT, &["me", "player"], &[], Some(body))
            .await
    }

    async fn tracks(&self, ids: &[String]) -> Result<Vec<Option<Track>>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        if ids.len() > MAX_TRACK_IDS {
            return Err(Error::invalid_argument(format!(
                "at most {MAX_TRACK_IDS} tracks per lookup, got {}",
                ids.len()
            )));
        }

        let ids = ids.join(",");
        let tracks: Tracks = self.get(&["tracks"], &[("ids", &ids)]).await?;
        Ok(tracks.tracks)
    }

    async fn track(&self, id: &str) -> Result<Track> {
        self.get(&["tracks", id], &[]).await
    }

    async fn album(&self, id: &str) -> Result<Album> {
        self.get(&["albums", id], &[]).await
    }

    async fn album_tracks(&self, id: &str, offset: u32, limit: u32) -> Result<Paging<Track>> {
        let (offset, limit) = (offset.to_string(), limit.to_string());
        self.get(
            &["albums", id, "tracks"],
            &[("offset", &offset), ("limit", &limit)],
        )
        .await
    }

    async fn artist(&self, id: &str) -> Result<Artist> {
        self.get(&["artists", id], &[]).await
    }

    async fn artist_albums(&self, id: &str, offset: u32, limit: u32) -> Result<Paging<Album>> {
        let (offset, limit) = (offset.to_string(), limit.to_string());
        self.get(
            &["artists", id, "albums"],
            &[("offset", &offset), ("limit", &limit)],
        )
        .await
    }

    async fn playlist(&self, id: &str) -> Result<Playlist> {
        self.get(
            &["playlists", id],
            &[("fields", "id,name,description,uri")],
        )
        .await
    }

    async fn playlist_tracks(
        &self,
        id: &str,
        offset: u32,
        limit: u32,
    ) -> Result<Paging<PlaylistItem>> {
        let (offset, limit) = (offset.to_string(), limit.to_string());
        self.get(
            &["playlists", id, "tracks"],
            &[("offset", &offset), ("limit", &limit)],
        )
        .await
    }

    async fn search(
        &self,
        terms: &str,
        kinds: &[ContextKind],
        offset: u32,
        limit: u32,
    ) -> Result<SearchResults> {
        if kinds.is_empty() {
            return Err(Error::invalid_argument("search needs at least one kind"));
        }

        let kinds = kinds
            .iter()
            .map(|kind| kind.as_str())
            .collect::<Vec<_>>()
            .join(",");
        let (offset, limit) = (offset.to_string(), limit.to_string());
        self.get(
            &["search"],
            &[
                ("q", terms),
                ("type", &kinds),
                ("offset", &offset),
                ("limit", &limit),
            ],
        )
        .await
    }
}
