//! Operations of the chat bot.
//!
//! [`Jukebox`] is what message handlers call: queue a track, start a
//! context or radio, set the volume, read what is playing. Every operation
//! retries through token refreshes, and those that change playback first
//! make sure the preferred device is playing.
//!
//! [`Engine`] builds a [`Jukebox`] on the real services and runs the
//! background tasks that keep the playback state current.

use std::{
    future::Future,
    sync::{Arc, LazyLock},
    time::Duration,
};

use regex_lite::Regex;

use tokio::{sync::watch, task::JoinHandle};
use tokio_util::sync::CancellationToken;

use crate::{
    accounts::Accounts,
    api::{self, WebApi, MAX_TRACK_IDS},
    automation::{login::Flow, webdriver, Browser, Channel},
    config::Config,
    connect::{self, ConnectApi},
    credentials::{Credentials, TokenKind},
    dealer::{ConnectionState, Supervisor},
    error::{Error, Result},
    http::Client as HttpClient,
    now_playing::{NowPlaying, PlaybackState},
    protocol::{
        uri::{ContextKind, ContextUri},
        web_api::{Album, Artist, Device, Paging, Playlist, PlaylistItem, SearchResults, Track},
    },
    retry::Retry,
    verifier::Verifier,
};

/// Message for volumes that do not parse.
const VOLUME_ERROR: &str = "Volume can only be set to a whole number between 0 and 100.";

/// One to three digits, where three digits must start with `1`.
static VOLUME_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^1?\d{0,2}$").expect("invalid volume pattern"));

/// Offset and size of a page of results.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Page {
    pub offset: u32,
    pub limit: u32,
}

impl Default for Page {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: 10,
        }
    }
}

/// Shared services a [`Jukebox`] runs on.
pub struct Services {
    pub credentials: Arc<Credentials>,
    pub channel: Arc<Channel>,
    pub api: Arc<dyn WebApi>,
    pub connect: Arc<dyn ConnectApi>,
    pub retry: Retry,
    pub model: Arc<NowPlaying>,
    pub connection: watch::Receiver<ConnectionState>,
}

pub struct Jukebox {
    device_id: String,
    web_player_name: String,
    stale_after: Duration,
    flow: Flow,
    credentials: Arc<Credentials>,
    channel: Arc<Channel>,
    api: Arc<dyn WebApi>,
    connect: Arc<dyn ConnectApi>,
    retry: Retry,
    model: Arc<NowPlaying>,
    verifier: Verifier,
    connection: watch::Receiver<ConnectionState>,
}

impl Jukebox {
    /// # Errors
    ///
    /// Returns an error if the login flow cannot be set up.
    pub fn new(config: &Config, services: Services) -> Result<Self> {
        let Services {
            credentials,
            channel,
            api,
            connect,
            retry,
            model,
            connection,
        } = services;

        let verifier = Verifier::new(config, Arc::clone(&api), retry.clone(), Arc::clone(&model));
        Ok(Self {
            device_id: config.preferred_device_id.clone(),
            web_player_name: config.web_player_name.clone(),
            stale_after: config.timings.stale_after,
            flow: Flow::new(config)?,
            credentials,
            channel,
            api,
            connect,
            retry,
            model,
            verifier,
            connection,
        })
    }

    async fn official<T, F, Fut>(&self, task: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.retry.run(TokenKind::Official, task).await
    }

    /// Makes sure both tokens are usable, logging the browser in when a
    /// token cannot be refreshed on its own.
    ///
    /// # Errors
    ///
    /// Returns an error if the browser session cannot be launched or
    /// authenticated.
    pub async fn ensure_ready(&self) -> Result<()> {
        let mut refreshed = true;
        for kind in [TokenKind::Official, TokenKind::Web] {
            if self.credentials.is_valid(kind).await {
                continue;
            }
            if let Err(e) = self.credentials.refresh(kind).await {
                debug!("{kind} token not refreshable, initializing session: {e}");
                refreshed = false;
            }
        }

        if refreshed {
            Ok(())
        } else {
            self.channel.initialize().await
        }
    }

    /// What is playing, from the playback state when it is fresh.
    ///
    /// A stale state is polled first: from a cluster snapshot while the
    /// realtime connection is live, else from the Web API, which does not
    /// report the queue.
    ///
    /// # Errors
    ///
    /// Returns an error if polling a stale state fails.
    pub async fn cached_status(&self) -> Result<Option<Arc<PlaybackState>>> {
        if !self.model.is_stale(self.stale_after) {
            return Ok(self.model.read());
        }

        let connection_id = self
            .connection
            .borrow()
            .connection_id()
            .map(ToOwned::to_owned);

        if let Some(connection_id) = connection_id {
            let connect = &*self.connect;
            let connection_id = connection_id.as_str();
            let cluster = self
                .retry
                .run(TokenKind::Web, move || connect.connect_state(connection_id))
                .await?;
            if let Some(player_state) = cluster.player_state {
                self.model.update(&player_state).await?;
            }
        } else {
            let api = &*self.api;
            if let Some(playback) = self.official(move || api.playback()).await? {
                self.model.update_from_playback(&playback).await;
            }
        }

        Ok(self.model.read())
    }

    /// Adds a track to the queue of the preferred device. Takes a track id
    /// or URI.
    ///
    /// # Errors
    ///
    /// Returns an error if the device cannot be made to play or the track
    /// cannot be queued.
    pub async fn queue_track(&self, track: &str) -> Result<()> {
        let uri = if track.starts_with("spotify:") {
            track.to_owned()
        } else {
            format!("spotify:track:{track}")
        };

        self.verifier.verify_and_recover().await?;

        let (api, device_id, uri) = (&*self.api, self.device_id.as_str(), uri.as_str());
        self.official(move || api.queue(device_id, uri)).await?;
        info!("queued {uri}");

        Ok(())
    }

    /// Plays a context URI on the preferred device. Radio URIs are started
    /// through the web player.
    ///
    /// # Errors
    ///
    /// * `InvalidArgument` if `uri` is not a context URI
    /// * errors starting playback
    pub async fn play_context(&self, uri: &str) -> Result<()> {
        let context: ContextUri = uri.parse()?;
        if context.radio {
            let context = &context;
            return self
                .channel
                .submit(move |browser| async move { self.radio_command(&*browser, context).await })
                .await;
        }

        let (api, device_id) = (&*self.api, self.device_id.as_str());
        self.official(move || api.play(device_id, Some(uri))).await?;
        info!("playing {uri}");

        self.verifier.force_repeat_shuffle(None).await
    }

    /// Starts a radio seeded by an item and returns the name of the item.
    ///
    /// # Errors
    ///
    /// * `NotFound` if the item does not exist
    /// * `DeviceNotFound` if the preferred device or the web player is not
    ///   online
    /// * errors starting playback
    pub async fn play_radio(&self, kind: ContextKind, id: &str) -> Result<String> {
        self.channel
            .submit(move |browser| async move {
                self.verifier.verify_and_recover().await?;
                let name = self.item_name(kind, id).await?;
                self.radio_command(&*browser, &ContextUri::radio(kind, id))
                    .await?;
                Ok(name)
            })
            .await
    }

    async fn item_name(&self, kind: ContextKind, id: &str) -> Result<String> {
        let api = &*self.api;
        match kind {
            ContextKind::Track => self.official(move || api.track(id)).await.map(|t| t.name),
            ContextKind::Album => self.official(move || api.album(id)).await.map(|a| a.name),
            ContextKind::Artist => self.official(move || api.artist(id)).await.map(|a| a.name),
            ContextKind::Playlist => self
                .official(move || api.playlist(id))
                .await
                .map(|p| p.name),
        }
    }

    /// Plays a context from the web player on the preferred device.
    async fn radio_command(&self, browser: &dyn Browser, context: &ContextUri) -> Result<()> {
        let web_player_id = self.web_player_id(browser).await?;

        let connect = &*self.connect;
        let (from, to, uri) = (web_player_id.as_str(), self.device_id.as_str(), context.as_str());
        self.retry
            .run(TokenKind::Web, move || connect.play_command(from, to, uri))
            .await?;
        info!("playing {uri}");

        self.verifier.force_repeat_shuffle(None).await
    }

    /// Device id of the browser's web player. A web player that is not
    /// listed gets its login checked once before giving up.
    async fn web_player_id(&self, browser: &dyn Browser) -> Result<String> {
        if let Some(id) = self.device_named(&self.web_player_name).await? {
            return Ok(id);
        }

        debug!("{} not listed, checking login", self.web_player_name);
        self.flow.verify_logged_in(browser).await?;
        self.device_named(&self.web_player_name)
            .await?
            .ok_or_else(|| Error::device_not_found("Error looking up device"))
    }

    async fn device_named(&self, name: &str) -> Result<Option<String>> {
        let devices = self.devices().await?;
        Ok(devices
            .into_iter()
            .find(|device| device.name == name)
            .and_then(|device| device.id))
    }

    /// Sets the volume from user input and returns the applied percentage.
    ///
    /// # Errors
    ///
    /// * `InvalidArgument` unless the input is a whole number from 0 to 100
    /// * errors of the Web API call
    pub async fn set_volume(&self, volume: &str) -> Result<u8> {
        let percent = parse_volume(volume)?;
        let api = &*self.api;
        self.official(move || api.set_volume(percent)).await?;
        Ok(percent)
    }

    /// Volume of the device currently playing.
    ///
    /// # Errors
    ///
    /// Returns `DeviceNotFound` if no device is playing or it does not
    /// report a volume.
    pub async fn volume(&self) -> Result<u8> {
        let api = &*self.api;
        self.official(move || api.playback())
            .await?
            .and_then(|playback| playback.device)
            .and_then(|device| device.volume_percent)
            .ok_or_else(|| Error::device_not_found("No playback device found"))
    }

    pub async fn skip(&self) -> Result<()> {
        let api = &*self.api;
        self.official(move || api.next()).await
    }

    pub async fn pause(&self) -> Result<()> {
        let api = &*self.api;
        self.official(move || api.pause()).await
    }

    pub async fn resume(&self) -> Result<()> {
        let (api, device_id) = (&*self.api, self.device_id.as_str());
        self.official(move || api.play(device_id, None)).await
    }

    pub async fn devices(&self) -> Result<Vec<Device>> {
        let api = &*self.api;
        self.official(move || api.devices()).await
    }

    pub async fn transfer_playback(&self, device_id: &str, play: bool) -> Result<()> {
        let api = &*self.api;
        self.official(move || api.transfer(device_id, play)).await
    }

    /// Searches tracks.
    ///
    /// # Errors
    ///
    /// Returns an error if the search fails.
    pub async fn search_tracks(&self, terms: &str, page: Page) -> Result<Paging<Track>> {
        self.search(terms, &[ContextKind::Track], page)
            .await?
            .tracks
            .ok_or_else(|| Error::data_loss("search returned no tracks"))
    }

    pub async fn search(
        &self,
        terms: &str,
        kinds: &[ContextKind],
        page: Page,
    ) -> Result<SearchResults> {
        let api = &*self.api;
        self.official(move || api.search(terms, kinds, page.offset, page.limit))
            .await
    }

    pub async fn track(&self, id: &str) -> Result<Track> {
        let api = &*self.api;
        self.official(move || api.track(id)).await
    }

    /// Looks up any number of tracks, in batches.
    pub async fn tracks(&self, ids: &[String]) -> Result<Vec<Option<Track>>> {
        let api = &*self.api;
        let mut tracks = Vec::with_capacity(ids.len());
        for batch in ids.chunks(MAX_TRACK_IDS) {
            tracks.extend(self.official(move || api.tracks(batch)).await?);
        }
        Ok(tracks)
    }

    pub async fn album(&self, id: &str) -> Result<Album> {
        let api = &*self.api;
        self.official(move || api.album(id)).await
    }

    pub async fn album_tracks(&self, id: &str, page: Page) -> Result<Paging<Track>> {
        let api = &*self.api;
        self.official(move || api.album_tracks(id, page.offset, page.limit))
            .await
    }

    pub async fn artist(&self, id: &str) -> Result<Artist> {
        let api = &*self.api;
        self.official(move || api.artist(id)).await
    }

    pub async fn artist_albums(&self, id: &str, page: Page) -> Result<Paging<Album>> {
        let api = &*self.api;
        self.official(move || api.artist_albums(id, page.offset, page.limit))
            .await
    }

    pub async fn playlist(&self, id: &str) -> Result<Playlist> {
        let api = &*self.api;
        self.official(move || api.playlist(id)).await
    }

    pub async fn playlist_tracks(&self, id: &str, page: Page) -> Result<Paging<PlaylistItem>> {
        let api = &*self.api;
        self.official(move || api.playlist_tracks(id, page.offset, page.limit))
            .await
    }

    /// Replaces the browser session, for example after the user logged out
    /// elsewhere.
    ///
    /// # Errors
    ///
    /// Returns an error if the new session cannot be authenticated.
    pub async fn reinitialize(&self) -> Result<()> {
        self.channel.reinitialize().await
    }

    /// Quits the browser session.
    pub async fn shutdown(&self) {
        self.channel.shutdown().await;
    }
}

/// Parses a volume percentage between 0 and 100.
fn parse_volume(input: &str) -> Result<u8> {
    let input = input.trim();
    if input.is_empty() || !VOLUME_PATTERN.is_match(input) {
        return Err(Error::invalid_argument(VOLUME_ERROR));
    }

    input
        .parse::<u8>()
        .ok()
        .filter(|percent| *percent <= 100)
        .ok_or_else(|| Error::invalid_argument(VOLUME_ERROR))
}

/// A running engine: the [`Jukebox`] plus its background tasks.
pub struct Engine {
    jukebox: Arc<Jukebox>,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl Engine {
    /// Builds the services from `config` and starts the realtime connection
    /// and the playback state updater.
    ///
    /// # Errors
    ///
    /// Returns an error if a client cannot be built.
    pub fn start(config: &Config) -> Result<Self> {
        let http = Arc::new(HttpClient::new(config)?);
        let accounts = Arc::new(Accounts::new(config, Arc::clone(&http))?);
        let credentials = Arc::new(Credentials::new(config, accounts)?);

        let channel = Arc::new(Channel::new(
            Arc::new(webdriver::Launcher::new(config, &http)),
            Arc::clone(&credentials) as _,
            config.timings.reinit_delay,
        ));
        let api: Arc<dyn WebApi> = Arc::new(api::Client::new(
            config,
            Arc::clone(&http),
            Arc::clone(&credentials),
        ));
        let connect: Arc<dyn ConnectApi> = Arc::new(connect::Client::new(
            config,
            Arc::clone(&http),
            Arc::clone(&credentials),
        ));

        let retry = Retry::new(Arc::clone(&credentials), config.timings.retry_attempts);
        let model = Arc::new(NowPlaying::new(Arc::clone(&api), retry.clone()));
        let (supervisor, updates) = Supervisor::new(
            config,
            Arc::clone(&credentials),
            Arc::clone(&connect),
            Arc::clone(&model),
        );

        let jukebox = Arc::new(Jukebox::new(
            config,
            Services {
                credentials,
                channel,
                api,
                connect,
                retry,
                model: Arc::clone(&model),
                connection: supervisor.state(),
            },
        )?);

        let cancel = CancellationToken::new();
        let tasks = vec![
            tokio::spawn({
                let cancel = cancel.clone();
                async move { supervisor.run(cancel).await }
            }),
            tokio::spawn({
                let cancel = cancel.clone();
                async move { model.run(updates, cancel).await }
            }),
        ];

        Ok(Self {
            jukebox,
            cancel,
            tasks,
        })
    }

    #[must_use]
    pub fn jukebox(&self) -> Arc<Jukebox> {
        Arc::clone(&self.jukebox)
    }

    /// Stops the background tasks and quits the browser session.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for task in self.tasks {
            if let Err(e) = task.await {
                error!("background task failed: {e}");
            }
        }
        self.jukebox.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        credentials::tests::{config, credentials, CountingAuthorizer},
        error::ErrorKind,
        protocol::web_api::{Artist, Playback, RepeatState},
        testing::{device, track, BlankLauncher, FakeApi, FakeConnect, Trusting},
    };

    struct Fixture {
        jukebox: Jukebox,
        api: Arc<FakeApi>,
        connect: Arc<FakeConnect>,
    }

    /// A jukebox whose preferred device is playing with repeat and shuffle
    /// on, so that verification leaves no trace in the recorded commands.
    fn fixture() -> Fixture {
        let config = config(None);
        let api = Arc::new(FakeApi::with_device("kitchen", true));
        *api.playback.lock().unwrap() = Some(Playback {
            device: Some(device("kitchen", "Kitchen", true)),
            is_playing: true,
            repeat_state: RepeatState::Context,
            shuffle_state: true,
            item: Some(track("now", "Intro", &["The xx"])),
            ..Playback::default()
        });
        let connect = Arc::new(FakeConnect::default());

        let credentials = Arc::new(credentials(Arc::new(CountingAuthorizer::default())));
        let retry = Retry::new(Arc::clone(&credentials), 3);
        let model = Arc::new(NowPlaying::new(api.clone(), retry.clone()));
        let (_, connection) = watch::channel(ConnectionState::Disconnected);

        let jukebox = Jukebox::new(
            &config,
            Services {
                credentials,
                channel: Arc::new(Channel::new(
                    Arc::new(BlankLauncher),
                    Arc::new(Trusting),
                    Duration::ZERO,
                )),
                api: api.clone(),
                connect: connect.clone(),
                retry,
                model,
                connection,
            },
        )
        .unwrap();

        Fixture {
            jukebox,
            api,
            connect,
        }
    }

    #[test]
    fn volume_input_is_validated() {
        for (input, percent) in [("0", 0), ("7", 7), ("07", 7), (" 42 ", 42), ("100", 100)] {
            assert_eq!(parse_volume(input).unwrap(), percent, "{input}");
        }

        for input in ["", "101", "150", "007", "1000", "-1", "+5", "abc", "4.5"] {
            let err = parse_volume(input).unwrap_err();
            assert_eq!(err.kind, ErrorKind::InvalidArgument, "{input}");
            assert_eq!(err.error.to_string(), VOLUME_ERROR);
        }
    }

    #[tokio::test]
    async fn volume_is_set_and_read() {
        let Fixture { jukebox, api, .. } = fixture();

        assert_eq!(jukebox.set_volume(" 35").await.unwrap(), 35);
        assert_eq!(api.commands(), vec!["volume 35"]);
        assert_eq!(jukebox.volume().await.unwrap(), 50);

        *api.playback.lock().unwrap() = None;
        let err = jukebox.volume().await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::DeviceNotFound);
    }

    #[tokio::test]
    async fn tracks_are_queued_on_the_preferred_device() {
        let Fixture { jukebox, api, .. } = fixture();

        jukebox.queue_track("4uLU6hMCjMI75M1A2tKUQC").await.unwrap();
        jukebox.queue_track("spotify:track:abc").await.unwrap();

        assert_eq!(
            api.commands(),
            vec![
                "queue kitchen spotify:track:4uLU6hMCjMI75M1A2tKUQC",
                "queue kitchen spotify:track:abc",
            ]
        );
    }

    #[tokio::test]
    async fn contexts_play_through_the_web_api() {
        let Fixture {
            jukebox,
            api,
            connect,
        } = fixture();

        jukebox.play_context("spotify:album:xx").await.unwrap();

        assert_eq!(api.commands(), vec!["play kitchen spotify:album:xx"]);
        assert!(connect.commands.lock().unwrap().is_empty());

        let err = jukebox.play_context("not a uri").await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidArgument);
    }

    #[tokio::test]
    async fn radio_plays_from_the_web_player() {
        let Fixture {
            jukebox,
            api,
            connect,
        } = fixture();
        api.devices
            .lock()
            .unwrap()
            .push(device("browser", "Web Player (Chrome)", false));
        api.artists.lock().unwrap().insert(
            "moderat".to_owned(),
            Artist {
                id: Some("moderat".to_owned()),
                name: "Moderat".to_owned(),
            },
        );

        let name = jukebox
            .play_radio(ContextKind::Artist, "moderat")
            .await
            .unwrap();
        jukebox
            .play_context("spotify:station:playlist:friday")
            .await
            .unwrap();

        assert_eq!(name, "Moderat");
        assert_eq!(
            *connect.commands.lock().unwrap(),
            vec![
                "browser -> kitchen: spotify:radio:artist:moderat",
                "browser -> kitchen: spotify:station:playlist:friday",
            ]
        );
        assert!(api.commands().is_empty());
    }

    #[tokio::test]
    async fn unknown_radio_seed_is_not_found() {
        let Fixture { jukebox, connect, .. } = fixture();

        let err = jukebox
            .play_radio(ContextKind::Album, "missing")
            .await
            .unwrap_err();

        assert_eq!(err.kind, ErrorKind::NotFound);
        assert!(connect.commands.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn stale_status_is_polled_without_a_live_connection() {
        let Fixture { jukebox, .. } = fixture();

        let status = jukebox.cached_status().await.unwrap().unwrap();

        assert_eq!(status.now_playing.title, "Intro");
        assert!(status.queued.is_empty());
    }

    #[tokio::test]
    async fn searches_are_paged() {
        let Fixture { jukebox, api, .. } = fixture();
        for (id, name) in [("a", "Shadow 1"), ("b", "Shadow 2"), ("c", "Shadow 3"), ("d", "Light")] {
            api.add_track(id, name, &["Moderat"]);
        }

        let page = jukebox
            .search_tracks("Shadow", Page { offset: 1, limit: 1 })
            .await
            .unwrap();

        assert_eq!(page.total, 3);
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].name, "Shadow 2");
    }

    #[tokio::test]
    async fn track_lookups_are_batched() {
        let Fixture { jukebox, api, .. } = fixture();
        api.add_track("a", "Crystalised", &["The xx"]);
        let ids: Vec<String> = (0..120).map(|n| if n == 0 { "a".to_owned() } else { n.to_string() }).collect();

        let tracks = jukebox.tracks(&ids).await.unwrap();

        assert_eq!(tracks.len(), 120);
        assert_eq!(tracks[0].as_ref().unwrap().name, "Crystalised");
        assert_eq!(api.lookups.load(std::sync::atomic::Ordering::SeqCst), 3);
    }
}
