//! In-memory stand-ins for the remote services.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use url::Url;

use crate::{
    api::WebApi,
    automation::{Authenticator, Browser, Cookie, Element, Launcher, Selector},
    connect::ConnectApi,
    error::{Error, Result},
    protocol::{
        connect_state::{Cluster, PlayerState, ProvidedTrack},
        uri::ContextKind,
        web_api::{
            Album, Artist, Device, Paging, Playback, Playlist, PlaylistItem, RepeatState,
            SearchResults, Track,
        },
    },
};

/// Web API over a fixed catalog that records every command it receives.
#[derive(Default)]
pub(crate) struct FakeApi {
    pub devices: Mutex<Vec<Device>>,
    pub playback: Mutex<Option<Playback>>,
    pub tracks: Mutex<HashMap<String, Track>>,
    pub albums: Mutex<HashMap<String, Album>>,
    pub artists: Mutex<HashMap<String, Artist>>,
    pub playlists: Mutex<HashMap<String, Playlist>>,
    pub commands: Mutex<Vec<String>>,
    pub lookups: AtomicU32,
    /// Delay of track lookups, keyed by the first id looked up.
    pub slow_tracks: Mutex<HashMap<String, Duration>>,
}

impl FakeApi {
    pub fn with_device(id: &str, is_active: bool) -> Self {
        let api = Self::default();
        api.devices.lock().unwrap().push(device(id, "Kitchen", is_active));
        api
    }

    pub fn add_track(&self, id: &str, name: &str, artists: &[&str]) {
        self.tracks
            .lock()
            .unwrap()
            .insert(id.to_owned(), track(id, name, artists));
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    fn record(&self, command: String) {
        self.commands.lock().unwrap().push(command);
    }

    fn lookup<T: Clone>(map: &Mutex<HashMap<String, T>>, id: &str) -> Result<T> {
        map.lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("{id} not found")))
    }
}

pub(crate) fn device(id: &str, name: &str, is_active: bool) -> Device {
    Device {
        id: Some(id.to_owned()),
        name: name.to_owned(),
        is_active,
        volume_percent: Some(50),
        ..Device::default()
    }
}

pub(crate) fn track(id: &str, name: &str, artists: &[&str]) -> Track {
    Track {
        id: Some(id.to_owned()),
        name: name.to_owned(),
        artists: artists
            .iter()
            .map(|name| Artist {
                id: None,
                name: (*name).to_owned(),
            })
            .collect(),
        uri: format!("spotify:track:{id}"),
    }
}

/// Player state with `current` playing and `next` coming up, where each
/// entry of `next` is `(id, queued)`.
pub(crate) fn player_state(context: Option<&str>, current: &str, next: &[(&str, bool)]) -> PlayerState {
    let provided = |id: &str, queued: bool| ProvidedTrack {
        uri: format!("spotify:track:{id}"),
        provider: None,
        metadata: if queued {
            HashMap::from([("is_queued".to_owned(), "true".to_owned())])
        } else {
            HashMap::new()
        },
    };

    PlayerState {
        context_uri: context.map(ToOwned::to_owned),
        is_playing: true,
        is_paused: false,
        track: Some(provided(current, false)),
        next_tracks: next.iter().map(|(id, queued)| provided(id, *queued)).collect(),
    }
}

fn page<T>(items: Vec<T>, offset: u32, limit: u32) -> Paging<T> {
    let total = u32::try_from(items.len()).unwrap();
    Paging {
        items: items
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect(),
        total,
        offset,
        limit,
        next: None,
    }
}

#[async_trait]
impl WebApi for FakeApi {
    async fn devices(&self) -> Result<Vec<Device>> {
        Ok(self.devices.lock().unwrap().clone())
    }

    async fn playback(&self) -> Result<Option<Playback>> {
        Ok(self.playback.lock().unwrap().clone())
    }

    async fn play(&self, device_id: &str, context_uri: Option<&str>) -> Result<()> {
        match context_uri {
            Some(uri) => self.record(format!("play {device_id} {uri}")),
            None => self.record(format!("resume {device_id}")),
        }
        Ok(())
    }

    async fn pause(&self) -> Result<()> {
        self.record("pause".to_owned());
        Ok(())
    }

    async fn next(&self) -> Result<()> {
        self.record("next".to_owned());
        Ok(())
    }

    async fn set_volume(&self, percent: u8) -> Result<()> {
        self.record(format!("volume {percent}"));
        Ok(())
    }

    async fn set_shuffle(&self, state: bool) -> Result<()> {
        self.record(format!("shuffle {state}"));
        Ok(())
    }

    async fn set_repeat(&self, state: RepeatState) -> Result<()> {
        self.record(format!("repeat {state}"));
        Ok(())
    }

    async fn queue(&self, device_id: &str, uri: &str) -> Result<()> {
        self.record(format!("queue {device_id} {uri}"));
        Ok(())
    }

    async fn transfer(&self, device_id: &str, play: bool) -> Result<()> {
        self.record(format!("transfer {device_id} {play}"));
        Ok(())
    }

    async fn tracks(&self, ids: &[String]) -> Result<Vec<Option<Track>>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        let delay = ids
            .first()
            .and_then(|id| self.slow_tracks.lock().unwrap().get(id).copied());
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let tracks = self.tracks.lock().unwrap();
        Ok(ids.iter().map(|id| tracks.get(id).cloned()).collect())
    }

    async fn track(&self, id: &str) -> Result<Track> {
        Self::lookup(&self.tracks, id)
    }

    async fn album(&self, id: &str) -> Result<Album> {
        Self::lookup(&self.albums, id)
    }

    async fn album_tracks(&self, id: &str, offset: u32, limit: u32) -> Result<Paging<Track>> {
        Self::lookup(&self.albums, id)?;
        let tracks = self.tracks.lock().unwrap().values().cloned().collect();
        Ok(page(tracks, offset, limit))
    }

    async fn artist(&self, id: &str) -> Result<Artist> {
        Self::lookup(&self.artists, id)
    }

    async fn artist_albums(&self, id: &str, offset: u32, limit: u32) -> Result<Paging<Album>> {
        Self::lookup(&self.artists, id)?;
        let albums = self.albums.lock().unwrap().values().cloned().collect();
        Ok(page(albums, offset, limit))
    }

    async fn playlist(&self, id: &str) -> Result<Playlist> {
        Self::lookup(&self.playlists, id)
    }

    async fn playlist_tracks(
        &self,
        id: &str,
        offset: u32,
        limit: u32,
    ) -> Result<Paging<PlaylistItem>> {
        Self::lookup(&self.playlists, id)?;
        let items = self
            .tracks
            .lock()
            .unwrap()
            .values()
            .map(|track| PlaylistItem {
                track: Some(track.clone()),
            })
            .collect();
        Ok(page(items, offset, limit))
    }

    async fn search(
        &self,
        terms: &str,
        kinds: &[ContextKind],
        offset: u32,
        limit: u32,
    ) -> Result<SearchResults> {
        let mut results = SearchResults::default();
        if kinds.contains(&ContextKind::Track) {
            let mut tracks: Vec<Track> = self
                .tracks
                .lock()
                .unwrap()
                .values()
                .filter(|track| track.name.contains(terms))
                .cloned()
                .collect();
            tracks.sort_by(|a, b| a.name.cmp(&b.name));
            results.tracks = Some(page(tracks, offset, limit));
        }
        Ok(results)
    }
}

/// Connect-state service returning a fixed cluster.
#[derive(Default)]
pub(crate) struct FakeConnect {
    pub cluster: Mutex<Cluster>,
    pub registrations: Mutex<Vec<String>>,
    pub commands: Mutex<Vec<String>>,
    pub fail_registration: std::sync::atomic::AtomicBool,
    pub snapshots: AtomicU32,
}

#[async_trait]
impl ConnectApi for FakeConnect {
    async fn register_notifications(&self, connection_id: &str) -> Result<()> {
        if self.fail_registration.load(Ordering::SeqCst) {
            return Err(Error::unavailable("registration refused"));
        }
        self.registrations
            .lock()
            .unwrap()
            .push(connection_id.to_owned());
        Ok(())
    }

    async fn connect_state(&self, _connection_id: &str) -> Result<Cluster> {
        self.snapshots.fetch_add(1, Ordering::SeqCst);
        Ok(self.cluster.lock().unwrap().clone())
    }

    async fn play_command(&self, from: &str, to: &str, uri: &str) -> Result<()> {
        self.commands
            .lock()
            .unwrap()
            .push(format!("{from} -> {to}: {uri}"));
        Ok(())
    }
}

/// Browser on a blank page where every command succeeds.
pub(crate) struct BlankBrowser;

#[async_trait]
impl Browser for BlankBrowser {
    async fn navigate(&self, _url: &Url) -> Result<()> {
        Ok(())
    }

    async fn current_url(&self) -> Result<Url> {
        Ok(Url::parse("about:blank").unwrap())
    }

    async fn find_elements(&self, _selector: &Selector) -> Result<Vec<Element>> {
        Ok(Vec::new())
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
        Ok(true)
    }

    async fn cookies(&self) -> Result<Vec<Cookie>> {
        Ok(Vec::new())
    }

    async fn quit(&self) -> Result<()> {
        Ok(())
    }
}

pub(crate) struct BlankLauncher;

#[async_trait]
impl Launcher for BlankLauncher {
    async fn launch(&self) -> Result<Arc<dyn Browser>> {
        Ok(Arc::new(BlankBrowser))
    }
}

/// Accepts every session as authenticated.
pub(crate) struct Trusting;

#[async_trait]
impl Authenticator for Trusting {
    async fn initialize(&self, _browser: &dyn Browser) -> Result<()> {
        Ok(())
    }
}
