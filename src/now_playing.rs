//! Playback state model.
//!
//! Holds what is playing now, what the user queued after it and which
//! context it plays from, resolved to display names. Raw player states from
//! the realtime connection are resolved in batches through the Web API and
//! then published at once: readers see either the previous snapshot or the
//! new one, never a mix.
//!
//! Snapshots are ordered by when their resolution started. A snapshot whose
//! resolution started before that of the published one is discarded, so a
//! slow lookup never replaces a newer state.
//!
//! Only tracks flagged as user-queued appear in the queue. Tracks that merely
//! come up next in the context are left out.

use std::{
    iter,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, SystemTime},
};

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::{
    api::{WebApi, MAX_TRACK_IDS},
    credentials::TokenKind,
    error::Result,
    protocol::{
        connect_state::PlayerState,
        uri::{self, ContextKind, ContextUri},
        web_api::{Playback, Track},
    },
    retry::Retry,
};

/// A resolved track.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TrackInfo {
    pub id: String,
    pub title: String,
    pub artists: Vec<String>,
}

impl From<Track> for TrackInfo {
    fn from(track: Track) -> Self {
        let artists = track.artist_names();
        let id = track
            .id
            .unwrap_or_else(|| uri::id_of(&track.uri).to_owned());
        Self {
            id,
            title: track.name,
            artists,
        }
    }
}

/// A resolved playback context.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContextInfo {
    pub kind: ContextKind,
    pub radio: bool,
    pub name: String,
    /// Artists of album and track contexts; empty otherwise.
    pub artists: Vec<String>,
    pub uri: String,
}

/// Snapshot of the playback state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlaybackState {
    pub now_playing: TrackInfo,
    pub queued: Vec<TrackInfo>,
    pub context: Option<ContextInfo>,
    pub last_updated: SystemTime,
}

/// Shared, atomically replaced playback state.
pub struct NowPlaying {
    api: Arc<dyn WebApi>,
    retry: Retry,
    state: watch::Sender<Option<Arc<PlaybackState>>>,

    /// Sequence number of the last started resolution.
    started: AtomicU64,
    /// Sequence number of the published snapshot. Only accessed while the
    /// state is locked.
    published: AtomicU64,
}

impl NowPlaying {
    #[must_use]
    pub fn new(api: Arc<dyn WebApi>, retry: Retry) -> Self {
        let (state, _) = watch::channel(None);
        Self {
            api,
            retry,
            state,
            started: AtomicU64::new(0),
            published: AtomicU64::new(0),
        }
    }

    fn start(&self) -> u64 {
        self.started.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// The current snapshot, if any state was resolved yet.
    #[must_use]
    pub fn read(&self) -> Option<Arc<PlaybackState>> {
        self.state.borrow().clone()
    }

    /// Receiver notified on every published snapshot.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Option<Arc<PlaybackState>>> {
        self.state.subscribe()
    }

    /// Whether the snapshot is missing or older than `window`.
    #[must_use]
    pub fn is_stale(&self, window: Duration) -> bool {
        self.state.borrow().as_ref().is_none_or(|state| {
            state
                .last_updated
                .elapsed()
                .is_ok_and(|age| age > window)
        })
    }

    /// URI of the context of the current snapshot.
    #[must_use]
    pub fn context_uri(&self) -> Option<String> {
        self.state
            .borrow()
            .as_ref()
            .and_then(|state| state.context.as_ref())
            .map(|context| context.uri.clone())
    }

    /// Resolves a player state from the realtime connection and publishes
    /// it.
    ///
    /// A state without a current track is ignored, as is one whose current
    /// track does not resolve. Contexts that do not resolve are published as
    /// no context.
    ///
    /// # Errors
    ///
    /// Returns an error if the track lookup fails.
    pub async fn update(&self, player: &PlayerState) -> Result<()> {
        let Some(current) = player.track.as_ref() else {
            trace!("player state without track");
            return Ok(());
        };
        let sequence = self.start();

        let ids: Vec<String> = iter::once(current)
            .chain(player.next_tracks.iter().filter(|track| track.is_queued()))
            .take(MAX_TRACK_IDS)
            .map(|track| uri::id_of(&track.uri).to_owned())
            .collect();

        let api = &*self.api;
        let lookup = &ids;
        let mut tracks = self
            .retry
            .run(TokenKind::Official, move || api.tracks(lookup))
            .await?
            .into_iter();

        let Some(now_playing) = tracks.next().flatten() else {
            warn!("current track {} did not resolve", current.uri);
            return Ok(());
        };
        let queued = tracks.flatten().map(TrackInfo::from).collect();

        let context = match player.context_uri.as_deref().filter(|uri| !uri.is_empty()) {
            Some(uri) => self.resolve_context(uri).await,
            None => None,
        };

        self.publish(sequence, TrackInfo::from(now_playing), queued, context);
        Ok(())
    }

    /// Publishes the state reported by the Web API.
    ///
    /// The Web API does not report the queue, so the snapshot has none.
    pub async fn update_from_playback(&self, playback: &Playback) {
        let Some(item) = playback.item.clone() else {
            trace!("playback without item");
            return;
        };
        let sequence = self.start();

        let context = match playback.context.as_ref() {
            Some(context) => self.resolve_context(&context.uri).await,
            None => None,
        };

        self.publish(sequence, TrackInfo::from(item), Vec::new(), context);
    }

    /// Replaces the snapshot unless a later resolution was published first.
    /// Timestamps never go backwards, even when the wall clock does.
    fn publish(
        &self,
        sequence: u64,
        now_playing: TrackInfo,
        queued: Vec<TrackInfo>,
        context: Option<ContextInfo>,
    ) {
        let now = SystemTime::now();
        self.state.send_if_modified(|state| {
            if sequence < self.published.load(Ordering::SeqCst) {
                debug!("discarding superseded state of {}", now_playing.title);
                return false;
            }
            self.published.store(sequence, Ordering::SeqCst);

            let last_updated = state
                .as_ref()
                .map_or(now, |previous| previous.last_updated.max(now));

            debug!(
                "now playing {} by {} ({} queued)",
                now_playing.title,
                now_playing.artists.join(", "),
                queued.len()
            );

            *state = Some(Arc::new(PlaybackState {
                now_playing,
                queued,
                context,
                last_updated,
            }));
            true
        });
    }

    async fn resolve_context(&self, uri: &str) -> Option<ContextInfo> {
        let context: ContextUri = match uri.parse() {
            Ok(context) => context,
            Err(e) => {
                debug!("{e}");
                return None;
            }
        };

        match self.describe(&context).await {
            Ok((name, artists)) => Some(ContextInfo {
                kind: context.kind,
                radio: context.radio,
                name,
                artists,
                uri: uri.to_owned(),
            }),
            Err(e) => {
                warn!("context {uri} did not resolve: {e}");
                None
            }
        }
    }

    /// Name and artists of a context.
    async fn describe(&self, context: &ContextUri) -> Result<(String, Vec<String>)> {
        let api = &*self.api;
        let id = context.id.as_str();
        let official = TokenKind::Official;

        match context.kind {
            ContextKind::Playlist => self
                .retry
                .run(official, move || api.playlist(id))
                .await
                .map(|playlist| (playlist.name, Vec::new())),
            ContextKind::Album => self
                .retry
                .run(official, move || api.album(id))
                .await
                .map(|album| {
                    let artists = album.artist_names();
                    (album.name, artists)
                }),
            ContextKind::Artist => self
                .retry
                .run(official, move || api.artist(id))
                .await
                .map(|artist| (artist.name, Vec::new())),
            ContextKind::Track => self
                .retry
                .run(official, move || api.track(id))
                .await
                .map(|track| {
                    let artists = track.artist_names();
                    (track.name, artists)
                }),
        }
    }

    /// Applies player states as they arrive until cancelled.
    ///
    /// Only the latest state is kept while an update is in progress, so a
    /// burst of changes costs one resolution.
    pub async fn run(
        &self,
        mut updates: watch::Receiver<Option<PlayerState>>,
        cancel: CancellationToken,
    ) {
        loop {
            tokio::select! {
                biased;

                () = cancel.cancelled() => break,

                changed = updates.changed() => {
                    if changed.is_err() {
                        debug!("player state source closed");
                        break;
                    }

                    let player = updates.borrow_and_update().clone();
                    if let Some(player) = player {
                        if let Err(e) = self.update(&player).await {
                            error!("updating playback state failed: {e}");
                        }
                    }
                }
            }
        }
    }
}
