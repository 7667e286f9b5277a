//! Resources of the official Spotify Web API.
//!
//! Only the fields the engine reads are modelled; unknown fields are
//! ignored. Fields that the API documents as nullable are `Option`s or carry
//! a `#[serde(default)]`.
//!
//! # Example Response
//!
//! `GET /v1/me/player`:
//! ```json
//! {
//!     "device": { "id": "d1e2", "name": "Kitchen", "is_active": true, "volume_percent": 40 },
//!     "shuffle_state": false,
//!     "repeat_state": "off",
//!     "is_playing": true,
//!     "context": { "type": "playlist", "uri": "spotify:playlist:37i9dQZF1DXcBWIGoYBM5M" },
//!     "item": { "id": "6rqh", "name": "Song", "uri": "spotify:track:6rqh", "artists": [] },
//!     "actions": { "disallows": { "resuming": true } }
//! }
//! ```

use std::fmt;

use serde::Deserialize;

/// A playback device.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq, Hash)]
pub struct Device {
    /// Absent for some restricted devices.
    pub id: Option<String>,

    pub name: String,

    #[serde(default)]
    pub is_active: bool,

    #[serde(default)]
    pub is_restricted: bool,

    #[serde(default, rename = "type")]
    pub kind: String,

    pub volume_percent: Option<u8>,
}

/// Response of `GET /v1/me/player/devices`.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
pub struct Devices {
    pub devices: Vec<Device>,
}

/// Repeat mode of the player.
#[derive(Copy, Clone, Debug, Default, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum RepeatState {
    #[default]
    Off,
    Track,
    Context,
}

impl fmt::Display for RepeatState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Off => f.write_str("off"),
            Self::Track => f.write_str("track"),
            Self::Context => f.write_str("context"),
        }
    }
}

/// Actions that the player currently refuses.
#[derive(Copy, Clone, Debug, Default, Deserialize, PartialEq, Eq, Hash)]
#[serde(default)]
pub struct Disallows {
    pub interrupting_playback: bool,
    pub pausing: bool,
    pub resuming: bool,
    pub skipping_next: bool,
    pub toggling_repeat_context: bool,
    pub toggling_repeat_track: bool,
    pub toggling_shuffle: bool,
}

#[derive(Copy, Clone, Debug, Default, Deserialize, PartialEq, Eq, Hash)]
#[serde(default)]
pub struct Actions {
    pub disallows: Disallows,
}

/// Context reference in a playback response.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Hash)]
pub struct Context {
    pub uri: String,

    #[serde(default, rename = "type")]
    pub kind: Option<String>,
}

/// Response of `GET /v1/me/player`.
///
/// The endpoint answers `204 No Content` when nothing is loaded, which the
/// client reports as `None`.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
pub struct Playback {
    pub device: Option<Device>,

    #[serde(default)]
    pub is_playing: bool,

    #[serde(default)]
    pub shuffle_state: bool,

    #[serde(default)]
    pub repeat_state: RepeatState,

    pub context: Option<Context>,

    pub item: Option<Track>,

    pub progress_ms: Option<u64>,

    #[serde(default)]
    pub actions: Actions,
}

impl Playback {
    /// Whether there is anything loaded that playback could resume from.
    #[must_use]
    pub fn has_context(&self) -> bool {
        self.context.is_some() || self.item.is_some()
    }
}

/// Simplified artist.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq, Hash)]
pub struct Artist {
    #[serde(default)]
    pub id: Option<String>,

    pub name: String,
}

/// Simplified album.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq, Hash)]
pub struct Album {
    #[serde(default)]
    pub id: Option<String>,

    pub name: String,

    #[serde(default)]
    pub artists: Vec<Artist>,

    #[serde(default)]
    pub uri: String,
}

/// A track, or an episode in the `item` slot of a playback response.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq, Hash)]
pub struct Track {
    /// Absent for local files.
    #[serde(default)]
    pub id: Option<String>,

    pub name: String,

    #[serde(default)]
    pub artists: Vec<Artist>,

    #[serde(default)]
    pub uri: String,
}

impl Track {
    #[must_use]
    pub fn artist_names(&self) -> Vec<String> {
        names(&self.artists)
    }
}

impl Album {
    #[must_use]
    pub fn artist_names(&self) -> Vec<String> {
        names(&self.artists)
    }
}

fn names(artists: &[Artist]) -> Vec<String> {
    artists.iter().map(|artist| artist.name.clone()).collect()
}

/// Response of `GET /v1/tracks?ids=...`.
///
/// Unknown ids yield `null` entries at their position.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
pub struct Tracks {
    pub tracks: Vec<Option<Track>>,
}

/// A playlist, possibly requested with a `fields` filter.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq, Hash)]
pub struct Playlist {
    #[serde(default)]
    pub id: String,

    pub name: String,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub uri: String,
}

/// Entry of a playlist's track listing. `track` is `null` for items that
/// are no longer available.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq, Hash)]
pub struct PlaylistItem {
    #[serde(default)]
    pub track: Option<Track>,
}

/// One page of a paginated listing.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct Paging<T> {
    pub items: Vec<T>,

    #[serde(default)]
    pub total: u32,

    #[serde(default)]
    pub offset: u32,

    #[serde(default)]
    pub limit: u32,

    #[serde(default)]
    pub next: Option<String>,
}

/// Response of `GET /v1/search`.
///
/// Only the requested kinds are present. Playlist listings may contain
/// `null` entries.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
pub struct SearchResults {
    pub tracks: Option<Paging<Track>>,
    pub albums: Option<Paging<Album>>,
    pub artists: Option<Paging<Artist>>,
    pub playlists: Option<Paging<Option<Playlist>>>,
}

/// Error body of the Web API.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct ApiError {
    pub error: ApiErrorDetails,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct ApiErrorDetails {
    pub status: u16,

    #[serde(default)]
    pub message: String,
}
