//! Spotify URIs and the playback contexts they name.
//!
//! Context URIs seen in practice:
//!
//! ```text
//! spotify:playlist:37i9dQZF1DXcBWIGoYBM5M
//! spotify:user:someone:playlist:37i9dQZF1DXcBWIGoYBM5M
//! spotify:album:4aawyAB9vmqN3uQ7FjRGTy
//! spotify:radio:artist:0OdUWJ0sBjDrqHygGUXeCF
//! spotify:station:playlist:37i9dQZF1DXcBWIGoYBM5M
//! ```

use std::{fmt, str::FromStr};

use serde_with::{DeserializeFromStr, SerializeDisplay};

use crate::error::Error;

/// URI scheme prefix.
const SCHEME: &str = "spotify";

/// Kind of grouping that drives playback.
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub enum ContextKind {
    Track,
    Album,
    Artist,
    Playlist,
}

impl ContextKind {
    /// All kinds, for lookups by name.
    pub const ALL: [Self; 4] = [Self::Track, Self::Album, Self::Artist, Self::Playlist];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Track => "track",
            Self::Album => "album",
            Self::Artist => "artist",
            Self::Playlist => "playlist",
        }
    }
}

impl fmt::Display for ContextKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContextKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| Error::invalid_argument(format!("unknown context kind {s}")))
    }
}

/// A parsed context URI.
///
/// Radio and station variants are recognized by a `radio` or `station`
/// segment anywhere before the id.
#[derive(Clone, Debug, Hash, PartialEq, Eq, SerializeDisplay, DeserializeFromStr)]
pub struct ContextUri {
    pub kind: ContextKind,
    pub id: String,
    pub radio: bool,
    uri: String,
}

impl ContextUri {
    /// Builds the radio URI for an item, such as
    /// `spotify:radio:artist:0OdUWJ0sBjDrqHygGUXeCF`.
    #[must_use]
    pub fn radio(kind: ContextKind, id: &str) -> Self {
        Self {
            kind,
            id: id.to_owned(),
            radio: true,
            uri: format!("{SCHEME}:radio:{kind}:{id}"),
        }
    }

    /// The URI as it was parsed or built.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.uri
    }
}

impl fmt::Display for ContextUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.uri)
    }
}

impl FromStr for ContextUri {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut segments: Vec<&str> = s.split(':').collect();
        if segments.len() < 3 || segments[0] != SCHEME {
            return Err(Error::invalid_argument(format!("not a context uri: {s}")));
        }

        let id = segments.pop().unwrap_or_default();
        if id.is_empty() {
            return Err(Error::invalid_argument(format!("context uri without id: {s}")));
        }

        let radio = segments
            .iter()
            .any(|segment| *segment == "radio" || *segment == "station");

        // The kind is the last recognizable segment: in
        // `spotify:user:someone:playlist:<id>` that is `playlist`.
        let kind = segments
            .iter()
            .rev()
            .find_map(|segment| segment.parse::<ContextKind>().ok())
            .ok_or_else(|| Error::invalid_argument(format!("unsupported context uri: {s}")))?;

        Ok(Self {
            kind,
            id: id.to_owned(),
            radio,
            uri: s.to_owned(),
        })
    }
}

/// Returns the id part of a URI such as `spotify:track:<id>`.
#[must_use]
pub fn id_of(uri: &str) -> &str {
    uri.rsplit(':').next().unwrap_or(uri)
}
