//! Connect-state documents of the web player.
//!
//! The connect-state service keeps a *cluster* per account: the set of
//! connected devices and the shared player state. Clusters arrive in two
//! ways:
//! * as the response to registering a device with
//!   `PUT /connect-state/v1/devices/{device}`
//! * inside realtime cluster updates pushed over the dealer connection
//!
//! # Example
//!
//! ```json
//! {
//!     "active_device_id": "d1e2",
//!     "player_state": {
//!         "context_uri": "spotify:playlist:37i9dQZF1DXcBWIGoYBM5M",
//!         "is_playing": true,
//!         "track": { "uri": "spotify:track:6rqh", "metadata": {} },
//!         "next_tracks": [
//!             { "uri": "spotify:track:1a2b", "metadata": { "is_queued": "true" } },
//!             { "uri": "spotify:track:3c4d", "metadata": {} }
//!         ]
//!     }
//! }
//! ```

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Cluster snapshot.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
pub struct Cluster {
    #[serde(default)]
    pub active_device_id: Option<String>,

    #[serde(default)]
    pub player_state: Option<PlayerState>,
}

/// Shared player state of a cluster.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PlayerState {
    pub context_uri: Option<String>,
    pub is_playing: bool,
    pub is_paused: bool,
    pub track: Option<ProvidedTrack>,
    pub next_tracks: Vec<ProvidedTrack>,
}

/// A track reference as placed in the player state by its provider.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
pub struct ProvidedTrack {
    pub uri: String,

    #[serde(default)]
    pub provider: Option<String>,

    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl ProvidedTrack {
    /// Whether a user explicitly queued this track, as opposed to it merely
    /// coming up next in the context.
    #[must_use]
    pub fn is_queued(&self) -> bool {
        self.metadata.get("is_queued").is_some_and(|flag| flag == "true")
    }
}

/// A realtime cluster update.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
pub struct ClusterUpdate {
    #[serde(default)]
    pub devices_that_changed: Vec<String>,

    #[serde(default)]
    pub cluster: Cluster,

    #[serde(default)]
    pub update_reason: Option<String>,
}

impl ClusterUpdate {
    /// Whether the update concerns `device_id`.
    #[must_use]
    pub fn mentions(&self, device_id: &str) -> bool {
        self.devices_that_changed.iter().any(|id| id == device_id)
    }
}

/// Request body to join the cluster as a hidden, non-playing member.
///
/// Joining is what makes the service push cluster updates to the
/// connection.
#[derive(Clone, Debug, Serialize)]
pub struct PutStateRequest {
    pub member_type: &'static str,
    pub device: DeviceRequest,
}

#[derive(Clone, Debug, Serialize)]
pub struct DeviceRequest {
    pub device_info: DeviceInfo,
}

#[derive(Clone, Debug, Serialize)]
pub struct DeviceInfo {
    pub capabilities: Capabilities,
}

#[derive(Copy, Clone, Debug, Serialize)]
pub struct Capabilities {
    pub can_be_player: bool,
    pub hidden: bool,
}

impl PutStateRequest {
    #[must_use]
    pub fn observer() -> Self {
        Self {
            member_type: "CONNECT_STATE",
            device: DeviceRequest {
                device_info: DeviceInfo {
                    capabilities: Capabilities {
                        can_be_player: false,
                        hidden: true,
                    },
                },
            },
        }
    }
}

/// Player command that starts a context on another device. Unlike the
/// official API this accepts radio contexts.
#[derive(Clone, Debug, Serialize)]
pub struct PlayCommand {
    pub command: CommandBody,
}

#[derive(Clone, Debug, Serialize)]
pub struct CommandBody {
    pub context: CommandContext,
    pub play_origin: PlayOrigin,
    pub options: CommandOptions,
    pub endpoint: &'static str,
}

#[derive(Clone, Debug, Serialize)]
pub struct CommandContext {
    pub uri: String,
    pub url: String,
    pub metadata: HashMap<String, String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct PlayOrigin {
    pub feature_identifier: &'static str,
    pub feature_version: &'static str,
}

#[derive(Clone, Debug, Serialize)]
pub struct CommandOptions {
    pub license: &'static str,
    pub skip_to: HashMap<String, String>,
    pub player_options_override: PlayerOptionsOverride,
}

#[derive(Copy, Clone, Debug, Serialize)]
pub struct PlayerOptionsOverride {
    pub repeating_track: bool,
    pub repeating_context: bool,
}

impl PlayCommand {
    /// Builds a command that plays `uri` with context repeat on.
    #[must_use]
    pub fn play(uri: &str) -> Self {
        Self {
            command: CommandBody {
                context: CommandContext {
                    uri: uri.to_owned(),
                    url: format!("context://{uri}"),
                    metadata: HashMap::new(),
                },
                play_origin: PlayOrigin {
                    feature_identifier: "harmony",
                    feature_version: "4.9.0-d242618",
                },
                options: CommandOptions {
                    license: "premium",
                    skip_to: HashMap::new(),
                    player_options_override: PlayerOptionsOverride {
                        repeating_track: false,
                        repeating_context: true,
                    },
                },
                endpoint: "play",
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queued_flag_is_read_from_metadata() {
        let state: PlayerState = serde_json::from_str(
            r#"{
                "track": { "uri": "spotify:track:now", "metadata": {} },
                "next_tracks": [
                    { "uri": "spotify:track:a", "metadata": { "is_queued": "true" } },
                    { "uri": "spotify:track:b", "metadata": { "is_queued": "false" } },
                    { "uri": "spotify:track:c" }
                ]
            }"#,
        )
        .unwrap();

        let queued: Vec<_> = state
            .next_tracks
            .iter()
            .filter(|track| track.is_queued())
            .map(|track| track.uri.as_str())
            .collect();
        assert_eq!(queued, vec!["spotify:track:a"]);
    }

    #[test]
    fn play_command_layout() {
        let json = serde_json::to_value(PlayCommand::play("spotify:radio:artist:x")).unwrap();

        assert_eq!(json["command"]["endpoint"], "play");
        assert_eq!(json["command"]["context"]["url"], "context://spotify:radio:artist:x");
        assert_eq!(
            json["command"]["options"]["player_options_override"]["repeating_context"],
            true
        );
    }

    #[test]
    fn observer_is_hidden() {
        let json = serde_json::to_value(PutStateRequest::observer()).unwrap();
        assert_eq!(json["member_type"], "CONNECT_STATE");
        assert_eq!(json["device"]["device_info"]["capabilities"]["hidden"], true);
        assert_eq!(
            json["device"]["device_info"]["capabilities"]["can_be_player"],
            false
        );
    }
}
