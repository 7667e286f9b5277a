//! Frames on the realtime push connection ("dealer").
//!
//! All frames are JSON text messages with a `type` discriminator:
//!
//! ```json
//! {"type":"ping"}
//! {"type":"pong"}
//! {"type":"message","uri":"hm://pusher/v1/connections/...","headers":{"Spotify-Connection-Id":"..."}}
//! {"type":"message","uri":"hm://connect-state/v1/cluster","payloads":[{"cluster":{...},"devices_that_changed":["d1e2"]}]}
//! ```
//!
//! The first message after connecting carries the connection id that
//! subsequent registrations refer to. Cluster payloads are inline JSON
//! objects or base64 strings. With a `Transfer-Encoding: gzip` header the
//! base64 strings hold gzipped JSON.

use std::{collections::HashMap, io::Read};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use flate2::read::GzDecoder;
use serde::Deserialize;

use super::connect_state::ClusterUpdate;
use crate::error::{Error, Result};

/// Heartbeat frame sent by the client.
pub const PING: &str = r#"{"type":"ping"}"#;

/// Header carrying the connection id on the handshake message.
pub const CONNECTION_ID_HEADER: &str = "Spotify-Connection-Id";

/// Inbound frame.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Frame {
    Ping,
    Pong,
    Message(Message),
    #[serde(other)]
    Other,
}

/// A pushed message.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct Message {
    pub uri: String,
    pub method: Option<String>,
    pub headers: HashMap<String, String>,
    pub payloads: Vec<serde_json::Value>,
}

impl Message {
    /// The connection id, if this is the handshake message.
    #[must_use]
    pub fn connection_id(&self) -> Option<&str> {
        self.headers
            .get(CONNECTION_ID_HEADER)
            .map(String::as_str)
            .filter(|id| !id.is_empty())
    }

    /// Cluster updates in this message.
    ///
    /// Payloads that are not cluster updates, or that cannot be decoded, are
    /// skipped.
    #[must_use]
    pub fn cluster_updates(&self) -> Vec<ClusterUpdate> {
        let gzipped = self
            .headers
            .get("Transfer-Encoding")
            .is_some_and(|encoding| encoding.eq_ignore_ascii_case("gzip"));

        self.payloads
            .iter()
            .filter_map(|payload| match Self::decode(payload, gzipped) {
                Ok(update) => Some(update),
                Err(e) => {
                    debug!("{}: skipping payload: {e}", self.uri);
                    None
                }
            })
            .collect()
    }

    fn decode(payload: &serde_json::Value, gzipped: bool) -> Result<ClusterUpdate> {
        match payload {
            serde_json::Value::String(encoded) => {
                let decoded = BASE64.decode(encoded).map_err(Error::invalid_argument)?;
                if !gzipped {
                    return Ok(serde_json::from_slice(&decoded)?);
                }

                let mut inflater = GzDecoder::new(&decoded[..]);
                let mut buffer: Vec<u8> = vec![];
                inflater
                    .read_to_end(&mut buffer)
                    .map_err(|e| Error::data_loss(format!("error inflating payload: {e}")))?;
                Ok(serde_json::from_slice(&buffer)?)
            }
            other => Ok(ClusterUpdate::deserialize(other)?),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_heartbeat_echo() {
        let frame: Frame = serde_json::from_str(r#"{"type":"pong"}"#).unwrap();
        assert_eq!(frame, Frame::Pong);
    }

    #[test]
    fn unknown_types_are_tolerated() {
        let frame: Frame = serde_json::from_str(r#"{"type":"request","key":"x"}"#).unwrap();
        assert_eq!(frame, Frame::Other);
    }

    #[test]
    fn handshake_carries_connection_id() {
        let frame: Frame = serde_json::from_str(
            r#"{
                "type": "message",
                "method": "PUT",
                "uri": "hm://pusher/v1/connections/abc",
                "headers": { "Spotify-Connection-Id": "abc%3D%3D" }
            }"#,
        )
        .unwrap();

        let Frame::Message(message) = frame else {
            panic!("expected message");
        };
        assert_eq!(message.connection_id(), Some("abc%3D%3D"));
        assert!(message.cluster_updates().is_empty());
    }

    #[test]
    fn decodes_inline_and_encoded_cluster_updates() {
        let inline = r#"{"devices_that_changed":["d1"],"cluster":{"player_state":{"is_playing":true}}}"#;
        let encoded = BASE64.encode(r#"{"devices_that_changed":["d2"],"cluster":{}}"#);
        let json = format!(
            r#"{{"type":"message","uri":"hm://connect-state/v1/cluster","payloads":[{inline},"{encoded}",42]}}"#
        );

        let Frame::Message(message) = serde_json::from_str(&json).unwrap() else {
            panic!("expected message");
        };
        let updates = message.cluster_updates();

        assert_eq!(updates.len(), 2);
        assert!(updates[0].mentions("d1"));
        assert!(updates[0].cluster.player_state.as_ref().unwrap().is_playing);
        assert!(updates[1].mentions("d2"));
        assert!(message.connection_id().is_none());
    }

    #[test]
    fn inflates_gzipped_cluster_updates() {
        use std::io::Write;

        use flate2::{write::GzEncoder, Compression};

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(br#"{"devices_that_changed":["d3"],"cluster":{"player_state":{"is_playing":true}}}"#)
            .unwrap();
        let encoded = BASE64.encode(encoder.finish().unwrap());
        let json = format!(
            r#"{{"type":"message","uri":"hm://connect-state/v1/cluster","headers":{{"Transfer-Encoding":"gzip"}},"payloads":["{encoded}","bm90IGd6aXA="]}}"#
        );

        let Frame::Message(message) = serde_json::from_str(&json).unwrap() else {
            panic!("expected message");
        };
        let updates = message.cluster_updates();

        assert_eq!(updates.len(), 1);
        assert!(updates[0].mentions("d3"));
        assert!(updates[0].cluster.player_state.as_ref().unwrap().is_playing);
    }
}
