//! Spotify playback engine for a chat bot.
//!
//! Keeps a Spotify account's playback under the bot's control and its view
//! of what is playing current:
//!
//! * [`jukebox`] - the operations message handlers call, and the [`Engine`]
//!   that wires them to the services
//! * [`dealer`] - the realtime connection that pushes player state changes
//! * [`now_playing`] - the resolved playback state readers consult
//! * [`verifier`] - recovery of a device that stopped playing
//! * [`credentials`] and [`accounts`] - the two bearer tokens and their
//!   refresh
//! * [`automation`] - the serialized browser session used for login and for
//!   what the published API cannot do
//!
//! [`Engine`]: jukebox::Engine
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]

#[macro_use]
extern crate log;

pub mod accounts;
pub mod api;
pub mod automation;
pub mod config;
pub mod connect;
pub mod credentials;
pub mod dealer;
pub mod error;
pub mod http;
pub mod jukebox;
pub mod now_playing;
pub mod protocol;
pub mod retry;
pub mod signal;
pub mod verifier;

#[cfg(test)]
mod testing;
