//! Playback verification and recovery.
//!
//! Before acting on playback the bot makes sure the preferred device is
//! playing something: it resumes what was last playing, or starts a
//! fallback context when there is nothing to resume. Afterwards context
//! repeat and shuffle are switched on where the player allows it.

use std::sync::Arc;

use crate::{
    api::WebApi,
    config::Config,
    credentials::TokenKind,
    error::{Error, Result},
    now_playing::NowPlaying,
    protocol::web_api::{Playback, RepeatState},
    retry::Retry,
};

pub struct Verifier {
    api: Arc<dyn WebApi>,
    retry: Retry,
    model: Arc<NowPlaying>,
    device_id: String,
    fallback_context_uri: Option<String>,
}

impl Verifier {
    #[must_use]
    pub fn new(config: &Config, api: Arc<dyn WebApi>, retry: Retry, model: Arc<NowPlaying>) -> Self {
        Self {
            api,
            retry,
            model,
            device_id: config.preferred_device_id.clone(),
            fallback_context_uri: config.fallback_context_uri.clone(),
        }
    }

    /// Makes the preferred device play.
    ///
    /// A device that is inactive or not playing is resumed when the player
    /// still holds a context or item. Otherwise the context last seen in the
    /// playback state is started, or the configured fallback context.
    ///
    /// # Errors
    ///
    /// * `DeviceNotFound` if the preferred device is not online
    /// * `NotFound` if there is nothing to resume and no context to start
    /// * errors of the underlying Web API calls
    pub async fn verify_and_recover(&self) -> Result<()> {
        let api = &*self.api;
        let official = TokenKind::Official;

        let devices = self.retry.run(official, move || api.devices()).await?;
        let device = devices
            .into_iter()
            .find(|device| device.id.as_deref() == Some(self.device_id.as_str()))
            .ok_or_else(|| {
                Error::device_not_found(format!("device {} is not online", self.device_id))
            })?;

        let playback = self.retry.run(official, move || api.playback()).await?;
        let is_playing = playback.as_ref().is_some_and(|playback| playback.is_playing);

        if !device.is_active || !is_playing {
            let device_id = self.device_id.as_str();
            if playback.as_ref().is_some_and(Playback::has_context) {
                info!("resuming playback on {}", device.name);
                self.retry
                    .run(official, move || api.play(device_id, None))
                    .await?;
            } else {
                let context_uri = self
                    .model
                    .context_uri()
                    .or_else(|| self.fallback_context_uri.clone())
                    .ok_or_else(|| Error::not_found("nothing to resume and no context to start"))?;

                info!("starting {context_uri} on {}", device.name);
                let context_uri = context_uri.as_str();
                self.retry
                    .run(official, move || api.play(device_id, Some(context_uri)))
                    .await?;
            }
        }

        self.force_repeat_shuffle(playback.as_ref()).await
    }

    /// Turns on context repeat and shuffle unless the player disallows
    /// toggling them. Fetches the playback when `playback` is `None`.
    ///
    /// # Errors
    ///
    /// Returns errors of the underlying Web API calls.
    pub async fn force_repeat_shuffle(&self, playback: Option<&Playback>) -> Result<()> {
        let api = &*self.api;
        let official = TokenKind::Official;

        let fetched;
        let playback = match playback {
            Some(playback) => playback,
            None => {
                fetched = self.retry.run(official, move || api.playback()).await?;
                match fetched.as_ref() {
                    Some(playback) => playback,
                    None => return Ok(()),
                }
            }
        };

        let disallows = playback.actions.disallows;
        if !disallows.toggling_repeat_context && playback.repeat_state == RepeatState::Off {
            debug!("turning on context repeat");
            self.retry
                .run(official, move || api.set_repeat(RepeatState::Context))
                .await?;
        }

        if !disallows.toggling_shuffle && !playback.shuffle_state {
            debug!("turning on shuffle");
            self.retry
                .run(official, move || api.set_shuffle(true))
                .await?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        credentials::tests::{config, credentials, CountingAuthorizer},
        error::ErrorKind,
        protocol::web_api::{Actions, Context, Disallows},
        testing::{player_state, track, FakeApi},
    };

    fn verifier(api: Arc<FakeApi>, fallback: Option<&str>) -> (Verifier, Arc<NowPlaying>) {
        let mut config = config(None);
        config.fallback_context_uri = fallback.map(ToOwned::to_owned);

        let credentials = Arc::new(credentials(Arc::new(CountingAuthorizer::default())));
        let retry = Retry::new(credentials, 3);
        let model = Arc::new(NowPlaying::new(api.clone(), retry.clone()));
        (Verifier::new(&config, api, retry, Arc::clone(&model)), model)
    }

    fn paused_with_context() -> Playback {
        Playback {
            is_playing: false,
            repeat_state: RepeatState::Context,
            shuffle_state: true,
            context: Some(Context {
                uri: "spotify:album:xx".to_owned(),
                kind: Some("album".to_owned()),
            }),
            item: Some(track("a", "Crystalised", &["The xx"])),
            ..Playback::default()
        }
    }

    #[tokio::test]
    async fn inactive_device_without_context_starts_fallback() {
        let api = Arc::new(FakeApi::with_device("kitchen", false));
        let (verifier, _) = verifier(api.clone(), Some("spotify:playlist:fallback"));

        verifier.verify_and_recover().await.unwrap();

        assert_eq!(api.commands(), vec!["play kitchen spotify:playlist:fallback"]);
    }

    #[tokio::test]
    async fn last_known_context_wins_over_fallback() {
        let api = FakeApi::with_device("kitchen", false);
        api.add_track("now", "Intro", &["The xx"]);
        let api = Arc::new(api);
        let (verifier, model) = verifier(api.clone(), Some("spotify:playlist:fallback"));
        api.playlists.lock().unwrap().insert(
            "friday".to_owned(),
            crate::protocol::web_api::Playlist {
                name: "Friday".to_owned(),
                ..Default::default()
            },
        );
        model
            .update(&player_state(Some("spotify:playlist:friday"), "now", &[]))
            .await
            .unwrap();

        verifier.verify_and_recover().await.unwrap();

        assert_eq!(api.commands(), vec!["play kitchen spotify:playlist:friday"]);
    }

    #[tokio::test]
    async fn paused_context_is_resumed() {
        let api = Arc::new(FakeApi::with_device("kitchen", true));
        *api.playback.lock().unwrap() = Some(paused_with_context());
        let (verifier, _) = verifier(api.clone(), Some("spotify:playlist:fallback"));

        verifier.verify_and_recover().await.unwrap();

        assert_eq!(api.commands(), vec!["resume kitchen"]);
    }

    #[tokio::test]
    async fn playing_device_is_left_alone_but_repeat_and_shuffle_forced() {
        let api = Arc::new(FakeApi::with_device("kitchen", true));
        *api.playback.lock().unwrap() = Some(Playback {
            is_playing: true,
            ..paused_with_context()
        });
        let (verifier, _) = verifier(api.clone(), None);

        verifier.verify_and_recover().await.unwrap();
        assert!(api.commands().is_empty());

        *api.playback.lock().unwrap() = Some(Playback {
            is_playing: true,
            repeat_state: RepeatState::Off,
            shuffle_state: false,
            ..paused_with_context()
        });
        verifier.verify_and_recover().await.unwrap();
        assert_eq!(api.commands(), vec!["repeat context", "shuffle true"]);
    }

    #[tokio::test]
    async fn disallowed_toggles_are_skipped() {
        let api = Arc::new(FakeApi::with_device("kitchen", true));
        let playback = Playback {
            is_playing: true,
            repeat_state: RepeatState::Off,
            shuffle_state: false,
            actions: Actions {
                disallows: Disallows {
                    toggling_repeat_context: true,
                    toggling_shuffle: true,
                    ..Disallows::default()
                },
            },
            ..paused_with_context()
        };
        let (verifier, _) = verifier(api.clone(), None);

        verifier.force_repeat_shuffle(Some(&playback)).await.unwrap();

        assert!(api.commands().is_empty());
    }

    #[tokio::test]
    async fn missing_device_is_fatal() {
        let api = Arc::new(FakeApi::with_device("living-room", true));
        let (verifier, _) = verifier(api.clone(), Some("spotify:playlist:fallback"));

        let err = verifier.verify_and_recover().await.unwrap_err();

        assert_eq!(err.kind, ErrorKind::DeviceNotFound);
        assert!(api.commands().is_empty());
    }

    #[tokio::test]
    async fn nothing_to_start_is_reported() {
        let api = Arc::new(FakeApi::with_device("kitchen", false));
        let (verifier, _) = verifier(api.clone(), None);

        let err = verifier.verify_and_recover().await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
    }
}
