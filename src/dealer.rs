//! Supervisor of the realtime push connection ("dealer").
//!
//! The supervisor owns one websocket connection at a time and keeps it
//! alive for the life of the process:
//!
//! 1. Connect with the current web token
//! 2. Wait for the handshake message carrying the connection id
//! 3. Register the connection for notifications, join the connect-state
//!    cluster and seed the playback state from its snapshot
//! 4. Forward cluster updates that concern the preferred device
//!
//! Liveness is checked by an application-level ping on a fixed interval:
//! when the echo of one ping has not arrived by the time the next one is
//! due, the connection is closed. Any close, error or failed handshake ends
//! the connection, and a new one is made after a fixed delay. There is no
//! limit on reconnects.
//!
//! Player states are handed to the [`NowPlaying`] updater through a
//! latest-wins channel, so slow lookups never stall the heartbeat.

use std::{ops::ControlFlow, sync::Arc, time::Duration};

use futures_util::{stream::SplitSink, SinkExt, StreamExt};
use tokio::{
    net::TcpStream,
    sync::watch,
    time::{Instant, MissedTickBehavior},
};
use tokio_tungstenite::{tungstenite::Message as WebsocketMessage, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::{
    config::Config,
    connect::ConnectApi,
    credentials::{Credentials, TokenKind},
    error::{Error, ErrorKind, Result},
    now_playing::NowPlaying,
    protocol::{
        connect_state::PlayerState,
        dealer::{Frame, Message, PING},
    },
};

type WebsocketSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, WebsocketMessage>;

/// Messages beyond this size are dropped unparsed.
const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Lifecycle of the realtime connection.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Handshaking,
    Live {
        connection_id: String,
    },
}

impl ConnectionState {
    /// The connection id while live.
    #[must_use]
    pub fn connection_id(&self) -> Option<&str> {
        match self {
            Self::Live { connection_id } => Some(connection_id),
            _ => None,
        }
    }
}

pub struct Supervisor {
    url: Url,
    device_id: String,
    heartbeat_interval: Duration,
    reconnect_delay: Duration,
    stale_after: Duration,
    credentials: Arc<Credentials>,
    connect: Arc<dyn ConnectApi>,
    model: Arc<NowPlaying>,
    updates: Arc<watch::Sender<Option<PlayerState>>>,
    state: watch::Sender<ConnectionState>,
}

impl Supervisor {
    /// Creates a supervisor and the receiving end of the player states it
    /// forwards, to be passed to [`NowPlaying::run`].
    #[must_use]
    pub fn new(
        config: &Config,
        credentials: Arc<Credentials>,
        connect: Arc<dyn ConnectApi>,
        model: Arc<NowPlaying>,
    ) -> (Self, watch::Receiver<Option<PlayerState>>) {
        let (updates, receiver) = watch::channel(None);
        let (state, _) = watch::channel(ConnectionState::Disconnected);

        let supervisor = Self {
            url: config.endpoints.dealer.clone(),
            device_id: config.preferred_device_id.clone(),
            heartbeat_interval: config.timings.heartbeat_interval,
            reconnect_delay: config.timings.reconnect_delay,
            stale_after: config.timings.stale_after,
            credentials,
            connect,
            model,
            updates: Arc::new(updates),
            state,
        };

        (supervisor, receiver)
    }

    /// Receiver of connection state changes.
    #[must_use]
    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                trace!("dealer {current:?} -> {state:?}");
                *current = state;
                true
            }
        });
    }

    /// Keeps a connection up until cancelled.
    pub async fn run(&self, cancel: CancellationToken) {
        loop {
            let result = tokio::select! {
                biased;

                () = cancel.cancelled() => break,
                result = self.connect_once() => result,
            };

            self.set_state(ConnectionState::Disconnected);
            match result {
                Ok(()) => info!("dealer connection closed"),
                Err(e) => {
                    warn!("dealer connection lost: {e}");
                    if e.kind == ErrorKind::Unauthorized {
                        if let Err(e) = self.credentials.refresh(TokenKind::Web).await {
                            warn!("{e}");
                        }
                    }
                }
            }

            debug!(
                "reconnecting in {} ms",
                self.reconnect_delay.as_millis()
            );
            tokio::select! {
                biased;

                () = cancel.cancelled() => break,
                () = tokio::time::sleep(self.reconnect_delay) => {}
            }
        }

        self.set_state(ConnectionState::Disconnected);
        debug!("dealer supervisor stopped");
    }

    /// Runs one connection from connect to close.
    async fn connect_once(&self) -> Result<()> {
        self.set_state(ConnectionState::Connecting);

        let token = self.credentials.token(TokenKind::Web).await?;
        let mut url = self.url.clone();
        url.query_pairs_mut().append_pair("access_token", &token);

        let (ws_stream, _) = tokio_tungstenite::connect_async(url.as_str()).await?;
        let (ws_tx, mut ws_rx) = ws_stream.split();
        self.set_state(ConnectionState::Handshaking);
        debug!("dealer connected, awaiting handshake");

        let mut connection = Connection {
            supervisor: self,
            ws_tx,
            alive: true,
            connection_id: None,
            last_resync: None,
        };

        let mut heartbeat = tokio::time::interval_at(
            Instant::now() + self.heartbeat_interval,
            self.heartbeat_interval,
        );
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = heartbeat.tick() => connection.heartbeat().await?,

                message = ws_rx.next() => match message {
                    Some(Ok(message)) => {
                        if connection.handle_message(message).await?.is_break() {
                            return Ok(());
                        }
                    }
                    Some(Err(e)) => return Err(e.into()),
                    None => return Ok(()),
                }
            }
        }
    }
}

/// State of one websocket connection.
struct Connection<'a> {
    supervisor: &'a Supervisor,
    ws_tx: WebsocketSink,
    alive: bool,
    connection_id: Option<String>,
    last_resync: Option<Instant>,
}

impl Connection<'_> {
    async fn heartbeat(&mut self) -> Result<()> {
        if !self.alive {
            if let Err(e) = self.ws_tx.close().await {
                trace!("closing unresponsive connection: {e}");
            }
            return Err(Error::deadline_exceeded("heartbeat not echoed"));
        }

        self.alive = false;
        self.ws_tx.send(WebsocketMessage::Text(PING.into())).await?;

        self.resync_if_stale();
        Ok(())
    }

    /// Refreshes the playback state from a cluster snapshot when no update
    /// arrived within the staleness window. At most one resync is started
    /// per window.
    fn resync_if_stale(&mut self) {
        let supervisor = self.supervisor;
        let Some(connection_id) = self.connection_id.clone() else {
            return;
        };
        if !supervisor.model.is_stale(supervisor.stale_after)
            || self
                .last_resync
                .is_some_and(|last| last.elapsed() < supervisor.stale_after)
        {
            return;
        }

        debug!("playback state is stale, resyncing");
        self.last_resync = Some(Instant::now());

        let connect = Arc::clone(&supervisor.connect);
        let updates = Arc::clone(&supervisor.updates);
        tokio::spawn(async move {
            match connect.connect_state(&connection_id).await {
                Ok(cluster) => {
                    if let Some(player_state) = cluster.player_state {
                        updates.send_replace(Some(player_state));
                    }
                }
                Err(e) => warn!("resync failed: {e}"),
            }
        });
    }

    async fn handle_message(&mut self, message: WebsocketMessage) -> Result<ControlFlow<()>> {
        let message_size = message.len();
        if message_size > MAX_MESSAGE_SIZE {
            error!("ignoring oversized message with {message_size} bytes");
            return Ok(ControlFlow::Continue(()));
        }

        match message {
            WebsocketMessage::Text(text) => match serde_json::from_str::<Frame>(&text) {
                Ok(Frame::Pong) => {
                    trace!("pong");
                    self.alive = true;
                }
                Ok(Frame::Message(message)) => self.dispatch(message).await?,
                Ok(frame) => trace!("ignoring {frame:?}"),
                Err(e) => debug!("error parsing message: {e}"),
            },
            WebsocketMessage::Close(payload) => {
                info!("connection closed by server: {payload:?}");
                return Ok(ControlFlow::Break(()));
            }
            // Websocket pings are answered by the protocol layer.
            _ => trace!("ignoring {message:?}"),
        }

        Ok(ControlFlow::Continue(()))
    }

    async fn dispatch(&mut self, message: Message) -> Result<()> {
        if let Some(connection_id) = message.connection_id() {
            return self.handshake(connection_id.to_owned()).await;
        }

        let device_id = self.supervisor.device_id.as_str();
        for update in message.cluster_updates() {
            if !update.mentions(device_id) {
                trace!("ignoring cluster update for {:?}", update.devices_that_changed);
                continue;
            }

            if let Some(player_state) = update.cluster.player_state {
                debug!(
                    "cluster update: {}",
                    update.update_reason.as_deref().unwrap_or("unknown reason")
                );
                self.supervisor.updates.send_replace(Some(player_state));
            }
        }

        Ok(())
    }

    /// Registers the connection and seeds the playback state. Failure ends
    /// the connection.
    async fn handshake(&mut self, connection_id: String) -> Result<()> {
        let supervisor = self.supervisor;
        debug!("registering dealer connection");

        supervisor
            .connect
            .register_notifications(&connection_id)
            .await?;
        let cluster = supervisor.connect.connect_state(&connection_id).await?;
        if let Some(player_state) = cluster.player_state {
            supervisor.updates.send_replace(Some(player_state));
        }

        self.last_resync = Some(Instant::now());
        self.connection_id = Some(connection_id.clone());
        supervisor.set_state(ConnectionState::Live { connection_id });
        info!("dealer live");

        Ok(())
    }
}
