//! Per-connection session control.
//!
//! A session moves through
//! `AwaitingHandshake -> Authenticating -> Connecting -> Relaying -> Closed`.
//! Any failure jumps straight to `Closed`, closing the inbound websocket and
//! the outbound stream if it was opened. Nothing is reported to the client
//! beyond the closure.

use std::future::Future;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio_tungstenite::{WebSocketStream, tungstenite::Message};
use tracing::{debug, info, warn};

use crate::{
    auth::Identity,
    dialer::Dialer,
    error::SessionError,
    header::parse_handshake,
    relay::{RelayOutcome, relay},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    AwaitingHandshake,
    Authenticating,
    Connecting,
    Relaying,
    Closed,
}

impl SessionState {
    fn advance(&mut self, next: Self) {
        if *self == Self::Closed {
            return;
        }
        let from = *self;
        debug!(from = ?from, to = ?next, "Session state change");
        *self = next;
    }
}

/// Runs sessions against one configured identity and dialer.
///
/// Sessions share nothing except this controller, which is immutable.
pub struct SessionController<D> {
    identity: Identity,
    dialer: D,
}

impl<D: Dialer> SessionController<D> {
    pub const fn new(identity: Identity, dialer: D) -> Self {
        Self { identity, dialer }
    }

    /// Drives one accepted websocket to completion.
    ///
    /// Resolving `shutdown` at any point tears the session down.
    pub async fn run<S, F>(
        &self,
        mut websocket: WebSocketStream<S>,
        shutdown: F,
    ) -> Result<RelayOutcome, SessionError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
        F: Future<Output = ()>,
    {
        let mut state = SessionState::AwaitingHandshake;
        tokio::pin!(shutdown);

        let connected = tokio::select! {
            result = self.connect(&mut state, &mut websocket) => result,
            () = &mut shutdown => Err(SessionError::Shutdown),
        };

        let outbound = match connected {
            Ok(outbound) => outbound,
            Err(e) => {
                if let Err(close_err) = websocket.close(None).await {
                    debug!("WebSocket already closed: {close_err}");
                }
                state.advance(SessionState::Closed);
                return Err(e);
            }
        };

        state.advance(SessionState::Relaying);
        let result = relay(websocket, outbound, shutdown).await;
        state.advance(SessionState::Closed);
        result
    }

    /// Handshake through to a connected, acknowledged outbound stream.
    async fn connect<S>(
        &self,
        state: &mut SessionState,
        websocket: &mut WebSocketStream<S>,
    ) -> Result<D::Conn, SessionError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let first = read_first_message(websocket).await?;

        state.advance(SessionState::Authenticating);
        let handshake = parse_handshake(&first)?;
        self.identity.verify(&handshake.identifier)?;

        state.advance(SessionState::Connecting);
        let target = handshake.destination.to_string();
        debug!(target = %target, "Attempting to connect to destination");
        let mut outbound = self
            .dialer
            .dial(&handshake.destination)
            .await
            .map_err(|source| SessionError::DialFailure {
                target: target.clone(),
                source,
            })?;
        info!(target = %target, "Connected to destination");

        if let Err(e) = websocket
            .send(Message::Binary(handshake.ack().to_vec().into()))
            .await
        {
            close_outbound(&mut outbound).await;
            return Err(e.into());
        }

        if !handshake.payload.is_empty() {
            debug!(bytes = handshake.payload.len(), "Forwarding handshake payload");
            if let Err(e) = outbound.write_all(&handshake.payload).await {
                close_outbound(&mut outbound).await;
                return Err(SessionError::RelayFailure(format!(
                    "failed to forward handshake payload: {e}"
                )));
            }
        }

        Ok(outbound)
    }
}

async fn read_first_message<S>(websocket: &mut WebSocketStream<S>) -> Result<Vec<u8>, SessionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    while let Some(msg) = websocket.next().await {
        match msg? {
            Message::Binary(data) => return Ok(data.into()),
            Message::Text(_) => warn!("Ignoring text message before handshake"),
            Message::Close(_) => break,
            _ => {}
        }
    }
    Err(SessionError::NoHandshake)
}

async fn close_outbound<O: AsyncWrite + Unpin>(outbound: &mut O) {
    if let Err(e) = outbound.shutdown().await {
        debug!("Destination already closed: {e}");
    }
}
