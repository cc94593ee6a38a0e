use std::future::Future;

use futures_util::{FutureExt, SinkExt, StreamExt};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    sync::mpsc,
};
use tokio_tungstenite::{
    WebSocketStream,
    tungstenite::{Error as TungsteniteError, Message, error::ProtocolError},
};
use tracing::{debug, error, info, warn};

use crate::error::SessionError;

pub const BUFFER_SIZE: usize = 8192;

/// Inbound frames waiting for the outbound writer.
const WRITE_QUEUE_CAPACITY: usize = 32;

/// Which side brought the relay down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayEnd {
    Inbound,
    Outbound,
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayOutcome {
    /// Bytes written to the destination.
    pub inbound_bytes: u64,
    /// Bytes sent back to the client.
    pub outbound_bytes: u64,
    pub ended_by: RelayEnd,
}

/// Pumps bytes between the client websocket and the destination until
/// either side ends or `shutdown` resolves, then closes both.
///
/// Writes to the destination go through a single writer fed by a bounded
/// queue, so inbound frames reach it in the order they were received.
pub async fn relay<S, O, F>(
    websocket: WebSocketStream<S>,
    outbound: O,
    shutdown: F,
) -> Result<RelayOutcome, SessionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
    O: AsyncRead + AsyncWrite + Unpin,
    F: Future<Output = ()>,
{
    let (mut ws_sender, ws_receiver) = websocket.split();
    let (mut out_reader, mut out_writer) = tokio::io::split(outbound);
    let (queue_tx, queue_rx) = mpsc::channel(WRITE_QUEUE_CAPACITY);

    let mut written = 0u64;
    let mut sent = 0u64;

    let ended = {
        let feed = async move {
            let mut ws_receiver = ws_receiver;
            loop {
                let msg = tokio::select! {
                    // The writer is gone, nothing left to feed.
                    () = queue_tx.closed() => break,
                    msg = ws_receiver.next() => msg,
                };
                match msg {
                    Some(Ok(Message::Binary(data))) => {
                        debug!(bytes = data.len(), "Queueing data from WebSocket to destination");
                        if queue_tx.send(data).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Text(_))) => {
                        warn!("Dropping text message (binary only)");
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!("WebSocket connection closed");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(
                        e @ (TungsteniteError::ConnectionClosed
                        | TungsteniteError::Protocol(ProtocolError::ResetWithoutClosingHandshake)),
                    )) => {
                        debug!("Client disconnected: {e}");
                        break;
                    }
                    Some(Err(e)) => {
                        error!("WebSocket error: {e}");
                        return Err(SessionError::RelayFailure(format!("websocket read failed: {e}")));
                    }
                }
            }
            Ok(())
        };

        let writer = &mut out_writer;
        let written_total = &mut written;
        let drain = async move {
            let mut queue_rx = queue_rx;
            while let Some(data) = queue_rx.recv().await {
                if let Err(e) = writer.write_all(&data).await {
                    error!(error = %e, bytes = data.len(), "Failed to write to destination");
                    return Err(SessionError::RelayFailure(format!(
                        "destination write failed: {e}"
                    )));
                }
                *written_total += data.len() as u64;
            }
            Ok(())
        };

        let to_destination = async {
            let (fed, drained) = tokio::join!(feed, drain);
            fed.and(drained)
        };

        let to_client = async {
            let mut buffer = vec![0u8; BUFFER_SIZE];

            loop {
                match out_reader.read(&mut buffer).await {
                    Ok(0) => {
                        info!("Destination connection closed");
                        break;
                    }
                    Ok(n) => {
                        debug!(bytes = n, "Forwarding data from destination to WebSocket");
                        match ws_sender.send(Message::Binary(buffer[..n].to_vec().into())).await {
                            Ok(()) => sent += n as u64,
                            // The client side is already closed.
                            Err(TungsteniteError::ConnectionClosed | TungsteniteError::AlreadyClosed) => {
                                debug!("WebSocket closed while forwarding, stopping");
                                break;
                            }
                            Err(e) => {
                                error!(error = %e, bytes = n, "Failed to send WebSocket message");
                                return Err(SessionError::RelayFailure(format!(
                                    "websocket send failed: {e}"
                                )));
                            }
                        }
                    }
                    Err(e) => {
                        error!("Failed to read from destination: {e}");
                        return Err(SessionError::RelayFailure(format!(
                            "destination read failed: {e}"
                        )));
                    }
                }
            }
            Ok(())
        };

        tokio::pin!(to_destination, to_client, shutdown);

        let (ended_by, first) = tokio::select! {
            result = &mut to_destination => (RelayEnd::Inbound, result),
            result = &mut to_client => (RelayEnd::Outbound, result),
            () = &mut shutdown => {
                info!("Shutdown requested, closing relay");
                (RelayEnd::Shutdown, Ok(()))
            }
        };

        // The other direction may have failed in the same wakeup; a failure
        // outranks a clean end.
        let concurrent_failure = match ended_by {
            RelayEnd::Inbound => to_client.as_mut().now_or_never().and_then(Result::err),
            RelayEnd::Outbound => to_destination.as_mut().now_or_never().and_then(Result::err),
            RelayEnd::Shutdown => None,
        };
        first.and(concurrent_failure.map_or(Ok(()), Err)).map(|()| ended_by)
    };

    // Single teardown point for both streams.
    if let Err(e) = ws_sender.close().await {
        debug!("WebSocket already closed: {e}");
    }
    if let Err(e) = out_writer.shutdown().await {
        debug!("Destination already closed: {e}");
    }

    ended.map(|ended_by| RelayOutcome {
        inbound_bytes: written,
        outbound_bytes: sent,
        ended_by,
    })
}
