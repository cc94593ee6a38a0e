use std::{future::Future, net::SocketAddr, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use ipnet::IpNet;
use tokio::{
    io::AsyncWriteExt,
    net::{TcpListener, TcpStream},
    sync::broadcast,
    task::JoinSet,
    time::timeout,
};
use tokio_rustls::TlsAcceptor;
use tokio_tungstenite::accept_async;
use tracing::{debug, info, warn};

use crate::{
    config::Config,
    dialer::{Dialer, TcpDialer},
    http::{NOT_FOUND_RESPONSE, RequestHead, read_request_head},
    security::{is_proxy_ip_allowed, parse_original_client_ip},
    session::SessionController,
    stream::{InboundStream, PrefixedStream},
    tls::load_tls_acceptor,
};

/// How long live sessions get to close after shutdown before they are aborted.
pub const SHUTDOWN_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Accepts client connections and runs one session per connection.
pub struct Server<D = TcpDialer> {
    listener: TcpListener,
    tls: Option<TlsAcceptor>,
    allowlist: Option<Arc<[IpNet]>>,
    controller: Arc<SessionController<D>>,
}

impl Server<TcpDialer> {
    pub async fn bind(config: &Config) -> Result<Self> {
        Self::bind_with_dialer(config, TcpDialer).await
    }
}

impl<D: Dialer + 'static> Server<D> {
    pub async fn bind_with_dialer(config: &Config, dialer: D) -> Result<Self> {
        let identity = config.identity()?;
        let allowlist = config.allowlist()?.map(Arc::from);
        let tls = config
            .listen
            .tls
            .as_ref()
            .map(load_tls_acceptor)
            .transpose()?;

        let addr = config.listen_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("Failed to bind to address {addr}"))?;

        Ok(Self {
            listener,
            tls,
            allowlist,
            controller: Arc::new(SessionController::new(identity, dialer)),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .context("Failed to get listener local address")
    }

    /// Accepts connections until `shutdown` resolves, then signals every
    /// live session to tear down and waits for them to finish.
    pub async fn run<F: Future<Output = ()>>(self, shutdown: F) -> Result<()> {
        let (stop_tx, _) = broadcast::channel::<()>(1);
        let mut sessions = JoinSet::new();
        tokio::pin!(shutdown);

        info!(
            listen_addr = %self.local_addr()?,
            tls = self.tls.is_some(),
            "WebSocket tunnel relay listening"
        );

        loop {
            let (stream, peer_addr) = tokio::select! {
                () = &mut shutdown => break,
                // Reap finished sessions so the set only holds live ones.
                Some(_) = sessions.join_next(), if !sessions.is_empty() => continue,
                accepted = self.listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!(error = %e, "Failed to accept connection");
                        continue;
                    }
                },
            };

            if !is_proxy_ip_allowed(peer_addr.ip(), self.allowlist.as_deref()) {
                warn!(client_addr = %peer_addr, "Rejected connection from address outside allowed_proxy_ips");
                continue;
            }

            let tls = self.tls.clone();
            let controller = Arc::clone(&self.controller);
            let mut stop_rx = stop_tx.subscribe();

            sessions.spawn(async move {
                let shutdown = async move {
                    let _ = stop_rx.recv().await;
                };
                if let Err(e) = handle_connection(stream, peer_addr, tls, &controller, shutdown).await {
                    debug!(client_addr = %peer_addr, error = %format!("{e:#}"), "Connection ended with error");
                }
            });
        }

        drop(self.listener);
        info!(live_sessions = sessions.len(), "Shutting down, closing live sessions");
        let _ = stop_tx.send(());

        let drain = async {
            while sessions.join_next().await.is_some() {}
        };
        if timeout(SHUTDOWN_DRAIN_TIMEOUT, drain).await.is_err() {
            warn!(
                live_sessions = sessions.len(),
                "Sessions still open after {SHUTDOWN_DRAIN_TIMEOUT:?}, aborting them"
            );
            sessions.shutdown().await;
        }
        info!("All sessions closed");
        Ok(())
    }
}

#[tracing::instrument(skip_all, fields(client_addr = %peer_addr))]
pub async fn handle_connection<D, F>(
    tcp: TcpStream,
    peer_addr: SocketAddr,
    tls: Option<TlsAcceptor>,
    controller: &SessionController<D>,
    shutdown: F,
) -> Result<()>
where
    D: Dialer,
    F: Future<Output = ()>,
{
    if let Err(e) = tcp.set_nodelay(true) {
        debug!(error = %e, "Failed to set TCP_NODELAY on inbound stream");
    }

    let mut stream = match tls {
        Some(acceptor) => InboundStream::Tls(Box::new(
            acceptor
                .accept(tcp)
                .await
                .context("Failed to perform TLS handshake")?,
        )),
        None => InboundStream::Plain(tcp),
    };

    let head_bytes = read_request_head(&mut stream).await?;
    let head = RequestHead::parse(&head_bytes).unwrap_or_default();
    if !head.is_websocket_upgrade() {
        debug!(method = head.method(), path = head.path(), "Request without websocket upgrade, responding 404");
        stream.write_all(NOT_FOUND_RESPONSE).await?;
        stream.shutdown().await?;
        return Ok(());
    }

    // Log with original client IP if available, otherwise use direct connection IP
    let client_ip = head
        .header("x-forwarded-for")
        .and_then(parse_original_client_ip)
        .unwrap_or_else(|| peer_addr.ip().to_string());

    let websocket = accept_async(PrefixedStream::new(head_bytes, stream))
        .await
        .context("Failed to perform WebSocket handshake")?;
    debug!(client_ip = %client_ip, "WebSocket connection accepted");

    match controller.run(websocket, shutdown).await {
        Ok(outcome) => {
            info!(
                client_ip = %client_ip,
                inbound_bytes = outcome.inbound_bytes,
                outbound_bytes = outcome.outbound_bytes,
                ended_by = ?outcome.ended_by,
                "Proxy connection closed"
            );
            Ok(())
        }
        Err(e) => {
            warn!(client_ip = %client_ip, error = %e, "Session failed");
            Err(e).context("Session terminated")
        }
    }
}
