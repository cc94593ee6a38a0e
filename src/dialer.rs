use std::{future::Future, io};

use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpStream,
};
use tracing::debug;

use crate::header::Destination;

/// Opens the outbound stream for a session.
pub trait Dialer: Send + Sync {
    type Conn: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    fn dial(
        &self,
        destination: &Destination,
    ) -> impl Future<Output = io::Result<Self::Conn>> + Send;
}

/// Plain TCP dialer. Domain names are resolved by the system resolver.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpDialer;

impl Dialer for TcpDialer {
    type Conn = TcpStream;

    async fn dial(&self, destination: &Destination) -> io::Result<TcpStream> {
        let stream = TcpStream::connect((destination.host.as_str(), destination.port)).await?;
        if let Err(e) = stream.set_nodelay(true) {
            debug!(error = %e, "Failed to set TCP_NODELAY on outbound stream");
        }
        Ok(stream)
    }
}
