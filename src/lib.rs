//! WebSocket Tunnel Relay
//!
//! Accepts upgraded WebSocket connections, authenticates each client by a fixed
//! 16-byte identifier carried in its first binary message, dials the destination
//! named in that message and relays bytes in both directions until either side
//! closes.

pub mod auth;
pub mod config;
pub mod dialer;
pub mod error;
pub mod header;
pub mod http;
pub mod relay;
pub mod security;
pub mod server;
pub mod session;
pub mod stream;
pub mod tls;

// Re-export commonly used types and functions
pub use auth::Identity;
pub use config::{AuthConfig, Config, DEFAULT_CONFIG_PATH, ListenConfig, TlsConfig, load_config, parse_config};
pub use dialer::{Dialer, TcpDialer};
pub use error::{HeaderError, SessionError};
pub use header::{AddressFamily, Destination, Handshake, parse_handshake};
pub use relay::{BUFFER_SIZE, RelayEnd, RelayOutcome, relay};
pub use server::{Server, handle_connection};
pub use session::{SessionController, SessionState};
pub use stream::{InboundStream, PrefixedStream};
pub use tls::load_tls_acceptor;
