use anyhow::{Context, Result};
use uuid::Uuid;

use crate::{error::SessionError, header::ID_LEN};

/// The single identifier clients must present in their handshake.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Identity {
    expected: [u8; ID_LEN],
}

impl Identity {
    /// Parses a UUID-like id: 32 hex digits, with hyphens anywhere ignored.
    pub fn parse(id: &str) -> Result<Self> {
        let compact: String = id.trim().chars().filter(|c| *c != '-').collect();
        let uuid = Uuid::try_parse(&compact)
            .with_context(|| format!("Invalid client id '{id}', expected a UUID"))?;
        Ok(Self::from_bytes(*uuid.as_bytes()))
    }

    #[must_use]
    pub const fn from_bytes(expected: [u8; ID_LEN]) -> Self {
        Self { expected }
    }

    /// Byte-for-byte comparison against the expected identifier.
    pub fn verify(&self, presented: &[u8; ID_LEN]) -> Result<(), SessionError> {
        if presented == &self.expected {
            Ok(())
        } else {
            Err(SessionError::AuthenticationFailure)
        }
    }
}

// Keeps the secret out of logs.
impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Identity(..)")
    }
}
