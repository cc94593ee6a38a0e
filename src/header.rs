//! Handshake header parsing.
//!
//! The first binary message on an inbound connection carries the client
//! identifier and the destination to dial:
//!
//! ```text
//! | ver | id  | addon len | addon | cmd | port  | atyp | address  | payload   |
//! | u8  | 16  | u8        | N     | u8  | u16be | u8   | variable | remainder |
//! ```
//!
//! Address encodings by ATYP: `1` = IPv4 (4 bytes), `2` = domain (u8 length
//! followed by the name), `3` = IPv6 (16 bytes).

use std::fmt;

use crate::error::HeaderError;

pub const ID_LEN: usize = 16;

const ATYP_IPV4: u8 = 1;
const ATYP_DOMAIN: u8 = 2;
const ATYP_IPV6: u8 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressFamily {
    Ipv4,
    DomainName,
    Ipv6,
}

impl AddressFamily {
    fn from_tag(tag: u8) -> Result<Self, HeaderError> {
        match tag {
            ATYP_IPV4 => Ok(Self::Ipv4),
            ATYP_DOMAIN => Ok(Self::DomainName),
            ATYP_IPV6 => Ok(Self::Ipv6),
            other => Err(HeaderError::UnknownAddressType(other)),
        }
    }
}

/// Where the relay should connect for this session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    pub family: AddressFamily,
    pub host: String,
    pub port: u16,
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.family {
            AddressFamily::Ipv6 => write!(f, "[{}]:{}", self.host, self.port),
            AddressFamily::Ipv4 | AddressFamily::DomainName => {
                write!(f, "{}:{}", self.host, self.port)
            }
        }
    }
}

/// A parsed handshake. Addon bytes are skipped and not kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    pub version: u8,
    pub identifier: [u8; ID_LEN],
    pub command: u8,
    pub destination: Destination,
    /// Bytes following the address, forwarded to the destination once connected.
    pub payload: Vec<u8>,
}

impl Handshake {
    /// The acknowledgment sent back once the destination is connected.
    #[must_use]
    pub fn ack(&self) -> [u8; 2] {
        [self.version, 0]
    }
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], HeaderError> {
        let end = self.pos + len;
        let bytes = self.buf.get(self.pos..end).ok_or(HeaderError::Truncated {
            needed: end,
            available: self.buf.len(),
        })?;
        self.pos = end;
        Ok(bytes)
    }

    fn u8(&mut self) -> Result<u8, HeaderError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, HeaderError> {
        let bytes = self.take(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    fn rest(self) -> &'a [u8] {
        &self.buf[self.pos..]
    }
}

/// Parses the first inbound message into a [`Handshake`].
pub fn parse_handshake(buf: &[u8]) -> Result<Handshake, HeaderError> {
    let mut reader = Reader::new(buf);

    let version = reader.u8()?;
    let mut identifier = [0u8; ID_LEN];
    identifier.copy_from_slice(reader.take(ID_LEN)?);

    let addon_len = reader.u8()?;
    reader.take(usize::from(addon_len))?;
    let command = reader.u8()?;

    let port = reader.u16()?;
    let family = AddressFamily::from_tag(reader.u8()?)?;
    let host = match family {
        AddressFamily::Ipv4 => {
            let octets = reader.take(4)?;
            format!("{}.{}.{}.{}", octets[0], octets[1], octets[2], octets[3])
        }
        AddressFamily::DomainName => {
            let len = reader.u8()?;
            String::from_utf8_lossy(reader.take(usize::from(len))?).into_owned()
        }
        // Groups are rendered unabbreviated, without zero compression.
        AddressFamily::Ipv6 => {
            let groups: Vec<String> = reader
                .take(16)?
                .chunks_exact(2)
                .map(|pair| format!("{:x}", u16::from_be_bytes([pair[0], pair[1]])))
                .collect();
            groups.join(":")
        }
    };

    Ok(Handshake {
        version,
        identifier,
        command,
        destination: Destination { family, host, port },
        payload: reader.rest().to_vec(),
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub const TEST_ID: [u8; ID_LEN] = [
        0x2e, 0xa7, 0x37, 0x14, 0x13, 0x8e, 0x4c, 0xc7, 0x8c, 0xab, 0xd7, 0xca, 0xf4, 0x76, 0xd5,
        0x1b,
    ];

    /// Builds a header with the given address section (ATYP + address) and payload.
    pub fn build_header(
        version: u8,
        id: &[u8; ID_LEN],
        addon: &[u8],
        port: u16,
        address: &[u8],
        payload: &[u8],
    ) -> Vec<u8> {
        let mut buf = vec![version];
        buf.extend_from_slice(id);
        buf.push(addon.len() as u8);
        buf.extend_from_slice(addon);
        buf.push(0x01);
        buf.extend_from_slice(&port.to_be_bytes());
        buf.extend_from_slice(address);
        buf.extend_from_slice(payload);
        buf
    }

    pub fn domain_address(name: &str) -> Vec<u8> {
        let mut address = vec![ATYP_DOMAIN, name.len() as u8];
        address.extend_from_slice(name.as_bytes());
        address
    }

    mod addresses {
        use super::*;

        #[test]
        fn parses_ipv4() {
            let buf = build_header(0, &TEST_ID, &[], 80, &[ATYP_IPV4, 1, 2, 3, 4], &[]);
            let handshake = parse_handshake(&buf).unwrap();
            assert_eq!(handshake.destination.family, AddressFamily::Ipv4);
            assert_eq!(handshake.destination.host, "1.2.3.4");
            assert_eq!(handshake.destination.port, 80);
        }

        #[test]
        fn parses_empty_domain() {
            let buf = build_header(0, &TEST_ID, &[], 80, &[ATYP_DOMAIN, 0], &[0xAA]);
            let handshake = parse_handshake(&buf).unwrap();
            assert_eq!(handshake.destination.host, "");
            assert_eq!(handshake.payload, vec![0xAA]);
        }

        #[test]
        fn parses_max_length_domain() {
            let name = "a".repeat(255);
            let buf = build_header(0, &TEST_ID, &[], 80, &domain_address(&name), &[0xBB]);
            let handshake = parse_handshake(&buf).unwrap();
            assert_eq!(handshake.destination.host, name);
            assert_eq!(handshake.payload, vec![0xBB]);
        }

        #[test]
        fn parses_zero_ipv6() {
            let mut address = vec![ATYP_IPV6];
            address.extend_from_slice(&[0; 16]);
            let buf = build_header(0, &TEST_ID, &[], 443, &address, &[]);
            let handshake = parse_handshake(&buf).unwrap();
            assert_eq!(handshake.destination.family, AddressFamily::Ipv6);
            assert_eq!(handshake.destination.host, "0:0:0:0:0:0:0:0");
        }

        #[test]
        fn renders_ipv6_groups_as_lowercase_hex() {
            let mut address = vec![ATYP_IPV6];
            address.extend_from_slice(&[
                0x20, 0x01, 0x0d, 0xb8, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0xAB, 0xCD,
            ]);
            let buf = build_header(0, &TEST_ID, &[], 443, &address, &[]);
            let handshake = parse_handshake(&buf).unwrap();
            assert_eq!(handshake.destination.host, "2001:db8:0:0:0:0:0:abcd");
            assert_eq!(
                handshake.destination.to_string(),
                "[2001:db8:0:0:0:0:0:abcd]:443"
            );
        }

        #[test]
        fn rejects_unknown_address_type() {
            let buf = build_header(0, &TEST_ID, &[], 80, &[4, 1, 2, 3, 4], &[]);
            assert_eq!(
                parse_handshake(&buf),
                Err(HeaderError::UnknownAddressType(4))
            );
        }
    }

    mod layout {
        use super::*;

        #[test]
        fn parses_example_domain_handshake() {
            let buf = build_header(0, &TEST_ID, &[], 0x01BB, &domain_address("example"), &[]);
            let handshake = parse_handshake(&buf).unwrap();
            assert_eq!(handshake.version, 0);
            assert_eq!(handshake.identifier, TEST_ID);
            assert_eq!(
                handshake.destination,
                Destination {
                    family: AddressFamily::DomainName,
                    host: "example".to_string(),
                    port: 443,
                }
            );
            assert!(handshake.payload.is_empty());
            assert_eq!(handshake.destination.to_string(), "example:443");
        }

        #[test]
        fn skips_addon_bytes() {
            let buf = build_header(
                7,
                &TEST_ID,
                &[0xFF; 9],
                8080,
                &[ATYP_IPV4, 10, 0, 0, 1],
                &[0xAA, 0xBB],
            );
            let handshake = parse_handshake(&buf).unwrap();
            assert_eq!(handshake.destination.host, "10.0.0.1");
            assert_eq!(handshake.destination.port, 8080);
            assert_eq!(handshake.payload, vec![0xAA, 0xBB]);
            assert_eq!(handshake.ack(), [7, 0]);
        }

        #[test]
        fn rejects_short_buffer() {
            assert!(matches!(
                parse_handshake(&[0u8; 19]),
                Err(HeaderError::Truncated { .. })
            ));
            assert!(matches!(
                parse_handshake(&[]),
                Err(HeaderError::Truncated { needed: 1, available: 0 })
            ));
        }

        #[test]
        fn rejects_addon_past_end() {
            let mut buf = vec![0u8];
            buf.extend_from_slice(&TEST_ID);
            buf.push(200);
            buf.extend_from_slice(&[0; 10]);
            assert!(matches!(
                parse_handshake(&buf),
                Err(HeaderError::Truncated { .. })
            ));
        }

        #[test]
        fn rejects_truncated_domain() {
            let mut buf = build_header(0, &TEST_ID, &[], 80, &domain_address("example"), &[]);
            buf.truncate(buf.len() - 2);
            assert!(matches!(
                parse_handshake(&buf),
                Err(HeaderError::Truncated { .. })
            ));
        }

        #[test]
        fn rejects_truncated_ipv6() {
            let mut address = vec![ATYP_IPV6];
            address.extend_from_slice(&[0; 15]);
            let buf = build_header(0, &TEST_ID, &[], 443, &address, &[]);
            assert!(matches!(
                parse_handshake(&buf),
                Err(HeaderError::Truncated { .. })
            ));
        }
    }
}
