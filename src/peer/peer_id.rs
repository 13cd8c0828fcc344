use std::fmt::{self, Write as _};

use rand::Rng as _;

use crate::constants::CLIENT_PREFIX;

/// A 20-byte peer identifier.
///
/// Generated IDs follow the Azureus-style format `-PM0001-<12 random bytes>`,
/// where `PM` identifies piecemeal and `0001` is the version.
///
/// # Examples
///
/// ```
/// use piecemeal::peer::PeerId;
///
/// let peer_id = PeerId::generate();
/// assert_eq!(peer_id.as_bytes().len(), 20);
/// assert_eq!(peer_id.client_id(), Some("PM0001"));
/// ```
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerId(pub [u8; 20]);

impl PeerId {
    pub fn generate() -> Self {
        let mut id = [0u8; 20];
        id[..8].copy_from_slice(CLIENT_PREFIX);
        rand::rng().fill(&mut id[8..]);
        Self(id)
    }

    /// Returns `None` if the slice is not exactly 20 bytes.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let id: [u8; 20] = bytes.try_into().ok()?;
        Some(Self(id))
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// The 6-character client tag of an Azureus-style ID (`-XXXXXX-`).
    pub fn client_id(&self) -> Option<&str> {
        match &self.0[..8] {
            [b'-', tag @ .., b'-'] => std::str::from_utf8(tag).ok(),
            _ => None,
        }
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.client_id() {
            Some(client) => f.debug_tuple("PeerId").field(&client).finish(),
            None => f.debug_tuple("PeerId").field(&self.to_string()).finish(),
        }
    }
}

/// Printable bytes as-is, everything else percent-escaped, which is also
/// how the ID appears in a tracker query string.
impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.iter().try_for_each(|&b| match b {
            b'0'..=b'9' | b'a'..=b'z' | b'A'..=b'Z' | b'-' => f.write_char(b as char),
            _ => write!(f, "%{:02x}", b),
        })
    }
}
