//! Versioned machine snapshots.
//!
//! A snapshot is the magic `VC64`, a (major, minor, subminor) version
//! triple, and the deterministic serialization of the whole component
//! tree in its fixed traversal order. Loading refuses any version
//! mismatch and leaves the running machine untouched.

use crate::error::{Error, Result};

const SNAPSHOT_MAGIC: &[u8; 4] = b"VC64";

/// Version of the snapshot payload layout.
pub const V_MAJOR: u8 = 4;
pub const V_MINOR: u8 = 0;
pub const V_SUBMINOR: u8 = 0;

/// A serialized machine state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Snapshot {
    payload: Vec<u8>,
}

impl Snapshot {
    /// Wrap a serialized component tree.
    #[must_use]
    pub fn new(payload: Vec<u8>) -> Self {
        Self { payload }
    }

    /// The component-tree bytes.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Serialize with header.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.payload.len() + 7);
        out.extend_from_slice(SNAPSHOT_MAGIC);
        out.push(V_MAJOR);
        out.push(V_MINOR);
        out.push(V_SUBMINOR);
        out.extend_from_slice(&self.payload);
        out
    }

    /// Parse and version-check a snapshot file.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 7 {
            return Err(Error::CantRead("snapshot too short".into()));
        }
        if &bytes[0..4] != SNAPSHOT_MAGIC {
            return Err(Error::CantRead("missing snapshot magic".into()));
        }
        let version = (bytes[4], bytes[5], bytes[6]);
        if version != (V_MAJOR, V_MINOR, V_SUBMINOR) {
            return Err(Error::CantRead(format!(
                "snapshot version {}.{}.{} not supported",
                version.0, version.1, version.2
            )));
        }
        Ok(Self {
            payload: bytes[7..].to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trip() {
        let snapshot = Snapshot::new(vec![1, 2, 3]);
        let bytes = snapshot.to_bytes();
        assert_eq!(&bytes[0..4], b"VC64");
        let parsed = Snapshot::from_bytes(&bytes).unwrap();
        assert_eq!(parsed.payload(), &[1, 2, 3]);
    }

    #[test]
    fn version_mismatch_refused() {
        let mut bytes = Snapshot::new(vec![]).to_bytes();
        bytes[4] = V_MAJOR.wrapping_add(1);
        assert!(Snapshot::from_bytes(&bytes).is_err());
    }

    #[test]
    fn bad_magic_refused() {
        let mut bytes = Snapshot::new(vec![]).to_bytes();
        bytes[0] = b'X';
        assert!(Snapshot::from_bytes(&bytes).is_err());
    }
}
