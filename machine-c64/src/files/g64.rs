//! G64 raw GCR disk images.
//!
//! "GCR-1541", a version byte, the half-track count, the maximum track
//! size, then a table of absolute offsets to per-half-track data blocks
//! (each a 16-bit stream length followed by the GCR bytes) and a speed
//! zone table. Consumed read-only: the drive takes the streams as its
//! disk surface.

use crate::drive::Disk;
use crate::error::{Error, Result};

const G64_SIGNATURE: &[u8; 8] = b"GCR-1541";

/// A parsed G64 image.
pub struct G64File {
    pub version: u8,
    /// (half-track index, GCR stream) pairs for formatted half-tracks.
    pub tracks: Vec<(usize, Vec<u8>)>,
}

impl G64File {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 0x0C {
            return Err(Error::CantRead("G64 file too short".into()));
        }
        if &bytes[0..8] != G64_SIGNATURE {
            return Err(Error::CantRead("missing G64 signature".into()));
        }
        let version = bytes[8];
        let num_halftracks = usize::from(bytes[9]);
        if 0x0C + num_halftracks * 4 > bytes.len() {
            return Err(Error::CantRead("G64 offset table truncated".into()));
        }

        let mut tracks = Vec::new();
        for ht in 0..num_halftracks {
            let entry = 0x0C + ht * 4;
            let offset = u32::from_le_bytes([
                bytes[entry],
                bytes[entry + 1],
                bytes[entry + 2],
                bytes[entry + 3],
            ]) as usize;
            if offset == 0 {
                continue; // Unformatted half-track
            }
            if offset + 2 > bytes.len() {
                return Err(Error::CantRead(format!(
                    "G64 track offset {offset} outside the file"
                )));
            }
            let len = usize::from(u16::from_le_bytes([bytes[offset], bytes[offset + 1]]));
            if offset + 2 + len > bytes.len() {
                return Err(Error::CantRead(format!(
                    "G64 track data at {offset} runs past the file end"
                )));
            }
            tracks.push((ht, bytes[offset + 2..offset + 2 + len].to_vec()));
        }

        if tracks.is_empty() {
            return Err(Error::CantRead("G64 image has no formatted tracks".into()));
        }
        Ok(Self { version, tracks })
    }

    /// Turn the streams into a disk surface.
    #[must_use]
    pub fn into_disk(self) -> Disk {
        Disk::from_gcr_streams(self.tracks, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<u8> {
        let stream = vec![0xFFu8, 0x55, 0xAA, 0x52];
        let num_halftracks = 4usize;
        let table_end = 0x0C + num_halftracks * 4;

        let mut bytes = Vec::new();
        bytes.extend_from_slice(G64_SIGNATURE);
        bytes.push(0); // Version
        bytes.push(num_halftracks as u8);
        bytes.extend_from_slice(&7928u16.to_le_bytes());
        // Offsets: only half-track 0 is formatted
        bytes.extend_from_slice(&(table_end as u32).to_le_bytes());
        for _ in 1..num_halftracks {
            bytes.extend_from_slice(&0u32.to_le_bytes());
        }
        bytes.extend_from_slice(&(stream.len() as u16).to_le_bytes());
        bytes.extend_from_slice(&stream);
        bytes
    }

    #[test]
    fn parses_formatted_tracks() {
        let g64 = G64File::from_bytes(&sample()).unwrap();
        assert_eq!(g64.tracks.len(), 1);
        assert_eq!(g64.tracks[0].0, 0);
        assert_eq!(g64.tracks[0].1, [0xFF, 0x55, 0xAA, 0x52]);
    }

    #[test]
    fn into_disk_places_streams() {
        let disk = G64File::from_bytes(&sample()).unwrap().into_disk();
        assert_eq!(disk.halftrack(0), [0xFF, 0x55, 0xAA, 0x52]);
        assert!(disk.halftrack(1).is_empty());
    }

    #[test]
    fn rejects_truncated_table() {
        let mut bytes = sample();
        bytes.truncate(0x0E);
        assert!(G64File::from_bytes(&bytes).is_err());
    }
}
