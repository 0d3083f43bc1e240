//! P00 (PC64) program containers: an 8-byte magic, the original
//! 16-character PETSCII file name, a padding byte, the REL record size,
//! then ordinary PRG content.

use crate::error::{Error, Result};

const P00_MAGIC: &[u8; 8] = b"C64File\0";

/// A parsed P00 file.
pub struct P00File {
    /// PETSCII name, trailing zeros stripped.
    pub name: Vec<u8>,
    /// REL record size; zero for PRG-style files.
    pub record_size: u8,
    pub load_address: u16,
    pub data: Vec<u8>,
}

impl P00File {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 0x1C {
            return Err(Error::CantRead("P00 file too short".into()));
        }
        if &bytes[0..8] != P00_MAGIC {
            return Err(Error::CantRead("missing C64File magic".into()));
        }
        let mut name = bytes[8..24].to_vec();
        while name.last() == Some(&0) {
            name.pop();
        }
        let record_size = bytes[25];
        let load_address = u16::from(bytes[26]) | (u16::from(bytes[27]) << 8);
        Ok(Self {
            name,
            record_size,
            load_address,
            data: bytes[28..].to_vec(),
        })
    }

    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(28 + self.data.len());
        out.extend_from_slice(P00_MAGIC);
        let mut name = self.name.clone();
        name.resize(16, 0);
        out.extend_from_slice(&name);
        out.push(0);
        out.push(self.record_size);
        out.extend_from_slice(&self.load_address.to_le_bytes());
        out.extend_from_slice(&self.data);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(P00_MAGIC);
        bytes.extend_from_slice(b"GAME");
        bytes.extend_from_slice(&[0; 12]);
        bytes.push(0); // Padding
        bytes.push(0); // Record size
        bytes.extend_from_slice(&[0x01, 0x08]); // Load address
        bytes.extend_from_slice(&[0xA9, 0x00, 0x60]);
        bytes
    }

    #[test]
    fn parses_name_and_payload() {
        let p00 = P00File::from_bytes(&sample()).unwrap();
        assert_eq!(p00.name, b"GAME");
        assert_eq!(p00.load_address, 0x0801);
        assert_eq!(p00.data, [0xA9, 0x00, 0x60]);
    }

    #[test]
    fn rejects_wrong_magic() {
        let mut bytes = sample();
        bytes[0] = b'X';
        assert!(P00File::from_bytes(&bytes).is_err());
    }

    #[test]
    fn round_trips() {
        let bytes = sample();
        let p00 = P00File::from_bytes(&bytes).unwrap();
        assert_eq!(p00.to_bytes(), bytes);
    }
}
