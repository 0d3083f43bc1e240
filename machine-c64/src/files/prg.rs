//! PRG program files: two little-endian load-address bytes followed by
//! the payload.

use crate::error::{Error, Result};

/// A parsed PRG file.
pub struct PrgFile {
    pub load_address: u16,
    pub data: Vec<u8>,
}

impl PrgFile {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 3 {
            return Err(Error::CantRead("PRG file too short".into()));
        }
        let load_address = u16::from(bytes[0]) | (u16::from(bytes[1]) << 8);
        Ok(Self {
            load_address,
            data: bytes[2..].to_vec(),
        })
    }

    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.data.len() + 2);
        out.extend_from_slice(&self.load_address.to_le_bytes());
        out.extend_from_slice(&self.data);
        out
    }

    /// End address (exclusive), as the KERNAL load routine reports it.
    #[must_use]
    pub fn end_address(&self) -> u16 {
        self.load_address.wrapping_add(self.data.len() as u16)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_basic_start() {
        let prg = PrgFile::from_bytes(&[0x01, 0x08, 0x0B, 0x08, 0x0A, 0x00]).unwrap();
        assert_eq!(prg.load_address, 0x0801);
        assert_eq!(prg.data.len(), 4);
        assert_eq!(prg.end_address(), 0x0805);
    }

    #[test]
    fn rejects_headerless() {
        assert!(PrgFile::from_bytes(&[0x01]).is_err());
    }

    #[test]
    fn round_trips() {
        let bytes = [0x00, 0xC0, 1, 2, 3];
        let prg = PrgFile::from_bytes(&bytes).unwrap();
        assert_eq!(prg.to_bytes(), bytes);
    }
}
