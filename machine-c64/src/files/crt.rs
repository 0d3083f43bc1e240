//! CRT cartridge containers.
//!
//! 64-byte header: signature "C64 CARTRIDGE   ", big-endian header
//! size, version, hardware type, the initial EXROM/GAME levels, and a
//! 32-byte name. The payload is a sequence of CHIP packets, each with
//! its own bank number, load address and size.

use crate::error::{Error, Result};

const CRT_SIGNATURE: &[u8; 16] = b"C64 CARTRIDGE   ";
const CHIP_SIGNATURE: &[u8; 4] = b"CHIP";

/// Content type of a CHIP packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChipKind {
    Rom,
    Ram,
    FlashRom,
}

/// One CHIP packet.
#[derive(Clone)]
pub struct Chip {
    pub kind: ChipKind,
    pub bank: u16,
    pub load_address: u16,
    pub data: Vec<u8>,
}

/// A parsed CRT container.
pub struct CrtFile {
    /// Hardware type identifier from the header.
    pub cartridge_type: u16,
    pub version: u16,
    /// Initial line levels (true = high / inactive).
    pub exrom: bool,
    pub game: bool,
    pub name: String,
    pub chips: Vec<Chip>,
}

fn be_u16(data: &[u8], offset: usize) -> u16 {
    u16::from(data[offset]) << 8 | u16::from(data[offset + 1])
}

fn be_u32(data: &[u8], offset: usize) -> u32 {
    u32::from(data[offset]) << 24
        | u32::from(data[offset + 1]) << 16
        | u32::from(data[offset + 2]) << 8
        | u32::from(data[offset + 3])
}

impl CrtFile {
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < 0x40 {
            return Err(Error::CantRead("CRT file shorter than its header".into()));
        }
        if &data[0..16] != CRT_SIGNATURE {
            return Err(Error::CantRead("missing CRT signature".into()));
        }

        let header_len = be_u32(data, 0x10) as usize;
        if header_len < 0x40 || header_len > data.len() {
            return Err(Error::CantRead(format!(
                "implausible CRT header length {header_len}"
            )));
        }
        let version = be_u16(data, 0x14);
        let cartridge_type = be_u16(data, 0x16);
        let exrom = data[0x18] != 0;
        let game = data[0x19] != 0;

        let name_bytes = &data[0x20..0x40];
        let end = name_bytes.iter().position(|&b| b == 0).unwrap_or(32);
        let name = String::from_utf8_lossy(&name_bytes[..end]).trim().to_string();

        let mut chips = Vec::new();
        let mut offset = header_len;
        while offset + 0x10 <= data.len() {
            if &data[offset..offset + 4] != CHIP_SIGNATURE {
                return Err(Error::CantRead(format!(
                    "expected CHIP packet at offset {offset}"
                )));
            }
            let packet_len = be_u32(data, offset + 4) as usize;
            let kind = match be_u16(data, offset + 8) {
                0 => ChipKind::Rom,
                1 => ChipKind::Ram,
                2 => ChipKind::FlashRom,
                other => {
                    return Err(Error::CantRead(format!("unknown CHIP type {other}")));
                }
            };
            let bank = be_u16(data, offset + 0x0A);
            let load_address = be_u16(data, offset + 0x0C);
            let size = be_u16(data, offset + 0x0E) as usize;

            if packet_len < 0x10 + size || offset + 0x10 + size > data.len() {
                return Err(Error::CantRead(format!(
                    "CHIP packet at offset {offset} runs past the file end"
                )));
            }

            chips.push(Chip {
                kind,
                bank,
                load_address,
                data: data[offset + 0x10..offset + 0x10 + size].to_vec(),
            });
            offset += packet_len;
        }

        if chips.is_empty() {
            return Err(Error::CantRead("CRT file carries no CHIP packets".into()));
        }
        if chips.len() > 128 {
            return Err(Error::CantRead(format!(
                "CRT file carries {} CHIP packets",
                chips.len()
            )));
        }

        Ok(Self {
            cartridge_type,
            version,
            exrom,
            game,
            name,
            chips,
        })
    }
}

/// Test helper: build a CRT image in memory.
#[cfg(test)]
pub fn build_crt(cartridge_type: u16, exrom: u8, game: u8, chips: &[(u16, u16, &[u8])]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(CRT_SIGNATURE);
    out.extend_from_slice(&0x40u32.to_be_bytes());
    out.extend_from_slice(&0x0100u16.to_be_bytes());
    out.extend_from_slice(&cartridge_type.to_be_bytes());
    out.push(exrom);
    out.push(game);
    out.extend_from_slice(&[0; 6]);
    let name = b"TEST CARTRIDGE";
    out.extend_from_slice(name);
    out.extend_from_slice(&vec![0; 32 - name.len()]);

    for &(bank, load, data) in chips {
        out.extend_from_slice(CHIP_SIGNATURE);
        out.extend_from_slice(&(0x10 + data.len() as u32).to_be_bytes());
        out.extend_from_slice(&0u16.to_be_bytes()); // ROM
        out.extend_from_slice(&bank.to_be_bytes());
        out.extend_from_slice(&load.to_be_bytes());
        out.extend_from_slice(&(data.len() as u16).to_be_bytes());
        out.extend_from_slice(data);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_header_and_chips() {
        let rom = vec![0xAA; 8192];
        let crt = build_crt(0, 0, 1, &[(0, 0x8000, &rom)]);
        let parsed = CrtFile::from_bytes(&crt).unwrap();
        assert_eq!(parsed.cartridge_type, 0);
        assert!(!parsed.exrom);
        assert!(parsed.game);
        assert_eq!(parsed.name, "TEST CARTRIDGE");
        assert_eq!(parsed.chips.len(), 1);
        assert_eq!(parsed.chips[0].load_address, 0x8000);
        assert_eq!(parsed.chips[0].data.len(), 8192);
    }

    #[test]
    fn multiple_banks() {
        let banks: Vec<Vec<u8>> = (0..4u8).map(|b| vec![b; 8192]).collect();
        let chips: Vec<(u16, u16, &[u8])> = banks
            .iter()
            .enumerate()
            .map(|(i, d)| (i as u16, 0x8000, d.as_slice()))
            .collect();
        let crt = build_crt(5, 0, 1, &chips);
        let parsed = CrtFile::from_bytes(&crt).unwrap();
        assert_eq!(parsed.chips.len(), 4);
        assert_eq!(parsed.chips[3].bank, 3);
        assert_eq!(parsed.chips[3].data[0], 3);
    }

    #[test]
    fn rejects_bad_signature() {
        let mut crt = build_crt(0, 0, 1, &[(0, 0x8000, &[0; 8192])]);
        crt[0] = b'X';
        assert!(CrtFile::from_bytes(&crt).is_err());
    }

    #[test]
    fn rejects_truncated_chip() {
        let crt = build_crt(0, 0, 1, &[(0, 0x8000, &[0; 8192])]);
        assert!(CrtFile::from_bytes(&crt[..crt.len() - 100]).is_err());
    }

    #[test]
    fn rejects_empty() {
        let crt = build_crt(0, 0, 1, &[]);
        assert!(CrtFile::from_bytes(&crt).is_err());
    }
}
