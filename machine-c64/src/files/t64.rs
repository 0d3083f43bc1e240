//! T64 tape archives.
//!
//! A 64-byte header (signature, version, directory capacity and usage,
//! tape name) followed by 32-byte directory records pointing into the
//! raw payload. Only file-type records are surfaced.

use crate::error::{Error, Result};

/// One archived program.
pub struct T64Entry {
    /// PETSCII name, trailing padding stripped.
    pub name: Vec<u8>,
    pub load_address: u16,
    pub data: Vec<u8>,
}

/// A parsed T64 archive.
pub struct T64File {
    pub tape_name: Vec<u8>,
    pub entries: Vec<T64Entry>,
}

impl T64File {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 0x40 {
            return Err(Error::CantRead("T64 file too short".into()));
        }
        // Several signatures exist in the wild; all start with "C64"
        if &bytes[0..3] != b"C64" {
            return Err(Error::CantRead("missing T64 signature".into()));
        }

        let max_entries = u16::from(bytes[0x22]) | (u16::from(bytes[0x23]) << 8);
        let used_entries = u16::from(bytes[0x24]) | (u16::from(bytes[0x25]) << 8);
        // Plenty of broken tools write 0 for the used count
        let count = if used_entries == 0 {
            max_entries
        } else {
            used_entries
        };

        let mut tape_name = bytes[0x28..0x40].to_vec();
        while matches!(tape_name.last(), Some(&b) if b == 0x20 || b == 0) {
            tape_name.pop();
        }

        let mut entries = Vec::new();
        for i in 0..usize::from(count) {
            let dir = 0x40 + i * 0x20;
            if dir + 0x20 > bytes.len() {
                break;
            }
            let record = &bytes[dir..dir + 0x20];
            if record[0] != 1 {
                continue; // Not a normal tape file
            }
            let load_address = u16::from(record[2]) | (u16::from(record[3]) << 8);
            let end_address = u16::from(record[4]) | (u16::from(record[5]) << 8);
            let offset = u32::from(record[8])
                | (u32::from(record[9]) << 8)
                | (u32::from(record[10]) << 16)
                | (u32::from(record[11]) << 24);

            let mut len = usize::from(end_address.wrapping_sub(load_address));
            let offset = offset as usize;
            if offset >= bytes.len() {
                continue;
            }
            // Tolerate archives whose end address overshoots the file
            len = len.min(bytes.len() - offset);

            let mut name = record[0x10..0x20].to_vec();
            while matches!(name.last(), Some(&b) if b == 0x20 || b == 0) {
                name.pop();
            }

            entries.push(T64Entry {
                name,
                load_address,
                data: bytes[offset..offset + len].to_vec(),
            });
        }

        if entries.is_empty() {
            return Err(Error::FsHasNoFiles);
        }
        Ok(Self { tape_name, entries })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<u8> {
        let payload = [0xA9u8, 0x01, 0x60];
        let mut bytes = vec![0u8; 0x60];
        bytes[0..3].copy_from_slice(b"C64");
        bytes[0x22] = 1; // Max entries
        bytes[0x24] = 1; // Used entries
        bytes[0x28..0x2C].copy_from_slice(b"TAPE");
        // Directory record
        bytes[0x40] = 1; // Normal file
        bytes[0x42] = 0x01; // Load $0801
        bytes[0x43] = 0x08;
        bytes[0x44] = 0x04; // End $0804
        bytes[0x45] = 0x08;
        bytes[0x48] = 0x60; // Data offset
        bytes[0x50..0x54].copy_from_slice(b"PROG");
        for b in &mut bytes[0x54..0x60] {
            *b = 0x20;
        }
        bytes.extend_from_slice(&payload);
        bytes
    }

    #[test]
    fn parses_entries() {
        let t64 = T64File::from_bytes(&sample()).unwrap();
        assert_eq!(t64.tape_name, b"TAPE");
        assert_eq!(t64.entries.len(), 1);
        assert_eq!(t64.entries[0].name, b"PROG");
        assert_eq!(t64.entries[0].load_address, 0x0801);
        assert_eq!(t64.entries[0].data, [0xA9, 0x01, 0x60]);
    }

    #[test]
    fn rejects_non_t64() {
        assert!(T64File::from_bytes(&[0u8; 0x40]).is_err());
    }

    #[test]
    fn empty_archive_is_an_error() {
        let mut bytes = sample();
        bytes[0x40] = 0; // Free entry
        assert!(matches!(
            T64File::from_bytes(&bytes),
            Err(Error::FsHasNoFiles)
        ));
    }
}
