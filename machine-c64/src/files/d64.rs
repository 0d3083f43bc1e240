//! D64 disk images.
//!
//! 683 blocks of 256 bytes for the standard 35-track single-sided disk,
//! linearized in (track, sector) order with the zone-dependent sector
//! counts. 40-track images (768 blocks) and trailing per-sector error
//! bytes are accepted.

use crate::error::{Error, Result};

/// Bytes per block.
pub const BLOCK_SIZE: usize = 256;

/// Blocks on a 35-track disk.
pub const BLOCKS_35_TRACKS: usize = 683;

/// Blocks on a 40-track disk.
pub const BLOCKS_40_TRACKS: usize = 768;

/// Sectors per track, indexed by 1-based track number.
const SECTORS: [u8; 43] = [
    0, //
    21, 21, 21, 21, 21, 21, 21, 21, 21, 21, 21, 21, 21, 21, 21, 21, 21, // 1-17
    19, 19, 19, 19, 19, 19, 19, // 18-24
    18, 18, 18, 18, 18, 18, // 25-30
    17, 17, 17, 17, 17, // 31-35
    17, 17, 17, 17, 17, 17, 17, // 36-42
];

/// Sectors on a 1-based track number (0 for invalid tracks).
#[must_use]
pub fn sectors_per_track(track: u8) -> u8 {
    if (1..=42).contains(&track) {
        SECTORS[track as usize]
    } else {
        0
    }
}

/// Linear block number of (track, sector), if valid for `num_tracks`.
#[must_use]
pub fn block_number(num_tracks: u8, track: u8, sector: u8) -> Option<usize> {
    if track == 0 || track > num_tracks || sector >= sectors_per_track(track) {
        return None;
    }
    let mut block = 0usize;
    for t in 1..track {
        block += usize::from(sectors_per_track(t));
    }
    Some(block + usize::from(sector))
}

/// A D64 image held as its linear block array.
#[derive(Clone)]
pub struct D64Image {
    data: Vec<u8>,
    num_tracks: u8,
}

impl D64Image {
    /// An all-zero 35-track image.
    #[must_use]
    pub fn blank() -> Self {
        Self {
            data: vec![0; BLOCKS_35_TRACKS * BLOCK_SIZE],
            num_tracks: 35,
        }
    }

    /// Parse an image. Accepts 35- and 40-track sizes, each optionally
    /// followed by one error byte per block.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let (blocks, num_tracks) = match bytes.len() {
            n if n == BLOCKS_35_TRACKS * BLOCK_SIZE
                || n == BLOCKS_35_TRACKS * (BLOCK_SIZE + 1) =>
            {
                (BLOCKS_35_TRACKS, 35)
            }
            n if n == BLOCKS_40_TRACKS * BLOCK_SIZE
                || n == BLOCKS_40_TRACKS * (BLOCK_SIZE + 1) =>
            {
                (BLOCKS_40_TRACKS, 40)
            }
            n => {
                return Err(Error::CantRead(format!("not a D64 image ({n} bytes)")));
            }
        };
        Ok(Self {
            data: bytes[..blocks * BLOCK_SIZE].to_vec(),
            num_tracks,
        })
    }

    /// Serialize back to the plain (error-byte-free) image.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        self.data.clone()
    }

    #[must_use]
    pub fn num_tracks(&self) -> u8 {
        self.num_tracks
    }

    #[must_use]
    pub fn num_blocks(&self) -> usize {
        self.data.len() / BLOCK_SIZE
    }

    #[must_use]
    pub fn sectors_on_track(&self, track: u8) -> u8 {
        if track <= self.num_tracks {
            sectors_per_track(track)
        } else {
            0
        }
    }

    /// Borrow a 256-byte sector.
    #[must_use]
    pub fn read_sector(&self, track: u8, sector: u8) -> Option<&[u8]> {
        let block = block_number(self.num_tracks, track, sector)?;
        Some(&self.data[block * BLOCK_SIZE..(block + 1) * BLOCK_SIZE])
    }

    /// Overwrite a sector. Out-of-range coordinates are ignored.
    pub fn write_sector(&mut self, track: u8, sector: u8, data: &[u8]) -> bool {
        if data.len() != BLOCK_SIZE {
            return false;
        }
        let Some(block) = block_number(self.num_tracks, track, sector) else {
            return false;
        };
        self.data[block * BLOCK_SIZE..(block + 1) * BLOCK_SIZE].copy_from_slice(data);
        true
    }

    /// Disk ID from the BAM block (18,0), offsets $A2/$A3.
    #[must_use]
    pub fn disk_id(&self) -> [u8; 2] {
        match self.read_sector(18, 0) {
            Some(bam) => [bam[0xA2], bam[0xA3]],
            None => [0xA0, 0xA0],
        }
    }
}
