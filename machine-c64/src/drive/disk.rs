//! GCR disk surface.
//!
//! The drive head sees a continuous byte stream per half-track. A D64
//! image is expanded to GCR on insertion, one track at a time; G64
//! images already carry the GCR stream and are taken as-is. Writes go
//! back into the stream and are decoded to sectors when the head leaves
//! write mode.
//!
//! Sector layout on disk:
//! sync (5 x $FF), 10 GCR header bytes, 9-byte gap, sync, 325 GCR data
//! bytes (260 raw: marker, 256 data, checksum, 2 pad), 9-byte gap.
//!
//! The spindle turns at 300 rpm while the bit rate varies by zone, so
//! the byte clock is 26-32 CPU cycles per byte depending on the track.

#![allow(clippy::cast_possible_truncation)]

use emu_core::{ReadError, SnapshotReader, SnapshotWriter};

use crate::files::d64::D64Image;

/// Number of half-tracks the head can reach (tracks 1-42).
pub const NUM_HALFTRACKS: usize = 84;

/// 4-bit nibble to 5-bit GCR code.
const GCR_ENCODE: [u8; 16] = [
    0x0A, 0x0B, 0x12, 0x13, 0x0E, 0x0F, 0x16, 0x17,
    0x09, 0x19, 0x1A, 0x1B, 0x0D, 0x1D, 0x1E, 0x15,
];

/// 5-bit GCR code back to nibble; $FF marks illegal codes.
const GCR_DECODE: [u8; 32] = [
    0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF,
    0xFF, 0x08, 0x00, 0x01, 0xFF, 0x0C, 0x04, 0x05,
    0xFF, 0xFF, 0x02, 0x03, 0xFF, 0x0F, 0x06, 0x07,
    0xFF, 0x09, 0x0A, 0x0B, 0xFF, 0x0D, 0x0E, 0xFF,
];

/// Speed zone of a track (0 = outermost, fastest).
#[must_use]
pub fn speed_zone(track: u8) -> u8 {
    match track {
        0..=17 => 0,
        18..=24 => 1,
        25..=30 => 2,
        _ => 3,
    }
}

/// Drive CPU cycles between two GCR bytes passing under the head.
#[must_use]
pub fn cycles_per_byte(track: u8) -> u32 {
    match speed_zone(track) {
        0 => 26 * 8,
        1 => 28 * 8,
        2 => 30 * 8,
        _ => 32 * 8,
    }
}

/// Encode four raw bytes into five GCR bytes.
fn encode_group(raw: &[u8; 4]) -> [u8; 5] {
    let n: [u8; 8] = [
        GCR_ENCODE[(raw[0] >> 4) as usize],
        GCR_ENCODE[(raw[0] & 0x0F) as usize],
        GCR_ENCODE[(raw[1] >> 4) as usize],
        GCR_ENCODE[(raw[1] & 0x0F) as usize],
        GCR_ENCODE[(raw[2] >> 4) as usize],
        GCR_ENCODE[(raw[2] & 0x0F) as usize],
        GCR_ENCODE[(raw[3] >> 4) as usize],
        GCR_ENCODE[(raw[3] & 0x0F) as usize],
    ];
    [
        (n[0] << 3) | (n[1] >> 2),
        (n[1] << 6) | (n[2] << 1) | (n[3] >> 4),
        (n[3] << 4) | (n[4] >> 1),
        (n[4] << 7) | (n[5] << 2) | (n[6] >> 3),
        (n[6] << 5) | n[7],
    ]
}

/// Decode five GCR bytes into four raw bytes, or `None` on an illegal
/// code.
#[must_use]
pub fn decode_group(gcr: &[u8; 5]) -> Option<[u8; 4]> {
    let codes = [
        (gcr[0] >> 3) & 0x1F,
        ((gcr[0] << 2) | (gcr[1] >> 6)) & 0x1F,
        (gcr[1] >> 1) & 0x1F,
        ((gcr[1] << 4) | (gcr[2] >> 4)) & 0x1F,
        ((gcr[2] << 1) | (gcr[3] >> 7)) & 0x1F,
        (gcr[3] >> 2) & 0x1F,
        ((gcr[3] << 3) | (gcr[4] >> 5)) & 0x1F,
        gcr[4] & 0x1F,
    ];
    let mut nibbles = [0u8; 8];
    for (out, &code) in nibbles.iter_mut().zip(codes.iter()) {
        let n = GCR_DECODE[code as usize];
        if n == 0xFF {
            return None;
        }
        *out = n;
    }
    Some([
        (nibbles[0] << 4) | nibbles[1],
        (nibbles[2] << 4) | nibbles[3],
        (nibbles[4] << 4) | nibbles[5],
        (nibbles[6] << 4) | nibbles[7],
    ])
}

/// Decode a 325-byte GCR data block to its 256 payload bytes, verifying
/// the checksum.
#[must_use]
pub fn decode_data_block(gcr: &[u8]) -> Option<Vec<u8>> {
    if gcr.len() < 325 {
        return None;
    }
    let mut raw = Vec::with_capacity(260);
    for chunk in gcr[..325].chunks_exact(5) {
        let group = decode_group(&[chunk[0], chunk[1], chunk[2], chunk[3], chunk[4]])?;
        raw.extend_from_slice(&group);
    }
    if raw[0] != 0x07 {
        return None;
    }
    let data = &raw[1..257];
    let checksum = data.iter().fold(0u8, |acc, &b| acc ^ b);
    if checksum != raw[257] {
        return None;
    }
    Some(data.to_vec())
}

/// Encode a sector header (8 raw bytes -> 10 GCR bytes).
fn encode_header(track: u8, sector: u8, disk_id: [u8; 2]) -> [u8; 10] {
    let checksum = sector ^ track ^ disk_id[0] ^ disk_id[1];
    let raw = [
        0x08, checksum, sector, track, disk_id[1], disk_id[0], 0x0F, 0x0F,
    ];
    let lo = encode_group(&[raw[0], raw[1], raw[2], raw[3]]);
    let hi = encode_group(&[raw[4], raw[5], raw[6], raw[7]]);
    let mut out = [0u8; 10];
    out[..5].copy_from_slice(&lo);
    out[5..].copy_from_slice(&hi);
    out
}

/// Encode a 256-byte sector payload into its 325 GCR data bytes.
fn encode_data_block(data: &[u8]) -> Vec<u8> {
    debug_assert_eq!(data.len(), 256);
    let checksum = data.iter().fold(0u8, |acc, &b| acc ^ b);

    let mut raw = Vec::with_capacity(260);
    raw.push(0x07);
    raw.extend_from_slice(data);
    raw.push(checksum);
    raw.push(0x00);
    raw.push(0x00);

    let mut gcr = Vec::with_capacity(325);
    for chunk in raw.chunks_exact(4) {
        gcr.extend_from_slice(&encode_group(&[chunk[0], chunk[1], chunk[2], chunk[3]]));
    }
    gcr
}

/// Full on-disk image of one sector.
fn encode_sector(track: u8, sector: u8, data: &[u8], disk_id: [u8; 2]) -> Vec<u8> {
    let mut out = Vec::with_capacity(363);
    out.extend_from_slice(&[0xFF; 5]);
    out.extend_from_slice(&encode_header(track, sector, disk_id));
    out.extend_from_slice(&[0x55; 9]);
    out.extend_from_slice(&[0xFF; 5]);
    out.extend_from_slice(&encode_data_block(data));
    out.extend_from_slice(&[0x55; 9]);
    out
}

/// The magnetic surface: one GCR byte stream per half-track. Whole
/// tracks live on odd half-track numbers (half-track 2t-1 = track t);
/// the even positions between them are unformatted unless a G64 put
/// data there.
pub struct Disk {
    halftracks: [Vec<u8>; NUM_HALFTRACKS],
    /// Dirty tracks written by the head but not yet decoded back.
    pub write_protected: bool,
    /// Disk ID from the BAM, used for header generation.
    disk_id: [u8; 2],
}

impl Disk {
    /// Expand a D64 image to GCR.
    #[must_use]
    pub fn from_d64(image: &D64Image) -> Self {
        let disk_id = image.disk_id();
        let mut halftracks: [Vec<u8>; NUM_HALFTRACKS] = std::array::from_fn(|_| Vec::new());

        for track in 1..=image.num_tracks() {
            let mut stream = Vec::new();
            for sector in 0..image.sectors_on_track(track) {
                let data = image
                    .read_sector(track, sector)
                    .expect("track/sector within image bounds");
                stream.extend_from_slice(&encode_sector(track, sector, data, disk_id));
            }
            halftracks[(track as usize * 2) - 2] = stream;
        }

        Self {
            halftracks,
            write_protected: false,
            disk_id,
        }
    }

    /// Build a disk directly from per-halftrack GCR streams (G64).
    #[must_use]
    pub fn from_gcr_streams(streams: Vec<(usize, Vec<u8>)>, write_protected: bool) -> Self {
        let mut halftracks: [Vec<u8>; NUM_HALFTRACKS] = std::array::from_fn(|_| Vec::new());
        for (ht, data) in streams {
            if ht < NUM_HALFTRACKS {
                halftracks[ht] = data;
            }
        }
        Self {
            halftracks,
            write_protected,
            disk_id: [0xA0, 0xA0],
        }
    }

    /// GCR stream of a half-track (0-based index).
    #[must_use]
    pub fn halftrack(&self, ht: usize) -> &[u8] {
        &self.halftracks[ht.min(NUM_HALFTRACKS - 1)]
    }

    /// Overwrite one byte under the head.
    pub fn write_byte(&mut self, ht: usize, offset: usize, value: u8) {
        if self.write_protected {
            return;
        }
        let track = &mut self.halftracks[ht.min(NUM_HALFTRACKS - 1)];
        if !track.is_empty() {
            let len = track.len();
            track[offset % len] = value;
        }
    }

    #[must_use]
    pub fn disk_id(&self) -> [u8; 2] {
        self.disk_id
    }

    /// Decode a whole track's GCR stream back into (sector, payload)
    /// pairs, used to fold head writes back into the D64 image. Scans
    /// for header blocks and pairs each with the following data block.
    #[must_use]
    pub fn decode_track(&self, ht: usize) -> Vec<(u8, Vec<u8>)> {
        let stream = self.halftrack(ht);
        let len = stream.len();
        if len == 0 {
            return Vec::new();
        }

        let at = |i: usize| stream[i % len];
        let mut sectors = Vec::new();
        let mut i = 0;

        while i < len {
            // Sync run followed by a header marker
            if at(i) != 0xFF || at(i + 1) == 0xFF {
                i += 1;
                continue;
            }
            let mut hdr = [0u8; 5];
            for (k, byte) in hdr.iter_mut().enumerate() {
                *byte = at(i + 1 + k);
            }
            let Some(decoded) = decode_group(&hdr) else {
                i += 1;
                continue;
            };
            if decoded[0] != 0x08 {
                i += 1;
                continue;
            }
            let sector = decoded[2];

            // Data block: next sync run after the header
            let mut j = i + 11;
            let mut guard = 0;
            while guard < len && !(at(j) == 0xFF && at(j + 1) != 0xFF) {
                j += 1;
                guard += 1;
            }
            // Skip the sync run
            let mut data = Vec::with_capacity(325);
            let start = j + 1;
            for k in 0..325 {
                data.push(at(start + k));
            }
            if let Some(payload) = decode_data_block(&data) {
                sectors.push((sector, payload));
            }
            i = start + 325;
        }
        sectors
    }

    pub(crate) fn save(&self, w: &mut SnapshotWriter) {
        w.write_bool(self.write_protected);
        w.write_u8(self.disk_id[0]);
        w.write_u8(self.disk_id[1]);
        for ht in &self.halftracks {
            w.write_vec(ht);
        }
    }

    pub(crate) fn load(r: &mut SnapshotReader) -> Result<Self, ReadError> {
        let write_protected = r.read_bool()?;
        let disk_id = [r.read_u8()?, r.read_u8()?];
        let mut halftracks: [Vec<u8>; NUM_HALFTRACKS] = std::array::from_fn(|_| Vec::new());
        for ht in &mut halftracks {
            *ht = r.read_vec()?;
        }
        Ok(Self {
            halftracks,
            write_protected,
            disk_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::files::d64::D64Image;

    fn blank_d64() -> D64Image {
        D64Image::blank()
    }

    #[test]
    fn gcr_group_round_trip() {
        for &bytes in &[
            [0x00, 0x00, 0x00, 0x00],
            [0xFF, 0xFF, 0xFF, 0xFF],
            [0x12, 0x34, 0x56, 0x78],
            [0x08, 0xA5, 0x11, 0x01],
        ] {
            let encoded = encode_group(&bytes);
            assert_eq!(decode_group(&encoded), Some(bytes));
        }
    }

    #[test]
    fn illegal_codes_rejected() {
        // All-zero bits contain the illegal code 00000
        assert_eq!(decode_group(&[0, 0, 0, 0, 0]), None);
    }

    #[test]
    fn sector_stream_length() {
        let data = [0u8; 256];
        let sector = encode_sector(1, 0, &data, [0x41, 0x42]);
        // 5 sync + 10 header + 9 gap + 5 sync + 325 data + 9 gap
        assert_eq!(sector.len(), 363);
        assert_eq!(&sector[0..5], &[0xFF; 5]);
        assert_eq!(&sector[15..24], &[0x55; 9]);
    }

    #[test]
    fn data_block_checksum_round_trip() {
        let mut data = [0u8; 256];
        data[0] = 0xDE;
        data[255] = 0xAD;
        let gcr = encode_data_block(&data);
        let decoded = decode_data_block(&gcr).unwrap();
        assert_eq!(decoded.as_slice(), &data);
    }

    #[test]
    fn corrupted_checksum_rejected() {
        let data = [0u8; 256];
        let mut gcr = encode_data_block(&data);
        gcr[100] ^= 0x01;
        assert!(decode_data_block(&gcr).is_none());
    }

    #[test]
    fn d64_expansion_fills_whole_tracks() {
        let disk = Disk::from_d64(&blank_d64());
        // Track 1 (half-track index 0): 21 sectors
        assert_eq!(disk.halftrack(0).len(), 21 * 363);
        // Track 18 (index 34): 19 sectors
        assert_eq!(disk.halftrack(34).len(), 19 * 363);
        // Between tracks: unformatted
        assert!(disk.halftrack(1).is_empty());
    }

    #[test]
    fn decode_track_recovers_all_sectors() {
        let mut image = blank_d64();
        let mut payload = [0u8; 256];
        payload[10] = 0x77;
        image.write_sector(3, 5, &payload);
        let disk = Disk::from_d64(&image);

        let sectors = disk.decode_track(4); // Track 3
        assert_eq!(sectors.len(), 21);
        let (_, data) = sectors.iter().find(|(s, _)| *s == 5).unwrap();
        assert_eq!(data[10], 0x77);
    }

    #[test]
    fn zone_timing() {
        assert_eq!(cycles_per_byte(1), 208);
        assert_eq!(cycles_per_byte(18), 224);
        assert_eq!(cycles_per_byte(25), 240);
        assert_eq!(cycles_per_byte(35), 256);
    }

    #[test]
    fn write_protect_blocks_writes() {
        let mut disk = Disk::from_d64(&blank_d64());
        let before = disk.halftrack(0)[0];
        disk.write_protected = true;
        disk.write_byte(0, 0, !before);
        assert_eq!(disk.halftrack(0)[0], before);
    }
}
