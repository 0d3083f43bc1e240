//! VC1541 floppy drive.
//!
//! The drive is a small computer of its own: a 6502 at ~1 MHz, two
//! VIAs, 2 KiB RAM and the DOS ROM. VIA1 talks to the IEC bus, VIA2
//! runs the mechanics:
//!
//!   Port B: bits 0-1 stepper phase, bit 2 motor, bit 3 LED, bit 4
//!   write protect (low = protected), bits 5-6 density, bit 7 SYNC
//!   (low = sync under head). Port A carries the GCR byte at the head.
//!   CB2 low selects write mode; the byte-ready signal goes to CA1 and
//!   to the CPU's SO pin.
//!
//! The drive clock is stepped from the machine's master loop so IEC
//! timing holds. With power saving enabled, an idle drive (motor off,
//! no bus traffic for a while) stops burning host cycles until the bus
//! wakes it up.

#![allow(clippy::cast_possible_truncation)]

pub mod disk;
mod memory;

pub use disk::Disk;
pub use memory::DriveMemory;

use cpu_6510::Cpu6510;
use emu_core::{HardwareComponent, ReadError, SnapshotReader, SnapshotWriter};
use log::debug;

use crate::files::d64::D64Image;
use crate::iec::{IecBus, IecDevice};

/// IEC cycles of silence after which an idle drive powers down.
const POWER_SAVE_IDLE_CYCLES: u32 = 1_000_000;

/// VC1541 drive.
pub struct Drive {
    /// Bus identity (drive 8 or 9).
    device: IecDevice,
    cpu: Cpu6510,
    pub mem: DriveMemory,

    /// Inserted medium as GCR surface plus the backing D64 image.
    disk: Option<Disk>,
    d64: Option<D64Image>,

    /// Head position in half-tracks (0 = track 1).
    halftrack: u8,
    /// Byte offset of the head within the half-track stream.
    head_offset: u32,
    /// Cycle countdown to the next byte under the head.
    byte_clock: u32,

    motor_on: bool,
    led_on: bool,
    /// Previous stepper phase (VIA2 PB bits 0-1).
    stepper_phase: u8,
    /// Head is in write mode (VIA2 CB2 low).
    write_mode: bool,
    /// A write happened since entering write mode.
    dirty: bool,
    /// Byte-ready line level toward CA1/SO.
    byte_ready: bool,

    /// Power saving permitted by configuration.
    power_save_enabled: bool,
    /// Currently idling.
    idle: bool,
}

impl Drive {
    /// `rom` is the 16 KiB DOS image.
    #[must_use]
    pub fn new(device: IecDevice, rom: Vec<u8>) -> Self {
        let mem = DriveMemory::new(rom);
        let mut cpu = Cpu6510::new();
        cpu.regs.pc = mem.reset_vector();
        Self {
            device,
            cpu,
            mem,
            disk: None,
            d64: None,
            halftrack: 34, // Track 18, the directory track
            head_offset: 0,
            byte_clock: 0,
            motor_on: false,
            led_on: false,
            stepper_phase: 0,
            write_mode: false,
            dirty: false,
            byte_ready: false,
            power_save_enabled: true,
            idle: false,
        }
    }

    /// Insert a D64 image: the surface is GCR-encoded per track.
    pub fn insert_d64(&mut self, image: D64Image) {
        debug!("drive: inserting D64 ({} blocks)", image.num_blocks());
        self.disk = Some(Disk::from_d64(&image));
        self.d64 = Some(image);
        self.head_offset = 0;
        self.idle = false;
    }

    /// Insert a raw GCR surface (G64); no D64 write-back is possible.
    pub fn insert_gcr(&mut self, disk: Disk) {
        self.disk = Some(disk);
        self.d64 = None;
        self.head_offset = 0;
        self.idle = false;
    }

    pub fn eject(&mut self) -> Option<D64Image> {
        self.disk = None;
        self.head_offset = 0;
        self.d64.take()
    }

    #[must_use]
    pub fn has_disk(&self) -> bool {
        self.disk.is_some()
    }

    /// Current whole track under the head (1-42).
    #[must_use]
    pub fn track(&self) -> u8 {
        self.halftrack / 2 + 1
    }

    #[must_use]
    pub fn motor_on(&self) -> bool {
        self.motor_on
    }

    #[must_use]
    pub fn led_on(&self) -> bool {
        self.led_on
    }

    #[must_use]
    pub fn cpu(&self) -> &Cpu6510 {
        &self.cpu
    }

    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.idle
    }

    pub fn set_power_save(&mut self, enabled: bool) {
        self.power_save_enabled = enabled;
        if !enabled {
            self.idle = false;
        }
    }

    /// The backing D64 image with all head writes folded in (export).
    #[must_use]
    pub fn d64(&self) -> Option<&D64Image> {
        self.d64.as_ref()
    }

    /// One drive cycle, interleaved with the C64's master clock.
    pub fn execute_cycle(&mut self, iec: &mut IecBus) {
        // Power-save: wake on bus activity, otherwise skip the cycle
        if self.idle {
            if iec.idle_cycles() == 0 {
                self.idle = false;
                debug!("drive: waking from power-save");
            } else {
                return;
            }
        } else if self.power_save_enabled
            && !self.motor_on
            && iec.idle_cycles() > POWER_SAVE_IDLE_CYCLES
        {
            self.idle = true;
            debug!("drive: entering power-save");
            return;
        }

        // 1. Bus levels into VIA1 port B inputs
        self.sample_iec(iec);

        // 2. ATN level onto CA1 (the latch handles repeats)
        self.mem.via1.set_ca1(!iec.atn());

        // 3. CPU and VIAs
        self.cpu.tick(&mut self.mem);
        self.mem.via1.tick();
        self.mem.via2.tick();

        // 4. VIA outputs back onto the bus
        self.drive_iec(iec);

        // 5. Mechanics from VIA2 port B
        self.update_mechanics();

        // 6. Disk rotation
        self.rotate();

        // 7. VIA interrupts
        self.cpu
            .set_irq_line(self.mem.via1.irq_active() || self.mem.via2.irq_active());
    }

    /// VIA1 port B inputs: bit 0 = DATA in, bit 2 = CLK in (both read
    /// back inverted: 1 = line low), bit 7 = ATN in (level).
    fn sample_iec(&mut self, iec: &IecBus) {
        let mut ext = self.mem.via1.external_b;
        ext = (ext & !0x01) | u8::from(!iec.data());
        ext = (ext & !0x04) | (u8::from(!iec.clk()) << 2);
        ext = (ext & !0x80) | (u8::from(iec.atn()) << 7);
        self.mem.via1.external_b = ext;
    }

    /// VIA1 port B outputs: bit 1 = DATA out, bit 3 = CLK out, bit 4 =
    /// ATN acknowledge (hardware-ANDed onto DATA).
    fn drive_iec(&mut self, iec: &mut IecBus) {
        let pb = self.mem.via1.port_b_output();
        let data_out = pb & 0x02 != 0;
        let clk_out = pb & 0x08 != 0;
        // ATNA: the inverter pulls DATA low while ATN (low) disagrees
        // with the acknowledge bit
        let atna = pb & 0x10 != 0;
        let atn_low = !iec.atn();
        let auto_data = atn_low != atna;

        iec.set_device_lines(self.device, false, clk_out, data_out || auto_data);
    }

    fn update_mechanics(&mut self) {
        let pb = self.mem.via2.port_b_output();
        self.motor_on = pb & 0x04 != 0;
        self.led_on = pb & 0x08 != 0;

        // Stepper: adjacent phase steps move the head half a track
        let phase = pb & 0x03;
        if phase != self.stepper_phase {
            let delta = (4 + phase - self.stepper_phase) & 0x03;
            match delta {
                1 => {
                    if self.halftrack < (disk::NUM_HALFTRACKS - 1) as u8 {
                        self.halftrack += 1;
                    }
                }
                3 => {
                    if self.halftrack > 0 {
                        self.halftrack -= 1;
                    }
                }
                _ => {}
            }
            self.stepper_phase = phase;
            self.head_offset = 0;
            debug!("drive: head at half-track {}", self.halftrack);
        }

        // Write protect sense (bit 4, low = protected)
        let protected = self.disk.as_ref().map_or(true, |d| d.write_protected);
        self.mem.via2.external_b =
            (self.mem.via2.external_b & !0x10) | if protected { 0 } else { 0x10 };

        // Read/write mode from CB2
        let write_now = self.mem.via2.cb2_output_low();
        if self.write_mode && !write_now && self.dirty {
            self.flush_written_track();
            self.dirty = false;
        }
        self.write_mode = write_now;
    }

    /// Advance the disk under the head; clock bytes in or out.
    fn rotate(&mut self) {
        if self.disk.is_none() || !self.motor_on {
            return;
        }
        let ht = self.halftrack as usize;
        let track = self.halftrack / 2 + 1;

        if self.byte_clock > 0 {
            self.byte_clock -= 1;
            // Byte-ready is a short strobe; release between bytes
            if self.byte_ready {
                self.byte_ready = false;
                self.mem.via2.set_ca1(false);
            }
            return;
        }
        self.byte_clock = disk::cycles_per_byte(track);

        let disk = self.disk.as_mut().expect("checked above");
        let stream_len = disk.halftrack(ht).len();
        if stream_len == 0 {
            // Unformatted surface: no sync, no bytes
            self.mem.via2.external_b |= 0x80;
            return;
        }

        if self.write_mode {
            let value = self.mem.via2.port_a_output();
            disk.write_byte(ht, self.head_offset as usize, value);
            self.dirty = true;
        } else {
            let byte = disk.halftrack(ht)[self.head_offset as usize % stream_len];
            self.mem.via2.external_a = byte;
            // SYNC (active low) while a full $FF passes by
            let sync = byte == 0xFF;
            self.mem.via2.external_b =
                (self.mem.via2.external_b & !0x80) | if sync { 0 } else { 0x80 };
        }

        self.head_offset = (self.head_offset + 1) % stream_len as u32;

        // Byte ready: CA1 strobe plus the CPU's SO pin
        self.byte_ready = true;
        self.mem.via2.set_ca1(true);
        self.cpu.trigger_so();
    }

    /// Decode the GCR stream of the current track and fold the sectors
    /// back into the D64 image.
    fn flush_written_track(&mut self) {
        let (Some(disk), Some(d64)) = (&self.disk, &mut self.d64) else {
            return;
        };
        let track = self.halftrack / 2 + 1;
        let sectors = disk.decode_track(self.halftrack as usize);
        debug!(
            "drive: writing back {} sectors on track {track}",
            sectors.len()
        );
        for (sector, payload) in sectors {
            d64.write_sector(track, sector, &payload);
        }
    }
}

impl HardwareComponent for Drive {
    fn reset(&mut self) {
        self.cpu.reset();
        self.cpu.regs.pc = self.mem.reset_vector();
        self.mem.reset();
        self.halftrack = 34;
        self.head_offset = 0;
        self.byte_clock = 0;
        self.motor_on = false;
        self.led_on = false;
        self.stepper_phase = 0;
        self.write_mode = false;
        self.dirty = false;
        self.byte_ready = false;
        self.idle = false;
    }

    fn save_persistent(&self, w: &mut SnapshotWriter) {
        w.write_bool(self.power_save_enabled);
        // The inserted medium survives a reset
        match (&self.disk, &self.d64) {
            (Some(disk), Some(d64)) => {
                w.write_u8(2);
                disk.save(w);
                w.write_vec(&d64.to_bytes());
            }
            (Some(disk), None) => {
                w.write_u8(1);
                disk.save(w);
            }
            _ => w.write_u8(0),
        }
    }

    fn save_reset(&self, w: &mut SnapshotWriter) {
        self.cpu.save_reset(w);
        self.mem.save_reset(w);
        w.write_u8(self.halftrack);
        w.write_u32(self.head_offset);
        w.write_u32(self.byte_clock);
        w.write_bool(self.motor_on);
        w.write_bool(self.led_on);
        w.write_u8(self.stepper_phase);
        w.write_bool(self.write_mode);
        w.write_bool(self.dirty);
        w.write_bool(self.byte_ready);
        w.write_bool(self.idle);
    }

    fn load_persistent(&mut self, r: &mut SnapshotReader) -> Result<(), ReadError> {
        self.power_save_enabled = r.read_bool()?;
        match r.read_u8()? {
            2 => {
                self.disk = Some(Disk::load(r)?);
                let bytes = r.read_vec()?;
                self.d64 = D64Image::from_bytes(&bytes).ok();
            }
            1 => {
                self.disk = Some(Disk::load(r)?);
                self.d64 = None;
            }
            _ => {
                self.disk = None;
                self.d64 = None;
            }
        }
        Ok(())
    }

    fn load_reset(&mut self, r: &mut SnapshotReader) -> Result<(), ReadError> {
        self.cpu.load_reset(r)?;
        self.mem.load_reset(r)?;
        self.halftrack = r.read_u8()?;
        self.head_offset = r.read_u32()?;
        self.byte_clock = r.read_u32()?;
        self.motor_on = r.read_bool()?;
        self.led_on = r.read_bool()?;
        self.stepper_phase = r.read_u8()?;
        self.write_mode = r.read_bool()?;
        self.dirty = r.read_bool()?;
        self.byte_ready = r.read_bool()?;
        self.idle = r.read_bool()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_drive() -> Drive {
        let mut rom = vec![0xEA; 0x4000]; // NOP sled
        rom[0x3FFC] = 0x00;
        rom[0x3FFD] = 0xC0;
        Drive::new(IecDevice::Drive8, rom)
    }

    #[test]
    fn starts_on_directory_track() {
        let drive = make_drive();
        assert_eq!(drive.track(), 18);
        assert!(!drive.has_disk());
        assert_eq!(drive.cpu().regs.pc, 0xC000);
    }

    #[test]
    fn insert_and_eject() {
        let mut drive = make_drive();
        drive.insert_d64(D64Image::blank());
        assert!(drive.has_disk());
        let image = drive.eject();
        assert!(image.is_some());
        assert!(!drive.has_disk());
    }

    #[test]
    fn motor_and_led_follow_via2() {
        let mut drive = make_drive();
        drive.mem.via2.write(0x02, 0x0F); // DDRB: low nibble out
        drive.mem.via2.write(0x00, 0x04); // Motor on
        drive.update_mechanics();
        assert!(drive.motor_on());
        assert!(!drive.led_on());

        drive.mem.via2.write(0x00, 0x08);
        drive.update_mechanics();
        assert!(!drive.motor_on());
        assert!(drive.led_on());
    }

    #[test]
    fn stepper_moves_head() {
        let mut drive = make_drive();
        drive.insert_d64(D64Image::blank());
        drive.mem.via2.write(0x02, 0x03);
        let start = drive.halftrack;

        drive.mem.via2.write(0x00, 0x01); // Phase 0 -> 1: inward
        drive.update_mechanics();
        assert_eq!(drive.halftrack, start + 1);

        drive.mem.via2.write(0x00, 0x00); // Phase 1 -> 0: outward
        drive.update_mechanics();
        assert_eq!(drive.halftrack, start);
    }

    #[test]
    fn rotation_presents_bytes_and_sync() {
        let mut drive = make_drive();
        drive.insert_d64(D64Image::blank());
        // Force motor on
        drive.mem.via2.write(0x02, 0x04);
        drive.mem.via2.write(0x00, 0x04);
        drive.update_mechanics();
        assert!(drive.motor_on());

        // Track streams start with sync bytes ($FF)
        drive.rotate();
        assert_eq!(drive.mem.via2.external_a, 0xFF);
        assert_eq!(drive.mem.via2.external_b & 0x80, 0); // SYNC active (low)
        // Overflow flag was pulsed for the byte
        assert!(drive.cpu().regs.p.is_set(0x40));
    }

    #[test]
    fn byte_clock_matches_zone() {
        let mut drive = make_drive();
        drive.insert_d64(D64Image::blank());
        drive.mem.via2.write(0x02, 0x04);
        drive.mem.via2.write(0x00, 0x04);
        drive.update_mechanics();

        drive.rotate(); // Loads byte_clock for track 18 (zone 1)
        assert_eq!(drive.byte_clock, 224);
    }

    #[test]
    fn power_save_skips_cycles_until_bus_activity() {
        let mut drive = make_drive();
        let mut iec = IecBus::new();
        // Age the bus far past the idle threshold
        for _ in 0..=POWER_SAVE_IDLE_CYCLES {
            iec.age();
        }
        drive.execute_cycle(&mut iec);
        assert!(drive.is_idle());

        // Bus activity wakes it up
        iec.set_device_lines(IecDevice::C64, true, false, false);
        drive.execute_cycle(&mut iec);
        assert!(!drive.is_idle());
    }

    #[test]
    fn snapshot_round_trip_with_disk() {
        let mut drive = make_drive();
        drive.insert_d64(D64Image::blank());
        for _ in 0..100 {
            let mut iec = IecBus::new();
            drive.execute_cycle(&mut iec);
        }

        let mut w = SnapshotWriter::new();
        drive.save(&mut w);
        let bytes = w.into_bytes();

        let mut restored = make_drive();
        restored.load(&mut SnapshotReader::new(&bytes)).unwrap();
        assert!(restored.has_disk());
        assert_eq!(restored.halftrack, drive.halftrack);
        assert_eq!(restored.cpu().regs.pc, drive.cpu().regs.pc);
    }
}
