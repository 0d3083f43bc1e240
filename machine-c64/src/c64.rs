//! The machine root: every chip, the buses between them, and the
//! master clock that steps them in lockstep.
//!
//! One call to [`C64::execute_one_cycle`] advances the whole machine by
//! one clock: the VIC performs its rasterline-cycle micro-step (possibly
//! pulling BA low), both CIAs count, the CPU executes one bus cycle
//! unless stalled, the SID produces output, and the drive - clocked at
//! the same rate - runs one cycle of its own little computer. Frame and
//! line boundaries fall out of the cycle counter; at the end of a frame
//! the framebuffers swap, the TOD clocks receive their power-line pulse
//! and staged configuration changes are applied.

#![allow(clippy::cast_possible_truncation)]

use emu_core::{HardwareComponent, SnapshotReader, SnapshotWriter};
use log::{debug, info};

use crate::cartridge::ExpansionPort;
use crate::cia::Cia;
use crate::config::{Config, ConfigOption};
use crate::drive::Drive;
use crate::error::{Error, Result};
use crate::files::{CrtFile, D64Image, G64File, PrgFile};
use crate::iec::{IecBus, IecDevice};
use crate::keyboard::Keyboard;
use crate::memory::{Memory, PeekSource, PokeTarget};
use crate::messages::{MsgQueue, MsgType};
use crate::roms::{RomImage, RomSlot};
use crate::sid::SidBridge;
use crate::snapshot::Snapshot;
use crate::vic::{Vic, VicBus};
use std::sync::Arc;

/// Everything the CPU sees over its bus. Keeping the CPU outside lets
/// it borrow the rest of the machine mutably during its micro-step.
pub struct C64Bus {
    pub mem: Memory,
    pub vic: Vic,
    pub cia1: Cia,
    pub cia2: Cia,
    pub sid: SidBridge,
    pub expansion: ExpansionPort,
    pub iec: IecBus,
    pub keyboard: Keyboard,
    pub drive8: Option<Drive>,

    /// Master clock mirror for the memory's decay model.
    clock: u64,
    /// Last value seen on the data bus (open-bus reads return it).
    bus_value: u8,
}

impl C64Bus {
    /// Push the current CIA2 port A output onto the IEC lines. An
    /// output bit set pulls the corresponding line low through the
    /// inverting drivers.
    fn update_iec_outputs(&mut self) {
        let pa = self.cia2.port_a_output();
        self.iec.set_device_lines(
            IecDevice::C64,
            pa & 0x08 != 0,
            pa & 0x10 != 0,
            pa & 0x20 != 0,
        );
    }

    /// Propagate the expansion port's GAME/EXROM levels into the PLA.
    fn sync_cartridge_lines(&mut self) {
        let (game, exrom) = self.expansion.lines();
        self.mem.set_cartridge_lines(game, exrom);
    }

    fn io_read(&mut self, addr: u16) -> u8 {
        match addr {
            0xD000..=0xD3FF => self.vic.read((addr & 0x3F) as u8),
            0xD400..=0xD7FF => self.sid.peek((addr & 0x1F) as u8),
            0xD800..=0xDBFF => {
                // Color RAM drives only four bits; the rest is open bus
                (self.bus_value & 0xF0) | self.mem.color_ram_read(addr - 0xD800)
            }
            0xDC00..=0xDCFF => {
                let reg = (addr & 0x0F) as u8;
                if reg == 0x01 {
                    // Keyboard rows respond to the column drive pattern
                    let columns = self.cia1.port_a_output();
                    self.cia1.external_b = self.keyboard.scan(columns);
                }
                self.cia1.read(reg)
            }
            0xDD00..=0xDDFF => self.cia2.read((addr & 0x0F) as u8),
            0xDE00..=0xDEFF => self.expansion.peek_io1(addr),
            _ => self.expansion.peek_io2(addr),
        }
    }

    fn io_write(&mut self, addr: u16, value: u8) {
        match addr {
            0xD000..=0xD3FF => self.vic.write((addr & 0x3F) as u8, value),
            0xD400..=0xD7FF => self.sid.poke((addr & 0x1F) as u8, value),
            0xD800..=0xDBFF => self.mem.color_ram_write(addr - 0xD800, value),
            0xDC00..=0xDCFF => self.cia1.write((addr & 0x0F) as u8, value),
            0xDD00..=0xDDFF => {
                self.cia2.write((addr & 0x0F) as u8, value);
                // Port A carries the VIC bank and the IEC outputs
                if addr & 0x0F <= 0x02 {
                    self.update_iec_outputs();
                }
            }
            0xDE00..=0xDEFF => {
                self.expansion.poke_io1(addr, value);
                self.sync_cartridge_lines();
            }
            _ => {
                self.expansion.poke_io2(addr, value);
                self.sync_cartridge_lines();
            }
        }
    }
}

impl cpu_6510::Bus for C64Bus {
    fn read(&mut self, addr: u16) -> u8 {
        let value = match self.mem.peek_source(addr) {
            PeekSource::Io => self.io_read(addr),
            PeekSource::CartLo => self.expansion.peek_roml(addr & 0x1FFF),
            PeekSource::CartHi => self.expansion.peek_romh(addr & 0x1FFF),
            PeekSource::Open => self.bus_value,
            _ => self.mem.read(addr, self.clock),
        };
        self.bus_value = value;
        value
    }

    fn write(&mut self, addr: u16, value: u8) {
        self.bus_value = value;
        match self.mem.poke_target(addr) {
            PokeTarget::Io => self.io_write(addr, value),
            PokeTarget::CartLo => {
                self.expansion.poke_roml(addr & 0x1FFF, value);
                if !self.mem.ultimax() {
                    self.mem.ram_write(addr, value);
                }
                self.sync_cartridge_lines();
            }
            PokeTarget::CartHi => {
                self.expansion.poke_romh(addr & 0x1FFF, value);
                if !self.mem.ultimax() {
                    self.mem.ram_write(addr, value);
                }
                self.sync_cartridge_lines();
            }
            PokeTarget::None => {}
            PokeTarget::Ram => self.mem.write(addr, value, self.clock),
        }
    }
}

/// The VIC's view of memory: the 16 KiB bank from CIA2 plus the
/// ultimax cartridge window.
struct VicView<'a> {
    mem: &'a Memory,
    expansion: &'a ExpansionPort,
    bank: u8,
}

impl VicBus for VicView<'_> {
    fn vic_read(&self, addr: u16) -> u8 {
        if self.mem.vic_sees_cart(addr) {
            return self.expansion.peek_romh(addr & 0x1FFF);
        }
        self.mem.vic_read(self.bank, addr)
    }

    fn color_read(&self, offset: u16) -> u8 {
        self.mem.color_ram_read(offset)
    }
}

/// A complete virtual C64.
pub struct C64 {
    pub cpu: cpu_6510::Cpu6510,
    pub bus: C64Bus,

    config: Config,
    /// Staged configuration, applied at the next frame boundary.
    pending_config: Option<Config>,

    /// Monotonic master clock (cycles since power-on).
    master_clock: u64,
    /// Completed frames since power-on.
    frame: u64,
    /// Beam bookkeeping mirrored from the VIC timing grid.
    rasterline: u16,
    cycle_in_line: u8,
    /// Set when the current frame finished on the last cycle.
    frame_completed: bool,

    /// DOS ROM retained for drive (re)creation.
    drive_rom: Option<RomImage>,

    /// Message channel shared with the host.
    pub queue: Arc<MsgQueue>,

    /// Drive status caches for change notifications.
    drive_led: bool,
    drive_motor: bool,
}

impl C64 {
    #[must_use]
    pub fn new(config: Config) -> Self {
        let model = config.vic_model;
        Self {
            cpu: cpu_6510::Cpu6510::new(),
            bus: C64Bus {
                mem: Memory::new(config.ram_pattern),
                vic: Vic::new(model),
                cia1: Cia::new(config.cia_revision),
                cia2: Cia::new(config.cia_revision),
                sid: SidBridge::new(
                    config.sid_revision,
                    model.cpu_frequency(),
                    config.sample_rate,
                ),
                expansion: ExpansionPort::new(),
                iec: IecBus::new(),
                keyboard: Keyboard::new(),
                drive8: None,
                clock: 0,
                bus_value: 0,
            },
            config,
            pending_config: None,
            master_clock: 0,
            frame: 0,
            rasterline: 0,
            cycle_in_line: 0,
            frame_completed: false,
            drive_rom: None,
            queue: Arc::new(MsgQueue::new()),
            drive_led: false,
            drive_motor: false,
        }
    }

    // ------------------------------------------------------------------
    // ROMs and readiness
    // ------------------------------------------------------------------

    pub fn install_basic_rom(&mut self, data: &[u8]) -> Result<()> {
        let rom = RomImage::new(RomSlot::Basic, data)?;
        info!("basic rom: {}", rom.title());
        self.bus.mem.install_basic(rom);
        Ok(())
    }

    pub fn install_kernal_rom(&mut self, data: &[u8]) -> Result<()> {
        let rom = RomImage::new(RomSlot::Kernal, data)?;
        info!("kernal rom: {}", rom.title());
        self.bus.mem.install_kernal(rom);
        Ok(())
    }

    pub fn install_char_rom(&mut self, data: &[u8]) -> Result<()> {
        let rom = RomImage::new(RomSlot::Char, data)?;
        info!("char rom: {}", rom.title());
        self.bus.mem.install_char(rom);
        Ok(())
    }

    pub fn install_drive_rom(&mut self, data: &[u8]) -> Result<()> {
        let rom = RomImage::new(RomSlot::Vc1541, data)?;
        info!("drive rom: {}", rom.title());
        self.drive_rom = Some(rom);
        self.sync_drive_presence();
        Ok(())
    }

    /// Power-on is only possible with the three board ROMs (and the
    /// DOS ROM if a drive is to be connected).
    pub fn is_ready(&self) -> Result<()> {
        if !self.bus.mem.has_basic() || !self.bus.mem.has_kernal() || !self.bus.mem.has_char() {
            return Err(Error::RomMissing);
        }
        if self.config.drive_connected && self.drive_rom.is_none() {
            return Err(Error::RomMissing);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Configuration
    // ------------------------------------------------------------------

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Stage one option change. Returns `false` for invalid values.
    /// Accepted changes take effect at the next frame boundary; hosts
    /// that need immediate effect suspend the emulator first.
    pub fn configure(&mut self, option: ConfigOption, value: i64) -> bool {
        let mut staged = self
            .pending_config
            .clone()
            .unwrap_or_else(|| self.config.clone());
        if !staged.set(option, value) {
            return false;
        }
        self.pending_config = Some(staged);
        true
    }

    /// Apply a staged configuration (called at frame boundaries).
    fn apply_pending_config(&mut self) {
        let Some(new) = self.pending_config.take() else {
            return;
        };
        debug!("applying staged configuration");

        if new.vic_model != self.config.vic_model {
            self.bus.vic.set_model(new.vic_model);
            self.bus.sid.set_rates(new.vic_model.cpu_frequency(), new.sample_rate);
            self.rasterline = 0;
            self.cycle_in_line = 0;
        }
        if new.cia_revision != self.config.cia_revision {
            self.bus.cia1.set_revision(new.cia_revision);
            self.bus.cia2.set_revision(new.cia_revision);
        }
        self.bus.sid.set_model(new.sid_revision);
        self.bus.sid.set_sampling(new.sid_sampling);
        self.bus.sid.set_filter_enabled(new.sid_filter);
        self.bus.mem.set_ram_pattern(new.ram_pattern);

        self.config = new;
        self.sync_drive_presence();
        if let Some(drive) = self.bus.drive8.as_mut() {
            drive.set_power_save(self.config.drive_power_save);
        }
    }

    fn sync_drive_presence(&mut self) {
        let want = self.config.drive_connected;
        match (want, self.bus.drive8.is_some(), &self.drive_rom) {
            (true, false, Some(rom)) => {
                let mut drive = Drive::new(IecDevice::Drive8, rom.data().to_vec());
                drive.set_power_save(self.config.drive_power_save);
                self.bus.drive8 = Some(drive);
                info!("drive 8 connected");
            }
            (false, true, _) => {
                self.bus.drive8 = None;
                self.bus
                    .iec
                    .set_device_lines(IecDevice::Drive8, false, false, false);
                info!("drive 8 disconnected");
            }
            _ => {}
        }
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Reset the machine to its power-on state. Persistent items (ROMs,
    /// RAM contents, inserted media, configuration) survive.
    pub fn reset(&mut self) {
        self.cpu.reset();
        self.bus.mem.reset();
        self.bus.vic.reset();
        self.bus.cia1.reset();
        self.bus.cia2.reset();
        self.bus.sid.reset();
        self.bus.expansion.reset();
        self.bus.iec.reset();
        self.bus.keyboard.reset();
        if let Some(drive) = self.bus.drive8.as_mut() {
            drive.reset();
        }
        self.bus.sync_cartridge_lines();
        self.bus.clock = self.master_clock;
        self.bus.bus_value = 0;

        self.rasterline = 0;
        self.cycle_in_line = 0;
        self.frame_completed = false;

        // The CPU starts at the reset vector (possibly a cartridge's in
        // ultimax mode)
        let lo = u16::from(self.spypeek(0xFFFC));
        let hi = u16::from(self.spypeek(0xFFFD));
        self.cpu.regs.pc = lo | (hi << 8);
        debug!("reset: pc = ${:04X}", self.cpu.regs.pc);

        self.queue.put_message(MsgType::Reset, 0);
    }

    // ------------------------------------------------------------------
    // Execution
    // ------------------------------------------------------------------

    #[must_use]
    pub fn master_clock(&self) -> u64 {
        self.master_clock
    }

    #[must_use]
    pub fn frame(&self) -> u64 {
        self.frame
    }

    #[must_use]
    pub fn rasterline(&self) -> u16 {
        self.rasterline
    }

    /// Current rasterline cycle, 1-based. 0 before a line starts.
    #[must_use]
    pub fn raster_cycle(&self) -> u8 {
        self.cycle_in_line
    }

    #[must_use]
    pub fn is_jammed(&self) -> bool {
        self.cpu.is_jammed()
    }

    /// Advance the machine by one master-clock cycle.
    pub fn execute_one_cycle(&mut self) {
        let cycles_per_line = self.config.vic_model.cycles_per_line();
        let lines_per_frame = self.config.vic_model.lines_per_frame();

        if self.cycle_in_line == 0 {
            if self.rasterline == 0 {
                self.bus.vic.begin_frame();
                self.frame_completed = false;
            }
            self.bus.vic.begin_line(self.rasterline);
            self.cycle_in_line = 1;
        }

        self.master_clock += 1;
        self.bus.clock = self.master_clock;

        // (a) VIC micro-step through its cycle table
        let bank = !self.bus.cia2.port_a_output() & 0x03;
        {
            let bus = &mut self.bus;
            let view = VicView {
                mem: &bus.mem,
                expansion: &bus.expansion,
                bank,
            };
            bus.vic.execute_cycle(&view);
        }
        self.cpu.set_rdy(!self.bus.vic.ba_is_low());

        // (b) one CIA tick each
        self.bus.cia1.tick();
        self.bus.cia2.tick();

        // IEC line levels into CIA2 port A inputs (bit 6 CLK, bit 7 DATA)
        let clk = self.bus.iec.clk();
        let data = self.bus.iec.data();
        self.bus.cia2.external_a =
            0x3F | (u8::from(clk) << 6) | (u8::from(data) << 7);

        // Interrupt lines: VIC and CIA1 drive IRQ, CIA2 and the
        // expansion port drive NMI
        self.cpu
            .set_irq_line(self.bus.vic.irq_active() || self.bus.cia1.irq_active());
        self.cpu
            .set_nmi_line(self.bus.cia2.irq_active() || self.bus.expansion.nmi_line());

        // (c) one CPU bus cycle (RDY gating happens inside)
        self.cpu.tick(&mut self.bus);

        // SID runs at the CPU rate
        self.bus.sid.tick();

        // (d) one drive cycle
        if let Some(drive) = self.bus.drive8.as_mut() {
            drive.execute_cycle(&mut self.bus.iec);
        }
        self.bus.iec.age();

        // Beam bookkeeping
        self.cycle_in_line += 1;
        if self.cycle_in_line > cycles_per_line {
            self.bus.vic.end_line();
            self.cycle_in_line = 0;
            self.rasterline += 1;
            if self.rasterline >= lines_per_frame {
                self.end_frame();
            }
        }
    }

    fn end_frame(&mut self) {
        self.bus.vic.end_frame();
        self.rasterline = 0;
        self.frame += 1;
        self.frame_completed = true;

        // TOD clocks tick at the power-line rate, one pulse per frame
        self.bus.cia1.tod_pulse();
        self.bus.cia2.tod_pulse();

        self.apply_pending_config();
        self.notify_drive_status();
    }

    fn notify_drive_status(&mut self) {
        let (led, motor) = self
            .bus
            .drive8
            .as_ref()
            .map_or((false, false), |d| (d.led_on(), d.motor_on()));
        if led != self.drive_led {
            self.drive_led = led;
            let msg = if led {
                MsgType::DriveLedOn
            } else {
                MsgType::DriveLedOff
            };
            self.queue.put_message(msg, 8);
        }
        if motor != self.drive_motor {
            self.drive_motor = motor;
            let msg = if motor {
                MsgType::DriveMotorOn
            } else {
                MsgType::DriveMotorOff
            };
            self.queue.put_message(msg, 8);
        }
    }

    /// Run until the current frame completes.
    pub fn execute_one_frame(&mut self) {
        self.frame_completed = false;
        while !self.frame_completed {
            self.execute_one_cycle();
        }
    }

    /// Run a fixed number of cycles (test and debugger helper).
    pub fn execute_cycles(&mut self, n: u64) {
        for _ in 0..n {
            self.execute_one_cycle();
        }
    }

    /// Finish the instruction in flight, then stop at the next fetch.
    pub fn finish_instruction(&mut self) {
        while !self.cpu.at_fetch() {
            self.execute_one_cycle();
        }
    }

    /// The most recently completed frame.
    #[must_use]
    pub fn framebuffer(&self) -> &[u32] {
        self.bus.vic.framebuffer()
    }

    // ------------------------------------------------------------------
    // Debugger access
    // ------------------------------------------------------------------

    /// Side-effect-free read through the CPU's address decode.
    #[must_use]
    pub fn spypeek(&self, addr: u16) -> u8 {
        match self.bus.mem.peek_source(addr) {
            PeekSource::Io => match addr {
                0xD000..=0xD3FF => self.bus.vic.spypeek((addr & 0x3F) as u8),
                0xD400..=0xD7FF => self.bus.sid.spypeek((addr & 0x1F) as u8),
                0xD800..=0xDBFF => self.bus.mem.color_ram_read(addr - 0xD800),
                0xDC00..=0xDCFF => self.bus.cia1.spypeek((addr & 0x0F) as u8),
                0xDD00..=0xDDFF => self.bus.cia2.spypeek((addr & 0x0F) as u8),
                0xDE00..=0xDEFF => self.bus.expansion.peek_io1(addr),
                _ => self.bus.expansion.peek_io2(addr),
            },
            PeekSource::CartLo => self.bus.expansion.peek_roml(addr & 0x1FFF),
            PeekSource::CartHi => self.bus.expansion.peek_romh(addr & 0x1FFF),
            PeekSource::Open => self.bus.bus_value,
            _ => self.bus.mem.read(addr, self.master_clock),
        }
    }

    // ------------------------------------------------------------------
    // Media
    // ------------------------------------------------------------------

    pub fn insert_disk(&mut self, image: D64Image) -> Result<()> {
        let Some(drive) = self.bus.drive8.as_mut() else {
            return Err(Error::CantWrite("no drive connected".into()));
        };
        drive.insert_d64(image);
        self.queue.put_message(MsgType::DiskInserted, 8);
        Ok(())
    }

    pub fn insert_g64(&mut self, g64: G64File) -> Result<()> {
        let Some(drive) = self.bus.drive8.as_mut() else {
            return Err(Error::CantWrite("no drive connected".into()));
        };
        drive.insert_gcr(g64.into_disk());
        self.queue.put_message(MsgType::DiskInserted, 8);
        Ok(())
    }

    pub fn eject_disk(&mut self) -> Option<D64Image> {
        let image = self.bus.drive8.as_mut().and_then(Drive::eject);
        self.queue.put_message(MsgType::DiskEjected, 8);
        image
    }

    pub fn attach_cartridge(&mut self, crt: &CrtFile) -> Result<()> {
        self.bus.expansion.attach(crt)?;
        self.bus.sync_cartridge_lines();
        self.queue.put_message(MsgType::CartridgeAttached, 0);
        Ok(())
    }

    pub fn detach_cartridge(&mut self) {
        self.bus.expansion.detach();
        self.bus.sync_cartridge_lines();
        self.queue.put_message(MsgType::CartridgeDetached, 0);
    }

    /// Inject a PRG directly into RAM, as a fast loader would.
    pub fn flash_prg(&mut self, prg: &PrgFile) {
        let mut addr = prg.load_address;
        for &byte in &prg.data {
            self.bus.mem.ram_write(addr, byte);
            addr = addr.wrapping_add(1);
        }
        // Fix up the BASIC end-of-program pointers
        let end = prg.end_address();
        for ptr in [0x2D, 0x2F, 0x31] {
            self.bus.mem.ram_write(ptr, end as u8);
            self.bus.mem.ram_write(ptr + 1, (end >> 8) as u8);
        }
    }

    // ------------------------------------------------------------------
    // Keyboard
    // ------------------------------------------------------------------

    pub fn press_key(&mut self, col: u8, row: u8) {
        self.bus.keyboard.set_key(col, row, true);
    }

    pub fn release_key(&mut self, col: u8, row: u8) {
        self.bus.keyboard.set_key(col, row, false);
    }

    pub fn release_all_keys(&mut self) {
        self.bus.keyboard.release_all();
    }

    // ------------------------------------------------------------------
    // Snapshots
    // ------------------------------------------------------------------

    /// Serialize the complete machine into a snapshot.
    #[must_use]
    pub fn take_snapshot(&self) -> Snapshot {
        let mut w = SnapshotWriter::new();

        w.write_u64(self.master_clock);
        w.write_u64(self.frame);
        w.write_u16(self.rasterline);
        w.write_u8(self.cycle_in_line);
        w.write_u8(self.bus.bus_value);

        // ROMs are persistent state: a snapshot restores to an
        // identical machine even on a fresh instance
        for rom in [
            self.bus.mem.basic_rom(),
            self.bus.mem.kernal_rom(),
            self.bus.mem.char_rom(),
            self.drive_rom.as_ref(),
        ] {
            match rom {
                Some(rom) => w.write_vec(rom.data()),
                None => w.write_vec(&[]),
            }
        }

        self.cpu.save(&mut w);
        self.bus.mem.save(&mut w);
        self.bus.vic.save(&mut w);
        self.bus.cia1.save(&mut w);
        self.bus.cia2.save(&mut w);
        self.bus.sid.save(&mut w);
        self.bus.expansion.save(&mut w);
        self.bus.iec.save(&mut w);
        self.bus.keyboard.save(&mut w);

        match &self.bus.drive8 {
            Some(drive) => {
                w.write_bool(true);
                drive.save(&mut w);
            }
            None => w.write_bool(false),
        }

        Snapshot::new(w.into_bytes())
    }

    /// Restore a snapshot. On failure the machine state is unspecified
    /// only if the payload was truncated mid-component; the caller is
    /// expected to have validated the container first.
    pub fn restore_snapshot(&mut self, snapshot: &Snapshot) -> Result<()> {
        let mut r = SnapshotReader::new(snapshot.payload());

        self.master_clock = r.read_u64()?;
        self.frame = r.read_u64()?;
        self.rasterline = r.read_u16()?;
        self.cycle_in_line = r.read_u8()?;
        self.bus.bus_value = r.read_u8()?;
        self.bus.clock = self.master_clock;

        let basic = r.read_vec()?;
        let kernal = r.read_vec()?;
        let chargen = r.read_vec()?;
        let dos = r.read_vec()?;
        if !basic.is_empty() {
            self.bus.mem.install_basic(RomImage::new(RomSlot::Basic, &basic)?);
        }
        if !kernal.is_empty() {
            self.bus
                .mem
                .install_kernal(RomImage::new(RomSlot::Kernal, &kernal)?);
        }
        if !chargen.is_empty() {
            self.bus.mem.install_char(RomImage::new(RomSlot::Char, &chargen)?);
        }
        if !dos.is_empty() {
            self.drive_rom = Some(RomImage::new(RomSlot::Vc1541, &dos)?);
        }

        self.cpu.load(&mut r)?;
        self.bus.mem.load(&mut r)?;
        self.bus.vic.load(&mut r)?;
        self.bus.cia1.load(&mut r)?;
        self.bus.cia2.load(&mut r)?;
        self.bus.sid.load(&mut r)?;
        self.bus.expansion.load(&mut r)?;
        self.bus.iec.load(&mut r)?;
        self.bus.keyboard.load(&mut r)?;

        if r.read_bool()? {
            let rom = self
                .drive_rom
                .as_ref()
                .ok_or(Error::RomMissing)?
                .data()
                .to_vec();
            let mut drive = Drive::new(IecDevice::Drive8, rom);
            drive.load(&mut r)?;
            self.bus.drive8 = Some(drive);
        } else {
            self.bus.drive8 = None;
        }

        self.queue.put_message(MsgType::SnapshotTaken, 0);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Minimal ROM set: the kernal is a NOP sled whose reset vector
    /// points at its own start.
    pub fn make_c64() -> C64 {
        let mut c64 = C64::new(Config::default());
        let mut kernal = vec![0xEA; 0x2000];
        kernal[0x1FFC] = 0x00;
        kernal[0x1FFD] = 0xE0;
        c64.install_kernal_rom(&kernal).unwrap();
        c64.install_basic_rom(&[0xEA; 0x2000]).unwrap();
        c64.install_char_rom(&[0x00; 0x1000]).unwrap();
        c64.reset();
        c64
    }

    #[test]
    fn master_clock_counts_every_cycle() {
        let mut c64 = make_c64();
        c64.execute_cycles(100);
        assert_eq!(c64.master_clock(), 100);
    }

    #[test]
    fn frame_has_exact_cycle_count() {
        let mut c64 = make_c64();
        c64.execute_one_frame();
        assert_eq!(c64.master_clock(), 312 * 63);
        assert_eq!(c64.frame(), 1);
        c64.execute_one_frame();
        assert_eq!(c64.master_clock(), 2 * 312 * 63);
    }

    #[test]
    fn reset_reads_kernal_vector() {
        let c64 = make_c64();
        assert_eq!(c64.cpu.regs.pc, 0xE000);
    }

    #[test]
    fn is_ready_requires_roms() {
        let c64 = C64::new(Config::default());
        assert!(matches!(c64.is_ready(), Err(Error::RomMissing)));
        let c64 = make_c64();
        assert!(c64.is_ready().is_ok());
    }

    #[test]
    fn config_changes_apply_at_frame_boundary() {
        let mut c64 = make_c64();
        assert!(c64.configure(ConfigOption::SidRevision, 1));
        // Not applied yet
        assert_eq!(c64.config().sid_revision, sid_6581::SidModel::Mos6581);
        c64.execute_one_frame();
        assert_eq!(c64.config().sid_revision, sid_6581::SidModel::Mos8580);
    }

    #[test]
    fn invalid_config_rejected() {
        let mut c64 = make_c64();
        assert!(!c64.configure(ConfigOption::VicModel, 17));
    }

    #[test]
    fn keyboard_reaches_cia1() {
        let mut c64 = make_c64();
        c64.press_key(1, 2);
        // Drive all columns low, then read the rows through the bus
        use cpu_6510::Bus;
        c64.bus.write(0xDC02, 0xFF);
        c64.bus.write(0xDC00, 0x00);
        let rows = c64.bus.read(0xDC01);
        assert_eq!(rows & 0x04, 0);
    }

    #[test]
    fn color_ram_upper_nibble_is_open_bus() {
        let mut c64 = make_c64();
        use cpu_6510::Bus;
        c64.bus.write(0xD800, 0x05);
        let value = c64.bus.read(0xD800);
        assert_eq!(value & 0x0F, 0x05);
    }

    #[test]
    fn prg_injection_sets_basic_pointers() {
        let mut c64 = make_c64();
        let prg = PrgFile::from_bytes(&[0x01, 0x08, 0xAA, 0xBB]).unwrap();
        c64.flash_prg(&prg);
        assert_eq!(c64.bus.mem.ram_read(0x0801), 0xAA);
        assert_eq!(c64.bus.mem.ram_read(0x0802), 0xBB);
        assert_eq!(c64.bus.mem.ram_read(0x2D), 0x03);
        assert_eq!(c64.bus.mem.ram_read(0x2E), 0x08);
    }

    #[test]
    fn snapshot_round_trip_preserves_clock_and_ram() {
        let mut c64 = make_c64();
        c64.bus.mem.ram_write(0x1234, 0x99);
        c64.execute_cycles(5000);

        let snapshot = c64.take_snapshot();
        let mut restored = C64::new(Config::default());
        restored.restore_snapshot(&snapshot).unwrap();

        assert_eq!(restored.master_clock(), c64.master_clock());
        assert_eq!(restored.bus.mem.ram_read(0x1234), 0x99);
        assert_eq!(restored.cpu.regs.pc, c64.cpu.regs.pc);
    }

    #[test]
    fn snapshot_determinism_after_restore() {
        let mut a = make_c64();
        a.execute_cycles(10_000);
        let snapshot = a.take_snapshot();

        let mut b = C64::new(Config::default());
        b.restore_snapshot(&snapshot).unwrap();

        a.execute_cycles(50_000);
        b.execute_cycles(50_000);
        assert_eq!(a.take_snapshot(), b.take_snapshot());
    }
}
