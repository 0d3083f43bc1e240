//! Expansion port and cartridge emulation.
//!
//! The port owns the GAME/EXROM lines and dispatches ROML/ROMH windows
//! and the I/O-1/I/O-2 pages ($DE00/$DF00) to the attached cartridge.
//! Each supported hardware type carries its own bank pointers and the
//! small register machine behind its I/O pages:
//!
//! - type 0, plain 8K/16K/ultimax ROMs
//! - type 3, Final Cartridge III: four 16K banks, control at $DFFF
//! - type 5, Ocean: up to 64 8K banks, bank select at $DE00
//! - type 16, Warp Speed: 16K, enabled/disabled via I/O pokes
//! - type 19, Magic Desk: up to 128 8K banks, bit 7 cuts EXROM
//! - type 32, EasyFlash: two Am29F040B chips plus 256 bytes of RAM

pub mod flashrom;

pub use flashrom::{FlashRom, FlashState};

use emu_core::{HardwareComponent, ReadError, SnapshotReader, SnapshotWriter};
use log::info;

use crate::error::{Error, Result};
use crate::files::{ChipKind, CrtFile};

/// The supported cartridge hardware, with per-variant state.
pub enum Cartridge {
    Normal {
        roml: Vec<u8>,
        romh: Vec<u8>,
        exrom: bool,
        game: bool,
    },
    FinalIII {
        /// Four banks of (ROML, ROMH) halves.
        banks: Vec<(Vec<u8>, Vec<u8>)>,
        bank: u8,
        /// Register lock (bit 7 of $DFFF).
        hidden: bool,
        exrom: bool,
        game: bool,
        nmi: bool,
    },
    Ocean {
        banks: Vec<Vec<u8>>,
        bank: u8,
        exrom: bool,
        game: bool,
    },
    WarpSpeed {
        /// 16 KiB: ROML half then ROMH half.
        rom: Vec<u8>,
        enabled: bool,
    },
    MagicDesk {
        banks: Vec<Vec<u8>>,
        bank: u8,
        disabled: bool,
    },
    EasyFlash {
        /// Low chip (ROML banks) and high chip (ROMH banks).
        flash_lo: FlashRom,
        flash_hi: FlashRom,
        ram: [u8; 256],
        bank: u8,
        control: u8,
    },
}

impl Cartridge {
    /// Build a cartridge from a parsed CRT container.
    pub fn from_crt(crt: &CrtFile) -> Result<Self> {
        match crt.cartridge_type {
            0 => {
                let mut roml = Vec::new();
                let mut romh = Vec::new();
                for chip in &crt.chips {
                    match chip.load_address {
                        0x8000 => {
                            if chip.data.len() > 0x2000 {
                                // One 16K packet covers both windows
                                roml = chip.data[..0x2000].to_vec();
                                romh = chip.data[0x2000..].to_vec();
                            } else {
                                roml = chip.data.clone();
                            }
                        }
                        0xA000 | 0xE000 => romh = chip.data.clone(),
                        other => {
                            return Err(Error::CantRead(format!(
                                "unexpected CHIP load address ${other:04X}"
                            )));
                        }
                    }
                }
                Ok(Cartridge::Normal {
                    roml,
                    romh,
                    exrom: crt.exrom,
                    game: crt.game,
                })
            }
            3 => {
                let mut banks = vec![(Vec::new(), Vec::new()); 4];
                for chip in &crt.chips {
                    let bank = usize::from(chip.bank) & 3;
                    if chip.data.len() >= 0x4000 {
                        banks[bank] = (
                            chip.data[..0x2000].to_vec(),
                            chip.data[0x2000..0x4000].to_vec(),
                        );
                    } else if chip.load_address == 0x8000 {
                        banks[bank].0 = chip.data.clone();
                    } else {
                        banks[bank].1 = chip.data.clone();
                    }
                }
                Ok(Cartridge::FinalIII {
                    banks,
                    bank: 0,
                    hidden: false,
                    exrom: false,
                    game: false,
                    nmi: false,
                })
            }
            5 => {
                let mut banks = vec![Vec::new(); crt.chips.len().max(1)];
                for chip in &crt.chips {
                    let bank = usize::from(chip.bank);
                    if bank >= banks.len() {
                        banks.resize(bank + 1, Vec::new());
                    }
                    banks[bank] = chip.data.clone();
                }
                Ok(Cartridge::Ocean {
                    banks,
                    bank: 0,
                    exrom: crt.exrom,
                    game: crt.game,
                })
            }
            16 => {
                let mut rom = vec![0xFF; 0x4000];
                for chip in &crt.chips {
                    match chip.load_address {
                        0x8000 => {
                            let len = chip.data.len().min(0x4000);
                            rom[..len].copy_from_slice(&chip.data[..len]);
                        }
                        0xA000 => {
                            let len = chip.data.len().min(0x2000);
                            rom[0x2000..0x2000 + len].copy_from_slice(&chip.data[..len]);
                        }
                        other => {
                            return Err(Error::CantRead(format!(
                                "unexpected CHIP load address ${other:04X}"
                            )));
                        }
                    }
                }
                Ok(Cartridge::WarpSpeed { rom, enabled: true })
            }
            19 => {
                let mut banks = vec![Vec::new(); crt.chips.len().max(1)];
                for chip in &crt.chips {
                    let bank = usize::from(chip.bank);
                    if bank >= banks.len() {
                        banks.resize(bank + 1, Vec::new());
                    }
                    banks[bank] = chip.data.clone();
                }
                Ok(Cartridge::MagicDesk {
                    banks,
                    bank: 0,
                    disabled: false,
                })
            }
            32 => {
                let mut flash_lo = FlashRom::new();
                let mut flash_hi = FlashRom::new();
                for chip in &crt.chips {
                    if chip.kind == ChipKind::Ram {
                        continue;
                    }
                    let bank = usize::from(chip.bank);
                    match chip.load_address {
                        0x8000 => flash_lo.load_bank(bank, &chip.data),
                        0xA000 | 0xE000 => flash_hi.load_bank(bank, &chip.data),
                        _ => {}
                    }
                }
                Ok(Cartridge::EasyFlash {
                    flash_lo,
                    flash_hi,
                    ram: [0; 256],
                    bank: 0,
                    // Boot state: GAME low, EXROM high (ultimax), so
                    // the menu in the upper flash half starts
                    control: 0,
                })
            }
            other => Err(Error::UnsupportedCrt(other)),
        }
    }

    /// Current GAME/EXROM levels (true = high / inactive).
    #[must_use]
    pub fn lines(&self) -> (bool, bool) {
        match self {
            Cartridge::Normal { game, exrom, .. } => (*game, *exrom),
            Cartridge::FinalIII { game, exrom, .. } => (*game, *exrom),
            Cartridge::Ocean { game, exrom, .. } => (*game, *exrom),
            Cartridge::WarpSpeed { enabled, .. } => (!enabled, !enabled),
            Cartridge::MagicDesk { disabled, .. } => (true, *disabled),
            Cartridge::EasyFlash { control, .. } => {
                if control & 0x04 != 0 {
                    // MODE set: bits 0/1 drive the lines (set = low)
                    (control & 0x01 == 0, control & 0x02 == 0)
                } else {
                    // Boot jumper: ultimax
                    (false, true)
                }
            }
        }
    }

    /// NMI line toward the CPU (Final Cartridge III freeze logic).
    #[must_use]
    pub fn nmi_line(&self) -> bool {
        matches!(self, Cartridge::FinalIII { nmi: true, .. })
    }
}

/// The expansion port: dispatches windows to the attached cartridge.
pub struct ExpansionPort {
    cart: Option<Cartridge>,
}

fn bank_byte(banks: &[Vec<u8>], bank: u8, offset: u16) -> u8 {
    banks
        .get(usize::from(bank))
        .and_then(|b| b.get(usize::from(offset) % b.len().max(1)))
        .copied()
        .unwrap_or(0xFF)
}

impl ExpansionPort {
    #[must_use]
    pub fn new() -> Self {
        Self { cart: None }
    }

    /// Attach a cartridge built from a CRT container.
    pub fn attach(&mut self, crt: &CrtFile) -> Result<()> {
        let cart = Cartridge::from_crt(crt)?;
        info!("expansion: attached \"{}\" (type {})", crt.name, crt.cartridge_type);
        self.cart = Some(cart);
        Ok(())
    }

    pub fn detach(&mut self) {
        self.cart = None;
    }

    #[must_use]
    pub fn attached(&self) -> bool {
        self.cart.is_some()
    }

    /// GAME/EXROM levels (high when no cartridge is present).
    #[must_use]
    pub fn lines(&self) -> (bool, bool) {
        self.cart.as_ref().map_or((true, true), Cartridge::lines)
    }

    #[must_use]
    pub fn nmi_line(&self) -> bool {
        self.cart.as_ref().is_some_and(Cartridge::nmi_line)
    }

    /// Read from the ROML window ($8000-$9FFF); `offset` is 0-$1FFF.
    #[must_use]
    pub fn peek_roml(&self, offset: u16) -> u8 {
        match &self.cart {
            Some(Cartridge::Normal { roml, .. }) => {
                roml.get(usize::from(offset)).copied().unwrap_or(0xFF)
            }
            Some(Cartridge::FinalIII { banks, bank, .. }) => banks
                [usize::from(*bank) & 3]
                .0
                .get(usize::from(offset))
                .copied()
                .unwrap_or(0xFF),
            Some(Cartridge::Ocean { banks, bank, .. }) => bank_byte(banks, *bank, offset),
            Some(Cartridge::WarpSpeed { rom, .. }) => rom[usize::from(offset)],
            Some(Cartridge::MagicDesk { banks, bank, .. }) => bank_byte(banks, *bank, offset),
            Some(Cartridge::EasyFlash { flash_lo, bank, .. }) => {
                flash_lo.peek(u32::from(*bank) << 13 | u32::from(offset))
            }
            None => 0xFF,
        }
    }

    /// Read from the ROMH window ($A000 or $E000); `offset` is 0-$1FFF.
    #[must_use]
    pub fn peek_romh(&self, offset: u16) -> u8 {
        match &self.cart {
            Some(Cartridge::Normal { romh, .. }) => {
                romh.get(usize::from(offset)).copied().unwrap_or(0xFF)
            }
            Some(Cartridge::FinalIII { banks, bank, .. }) => banks
                [usize::from(*bank) & 3]
                .1
                .get(usize::from(offset))
                .copied()
                .unwrap_or(0xFF),
            Some(Cartridge::WarpSpeed { rom, .. }) => rom[0x2000 + usize::from(offset)],
            Some(Cartridge::EasyFlash { flash_hi, bank, .. }) => {
                flash_hi.peek(u32::from(*bank) << 13 | u32::from(offset))
            }
            _ => 0xFF,
        }
    }

    /// Write into the ROML window (flash chips listen to these).
    pub fn poke_roml(&mut self, offset: u16, value: u8) {
        if let Some(Cartridge::EasyFlash { flash_lo, bank, .. }) = &mut self.cart {
            flash_lo.poke(u32::from(*bank) << 13 | u32::from(offset), value);
        }
    }

    /// Write into the ROMH window.
    pub fn poke_romh(&mut self, offset: u16, value: u8) {
        if let Some(Cartridge::EasyFlash { flash_hi, bank, .. }) = &mut self.cart {
            flash_hi.poke(u32::from(*bank) << 13 | u32::from(offset), value);
        }
    }

    /// Read from I/O-1 ($DE00-$DEFF).
    #[must_use]
    pub fn peek_io1(&self, addr: u16) -> u8 {
        match &self.cart {
            Some(Cartridge::FinalIII { banks, bank, .. }) => banks
                [usize::from(*bank) & 3]
                .1
                .get(usize::from(0x1E00 | (addr & 0xFF)))
                .copied()
                .unwrap_or(0xFF),
            Some(Cartridge::WarpSpeed { rom, .. }) => {
                rom[usize::from(0x1E00 | (addr & 0xFF))]
            }
            _ => 0xFF,
        }
    }

    /// Read from I/O-2 ($DF00-$DFFF).
    #[must_use]
    pub fn peek_io2(&self, addr: u16) -> u8 {
        match &self.cart {
            Some(Cartridge::FinalIII { banks, bank, .. }) => banks
                [usize::from(*bank) & 3]
                .1
                .get(usize::from(0x1F00 | (addr & 0xFF)))
                .copied()
                .unwrap_or(0xFF),
            Some(Cartridge::WarpSpeed { rom, .. }) => {
                rom[usize::from(0x1F00 | (addr & 0xFF))]
            }
            Some(Cartridge::EasyFlash { ram, .. }) => ram[usize::from(addr & 0xFF)],
            _ => 0xFF,
        }
    }

    /// Write to I/O-1.
    pub fn poke_io1(&mut self, addr: u16, value: u8) {
        match &mut self.cart {
            Some(Cartridge::Ocean { banks, bank, .. }) => {
                *bank = value & 0x3F;
                if usize::from(*bank) >= banks.len() {
                    *bank = 0;
                }
            }
            Some(Cartridge::WarpSpeed { enabled, .. }) => {
                // Any I/O-1 write switches the ROM in
                *enabled = true;
            }
            Some(Cartridge::MagicDesk { banks, bank, disabled }) => {
                *bank = value & 0x7F;
                if usize::from(*bank) >= banks.len() {
                    *bank = 0;
                }
                *disabled = value & 0x80 != 0;
            }
            Some(Cartridge::EasyFlash { bank, control, .. }) => match addr & 0x0F {
                0x00 => *bank = value & 0x3F,
                0x02 => *control = value,
                _ => {}
            },
            _ => {}
        }
    }

    /// Write to I/O-2.
    pub fn poke_io2(&mut self, addr: u16, value: u8) {
        match &mut self.cart {
            Some(Cartridge::FinalIII {
                bank,
                hidden,
                exrom,
                game,
                nmi,
                ..
            }) => {
                if addr & 0xFF == 0xFF && !*hidden {
                    *bank = value & 0x03;
                    *exrom = value & 0x10 != 0;
                    *game = value & 0x20 != 0;
                    *nmi = value & 0x40 == 0;
                    *hidden = value & 0x80 != 0;
                }
            }
            Some(Cartridge::WarpSpeed { enabled, .. }) => {
                // Any I/O-2 write switches the ROM out
                *enabled = false;
            }
            Some(Cartridge::EasyFlash { ram, .. }) => {
                ram[usize::from(addr & 0xFF)] = value;
            }
            _ => {}
        }
    }
}

impl Default for ExpansionPort {
    fn default() -> Self {
        Self::new()
    }
}

impl HardwareComponent for ExpansionPort {
    fn reset(&mut self) {
        match &mut self.cart {
            Some(Cartridge::FinalIII {
                bank,
                hidden,
                exrom,
                game,
                nmi,
                ..
            }) => {
                *bank = 0;
                *hidden = false;
                *exrom = false;
                *game = false;
                *nmi = false;
            }
            Some(Cartridge::Ocean { bank, .. }) => *bank = 0,
            Some(Cartridge::WarpSpeed { enabled, .. }) => *enabled = true,
            Some(Cartridge::MagicDesk { bank, disabled, .. }) => {
                *bank = 0;
                *disabled = false;
            }
            Some(Cartridge::EasyFlash {
                flash_lo,
                flash_hi,
                bank,
                control,
                ..
            }) => {
                flash_lo.reset();
                flash_hi.reset();
                *bank = 0;
                *control = 0;
            }
            _ => {}
        }
    }

    fn save_persistent(&self, w: &mut SnapshotWriter) {
        match &self.cart {
            None => w.write_u8(0),
            Some(Cartridge::Normal {
                roml,
                romh,
                exrom,
                game,
            }) => {
                w.write_u8(1);
                w.write_vec(roml);
                w.write_vec(romh);
                w.write_bool(*exrom);
                w.write_bool(*game);
            }
            Some(Cartridge::FinalIII { banks, .. }) => {
                w.write_u8(2);
                for (lo, hi) in banks {
                    w.write_vec(lo);
                    w.write_vec(hi);
                }
            }
            Some(Cartridge::Ocean {
                banks,
                exrom,
                game,
                ..
            }) => {
                w.write_u8(3);
                w.write_u32(banks.len() as u32);
                for b in banks {
                    w.write_vec(b);
                }
                w.write_bool(*exrom);
                w.write_bool(*game);
            }
            Some(Cartridge::WarpSpeed { rom, .. }) => {
                w.write_u8(4);
                w.write_vec(rom);
            }
            Some(Cartridge::MagicDesk { banks, .. }) => {
                w.write_u8(5);
                w.write_u32(banks.len() as u32);
                for b in banks {
                    w.write_vec(b);
                }
            }
            Some(Cartridge::EasyFlash {
                flash_lo, flash_hi, ..
            }) => {
                w.write_u8(6);
                flash_lo.save_persistent(w);
                flash_hi.save_persistent(w);
            }
        }
    }

    fn save_reset(&self, w: &mut SnapshotWriter) {
        match &self.cart {
            None | Some(Cartridge::Normal { .. }) => {}
            Some(Cartridge::FinalIII {
                bank,
                hidden,
                exrom,
                game,
                nmi,
                ..
            }) => {
                w.write_u8(*bank);
                w.write_bool(*hidden);
                w.write_bool(*exrom);
                w.write_bool(*game);
                w.write_bool(*nmi);
            }
            Some(Cartridge::Ocean { bank, .. }) => w.write_u8(*bank),
            Some(Cartridge::WarpSpeed { enabled, .. }) => w.write_bool(*enabled),
            Some(Cartridge::MagicDesk { bank, disabled, .. }) => {
                w.write_u8(*bank);
                w.write_bool(*disabled);
            }
            Some(Cartridge::EasyFlash {
                flash_lo,
                flash_hi,
                ram,
                bank,
                control,
            }) => {
                flash_lo.save_reset(w);
                flash_hi.save_reset(w);
                w.write_bytes(ram);
                w.write_u8(*bank);
                w.write_u8(*control);
            }
        }
    }

    fn load_persistent(&mut self, r: &mut SnapshotReader) -> std::result::Result<(), ReadError> {
        self.cart = match r.read_u8()? {
            1 => Some(Cartridge::Normal {
                roml: r.read_vec()?,
                romh: r.read_vec()?,
                exrom: r.read_bool()?,
                game: r.read_bool()?,
            }),
            2 => {
                let mut banks = Vec::with_capacity(4);
                for _ in 0..4 {
                    banks.push((r.read_vec()?, r.read_vec()?));
                }
                Some(Cartridge::FinalIII {
                    banks,
                    bank: 0,
                    hidden: false,
                    exrom: false,
                    game: false,
                    nmi: false,
                })
            }
            3 => {
                let n = r.read_u32()? as usize;
                let mut banks = Vec::with_capacity(n);
                for _ in 0..n {
                    banks.push(r.read_vec()?);
                }
                Some(Cartridge::Ocean {
                    banks,
                    bank: 0,
                    exrom: r.read_bool()?,
                    game: r.read_bool()?,
                })
            }
            4 => Some(Cartridge::WarpSpeed {
                rom: r.read_vec()?,
                enabled: true,
            }),
            5 => {
                let n = r.read_u32()? as usize;
                let mut banks = Vec::with_capacity(n);
                for _ in 0..n {
                    banks.push(r.read_vec()?);
                }
                Some(Cartridge::MagicDesk {
                    banks,
                    bank: 0,
                    disabled: false,
                })
            }
            6 => {
                let mut flash_lo = FlashRom::new();
                let mut flash_hi = FlashRom::new();
                flash_lo.load_persistent(r)?;
                flash_hi.load_persistent(r)?;
                Some(Cartridge::EasyFlash {
                    flash_lo,
                    flash_hi,
                    ram: [0; 256],
                    bank: 0,
                    control: 0,
                })
            }
            _ => None,
        };
        Ok(())
    }

    fn load_reset(&mut self, r: &mut SnapshotReader) -> std::result::Result<(), ReadError> {
        match &mut self.cart {
            None | Some(Cartridge::Normal { .. }) => {}
            Some(Cartridge::FinalIII {
                bank,
                hidden,
                exrom,
                game,
                nmi,
                ..
            }) => {
                *bank = r.read_u8()?;
                *hidden = r.read_bool()?;
                *exrom = r.read_bool()?;
                *game = r.read_bool()?;
                *nmi = r.read_bool()?;
            }
            Some(Cartridge::Ocean { bank, .. }) => *bank = r.read_u8()?,
            Some(Cartridge::WarpSpeed { enabled, .. }) => *enabled = r.read_bool()?,
            Some(Cartridge::MagicDesk { bank, disabled, .. }) => {
                *bank = r.read_u8()?;
                *disabled = r.read_bool()?;
            }
            Some(Cartridge::EasyFlash {
                flash_lo,
                flash_hi,
                ram,
                bank,
                control,
            }) => {
                flash_lo.load_reset(r)?;
                flash_hi.load_reset(r)?;
                r.read_bytes(ram)?;
                *bank = r.read_u8()?;
                *control = r.read_u8()?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::files::crt::build_crt;

    #[test]
    fn no_cartridge_floats_lines_high() {
        let port = ExpansionPort::new();
        assert_eq!(port.lines(), (true, true));
        assert_eq!(port.peek_roml(0), 0xFF);
    }

    #[test]
    fn normal_8k() {
        let rom = vec![0xAB; 0x2000];
        let crt = build_crt(0, 0, 1, &[(0, 0x8000, &rom)]);
        let mut port = ExpansionPort::new();
        port.attach(&CrtFile::from_bytes(&crt).unwrap()).unwrap();
        assert_eq!(port.lines(), (true, false)); // GAME high, EXROM low
        assert_eq!(port.peek_roml(0x123), 0xAB);
    }

    #[test]
    fn ocean_bank_switching() {
        let banks: Vec<Vec<u8>> = (0..8u8).map(|b| vec![b; 0x2000]).collect();
        let chips: Vec<(u16, u16, &[u8])> = banks
            .iter()
            .enumerate()
            .map(|(i, d)| (i as u16, 0x8000, d.as_slice()))
            .collect();
        let crt = build_crt(5, 0, 1, &chips);
        let mut port = ExpansionPort::new();
        port.attach(&CrtFile::from_bytes(&crt).unwrap()).unwrap();

        assert_eq!(port.peek_roml(0), 0);
        port.poke_io1(0xDE00, 0x85); // Ocean writes carry bit 7
        assert_eq!(port.peek_roml(0), 5);
    }

    #[test]
    fn magic_desk_bit7_disables() {
        let banks: Vec<Vec<u8>> = (0..4u8).map(|b| vec![b + 0x10; 0x2000]).collect();
        let chips: Vec<(u16, u16, &[u8])> = banks
            .iter()
            .enumerate()
            .map(|(i, d)| (i as u16, 0x8000, d.as_slice()))
            .collect();
        let crt = build_crt(19, 0, 1, &chips);
        let mut port = ExpansionPort::new();
        port.attach(&CrtFile::from_bytes(&crt).unwrap()).unwrap();

        assert_eq!(port.lines(), (true, false));
        port.poke_io1(0xDE00, 0x02);
        assert_eq!(port.peek_roml(0), 0x12);
        port.poke_io1(0xDE00, 0x80);
        assert_eq!(port.lines(), (true, true)); // EXROM released
    }

    #[test]
    fn final_iii_control_register() {
        let banks: Vec<Vec<u8>> = (0..4u8).map(|b| vec![b + 0x40; 0x4000]).collect();
        let chips: Vec<(u16, u16, &[u8])> = banks
            .iter()
            .enumerate()
            .map(|(i, d)| (i as u16, 0x8000, d.as_slice()))
            .collect();
        let crt = build_crt(3, 0, 0, &chips);
        let mut port = ExpansionPort::new();
        port.attach(&CrtFile::from_bytes(&crt).unwrap()).unwrap();

        // Starts in 16K mode, bank 0
        assert_eq!(port.lines(), (false, false));
        assert_eq!(port.peek_roml(0), 0x40);

        // Select bank 2
        port.poke_io2(0xDFFF, 0x02);
        assert_eq!(port.peek_roml(0), 0x42);

        // Lock the register: further writes are ignored
        port.poke_io2(0xDFFF, 0x82);
        port.poke_io2(0xDFFF, 0x01);
        assert_eq!(port.peek_roml(0), 0x42);
    }

    #[test]
    fn warp_speed_io_toggles_visibility() {
        let rom = vec![0x77; 0x4000];
        let crt = build_crt(16, 0, 0, &[(0, 0x8000, &rom)]);
        let mut port = ExpansionPort::new();
        port.attach(&CrtFile::from_bytes(&crt).unwrap()).unwrap();

        assert_eq!(port.lines(), (false, false)); // 16K visible
        assert_eq!(port.peek_io1(0xDE00), 0x77);
        port.poke_io2(0xDF00, 0x00);
        assert_eq!(port.lines(), (true, true)); // Switched out
        port.poke_io1(0xDE00, 0x00);
        assert_eq!(port.lines(), (false, false));
    }

    #[test]
    fn easyflash_boots_in_ultimax_and_programs() {
        let bank0 = vec![0x11; 0x2000];
        let crt = build_crt(32, 1, 0, &[(0, 0x8000, &bank0)]);
        let mut port = ExpansionPort::new();
        port.attach(&CrtFile::from_bytes(&crt).unwrap()).unwrap();

        // Boot jumper: GAME low, EXROM high
        assert_eq!(port.lines(), (false, true));
        assert_eq!(port.peek_roml(0), 0x11);

        // Switch to 16K mode via the control register
        port.poke_io1(0xDE02, 0x07);
        assert_eq!(port.lines(), (false, false));

        // On-cartridge RAM at $DF00
        port.poke_io2(0xDF42, 0x5A);
        assert_eq!(port.peek_io2(0xDF42), 0x5A);

        // Flash command sequence through the ROML window: the command
        // addresses land at $8555/$82AA within the 8K bank
        port.poke_io1(0xDE00, 0x00);
        port.poke_roml(0x0555, 0xAA);
        port.poke_roml(0x02AA, 0x55);
        port.poke_roml(0x0555, 0xA0);
        port.poke_roml(0x0100, 0x00);
        assert_eq!(port.peek_roml(0x0100), 0x00);
    }
}
