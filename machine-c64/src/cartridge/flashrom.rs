//! Am29F040B flash ROM, as found on EasyFlash cartridges.
//!
//! 512 KiB in eight 64 KiB sectors. Commands are issued through magic
//! write sequences: $AA to $555, $55 to $2AA, then the command byte to
//! $555 (addresses compared on their low 11 bits only). Any write that
//! does not fit the expected pattern drops the machine back to its base
//! state. Programming can only clear bits; erasing fills with $FF.

use emu_core::{HardwareComponent, ReadError, SnapshotReader, SnapshotWriter};
use log::warn;

/// Total size and sector geometry.
pub const FLASH_SIZE: usize = 512 * 1024;
pub const SECTOR_SIZE: usize = 64 * 1024;
pub const NUM_SECTORS: usize = FLASH_SIZE / SECTOR_SIZE;

/// Manufacturer/device identifiers returned in autoselect mode.
const MANUFACTURER_ID: u8 = 0x01; // AMD
const DEVICE_ID: u8 = 0xA4; // Am29F040B

/// Command state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashState {
    Read,
    Magic1,
    Magic2,
    Autoselect,
    ByteProgram,
    ByteProgramError,
    EraseMagic1,
    EraseMagic2,
    EraseSelect,
    ChipErase,
    SectorErase,
    SectorEraseTimeout,
    SectorEraseSuspend,
}

/// The flash chip.
pub struct FlashRom {
    rom: Vec<u8>,
    state: FlashState,
    /// State to fall back to once a command completes or aborts.
    base_state: FlashState,
}

/// First command address: low 11 bits equal $555.
fn first_command_addr(addr: u32) -> bool {
    addr & 0x7FF == 0x555
}

/// Second command address: low 11 bits equal $2AA.
fn second_command_addr(addr: u32) -> bool {
    addr & 0x7FF == 0x2AA
}

impl FlashRom {
    /// A blank (erased) chip.
    #[must_use]
    pub fn new() -> Self {
        Self {
            rom: vec![0xFF; FLASH_SIZE],
            state: FlashState::Read,
            base_state: FlashState::Read,
        }
    }

    /// Load one 8 KiB bank (as delivered in CRT CHIP packets).
    pub fn load_bank(&mut self, bank: usize, data: &[u8]) {
        if bank >= 64 {
            warn!("flash: ignoring out-of-range bank {bank}");
            return;
        }
        let offset = bank * 0x2000;
        let len = data.len().min(0x2000);
        self.rom[offset..offset + len].copy_from_slice(&data[..len]);
    }

    #[must_use]
    pub fn state(&self) -> FlashState {
        self.state
    }

    /// Read a byte. In autoselect mode the chip identifies itself.
    #[must_use]
    pub fn peek(&self, addr: u32) -> u8 {
        let addr = addr as usize % FLASH_SIZE;
        match self.state {
            FlashState::Autoselect => match addr & 0x7FF {
                0x000 => MANUFACTURER_ID,
                0x001 => DEVICE_ID,
                // Sector protection query: nothing is protected
                0x002 => 0x00,
                _ => self.rom[addr],
            },
            _ => self.rom[addr],
        }
    }

    /// Read without side effects (none exist on this chip).
    #[must_use]
    pub fn spypeek(&self, addr: u32) -> u8 {
        self.peek(addr)
    }

    /// Write a byte: advance the command state machine.
    pub fn poke(&mut self, addr: u32, value: u8) {
        match self.state {
            FlashState::Read => {
                if first_command_addr(addr) && value == 0xAA {
                    self.state = FlashState::Magic1;
                }
            }
            FlashState::Magic1 => {
                if second_command_addr(addr) && value == 0x55 {
                    self.state = FlashState::Magic2;
                } else {
                    self.state = self.base_state;
                }
            }
            FlashState::Magic2 => {
                if first_command_addr(addr) {
                    match value {
                        0xA0 => self.state = FlashState::ByteProgram,
                        0x80 => self.state = FlashState::EraseMagic1,
                        0x90 => {
                            self.state = FlashState::Autoselect;
                            self.base_state = FlashState::Autoselect;
                        }
                        0xF0 => {
                            self.state = FlashState::Read;
                            self.base_state = FlashState::Read;
                        }
                        _ => self.state = self.base_state,
                    }
                } else {
                    self.state = self.base_state;
                }
            }
            FlashState::ByteProgram => {
                let index = addr as usize % FLASH_SIZE;
                // Programming can only pull bits low; raising one is a
                // program error the host must reset out of
                if value & !self.rom[index] != 0 {
                    self.rom[index] &= value;
                    self.state = FlashState::ByteProgramError;
                } else {
                    self.rom[index] &= value;
                    self.state = FlashState::Read;
                    self.base_state = FlashState::Read;
                }
            }
            FlashState::ByteProgramError => {
                // Only a reset command leaves the error state
                if value == 0xF0 {
                    self.state = FlashState::Read;
                    self.base_state = FlashState::Read;
                }
            }
            FlashState::Autoselect => {
                if value == 0xF0 {
                    self.state = FlashState::Read;
                    self.base_state = FlashState::Read;
                } else if first_command_addr(addr) && value == 0xAA {
                    self.state = FlashState::Magic1;
                }
            }
            FlashState::EraseMagic1 => {
                if first_command_addr(addr) && value == 0xAA {
                    self.state = FlashState::EraseMagic2;
                } else {
                    self.state = self.base_state;
                }
            }
            FlashState::EraseMagic2 => {
                if second_command_addr(addr) && value == 0x55 {
                    self.state = FlashState::EraseSelect;
                } else {
                    self.state = self.base_state;
                }
            }
            FlashState::EraseSelect => {
                if first_command_addr(addr) && value == 0x10 {
                    self.state = FlashState::ChipErase;
                    self.rom.fill(0xFF);
                    self.state = FlashState::Read;
                    self.base_state = FlashState::Read;
                } else if value == 0x30 {
                    self.state = FlashState::SectorErase;
                    self.erase_sector(addr);
                    // A short window accepts further sector addresses
                    self.state = FlashState::SectorEraseTimeout;
                } else {
                    self.state = self.base_state;
                }
            }
            FlashState::SectorEraseTimeout => match value {
                0x30 => {
                    self.state = FlashState::SectorErase;
                    self.erase_sector(addr);
                    self.state = FlashState::SectorEraseTimeout;
                }
                0xB0 => self.state = FlashState::SectorEraseSuspend,
                _ => {
                    self.state = FlashState::Read;
                    self.base_state = FlashState::Read;
                }
            },
            FlashState::SectorEraseSuspend => {
                if value == 0x30 {
                    self.state = FlashState::SectorEraseTimeout;
                }
            }
            FlashState::ChipErase | FlashState::SectorErase => {
                // Erases complete within the same poke; unreachable as
                // resting states
                self.state = self.base_state;
            }
        }
    }

    fn erase_sector(&mut self, addr: u32) {
        let sector = (addr as usize % FLASH_SIZE) / SECTOR_SIZE;
        let start = sector * SECTOR_SIZE;
        self.rom[start..start + SECTOR_SIZE].fill(0xFF);
    }
}

impl Default for FlashRom {
    fn default() -> Self {
        Self::new()
    }
}

impl HardwareComponent for FlashRom {
    fn reset(&mut self) {
        // Contents persist; only the state machine settles
        self.state = FlashState::Read;
        self.base_state = FlashState::Read;
    }

    fn save_persistent(&self, w: &mut SnapshotWriter) {
        w.write_bytes(&self.rom);
    }

    fn save_reset(&self, w: &mut SnapshotWriter) {
        let encode = |s: FlashState| -> u8 {
            match s {
                FlashState::Read => 0,
                FlashState::Magic1 => 1,
                FlashState::Magic2 => 2,
                FlashState::Autoselect => 3,
                FlashState::ByteProgram => 4,
                FlashState::ByteProgramError => 5,
                FlashState::EraseMagic1 => 6,
                FlashState::EraseMagic2 => 7,
                FlashState::EraseSelect => 8,
                FlashState::ChipErase => 9,
                FlashState::SectorErase => 10,
                FlashState::SectorEraseTimeout => 11,
                FlashState::SectorEraseSuspend => 12,
            }
        };
        w.write_u8(encode(self.state));
        w.write_u8(encode(self.base_state));
    }

    fn load_persistent(&mut self, r: &mut SnapshotReader) -> Result<(), ReadError> {
        r.read_bytes(&mut self.rom)
    }

    fn load_reset(&mut self, r: &mut SnapshotReader) -> Result<(), ReadError> {
        let decode = |v: u8| -> FlashState {
            match v {
                1 => FlashState::Magic1,
                2 => FlashState::Magic2,
                3 => FlashState::Autoselect,
                4 => FlashState::ByteProgram,
                5 => FlashState::ByteProgramError,
                6 => FlashState::EraseMagic1,
                7 => FlashState::EraseMagic2,
                8 => FlashState::EraseSelect,
                9 => FlashState::ChipErase,
                10 => FlashState::SectorErase,
                11 => FlashState::SectorEraseTimeout,
                12 => FlashState::SectorEraseSuspend,
                _ => FlashState::Read,
            }
        };
        self.state = decode(r.read_u8()?);
        self.base_state = decode(r.read_u8()?);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command(flash: &mut FlashRom, cmd: u8) {
        flash.poke(0x555, 0xAA);
        flash.poke(0x2AA, 0x55);
        flash.poke(0x555, cmd);
    }

    #[test]
    fn fresh_chip_reads_erased() {
        let flash = FlashRom::new();
        assert_eq!(flash.peek(0), 0xFF);
        assert_eq!(flash.peek(FLASH_SIZE as u32 - 1), 0xFF);
    }

    #[test]
    fn autoselect_returns_chip_ids() {
        let mut flash = FlashRom::new();
        command(&mut flash, 0x90);
        assert_eq!(flash.state(), FlashState::Autoselect);
        assert_eq!(flash.peek(0), 0x01);
        assert_eq!(flash.peek(1), 0xA4);

        // Reset returns to array reads
        flash.poke(0x1234, 0xF0);
        assert_eq!(flash.state(), FlashState::Read);
        assert_eq!(flash.peek(0), 0xFF);
    }

    #[test]
    fn command_addresses_compare_low_11_bits() {
        let mut flash = FlashRom::new();
        // $555 mirrored at $10555 etc.
        flash.poke(0x1_0555, 0xAA);
        assert_eq!(flash.state(), FlashState::Magic1);
        flash.poke(0x2_02AA, 0x55);
        assert_eq!(flash.state(), FlashState::Magic2);
    }

    #[test]
    fn byte_program_clears_bits_only() {
        let mut flash = FlashRom::new();
        command(&mut flash, 0xA0);
        flash.poke(0x1000, 0x0F);
        assert_eq!(flash.peek(0x1000), 0x0F);
        assert_eq!(flash.state(), FlashState::Read);

        // Second program of the same byte can only clear more bits
        command(&mut flash, 0xA0);
        flash.poke(0x1000, 0x03);
        assert_eq!(flash.peek(0x1000), 0x03);
    }

    #[test]
    fn raising_bits_is_a_program_error() {
        let mut flash = FlashRom::new();
        command(&mut flash, 0xA0);
        flash.poke(0x1000, 0x00);
        command(&mut flash, 0xA0);
        flash.poke(0x1000, 0xFF);
        assert_eq!(flash.state(), FlashState::ByteProgramError);
        // The cell did not gain bits
        assert_eq!(flash.peek(0x1000), 0x00);
        flash.poke(0, 0xF0);
        assert_eq!(flash.state(), FlashState::Read);
    }

    #[test]
    fn mismatched_sequence_falls_back() {
        let mut flash = FlashRom::new();
        flash.poke(0x555, 0xAA);
        flash.poke(0x555, 0x55); // Wrong address for the second write
        assert_eq!(flash.state(), FlashState::Read);
    }

    #[test]
    fn chip_erase_fills_ff() {
        let mut flash = FlashRom::new();
        command(&mut flash, 0xA0);
        flash.poke(0x100, 0x00);
        command(&mut flash, 0x80);
        flash.poke(0x555, 0xAA);
        flash.poke(0x2AA, 0x55);
        flash.poke(0x555, 0x10);
        assert_eq!(flash.peek(0x100), 0xFF);
        assert_eq!(flash.state(), FlashState::Read);
    }

    #[test]
    fn sector_erase_is_bounded() {
        let mut flash = FlashRom::new();
        // Program one byte in sector 0 and one in sector 1
        command(&mut flash, 0xA0);
        flash.poke(0x100, 0x00);
        command(&mut flash, 0xA0);
        flash.poke(SECTOR_SIZE as u32 + 0x100, 0x00);

        // Erase sector 0 only
        command(&mut flash, 0x80);
        flash.poke(0x555, 0xAA);
        flash.poke(0x2AA, 0x55);
        flash.poke(0x100, 0x30);
        assert_eq!(flash.state(), FlashState::SectorEraseTimeout);
        assert_eq!(flash.peek(0x100), 0xFF);
        assert_eq!(flash.peek(SECTOR_SIZE as u32 + 0x100), 0x00);

        // Leave the timeout window
        flash.poke(0, 0x00);
        assert_eq!(flash.state(), FlashState::Read);
    }

    #[test]
    fn f0_always_recovers_to_read() {
        let mut flash = FlashRom::new();
        flash.poke(0x555, 0xAA);
        flash.poke(0x2AA, 0x55);
        flash.poke(0x555, 0xF0);
        assert_eq!(flash.state(), FlashState::Read);
    }

    #[test]
    fn snapshot_round_trip() {
        let mut flash = FlashRom::new();
        command(&mut flash, 0xA0);
        flash.poke(0x42, 0x24);

        let mut w = SnapshotWriter::new();
        flash.save(&mut w);
        let bytes = w.into_bytes();

        let mut restored = FlashRom::new();
        restored.load(&mut SnapshotReader::new(&bytes)).unwrap();
        assert_eq!(restored.peek(0x42), 0x24);
        assert_eq!(restored.state(), FlashState::Read);
    }
}
