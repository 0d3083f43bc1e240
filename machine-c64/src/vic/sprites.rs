//! VIC-II sprite unit.
//!
//! Per sprite: the 6-bit data counters MC/MCBASE, the DMA and display
//! latches, the Y-expansion flip flop, and the three data bytes fetched
//! by the most recent s-access. The cycle positions of the DMA checks
//! and fetches live in the per-cycle dispatch table; this module holds
//! the state transitions and the line compositor.

use emu_core::{ReadError, SnapshotReader, SnapshotWriter};

/// State of one sprite channel.
#[derive(Clone, Copy)]
pub struct Sprite {
    /// Data counter (0-63), reloaded from `mc_base` at cycle 58.
    pub mc: u8,
    /// Data counter base, advanced at cycles 15/16.
    pub mc_base: u8,
    /// DMA latch: the sprite fetches data this line.
    pub dma: bool,
    /// Display latch: the shift register feeds pixels this line.
    pub display: bool,
    /// Y-expansion flip flop. Held set while MxYE is cleared; toggled
    /// at cycle 55 while MxYE is set, halving the data advance rate.
    pub exp_flop: bool,
    /// Pointer byte from the latest p-access.
    pub pointer: u8,
    /// 24 bits of data from the latest s-access.
    pub data: u32,
}

impl Sprite {
    const fn new() -> Self {
        Self {
            mc: 0,
            mc_base: 0,
            dma: false,
            display: false,
            exp_flop: true,
            pointer: 0,
            data: 0,
        }
    }
}

/// The eight sprite channels.
pub struct SpriteUnit {
    pub sprites: [Sprite; 8],
    /// Sprite-sprite collision register ($D01E), clear-on-read.
    pub spr_spr_collision: u8,
    /// Sprite-background collision register ($D01F), clear-on-read.
    pub spr_bg_collision: u8,
}

impl SpriteUnit {
    #[must_use]
    pub fn new() -> Self {
        Self {
            sprites: [Sprite::new(); 8],
            spr_spr_collision: 0,
            spr_bg_collision: 0,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Cycle 55: toggle the expansion flip flops of Y-expanded sprites.
    pub fn toggle_expansion_flops(&mut self, y_expand: u8) {
        for (i, sprite) in self.sprites.iter_mut().enumerate() {
            if y_expand & (1 << i) != 0 {
                sprite.exp_flop = !sprite.exp_flop;
            }
        }
    }

    /// Cycles 55/56: turn on DMA for enabled sprites whose Y register
    /// matches the lower eight raster bits.
    pub fn check_dma_on(&mut self, raster: u16, enabled: u8, y_expand: u8, y_coords: &[u8; 8]) {
        for (i, sprite) in self.sprites.iter_mut().enumerate() {
            if enabled & (1 << i) == 0 || sprite.dma {
                continue;
            }
            if y_coords[i] == (raster & 0xFF) as u8 {
                sprite.dma = true;
                sprite.mc_base = 0;
                if y_expand & (1 << i) != 0 {
                    sprite.exp_flop = false;
                }
            }
        }
    }

    /// Cycle 58: reload MC from MCBASE and update the display latches.
    pub fn check_display(&mut self, raster: u16, y_coords: &[u8; 8]) {
        for (i, sprite) in self.sprites.iter_mut().enumerate() {
            sprite.mc = sprite.mc_base;
            if sprite.dma {
                if y_coords[i] == (raster & 0xFF) as u8 {
                    sprite.display = true;
                }
            } else {
                sprite.display = false;
            }
        }
    }

    /// Cycle 15: advance MCBASE by two on open expansion flip flops.
    pub fn advance_mc_base_low(&mut self) {
        for sprite in &mut self.sprites {
            if sprite.dma && sprite.exp_flop {
                sprite.mc_base += 2;
            }
        }
    }

    /// Cycle 16: final MCBASE step; DMA ends after 63 data bytes.
    pub fn advance_mc_base_high(&mut self) {
        for sprite in &mut self.sprites {
            if sprite.dma && sprite.exp_flop {
                sprite.mc_base += 1;
                if sprite.mc_base >= 63 {
                    sprite.mc_base = 63;
                    sprite.dma = false;
                }
            }
        }
    }

    /// Whether any sprite in `mask` is in its DMA window (for BA).
    #[must_use]
    pub fn dma_active(&self, mask: u8) -> bool {
        self.sprites
            .iter()
            .enumerate()
            .any(|(i, s)| mask & (1 << i) != 0 && s.dma)
    }

    /// Read the collision registers (clear-on-read). Returns the value
    /// and whether any bit was newly visible.
    pub fn read_spr_spr(&mut self) -> u8 {
        let value = self.spr_spr_collision;
        self.spr_spr_collision = 0;
        value
    }

    pub fn read_spr_bg(&mut self) -> u8 {
        let value = self.spr_bg_collision;
        self.spr_bg_collision = 0;
        value
    }

    pub(crate) fn save(&self, w: &mut SnapshotWriter) {
        for sprite in &self.sprites {
            w.write_u8(sprite.mc);
            w.write_u8(sprite.mc_base);
            w.write_bool(sprite.dma);
            w.write_bool(sprite.display);
            w.write_bool(sprite.exp_flop);
            w.write_u8(sprite.pointer);
            w.write_u32(sprite.data);
        }
        w.write_u8(self.spr_spr_collision);
        w.write_u8(self.spr_bg_collision);
    }

    pub(crate) fn load(&mut self, r: &mut SnapshotReader) -> Result<(), ReadError> {
        for sprite in &mut self.sprites {
            sprite.mc = r.read_u8()?;
            sprite.mc_base = r.read_u8()?;
            sprite.dma = r.read_bool()?;
            sprite.display = r.read_bool()?;
            sprite.exp_flop = r.read_bool()?;
            sprite.pointer = r.read_u8()?;
            sprite.data = r.read_u32()?;
        }
        self.spr_spr_collision = r.read_u8()?;
        self.spr_bg_collision = r.read_u8()?;
        Ok(())
    }
}

impl Default for SpriteUnit {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dma_turns_on_at_y_match() {
        let mut unit = SpriteUnit::new();
        let ys = [50, 0, 0, 0, 0, 0, 0, 0];
        unit.check_dma_on(50, 0x01, 0x00, &ys);
        assert!(unit.sprites[0].dma);
        assert!(!unit.sprites[1].dma);
        assert_eq!(unit.sprites[0].mc_base, 0);
    }

    #[test]
    fn dma_ends_after_21_lines() {
        let mut unit = SpriteUnit::new();
        let ys = [50, 0, 0, 0, 0, 0, 0, 0];
        unit.check_dma_on(50, 0x01, 0x00, &ys);
        for _ in 0..21 {
            unit.advance_mc_base_low();
            unit.advance_mc_base_high();
        }
        assert!(!unit.sprites[0].dma);
        assert_eq!(unit.sprites[0].mc_base, 63);
    }

    #[test]
    fn y_expansion_halves_advance() {
        let mut unit = SpriteUnit::new();
        let ys = [50, 0, 0, 0, 0, 0, 0, 0];
        // Expanded sprite: flop cleared on DMA start
        unit.check_dma_on(50, 0x01, 0x01, &ys);
        assert!(!unit.sprites[0].exp_flop);

        // First line: flop closed, no advance
        unit.advance_mc_base_low();
        unit.advance_mc_base_high();
        assert_eq!(unit.sprites[0].mc_base, 0);

        // Flop toggles at cycle 55 of the line
        unit.toggle_expansion_flops(0x01);
        unit.advance_mc_base_low();
        unit.advance_mc_base_high();
        assert_eq!(unit.sprites[0].mc_base, 3);
    }

    #[test]
    fn display_follows_dma() {
        let mut unit = SpriteUnit::new();
        let ys = [50, 0, 0, 0, 0, 0, 0, 0];
        unit.check_dma_on(50, 0x01, 0x00, &ys);
        unit.check_display(50, &ys);
        assert!(unit.sprites[0].display);

        unit.sprites[0].dma = false;
        unit.check_display(51, &ys);
        assert!(!unit.sprites[0].display);
    }

    #[test]
    fn collision_registers_clear_on_read() {
        let mut unit = SpriteUnit::new();
        unit.spr_spr_collision = 0x03;
        assert_eq!(unit.read_spr_spr(), 0x03);
        assert_eq!(unit.read_spr_spr(), 0x00);
    }
}
