//! IEC serial bus.
//!
//! ATN, CLK and DATA are open-collector lines shared by the C64 (via
//! CIA2 port A) and every attached drive (via VIA1). A line is high
//! only while no participant pulls it low. The composite levels are
//! recomputed here, inside the bus component, whenever any
//! contributor's output changes; the bus reports whether ATN changed so
//! the caller can forward the edge to the drive's VIA1 CA1 input.

use emu_core::{HardwareComponent, ReadError, SnapshotReader, SnapshotWriter};

/// Bus participants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IecDevice {
    C64,
    Drive8,
    Drive9,
}

impl IecDevice {
    fn index(self) -> usize {
        match self {
            IecDevice::C64 => 0,
            IecDevice::Drive8 => 1,
            IecDevice::Drive9 => 2,
        }
    }
}

/// The three bus lines with per-participant pull-downs.
pub struct IecBus {
    /// Pull-down contributions, true = pulling the line low.
    atn_pull: [bool; 3],
    clk_pull: [bool; 3],
    data_pull: [bool; 3],

    /// Composite line levels (true = high).
    atn: bool,
    clk: bool,
    data: bool,

    /// Cycles since the last line change, to detect active transfers.
    idle_cycles: u32,
}

impl IecBus {
    #[must_use]
    pub fn new() -> Self {
        Self {
            atn_pull: [false; 3],
            clk_pull: [false; 3],
            data_pull: [false; 3],
            atn: true,
            clk: true,
            data: true,
            idle_cycles: 0,
        }
    }

    /// Update one participant's outputs. Returns `true` if the ATN
    /// line's composite level changed (the drive's CA1 edge).
    pub fn set_device_lines(
        &mut self,
        device: IecDevice,
        atn_low: bool,
        clk_low: bool,
        data_low: bool,
    ) -> bool {
        let i = device.index();
        let changed = self.atn_pull[i] != atn_low
            || self.clk_pull[i] != clk_low
            || self.data_pull[i] != data_low;
        self.atn_pull[i] = atn_low;
        self.clk_pull[i] = clk_low;
        self.data_pull[i] = data_low;

        if !changed {
            return false;
        }

        let prev_atn = self.atn;
        self.recompute();
        self.idle_cycles = 0;
        self.atn != prev_atn
    }

    /// Wired-AND of all contributors.
    fn recompute(&mut self) {
        self.atn = !self.atn_pull.iter().any(|&p| p);
        self.clk = !self.clk_pull.iter().any(|&p| p);
        self.data = !self.data_pull.iter().any(|&p| p);
    }

    /// Composite ATN level (true = high / released).
    #[must_use]
    pub fn atn(&self) -> bool {
        self.atn
    }

    #[must_use]
    pub fn clk(&self) -> bool {
        self.clk
    }

    #[must_use]
    pub fn data(&self) -> bool {
        self.data
    }

    /// Count an idle cycle; used by the drive's power-save logic.
    pub fn age(&mut self) {
        self.idle_cycles = self.idle_cycles.saturating_add(1);
    }

    /// Cycles since any line last changed.
    #[must_use]
    pub fn idle_cycles(&self) -> u32 {
        self.idle_cycles
    }
}

impl Default for IecBus {
    fn default() -> Self {
        Self::new()
    }
}

impl HardwareComponent for IecBus {
    fn reset(&mut self) {
        *self = Self::new();
    }

    fn save_reset(&self, w: &mut SnapshotWriter) {
        for i in 0..3 {
            w.write_bool(self.atn_pull[i]);
            w.write_bool(self.clk_pull[i]);
            w.write_bool(self.data_pull[i]);
        }
        w.write_bool(self.atn);
        w.write_bool(self.clk);
        w.write_bool(self.data);
        w.write_u32(self.idle_cycles);
    }

    fn load_reset(&mut self, r: &mut SnapshotReader) -> Result<(), ReadError> {
        for i in 0..3 {
            self.atn_pull[i] = r.read_bool()?;
            self.clk_pull[i] = r.read_bool()?;
            self.data_pull[i] = r.read_bool()?;
        }
        self.atn = r.read_bool()?;
        self.clk = r.read_bool()?;
        self.data = r.read_bool()?;
        self.idle_cycles = r.read_u32()?;
        Ok(())
    }
}
