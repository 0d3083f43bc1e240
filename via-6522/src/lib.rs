//! MOS 6522 Versatile Interface Adapter.
//!
//! The VC1541 carries two of these: VIA1 ($1800) faces the IEC serial
//! bus, VIA2 ($1C00) runs the disk controller (head, stepper, sync).
//!
//! # Registers ($0-$F)
//!
//! | Reg | Name | Description                                  |
//! |-----|------|----------------------------------------------|
//! | $0  | ORB  | Port B data (read/write clears CB1/CB2 flags)|
//! | $1  | ORA  | Port A data (read/write clears CA1/CA2 flags)|
//! | $2  | DDRB | Port B direction (1 = output)                |
//! | $3  | DDRA | Port A direction (1 = output)                |
//! | $4  | T1CL | Timer 1 counter low (read clears T1 flag)    |
//! | $5  | T1CH | Timer 1 counter high (write loads + starts)  |
//! | $6  | T1LL | Timer 1 latch low                            |
//! | $7  | T1LH | Timer 1 latch high                           |
//! | $8  | T2CL | Timer 2 counter low (read clears T2 flag)    |
//! | $9  | T2CH | Timer 2 counter high (write loads + starts)  |
//! | $A  | SR   | Shift register                               |
//! | $B  | ACR  | Auxiliary control                            |
//! | $C  | PCR  | Peripheral control                           |
//! | $D  | IFR  | Interrupt flags (write 1s to clear)          |
//! | $E  | IER  | Interrupt enable (bit 7 = set/clear select)  |
//! | $F  | ORA  | Port A data, no handshake                    |
//!
//! # CA1/CB1
//!
//! The control inputs are level-triggered latches: feeding the current
//! pin level every cycle is safe. A latch sets its IFR bit when the pin
//! reaches the active level selected in PCR and arms again only after
//! the pin leaves that level. The flag itself is cleared by the port
//! handshake or by writing the IFR.

use emu_core::{HardwareComponent, ReadError, SnapshotReader, SnapshotWriter};

// IFR/IER bit assignments
const INT_CA2: u8 = 0x01;
const INT_CA1: u8 = 0x02;
const INT_SR: u8 = 0x04;
const INT_CB2: u8 = 0x08;
const INT_CB1: u8 = 0x10;
const INT_T2: u8 = 0x20;
const INT_T1: u8 = 0x40;

/// MOS 6522 VIA.
pub struct Via6522 {
    /// Port A output register (ORA).
    ora: u8,
    /// Port B output register (ORB).
    orb: u8,
    /// Port A direction register (1 = output).
    ddra: u8,
    /// Port B direction register (1 = output).
    ddrb: u8,
    /// Levels presented on the port A input pins by external hardware.
    pub external_a: u8,
    /// Levels presented on the port B input pins by external hardware.
    pub external_b: u8,

    /// Timer 1: 16-bit down-counter with a 16-bit reload latch.
    t1_counter: u16,
    t1_latch: u16,
    t1_active: bool,

    /// Timer 2: 16-bit down-counter; only the low latch byte exists.
    t2_counter: u16,
    t2_latch_lo: u8,
    t2_active: bool,

    /// Serial shift register.
    sr: u8,

    /// Auxiliary control register.
    /// Bit 7: T1 drives PB7. Bit 6: T1 free-run. Bit 5: T2 counts PB6.
    /// Bits 4-2: shift register mode. Bits 1-0: port input latching.
    acr: u8,
    /// Peripheral control register.
    /// Bits 7-5: CB2 mode. Bit 4: CB1 active level. Bits 3-1: CA2 mode.
    /// Bit 0: CA1 active level.
    pcr: u8,

    /// Interrupt flag register (bits 0-6).
    ifr: u8,
    /// Interrupt enable register (bits 0-6).
    ier: u8,

    /// CA1 latch armed state (see module docs).
    ca1_armed: bool,
    /// Current CA1 pin level.
    ca1_level: bool,
    /// CB1 latch armed state.
    cb1_armed: bool,
    /// Current CB1 pin level.
    cb1_level: bool,

    /// PB7 square-wave output driven by timer 1.
    pb7: bool,
}

impl Via6522 {
    #[must_use]
    pub fn new() -> Self {
        Self {
            ora: 0,
            orb: 0,
            ddra: 0,
            ddrb: 0,
            external_a: 0xFF,
            external_b: 0xFF,
            t1_counter: 0xFFFF,
            t1_latch: 0xFFFF,
            t1_active: false,
            t2_counter: 0xFFFF,
            t2_latch_lo: 0xFF,
            t2_active: false,
            sr: 0,
            acr: 0,
            pcr: 0,
            ifr: 0,
            ier: 0,
            ca1_armed: true,
            ca1_level: false,
            cb1_armed: true,
            cb1_level: false,
            pb7: false,
        }
    }

    /// Advance both timers by one clock cycle.
    pub fn tick(&mut self) {
        self.tick_t1();
        self.tick_t2();
    }

    fn tick_t1(&mut self) {
        let free_run = self.acr & 0x40 != 0;
        if !self.t1_active && !free_run {
            return;
        }

        let (next, underflow) = self.t1_counter.overflowing_sub(1);
        self.t1_counter = next;
        if underflow {
            self.ifr |= INT_T1;
            if free_run {
                self.t1_counter = self.t1_latch;
                if self.acr & 0x80 != 0 {
                    self.pb7 = !self.pb7;
                }
            } else {
                self.t1_active = false;
            }
        }
    }

    fn tick_t2(&mut self) {
        // ACR bit 5 selects PB6 pulse counting, which has no clock source
        // in the 1541 (PB6 is a density select output there).
        if !self.t2_active || self.acr & 0x20 != 0 {
            return;
        }
        let (next, underflow) = self.t2_counter.overflowing_sub(1);
        self.t2_counter = next;
        if underflow {
            self.ifr |= INT_T2;
            self.t2_active = false;
        }
    }

    /// IRQ output: any flagged and enabled interrupt source.
    #[must_use]
    pub fn irq_active(&self) -> bool {
        self.ifr & self.ier & 0x7F != 0
    }

    /// Read a register, with side effects (flag clearing).
    pub fn read(&mut self, reg: u8) -> u8 {
        match reg & 0x0F {
            0x00 => {
                self.ifr &= !(INT_CB1 | INT_CB2);
                self.input_b()
            }
            0x01 => {
                self.ifr &= !(INT_CA1 | INT_CA2);
                self.input_a()
            }
            0x02 => self.ddrb,
            0x03 => self.ddra,
            0x04 => {
                self.ifr &= !INT_T1;
                self.t1_counter as u8
            }
            0x05 => (self.t1_counter >> 8) as u8,
            0x06 => self.t1_latch as u8,
            0x07 => (self.t1_latch >> 8) as u8,
            0x08 => {
                self.ifr &= !INT_T2;
                self.t2_counter as u8
            }
            0x09 => (self.t2_counter >> 8) as u8,
            0x0A => {
                self.ifr &= !INT_SR;
                self.sr
            }
            0x0B => self.acr,
            0x0C => self.pcr,
            0x0D => self.ifr_value(),
            0x0E => self.ier | 0x80,
            _ => self.input_a(),
        }
    }

    /// Read a register without side effects.
    #[must_use]
    pub fn spypeek(&self, reg: u8) -> u8 {
        match reg & 0x0F {
            0x00 => self.input_b(),
            0x01 => self.input_a(),
            0x02 => self.ddrb,
            0x03 => self.ddra,
            0x04 => self.t1_counter as u8,
            0x05 => (self.t1_counter >> 8) as u8,
            0x06 => self.t1_latch as u8,
            0x07 => (self.t1_latch >> 8) as u8,
            0x08 => self.t2_counter as u8,
            0x09 => (self.t2_counter >> 8) as u8,
            0x0A => self.sr,
            0x0B => self.acr,
            0x0C => self.pcr,
            0x0D => self.ifr_value(),
            0x0E => self.ier | 0x80,
            _ => self.input_a(),
        }
    }

    /// Write a register.
    pub fn write(&mut self, reg: u8, value: u8) {
        match reg & 0x0F {
            0x00 => {
                self.ifr &= !(INT_CB1 | INT_CB2);
                self.orb = value;
            }
            0x01 => {
                self.ifr &= !(INT_CA1 | INT_CA2);
                self.ora = value;
            }
            0x02 => self.ddrb = value,
            0x03 => self.ddra = value,
            0x04 | 0x06 => {
                self.t1_latch = (self.t1_latch & 0xFF00) | u16::from(value);
            }
            0x05 => {
                // Load + start; acknowledges a pending T1 interrupt
                self.t1_latch = (self.t1_latch & 0x00FF) | (u16::from(value) << 8);
                self.t1_counter = self.t1_latch;
                self.t1_active = true;
                self.ifr &= !INT_T1;
                self.pb7 = false;
            }
            0x07 => {
                self.t1_latch = (self.t1_latch & 0x00FF) | (u16::from(value) << 8);
                self.ifr &= !INT_T1;
            }
            0x08 => self.t2_latch_lo = value,
            0x09 => {
                self.t2_counter = u16::from(self.t2_latch_lo) | (u16::from(value) << 8);
                self.t2_active = true;
                self.ifr &= !INT_T2;
            }
            0x0A => {
                self.sr = value;
                self.ifr &= !INT_SR;
            }
            0x0B => self.acr = value,
            0x0C => self.pcr = value,
            0x0D => self.ifr &= !value,
            0x0E => {
                if value & 0x80 != 0 {
                    self.ier |= value & 0x7F;
                } else {
                    self.ier &= !(value & 0x7F);
                }
            }
            _ => self.ora = value,
        }
    }

    /// Present the CA1 pin level. Safe to call every cycle; the latch
    /// fires once per excursion to the active level.
    pub fn set_ca1(&mut self, level: bool) {
        let active = self.pcr & 0x01 != 0; // 1 = active high, 0 = active low
        if level == active {
            if self.ca1_armed {
                self.ifr |= INT_CA1;
                self.ca1_armed = false;
            }
        } else {
            self.ca1_armed = true;
        }
        self.ca1_level = level;
    }

    /// Present the CB1 pin level. Same latch behavior as CA1.
    pub fn set_cb1(&mut self, level: bool) {
        let active = self.pcr & 0x10 != 0;
        if level == active {
            if self.cb1_armed {
                self.ifr |= INT_CB1;
                self.cb1_armed = false;
            }
        } else {
            self.cb1_armed = true;
        }
        self.cb1_level = level;
    }

    /// CB2 is low when PCR selects manual output low (bits 7-5 = 110).
    /// The 1541 uses this as the read/write mode select on VIA2.
    #[must_use]
    pub fn cb2_output_low(&self) -> bool {
        self.pcr & 0xE0 == 0xC0
    }

    /// CA2 is low when PCR selects manual output low (bits 3-1 = 110).
    #[must_use]
    pub fn ca2_output_low(&self) -> bool {
        self.pcr & 0x0E == 0x0C
    }

    /// Levels driven onto port A pins (inputs read back external levels).
    #[must_use]
    pub fn port_a_output(&self) -> u8 {
        (self.ora & self.ddra) | !self.ddra
    }

    /// Levels driven onto port B pins, with PB7 overridden by timer 1
    /// when ACR bit 7 is set.
    #[must_use]
    pub fn port_b_output(&self) -> u8 {
        let mut out = (self.orb & self.ddrb) | !self.ddrb;
        if self.acr & 0x80 != 0 {
            out = (out & 0x7F) | if self.pb7 { 0x80 } else { 0 };
        }
        out
    }

    fn input_a(&self) -> u8 {
        (self.ora & self.ddra) | (self.external_a & !self.ddra)
    }

    fn input_b(&self) -> u8 {
        let mut val = (self.orb & self.ddrb) | (self.external_b & !self.ddrb);
        if self.acr & 0x80 != 0 {
            val = (val & 0x7F) | if self.pb7 { 0x80 } else { 0 };
        }
        val
    }

    fn ifr_value(&self) -> u8 {
        let any = if self.ifr & self.ier & 0x7F != 0 {
            0x80
        } else {
            0
        };
        (self.ifr & 0x7F) | any
    }
}

impl Default for Via6522 {
    fn default() -> Self {
        Self::new()
    }
}

impl HardwareComponent for Via6522 {
    fn reset(&mut self) {
        *self = Self::new();
    }

    fn save_reset(&self, w: &mut SnapshotWriter) {
        w.write_u8(self.ora);
        w.write_u8(self.orb);
        w.write_u8(self.ddra);
        w.write_u8(self.ddrb);
        w.write_u8(self.external_a);
        w.write_u8(self.external_b);
        w.write_u16(self.t1_counter);
        w.write_u16(self.t1_latch);
        w.write_bool(self.t1_active);
        w.write_u16(self.t2_counter);
        w.write_u8(self.t2_latch_lo);
        w.write_bool(self.t2_active);
        w.write_u8(self.sr);
        w.write_u8(self.acr);
        w.write_u8(self.pcr);
        w.write_u8(self.ifr);
        w.write_u8(self.ier);
        w.write_bool(self.ca1_armed);
        w.write_bool(self.ca1_level);
        w.write_bool(self.cb1_armed);
        w.write_bool(self.cb1_level);
        w.write_bool(self.pb7);
    }

    fn load_reset(&mut self, r: &mut SnapshotReader) -> Result<(), ReadError> {
        self.ora = r.read_u8()?;
        self.orb = r.read_u8()?;
        self.ddra = r.read_u8()?;
        self.ddrb = r.read_u8()?;
        self.external_a = r.read_u8()?;
        self.external_b = r.read_u8()?;
        self.t1_counter = r.read_u16()?;
        self.t1_latch = r.read_u16()?;
        self.t1_active = r.read_bool()?;
        self.t2_counter = r.read_u16()?;
        self.t2_latch_lo = r.read_u8()?;
        self.t2_active = r.read_bool()?;
        self.sr = r.read_u8()?;
        self.acr = r.read_u8()?;
        self.pcr = r.read_u8()?;
        self.ifr = r.read_u8()?;
        self.ier = r.read_u8()?;
        self.ca1_armed = r.read_bool()?;
        self.ca1_level = r.read_bool()?;
        self.cb1_armed = r.read_bool()?;
        self.cb1_level = r.read_bool()?;
        self.pb7 = r.read_bool()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn t1_one_shot_fires_once() {
        let mut via = Via6522::new();
        via.write(0x04, 10);
        via.write(0x05, 0); // Load + start
        for _ in 0..11 {
            via.tick();
        }
        assert_ne!(via.spypeek(0x0D) & INT_T1, 0);
        // One-shot: counter wraps but no second flag after acknowledge
        via.write(0x0D, INT_T1);
        for _ in 0..20 {
            via.tick();
        }
        assert_eq!(via.spypeek(0x0D) & INT_T1, 0);
    }

    #[test]
    fn t1_free_run_reloads() {
        let mut via = Via6522::new();
        via.write(0x0B, 0x40); // Free-run
        via.write(0x04, 4);
        via.write(0x05, 0);
        for _ in 0..5 {
            via.tick();
        }
        assert_ne!(via.ifr & INT_T1, 0);
        via.write(0x0D, INT_T1);
        for _ in 0..5 {
            via.tick();
        }
        // Reloaded and fired again
        assert_ne!(via.ifr & INT_T1, 0);
    }

    #[test]
    fn t1cl_read_acknowledges() {
        let mut via = Via6522::new();
        via.write(0x04, 2);
        via.write(0x05, 0);
        for _ in 0..3 {
            via.tick();
        }
        assert_ne!(via.ifr & INT_T1, 0);
        via.read(0x04);
        assert_eq!(via.ifr & INT_T1, 0);
    }

    #[test]
    fn t2_is_one_shot() {
        let mut via = Via6522::new();
        via.write(0x08, 3);
        via.write(0x09, 0);
        for _ in 0..4 {
            via.tick();
        }
        assert_ne!(via.ifr & INT_T2, 0);
        via.read(0x08); // Acknowledge
        for _ in 0..10 {
            via.tick();
        }
        assert_eq!(via.ifr & INT_T2, 0);
    }

    #[test]
    fn irq_needs_enable() {
        let mut via = Via6522::new();
        via.write(0x04, 1);
        via.write(0x05, 0);
        for _ in 0..2 {
            via.tick();
        }
        assert!(!via.irq_active());
        via.write(0x0E, 0x80 | INT_T1);
        assert!(via.irq_active());
        via.write(0x0E, INT_T1); // Clear enable
        assert!(!via.irq_active());
    }

    #[test]
    fn ca1_latch_fires_once_per_excursion() {
        let mut via = Via6522::new();
        // PCR bit 0 = 0: active low
        via.set_ca1(false);
        assert_ne!(via.ifr & INT_CA1, 0);
        via.write(0x0D, INT_CA1);

        // Still low: repeated presentation must not re-trigger
        via.set_ca1(false);
        via.set_ca1(false);
        assert_eq!(via.ifr & INT_CA1, 0);

        // Release and assert again: triggers
        via.set_ca1(true);
        via.set_ca1(false);
        assert_ne!(via.ifr & INT_CA1, 0);
    }

    #[test]
    fn port_a_read_clears_ca_flags() {
        let mut via = Via6522::new();
        via.set_ca1(false);
        assert_ne!(via.ifr & INT_CA1, 0);
        via.read(0x01);
        assert_eq!(via.ifr & INT_CA1, 0);
    }

    #[test]
    fn port_mixes_output_and_external() {
        let mut via = Via6522::new();
        via.write(0x03, 0x0F); // DDRA: low nibble output
        via.write(0x01, 0x05);
        via.external_a = 0xA0;
        assert_eq!(via.read(0x0F), 0xA5);
    }

    #[test]
    fn cb2_manual_output() {
        let mut via = Via6522::new();
        assert!(!via.cb2_output_low());
        via.write(0x0C, 0xC0);
        assert!(via.cb2_output_low());
        via.write(0x0C, 0xE0);
        assert!(!via.cb2_output_low());
    }

    #[test]
    fn ifr_bit7_summarizes() {
        let mut via = Via6522::new();
        via.write(0x0E, 0x80 | INT_T2);
        via.write(0x08, 1);
        via.write(0x09, 0);
        via.tick();
        via.tick();
        let ifr = via.spypeek(0x0D);
        assert_ne!(ifr & 0x80, 0);
        assert_ne!(ifr & INT_T2, 0);
    }

    #[test]
    fn snapshot_round_trip() {
        let mut via = Via6522::new();
        via.write(0x03, 0xFF);
        via.write(0x01, 0x42);
        via.write(0x04, 0x34);
        via.write(0x05, 0x12);
        via.tick();

        let mut w = SnapshotWriter::new();
        via.save(&mut w);
        let bytes = w.into_bytes();

        let mut restored = Via6522::new();
        restored.load(&mut SnapshotReader::new(&bytes)).unwrap();
        assert_eq!(restored.spypeek(0x01), 0x42);
        assert_eq!(restored.t1_counter, via.t1_counter);
    }
}
