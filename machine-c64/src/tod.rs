//! CIA time-of-day clock.
//!
//! Four BCD counters (tenths, seconds, minutes, hours with an AM/PM
//! bit), clocked from the power line. A pre-divider turns the 50 or
//! 60 Hz input into tenths; which divisor applies is selected by CRA
//! bit 7. Reading the hours register freezes the read registers in a
//! latch until the tenths register is read; writing hours stops the
//! clock until tenths are written. With CRB bit 7 set, writes go to the
//! alarm registers instead.

use emu_core::{HardwareComponent, ReadError, SnapshotReader, SnapshotWriter};

/// One BCD time value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TodTime {
    pub tenths: u8,
    pub seconds: u8,
    pub minutes: u8,
    /// BCD hours 1-12 with bit 7 = PM.
    pub hours: u8,
}

/// Time-of-day unit of one CIA.
pub struct Tod {
    time: TodTime,
    alarm: TodTime,
    latch: TodTime,

    /// Read registers frozen (hours read, tenths not yet read).
    frozen: bool,
    /// Clock stopped (hours written, tenths not yet written).
    stopped: bool,
    /// Power-line pulses toward the next tenth.
    divider: u8,
    /// Expect 50 Hz input (CRA bit 7), i.e. divide by 5.
    fifty_hz: bool,
    /// Alarm matched on the most recent increment.
    alarm_hit: bool,
}

impl Tod {
    #[must_use]
    pub fn new() -> Self {
        Self {
            time: TodTime::default(),
            alarm: TodTime::default(),
            latch: TodTime::default(),
            frozen: false,
            stopped: true, // The TOD starts once a time is written
            divider: 0,
            fifty_hz: false,
            alarm_hit: false,
        }
    }

    pub fn set_fifty_hz(&mut self, fifty: bool) {
        self.fifty_hz = fifty;
    }

    /// Feed one power-line pulse (50 or 60 per second, from the model).
    /// Returns `true` when the alarm fires.
    pub fn pulse(&mut self) -> bool {
        if self.stopped {
            return false;
        }
        self.divider += 1;
        let target = if self.fifty_hz { 5 } else { 6 };
        if self.divider < target {
            return false;
        }
        self.divider = 0;
        self.increment();

        self.alarm_hit = self.time == self.alarm;
        self.alarm_hit
    }

    fn increment(&mut self) {
        self.time.tenths = bcd_inc(self.time.tenths);
        if self.time.tenths < 0x10 {
            return;
        }
        self.time.tenths = 0;

        self.time.seconds = bcd_inc(self.time.seconds);
        if self.time.seconds < 0x60 {
            return;
        }
        self.time.seconds = 0;

        self.time.minutes = bcd_inc(self.time.minutes);
        if self.time.minutes < 0x60 {
            return;
        }
        self.time.minutes = 0;

        // Hours: 1-12 BCD, PM flips on the 11:59 -> 12:00 transition
        let pm = self.time.hours & 0x80;
        let hour = self.time.hours & 0x7F;
        let next = bcd_inc(hour);
        self.time.hours = match next {
            0x12 => (pm ^ 0x80) | 0x12,
            0x13 => pm | 0x01,
            _ => pm | next,
        };
    }

    // --- Register access ---

    /// Read tenths: releases the latch.
    pub fn read_tenths(&mut self) -> u8 {
        let value = if self.frozen {
            self.latch.tenths
        } else {
            self.time.tenths
        };
        self.frozen = false;
        value
    }

    pub fn read_seconds(&self) -> u8 {
        if self.frozen {
            self.latch.seconds
        } else {
            self.time.seconds
        }
    }

    pub fn read_minutes(&self) -> u8 {
        if self.frozen {
            self.latch.minutes
        } else {
            self.time.minutes
        }
    }

    /// Read hours: freezes all read registers until tenths are read.
    pub fn read_hours(&mut self) -> u8 {
        if !self.frozen {
            self.latch = self.time;
            self.frozen = true;
        }
        self.latch.hours
    }

    /// Spy variants without the latch side effects.
    #[must_use]
    pub fn spy(&self) -> TodTime {
        if self.frozen {
            self.latch
        } else {
            self.time
        }
    }

    /// Write a time register. `alarm` selects the alarm set (CRB bit 7).
    pub fn write_tenths(&mut self, value: u8, alarm: bool) {
        if alarm {
            self.alarm.tenths = value & 0x0F;
        } else {
            self.time.tenths = value & 0x0F;
            self.stopped = false; // Tenths write restarts the clock
            self.divider = 0;
        }
    }

    pub fn write_seconds(&mut self, value: u8, alarm: bool) {
        if alarm {
            self.alarm.seconds = value & 0x7F;
        } else {
            self.time.seconds = value & 0x7F;
        }
    }

    pub fn write_minutes(&mut self, value: u8, alarm: bool) {
        if alarm {
            self.alarm.minutes = value & 0x7F;
        } else {
            self.time.minutes = value & 0x7F;
        }
    }

    pub fn write_hours(&mut self, value: u8, alarm: bool) {
        if alarm {
            self.alarm.hours = value & 0x9F;
        } else {
            self.time.hours = value & 0x9F;
            self.stopped = true; // Hours write halts until tenths written
        }
    }
}

impl Default for Tod {
    fn default() -> Self {
        Self::new()
    }
}

/// Increment one BCD byte.
fn bcd_inc(value: u8) -> u8 {
    if value & 0x0F == 0x09 {
        (value & 0xF0) + 0x10
    } else {
        value + 1
    }
}

impl HardwareComponent for Tod {
    fn reset(&mut self) {
        *self = Self::new();
    }

    fn save_reset(&self, w: &mut SnapshotWriter) {
        for t in [&self.time, &self.alarm, &self.latch] {
            w.write_u8(t.tenths);
            w.write_u8(t.seconds);
            w.write_u8(t.minutes);
            w.write_u8(t.hours);
        }
        w.write_bool(self.frozen);
        w.write_bool(self.stopped);
        w.write_u8(self.divider);
        w.write_bool(self.fifty_hz);
        w.write_bool(self.alarm_hit);
    }

    fn load_reset(&mut self, r: &mut SnapshotReader) -> Result<(), ReadError> {
        for i in 0..3 {
            let t = TodTime {
                tenths: r.read_u8()?,
                seconds: r.read_u8()?,
                minutes: r.read_u8()?,
                hours: r.read_u8()?,
            };
            match i {
                0 => self.time = t,
                1 => self.alarm = t,
                _ => self.latch = t,
            }
        }
        self.frozen = r.read_bool()?;
        self.stopped = r.read_bool()?;
        self.divider = r.read_u8()?;
        self.fifty_hz = r.read_bool()?;
        self.alarm_hit = r.read_bool()?;
        Ok(())
    }
}
