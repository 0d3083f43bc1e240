//! Fast SID (6581/8580) synthesis engine.
//!
//! Three voices, each a 24-bit phase-accumulator oscillator with four
//! combinable waveforms, hard sync and ring modulation, an ADSR envelope
//! per voice, and a shared state-variable filter. Everything is clocked
//! at the CPU rate; [`Sid::tick`] returns a finished output sample
//! whenever one falls due at the configured sample rate, so the caller
//! owns the transport (ring buffer, file, discard).
//!
//! Register map ($00-$1C, mirrored through $D400-$D7FF):
//! seven registers per voice (freq lo/hi, pulse width lo/hi, control,
//! attack/decay, sustain/release), then filter cutoff lo/hi, resonance
//! and routing, mode and volume, and the four read-only registers
//! (paddles, OSC3, ENV3). Reading a write-only register returns the
//! last value written to any register, which is what the real chip's
//! internal data bus does.

#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_precision_loss)]

mod envelope;
mod filter;
mod oscillator;

pub use envelope::{EnvelopeGenerator, EnvelopePhase};
pub use filter::Filter;
pub use oscillator::Oscillator;

use emu_core::{HardwareComponent, ReadError, SnapshotReader, SnapshotWriter};

/// SID chip revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SidModel {
    #[default]
    Mos6581,
    Mos8580,
}

/// Conversion strategy from the CPU-rate output stream to the audio
/// sample rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SamplingMethod {
    /// Pick the instantaneous output at each sample point.
    Fast,
    /// Average all CPU-rate outputs inside the sample window.
    #[default]
    Interpolate,
    /// Averaging window; kept distinct so hosts can select it.
    Resample,
}

/// The SID chip.
pub struct Sid {
    osc: [Oscillator; 3],
    env: [EnvelopeGenerator; 3],
    filter: Filter,

    /// Master volume, 0-15.
    volume: u8,
    /// Voice 3 disconnected from the mix ($D418 bit 7); it keeps running
    /// as a modulation source.
    voice3_off: bool,
    /// Filter bypass (host configurable; the mix then takes every voice
    /// on the direct path).
    filter_enabled: bool,

    model: SidModel,
    sampling: SamplingMethod,

    /// Last value written to any register (readable through the
    /// write-only registers).
    bus_value: u8,

    /// CPU cycles per output sample.
    cycles_per_sample: f32,
    /// Cycles accumulated toward the next sample point.
    sample_clock: f32,
    /// Output accumulator for the averaging window.
    window_sum: f32,
    /// Number of outputs in the averaging window.
    window_len: u32,
}

impl Sid {
    /// `cpu_frequency` in Hz (985,248 PAL / 1,022,727 NTSC),
    /// `sample_rate` in Hz (typically 44,100 or 48,000).
    #[must_use]
    pub fn new(model: SidModel, cpu_frequency: u32, sample_rate: u32) -> Self {
        Self {
            osc: [Oscillator::new(), Oscillator::new(), Oscillator::new()],
            env: [
                EnvelopeGenerator::new(),
                EnvelopeGenerator::new(),
                EnvelopeGenerator::new(),
            ],
            filter: Filter::new(model),
            volume: 0,
            voice3_off: false,
            filter_enabled: true,
            model,
            sampling: SamplingMethod::default(),
            bus_value: 0,
            cycles_per_sample: cpu_frequency as f32 / sample_rate as f32,
            sample_clock: 0.0,
            window_sum: 0.0,
            window_len: 0,
        }
    }

    /// Change the chip revision. Takes effect immediately; the filter
    /// curve is revision-specific.
    pub fn set_model(&mut self, model: SidModel) {
        self.model = model;
        self.filter.set_model(model);
    }

    #[must_use]
    pub fn model(&self) -> SidModel {
        self.model
    }

    pub fn set_sampling(&mut self, sampling: SamplingMethod) {
        self.sampling = sampling;
    }

    pub fn set_filter_enabled(&mut self, enabled: bool) {
        self.filter_enabled = enabled;
    }

    /// Update the clock/sample ratio (model switches change the CPU rate).
    pub fn set_rates(&mut self, cpu_frequency: u32, sample_rate: u32) {
        self.cycles_per_sample = cpu_frequency as f32 / sample_rate as f32;
    }

    /// Read a register, with the write-only bus-leak behavior.
    #[must_use]
    pub fn peek(&self, reg: u8) -> u8 {
        match reg & 0x1F {
            // Paddle inputs are not wired up
            0x19 | 0x1A => 0xFF,
            0x1B => {
                let ring = self.osc[1].msb();
                (self.osc[2].output(ring) >> 4) as u8
            }
            0x1C => self.env[2].level(),
            _ => self.bus_value,
        }
    }

    /// Side-effect-free read (identical for the SID: no register has
    /// read side effects).
    #[must_use]
    pub fn spypeek(&self, reg: u8) -> u8 {
        self.peek(reg)
    }

    /// Write a register.
    pub fn poke(&mut self, reg: u8, value: u8) {
        self.bus_value = value;
        let reg = reg & 0x1F;
        match reg {
            0x00..=0x14 => {
                let voice = (reg / 7) as usize;
                let osc = &mut self.osc[voice];
                match reg % 7 {
                    0 => osc.set_freq_lo(value),
                    1 => osc.set_freq_hi(value),
                    2 => osc.set_pw_lo(value),
                    3 => osc.set_pw_hi(value),
                    4 => osc.set_control(value),
                    5 => self.env[voice].set_attack_decay(value),
                    _ => self.env[voice].set_sustain_release(value),
                }
            }
            0x15 => self.filter.set_cutoff_lo(value),
            0x16 => self.filter.set_cutoff_hi(value),
            0x17 => self.filter.set_res_routing(value),
            0x18 => {
                self.volume = value & 0x0F;
                self.voice3_off = value & 0x80 != 0;
                self.filter.set_mode(value & 0x70);
            }
            _ => {}
        }
    }

    /// Clock the chip one CPU cycle. Returns a finished audio sample
    /// when one falls due.
    pub fn tick(&mut self) -> Option<f32> {
        let prev_msb = [self.osc[0].msb(), self.osc[1].msb(), self.osc[2].msb()];

        for osc in &mut self.osc {
            osc.clock();
        }

        // Hard sync sources: 2->0, 0->1, 1->2
        for i in 0..3 {
            let src = (i + 2) % 3;
            if self.osc[i].sync_enabled() && !prev_msb[src] && self.osc[src].msb() {
                self.osc[i].hard_sync();
            }
        }

        for i in 0..3 {
            let gate = self.osc[i].gate();
            self.env[i].clock(gate);
        }

        let output = self.mix();

        self.window_sum += output;
        self.window_len += 1;
        self.sample_clock += 1.0;

        if self.sample_clock >= self.cycles_per_sample {
            self.sample_clock -= self.cycles_per_sample;
            let sample = match self.sampling {
                SamplingMethod::Fast => output,
                SamplingMethod::Interpolate | SamplingMethod::Resample => {
                    self.window_sum / self.window_len as f32
                }
            };
            self.window_sum = 0.0;
            self.window_len = 0;
            return Some(sample);
        }
        None
    }

    /// Mix the three voices through the filter and master volume.
    /// Output range is roughly -1.0..1.0.
    fn mix(&mut self) -> f32 {
        // Ring modulation sources: 2->0, 0->1, 1->2
        let ring_msb = [self.osc[2].msb(), self.osc[0].msb(), self.osc[1].msb()];

        let mut through_filter = 0.0f32;
        let mut direct = 0.0f32;

        for i in 0..3 {
            if i == 2 && self.voice3_off {
                continue;
            }
            let wave = self.osc[i].output(ring_msb[i]);
            // Centre the 12-bit waveform and scale by the envelope
            let centred = f32::from(wave as i16 - 2048);
            let amp = centred * f32::from(self.env[i].level()) / 255.0;

            if self.filter_enabled && self.filter.voice_routed(i) {
                through_filter += amp;
            } else {
                direct += amp;
            }
        }

        let filtered = if self.filter_enabled {
            self.filter.clock(through_filter)
        } else {
            through_filter
        };

        (filtered + direct) * f32::from(self.volume) / 15.0 / 6144.0
    }
}

impl HardwareComponent for Sid {
    fn reset(&mut self) {
        for osc in &mut self.osc {
            osc.reset();
        }
        for env in &mut self.env {
            env.reset();
        }
        self.filter.reset();
        self.volume = 0;
        self.voice3_off = false;
        self.bus_value = 0;
        self.sample_clock = 0.0;
        self.window_sum = 0.0;
        self.window_len = 0;
    }

    fn save_persistent(&self, w: &mut SnapshotWriter) {
        w.write_u8(match self.model {
            SidModel::Mos6581 => 0,
            SidModel::Mos8580 => 1,
        });
        w.write_u8(match self.sampling {
            SamplingMethod::Fast => 0,
            SamplingMethod::Interpolate => 1,
            SamplingMethod::Resample => 2,
        });
        w.write_bool(self.filter_enabled);
        w.write_u32(self.cycles_per_sample.to_bits());
    }

    fn save_reset(&self, w: &mut SnapshotWriter) {
        for osc in &self.osc {
            osc.save(w);
        }
        for env in &self.env {
            env.save(w);
        }
        self.filter.save(w);
        w.write_u8(self.volume);
        w.write_bool(self.voice3_off);
        w.write_u8(self.bus_value);
        w.write_u32(self.sample_clock.to_bits());
        w.write_u32(self.window_sum.to_bits());
        w.write_u32(self.window_len);
    }

    fn load_persistent(&mut self, r: &mut SnapshotReader) -> Result<(), ReadError> {
        let model = if r.read_u8()? == 1 {
            SidModel::Mos8580
        } else {
            SidModel::Mos6581
        };
        self.set_model(model);
        self.sampling = match r.read_u8()? {
            0 => SamplingMethod::Fast,
            2 => SamplingMethod::Resample,
            _ => SamplingMethod::Interpolate,
        };
        self.filter_enabled = r.read_bool()?;
        self.cycles_per_sample = f32::from_bits(r.read_u32()?);
        Ok(())
    }

    fn load_reset(&mut self, r: &mut SnapshotReader) -> Result<(), ReadError> {
        for osc in &mut self.osc {
            osc.load(r)?;
        }
        for env in &mut self.env {
            env.load(r)?;
        }
        self.filter.load(r)?;
        self.volume = r.read_u8()?;
        self.voice3_off = r.read_bool()?;
        self.bus_value = r.read_u8()?;
        self.sample_clock = f32::from_bits(r.read_u32()?);
        self.window_sum = f32::from_bits(r.read_u32()?);
        self.window_len = r.read_u32()?;
        Ok(())
    }
}
