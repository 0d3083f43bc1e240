//! SID bridge: couples the synthesis engine to the machine clock and
//! streams finished samples into a lock-free ring the host drains from
//! its audio callback.
//!
//! The engine runs at the CPU rate regardless of the configured
//! backend; sample-rate conversion happens inside the engine. When the
//! ring fills up (host not draining, warp mode) the oldest samples are
//! simply lost.

use ringbuf::{
    traits::{Producer, Split},
    HeapCons, HeapProd, HeapRb,
};

use emu_core::{HardwareComponent, ReadError, SnapshotReader, SnapshotWriter};
use sid_6581::{SamplingMethod, Sid, SidModel};

/// Ring capacity in samples (~1/3 s at 48 kHz).
const RING_CAPACITY: usize = 16_384;

/// The machine-facing SID component.
pub struct SidBridge {
    engine: Sid,
    producer: HeapProd<f32>,
    /// Consumer handed to the host on request.
    consumer: Option<HeapCons<f32>>,
    /// Samples dropped because the ring was full.
    overruns: u64,
}

impl SidBridge {
    #[must_use]
    pub fn new(model: SidModel, cpu_frequency: u32, sample_rate: u32) -> Self {
        let (producer, consumer) = HeapRb::<f32>::new(RING_CAPACITY).split();
        Self {
            engine: Sid::new(model, cpu_frequency, sample_rate),
            producer,
            consumer: Some(consumer),
            overruns: 0,
        }
    }

    /// Hand out the consumer half of the sample ring. Can be taken once;
    /// the host audio callback owns it from then on.
    pub fn take_audio_consumer(&mut self) -> Option<HeapCons<f32>> {
        self.consumer.take()
    }

    /// Clock the engine one CPU cycle.
    pub fn tick(&mut self) {
        if let Some(sample) = self.engine.tick() {
            if self.producer.try_push(sample).is_err() {
                self.overruns += 1;
            }
        }
    }

    pub fn poke(&mut self, reg: u8, value: u8) {
        self.engine.poke(reg, value);
    }

    #[must_use]
    pub fn peek(&self, reg: u8) -> u8 {
        self.engine.peek(reg)
    }

    #[must_use]
    pub fn spypeek(&self, reg: u8) -> u8 {
        self.engine.spypeek(reg)
    }

    pub fn set_model(&mut self, model: SidModel) {
        self.engine.set_model(model);
    }

    pub fn set_sampling(&mut self, sampling: SamplingMethod) {
        self.engine.set_sampling(sampling);
    }

    pub fn set_filter_enabled(&mut self, enabled: bool) {
        self.engine.set_filter_enabled(enabled);
    }

    pub fn set_rates(&mut self, cpu_frequency: u32, sample_rate: u32) {
        self.engine.set_rates(cpu_frequency, sample_rate);
    }

    /// Samples lost to a full ring since power-on.
    #[must_use]
    pub fn overruns(&self) -> u64 {
        self.overruns
    }
}

impl HardwareComponent for SidBridge {
    fn reset(&mut self) {
        self.engine.reset();
    }

    fn save_persistent(&self, w: &mut SnapshotWriter) {
        self.engine.save_persistent(w);
    }

    fn save_reset(&self, w: &mut SnapshotWriter) {
        self.engine.save_reset(w);
    }

    fn load_persistent(&mut self, r: &mut SnapshotReader) -> Result<(), ReadError> {
        self.engine.load_persistent(r)
    }

    fn load_reset(&mut self, r: &mut SnapshotReader) -> Result<(), ReadError> {
        self.engine.load_reset(r)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ringbuf::traits::Consumer;

    #[test]
    fn samples_reach_the_consumer() {
        let mut bridge = SidBridge::new(SidModel::Mos6581, 985_249, 48_000);
        let mut consumer = bridge.take_audio_consumer().unwrap();
        for _ in 0..2000 {
            bridge.tick();
        }
        let mut n = 0;
        while consumer.try_pop().is_some() {
            n += 1;
        }
        // ~2000 / 20.5 cycles per sample
        assert!(n > 90 && n < 105, "got {n} samples");
    }

    #[test]
    fn consumer_can_be_taken_once() {
        let mut bridge = SidBridge::new(SidModel::Mos6581, 985_249, 48_000);
        assert!(bridge.take_audio_consumer().is_some());
        assert!(bridge.take_audio_consumer().is_none());
    }

    #[test]
    fn full_ring_counts_overruns() {
        let mut bridge = SidBridge::new(SidModel::Mos6581, 985_249, 48_000);
        // Nobody drains: run long enough to fill the ring
        for _ in 0..(RING_CAPACITY + 1000) * 21 {
            bridge.tick();
        }
        assert!(bridge.overruns() > 0);
    }
}
