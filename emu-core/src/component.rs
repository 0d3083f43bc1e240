//! Hardware component lifecycle.

use crate::serialization::{ReadError, SnapshotReader, SnapshotWriter};

/// Lifecycle shared by every chip and peripheral in the machine.
///
/// State is split in two groups:
///
/// - *persistent items* survive a reset: ROM contents, the configured
///   model, anything the user set up.
/// - *reset items* return to their power-up values on `reset()`: counters,
///   latches, registers.
///
/// Serialization walks both groups in a fixed order; `save` and `load`
/// must mirror each other exactly. Components are created once at
/// power-on and live until the machine is torn down.
pub trait HardwareComponent {
    /// Put all reset items back to their power-up values. Persistent
    /// items are left untouched.
    fn reset(&mut self);

    /// Serialize items that survive a reset. Default: none.
    fn save_persistent(&self, _w: &mut SnapshotWriter) {}

    /// Serialize items that a reset would clear.
    fn save_reset(&self, w: &mut SnapshotWriter);

    /// Mirror of `save_persistent`.
    fn load_persistent(&mut self, _r: &mut SnapshotReader) -> Result<(), ReadError> {
        Ok(())
    }

    /// Mirror of `save_reset`.
    fn load_reset(&mut self, r: &mut SnapshotReader) -> Result<(), ReadError>;

    /// Serialize the complete component state (persistent, then reset).
    fn save(&self, w: &mut SnapshotWriter) {
        self.save_persistent(w);
        self.save_reset(w);
    }

    /// Mirror of `save`.
    fn load(&mut self, r: &mut SnapshotReader) -> Result<(), ReadError> {
        self.load_persistent(r)?;
        self.load_reset(r)
    }
}
