//! Core building blocks shared by all hardware components.
//!
//! Every chip in the machine implements [`HardwareComponent`]: a reset
//! protocol that distinguishes *persistent* items (survive a reset, e.g.
//! ROM contents and configuration) from *reset* items (return to their
//! power-up values), and a deterministic serialization walk over both.
//!
//! Serialization is a fixed field-order walk into an append-only byte
//! sink. The reader mirrors the exact same walk. No self-describing
//! format: determinism and byte-identity across runs is the contract.

mod component;
mod fnv;
mod serialization;

pub use component::HardwareComponent;
pub use fnv::fnv1a64;
pub use serialization::{ReadError, SnapshotReader, SnapshotWriter};
