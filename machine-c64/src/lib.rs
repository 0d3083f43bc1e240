//! Cycle-accurate Commodore 64 emulation core.
//!
//! The machine advances one master-clock cycle at a time (985,249 Hz
//! PAL / 1,022,727 Hz NTSC). Within each cycle the VIC-II executes its
//! rasterline-cycle micro-step through a per-cycle dispatch table, both
//! CIAs count, the 6510 performs one bus access unless the VIC has
//! pulled BA low, the SID synthesizes output, and the VC1541 - a
//! complete 6502 machine of its own - runs one cycle in lockstep so the
//! IEC serial protocol keeps its timing.
//!
//! [`C64`] is the machine; [`Emulator`] wraps it in the dedicated
//! emulation thread with run/pause/power semantics, wall-clock
//! synchronization, warp mode, and the snapshot storage. Hosts receive
//! events through the message queue and read the front framebuffer and
//! the audio sample ring without locks.

mod c64;
pub mod cartridge;
mod cia;
mod config;
pub mod drive;
mod error;
pub mod files;
pub mod fs;
mod iec;
mod keyboard;
mod memory;
mod messages;
mod roms;
mod sid;
mod snapshot;
mod thread;
mod tod;
pub mod vic;

pub use c64::{C64, C64Bus};
pub use cia::Cia;
pub use config::{
    CiaRevision, Config, ConfigOption, DriveType, GlueLogic, RamPattern, SidEngine, VicModel,
};
pub use error::{Error, ErrorCode, Result};
pub use iec::{IecBus, IecDevice};
pub use keyboard::Keyboard;
pub use memory::{Memory, PeekSource, PokeTarget};
pub use messages::{Message, MsgQueue, MsgType};
pub use roms::{RomImage, RomSlot};
pub use sid::SidBridge;
pub use snapshot::{Snapshot, V_MAJOR, V_MINOR, V_SUBMINOR};
pub use thread::{
    EmuState, Emulator, InspectionInfo, InspectionTarget, SnapshotStorage, RL_AUTO_SNAPSHOT,
    RL_BREAKPOINT_REACHED, RL_CPU_JAMMED, RL_INSPECT, RL_STOP, RL_USER_SNAPSHOT,
    RL_WATCHPOINT_REACHED,
};
pub use tod::{Tod, TodTime};
