//! Container formats the core consumes: exactly enough parsing and
//! serialization to load media and round-trip state.

pub mod crt;
pub mod d64;
pub mod g64;
pub mod p00;
pub mod prg;
pub mod t64;
pub mod tap;

pub use crt::{Chip, ChipKind, CrtFile};
pub use d64::D64Image;
pub use g64::G64File;
pub use p00::P00File;
pub use prg::PrgFile;
pub use t64::T64File;
pub use tap::TapFile;
