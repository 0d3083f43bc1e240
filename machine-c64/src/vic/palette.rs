//! Default VIC-II color palette (ARGB32).
//!
//! Measured colodore/Pepto values. Hosts can swap the palette at run
//! time; the indices are what the chip produces.

/// The 16 VIC-II colors.
pub const DEFAULT_PALETTE: [u32; 16] = [
    0xFF00_0000, // Black
    0xFFFF_FFFF, // White
    0xFF81_3338, // Red
    0xFF75_CEC8, // Cyan
    0xFF8E_3C97, // Purple
    0xFF56_AC4D, // Green
    0xFF2E_2C9B, // Blue
    0xFFED_F171, // Yellow
    0xFF8E_5029, // Orange
    0xFF55_3800, // Brown
    0xFFC4_6C71, // Light red
    0xFF4A_4A4A, // Dark grey
    0xFF7B_7B7B, // Grey
    0xFFA9_FF9F, // Light green
    0xFF70_6DEB, // Light blue
    0xFFB2_B2B2, // Light grey
];
