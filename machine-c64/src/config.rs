//! Machine configuration.
//!
//! `configure(option, value)` mirrors the host-facing surface: options
//! are keyed by an enum, values arrive as plain integers (booleans as
//! 0/1) so the call is trivially bindable. Invalid values are rejected
//! without touching the current configuration. The machine applies
//! accepted changes at the next frame boundary.

use sid_6581::{SamplingMethod, SidModel};

/// VIC-II revision, which fixes the timing grid of the whole machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VicModel {
    /// PAL, 6569 (breadbin).
    #[default]
    Pal6569,
    /// NTSC, 6567.
    Ntsc6567,
    /// PAL, 8565 (C64 II).
    Pal8565,
    /// NTSC, 8562 (C64 II).
    Ntsc8562,
}

impl VicModel {
    /// CPU cycles per rasterline.
    #[must_use]
    pub fn cycles_per_line(self) -> u8 {
        match self {
            VicModel::Pal6569 | VicModel::Pal8565 => 63,
            VicModel::Ntsc6567 | VicModel::Ntsc8562 => 65,
        }
    }

    /// Rasterlines per frame.
    #[must_use]
    pub fn lines_per_frame(self) -> u16 {
        match self {
            VicModel::Pal6569 | VicModel::Pal8565 => 312,
            VicModel::Ntsc6567 | VicModel::Ntsc8562 => 263,
        }
    }

    /// CPU clock in Hz.
    #[must_use]
    pub fn cpu_frequency(self) -> u32 {
        match self {
            VicModel::Pal6569 | VicModel::Pal8565 => 985_249,
            VicModel::Ntsc6567 | VicModel::Ntsc8562 => 1_022_727,
        }
    }

    #[must_use]
    pub fn is_pal(self) -> bool {
        matches!(self, VicModel::Pal6569 | VicModel::Pal8565)
    }

    /// Wall-clock nanoseconds per frame.
    #[must_use]
    pub fn frame_nanos(self) -> u64 {
        let cycles = u64::from(self.cycles_per_line()) * u64::from(self.lines_per_frame());
        cycles * 1_000_000_000 / u64::from(self.cpu_frequency())
    }
}

/// Sprite-collision glue logic. The discrete variant of early boards
/// delays some VIC address lines by one pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GlueLogic {
    #[default]
    Discrete,
    CustomIc,
}

/// CIA revision: the 6526A drops the one-cycle interrupt delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CiaRevision {
    #[default]
    Mos6526,
    Mos6526A,
}

/// SID synthesis backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SidEngine {
    #[default]
    Fast,
    Resid,
}

/// Power-on RAM pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RamPattern {
    /// Breadbin: $00/$FF alternating in 64-byte stripes.
    #[default]
    C64,
    /// C64C boards come up with a $00-dominated pattern.
    C64C,
}

/// Drive mechanics model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DriveType {
    #[default]
    Vc1541II,
}

/// Host-settable option keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigOption {
    VicModel,
    GlueLogic,
    CiaRevision,
    SidRevision,
    SidFilter,
    SidEngine,
    SidSampling,
    RamPattern,
    DriveConnect,
    DriveType,
    DrivePowerSave,
    WarpLoad,
    EmulateDriveSound,
    AutoSnapshots,
    AutoSnapshotInterval,
}

/// The complete machine configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub vic_model: VicModel,
    pub glue_logic: GlueLogic,
    pub cia_revision: CiaRevision,
    pub sid_revision: SidModel,
    pub sid_filter: bool,
    pub sid_engine: SidEngine,
    pub sid_sampling: SamplingMethod,
    pub ram_pattern: RamPattern,
    pub drive_connected: bool,
    pub drive_type: DriveType,
    pub drive_power_save: bool,
    pub warp_load: bool,
    pub emulate_drive_sound: bool,
    pub auto_snapshots: bool,
    /// Seconds between auto snapshots.
    pub auto_snapshot_interval: i64,
    /// Audio output sample rate in Hz.
    pub sample_rate: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            vic_model: VicModel::default(),
            glue_logic: GlueLogic::default(),
            cia_revision: CiaRevision::default(),
            sid_revision: SidModel::default(),
            sid_filter: true,
            sid_engine: SidEngine::default(),
            sid_sampling: SamplingMethod::default(),
            ram_pattern: RamPattern::default(),
            drive_connected: false,
            drive_type: DriveType::default(),
            drive_power_save: true,
            warp_load: false,
            emulate_drive_sound: false,
            auto_snapshots: false,
            auto_snapshot_interval: 3,
            sample_rate: 48_000,
        }
    }
}

impl Config {
    /// Apply one option. Returns `false` (and changes nothing) if the
    /// value is not valid for the option.
    pub fn set(&mut self, option: ConfigOption, value: i64) -> bool {
        match option {
            ConfigOption::VicModel => match value {
                0 => self.vic_model = VicModel::Pal6569,
                1 => self.vic_model = VicModel::Ntsc6567,
                2 => self.vic_model = VicModel::Pal8565,
                3 => self.vic_model = VicModel::Ntsc8562,
                _ => return false,
            },
            ConfigOption::GlueLogic => match value {
                0 => self.glue_logic = GlueLogic::Discrete,
                1 => self.glue_logic = GlueLogic::CustomIc,
                _ => return false,
            },
            ConfigOption::CiaRevision => match value {
                0 => self.cia_revision = CiaRevision::Mos6526,
                1 => self.cia_revision = CiaRevision::Mos6526A,
                _ => return false,
            },
            ConfigOption::SidRevision => match value {
                0 => self.sid_revision = SidModel::Mos6581,
                1 => self.sid_revision = SidModel::Mos8580,
                _ => return false,
            },
            ConfigOption::SidFilter => match bool_value(value) {
                Some(v) => self.sid_filter = v,
                None => return false,
            },
            ConfigOption::SidEngine => match value {
                0 => self.sid_engine = SidEngine::Fast,
                1 => self.sid_engine = SidEngine::Resid,
                _ => return false,
            },
            ConfigOption::SidSampling => match value {
                0 => self.sid_sampling = SamplingMethod::Fast,
                1 => self.sid_sampling = SamplingMethod::Interpolate,
                2 => self.sid_sampling = SamplingMethod::Resample,
                _ => return false,
            },
            ConfigOption::RamPattern => match value {
                0 => self.ram_pattern = RamPattern::C64,
                1 => self.ram_pattern = RamPattern::C64C,
                _ => return false,
            },
            ConfigOption::DriveConnect => match bool_value(value) {
                Some(v) => self.drive_connected = v,
                None => return false,
            },
            ConfigOption::DriveType => match value {
                0 => self.drive_type = DriveType::Vc1541II,
                _ => return false,
            },
            ConfigOption::DrivePowerSave => match bool_value(value) {
                Some(v) => self.drive_power_save = v,
                None => return false,
            },
            ConfigOption::WarpLoad => match bool_value(value) {
                Some(v) => self.warp_load = v,
                None => return false,
            },
            ConfigOption::EmulateDriveSound => match bool_value(value) {
                Some(v) => self.emulate_drive_sound = v,
                None => return false,
            },
            ConfigOption::AutoSnapshots => match bool_value(value) {
                Some(v) => self.auto_snapshots = v,
                None => return false,
            },
            ConfigOption::AutoSnapshotInterval => {
                if value < 1 {
                    return false;
                }
                self.auto_snapshot_interval = value;
            }
        }
        true
    }
}

fn bool_value(value: i64) -> Option<bool> {
    match value {
        0 => Some(false),
        1 => Some(true),
        _ => None,
    }
}
