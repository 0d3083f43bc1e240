//! Emulator thread and run-loop scheduling.
//!
//! One dedicated thread owns all hardware mutation. Hosts talk to it
//! through atomic run-loop control bits, the state-change API guarded
//! by its own mutex, and the message queue. The machine mutex is held
//! by the thread for whole frames; every state-changing call first
//! parks the thread at a frame boundary (via the STOP control bit) and
//! then takes the mutex, so by the time it runs the thread is
//! quiescent.
//!
//! The component state machine:
//!
//! ```text
//!            power_on()           run()
//!   Off  ----------------> Paused -----> Running
//!    ^                       |  ^           |
//!    |      power_off()      |  '-----------'
//!    '-----------------------'     pause()
//! ```
//!
//! Control bits set before a frame boundary are all serviced at that
//! boundary, highest priority first: STOP, JAMMED, BREAKPOINT,
//! WATCHPOINT, INSPECT, AUTO_SNAPSHOT, USER_SNAPSHOT.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::c64::C64;
use crate::error::Result;
use crate::messages::{MsgQueue, MsgType};
use crate::snapshot::Snapshot;

// Run-loop control bits, in service priority order.
pub const RL_STOP: u32 = 0x01;
pub const RL_CPU_JAMMED: u32 = 0x02;
pub const RL_BREAKPOINT_REACHED: u32 = 0x04;
pub const RL_WATCHPOINT_REACHED: u32 = 0x08;
pub const RL_INSPECT: u32 = 0x10;
pub const RL_AUTO_SNAPSHOT: u32 = 0x20;
pub const RL_USER_SNAPSHOT: u32 = 0x40;

/// Snapshot ring capacity (auto and user each).
const MAX_SNAPSHOTS: usize = 32;

/// How far the timer may drift before it is declared out of sync.
const MAX_TIMING_DRIFT: Duration = Duration::from_millis(200);

/// Interval bias applied by `suspend_auto_snapshots`.
const AUTO_SNAPSHOT_BIAS: i64 = i64::MAX / 2;

/// Component power state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmuState {
    Off,
    Paused,
    Running,
}

/// What `inspect()` captures while the machine runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InspectionTarget {
    #[default]
    None,
    Cpu,
    Vic,
}

/// Most recent inspection results.
#[derive(Debug, Clone, Copy, Default)]
pub struct InspectionInfo {
    pub pc: u16,
    pub a: u8,
    pub x: u8,
    pub y: u8,
    pub sp: u8,
    pub rasterline: u16,
    pub raster_cycle: u8,
    pub frame: u64,
}

/// FIFO rings of automatically and manually taken snapshots. New
/// snapshots enter at index 0; the oldest falls off the end.
#[derive(Default)]
pub struct SnapshotStorage {
    auto: Vec<Snapshot>,
    user: Vec<Snapshot>,
}

impl SnapshotStorage {
    fn insert(list: &mut Vec<Snapshot>, snapshot: Snapshot) {
        list.insert(0, snapshot);
        list.truncate(MAX_SNAPSHOTS);
    }

    pub fn push_auto(&mut self, snapshot: Snapshot) {
        Self::insert(&mut self.auto, snapshot);
    }

    pub fn push_user(&mut self, snapshot: Snapshot) {
        Self::insert(&mut self.user, snapshot);
    }

    #[must_use]
    pub fn num_auto(&self) -> usize {
        self.auto.len()
    }

    #[must_use]
    pub fn num_user(&self) -> usize {
        self.user.len()
    }

    #[must_use]
    pub fn auto(&self, index: usize) -> Option<&Snapshot> {
        self.auto.get(index)
    }

    #[must_use]
    pub fn user(&self, index: usize) -> Option<&Snapshot> {
        self.user.get(index)
    }

    pub fn delete_auto(&mut self, index: usize) {
        if index < self.auto.len() {
            self.auto.remove(index);
        }
    }

    pub fn delete_user(&mut self, index: usize) {
        if index < self.user.len() {
            self.user.remove(index);
        }
    }
}

/// State shared between the emulator thread and the host-facing API.
struct Shared {
    c64: Mutex<C64>,
    queue: Arc<MsgQueue>,

    /// Component state plus its change signal ("thread quiesced").
    state: Mutex<EmuState>,
    state_cv: Condvar,
    /// Serializes all state-changing API calls.
    state_change: Mutex<()>,

    run_loop_ctrl: AtomicU32,
    stop_flag: AtomicBool,
    shutdown: AtomicBool,
    suspend_counter: AtomicUsize,
    /// Whether the machine was running when suspension began.
    resume_to_running: AtomicBool,
    warp: AtomicBool,

    snapshots: Mutex<SnapshotStorage>,
    /// Auto-snapshot pacing, in seconds (may carry the suspend bias).
    auto_snapshot_interval: Mutex<i64>,
    auto_snapshots_enabled: AtomicBool,

    breakpoints: Mutex<HashSet<u16>>,
    watchpoints: Mutex<HashMap<u16, u8>>,
    inspection_target: Mutex<InspectionTarget>,
    inspection: Mutex<InspectionInfo>,
}

impl Shared {
    fn set_ctrl(&self, bits: u32) {
        self.run_loop_ctrl.fetch_or(bits, Ordering::SeqCst);
    }

    fn clear_ctrl(&self, bits: u32) {
        self.run_loop_ctrl.fetch_and(!bits, Ordering::SeqCst);
    }
}

/// Wall-clock synchronization state of the emulator thread.
struct FrameTimer {
    origin: Instant,
    target_nanos: u64,
}

impl FrameTimer {
    fn restart(&mut self) {
        self.target_nanos = self.origin.elapsed().as_nanos() as u64;
    }

    /// Sleep until the next frame deadline. Returns true if the timer
    /// had drifted out of sync and was restarted.
    fn synchronize(&mut self, frame_nanos: u64) -> bool {
        self.target_nanos += frame_nanos;
        let now = self.origin.elapsed().as_nanos() as u64;
        if now > self.target_nanos {
            if now - self.target_nanos > MAX_TIMING_DRIFT.as_nanos() as u64 {
                warn!("frame timer out of sync, restarting");
                self.restart();
                return true;
            }
            return false; // Behind, but catching up
        }
        std::thread::sleep(Duration::from_nanos(self.target_nanos - now));
        false
    }
}

/// The emulator: a machine plus the thread that drives it.
pub struct Emulator {
    shared: Arc<Shared>,
    thread: Option<JoinHandle<()>>,
}

impl Emulator {
    #[must_use]
    pub fn new(c64: C64) -> Self {
        let queue = Arc::clone(&c64.queue);
        let shared = Arc::new(Shared {
            c64: Mutex::new(c64),
            queue,
            state: Mutex::new(EmuState::Off),
            state_cv: Condvar::new(),
            state_change: Mutex::new(()),
            run_loop_ctrl: AtomicU32::new(0),
            stop_flag: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
            suspend_counter: AtomicUsize::new(0),
            resume_to_running: AtomicBool::new(false),
            warp: AtomicBool::new(false),
            snapshots: Mutex::new(SnapshotStorage::default()),
            auto_snapshot_interval: Mutex::new(3),
            auto_snapshots_enabled: AtomicBool::new(false),
            breakpoints: Mutex::new(HashSet::new()),
            watchpoints: Mutex::new(HashMap::new()),
            inspection_target: Mutex::new(InspectionTarget::default()),
            inspection: Mutex::new(InspectionInfo::default()),
        });

        let worker = Arc::clone(&shared);
        let thread = std::thread::Builder::new()
            .name("emulator".into())
            .spawn(move || run_loop_thread(&worker))
            .expect("spawning the emulator thread");

        Self {
            shared,
            thread: Some(thread),
        }
    }

    // ------------------------------------------------------------------
    // State machine
    // ------------------------------------------------------------------

    #[must_use]
    pub fn state(&self) -> EmuState {
        *self.shared.state.lock().expect("state mutex")
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state() == EmuState::Running
    }

    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.state() == EmuState::Paused
    }

    #[must_use]
    pub fn is_powered_on(&self) -> bool {
        self.state() != EmuState::Off
    }

    /// Off -> Paused. A no-op when already powered on.
    pub fn power_on(&self) -> Result<()> {
        let _change = self.shared.state_change.lock().expect("state change lock");
        let mut state = self.shared.state.lock().expect("state mutex");
        if *state != EmuState::Off {
            return Ok(());
        }
        {
            let mut c64 = self.shared.c64.lock().expect("machine mutex");
            c64.is_ready().inspect_err(|_| {
                self.shared.queue.put_message(MsgType::RomMissing, 0);
            })?;
            c64.reset();
        }
        *state = EmuState::Paused;
        self.shared.state_cv.notify_all();
        self.shared.queue.put_message(MsgType::PowerOn, 0);
        info!("powered on");
        Ok(())
    }

    /// Any state -> Off. Running machines pause on the way down.
    pub fn power_off(&self) {
        let _change = self.shared.state_change.lock().expect("state change lock");
        self.pause_internal();
        let mut state = self.shared.state.lock().expect("state mutex");
        if *state == EmuState::Off {
            return;
        }
        *state = EmuState::Off;
        self.shared.state_cv.notify_all();
        self.shared.queue.put_message(MsgType::PowerOff, 0);
        info!("powered off");
    }

    /// Paused (or Off, via power-on) -> Running.
    pub fn run(&self) -> Result<()> {
        self.power_on()?;
        let _change = self.shared.state_change.lock().expect("state change lock");
        let mut state = self.shared.state.lock().expect("state mutex");
        if *state == EmuState::Running {
            return Ok(());
        }
        self.shared.stop_flag.store(false, Ordering::SeqCst);
        self.shared.clear_ctrl(RL_STOP);
        *state = EmuState::Running;
        self.shared.state_cv.notify_all();
        self.shared.queue.put_message(MsgType::Run, 0);
        Ok(())
    }

    /// Running -> Paused; waits until the thread is quiescent.
    pub fn pause(&self) {
        let _change = self.shared.state_change.lock().expect("state change lock");
        self.pause_internal();
    }

    fn pause_internal(&self) {
        let mut state = self.shared.state.lock().expect("state mutex");
        if *state != EmuState::Running {
            return;
        }
        self.shared.set_ctrl(RL_STOP);
        while *state == EmuState::Running {
            state = self.shared.state_cv.wait(state).expect("state mutex");
        }
    }

    /// Sticky stop request, evaluated at the next frame boundary.
    pub fn request_stop(&self) {
        self.shared.stop_flag.store(true, Ordering::SeqCst);
        self.shared.set_ctrl(RL_STOP);
    }

    // ------------------------------------------------------------------
    // Suspension
    // ------------------------------------------------------------------

    /// Pause the machine for host-side state surgery. Nests: only the
    /// outermost suspend pauses, only the matching resume restarts.
    pub fn suspend(&self) {
        if self.shared.suspend_counter.fetch_add(1, Ordering::SeqCst) == 0 {
            let was_running = self.is_running();
            self.shared
                .resume_to_running
                .store(was_running, Ordering::SeqCst);
            if was_running {
                self.pause();
            }
        }
    }

    pub fn resume(&self) {
        let previous = self.shared.suspend_counter.fetch_sub(1, Ordering::SeqCst);
        debug_assert!(previous > 0, "resume without suspend");
        if previous == 1 && self.shared.resume_to_running.load(Ordering::SeqCst) {
            let _ = self.run();
        }
    }

    /// Run a closure against the paused machine.
    pub fn with_c64<R>(&self, f: impl FnOnce(&mut C64) -> R) -> R {
        self.suspend();
        let result = {
            let mut c64 = self.shared.c64.lock().expect("machine mutex");
            f(&mut c64)
        };
        self.resume();
        result
    }

    // ------------------------------------------------------------------
    // Warp
    // ------------------------------------------------------------------

    #[must_use]
    pub fn in_warp_mode(&self) -> bool {
        self.shared.warp.load(Ordering::SeqCst)
    }

    pub fn set_warp(&self, enable: bool) {
        if self.shared.warp.swap(enable, Ordering::SeqCst) != enable {
            let msg = if enable {
                MsgType::WarpOn
            } else {
                MsgType::WarpOff
            };
            self.shared.queue.put_message(msg, 0);
        }
    }

    // ------------------------------------------------------------------
    // Stepping
    // ------------------------------------------------------------------

    /// Finish the instruction in flight and stop at the next fetch.
    pub fn step_into(&self) {
        self.with_c64(|c64| {
            c64.execute_one_cycle();
            c64.finish_instruction();
        });
    }

    /// Run until the instruction after the current one is reached,
    /// treating subroutine calls as single steps.
    pub fn step_over(&self) {
        self.with_c64(|c64| {
            let opcode = c64.spypeek(c64.cpu.regs.pc);
            let target = c64
                .cpu
                .regs
                .pc
                .wrapping_add(cpu_6510::instruction_length(opcode));
            // One-shot soft breakpoint; bounded in case control never
            // returns to the next instruction
            for _ in 0..20_000_000u32 {
                c64.execute_one_cycle();
                if c64.cpu.at_fetch() && c64.cpu.regs.pc == target {
                    break;
                }
            }
        });
    }

    // ------------------------------------------------------------------
    // Debugging
    // ------------------------------------------------------------------

    pub fn set_breakpoint(&self, addr: u16) {
        self.shared
            .breakpoints
            .lock()
            .expect("breakpoints")
            .insert(addr);
    }

    pub fn remove_breakpoint(&self, addr: u16) {
        self.shared
            .breakpoints
            .lock()
            .expect("breakpoints")
            .remove(&addr);
    }

    /// Watch a memory cell; the run loop stops when its value changes.
    pub fn set_watchpoint(&self, addr: u16) {
        let value = self.with_c64(|c64| c64.spypeek(addr));
        self.shared
            .watchpoints
            .lock()
            .expect("watchpoints")
            .insert(addr, value);
    }

    pub fn remove_watchpoint(&self, addr: u16) {
        self.shared
            .watchpoints
            .lock()
            .expect("watchpoints")
            .remove(&addr);
    }

    pub fn set_inspection_target(&self, target: InspectionTarget) {
        *self
            .shared
            .inspection_target
            .lock()
            .expect("inspection target") = target;
        if target != InspectionTarget::None {
            self.shared.set_ctrl(RL_INSPECT);
        }
    }

    #[must_use]
    pub fn inspection(&self) -> InspectionInfo {
        *self.shared.inspection.lock().expect("inspection")
    }

    // ------------------------------------------------------------------
    // Snapshots
    // ------------------------------------------------------------------

    pub fn enable_auto_snapshots(&self, enable: bool) {
        self.shared
            .auto_snapshots_enabled
            .store(enable, Ordering::SeqCst);
    }

    pub fn set_auto_snapshot_interval(&self, seconds: i64) {
        *self
            .shared
            .auto_snapshot_interval
            .lock()
            .expect("interval") = seconds.max(1);
    }

    /// Temporarily park the auto-snapshot scheduler (e.g. while a
    /// snapshot browser shows the ring).
    pub fn suspend_auto_snapshots(&self) {
        *self
            .shared
            .auto_snapshot_interval
            .lock()
            .expect("interval") -= AUTO_SNAPSHOT_BIAS;
    }

    pub fn resume_auto_snapshots(&self) {
        *self
            .shared
            .auto_snapshot_interval
            .lock()
            .expect("interval") += AUTO_SNAPSHOT_BIAS;
    }

    /// Take a user snapshot. Running machines schedule it for the next
    /// frame boundary; paused machines take it immediately.
    pub fn take_user_snapshot(&self) {
        if self.is_running() {
            self.shared.set_ctrl(RL_USER_SNAPSHOT);
        } else {
            let snapshot = self
                .shared
                .c64
                .lock()
                .expect("machine mutex")
                .take_snapshot();
            self.shared
                .snapshots
                .lock()
                .expect("snapshots")
                .push_user(snapshot);
            self.shared.queue.put_message(MsgType::SnapshotTaken, 0);
        }
    }

    /// Access the snapshot storage.
    pub fn snapshots(&self) -> MutexGuard<'_, SnapshotStorage> {
        self.shared.snapshots.lock().expect("snapshots")
    }

    /// Restore the newest user snapshot.
    pub fn restore_latest_user_snapshot(&self) -> Result<()> {
        let snapshot = self
            .shared
            .snapshots
            .lock()
            .expect("snapshots")
            .user(0)
            .cloned();
        match snapshot {
            Some(snapshot) => self.with_c64(|c64| c64.restore_snapshot(&snapshot)),
            None => Ok(()),
        }
    }
}

impl Drop for Emulator {
    fn drop(&mut self) {
        self.power_off();
        self.shared.shutdown.store(true, Ordering::SeqCst);
        self.shared.state_cv.notify_all();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

// ----------------------------------------------------------------------
// The emulator thread
// ----------------------------------------------------------------------

fn run_loop_thread(shared: &Arc<Shared>) {
    debug!("emulator thread up");
    loop {
        // Wait to be put into the running state
        {
            let mut state = shared.state.lock().expect("state mutex");
            loop {
                if shared.shutdown.load(Ordering::SeqCst) {
                    debug!("emulator thread exiting");
                    return;
                }
                if *state == EmuState::Running {
                    break;
                }
                state = shared.state_cv.wait(state).expect("state mutex");
            }
        }

        run_phase(shared);

        // Quiescent again: report Paused unless a power-off raced us
        {
            let mut state = shared.state.lock().expect("state mutex");
            if *state == EmuState::Running {
                *state = EmuState::Paused;
            }
            shared.state_cv.notify_all();
        }
        shared.queue.put_message(MsgType::Pause, 0);
    }
}

/// The actual run loop: owns the machine until a STOP is serviced.
fn run_phase(shared: &Arc<Shared>) {
    let mut c64 = shared.c64.lock().expect("machine mutex");
    let mut timer = FrameTimer {
        origin: Instant::now(),
        target_nanos: 0,
    };
    timer.restart();

    let mut last_auto_nanos: u64 = c64.frame() * c64.config().vic_model.frame_nanos();

    'running: loop {
        execute_one_frame(&mut c64, shared);

        // Auto-snapshot scheduling
        if shared.auto_snapshots_enabled.load(Ordering::SeqCst) {
            let interval = *shared.auto_snapshot_interval.lock().expect("interval");
            let frame_nanos = c64.config().vic_model.frame_nanos();
            let elapsed = c64.frame() * frame_nanos;
            let due = interval
                .saturating_mul(1_000_000_000)
                .saturating_add(last_auto_nanos as i64);
            if due >= 0 && elapsed as i64 >= due {
                shared.set_ctrl(RL_AUTO_SNAPSHOT);
                last_auto_nanos = elapsed;
            }
        }

        // Service control bits in priority order
        let ctrl = shared.run_loop_ctrl.swap(0, Ordering::SeqCst);
        if ctrl != 0 {
            if ctrl & RL_STOP != 0 {
                break 'running;
            }
            if ctrl & RL_CPU_JAMMED != 0 {
                shared
                    .queue
                    .put_message(MsgType::CpuJammed, u64::from(c64.cpu.regs.pc));
                break 'running;
            }
            if ctrl & RL_BREAKPOINT_REACHED != 0 {
                shared
                    .queue
                    .put_message(MsgType::BreakpointReached, u64::from(c64.cpu.regs.pc));
                break 'running;
            }
            if ctrl & RL_WATCHPOINT_REACHED != 0 {
                shared
                    .queue
                    .put_message(MsgType::WatchpointReached, u64::from(c64.cpu.regs.pc));
                break 'running;
            }
            if ctrl & RL_INSPECT != 0 {
                inspect(&c64, shared);
                // Inspection re-arms itself while a target is set
                if *shared.inspection_target.lock().expect("target") != InspectionTarget::None
                {
                    shared.set_ctrl(RL_INSPECT);
                }
            }
            if ctrl & RL_AUTO_SNAPSHOT != 0 {
                let snapshot = c64.take_snapshot();
                shared
                    .snapshots
                    .lock()
                    .expect("snapshots")
                    .push_auto(snapshot);
                shared.queue.put_message(MsgType::AutoSnapshotTaken, 0);
            }
            if ctrl & RL_USER_SNAPSHOT != 0 {
                let snapshot = c64.take_snapshot();
                shared
                    .snapshots
                    .lock()
                    .expect("snapshots")
                    .push_user(snapshot);
                shared.queue.put_message(MsgType::SnapshotTaken, 0);
            }
        }

        if shared.stop_flag.load(Ordering::SeqCst) {
            break 'running;
        }

        // Match wall-clock time unless warping
        if !shared.warp.load(Ordering::SeqCst) {
            timer.synchronize(c64.config().vic_model.frame_nanos());
        }
    }
}

/// Run one frame, raising control bits for events that must park the
/// loop. The cycle stack is never unwound: a jam or breakpoint only
/// ends the frame early.
fn execute_one_frame(c64: &mut C64, shared: &Arc<Shared>) {
    let breakpoints = shared.breakpoints.lock().expect("breakpoints").clone();
    let have_watchpoints = !shared.watchpoints.lock().expect("watchpoints").is_empty();

    let frame = c64.frame();
    while c64.frame() == frame {
        c64.execute_one_cycle();

        if c64.is_jammed() {
            shared.set_ctrl(RL_CPU_JAMMED);
            return;
        }
        if !breakpoints.is_empty() && c64.cpu.at_fetch() && breakpoints.contains(&c64.cpu.regs.pc)
        {
            shared.set_ctrl(RL_BREAKPOINT_REACHED);
            return;
        }
        if have_watchpoints && c64.cpu.at_fetch() {
            let mut watchpoints = shared.watchpoints.lock().expect("watchpoints");
            let mut hit = false;
            for (addr, last) in watchpoints.iter_mut() {
                let now = c64.spypeek(*addr);
                if now != *last {
                    *last = now;
                    hit = true;
                }
            }
            if hit {
                shared.set_ctrl(RL_WATCHPOINT_REACHED);
                return;
            }
        }
    }
}

fn inspect(c64: &C64, shared: &Arc<Shared>) {
    let target = *shared.inspection_target.lock().expect("target");
    if target == InspectionTarget::None {
        return;
    }
    let mut info = shared.inspection.lock().expect("inspection");
    info.pc = c64.cpu.regs.pc;
    info.a = c64.cpu.regs.a;
    info.x = c64.cpu.regs.x;
    info.y = c64.cpu.regs.y;
    info.sp = c64.cpu.regs.sp;
    info.rasterline = c64.rasterline();
    info.raster_cycle = c64.raster_cycle();
    info.frame = c64.frame();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn make_machine() -> C64 {
        let mut c64 = C64::new(Config::default());
        let mut kernal = vec![0xEA; 0x2000];
        kernal[0x1FFC] = 0x00;
        kernal[0x1FFD] = 0xE0;
        c64.install_kernal_rom(&kernal).unwrap();
        c64.install_basic_rom(&[0xEA; 0x2000]).unwrap();
        c64.install_char_rom(&[0x00; 0x1000]).unwrap();
        c64
    }

    fn make_emulator() -> Emulator {
        let emu = Emulator::new(make_machine());
        emu.set_warp(true); // Tests should not sleep
        emu
    }

    #[test]
    fn power_state_transitions() {
        let emu = make_emulator();
        assert_eq!(emu.state(), EmuState::Off);

        emu.power_on().unwrap();
        assert_eq!(emu.state(), EmuState::Paused);

        // Idempotent
        emu.power_on().unwrap();
        assert_eq!(emu.state(), EmuState::Paused);

        emu.run().unwrap();
        assert_eq!(emu.state(), EmuState::Running);

        emu.pause();
        assert_eq!(emu.state(), EmuState::Paused);

        emu.power_off();
        assert_eq!(emu.state(), EmuState::Off);
        // No-op on an Off machine
        emu.power_off();
        assert_eq!(emu.state(), EmuState::Off);
    }

    #[test]
    fn power_on_without_roms_fails() {
        let emu = Emulator::new(C64::new(Config::default()));
        assert!(emu.power_on().is_err());
        assert_eq!(emu.state(), EmuState::Off);
    }

    #[test]
    fn run_from_off_passes_through_paused() {
        let emu = make_emulator();
        emu.run().unwrap();
        assert_eq!(emu.state(), EmuState::Running);
        emu.power_off();
    }

    #[test]
    fn running_machine_advances_frames() {
        let emu = make_emulator();
        emu.run().unwrap();
        std::thread::sleep(Duration::from_millis(50));
        emu.pause();
        let frames = emu.with_c64(|c64| c64.frame());
        assert!(frames > 0, "no frames executed");
    }

    #[test]
    fn pause_leaves_thread_quiescent() {
        let emu = make_emulator();
        emu.run().unwrap();
        emu.pause();
        // The machine mutex must be immediately available
        let clock1 = emu.with_c64(|c64| c64.master_clock());
        let clock2 = emu.with_c64(|c64| c64.master_clock());
        assert_eq!(clock1, clock2);
    }

    #[test]
    fn suspend_resume_nests() {
        let emu = make_emulator();
        emu.run().unwrap();

        emu.suspend();
        assert_eq!(emu.state(), EmuState::Paused);
        emu.suspend();
        emu.resume();
        // Still suspended: one level remains
        assert_eq!(emu.state(), EmuState::Paused);
        emu.resume();
        assert_eq!(emu.state(), EmuState::Running);
        emu.power_off();
    }

    #[test]
    fn step_into_retires_one_instruction() {
        let emu = make_emulator();
        emu.power_on().unwrap();
        let before = emu.with_c64(|c64| c64.cpu.regs.pc);
        emu.step_into();
        let after = emu.with_c64(|c64| c64.cpu.regs.pc);
        assert_eq!(after, before.wrapping_add(1)); // NOP sled
    }

    #[test]
    fn step_over_skips_to_next_instruction() {
        let emu = make_emulator();
        emu.power_on().unwrap();
        let before = emu.with_c64(|c64| c64.cpu.regs.pc);
        emu.step_over();
        let after = emu.with_c64(|c64| c64.cpu.regs.pc);
        assert_eq!(after, before.wrapping_add(1));
    }

    #[test]
    fn breakpoint_pauses_the_loop() {
        let emu = make_emulator();
        emu.power_on().unwrap();
        // The NOP sled wraps within the kernal; break a bit ahead
        emu.set_breakpoint(0xE020);
        emu.run().unwrap();

        // Wait for the breakpoint to park the machine
        let mut waited = 0;
        while emu.is_running() && waited < 200 {
            std::thread::sleep(Duration::from_millis(10));
            waited += 1;
        }
        assert_eq!(emu.state(), EmuState::Paused);
        let pc = emu.with_c64(|c64| c64.cpu.regs.pc);
        assert_eq!(pc, 0xE020);
    }

    #[test]
    fn user_snapshots_ring_is_bounded() {
        let emu = make_emulator();
        emu.power_on().unwrap();
        for _ in 0..40 {
            emu.take_user_snapshot();
        }
        assert_eq!(emu.snapshots().num_user(), MAX_SNAPSHOTS);
    }

    #[test]
    fn latest_user_snapshot_restores() {
        let emu = make_emulator();
        emu.power_on().unwrap();
        emu.with_c64(|c64| c64.bus.mem.ram_write(0x2000, 0x77));
        emu.take_user_snapshot();
        emu.with_c64(|c64| c64.bus.mem.ram_write(0x2000, 0x00));
        emu.restore_latest_user_snapshot().unwrap();
        assert_eq!(emu.with_c64(|c64| c64.bus.mem.ram_read(0x2000)), 0x77);
    }

    #[test]
    fn auto_snapshot_suspension_biases_interval() {
        let emu = make_emulator();
        emu.set_auto_snapshot_interval(3);
        emu.suspend_auto_snapshots();
        {
            let interval = *emu.shared.auto_snapshot_interval.lock().unwrap();
            assert!(interval < 0);
        }
        emu.resume_auto_snapshots();
        let interval = *emu.shared.auto_snapshot_interval.lock().unwrap();
        assert_eq!(interval, 3);
    }

    #[test]
    fn watchpoint_fires_on_memory_change() {
        let emu = make_emulator();
        emu.power_on().unwrap();
        emu.set_watchpoint(0x3000);
        emu.with_c64(|c64| {
            // Program: INC $3000, then NOPs (in RAM at $1000)
            c64.bus.mem.ram_write(0x1000, 0xEE);
            c64.bus.mem.ram_write(0x1001, 0x00);
            c64.bus.mem.ram_write(0x1002, 0x30);
            for i in 3..32 {
                c64.bus.mem.ram_write(0x1000 + i, 0xEA);
            }
            c64.cpu.regs.pc = 0x1000;
        });
        emu.run().unwrap();
        let mut waited = 0;
        while emu.is_running() && waited < 200 {
            std::thread::sleep(Duration::from_millis(10));
            waited += 1;
        }
        assert_eq!(emu.state(), EmuState::Paused);
        assert_eq!(emu.with_c64(|c64| c64.bus.mem.ram_read(0x3000)), 1);
    }

    #[test]
    fn warp_mode_toggles_with_message() {
        let emu = make_emulator();
        assert!(emu.in_warp_mode());
        emu.set_warp(false);
        assert!(!emu.in_warp_mode());
    }
}
