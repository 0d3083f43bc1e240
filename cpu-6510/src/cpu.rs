//! 6510 CPU core.
//!
//! Cycle-stepped execution: every `tick()` performs at most one bus
//! access. The instruction currently in flight is tracked by `(opcode,
//! cycle)`; addressing-mode helpers advance the cycle counter and invoke
//! the operation function once the operand is available.
//!
//! # Interrupts
//!
//! The IRQ input is level-sensitive and sampled every cycle into a
//! two-deep pipeline; an interrupt is taken at the next opcode fetch only
//! if the line was asserted during the second-to-last cycle of the
//! preceding instruction. NMI is edge-sensitive and latched. BRK shares
//! the seven-cycle interrupt sequence but pushes P with B = 1.
//!
//! # RDY
//!
//! While RDY is low, read cycles do not complete (the micro-step is
//! retried on the next tick); write cycles are unaffected. The VIC-II
//! pulls RDY low three cycles ahead of its character fetches, which is
//! exactly the maximum run of consecutive write cycles an instruction
//! can produce.

#![allow(clippy::cast_possible_truncation)]

use emu_core::{HardwareComponent, ReadError, SnapshotReader, SnapshotWriter};

use crate::flags::{Status, B, C, D, I, N, V, Z};
use crate::registers::Registers;
use crate::Bus;

/// Magic constant mixed into the unstable ANE/LXA opcodes. The value
/// depends on chip lot and temperature on real silicon; $EE is the
/// commonly observed one.
const UNSTABLE_MAGIC: u8 = 0xEE;

/// Execution state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// About to fetch an opcode (or service a pending interrupt).
    FetchOpcode,
    /// Executing the micro-program of the current opcode.
    Execute,
    /// A HLT/KIL opcode was executed; only a reset recovers.
    Jammed,
}

/// Which event is being pushed through the interrupt sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Interrupt {
    Brk,
    Irq,
    Nmi,
}

impl Interrupt {
    const fn vector(self) -> u16 {
        match self {
            Interrupt::Brk | Interrupt::Irq => 0xFFFE,
            Interrupt::Nmi => 0xFFFA,
        }
    }
}

/// The MOS 6510 CPU (also instantiated as the VC1541's 6502).
pub struct Cpu6510 {
    /// Register file.
    pub regs: Registers,

    state: State,

    /// Opcode currently executing.
    opcode: u8,

    /// Cycle within the current instruction (0 = fetch).
    cycle: u8,

    /// Scratch address register for addressing modes.
    addr: u16,

    /// Scratch data register (also reused as the page-cross marker).
    data: u8,

    /// Scratch pointer for indirect addressing.
    pointer: u8,

    /// Interrupt kind being serviced through the BRK micro-program.
    servicing: Option<Interrupt>,

    /// RDY input level (low = stall reads).
    rdy: bool,

    /// IRQ input level.
    irq_line: bool,

    /// IRQ level history; bit 0 = last cycle, bit 1 = the cycle before.
    irq_pipeline: u8,

    /// NMI input level, for edge detection.
    nmi_line: bool,

    /// Latched NMI edge, cleared when the sequence starts.
    nmi_pending: bool,
}

impl Default for Cpu6510 {
    fn default() -> Self {
        Self::new()
    }
}

impl Cpu6510 {
    #[must_use]
    pub fn new() -> Self {
        Self {
            regs: Registers::new(),
            state: State::FetchOpcode,
            opcode: 0,
            cycle: 0,
            addr: 0,
            data: 0,
            pointer: 0,
            servicing: None,
            rdy: true,
            irq_line: false,
            irq_pipeline: 0,
            nmi_line: false,
            nmi_pending: false,
        }
    }

    /// Advance the CPU by one bus cycle.
    pub fn tick<B: Bus>(&mut self, bus: &mut B) {
        let _ = self.step(bus);
        self.irq_pipeline = (self.irq_pipeline << 1) | u8::from(self.irq_line);
    }

    /// Drive the RDY input. Low stalls the CPU on its next read cycle.
    pub fn set_rdy(&mut self, level: bool) {
        self.rdy = level;
    }

    /// Drive the IRQ input (level-sensitive, active = true).
    pub fn set_irq_line(&mut self, level: bool) {
        self.irq_line = level;
    }

    /// Drive the NMI input. A rising edge (inactive to active) is latched.
    pub fn set_nmi_line(&mut self, level: bool) {
        if level && !self.nmi_line {
            self.nmi_pending = true;
        }
        self.nmi_line = level;
    }

    /// True if a HLT/KIL opcode stopped the CPU.
    #[must_use]
    pub fn is_jammed(&self) -> bool {
        self.state == State::Jammed
    }

    /// Pulse the SO (set overflow) input. The 1541 wires its byte-ready
    /// signal to this pin.
    pub fn trigger_so(&mut self) {
        self.regs.p.set(V);
    }

    /// True when the next tick would fetch an opcode, i.e. the previous
    /// instruction has fully retired.
    #[must_use]
    pub fn at_fetch(&self) -> bool {
        self.state == State::FetchOpcode
    }

    /// Opcode of the instruction currently in flight.
    #[must_use]
    pub fn current_opcode(&self) -> u8 {
        self.opcode
    }

    /// IRQ was asserted early enough to be taken at the coming fetch.
    fn irq_ready(&self) -> bool {
        self.irq_pipeline & 0x02 != 0
    }

    /// Perform a read cycle, or stall if RDY is low.
    fn read<B: Bus>(&mut self, bus: &mut B, addr: u16) -> Option<u8> {
        if !self.rdy {
            return None;
        }
        Some(bus.read(addr))
    }

    /// One micro-step. Returns `None` if the cycle stalled on RDY.
    fn step<B: Bus>(&mut self, bus: &mut B) -> Option<()> {
        match self.state {
            State::FetchOpcode => {
                if self.nmi_pending {
                    self.read(bus, self.regs.pc)?;
                    self.nmi_pending = false;
                    self.begin_interrupt(Interrupt::Nmi);
                    return Some(());
                }
                if self.irq_ready() && !self.regs.p.is_set(I) {
                    self.read(bus, self.regs.pc)?;
                    self.begin_interrupt(Interrupt::Irq);
                    return Some(());
                }
                self.opcode = self.read(bus, self.regs.pc)?;
                self.regs.pc = self.regs.pc.wrapping_add(1);
                self.cycle = 1;
                self.state = State::Execute;
                Some(())
            }
            State::Execute => self.execute_instruction(bus),
            State::Jammed => {
                // Address bus repeats the jam address forever.
                self.read(bus, self.regs.pc)?;
                Some(())
            }
        }
    }

    /// Enter the interrupt sequence after its first (dummy-read) cycle.
    fn begin_interrupt(&mut self, kind: Interrupt) {
        self.opcode = 0x00;
        self.servicing = Some(kind);
        self.cycle = 2;
        self.state = State::Execute;
    }

    fn finish(&mut self) {
        self.state = State::FetchOpcode;
        self.cycle = 0;
    }

    fn jam(&mut self) {
        self.state = State::Jammed;
    }

    fn execute_instruction<B: Bus>(&mut self, bus: &mut B) -> Option<()> {
        match self.opcode {
            // --- Row $0x ---
            0x00 => self.op_brk(bus),
            0x01 => self.addr_izx(bus, Self::do_ora),
            0x03 => self.addr_izx_rmw(bus, Self::do_slo),
            0x04 => self.addr_zp(bus, Self::do_nop_read),
            0x05 => self.addr_zp(bus, Self::do_ora),
            0x06 => self.addr_zp_rmw(bus, Self::do_asl),
            0x07 => self.addr_zp_rmw(bus, Self::do_slo),
            0x08 => self.op_php(bus),
            0x09 => self.addr_imm(bus, Self::do_ora),
            0x0A => self.op_implied(bus, |cpu| {
                cpu.regs.a = cpu.do_asl(cpu.regs.a);
            }),
            0x0B | 0x2B => self.addr_imm(bus, Self::do_anc),
            0x0C => self.addr_abs(bus, Self::do_nop_read),
            0x0D => self.addr_abs(bus, Self::do_ora),
            0x0E => self.addr_abs_rmw(bus, Self::do_asl),
            0x0F => self.addr_abs_rmw(bus, Self::do_slo),

            // --- Row $1x ---
            0x10 => self.op_branch(bus, !self.regs.p.is_set(N)),
            0x11 => self.addr_izy(bus, Self::do_ora),
            0x13 => self.addr_izy_rmw(bus, Self::do_slo),
            0x14 | 0x34 | 0x54 | 0x74 | 0xD4 | 0xF4 => self.addr_zpx(bus, Self::do_nop_read),
            0x15 => self.addr_zpx(bus, Self::do_ora),
            0x16 => self.addr_zpx_rmw(bus, Self::do_asl),
            0x17 => self.addr_zpx_rmw(bus, Self::do_slo),
            0x18 => self.op_flag(bus, C, false),
            0x19 => self.addr_aby(bus, Self::do_ora),
            0x1A | 0x3A | 0x5A | 0x7A | 0xDA | 0xFA => self.op_implied(bus, |_| {}),
            0x1B => self.addr_aby_rmw(bus, Self::do_slo),
            0x1C | 0x3C | 0x5C | 0x7C | 0xDC | 0xFC => self.addr_abx(bus, Self::do_nop_read),
            0x1D => self.addr_abx(bus, Self::do_ora),
            0x1E => self.addr_abx_rmw(bus, Self::do_asl),
            0x1F => self.addr_abx_rmw(bus, Self::do_slo),

            // --- Row $2x ---
            0x20 => self.op_jsr(bus),
            0x21 => self.addr_izx(bus, Self::do_and),
            0x23 => self.addr_izx_rmw(bus, Self::do_rla),
            0x24 => self.addr_zp(bus, Self::do_bit),
            0x25 => self.addr_zp(bus, Self::do_and),
            0x26 => self.addr_zp_rmw(bus, Self::do_rol),
            0x27 => self.addr_zp_rmw(bus, Self::do_rla),
            0x28 => self.op_plp(bus),
            0x29 => self.addr_imm(bus, Self::do_and),
            0x2A => self.op_implied(bus, |cpu| {
                cpu.regs.a = cpu.do_rol(cpu.regs.a);
            }),
            0x2C => self.addr_abs(bus, Self::do_bit),
            0x2D => self.addr_abs(bus, Self::do_and),
            0x2E => self.addr_abs_rmw(bus, Self::do_rol),
            0x2F => self.addr_abs_rmw(bus, Self::do_rla),

            // --- Row $3x ---
            0x30 => self.op_branch(bus, self.regs.p.is_set(N)),
            0x31 => self.addr_izy(bus, Self::do_and),
            0x33 => self.addr_izy_rmw(bus, Self::do_rla),
            0x35 => self.addr_zpx(bus, Self::do_and),
            0x36 => self.addr_zpx_rmw(bus, Self::do_rol),
            0x37 => self.addr_zpx_rmw(bus, Self::do_rla),
            0x38 => self.op_flag(bus, C, true),
            0x39 => self.addr_aby(bus, Self::do_and),
            0x3B => self.addr_aby_rmw(bus, Self::do_rla),
            0x3D => self.addr_abx(bus, Self::do_and),
            0x3E => self.addr_abx_rmw(bus, Self::do_rol),
            0x3F => self.addr_abx_rmw(bus, Self::do_rla),

            // --- Row $4x ---
            0x40 => self.op_rti(bus),
            0x41 => self.addr_izx(bus, Self::do_eor),
            0x43 => self.addr_izx_rmw(bus, Self::do_sre),
            0x44 | 0x64 => self.addr_zp(bus, Self::do_nop_read),
            0x45 => self.addr_zp(bus, Self::do_eor),
            0x46 => self.addr_zp_rmw(bus, Self::do_lsr),
            0x47 => self.addr_zp_rmw(bus, Self::do_sre),
            0x48 => self.op_pha(bus),
            0x49 => self.addr_imm(bus, Self::do_eor),
            0x4A => self.op_implied(bus, |cpu| {
                cpu.regs.a = cpu.do_lsr(cpu.regs.a);
            }),
            0x4B => self.addr_imm(bus, Self::do_alr),
            0x4C => self.op_jmp_abs(bus),
            0x4D => self.addr_abs(bus, Self::do_eor),
            0x4E => self.addr_abs_rmw(bus, Self::do_lsr),
            0x4F => self.addr_abs_rmw(bus, Self::do_sre),

            // --- Row $5x ---
            0x50 => self.op_branch(bus, !self.regs.p.is_set(V)),
            0x51 => self.addr_izy(bus, Self::do_eor),
            0x53 => self.addr_izy_rmw(bus, Self::do_sre),
            0x55 => self.addr_zpx(bus, Self::do_eor),
            0x56 => self.addr_zpx_rmw(bus, Self::do_lsr),
            0x57 => self.addr_zpx_rmw(bus, Self::do_sre),
            0x58 => self.op_flag(bus, I, false),
            0x59 => self.addr_aby(bus, Self::do_eor),
            0x5B => self.addr_aby_rmw(bus, Self::do_sre),
            0x5D => self.addr_abx(bus, Self::do_eor),
            0x5E => self.addr_abx_rmw(bus, Self::do_lsr),
            0x5F => self.addr_abx_rmw(bus, Self::do_sre),

            // --- Row $6x ---
            0x60 => self.op_rts(bus),
            0x61 => self.addr_izx(bus, Self::do_adc),
            0x63 => self.addr_izx_rmw(bus, Self::do_rra),
            0x65 => self.addr_zp(bus, Self::do_adc),
            0x66 => self.addr_zp_rmw(bus, Self::do_ror),
            0x67 => self.addr_zp_rmw(bus, Self::do_rra),
            0x68 => self.op_pla(bus),
            0x69 => self.addr_imm(bus, Self::do_adc),
            0x6A => self.op_implied(bus, |cpu| {
                cpu.regs.a = cpu.do_ror(cpu.regs.a);
            }),
            0x6B => self.addr_imm(bus, Self::do_arr),
            0x6C => self.op_jmp_ind(bus),
            0x6D => self.addr_abs(bus, Self::do_adc),
            0x6E => self.addr_abs_rmw(bus, Self::do_ror),
            0x6F => self.addr_abs_rmw(bus, Self::do_rra),

            // --- Row $7x ---
            0x70 => self.op_branch(bus, self.regs.p.is_set(V)),
            0x71 => self.addr_izy(bus, Self::do_adc),
            0x73 => self.addr_izy_rmw(bus, Self::do_rra),
            0x75 => self.addr_zpx(bus, Self::do_adc),
            0x76 => self.addr_zpx_rmw(bus, Self::do_ror),
            0x77 => self.addr_zpx_rmw(bus, Self::do_rra),
            0x78 => self.op_flag(bus, I, true),
            0x79 => self.addr_aby(bus, Self::do_adc),
            0x7B => self.addr_aby_rmw(bus, Self::do_rra),
            0x7D => self.addr_abx(bus, Self::do_adc),
            0x7E => self.addr_abx_rmw(bus, Self::do_ror),
            0x7F => self.addr_abx_rmw(bus, Self::do_rra),

            // --- Row $8x ---
            0x80 | 0x82 | 0x89 | 0xC2 | 0xE2 => self.addr_imm(bus, Self::do_nop_read),
            0x81 => self.addr_izx_w(bus, |cpu| cpu.regs.a),
            0x83 => self.addr_izx_w(bus, |cpu| cpu.regs.a & cpu.regs.x),
            0x84 => self.addr_zp_w(bus, |cpu| cpu.regs.y),
            0x85 => self.addr_zp_w(bus, |cpu| cpu.regs.a),
            0x86 => self.addr_zp_w(bus, |cpu| cpu.regs.x),
            0x87 => self.addr_zp_w(bus, |cpu| cpu.regs.a & cpu.regs.x),
            0x88 => self.op_implied(bus, |cpu| {
                cpu.regs.y = cpu.regs.y.wrapping_sub(1);
                cpu.regs.p.update_nz(cpu.regs.y);
            }),
            0x8A => self.op_implied(bus, |cpu| {
                cpu.regs.a = cpu.regs.x;
                cpu.regs.p.update_nz(cpu.regs.a);
            }),
            0x8B => self.addr_imm(bus, Self::do_ane),
            0x8C => self.addr_abs_w(bus, |cpu| cpu.regs.y),
            0x8D => self.addr_abs_w(bus, |cpu| cpu.regs.a),
            0x8E => self.addr_abs_w(bus, |cpu| cpu.regs.x),
            0x8F => self.addr_abs_w(bus, |cpu| cpu.regs.a & cpu.regs.x),

            // --- Row $9x ---
            0x90 => self.op_branch(bus, !self.regs.p.is_set(C)),
            0x91 => self.addr_izy_w(bus, |cpu| cpu.regs.a),
            0x93 => self.addr_izy_w(bus, |cpu| {
                cpu.regs.a & cpu.regs.x & ((cpu.addr >> 8) as u8).wrapping_add(1)
            }),
            0x94 => self.addr_zpx_w(bus, |cpu| cpu.regs.y),
            0x95 => self.addr_zpx_w(bus, |cpu| cpu.regs.a),
            0x96 => self.addr_zpy_w(bus, |cpu| cpu.regs.x),
            0x97 => self.addr_zpy_w(bus, |cpu| cpu.regs.a & cpu.regs.x),
            0x98 => self.op_implied(bus, |cpu| {
                cpu.regs.a = cpu.regs.y;
                cpu.regs.p.update_nz(cpu.regs.a);
            }),
            0x99 => self.addr_aby_w(bus, |cpu| cpu.regs.a),
            0x9A => self.op_implied(bus, |cpu| cpu.regs.sp = cpu.regs.x),
            0x9B => self.addr_aby_w(bus, |cpu| {
                cpu.regs.sp = cpu.regs.a & cpu.regs.x;
                cpu.regs.sp & ((cpu.addr >> 8) as u8).wrapping_add(1)
            }),
            0x9C => self.addr_abx_w(bus, |cpu| {
                cpu.regs.y & ((cpu.addr >> 8) as u8).wrapping_add(1)
            }),
            0x9D => self.addr_abx_w(bus, |cpu| cpu.regs.a),
            0x9E => self.addr_aby_w(bus, |cpu| {
                cpu.regs.x & ((cpu.addr >> 8) as u8).wrapping_add(1)
            }),
            0x9F => self.addr_aby_w(bus, |cpu| {
                cpu.regs.a & cpu.regs.x & ((cpu.addr >> 8) as u8).wrapping_add(1)
            }),

            // --- Row $Ax ---
            0xA0 => self.addr_imm(bus, Self::do_ldy),
            0xA1 => self.addr_izx(bus, Self::do_lda),
            0xA2 => self.addr_imm(bus, Self::do_ldx),
            0xA3 => self.addr_izx(bus, Self::do_lax),
            0xA4 => self.addr_zp(bus, Self::do_ldy),
            0xA5 => self.addr_zp(bus, Self::do_lda),
            0xA6 => self.addr_zp(bus, Self::do_ldx),
            0xA7 => self.addr_zp(bus, Self::do_lax),
            0xA8 => self.op_implied(bus, |cpu| {
                cpu.regs.y = cpu.regs.a;
                cpu.regs.p.update_nz(cpu.regs.y);
            }),
            0xA9 => self.addr_imm(bus, Self::do_lda),
            0xAA => self.op_implied(bus, |cpu| {
                cpu.regs.x = cpu.regs.a;
                cpu.regs.p.update_nz(cpu.regs.x);
            }),
            0xAB => self.addr_imm(bus, Self::do_lxa),
            0xAC => self.addr_abs(bus, Self::do_ldy),
            0xAD => self.addr_abs(bus, Self::do_lda),
            0xAE => self.addr_abs(bus, Self::do_ldx),
            0xAF => self.addr_abs(bus, Self::do_lax),

            // --- Row $Bx ---
            0xB0 => self.op_branch(bus, self.regs.p.is_set(C)),
            0xB1 => self.addr_izy(bus, Self::do_lda),
            0xB3 => self.addr_izy(bus, Self::do_lax),
            0xB4 => self.addr_zpx(bus, Self::do_ldy),
            0xB5 => self.addr_zpx(bus, Self::do_lda),
            0xB6 => self.addr_zpy(bus, Self::do_ldx),
            0xB7 => self.addr_zpy(bus, Self::do_lax),
            0xB8 => self.op_flag(bus, V, false),
            0xB9 => self.addr_aby(bus, Self::do_lda),
            0xBA => self.op_implied(bus, |cpu| {
                cpu.regs.x = cpu.regs.sp;
                cpu.regs.p.update_nz(cpu.regs.x);
            }),
            0xBB => self.addr_aby(bus, Self::do_las),
            0xBC => self.addr_abx(bus, Self::do_ldy),
            0xBD => self.addr_abx(bus, Self::do_lda),
            0xBE => self.addr_aby(bus, Self::do_ldx),
            0xBF => self.addr_aby(bus, Self::do_lax),

            // --- Row $Cx ---
            0xC0 => self.addr_imm(bus, Self::do_cpy),
            0xC1 => self.addr_izx(bus, Self::do_cmp),
            0xC3 => self.addr_izx_rmw(bus, Self::do_dcp),
            0xC4 => self.addr_zp(bus, Self::do_cpy),
            0xC5 => self.addr_zp(bus, Self::do_cmp),
            0xC6 => self.addr_zp_rmw(bus, Self::do_dec),
            0xC7 => self.addr_zp_rmw(bus, Self::do_dcp),
            0xC8 => self.op_implied(bus, |cpu| {
                cpu.regs.y = cpu.regs.y.wrapping_add(1);
                cpu.regs.p.update_nz(cpu.regs.y);
            }),
            0xC9 => self.addr_imm(bus, Self::do_cmp),
            0xCA => self.op_implied(bus, |cpu| {
                cpu.regs.x = cpu.regs.x.wrapping_sub(1);
                cpu.regs.p.update_nz(cpu.regs.x);
            }),
            0xCB => self.addr_imm(bus, Self::do_axs),
            0xCC => self.addr_abs(bus, Self::do_cpy),
            0xCD => self.addr_abs(bus, Self::do_cmp),
            0xCE => self.addr_abs_rmw(bus, Self::do_dec),
            0xCF => self.addr_abs_rmw(bus, Self::do_dcp),

            // --- Row $Dx ---
            0xD0 => self.op_branch(bus, !self.regs.p.is_set(Z)),
            0xD1 => self.addr_izy(bus, Self::do_cmp),
            0xD3 => self.addr_izy_rmw(bus, Self::do_dcp),
            0xD5 => self.addr_zpx(bus, Self::do_cmp),
            0xD6 => self.addr_zpx_rmw(bus, Self::do_dec),
            0xD7 => self.addr_zpx_rmw(bus, Self::do_dcp),
            0xD8 => self.op_flag(bus, D, false),
            0xD9 => self.addr_aby(bus, Self::do_cmp),
            0xDB => self.addr_aby_rmw(bus, Self::do_dcp),
            0xDD => self.addr_abx(bus, Self::do_cmp),
            0xDE => self.addr_abx_rmw(bus, Self::do_dec),
            0xDF => self.addr_abx_rmw(bus, Self::do_dcp),

            // --- Row $Ex ---
            0xE0 => self.addr_imm(bus, Self::do_cpx),
            0xE1 => self.addr_izx(bus, Self::do_sbc),
            0xE3 => self.addr_izx_rmw(bus, Self::do_isc),
            0xE4 => self.addr_zp(bus, Self::do_cpx),
            0xE5 => self.addr_zp(bus, Self::do_sbc),
            0xE6 => self.addr_zp_rmw(bus, Self::do_inc),
            0xE7 => self.addr_zp_rmw(bus, Self::do_isc),
            0xE8 => self.op_implied(bus, |cpu| {
                cpu.regs.x = cpu.regs.x.wrapping_add(1);
                cpu.regs.p.update_nz(cpu.regs.x);
            }),
            0xE9 | 0xEB => self.addr_imm(bus, Self::do_sbc),
            0xEA => self.op_implied(bus, |_| {}),
            0xEC => self.addr_abs(bus, Self::do_cpx),
            0xED => self.addr_abs(bus, Self::do_sbc),
            0xEE => self.addr_abs_rmw(bus, Self::do_inc),
            0xEF => self.addr_abs_rmw(bus, Self::do_isc),

            // --- Row $Fx ---
            0xF0 => self.op_branch(bus, self.regs.p.is_set(Z)),
            0xF1 => self.addr_izy(bus, Self::do_sbc),
            0xF3 => self.addr_izy_rmw(bus, Self::do_isc),
            0xF5 => self.addr_zpx(bus, Self::do_sbc),
            0xF6 => self.addr_zpx_rmw(bus, Self::do_inc),
            0xF7 => self.addr_zpx_rmw(bus, Self::do_isc),
            0xF8 => self.op_flag(bus, D, true),
            0xF9 => self.addr_aby(bus, Self::do_sbc),
            0xFB => self.addr_aby_rmw(bus, Self::do_isc),
            0xFD => self.addr_abx(bus, Self::do_sbc),
            0xFE => self.addr_abx_rmw(bus, Self::do_inc),
            0xFF => self.addr_abx_rmw(bus, Self::do_isc),

            // HLT/KIL family: the instruction decoder wedges.
            0x02 | 0x12 | 0x22 | 0x32 | 0x42 | 0x52 | 0x62 | 0x72 | 0x92 | 0xB2 | 0xD2
            | 0xF2 => {
                self.read(bus, self.regs.pc)?;
                self.jam();
                Some(())
            }
        }
    }

    // ------------------------------------------------------------------
    // Addressing mode helpers - read operations
    // ------------------------------------------------------------------

    fn addr_imm<B: Bus>(&mut self, bus: &mut B, op: fn(&mut Self, u8)) -> Option<()> {
        // Cycle 1: read operand at PC
        self.data = self.read(bus, self.regs.pc)?;
        self.regs.pc = self.regs.pc.wrapping_add(1);
        op(self, self.data);
        self.finish();
        Some(())
    }

    fn addr_zp<B: Bus>(&mut self, bus: &mut B, op: fn(&mut Self, u8)) -> Option<()> {
        match self.cycle {
            1 => {
                self.addr = u16::from(self.read(bus, self.regs.pc)?);
                self.regs.pc = self.regs.pc.wrapping_add(1);
                self.cycle = 2;
            }
            2 => {
                self.data = self.read(bus, self.addr)?;
                op(self, self.data);
                self.finish();
            }
            _ => unreachable!(),
        }
        Some(())
    }

    fn addr_zpx<B: Bus>(&mut self, bus: &mut B, op: fn(&mut Self, u8)) -> Option<()> {
        match self.cycle {
            1 => {
                self.pointer = self.read(bus, self.regs.pc)?;
                self.regs.pc = self.regs.pc.wrapping_add(1);
                self.cycle = 2;
            }
            2 => {
                // Dummy read while adding X (wraps inside the zero page)
                self.read(bus, u16::from(self.pointer))?;
                self.addr = u16::from(self.pointer.wrapping_add(self.regs.x));
                self.cycle = 3;
            }
            3 => {
                self.data = self.read(bus, self.addr)?;
                op(self, self.data);
                self.finish();
            }
            _ => unreachable!(),
        }
        Some(())
    }

    fn addr_zpy<B: Bus>(&mut self, bus: &mut B, op: fn(&mut Self, u8)) -> Option<()> {
        match self.cycle {
            1 => {
                self.pointer = self.read(bus, self.regs.pc)?;
                self.regs.pc = self.regs.pc.wrapping_add(1);
                self.cycle = 2;
            }
            2 => {
                self.read(bus, u16::from(self.pointer))?;
                self.addr = u16::from(self.pointer.wrapping_add(self.regs.y));
                self.cycle = 3;
            }
            3 => {
                self.data = self.read(bus, self.addr)?;
                op(self, self.data);
                self.finish();
            }
            _ => unreachable!(),
        }
        Some(())
    }

    fn addr_abs<B: Bus>(&mut self, bus: &mut B, op: fn(&mut Self, u8)) -> Option<()> {
        match self.cycle {
            1 => {
                self.addr = u16::from(self.read(bus, self.regs.pc)?);
                self.regs.pc = self.regs.pc.wrapping_add(1);
                self.cycle = 2;
            }
            2 => {
                self.addr |= u16::from(self.read(bus, self.regs.pc)?) << 8;
                self.regs.pc = self.regs.pc.wrapping_add(1);
                self.cycle = 3;
            }
            3 => {
                self.data = self.read(bus, self.addr)?;
                op(self, self.data);
                self.finish();
            }
            _ => unreachable!(),
        }
        Some(())
    }

    fn addr_abx<B: Bus>(&mut self, bus: &mut B, op: fn(&mut Self, u8)) -> Option<()> {
        self.addr_indexed(bus, self.regs.x, op)
    }

    fn addr_aby<B: Bus>(&mut self, bus: &mut B, op: fn(&mut Self, u8)) -> Option<()> {
        self.addr_indexed(bus, self.regs.y, op)
    }

    /// Absolute,X / absolute,Y read with the page-crossing extra cycle.
    fn addr_indexed<B: Bus>(
        &mut self,
        bus: &mut B,
        index: u8,
        op: fn(&mut Self, u8),
    ) -> Option<()> {
        match self.cycle {
            1 => {
                self.addr = u16::from(self.read(bus, self.regs.pc)?);
                self.regs.pc = self.regs.pc.wrapping_add(1);
                self.cycle = 2;
            }
            2 => {
                let hi = self.read(bus, self.regs.pc)?;
                self.regs.pc = self.regs.pc.wrapping_add(1);
                let lo = (self.addr as u8).wrapping_add(index);
                self.addr = u16::from(lo) | (u16::from(hi) << 8);
                // Page-cross marker
                self.data = u8::from(lo < index);
                self.cycle = 3;
            }
            3 => {
                if self.data != 0 {
                    // Dummy read from the unfixed address, then fix it
                    self.read(bus, self.addr)?;
                    self.addr = self.addr.wrapping_add(0x100);
                    self.cycle = 4;
                } else {
                    self.data = self.read(bus, self.addr)?;
                    op(self, self.data);
                    self.finish();
                }
            }
            4 => {
                self.data = self.read(bus, self.addr)?;
                op(self, self.data);
                self.finish();
            }
            _ => unreachable!(),
        }
        Some(())
    }

    fn addr_izx<B: Bus>(&mut self, bus: &mut B, op: fn(&mut Self, u8)) -> Option<()> {
        match self.cycle {
            1 => {
                self.pointer = self.read(bus, self.regs.pc)?;
                self.regs.pc = self.regs.pc.wrapping_add(1);
                self.cycle = 2;
            }
            2 => {
                self.read(bus, u16::from(self.pointer))?;
                self.pointer = self.pointer.wrapping_add(self.regs.x);
                self.cycle = 3;
            }
            3 => {
                self.addr = u16::from(self.read(bus, u16::from(self.pointer))?);
                self.cycle = 4;
            }
            4 => {
                // High byte wraps inside the zero page
                self.addr |=
                    u16::from(self.read(bus, u16::from(self.pointer.wrapping_add(1)))?) << 8;
                self.cycle = 5;
            }
            5 => {
                self.data = self.read(bus, self.addr)?;
                op(self, self.data);
                self.finish();
            }
            _ => unreachable!(),
        }
        Some(())
    }

    fn addr_izy<B: Bus>(&mut self, bus: &mut B, op: fn(&mut Self, u8)) -> Option<()> {
        match self.cycle {
            1 => {
                self.pointer = self.read(bus, self.regs.pc)?;
                self.regs.pc = self.regs.pc.wrapping_add(1);
                self.cycle = 2;
            }
            2 => {
                self.addr = u16::from(self.read(bus, u16::from(self.pointer))?);
                self.cycle = 3;
            }
            3 => {
                let hi = self.read(bus, u16::from(self.pointer.wrapping_add(1)))?;
                let lo = (self.addr as u8).wrapping_add(self.regs.y);
                self.addr = u16::from(lo) | (u16::from(hi) << 8);
                self.data = u8::from(lo < self.regs.y);
                self.cycle = 4;
            }
            4 => {
                if self.data != 0 {
                    self.read(bus, self.addr)?;
                    self.addr = self.addr.wrapping_add(0x100);
                    self.cycle = 5;
                } else {
                    self.data = self.read(bus, self.addr)?;
                    op(self, self.data);
                    self.finish();
                }
            }
            5 => {
                self.data = self.read(bus, self.addr)?;
                op(self, self.data);
                self.finish();
            }
            _ => unreachable!(),
        }
        Some(())
    }

    // ------------------------------------------------------------------
    // Addressing mode helpers - write operations
    // ------------------------------------------------------------------

    fn addr_zp_w<B: Bus>(&mut self, bus: &mut B, val: fn(&mut Self) -> u8) -> Option<()> {
        match self.cycle {
            1 => {
                self.addr = u16::from(self.read(bus, self.regs.pc)?);
                self.regs.pc = self.regs.pc.wrapping_add(1);
                self.cycle = 2;
            }
            2 => {
                let v = val(self);
                bus.write(self.addr, v);
                self.finish();
            }
            _ => unreachable!(),
        }
        Some(())
    }

    fn addr_zpx_w<B: Bus>(&mut self, bus: &mut B, val: fn(&mut Self) -> u8) -> Option<()> {
        self.addr_zp_indexed_w(bus, self.regs.x, val)
    }

    fn addr_zpy_w<B: Bus>(&mut self, bus: &mut B, val: fn(&mut Self) -> u8) -> Option<()> {
        self.addr_zp_indexed_w(bus, self.regs.y, val)
    }

    fn addr_zp_indexed_w<B: Bus>(
        &mut self,
        bus: &mut B,
        index: u8,
        val: fn(&mut Self) -> u8,
    ) -> Option<()> {
        match self.cycle {
            1 => {
                self.pointer = self.read(bus, self.regs.pc)?;
                self.regs.pc = self.regs.pc.wrapping_add(1);
                self.cycle = 2;
            }
            2 => {
                self.read(bus, u16::from(self.pointer))?;
                self.addr = u16::from(self.pointer.wrapping_add(index));
                self.cycle = 3;
            }
            3 => {
                let v = val(self);
                bus.write(self.addr, v);
                self.finish();
            }
            _ => unreachable!(),
        }
        Some(())
    }

    fn addr_abs_w<B: Bus>(&mut self, bus: &mut B, val: fn(&mut Self) -> u8) -> Option<()> {
        match self.cycle {
            1 => {
                self.addr = u16::from(self.read(bus, self.regs.pc)?);
                self.regs.pc = self.regs.pc.wrapping_add(1);
                self.cycle = 2;
            }
            2 => {
                self.addr |= u16::from(self.read(bus, self.regs.pc)?) << 8;
                self.regs.pc = self.regs.pc.wrapping_add(1);
                self.cycle = 3;
            }
            3 => {
                let v = val(self);
                bus.write(self.addr, v);
                self.finish();
            }
            _ => unreachable!(),
        }
        Some(())
    }

    fn addr_abx_w<B: Bus>(&mut self, bus: &mut B, val: fn(&mut Self) -> u8) -> Option<()> {
        self.addr_indexed_w(bus, self.regs.x, val)
    }

    fn addr_aby_w<B: Bus>(&mut self, bus: &mut B, val: fn(&mut Self) -> u8) -> Option<()> {
        self.addr_indexed_w(bus, self.regs.y, val)
    }

    /// Indexed absolute store: always 5 cycles, dummy read before the write.
    fn addr_indexed_w<B: Bus>(
        &mut self,
        bus: &mut B,
        index: u8,
        val: fn(&mut Self) -> u8,
    ) -> Option<()> {
        match self.cycle {
            1 => {
                self.addr = u16::from(self.read(bus, self.regs.pc)?);
                self.regs.pc = self.regs.pc.wrapping_add(1);
                self.cycle = 2;
            }
            2 => {
                let hi = self.read(bus, self.regs.pc)?;
                self.regs.pc = self.regs.pc.wrapping_add(1);
                let lo = (self.addr as u8).wrapping_add(index);
                self.addr = u16::from(lo) | (u16::from(hi) << 8);
                self.data = u8::from(lo < index);
                self.cycle = 3;
            }
            3 => {
                self.read(bus, self.addr)?;
                if self.data != 0 {
                    self.addr = self.addr.wrapping_add(0x100);
                }
                self.cycle = 4;
            }
            4 => {
                let v = val(self);
                bus.write(self.addr, v);
                self.finish();
            }
            _ => unreachable!(),
        }
        Some(())
    }

    fn addr_izx_w<B: Bus>(&mut self, bus: &mut B, val: fn(&mut Self) -> u8) -> Option<()> {
        match self.cycle {
            1 => {
                self.pointer = self.read(bus, self.regs.pc)?;
                self.regs.pc = self.regs.pc.wrapping_add(1);
                self.cycle = 2;
            }
            2 => {
                self.read(bus, u16::from(self.pointer))?;
                self.pointer = self.pointer.wrapping_add(self.regs.x);
                self.cycle = 3;
            }
            3 => {
                self.addr = u16::from(self.read(bus, u16::from(self.pointer))?);
                self.cycle = 4;
            }
            4 => {
                self.addr |=
                    u16::from(self.read(bus, u16::from(self.pointer.wrapping_add(1)))?) << 8;
                self.cycle = 5;
            }
            5 => {
                let v = val(self);
                bus.write(self.addr, v);
                self.finish();
            }
            _ => unreachable!(),
        }
        Some(())
    }

    fn addr_izy_w<B: Bus>(&mut self, bus: &mut B, val: fn(&mut Self) -> u8) -> Option<()> {
        match self.cycle {
            1 => {
                self.pointer = self.read(bus, self.regs.pc)?;
                self.regs.pc = self.regs.pc.wrapping_add(1);
                self.cycle = 2;
            }
            2 => {
                self.addr = u16::from(self.read(bus, u16::from(self.pointer))?);
                self.cycle = 3;
            }
            3 => {
                let hi = self.read(bus, u16::from(self.pointer.wrapping_add(1)))?;
                let lo = (self.addr as u8).wrapping_add(self.regs.y);
                self.addr = u16::from(lo) | (u16::from(hi) << 8);
                self.data = u8::from(lo < self.regs.y);
                self.cycle = 4;
            }
            4 => {
                self.read(bus, self.addr)?;
                if self.data != 0 {
                    self.addr = self.addr.wrapping_add(0x100);
                }
                self.cycle = 5;
            }
            5 => {
                let v = val(self);
                bus.write(self.addr, v);
                self.finish();
            }
            _ => unreachable!(),
        }
        Some(())
    }

    // ------------------------------------------------------------------
    // Addressing mode helpers - read-modify-write operations
    // ------------------------------------------------------------------

    fn addr_zp_rmw<B: Bus>(&mut self, bus: &mut B, op: fn(&mut Self, u8) -> u8) -> Option<()> {
        match self.cycle {
            1 => {
                self.addr = u16::from(self.read(bus, self.regs.pc)?);
                self.regs.pc = self.regs.pc.wrapping_add(1);
                self.cycle = 2;
            }
            2 => {
                self.data = self.read(bus, self.addr)?;
                self.cycle = 3;
            }
            3 => {
                // Dummy write of the unmodified value
                bus.write(self.addr, self.data);
                self.data = op(self, self.data);
                self.cycle = 4;
            }
            4 => {
                bus.write(self.addr, self.data);
                self.finish();
            }
            _ => unreachable!(),
        }
        Some(())
    }

    fn addr_zpx_rmw<B: Bus>(&mut self, bus: &mut B, op: fn(&mut Self, u8) -> u8) -> Option<()> {
        match self.cycle {
            1 => {
                self.pointer = self.read(bus, self.regs.pc)?;
                self.regs.pc = self.regs.pc.wrapping_add(1);
                self.cycle = 2;
            }
            2 => {
                self.read(bus, u16::from(self.pointer))?;
                self.addr = u16::from(self.pointer.wrapping_add(self.regs.x));
                self.cycle = 3;
            }
            3 => {
                self.data = self.read(bus, self.addr)?;
                self.cycle = 4;
            }
            4 => {
                bus.write(self.addr, self.data);
                self.data = op(self, self.data);
                self.cycle = 5;
            }
            5 => {
                bus.write(self.addr, self.data);
                self.finish();
            }
            _ => unreachable!(),
        }
        Some(())
    }

    fn addr_abs_rmw<B: Bus>(&mut self, bus: &mut B, op: fn(&mut Self, u8) -> u8) -> Option<()> {
        match self.cycle {
            1 => {
                self.addr = u16::from(self.read(bus, self.regs.pc)?);
                self.regs.pc = self.regs.pc.wrapping_add(1);
                self.cycle = 2;
            }
            2 => {
                self.addr |= u16::from(self.read(bus, self.regs.pc)?) << 8;
                self.regs.pc = self.regs.pc.wrapping_add(1);
                self.cycle = 3;
            }
            3 => {
                self.data = self.read(bus, self.addr)?;
                self.cycle = 4;
            }
            4 => {
                bus.write(self.addr, self.data);
                self.data = op(self, self.data);
                self.cycle = 5;
            }
            5 => {
                bus.write(self.addr, self.data);
                self.finish();
            }
            _ => unreachable!(),
        }
        Some(())
    }

    fn addr_abx_rmw<B: Bus>(&mut self, bus: &mut B, op: fn(&mut Self, u8) -> u8) -> Option<()> {
        self.addr_indexed_rmw(bus, self.regs.x, op)
    }

    fn addr_aby_rmw<B: Bus>(&mut self, bus: &mut B, op: fn(&mut Self, u8) -> u8) -> Option<()> {
        self.addr_indexed_rmw(bus, self.regs.y, op)
    }

    /// Indexed absolute RMW: always 7 cycles.
    fn addr_indexed_rmw<B: Bus>(
        &mut self,
        bus: &mut B,
        index: u8,
        op: fn(&mut Self, u8) -> u8,
    ) -> Option<()> {
        match self.cycle {
            1 => {
                self.addr = u16::from(self.read(bus, self.regs.pc)?);
                self.regs.pc = self.regs.pc.wrapping_add(1);
                self.cycle = 2;
            }
            2 => {
                let hi = self.read(bus, self.regs.pc)?;
                self.regs.pc = self.regs.pc.wrapping_add(1);
                let lo = (self.addr as u8).wrapping_add(index);
                self.addr = u16::from(lo) | (u16::from(hi) << 8);
                self.data = u8::from(lo < index);
                self.cycle = 3;
            }
            3 => {
                self.read(bus, self.addr)?;
                if self.data != 0 {
                    self.addr = self.addr.wrapping_add(0x100);
                }
                self.cycle = 4;
            }
            4 => {
                self.data = self.read(bus, self.addr)?;
                self.cycle = 5;
            }
            5 => {
                bus.write(self.addr, self.data);
                self.data = op(self, self.data);
                self.cycle = 6;
            }
            6 => {
                bus.write(self.addr, self.data);
                self.finish();
            }
            _ => unreachable!(),
        }
        Some(())
    }

    /// (zp,X) RMW - 8 cycles (undocumented opcodes only).
    fn addr_izx_rmw<B: Bus>(&mut self, bus: &mut B, op: fn(&mut Self, u8) -> u8) -> Option<()> {
        match self.cycle {
            1 => {
                self.pointer = self.read(bus, self.regs.pc)?;
                self.regs.pc = self.regs.pc.wrapping_add(1);
                self.cycle = 2;
            }
            2 => {
                self.read(bus, u16::from(self.pointer))?;
                self.pointer = self.pointer.wrapping_add(self.regs.x);
                self.cycle = 3;
            }
            3 => {
                self.addr = u16::from(self.read(bus, u16::from(self.pointer))?);
                self.cycle = 4;
            }
            4 => {
                self.addr |=
                    u16::from(self.read(bus, u16::from(self.pointer.wrapping_add(1)))?) << 8;
                self.cycle = 5;
            }
            5 => {
                self.data = self.read(bus, self.addr)?;
                self.cycle = 6;
            }
            6 => {
                bus.write(self.addr, self.data);
                self.data = op(self, self.data);
                self.cycle = 7;
            }
            7 => {
                bus.write(self.addr, self.data);
                self.finish();
            }
            _ => unreachable!(),
        }
        Some(())
    }

    /// (zp),Y RMW - 8 cycles (undocumented opcodes only).
    fn addr_izy_rmw<B: Bus>(&mut self, bus: &mut B, op: fn(&mut Self, u8) -> u8) -> Option<()> {
        match self.cycle {
            1 => {
                self.pointer = self.read(bus, self.regs.pc)?;
                self.regs.pc = self.regs.pc.wrapping_add(1);
                self.cycle = 2;
            }
            2 => {
                self.addr = u16::from(self.read(bus, u16::from(self.pointer))?);
                self.cycle = 3;
            }
            3 => {
                let hi = self.read(bus, u16::from(self.pointer.wrapping_add(1)))?;
                let lo = (self.addr as u8).wrapping_add(self.regs.y);
                self.addr = u16::from(lo) | (u16::from(hi) << 8);
                self.data = u8::from(lo < self.regs.y);
                self.cycle = 4;
            }
            4 => {
                self.read(bus, self.addr)?;
                if self.data != 0 {
                    self.addr = self.addr.wrapping_add(0x100);
                }
                self.cycle = 5;
            }
            5 => {
                self.data = self.read(bus, self.addr)?;
                self.cycle = 6;
            }
            6 => {
                bus.write(self.addr, self.data);
                self.data = op(self, self.data);
                self.cycle = 7;
            }
            7 => {
                bus.write(self.addr, self.data);
                self.finish();
            }
            _ => unreachable!(),
        }
        Some(())
    }

    // ------------------------------------------------------------------
    // ALU operations
    // ------------------------------------------------------------------

    fn do_nop_read(&mut self, _val: u8) {}

    fn do_lda(&mut self, val: u8) {
        self.regs.a = val;
        self.regs.p.update_nz(val);
    }

    fn do_ldx(&mut self, val: u8) {
        self.regs.x = val;
        self.regs.p.update_nz(val);
    }

    fn do_ldy(&mut self, val: u8) {
        self.regs.y = val;
        self.regs.p.update_nz(val);
    }

    fn do_lax(&mut self, val: u8) {
        self.regs.a = val;
        self.regs.x = val;
        self.regs.p.update_nz(val);
    }

    fn do_ora(&mut self, val: u8) {
        self.regs.a |= val;
        self.regs.p.update_nz(self.regs.a);
    }

    fn do_and(&mut self, val: u8) {
        self.regs.a &= val;
        self.regs.p.update_nz(self.regs.a);
    }

    fn do_eor(&mut self, val: u8) {
        self.regs.a ^= val;
        self.regs.p.update_nz(self.regs.a);
    }

    fn do_adc(&mut self, val: u8) {
        if self.regs.p.is_set(D) {
            self.do_adc_decimal(val);
        } else {
            self.do_adc_binary(val);
        }
    }

    fn do_adc_binary(&mut self, val: u8) {
        let a = self.regs.a;
        let carry = u16::from(self.regs.p.is_set(C));
        let sum = u16::from(a) + u16::from(val) + carry;
        let result = sum as u8;

        self.regs.p.set_if(C, sum > 0xFF);
        self.regs
            .p
            .set_if(V, (a ^ result) & (val ^ result) & 0x80 != 0);
        self.regs.a = result;
        self.regs.p.update_nz(result);
    }

    fn do_adc_decimal(&mut self, val: u8) {
        let a = self.regs.a;
        let carry = u8::from(self.regs.p.is_set(C));

        let mut lo = (a & 0x0F) + (val & 0x0F) + carry;
        if lo > 9 {
            lo += 6;
        }
        let mut hi = (a >> 4) + (val >> 4) + u8::from(lo > 0x0F);

        // Z, N and V reflect the binary result on the NMOS chip
        let bin = (u16::from(a) + u16::from(val) + u16::from(carry)) as u8;
        self.regs.p.set_if(Z, bin == 0);
        self.regs.p.set_if(N, hi & 0x08 != 0);
        self.regs.p.set_if(V, (a ^ bin) & (val ^ bin) & 0x80 != 0);

        if hi > 9 {
            hi += 6;
        }
        self.regs.p.set_if(C, hi > 0x0F);
        self.regs.a = (hi << 4) | (lo & 0x0F);
    }

    fn do_sbc(&mut self, val: u8) {
        if self.regs.p.is_set(D) {
            self.do_sbc_decimal(val);
        } else {
            // SBC is ADC with the operand inverted
            self.do_adc_binary(!val);
        }
    }

    fn do_sbc_decimal(&mut self, val: u8) {
        let a = self.regs.a;
        let borrow: i16 = i16::from(!self.regs.p.is_set(C));

        // Flags reflect the binary result on the NMOS chip
        let bin = i16::from(a) - i16::from(val) - borrow;
        self.regs.p.set_if(C, bin >= 0);
        self.regs.p.set_if(Z, (bin as u8) == 0);
        self.regs.p.set_if(N, bin & 0x80 != 0);
        self.regs.p.set_if(
            V,
            (i16::from(a) ^ bin) & (i16::from(a) ^ i16::from(val)) & 0x80 != 0,
        );

        let mut lo = i16::from(a & 0x0F) - i16::from(val & 0x0F) - borrow;
        let mut hi = i16::from(a >> 4) - i16::from(val >> 4);
        if lo < 0 {
            lo -= 6;
            hi -= 1;
        }
        if hi < 0 {
            hi -= 6;
        }
        self.regs.a = ((hi << 4) as u8) | ((lo & 0x0F) as u8);
    }

    fn do_cmp(&mut self, val: u8) {
        let result = self.regs.a.wrapping_sub(val);
        self.regs.p.set_if(C, self.regs.a >= val);
        self.regs.p.update_nz(result);
    }

    fn do_cpx(&mut self, val: u8) {
        let result = self.regs.x.wrapping_sub(val);
        self.regs.p.set_if(C, self.regs.x >= val);
        self.regs.p.update_nz(result);
    }

    fn do_cpy(&mut self, val: u8) {
        let result = self.regs.y.wrapping_sub(val);
        self.regs.p.set_if(C, self.regs.y >= val);
        self.regs.p.update_nz(result);
    }

    fn do_bit(&mut self, val: u8) {
        self.regs.p.set_if(Z, self.regs.a & val == 0);
        self.regs.p.set_if(N, val & 0x80 != 0);
        self.regs.p.set_if(V, val & 0x40 != 0);
    }

    fn do_asl(&mut self, val: u8) -> u8 {
        self.regs.p.set_if(C, val & 0x80 != 0);
        let result = val << 1;
        self.regs.p.update_nz(result);
        result
    }

    fn do_lsr(&mut self, val: u8) -> u8 {
        self.regs.p.set_if(C, val & 0x01 != 0);
        let result = val >> 1;
        self.regs.p.update_nz(result);
        result
    }

    fn do_rol(&mut self, val: u8) -> u8 {
        let carry = u8::from(self.regs.p.is_set(C));
        self.regs.p.set_if(C, val & 0x80 != 0);
        let result = (val << 1) | carry;
        self.regs.p.update_nz(result);
        result
    }

    fn do_ror(&mut self, val: u8) -> u8 {
        let carry = if self.regs.p.is_set(C) { 0x80 } else { 0 };
        self.regs.p.set_if(C, val & 0x01 != 0);
        let result = (val >> 1) | carry;
        self.regs.p.update_nz(result);
        result
    }

    fn do_inc(&mut self, val: u8) -> u8 {
        let result = val.wrapping_add(1);
        self.regs.p.update_nz(result);
        result
    }

    fn do_dec(&mut self, val: u8) -> u8 {
        let result = val.wrapping_sub(1);
        self.regs.p.update_nz(result);
        result
    }

    // --- Undocumented combinations ---

    /// ASL memory, then ORA the shifted value into A.
    fn do_slo(&mut self, val: u8) -> u8 {
        let shifted = self.do_asl(val);
        self.do_ora(shifted);
        shifted
    }

    /// ROL memory, then AND into A.
    fn do_rla(&mut self, val: u8) -> u8 {
        let rolled = self.do_rol(val);
        self.do_and(rolled);
        rolled
    }

    /// LSR memory, then EOR into A.
    fn do_sre(&mut self, val: u8) -> u8 {
        let shifted = self.do_lsr(val);
        self.do_eor(shifted);
        shifted
    }

    /// ROR memory, then ADC the result.
    fn do_rra(&mut self, val: u8) -> u8 {
        let rolled = self.do_ror(val);
        self.do_adc(rolled);
        rolled
    }

    /// DEC memory, then CMP with A.
    fn do_dcp(&mut self, val: u8) -> u8 {
        let result = val.wrapping_sub(1);
        self.do_cmp(result);
        result
    }

    /// INC memory, then SBC the result.
    fn do_isc(&mut self, val: u8) -> u8 {
        let result = val.wrapping_add(1);
        self.do_sbc(result);
        result
    }

    /// AND immediate; C is loaded from bit 7 of the result.
    fn do_anc(&mut self, val: u8) {
        self.do_and(val);
        self.regs.p.set_if(C, self.regs.a & 0x80 != 0);
    }

    /// AND immediate, then LSR A.
    fn do_alr(&mut self, val: u8) {
        self.do_and(val);
        self.regs.a = self.do_lsr(self.regs.a);
    }

    /// AND immediate, then ROR A with C/V derived from bits 6/5.
    fn do_arr(&mut self, val: u8) {
        let anded = self.regs.a & val;
        let carry_in = if self.regs.p.is_set(C) { 0x80 } else { 0 };
        self.regs.a = (anded >> 1) | carry_in;
        self.regs.p.update_nz(self.regs.a);
        self.regs.p.set_if(C, self.regs.a & 0x40 != 0);
        self.regs
            .p
            .set_if(V, ((self.regs.a >> 6) ^ (self.regs.a >> 5)) & 1 != 0);
    }

    /// X = (A & X) - immediate, without borrow.
    fn do_axs(&mut self, val: u8) {
        let base = self.regs.a & self.regs.x;
        self.regs.p.set_if(C, base >= val);
        self.regs.x = base.wrapping_sub(val);
        self.regs.p.update_nz(self.regs.x);
    }

    /// A = X = SP = value & SP.
    fn do_las(&mut self, val: u8) {
        let result = val & self.regs.sp;
        self.regs.a = result;
        self.regs.x = result;
        self.regs.sp = result;
        self.regs.p.update_nz(result);
    }

    /// Unstable: A = (A | magic) & X & immediate.
    fn do_ane(&mut self, val: u8) {
        self.regs.a = (self.regs.a | UNSTABLE_MAGIC) & self.regs.x & val;
        self.regs.p.update_nz(self.regs.a);
    }

    /// Unstable: A = X = (A | magic) & immediate.
    fn do_lxa(&mut self, val: u8) {
        let result = (self.regs.a | UNSTABLE_MAGIC) & val;
        self.regs.a = result;
        self.regs.x = result;
        self.regs.p.update_nz(result);
    }

    // ------------------------------------------------------------------
    // Individual instructions
    // ------------------------------------------------------------------

    /// Shared BRK / IRQ / NMI sequence. For hardware interrupts the
    /// sequence is entered at cycle 2 with PC untouched and B clear in
    /// the pushed status.
    fn op_brk<B: Bus>(&mut self, bus: &mut B) -> Option<()> {
        let kind = self.servicing.unwrap_or(Interrupt::Brk);
        match self.cycle {
            1 => {
                // BRK padding byte: read and skip
                self.read(bus, self.regs.pc)?;
                self.regs.pc = self.regs.pc.wrapping_add(1);
                self.servicing = Some(Interrupt::Brk);
                self.cycle = 2;
            }
            2 => {
                let addr = self.regs.push();
                bus.write(addr, (self.regs.pc >> 8) as u8);
                self.cycle = 3;
            }
            3 => {
                let addr = self.regs.push();
                bus.write(addr, self.regs.pc as u8);
                self.cycle = 4;
            }
            4 => {
                let status = match kind {
                    Interrupt::Brk => self.regs.p.to_byte_brk(),
                    Interrupt::Irq | Interrupt::Nmi => self.regs.p.to_byte_irq(),
                };
                let addr = self.regs.push();
                bus.write(addr, status);
                self.regs.p.set(I);
                self.cycle = 5;
            }
            5 => {
                self.addr = u16::from(self.read(bus, kind.vector())?);
                self.cycle = 6;
            }
            6 => {
                let hi = self.read(bus, kind.vector().wrapping_add(1))?;
                self.regs.pc = self.addr | (u16::from(hi) << 8);
                self.servicing = None;
                self.finish();
            }
            _ => unreachable!(),
        }
        Some(())
    }

    fn op_rti<B: Bus>(&mut self, bus: &mut B) -> Option<()> {
        match self.cycle {
            1 => {
                self.read(bus, self.regs.pc)?;
                self.cycle = 2;
            }
            2 => {
                self.read(bus, self.regs.stack_addr())?;
                self.cycle = 3;
            }
            3 => {
                let addr = self.regs.pop();
                let status = self.read(bus, addr)?;
                self.regs.p = Status::from_byte(status & !B);
                self.cycle = 4;
            }
            4 => {
                let addr = self.regs.pop();
                self.addr = u16::from(self.read(bus, addr)?);
                self.cycle = 5;
            }
            5 => {
                let addr = self.regs.pop();
                self.addr |= u16::from(self.read(bus, addr)?) << 8;
                self.regs.pc = self.addr;
                self.finish();
            }
            _ => unreachable!(),
        }
        Some(())
    }

    fn op_rts<B: Bus>(&mut self, bus: &mut B) -> Option<()> {
        match self.cycle {
            1 => {
                self.read(bus, self.regs.pc)?;
                self.cycle = 2;
            }
            2 => {
                self.read(bus, self.regs.stack_addr())?;
                self.cycle = 3;
            }
            3 => {
                let addr = self.regs.pop();
                self.addr = u16::from(self.read(bus, addr)?);
                self.cycle = 4;
            }
            4 => {
                let addr = self.regs.pop();
                self.addr |= u16::from(self.read(bus, addr)?) << 8;
                self.cycle = 5;
            }
            5 => {
                self.read(bus, self.addr)?;
                self.regs.pc = self.addr.wrapping_add(1);
                self.finish();
            }
            _ => unreachable!(),
        }
        Some(())
    }

    fn op_jsr<B: Bus>(&mut self, bus: &mut B) -> Option<()> {
        match self.cycle {
            1 => {
                self.addr = u16::from(self.read(bus, self.regs.pc)?);
                self.regs.pc = self.regs.pc.wrapping_add(1);
                self.cycle = 2;
            }
            2 => {
                self.read(bus, self.regs.stack_addr())?;
                self.cycle = 3;
            }
            3 => {
                let addr = self.regs.push();
                bus.write(addr, (self.regs.pc >> 8) as u8);
                self.cycle = 4;
            }
            4 => {
                let addr = self.regs.push();
                bus.write(addr, self.regs.pc as u8);
                self.cycle = 5;
            }
            5 => {
                self.addr |= u16::from(self.read(bus, self.regs.pc)?) << 8;
                self.regs.pc = self.addr;
                self.finish();
            }
            _ => unreachable!(),
        }
        Some(())
    }

    fn op_jmp_abs<B: Bus>(&mut self, bus: &mut B) -> Option<()> {
        match self.cycle {
            1 => {
                self.addr = u16::from(self.read(bus, self.regs.pc)?);
                self.regs.pc = self.regs.pc.wrapping_add(1);
                self.cycle = 2;
            }
            2 => {
                self.addr |= u16::from(self.read(bus, self.regs.pc)?) << 8;
                self.regs.pc = self.addr;
                self.finish();
            }
            _ => unreachable!(),
        }
        Some(())
    }

    fn op_jmp_ind<B: Bus>(&mut self, bus: &mut B) -> Option<()> {
        match self.cycle {
            1 => {
                self.addr = u16::from(self.read(bus, self.regs.pc)?);
                self.regs.pc = self.regs.pc.wrapping_add(1);
                self.cycle = 2;
            }
            2 => {
                self.addr |= u16::from(self.read(bus, self.regs.pc)?) << 8;
                self.cycle = 3;
            }
            3 => {
                self.data = self.read(bus, self.addr)?;
                self.cycle = 4;
            }
            4 => {
                // NMOS quirk: the pointer high byte wraps within the page
                let hi_addr = (self.addr & 0xFF00) | (self.addr.wrapping_add(1) & 0x00FF);
                let hi = self.read(bus, hi_addr)?;
                self.regs.pc = u16::from(self.data) | (u16::from(hi) << 8);
                self.finish();
            }
            _ => unreachable!(),
        }
        Some(())
    }

    fn op_branch<B: Bus>(&mut self, bus: &mut B, taken: bool) -> Option<()> {
        match self.cycle {
            1 => {
                self.data = self.read(bus, self.regs.pc)?;
                self.regs.pc = self.regs.pc.wrapping_add(1);
                if taken {
                    self.cycle = 2;
                } else {
                    self.finish();
                }
            }
            2 => {
                self.read(bus, self.regs.pc)?;
                let offset = i16::from(self.data as i8);
                let new_pc = (self.regs.pc as i16).wrapping_add(offset) as u16;
                if (new_pc ^ self.regs.pc) & 0xFF00 != 0 {
                    // Page crossed: one more cycle to fix PCH
                    self.addr = new_pc;
                    self.cycle = 3;
                } else {
                    self.regs.pc = new_pc;
                    self.finish();
                }
            }
            3 => {
                self.read(bus, (self.regs.pc & 0xFF00) | (self.addr & 0x00FF))?;
                self.regs.pc = self.addr;
                self.finish();
            }
            _ => unreachable!(),
        }
        Some(())
    }

    /// Generic two-cycle implied instruction.
    fn op_implied<B: Bus>(&mut self, bus: &mut B, f: fn(&mut Self)) -> Option<()> {
        self.read(bus, self.regs.pc)?;
        f(self);
        self.finish();
        Some(())
    }

    fn op_flag<B: Bus>(&mut self, bus: &mut B, flag: u8, value: bool) -> Option<()> {
        self.read(bus, self.regs.pc)?;
        self.regs.p.set_if(flag, value);
        self.finish();
        Some(())
    }

    fn op_php<B: Bus>(&mut self, bus: &mut B) -> Option<()> {
        match self.cycle {
            1 => {
                self.read(bus, self.regs.pc)?;
                self.cycle = 2;
            }
            2 => {
                let addr = self.regs.push();
                bus.write(addr, self.regs.p.to_byte_brk());
                self.finish();
            }
            _ => unreachable!(),
        }
        Some(())
    }

    fn op_plp<B: Bus>(&mut self, bus: &mut B) -> Option<()> {
        match self.cycle {
            1 => {
                self.read(bus, self.regs.pc)?;
                self.cycle = 2;
            }
            2 => {
                self.read(bus, self.regs.stack_addr())?;
                self.cycle = 3;
            }
            3 => {
                let addr = self.regs.pop();
                let status = self.read(bus, addr)?;
                self.regs.p = Status::from_byte(status & !B);
                self.finish();
            }
            _ => unreachable!(),
        }
        Some(())
    }

    fn op_pha<B: Bus>(&mut self, bus: &mut B) -> Option<()> {
        match self.cycle {
            1 => {
                self.read(bus, self.regs.pc)?;
                self.cycle = 2;
            }
            2 => {
                let addr = self.regs.push();
                bus.write(addr, self.regs.a);
                self.finish();
            }
            _ => unreachable!(),
        }
        Some(())
    }

    fn op_pla<B: Bus>(&mut self, bus: &mut B) -> Option<()> {
        match self.cycle {
            1 => {
                self.read(bus, self.regs.pc)?;
                self.cycle = 2;
            }
            2 => {
                self.read(bus, self.regs.stack_addr())?;
                self.cycle = 3;
            }
            3 => {
                let addr = self.regs.pop();
                self.regs.a = self.read(bus, addr)?;
                self.regs.p.update_nz(self.regs.a);
                self.finish();
            }
            _ => unreachable!(),
        }
        Some(())
    }
}

/// Byte length of an instruction, for placing soft breakpoints at PC +
/// length (step-over).
#[must_use]
pub fn instruction_length(opcode: u8) -> u16 {
    match opcode & 0x0F {
        0x00 => match opcode {
            0x00 | 0x40 | 0x60 => 1,
            0x20 => 3,
            _ => 2,
        },
        0x02 => match opcode {
            0x82 | 0xA2 | 0xC2 | 0xE2 => 2,
            _ => 1,
        },
        0x01 | 0x03..=0x07 => 2,
        0x08 | 0x0A => 1,
        0x09 | 0x0B => {
            if opcode & 0x10 != 0 {
                3
            } else {
                2
            }
        }
        _ => 3,
    }
}

impl HardwareComponent for Cpu6510 {
    fn reset(&mut self) {
        // Registers keep A/X/Y; SP and P take their reset values, PC is
        // installed by the caller from the reset vector.
        self.regs.sp = 0xFD;
        self.regs.p = Status::from_byte(I);
        self.state = State::FetchOpcode;
        self.opcode = 0;
        self.cycle = 0;
        self.addr = 0;
        self.data = 0;
        self.pointer = 0;
        self.servicing = None;
        self.rdy = true;
        self.irq_line = false;
        self.irq_pipeline = 0;
        self.nmi_line = false;
        self.nmi_pending = false;
    }

    fn save_reset(&self, w: &mut SnapshotWriter) {
        w.write_u8(self.regs.a);
        w.write_u8(self.regs.x);
        w.write_u8(self.regs.y);
        w.write_u8(self.regs.sp);
        w.write_u16(self.regs.pc);
        w.write_u8(self.regs.p.0);
        w.write_u8(match self.state {
            State::FetchOpcode => 0,
            State::Execute => 1,
            State::Jammed => 2,
        });
        w.write_u8(self.opcode);
        w.write_u8(self.cycle);
        w.write_u16(self.addr);
        w.write_u8(self.data);
        w.write_u8(self.pointer);
        w.write_u8(match self.servicing {
            None => 0,
            Some(Interrupt::Brk) => 1,
            Some(Interrupt::Irq) => 2,
            Some(Interrupt::Nmi) => 3,
        });
        w.write_bool(self.rdy);
        w.write_bool(self.irq_line);
        w.write_u8(self.irq_pipeline);
        w.write_bool(self.nmi_line);
        w.write_bool(self.nmi_pending);
    }

    fn load_reset(&mut self, r: &mut SnapshotReader) -> Result<(), ReadError> {
        self.regs.a = r.read_u8()?;
        self.regs.x = r.read_u8()?;
        self.regs.y = r.read_u8()?;
        self.regs.sp = r.read_u8()?;
        self.regs.pc = r.read_u16()?;
        self.regs.p = Status::from_byte(r.read_u8()?);
        self.state = match r.read_u8()? {
            1 => State::Execute,
            2 => State::Jammed,
            _ => State::FetchOpcode,
        };
        self.opcode = r.read_u8()?;
        self.cycle = r.read_u8()?;
        self.addr = r.read_u16()?;
        self.data = r.read_u8()?;
        self.pointer = r.read_u8()?;
        self.servicing = match r.read_u8()? {
            1 => Some(Interrupt::Brk),
            2 => Some(Interrupt::Irq),
            3 => Some(Interrupt::Nmi),
            _ => None,
        };
        self.rdy = r.read_bool()?;
        self.irq_line = r.read_bool()?;
        self.irq_pipeline = r.read_u8()?;
        self.nmi_line = r.read_bool()?;
        self.nmi_pending = r.read_bool()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 64K flat RAM bus for instruction tests.
    struct TestBus {
        ram: Vec<u8>,
    }

    impl TestBus {
        fn new() -> Self {
            Self {
                ram: vec![0; 0x10000],
            }
        }

        fn load(&mut self, addr: u16, bytes: &[u8]) {
            let addr = addr as usize;
            self.ram[addr..addr + bytes.len()].copy_from_slice(bytes);
        }
    }

    impl Bus for TestBus {
        fn read(&mut self, addr: u16) -> u8 {
            self.ram[addr as usize]
        }

        fn write(&mut self, addr: u16, value: u8) {
            self.ram[addr as usize] = value;
        }
    }

    fn make_cpu(program: &[u8]) -> (Cpu6510, TestBus) {
        let mut bus = TestBus::new();
        bus.load(0x0200, program);
        let mut cpu = Cpu6510::new();
        cpu.regs.pc = 0x0200;
        (cpu, bus)
    }

    /// Run until the current instruction retires (next fetch boundary).
    fn step_instruction(cpu: &mut Cpu6510, bus: &mut TestBus) -> u32 {
        let mut cycles = 0;
        loop {
            cpu.tick(bus);
            cycles += 1;
            if cpu.at_fetch() {
                return cycles;
            }
            assert!(cycles < 20, "instruction did not retire");
        }
    }

    #[test]
    fn lda_imm_sets_flags() {
        let (mut cpu, mut bus) = make_cpu(&[0xA9, 0x00]);
        let cycles = step_instruction(&mut cpu, &mut bus);
        assert_eq!(cycles, 2);
        assert_eq!(cpu.regs.a, 0);
        assert!(cpu.regs.p.is_set(Z));
    }

    #[test]
    fn sta_abs_takes_four_cycles() {
        let (mut cpu, mut bus) = make_cpu(&[0xA9, 0x42, 0x8D, 0x00, 0x30]);
        step_instruction(&mut cpu, &mut bus);
        let cycles = step_instruction(&mut cpu, &mut bus);
        assert_eq!(cycles, 4);
        assert_eq!(bus.ram[0x3000], 0x42);
    }

    #[test]
    fn lda_abx_page_cross_adds_cycle() {
        let (mut cpu, mut bus) = make_cpu(&[0xBD, 0xFF, 0x30]);
        bus.ram[0x3100] = 0x5A;
        cpu.regs.x = 1;
        let cycles = step_instruction(&mut cpu, &mut bus);
        assert_eq!(cycles, 5);
        assert_eq!(cpu.regs.a, 0x5A);
    }

    #[test]
    fn adc_binary_overflow() {
        let (mut cpu, mut bus) = make_cpu(&[0x69, 0x50]);
        cpu.regs.a = 0x50;
        step_instruction(&mut cpu, &mut bus);
        assert_eq!(cpu.regs.a, 0xA0);
        assert!(cpu.regs.p.is_set(V));
        assert!(cpu.regs.p.is_set(N));
        assert!(!cpu.regs.p.is_set(C));
    }

    #[test]
    fn adc_decimal() {
        // 0x19 + 0x28 = 0x47 in BCD
        let (mut cpu, mut bus) = make_cpu(&[0xF8, 0x69, 0x28]);
        cpu.regs.a = 0x19;
        step_instruction(&mut cpu, &mut bus); // SED
        step_instruction(&mut cpu, &mut bus); // ADC
        assert_eq!(cpu.regs.a, 0x47);
    }

    #[test]
    fn sbc_decimal() {
        // 0x47 - 0x28 = 0x19 in BCD (carry set = no borrow)
        let (mut cpu, mut bus) = make_cpu(&[0xF8, 0x38, 0xE9, 0x28]);
        cpu.regs.a = 0x47;
        step_instruction(&mut cpu, &mut bus); // SED
        step_instruction(&mut cpu, &mut bus); // SEC
        step_instruction(&mut cpu, &mut bus); // SBC
        assert_eq!(cpu.regs.a, 0x19);
    }

    #[test]
    fn branch_timing() {
        // BNE taken, no page cross: 3 cycles
        let (mut cpu, mut bus) = make_cpu(&[0xD0, 0x02]);
        assert_eq!(step_instruction(&mut cpu, &mut bus), 3);
        assert_eq!(cpu.regs.pc, 0x0204);

        // BNE not taken: 2 cycles
        let (mut cpu, mut bus) = make_cpu(&[0xD0, 0x02]);
        cpu.regs.p.set(Z);
        assert_eq!(step_instruction(&mut cpu, &mut bus), 2);

        // Branch crossing a page: 4 cycles
        let (mut cpu, mut bus) = make_cpu(&[0xD0, 0x7F]);
        assert_eq!(step_instruction(&mut cpu, &mut bus), 4);
        assert_eq!(cpu.regs.pc, 0x0281);
    }

    #[test]
    fn jsr_rts_round_trip() {
        let (mut cpu, mut bus) = make_cpu(&[0x20, 0x00, 0x30]);
        bus.ram[0x3000] = 0x60; // RTS
        assert_eq!(step_instruction(&mut cpu, &mut bus), 6);
        assert_eq!(cpu.regs.pc, 0x3000);
        assert_eq!(step_instruction(&mut cpu, &mut bus), 6);
        assert_eq!(cpu.regs.pc, 0x0203);
    }

    #[test]
    fn jmp_indirect_page_wrap_bug() {
        let (mut cpu, mut bus) = make_cpu(&[0x6C, 0xFF, 0x30]);
        bus.ram[0x30FF] = 0x34;
        bus.ram[0x3000] = 0x12; // High byte fetched from $3000, not $3100
        bus.ram[0x3100] = 0x99;
        step_instruction(&mut cpu, &mut bus);
        assert_eq!(cpu.regs.pc, 0x1234);
    }

    #[test]
    fn brk_pushes_b_flag() {
        let (mut cpu, mut bus) = make_cpu(&[0x00]);
        bus.ram[0xFFFE] = 0x00;
        bus.ram[0xFFFF] = 0x40;
        let cycles = step_instruction(&mut cpu, &mut bus);
        assert_eq!(cycles, 7);
        assert_eq!(cpu.regs.pc, 0x4000);
        // Pushed status must have B set
        let pushed = bus.ram[0x01FB];
        assert_eq!(pushed & B, B);
        assert!(cpu.regs.p.is_set(I));
    }

    #[test]
    fn irq_pushes_b_clear() {
        let (mut cpu, mut bus) = make_cpu(&[0xEA, 0xEA, 0xEA]);
        bus.ram[0xFFFE] = 0x00;
        bus.ram[0xFFFF] = 0x40;
        cpu.regs.p.clear(I);
        cpu.set_irq_line(true);
        // Run through a NOP plus the interrupt sequence
        for _ in 0..20 {
            cpu.tick(&mut bus);
        }
        assert_eq!(cpu.regs.pc & 0xFF00, 0x4000);
        let pushed = bus.ram[0x01FB];
        assert_eq!(pushed & B, 0);
    }

    #[test]
    fn irq_masked_by_i_flag() {
        let (mut cpu, mut bus) = make_cpu(&[0xEA; 16]);
        cpu.regs.p.set(I);
        cpu.set_irq_line(true);
        for _ in 0..16 {
            cpu.tick(&mut bus);
        }
        // Never vectored away
        assert!(cpu.regs.pc >= 0x0200 && cpu.regs.pc < 0x0210);
    }

    #[test]
    fn nmi_is_edge_triggered() {
        let (mut cpu, mut bus) = make_cpu(&[0xEA; 16]);
        bus.ram[0xFFFA] = 0x00;
        bus.ram[0xFFFB] = 0x50;
        bus.load(0x5000, &[0xEA; 32]); // NOP sled at the handler
        cpu.regs.p.set(I); // NMI ignores I
        cpu.set_nmi_line(true);
        for _ in 0..12 {
            cpu.tick(&mut bus);
        }
        assert_eq!(cpu.regs.pc & 0xFF00, 0x5000);

        // Holding the line does not retrigger
        for _ in 0..8 {
            cpu.tick(&mut bus);
        }
        assert!(cpu.regs.pc > 0x5000 && cpu.regs.pc < 0x5020);
    }

    #[test]
    fn kil_jams() {
        let (mut cpu, mut bus) = make_cpu(&[0x02]);
        cpu.tick(&mut bus);
        cpu.tick(&mut bus);
        assert!(cpu.is_jammed());
        let pc = cpu.regs.pc;
        cpu.tick(&mut bus);
        assert_eq!(cpu.regs.pc, pc);
    }

    #[test]
    fn rdy_low_stalls_reads() {
        let (mut cpu, mut bus) = make_cpu(&[0xA9, 0x42]);
        cpu.set_rdy(false);
        for _ in 0..8 {
            cpu.tick(&mut bus);
        }
        // Nothing happened while RDY was low
        assert_eq!(cpu.regs.pc, 0x0200);
        cpu.set_rdy(true);
        cpu.tick(&mut bus);
        cpu.tick(&mut bus);
        assert_eq!(cpu.regs.a, 0x42);
    }

    #[test]
    fn rdy_low_does_not_stall_writes() {
        // STA $3000: cycles 1-3 are reads, cycle 4 is the write
        let (mut cpu, mut bus) = make_cpu(&[0x8D, 0x00, 0x30]);
        cpu.regs.a = 0x77;
        cpu.tick(&mut bus); // Fetch
        cpu.tick(&mut bus); // Addr lo
        cpu.tick(&mut bus); // Addr hi
        cpu.set_rdy(false);
        cpu.tick(&mut bus); // Write proceeds despite RDY low
        assert_eq!(bus.ram[0x3000], 0x77);
        assert!(cpu.at_fetch());
    }

    #[test]
    fn illegal_lax_loads_a_and_x() {
        let (mut cpu, mut bus) = make_cpu(&[0xA7, 0x10]);
        bus.ram[0x0010] = 0x3C;
        step_instruction(&mut cpu, &mut bus);
        assert_eq!(cpu.regs.a, 0x3C);
        assert_eq!(cpu.regs.x, 0x3C);
    }

    #[test]
    fn illegal_slo_shifts_and_ors() {
        let (mut cpu, mut bus) = make_cpu(&[0x07, 0x10]);
        bus.ram[0x0010] = 0x81;
        cpu.regs.a = 0x01;
        let cycles = step_instruction(&mut cpu, &mut bus);
        assert_eq!(cycles, 5);
        assert_eq!(bus.ram[0x0010], 0x02);
        assert_eq!(cpu.regs.a, 0x03);
        assert!(cpu.regs.p.is_set(C));
    }

    #[test]
    fn illegal_dcp_decrements_and_compares() {
        let (mut cpu, mut bus) = make_cpu(&[0xC7, 0x10]);
        bus.ram[0x0010] = 0x43;
        cpu.regs.a = 0x42;
        step_instruction(&mut cpu, &mut bus);
        assert_eq!(bus.ram[0x0010], 0x42);
        assert!(cpu.regs.p.is_set(Z));
        assert!(cpu.regs.p.is_set(C));
    }

    #[test]
    fn illegal_axs_subtracts_from_a_and_x() {
        let (mut cpu, mut bus) = make_cpu(&[0xCB, 0x02]);
        cpu.regs.a = 0x0F;
        cpu.regs.x = 0x07;
        step_instruction(&mut cpu, &mut bus);
        assert_eq!(cpu.regs.x, 0x05); // (0x0F & 0x07) - 2
        assert!(cpu.regs.p.is_set(C));
    }

    #[test]
    fn sax_stores_a_and_x() {
        let (mut cpu, mut bus) = make_cpu(&[0x87, 0x20]);
        cpu.regs.a = 0xF0;
        cpu.regs.x = 0x3C;
        step_instruction(&mut cpu, &mut bus);
        assert_eq!(bus.ram[0x0020], 0x30);
    }

    #[test]
    fn rmw_performs_dummy_write() {
        // INC $3000: the old value must be written back before the new one
        struct Recorder {
            ram: Vec<u8>,
            writes: Vec<(u16, u8)>,
        }
        impl Bus for Recorder {
            fn read(&mut self, addr: u16) -> u8 {
                self.ram[addr as usize]
            }
            fn write(&mut self, addr: u16, value: u8) {
                self.writes.push((addr, value));
                self.ram[addr as usize] = value;
            }
        }
        let mut bus = Recorder {
            ram: vec![0; 0x10000],
            writes: Vec::new(),
        };
        bus.ram[0x0200] = 0xEE;
        bus.ram[0x0201] = 0x00;
        bus.ram[0x0202] = 0x30;
        bus.ram[0x3000] = 0x41;
        let mut cpu = Cpu6510::new();
        cpu.regs.pc = 0x0200;
        for _ in 0..6 {
            cpu.tick(&mut bus);
        }
        assert_eq!(bus.writes, vec![(0x3000, 0x41), (0x3000, 0x42)]);
    }

    #[test]
    fn instruction_lengths() {
        assert_eq!(instruction_length(0xEA), 1); // NOP
        assert_eq!(instruction_length(0xA9), 2); // LDA #
        assert_eq!(instruction_length(0xAD), 3); // LDA abs
        assert_eq!(instruction_length(0x20), 3); // JSR
        assert_eq!(instruction_length(0xD0), 2); // BNE
        assert_eq!(instruction_length(0x6C), 3); // JMP (ind)
        assert_eq!(instruction_length(0xA2), 2); // LDX #
        assert_eq!(instruction_length(0x02), 1); // KIL
    }

    #[test]
    fn serialization_round_trip_mid_instruction() {
        let (mut cpu, mut bus) = make_cpu(&[0xAD, 0x00, 0x30]);
        bus.ram[0x3000] = 0x11;
        cpu.tick(&mut bus);
        cpu.tick(&mut bus); // Mid-instruction

        let mut w = SnapshotWriter::new();
        cpu.save(&mut w);
        let bytes = w.into_bytes();

        let mut restored = Cpu6510::new();
        let mut r = SnapshotReader::new(&bytes);
        restored.load(&mut r).unwrap();

        // Both finish the instruction identically
        cpu.tick(&mut bus);
        cpu.tick(&mut bus);
        let mut bus2 = TestBus::new();
        bus2.ram.copy_from_slice(&bus.ram);
        restored.tick(&mut bus2);
        restored.tick(&mut bus2);
        assert_eq!(cpu.regs.a, restored.regs.a);
        assert_eq!(cpu.regs.pc, restored.regs.pc);
    }
}
