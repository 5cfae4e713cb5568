//! Simulating and execution for MIPS assembly.
//!
//! This module is focused on executing the words assembled into a [`Machine`].
//!
//! This module consists of:
//! - [`Machine`]: The struct that holds the processor state and simulates assembled code.
//! - [`mem`]: The module handling memory and the register file.
//! - [`io`]: The module handling the console used by the `syscall` instruction.
//! - [`debug`]: The module handling types of breakpoints for the machine.
//!
//! # Usage
//!
//! To simulate some code, you need to instantiate a Machine and assemble code into it:
//!
//! ```
//! use mips_ensemble::sim::Machine;
//! use mips_ensemble::ast::reg_consts::T0;
//!
//! let mut machine = Machine::new(Default::default());
//! machine.assemble_line("addi $t0, $zero, 1").unwrap();
//! machine.assemble_line("addi $t0, $t0, 1").unwrap();
//! machine.assemble_line("addi $t0, $t0, 1").unwrap();
//!
//! // Running step by step:
//! machine.step().unwrap();
//! assert_eq!(machine.reg_file[T0], 1);
//! machine.step().unwrap();
//! assert_eq!(machine.reg_file[T0], 2);
//! machine.step().unwrap();
//! assert_eq!(machine.reg_file[T0], 3);
//! ```
//!
//! ## Flags
//!
//! Here, we define `machine` to have the default flags.
//! We could also configure the machine by editing the flags. For example,
//! if we wish for signed arithmetic to wrap instead of trapping on overflow:
//!
//! ```
//! # use mips_ensemble::sim::{Machine, MachineFlags};
//! let mut machine = Machine::new(MachineFlags { trap_on_overflow: false, ..Default::default() });
//! ```
//!
//! All of the available flags can be found in [`MachineFlags`].
//!
//! ## Execution
//!
//! Beyond the basic [`Machine::step`] (which executes one instruction),
//! there are also:
//! - [`Machine::run`]: runs until the program exits, runs out of assembled code, or hits a breakpoint
//! - [`Machine::run_while`], [`Machine::run_with_limit`]: more advanced programmatic execution
//!
//! ```
//! use mips_ensemble::sim::Machine;
//! use mips_ensemble::ast::reg_consts::{T0, T1};
//!
//! let mut machine = Machine::new(Default::default());
//! for line in [
//!     "        li $t0, 10",
//!     "        li $t1, 0",
//!     "loop:   add $t1, $t1, $t0",
//!     "        addi $t0, $t0, -1",
//!     "        bgtz $t0, loop",
//! ] {
//!     machine.assemble_line(line).unwrap();
//! }
//!
//! machine.run().unwrap();
//! assert_eq!(machine.reg_file[T0], 0);
//! assert_eq!(machine.reg_file[T1], 55);
//! ```
//!
//! ## Debugging with breakpoints
//!
//! Breakpoints are accessible through the `breakpoints` field on [`Machine`].
//!
//! To add a breakpoint, simply insert a [`Breakpoint`] and
//! it will break if its condition is met during all execution functions (except [`Machine::step`]).
//!
//! ```
//! use mips_ensemble::sim::Machine;
//! use mips_ensemble::sim::debug::Breakpoint;
//! use mips_ensemble::sim::mem::TEXT_BASE;
//!
//! let mut machine = Machine::new(Default::default());
//! for _ in 0..4 {
//!     machine.assemble_line("addi $t0, $t0, 1").unwrap();
//! }
//!
//! machine.breakpoints.insert(Breakpoint::PC(TEXT_BASE + 8));
//! machine.run().unwrap();
//! assert_eq!(machine.pc, TEXT_BASE + 8);
//! ```
//!
//! ## IO
//!
//! The `syscall` instruction reads and writes to the machine's console ([`io::SimIO`]).
//! The best IO for programmatic uses is [`io::BufferedIO`],
//! which exposes the IO to memory buffers that can be modified.
//!
//! ```
//! use mips_ensemble::sim::Machine;
//! use mips_ensemble::sim::io::BufferedIO;
//!
//! let mut machine = Machine::new(Default::default());
//! let io = BufferedIO::new();
//! machine.set_io(io.clone());
//! io.get_input().write().unwrap().extend(b"41\n");
//!
//! for line in [
//!     "li $v0, 5",   // read_int
//!     "syscall",
//!     "addi $a0, $v0, 1",
//!     "li $v0, 1",   // print_int
//!     "syscall",
//!     "li $v0, 10",  // exit
//!     "syscall",
//! ] {
//!     machine.assemble_line(line).unwrap();
//! }
//! machine.run().unwrap();
//!
//! assert!(machine.halted());
//! assert_eq!(&**io.get_output().read().unwrap(), b"42");
//! ```
//!
//! [`Breakpoint`]: self::debug::Breakpoint
pub mod mem;
pub mod io;
pub mod debug;

use std::collections::HashSet;

use tracing::{debug, trace};

use crate::asm::{Mode, SymbolTable};
use crate::ast::reg_consts::{A0, A1, RA, V0};
use crate::ast::sim::{Branch2Op, HiLoOp, ImmOp, JumpOp, MemOp, MulDivOp, R3Op, ShiftOp, SimInstr};
use debug::Breakpoint;
use io::{IODevice, SimIO};

use self::mem::{Mem, RegFile, Segment, Width, DATA_BASE, TEXT_BASE};

/// Errors that can occur during simulation.
#[derive(Debug, PartialEq, Eq, Hash, Clone)]
pub enum SimErr {
    /// Word was decoded, but it does not correspond to any known instruction.
    UnknownInstruction(u32),
    /// A signed add or subtract did not fit in 32 bits.
    IntegerOverflow,
    /// A division had a divisor of 0.
    DivideByZero,
    /// `syscall` was executed with an unknown service code.
    UnimplementedSyscall(u32),
    /// A memory access was not aligned to its width.
    MisalignedAccess(u32),
    /// A memory access was outside of the text, data, and stack segments.
    AccessViolation(u32),
    /// Execution reached an instruction that is still waiting on the given label.
    UnresolvedFixup(String),
    /// The console input closed while a `syscall` was reading from it.
    InputClosed,
    /// The console input could not be read as an integer.
    InvalidInput,
}
impl std::fmt::Display for SimErr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SimErr::UnknownInstruction(w)   => write!(f, "simulator executed unknown instruction {w:#010x}"),
            SimErr::IntegerOverflow         => f.write_str("integer overflow"),
            SimErr::DivideByZero            => f.write_str("division by zero"),
            SimErr::UnimplementedSyscall(c) => write!(f, "syscall {c} is not implemented"),
            SimErr::MisalignedAccess(a)     => write!(f, "misaligned memory access at {a:#010x}"),
            SimErr::AccessViolation(a)      => write!(f, "access violation at {a:#010x}"),
            SimErr::UnresolvedFixup(l)      => write!(f, "instruction refers to undefined label '{l}'"),
            SimErr::InputClosed             => f.write_str("console input was closed"),
            SimErr::InvalidInput            => f.write_str("console input is not an integer"),
        }
    }
}
impl std::error::Error for SimErr {}
impl crate::err::Error for SimErr {
    fn help(&self) -> Option<std::borrow::Cow<str>> {
        match self {
            SimErr::UnknownInstruction(_)   => Some("this word was probably written as data, check the PC".into()),
            SimErr::IntegerOverflow         => Some("use the unsigned form (addu, subu, addiu) for wrapping arithmetic".into()),
            SimErr::DivideByZero            => None,
            SimErr::UnimplementedSyscall(_) => Some("the service code is read from $v0; supported codes are 1, 4, 5, 8, 10, 11, 12".into()),
            SimErr::MisalignedAccess(_)     => Some("halfwords must be at even addresses and words at multiples of 4".into()),
            SimErr::AccessViolation(_)      => Some(format!(
                "valid addresses are in the text ({}), data ({}), and stack ({}) segments",
                fmt_range(Segment::Text), fmt_range(Segment::Data), fmt_range(Segment::Stack)
            ).into()),
            SimErr::UnresolvedFixup(l)      => Some(format!("define the label '{l}' before running").into()),
            SimErr::InputClosed             => None,
            SimErr::InvalidInput            => Some("read_int expects a line holding a decimal integer".into()),
        }
    }
}
fn fmt_range(seg: Segment) -> String {
    let r = seg.range();
    format!("{:#010x}-{:#010x}", r.start, r.end)
}

/// Environment call service codes (held in `$v0`).
mod service {
    pub const PRINT_INT: u32 = 1;
    pub const PRINT_STRING: u32 = 4;
    pub const READ_INT: u32 = 5;
    pub const READ_STRING: u32 = 8;
    pub const EXIT: u32 = 10;
    pub const PRINT_CHAR: u32 = 11;
    pub const READ_CHAR: u32 = 12;
}

/// Configuration flags for [`Machine`].
///
/// These can be modified after the `Machine` is created with [`Machine::new`]
/// and their effects should still apply.
/// They are preserved across [`Machine::reset`].
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub struct MachineFlags {
    /// Whether [`Machine::reset`] also removes every label.
    ///
    /// If `false`, labels survive a reset, so any code assembled afterwards
    /// can still refer to them (and defining them again fails).
    ///
    /// By default, this flag is `true`.
    pub clear_symbols_on_reset: bool,

    /// Whether `add`, `sub`, and `addi` fail with [`SimErr::IntegerOverflow`]
    /// when their signed result does not fit in 32 bits.
    ///
    /// If `false`, they wrap like their unsigned forms.
    ///
    /// By default, this flag is `true`.
    pub trap_on_overflow: bool,
}
#[allow(clippy::derivable_impls)]
impl Default for MachineFlags {
    fn default() -> Self {
        Self {
            clear_symbols_on_reset: true,
            trap_on_overflow: true
        }
    }
}

/// Assembles and executes code.
#[derive(Debug)]
pub struct Machine {
    // ------------------ MACHINE STATE ------------------
    // Calling [`Machine::reset`] resets these values.

    /// The machine's memory.
    pub mem: Mem,

    /// The machine's register file.
    pub reg_file: RegFile,

    /// The program counter.
    pub pc: u32,

    /// The address the next instruction is assembled to.
    pub(crate) text_cursor: u32,

    /// The address the next data directive is assembled to.
    pub(crate) data_cursor: u32,

    /// The segment assembled lines are currently written to.
    pub(crate) mode: Mode,

    /// Labels and pending fixups.
    ///
    /// Labels are only reset if [`MachineFlags::clear_symbols_on_reset`] is set.
    pub(crate) sym: SymbolTable,

    /// Whether the program executed the exit `syscall`.
    halted: bool,

    /// The number of instructions successfully run since this `Machine` was initialized.
    ///
    /// This can be set to 0 to reset the counter.
    pub instructions_run: u64,

    // ------------------ CONFIG/DEBUG STATE ------------------
    // Calling [`Machine::reset`] does not reset these values.

    /// Configuration settings for the machine.
    ///
    /// See [`MachineFlags`] for more details on what configuration
    /// settings are available.
    pub flags: MachineFlags,

    /// Breakpoints for the machine.
    pub breakpoints: HashSet<Breakpoint>,

    /// The console used by `syscall`.
    io: SimIO
}
impl Machine where Machine: Send + Sync {}

impl Machine {
    /// Creates a new machine with nothing assembled.
    pub fn new(flags: MachineFlags) -> Self {
        Self {
            mem: Mem::new(),
            reg_file: RegFile::new(),
            pc: TEXT_BASE,
            text_cursor: TEXT_BASE,
            data_cursor: DATA_BASE,
            mode: Mode::Text,
            sym: SymbolTable::new(),
            halted: false,
            instructions_run: 0,

            flags,
            breakpoints: Default::default(),
            io: Default::default()
        }
    }

    /// Resets the machine.
    ///
    /// This returns the register file, memory, program counter, cursors, and mode
    /// to their initial state, while preserving configuration and debug state.
    ///
    /// Note that this function preserves:
    /// - Flags
    /// - Breakpoints
    /// - IO (however, note that it does not reset IO state, which must be manually reset)
    ///
    /// Pending fixups are always removed.
    /// Labels are removed only if [`MachineFlags::clear_symbols_on_reset`] is set.
    pub fn reset(&mut self) {
        self.mem.clear();
        self.reg_file = RegFile::new();
        self.pc = TEXT_BASE;
        self.text_cursor = TEXT_BASE;
        self.data_cursor = DATA_BASE;
        self.mode = Mode::Text;
        self.halted = false;
        self.instructions_run = 0;
        // placeholders are gone with memory, so their fixups are too
        match self.flags.clear_symbols_on_reset {
            true  => self.sym.clear(),
            false => self.sym.clear_fixups(),
        }
        debug!(clear_symbols = self.flags.clear_symbols_on_reset, "machine reset");
    }

    /// Sets the console used by `syscall`, closing the previous one.
    pub fn set_io(&mut self, io: impl Into<SimIO>) {
        std::mem::replace(&mut self.io, io.into()).close();
    }

    /// The labels and pending fixups of this machine.
    pub fn symbols(&self) -> &SymbolTable {
        &self.sym
    }

    /// The address the next instruction is assembled to.
    pub fn text_cursor(&self) -> u32 {
        self.text_cursor
    }

    /// The address the next data directive is assembled to.
    pub fn data_cursor(&self) -> u32 {
        self.data_cursor
    }

    /// The segment assembled lines are currently written to.
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Whether the program has executed the exit `syscall`.
    ///
    /// This is cleared at the start of every [`Machine::run_while`] call.
    pub fn halted(&self) -> bool {
        self.halted
    }

    /// Runs until the tripwire condition returns false (or any of the typical breaks occur).
    ///
    /// The typical break conditions are:
    /// - the exit `syscall` is executed
    /// - the PC reaches the text cursor (there is no more assembled code to run)
    /// - A breakpoint matches
    ///
    /// This refuses to run at all if any fixup is unresolved.
    pub fn run_while(&mut self, mut tripwire: impl FnMut(&mut Machine) -> bool) -> Result<(), SimErr> {
        if let Some(fixup) = self.sym.fixups().next() {
            return Err(SimErr::UnresolvedFixup(fixup.label.clone()));
        }
        self.halted = false;

        loop {
            if self.pc == self.text_cursor || !tripwire(self) {
                break;
            }

            self.step()?;

            if self.halted || self.breakpoints.iter().any(|bp| bp.check(self)) {
                break;
            }
        }

        Ok(())
    }

    /// Execute the program.
    ///
    /// This blocks until the program ends.
    /// If you would like to limit the maximum number of steps to execute, consider [`Machine::run_with_limit`].
    pub fn run(&mut self) -> Result<(), SimErr> {
        self.run_while(|_| true)
    }

    /// Execute the program with a limit on how many steps to execute.
    ///
    /// This blocks until the program ends or until the number of steps to execute has been hit.
    pub fn run_with_limit(&mut self, max_steps: u64) -> Result<(), SimErr> {
        let i = self.instructions_run;
        self.run_while(|m| m.instructions_run.wrapping_sub(i) < max_steps)
    }

    /// Simulate one step, executing one instruction.
    ///
    /// The PC is advanced by 4 before the instruction executes.
    /// If the instruction fails, no register or memory is modified
    /// and the PC is left pointing at the failing instruction.
    pub fn step(&mut self) -> Result<(), SimErr> {
        let pc = self.pc;
        if self.sym.has_unresolved() {
            if let Some(fixup) = self.sym.fixup_at(pc) {
                return Err(SimErr::UnresolvedFixup(fixup.label.clone()));
            }
        }
        if Segment::of(pc) != Some(Segment::Text) {
            return Err(SimErr::AccessViolation(pc));
        }

        let word = self.mem.read(pc, Width::Word)?;
        let instr = SimInstr::decode(word)?;
        trace!(pc = format_args!("{pc:#010x}"), word = format_args!("{word:#010x}"), %instr, "step");

        self.pc = pc.wrapping_add(4);
        match self.execute(instr) {
            Ok(()) => {
                self.instructions_run += 1;
                Ok(())
            },
            Err(e) => {
                self.pc = pc;
                Err(e)
            }
        }
    }

    fn signed_add(&self, a: u32, b: u32) -> Result<u32, SimErr> {
        match self.flags.trap_on_overflow {
            true => (a as i32).checked_add(b as i32)
                .map(|r| r as u32)
                .ok_or(SimErr::IntegerOverflow),
            false => Ok(a.wrapping_add(b))
        }
    }
    fn signed_sub(&self, a: u32, b: u32) -> Result<u32, SimErr> {
        match self.flags.trap_on_overflow {
            true => (a as i32).checked_sub(b as i32)
                .map(|r| r as u32)
                .ok_or(SimErr::IntegerOverflow),
            false => Ok(a.wrapping_sub(b))
        }
    }

    /// Executes an instruction. The PC has already been advanced.
    ///
    /// Every fallible part happens before any state is written.
    fn execute(&mut self, instr: SimInstr) -> Result<(), SimErr> {
        let regs = &self.reg_file;

        match instr {
            SimInstr::R3(op, rd, rs, rt) => {
                let (a, b) = (regs[rs], regs[rt]);
                let result = match op {
                    R3Op::Add  => self.signed_add(a, b)?,
                    R3Op::Addu => a.wrapping_add(b),
                    R3Op::Sub  => self.signed_sub(a, b)?,
                    R3Op::Subu => a.wrapping_sub(b),
                    R3Op::And  => a & b,
                    R3Op::Or   => a | b,
                    R3Op::Xor  => a ^ b,
                    R3Op::Nor  => !(a | b),
                    R3Op::Seq  => u32::from(a == b),
                    R3Op::Slt  => u32::from((a as i32) < (b as i32)),
                    R3Op::Sltu => u32::from(a < b),
                };
                self.reg_file.set(rd, result);
            },
            SimInstr::Shift(op, rd, rt, shamt) => {
                let result = shift(op, regs[rt], shamt.get());
                self.reg_file.set(rd, result);
            },
            SimInstr::ShiftV(op, rd, rt, rs) => {
                let result = shift(op, regs[rt], regs[rs] & 0x1F);
                self.reg_file.set(rd, result);
            },
            SimInstr::Imm(op, rt, rs, imm) => {
                let (a, b) = (regs[rs], op.extend(imm));
                let result = match op {
                    ImmOp::Addi  => self.signed_add(a, b)?,
                    ImmOp::Addiu => a.wrapping_add(b),
                    ImmOp::Slti  => u32::from((a as i32) < (b as i32)),
                    ImmOp::Sltiu => u32::from(a < b),
                    ImmOp::Andi  => a & b,
                    ImmOp::Ori   => a | b,
                    ImmOp::Xori  => a ^ b,
                };
                self.reg_file.set(rt, result);
            },
            SimInstr::Lui(rt, imm) => self.reg_file.set(rt, imm.get() << 16),
            SimInstr::Mem(op, rt, base, off) => {
                let addr = regs[base].wrapping_add(off.get() as u32);
                match op {
                    MemOp::Lb  => {
                        let value = self.mem.read(addr, Width::Byte)? as u8 as i8 as u32;
                        self.reg_file.set(rt, value);
                    },
                    MemOp::Lbu => {
                        let value = self.mem.read(addr, Width::Byte)?;
                        self.reg_file.set(rt, value);
                    },
                    MemOp::Lh  => {
                        let value = self.mem.read(addr, Width::Half)? as u16 as i16 as u32;
                        self.reg_file.set(rt, value);
                    },
                    MemOp::Lhu => {
                        let value = self.mem.read(addr, Width::Half)?;
                        self.reg_file.set(rt, value);
                    },
                    MemOp::Lw  => {
                        let value = self.mem.read(addr, Width::Word)?;
                        self.reg_file.set(rt, value);
                    },
                    MemOp::Sb => self.mem.write(addr, Width::Byte, regs[rt])?,
                    MemOp::Sh => self.mem.write(addr, Width::Half, regs[rt])?,
                    MemOp::Sw => self.mem.write(addr, Width::Word, regs[rt])?,
                }
            },
            SimInstr::Branch2(op, rs, rt, off) => {
                let taken = match op {
                    Branch2Op::Beq => regs[rs] == regs[rt],
                    Branch2Op::Bne => regs[rs] != regs[rt],
                };
                if taken {
                    self.pc = self.pc.wrapping_add((off.get() << 2) as u32);
                }
            },
            SimInstr::Branch1(op, rs, off) => {
                if op.test(regs[rs]) {
                    self.pc = self.pc.wrapping_add((off.get() << 2) as u32);
                }
            },
            SimInstr::Jump(op, target) => {
                if op == JumpOp::Jal {
                    self.reg_file.set(RA, self.pc);
                }
                self.pc = (self.pc & 0xF000_0000) | (target.get() << 2);
            },
            SimInstr::Jr(rs) => self.pc = regs[rs],
            SimInstr::Jalr(rd, rs) => {
                let target = regs[rs];
                self.reg_file.set(rd, self.pc);
                self.pc = target;
            },
            SimInstr::HiLo(op, reg) => match op {
                HiLoOp::Mfhi => self.reg_file.set(reg, self.reg_file.hi),
                HiLoOp::Mflo => self.reg_file.set(reg, self.reg_file.lo),
                HiLoOp::Mthi => self.reg_file.hi = regs[reg],
                HiLoOp::Mtlo => self.reg_file.lo = regs[reg],
            },
            SimInstr::MulDiv(op, rs, rt) => {
                let (a, b) = (regs[rs], regs[rt]);
                let (hi, lo) = match op {
                    MulDivOp::Mult => {
                        let product = i64::from(a as i32) * i64::from(b as i32);
                        ((product >> 32) as u32, product as u32)
                    },
                    MulDivOp::Multu => {
                        let product = u64::from(a) * u64::from(b);
                        ((product >> 32) as u32, product as u32)
                    },
                    MulDivOp::Div => {
                        let (a, b) = (a as i32, b as i32);
                        if b == 0 { return Err(SimErr::DivideByZero) };
                        (a.wrapping_rem(b) as u32, a.wrapping_div(b) as u32)
                    },
                    MulDivOp::Divu => {
                        if b == 0 { return Err(SimErr::DivideByZero) };
                        (a % b, a / b)
                    },
                };
                self.reg_file.hi = hi;
                self.reg_file.lo = lo;
            },
            SimInstr::Syscall => self.syscall()?,
        }

        Ok(())
    }

    fn syscall(&mut self) -> Result<(), SimErr> {
        let code = self.reg_file[V0];
        let arg = self.reg_file[A0];

        match code {
            service::PRINT_INT => self.write_output(format!("{}", arg as i32).as_bytes()),
            service::PRINT_STRING => {
                let mut data = vec![];
                let mut addr = arg;
                loop {
                    match self.mem.read(addr, Width::Byte)? as u8 {
                        0 => break,
                        b => data.push(b)
                    }
                    addr = addr.wrapping_add(1);
                }
                self.write_output(&data);
            },
            service::READ_INT => {
                let line = self.read_line()?;
                let value = std::str::from_utf8(&line).ok()
                    .and_then(|s| s.trim().parse::<i32>().ok())
                    .ok_or(SimErr::InvalidInput)?;
                self.reg_file.set(V0, value as u32);
            },
            service::READ_STRING => self.read_string(arg, self.reg_file[A1])?,
            service::EXIT => {
                debug!(pc = format_args!("{:#010x}", self.pc), "program exited");
                self.halted = true;
            },
            service::PRINT_CHAR => self.write_output(&[arg as u8]),
            service::READ_CHAR => {
                let byte = self.io.read_byte().ok_or(SimErr::InputClosed)?;
                self.reg_file.set(V0, u32::from(byte));
            },
            code => return Err(SimErr::UnimplementedSyscall(code)),
        }

        Ok(())
    }

    fn write_output(&self, data: &[u8]) {
        if !self.io.write_bytes(data) {
            debug!(len = data.len(), "console output was dropped");
        }
    }

    /// Reads input up to a newline (which is consumed but not included).
    fn read_line(&self) -> Result<Vec<u8>, SimErr> {
        let mut line = vec![];
        loop {
            match self.io.read_byte() {
                Some(b'\n') => break,
                Some(b) => line.push(b),
                None if line.is_empty() => return Err(SimErr::InputClosed),
                None => break,
            }
        }
        Ok(line)
    }

    /// Reads at most `size - 1` bytes into the buffer (stopping after a newline),
    /// then NUL-terminates it.
    fn read_string(&mut self, buf: u32, size: u32) -> Result<(), SimErr> {
        let size = match size as i32 {
            n @ 1.. => n as u32,
            _ => return Ok(()),
        };
        let last = buf.checked_add(size - 1).ok_or(SimErr::AccessViolation(buf))?;
        Mem::check_access(buf, Width::Byte)?;
        Mem::check_access(last, Width::Byte)?;
        if Segment::of(buf) != Segment::of(last) {
            return Err(SimErr::AccessViolation(last));
        }

        let mut data = vec![];
        while data.len() < (size - 1) as usize {
            match self.io.read_byte() {
                Some(b) => {
                    data.push(b);
                    if b == b'\n' { break; }
                },
                None if data.is_empty() => return Err(SimErr::InputClosed),
                None => break,
            }
        }
        data.push(0);

        for (addr, b) in (buf..).zip(data) {
            self.mem.set_byte(addr, b);
        }
        Ok(())
    }
}
impl Default for Machine {
    fn default() -> Self {
        Self::new(Default::default())
    }
}

fn shift(op: ShiftOp, value: u32, amount: u32) -> u32 {
    match op {
        ShiftOp::Sll => value << amount,
        ShiftOp::Srl => value >> amount,
        ShiftOp::Sra => ((value as i32) >> amount) as u32,
    }
}

#[cfg(test)]
mod tests {
    use crate::asm::Mode;
    use crate::ast::reg_consts::{A0, RA, SP, T0, T1, T2, V0, ZERO};
    use crate::sim::debug::{Breakpoint, Comparator};
    use crate::sim::io::BufferedIO;
    use crate::sim::mem::{Mem, RegFile, Width, DATA_BASE, STACK_INIT, TEXT_BASE};

    use super::{Machine, MachineFlags, SimErr};

    fn load(m: &mut Machine, src: &str) {
        for line in src.lines() {
            m.assemble_line(line).unwrap_or_else(|e| panic!("failed to assemble {line:?}: {e}"));
        }
    }
    fn machine(src: &str) -> Machine {
        let mut m = Machine::new(Default::default());
        load(&mut m, src);
        m
    }
    fn with_io(src: &str, input: &[u8]) -> (Machine, BufferedIO) {
        let mut m = machine(src);
        let io = BufferedIO::new();
        io.get_input().write().unwrap().extend(input);
        m.set_io(io.clone());
        (m, io)
    }
    fn output(io: &BufferedIO) -> String {
        String::from_utf8(io.get_output().read().unwrap().clone()).unwrap()
    }

    #[test]
    fn test_addi() {
        let mut m = machine("addi $t0, $zero, 5");
        m.step().unwrap();
        assert_eq!(m.reg_file[T0], 5);
        assert_eq!(m.reg_file[ZERO], 0);
        assert_eq!(m.pc, TEXT_BASE + 4);
        assert_eq!(m.instructions_run, 1);
    }

    #[test]
    fn test_zero_register() {
        let mut m = machine("
            addi $zero, $zero, 7
            lui $zero, 0xFFFF
            add $t0, $zero, $zero
        ");
        m.run().unwrap();
        assert_eq!(m.reg_file[ZERO], 0);
        assert_eq!(m.reg_file[T0], 0);
    }

    #[test]
    fn test_overflow() {
        let mut m = machine("
            li $t0, 0x7FFFFFFF
            add $t0, $t0, $t0
        ");
        m.step().unwrap();
        m.step().unwrap();
        let pc = m.pc;
        assert_eq!(m.step(), Err(SimErr::IntegerOverflow));
        assert_eq!(m.reg_file[T0], 0x7FFFFFFF);
        assert_eq!(m.pc, pc);

        // unsigned and wrapping forms
        let mut m = machine("
            li $t0, 0x7FFFFFFF
            addu $t1, $t0, $t0
            addiu $t2, $t0, 1
            addi $t0, $t0, 1
        ");
        assert_eq!(m.run(), Err(SimErr::IntegerOverflow));
        assert_eq!(m.reg_file[T1], 0xFFFFFFFE);
        assert_eq!(m.reg_file[T2], 0x80000000);

        m.flags.trap_on_overflow = false;
        m.run().unwrap();
        assert_eq!(m.reg_file[T0], 0x80000000);

        let mut m = machine("
            li $t0, 0x80000000
            li $t1, 1
            sub $t2, $t0, $t1
        ");
        assert_eq!(m.run(), Err(SimErr::IntegerOverflow));
        assert_eq!(m.reg_file[T2], 0);
    }

    #[test]
    fn test_logic_and_compare() {
        let mut m = machine("
            li $t0, -2
            li $t1, 3
            slt $s0, $t0, $t1
            sltu $s1, $t0, $t1
            nor $s2, $t0, $t1
            seq $s3, $t1, $t1
            slti $s4, $t0, -1
            sltiu $s5, $t1, -1
            andi $s6, $t0, 0xFFFF
            xori $s7, $t1, 1
        ");
        m.run().unwrap();
        use crate::ast::reg_consts::{S0, S1, S2, S3, S4, S5, S6, S7};
        assert_eq!(m.reg_file[S0], 1);
        assert_eq!(m.reg_file[S1], 0);
        assert_eq!(m.reg_file[S2], !(0xFFFF_FFFE | 3));
        assert_eq!(m.reg_file[S3], 1);
        assert_eq!(m.reg_file[S4], 1);
        assert_eq!(m.reg_file[S5], 1); // -1 sign-extends to 0xFFFFFFFF
        assert_eq!(m.reg_file[S6], 0xFFFE);
        assert_eq!(m.reg_file[S7], 2);
    }

    #[test]
    fn test_shifts() {
        let mut m = machine("
            li $t0, 0x80000010
            li $t1, 36
            sll $s0, $t0, 1
            srl $s1, $t0, 4
            sra $s2, $t0, 4
            sllv $s3, $t0, $t1
        ");
        m.run().unwrap();
        use crate::ast::reg_consts::{S0, S1, S2, S3};
        assert_eq!(m.reg_file[S0], 0x00000020);
        assert_eq!(m.reg_file[S1], 0x08000001);
        assert_eq!(m.reg_file[S2], 0xF8000001);
        assert_eq!(m.reg_file[S3], 0x00000100); // 36 & 0x1F = 4
    }

    #[test]
    fn test_mul_div() {
        let mut m = machine("
            li $t0, -7
            li $t1, 2
            mult $t0, $t1
            mfhi $s0
            mflo $s1
            multu $t0, $t1
            mfhi $s2
            div $t0, $t1
            mfhi $s3
            mflo $s4
            divu $t0, $t1
            mflo $s5
            mul $s6, $t1, $t1
        ");
        m.run().unwrap();
        use crate::ast::reg_consts::{S0, S1, S2, S3, S4, S5, S6};
        assert_eq!(m.reg_file[S0], 0xFFFFFFFF);
        assert_eq!(m.reg_file[S1], (-14i32) as u32);
        assert_eq!(m.reg_file[S2], 1);
        assert_eq!(m.reg_file[S3], (-1i32) as u32);
        assert_eq!(m.reg_file[S4], (-3i32) as u32);
        assert_eq!(m.reg_file[S5], 0xFFFFFFF9 / 2);
        assert_eq!(m.reg_file[S6], 4);
    }

    #[test]
    fn test_divide_by_zero() {
        let mut m = machine("
            li $t0, 9
            mthi $t0
            mtlo $t0
            div $t0, $zero
        ");
        assert_eq!(m.run(), Err(SimErr::DivideByZero));
        assert_eq!((m.reg_file.hi, m.reg_file.lo), (9, 9));
        assert_eq!(m.pc, TEXT_BASE + 12);

        let mut m = machine("divu $t0, $zero");
        assert_eq!(m.step(), Err(SimErr::DivideByZero));
        assert_eq!((m.reg_file.hi, m.reg_file.lo), (0, 0));
    }

    #[test]
    fn test_loads_stores() {
        let mut m = machine("
            .data
            bytes: .byte 0x80, 0x7F
            halves: .half 0x8001
            word: .word 0
            .text
            la $t0, bytes
            lb $s0, 0($t0)
            lbu $s1, 0($t0)
            lb $s2, 1($t0)
            lh $s3, 2($t0)
            lhu $s4, 2($t0)
            li $t1, 0xDEADBEEF
            sw $t1, word
            sb $t1, 4($t0)
            sh $t1, 2($t0)
            lw $s5, word
        ");
        m.run().unwrap();
        use crate::ast::reg_consts::{S0, S1, S2, S3, S4, S5};
        assert_eq!(m.reg_file[S0], 0xFFFFFF80);
        assert_eq!(m.reg_file[S1], 0x80);
        assert_eq!(m.reg_file[S2], 0x7F);
        assert_eq!(m.reg_file[S3], 0xFFFF8001);
        assert_eq!(m.reg_file[S4], 0x8001);
        assert_eq!(m.reg_file[S5], 0xEFADBEEF);
        assert_eq!(m.mem.get_word(DATA_BASE), 0x807FBEEF);
    }

    #[test]
    fn test_memory_faults() {
        let mut m = machine("
            li $t0, 0x10000002
            lw $t1, 0($t0)
        ");
        m.step().unwrap();
        m.step().unwrap();
        let pc = m.pc;
        assert_eq!(m.step(), Err(SimErr::MisalignedAccess(0x10000002)));
        assert_eq!(m.pc, pc);
        assert_eq!(m.reg_file[T1], 0);

        let mut m = machine("sw $t0, 0($zero)");
        assert_eq!(m.step(), Err(SimErr::AccessViolation(0)));

        // stack is writable, and $sp starts at the top of it
        let mut m = machine("
            addi $sp, $sp, -4
            sw $ra, 0($sp)
        ");
        m.reg_file.set(RA, 0x1234);
        m.run().unwrap();
        assert_eq!(m.mem.get_word(STACK_INIT - 4), 0x1234);
    }

    #[test]
    fn test_branches() {
        let mut m = machine("
                li $t0, 3
                li $t1, 0
            loop:
                addi $t1, $t1, 2
                addi $t0, $t0, -1
                bne $t0, $zero, loop
                blez $t0, skip
                li $t1, 100
            skip:
                bltz $t0, skip
                bgez $t1, done
                li $t1, 200
            done:
        ");
        m.run().unwrap();
        assert_eq!(m.reg_file[T1], 6);
        assert_eq!(m.pc, m.text_cursor());
    }

    #[test]
    fn test_ord_branch_pseudos() {
        let mut m = machine("
                li $t0, -1
                li $t1, 1
                li $t2, 0
                blt $t1, $t0, fail
                ble $t1, $t0, fail
                bgt $t0, $t1, fail
                bge $t0, $t1, fail
                bge $t0, $t0, ok
            fail:
                li $t2, 99
                b end
            ok:
                li $t2, 1
            end:
        ");
        m.run().unwrap();
        assert_eq!(m.reg_file[T2], 1);
    }

    #[test]
    fn test_jumps() {
        let mut m = machine("
                j start
            func2:
                move $v1, $ra
                jr $ra
            func:
                li $v0, 42
                jr $ra
            start:
                jal func
                move $s0, $v0
                la $t0, func2
                jalr $t0
            exit:
        ");
        m.run().unwrap();
        use crate::ast::reg_consts::{S0, V1};
        let exit = m.lookup_label("exit").unwrap();
        assert_eq!(m.reg_file[S0], 42);
        assert_eq!(m.reg_file[RA], exit);
        assert_eq!(m.reg_file[V1], exit);
        assert_eq!(m.pc, exit);
    }

    #[test]
    fn test_unknown_instruction() {
        let mut m = Machine::default();
        m.emit_text_word(0xFC000000).unwrap();
        assert_eq!(m.step(), Err(SimErr::UnknownInstruction(0xFC000000)));
        assert_eq!(m.pc, TEXT_BASE);
        assert_eq!(m.instructions_run, 0);
    }

    #[test]
    fn test_unresolved_fixup_blocks_execution() {
        let mut m = machine("
            addi $t0, $zero, 1
            j later
        ");
        assert_eq!(m.run(), Err(SimErr::UnresolvedFixup("later".to_string())));
        assert_eq!(m.reg_file[T0], 0);

        // stepping runs up to the unresolved instruction
        m.step().unwrap();
        assert_eq!(m.step(), Err(SimErr::UnresolvedFixup("later".to_string())));
        assert_eq!(m.pc, TEXT_BASE + 4);

        m.assemble_line("later:").unwrap();
        m.run().unwrap();
        assert_eq!(m.pc, TEXT_BASE + 8);
    }

    #[test]
    fn test_run_with_limit() {
        let mut m = machine("spin: b spin");
        m.run_with_limit(10).unwrap();
        assert_eq!(m.instructions_run, 10);
        m.run_with_limit(5).unwrap();
        assert_eq!(m.instructions_run, 15);
        assert_eq!(m.pc, TEXT_BASE);
    }

    #[test]
    fn test_breakpoints() {
        let mut m = machine("
            loop:
            addi $t0, $t0, 1
            sw $t0, 0($sp)
            b loop
        ");
        m.breakpoints.insert(Breakpoint::Reg { reg: T0, value: Comparator::Eq(3) });
        m.run_with_limit(100).unwrap();
        assert_eq!(m.reg_file[T0], 3);
        assert_eq!(m.pc, TEXT_BASE + 4);

        m.breakpoints.clear();
        m.breakpoints.insert(Breakpoint::Mem { addr: STACK_INIT, width: Width::Word, value: Comparator::Greater(4) });
        m.run_with_limit(100).unwrap();
        assert_eq!(m.mem.get_word(STACK_INIT), 5);
        assert_eq!(m.pc, TEXT_BASE + 8);
    }

    #[test]
    fn test_syscall_print() {
        let (mut m, io) = with_io(r#"
            .data
            msg: .asciiz "x = "
            .text
            li $v0, 4
            la $a0, msg
            syscall
            li $v0, 1
            li $a0, -17
            syscall
            li $v0, 11
            li $a0, '\n'
            syscall
            li $v0, 10
            syscall
            li $v0, 1
            syscall
        "#, b"");
        m.run().unwrap();
        assert!(m.halted());
        assert_eq!(output(&io), "x = -17\n");
        assert_ne!(m.pc, m.text_cursor());
    }

    #[test]
    fn test_syscall_read() {
        let (mut m, _io) = with_io("
            .data
            buf: .space 8
            .text
            li $v0, 5
            syscall
            move $s0, $v0
            li $v0, 12
            syscall
            move $s1, $v0
            li $v0, 8
            la $a0, buf
            li $a1, 8
            syscall
            li $v0, 8
            addi $a0, $a0, 4
            li $a1, 4
            syscall
        ", b"  -25 \nqhi\nabcdef");
        m.run().unwrap();
        use crate::ast::reg_consts::{S0, S1};
        assert_eq!(m.reg_file[S0], (-25i32) as u32);
        assert_eq!(m.reg_file[S1], u32::from(b'q'));
        // "hi\n\0", then "abc\0" overwriting from buf + 4
        let buf: Vec<_> = (0..8).map(|i| m.mem.get_byte(DATA_BASE + i)).collect();
        assert_eq!(buf, b"hi\n\0abc\0");
    }

    #[test]
    fn test_syscall_errors() {
        let (mut m, _io) = with_io("
            li $v0, 5
            syscall
        ", b"twelve\n");
        assert_eq!(m.run(), Err(SimErr::InvalidInput));
        assert_eq!(m.reg_file[V0], 5);

        let (mut m, _io) = with_io("
            li $v0, 12
            syscall
        ", b"");
        assert_eq!(m.run(), Err(SimErr::InputClosed));

        let mut m = machine("
            li $v0, 99
            syscall
        ");
        assert_eq!(m.run(), Err(SimErr::UnimplementedSyscall(99)));
        assert_eq!(m.pc, TEXT_BASE + 4);

        // buffer runs off the end of the data segment
        let (mut m, io) = with_io("
            li $v0, 8
            li $a0, 0x1003FFFC
            li $a1, 16
            syscall
        ", b"abc");
        assert_eq!(m.run(), Err(SimErr::AccessViolation(0x1003FFFC + 15)));
        assert_eq!(io.get_input().read().unwrap().len(), 3);
        assert_eq!(m.reg_file[A0], 0x1003FFFC);
    }

    type Snapshot = (RegFile, Mem, u32, u32, u32, Mode, usize);
    fn snapshot(m: &Machine) -> Snapshot {
        (
            m.reg_file.clone(), m.mem.clone(), m.pc,
            m.text_cursor(), m.data_cursor(), m.mode(),
            m.symbols().label_iter().count()
        )
    }

    #[test]
    fn test_reset() {
        let mut m = machine("
            .data
            value: .word 3
            .text
            main: lw $t0, value
            j nowhere
        ");
        m.step().unwrap();
        m.step().unwrap();
        m.reset();

        let once = snapshot(&m);
        assert_eq!(once, snapshot(&Machine::default()));
        assert_eq!(m.reg_file[SP], STACK_INIT);
        assert_eq!(m.mem.get_word(DATA_BASE), 0);
        assert_eq!(m.lookup_label("main"), None);
        assert!(!m.has_unresolved_fixups());
        assert_eq!(m.instructions_run, 0);

        m.reset();
        assert_eq!(snapshot(&m), once);

        // the same program can be assembled again
        load(&mut m, "main: addi $t0, $zero, 1");
        m.run().unwrap();
        assert_eq!(m.reg_file[T0], 1);
    }

    #[test]
    fn test_reset_keeping_symbols() {
        let mut m = Machine::new(MachineFlags { clear_symbols_on_reset: false, ..Default::default() });
        let io = BufferedIO::new();
        m.set_io(io.clone());
        m.breakpoints.insert(Breakpoint::PC(TEXT_BASE));
        load(&mut m, "
            main: addi $t0, $zero, 1
            j later
        ");
        m.reset();

        assert_eq!(m.lookup_label("main"), Some(TEXT_BASE));
        assert!(!m.has_unresolved_fixups());
        assert_eq!(m.text_cursor(), TEXT_BASE);
        assert_eq!(m.mem.get_word(TEXT_BASE), 0);
        assert!(!m.flags.clear_symbols_on_reset);
        assert_eq!(m.breakpoints.len(), 1);

        assert_eq!(
            m.assemble_line("main: addi $t0, $zero, 1").unwrap_err().kind,
            crate::asm::AsmErrKind::LabelRedefined("main".to_string())
        );

        let before = snapshot(&m);
        m.reset();
        assert_eq!(snapshot(&m), before);
    }

    #[test]
    fn test_reset_drops_stale_fixups() {
        let mut m = Machine::new(MachineFlags { clear_symbols_on_reset: false, ..Default::default() });
        load(&mut m, "
            addi $t0, $zero, 1
            j later
        ");
        m.reset();

        load(&mut m, "
            addi $t0, $zero, 1
            addi $t1, $zero, 2
            later:
        ");
        assert_eq!(m.lookup_label("later"), Some(TEXT_BASE + 8));
        assert_eq!(m.mem.get_word(TEXT_BASE + 4), 0x20090002);

        m.step().unwrap();
        m.step().unwrap();
        assert_eq!(m.reg_file[T1], 2);
        assert_eq!(m.pc, TEXT_BASE + 8);
    }
}
