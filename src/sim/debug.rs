//! Utilities to debug simulation.
//!
//! The key type here is [`Breakpoint`], which can be appended to the [`Machine`]'s
//! breakpoint field to cause the machine to break.
use crate::ast::Reg;

use super::mem::Width;
use super::Machine;

/// Conditions under which [`Machine::run_while`] stops after a step.
#[derive(Debug, PartialEq, Eq, Hash, Clone)]
pub enum Breakpoint {
    /// Break when the PC is equal to the given address.
    PC(u32),

    /// Break when the PC reaches the address of the given label.
    ///
    /// This never breaks while the label is undefined.
    Label(String),

    /// Break when the provided register matches a predicate.
    Reg {
        /// Register to check.
        reg: Reg,
        /// Predicate to break against.
        value: Comparator
    },

    /// Break when the HI register matches a predicate.
    Hi(Comparator),
    /// Break when the LO register matches a predicate.
    Lo(Comparator),

    /// Break when the value at the provided memory address matches a predicate.
    ///
    /// The value is read zero-extended, like `lbu`/`lhu`/`lw`.
    /// An address which cannot be read with this width never breaks.
    Mem {
        /// Address to check.
        addr: u32,
        /// Width of the value read.
        width: Width,
        /// Predicate to break against.
        value: Comparator
    },
}

impl Breakpoint where Breakpoint: Send + Sync { /* assert Breakpoint is send/sync */ }

impl Breakpoint {
    /// Checks if a break should occur.
    pub fn check(&self, machine: &Machine) -> bool {
        match self {
            Breakpoint::PC(addr) => machine.pc == *addr,
            Breakpoint::Label(label) => machine.lookup_label(label) == Some(machine.pc),
            Breakpoint::Reg { reg, value } => value.check(machine.reg_file[*reg]),
            Breakpoint::Hi(value) => value.check(machine.reg_file.hi),
            Breakpoint::Lo(value) => value.check(machine.reg_file.lo),
            Breakpoint::Mem { addr, width, value } => machine.mem.read(*addr, *width)
                .is_ok_and(|v| value.check(v)),
        }
    }
}
impl std::fmt::Display for Breakpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Breakpoint::PC(addr)             => write!(f, "pc == {addr:#010x}"),
            Breakpoint::Label(label)         => write!(f, "pc == {label}"),
            Breakpoint::Reg { reg, value }   => write!(f, "{reg} {value}"),
            Breakpoint::Hi(value)            => write!(f, "hi {value}"),
            Breakpoint::Lo(value)            => write!(f, "lo {value}"),
            Breakpoint::Mem { addr, width, value } => {
                let w = match width {
                    Width::Byte => "byte",
                    Width::Half => "half",
                    Width::Word => "word",
                };
                write!(f, "{w}[{addr:#010x}] {value}")
            },
        }
    }
}

/// Predicate over a 32-bit value.
///
/// Ordering comparisons come in the two flavors MIPS compares with:
/// unsigned (as `sltu` does) and signed (as `slt` does).
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum Comparator {
    /// Never breaks.
    Never,
    /// Break if the value equals the operand.
    Eq(u32),
    /// Break if the value does not equal the operand.
    Ne(u32),
    /// Break if the value is less than the operand, comparing unsigned.
    Below(u32),
    /// Break if the value is greater than the operand, comparing unsigned.
    Above(u32),
    /// Break if the value is less than the operand, comparing signed.
    Less(i32),
    /// Break if the value is greater than the operand, comparing signed.
    Greater(i32),
    /// Always breaks.
    Always
}
impl Comparator {
    /// Checks if the value passes the comparator.
    pub fn check(&self, value: u32) -> bool {
        match *self {
            Comparator::Never      => false,
            Comparator::Eq(r)      => value == r,
            Comparator::Ne(r)      => value != r,
            Comparator::Below(r)   => value < r,
            Comparator::Above(r)   => value > r,
            Comparator::Less(r)    => (value as i32) < r,
            Comparator::Greater(r) => (value as i32) > r,
            Comparator::Always     => true,
        }
    }
}
impl std::fmt::Display for Comparator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Comparator::Never      => f.write_str("never"),
            Comparator::Eq(r)      => write!(f, "== {r:#x}"),
            Comparator::Ne(r)      => write!(f, "!= {r:#x}"),
            Comparator::Below(r)   => write!(f, "<u {r:#x}"),
            Comparator::Above(r)   => write!(f, ">u {r:#x}"),
            Comparator::Less(r)    => write!(f, "< {r}"),
            Comparator::Greater(r) => write!(f, "> {r}"),
            Comparator::Always     => f.write_str("always"),
        }
    }
}
