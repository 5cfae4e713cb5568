//! Memory handling for the simulator.
//!
//! This module consists of:
//! - [`Mem`]: The memory.
//! - [`RegFile`]: The register file.
//! - [`Segment`] and the memory layout constants, which describe the valid regions of memory.

use std::collections::BTreeMap;
use std::ops::Range;

use crate::ast::Reg;

use super::SimErr;

/// The first address of the text segment.
pub const TEXT_BASE: u32 = 0x0040_0000;
/// The address after the last address of the text segment.
pub const TEXT_LIMIT: u32 = 0x1000_0000;
/// The first address of the data segment.
pub const DATA_BASE: u32 = 0x1000_0000;
/// The address after the last address of the data segment.
pub const DATA_LIMIT: u32 = 0x1004_0000;
/// The first address of the stack segment.
pub const STACK_BASE: u32 = 0x1004_0000;
/// The address after the last address of the stack segment.
pub const STACK_LIMIT: u32 = 0x8000_0000;
/// The value of `$sp` after a reset.
pub const STACK_INIT: u32 = 0x7FFF_EFFC;

/// One of the three valid regions of memory.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum Segment {
    /// Instructions.
    Text,
    /// Static data.
    Data,
    /// The stack (and anything else the program wants to put above the data segment).
    Stack
}
impl Segment {
    /// Every segment, in address order.
    pub const ALL: [Segment; 3] = [Segment::Text, Segment::Data, Segment::Stack];

    /// The addresses covered by this segment.
    pub fn range(self) -> Range<u32> {
        match self {
            Segment::Text  => TEXT_BASE..TEXT_LIMIT,
            Segment::Data  => DATA_BASE..DATA_LIMIT,
            Segment::Stack => STACK_BASE..STACK_LIMIT,
        }
    }

    /// Finds the segment containing the given address (if any).
    ///
    /// ```
    /// use mips_ensemble::sim::mem::Segment;
    ///
    /// assert_eq!(Segment::of(0x0040_0000), Some(Segment::Text));
    /// assert_eq!(Segment::of(0x1000_0004), Some(Segment::Data));
    /// assert_eq!(Segment::of(0x7FFF_EFFC), Some(Segment::Stack));
    /// assert_eq!(Segment::of(0x0000_0000), None);
    /// assert_eq!(Segment::of(0x8000_0000), None);
    /// ```
    pub fn of(addr: u32) -> Option<Segment> {
        Segment::ALL.into_iter()
            .find(|s| s.range().contains(&addr))
    }
}
impl std::fmt::Display for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Segment::Text  => f.write_str("text"),
            Segment::Data  => f.write_str("data"),
            Segment::Stack => f.write_str("stack"),
        }
    }
}

const PAGE_BITS: u32 = 12;
const PAGE_SIZE: usize = 1 << PAGE_BITS;
type Page = Box<[u8; PAGE_SIZE]>;

fn split_addr(addr: u32) -> (u32, usize) {
    (addr >> PAGE_BITS, (addr as usize) & (PAGE_SIZE - 1))
}

/// Memory.
///
/// This is a sparse, byte-addressable memory covering the full 32-bit address space.
/// It is stored as a set of pages, which are only allocated when written to.
/// Any address that has never been written reads as 0.
///
/// Note that this struct provides two methods of accessing memory:
/// - [`Mem::get_byte`], [`Mem::set_byte`], [`Mem::get_word`], [`Mem::set_word`]:
///     direct access to memory values, without any checks
/// - [`Mem::read`] and [`Mem::write`]: memory access with region and alignment checks
///
/// Multi-byte values are stored big-endian.
///
/// ```
/// use mips_ensemble::sim::mem::{Mem, Width};
///
/// let mut mem = Mem::new();
/// assert_eq!(mem.read(0x1000_0000, Width::Word), Ok(0));
///
/// mem.write(0x1000_0000, Width::Word, 0x12345678).unwrap();
/// assert_eq!(mem.get_byte(0x1000_0000), 0x12);
/// assert_eq!(mem.read(0x1000_0002, Width::Half), Ok(0x5678));
///
/// assert!(mem.read(0x1000_0001, Width::Word).is_err()); // misaligned
/// assert!(mem.read(0x0000_0000, Width::Byte).is_err()); // outside any segment
/// ```
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Mem {
    pages: BTreeMap<u32, Page>
}

/// The width of a memory access.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum Width {
    /// 1 byte.
    Byte,
    /// 2 bytes.
    Half,
    /// 4 bytes.
    Word
}
impl Width {
    /// The number of bytes in this width.
    pub fn bytes(self) -> u32 {
        match self {
            Width::Byte => 1,
            Width::Half => 2,
            Width::Word => 4,
        }
    }
}

impl Mem {
    /// Creates a new, empty memory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops every written value, so that all of memory reads as 0.
    pub fn clear(&mut self) {
        self.pages.clear();
    }

    /// Reads the byte at the provided address.
    ///
    /// This does not perform any access checks.
    pub fn get_byte(&self, addr: u32) -> u8 {
        let (page, offset) = split_addr(addr);
        self.pages.get(&page).map_or(0, |p| p[offset])
    }

    /// Writes the byte at the provided address.
    ///
    /// This does not perform any access checks.
    pub fn set_byte(&mut self, addr: u32, value: u8) {
        let (page, offset) = split_addr(addr);
        self.pages.entry(page)
            .or_insert_with(|| Box::new([0; PAGE_SIZE]))[offset] = value;
    }

    /// Reads the (big-endian) word at the provided address.
    ///
    /// This does not perform any access checks.
    pub fn get_word(&self, addr: u32) -> u32 {
        u32::from_be_bytes(std::array::from_fn(|i| self.get_byte(addr.wrapping_add(i as u32))))
    }

    /// Writes the (big-endian) word at the provided address.
    ///
    /// This does not perform any access checks.
    pub fn set_word(&mut self, addr: u32, value: u32) {
        for (i, b) in value.to_be_bytes().into_iter().enumerate() {
            self.set_byte(addr.wrapping_add(i as u32), b);
        }
    }

    /// Checks that an access of the given width can occur at the given address.
    ///
    /// This fails if the address is not aligned to the width
    /// or if it is not within a valid segment.
    pub fn check_access(addr: u32, width: Width) -> Result<(), SimErr> {
        if addr % width.bytes() != 0 {
            return Err(SimErr::MisalignedAccess(addr));
        }
        // aligned accesses can't cross a segment boundary, since every boundary is word-aligned
        match Segment::of(addr) {
            Some(_) => Ok(()),
            None => Err(SimErr::AccessViolation(addr)),
        }
    }

    /// Fallibly reads a value at the provided address, erroring if not possible.
    ///
    /// The value is zero-extended to 32 bits.
    pub fn read(&self, addr: u32, width: Width) -> Result<u32, SimErr> {
        Mem::check_access(addr, width)?;

        let value = (0..width.bytes())
            .map(|i| self.get_byte(addr + i))
            .fold(0, |acc, b| (acc << 8) | u32::from(b));
        Ok(value)
    }

    /// Fallibly writes a value at the provided address, erroring if not possible.
    ///
    /// Only the low bytes of the value (according to the width) are written.
    pub fn write(&mut self, addr: u32, width: Width, value: u32) -> Result<(), SimErr> {
        Mem::check_access(addr, width)?;

        let n = width.bytes();
        for i in 0..n {
            let shift = 8 * (n - 1 - i);
            self.set_byte(addr + i, (value >> shift) as u8);
        }
        Ok(())
    }
}

/// The register file.
///
/// This holds the 32 general-purpose registers, and the HI/LO registers.
/// Register `$zero` always reads as 0: writes to it through [`RegFile::set`] are discarded.
///
/// This struct can be indexed with a [`Reg`]
/// (which can be constructed using the [`crate::ast::reg_consts`] module or via [`Reg::try_from`]).
///
/// # Example
///
/// ```
/// use mips_ensemble::sim::mem::{RegFile, STACK_INIT};
/// use mips_ensemble::ast::reg_consts::{SP, T0, ZERO};
///
/// let mut reg = RegFile::new();
/// assert_eq!(reg[SP], STACK_INIT);
///
/// reg.set(T0, 11);
/// assert_eq!(reg[T0], 11);
///
/// reg.set(ZERO, 11);
/// assert_eq!(reg[ZERO], 0);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegFile {
    regs: [u32; 32],
    /// The HI register (upper half of a product, or the remainder of a division).
    pub hi: u32,
    /// The LO register (lower half of a product, or the quotient of a division).
    pub lo: u32
}
impl RegFile {
    /// Creates a register file in its reset state.
    ///
    /// Every register is 0, except `$sp`, which is [`STACK_INIT`].
    pub fn new() -> Self {
        let mut regs = [0; 32];
        regs[usize::from(crate::ast::reg_consts::SP)] = STACK_INIT;
        Self { regs, hi: 0, lo: 0 }
    }

    /// Reads a register.
    pub fn get(&self, reg: Reg) -> u32 {
        self.regs[usize::from(reg)]
    }

    /// Writes a register. Writes to `$zero` are discarded.
    pub fn set(&mut self, reg: Reg, value: u32) {
        if reg.reg_no() != 0 {
            self.regs[usize::from(reg)] = value;
        }
    }

    /// Iterates over every general-purpose register and its value.
    pub fn iter(&self) -> impl Iterator<Item = (Reg, u32)> + '_ {
        self.regs.iter()
            .enumerate()
            .map(|(i, &v)| (Reg(i as u8), v))
    }
}
impl Default for RegFile {
    fn default() -> Self {
        Self::new()
    }
}
impl std::ops::Index<Reg> for RegFile {
    type Output = u32;

    fn index(&self, index: Reg) -> &Self::Output {
        &self.regs[usize::from(index)]
    }
}
