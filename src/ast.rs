//! Components relating to the abstract syntax trees (ASTs)
//! used in representing assembly instructions.
//!
//! These components together are used to construct...
//! - [`asm::AsmInstr`] (a data structure holding an assembly source code instruction),
//! - [`asm::Directive`] (a data structure holding an assembly source code directive),
//! - and [`sim::SimInstr`] (a data structure holding a decoded machine word).

pub mod asm;
pub mod sim;

use std::num::TryFromIntError;
use offset_base::OffsetBacking;

/// A register. Must be between 0 and 31.
///
/// This `Reg` struct can either be constructed by selecting a register from [`reg_consts`],
/// by name with [`Reg::from_name`], or by using [`Reg::try_from`].
///
/// ## Examples
///
/// ```text
/// add $t0, $t1, $t2
///     ~~~  ~~~  ~~~
/// lw $ra, 4($sp)
///    ~~~    ~~~
/// jr $31
///    ~~~
/// ```
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy, PartialOrd, Ord)]
pub struct Reg(pub(crate) u8);

/// The conventional names of each register, indexed by register number.
const REG_NAMES: [&str; 32] = [
    "zero", "at", "v0", "v1", "a0", "a1", "a2", "a3",
    "t0",   "t1", "t2", "t3", "t4", "t5", "t6", "t7",
    "s0",   "s1", "s2", "s3", "s4", "s5", "s6", "s7",
    "t8",   "t9", "k0", "k1", "gp", "sp", "fp", "ra",
];

/// Register constants!
pub mod reg_consts {
    use super::Reg;

    macro_rules! reg_consts {
        ($($(#[$m:meta])* $name:ident = $n:literal),+ $(,)?) => {
            $(
                $(#[$m])*
                pub const $name: Reg = Reg($n);
            )+
        }
    }

    reg_consts! {
        /// The zero register (`$zero`). Always reads as 0.
        ZERO = 0,
        /// The assembler temporary (`$at`), used as scratch by pseudo-instructions.
        AT = 1,
        /// Return value / syscall code register (`$v0`).
        V0 = 2,
        /// Second return value register (`$v1`).
        V1 = 3,
        /// First argument register (`$a0`).
        A0 = 4,
        /// Second argument register (`$a1`).
        A1 = 5,
        /// Third argument register (`$a2`).
        A2 = 6,
        /// Fourth argument register (`$a3`).
        A3 = 7,
        #[allow(missing_docs)] T0 = 8,
        #[allow(missing_docs)] T1 = 9,
        #[allow(missing_docs)] T2 = 10,
        #[allow(missing_docs)] T3 = 11,
        #[allow(missing_docs)] T4 = 12,
        #[allow(missing_docs)] T5 = 13,
        #[allow(missing_docs)] T6 = 14,
        #[allow(missing_docs)] T7 = 15,
        #[allow(missing_docs)] S0 = 16,
        #[allow(missing_docs)] S1 = 17,
        #[allow(missing_docs)] S2 = 18,
        #[allow(missing_docs)] S3 = 19,
        #[allow(missing_docs)] S4 = 20,
        #[allow(missing_docs)] S5 = 21,
        #[allow(missing_docs)] S6 = 22,
        #[allow(missing_docs)] S7 = 23,
        #[allow(missing_docs)] T8 = 24,
        #[allow(missing_docs)] T9 = 25,
        #[allow(missing_docs)] K0 = 26,
        #[allow(missing_docs)] K1 = 27,
        /// Global pointer (`$gp`).
        GP = 28,
        /// Stack pointer (`$sp`).
        SP = 29,
        /// Frame pointer (`$fp`, also `$s8`).
        FP = 30,
        /// Return address (`$ra`), written by `jal` and `jalr`.
        RA = 31,
    }
}
impl Reg {
    /// Gets the register number of this [`Reg`]. This is always between 0 and 31.
    pub fn reg_no(self) -> u8 {
        self.0
    }

    /// Gets the conventional name of this register (without the `$`).
    pub fn name(self) -> &'static str {
        REG_NAMES[usize::from(self.0)]
    }

    /// Resolves a register name (without the `$`).
    ///
    /// This accepts either a register number (`0`-`31`)
    /// or a conventional name (`zero`, `t0`, `sp`, etc., plus `s8` as an alias for `fp`).
    ///
    /// ```
    /// use mips_ensemble::ast::Reg;
    /// use mips_ensemble::ast::reg_consts::{T0, FP, RA};
    ///
    /// assert_eq!(Reg::from_name("t0"), Some(T0));
    /// assert_eq!(Reg::from_name("8"), Some(T0));
    /// assert_eq!(Reg::from_name("s8"), Some(FP));
    /// assert_eq!(Reg::from_name("31"), Some(RA));
    /// assert_eq!(Reg::from_name("32"), None);
    /// assert_eq!(Reg::from_name("t10"), None);
    /// ```
    pub fn from_name(name: &str) -> Option<Reg> {
        if name.bytes().all(|b| b.is_ascii_digit()) {
            // reject things like "007" so each register has one numeric spelling
            if name.len() > 1 && name.starts_with('0') { return None };
            return name.parse::<u8>().ok()
                .and_then(|n| Reg::try_from(n).ok());
        }

        match name {
            "s8" => Some(reg_consts::FP),
            _ => REG_NAMES.iter()
                .position(|&n| n == name)
                .map(|i| Reg(i as u8))
        }
    }
}
impl std::fmt::Display for Reg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "${}", self.name())
    }
}
impl From<Reg> for usize {
    // Used for indexing the reg file in [`crate::sim::mem::RegFile`].
    fn from(value: Reg) -> Self {
        usize::from(value.0)
    }
}
impl TryFrom<u8> for Reg {
    type Error = TryFromIntError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0..=31 => Ok(Reg(value)),
            // HACKy, but there's no other way to create this error
            _     => u8::try_from(256).map(|_| unreachable!("should've been TryFromIntError")),
        }
    }
}

/// A value representing a signed offset or a signed immediate value.
///
/// `N` indicates the maximum bit size of this offset/immediate value.
///
/// ## Examples
///
/// `IOffset<16>` is used to represent the sign-extended immediate of
/// arithmetic, load/store, and branch instructions:
///
/// ```text
/// addi $t0, $t0, -1
///                ~~
/// lw $t0, 8($sp)
///         ~
/// ```
pub type IOffset<const N: u32> = Offset<i32, N>;
/// A value representing an unsigned offset or an unsigned immediate value.
///
/// ## Examples
///
/// `UOffset<16>` is used to represent the zero-extended immediate of
/// `andi`, `ori`, `xori`, and `lui`:
///
/// ```text
/// ori $t0, $t0, 0xFFFF
///               ~~~~~~
/// ```
pub type UOffset<const N: u32> = Offset<u32, N>;
/// A shift amount (0-31).
///
/// ```text
/// sll $t0, $t1, 4
///               ~
/// ```
pub type Shamt = Offset<u32, 5>;
/// The 26-bit word index of a `j`/`jal` target.
pub type JumpTarget = Offset<u32, 26>;

/// A value representing an offset or an immediate value.
///
/// The `OFF` type represents the backing type of this offset.
/// The signedness of this offset type is dependent on the signedness of the `OFF` type:
/// - `Offset<i32, _>`: signed offset (also aliased as [`IOffset`])
/// - `Offset<u32, _>`: unsigned offset (also aliased as [`UOffset`])
///
/// `N` indicates the maximum bit size of this offset/immediate value.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub struct Offset<OFF, const N: u32>(OFF);

impl<OFF: std::fmt::Display, const N: u32> std::fmt::Display for Offset<OFF, N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}
impl<OFF: std::fmt::LowerHex, const N: u32> std::fmt::LowerHex for Offset<OFF, N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("0x")?;
        self.0.fmt(f)
    }
}

/// The errors that can result from calling [`Offset::new`].
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum OffsetNewErr {
    /// The provided offset cannot fit an unsigned integer of the given bitsize.
    CannotFitUnsigned(u32),
    /// The provided offset cannot fit a signed integer of the given bitsize.
    CannotFitSigned(u32)
}

impl std::fmt::Display for OffsetNewErr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OffsetNewErr::CannotFitUnsigned(n) => write!(f, "value is too big for unsigned {n}-bit integer"),
            OffsetNewErr::CannotFitSigned(n) => write!(f, "value is too big for signed {n}-bit integer"),
        }
    }
}
impl std::error::Error for OffsetNewErr {}
impl crate::err::Error for OffsetNewErr {
    fn help(&self) -> Option<std::borrow::Cow<str>> {
        use std::borrow::Cow;

        let error = match self {
            OffsetNewErr::CannotFitUnsigned(n) => Cow::from(format!("the range for an unsigned {n}-bit integer is [0, {}]", (1u64 << n) - 1)),
            OffsetNewErr::CannotFitSigned(n) => Cow::from(format!("the range for a signed {n}-bit integer is [{}, {}]", (-1i64) << (n - 1), (1i64 << (n - 1)) - 1)),
        };

        Some(error)
    }
}

mod offset_base {
    use super::OffsetNewErr;

    /// Any type that could store a value for [`Offset`].
    ///
    /// [`Offset`]: super::Offset
    pub trait OffsetBacking: Copy + Eq + TryFrom<i64> {
        /// How many bits are contained within this backing.
        ///
        /// For example, `u32` has 32 bits and thus BITS == 32.
        const BITS: u32;

        /// Truncates the given value to the provided `bit_size`.
        ///
        /// This bit size is always known to be less than or equal to BITS.
        fn truncate(self, bit_size: u32) -> Self;

        /// The error to raise if a given value doesn't match
        /// its provided value when truncated to a given `bit_size`.
        fn does_not_fit_error(bit_size: u32) -> OffsetNewErr;

        /// The raw bits of this value, as they would appear in a machine word.
        fn to_bits(self) -> u32;
    }

    macro_rules! impl_offset_backing_for_ints {
        ($($Int:ty: $Err:ident),*) => {
            $(
                impl OffsetBacking for $Int {
                    const BITS: u32 = Self::BITS;

                    fn truncate(self, bit_size: u32) -> Self {
                        match bit_size {
                            0 => 0,
                            _ => (self << (Self::BITS - bit_size)) >> (Self::BITS - bit_size)
                        }
                    }

                    fn does_not_fit_error(bit_size: u32) -> OffsetNewErr {
                        OffsetNewErr::$Err(bit_size)
                    }

                    fn to_bits(self) -> u32 {
                        self as u32
                    }
                }
            )*
        }
    }
    impl_offset_backing_for_ints! {
        u32: CannotFitUnsigned,
        i32: CannotFitSigned
    }
}

impl<OFF: OffsetBacking, const N: u32> Offset<OFF, N> {
    /// Creates a new offset value.
    /// This must fit within `N` bits of the representation, otherwise an error is raised.
    ///
    /// # Examples
    ///
    /// ```
    /// # use mips_ensemble::ast::Offset;
    /// #
    /// // Signed:
    /// assert!(Offset::<i32, 16>::new(-32768).is_ok());
    /// assert!(Offset::<i32, 16>::new(32767).is_ok());
    /// assert!(Offset::<i32, 16>::new(32768).is_err());
    ///
    /// // Unsigned:
    /// assert!(Offset::<u32, 5>::new(31).is_ok());
    /// assert!(Offset::<u32, 5>::new(32).is_err());
    /// ```
    ///
    /// # Panics
    ///
    /// This will panic if `N` is larger than the offset backing (e.g., for backing `u32`, larger than 32).
    ///
    /// ```should_panic
    /// # use mips_ensemble::ast::Offset;
    /// #
    /// let oh_no = Offset::<i32, 33>::new(18);
    /// ```
    pub fn new(n: OFF) -> Result<Self, OffsetNewErr> {
        assert!(N <= OFF::BITS, "bit size {N} exceeds size of backing ({})", OFF::BITS);
        match n == n.truncate(N) {
            true  => Ok(Offset(n)),
            false => Err(OFF::does_not_fit_error(N)),
        }
    }

    /// Creates a new offset from a literal of any size,
    /// failing if it does not fit within `N` bits.
    ///
    /// ```
    /// # use mips_ensemble::ast::{IOffset, UOffset};
    /// #
    /// assert!(IOffset::<16>::from_literal(-1).is_ok());
    /// assert!(UOffset::<16>::from_literal(-1).is_err());
    /// assert!(UOffset::<16>::from_literal(0xFFFF).is_ok());
    /// ```
    pub fn from_literal(n: i64) -> Result<Self, OffsetNewErr> {
        OFF::try_from(n)
            .map_err(|_| OFF::does_not_fit_error(N))
            .and_then(Self::new)
    }

    /// Creates a new offset by extending the first N bits of the integer,
    /// and discarding the rest.
    ///
    /// The extension is considered sign-extended if the offset's backing is signed,
    /// and zero-extended if the offset's backing is unsigned.
    ///
    /// # Examples
    ///
    /// ```
    /// # use mips_ensemble::ast::Offset;
    /// #
    /// let neg = Offset::<i32, 16>::new_trunc(0xFFFF);
    /// assert_eq!(neg.get(), -1);
    ///
    /// let pos = Offset::<u32, 16>::new_trunc(0x1_FFFF);
    /// assert_eq!(pos.get(), 0xFFFF);
    /// ```
    pub fn new_trunc(n: OFF) -> Self {
        assert!(N <= OFF::BITS, "bit size {N} exceeds size of backing ({})", OFF::BITS);
        Self(n.truncate(N))
    }

    /// Gets the value of the offset.
    pub fn get(&self) -> OFF {
        self.0
    }

    /// Gets the low `N` bits of the offset, as they appear in a machine word.
    pub fn bits(&self) -> u32 {
        self.0.to_bits() & (u32::MAX >> (32 - N))
    }
}

/// A label.
///
/// This struct stores the name of the label (accessible by the `name` field)
/// and the source code span indicating where the label is located in the source line.
///
/// # Examples
/// ```text
/// main:
/// ~~~~
///     li $t0, 10
/// loop:
/// ~~~~
///     addi $t0, $t0, -1
///     bgtz $t0, loop
///               ~~~~
///     j end
///       ~~~
/// ```
#[derive(Clone, PartialEq, Eq, Hash, Debug, Default)]
pub struct Label {
    /// The label's identifier
    pub name: String,

    /// The start of the label in the source line.
    ///
    /// Since name stores the length of the string,
    /// we don't need to store the whole span.
    start: usize
}
impl Label {
    /// Creates a new label.
    pub fn new(name: String, span: std::ops::Range<usize>) -> Self {
        debug_assert_eq!(span.start + name.len(), span.end, "span should have the same length as name");
        Label { name, start: span.start }
    }
    /// Returns the span of the label in the source line.
    pub fn span(&self) -> std::ops::Range<usize> {
        self.start .. (self.start + self.name.len())
    }
}
impl std::fmt::Display for Label {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.name.fmt(f)
    }
}
