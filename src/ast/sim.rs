//! This module is used for holding simulation instructions ([`SimInstr`]),
//! which are decoded machine words that can be directly executed by the simulator.
//!
//! Every machine word is 32 bits, laid out as follows:
//!
//! | format    | 31-26  | 25-21 | 20-16 | 15-11 | 10-6  | 5-0   |
//! |-----------|--------|-------|-------|-------|-------|-------|
//! | register  | 0      | rs    | rt    | rd    | shamt | funct |
//! | immediate | opcode | rs    | rt    | imm16 (15-0)         |||
//! | jump      | opcode | target (25-0)                     |||||
//!
//! [`SimInstr::encode`] produces a word from an instruction
//! and [`SimInstr::decode`] recovers the instruction from a word.
//!
//! ```
//! use mips_ensemble::ast::sim::{R3Op, SimInstr};
//! use mips_ensemble::ast::reg_consts::{T0, T1, T2};
//!
//! let add = SimInstr::R3(R3Op::Add, T0, T1, T2);
//! assert_eq!(add.encode(), 0x012A4020);
//! assert_eq!(SimInstr::decode(0x012A4020).unwrap(), add);
//! ```

use crate::ast::{IOffset, JumpTarget, Reg, Shamt, UOffset};
use crate::sim::SimErr;

const OP_SPECIAL: u32 = 0x00;
const OP_REGIMM: u32 = 0x01;
const OP_LUI: u32 = 0x0F;

const FUNCT_JR: u32 = 0x08;
const FUNCT_JALR: u32 = 0x09;
const FUNCT_SYSCALL: u32 = 0x0C;
/// Variable shifts sit 4 above their immediate-amount counterparts.
const FUNCT_SHIFTV_OFFSET: u32 = 0x04;

macro_rules! op_enum {
    (
        $(#[$m:meta])*
        $Type:ident($field:literal) {
            $($name:ident = $code:literal => $mnemonic:literal),+ $(,)?
        }
    ) => {
        $(#[$m])*
        #[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
        pub enum $Type {
            $(
                #[allow(missing_docs)]
                $name
            ),+
        }
        impl $Type {
            /// Every operation of this kind.
            pub const ALL: &'static [$Type] = &[$(Self::$name),+];

            #[doc = concat!("The ", $field, " field that selects this operation.")]
            pub fn code(self) -> u32 {
                match self {
                    $(Self::$name => $code),+
                }
            }

            #[doc = concat!("Looks up the operation selected by the given ", $field, " field.")]
            pub fn from_code(code: u32) -> Option<Self> {
                match code {
                    $($code => Some(Self::$name)),+,
                    _ => None
                }
            }

            /// The assembly mnemonic of this operation.
            pub fn mnemonic(self) -> &'static str {
                match self {
                    $(Self::$name => $mnemonic),+
                }
            }
        }
        impl std::fmt::Display for $Type {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.mnemonic())
            }
        }
    }
}

op_enum! {
    /// Three-register operations (`op rd, rs, rt`).
    R3Op("funct") {
        Add  = 0x20 => "add",
        Addu = 0x21 => "addu",
        Sub  = 0x22 => "sub",
        Subu = 0x23 => "subu",
        And  = 0x24 => "and",
        Or   = 0x25 => "or",
        Xor  = 0x26 => "xor",
        Nor  = 0x27 => "nor",
        Seq  = 0x28 => "seq",
        Slt  = 0x2A => "slt",
        Sltu = 0x2B => "sltu",
    }
}
op_enum! {
    /// Shift operations.
    ///
    /// The code is the funct of the immediate-amount form (`sll`, `srl`, `sra`).
    /// The variable-amount forms (`sllv`, `srlv`, `srav`) use the same operations
    /// through [`SimInstr::ShiftV`].
    ShiftOp("funct") {
        Sll = 0x00 => "sll",
        Srl = 0x02 => "srl",
        Sra = 0x03 => "sra",
    }
}
op_enum! {
    /// Register-immediate arithmetic and logic operations (`op rt, rs, imm`).
    ImmOp("opcode") {
        Addi  = 0x08 => "addi",
        Addiu = 0x09 => "addiu",
        Slti  = 0x0A => "slti",
        Sltiu = 0x0B => "sltiu",
        Andi  = 0x0C => "andi",
        Ori   = 0x0D => "ori",
        Xori  = 0x0E => "xori",
    }
}
op_enum! {
    /// Load and store operations (`op rt, offset(base)`).
    MemOp("opcode") {
        Lb  = 0x20 => "lb",
        Lh  = 0x21 => "lh",
        Lw  = 0x23 => "lw",
        Lbu = 0x24 => "lbu",
        Lhu = 0x25 => "lhu",
        Sb  = 0x28 => "sb",
        Sh  = 0x29 => "sh",
        Sw  = 0x2B => "sw",
    }
}
op_enum! {
    /// Two-register branches (`op rs, rt, label`).
    Branch2Op("opcode") {
        Beq = 0x04 => "beq",
        Bne = 0x05 => "bne",
    }
}
op_enum! {
    /// Absolute jumps (`op label`).
    JumpOp("opcode") {
        J   = 0x02 => "j",
        Jal = 0x03 => "jal",
    }
}
op_enum! {
    /// Moves to and from the HI/LO registers.
    ///
    /// `mfhi`/`mflo` write the `rd` field, `mthi`/`mtlo` read the `rs` field.
    HiLoOp("funct") {
        Mfhi = 0x10 => "mfhi",
        Mthi = 0x11 => "mthi",
        Mflo = 0x12 => "mflo",
        Mtlo = 0x13 => "mtlo",
    }
}
op_enum! {
    /// Multiply and divide (`op rs, rt`), which write HI and LO.
    MulDivOp("funct") {
        Mult  = 0x18 => "mult",
        Multu = 0x19 => "multu",
        Div   = 0x1A => "div",
        Divu  = 0x1B => "divu",
    }
}

/// One-register branches, which compare a register against zero (`op rs, label`).
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum Branch1Op {
    /// Branch if less than or equal to zero.
    Blez,
    /// Branch if greater than zero.
    Bgtz,
    /// Branch if less than zero.
    Bltz,
    /// Branch if greater than or equal to zero.
    Bgez
}
impl Branch1Op {
    /// Every operation of this kind.
    pub const ALL: &'static [Branch1Op] = &[Self::Blez, Self::Bgtz, Self::Bltz, Self::Bgez];

    /// The opcode of this branch and the value held in its `rt` field.
    ///
    /// `bltz` and `bgez` share an opcode and are distinguished by `rt`.
    pub fn code(self) -> (u32, u32) {
        match self {
            Branch1Op::Blez => (0x06, 0),
            Branch1Op::Bgtz => (0x07, 0),
            Branch1Op::Bltz => (OP_REGIMM, 0),
            Branch1Op::Bgez => (OP_REGIMM, 1),
        }
    }

    /// The assembly mnemonic of this operation.
    pub fn mnemonic(self) -> &'static str {
        match self {
            Branch1Op::Blez => "blez",
            Branch1Op::Bgtz => "bgtz",
            Branch1Op::Bltz => "bltz",
            Branch1Op::Bgez => "bgez",
        }
    }

    /// Whether the branch is taken for the given register value.
    pub fn test(self, value: u32) -> bool {
        let value = value as i32;
        match self {
            Branch1Op::Blez => value <= 0,
            Branch1Op::Bgtz => value > 0,
            Branch1Op::Bltz => value < 0,
            Branch1Op::Bgez => value >= 0,
        }
    }
}
impl std::fmt::Display for Branch1Op {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.mnemonic())
    }
}

impl ImmOp {
    /// Whether this operation zero-extends its immediate (rather than sign-extending it).
    pub fn zero_extends(self) -> bool {
        matches!(self, ImmOp::Andi | ImmOp::Ori | ImmOp::Xori)
    }

    /// Extends a raw 16-bit immediate to 32 bits,
    /// according to how this operation treats its immediate.
    pub fn extend(self, imm: u16) -> u32 {
        match self.zero_extends() {
            true  => u32::from(imm),
            false => imm as i16 as i32 as u32,
        }
    }
}
impl MemOp {
    /// Whether this operation writes to memory.
    pub fn is_store(self) -> bool {
        matches!(self, MemOp::Sb | MemOp::Sh | MemOp::Sw)
    }
}

/// An executable instruction, decoded from a machine word.
///
/// Each variant is one format category and carries the fields of that format
/// (register operands are listed in the order they are written in assembly).
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum SimInstr {
    /// `op rd, rs, rt`
    R3(R3Op, Reg, Reg, Reg),
    /// `op rd, rt, shamt`
    Shift(ShiftOp, Reg, Reg, Shamt),
    /// `op rd, rt, rs` (shift `rt` by the low 5 bits of `rs`)
    ShiftV(ShiftOp, Reg, Reg, Reg),
    /// `op rt, rs, imm` (the immediate is kept as its raw 16 bits, see [`ImmOp::extend`])
    Imm(ImmOp, Reg, Reg, u16),
    /// `lui rt, imm`
    Lui(Reg, UOffset<16>),
    /// `op rt, offset(base)`
    Mem(MemOp, Reg, Reg, IOffset<16>),
    /// `op rs, rt, offset` (offset in words from the next instruction)
    Branch2(Branch2Op, Reg, Reg, IOffset<16>),
    /// `op rs, offset` (offset in words from the next instruction)
    Branch1(Branch1Op, Reg, IOffset<16>),
    /// `op target`
    Jump(JumpOp, JumpTarget),
    /// `jr rs`
    Jr(Reg),
    /// `jalr rd, rs`
    Jalr(Reg, Reg),
    /// `mfhi rd`, `mflo rd`, `mthi rs`, `mtlo rs`
    HiLo(HiLoOp, Reg),
    /// `op rs, rt`
    MulDiv(MulDivOp, Reg, Reg),
    /// `syscall`
    Syscall
}

fn r_word(rs: Reg, rt: Reg, rd: Reg, shamt: u32, funct: u32) -> u32 {
    let [rs, rt, rd] = [rs, rt, rd].map(|r| u32::from(r.reg_no()));
    (OP_SPECIAL << 26) | (rs << 21) | (rt << 16) | (rd << 11) | ((shamt & 0x1F) << 6) | (funct & 0x3F)
}
fn i_word(opcode: u32, rs: Reg, rt: u32, imm: u32) -> u32 {
    (opcode << 26) | (u32::from(rs.reg_no()) << 21) | ((rt & 0x1F) << 16) | (imm & 0xFFFF)
}
fn reg_field(word: u32, shift: u32) -> Reg {
    Reg(((word >> shift) & 0x1F) as u8)
}

impl SimInstr {
    /// Encodes this instruction into its machine word.
    pub fn encode(&self) -> u32 {
        use crate::ast::reg_consts::ZERO;

        match *self {
            SimInstr::R3(op, rd, rs, rt)            => r_word(rs, rt, rd, 0, op.code()),
            SimInstr::Shift(op, rd, rt, shamt)      => r_word(ZERO, rt, rd, shamt.bits(), op.code()),
            SimInstr::ShiftV(op, rd, rt, rs)        => r_word(rs, rt, rd, 0, op.code() + FUNCT_SHIFTV_OFFSET),
            SimInstr::Imm(op, rt, rs, imm)          => i_word(op.code(), rs, u32::from(rt.reg_no()), u32::from(imm)),
            SimInstr::Lui(rt, imm)                  => i_word(OP_LUI, ZERO, u32::from(rt.reg_no()), imm.bits()),
            SimInstr::Mem(op, rt, base, off)        => i_word(op.code(), base, u32::from(rt.reg_no()), off.bits()),
            SimInstr::Branch2(op, rs, rt, off)      => i_word(op.code(), rs, u32::from(rt.reg_no()), off.bits()),
            SimInstr::Branch1(op, rs, off)          => {
                let (opcode, rt) = op.code();
                i_word(opcode, rs, rt, off.bits())
            },
            SimInstr::Jump(op, target)              => (op.code() << 26) | target.bits(),
            SimInstr::Jr(rs)                        => r_word(rs, ZERO, ZERO, 0, FUNCT_JR),
            SimInstr::Jalr(rd, rs)                  => r_word(rs, ZERO, rd, 0, FUNCT_JALR),
            SimInstr::HiLo(op @ (HiLoOp::Mfhi | HiLoOp::Mflo), rd) => r_word(ZERO, ZERO, rd, 0, op.code()),
            SimInstr::HiLo(op, rs)                  => r_word(rs, ZERO, ZERO, 0, op.code()),
            SimInstr::MulDiv(op, rs, rt)            => r_word(rs, rt, ZERO, 0, op.code()),
            SimInstr::Syscall                       => r_word(ZERO, ZERO, ZERO, 0, FUNCT_SYSCALL),
        }
    }

    /// Decodes a machine word into an instruction.
    ///
    /// Fields which the selected instruction doesn't use are ignored.
    /// This fails with [`SimErr::UnknownInstruction`] if the opcode
    /// (or, for register format, the function code) does not select an instruction.
    pub fn decode(word: u32) -> Result<Self, SimErr> {
        let opcode = word >> 26;
        let rs = reg_field(word, 21);
        let rt = reg_field(word, 16);
        let rd = reg_field(word, 11);
        let shamt = Shamt::new_trunc(word >> 6);
        let funct = word & 0x3F;
        let imm = (word & 0xFFFF) as u16;
        let simm = IOffset::<16>::new_trunc(i32::from(imm as i16));

        let instr = match opcode {
            OP_SPECIAL => match funct {
                FUNCT_JR => SimInstr::Jr(rs),
                FUNCT_JALR => SimInstr::Jalr(rd, rs),
                FUNCT_SYSCALL => SimInstr::Syscall,
                f if f & !0b011 == FUNCT_SHIFTV_OFFSET => match ShiftOp::from_code(f - FUNCT_SHIFTV_OFFSET) {
                    Some(op) => SimInstr::ShiftV(op, rd, rt, rs),
                    None => return Err(SimErr::UnknownInstruction(word)),
                },
                f => if let Some(op) = ShiftOp::from_code(f) {
                    SimInstr::Shift(op, rd, rt, shamt)
                } else if let Some(op) = R3Op::from_code(f) {
                    SimInstr::R3(op, rd, rs, rt)
                } else if let Some(op) = HiLoOp::from_code(f) {
                    match op {
                        HiLoOp::Mfhi | HiLoOp::Mflo => SimInstr::HiLo(op, rd),
                        HiLoOp::Mthi | HiLoOp::Mtlo => SimInstr::HiLo(op, rs),
                    }
                } else if let Some(op) = MulDivOp::from_code(f) {
                    SimInstr::MulDiv(op, rs, rt)
                } else {
                    return Err(SimErr::UnknownInstruction(word));
                }
            },
            OP_REGIMM => match rt.reg_no() {
                0 => SimInstr::Branch1(Branch1Op::Bltz, rs, simm),
                1 => SimInstr::Branch1(Branch1Op::Bgez, rs, simm),
                _ => return Err(SimErr::UnknownInstruction(word)),
            },
            0x06 => SimInstr::Branch1(Branch1Op::Blez, rs, simm),
            0x07 => SimInstr::Branch1(Branch1Op::Bgtz, rs, simm),
            OP_LUI => SimInstr::Lui(rt, UOffset::new_trunc(u32::from(imm))),
            op => if let Some(op) = JumpOp::from_code(op) {
                SimInstr::Jump(op, JumpTarget::new_trunc(word))
            } else if let Some(op) = Branch2Op::from_code(op) {
                SimInstr::Branch2(op, rs, rt, simm)
            } else if let Some(op) = ImmOp::from_code(op) {
                SimInstr::Imm(op, rt, rs, imm)
            } else if let Some(op) = MemOp::from_code(op) {
                SimInstr::Mem(op, rt, rs, simm)
            } else {
                return Err(SimErr::UnknownInstruction(word));
            }
        };

        Ok(instr)
    }

    /// The assembly mnemonic of this instruction.
    pub fn mnemonic(&self) -> &'static str {
        match self {
            SimInstr::R3(op, ..)      => op.mnemonic(),
            SimInstr::Shift(op, ..)   => op.mnemonic(),
            SimInstr::ShiftV(op, ..)  => match op {
                ShiftOp::Sll => "sllv",
                ShiftOp::Srl => "srlv",
                ShiftOp::Sra => "srav",
            },
            SimInstr::Imm(op, ..)     => op.mnemonic(),
            SimInstr::Lui(..)         => "lui",
            SimInstr::Mem(op, ..)     => op.mnemonic(),
            SimInstr::Branch2(op, ..) => op.mnemonic(),
            SimInstr::Branch1(op, ..) => op.mnemonic(),
            SimInstr::Jump(op, ..)    => op.mnemonic(),
            SimInstr::Jr(..)          => "jr",
            SimInstr::Jalr(..)        => "jalr",
            SimInstr::HiLo(op, ..)    => op.mnemonic(),
            SimInstr::MulDiv(op, ..)  => op.mnemonic(),
            SimInstr::Syscall         => "syscall",
        }
    }
}
impl std::fmt::Display for SimInstr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let m = self.mnemonic();
        match *self {
            SimInstr::R3(_, rd, rs, rt)         => write!(f, "{m} {rd}, {rs}, {rt}"),
            SimInstr::Shift(_, rd, rt, shamt)   => write!(f, "{m} {rd}, {rt}, {shamt}"),
            SimInstr::ShiftV(_, rd, rt, rs)     => write!(f, "{m} {rd}, {rt}, {rs}"),
            SimInstr::Imm(op, rt, rs, imm)      => match op.zero_extends() {
                true  => write!(f, "{m} {rt}, {rs}, {imm:#x}"),
                false => write!(f, "{m} {rt}, {rs}, {}", imm as i16),
            },
            SimInstr::Lui(rt, imm)              => write!(f, "{m} {rt}, {imm:x}"),
            SimInstr::Mem(_, rt, base, off)     => write!(f, "{m} {rt}, {off}({base})"),
            SimInstr::Branch2(_, rs, rt, off)   => write!(f, "{m} {rs}, {rt}, {off}"),
            SimInstr::Branch1(_, rs, off)       => write!(f, "{m} {rs}, {off}"),
            SimInstr::Jump(_, target)           => write!(f, "{m} {:#x}", target.get() << 2),
            SimInstr::Jr(rs)                    => write!(f, "{m} {rs}"),
            SimInstr::Jalr(rd, rs)              => write!(f, "{m} {rd}, {rs}"),
            SimInstr::HiLo(_, reg)              => write!(f, "{m} {reg}"),
            SimInstr::MulDiv(_, rs, rt)         => write!(f, "{m} {rs}, {rt}"),
            SimInstr::Syscall                   => f.write_str(m),
        }
    }
}
