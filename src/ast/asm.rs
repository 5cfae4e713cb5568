//! This module holds the source-level representation of a line of assembly:
//! instructions ([`AsmInstr`]), directives ([`Directive`]), and statements ([`Stmt`]).
//!
//! It also holds the two static mnemonic tables:
//! - [`INSTR_TABLE`], mapping each real instruction to its [`InstrKind`] (format, opcode, funct)
//! - [`PSEUDO_TABLE`], mapping each pseudo-instruction to its [`PseudoOp`] (expansion rule)
//!
//! The two tables are disjoint.

use std::ops::Range;

use crate::ast::sim::{Branch1Op, Branch2Op, HiLoOp, ImmOp, JumpOp, MemOp, MulDivOp, R3Op, ShiftOp, SimInstr};
use crate::ast::{Label, Reg};

/// A kind of operand in an operand pattern.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum OperandKind {
    /// A register (`$t0`).
    Reg,
    /// An integer literal (`5`, `0x10`, `'a'`).
    Int,
    /// An identifier, used as a label reference (`loop`).
    Label,
    /// A base + offset memory operand (`4($sp)`).
    Mem,
}
impl std::fmt::Display for OperandKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OperandKind::Reg   => f.write_str("register"),
            OperandKind::Int   => f.write_str("integer"),
            OperandKind::Label => f.write_str("label"),
            OperandKind::Mem   => f.write_str("offset(register)"),
        }
    }
}

/// The format category of a real instruction.
///
/// This determines the operand pattern expected in assembly
/// and how those operands are laid out in the machine word.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum Format {
    /// `op rd, rs, rt`
    ThreeReg,
    /// `op rd, rt, shamt`
    Shift,
    /// `op rd, rt, rs`
    ShiftVariable,
    /// `op rt, rs, imm`
    ImmArith,
    /// `op rt, imm`
    LoadUpper,
    /// `op rt, offset(base)`
    LoadStore,
    /// `op rs, rt, label`
    Branch2,
    /// `op rs, label`
    Branch1,
    /// `op label`
    Jump,
    /// `op`
    NoOperand,
    /// `op rs`
    JumpReg,
    /// `op rd` or `op rs`
    HiLoMove,
    /// `op rs, rt`
    MulDiv,
}
impl Format {
    /// The operands (separated by commas) that this format requires.
    pub fn pattern(self) -> &'static [OperandKind] {
        use OperandKind::*;

        match self {
            Format::ThreeReg      => &[Reg, Reg, Reg],
            Format::Shift         => &[Reg, Reg, Int],
            Format::ShiftVariable => &[Reg, Reg, Reg],
            Format::ImmArith      => &[Reg, Reg, Int],
            Format::LoadUpper     => &[Reg, Int],
            Format::LoadStore     => &[Reg, Mem],
            Format::Branch2       => &[Reg, Reg, Label],
            Format::Branch1       => &[Reg, Label],
            Format::Jump          => &[Label],
            Format::NoOperand     => &[],
            Format::JumpReg       => &[Reg],
            Format::HiLoMove      => &[Reg],
            Format::MulDiv        => &[Reg, Reg],
        }
    }
}

/// The descriptor of a real instruction.
///
/// Each variant is a format category, carrying the operation within that category.
/// [`InstrKind::format`], [`InstrKind::opcode`], and [`InstrKind::funct`]
/// describe how the instruction is laid out in its machine word.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
#[allow(missing_docs)]
pub enum InstrKind {
    R3(R3Op),
    Shift(ShiftOp),
    ShiftV(ShiftOp),
    Imm(ImmOp),
    Lui,
    Mem(MemOp),
    Branch2(Branch2Op),
    Branch1(Branch1Op),
    Jump(JumpOp),
    Syscall,
    Jr,
    Jalr,
    HiLo(HiLoOp),
    MulDiv(MulDivOp),
}
impl InstrKind {
    /// The format category of this instruction.
    pub fn format(self) -> Format {
        match self {
            InstrKind::R3(_)      => Format::ThreeReg,
            InstrKind::Shift(_)   => Format::Shift,
            InstrKind::ShiftV(_)  => Format::ShiftVariable,
            InstrKind::Imm(_)     => Format::ImmArith,
            InstrKind::Lui        => Format::LoadUpper,
            InstrKind::Mem(_)     => Format::LoadStore,
            InstrKind::Branch2(_) => Format::Branch2,
            InstrKind::Branch1(_) => Format::Branch1,
            InstrKind::Jump(_)    => Format::Jump,
            InstrKind::Syscall    => Format::NoOperand,
            InstrKind::Jr         => Format::JumpReg,
            InstrKind::Jalr       => Format::JumpReg,
            InstrKind::HiLo(_)    => Format::HiLoMove,
            InstrKind::MulDiv(_)  => Format::MulDiv,
        }
    }

    /// The 6-bit primary opcode of this instruction.
    pub fn opcode(self) -> u32 {
        self.template().encode() >> 26
    }

    /// The 6-bit function code of this instruction, if it is register format.
    pub fn funct(self) -> Option<u32> {
        match self.opcode() {
            0 => Some(self.template().encode() & 0x3F),
            _ => None
        }
    }

    /// This instruction with all of its operands zeroed.
    fn template(self) -> SimInstr {
        use crate::ast::reg_consts::ZERO;
        use crate::ast::{IOffset, JumpTarget, Shamt, UOffset};

        match self {
            InstrKind::R3(op)      => SimInstr::R3(op, ZERO, ZERO, ZERO),
            InstrKind::Shift(op)   => SimInstr::Shift(op, ZERO, ZERO, Shamt::new_trunc(0)),
            InstrKind::ShiftV(op)  => SimInstr::ShiftV(op, ZERO, ZERO, ZERO),
            InstrKind::Imm(op)     => SimInstr::Imm(op, ZERO, ZERO, 0),
            InstrKind::Lui         => SimInstr::Lui(ZERO, UOffset::new_trunc(0)),
            InstrKind::Mem(op)     => SimInstr::Mem(op, ZERO, ZERO, IOffset::new_trunc(0)),
            InstrKind::Branch2(op) => SimInstr::Branch2(op, ZERO, ZERO, IOffset::new_trunc(0)),
            InstrKind::Branch1(op) => SimInstr::Branch1(op, ZERO, IOffset::new_trunc(0)),
            InstrKind::Jump(op)    => SimInstr::Jump(op, JumpTarget::new_trunc(0)),
            InstrKind::Syscall     => SimInstr::Syscall,
            InstrKind::Jr          => SimInstr::Jr(ZERO),
            InstrKind::Jalr        => SimInstr::Jalr(ZERO, ZERO),
            InstrKind::HiLo(op)    => SimInstr::HiLo(op, ZERO),
            InstrKind::MulDiv(op)  => SimInstr::MulDiv(op, ZERO, ZERO),
        }
    }
}

/// Mnemonics of every real instruction, and their descriptors.
pub static INSTR_TABLE: &[(&str, InstrKind)] = &[
    ("add",     InstrKind::R3(R3Op::Add)),
    ("addu",    InstrKind::R3(R3Op::Addu)),
    ("sub",     InstrKind::R3(R3Op::Sub)),
    ("subu",    InstrKind::R3(R3Op::Subu)),
    ("and",     InstrKind::R3(R3Op::And)),
    ("or",      InstrKind::R3(R3Op::Or)),
    ("xor",     InstrKind::R3(R3Op::Xor)),
    ("nor",     InstrKind::R3(R3Op::Nor)),
    ("seq",     InstrKind::R3(R3Op::Seq)),
    ("slt",     InstrKind::R3(R3Op::Slt)),
    ("sltu",    InstrKind::R3(R3Op::Sltu)),
    ("sll",     InstrKind::Shift(ShiftOp::Sll)),
    ("srl",     InstrKind::Shift(ShiftOp::Srl)),
    ("sra",     InstrKind::Shift(ShiftOp::Sra)),
    ("sllv",    InstrKind::ShiftV(ShiftOp::Sll)),
    ("srlv",    InstrKind::ShiftV(ShiftOp::Srl)),
    ("srav",    InstrKind::ShiftV(ShiftOp::Sra)),
    ("addi",    InstrKind::Imm(ImmOp::Addi)),
    ("addiu",   InstrKind::Imm(ImmOp::Addiu)),
    ("slti",    InstrKind::Imm(ImmOp::Slti)),
    ("sltiu",   InstrKind::Imm(ImmOp::Sltiu)),
    ("andi",    InstrKind::Imm(ImmOp::Andi)),
    ("ori",     InstrKind::Imm(ImmOp::Ori)),
    ("xori",    InstrKind::Imm(ImmOp::Xori)),
    ("lui",     InstrKind::Lui),
    ("lb",      InstrKind::Mem(MemOp::Lb)),
    ("lh",      InstrKind::Mem(MemOp::Lh)),
    ("lw",      InstrKind::Mem(MemOp::Lw)),
    ("lbu",     InstrKind::Mem(MemOp::Lbu)),
    ("lhu",     InstrKind::Mem(MemOp::Lhu)),
    ("sb",      InstrKind::Mem(MemOp::Sb)),
    ("sh",      InstrKind::Mem(MemOp::Sh)),
    ("sw",      InstrKind::Mem(MemOp::Sw)),
    ("beq",     InstrKind::Branch2(Branch2Op::Beq)),
    ("bne",     InstrKind::Branch2(Branch2Op::Bne)),
    ("blez",    InstrKind::Branch1(Branch1Op::Blez)),
    ("bgtz",    InstrKind::Branch1(Branch1Op::Bgtz)),
    ("bltz",    InstrKind::Branch1(Branch1Op::Bltz)),
    ("bgez",    InstrKind::Branch1(Branch1Op::Bgez)),
    ("j",       InstrKind::Jump(JumpOp::J)),
    ("jal",     InstrKind::Jump(JumpOp::Jal)),
    ("syscall", InstrKind::Syscall),
    ("jr",      InstrKind::Jr),
    ("jalr",    InstrKind::Jalr),
    ("mfhi",    InstrKind::HiLo(HiLoOp::Mfhi)),
    ("mthi",    InstrKind::HiLo(HiLoOp::Mthi)),
    ("mflo",    InstrKind::HiLo(HiLoOp::Mflo)),
    ("mtlo",    InstrKind::HiLo(HiLoOp::Mtlo)),
    ("mult",    InstrKind::MulDiv(MulDivOp::Mult)),
    ("multu",   InstrKind::MulDiv(MulDivOp::Multu)),
    ("div",     InstrKind::MulDiv(MulDivOp::Div)),
    ("divu",    InstrKind::MulDiv(MulDivOp::Divu)),
];

/// Looks up a real instruction by its mnemonic.
///
/// ```
/// use mips_ensemble::ast::asm::{lookup_instr, Format};
///
/// let add = lookup_instr("add").unwrap();
/// assert_eq!(add.format(), Format::ThreeReg);
/// assert_eq!(add.opcode(), 0x00);
/// assert_eq!(add.funct(), Some(0x20));
///
/// assert!(lookup_instr("move").is_none()); // pseudo-instruction
/// ```
pub fn lookup_instr(mnemonic: &str) -> Option<InstrKind> {
    INSTR_TABLE.iter()
        .find(|&&(name, _)| name == mnemonic)
        .map(|&(_, kind)| kind)
}

/// The ordered comparisons available to ordered-branch pseudo-instructions.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
#[allow(missing_docs)]
pub enum OrdCmp {
    Lt, Le, Gt, Ge
}

/// The descriptor of a pseudo-instruction (its expansion rule).
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum PseudoOp {
    /// `move rd, rs` ⇒ `add rd, rs, $zero`
    Move,
    /// `li rt, imm` ⇒ `addiu rt, $zero, imm` or `lui $at, hi` + `ori rt, $at, lo`
    Li,
    /// `la rt, label` ⇒ `lui $at, hi` + `ori rt, $at, lo`
    La,
    /// `abs rd, rs` ⇒ `sra $at, rs, 31` + `xor rd, rs, $at` + `subu rd, rd, $at`
    Abs,
    /// `neg rd, rs` ⇒ `sub rd, $zero, rs`
    Neg,
    /// `negu rd, rs` ⇒ `subu rd, $zero, rs`
    Negu,
    /// `not rd, rs` ⇒ `nor rd, rs, $zero`
    Not,
    /// `mul rd, rs, rt` ⇒ `mult rs, rt` + `mflo rd`
    Mul,
    /// `sgt rd, rs, rt` ⇒ `slt rd, rt, rs`
    Sgt,
    /// `sge rd, rs, rt` ⇒ `slt rd, rs, rt` + `xori rd, rd, 1`
    Sge,
    /// `blt`/`ble`/`bgt`/`bge rs, rt, label` ⇒ `slt $at, ...` + `beq`/`bne $at, $zero, label`
    OrdBranch(OrdCmp),
    /// `b label` ⇒ `beq $zero, $zero, label`
    B,
}
impl PseudoOp {
    /// The operands (separated by commas) that this pseudo-instruction requires.
    pub fn pattern(self) -> &'static [OperandKind] {
        use OperandKind::*;

        match self {
            PseudoOp::Move | PseudoOp::Abs | PseudoOp::Neg | PseudoOp::Negu | PseudoOp::Not => &[Reg, Reg],
            PseudoOp::Li  => &[Reg, Int],
            PseudoOp::La  => &[Reg, Label],
            PseudoOp::Mul | PseudoOp::Sgt | PseudoOp::Sge => &[Reg, Reg, Reg],
            PseudoOp::OrdBranch(_) => &[Reg, Reg, Label],
            PseudoOp::B   => &[Label],
        }
    }
}

/// Mnemonics of every pseudo-instruction, and their expansion rules.
pub static PSEUDO_TABLE: &[(&str, PseudoOp)] = &[
    ("move", PseudoOp::Move),
    ("li",   PseudoOp::Li),
    ("la",   PseudoOp::La),
    ("abs",  PseudoOp::Abs),
    ("neg",  PseudoOp::Neg),
    ("negu", PseudoOp::Negu),
    ("not",  PseudoOp::Not),
    ("mul",  PseudoOp::Mul),
    ("sgt",  PseudoOp::Sgt),
    ("sge",  PseudoOp::Sge),
    ("blt",  PseudoOp::OrdBranch(OrdCmp::Lt)),
    ("ble",  PseudoOp::OrdBranch(OrdCmp::Le)),
    ("bgt",  PseudoOp::OrdBranch(OrdCmp::Gt)),
    ("bge",  PseudoOp::OrdBranch(OrdCmp::Ge)),
    ("b",    PseudoOp::B),
];

/// Looks up a pseudo-instruction by its mnemonic.
pub fn lookup_pseudo(mnemonic: &str) -> Option<PseudoOp> {
    PSEUDO_TABLE.iter()
        .find(|&&(name, _)| name == mnemonic)
        .map(|&(_, op)| op)
}

/// An assembly instruction, before labels are resolved and pseudo-instructions are expanded.
#[derive(Debug, PartialEq, Eq, Hash, Clone)]
pub enum AsmInstr {
    /// A real instruction whose fields are all known.
    Sim(SimInstr),
    /// `beq`/`bne rs, rt, label`
    Branch2(Branch2Op, Reg, Reg, Label),
    /// `blez`/`bgtz`/`bltz`/`bgez rs, label`
    Branch1(Branch1Op, Reg, Label),
    /// `j`/`jal label`
    Jump(JumpOp, Label),
    /// A pseudo-instruction.
    Pseudo(PseudoInstr),
}

/// A pseudo-instruction, with its operands.
///
/// See [`PseudoOp`] for the expansion of each.
#[derive(Debug, PartialEq, Eq, Hash, Clone)]
#[allow(missing_docs)]
pub enum PseudoInstr {
    Move(Reg, Reg),
    Li(Reg, i64),
    La(Reg, Label),
    Abs(Reg, Reg),
    Neg(Reg, Reg),
    Negu(Reg, Reg),
    Not(Reg, Reg),
    Mul(Reg, Reg, Reg),
    Sgt(Reg, Reg, Reg),
    Sge(Reg, Reg, Reg),
    OrdBranch(OrdCmp, Reg, Reg, Label),
    B(Label),
    /// A load or store whose address is a label (`lw $t0, value`).
    ///
    /// This expands to `lui $at, hi` + `ori $at, $at, lo` + `op rt, 0($at)`
    /// and, unlike `la`, can refer to a label that is defined later.
    MemLabel(MemOp, Reg, Label),
}

/// An assembler directive.
#[derive(Debug, PartialEq, Eq, Hash, Clone)]
pub enum Directive {
    /// `.text`: Switch to assembling into the text segment.
    Text,
    /// `.data`: Switch to assembling into the data segment.
    Data,
    /// `.word`: Emit aligned 32-bit values.
    Word(Vec<u32>),
    /// `.half`: Emit aligned 16-bit values.
    Half(Vec<u16>),
    /// `.byte`: Emit bytes.
    Byte(Vec<u8>),
    /// `.ascii`: Emit the bytes of a string.
    Ascii(String),
    /// `.asciiz`: Emit the bytes of a string, followed by a NUL byte.
    Asciiz(String),
    /// `.space`: Skip over the given number of bytes.
    Space(u32),
    /// `.align`: Skip to the next multiple of `2^n`.
    Align(u32),
}
impl Directive {
    /// The name of this directive, as written in source.
    pub fn name(&self) -> &'static str {
        match self {
            Directive::Text      => ".text",
            Directive::Data      => ".data",
            Directive::Word(_)   => ".word",
            Directive::Half(_)   => ".half",
            Directive::Byte(_)   => ".byte",
            Directive::Ascii(_)  => ".ascii",
            Directive::Asciiz(_) => ".asciiz",
            Directive::Space(_)  => ".space",
            Directive::Align(_)  => ".align",
        }
    }
}

/// Either an instruction or a directive.
#[derive(Debug, PartialEq, Eq, Hash, Clone)]
pub enum StmtKind {
    #[allow(missing_docs)]
    Instr(AsmInstr),
    #[allow(missing_docs)]
    Directive(Directive)
}

/// One parsed line of assembly.
///
/// A line can have a label, a nucleus (an instruction or directive), both, or neither.
#[derive(Debug, PartialEq, Eq, Hash, Clone)]
pub struct Stmt {
    /// The label defined at the start of this line, if there is one.
    pub label: Option<Label>,
    /// The instruction or directive on this line, if there is one.
    pub nucleus: Option<StmtKind>,
    /// The span of the nucleus in the source line.
    pub span: Range<usize>
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::{lookup_instr, lookup_pseudo, Format, INSTR_TABLE, PSEUDO_TABLE};

    #[test]
    fn test_tables_disjoint() {
        let real: HashSet<_> = INSTR_TABLE.iter().map(|&(m, _)| m).collect();
        let pseudo: HashSet<_> = PSEUDO_TABLE.iter().map(|&(m, _)| m).collect();
        assert_eq!(real.len(), INSTR_TABLE.len(), "duplicate real mnemonic");
        assert_eq!(pseudo.len(), PSEUDO_TABLE.len(), "duplicate pseudo mnemonic");
        assert!(real.is_disjoint(&pseudo));
    }

    #[test]
    fn test_table_mnemonics_match_ops() {
        for &(name, kind) in INSTR_TABLE {
            assert_eq!(kind.template().mnemonic(), name);
        }
    }

    #[test]
    fn test_descriptors() {
        let sub = lookup_instr("sub").unwrap();
        assert_eq!((sub.format(), sub.opcode(), sub.funct()), (Format::ThreeReg, 0, Some(0x22)));

        let lw = lookup_instr("lw").unwrap();
        assert_eq!((lw.format(), lw.opcode(), lw.funct()), (Format::LoadStore, 0x23, None));

        let bgez = lookup_instr("bgez").unwrap();
        assert_eq!((bgez.format(), bgez.opcode(), bgez.funct()), (Format::Branch1, 0x01, None));

        let jal = lookup_instr("jal").unwrap();
        assert_eq!((jal.format(), jal.opcode(), jal.funct()), (Format::Jump, 0x03, None));

        let srav = lookup_instr("srav").unwrap();
        assert_eq!((srav.format(), srav.opcode(), srav.funct()), (Format::ShiftVariable, 0, Some(0x07)));

        assert!(lookup_instr("ADD").is_none());
        assert!(lookup_instr("bogus").is_none());
        assert!(lookup_pseudo("li").is_some());
        assert!(lookup_pseudo("add").is_none());
    }
}
