//! Assembling lines of assembly into machine words.
//!
//! Assembly happens one line at a time, directly into a [`Machine`]'s memory.
//! Because a line can refer to a label that has not been defined yet,
//! the assembler records a [`Fixup`] for every such reference, and writes a placeholder word.
//! Once the label is defined, every fixup referring to it is resolved
//! and the placeholder is rewritten in place.
//!
//! The assembler module notably consists of:
//! - [`Machine::assemble_line`]: The main function, which assembles one line of source.
//! - [`SymbolTable`]: a struct holding the defined labels and the pending fixups
//! - [`AsmErr`]: the error raised when a line cannot be assembled
//!
//! ```
//! use mips_ensemble::sim::Machine;
//! use mips_ensemble::sim::mem::TEXT_BASE;
//!
//! let mut machine = Machine::new(Default::default());
//! machine.assemble_line("    beq $t0, $t1, done").unwrap();
//! assert!(machine.has_unresolved_fixups());
//!
//! machine.assemble_line("    addi $t0, $t0, 1").unwrap();
//! machine.assemble_line("    addi $t0, $t0, 1").unwrap();
//! machine.assemble_line("done:").unwrap();
//! assert!(!machine.has_unresolved_fixups());
//!
//! // branch offset: (12 - 4) / 4 = 2
//! assert_eq!(machine.mem.get_word(TEXT_BASE) & 0xFFFF, 2);
//! ```
//!
//! [`Machine`]: crate::sim::Machine

use std::collections::HashMap;

use tracing::debug;

use crate::ast::asm::{AsmInstr, Directive, OrdCmp, PseudoInstr, Stmt, StmtKind};
use crate::ast::reg_consts::{AT, ZERO};
use crate::ast::sim::{Branch1Op, Branch2Op, HiLoOp, ImmOp, JumpOp, MulDivOp, R3Op, ShiftOp, SimInstr};
use crate::ast::{IOffset, JumpTarget, Label, OffsetNewErr, Reg, Shamt, UOffset};
use crate::err::ErrSpan;
use crate::parse::lex::{lex_line, Token};
use crate::parse::{parse_line, ParseErr, ParseErrKind};
use crate::sim::mem::Segment;
use crate::sim::Machine;

/// Kinds of errors that can occur from assembling given assembly code.
///
/// See [`AsmErr`] for this error type with span information included.
#[derive(Debug, PartialEq, Eq, Hash, Clone)]
pub enum AsmErrKind {
    /// The line could not be parsed.
    Parse(ParseErrKind),
    /// The label was already defined.
    LabelRedefined(String),
    /// The label has to be defined before it is used here.
    UndefinedLabel(String),
    /// The branch target is too far from the branch.
    BranchOutOfRange(OffsetNewErr),
    /// The branch or jump target is not word-aligned.
    MisalignedTarget(u32),
    /// The jump target is not in the same 256 MiB region as the jump.
    JumpOutOfRegion(u32),
    /// The segment has no room left for the emitted data.
    SegmentOverflow(Segment),
    /// The data cursor is not aligned for the emitted value.
    MisalignedData(u32),
    /// An instruction was assembled while in data mode.
    InstrInData,
    /// A data directive was assembled while in text mode.
    DataInText,
}
impl std::fmt::Display for AsmErrKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Parse(e)            => e.fmt(f),
            Self::LabelRedefined(l)   => write!(f, "label '{l}' was already defined"),
            Self::UndefinedLabel(l)   => write!(f, "label '{l}' is not defined"),
            Self::BranchOutOfRange(e) => write!(f, "branch target out of range: {e}"),
            Self::MisalignedTarget(a) => write!(f, "target address {a:#010x} is not word-aligned"),
            Self::JumpOutOfRegion(a)  => write!(f, "jump target {a:#010x} is outside of the current region"),
            Self::SegmentOverflow(s)  => write!(f, "{s} segment is full"),
            Self::MisalignedData(a)   => write!(f, "data address {a:#010x} is not aligned"),
            Self::InstrInData         => f.write_str("cannot assemble instruction in data segment"),
            Self::DataInText          => f.write_str("cannot assemble data directive in text segment"),
        }
    }
}

/// Error from assembling given assembly code.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct AsmErr {
    /// The kind of error.
    pub kind: AsmErrKind,
    /// The span in the source line associated with this error (if it came from a line).
    pub span: Option<ErrSpan>
}
impl AsmErr {
    /// Creates a new [`AsmErr`].
    pub fn new<E: Into<ErrSpan>>(kind: AsmErrKind, span: E) -> Self {
        AsmErr { kind, span: Some(span.into()) }
    }
    /// Creates a new [`AsmErr`] which doesn't point to any source.
    pub fn spanless(kind: AsmErrKind) -> Self {
        AsmErr { kind, span: None }
    }
}
impl From<ParseErr> for AsmErr {
    fn from(value: ParseErr) -> Self {
        AsmErr { kind: AsmErrKind::Parse(value.kind), span: Some(value.span) }
    }
}
impl std::fmt::Display for AsmErr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.kind.fmt(f)
    }
}
impl std::error::Error for AsmErr {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.kind {
            AsmErrKind::BranchOutOfRange(e) => Some(e),
            _ => None
        }
    }
}
impl crate::err::Error for AsmErr {
    fn span(&self) -> Option<ErrSpan> {
        self.span.clone()
    }

    fn help(&self) -> Option<std::borrow::Cow<str>> {
        match &self.kind {
            AsmErrKind::Parse(e)            => e.help(),
            AsmErrKind::LabelRedefined(_)   => Some("labels can only be defined once, try renaming this label".into()),
            AsmErrKind::UndefinedLabel(_)   => Some("la needs its label defined beforehand; a load/store with a label operand can refer ahead".into()),
            AsmErrKind::BranchOutOfRange(_) => Some("a branch reaches at most 32768 instructions in either direction; try jumping instead".into()),
            AsmErrKind::MisalignedTarget(_) => Some("instructions are always at word-aligned addresses; try adding .align 2 before this label".into()),
            AsmErrKind::JumpOutOfRegion(_)  => Some("j and jal keep the top 4 bits of the PC; try jr with the address in a register".into()),
            AsmErrKind::SegmentOverflow(s)  => Some(format!("the {s} segment spans {:#010x} to {:#010x}", s.range().start, s.range().end).into()),
            AsmErrKind::MisalignedData(_)   => Some("try adding an .align directive before this value".into()),
            AsmErrKind::InstrInData         => Some("add a .text directive before instructions".into()),
            AsmErrKind::DataInText          => Some("add a .data directive before data".into()),
        }
    }
}

/// The segment that assembled lines are written into.
#[derive(Debug, Default, PartialEq, Eq, Hash, Clone, Copy)]
pub enum Mode {
    /// Instructions are written into the text segment.
    #[default]
    Text,
    /// Data directives are written into the data segment.
    Data
}
impl Mode {
    /// The segment this mode writes into.
    pub fn segment(self) -> Segment {
        match self {
            Mode::Text => Segment::Text,
            Mode::Data => Segment::Data,
        }
    }
}

/// How to rewrite the word(s) at a fixup's address once its label is known.
///
/// This holds every field of the instruction(s) except for the label-dependent one.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum Patch {
    /// `beq`/`bne rs, rt, label` (one word).
    Branch2(Branch2Op, Reg, Reg),
    /// `blez`/`bgtz`/`bltz`/`bgez rs, label` (one word).
    Branch1(Branch1Op, Reg),
    /// `j`/`jal label` (one word).
    Jump(JumpOp),
    /// `lui $at, hi(label)` + `ori rd, $at, lo(label)` (two words).
    Address(Reg),
}
impl Patch {
    /// The number of words this patch covers.
    pub fn len(self) -> u32 {
        match self {
            Patch::Address(_) => 2,
            _ => 1
        }
    }

    /// The words to write before the label is known.
    fn placeholder(self) -> Vec<u32> {
        let zero_off = IOffset::new_trunc(0);
        match self {
            Patch::Branch2(op, rs, rt) => vec![SimInstr::Branch2(op, rs, rt, zero_off).encode()],
            Patch::Branch1(op, rs)     => vec![SimInstr::Branch1(op, rs, zero_off).encode()],
            Patch::Jump(op)            => vec![SimInstr::Jump(op, JumpTarget::new_trunc(0)).encode()],
            Patch::Address(rd)         => load_address(rd, 0).iter().map(SimInstr::encode).collect(),
        }
    }

    /// The words to write once the label is known,
    /// given the address of the first word and the address of the label.
    pub fn resolve(self, addr: u32, target: u32) -> Result<Vec<u32>, AsmErrKind> {
        let words = match self {
            Patch::Branch2(op, rs, rt) => vec![SimInstr::Branch2(op, rs, rt, branch_offset(addr, target)?).encode()],
            Patch::Branch1(op, rs)     => vec![SimInstr::Branch1(op, rs, branch_offset(addr, target)?).encode()],
            Patch::Jump(op)            => vec![SimInstr::Jump(op, jump_target(addr, target)?).encode()],
            Patch::Address(rd)         => load_address(rd, target).iter().map(SimInstr::encode).collect(),
        };
        Ok(words)
    }
}

/// Computes the offset (in words) from the instruction after the branch to the target.
fn branch_offset(addr: u32, target: u32) -> Result<IOffset<16>, AsmErrKind> {
    if target % 4 != 0 {
        return Err(AsmErrKind::MisalignedTarget(target));
    }
    let words = (i64::from(target) - i64::from(addr) - 4) / 4;
    IOffset::from_literal(words)
        .map_err(AsmErrKind::BranchOutOfRange)
}
/// Computes the 26-bit field of a jump to the target.
fn jump_target(addr: u32, target: u32) -> Result<JumpTarget, AsmErrKind> {
    if target % 4 != 0 {
        return Err(AsmErrKind::MisalignedTarget(target));
    }
    // the top 4 bits come from the PC after the jump
    if (target ^ addr.wrapping_add(4)) & 0xF000_0000 != 0 {
        return Err(AsmErrKind::JumpOutOfRegion(target));
    }
    Ok(JumpTarget::new_trunc(target >> 2))
}
/// `lui $at, hi` + `ori rd, $at, lo`
fn load_address(rd: Reg, value: u32) -> [SimInstr; 2] {
    [
        SimInstr::Lui(AT, UOffset::new_trunc(value >> 16)),
        SimInstr::Imm(ImmOp::Ori, rd, AT, value as u16),
    ]
}

/// A pending reference to a label that was not defined when it was assembled.
#[derive(Debug, PartialEq, Eq, Hash, Clone)]
pub struct Fixup {
    /// The address of the first placeholder word.
    pub addr: u32,
    /// The label this fixup is waiting on.
    pub label: String,
    /// How to rewrite the placeholder.
    pub patch: Patch
}
impl Fixup {
    /// Whether the given address is one of the placeholder words of this fixup.
    pub fn covers(&self, addr: u32) -> bool {
        (self.addr .. self.addr + 4 * self.patch.len()).contains(&addr)
    }
}

/// The symbol table, holding defined labels and pending fixups.
///
/// Labels are write-once: once a label is defined, it keeps its address
/// until the table is cleared.
///
/// Fixups are held in an arena and are referred to by index.
/// When a label is defined, exactly the fixups waiting on it are resolved and removed.
#[derive(Debug, Default, PartialEq, Eq, Clone)]
pub struct SymbolTable {
    /// A mapping from label to address.
    labels: HashMap<String, u32>,
    /// Pending fixups. Resolved fixups leave a `None` hole.
    fixups: Vec<Option<Fixup>>,
    /// A mapping from label to the indices of the fixups waiting on it.
    waiting: HashMap<String, Vec<usize>>,
}
impl SymbolTable {
    /// Creates a new, empty symbol table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Gets the address of a given label (if it exists).
    pub fn lookup_label(&self, label: &str) -> Option<u32> {
        self.labels.get(label).copied()
    }

    /// Gets a label at a given address (if one exists).
    ///
    /// If multiple labels share the address, the alphabetically first is returned.
    pub fn rev_lookup_label(&self, addr: u32) -> Option<&str> {
        self.labels.iter()
            .filter(|&(_, &a)| a == addr)
            .map(|(l, _)| l.as_str())
            .min()
    }

    /// Gets an iterable of the defined labels and their addresses, in address order.
    pub fn label_iter(&self) -> impl Iterator<Item = (&str, u32)> + '_ {
        let mut labels: Vec<_> = self.labels.iter()
            .map(|(l, &a)| (l.as_str(), a))
            .collect();
        labels.sort_by_key(|&(l, a)| (a, l));
        labels.into_iter()
    }

    /// Gets an iterable of the pending fixups.
    pub fn fixups(&self) -> impl Iterator<Item = &Fixup> + '_ {
        self.fixups.iter().flatten()
    }

    /// Finds the pending fixup whose placeholder covers the given address (if any).
    pub fn fixup_at(&self, addr: u32) -> Option<&Fixup> {
        self.fixups().find(|f| f.covers(addr))
    }

    /// Whether any fixup is still waiting on its label.
    pub fn has_unresolved(&self) -> bool {
        !self.waiting.is_empty()
    }

    /// Removes every label and fixup.
    pub fn clear(&mut self) {
        self.labels.clear();
        self.clear_fixups();
    }

    /// Removes every pending fixup, keeping the labels.
    pub fn clear_fixups(&mut self) {
        self.fixups.clear();
        self.waiting.clear();
    }

    fn waiting_on<'a>(&'a self, label: &str) -> impl Iterator<Item = &'a Fixup> + 'a {
        self.waiting.get(label)
            .into_iter()
            .flatten()
            .filter_map(move |&i| self.fixups.get(i)?.as_ref())
    }

    fn insert_label(&mut self, label: String, addr: u32) {
        debug!(%label, addr = format_args!("{addr:#010x}"), "label defined");
        self.labels.insert(label, addr);
    }

    fn push_fixup(&mut self, fixup: Fixup) {
        debug!(label = %fixup.label, addr = format_args!("{:#010x}", fixup.addr), "fixup recorded");
        let index = self.fixups.len();
        self.waiting.entry(fixup.label.clone())
            .or_default()
            .push(index);
        self.fixups.push(Some(fixup));
    }

    /// Removes every fixup waiting on this label.
    fn take_waiting(&mut self, label: &str) {
        for i in self.waiting.remove(label).unwrap_or_default() {
            if let Some(f) = self.fixups.get_mut(i).and_then(Option::take) {
                debug!(label = %f.label, addr = format_args!("{:#010x}", f.addr), "fixup resolved");
            }
        }
        // drop the arena once nothing is pending, so it doesn't grow forever
        if self.waiting.is_empty() {
            self.fixups.clear();
        }
    }
}

/// A piece of an expanded instruction.
enum Piece {
    /// A word whose fields are all known.
    Word(SimInstr),
    /// One or more words which depend on a label's address.
    Ref(Patch, Label),
}

impl AsmInstr {
    /// Expands this instruction into the real instruction(s) it assembles to.
    ///
    /// `la` is the only form that requires its label to be known here.
    /// Every other label reference is left as a [`Piece::Ref`].
    fn expand(&self, lookup: impl Fn(&str) -> Option<u32>) -> Result<Vec<Piece>, AsmErr> {
        use Piece::{Ref, Word};
        use SimInstr as S;

        let pieces = match self {
            AsmInstr::Sim(instr) => vec![Word(*instr)],
            AsmInstr::Branch2(op, rs, rt, label) => vec![Ref(Patch::Branch2(*op, *rs, *rt), label.clone())],
            AsmInstr::Branch1(op, rs, label)     => vec![Ref(Patch::Branch1(*op, *rs), label.clone())],
            AsmInstr::Jump(op, label)            => vec![Ref(Patch::Jump(*op), label.clone())],
            AsmInstr::Pseudo(pseudo) => match pseudo {
                &PseudoInstr::Move(rd, rs) => vec![Word(S::R3(R3Op::Add, rd, rs, ZERO))],
                &PseudoInstr::Li(rt, value) => match i16::try_from(value) {
                    Ok(imm) => vec![Word(S::Imm(ImmOp::Addiu, rt, ZERO, imm as u16))],
                    Err(_) => {
                        let [lui, ori] = load_address(rt, value as u32);
                        vec![Word(lui), Word(ori)]
                    }
                },
                PseudoInstr::La(rt, label) => {
                    let addr = lookup(&label.name)
                        .ok_or_else(|| AsmErr::new(AsmErrKind::UndefinedLabel(label.name.clone()), label.span()))?;
                    load_address(*rt, addr).map(Word).into()
                },
                &PseudoInstr::Abs(rd, rs) => vec![
                    Word(S::Shift(ShiftOp::Sra, AT, rs, Shamt::new_trunc(31))),
                    Word(S::R3(R3Op::Xor, rd, rs, AT)),
                    Word(S::R3(R3Op::Subu, rd, rd, AT)),
                ],
                &PseudoInstr::Neg(rd, rs)  => vec![Word(S::R3(R3Op::Sub, rd, ZERO, rs))],
                &PseudoInstr::Negu(rd, rs) => vec![Word(S::R3(R3Op::Subu, rd, ZERO, rs))],
                &PseudoInstr::Not(rd, rs)  => vec![Word(S::R3(R3Op::Nor, rd, rs, ZERO))],
                &PseudoInstr::Mul(rd, rs, rt) => vec![
                    Word(S::MulDiv(MulDivOp::Mult, rs, rt)),
                    Word(S::HiLo(HiLoOp::Mflo, rd)),
                ],
                &PseudoInstr::Sgt(rd, rs, rt) => vec![Word(S::R3(R3Op::Slt, rd, rt, rs))],
                &PseudoInstr::Sge(rd, rs, rt) => vec![
                    Word(S::R3(R3Op::Slt, rd, rs, rt)),
                    Word(S::Imm(ImmOp::Xori, rd, rd, 1)),
                ],
                PseudoInstr::OrdBranch(cmp, rs, rt, label) => {
                    // slt $at, a, b; then branch on whether $at is set
                    let (a, b, op) = match cmp {
                        OrdCmp::Lt => (rs, rt, Branch2Op::Bne),
                        OrdCmp::Ge => (rs, rt, Branch2Op::Beq),
                        OrdCmp::Gt => (rt, rs, Branch2Op::Bne),
                        OrdCmp::Le => (rt, rs, Branch2Op::Beq),
                    };
                    vec![
                        Word(S::R3(R3Op::Slt, AT, *a, *b)),
                        Ref(Patch::Branch2(op, AT, ZERO), label.clone()),
                    ]
                },
                PseudoInstr::B(label) => vec![Ref(Patch::Branch2(Branch2Op::Beq, ZERO, ZERO), label.clone())],
                PseudoInstr::MemLabel(op, rt, label) => vec![
                    Ref(Patch::Address(AT), label.clone()),
                    Word(S::Mem(*op, *rt, AT, IOffset::new_trunc(0))),
                ],
            },
        };

        Ok(pieces)
    }
}

impl Directive {
    /// The alignment (in bytes) the data cursor must have before this directive is emitted.
    fn alignment(&self) -> u32 {
        match self {
            Directive::Word(_)  => 4,
            Directive::Half(_)  => 2,
            Directive::Align(n) => 1 << n,
            _ => 1
        }
    }
}

/// Advances a cursor by `n` bytes, failing if it would go past the end of its segment.
fn advance(seg: Segment, cursor: u32, n: u32) -> Result<u32, AsmErrKind> {
    cursor.checked_add(n)
        .filter(|&end| end <= seg.range().end)
        .ok_or(AsmErrKind::SegmentOverflow(seg))
}
fn align_up(cursor: u32, align: u32) -> u32 {
    match cursor % align {
        0 => cursor,
        r => cursor.wrapping_add(align - r),
    }
}

/// Every change one line makes to a machine,
/// computed in full before any of it is applied.
struct LinePlan {
    /// A label defined by this line. Every fixup waiting on it is resolved.
    label: Option<(String, u32)>,
    /// Words to write, including rewritten placeholders.
    words: Vec<(u32, u32)>,
    bytes: Vec<(u32, u8)>,
    fixups: Vec<Fixup>,
    /// Words emitted into the text segment by this line.
    emitted: Vec<u32>,
    text_cursor: u32,
    data_cursor: u32,
    mode: Mode
}

impl Machine {
    /// Assembles one line of source code into the machine.
    ///
    /// This returns the words emitted into the text segment (which is empty for
    /// blank lines, label-only lines, and directives).
    /// Words that depend on a label that isn't defined yet are emitted as placeholders
    /// and are rewritten once the label is defined.
    ///
    /// If this fails, the machine is left exactly as it was before the call
    /// (no cursor movement, label definition, fixup change, or memory write).
    ///
    /// ```
    /// use mips_ensemble::sim::Machine;
    ///
    /// let mut machine = Machine::new(Default::default());
    /// assert_eq!(machine.assemble_line("add $t0, $t1, $t2").unwrap(), [0x012A4020]);
    /// assert_eq!(machine.assemble_line("li $t0, 0x12345678").unwrap(), [0x3C011234, 0x34285678]);
    /// assert!(machine.assemble_line("add $t0, $t1").is_err());
    /// ```
    pub fn assemble_line(&mut self, src: &str) -> Result<Vec<u32>, AsmErr> {
        self.assemble_tokens(&lex_line(src))
    }

    /// Assembles one line of already-tokenized source code into the machine.
    ///
    /// See [`Machine::assemble_line`].
    pub fn assemble_tokens(&mut self, tokens: &[Token]) -> Result<Vec<u32>, AsmErr> {
        let stmt = parse_line(tokens)?;
        self.assemble_stmt(&stmt)
    }

    /// Assembles one parsed line into the machine.
    ///
    /// See [`Machine::assemble_line`].
    pub fn assemble_stmt(&mut self, stmt: &Stmt) -> Result<Vec<u32>, AsmErr> {
        let plan = self.plan_stmt(stmt)?;
        Ok(self.commit(plan))
    }

    /// Defines a label at the given address, resolving every fixup waiting on it.
    ///
    /// This fails if the label is already defined, or if any fixup waiting on it
    /// cannot reach the address. If it fails, nothing is changed.
    pub fn define_label(&mut self, label: &str, addr: u32) -> Result<(), AsmErr> {
        let mut plan = self.new_plan();
        self.plan_label(&mut plan, label, addr)
            .map_err(AsmErr::spanless)?;
        self.commit(plan);
        Ok(())
    }

    /// Gets the address of a given label (if it exists).
    pub fn lookup_label(&self, label: &str) -> Option<u32> {
        self.sym.lookup_label(label)
    }

    /// Whether any emitted instruction is still waiting on a label to be defined.
    ///
    /// The machine refuses to execute while this is true.
    pub fn has_unresolved_fixups(&self) -> bool {
        self.sym.has_unresolved()
    }

    /// Writes a word at the text cursor and advances it, returning the address written.
    pub fn emit_text_word(&mut self, word: u32) -> Result<u32, AsmErr> {
        let addr = self.text_cursor;
        self.text_cursor = advance(Segment::Text, addr, 4).map_err(AsmErr::spanless)?;
        self.mem.set_word(addr, word);
        Ok(addr)
    }
    /// Writes a byte at the data cursor and advances it, returning the address written.
    pub fn emit_data_byte(&mut self, byte: u8) -> Result<u32, AsmErr> {
        self.emit_data(&[byte], 1)
    }
    /// Writes a halfword at the data cursor and advances it, returning the address written.
    ///
    /// This fails if the data cursor is not 2-byte aligned.
    pub fn emit_data_half(&mut self, half: u16) -> Result<u32, AsmErr> {
        self.emit_data(&half.to_be_bytes(), 2)
    }
    /// Writes a word at the data cursor and advances it, returning the address written.
    ///
    /// This fails if the data cursor is not 4-byte aligned.
    pub fn emit_data_word(&mut self, word: u32) -> Result<u32, AsmErr> {
        self.emit_data(&word.to_be_bytes(), 4)
    }
    /// Writes a NUL-terminated string at the data cursor and advances it, returning the address written.
    pub fn emit_data_asciiz(&mut self, s: &str) -> Result<u32, AsmErr> {
        let mut bytes = s.as_bytes().to_vec();
        bytes.push(0);
        self.emit_data(&bytes, 1)
    }
    fn emit_data(&mut self, bytes: &[u8], align: u32) -> Result<u32, AsmErr> {
        let addr = self.data_cursor;
        if addr % align != 0 {
            return Err(AsmErr::spanless(AsmErrKind::MisalignedData(addr)));
        }
        let len = u32::try_from(bytes.len()).map_err(|_| AsmErr::spanless(AsmErrKind::SegmentOverflow(Segment::Data)))?;
        self.data_cursor = advance(Segment::Data, addr, len).map_err(AsmErr::spanless)?;
        for (a, &b) in (addr..).zip(bytes) {
            self.mem.set_byte(a, b);
        }
        Ok(addr)
    }

    fn new_plan(&self) -> LinePlan {
        LinePlan {
            label: None,
            words: vec![],
            bytes: vec![],
            fixups: vec![],
            emitted: vec![],
            text_cursor: self.text_cursor,
            data_cursor: self.data_cursor,
            mode: self.mode
        }
    }

    /// Adds a label definition (and the rewrites of every fixup waiting on it) to the plan.
    fn plan_label(&self, plan: &mut LinePlan, label: &str, addr: u32) -> Result<(), AsmErrKind> {
        if self.sym.lookup_label(label).is_some() {
            return Err(AsmErrKind::LabelRedefined(label.to_string()));
        }

        for fixup in self.sym.waiting_on(label) {
            let words = fixup.patch.resolve(fixup.addr, addr)?;
            plan.words.extend((fixup.addr..).step_by(4).zip(words));
        }
        plan.label = Some((label.to_string(), addr));
        Ok(())
    }

    fn plan_stmt(&self, stmt: &Stmt) -> Result<LinePlan, AsmErr> {
        let mut plan = self.new_plan();
        let span = stmt.span.clone();

        // Data must be aligned before the label on its line binds.
        match (&stmt.nucleus, self.mode) {
            (Some(StmtKind::Instr(_)), Mode::Data) => return Err(AsmErr::new(AsmErrKind::InstrInData, span)),
            (Some(StmtKind::Directive(Directive::Text | Directive::Data)), _) => {},
            (Some(StmtKind::Directive(_)), Mode::Text) => return Err(AsmErr::new(AsmErrKind::DataInText, span)),
            (Some(StmtKind::Directive(d)), Mode::Data) => {
                let aligned = align_up(plan.data_cursor, d.alignment());
                advance(Segment::Data, aligned, 0).map_err(|e| AsmErr::new(e, span.clone()))?;
                plan.data_cursor = aligned;
            },
            (Some(StmtKind::Instr(_)), Mode::Text) | (None, _) => {},
        }

        if let Some(label) = &stmt.label {
            let addr = match self.mode {
                Mode::Text => plan.text_cursor,
                Mode::Data => plan.data_cursor,
            };
            self.plan_label(&mut plan, &label.name, addr)
                .map_err(|e| AsmErr::new(e, label.span()))?;
        }

        match &stmt.nucleus {
            Some(StmtKind::Instr(instr)) => self.plan_instr(&mut plan, instr)?,
            Some(StmtKind::Directive(d)) => plan_directive(&mut plan, d)
                .map_err(|e| AsmErr::new(e, span))?,
            None => {},
        }

        Ok(plan)
    }

    fn plan_instr(&self, plan: &mut LinePlan, instr: &AsmInstr) -> Result<(), AsmErr> {
        let new_label = plan.label.clone();
        let lookup = |name: &str| {
            self.sym.lookup_label(name)
                .or_else(|| new_label.as_ref().filter(|(l, _)| l == name).map(|&(_, a)| a))
        };

        let pieces = instr.expand(&lookup)?;

        let mut addr = plan.text_cursor;
        for piece in pieces {
            let words = match piece {
                Piece::Word(instr) => vec![instr.encode()],
                Piece::Ref(patch, label) => match lookup(&label.name) {
                    Some(target) => patch.resolve(addr, target)
                        .map_err(|e| AsmErr::new(e, label.span()))?,
                    None => {
                        plan.fixups.push(Fixup { addr, label: label.name, patch });
                        patch.placeholder()
                    }
                },
            };

            for word in words {
                let next = advance(Segment::Text, addr, 4)
                    .map_err(AsmErr::spanless)?;
                plan.words.push((addr, word));
                plan.emitted.push(word);
                addr = next;
            }
        }
        plan.text_cursor = addr;

        Ok(())
    }

    /// Applies a plan. This cannot fail.
    fn commit(&mut self, plan: LinePlan) -> Vec<u32> {
        let LinePlan { label, words, bytes, fixups, emitted, text_cursor, data_cursor, mode } = plan;

        if let Some((label, addr)) = label {
            self.sym.take_waiting(&label);
            self.sym.insert_label(label, addr);
        }
        for (addr, word) in words {
            self.mem.set_word(addr, word);
        }
        for (addr, byte) in bytes {
            self.mem.set_byte(addr, byte);
        }
        for fixup in fixups {
            self.sym.push_fixup(fixup);
        }
        self.text_cursor = text_cursor;
        self.data_cursor = data_cursor;
        self.mode = mode;

        emitted
    }
}

fn push_bytes(plan: &mut LinePlan, data: &[u8]) -> Result<(), AsmErrKind> {
    let start = plan.data_cursor;
    let len = u32::try_from(data.len()).map_err(|_| AsmErrKind::SegmentOverflow(Segment::Data))?;
    plan.data_cursor = advance(Segment::Data, start, len)?;
    plan.bytes.extend((start..).zip(data.iter().copied()));
    Ok(())
}
fn plan_directive(plan: &mut LinePlan, directive: &Directive) -> Result<(), AsmErrKind> {
    match directive {
        Directive::Text => plan.mode = Mode::Text,
        Directive::Data => plan.mode = Mode::Data,
        Directive::Word(ws) => {
            let data: Vec<_> = ws.iter().flat_map(|w| w.to_be_bytes()).collect();
            push_bytes(plan, &data)?;
        },
        Directive::Half(hs) => {
            let data: Vec<_> = hs.iter().flat_map(|h| h.to_be_bytes()).collect();
            push_bytes(plan, &data)?;
        },
        Directive::Byte(bs) => push_bytes(plan, bs)?,
        Directive::Ascii(s) => push_bytes(plan, s.as_bytes())?,
        Directive::Asciiz(s) => {
            let mut data = s.as_bytes().to_vec();
            data.push(0);
            push_bytes(plan, &data)?;
        },
        Directive::Space(n) => plan.data_cursor = advance(Segment::Data, plan.data_cursor, *n)?,
        // already aligned by plan_stmt
        Directive::Align(_) => {},
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use crate::ast::reg_consts::{AT, T0, T1};
    use crate::ast::sim::{Branch2Op, ImmOp, SimInstr};
    use crate::sim::mem::{Mem, Segment, DATA_BASE, DATA_LIMIT, TEXT_BASE};
    use crate::sim::Machine;

    use super::{AsmErrKind, Mode, Patch, SymbolTable};

    fn machine() -> Machine {
        Machine::new(Default::default())
    }
    fn assemble_all(m: &mut Machine, src: &str) {
        for line in src.lines() {
            m.assemble_line(line).unwrap_or_else(|e| panic!("failed to assemble {line:?}: {e}"));
        }
    }
    fn assert_asm_fail(m: &mut Machine, line: &str, kind: AsmErrKind) {
        assert_eq!(m.assemble_line(line).unwrap_err().kind, kind, "line: {line:?}");
    }
    fn text_word(m: &Machine, i: u32) -> u32 {
        m.mem.get_word(TEXT_BASE + 4 * i)
    }
    fn snapshot(m: &Machine) -> (Mem, SymbolTable, u32, u32, Mode) {
        (m.mem.clone(), m.sym.clone(), m.text_cursor(), m.data_cursor(), m.mode())
    }

    #[test]
    fn test_basic_encoding() {
        let mut m = machine();
        assert_eq!(m.assemble_line("add $t0, $t1, $t2").unwrap(), [0x012A4020]);
        assert_eq!(m.assemble_line("addi $t0, $zero, 5").unwrap(), [0x20080005]);
        assert!(m.assemble_line("").unwrap().is_empty());
        assert!(m.assemble_line("# nothing").unwrap().is_empty());
        assert_eq!(text_word(&m, 0), 0x012A4020);
        assert_eq!(text_word(&m, 1), 0x20080005);
        assert_eq!(m.text_cursor(), TEXT_BASE + 8);
    }

    #[test]
    fn test_forward_branch() {
        let mut m = machine();
        assemble_all(&mut m, "
            beq $t0, $t1, L
            nop_target: addi $t0, $t0, 1
            addi $t0, $t0, 1
        ");
        assert!(m.has_unresolved_fixups());
        assert_eq!(text_word(&m, 0) & 0xFFFF, 0);

        m.assemble_line("L:").unwrap();
        assert!(!m.has_unresolved_fixups());
        assert_eq!(m.lookup_label("L"), Some(TEXT_BASE + 12));
        assert_eq!(text_word(&m, 0), SimInstr::Branch2(Branch2Op::Beq, T0, T1, crate::ast::IOffset::new(2).unwrap()).encode());
    }

    #[test]
    fn test_backward_branch_and_jump() {
        let mut m = machine();
        assemble_all(&mut m, "
            loop: addi $t0, $t0, -1
            bgtz $t0, loop
            j loop
            jal end
            end: jr $ra
        ");
        assert_eq!(text_word(&m, 1) & 0xFFFF, 0xFFFE); // -2
        assert_eq!(text_word(&m, 2), (0x02 << 26) | (TEXT_BASE >> 2));
        assert_eq!(text_word(&m, 3), (0x03 << 26) | ((TEXT_BASE + 16) >> 2));
    }

    #[test]
    fn test_self_reference() {
        let mut m = machine();
        m.assemble_line("spin: b spin").unwrap();
        assert!(!m.has_unresolved_fixups());
        assert_eq!(text_word(&m, 0), 0x1000FFFF);
    }

    /// Assembling with a fixup must produce the same words as assembling with the label already known.
    #[test]
    fn test_fixup_matches_known_label() {
        const LINES: &[&str] = &[
            "beq $t0, $t1, target",
            "bne $a0, $zero, target",
            "blez $s0, target",
            "bgez $s1, target",
            "j target",
            "jal target",
            "blt $t0, $t1, target",
            "bge $t2, $t3, target",
            "b target",
            "lw $t0, target",
            "sb $t1, target",
        ];
        let mut rng = StdRng::seed_from_u64(0x5EED);

        for _ in 0..64 {
            let line = LINES[rng.gen_range(0..LINES.len())];
            let padding = rng.gen_range(0..64u32);
            let target = TEXT_BASE + 4 * rng.gen_range(0..256u32);

            // forward: reference first, then define
            let mut fwd = machine();
            for _ in 0..padding { fwd.emit_text_word(0).unwrap(); }
            let placeholder = fwd.assemble_line(line).unwrap();
            fwd.define_label("target", target).unwrap();
            let start = TEXT_BASE + 4 * padding;
            let fwd_words: Vec<_> = (0..placeholder.len() as u32).map(|i| fwd.mem.get_word(start + 4 * i)).collect();

            // known: define first, then reference
            let mut known = machine();
            known.define_label("target", target).unwrap();
            for _ in 0..padding { known.emit_text_word(0).unwrap(); }
            let known_words = known.assemble_line(line).unwrap();

            assert_eq!(fwd_words, known_words, "{line} (target {target:#x}, at {start:#x})");
        }
    }

    #[test]
    fn test_pseudo_expansions() {
        let mut m = machine();
        let words = |m: &mut Machine, line: &str| m.assemble_line(line).unwrap();

        assert_eq!(words(&mut m, "move $t0, $t1"), [0x01204020]);               // add $t0, $t1, $zero
        assert_eq!(words(&mut m, "li $t0, -1"), [0x2408FFFF]);                  // addiu $t0, $zero, -1
        assert_eq!(words(&mut m, "li $t0, 0x8000"), [0x3C010000, 0x34288000]);  // lui $at, 0; ori $t0, $at, 0x8000
        assert_eq!(words(&mut m, "li $t0, 0xFFFFFFFF"), [0x3C01FFFF, 0x3428FFFF]);
        assert_eq!(words(&mut m, "not $t0, $t1"), [0x01204027]);                // nor $t0, $t1, $zero
        assert_eq!(words(&mut m, "neg $t0, $t1"), [0x00094022]);                // sub $t0, $zero, $t1
        assert_eq!(words(&mut m, "mul $t0, $t1, $t2"), [0x012A0018, 0x00004012]);
        assert_eq!(words(&mut m, "sgt $t0, $t1, $t2"), [0x0149402A]);           // slt $t0, $t2, $t1
        assert_eq!(words(&mut m, "abs $t0, $t1").len(), 3);
        assert_eq!(words(&mut m, "sge $t0, $t1, $t2")[1], SimInstr::Imm(ImmOp::Xori, T0, T0, 1).encode());
    }

    #[test]
    fn test_la() {
        let mut m = machine();
        assert_asm_fail(&mut m, "la $a0, msg", AsmErrKind::UndefinedLabel("msg".to_string()));
        assert_eq!(m.text_cursor(), TEXT_BASE);

        assemble_all(&mut m, "
            .data
            pad: .byte 1, 2, 3
            msg: .asciiz \"hey\"
            .text
        ");
        assert_eq!(m.lookup_label("msg"), Some(DATA_BASE + 3));
        assert_eq!(m.assemble_line("la $a0, msg").unwrap(), [0x3C011000, 0x34240003]);
    }

    #[test]
    fn test_mem_label_fixup() {
        let mut m = machine();
        let placeholder = m.assemble_line("lw $t0, value").unwrap();
        assert_eq!(placeholder.len(), 3);
        assert!(m.has_unresolved_fixups());
        assert!(m.sym.fixup_at(TEXT_BASE + 4).is_some());
        assert!(m.sym.fixup_at(TEXT_BASE + 8).is_none());

        assemble_all(&mut m, "
            .data
            .byte 9
            value: .word 0x11223344
        ");
        assert!(!m.has_unresolved_fixups());
        // .word aligns the label to the next word
        assert_eq!(m.lookup_label("value"), Some(DATA_BASE + 4));
        assert_eq!(text_word(&m, 0), 0x3C011000);
        assert_eq!(text_word(&m, 1), SimInstr::Imm(ImmOp::Ori, AT, AT, 4).encode());
        assert_eq!(m.mem.get_word(DATA_BASE + 4), 0x11223344);
    }

    #[test]
    fn test_data_directives() {
        let mut m = machine();
        assemble_all(&mut m, r#"
            .data
            a: .half 1, -1
            b: .byte 'x'
            c: .word 7
            d: .ascii "ab"
            e: .space 5
            .align 3
            f: .byte 1
        "#);
        assert_eq!(m.lookup_label("a"), Some(DATA_BASE));
        assert_eq!(m.mem.get_word(DATA_BASE), 0x0001FFFF);
        assert_eq!(m.lookup_label("b"), Some(DATA_BASE + 4));
        assert_eq!(m.lookup_label("c"), Some(DATA_BASE + 8));
        assert_eq!(m.lookup_label("d"), Some(DATA_BASE + 12));
        assert_eq!(m.lookup_label("e"), Some(DATA_BASE + 14));
        assert_eq!(m.lookup_label("f"), Some(DATA_BASE + 24));
        assert_eq!(m.data_cursor(), DATA_BASE + 25);
        assert_eq!(m.mode(), Mode::Data);
    }

    #[test]
    fn test_mode_errors() {
        let mut m = machine();
        assert_asm_fail(&mut m, ".word 1", AsmErrKind::DataInText);
        m.assemble_line(".data").unwrap();
        assert_asm_fail(&mut m, "add $t0, $t0, $t0", AsmErrKind::InstrInData);
        assert_asm_fail(&mut m, "x: add $t0, $t0, $t0", AsmErrKind::InstrInData);
        assert_eq!(m.lookup_label("x"), None);
    }

    #[test]
    fn test_label_redefinition() {
        let mut m = machine();
        m.assemble_line("main: add $t0, $t0, $t0").unwrap();
        assert_asm_fail(&mut m, "main: add $t0, $t0, $t0", AsmErrKind::LabelRedefined("main".to_string()));
        assert_eq!(m.text_cursor(), TEXT_BASE + 4);
        assert_eq!(m.lookup_label("main"), Some(TEXT_BASE));

        assert_eq!(m.define_label("main", 0).unwrap_err().kind, AsmErrKind::LabelRedefined("main".to_string()));
    }

    #[test]
    fn test_failed_line_rolls_back() {
        let mut m = machine();
        m.assemble_line("beq $t0, $t1, far").unwrap();
        m.assemble_line(".data").unwrap();
        m.assemble_line(".byte 1").unwrap();

        // "far" would be misaligned for the pending branch
        let before = snapshot(&m);
        assert_asm_fail(&mut m, "far: .byte 2", AsmErrKind::MisalignedTarget(DATA_BASE + 1));
        assert_eq!(snapshot(&m), before);
        assert!(m.has_unresolved_fixups());
        assert_eq!(m.lookup_label("far"), None);

        // parse errors also leave everything untouched
        assert!(m.assemble_line("far: .byte 1000").is_err());
        assert_eq!(snapshot(&m), before);
    }

    #[test]
    fn test_branch_range() {
        let mut m = machine();
        m.assemble_line("beq $t0, $t1, far").unwrap();
        // (0x20000 - 4) / 4 = 32767, the furthest reachable
        let err = m.define_label("far", TEXT_BASE + 0x20004).unwrap_err();
        assert!(matches!(err.kind, AsmErrKind::BranchOutOfRange(_)));
        assert!(m.has_unresolved_fixups());
        m.define_label("far", TEXT_BASE + 0x20000).unwrap();
        assert_eq!(text_word(&m, 0) & 0xFFFF, 0x7FFF);

        let mut m = machine();
        m.define_label("back", TEXT_BASE - 0x20008).unwrap();
        assert!(matches!(
            m.assemble_line("bne $t0, $zero, back").unwrap_err().kind,
            AsmErrKind::BranchOutOfRange(_)
        ));
    }

    #[test]
    fn test_jump_region() {
        let mut m = machine();
        m.assemble_line("j data_label").unwrap();
        assert_eq!(
            m.define_label("data_label", DATA_BASE).unwrap_err().kind,
            AsmErrKind::JumpOutOfRegion(DATA_BASE)
        );
        assert_eq!(
            m.define_label("data_label", TEXT_BASE + 2).unwrap_err().kind,
            AsmErrKind::MisalignedTarget(TEXT_BASE + 2)
        );
    }

    #[test]
    fn test_emit() {
        let mut m = machine();
        assert_eq!(m.emit_text_word(0x0000000C), Ok(TEXT_BASE));
        assert_eq!(m.emit_data_byte(1), Ok(DATA_BASE));
        assert_eq!(m.emit_data_half(2).unwrap_err().kind, AsmErrKind::MisalignedData(DATA_BASE + 1));
        assert_eq!(m.emit_data_word(3).unwrap_err().kind, AsmErrKind::MisalignedData(DATA_BASE + 1));
        assert_eq!(m.emit_data_asciiz("abcdef"), Ok(DATA_BASE + 1));
        assert_eq!(m.emit_data_word(0xCAFEBABE), Ok(DATA_BASE + 8));
        assert_eq!(m.mem.get_word(DATA_BASE), 0x01616263);
        assert_eq!(m.mem.get_word(DATA_BASE + 4), 0x64656600);
        assert_eq!(m.mem.get_word(DATA_BASE + 8), 0xCAFEBABE);
        assert_eq!(m.mem.get_word(TEXT_BASE), 0x0000000C);
    }

    #[test]
    fn test_segment_overflow() {
        let mut m = machine();
        assemble_all(&mut m, "
            .data
            .space 0x3FFFC
            last: .word 1
        ");
        assert_eq!(m.data_cursor(), DATA_LIMIT);
        assert_asm_fail(&mut m, ".byte 1", AsmErrKind::SegmentOverflow(Segment::Data));
        assert_eq!(m.emit_data_byte(1).unwrap_err().kind, AsmErrKind::SegmentOverflow(Segment::Data));
        assert_eq!(m.lookup_label("last"), Some(DATA_LIMIT - 4));
    }

    #[test]
    fn test_symbol_table_queries() {
        let mut m = machine();
        assemble_all(&mut m, "
            b: add $t0, $t0, $t0
            a: add $t0, $t0, $t0
            c:
            j later
        ");
        let labels: Vec<_> = m.sym.label_iter().collect();
        assert_eq!(labels, [("b", TEXT_BASE), ("a", TEXT_BASE + 4), ("c", TEXT_BASE + 8)]);
        assert_eq!(m.sym.rev_lookup_label(TEXT_BASE + 8), Some("c"));
        assert_eq!(m.sym.rev_lookup_label(TEXT_BASE + 2), None);

        let fixups: Vec<_> = m.sym.fixups().collect();
        assert_eq!(fixups.len(), 1);
        assert_eq!((fixups[0].addr, fixups[0].label.as_str()), (TEXT_BASE + 8, "later"));
        assert_eq!(fixups[0].patch, Patch::Jump(crate::ast::sim::JumpOp::J));
    }

    #[test]
    fn test_fixups_resolve_only_their_label() {
        let mut m = machine();
        assemble_all(&mut m, "
            beq $zero, $zero, x
            beq $zero, $zero, y
            beq $zero, $zero, x
        ");
        assert_eq!(m.sym.fixups().count(), 3);
        m.assemble_line("x:").unwrap();
        assert_eq!(m.sym.fixups().map(|f| f.label.as_str()).collect::<Vec<_>>(), ["y"]);
        assert!(m.has_unresolved_fixups());
        m.assemble_line("y:").unwrap();
        assert!(!m.has_unresolved_fixups());
        assert_eq!(text_word(&m, 0) & 0xFFFF, 2);
        assert_eq!(text_word(&m, 1) & 0xFFFF, 1);
        assert_eq!(text_word(&m, 2) & 0xFFFF, 0);
    }
}
