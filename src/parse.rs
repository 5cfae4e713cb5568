//! Parsing a line of MIPS assembly into a statement.
//!
//! This module converts the tokens produced by [`lex::lex_line`] into a [`Stmt`]:
//! an optional label definition, followed by an optional instruction or directive.
//!
//! Parsing checks that the operands of an instruction exactly match the pattern
//! of its format (see [`Format::pattern`]), resolves register names, and checks
//! that every immediate fits within the field it is encoded into.
//! It does not resolve label references. That is the job of the assembler
//! (see [`crate::asm`]).
//!
//! ```
//! use mips_ensemble::parse::parse_stmt;
//! use mips_ensemble::ast::asm::{AsmInstr, StmtKind};
//! use mips_ensemble::ast::sim::{R3Op, SimInstr};
//! use mips_ensemble::ast::reg_consts::{T0, T1, T2};
//!
//! let stmt = parse_stmt("main: add $t0, $t1, $t2").unwrap();
//! assert_eq!(stmt.label.unwrap().name, "main");
//! assert_eq!(stmt.nucleus, Some(StmtKind::Instr(AsmInstr::Sim(SimInstr::R3(R3Op::Add, T0, T1, T2)))));
//! ```
//!
//! [`Format::pattern`]: crate::ast::asm::Format::pattern

pub mod lex;

use std::borrow::Cow;
use std::ops::Range;

use crate::ast::asm::{lookup_instr, lookup_pseudo, AsmInstr, Directive, InstrKind, OperandKind, PseudoInstr, PseudoOp, Stmt, StmtKind};
use crate::ast::reg_consts::RA;
use crate::ast::sim::SimInstr;
use crate::ast::{IOffset, Label, OffsetNewErr, Reg, Shamt, UOffset};
use crate::err::{Error as _, ErrSpan};
use lex::{lex_line, LexErr, Token, TokenKind};

/// Kinds of errors that can occur from parsing a line of assembly.
///
/// See [`ParseErr`] for this error type with span information included.
#[derive(Debug, PartialEq, Eq, Hash, Clone)]
pub enum ParseErrKind {
    /// The line could not be tokenized.
    Lex(LexErr),
    /// Expected an instruction name or directive.
    ExpectedMnemonic,
    /// The instruction name is not a known instruction or pseudo-instruction.
    UnknownMnemonic(String),
    /// The directive name is not a known directive.
    UnknownDirective(String),
    /// The register name is not a known register.
    UnknownRegister(String),
    /// A token appeared where an operand or separator was expected.
    UnexpectedToken,
    /// The operands do not match the operands the instruction requires.
    PatternMismatch(&'static [OperandKind]),
    /// The operands do not match the operands the directive requires.
    DirectiveMismatch(&'static str),
    /// An immediate does not fit in its field.
    ImmOutOfRange(OffsetNewErr),
    /// A shift amount is not in `[0, 31]`.
    ShiftOutOfRange,
    /// A directive value is not within the given (inclusive) range.
    ValueOutOfRange(i64, i64),
}
impl std::fmt::Display for ParseErrKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Lex(e)                 => e.fmt(f),
            Self::ExpectedMnemonic       => f.write_str("expected instruction or directive"),
            Self::UnknownMnemonic(m)     => write!(f, "unrecognized mnemonic '{m}'"),
            Self::UnknownDirective(d)    => write!(f, "unrecognized directive '{d}'"),
            Self::UnknownRegister(r)     => write!(f, "unknown register '${r}'"),
            Self::UnexpectedToken        => f.write_str("unexpected token"),
            Self::PatternMismatch(_)     => f.write_str("operands do not match instruction"),
            Self::DirectiveMismatch(_)   => f.write_str("operands do not match directive"),
            Self::ImmOutOfRange(e)       => e.fmt(f),
            Self::ShiftOutOfRange        => f.write_str("shift amount out of range"),
            Self::ValueOutOfRange(_, _)  => f.write_str("value out of range"),
        }
    }
}

/// Error from parsing a line of assembly.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct ParseErr {
    /// The kind of error.
    pub kind: ParseErrKind,
    /// The span in the source line associated with this error.
    pub span: ErrSpan
}
impl ParseErr {
    /// Creates a new [`ParseErr`].
    pub fn new<E: Into<ErrSpan>>(kind: ParseErrKind, span: E) -> Self {
        ParseErr { kind, span: span.into() }
    }
}
impl std::fmt::Display for ParseErr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.kind.fmt(f)
    }
}
impl std::error::Error for ParseErr {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.kind {
            ParseErrKind::Lex(e) => Some(e),
            ParseErrKind::ImmOutOfRange(e) => Some(e),
            _ => None
        }
    }
}
impl crate::err::Error for ParseErr {
    fn span(&self) -> Option<ErrSpan> {
        Some(self.span.clone())
    }

    fn help(&self) -> Option<Cow<str>> {
        self.kind.help()
    }
}

impl ParseErrKind {
    /// A brief explanation of how to fix the error, if one exists.
    pub fn help(&self) -> Option<Cow<'_, str>> {
        match self {
            ParseErrKind::Lex(e)                => e.help(),
            ParseErrKind::ExpectedMnemonic      => Some("a line holds an optional label, followed by an optional instruction or directive".into()),
            ParseErrKind::UnknownMnemonic(_)    => Some("instruction names are lowercase (e.g., 'add', 'lw', 'li')".into()),
            ParseErrKind::UnknownDirective(_)   => Some("the supported directives are .text, .data, .word, .half, .byte, .ascii, .asciiz, .space, .align".into()),
            ParseErrKind::UnknownRegister(_)    => Some("registers are $0-$31 or named ($zero, $at, $v0, $a0, $t0, $s0, $sp, $ra, ...)".into()),
            ParseErrKind::UnexpectedToken       => Some("operands are separated by commas".into()),
            ParseErrKind::PatternMismatch(pat)  => Some(match pat.is_empty() {
                true  => Cow::from("this instruction takes no operands"),
                false => Cow::from(format!("expected operands: {}", fmt_pattern(pat))),
            }),
            ParseErrKind::DirectiveMismatch(e)  => Some(format!("expected {e}").into()),
            ParseErrKind::ImmOutOfRange(e)      => e.help(),
            ParseErrKind::ShiftOutOfRange       => Some("shift amounts must be between 0 and 31".into()),
            ParseErrKind::ValueOutOfRange(a, b) => Some(format!("this value must be between {a} and {b}").into()),
        }
    }
}

fn fmt_pattern(pat: &[OperandKind]) -> String {
    pat.iter()
        .map(|k| k.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Lexes and parses one line of assembly.
pub fn parse_stmt(src: &str) -> Result<Stmt, ParseErr> {
    parse_line(&lex_line(src))
}

/// Parses the tokens of one line of assembly into a statement.
///
/// The tokens should be the output of [`lex_line`] (ending with [`TokenKind::Eol`]).
pub fn parse_line(tokens: &[Token]) -> Result<Stmt, ParseErr> {
    // report the first bad token before anything else
    if let Some(Token { kind: TokenKind::Error(e), span }) = tokens.iter().find(|t| matches!(t.kind, TokenKind::Error(_))) {
        return Err(ParseErr::new(ParseErrKind::Lex(*e), span.clone()));
    }

    let mut parser = Parser::new(tokens);

    let label = match parser.peek2() {
        (Some(Token { kind: TokenKind::Ident(name), span }), Some(Token { kind: TokenKind::Colon, .. })) => {
            let label = Label::new(name.clone(), span.clone());
            parser.advance(2);
            Some(label)
        },
        _ => None
    };

    let Some(head) = parser.next() else {
        return Ok(Stmt { label, nucleus: None, span: parser.eol_span() });
    };
    let (name, name_span) = match &head.kind {
        TokenKind::Ident(name) => (name.as_str(), head.span.clone()),
        _ => return Err(ParseErr::new(ParseErrKind::ExpectedMnemonic, head.span.clone())),
    };

    let operands = parser.operands()?;
    let end = operands.last().map_or(name_span.end, |(_, s)| s.end);
    let span = name_span.start .. end;

    let nucleus = if name.starts_with('.') {
        StmtKind::Directive(parse_directive(name, name_span, &operands, span.clone())?)
    } else if let Some(kind) = lookup_instr(name) {
        StmtKind::Instr(parse_instr(kind, &operands, span.clone())?)
    } else if let Some(op) = lookup_pseudo(name) {
        StmtKind::Instr(AsmInstr::Pseudo(parse_pseudo(op, &operands, span.clone())?))
    } else {
        return Err(ParseErr::new(ParseErrKind::UnknownMnemonic(name.to_string()), name_span));
    };

    Ok(Stmt { label, nucleus: Some(nucleus), span })
}

/// A parsed operand.
#[derive(Debug, PartialEq, Eq, Clone)]
enum Operand {
    Reg(Reg),
    Int(i64),
    Label(Label),
    /// `offset(base)`
    Mem(i64, Reg),
    Str(String),
}
type Spanned<T> = (T, Range<usize>);

struct Parser<'t> {
    tokens: &'t [Token],
    index: usize
}
impl<'t> Parser<'t> {
    fn new(tokens: &'t [Token]) -> Self {
        Parser { tokens, index: 0 }
    }

    /// The next token (which is never [`TokenKind::Eol`]).
    fn peek(&self) -> Option<&'t Token> {
        self.tokens.get(self.index)
            .filter(|t| t.kind != TokenKind::Eol)
    }
    fn peek2(&self) -> (Option<&'t Token>, Option<&'t Token>) {
        (self.peek(), self.tokens.get(self.index + 1))
    }
    fn advance(&mut self, n: usize) {
        self.index += n;
    }
    fn next(&mut self) -> Option<&'t Token> {
        let tok = self.peek()?;
        self.advance(1);
        Some(tok)
    }
    fn eol_span(&self) -> Range<usize> {
        match self.tokens.last() {
            Some(t) => t.span.clone(),
            None => 0..0,
        }
    }
    fn unexpected(&self) -> ParseErr {
        let span = match self.peek() {
            Some(t) => t.span.clone(),
            None => self.eol_span(),
        };
        ParseErr::new(ParseErrKind::UnexpectedToken, span)
    }

    fn reg(&mut self) -> Result<Spanned<Reg>, ParseErr> {
        match self.peek() {
            Some(Token { kind: TokenKind::Reg(name), span }) => {
                let reg = Reg::from_name(name)
                    .ok_or_else(|| ParseErr::new(ParseErrKind::UnknownRegister(name.clone()), span.clone()))?;
                self.advance(1);
                Ok((reg, span.clone()))
            },
            _ => Err(self.unexpected())
        }
    }
    fn expect(&mut self, kind: TokenKind) -> Result<Range<usize>, ParseErr> {
        match self.peek() {
            Some(t) if t.kind == kind => {
                self.advance(1);
                Ok(t.span.clone())
            },
            _ => Err(self.unexpected())
        }
    }
    /// Parses the parenthesized base register of a memory operand.
    fn base(&mut self) -> Result<Spanned<Reg>, ParseErr> {
        let start = self.expect(TokenKind::LParen)?.start;
        let (reg, _) = self.reg()?;
        let end = self.expect(TokenKind::RParen)?.end;
        Ok((reg, start..end))
    }

    fn operand(&mut self) -> Result<Spanned<Operand>, ParseErr> {
        let Some(tok) = self.peek() else {
            return Err(self.unexpected());
        };

        match &tok.kind {
            TokenKind::Reg(_) => self.reg().map(|(r, s)| (Operand::Reg(r), s)),
            TokenKind::Int(n) => {
                self.advance(1);
                match self.peek() {
                    Some(Token { kind: TokenKind::LParen, .. }) => {
                        let (base, bspan) = self.base()?;
                        Ok((Operand::Mem(*n, base), tok.span.start .. bspan.end))
                    },
                    _ => Ok((Operand::Int(*n), tok.span.clone()))
                }
            },
            TokenKind::LParen => self.base().map(|(base, s)| (Operand::Mem(0, base), s)),
            TokenKind::Ident(name) => {
                self.advance(1);
                Ok((Operand::Label(Label::new(name.clone(), tok.span.clone())), tok.span.clone()))
            },
            TokenKind::Str(s) => {
                self.advance(1);
                Ok((Operand::Str(s.clone()), tok.span.clone()))
            },
            _ => Err(self.unexpected())
        }
    }

    /// Parses the comma-separated operand list up to the end of the line.
    fn operands(&mut self) -> Result<Vec<Spanned<Operand>>, ParseErr> {
        let mut operands = vec![];
        if self.peek().is_none() { return Ok(operands) };

        loop {
            operands.push(self.operand()?);
            match self.peek() {
                None => break,
                Some(Token { kind: TokenKind::Comma, .. }) => self.advance(1),
                Some(_) => return Err(self.unexpected()),
            }
        }
        Ok(operands)
    }
}

fn imm<T, E>(value: i64, span: &Range<usize>, f: impl FnOnce(i64) -> Result<T, E>, err: impl FnOnce(E) -> ParseErrKind) -> Result<T, ParseErr> {
    f(value).map_err(|e| ParseErr::new(err(e), span.clone()))
}
fn simm16(value: i64, span: &Range<usize>) -> Result<IOffset<16>, ParseErr> {
    imm(value, span, IOffset::from_literal, ParseErrKind::ImmOutOfRange)
}
fn uimm16(value: i64, span: &Range<usize>) -> Result<UOffset<16>, ParseErr> {
    imm(value, span, UOffset::from_literal, ParseErrKind::ImmOutOfRange)
}
fn shamt(value: i64, span: &Range<usize>) -> Result<Shamt, ParseErr> {
    imm(value, span, Shamt::from_literal, |_| ParseErrKind::ShiftOutOfRange)
}

fn parse_instr(kind: InstrKind, operands: &[Spanned<Operand>], span: Range<usize>) -> Result<AsmInstr, ParseErr> {
    use Operand as O;

    let instr = match (kind, operands) {
        (InstrKind::R3(op), [(O::Reg(rd), _), (O::Reg(rs), _), (O::Reg(rt), _)]) => SimInstr::R3(op, *rd, *rs, *rt),
        (InstrKind::Shift(op), [(O::Reg(rd), _), (O::Reg(rt), _), (O::Int(n), ns)]) => SimInstr::Shift(op, *rd, *rt, shamt(*n, ns)?),
        (InstrKind::ShiftV(op), [(O::Reg(rd), _), (O::Reg(rt), _), (O::Reg(rs), _)]) => SimInstr::ShiftV(op, *rd, *rt, *rs),
        (InstrKind::Imm(op), [(O::Reg(rt), _), (O::Reg(rs), _), (O::Int(n), ns)]) => {
            let bits = match op.zero_extends() {
                true  => uimm16(*n, ns)?.bits(),
                false => simm16(*n, ns)?.bits(),
            };
            SimInstr::Imm(op, *rt, *rs, bits as u16)
        },
        (InstrKind::Lui, [(O::Reg(rt), _), (O::Int(n), ns)]) => SimInstr::Lui(*rt, uimm16(*n, ns)?),
        (InstrKind::Mem(op), [(O::Reg(rt), _), (O::Mem(off, base), ms)]) => SimInstr::Mem(op, *rt, *base, simm16(*off, ms)?),
        (InstrKind::Mem(op), [(O::Reg(rt), _), (O::Label(label), _)]) => return Ok(AsmInstr::Pseudo(PseudoInstr::MemLabel(op, *rt, label.clone()))),
        (InstrKind::Branch2(op), [(O::Reg(rs), _), (O::Reg(rt), _), (O::Label(label), _)]) => return Ok(AsmInstr::Branch2(op, *rs, *rt, label.clone())),
        (InstrKind::Branch1(op), [(O::Reg(rs), _), (O::Label(label), _)]) => return Ok(AsmInstr::Branch1(op, *rs, label.clone())),
        (InstrKind::Jump(op), [(O::Label(label), _)]) => return Ok(AsmInstr::Jump(op, label.clone())),
        (InstrKind::Syscall, []) => SimInstr::Syscall,
        (InstrKind::Jr, [(O::Reg(rs), _)]) => SimInstr::Jr(*rs),
        (InstrKind::Jalr, [(O::Reg(rs), _)]) => SimInstr::Jalr(RA, *rs),
        (InstrKind::Jalr, [(O::Reg(rd), _), (O::Reg(rs), _)]) => SimInstr::Jalr(*rd, *rs),
        (InstrKind::HiLo(op), [(O::Reg(r), _)]) => SimInstr::HiLo(op, *r),
        (InstrKind::MulDiv(op), [(O::Reg(rs), _), (O::Reg(rt), _)]) => SimInstr::MulDiv(op, *rs, *rt),
        (kind, _) => return Err(ParseErr::new(ParseErrKind::PatternMismatch(kind.format().pattern()), span)),
    };

    Ok(AsmInstr::Sim(instr))
}

fn parse_pseudo(op: PseudoOp, operands: &[Spanned<Operand>], span: Range<usize>) -> Result<PseudoInstr, ParseErr> {
    use Operand as O;

    let instr = match (op, operands) {
        (PseudoOp::Move, [(O::Reg(rd), _), (O::Reg(rs), _)]) => PseudoInstr::Move(*rd, *rs),
        (PseudoOp::Li,   [(O::Reg(rt), _), (O::Int(n), s)])  => {
            let (min, max) = (i64::from(i32::MIN), i64::from(u32::MAX));
            if !(min..=max).contains(n) {
                return Err(ParseErr::new(ParseErrKind::ValueOutOfRange(min, max), s.clone()));
            }
            PseudoInstr::Li(*rt, *n)
        },
        (PseudoOp::La,   [(O::Reg(rt), _), (O::Label(l), _)]) => PseudoInstr::La(*rt, l.clone()),
        (PseudoOp::Abs,  [(O::Reg(rd), _), (O::Reg(rs), _)]) => PseudoInstr::Abs(*rd, *rs),
        (PseudoOp::Neg,  [(O::Reg(rd), _), (O::Reg(rs), _)]) => PseudoInstr::Neg(*rd, *rs),
        (PseudoOp::Negu, [(O::Reg(rd), _), (O::Reg(rs), _)]) => PseudoInstr::Negu(*rd, *rs),
        (PseudoOp::Not,  [(O::Reg(rd), _), (O::Reg(rs), _)]) => PseudoInstr::Not(*rd, *rs),
        (PseudoOp::Mul,  [(O::Reg(rd), _), (O::Reg(rs), _), (O::Reg(rt), _)]) => PseudoInstr::Mul(*rd, *rs, *rt),
        (PseudoOp::Sgt,  [(O::Reg(rd), _), (O::Reg(rs), _), (O::Reg(rt), _)]) => PseudoInstr::Sgt(*rd, *rs, *rt),
        (PseudoOp::Sge,  [(O::Reg(rd), _), (O::Reg(rs), _), (O::Reg(rt), _)]) => PseudoInstr::Sge(*rd, *rs, *rt),
        (PseudoOp::OrdBranch(cmp), [(O::Reg(rs), _), (O::Reg(rt), _), (O::Label(l), _)]) => PseudoInstr::OrdBranch(cmp, *rs, *rt, l.clone()),
        (PseudoOp::B,    [(O::Label(l), _)]) => PseudoInstr::B(l.clone()),
        (op, _) => return Err(ParseErr::new(ParseErrKind::PatternMismatch(op.pattern()), span)),
    };

    Ok(instr)
}

/// Collects every operand as an integer within `[min, max]`.
fn int_list(operands: &[Spanned<Operand>], min: i64, max: i64, span: &Range<usize>) -> Result<Vec<i64>, ParseErr> {
    if operands.is_empty() {
        return Err(ParseErr::new(ParseErrKind::DirectiveMismatch("a list of integers"), span.clone()));
    }

    operands.iter()
        .map(|(op, s)| match *op {
            Operand::Int(n) if (min..=max).contains(&n) => Ok(n),
            Operand::Int(_) => Err(ParseErr::new(ParseErrKind::ValueOutOfRange(min, max), s.clone())),
            _ => Err(ParseErr::new(ParseErrKind::DirectiveMismatch("a list of integers"), s.clone())),
        })
        .collect()
}

fn parse_directive(name: &str, name_span: Range<usize>, operands: &[Spanned<Operand>], span: Range<usize>) -> Result<Directive, ParseErr> {
    let mismatch = |expected| Err(ParseErr::new(ParseErrKind::DirectiveMismatch(expected), span.clone()));

    let directive = match name {
        ".text" | ".data" => {
            if !operands.is_empty() { return mismatch("no operands") };
            match name {
                ".text" => Directive::Text,
                _ => Directive::Data,
            }
        },
        ".word" => Directive::Word({
            int_list(operands, i64::from(i32::MIN), i64::from(u32::MAX), &span)?
                .into_iter()
                .map(|n| n as u32)
                .collect()
        }),
        ".half" => Directive::Half({
            int_list(operands, i64::from(i16::MIN), i64::from(u16::MAX), &span)?
                .into_iter()
                .map(|n| n as u16)
                .collect()
        }),
        ".byte" => Directive::Byte({
            int_list(operands, i64::from(i8::MIN), i64::from(u8::MAX), &span)?
                .into_iter()
                .map(|n| n as u8)
                .collect()
        }),
        ".ascii" | ".asciiz" => match operands {
            [(Operand::Str(s), _)] => match name {
                ".ascii" => Directive::Ascii(s.clone()),
                _ => Directive::Asciiz(s.clone()),
            },
            _ => return mismatch("a string literal")
        },
        ".space" => match operands {
            [_] => Directive::Space(int_list(operands, 0, i64::from(u32::MAX), &span)?[0] as u32),
            _ => return mismatch("a byte count")
        },
        ".align" => match operands {
            [_] => Directive::Align(int_list(operands, 0, 3, &span)?[0] as u32),
            _ => return mismatch("an alignment exponent between 0 and 3")
        },
        _ => return Err(ParseErr::new(ParseErrKind::UnknownDirective(name.to_string()), name_span)),
    };

    Ok(directive)
}
