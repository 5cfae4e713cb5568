//! Tokenizing MIPS assembly.
//!
//! This module holds the tokens that characterize one line of MIPS assembly ([`Token`]).
//! The parser uses this module to convert a line of assembly source code into an
//! instruction or directive.
//!
//! The module's key function is [`lex_line`], which never fails as a whole:
//! any unrecognized piece of the line becomes a [`TokenKind::Error`] token,
//! and every line ends with exactly one [`TokenKind::Eol`].
//!
//! ```
//! use mips_ensemble::parse::lex::{lex_line, TokenKind};
//!
//! let tokens = lex_line("loop: addi $t0, $t0, -1 # decrement");
//! let kinds: Vec<_> = tokens.into_iter().map(|t| t.kind).collect();
//! assert_eq!(kinds, [
//!     TokenKind::Ident("loop".to_string()),
//!     TokenKind::Colon,
//!     TokenKind::Ident("addi".to_string()),
//!     TokenKind::Reg("t0".to_string()),
//!     TokenKind::Comma,
//!     TokenKind::Reg("t0".to_string()),
//!     TokenKind::Comma,
//!     TokenKind::Int(-1),
//!     TokenKind::Eol,
//! ]);
//! ```

use std::num::IntErrorKind;
use std::ops::Range;

use logos::{Lexer, Logos};

/// The kind of a [`Token`].
#[derive(Debug, Logos, PartialEq, Eq, Clone)]
#[logos(skip r"[ \t\r\f]+", error = LexErr)]
#[logos(skip r"#[^\n]*")]
pub enum TokenKind {
    // Like the other numeric regexes, this spans over tokens that are technically invalid
    // (e.g., 12ab matches even though it is not a number).
    // The validator callback reports what is wrong with it.

    /// An integer literal (e.g., `9`, `-14`, `0x7F`, `017`, `'a'`, `'\n'`).
    #[regex(r"-?\d\w*", lex_int)]
    #[token("'", lex_char_literal)]
    Int(i64),

    /// A register (e.g., `$t0`, `$31`).
    ///
    /// This only holds the name after the `$`.
    /// The name is resolved against the register table by the parser, not here.
    #[regex(r"\$[A-Za-z0-9]+", |lx| lx.slice()[1..].to_string())]
    Reg(String),

    /// An identifier.
    ///
    /// This can refer to a mnemonic (e.g., `add`), a label (e.g., `loop`),
    /// or a directive (e.g., `.text`).
    #[regex(r"[A-Za-z_.][A-Za-z0-9_.]*", |lx| lx.slice().to_string())]
    Ident(String),

    /// A string literal (e.g., `"Hello!"`).
    #[token("\"", lex_str_literal)]
    Str(String),

    /// A comma, which separates operands.
    #[token(",")]
    Comma,

    /// An open parenthesis, which begins the base register of a memory operand.
    #[token("(")]
    LParen,

    /// A close parenthesis, which ends the base register of a memory operand.
    #[token(")")]
    RParen,

    /// A colon, which ends a label definition.
    #[token(":")]
    Colon,

    /// A piece of the line which could not be tokenized.
    Error(LexErr),

    /// The end of the line.
    Eol
}

/// A unit of information in a line of MIPS source code.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Token {
    /// What kind of token this is.
    pub kind: TokenKind,
    /// The byte range in the source line which produced this token.
    pub span: Range<usize>
}

/// Splits one line of source code into tokens.
///
/// Only the first line of `src` is tokenized.
/// The result always ends with exactly one [`TokenKind::Eol`] token.
pub fn lex_line(src: &str) -> Vec<Token> {
    let line = match src.find('\n') {
        Some(end) => &src[..end],
        None => src,
    };

    let mut tokens: Vec<_> = TokenKind::lexer(line)
        .spanned()
        .map(|(result, span)| Token {
            kind: result.unwrap_or_else(TokenKind::Error),
            span
        })
        .collect();

    tokens.push(Token { kind: TokenKind::Eol, span: line.len()..line.len() });
    tokens
}

/// Any errors raised in attempting to tokenize an input stream.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy, Default)]
pub enum LexErr {
    /// Numeric literal cannot fit within the range of a 32-bit integer (signed or unsigned)
    DoesNotFit,
    /// Hex literal (starting with 0x) has invalid hex digits
    InvalidHex,
    /// Hex literal (starting with 0x) doesn't have digits after it.
    InvalidHexEmpty,
    /// Octal literal (starting with 0) has invalid octal digits
    InvalidOctal,
    /// Numeric literal could not be parsed as a decimal literal because it has invalid digits (i.e., not 0-9)
    InvalidNumeric,
    /// Int parsing failed but the reason why is unknown
    UnknownIntErr,
    /// String literal is missing an end quotation mark.
    UnclosedStrLit,
    /// Character literal is missing an end quotation mark.
    UnclosedCharLit,
    /// Character literal does not hold exactly one character.
    InvalidCharLit,
    /// A symbol was used which is not allowed in MIPS assembly files
    #[default]
    InvalidSymbol
}
impl std::fmt::Display for LexErr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LexErr::DoesNotFit      => f.write_str("numeric token does not fit 32-bit integer"),
            LexErr::InvalidHex      => f.write_str("invalid hex literal"),
            LexErr::InvalidHexEmpty => f.write_str("hex literal is missing digits"),
            LexErr::InvalidOctal    => f.write_str("invalid octal literal"),
            LexErr::InvalidNumeric  => f.write_str("invalid decimal literal"),
            LexErr::UnknownIntErr   => f.write_str("could not parse integer"),
            LexErr::UnclosedStrLit  => f.write_str("unclosed string literal"),
            LexErr::UnclosedCharLit => f.write_str("unclosed character literal"),
            LexErr::InvalidCharLit  => f.write_str("invalid character literal"),
            LexErr::InvalidSymbol   => f.write_str("unrecognized symbol"),
        }
    }
}
impl std::error::Error for LexErr {}
impl crate::err::Error for LexErr {
    fn help(&self) -> Option<std::borrow::Cow<str>> {
        match self {
            LexErr::DoesNotFit      => Some(format!("integer literals must be in the range [{}, {}]", i32::MIN, u32::MAX).into()),
            LexErr::InvalidHex      => Some("a hex literal starts with '0x' and consists of 0-9, A-F".into()),
            LexErr::InvalidHexEmpty => Some("there should be hex digits (0-9, A-F) here".into()),
            LexErr::InvalidOctal    => Some("a literal starting with 0 is octal and consists of 0-7".into()),
            LexErr::InvalidNumeric  => Some("a decimal literal only consists of digits 0-9".into()),
            LexErr::UnknownIntErr   => None,
            LexErr::UnclosedStrLit  => Some("add a quote to the end of the string literal".into()),
            LexErr::UnclosedCharLit => Some("add a single quote to the end of the character literal".into()),
            LexErr::InvalidCharLit  => Some("a character literal holds exactly one character or escape (e.g., 'a', '\\n')".into()),
            LexErr::InvalidSymbol   => Some("this char does not occur in any token in MIPS assembly".into()),
        }
    }
}

/// Helper that converts an int error kind to its corresponding LexErr.
fn convert_int_error(e: &IntErrorKind, invalid_digits_err: LexErr, empty_err: LexErr) -> LexErr {
    match e {
        IntErrorKind::Empty        => empty_err,
        IntErrorKind::InvalidDigit => invalid_digits_err,
        IntErrorKind::PosOverflow  => LexErr::DoesNotFit,
        IntErrorKind::NegOverflow  => LexErr::DoesNotFit,
        _ => LexErr::UnknownIntErr,
    }
}
fn lex_int(lx: &Lexer<'_, TokenKind>) -> Result<i64, LexErr> {
    let (negative, digits) = match lx.slice().strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, lx.slice()),
    };

    let magnitude = if let Some(hex) = digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16)
            .map_err(|e| convert_int_error(e.kind(), LexErr::InvalidHex, LexErr::InvalidHexEmpty))?
    } else if digits.len() > 1 && digits.starts_with('0') {
        u64::from_str_radix(&digits[1..], 8)
            .map_err(|e| convert_int_error(e.kind(), LexErr::InvalidOctal, LexErr::InvalidOctal))?
    } else {
        digits.parse::<u64>()
            .map_err(|e| convert_int_error(e.kind(), LexErr::InvalidNumeric, LexErr::InvalidNumeric))?
    };

    // Literals may be written either as signed or unsigned 32-bit values.
    let value = match negative {
        true  => -i64::try_from(magnitude).map_err(|_| LexErr::DoesNotFit)?,
        false => i64::try_from(magnitude).map_err(|_| LexErr::DoesNotFit)?,
    };
    match (i64::from(i32::MIN)..=i64::from(u32::MAX)).contains(&value) {
        true  => Ok(value),
        false => Err(LexErr::DoesNotFit),
    }
}

/// Resolves the character after a backslash.
///
/// Unknown escapes are passed through as-is (returning `None`).
fn unescape(c: char) -> Option<char> {
    match c {
        'n'  => Some('\n'),
        'r'  => Some('\r'),
        't'  => Some('\t'),
        '0'  => Some('\0'),
        '\\' => Some('\\'),
        '\'' => Some('\''),
        '"'  => Some('"'),
        _ => None
    }
}
fn lex_char_literal(lx: &mut Lexer<'_, TokenKind>) -> Result<i64, LexErr> {
    let rem = lx.remainder();
    let mut chars = rem.char_indices();

    let value = match chars.next() {
        Some((_, '\\')) => match chars.next() {
            Some((_, esc)) => unescape(esc).unwrap_or(esc),
            None => {
                lx.bump(rem.len());
                return Err(LexErr::UnclosedCharLit);
            }
        },
        Some((_, '\'')) => {
            lx.bump(1);
            return Err(LexErr::InvalidCharLit);
        },
        Some((_, c)) => c,
        None => return Err(LexErr::UnclosedCharLit),
    };

    match chars.next() {
        Some((i, '\'')) => {
            lx.bump(i + 1);
            Ok(i64::from(u32::from(value)))
        },
        Some(_) => {
            // consume up to a closing quote if there is one, so the rest of the line still lexes
            match rem.find('\'') {
                Some(end) => {
                    lx.bump(end + 1);
                    Err(LexErr::InvalidCharLit)
                },
                None => {
                    lx.bump(rem.len());
                    Err(LexErr::UnclosedCharLit)
                }
            }
        }
        None => {
            lx.bump(rem.len());
            Err(LexErr::UnclosedCharLit)
        }
    }
}
fn lex_str_literal(lx: &mut Lexer<'_, TokenKind>) -> Result<String, LexErr> {
    let rem = lx.remainder();

    // find the first quote that isn't escaped
    let mut end = None;
    let mut escaped = false;
    for (i, c) in rem.char_indices() {
        match c {
            _ if escaped => escaped = false,
            '\\' => escaped = true,
            '"'  => {
                end = Some(i);
                break;
            },
            _ => {}
        }
    }

    let Some(len) = end else {
        lx.bump(rem.len());
        return Err(LexErr::UnclosedStrLit);
    };
    lx.bump(len + 1);

    // get the string inside quotes:
    let mut remaining = &rem[..len];
    let mut buf = String::with_capacity(remaining.len());

    while let Some((left, right)) = remaining.split_once('\\') {
        buf.push_str(left);

        // there is always a character after the backslash,
        // because the closing quote can't be escaped
        let mut rchars = right.chars();
        match rchars.next() {
            Some(esc) => match unescape(esc) {
                Some(c) => buf.push(c),
                None => {
                    buf.push('\\');
                    buf.push(esc);
                }
            },
            None => buf.push('\\'),
        }
        remaining = rchars.as_str();
    }
    buf.push_str(remaining);

    Ok(buf)
}

#[cfg(test)]
mod tests {
    use logos::Logos;

    use super::{lex_line, LexErr, Token, TokenKind};

    fn ident(s: &str) -> TokenKind {
        TokenKind::Ident(s.to_string())
    }
    fn reg(s: &str) -> TokenKind {
        TokenKind::Reg(s.to_string())
    }
    fn str_literal(s: &str) -> TokenKind {
        TokenKind::Str(s.to_string())
    }
    fn kinds(src: &str) -> Vec<TokenKind> {
        lex_line(src).into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_numeric_dec_success() {
        let mut tokens = TokenKind::lexer("0 123 456 789");
        assert_eq!(tokens.next(), Some(Ok(TokenKind::Int(0))));
        assert_eq!(tokens.next(), Some(Ok(TokenKind::Int(123))));
        assert_eq!(tokens.next(), Some(Ok(TokenKind::Int(456))));
        assert_eq!(tokens.next(), Some(Ok(TokenKind::Int(789))));
        assert_eq!(tokens.next(), None);

        // Negative
        let mut tokens = TokenKind::lexer("-123 -456 -0");
        assert_eq!(tokens.next(), Some(Ok(TokenKind::Int(-123))));
        assert_eq!(tokens.next(), Some(Ok(TokenKind::Int(-456))));
        assert_eq!(tokens.next(), Some(Ok(TokenKind::Int(0))));
        assert_eq!(tokens.next(), None);
    }

    #[test]
    fn test_numeric_hex_octal_success() {
        let mut tokens = TokenKind::lexer("0x2110 0xABCD 0XabCd -0x10 0x7FFFFFFF 0xFFFFFFFF");
        assert_eq!(tokens.next(), Some(Ok(TokenKind::Int(0x2110))));
        assert_eq!(tokens.next(), Some(Ok(TokenKind::Int(0xABCD))));
        assert_eq!(tokens.next(), Some(Ok(TokenKind::Int(0xABCD))));
        assert_eq!(tokens.next(), Some(Ok(TokenKind::Int(-0x10))));
        assert_eq!(tokens.next(), Some(Ok(TokenKind::Int(0x7FFF_FFFF))));
        assert_eq!(tokens.next(), Some(Ok(TokenKind::Int(0xFFFF_FFFF))));
        assert_eq!(tokens.next(), None);

        let mut tokens = TokenKind::lexer("017 00 -010");
        assert_eq!(tokens.next(), Some(Ok(TokenKind::Int(0o17))));
        assert_eq!(tokens.next(), Some(Ok(TokenKind::Int(0))));
        assert_eq!(tokens.next(), Some(Ok(TokenKind::Int(-0o10))));
        assert_eq!(tokens.next(), None);
    }

    #[test]
    fn test_numeric_overflow() {
        let mut tokens = TokenKind::lexer("4294967295 -2147483648");
        assert_eq!(tokens.next(), Some(Ok(TokenKind::Int(4294967295))));
        assert_eq!(tokens.next(), Some(Ok(TokenKind::Int(-2147483648))));
        assert_eq!(tokens.next(), None);

        assert_eq!(TokenKind::lexer("4294967296").next(), Some(Err(LexErr::DoesNotFit)));
        assert_eq!(TokenKind::lexer("-2147483649").next(), Some(Err(LexErr::DoesNotFit)));
        assert_eq!(TokenKind::lexer("0x100000000").next(), Some(Err(LexErr::DoesNotFit)));
        assert_eq!(TokenKind::lexer("999999999999999999999999999999").next(), Some(Err(LexErr::DoesNotFit)));
    }

    #[test]
    fn test_numeric_invalid() {
        assert_eq!(TokenKind::lexer("3Q").next(), Some(Err(LexErr::InvalidNumeric)));
        assert_eq!(TokenKind::lexer("0x").next(), Some(Err(LexErr::InvalidHexEmpty)));
        assert_eq!(TokenKind::lexer("0x0Q").next(), Some(Err(LexErr::InvalidHex)));
        assert_eq!(TokenKind::lexer("09").next(), Some(Err(LexErr::InvalidOctal)));
        assert_eq!(TokenKind::lexer("-").next(), Some(Err(LexErr::InvalidSymbol)));

        assert_ne!(LexErr::InvalidHexEmpty.to_string(), LexErr::InvalidHex.to_string());
        assert!(LexErr::InvalidHexEmpty.to_string().contains("missing digits"));
    }

    #[test]
    fn test_char_literal() {
        let mut tokens = TokenKind::lexer(r"'a' 'Z' '\n' '\0' '\\' '\''");
        assert_eq!(tokens.next(), Some(Ok(TokenKind::Int(0x61))));
        assert_eq!(tokens.next(), Some(Ok(TokenKind::Int(0x5A))));
        assert_eq!(tokens.next(), Some(Ok(TokenKind::Int(0x0A))));
        assert_eq!(tokens.next(), Some(Ok(TokenKind::Int(0x00))));
        assert_eq!(tokens.next(), Some(Ok(TokenKind::Int(0x5C))));
        assert_eq!(tokens.next(), Some(Ok(TokenKind::Int(0x27))));
        assert_eq!(tokens.next(), None);

        assert_eq!(TokenKind::lexer("'").next(), Some(Err(LexErr::UnclosedCharLit)));
        assert_eq!(TokenKind::lexer("'a").next(), Some(Err(LexErr::UnclosedCharLit)));
        assert_eq!(TokenKind::lexer("''").next(), Some(Err(LexErr::InvalidCharLit)));
        assert_eq!(TokenKind::lexer("'ab'").next(), Some(Err(LexErr::InvalidCharLit)));
    }

    #[test]
    fn test_regs() {
        let mut tokens = TokenKind::lexer("$t0 $zero $31 $s8 $sp");
        assert_eq!(tokens.next(), Some(Ok(reg("t0"))));
        assert_eq!(tokens.next(), Some(Ok(reg("zero"))));
        assert_eq!(tokens.next(), Some(Ok(reg("31"))));
        assert_eq!(tokens.next(), Some(Ok(reg("s8"))));
        assert_eq!(tokens.next(), Some(Ok(reg("sp"))));
        assert_eq!(tokens.next(), None);

        // register names are resolved later, so bogus names still lex
        assert_eq!(TokenKind::lexer("$foo").next(), Some(Ok(reg("foo"))));
        assert_eq!(TokenKind::lexer("$").next(), Some(Err(LexErr::InvalidSymbol)));
    }

    #[test]
    fn test_idents() {
        let mut tokens = TokenKind::lexer("add loop _start .text .asciiz a.b x1");
        assert_eq!(tokens.next(), Some(Ok(ident("add"))));
        assert_eq!(tokens.next(), Some(Ok(ident("loop"))));
        assert_eq!(tokens.next(), Some(Ok(ident("_start"))));
        assert_eq!(tokens.next(), Some(Ok(ident(".text"))));
        assert_eq!(tokens.next(), Some(Ok(ident(".asciiz"))));
        assert_eq!(tokens.next(), Some(Ok(ident("a.b"))));
        assert_eq!(tokens.next(), Some(Ok(ident("x1"))));
        assert_eq!(tokens.next(), None);
    }

    #[test]
    fn test_str() {
        let mut tokens = TokenKind::lexer(r#" " " "abc" "" "!@#$%^&*()" "#);
        assert_eq!(tokens.next(), Some(Ok(str_literal(" "))));
        assert_eq!(tokens.next(), Some(Ok(str_literal("abc"))));
        assert_eq!(tokens.next(), Some(Ok(str_literal(""))));
        assert_eq!(tokens.next(), Some(Ok(str_literal("!@#$%^&*()"))));
        assert_eq!(tokens.next(), None);
    }

    #[test]
    fn test_str_escape() {
        let mut tokens = TokenKind::lexer(r#" "\n" "\t" "\\" "\"" "\0" "\e" "a\"b" "#);
        assert_eq!(tokens.next(), Some(Ok(str_literal("\n"))));
        assert_eq!(tokens.next(), Some(Ok(str_literal("\t"))));
        assert_eq!(tokens.next(), Some(Ok(str_literal("\\"))));
        assert_eq!(tokens.next(), Some(Ok(str_literal("\""))));
        assert_eq!(tokens.next(), Some(Ok(str_literal("\0"))));
        assert_eq!(tokens.next(), Some(Ok(str_literal("\\e"))));
        assert_eq!(tokens.next(), Some(Ok(str_literal("a\"b"))));
        assert_eq!(tokens.next(), None);
    }

    #[test]
    fn test_str_unclosed() {
        assert_eq!(TokenKind::lexer(r#"""#).next(), Some(Err(LexErr::UnclosedStrLit)));
        assert_eq!(TokenKind::lexer(r#""abc\""#).next(), Some(Err(LexErr::UnclosedStrLit)));
    }

    #[test]
    fn test_punct_and_comment() {
        assert_eq!(kinds("lw $t0, 4($sp) # load it, (really)"), [
            ident("lw"),
            reg("t0"),
            TokenKind::Comma,
            TokenKind::Int(4),
            TokenKind::LParen,
            reg("sp"),
            TokenKind::RParen,
            TokenKind::Eol
        ]);
        assert_eq!(kinds("# just a comment"), [TokenKind::Eol]);
        assert_eq!(kinds(r##"msg: .asciiz "# not a comment""##), [
            ident("msg"),
            TokenKind::Colon,
            ident(".asciiz"),
            str_literal("# not a comment"),
            TokenKind::Eol
        ]);
    }

    #[test]
    fn test_lex_line_spans() {
        let tokens = lex_line("add $t0, $t1, $t2");
        assert_eq!(tokens[0], Token { kind: ident("add"), span: 0..3 });
        assert_eq!(tokens[1], Token { kind: reg("t0"), span: 4..7 });
        assert_eq!(tokens[2], Token { kind: TokenKind::Comma, span: 7..8 });
        assert_eq!(tokens.last(), Some(&Token { kind: TokenKind::Eol, span: 17..17 }));
    }

    #[test]
    fn test_lex_line_eol() {
        assert_eq!(kinds(""), [TokenKind::Eol]);
        assert_eq!(kinds("   \t  "), [TokenKind::Eol]);
        // only the first line is read
        assert_eq!(kinds("nop\nadd"), [ident("nop"), TokenKind::Eol]);
        assert_eq!(kinds("nop\r\n"), [ident("nop"), TokenKind::Eol]);

        let eols = lex_line("j end").iter()
            .filter(|t| t.kind == TokenKind::Eol)
            .count();
        assert_eq!(eols, 1);
    }

    #[test]
    fn test_lex_line_errors() {
        // errors don't abort the line
        assert_eq!(kinds("add @ $t0"), [
            ident("add"),
            TokenKind::Error(LexErr::InvalidSymbol),
            reg("t0"),
            TokenKind::Eol
        ]);

        let tokens = lex_line(r#".asciiz "unterminated"#);
        assert_eq!(tokens[1], Token { kind: TokenKind::Error(LexErr::UnclosedStrLit), span: 8..21 });
        assert_eq!(tokens[2].kind, TokenKind::Eol);
    }

    #[test]
    fn test_invalid_symbol() {
        for c in "!%&*+/;<=>?@[\\]^`{|}~".chars() {
            let string = c.to_string();
            assert_eq!(
                TokenKind::lexer(&string).next(),
                Some(Err(LexErr::InvalidSymbol)),
                "Expected {string:?} to be an invalid symbol"
            );
        }
    }
}
