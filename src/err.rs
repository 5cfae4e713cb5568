//! Error interface for this crate.
//!
//! Each stage of the pipeline has its own error type:
//! - [`LexErr`]: errors in tokenizing a line
//! - [`ParseErr`]: errors in matching tokens to an instruction or directive
//! - [`AsmErr`]: errors in encoding, label definition, or fixup resolution
//! - [`SimErr`]: errors while executing instructions
//!
//! All of them implement the [`Error`] trait, which exposes the location of the error
//! in the source line (if known) and a hint on how to fix it.
use std::borrow::Cow;
use std::ops::Range;

pub use crate::parse::lex::LexErr;
pub use crate::parse::ParseErr;
pub use crate::asm::AsmErr;
pub use crate::sim::SimErr;

/// Unified error interface for all errors in this crate.
pub trait Error: std::error::Error {
    /// The range(s) in the source line where this error occurred, if known.
    fn span(&self) -> Option<ErrSpan> {
        None
    }

    /// A brief explanation of how to fix the error, if one exists.
    fn help(&self) -> Option<Cow<str>>;
}

/// The location(s) in a source line which an error refers to.
#[derive(Debug, PartialEq, Eq, Hash, Clone)]
pub enum ErrSpan {
    /// A single contiguous range.
    One(Range<usize>),
    /// Two ranges (e.g., an operand and the instruction it belongs to).
    Two([Range<usize>; 2]),
    /// Any other number of ranges.
    Many(Vec<Range<usize>>)
}
impl ErrSpan {
    /// Gets the first range of this span.
    pub fn first(&self) -> Range<usize> {
        match self {
            ErrSpan::One(r) => r.clone(),
            ErrSpan::Two([r, _]) => r.clone(),
            ErrSpan::Many(rs) => rs.first().cloned().unwrap_or(0..0),
        }
    }

    /// Iterates over every range of this span.
    pub fn iter(&self) -> impl Iterator<Item = &Range<usize>> {
        match self {
            ErrSpan::One(r) => std::slice::from_ref(r).iter(),
            ErrSpan::Two(rs) => rs.iter(),
            ErrSpan::Many(rs) => rs.iter(),
        }
    }
}
impl From<Range<usize>> for ErrSpan {
    fn from(value: Range<usize>) -> Self {
        ErrSpan::One(value)
    }
}
impl From<[Range<usize>; 2]> for ErrSpan {
    fn from(value: [Range<usize>; 2]) -> Self {
        ErrSpan::Two(value)
    }
}
impl From<Vec<Range<usize>>> for ErrSpan {
    fn from(value: Vec<Range<usize>>) -> Self {
        match <[_; 1]>::try_from(value) {
            Ok([r]) => ErrSpan::One(r),
            Err(value) => match <[_; 2]>::try_from(value) {
                Ok(rs) => ErrSpan::Two(rs),
                Err(value) => ErrSpan::Many(value),
            }
        }
    }
}
