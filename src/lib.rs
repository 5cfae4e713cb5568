//! An interactive MIPS assembler and simulator core.
//!
//! Source is assembled one line at a time directly into a [`sim::Machine`],
//! which can then execute it. Lines may refer to labels that are defined later:
//! those references are patched in place as soon as the label is defined.
//!
//! # Usage
//!
//! To assemble MIPS source code, feed it line by line to a machine:
//! ```
//! use mips_ensemble::sim::Machine;
//!
//! let mut machine = Machine::new(Default::default());
//! for line in [
//!     "        .data",
//!     "msg:    .asciiz \"hello\"",
//!     "        .text",
//!     "main:   la $a0, msg",
//!     "        li $v0, 4",
//!     "        syscall",
//!     "        j end",
//!     "end:    li $v0, 10",
//!     "        syscall",
//! ] {
//!     machine.assemble_line(line).unwrap();
//! }
//! assert!(!machine.has_unresolved_fixups());
//! ```
//!
//! Once assembled, the code can be executed with the machine:
//! ```
//! # use mips_ensemble::sim::Machine;
//! # let mut machine = Machine::new(Default::default());
//! # machine.assemble_line("li $v0, 10").unwrap();
//! # machine.assemble_line("syscall").unwrap();
//! machine.run().unwrap(); // <-- Result can be handled accordingly
//! assert!(machine.halted());
//! ```
//!
//! If a line fails to assemble, nothing about the machine changes,
//! and the error points to where in the line the problem is:
//! ```
//! use mips_ensemble::sim::Machine;
//! use mips_ensemble::err::Error;
//!
//! let mut machine = Machine::new(Default::default());
//! let err = machine.assemble_line("addi $t0, $t0, 70000").unwrap_err();
//! assert_eq!(err.span().map(|s| s.first()), Some(15..20));
//! assert!(err.help().is_some());
//! ```
//!
//! If more granularity is needed for simulation, there are also step and breakpoint functions.
//! See the [`sim`] module for more details.
#![warn(missing_docs)]

pub mod parse;
pub mod ast;
pub mod asm;
pub mod sim;
pub mod err;
