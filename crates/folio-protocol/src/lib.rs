//! Wire grammar of the bookstore worker.
//!
//! The worker speaks a line-oriented protocol over its standard streams:
//!
//! ```text
//! Folio --[one command per line]--> Bookstore
//!       <--[one or more reply lines]--
//! ```
//!
//! This crate owns both directions of that grammar and nothing else:
//!
//! 1. **Commands render to exactly one line.** Arguments that would split the
//!    line or inject a second command are rejected before anything is written.
//! 2. **Every command knows its reply shape.** The multiplexer reads exactly
//!    the lines a command is owed, never more.
//! 3. **Replies are parsed strictly.** A value the grammar does not allow is a
//!    protocol error, not a default.

pub mod commands;
pub mod replies;

pub use commands::{BOOK_ROW_FIELDS, BookField, BookFilter, Command, InvalidArgument, MAX_LINE_LEN};
pub use replies::{
    BookRow, FinanceSummary, INVALID_SENTINEL, Privilege, Reply, ReplyError, ReplyShape, Row,
    SUCCESS_TOKEN, parse_amount,
};
