//! Reply shapes and typed reply values.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Literal reply the worker prints for any rejected command.
pub const INVALID_SENTINEL: &str = "Invalid";

/// Opaque success token printed by commands without a payload.
pub const SUCCESS_TOKEN: &str = "Success";

/// How many lines a command is owed, and how to assemble them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyShape {
    /// Exactly one line.
    Single,
    /// A count line followed by that many tab-separated rows of `fields` columns.
    CountPrefixed { fields: usize },
    /// No reply at all (`exit`).
    Silent,
}

/// One tab-separated reply row.
pub type Row = Vec<String>;

/// An assembled reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// A single line, returned as-is. Count-prefixed exchanges answered with
    /// the sentinel also end up here.
    Line(String),
    /// The rows of a count-prefixed reply, in arrival order.
    Rows(Vec<Row>),
    /// Nothing was read.
    Empty,
}

impl Reply {
    /// True when the worker rejected the command.
    pub fn is_rejected(&self) -> bool {
        matches!(self, Self::Line(line) if line == INVALID_SENTINEL)
    }

    /// The single line of this reply, if it is one.
    pub fn as_line(&self) -> Option<&str> {
        match self {
            Self::Line(line) => Some(line),
            _ => None,
        }
    }
}

/// Errors raised while interpreting a reply value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReplyError {
    #[error("expected {expected}, got {got:?}")]
    Unexpected { expected: &'static str, got: String },

    #[error("expected {expected} fields, got {got}")]
    FieldCount { expected: usize, got: usize },
}

impl ReplyError {
    fn unexpected(expected: &'static str, got: impl Into<String>) -> Self {
        Self::Unexpected {
            expected,
            got: got.into(),
        }
    }
}

/// Privilege tier of the logged-in account.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Privilege {
    /// Nobody is logged in.
    #[default]
    Guest,
    /// A registered customer.
    Customer,
    /// Store staff.
    Staff,
    /// The store owner.
    Admin,
}

impl Privilege {
    /// Numeric level used on the wire.
    pub fn level(self) -> u8 {
        match self {
            Self::Guest => 0,
            Self::Customer => 1,
            Self::Staff => 3,
            Self::Admin => 7,
        }
    }

    /// Maps a wire level back to a tier.
    pub fn from_level(level: u8) -> Option<Self> {
        match level {
            0 => Some(Self::Guest),
            1 => Some(Self::Customer),
            3 => Some(Self::Staff),
            7 => Some(Self::Admin),
            _ => None,
        }
    }

    /// Parses the reply to `su`. Only the three loggable tiers are valid.
    pub fn from_login_reply(line: &str) -> Option<Self> {
        match line.trim() {
            "1" => Some(Self::Customer),
            "3" => Some(Self::Staff),
            "7" => Some(Self::Admin),
            _ => None,
        }
    }
}

impl fmt::Display for Privilege {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Guest => write!(f, "guest"),
            Self::Customer => write!(f, "customer"),
            Self::Staff => write!(f, "staff"),
            Self::Admin => write!(f, "admin"),
        }
    }
}

impl FromStr for Privilege {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "guest" | "0" => Ok(Self::Guest),
            "customer" | "1" => Ok(Self::Customer),
            "staff" | "3" => Ok(Self::Staff),
            "admin" | "7" => Ok(Self::Admin),
            _ => Err(format!("unknown privilege: {}", s)),
        }
    }
}

/// One row of a `show` reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookRow {
    pub isbn: String,
    pub name: String,
    pub author: String,
    pub keyword: String,
    pub price: f64,
    pub quantity: u64,
}

impl BookRow {
    /// Builds a row from the six columns the worker prints.
    pub fn from_fields(fields: &[String]) -> Result<Self, ReplyError> {
        let [isbn, name, author, keyword, price, quantity] = fields else {
            return Err(ReplyError::FieldCount {
                expected: crate::BOOK_ROW_FIELDS,
                got: fields.len(),
            });
        };

        let price = parse_amount(price)?;
        let quantity = quantity
            .trim()
            .parse::<u64>()
            .map_err(|_| ReplyError::unexpected("a stock quantity", quantity.as_str()))?;

        Ok(Self {
            isbn: isbn.clone(),
            name: name.clone(),
            author: author.clone(),
            keyword: keyword.clone(),
            price,
            quantity,
        })
    }
}

/// Totals printed by `show finance`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FinanceSummary {
    pub income: f64,
    pub expenditure: f64,
}

impl FinanceSummary {
    /// Parses `income\texpenditure`, or the worker's own `+ income - expenditure`.
    pub fn parse(line: &str) -> Result<Self, ReplyError> {
        let line = line.trim();
        let (income, expenditure) = if let Some((income, expenditure)) = line.split_once('\t') {
            (income, expenditure)
        } else if let Some(rest) = line.strip_prefix('+') {
            rest.split_once('-')
                .ok_or_else(|| ReplyError::unexpected("a finance summary", line))?
        } else {
            return Err(ReplyError::unexpected("a finance summary", line));
        };

        Ok(Self {
            income: parse_amount(income)?,
            expenditure: parse_amount(expenditure)?,
        })
    }
}

/// Parses a non-negative decimal amount such as `12.50`.
pub fn parse_amount(text: &str) -> Result<f64, ReplyError> {
    let trimmed = text.trim();
    match trimmed.parse::<f64>() {
        Ok(value) if value.is_finite() && value >= 0.0 => Ok(value),
        _ => Err(ReplyError::unexpected("a non-negative amount", trimmed)),
    }
}
