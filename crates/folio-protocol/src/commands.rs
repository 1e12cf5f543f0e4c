//! Typed commands understood by the bookstore worker.
//!
//! Every command renders to exactly one line. The worker splits lines on
//! single spaces and reads at most [`MAX_LINE_LEN`] bytes, so arguments are
//! checked against that grammar before rendering: a form value can never
//! smuggle a second command into the worker's input.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::replies::{Privilege, ReplyShape};

/// Longest line the worker accepts.
pub const MAX_LINE_LEN: usize = 1024;

/// Columns in one `show` row: ISBN, name, author, keyword, price, quantity.
pub const BOOK_ROW_FIELDS: usize = 6;

/// An argument that cannot be expressed in the line grammar.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidArgument {
    #[error("{field} must not be empty")]
    Empty { field: &'static str },

    #[error("{field} must not contain whitespace")]
    Whitespace { field: &'static str },

    #[error("{field} must not contain quotes")]
    Quote { field: &'static str },

    #[error("{field} must be a non-negative amount")]
    Amount { field: &'static str },

    #[error("command is longer than {MAX_LINE_LEN} bytes")]
    TooLong,
}

/// A book attribute that `modify` can change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "field", content = "value", rename_all = "lowercase")]
pub enum BookField {
    Name(String),
    Author(String),
    Isbn(String),
    Keyword(String),
    Price(f64),
}

/// A `show` filter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "field", content = "value", rename_all = "lowercase")]
pub enum BookFilter {
    Name(String),
    Author(String),
    Isbn(String),
    Keyword(String),
}

/// One command line for the worker.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// `su <id> <password>`
    SwitchUser { id: String, password: String },
    /// `register <id> <password> <name>`
    Register {
        id: String,
        password: String,
        name: String,
    },
    /// `passwd <id> <oldPassword> <newPassword>`
    ChangePassword {
        id: String,
        old_password: String,
        new_password: String,
    },
    /// `useradd <id> <password> <priority> <name>`
    AddUser {
        id: String,
        password: String,
        privilege: Privilege,
        name: String,
    },
    /// `delete <id>`
    DeleteUser { id: String },
    /// `buy <isbn> <quantity>`
    Buy { isbn: String, quantity: u32 },
    /// `select <isbn>`
    Select { isbn: String },
    /// `import <quantity> <totalCost>`
    Import { quantity: u32, total_cost: f64 },
    /// `modify -<field>=<value>`
    Modify(BookField),
    /// `show [-<field>=<value>]`
    Show(Option<BookFilter>),
    /// `show finance [<limit>]`
    ShowFinance { limit: Option<u32> },
    /// `logout`
    Logout,
    /// `exit`
    Exit,
}

impl Command {
    /// The first token of the rendered line. Safe to log: it never carries
    /// user data.
    pub fn verb(&self) -> &'static str {
        match self {
            Self::SwitchUser { .. } => "su",
            Self::Register { .. } => "register",
            Self::ChangePassword { .. } => "passwd",
            Self::AddUser { .. } => "useradd",
            Self::DeleteUser { .. } => "delete",
            Self::Buy { .. } => "buy",
            Self::Select { .. } => "select",
            Self::Import { .. } => "import",
            Self::Modify(_) => "modify",
            Self::Show(_) | Self::ShowFinance { .. } => "show",
            Self::Logout => "logout",
            Self::Exit => "exit",
        }
    }

    /// How the worker answers this command.
    pub fn reply_shape(&self) -> ReplyShape {
        match self {
            Self::Show(_) => ReplyShape::CountPrefixed {
                fields: BOOK_ROW_FIELDS,
            },
            Self::Exit => ReplyShape::Silent,
            _ => ReplyShape::Single,
        }
    }

    /// Renders the command as one line, without the trailing newline.
    pub fn to_line(&self) -> Result<String, InvalidArgument> {
        let mut line = LineBuilder::new(self.verb());

        match self {
            Self::SwitchUser { id, password } => {
                line.token("id", id)?;
                line.token("password", password)?;
            }
            Self::Register { id, password, name } => {
                line.token("id", id)?;
                line.token("password", password)?;
                line.token("name", name)?;
            }
            Self::ChangePassword {
                id,
                old_password,
                new_password,
            } => {
                line.token("id", id)?;
                line.token("old password", old_password)?;
                line.token("new password", new_password)?;
            }
            Self::AddUser {
                id,
                password,
                privilege,
                name,
            } => {
                line.token("id", id)?;
                line.token("password", password)?;
                line.raw(&privilege.level().to_string());
                line.token("name", name)?;
            }
            Self::DeleteUser { id } => line.token("id", id)?,
            Self::Buy { isbn, quantity } => {
                line.token("ISBN", isbn)?;
                line.raw(&quantity.to_string());
            }
            Self::Select { isbn } => line.token("ISBN", isbn)?,
            Self::Import {
                quantity,
                total_cost,
            } => {
                line.raw(&quantity.to_string());
                line.amount("total cost", *total_cost)?;
            }
            Self::Modify(field) => match field {
                BookField::Name(value) => line.quoted_option("name", value)?,
                BookField::Author(value) => line.quoted_option("author", value)?,
                BookField::Isbn(value) => line.option("ISBN", value)?,
                BookField::Keyword(value) => line.quoted_option("keyword", value)?,
                BookField::Price(value) => {
                    let rendered = render_amount("price", *value)?;
                    line.option("price", &rendered)?;
                }
            },
            Self::Show(filter) => match filter {
                None => {}
                Some(BookFilter::Name(value)) => line.quoted_option("name", value)?,
                Some(BookFilter::Author(value)) => line.quoted_option("author", value)?,
                Some(BookFilter::Isbn(value)) => line.option("ISBN", value)?,
                Some(BookFilter::Keyword(value)) => line.quoted_option("keyword", value)?,
            },
            Self::ShowFinance { limit } => {
                line.raw("finance");
                if let Some(limit) = limit {
                    line.raw(&limit.to_string());
                }
            }
            Self::Logout | Self::Exit => {}
        }

        line.finish()
    }
}

/// Accumulates space-separated tokens, validating each one.
struct LineBuilder {
    buf: String,
}

impl LineBuilder {
    fn new(verb: &str) -> Self {
        Self {
            buf: verb.to_string(),
        }
    }

    fn raw(&mut self, text: &str) {
        self.buf.push(' ');
        self.buf.push_str(text);
    }

    fn token(&mut self, field: &'static str, value: &str) -> Result<(), InvalidArgument> {
        check_token(field, value)?;
        self.raw(value);
        Ok(())
    }

    fn option(&mut self, name: &'static str, value: &str) -> Result<(), InvalidArgument> {
        check_token(name, value)?;
        self.raw(&format!("-{}={}", name, value));
        Ok(())
    }

    fn quoted_option(&mut self, name: &'static str, value: &str) -> Result<(), InvalidArgument> {
        check_token(name, value)?;
        if value.contains('"') {
            return Err(InvalidArgument::Quote { field: name });
        }
        self.raw(&format!("-{}=\"{}\"", name, value));
        Ok(())
    }

    fn amount(&mut self, field: &'static str, value: f64) -> Result<(), InvalidArgument> {
        let rendered = render_amount(field, value)?;
        self.raw(&rendered);
        Ok(())
    }

    fn finish(self) -> Result<String, InvalidArgument> {
        if self.buf.len() > MAX_LINE_LEN {
            return Err(InvalidArgument::TooLong);
        }
        Ok(self.buf)
    }
}

fn check_token(field: &'static str, value: &str) -> Result<(), InvalidArgument> {
    if value.is_empty() {
        return Err(InvalidArgument::Empty { field });
    }
    if value.chars().any(char::is_whitespace) {
        return Err(InvalidArgument::Whitespace { field });
    }
    Ok(())
}

fn render_amount(field: &'static str, value: f64) -> Result<String, InvalidArgument> {
    if !value.is_finite() || value < 0.0 {
        return Err(InvalidArgument::Amount { field });
    }
    Ok(format!("{:.2}", value))
}
