//! Bookstore operation errors.

use folio_protocol::{InvalidArgument, Privilege};
use thiserror::Error;

use crate::mux::ExchangeError;

#[derive(Debug, Error)]
pub enum StoreError {
    /// The backend refused the credentials.
    #[error("authentication failed")]
    AuthFailed,

    /// The backend answered `Invalid`.
    #[error("operation `{verb}` rejected by the bookstore")]
    Rejected { verb: &'static str },

    /// The session lacks the privilege the operation needs.
    #[error("requires {required} privilege, session has {current}")]
    Forbidden {
        required: Privilege,
        current: Privilege,
    },

    /// An argument would break the command line grammar.
    #[error(transparent)]
    InvalidArgument(#[from] InvalidArgument),

    #[error(transparent)]
    Exchange(#[from] ExchangeError),
}
