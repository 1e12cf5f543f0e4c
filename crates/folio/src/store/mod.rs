//! Bookstore operations exposed to the HTTP layer.

mod error;
mod service;

pub use error::StoreError;
pub use service::BookstoreService;
