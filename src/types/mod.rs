//! Shared types for Tollgate

pub mod error;

pub use error::{Result, TollgateError};
