pub mod error;
pub mod service;

pub use error::{HashError, Result};
pub use service::{digest, hex_digest, HashService};
