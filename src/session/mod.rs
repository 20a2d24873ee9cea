pub mod types;

pub use types::{format_eta, FailureKind, SessionStatus, UploadFailure, UploadSession};
