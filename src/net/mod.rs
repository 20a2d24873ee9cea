pub mod diagnostics;

pub use diagnostics::{DiagnosticsSnapshot, NetworkDiagnostics, Sample};
