//! Telemetry, text helpers, and program state persistence.

pub mod state;
pub mod telemetry;
pub mod text;

pub use state::*;
pub use telemetry::*;
pub use text::*;
