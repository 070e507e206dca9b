//! CLI commands

mod context;
mod integrate;
mod preview;
mod style;

pub use context::RequestOptions;
pub use integrate::{IntegrateOptions, run_integrate};
pub use preview::{PreviewOptions, run_preview};
