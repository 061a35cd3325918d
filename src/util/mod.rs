//! Shared utilities: run properties and progress display.

pub mod progress;
pub mod properties;

pub use progress::ProgressBar;
pub use properties::Properties;
