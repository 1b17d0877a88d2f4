//! Terminal front end: password prompts, the progress bar and result messages.

pub mod display;
pub mod progress;
pub mod prompt;

pub use display::show_success;
