//! Terminal interface for the KBQA chatbot

pub mod logging;
mod ui;

#[cfg(test)]
mod tests;

pub use ui::{display_banner, format_sources, handle_input_with_history, print_help, print_sources};

// Re-export core types
pub use kbqa_core::{Error, Result};
