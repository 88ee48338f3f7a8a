//! Chat command handling

pub mod dispatcher;
pub mod format;

pub use dispatcher::{parse_message, Command, CommandDispatcher, DispatcherSettings, ParsedMessage};
pub use format::{escape_html, format_rank_text};
