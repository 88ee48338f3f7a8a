//! Utility functions for the coordinator

use uuid::Uuid;

/// Generate a new unique game ID
pub fn generate_game_id() -> Uuid {
    Uuid::new_v4()
}

/// Key used by the command rate limiter
pub fn command_key(command: &str, channel_id: &str) -> String {
    format!("{}:{}", command, channel_id)
}

/// Cut `body` to at most `limit` bytes on a line boundary.
///
/// Returns the body unchanged when it already fits.
pub fn truncate_on_line(body: &str, limit: usize) -> (String, bool) {
    if body.len() <= limit {
        return (body.to_string(), false);
    }

    let mut end = limit;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    let head = &body[..end];
    let head = match head.rfind('\n') {
        Some(idx) => &head[..idx],
        None => head,
    };
    (head.to_string(), true)
}
