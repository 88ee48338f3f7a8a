//! Text helpers for command replies

use crate::types::RankEntry;
use std::fmt::Write;

/// Escape the characters that are significant in HTML messages
pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Render a ranking as one line per entry.
///
/// A `...` line marks a gap between non-consecutive positions. The output is
/// HTML-escaped.
pub fn format_rank_text(ranking: &[RankEntry]) -> String {
    let mut out = String::from("\n");
    if ranking.is_empty() {
        out.push_str("None\n");
        return escape_html(&out);
    }

    let mut last_position = 0;
    for entry in ranking {
        if last_position != 0 && last_position + 1 != entry.position {
            out.push_str("...\n");
        }
        // writing to a String cannot fail
        let _ = writeln!(out, "{}. ({:>2}) {}", entry.position, entry.score, entry.name);
        last_position = entry.position;
    }
    escape_html(&out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rank(position: u32, score: i64, name: &str) -> RankEntry {
        RankEntry {
            position,
            score,
            name: name.to_string(),
        }
    }

    #[test]
    fn test_escape_html() {
        assert_eq!(escape_html("a < b && c > d"), "a &lt; b &amp;&amp; c &gt; d");
        assert_eq!(escape_html("plain"), "plain");
        // existing entities are escaped again
        assert_eq!(escape_html("&lt;"), "&amp;lt;");
    }

    #[test]
    fn test_empty_ranking() {
        assert_eq!(format_rank_text(&[]), "\nNone\n");
    }

    #[test]
    fn test_consecutive_ranking() {
        let text = format_rank_text(&[rank(1, 42, "Alice"), rank(2, 7, "Bob")]);
        assert_eq!(text, "\n1. (42) Alice\n2. ( 7) Bob\n");
    }

    #[test]
    fn test_gap_marker_and_escaping() {
        let text = format_rank_text(&[
            rank(1, 120, "Alice"),
            rank(2, 99, "Bob"),
            rank(7, 3, "<Eve>"),
        ]);
        assert_eq!(
            text,
            "\n1. (120) Alice\n2. (99) Bob\n...\n7. ( 3) &lt;Eve&gt;\n"
        );
    }
}
