// Text Processing Service
// Alphanumeric validation and line segmentation for per-line scoring

use regex::Regex;
use std::sync::OnceLock;

/// Count ASCII alphanumeric characters (the summed length of all `[a-zA-Z0-9]+` runs)
pub fn count_alnum_chars(text: &str) -> usize {
    text.chars().filter(char::is_ascii_alphanumeric).count()
}

/// Whether the text holds at least one ASCII letter or digit
pub fn has_alnum(text: &str) -> bool {
    text.chars().any(|c| c.is_ascii_alphanumeric())
}

// Either a sentence terminal followed by a space or an opening bracket,
// or a newline together with the whitespace run after it.
fn line_break_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[.?!][ \[(]|\n\s*").expect("line break regex"))
}

fn push_line<'a>(lines: &mut Vec<&'a str>, segment: &'a str) {
    let line = segment.trim_start();
    if !line.is_empty() {
        lines.push(line);
    }
}

/// Split text into lines for per-line perplexity.
///
/// A line ends after `.`, `?` or `!` when the next character is a space, `[` or `(`.
/// That character stays with the ending line, so `"One. Two"` gives `"One. "`.
/// A newline also ends a line; the newline and the whitespace run after it are
/// consumed. Leading whitespace is stripped from each line, trailing whitespace
/// only at the end of the text, and whitespace-only lines are discarded.
pub fn split_lines(text: &str) -> Vec<&str> {
    let text = text.trim_end();
    let mut lines = Vec::new();
    let mut last = 0;

    for m in line_break_re().find_iter(text) {
        let (cut, resume) = if text[m.start()..].starts_with('\n') {
            (m.start(), m.end())
        } else {
            (m.end(), m.end())
        };
        push_line(&mut lines, &text[last..cut]);
        last = resume;
    }
    push_line(&mut lines, &text[last..]);

    lines
}

/// First `max_chars` characters on a single line, with an ellipsis when cut
pub fn preview(s: &str, max_chars: usize) -> String {
    let mut out: String = s.chars().take(max_chars).collect();
    if s.chars().count() > max_chars {
        out.push_str("...");
    }
    out.replace('\n', " ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_count_alnum_ignores_punctuation_and_unicode() {
        assert_eq!(count_alnum_chars("Hello, world! 42"), 12);
        assert_eq!(count_alnum_chars("café"), 3);
        assert_eq!(count_alnum_chars("... --- !!!"), 0);
        assert!(!has_alnum(" -- \n"));
        assert!(has_alnum("-- a --"));
    }

    #[test]
    fn test_split_on_sentence_terminals() {
        let lines = split_lines("First one. Second one? Third one! Fourth");
        assert_eq!(lines, vec!["First one. ", "Second one? ", "Third one! ", "Fourth"]);
    }

    #[test]
    fn test_space_after_terminal_ends_line_before_bracket() {
        let lines = split_lines("See this. (aside) and [ref. [1]]");
        assert_eq!(lines, vec!["See this. ", "(aside) and [ref. ", "[1]]"]);
    }

    #[test]
    fn test_split_keeps_opening_bracket_with_previous_line() {
        assert_eq!(split_lines("the end.(x"), vec!["the end.(", "x"]);
        assert_eq!(split_lines("Really?[1] yes"), vec!["Really?[", "1] yes"]);
    }

    #[test]
    fn test_terminal_without_follower_does_not_split() {
        let lines = split_lines("Version 2.5 is out.Really");
        assert_eq!(lines, vec!["Version 2.5 is out.Really"]);
    }

    #[test]
    fn test_split_on_newlines_drops_blank_runs() {
        let lines = split_lines("alpha\n\n   beta\n\tgamma\n");
        assert_eq!(lines, vec!["alpha", "beta", "gamma"]);
    }

    #[test]
    fn test_terminal_then_newline() {
        let lines = split_lines("Done. \nNext line.\nLast");
        assert_eq!(lines, vec!["Done. ", "Next line.", "Last"]);
    }

    #[test]
    fn test_single_line_is_trimmed_input() {
        let text = "  a single line without any terminal punctuation at all  ";
        assert_eq!(split_lines(text), vec![text.trim()]);
    }

    #[test]
    fn test_empty_and_whitespace_only() {
        assert!(split_lines("").is_empty());
        assert!(split_lines(" \n\n \t").is_empty());
    }

    #[test]
    fn test_trailing_space_stays_inside_text() {
        let lines = split_lines("  One here.  Two here! Three  ");
        assert_eq!(lines, vec!["One here. ", "Two here! ", "Three"]);
    }

    #[test]
    fn test_preview() {
        assert_eq!(preview("abc\ndef", 10), "abc def");
        assert_eq!(preview("abcdef", 3), "abc...");
    }
}
