//! Deterministic text cleanup shared by the local engines.
//!
//! Every rule is a pure `&str -> String` pass. Order matters: line endings
//! are normalised before trimming, and fences are stripped before heading
//! spacing so heading detection sees clean input.

use once_cell::sync::Lazy;
use regex::Regex;

/// Cleanup for extracted plain text.
pub(crate) fn clean_text(input: &str) -> String {
    let s = normalise_line_endings(input);
    let s = remove_invisible_chars(&s);
    let s = trim_trailing_whitespace(&s);
    let s = collapse_blank_lines(&s);
    ensure_final_newline(&s)
}

/// Cleanup for text that is already Markdown.
pub(crate) fn clean_markdown(input: &str) -> String {
    let s = strip_markdown_fences(input);
    let s = normalise_line_endings(&s);
    let s = remove_invisible_chars(&s);
    let s = trim_trailing_whitespace(&s);
    let s = collapse_blank_lines(&s);
    let s = normalise_heading_spacing(&s);
    ensure_final_newline(&s)
}

/// Render plain prose as Markdown paragraphs.
///
/// Characters Markdown would treat as structure at the start of a line are
/// escaped so the text renders as written.
pub(crate) fn prose_to_markdown(input: &str) -> String {
    let cleaned = clean_text(input);
    let escaped: Vec<String> = cleaned.lines().map(escape_line_start).collect();
    ensure_final_newline(&escaped.join("\n"))
}

/// Wrap structured text (JSON, YAML, ...) in a fenced code block.
pub(crate) fn fenced(language: &str, input: &str) -> String {
    let body = clean_text(input);
    let fence = if body.contains("```") { "~~~" } else { "```" };
    format!("{fence}{language}\n{}{fence}\n", body)
}

// ── Rule 1: Strip outer markdown fences ──────────────────────────────────

static RE_OUTER_FENCES: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)^```(?:markdown|md)?\n(.*)\n```\s*$").unwrap()
});

fn strip_markdown_fences(input: &str) -> String {
    match RE_OUTER_FENCES.captures(input.trim()) {
        Some(caps) => caps[1].to_string(),
        None => input.to_string(),
    }
}

// ── Rule 2: Normalise line endings ───────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

// ── Rule 3: Remove invisible Unicode ─────────────────────────────────────

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        [
            '\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}',
        ],
        "",
    )
}

// ── Rule 4: Trim trailing whitespace per line ────────────────────────────

fn trim_trailing_whitespace(input: &str) -> String {
    input
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
}

// ── Rule 5: Collapse excessive blank lines ───────────────────────────────

static RE_BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

fn collapse_blank_lines(input: &str) -> String {
    RE_BLANK_LINES.replace_all(input, "\n\n").into_owned()
}

// ── Rule 6: Blank line before headings ───────────────────────────────────

static RE_HEADING: Lazy<Regex> = Lazy::new(|| Regex::new(r"^#{1,6}\s").unwrap());

fn normalise_heading_spacing(input: &str) -> String {
    let mut result = String::with_capacity(input.len() + 64);
    let mut in_code = false;
    for (i, line) in input.lines().enumerate() {
        if line.starts_with("```") || line.starts_with("~~~") {
            in_code = !in_code;
        }
        if !in_code && i > 0 && RE_HEADING.is_match(line) {
            let trimmed = result.trim_end_matches('\n').len();
            result.truncate(trimmed);
            result.push_str("\n\n");
        }
        result.push_str(line);
        result.push('\n');
    }
    result
}

// ── Rule 7: Single final newline ─────────────────────────────────────────

fn ensure_final_newline(input: &str) -> String {
    let trimmed = input.trim_end();
    if trimmed.is_empty() {
        String::from("\n")
    } else {
        format!("{trimmed}\n")
    }
}

// ── Escaping ─────────────────────────────────────────────────────────────

static RE_BLOCK_START: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\s*)(#{1,6}\s|[-+*]\s|>|\d+[.)]\s|```|~~~|\|)").unwrap()
});

fn escape_line_start(line: &str) -> String {
    match RE_BLOCK_START.captures(line) {
        Some(caps) => {
            let indent = caps.get(1).map_or("", |m| m.as_str());
            format!("{indent}\\{}", &line[indent.len()..])
        }
        None => line.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_text_normalises_whitespace() {
        let out = clean_text("a  \r\nb\u{200B}\n\n\n\n\nc");
        assert_eq!(out, "a\nb\n\nc\n");
    }

    #[test]
    fn clean_markdown_strips_fences_and_spaces_headings() {
        let out = clean_markdown("```markdown\n# Title\ntext\n## Section\nmore\n```");
        assert_eq!(out, "# Title\ntext\n\n## Section\nmore\n");
    }

    #[test]
    fn headings_inside_code_are_left_alone() {
        let out = clean_markdown("intro\n```sh\n# comment\n```\n");
        assert_eq!(out, "intro\n```sh\n# comment\n```\n");
    }

    #[test]
    fn prose_escapes_structural_line_starts() {
        let out = prose_to_markdown("# not a heading\n- not a list\nplain");
        assert_eq!(out, "\\# not a heading\n\\- not a list\nplain\n");
    }

    #[test]
    fn fenced_picks_a_safe_fence() {
        assert_eq!(fenced("json", "{}"), "```json\n{}\n```\n");
        assert!(fenced("", "has ``` inside").starts_with("~~~"));
    }

    #[test]
    fn empty_input_yields_single_newline() {
        assert_eq!(clean_text("   \n\n"), "\n");
    }
}
