//! Deterministic cleanup of worker-produced text before it lands in a block.
//!
//! Recognisers and table-structure models return text with Windows line
//! endings, zero-width characters from the source PDF, ragged trailing
//! whitespace and, for tables, the occasional code fence around the
//! markdown. Each rule below is a pure `&str → String` pass.
//!
//! Order matters: fences are stripped before line endings are normalised so
//! the fence pattern sees the raw reply, and invisible characters go before
//! trimming so a line holding only a zero-width space becomes blank.

use once_cell::sync::Lazy;
use regex::Regex;

/// Clean free text (OCR output, image descriptions).
pub fn clean_text(input: &str) -> String {
    let s = normalise_line_endings(input);
    let s = remove_invisible_chars(&s);
    let s = trim_trailing_whitespace(&s);
    let s = collapse_blank_lines(&s);
    s.trim().to_string()
}

/// Clean table markdown from the table-structure capability.
pub fn clean_table_markdown(input: &str) -> String {
    let s = strip_outer_fences(input);
    let s = clean_text(&s);
    fix_missing_separator(&s)
}

// ── Outer fences ─────────────────────────────────────────────────────────

static RE_OUTER_FENCES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```(?:markdown|md)?\r?\n(.*?)\r?\n```\s*$").unwrap());

fn strip_outer_fences(input: &str) -> String {
    match RE_OUTER_FENCES.captures(input.trim()) {
        Some(caps) => caps[1].to_string(),
        None => input.to_string(),
    }
}

// ── Whitespace ───────────────────────────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        ['\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}'],
        "",
    )
}

fn trim_trailing_whitespace(input: &str) -> String {
    input.lines().map(str::trim_end).collect::<Vec<_>>().join("\n")
}

static RE_BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

/// Runs of blank lines become a single blank line.
fn collapse_blank_lines(input: &str) -> String {
    RE_BLANK_LINES.replace_all(input, "\n\n").into_owned()
}

// ── Tables ───────────────────────────────────────────────────────────────

fn is_table_row(line: &str) -> bool {
    let t = line.trim();
    t.starts_with('|') && t.ends_with('|') && t.len() > 2
}

fn is_separator_row(line: &str) -> bool {
    let t = line.trim();
    t.starts_with('|') && t.chars().all(|c| matches!(c, '|' | '-' | ':' | ' '))
}

/// Insert a `| --- |` row under a header row that lacks one.
fn fix_missing_separator(input: &str) -> String {
    let lines: Vec<&str> = input.lines().collect();
    let Some(header) = lines.first() else {
        return String::new();
    };
    let needs_separator = is_table_row(header)
        && !is_separator_row(header)
        && lines.get(1).is_some_and(|next| is_table_row(next) && !is_separator_row(next));
    if !needs_separator {
        return input.to_string();
    }
    let columns = header.matches('|').count().saturating_sub(1).max(1);
    let separator: String = std::iter::once("|")
        .chain(std::iter::repeat_n(" --- |", columns))
        .collect();
    let mut out = vec![header.to_string(), separator];
    out.extend(lines[1..].iter().map(|l| l.to_string()));
    out.join("\n")
}
