use std::sync::LazyLock;

use regex::Regex;
use tracing::warn;

/// Longest file stem, in characters, before the extension is added.
pub const MAX_NAME_CHARS: usize = 251;
/// Longest file name, in UTF-8 bytes.
pub const MAX_NAME_BYTES: usize = 255;

static SENTENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)([^.!?]+[.!?]+)|([^.!?]+$)").unwrap());
static CONTROL_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[\x00-\x1F\x7F-\x{9F}]").unwrap());
static ZERO_WIDTH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\u{200B}-\u{200F}\u{2060}\u{FEFF}]").unwrap());
static WHITESPACE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());
static WITHOUT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r" [wW]\s?/\s?[oO0]").unwrap());
static WITH_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r" [wW]/").unwrap());
static FRACTION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)\s?/\s?(\d+)").unwrap());
static ALTERNATIVE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\w+)\s?/\s?(\w+)").unwrap());
static ID_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^\w\s-]").unwrap());

/// Split text into narration chunks of at most `max_chars` characters.
///
/// Whole sentences are packed together where they fit. A sentence longer than
/// the limit is split at word boundaries, and a single over-long word at
/// character boundaries.
pub fn chunk_text(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut units = Vec::new();
    for m in SENTENCE_RE.find_iter(text) {
        let s = m.as_str().trim();
        if s.is_empty() {
            continue;
        }
        if s.chars().count() <= max_chars {
            units.push(s.to_string());
        } else {
            units.extend(split_long_sentence(s, max_chars));
        }
    }
    if units.is_empty() {
        warn!("No text to chunk");
        return Vec::new();
    }

    let mut chunks = Vec::new();
    let mut current = String::new();
    for unit in units {
        if current.is_empty() {
            current = unit;
        } else if current.chars().count() + 1 + unit.chars().count() <= max_chars {
            current.push(' ');
            current.push_str(&unit);
        } else {
            chunks.push(std::mem::replace(&mut current, unit));
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

fn split_long_sentence(sentence: &str, max_chars: usize) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut current = String::new();
    for word in sentence.split_whitespace() {
        let len = word.chars().count();
        if len > max_chars {
            if !current.is_empty() {
                pieces.push(std::mem::take(&mut current));
            }
            let chars: Vec<char> = word.chars().collect();
            pieces.extend(chars.chunks(max_chars).map(|c| c.iter().collect::<String>()));
        } else if current.is_empty() {
            current.push_str(word);
        } else if current.chars().count() + 1 + len <= max_chars {
            current.push(' ');
            current.push_str(word);
        } else {
            pieces.push(std::mem::replace(&mut current, word.to_string()));
        }
    }
    if !current.is_empty() {
        pieces.push(current);
    }
    pieces
}

/// Greedy word wrap to `width` characters. Words longer than `width` get a line of their own.
pub fn wrap_text(s: &str, width: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    for word in s.split_whitespace() {
        let needed = current.chars().count() + word.chars().count() + 1;
        if needed > width && !current.is_empty() {
            lines.push(std::mem::take(&mut current));
            current.push_str(word);
        } else {
            if !current.is_empty() {
                current.push(' ');
            }
            current.push_str(word);
        }
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

/// Turn a thread title into a safe file stem.
///
/// Strips control and zero-width characters, expands slash shorthand
/// ("w/" -> "with", "1/2" -> "1 of 2", "a/b" -> "a or b"), drops any remaining
/// path separators and caps the result at [`MAX_NAME_CHARS`] characters and
/// [`MAX_NAME_BYTES`] bytes. Applying it twice gives the same result.
pub fn sanitize_filename(name: &str) -> String {
    let name = CONTROL_RE.replace_all(name, "");
    let name = ZERO_WIDTH_RE.replace_all(&name, "");
    let name = WHITESPACE_RE.replace_all(&name, " ");
    let name = format!(" {}", name.trim());

    let name = WITHOUT_RE.replace_all(&name, " without ");
    let name = WITH_RE.replace_all(&name, " with ");
    let name = FRACTION_RE.replace_all(&name, "$1 of $2");
    let name = ALTERNATIVE_RE.replace_all(&name, "$1 or $2");
    let name = name.replace(['/', '\\'], " ");
    let name = WHITESPACE_RE.replace_all(&name, " ");

    let mut name: String = name.trim().chars().take(MAX_NAME_CHARS).collect();
    while name.len() > MAX_NAME_BYTES {
        name.pop();
    }
    name.trim_end().to_string()
}

/// Reduce a thread id to word characters, whitespace and dashes.
pub fn sanitize_id(id: &str) -> String {
    ID_RE.replace_all(id, "").into_owned()
}
