//! Text clean-up applied to extracted descriptions and chapter bodies

use crate::rules::PatternCache;
use regex::Regex;

/// Trailing `<br>` runs, tolerant of case, inner spaces and full-width spaces
const TRAILING_BREAKS: &str = r"(?i)(?:\s*<\s*br\s*/?\s*>)+[\s\u{3000}]*$";

/// Markup tags, removed before counting words
const MARKUP_TAG: &str = r"<[^>]+>";

/// Built-in description clean-up, applied before the configured filters
const DESCRIPTION_CLEANUP: [(&str, &str); 5] = [
    (r"<a[^<]+</a>", ""),
    (r"<font[^<]+</font>", ""),
    (r"<p>\s*</p>", ""),
    (r"<p>", ""),
    (r"</p>", "<br/>"),
];

/// Returns the text strictly between the first `start` marker and the first
/// `end` marker that follows it
pub fn between<'a>(text: &'a str, start: &str, end: &str) -> Option<&'a str> {
    let from = text.find(start)? + start.len();
    let rest = &text[from..];
    let to = rest.find(end)?;
    Some(&rest[..to])
}

/// Splits a newline-delimited filter list and compiles each non-blank line
///
/// Lines that fail to compile are logged and skipped; rule validation reports
/// them before a source is enabled.
pub fn compile_filters(cache: &PatternCache, rules: Option<&str>) -> Vec<Regex> {
    let Some(rules) = rules else {
        return Vec::new();
    };

    rules
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| match cache.get(line) {
            Ok(re) => Some(re),
            Err(e) => {
                tracing::warn!("Skipping invalid filter rule '{}': {}", line, e);
                None
            }
        })
        .collect()
}

/// Removes every match of each filter, in order
pub fn apply_filters(text: &str, filters: &[Regex]) -> String {
    filters.iter().fold(text.to_string(), |acc, re| {
        re.replace_all(&acc, "").into_owned()
    })
}

/// Applies the built-in description clean-up
pub fn clean_description_markup(cache: &PatternCache, text: &str) -> String {
    DESCRIPTION_CLEANUP
        .iter()
        .fold(text.to_string(), |acc, (pattern, replacement)| {
            match cache.get(pattern) {
                Ok(re) => re.replace_all(&acc, *replacement).into_owned(),
                Err(_) => acc,
            }
        })
}

/// Strips trailing `<br>`-family markup and the whitespace around it
pub fn strip_trailing_breaks(cache: &PatternCache, text: &str) -> String {
    match cache.get(TRAILING_BREAKS) {
        Ok(re) => re.replace(text, "").into_owned(),
        Err(_) => text.to_string(),
    }
}

/// Counts the characters left after removing markup tags and whitespace
pub fn word_count(cache: &PatternCache, text: &str) -> i64 {
    let stripped = match cache.get(MARKUP_TAG) {
        Ok(re) => re.replace_all(text, "").into_owned(),
        Err(_) => text.to_string(),
    };
    stripped
        .chars()
        .filter(|c| !is_markup_whitespace(*c))
        .count() as i64
}

/// Removes all whitespace, used to compare chapter names
pub fn strip_whitespace(text: &str) -> String {
    text.chars().filter(|c| !c.is_whitespace()).collect()
}

// Full-width spaces used for paragraph indentation count as characters.
fn is_markup_whitespace(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\n' | '\r' | '\x0B' | '\x0C')
}
