//! Compiled pattern cache
//!
//! Extraction rules are plain text that is matched thousands of times per
//! crawl pass. Patterns are compiled once per distinct source text and shared
//! between all workers.

use dashmap::DashMap;
use regex::Regex;

/// Thread-safe memo of compiled patterns keyed by their source text
#[derive(Debug, Default)]
pub struct PatternCache {
    patterns: DashMap<String, Regex>,
}

impl PatternCache {
    /// Creates an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the compiled pattern for `pattern`, compiling it on a miss
    ///
    /// Two workers missing on the same text at once may both compile it; the
    /// first insert wins and both receive an equivalent pattern.
    pub fn get(&self, pattern: &str) -> Result<Regex, regex::Error> {
        if let Some(compiled) = self.patterns.get(pattern) {
            return Ok(compiled.clone());
        }

        let compiled = Regex::new(pattern)?;
        let entry = self
            .patterns
            .entry(pattern.to_string())
            .or_insert(compiled);
        Ok(entry.value().clone())
    }

    /// Drops every cached pattern
    pub fn clear(&self) {
        self.patterns.clear();
    }

    /// Number of cached patterns
    pub fn size(&self) -> usize {
        self.patterns.len()
    }
}

/// Returns the first capture group of the first match, or the whole match
/// when the pattern has no groups
pub fn capture_first(re: &Regex, text: &str) -> Option<String> {
    let caps = re.captures(text)?;
    caps.get(1)
        .or_else(|| caps.get(0))
        .map(|m| m.as_str().to_string())
}

/// Returns the capture used for each successive match in document order
pub fn capture_all<'t>(re: &Regex, text: &'t str) -> Vec<&'t str> {
    re.captures_iter(text)
        .filter_map(|caps| caps.get(1).or_else(|| caps.get(0)))
        .map(|m| m.as_str())
        .collect()
}
