//! Book detail page extraction
//!
//! Applies a [`RuleSet`] to a source site's book detail page. Fields are
//! extracted in dependency order: nothing is trusted without a name, and the
//! optional fields are only read once the author matched as well.

use crate::crawler::Fetcher;
use crate::model::BookRecord;
use crate::rules::{capture_first, filter, non_blank, PatternCache, RuleSet};
use chrono::{NaiveDate, NaiveDateTime};
use std::sync::Arc;

/// Produces [`BookRecord`]s from detail pages
#[derive(Debug, Clone)]
pub struct MetadataExtractor {
    fetcher: Arc<Fetcher>,
    patterns: Arc<PatternCache>,
}

impl MetadataExtractor {
    pub fn new(fetcher: Arc<Fetcher>, patterns: Arc<PatternCache>) -> Self {
        Self { fetcher, patterns }
    }

    /// Fetches and parses the detail page of `source_book_id`
    ///
    /// Always returns a record. If the page is unavailable or the name
    /// pattern does not match, the record is empty and must not be persisted.
    pub async fn extract_book(&self, rules: &RuleSet, source_book_id: &str) -> BookRecord {
        let mut book = BookRecord::new(source_book_id);
        let url = rules.book_detail_url_for(source_book_id);

        match self.fetcher.fetch(&url, &rules.charset).await {
            Some(html) => self.parse_detail(rules, &mut book, &html),
            None => tracing::warn!("Detail page of book {} unavailable", source_book_id),
        }

        book
    }

    /// Fills `book` from already fetched detail page HTML
    pub fn parse_detail(&self, rules: &RuleSet, book: &mut BookRecord, html: &str) {
        let Some(name) = self.capture(&rules.book_name_pattern, html) else {
            tracing::debug!("Book name pattern did not match for {}", book.source_book_id);
            return;
        };

        if let Some(author) = self.capture(&rules.author_name_pattern, html) {
            book.author = Some(author);
            self.parse_optional_fields(rules, book, html, &name);
        } else {
            tracing::debug!("Author pattern did not match for '{}'", name);
        }

        book.name = Some(name);
        book.apply_ranking_defaults();
    }

    fn parse_optional_fields(
        &self,
        rules: &RuleSet,
        book: &mut BookRecord,
        html: &str,
        name: &str,
    ) {
        book.cover_url = self.capture_optional(&rules.pic_url_pattern, html).map(|url| {
            match non_blank(&rules.pic_url_prefix) {
                Some(prefix) if !url.is_empty() => format!("{}{}", prefix, url),
                _ => url,
            }
        });

        book.score = self
            .capture_optional(&rules.score_pattern, html)
            .and_then(|text| match text.trim().parse::<f64>() {
                Ok(score) => Some((score * 10.0).round() as i32),
                Err(_) => {
                    tracing::warn!("Unparseable score '{}' for '{}'", text, name);
                    None
                }
            });

        book.visit_count = self
            .capture_optional(&rules.visit_count_pattern, html)
            .and_then(|text| match text.trim().parse::<i64>() {
                Ok(visits) => Some(visits),
                Err(_) => {
                    tracing::warn!("Unparseable visit count '{}' for '{}'", text, name);
                    None
                }
            });

        book.description = self.extract_description(rules, html, name);

        // Labels missing from the status map are ignored.
        book.status = self
            .capture_optional(&rules.status_pattern, html)
            .and_then(|label| rules.status_code(label.trim()));

        if let Some(format) = non_blank(&rules.update_time_format_pattern) {
            if let Some(text) = self.capture_optional(&rules.update_time_pattern, html) {
                book.source_updated_at = parse_update_time(text.trim(), format);
                if book.source_updated_at.is_none() {
                    tracing::warn!(
                        "Could not parse update time '{}' with format '{}'",
                        text,
                        format
                    );
                }
            }
        }
    }

    fn extract_description(&self, rules: &RuleSet, html: &str, name: &str) -> Option<String> {
        let start = non_blank(&rules.desc_start)?;
        let end = non_blank(&rules.desc_end)?;
        let raw = filter::between(html, start, end)?;

        let cleaned = filter::clean_description_markup(&self.patterns, raw);
        let filters = filter::compile_filters(&self.patterns, non_blank(&rules.filter_desc));
        let filtered = filter::apply_filters(&cleaned, &filters);

        let trimmed = filtered.trim();
        let description = trimmed.strip_suffix(name).unwrap_or(trimmed);
        Some(description.to_string())
    }

    fn capture(&self, pattern: &str, html: &str) -> Option<String> {
        match self.patterns.get(pattern) {
            Ok(re) => capture_first(&re, html),
            Err(e) => {
                tracing::warn!("Invalid pattern '{}': {}", pattern, e);
                None
            }
        }
    }

    fn capture_optional(&self, pattern: &Option<String>, html: &str) -> Option<String> {
        non_blank(pattern).and_then(|pattern| self.capture(pattern, html))
    }
}

/// Converts a `yyyy-MM-dd HH:mm:ss` style format to strftime
///
/// Formats that already contain `%` are returned unchanged.
pub fn translate_time_format(format: &str) -> String {
    if format.contains('%') {
        return format.to_string();
    }

    let chars: Vec<char> = format.chars().collect();
    let mut translated = String::with_capacity(format.len() + 8);
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let run = chars[i..].iter().take_while(|&&x| x == c).count();
        let token = match (c, run) {
            ('y', 4) => Some("%Y"),
            ('y', 2) => Some("%y"),
            ('M', 1 | 2) => Some("%m"),
            ('d', 1 | 2) => Some("%d"),
            ('H', 1 | 2) => Some("%H"),
            ('m', 1 | 2) => Some("%M"),
            ('s', 1 | 2) => Some("%S"),
            _ => None,
        };

        match token {
            Some(token) => translated.push_str(token),
            None => translated.extend(&chars[i..i + run]),
        }
        i += run;
    }

    translated
}

/// Parses a site-reported update time; date-only formats parse at midnight
pub fn parse_update_time(text: &str, format: &str) -> Option<NaiveDateTime> {
    let format = translate_time_format(format);
    NaiveDateTime::parse_from_str(text, &format).ok().or_else(|| {
        NaiveDate::parse_from_str(text, &format)
            .ok()
            .and_then(|date| date.and_hms_opt(0, 0, 0))
    })
}
