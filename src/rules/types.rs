use crate::rules::template::UrlTemplate;
use crate::rules::PatternCache;
use crate::{RuleError, RuleResult};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Marker a site shows in place of a chapter that has not been typed up yet
pub const DEFAULT_PENDING_CONTENT_MARKER: &str = "正在手打中";

/// Per-source extraction rules
///
/// Field names follow the JSON rule blobs stored with each source. The
/// historical `...Patten` spellings are accepted as aliases.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RuleSet {
    /// Character set used to decode pages when the server does not declare one
    pub charset: String,

    /// Listing of recently updated books, polled by the update worker
    pub update_book_list_url: Option<String>,

    /// Category listing template with `{catId}` and `{page}` placeholders
    pub book_list_url: Option<String>,

    /// `catId<N>` to category URL fragment (or full listing template)
    pub cat_id_rule: BTreeMap<String, String>,

    /// Status label on the detail page to lifecycle status code
    pub book_status_rule: BTreeMap<String, u8>,

    #[serde(alias = "bookIdPatten")]
    pub book_id_pattern: String,

    /// Current page number as reported by a listing page
    #[serde(alias = "pagePatten")]
    pub page_pattern: Option<String>,

    #[serde(alias = "totalPagePatten")]
    pub total_page_pattern: Option<String>,

    pub book_detail_url: String,

    #[serde(alias = "bookNamePatten")]
    pub book_name_pattern: String,

    #[serde(alias = "authorNamePatten")]
    pub author_name_pattern: String,

    #[serde(alias = "picUrlPatten")]
    pub pic_url_pattern: Option<String>,

    pub pic_url_prefix: Option<String>,

    #[serde(alias = "statusPatten")]
    pub status_pattern: Option<String>,

    #[serde(alias = "scorePatten")]
    pub score_pattern: Option<String>,

    #[serde(alias = "visitCountPatten")]
    pub visit_count_pattern: Option<String>,

    pub desc_start: Option<String>,
    pub desc_end: Option<String>,

    /// Newline-delimited patterns removed from the description
    pub filter_desc: Option<String>,

    #[serde(alias = "updateTimePatten")]
    pub update_time_pattern: Option<String>,

    #[serde(alias = "updateTimeFormatPatten")]
    pub update_time_format_pattern: Option<String>,

    pub book_index_url: String,

    /// Everything before this marker on the index page is ignored
    pub book_index_start: Option<String>,

    #[serde(alias = "indexIdPatten")]
    pub index_id_pattern: String,

    #[serde(alias = "indexNamePatten")]
    pub index_name_pattern: String,

    pub book_content_url: String,
    pub content_start: String,
    pub content_end: String,

    /// Newline-delimited patterns removed from chapter content
    pub filter_content: Option<String>,

    pub pending_content_marker: Option<String>,
}

impl Default for RuleSet {
    fn default() -> Self {
        Self {
            charset: "UTF-8".to_string(),
            update_book_list_url: None,
            book_list_url: None,
            cat_id_rule: BTreeMap::new(),
            book_status_rule: BTreeMap::new(),
            book_id_pattern: String::new(),
            page_pattern: None,
            total_page_pattern: None,
            book_detail_url: String::new(),
            book_name_pattern: String::new(),
            author_name_pattern: String::new(),
            pic_url_pattern: None,
            pic_url_prefix: None,
            status_pattern: None,
            score_pattern: None,
            visit_count_pattern: None,
            desc_start: None,
            desc_end: None,
            filter_desc: None,
            update_time_pattern: None,
            update_time_format_pattern: None,
            book_index_url: String::new(),
            book_index_start: None,
            index_id_pattern: String::new(),
            index_name_pattern: String::new(),
            book_content_url: String::new(),
            content_start: String::new(),
            content_end: String::new(),
            filter_content: None,
            pending_content_marker: None,
        }
    }
}

/// Treats blank optional settings as absent
pub fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.trim().is_empty())
}

impl RuleSet {
    /// Parses a rule set from its stored JSON blob
    ///
    /// Malformed JSON is an error; it never degrades to an empty rule set.
    pub fn from_json(json: &str) -> RuleResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Serializes the rule set back to JSON
    pub fn to_json(&self) -> RuleResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parses and validates a rule set in one step
    pub fn load(json: &str, cache: &PatternCache) -> RuleResult<Self> {
        let rules = Self::from_json(json)?;
        rules.validate(cache)?;
        Ok(rules)
    }

    /// Checks that every required field is present, every pattern compiles,
    /// and the content URL template resolves
    pub fn validate(&self, cache: &PatternCache) -> RuleResult<()> {
        let required: [(&'static str, &str); 10] = [
            ("bookIdPattern", self.book_id_pattern.as_str()),
            ("bookDetailUrl", self.book_detail_url.as_str()),
            ("bookNamePattern", self.book_name_pattern.as_str()),
            ("authorNamePattern", self.author_name_pattern.as_str()),
            ("bookIndexUrl", self.book_index_url.as_str()),
            ("indexIdPattern", self.index_id_pattern.as_str()),
            ("indexNamePattern", self.index_name_pattern.as_str()),
            ("bookContentUrl", self.book_content_url.as_str()),
            ("contentStart", self.content_start.as_str()),
            ("contentEnd", self.content_end.as_str()),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(RuleError::MissingField(field));
            }
        }

        let mut patterns: Vec<(&str, &str)> = vec![
            ("bookIdPattern", self.book_id_pattern.as_str()),
            ("bookNamePattern", self.book_name_pattern.as_str()),
            ("authorNamePattern", self.author_name_pattern.as_str()),
            ("indexIdPattern", self.index_id_pattern.as_str()),
            ("indexNamePattern", self.index_name_pattern.as_str()),
        ];
        let optional = [
            ("pagePattern", &self.page_pattern),
            ("totalPagePattern", &self.total_page_pattern),
            ("picUrlPattern", &self.pic_url_pattern),
            ("statusPattern", &self.status_pattern),
            ("scorePattern", &self.score_pattern),
            ("visitCountPattern", &self.visit_count_pattern),
            ("updateTimePattern", &self.update_time_pattern),
        ];
        for (field, value) in optional {
            if let Some(pattern) = non_blank(value) {
                patterns.push((field, pattern));
            }
        }
        for (field, filters) in [
            ("filterDesc", &self.filter_desc),
            ("filterContent", &self.filter_content),
        ] {
            if let Some(filters) = non_blank(filters) {
                patterns.extend(
                    filters
                        .lines()
                        .filter(|line| !line.trim().is_empty())
                        .map(|line| (field, line)),
                );
            }
        }

        for (field, pattern) in patterns {
            cache
                .get(pattern)
                .map_err(|e| RuleError::InvalidPattern {
                    field: field.to_string(),
                    pattern: pattern.to_string(),
                    message: e.to_string(),
                })?;
        }

        self.content_url_template()?;
        Ok(())
    }

    /// SHA-256 of the canonical JSON form, identifying this rule version
    pub fn fingerprint(&self) -> String {
        let canonical = serde_json::to_vec(self).unwrap_or_default();
        hex::encode(Sha256::digest(&canonical))
    }

    /// Parses the content URL template
    pub fn content_url_template(&self) -> RuleResult<UrlTemplate> {
        UrlTemplate::parse(&self.book_content_url)
    }

    /// Listing URL for a category page, if the category is configured
    pub fn category_list_url(&self, category_id: u32, page: u32) -> Option<String> {
        let fragment = self
            .cat_id_rule
            .get(&format!("catId{}", category_id))
            .filter(|f| !f.trim().is_empty())?;

        let template = match non_blank(&self.book_list_url) {
            Some(list_url) => list_url.replace("{catId}", fragment),
            None => fragment.clone(),
        };
        Some(template.replace("{page}", &page.to_string()))
    }

    pub fn book_detail_url_for(&self, book_id: &str) -> String {
        self.book_detail_url.replace("{bookId}", book_id)
    }

    pub fn book_index_url_for(&self, book_id: &str) -> String {
        self.book_index_url.replace("{bookId}", book_id)
    }

    /// Lifecycle status code for a label shown on the detail page
    pub fn status_code(&self, label: &str) -> Option<u8> {
        self.book_status_rule.get(label).copied()
    }

    pub fn pending_content_marker(&self) -> &str {
        non_blank(&self.pending_content_marker).unwrap_or(DEFAULT_PENDING_CONTENT_MARKER)
    }
}
