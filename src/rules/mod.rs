//! Per-source extraction rules
//!
//! A [`RuleSet`] is plain structured data loaded from the JSON blob stored with
//! each crawl source. This module also owns the machinery that interprets it:
//!
//! - [`PatternCache`]: compiled-pattern memo shared by all workers
//! - [`UrlTemplate`]: content URL templates and their calc placeholders
//! - [`filter`]: description and chapter text clean-up

pub mod filter;
mod pattern;
mod template;
mod types;

pub use pattern::{capture_all, capture_first, PatternCache};
pub use template::{Calc, UrlParam, UrlParams, UrlTemplate};
pub use types::{non_blank, RuleSet, DEFAULT_PENDING_CONTENT_MARKER};
