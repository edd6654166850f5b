//! Content URL templates
//!
//! A content URL template is a URL with placeholders:
//!
//! - `{bookId}` - the source-site book ID
//! - `{indexId}` - the source-site chapter ID
//! - `{cal_<type>_<args..>}` - a value derived from another parameter by a
//!   calculator selected with `<type>`
//!
//! Calculators are parsed once, when the template is parsed, so an unknown
//! calculator type is reported while a source is being enabled instead of in
//! the middle of a crawl.

use crate::{RuleError, RuleResult};

/// Values available to a template while rendering
#[derive(Debug, Clone, Copy)]
pub struct UrlParams<'a> {
    pub book_id: &'a str,
    pub index_id: &'a str,
}

/// A template parameter addressed by position in calc placeholders
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UrlParam {
    /// Position 1
    BookId,
    /// Position 2
    IndexId,
}

impl UrlParam {
    fn from_position(position: &str) -> RuleResult<Self> {
        match position {
            "1" => Ok(Self::BookId),
            "2" => Ok(Self::IndexId),
            other => Err(RuleError::MalformedPlaceholder(format!(
                "unknown parameter position '{}'",
                other
            ))),
        }
    }

    fn value<'a>(&self, params: &UrlParams<'a>) -> &'a str {
        match self {
            Self::BookId => params.book_id,
            Self::IndexId => params.index_id,
        }
    }
}

/// A calculator placeholder
///
/// New calculators are added as variants here plus an arm in [`Calc::parse`];
/// template rendering does not change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Calc {
    /// Type 1: take a parameter and drop its last `count` characters.
    /// An empty result renders as "0".
    DropSuffix { param: UrlParam, count: usize },
}

impl Calc {
    /// Parses a calculator from its numeric type tag and arguments
    pub fn parse(tag: u32, args: &[&str]) -> RuleResult<Self> {
        match tag {
            1 => {
                let [position, count] = args else {
                    return Err(RuleError::MalformedPlaceholder(format!(
                        "calc type 1 expects 2 arguments, got {}",
                        args.len()
                    )));
                };
                let param = UrlParam::from_position(position)?;
                let count = count.parse::<usize>().map_err(|_| {
                    RuleError::MalformedPlaceholder(format!("invalid character count '{}'", count))
                })?;
                Ok(Self::DropSuffix { param, count })
            }
            other => Err(RuleError::UnknownCalcType(other)),
        }
    }

    /// Computes the placeholder value
    pub fn apply(&self, params: &UrlParams<'_>) -> String {
        match self {
            Self::DropSuffix { param, count } => {
                let value = param.value(params);
                let keep = value.chars().count().saturating_sub(*count);
                let result: String = value.chars().take(keep).collect();
                if result.is_empty() {
                    "0".to_string()
                } else {
                    result
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    BookId,
    IndexId,
    Calc(Calc),
}

/// A parsed content URL template
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlTemplate {
    segments: Vec<Segment>,
}

impl UrlTemplate {
    /// Parses a template, resolving every calc placeholder
    ///
    /// Brace groups that are not recognised placeholders are kept verbatim.
    pub fn parse(template: &str) -> RuleResult<Self> {
        if template.trim().is_empty() {
            return Err(RuleError::InvalidTemplate("template is empty".to_string()));
        }

        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut rest = template;

        while let Some(open) = rest.find('{') {
            literal.push_str(&rest[..open]);
            let after_open = &rest[open + 1..];

            let Some(close) = after_open.find('}') else {
                literal.push_str(&rest[open..]);
                rest = "";
                break;
            };

            let name = &after_open[..close];
            let segment = match name {
                "bookId" => Some(Segment::BookId),
                "indexId" => Some(Segment::IndexId),
                _ if name.starts_with("cal_") => Some(Segment::Calc(parse_calc(name)?)),
                _ => None,
            };

            match segment {
                Some(segment) => {
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(segment);
                }
                None => {
                    literal.push('{');
                    literal.push_str(name);
                    literal.push('}');
                }
            }

            rest = &after_open[close + 1..];
        }

        literal.push_str(rest);
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Self { segments })
    }

    /// Renders the template with the given parameter values
    pub fn render(&self, params: &UrlParams<'_>) -> String {
        let mut url = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => url.push_str(text),
                Segment::BookId => url.push_str(params.book_id),
                Segment::IndexId => url.push_str(params.index_id),
                Segment::Calc(calc) => url.push_str(&calc.apply(params)),
            }
        }
        url
    }
}

/// Parses the inside of a `{cal_<type>_<args..>}` placeholder
fn parse_calc(name: &str) -> RuleResult<Calc> {
    let mut parts = name.split('_').skip(1);
    let tag = parts
        .next()
        .and_then(|t| t.parse::<u32>().ok())
        .ok_or_else(|| RuleError::MalformedPlaceholder(format!("{{{}}}", name)))?;
    let args: Vec<&str> = parts.collect();
    Calc::parse(tag, &args)
}
