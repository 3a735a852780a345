//! Qualified-name normalization.
//!
//! Every identifier that enters the graph (catalog object names, structural
//! dependency endpoints, names mined from routine bodies) goes through
//! [`normalize`] so that `dbo.Orders`, `[DBO].[orders]` and
//! `SalesDb."dbo"."Orders"` all land on the same node id.
//!
//! Splitting is delimiter-aware: a dot inside `[...]` or `"..."` belongs to the
//! identifier. Canonical ids are always bracketed and lowercased, e.g.
//! `[dbo].[orders]`.

use std::iter::Peekable;
use std::str::Chars;

/// Prefix given to four-part (linked-server) references. Canonical catalog ids
/// always start with `[`, so an external id can never collide with one.
pub const EXTERNAL_PREFIX: &str = "external:";

/// Schemas and databases that never contribute nodes or edges.
pub const SYSTEM_SCHEMAS: &[&str] = &[
    "sys",
    "information_schema",
    "tempdb",
    "model",
    "msdb",
    "master",
];

/// A parsed qualified identifier with delimiters stripped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QualifiedName {
    /// Leading database segment of a three-part name.
    pub database: Option<String>,
    /// Schema segment, in the casing it was written.
    pub schema: Option<String>,
    /// Object segment, in the casing it was written.
    pub object: String,
    /// Four-or-more-part reference; `object` then holds the whole lowered text.
    pub external: bool,
}

impl QualifiedName {
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if let Some(rest) = raw.strip_prefix(EXTERNAL_PREFIX) {
            return Self::external(rest);
        }

        let mut parts = split_segments(raw);
        match parts.len() {
            0 | 1 => Self {
                database: None,
                schema: None,
                object: parts.pop().unwrap_or_default(),
                external: false,
            },
            2 | 3 => {
                let object = parts.pop().unwrap_or_default();
                let schema = parts.pop().filter(|s| !s.is_empty());
                let database = parts.pop().filter(|d| !d.is_empty());
                Self {
                    database,
                    schema,
                    object,
                    external: false,
                }
            }
            _ => Self::external(raw),
        }
    }

    fn external(raw: &str) -> Self {
        Self {
            database: None,
            schema: None,
            object: raw.trim().to_lowercase(),
            external: true,
        }
    }

    /// The canonical, case-folded node id.
    pub fn canonical_id(&self) -> String {
        if self.external {
            return format!("{}{}", EXTERNAL_PREFIX, self.object);
        }
        match &self.schema {
            Some(schema) => format!(
                "{}.{}",
                bracket(&schema.to_lowercase()),
                bracket(&self.object.to_lowercase())
            ),
            None => bracket(&self.object.to_lowercase()),
        }
    }

    /// True when the name carries a schema and can therefore match a catalog id.
    pub fn is_qualified(&self) -> bool {
        !self.external && self.schema.is_some()
    }

    /// True when the schema (or leading database) is on the system denylist.
    pub fn is_system(&self) -> bool {
        let listed = |segment: &Option<String>| {
            segment
                .as_deref()
                .is_some_and(|s| SYSTEM_SCHEMAS.contains(&s.to_lowercase().as_str()))
        };
        listed(&self.schema) || listed(&self.database)
    }

    /// Schema as shown to humans: uppercased, empty when absent.
    pub fn display_schema(&self) -> String {
        self.schema
            .as_deref()
            .map(str::to_uppercase)
            .unwrap_or_default()
    }
}

/// Canonicalize a raw qualified name into a node id.
pub fn normalize(raw: &str) -> String {
    QualifiedName::parse(raw).canonical_id()
}

/// Parse a raw qualified name into its segments.
pub fn parse(raw: &str) -> QualifiedName {
    QualifiedName::parse(raw)
}

/// Split on dots that are outside `[...]` and `"..."`, stripping the delimiters
/// and trimming each segment. Doubled closers (`]]`, `""`) are escapes.
pub fn split_segments(raw: &str) -> Vec<String> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut chars = raw.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '[' => read_delimited(&mut chars, ']', &mut current),
            '"' => read_delimited(&mut chars, '"', &mut current),
            '.' => segments.push(std::mem::take(&mut current).trim().to_string()),
            _ => current.push(c),
        }
    }
    segments.push(current.trim().to_string());
    segments
}

fn read_delimited(chars: &mut Peekable<Chars<'_>>, close: char, out: &mut String) {
    while let Some(c) = chars.next() {
        if c == close {
            if chars.peek() == Some(&close) {
                chars.next();
                out.push(close);
                continue;
            }
            return;
        }
        out.push(c);
    }
}

fn bracket(segment: &str) -> String {
    format!("[{}]", segment.replace(']', "]]"))
}
