//! Extraction rules as data, not control flow.
//!
//! A rule is a pattern plus a category (`preprocessing`, `source`, `target`,
//! `exec`) and a priority. Rule documents come from configuration and are
//! validated here one rule at a time: a bad rule is skipped with a recorded
//! reason, never raised. When nothing survives validation the built-in set
//! is used instead and the fallback is recorded on the [`RuleSet`].

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, warn};

use crate::error::{LineageError, Result};

/// Name of the native cleansing pass. A preprocessing rule carrying this name
/// is accepted but not applied a second time.
pub const BUILTIN_CLEANSE_RULE: &str = "builtin_cleanse";

/// Upper bound on a compiled pattern.
const PATTERN_SIZE_LIMIT: usize = 8 * (1 << 20);

/// One identifier segment: `[bracketed]`, `"quoted"` or a bare word.
const PART: &str = r#"(?:\[(?:[^\]]|\]\])+\]|"(?:[^"]|"")+"|[\w@#$]+)"#;

/// Optional `TOP (n) [PERCENT]` qualifier on DML statements.
const TOP: &str = r"(?:TOP\s*\(\s*\d+\s*\)\s*(?:PERCENT\s+)?)?";

/// Rule category, in pipeline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleCategory {
    /// Text-to-text rewrite applied before extraction.
    Preprocessing,
    /// Read reference.
    Source,
    /// Write reference.
    Target,
    /// Routine invocation.
    Exec,
}

impl fmt::Display for RuleCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleCategory::Preprocessing => write!(f, "preprocessing"),
            RuleCategory::Source => write!(f, "source"),
            RuleCategory::Target => write!(f, "target"),
            RuleCategory::Exec => write!(f, "exec"),
        }
    }
}

impl FromStr for RuleCategory {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "preprocessing" => Ok(RuleCategory::Preprocessing),
            "source" => Ok(RuleCategory::Source),
            "target" => Ok(RuleCategory::Target),
            "exec" => Ok(RuleCategory::Exec),
            other => Err(format!("unknown category '{}'", other)),
        }
    }
}

/// A rule as written in a rule document, before validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleDef {
    pub name: String,
    /// Kept as text so an unknown category is a skipped rule, not a parse error.
    pub category: String,
    pub pattern: String,
    #[serde(default)]
    pub flags: String,
    #[serde(default)]
    pub priority: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replacement: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl RuleDef {
    pub fn new(name: &str, category: RuleCategory, pattern: &str, priority: i32) -> Self {
        Self {
            name: name.to_string(),
            category: category.to_string(),
            pattern: pattern.to_string(),
            flags: "i".to_string(),
            priority,
            replacement: None,
            enabled: true,
        }
    }

    pub fn with_replacement(mut self, replacement: &str) -> Self {
        self.replacement = Some(replacement.to_string());
        self
    }
}

/// The on-disk shape of a rule document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleDocument {
    #[serde(default)]
    pub rules: Vec<RuleDef>,
}

/// A validated, compiled rule.
#[derive(Debug, Clone)]
pub struct Rule {
    pub name: String,
    pub category: RuleCategory,
    pub regex: Regex,
    pub priority: i32,
    pub replacement: Option<String>,
}

/// A rule that failed validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedRule {
    pub name: String,
    pub reason: String,
}

/// An immutable, priority-ordered set of validated rules.
#[derive(Debug, Clone)]
pub struct RuleSet {
    rules: Vec<Rule>,
    skipped: Vec<SkippedRule>,
    used_defaults: bool,
}

impl RuleSet {
    /// Validate `defs`, falling back to the built-in rules if none survive.
    pub fn from_defs(defs: &[RuleDef]) -> Self {
        let (rules, skipped) = compile_all(defs);
        for skip in &skipped {
            warn!(rule = %skip.name, reason = %skip.reason, "skipping extraction rule");
        }

        if rules.is_empty() {
            warn!(
                rejected = skipped.len(),
                "no valid extraction rules; falling back to built-in defaults"
            );
            let (defaults, _) = compile_all(&default_rule_defs());
            return Self {
                rules: defaults,
                skipped,
                used_defaults: true,
            };
        }

        debug!(
            loaded = rules.len(),
            skipped = skipped.len(),
            "extraction rules loaded"
        );
        Self {
            rules,
            skipped,
            used_defaults: false,
        }
    }

    /// Load and validate a rule document from disk.
    pub fn load(path: &Path) -> Result<Self> {
        let document = load_rule_document(path)?;
        Ok(Self::from_defs(&document.rules))
    }

    /// All rules, ascending by priority.
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn by_category(&self, category: RuleCategory) -> impl Iterator<Item = &Rule> {
        self.rules.iter().filter(move |r| r.category == category)
    }

    pub fn skipped(&self) -> &[SkippedRule] {
        &self.skipped
    }

    /// True when the supplied rules were all rejected and the defaults are active.
    pub fn used_defaults(&self) -> bool {
        self.used_defaults
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }
}

impl Default for RuleSet {
    fn default() -> Self {
        let (rules, _) = compile_all(&default_rule_defs());
        Self {
            rules,
            skipped: Vec::new(),
            used_defaults: false,
        }
    }
}

/// Validate and compile a single rule.
pub fn compile_rule(def: &RuleDef) -> std::result::Result<Rule, String> {
    if !def.enabled {
        return Err("disabled".to_string());
    }
    let category: RuleCategory = def.category.parse()?;

    let mut builder = RegexBuilder::new(&def.pattern);
    builder.size_limit(PATTERN_SIZE_LIMIT);
    for flag in def.flags.chars() {
        match flag {
            'i' => {
                builder.case_insensitive(true);
            }
            'm' => {
                builder.multi_line(true);
            }
            's' => {
                builder.dot_matches_new_line(true);
            }
            'x' => {
                builder.ignore_whitespace(true);
            }
            'g' | 'u' | 'y' => {}
            c if c.is_whitespace() => {}
            other => return Err(format!("unsupported flag '{}'", other)),
        }
    }
    let regex = builder
        .build()
        .map_err(|e| format!("invalid pattern: {}", e))?;

    if regex.is_match("") {
        return Err("pattern matches the empty string".to_string());
    }
    if category != RuleCategory::Preprocessing && regex.captures_len() < 2 {
        return Err("pattern has no capture group".to_string());
    }

    Ok(Rule {
        name: def.name.clone(),
        category,
        regex,
        priority: def.priority,
        replacement: def.replacement.clone(),
    })
}

fn compile_all(defs: &[RuleDef]) -> (Vec<Rule>, Vec<SkippedRule>) {
    let mut rules = Vec::new();
    let mut skipped = Vec::new();
    for def in defs {
        match compile_rule(def) {
            Ok(rule) => rules.push(rule),
            Err(reason) => skipped.push(SkippedRule {
                name: def.name.clone(),
                reason,
            }),
        }
    }
    rules.sort_by_key(|r| r.priority);
    (rules, skipped)
}

/// Read a rule document. Format follows the extension: `.toml`, `.json`,
/// `.yaml` or `.yml`.
pub fn load_rule_document(path: &Path) -> Result<RuleDocument> {
    let content = std::fs::read_to_string(path)?;
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default()
        .to_lowercase();

    match ext.as_str() {
        "toml" => toml::from_str(&content).map_err(|e| LineageError::document(path, e)),
        "json" => serde_json::from_str(&content).map_err(|e| LineageError::document(path, e)),
        "yaml" | "yml" => {
            serde_yaml::from_str(&content).map_err(|e| LineageError::document(path, e))
        }
        other => Err(LineageError::document(
            path,
            format!("unsupported rule document extension '{}'", other),
        )),
    }
}

/// Qualified name with up to four segments, captured as group 1.
fn qualified() -> String {
    format!(r"({part}(?:\s*\.{{1,2}}\s*{part}){{0,3}})", part = PART)
}

/// The built-in T-SQL rule set.
pub fn default_rule_defs() -> Vec<RuleDef> {
    let name = qualified();
    let call = format!(r"({part}(?:\s*\.\s*{part}){{1,2}})\s*\(", part = PART);

    vec![
        // `DELETE FROM t` would otherwise also read as a FROM source.
        RuleDef::new(
            "delete_from_keyword",
            RuleCategory::Preprocessing,
            &format!(r"\bDELETE\s+({})FROM\b", TOP),
            10,
        )
        .with_replacement("DELETE $1"),
        RuleDef::new(
            "from_clause",
            RuleCategory::Source,
            &format!(r"\bFROM\s+{}", name),
            100,
        ),
        RuleDef::new(
            "join_clause",
            RuleCategory::Source,
            &format!(r"\bJOIN\s+{}", name),
            110,
        ),
        RuleDef::new(
            "apply_clause",
            RuleCategory::Source,
            &format!(r"\bAPPLY\s+{}", name),
            120,
        ),
        RuleDef::new(
            "function_call",
            RuleCategory::Source,
            &call,
            130,
        ),
        RuleDef::new(
            "insert_into",
            RuleCategory::Target,
            &format!(r"\bINSERT\s+{}(?:INTO\s+)?{}", TOP, name),
            200,
        ),
        RuleDef::new(
            "update",
            RuleCategory::Target,
            &format!(r"\bUPDATE\s+{}{}", TOP, name),
            210,
        ),
        RuleDef::new(
            "delete",
            RuleCategory::Target,
            &format!(r"\bDELETE\s+{}{}", TOP, name),
            220,
        ),
        RuleDef::new(
            "merge_into",
            RuleCategory::Target,
            &format!(r"\bMERGE\s+{}(?:INTO\s+)?{}", TOP, name),
            230,
        ),
        RuleDef::new(
            "truncate_table",
            RuleCategory::Target,
            &format!(r"\bTRUNCATE\s+TABLE\s+{}", name),
            240,
        ),
        RuleDef::new(
            "select_into",
            RuleCategory::Target,
            &format!(r"\bINTO\s+{}", name),
            250,
        ),
        RuleDef::new(
            "exec_call",
            RuleCategory::Exec,
            &format!(r"\bEXEC(?:UTE)?\s+(?:@[\w@#$]+\s*=\s*)?{}", name),
            300,
        ),
    ]
}

/// Write-statement scanner used for direction inference: the same DML shapes
/// as the target rules, folded into one pattern.
pub(crate) fn write_statement_pattern() -> String {
    format!(
        r"(?i)\b(?:(?:UPDATE|INSERT|DELETE|MERGE)\s+{top}(?:(?:INTO|FROM)\s+)?|TRUNCATE\s+TABLE\s+){name}",
        top = TOP,
        name = qualified()
    )
}
