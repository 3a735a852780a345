//! Reference extraction from routine bodies.
//!
//! Best-effort lexical matching, not SQL parsing. The pipeline:
//!
//! 1. [`cleanse`] strips comments and literal contents in one pass
//! 2. user preprocessing rules rewrite the text, in priority order
//! 3. CTE aliases are collected so they never surface as sources
//! 4. source/target/exec rules run in priority order; call-shaped source
//!    matches are held back and only merged if they are not also targets
//!    (`INSERT INTO dbo.T(a, b)` is a write, not a call to `dbo.T`)
//!
//! Each rule's match loop is capped at [`MAX_MATCHES_PER_RULE`], which bounds
//! the work done on adversarial input. The `regex` engine itself runs in
//! linear time and steps past empty matches on its own.

pub mod cleanse;
pub mod rules;

pub use cleanse::cleanse;
pub use rules::{
    compile_rule, default_rule_defs, load_rule_document, Rule, RuleCategory, RuleDef,
    RuleDocument, RuleSet, SkippedRule, BUILTIN_CLEANSE_RULE,
};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::warn;

use crate::name::QualifiedName;

/// Matches examined per rule before the loop gives up.
pub const MAX_MATCHES_PER_RULE: usize = 10_000;

static WITH_KEYWORD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bWITH\b").expect("WITH keyword pattern is valid"));

static WRITE_STATEMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&rules::write_statement_pattern()).expect("write statement pattern is valid")
});

/// Candidate names mined from one body, as canonical ids, first-seen order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedRefs {
    /// Read references.
    pub sources: Vec<String>,
    /// Write references.
    pub targets: Vec<String>,
    /// Invoked routines.
    pub exec_calls: Vec<String>,
}

impl ExtractedRefs {
    pub fn total(&self) -> usize {
        self.sources.len() + self.targets.len() + self.exec_calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

/// Run the full extraction pipeline over `body`.
pub fn extract_references(body: &str, rules: &RuleSet) -> ExtractedRefs {
    let text = preprocess(body, rules);
    let ctes = cte_names(&text);

    let mut sources = OrderedNames::default();
    let mut targets = OrderedNames::default();
    let mut exec_calls = OrderedNames::default();
    let mut call_shaped = OrderedNames::default();

    for rule in rules.rules() {
        if rule.category == RuleCategory::Preprocessing {
            continue;
        }

        let mut seen = 0;
        for caps in rule.regex.captures_iter(&text) {
            seen += 1;
            if seen > MAX_MATCHES_PER_RULE {
                warn!(rule = %rule.name, cap = MAX_MATCHES_PER_RULE, "match cap reached; remaining matches ignored");
                break;
            }
            let Some(capture) = caps.get(1) else {
                continue;
            };
            if is_name_fragment(&text, capture.start()) {
                continue;
            }
            let Some(id) = candidate_id(capture.as_str(), &ctes) else {
                continue;
            };

            match rule.category {
                RuleCategory::Source if is_call_shaped(&text, capture.end()) => {
                    call_shaped.insert(id)
                }
                RuleCategory::Source => sources.insert(id),
                RuleCategory::Target => targets.insert(id),
                RuleCategory::Exec => exec_calls.insert(id),
                RuleCategory::Preprocessing => {}
            }
        }
    }

    for id in call_shaped.names {
        if !targets.contains(&id) {
            sources.insert(id);
        }
    }

    ExtractedRefs {
        sources: sources.names,
        targets: targets.names,
        exec_calls: exec_calls.names,
    }
}

/// Canonical ids of every object named as the subject of a write statement
/// (`UPDATE`, `INSERT`, `DELETE`, `MERGE`, `TRUNCATE TABLE`).
pub fn write_targets(body: &str) -> HashSet<String> {
    let text = cleanse(body);
    WRITE_STATEMENT
        .captures_iter(&text)
        .take(MAX_MATCHES_PER_RULE)
        .filter_map(|caps| caps.get(1))
        .map(|m| QualifiedName::parse(m.as_str()))
        .filter(QualifiedName::is_qualified)
        .map(|name| name.canonical_id())
        .collect()
}

fn preprocess(body: &str, rules: &RuleSet) -> String {
    let mut text = cleanse(body);
    for rule in rules.by_category(RuleCategory::Preprocessing) {
        if rule.name == BUILTIN_CLEANSE_RULE {
            continue;
        }
        let replacement = rule.replacement.as_deref().unwrap_or(" ");
        text = rule.regex.replace_all(&text, replacement).into_owned();
    }
    text
}

/// Normalize a captured name, dropping CTE aliases and one-letter aliases.
fn candidate_id(raw: &str, ctes: &HashSet<String>) -> Option<String> {
    let name = QualifiedName::parse(raw);
    if name.object.is_empty() {
        return None;
    }
    if !name.is_qualified() && !name.external {
        let object = name.object.to_lowercase();
        if ctes.contains(&object) || object.chars().count() == 1 {
            return None;
        }
    }
    Some(name.canonical_id())
}

/// A capture that starts right after `.`, `]` or `"` is the tail of a longer
/// name (`a.b.c.d(` matching from `b`).
fn is_name_fragment(text: &str, start: usize) -> bool {
    matches!(text[..start].chars().next_back(), Some('.' | ']' | '"'))
}

fn is_call_shaped(text: &str, end: usize) -> bool {
    text[end..].trim_start().starts_with('(')
}

#[derive(Default)]
struct OrderedNames {
    names: Vec<String>,
    seen: HashSet<String>,
}

impl OrderedNames {
    fn insert(&mut self, id: String) {
        if self.seen.insert(id.clone()) {
            self.names.push(id);
        }
    }

    fn contains(&self, id: &str) -> bool {
        self.seen.contains(id)
    }
}

// ─── CTE Scanning ───────────────────────────────────────────────

/// Lowercased names declared by `WITH a AS (...), b (x, y) AS (...)` blocks.
pub fn cte_names(text: &str) -> HashSet<String> {
    scan_ctes(text).0
}

/// CTE names plus the number of bytes the cursors walked. Each `WITH` scan
/// resumes past the furthest point already reached, so the walk never
/// exceeds the text length.
fn scan_ctes(text: &str) -> (HashSet<String>, usize) {
    let mut names = HashSet::new();
    let mut high_water = 0;
    let mut walked = 0;

    for keyword in WITH_KEYWORD.find_iter(text).take(MAX_MATCHES_PER_RULE) {
        if keyword.start() < high_water {
            continue;
        }
        let mut cursor = Cursor::new(text, keyword.end());
        loop {
            cursor.skip_whitespace();
            let Some(name) = cursor.identifier() else {
                break;
            };
            cursor.skip_whitespace();
            if cursor.peek() == Some('(') {
                cursor.skip_parens();
                cursor.skip_whitespace();
            }
            if !cursor.keyword("AS") {
                break;
            }
            cursor.skip_whitespace();
            if cursor.peek() != Some('(') {
                break;
            }
            names.insert(QualifiedName::parse(name).object.to_lowercase());
            cursor.skip_parens();
            cursor.skip_whitespace();
            if cursor.peek() != Some(',') {
                break;
            }
            cursor.bump();
        }
        walked += cursor.pos - keyword.end();
        high_water = cursor.pos;
    }

    (names, walked)
}

struct Cursor<'a> {
    text: &'a str,
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(text: &'a str, pos: usize) -> Self {
        Self { text, pos }
    }

    fn peek(&self) -> Option<char> {
        self.text[self.pos..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.bump();
        }
    }

    /// A bracketed, quoted or bare identifier.
    fn identifier(&mut self) -> Option<&'a str> {
        let start = self.pos;
        match self.peek()? {
            '[' => self.delimited(']'),
            '"' => self.delimited('"'),
            c if is_word_char(c) => {
                while self.peek().is_some_and(is_word_char) {
                    self.bump();
                }
            }
            _ => return None,
        }
        Some(&self.text[start..self.pos])
    }

    fn delimited(&mut self, close: char) {
        self.bump();
        while let Some(c) = self.bump() {
            if c == close {
                if self.peek() == Some(close) {
                    self.bump();
                    continue;
                }
                return;
            }
        }
    }

    fn keyword(&mut self, word: &str) -> bool {
        let rest = &self.text[self.pos..];
        let Some(head) = rest.get(..word.len()) else {
            return false;
        };
        if !head.eq_ignore_ascii_case(word) {
            return false;
        }
        if rest[word.len()..].chars().next().is_some_and(is_word_char) {
            return false;
        }
        self.pos += word.len();
        true
    }

    /// Skip a balanced `( ... )` group starting at the cursor.
    fn skip_parens(&mut self) {
        let mut depth = 0usize;
        while let Some(c) = self.peek() {
            match c {
                '[' => {
                    self.delimited(']');
                    continue;
                }
                '"' => {
                    self.delimited('"');
                    continue;
                }
                '(' => depth += 1,
                ')' => {
                    depth = depth.saturating_sub(1);
                    if depth == 0 {
                        self.bump();
                        return;
                    }
                }
                _ => {}
            }
            self.bump();
        }
    }
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '@' | '#' | '$')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extract(body: &str) -> ExtractedRefs {
        extract_references(body, &RuleSet::default())
    }

    #[test]
    fn test_reads_from_and_join() {
        let refs = extract(
            "SELECT o.* FROM dbo.Orders o JOIN dbo.Customers c ON c.Id = o.CustomerId",
        );
        assert_eq!(refs.sources, vec!["[dbo].[orders]", "[dbo].[customers]"]);
        assert!(refs.targets.is_empty());
        assert!(refs.exec_calls.is_empty());
    }

    #[test]
    fn test_write_statements_are_targets() {
        let refs = extract(
            "INSERT INTO dbo.Audit (Id) SELECT Id FROM dbo.Orders;
             UPDATE TOP (10) [dbo].[Orders] SET Flag = 1;
             DELETE FROM dbo.Staging WHERE 1 = 1;
             TRUNCATE TABLE etl.Load;
             MERGE INTO dbo.Target AS t USING dbo.Source AS s ON t.Id = s.Id
             WHEN MATCHED THEN UPDATE SET t.X = s.X;",
        );
        for id in [
            "[dbo].[audit]",
            "[dbo].[orders]",
            "[dbo].[staging]",
            "[etl].[load]",
            "[dbo].[target]",
        ] {
            assert!(refs.targets.contains(&id.to_string()), "missing target {id}");
        }
        assert!(refs.sources.contains(&"[dbo].[orders]".to_string()));
        assert!(
            !refs.sources.contains(&"[dbo].[staging]".to_string()),
            "DELETE FROM must not read as a source"
        );
    }

    #[test]
    fn test_insert_column_list_is_not_a_call() {
        let refs = extract("INSERT INTO sales.Ledger(Id, Amount) VALUES (1, 2)");
        assert_eq!(refs.targets, vec!["[sales].[ledger]"]);
        assert!(refs.sources.is_empty(), "sources: {:?}", refs.sources);
    }

    #[test]
    fn test_function_calls_become_sources() {
        let refs = extract("SELECT dbo.fnTotal(o.Id), x FROM dbo.Orders o");
        assert!(refs.sources.contains(&"[dbo].[fntotal]".to_string()));
        assert!(refs.sources.contains(&"[dbo].[orders]".to_string()));
    }

    #[test]
    fn test_nested_function_calls() {
        let refs = extract("SELECT dbo.f(dbo.g(x)), [util].[h]([util].[k](1))");
        assert_eq!(
            refs.sources,
            vec!["[dbo].[f]", "[dbo].[g]", "[util].[h]", "[util].[k]"]
        );
    }

    #[test]
    fn test_call_on_long_name_not_split() {
        let refs = extract("SELECT x.y.z.w(1)");
        assert!(refs.sources.is_empty(), "tail fragment captured: {:?}", refs.sources);
    }

    #[test]
    fn test_exec_calls() {
        let refs = extract(
            "EXEC dbo.LogRun; EXECUTE @rc = [etl].[Load] @p = 1; EXEC sp_who",
        );
        assert_eq!(refs.exec_calls, vec!["[dbo].[logrun]", "[etl].[load]", "[sp_who]"]);
    }

    #[test]
    fn test_cte_aliases_excluded() {
        let refs = extract(
            ";WITH recent AS (SELECT * FROM dbo.Orders),
                  totals (Id, Amount) AS (SELECT Id, SUM(x) FROM recent GROUP BY Id)
             SELECT * FROM totals JOIN dbo.Customers c ON 1 = 1",
        );
        assert_eq!(refs.sources, vec!["[dbo].[orders]", "[dbo].[customers]"]);
    }

    #[test]
    fn test_cte_names_collects_all_blocks() {
        let names = cte_names("WITH a AS (SELECT (1)), [b c] AS (SELECT 2) SELECT 1");
        assert!(names.contains("a"));
        assert!(names.contains("b c"));
        assert!(cte_names("SELECT * FROM t WITH (NOLOCK)").is_empty());
    }

    #[test]
    fn test_cte_scan_is_linear_on_unbalanced_blocks() {
        let text = "WITH a AS (".repeat(20_000);
        let (names, walked) = scan_ctes(&text);
        assert_eq!(names, HashSet::from(["a".to_string()]));
        assert!(walked <= text.len(), "walked {walked} of {}", text.len());

        let refs = extract(&format!("{text} SELECT * FROM dbo.After"));
        assert_eq!(refs.sources, vec!["[dbo].[after]"]);
    }

    #[test]
    fn test_cte_scan_resumes_after_nested_with() {
        let names = cte_names(
            "WITH outer_q AS (SELECT * FROM t WITH (NOLOCK)), second_q AS (SELECT 1)
             SELECT 1; WITH third_q AS (SELECT 2) SELECT 3",
        );
        for name in ["outer_q", "second_q", "third_q"] {
            assert!(names.contains(name), "missing {name}");
        }
    }

    #[test]
    fn test_single_letter_alias_skipped() {
        let refs = extract("SELECT * FROM x JOIN dbo.Real r ON 1 = 1");
        assert_eq!(refs.sources, vec!["[dbo].[real]"]);
    }

    #[test]
    fn test_commented_and_quoted_references_ignored() {
        let refs = extract(
            "/* FROM dbo.Old /* nested */ JOIN dbo.Older */
             SELECT 'FROM dbo.Fake' FROM dbo.Live -- JOIN dbo.Gone",
        );
        assert_eq!(refs.sources, vec!["[dbo].[live]"]);
    }

    #[test]
    fn test_results_are_deduplicated() {
        let refs = extract("SELECT * FROM dbo.A; SELECT * FROM [dbo].[a]; SELECT * FROM DBO.A");
        assert_eq!(refs.sources, vec!["[dbo].[a]"]);
    }

    #[test]
    fn test_user_preprocessing_rule_applies() {
        let mut defs = default_rule_defs();
        defs.push(
            RuleDef::new(
                "drop_dynamic",
                RuleCategory::Preprocessing,
                r"\bFROM\s+dbo\.Hidden\b",
                5,
            )
            .with_replacement(" "),
        );
        let rules = RuleSet::from_defs(&defs);
        let refs = extract_references("SELECT * FROM dbo.Hidden; SELECT * FROM dbo.Shown", &rules);
        assert_eq!(refs.sources, vec!["[dbo].[shown]"]);
    }

    #[test]
    fn test_builtin_cleanse_rule_not_reapplied() {
        let mut defs = default_rule_defs();
        defs.push(
            RuleDef::new(BUILTIN_CLEANSE_RULE, RuleCategory::Preprocessing, r"dbo", 1)
                .with_replacement("zzz"),
        );
        let rules = RuleSet::from_defs(&defs);
        let refs = extract_references("SELECT * FROM dbo.Kept", &rules);
        assert_eq!(refs.sources, vec!["[dbo].[kept]"]);
    }

    #[test]
    fn test_match_cap_bounds_pathological_input() {
        let body = "FROM dbo.T ".repeat(MAX_MATCHES_PER_RULE + 50);
        let refs = extract(&body);
        assert_eq!(refs.sources, vec!["[dbo].[t]"]);
    }

    #[test]
    fn test_write_targets_scan() {
        let writes = write_targets(
            "SELECT * FROM dbo.Read; UPDATE dbo.Written SET a = 1; -- DELETE dbo.Comment",
        );
        assert!(writes.contains("[dbo].[written]"));
        assert!(!writes.contains("[dbo].[read]"));
        assert!(!writes.contains("[dbo].[comment]"));
    }

    #[test]
    fn test_write_targets_top_before_keyword() {
        let deleted = write_targets("DELETE TOP (5) FROM dbo.T WHERE 1 = 1");
        assert_eq!(deleted, HashSet::from(["[dbo].[t]".to_string()]));

        let inserted = write_targets("INSERT TOP (5) INTO [etl].[Load] SELECT 1");
        assert_eq!(inserted, HashSet::from(["[etl].[load]".to_string()]));

        let merged = write_targets("MERGE TOP (1) PERCENT INTO dbo.M USING dbo.S s ON 1 = 1");
        assert!(merged.contains("[dbo].[m]"));
        assert!(!merged.contains("[dbo].[s]"));
    }

    #[test]
    fn test_empty_body() {
        assert!(extract("").is_empty());
    }
}
