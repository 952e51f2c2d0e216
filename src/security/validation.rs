//! Structural validation of model-generated SQL.
//!
//! The validator is lexical, not a parser: it classifies a query with a fixed
//! set of token-bounded patterns. It is deliberately conservative and will
//! reject some harmless queries (a forbidden keyword inside a string literal,
//! for example) rather than let a mutating or unscoped one through.
//!
//! Keyword and statement-separator checks run on the raw text. Checks that
//! grant something (FROM, the user scope, UNION branch structure) run on the
//! [`code_view`], so comments and literal contents never count.

use super::literals::code_view;
use crate::UserId;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Query validation mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ValidationMode {
    /// The base rules only: SELECT, FROM, user scope, mutating keywords,
    /// single statement.
    Standard,

    /// Base rules plus extended keywords (EXEC, GRANT, ...), system catalog
    /// access and per-branch scoping of UNION queries.
    #[default]
    Strict,
}

impl ValidationMode {
    /// Parse a mode name as found in configuration.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "standard" => Some(Self::Standard),
            "strict" => Some(Self::Strict),
            _ => None,
        }
    }
}

/// Why a query was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "cause", content = "detail", rename_all = "snake_case")]
pub enum RejectionReason {
    #[error("empty query")]
    EmptyQuery,

    #[error("query exceeds maximum length of {limit} bytes")]
    QueryTooLong { limit: usize },

    #[error("only SELECT statements are allowed")]
    NotASelect,

    #[error("query must contain a FROM clause")]
    MissingFromClause,

    #[error("query must include user_id filtering in a WHERE clause")]
    MissingUserScope,

    #[error("forbidden keyword detected: {0}")]
    ContainsForbiddenKeyword(&'static str),

    #[error("multiple statements are not allowed")]
    MultipleStatements,

    #[error("system catalog access is not allowed: {0}")]
    SystemCatalogAccess(&'static str),

    #[error("UNION branch {branch} must be a SELECT with its own user_id filter")]
    UnscopedUnionBranch { branch: usize },

    #[error("UNION queries with nested SELECT statements are not allowed")]
    NestedSelectInUnion,
}

/// Outcome of structural validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecurityVerdict {
    Safe,
    Rejected(RejectionReason),
}

impl SecurityVerdict {
    /// Check if the query was accepted.
    pub fn is_safe(&self) -> bool {
        matches!(self, SecurityVerdict::Safe)
    }

    /// Get the rejection reason, if any.
    pub fn reason(&self) -> Option<&RejectionReason> {
        match self {
            SecurityVerdict::Safe => None,
            SecurityVerdict::Rejected(reason) => Some(reason),
        }
    }

    /// Convert into a `Result` for `?` propagation.
    pub fn into_result(self) -> Result<(), RejectionReason> {
        match self {
            SecurityVerdict::Safe => Ok(()),
            SecurityVerdict::Rejected(reason) => Err(reason),
        }
    }
}

/// Lexical diagnostics for a query; never used for authorization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyntaxReport {
    /// SELECT and FROM present and no forbidden keyword found.
    pub syntax_valid: bool,
    pub has_select: bool,
    pub has_from: bool,
    pub has_where: bool,
    /// A `user_id` reference follows the WHERE keyword.
    pub has_user_scope: bool,
    pub has_multiple_statements: bool,
    pub forbidden_keywords_found: Vec<&'static str>,
}

// Helper to compile regex with better error message on failure.
// These should never fail since patterns are hardcoded and tested.
fn compile(pattern: &str) -> Regex {
    Regex::new(pattern)
        .unwrap_or_else(|e| panic!("Internal error: invalid regex pattern '{}': {}", pattern, e))
}

fn keyword_patterns(keywords: &[&'static str]) -> Vec<(Regex, &'static str)> {
    keywords
        .iter()
        .map(|kw| (compile(&format!(r"(?i)\b{}\b", kw)), *kw))
        .collect()
}

static SELECT_START: Lazy<Regex> = Lazy::new(|| compile(r"(?i)^SELECT\b"));
static FROM_TOKEN: Lazy<Regex> = Lazy::new(|| compile(r"(?i)\bFROM\b"));
static WHERE_TOKEN: Lazy<Regex> = Lazy::new(|| compile(r"(?i)\bWHERE\b"));
static USER_SCOPE_TOKEN: Lazy<Regex> = Lazy::new(|| compile(r"(?i)\buser_id\b"));
static SELECT_TOKEN: Lazy<Regex> = Lazy::new(|| compile(r"(?i)\bSELECT\b"));
static UNION_TOKEN: Lazy<Regex> = Lazy::new(|| compile(r"(?i)\bUNION(\s+ALL)?\b"));
static TRAILING_ORDER_BY: Lazy<Regex> = Lazy::new(|| compile(r"(?is)\s+ORDER\s+BY\s+.*$"));

/// A semicolon followed by anything other than whitespace.
static STATEMENT_SEPARATOR: Lazy<Regex> = Lazy::new(|| compile(r";\s*\S"));

/// Mutating keywords rejected in every mode.
static FORBIDDEN_KEYWORDS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    keyword_patterns(&[
        "DROP", "DELETE", "INSERT", "UPDATE", "ALTER", "CREATE", "TRUNCATE",
    ])
});

/// Additional keywords rejected in strict mode.
static EXTENDED_KEYWORDS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    keyword_patterns(&["EXEC", "EXECUTE", "GRANT", "REVOKE", "SHUTDOWN", "MERGE"])
});

/// System catalogs rejected in strict mode.
static SYSTEM_CATALOGS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    keyword_patterns(&[
        "INFORMATION_SCHEMA",
        "PERFORMANCE_SCHEMA",
        "MYSQL",
        "SYS",
        "SYSTEM",
        "ADMIN",
    ])
});

/// Structural query validator.
#[derive(Debug, Clone)]
pub struct QueryValidator {
    mode: ValidationMode,
    max_length: usize,
}

impl QueryValidator {
    /// Create a new query validator.
    pub fn new(mode: ValidationMode, max_length: usize) -> Self {
        Self { mode, max_length }
    }

    /// Get the current validation mode.
    pub fn mode(&self) -> ValidationMode {
        self.mode
    }

    /// Classify a query as safe or rejected.
    ///
    /// Rules are applied in order on the trimmed text; the first failing rule
    /// determines the reason.
    pub fn validate(&self, query: &str, user_id: UserId) -> SecurityVerdict {
        let verdict = match self.check(query) {
            Ok(()) => SecurityVerdict::Safe,
            Err(reason) => SecurityVerdict::Rejected(reason),
        };
        debug!(user_id, safe = verdict.is_safe(), "Structural validation finished");
        verdict
    }

    fn check(&self, query: &str) -> Result<(), RejectionReason> {
        if query.len() > self.max_length {
            return Err(RejectionReason::QueryTooLong {
                limit: self.max_length,
            });
        }

        let text = query.trim();
        if text.is_empty() {
            return Err(RejectionReason::EmptyQuery);
        }

        if !SELECT_START.is_match(text) {
            return Err(RejectionReason::NotASelect);
        }

        let code = code_view(text);
        if !FROM_TOKEN.is_match(&code) {
            return Err(RejectionReason::MissingFromClause);
        }
        if !has_user_scope(&code) {
            return Err(RejectionReason::MissingUserScope);
        }
        if let Some(keyword) = first_match(&FORBIDDEN_KEYWORDS, text) {
            return Err(RejectionReason::ContainsForbiddenKeyword(keyword));
        }
        if STATEMENT_SEPARATOR.is_match(text) {
            return Err(RejectionReason::MultipleStatements);
        }

        if self.mode == ValidationMode::Strict {
            if let Some(keyword) = first_match(&EXTENDED_KEYWORDS, text) {
                return Err(RejectionReason::ContainsForbiddenKeyword(keyword));
            }
            if let Some(catalog) = first_match(&SYSTEM_CATALOGS, text) {
                return Err(RejectionReason::SystemCatalogAccess(catalog));
            }
            check_union_branches(&code)?;
        }

        Ok(())
    }

    /// Run the lexical checks only and report what was found.
    pub fn inspect(&self, query: &str) -> SyntaxReport {
        let text = query.trim();
        let code = code_view(text);

        let mut forbidden_keywords_found = all_matches(&FORBIDDEN_KEYWORDS, text);
        if self.mode == ValidationMode::Strict {
            forbidden_keywords_found.extend(all_matches(&EXTENDED_KEYWORDS, text));
        }

        let has_select = SELECT_START.is_match(text);
        let has_from = FROM_TOKEN.is_match(&code);

        SyntaxReport {
            syntax_valid: has_select && has_from && forbidden_keywords_found.is_empty(),
            has_select,
            has_from,
            has_where: WHERE_TOKEN.is_match(&code),
            has_user_scope: has_user_scope(&code),
            has_multiple_statements: STATEMENT_SEPARATOR.is_match(text),
            forbidden_keywords_found,
        }
    }
}

impl Default for QueryValidator {
    fn default() -> Self {
        Self::new(
            ValidationMode::default(),
            crate::constants::DEFAULT_MAX_QUERY_LENGTH,
        )
    }
}

/// A `user_id` reference must appear after the first WHERE keyword.
fn has_user_scope(text: &str) -> bool {
    WHERE_TOKEN
        .find(text)
        .map(|where_kw| USER_SCOPE_TOKEN.find_at(text, where_kw.end()).is_some())
        .unwrap_or(false)
}

fn first_match(patterns: &[(Regex, &'static str)], text: &str) -> Option<&'static str> {
    patterns
        .iter()
        .find(|(pattern, _)| pattern.is_match(text))
        .map(|(_, keyword)| *keyword)
}

fn all_matches(patterns: &[(Regex, &'static str)], text: &str) -> Vec<&'static str> {
    patterns
        .iter()
        .filter(|(pattern, _)| pattern.is_match(text))
        .map(|(_, keyword)| *keyword)
        .collect()
}

/// Every UNION branch must be its own user-scoped SELECT, and no branch may
/// hide a subquery.
fn check_union_branches(code: &str) -> Result<(), RejectionReason> {
    if !UNION_TOKEN.is_match(code) {
        return Ok(());
    }

    let mut branches = 0;
    for (idx, branch) in UNION_TOKEN.split(code).enumerate() {
        let branch = TRAILING_ORDER_BY.replace(branch.trim(), "");
        if !SELECT_START.is_match(&branch) || !has_user_scope(&branch) {
            return Err(RejectionReason::UnscopedUnionBranch { branch: idx + 1 });
        }
        branches += 1;
    }

    if SELECT_TOKEN.find_iter(code).count() > branches {
        return Err(RejectionReason::NestedSelectInUnion);
    }

    Ok(())
}
