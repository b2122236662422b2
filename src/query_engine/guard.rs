// ABOUTME: Read-only enforcement applied to every statement before it reaches a driver
// ABOUTME: Lexical keyword scan, AST check with the dialect grammar, and a strict regex fallback
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! # Read-only guard
//!
//! [`ensure_read_only`] is the single gate between SQL text and a database
//! driver. A statement passes only if:
//!
//! 1. no forbidden keyword appears outside single-quoted literals,
//! 2. it parses as exactly one query whose every branch is a plain SELECT,
//!    or, when the dialect grammar cannot parse it, it starts with `SELECT`
//!    and contains none of the known injection shapes.
//!
//! Statement keywords are rejected even inside quoted identifiers, so a
//! hostile table name cannot smuggle `DROP` through the builder's quoting.
//! Context keywords such as `SET` or `COMMENT` are ordinary column names
//! once quoted, and `REPLACE(...)` is the string function.
//!
//! The third layer (read-only sessions, plus a rolled-back read-only
//! transaction per statement on server engines) is applied by the pool.

use super::dialect::Dialect;
use crate::errors::{AppError, AppResult};
use regex::Regex;
use sqlparser::ast::{Query, SetExpr, Statement};
use sqlparser::parser::Parser;
use std::mem;
use std::sync::OnceLock;
use tracing::{debug, warn};

/// Keywords that never appear in a read, quoted or not
const FORBIDDEN_KEYWORDS: &[&str] = &[
    "INSERT", "UPDATE", "DELETE", "DROP", "CREATE", "ALTER", "GRANT", "REVOKE", "TRUNCATE",
    "EXEC", "EXECUTE", "MERGE", "CALL", "UPSERT", "ATTACH", "DETACH", "VACUUM", "PRAGMA",
    "RENAME", "INTO", "OUTFILE", "DUMPFILE", "SET_CONFIG", "SETVAL",
];

/// Keywords rejected only in statement position (not inside a quoted identifier)
const CONTEXT_KEYWORDS: &[&str] = &["COMMENT", "SET", "LOCK", "REPLACE", "COPY"];

/// Context keywords that are also read-only functions when followed by `(`
const FUNCTION_NAMES: &[&str] = &["REPLACE"];

/// Stored and extended procedure prefixes
const FORBIDDEN_PREFIXES: &[&str] = &["SP_", "XP_"];

#[derive(Clone, Copy, PartialEq, Eq)]
enum Span {
    Code,
    Literal,
    Identifier,
}

/// One uppercased word outside string literals
struct Word {
    text: String,
    /// Inside a quoted identifier
    quoted: bool,
    /// Unquoted and followed by `(`
    call: bool,
}

/// Words of `sql` outside single-quoted literals, tagged with their context
fn scan_words(sql: &str, (open, close): (char, char)) -> Vec<Word> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut span = Span::Code;
    let mut chars = sql.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        if c.is_ascii_alphanumeric() || c == '_' {
            if span != Span::Literal {
                current.push(c.to_ascii_uppercase());
            }
            continue;
        }
        if !current.is_empty() {
            words.push(Word {
                text: mem::take(&mut current),
                quoted: span == Span::Identifier,
                call: span == Span::Code && sql[i..].trim_start().starts_with('('),
            });
        }
        match span {
            Span::Literal if c == '\'' => {
                if chars.peek().map(|&(_, next)| next) == Some('\'') {
                    chars.next();
                } else {
                    span = Span::Code;
                }
            }
            Span::Identifier if c == close => {
                if chars.peek().map(|&(_, next)| next) == Some(close) {
                    chars.next();
                } else {
                    span = Span::Code;
                }
            }
            Span::Code if c == '\'' => span = Span::Literal,
            Span::Code if c == open => span = Span::Identifier,
            _ => {}
        }
    }
    if !current.is_empty() {
        words.push(Word {
            text: current,
            quoted: span == Span::Identifier,
            call: false,
        });
    }
    words
}

fn is_forbidden(word: &Word) -> bool {
    let text = word.text.as_str();
    if FORBIDDEN_KEYWORDS.contains(&text) {
        return true;
    }
    CONTEXT_KEYWORDS.contains(&text)
        && !word.quoted
        && !(word.call && FUNCTION_NAMES.contains(&text))
}

/// Layer 1: reject forbidden keywords outside string literals
///
/// # Errors
///
/// Returns a security violation naming the first offending word
pub fn check_lexical(sql: &str, dialect: &dyn Dialect) -> AppResult<()> {
    for word in scan_words(sql, dialect.identifier_quotes()) {
        if is_forbidden(&word) {
            return Err(AppError::security_violation(format!(
                "Forbidden keyword '{}' detected; only SELECT statements are allowed",
                word.text
            )));
        }
        if FORBIDDEN_PREFIXES.iter().any(|p| word.text.starts_with(p)) {
            return Err(AppError::security_violation(format!(
                "Procedure call '{}' detected; only SELECT statements are allowed",
                word.text
            )));
        }
    }
    Ok(())
}

fn check_query(query: &Query) -> AppResult<()> {
    if let Some(with) = &query.with {
        for cte in &with.cte_tables {
            check_query(&cte.query)?;
        }
    }
    check_set_expr(&query.body)
}

fn check_set_expr(body: &SetExpr) -> AppResult<()> {
    match body {
        SetExpr::Select(select) => {
            if select.into.is_some() {
                return Err(AppError::security_violation(
                    "SELECT INTO creates objects and is not allowed",
                ));
            }
            Ok(())
        }
        SetExpr::Query(inner) => check_query(inner),
        SetExpr::SetOperation { left, right, .. } => {
            check_set_expr(left)?;
            check_set_expr(right)
        }
        _ => Err(AppError::security_violation(
            "Only SELECT statements are allowed",
        )),
    }
}

/// Layer 2: parse with the dialect grammar and require exactly one SELECT
///
/// Returns `Ok(false)` when the grammar cannot parse the text so the
/// caller can fall back to [`check_fallback`].
///
/// # Errors
///
/// Returns a security violation for anything that parses but is not a
/// single read-only query
pub fn check_structure(sql: &str, dialect: &dyn Dialect) -> AppResult<bool> {
    let grammar = dialect.parser_dialect();
    let statements = match Parser::parse_sql(grammar.as_ref(), sql) {
        Ok(statements) => statements,
        Err(e) => {
            debug!(engine = %dialect.engine(), error = %e, "SQL parser rejected statement, using fallback gate");
            return Ok(false);
        }
    };

    match statements.as_slice() {
        [Statement::Query(query)] => {
            check_query(query)?;
            Ok(true)
        }
        [_] => Err(AppError::security_violation(
            "Only SELECT statements are allowed",
        )),
        _ => Err(AppError::security_violation(format!(
            "Expected exactly one statement, found {}",
            statements.len()
        ))),
    }
}

fn select_prefix() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"(?is)^\s*SELECT\b").ok())
        .as_ref()
}

fn injection_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            // trailing comment, block comment, stacked UNION ALL SELECT, statement chaining
            Regex::new(r"(?is)--|/\*|\bUNION\s+ALL\s+SELECT\b|;\s*\S").ok()
        })
        .as_ref()
}

/// Strict gate used when the dialect grammar cannot parse a statement
///
/// # Errors
///
/// Returns a security violation unless the statement starts with `SELECT`
/// and matches none of the injection patterns
pub fn check_fallback(sql: &str) -> AppResult<()> {
    let (Some(prefix), Some(injection)) = (select_prefix(), injection_pattern()) else {
        return Err(AppError::security_violation(
            "Read-only fallback gate unavailable",
        ));
    };
    if !prefix.is_match(sql) {
        return Err(AppError::security_violation(
            "Statement must start with SELECT",
        ));
    }
    if injection.is_match(sql) {
        return Err(AppError::security_violation(
            "Statement contains a comment, stacked query or UNION ALL SELECT injection",
        ));
    }
    Ok(())
}

/// Run every statement-level check; the only path by which SQL reaches a driver
///
/// # Errors
///
/// Returns a security violation if any layer rejects the statement
pub fn ensure_read_only(sql: &str, dialect: &dyn Dialect) -> AppResult<()> {
    let result = check_lexical(sql, dialect).and_then(|()| {
        if check_structure(sql, dialect)? {
            Ok(())
        } else {
            check_fallback(sql)
        }
    });
    if let Err(e) = &result {
        warn!(engine = %dialect.engine(), reason = %e.message, "Rejected non read-only statement");
    }
    result
}
