//! Query Language (C6): a Splunk-like pipeline of stages over the Index
//! Engine, parsed with a small hand-rolled recursive-descent parser rather
//! than a grammar crate — the pipeline grammar is simple enough that a
//! parser-combinator dependency would cost more than it saves.

use crate::error::{GrepwiseError, Result};
use crate::index::IndexEngine;
use crate::model::{LogLevel, LogRecord};
use std::collections::HashMap;
use std::str::FromStr;
use tracing::warn;

/// Tagged-union query result, matching spec.md's
/// `{type: LOG_ENTRIES | STATISTICS}` shape.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryResult {
    LogEntries(Vec<LogRecord>),
    Statistics(Statistics),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Statistics {
    Count(u64),
    CountByField(HashMap<String, u64>),
}

#[derive(Debug, Clone)]
enum Stage {
    Search(String),
    Where(String),
    StatsCount { by: Option<String> },
    Sort { field: String, descending: bool },
    Head(usize),
    Tail(usize),
    Eval { field: String, expr: String },
    Unknown(String),
}

/// Splits `input` on top-level `|` (respecting double-quoted spans so a
/// quoted value can itself contain a pipe character) and parses each
/// stage.
fn split_pipeline(input: &str) -> Vec<String> {
    let mut stages = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    for c in input.chars() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                current.push(c);
            }
            '|' if !in_quotes => {
                stages.push(current.trim().to_string());
                current.clear();
            }
            _ => current.push(c),
        }
    }
    if !current.trim().is_empty() {
        stages.push(current.trim().to_string());
    }
    stages
}

fn parse_stage(raw: &str) -> Stage {
    let trimmed = raw.trim();
    let (keyword, rest) = match trimmed.split_once(char::is_whitespace) {
        Some((k, r)) => (k, r.trim()),
        None => (trimmed, ""),
    };
    match keyword {
        "search" => Stage::Search(rest.to_string()),
        "where" => Stage::Where(rest.to_string()),
        "stats" => {
            let by = rest.split_once(" by ").map(|(_, field)| field.trim().to_string());
            Stage::StatsCount { by }
        }
        "sort" => {
            let (descending, field) = match rest.strip_prefix('-') {
                Some(f) => (true, f),
                None => (false, rest.strip_prefix('+').unwrap_or(rest)),
            };
            Stage::Sort {
                field: field.trim().to_string(),
                descending,
            }
        }
        "head" => Stage::Head(rest.trim().parse().unwrap_or(10)),
        "tail" => Stage::Tail(rest.trim().parse().unwrap_or(10)),
        "eval" => match rest.split_once('=') {
            Some((field, expr)) => Stage::Eval {
                field: field.trim().to_string(),
                expr: expr.trim().to_string(),
            },
            None => Stage::Unknown(trimmed.to_string()),
        },
        other => Stage::Unknown(other.to_string()),
    }
}

/// Runs `pipeline` against `index`, yielding either a log-entry stream or a
/// statistics result.
pub async fn run_pipeline(
    index: &IndexEngine,
    pipeline: &str,
    start: Option<i64>,
    end: Option<i64>,
) -> Result<QueryResult> {
    let raw_stages: Vec<Stage> = split_pipeline(pipeline).iter().map(|s| parse_stage(s)).collect();
    if raw_stages.is_empty() {
        return Err(GrepwiseError::Validation("empty query pipeline".into()));
    }

    let mut records: Vec<LogRecord> = Vec::new();
    let mut statistics: Option<Statistics> = None;

    for stage in raw_stages {
        match stage {
            Stage::Search(expr) => {
                records = run_search_stage(index, &expr, start, end).await?;
            }
            Stage::Where(predicate) => {
                records.retain(|r| evaluate_predicate(&predicate, r));
            }
            Stage::StatsCount { by } => {
                statistics = Some(compute_stats(&records, by.as_deref()));
                records.clear();
            }
            Stage::Sort { field, descending } => {
                sort_records(&mut records, &field, descending);
            }
            Stage::Head(n) => {
                records.truncate(n);
            }
            Stage::Tail(n) => {
                if records.len() > n {
                    records = records.split_off(records.len() - n);
                }
            }
            Stage::Eval { field, expr } => {
                for record in &mut records {
                    let value = evaluate_eval_expr(&expr, record);
                    record.metadata.insert(field.clone(), value);
                }
            }
            Stage::Unknown(name) => {
                warn!(stage = %name, "skipping unknown query stage");
            }
        }
    }

    Ok(match statistics {
        Some(s) => QueryResult::Statistics(s),
        None => QueryResult::LogEntries(records),
    })
}

async fn run_search_stage(index: &IndexEngine, expr: &str, start: Option<i64>, end: Option<i64>) -> Result<Vec<LogRecord>> {
    let trimmed = expr.trim();
    if let Some(value) = trimmed.strip_prefix("level=") {
        if let Ok(level) = LogLevel::from_str(value.trim_matches('"')) {
            return Ok(index.find_by_level(level).await);
        }
    }
    index.search(trimmed, false, start, end).await
}

fn field_value(record: &LogRecord, field: &str) -> Option<String> {
    match field {
        "level" => Some(record.level.as_str().to_string()),
        "source" => Some(record.source.clone()),
        "message" => Some(record.message.clone()),
        "timestamp" => Some(record.timestamp.to_string()),
        other => record.metadata.get(other).cloned(),
    }
}

fn evaluate_predicate(predicate: &str, record: &LogRecord) -> bool {
    let predicate = predicate.trim();
    if let Some((lhs, rhs)) = predicate.split_once(" and ") {
        return evaluate_predicate(lhs, record) && evaluate_predicate(rhs, record);
    }
    if let Some((lhs, rhs)) = predicate.split_once(" or ") {
        return evaluate_predicate(lhs, record) || evaluate_predicate(rhs, record);
    }

    for (op, cmp) in [
        ("!=", Cmp::Ne),
        (">=", Cmp::Ge),
        ("<=", Cmp::Le),
        ("=", Cmp::Eq),
        (">", Cmp::Gt),
        ("<", Cmp::Lt),
    ] {
        if let Some((field, value)) = predicate.split_once(op) {
            let field = field.trim();
            let value = value.trim().trim_matches('"');
            let Some(actual) = field_value(record, field) else {
                return false;
            };
            return match cmp {
                Cmp::Eq => actual.eq_ignore_ascii_case(value),
                Cmp::Ne => !actual.eq_ignore_ascii_case(value),
                Cmp::Gt | Cmp::Lt | Cmp::Ge | Cmp::Le => match (actual.parse::<f64>(), value.parse::<f64>()) {
                    (Ok(a), Ok(b)) => match cmp {
                        Cmp::Gt => a > b,
                        Cmp::Lt => a < b,
                        Cmp::Ge => a >= b,
                        Cmp::Le => a <= b,
                        _ => unreachable!(),
                    },
                    _ => false,
                },
            };
        }
    }
    false
}

enum Cmp {
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
}

fn compute_stats(records: &[LogRecord], by: Option<&str>) -> Statistics {
    match by {
        None => Statistics::Count(records.len() as u64),
        Some(field) => {
            let mut counts: HashMap<String, u64> = HashMap::new();
            for record in records {
                let key = field_value(record, field).unwrap_or_else(|| "".to_string());
                *counts.entry(key).or_insert(0) += 1;
            }
            Statistics::CountByField(counts)
        }
    }
}

fn sort_records(records: &mut [LogRecord], field: &str, descending: bool) {
    records.sort_by(|a, b| {
        let ordering = if field == "level" {
            a.level.rank().cmp(&b.level.rank())
        } else {
            let av = field_value(a, field).unwrap_or_default();
            let bv = field_value(b, field).unwrap_or_default();
            match (av.parse::<f64>(), bv.parse::<f64>()) {
                (Ok(x), Ok(y)) => x.partial_cmp(&y).unwrap_or(std::cmp::Ordering::Equal),
                _ => av.cmp(&bv),
            }
        };
        let primary = if descending { ordering.reverse() } else { ordering };
        primary.then_with(|| b.timestamp.cmp(&a.timestamp))
    });
}

fn evaluate_eval_expr(expr: &str, record: &LogRecord) -> String {
    // Supports `field` (copy), `"literal"`, and `field + "literal"` concatenation.
    let parts = expr.split('+').map(|p| p.trim());
    let mut out = String::new();
    for part in parts {
        if let Some(lit) = part.strip_prefix('"').and_then(|p| p.strip_suffix('"')) {
            out.push_str(lit);
        } else if let Some(value) = field_value(record, part) {
            out.push_str(&value);
        }
    }
    out
}
