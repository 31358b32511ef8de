// flowbase-core/src/query.rs
//! MongoDB-style query filter matching
//!
//! A filter is a JSON object of field conditions combined with implicit AND.
//! Conditions are either literal values (equality) or operator objects:
//! comparison ($eq, $ne, $gt, $gte, $lt, $lte), set ($in, $nin), element
//! ($exists), pattern ($regex with $options) and negation ($not).
//! $and / $or combine whole sub-filters at the top level.
//!
//! Matching is exposed twice with shared internals:
//! - `matches_filter` for stored [`Document`]s (collection scans)
//! - `value_matches_filter` for plain JSON values (aggregation $match)

use crate::document::Document;
use crate::error::{FlowBaseError, Result};
use crate::value_utils::{compare_values, get_nested_value, values_equal};
use lazy_static::lazy_static;
use lru::LruCache;
use regex::Regex;
use serde_json::Value;
use std::cmp::Ordering;
use std::num::NonZeroUsize;
use std::sync::Mutex;

lazy_static! {
    /// Cache for compiled regex patterns, keyed by "pattern:options".
    /// LRU with 100 entry limit to prevent memory bloat.
    static ref REGEX_CACHE: Mutex<LruCache<String, Regex>> =
        Mutex::new(LruCache::new(NonZeroUsize::new(100).unwrap()));
}

/// Build a regex pattern string with MongoDB-style options (i, m, s, x)
/// translated to Rust regex inline flags.
fn build_regex_pattern(pattern: &str, options: &str) -> String {
    let mut regex_str = String::new();

    let valid_options: String = options
        .chars()
        .filter(|c| matches!(c, 'i' | 'm' | 's' | 'x'))
        .collect();

    if !valid_options.is_empty() {
        regex_str.push_str("(?");
        regex_str.push_str(&valid_options);
        regex_str.push(')');
    }

    regex_str.push_str(pattern);
    regex_str
}

/// Get or compile a regex, going through the LRU cache.
/// Regex::new() is expensive; repeated filters reuse the compiled form.
fn get_or_compile_regex(pattern: &str, options: &str) -> Result<Regex> {
    let cache_key = format!("{}:{}", pattern, options);

    {
        let mut cache = REGEX_CACHE.lock().unwrap();
        if let Some(regex) = cache.get(&cache_key) {
            return Ok(regex.clone());
        }
    }

    let regex_pattern = build_regex_pattern(pattern, options);
    let regex = Regex::new(&regex_pattern).map_err(|e| {
        FlowBaseError::InvalidQuery(format!("Invalid regex pattern '{}': {}", pattern, e))
    })?;

    {
        let mut cache = REGEX_CACHE.lock().unwrap();
        cache.put(cache_key, regex.clone());
    }

    Ok(regex)
}

/// Check whether a stored document matches a filter.
pub fn matches_filter(doc: &Document, filter: &Value) -> Result<bool> {
    matches_impl(&|field: &str| doc.get(field), filter)
}

/// Check whether a plain JSON value (document shape) matches a filter.
pub fn value_matches_filter(doc: &Value, filter: &Value) -> Result<bool> {
    matches_impl(&|field: &str| get_nested_value(doc, field), filter)
}

fn matches_impl<'v, F>(lookup: &F, filter: &Value) -> Result<bool>
where
    F: Fn(&str) -> Option<&'v Value>,
{
    let obj = match filter {
        Value::Object(obj) => obj,
        _ => {
            return Err(FlowBaseError::InvalidQuery(
                "Query filter must be an object".to_string(),
            ))
        }
    };

    for (key, condition) in obj {
        let matched = match key.as_str() {
            "$and" => {
                let clauses = condition.as_array().ok_or_else(|| {
                    FlowBaseError::InvalidQuery("$and requires an array".to_string())
                })?;
                let mut all = true;
                for clause in clauses {
                    if !matches_impl(lookup, clause)? {
                        all = false;
                        break;
                    }
                }
                all
            }
            "$or" => {
                let clauses = condition.as_array().ok_or_else(|| {
                    FlowBaseError::InvalidQuery("$or requires an array".to_string())
                })?;
                let mut any = false;
                for clause in clauses {
                    if matches_impl(lookup, clause)? {
                        any = true;
                        break;
                    }
                }
                any
            }
            op if op.starts_with('$') => {
                return Err(FlowBaseError::InvalidQuery(format!(
                    "Unknown top-level operator: {}",
                    op
                )));
            }
            field => evaluate_condition(lookup(field), condition)?,
        };

        if !matched {
            return Ok(false);
        }
    }

    Ok(true)
}

/// Does an operator object look like `{"$gt": 5, ...}` (every key an operator)?
fn is_operator_object(condition: &Value) -> bool {
    match condition {
        Value::Object(obj) => !obj.is_empty() && obj.keys().all(|k| k.starts_with('$')),
        _ => false,
    }
}

/// Evaluate one field condition against the (possibly missing) field value.
fn evaluate_condition(value: Option<&Value>, condition: &Value) -> Result<bool> {
    if !is_operator_object(condition) {
        // Literal equality; a missing field never equals a literal
        return Ok(match value {
            Some(v) => values_equal(v, condition),
            None => condition.is_null(),
        });
    }

    let ops = condition.as_object().expect("checked by is_operator_object");
    for (op, target) in ops {
        let matched = match op.as_str() {
            "$eq" => values_equal(value.unwrap_or(&Value::Null), target),
            "$ne" => !values_equal(value.unwrap_or(&Value::Null), target),
            "$gt" => compare_ordering(value, target, |o| o == Ordering::Greater),
            "$gte" => compare_ordering(value, target, |o| o != Ordering::Less),
            "$lt" => compare_ordering(value, target, |o| o == Ordering::Less),
            "$lte" => compare_ordering(value, target, |o| o != Ordering::Greater),
            "$in" => {
                let candidates = target.as_array().ok_or_else(|| {
                    FlowBaseError::InvalidQuery("$in requires an array".to_string())
                })?;
                match value {
                    Some(v) => candidates.iter().any(|c| values_equal(v, c)),
                    None => false,
                }
            }
            "$nin" => {
                let candidates = target.as_array().ok_or_else(|| {
                    FlowBaseError::InvalidQuery("$nin requires an array".to_string())
                })?;
                match value {
                    Some(v) => !candidates.iter().any(|c| values_equal(v, c)),
                    None => true,
                }
            }
            "$exists" => {
                let wanted = target.as_bool().ok_or_else(|| {
                    FlowBaseError::InvalidQuery("$exists requires a boolean".to_string())
                })?;
                value.is_some() == wanted
            }
            "$regex" => {
                let pattern = target.as_str().ok_or_else(|| {
                    FlowBaseError::InvalidQuery("$regex requires a string pattern".to_string())
                })?;
                let options = ops
                    .get("$options")
                    .and_then(|o| o.as_str())
                    .unwrap_or("");
                match value.and_then(|v| v.as_str()) {
                    Some(text) => get_or_compile_regex(pattern, options)?.is_match(text),
                    None => false,
                }
            }
            // Consumed together with $regex above
            "$options" => true,
            "$not" => !evaluate_condition(value, target)?,
            other => {
                return Err(FlowBaseError::InvalidQuery(format!(
                    "Unknown query operator: {}",
                    other
                )));
            }
        };

        if !matched {
            return Ok(false);
        }
    }

    Ok(true)
}

fn compare_ordering<F>(value: Option<&Value>, target: &Value, accept: F) -> bool
where
    F: Fn(Ordering) -> bool,
{
    match value {
        Some(v) => compare_values(v, target).map(accept).unwrap_or(false),
        None => false,
    }
}
