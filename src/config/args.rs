//! Command-line key/value parsing

use crate::error::{Error, Result};
use crate::render::VariableBag;
use serde_json::Value;
use std::collections::BTreeMap;

/// Parse `key=value,key=value` into template variables
///
/// Values are kept as strings. `\,` is a literal comma and `\\` a literal
/// backslash. Empty segments are ignored so a trailing comma is harmless; a
/// later key overrides an earlier one.
pub fn parse_vars(input: &str) -> Result<VariableBag> {
    let mut vars = VariableBag::new();
    for segment in split_unescaped(input) {
        let segment = segment.trim();
        if segment.is_empty() {
            continue;
        }
        let (key, value) = split_pair(segment)?;
        vars.insert(key.to_string(), Value::String(value.to_string()));
    }
    Ok(vars)
}

fn split_unescaped(input: &str) -> Vec<String> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut chars = input.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some(next @ (',' | '\\')) => current.push(next),
                Some(other) => {
                    current.push('\\');
                    current.push(other);
                }
                None => current.push('\\'),
            },
            ',' => segments.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    segments.push(current);
    segments
}

/// Parse shell-style `key=value` words into action arguments
///
/// ```
/// use stagehand::config::parse_kv;
///
/// let args = parse_kv("name='my vm' state=running").unwrap();
/// assert_eq!(args["name"], "my vm");
/// ```
pub fn parse_kv(input: &str) -> Result<BTreeMap<String, String>> {
    let words = shell_words::split(input)
        .map_err(|e| Error::config(format!("invalid action arguments: {e}")))?;

    let mut args = BTreeMap::new();
    for word in &words {
        let (key, value) = split_pair(word)?;
        args.insert(key.to_string(), value.to_string());
    }
    Ok(args)
}

fn split_pair(pair: &str) -> Result<(&str, &str)> {
    match pair.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => Ok((key.trim(), value)),
        Some(_) => Err(Error::config(format!("missing key in '{pair}'"))),
        None => Err(Error::config(format!("expected key=value, got '{pair}'"))),
    }
}
