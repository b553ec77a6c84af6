//! Key namespacing and glob patterns.
//!
//! ## Key Formats
//!
//! - Remote entry: `<cache_name>::<key>`, e.g. `article::123`
//! - Lock: `cache:lock:<cache_name>:<key>`, e.g. `cache:lock:article:123`
//!
//! The local tier uses the same string as the remote tier so that a single
//! pattern can be applied to both.

use std::str::Chars;

use regex::Regex;

use crate::error::{CacheError, CacheResult};

/// Separator between cache name and key in remote entry keys.
pub const KEY_SEPARATOR: &str = "::";

/// Prefix for lock keys.
pub const LOCK_PREFIX: &str = "cache:lock:";

/// Build the remote (and local) key for an entry.
#[inline]
pub fn remote_key(cache_name: &str, key: &str) -> String {
    format!("{cache_name}{KEY_SEPARATOR}{key}")
}

/// Build the lock key guarding loads of an entry.
#[inline]
pub fn lock_key(cache_name: &str, key: &str) -> String {
    format!("{LOCK_PREFIX}{cache_name}:{key}")
}

/// Escape glob metacharacters so the input matches literally.
pub fn escape_glob(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for c in input.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// A Redis-style glob over namespaced keys.
///
/// Supports `*`, `?`, `[abc]`, `[a-z]`, `[^a]` / `[!a]` and `\` escapes, the same
/// subset `SCAN MATCH` understands, so the remote scan and the local sweep
/// agree on what matches.
#[derive(Debug, Clone)]
pub struct KeyPattern {
    glob: String,
    regex: Regex,
}

impl KeyPattern {
    /// Pattern over keys of one cache. The cache name is matched literally.
    pub fn new(cache_name: &str, key_pattern: &str) -> CacheResult<Self> {
        Self::from_glob(format!(
            "{}{KEY_SEPARATOR}{key_pattern}",
            escape_glob(cache_name)
        ))
    }

    /// Pattern from an already-namespaced glob (used by the invalidation listener).
    pub fn from_glob(glob: impl Into<String>) -> CacheResult<Self> {
        let glob = glob.into();
        let regex = glob_to_regex(&glob)?;
        Ok(Self { glob, regex })
    }

    /// The glob as sent to the remote tier.
    pub fn as_glob(&self) -> &str {
        &self.glob
    }

    pub fn matches(&self, key: &str) -> bool {
        self.regex.is_match(key)
    }
}

fn glob_to_regex(glob: &str) -> CacheResult<Regex> {
    let mut out = String::with_capacity(glob.len() * 2 + 2);
    out.push('^');

    let mut chars = glob.chars();
    while let Some(c) = chars.next() {
        match c {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            '\\' => {
                let escaped = chars
                    .next()
                    .ok_or_else(|| CacheError::invalid_pattern(glob, "dangling escape"))?;
                push_literal(&mut out, escaped);
            }
            '[' => push_class(&mut chars, glob, &mut out)?,
            other => push_literal(&mut out, other),
        }
    }

    out.push('$');
    Regex::new(&out).map_err(|e| CacheError::invalid_pattern(glob, e.to_string()))
}

/// Translate a `[...]` class, the opening bracket already consumed.
///
/// Every member is emitted as an escaped literal, so regex class syntax
/// (`\d`, `--`, `&&`) never leaks in. `a-z` is a range; reversed ranges
/// are swapped the way Redis does.
fn push_class(chars: &mut Chars<'_>, glob: &str, out: &mut String) -> CacheResult<()> {
    out.push('[');
    let mut ahead = chars.clone();
    if matches!(ahead.next(), Some('!' | '^')) {
        *chars = ahead;
        out.push('^');
    }

    let mut first = true;
    loop {
        let c = chars
            .next()
            .ok_or_else(|| CacheError::invalid_pattern(glob, "unterminated character class"))?;
        match c {
            ']' if !first => break,
            '\\' => {
                let escaped = chars
                    .next()
                    .ok_or_else(|| CacheError::invalid_pattern(glob, "dangling escape"))?;
                push_literal(out, escaped);
            }
            start => match range_end(chars) {
                Some(end) => {
                    let (low, high) = if start <= end { (start, end) } else { (end, start) };
                    push_literal(out, low);
                    out.push('-');
                    push_literal(out, high);
                }
                None => push_literal(out, start),
            },
        }
        first = false;
    }

    out.push(']');
    Ok(())
}

/// Consume `-x` after a range start, unless the class closes right after the dash.
fn range_end(chars: &mut Chars<'_>) -> Option<char> {
    let mut ahead = chars.clone();
    if ahead.next() != Some('-') {
        return None;
    }
    match ahead.next() {
        Some(end) if end != ']' => {
            *chars = ahead;
            Some(end)
        }
        _ => None,
    }
}

fn push_literal(out: &mut String, c: char) {
    out.push_str(&regex::escape(c.encode_utf8(&mut [0; 4])));
}
