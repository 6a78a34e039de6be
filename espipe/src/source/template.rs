//! Placeholder handling for SQL templates.
//!
//! Templates may use `?` placeholders, native `$n` placeholders or both. Every `?` is
//! rewritten to the `$n` form Postgres expects, numbered after the highest native
//! placeholder already present. A placeholder inside a quoted literal, a quoted
//! identifier, a dollar quoted string or a comment is left alone, and `??` stands for a
//! literal `?` (e.g. the jsonb key operator).

use crate::bail;
use crate::error::{ErrorKind, EtlResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Placeholder {
    /// A `?`.
    Question,
    /// A `$n`.
    Native(usize),
}

/// Rewrites every `?` placeholder of `sql` to `$n`, continuing the numbering of the
/// native placeholders of `sql`.
pub fn to_native_placeholders(sql: &str) -> String {
    let mut next = max_native_placeholder(sql);
    rewrite(sql, |out, placeholder| match placeholder {
        Placeholder::Question => {
            next += 1;
            out.push('$');
            out.push_str(&next.to_string());
        }
        Placeholder::Native(position) => {
            out.push('$');
            out.push_str(&position.to_string());
        }
    })
}

/// Counts the `?` placeholders of `sql`.
pub fn count_placeholders(sql: &str) -> usize {
    let mut count = 0;
    scan(sql, |placeholder| {
        if placeholder == Placeholder::Question {
            count += 1;
        }
    });
    count
}

/// Returns the highest `$n` placeholder of `sql`, or 0 when there is none.
pub fn max_native_placeholder(sql: &str) -> usize {
    let mut max = 0;
    scan(sql, |placeholder| {
        if let Placeholder::Native(position) = placeholder {
            max = max.max(position);
        }
    });
    max
}

/// Rewrites the single list placeholder of `sql` into `count` parameters,
/// `$1, $2, ..., $count`.
///
/// The list placeholder is either a lone `?` or a lone `$1`, e.g. `in (?)` or `in ($1)`.
/// Used for templates whose list length is only known at run time.
pub fn expand_list_placeholder(sql: &str, count: usize) -> EtlResult<String> {
    let mut questions = 0;
    let mut natives = Vec::new();
    scan(sql, |placeholder| match placeholder {
        Placeholder::Question => questions += 1,
        Placeholder::Native(position) => natives.push(position),
    });

    if !matches!((questions, natives.as_slice()), (1, []) | (0, [1])) {
        bail!(
            ErrorKind::ConfigError,
            "List query must have exactly one placeholder",
            format!(
                "found {questions} `?` and {} `$n` placeholders",
                natives.len()
            )
        );
    }
    if count == 0 {
        bail!(
            ErrorKind::InvalidArgument,
            "List query needs at least one value"
        );
    }

    let list = (1..=count)
        .map(|position| format!("${position}"))
        .collect::<Vec<_>>()
        .join(", ");

    Ok(rewrite(sql, |out, _| out.push_str(&list)))
}

fn scan(sql: &str, mut on_placeholder: impl FnMut(Placeholder)) {
    rewrite(sql, |_, placeholder| on_placeholder(placeholder));
}

fn is_identifier_byte(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || byte == b'_' || byte == b'$'
}

/// Returns the index right after the first occurrence of `needle` at or after `from`, or
/// the end of `sql`.
fn skip_past(sql: &str, from: usize, needle: &str) -> usize {
    sql.get(from..)
        .and_then(|rest| rest.find(needle))
        .map(|offset| from + offset + needle.len())
        .unwrap_or(sql.len())
}

/// Copies `sql`, handing every placeholder to `on_placeholder` instead of copying it.
fn rewrite(sql: &str, mut on_placeholder: impl FnMut(&mut String, Placeholder)) -> String {
    let bytes = sql.as_bytes();
    let mut out = String::with_capacity(sql.len() + 8);
    let mut copied = 0;
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'?' if bytes.get(i + 1) == Some(&b'?') => {
                out.push_str(&sql[copied..i]);
                out.push('?');
                i += 2;
                copied = i;
            }
            b'?' => {
                out.push_str(&sql[copied..i]);
                on_placeholder(&mut out, Placeholder::Question);
                i += 1;
                copied = i;
            }
            b'\'' => i = skip_past(sql, i + 1, "'"),
            b'"' => i = skip_past(sql, i + 1, "\""),
            b'-' if bytes.get(i + 1) == Some(&b'-') => i = skip_past(sql, i + 2, "\n"),
            b'/' if bytes.get(i + 1) == Some(&b'*') => i = skip_past(sql, i + 2, "*/"),
            b'$' if i > 0 && is_identifier_byte(bytes[i - 1]) => i += 1,
            b'$' if bytes.get(i + 1).is_some_and(u8::is_ascii_digit) => {
                let end = bytes[i + 1..]
                    .iter()
                    .position(|byte| !byte.is_ascii_digit())
                    .map(|offset| i + 1 + offset)
                    .unwrap_or(bytes.len());
                if let Ok(position) = sql[i + 1..end].parse::<usize>() {
                    out.push_str(&sql[copied..i]);
                    on_placeholder(&mut out, Placeholder::Native(position));
                    copied = end;
                }
                i = end;
            }
            b'$' => {
                // `$$` or `$tag$` opens a dollar quoted string closed by the same delimiter.
                let tag_end = bytes[i + 1..]
                    .iter()
                    .position(|byte| !(byte.is_ascii_alphanumeric() || *byte == b'_'))
                    .map(|offset| i + 1 + offset);
                match tag_end {
                    Some(tag_end) if bytes[tag_end] == b'$' => {
                        let delimiter = &sql[i..=tag_end];
                        i = skip_past(sql, tag_end + 1, delimiter);
                    }
                    _ => i += 1,
                }
            }
            _ => i += 1,
        }
    }

    out.push_str(&sql[copied..]);
    out
}
