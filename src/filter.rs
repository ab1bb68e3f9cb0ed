//! Search filter decompilation (RFC 4515 string form).
//!
//! Filters are only rendered for logging; entry selection never evaluates
//! them.

use std::fmt::Write;

use crate::ber::{Class, Packet};
use crate::error::{AppError, Result};

const FILTER_AND: u32 = 0;
const FILTER_OR: u32 = 1;
const FILTER_NOT: u32 = 2;
const FILTER_EQUALITY: u32 = 3;
const FILTER_SUBSTRINGS: u32 = 4;
const FILTER_GREATER_OR_EQUAL: u32 = 5;
const FILTER_LESS_OR_EQUAL: u32 = 6;
const FILTER_PRESENT: u32 = 7;
const FILTER_APPROX: u32 = 8;
const FILTER_EXTENSIBLE: u32 = 9;

const SUBSTRING_INITIAL: u32 = 0;
const SUBSTRING_ANY: u32 = 1;
const SUBSTRING_FINAL: u32 = 2;

const EXTENSIBLE_RULE: u32 = 1;
const EXTENSIBLE_TYPE: u32 = 2;
const EXTENSIBLE_VALUE: u32 = 3;
const EXTENSIBLE_DN_ATTRIBUTES: u32 = 4;

/// Render a BER-encoded filter as its RFC 4515 string.
pub fn decompile(filter: &Packet) -> Result<String> {
    let mut out = String::new();
    write_filter(filter, &mut out)?;
    Ok(out)
}

fn write_filter(filter: &Packet, out: &mut String) -> Result<()> {
    if filter.class != Class::Context {
        return Err(AppError::Decode(format!(
            "filter component has class {:?}, expected context-specific",
            filter.class
        )));
    }

    out.push('(');
    match filter.tag {
        FILTER_AND | FILTER_OR => {
            out.push(if filter.tag == FILTER_AND { '&' } else { '|' });
            for child in &filter.children {
                write_filter(child, out)?;
            }
        }
        FILTER_NOT => {
            out.push('!');
            let inner = filter
                .child(0)
                .ok_or_else(|| AppError::Decode("empty not filter".to_string()))?;
            write_filter(inner, out)?;
        }
        FILTER_EQUALITY | FILTER_GREATER_OR_EQUAL | FILTER_LESS_OR_EQUAL | FILTER_APPROX => {
            let operator = match filter.tag {
                FILTER_EQUALITY => "=",
                FILTER_GREATER_OR_EQUAL => ">=",
                FILTER_LESS_OR_EQUAL => "<=",
                _ => "~=",
            };
            let (attribute, value) = assertion(filter)?;
            out.push_str(attribute);
            out.push_str(operator);
            escape_into(value, out);
        }
        FILTER_SUBSTRINGS => write_substrings(filter, out)?,
        FILTER_PRESENT => {
            out.push_str(text(filter)?);
            out.push_str("=*");
        }
        FILTER_EXTENSIBLE => write_extensible(filter, out)?,
        other => {
            return Err(AppError::Decode(format!("unknown filter choice {}", other)));
        }
    }
    out.push(')');
    Ok(())
}

fn text(packet: &Packet) -> Result<&str> {
    packet
        .as_str()
        .map_err(|e| AppError::Decode(format!("filter attribute: {}", e)))
}

fn assertion(filter: &Packet) -> Result<(&str, &[u8])> {
    match (filter.child(0), filter.child(1)) {
        (Some(attribute), Some(value)) => Ok((text(attribute)?, value.as_bytes())),
        _ => Err(AppError::Decode(
            "attribute value assertion needs two elements".to_string(),
        )),
    }
}

fn write_substrings(filter: &Packet, out: &mut String) -> Result<()> {
    let attribute = filter
        .child(0)
        .ok_or_else(|| AppError::Decode("substring filter without attribute".to_string()))?;
    let parts = filter
        .child(1)
        .ok_or_else(|| AppError::Decode("substring filter without substrings".to_string()))?;

    out.push_str(text(attribute)?);
    out.push('=');

    for (index, part) in parts.children.iter().enumerate() {
        match part.tag {
            SUBSTRING_INITIAL if index == 0 => {
                escape_into(part.as_bytes(), out);
                out.push('*');
            }
            SUBSTRING_ANY => {
                if index == 0 {
                    out.push('*');
                }
                escape_into(part.as_bytes(), out);
                out.push('*');
            }
            SUBSTRING_FINAL if index + 1 == parts.children.len() => {
                if index == 0 {
                    out.push('*');
                }
                escape_into(part.as_bytes(), out);
            }
            other => {
                return Err(AppError::Decode(format!(
                    "substring choice {} out of place at position {}",
                    other, index
                )));
            }
        }
    }
    if parts.children.is_empty() {
        return Err(AppError::Decode("substring filter is empty".to_string()));
    }
    Ok(())
}

fn write_extensible(filter: &Packet, out: &mut String) -> Result<()> {
    let mut rule = None;
    let mut attribute = None;
    let mut value = None;
    let mut dn_attributes = false;

    for part in &filter.children {
        match part.tag {
            EXTENSIBLE_RULE => rule = Some(text(part)?),
            EXTENSIBLE_TYPE => attribute = Some(text(part)?),
            EXTENSIBLE_VALUE => value = Some(part.as_bytes()),
            EXTENSIBLE_DN_ATTRIBUTES => {
                dn_attributes = part.as_bytes().first().is_some_and(|b| *b != 0);
            }
            other => {
                return Err(AppError::Decode(format!(
                    "unknown extensible match element {}",
                    other
                )));
            }
        }
    }

    let value =
        value.ok_or_else(|| AppError::Decode("extensible match without value".to_string()))?;
    if let Some(attribute) = attribute {
        out.push_str(attribute);
    }
    if dn_attributes {
        out.push_str(":dn");
    }
    if let Some(rule) = rule {
        out.push(':');
        out.push_str(rule);
    }
    out.push_str(":=");
    escape_into(value, out);
    Ok(())
}

/// Escape an assertion value: the filter metacharacters, NUL and any bytes
/// that are not valid UTF-8 become `\xx`.
fn escape_into(value: &[u8], out: &mut String) {
    let mut rest = value;
    while !rest.is_empty() {
        let (valid, invalid) = match std::str::from_utf8(rest) {
            Ok(valid) => (valid, &[][..]),
            Err(e) => {
                let (head, tail) = rest.split_at(e.valid_up_to());
                let bad = e.error_len().unwrap_or(tail.len());
                // `head` is valid UTF-8 by construction.
                (std::str::from_utf8(head).unwrap_or_default(), &tail[..bad])
            }
        };
        for c in valid.chars() {
            match c {
                '*' | '(' | ')' | '\\' | '\0' => {
                    let _ = write!(out, "\\{:02x}", c as u8);
                }
                _ => out.push(c),
            }
        }
        for byte in invalid {
            let _ = write!(out, "\\{:02x}", byte);
        }
        rest = &rest[valid.len() + invalid.len()..];
    }
}
