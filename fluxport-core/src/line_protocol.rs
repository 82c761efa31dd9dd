//! Line protocol encoding and decoding
//!
//! Format: `measurement[,tag=val...] field=val[,field=val...] timestamp`
//! Example: `agent_status,agent=foo\ bar new_status="offline",duration=1207920i 1496310265009000000`

use crate::codec::{escape_wire, quote_string, unescape_wire, unquote_string};
use crate::{FieldValue, Record};
use std::fmt::Write;

/// Encode a record as one newline-terminated line
pub fn encode_line(record: &Record) -> String {
    let mut line = String::with_capacity(record.size() + 32);
    write_line(&mut line, record);
    line
}

/// Append the encoded form of `record` to `out`
pub fn write_line(out: &mut String, record: &Record) {
    out.push_str(&escape_wire(&record.entity));
    for (k, v) in &record.tags {
        if v.is_empty() {
            continue;
        }
        out.push(',');
        out.push_str(&escape_wire(k));
        out.push('=');
        out.push_str(&escape_wire(v));
    }

    out.push(' ');
    for (i, (k, v)) in record.fields.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(&escape_wire(k));
        out.push('=');
        write_field_value(out, v);
    }

    // Writing into a String cannot fail
    let _ = writeln!(out, " {}", record.timestamp);
}

fn write_field_value(out: &mut String, value: &FieldValue) {
    match value {
        FieldValue::Float(v) => {
            let _ = write!(out, "{}", v);
        }
        FieldValue::Integer(v) => {
            let _ = write!(out, "{}i", v);
        }
        FieldValue::Boolean(v) => {
            let _ = write!(out, "{}", v);
        }
        FieldValue::String(s) => out.push_str(&quote_string(s)),
    }
}

/// Decode one line into a record
pub fn decode_line(line: &str) -> Result<Record, String> {
    let line = line.trim_end_matches(['\n', '\r']);

    // Quotes only delimit strings in the field set, so the key section is
    // split off first without quote tracking
    let (key, rest) = split_key(line).ok_or("Invalid line format")?;
    let sections = split_unescaped(rest, ' ', true);
    if sections.len() > 2 {
        return Err("Unexpected trailing data".to_string());
    }

    // Parse measurement and tags
    let key_parts = split_unescaped(key, ',', false);
    let measurement = unescape_wire(key_parts[0]);
    if measurement.is_empty() {
        return Err("Missing measurement".to_string());
    }

    let mut record = Record::new(measurement, 0);
    for tag in key_parts.iter().skip(1) {
        let (k, v) = split_pair(tag).ok_or_else(|| format!("Invalid tag: {}", tag))?;
        record.tags.insert(unescape_wire(k), unescape_wire(v));
    }

    // Parse fields
    for field in split_unescaped(sections[0], ',', true) {
        let (k, v) = split_pair(field).ok_or_else(|| format!("Invalid field: {}", field))?;
        let value = parse_field_value(v)?;
        record.fields.insert(unescape_wire(k), value);
    }

    // Parse timestamp
    let timestamp = sections
        .get(1)
        .ok_or("Missing timestamp")?
        .trim()
        .parse::<i64>()
        .map_err(|_| "Invalid timestamp")?;
    record.timestamp = timestamp;

    record.validate().map_err(|e| e.to_string())?;
    Ok(record)
}

/// Parse a field value in its line protocol form
pub fn parse_field_value(s: &str) -> Result<FieldValue, String> {
    // String (quoted)
    if s.len() >= 2 && s.starts_with('"') && s.ends_with('"') {
        return Ok(FieldValue::String(unquote_string(&s[1..s.len() - 1])));
    }

    // Boolean
    match s {
        "t" | "T" | "true" | "True" | "TRUE" => return Ok(FieldValue::Boolean(true)),
        "f" | "F" | "false" | "False" | "FALSE" => return Ok(FieldValue::Boolean(false)),
        _ => {}
    }

    // Integer (ends with 'i', or 'u' for unsigned)
    if let Some(digits) = s.strip_suffix('i').or_else(|| s.strip_suffix('u')) {
        let n = digits
            .parse::<i64>()
            .map_err(|_| format!("Invalid integer: {}", s))?;
        return Ok(FieldValue::Integer(n));
    }

    // Float (default)
    let n = s
        .parse::<f64>()
        .map_err(|_| format!("Invalid field value: {}", s))?;
    Ok(FieldValue::Float(n))
}

/// Split at the first unescaped space
fn split_key(line: &str) -> Option<(&str, &str)> {
    let mut escaped = false;
    for (i, c) in line.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' => escaped = true,
            ' ' => return Some((&line[..i], &line[i + 1..])),
            _ => {}
        }
    }
    None
}

/// Split on `sep` where it is not backslash-escaped (and, if `quotes`, not
/// inside a double-quoted string)
fn split_unescaped(s: &str, sep: char, quotes: bool) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut escaped = false;
    let mut in_quotes = false;

    for (i, c) in s.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' => escaped = true,
            '"' if quotes => in_quotes = !in_quotes,
            c if c == sep && !in_quotes => {
                parts.push(&s[start..i]);
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    parts.push(&s[start..]);
    parts
}

/// Split `key=value` on the first unescaped `=`
fn split_pair(s: &str) -> Option<(&str, &str)> {
    let mut escaped = false;
    for (i, c) in s.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' => escaped = true,
            '=' => {
                let (k, v) = (&s[..i], &s[i + 1..]);
                return (!k.is_empty() && !v.is_empty()).then_some((k, v));
            }
            _ => {}
        }
    }
    None
}
