//! Identifier escaping for the line protocol and for backup file names
//!
//! Neither direction guards against input that is already escaped: running
//! `escape_wire` twice yields doubled backslashes.

/// Stand-in for `/` in backup file names (U+2215 DIVISION SLASH)
pub const FILENAME_SLASH: char = '\u{2215}';

/// Escape an entity name, tag key/value or field key for the line protocol
pub fn escape_wire(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, ' ' | ',' | '=') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Reverse [`escape_wire`]
pub fn unescape_wire(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(&next) = chars.peek() {
                if matches!(next, ' ' | ',' | '=') {
                    out.push(next);
                    chars.next();
                    continue;
                }
            }
        }
        out.push(c);
    }
    out
}

/// Quote a string field value, escaping backslashes and double quotes
pub fn quote_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        if matches!(c, '"' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}

/// Reverse [`quote_string`] on the text between the quotes
pub fn unquote_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(&next) = chars.peek() {
                if matches!(next, '"' | '\\') {
                    out.push(next);
                    chars.next();
                    continue;
                }
            }
        }
        out.push(c);
    }
    out
}

/// Make an entity name safe to use as a file name
pub fn escape_filename(entity: &str) -> String {
    entity.replace('/', &FILENAME_SLASH.to_string())
}

/// Recover the entity name from a backup file name
pub fn unescape_filename(name: &str) -> String {
    name.replace(FILENAME_SLASH, "/")
}
