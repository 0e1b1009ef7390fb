//! Unit-name mangling and bus-label escaping.
//!
//! Two different encodings are in play:
//!
//! ```text
//! unit name     foo bar.service      -> foo\x20bar.service           (mangle)
//! object label  foo\x20bar.service   -> foo_5cx20bar_2eservice       (escape_bus_label)
//! ```
//!
//! Mangling produces a string made only of characters that are valid in a
//! unit name, so applying it twice is the same as applying it once. Bus-label
//! escaping is a reversible byte encoding used for the last element of a unit
//! object path.

use std::fmt::Write as _;

/// `true` for characters that may appear verbatim in a unit name.
pub fn is_unit_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, ':' | '_' | '.' | '\\' | '-' | '@')
}

/// Replace every character that is not valid in a unit name.
///
/// `/` becomes `-`, whitespace and everything else outside the unit-name
/// alphabet becomes `\xNN` per UTF-8 byte.
pub fn mangle(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if is_unit_name_char(c) {
            out.push(c);
        } else if c == '/' {
            out.push('-');
        } else {
            let mut buf = [0u8; 4];
            for byte in c.encode_utf8(&mut buf).bytes() {
                let _ = write!(out, "\\x{byte:02x}");
            }
        }
    }
    out
}

/// Escape a string into a single D-Bus object-path label.
///
/// ASCII alphanumerics pass through (except a leading digit), every other
/// byte becomes `_xx` with lower-case hex. The empty string maps to `_`.
pub fn escape_bus_label(s: &str) -> String {
    if s.is_empty() {
        return "_".to_string();
    }
    let mut out = String::with_capacity(s.len() * 3);
    for (i, byte) in s.bytes().enumerate() {
        if byte.is_ascii_alphabetic() || (byte.is_ascii_digit() && i > 0) {
            out.push(byte as char);
        } else {
            let _ = write!(out, "_{byte:02x}");
        }
    }
    out
}

/// Inverse of [`escape_bus_label`]. Returns `None` for malformed escapes or
/// a decoded value that is not UTF-8.
pub fn unescape_bus_label(label: &str) -> Option<String> {
    if label == "_" {
        return Some(String::new());
    }
    let bytes = label.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'_' {
            let hex = label.get(i + 1..i + 3)?;
            if !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
                return None;
            }
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}
