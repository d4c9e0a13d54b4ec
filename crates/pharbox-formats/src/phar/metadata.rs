//! PHP `serialize()` encoding for archive metadata
//!
//! Metadata is stored in the manifest in PHP's native serialization. JSON
//! objects and arrays both become PHP arrays; object keys that look like
//! canonical integers become integer keys, as PHP does on insertion.

use serde_json::Value;

/// Serialize a JSON value the way PHP's `serialize()` would
pub fn serialize(value: &Value) -> Vec<u8> {
    let mut out = Vec::new();
    write_value(&mut out, value);
    out
}

fn write_value(out: &mut Vec<u8>, value: &Value) {
    match value {
        Value::Null => out.extend_from_slice(b"N;"),
        Value::Bool(b) => out.extend_from_slice(if *b { b"b:1;" } else { b"b:0;" }),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                out.extend_from_slice(format!("i:{i};").as_bytes());
            } else if let Some(f) = n.as_f64() {
                out.extend_from_slice(format!("d:{f};").as_bytes());
            }
        }
        Value::String(s) => write_string(out, s),
        Value::Array(items) => {
            out.extend_from_slice(format!("a:{}:{{", items.len()).as_bytes());
            for (index, item) in items.iter().enumerate() {
                out.extend_from_slice(format!("i:{index};").as_bytes());
                write_value(out, item);
            }
            out.push(b'}');
        }
        Value::Object(map) => {
            out.extend_from_slice(format!("a:{}:{{", map.len()).as_bytes());
            for (key, item) in map {
                write_key(out, key);
                write_value(out, item);
            }
            out.push(b'}');
        }
    }
}

fn write_string(out: &mut Vec<u8>, s: &str) {
    out.extend_from_slice(format!("s:{}:\"", s.len()).as_bytes());
    out.extend_from_slice(s.as_bytes());
    out.extend_from_slice(b"\";");
}

fn write_key(out: &mut Vec<u8>, key: &str) {
    match key.parse::<i64>() {
        Ok(i) if i.to_string() == key => out.extend_from_slice(format!("i:{i};").as_bytes()),
        _ => write_string(out, key),
    }
}
