use std::collections::{BTreeMap, HashMap};

use crate::util::parse_hex_u32;
use crate::{RandomiserError, Result};

/// Game text codec used for `String` instruction arguments.
pub trait CharacterEncoding {
    fn encode(&self, text: &str) -> Result<Vec<u8>>;
    fn decode(&self, bytes: &[u8]) -> Result<String>;
}

pub const STRING_END: u8 = 0xFF;

/// Table-driven single/double byte text codec.
///
/// Strings are terminated with `0xFF`. Anything after the terminator is
/// treated as padding and ignored on decode. Byte values without a table
/// entry come out as `{xx}` escapes and go back in unchanged, so an empty
/// table still round-trips every payload. A mapped `{` decodes as `{{`.
#[derive(Debug, Clone, Default)]
pub struct TableEncoding {
    to_char: HashMap<Vec<u8>, char>,
    to_bytes: HashMap<char, Vec<u8>>,
}

impl TableEncoding {
    pub fn new<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (Vec<u8>, char)>,
    {
        let mut table = TableEncoding::default();
        for (bytes, c) in entries {
            table.to_bytes.entry(c).or_insert_with(|| bytes.clone());
            table.to_char.insert(bytes, c);
        }
        table
    }

    /// Load from a JSON object of hex code to character, e.g. `{"0b": "A", "8140": "!"}`.
    pub fn from_json_str(src: &str) -> Result<Self> {
        let map: BTreeMap<String, String> = serde_json::from_str(src)?;
        let mut entries = Vec::with_capacity(map.len());
        for (code, text) in map {
            let mut chars = text.chars();
            let c = match (chars.next(), chars.next()) {
                (Some(c), None) => c,
                _ => {
                    return Err(RandomiserError::Encoding(format!(
                        "character table entry {code} must map to exactly one character"
                    )))
                }
            };
            let value = parse_hex_u32(&format!("0x{code}")).ok_or_else(|| {
                RandomiserError::Encoding(format!("invalid character code '{code}'"))
            })?;
            let bytes = match code.len() {
                1 | 2 => vec![value as u8],
                3 | 4 => (value as u16).to_be_bytes().to_vec(),
                _ => {
                    return Err(RandomiserError::Encoding(format!(
                        "character code '{code}' is longer than two bytes"
                    )))
                }
            };
            entries.push((bytes, c));
        }
        Ok(TableEncoding::new(entries))
    }
}

impl CharacterEncoding for TableEncoding {
    fn encode(&self, text: &str) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(text.len() + 1);
        let chars: Vec<char> = text.chars().collect();
        let mut i = 0;
        while i < chars.len() {
            if chars[i] == '{' && chars.get(i + 1) == Some(&'{') {
                match self.to_bytes.get(&'{') {
                    Some(bytes) => out.extend_from_slice(bytes),
                    None => {
                        return Err(RandomiserError::Encoding(
                            "character '{' has no encoding".to_string(),
                        ))
                    }
                }
                i += 2;
                continue;
            }
            if chars[i] == '{' && i + 3 < chars.len() && chars[i + 3] == '}' {
                let hex: String = chars[i + 1..i + 3].iter().collect();
                if let Ok(b) = u8::from_str_radix(&hex, 16) {
                    out.push(b);
                    i += 4;
                    continue;
                }
            }
            match self.to_bytes.get(&chars[i]) {
                Some(bytes) => out.extend_from_slice(bytes),
                None => {
                    return Err(RandomiserError::Encoding(format!(
                        "character {:?} has no encoding",
                        chars[i]
                    )))
                }
            }
            i += 1;
        }
        out.push(STRING_END);
        Ok(out)
    }

    fn decode(&self, bytes: &[u8]) -> Result<String> {
        let end = bytes
            .iter()
            .position(|&b| b == STRING_END)
            .unwrap_or(bytes.len());
        let bytes = &bytes[..end];

        let mut out = String::new();
        let mut i = 0;
        while i < bytes.len() {
            if i + 1 < bytes.len() {
                if let Some(c) = self.to_char.get(&bytes[i..i + 2]) {
                    push_char(&mut out, *c);
                    i += 2;
                    continue;
                }
            }
            match self.to_char.get(&bytes[i..i + 1]) {
                Some(c) => push_char(&mut out, *c),
                None => out.push_str(&format!("{{{:02x}}}", bytes[i])),
            }
            i += 1;
        }
        Ok(out)
    }
}

fn push_char(out: &mut String, c: char) {
    if c == '{' {
        out.push_str("{{");
    } else {
        out.push(c);
    }
}
