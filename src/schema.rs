//! Module `schema` implement the read-only attribute-type capability.
//!
//! Dirstore does not validate syntaxes, that is the schema subsystem's
//! job upstream. What the storage core needs from schema is narrow: per
//! attribute type, the normalization rule used to derive index keys, the
//! ordering byte form, the phonetic form for approximate matching, and
//! whether the attribute is operational.

use lazy_static::lazy_static;

use std::{collections::HashMap, str, sync::Arc};

use crate::{Error, Result};

/// Attribute-type metadata consumed by the indexer framework.
#[derive(Clone, Debug)]
pub struct AttrType {
    /// Lower-cased attribute name.
    pub name: String,
    /// Operational attributes are maintained by the server, not the user.
    pub operational: bool,
    /// Whether value comparison is case-sensitive.
    pub case_sensitive: bool,
    /// Whether an ordering matching rule is defined.
    pub ordering: bool,
    /// Whether an approximate matching rule is defined.
    pub approximate: bool,
}

impl AttrType {
    pub fn new(name: &str) -> AttrType {
        AttrType {
            name: name.to_lowercase(),
            operational: false,
            case_sensitive: false,
            ordering: true,
            approximate: false,
        }
    }

    pub fn set_operational(mut self, operational: bool) -> AttrType {
        self.operational = operational;
        self
    }

    pub fn set_case_sensitive(mut self, case_sensitive: bool) -> AttrType {
        self.case_sensitive = case_sensitive;
        self
    }

    pub fn set_approximate(mut self, approximate: bool) -> AttrType {
        self.approximate = approximate;
        self
    }

    /// Normalized byte form of a raw value, the equality/substring index
    /// key material. Case-ignore attributes fold to lower-case and
    /// collapse runs of spaces. Fails for values that are not valid UTF-8.
    pub fn normalize(&self, value: &[u8]) -> Result<Vec<u8>> {
        let text = err_at!(InvalidInput, str::from_utf8(value))?;
        let mut out = String::with_capacity(text.len());
        let mut last_space = true;
        for ch in text.trim().chars() {
            if ch.is_whitespace() {
                if !last_space {
                    out.push(' ');
                }
                last_space = true;
            } else {
                for c in normalize_char(ch, self.case_sensitive) {
                    out.push(c);
                }
                last_space = false;
            }
        }
        if out.ends_with(' ') {
            out.pop();
        }
        Ok(out.into_bytes())
    }

    /// Collation-aware byte form for the ordering index. The normalized
    /// rendition already sorts correctly for case-ignore strings; digits
    /// are left-padded so that numeric runs sort numerically.
    pub fn ordering_key(&self, value: &[u8]) -> Result<Vec<u8>> {
        let norm = self.normalize(value)?;
        let text = err_at!(InvalidInput, str::from_utf8(&norm))?;

        let mut out = Vec::with_capacity(text.len());
        let mut digits = String::new();
        for ch in text.chars() {
            if ch.is_ascii_digit() {
                digits.push(ch);
                continue;
            }
            flush_digits(&mut out, &mut digits);
            let mut buf = [0_u8; 4];
            out.extend_from_slice(ch.encode_utf8(&mut buf).as_bytes());
        }
        flush_digits(&mut out, &mut digits);
        Ok(out)
    }

    /// Phonetic-normalized form for the approximate index, a soundex code
    /// per word.
    pub fn approximate_key(&self, value: &[u8]) -> Result<Vec<u8>> {
        let norm = self.normalize(value)?;
        let text = err_at!(InvalidInput, str::from_utf8(&norm))?;
        let codes: Vec<String> = text.split_whitespace().map(soundex).collect();
        Ok(codes.join(" ").into_bytes())
    }
}

fn normalize_char(ch: char, case_sensitive: bool) -> impl Iterator<Item = char> {
    let iter: Box<dyn Iterator<Item = char>> = if case_sensitive {
        Box::new(std::iter::once(ch))
    } else {
        Box::new(ch.to_lowercase())
    };
    iter
}

// left-pad pending digit run to 20 columns, so numeric runs compare
// numerically in byte order.
fn flush_digits(out: &mut Vec<u8>, digits: &mut String) {
    if !digits.is_empty() {
        for _ in digits.len()..20 {
            out.push(b'0');
        }
        out.extend_from_slice(digits.as_bytes());
        digits.clear();
    }
}

/// Classic 4-character soundex code for a word. Non-ascii-alphabetic
/// characters contribute nothing.
pub fn soundex(word: &str) -> String {
    fn code(ch: char) -> u8 {
        match ch.to_ascii_lowercase() {
            'b' | 'f' | 'p' | 'v' => b'1',
            'c' | 'g' | 'j' | 'k' | 'q' | 's' | 'x' | 'z' => b'2',
            'd' | 't' => b'3',
            'l' => b'4',
            'm' | 'n' => b'5',
            'r' => b'6',
            _ => 0, // vowels, h, w, y and anything else
        }
    }

    let mut chars = word.chars().filter(|ch| ch.is_ascii_alphabetic());
    let first = match chars.next() {
        Some(ch) => ch.to_ascii_uppercase(),
        None => return String::default(),
    };

    let mut out = String::with_capacity(4);
    out.push(first);
    let mut prev = code(first);
    for ch in chars {
        let c = code(ch);
        if c != 0 && c != prev {
            out.push(c as char);
            if out.len() == 4 {
                break;
            }
        }
        if ch.to_ascii_lowercase() != 'h' && ch.to_ascii_lowercase() != 'w' {
            prev = c;
        }
    }
    while out.len() < 4 {
        out.push('0');
    }
    out
}

/// Read-only registry of attribute types. Lookups for unregistered
/// attributes fall back to a case-ignore user attribute, the storage
/// core never rejects an attribute on schema grounds.
pub struct Schema {
    attrs: HashMap<String, Arc<AttrType>>,
}

impl Default for Schema {
    fn default() -> Schema {
        let mut schema = Schema { attrs: HashMap::new() };
        for name in ["objectclass", "cn", "sn", "ou", "o", "dc", "uid", "mail"].iter() {
            schema.register(AttrType::new(name).set_approximate(true));
        }
        schema.register(AttrType::new("uidnumber"));
        schema.register(AttrType::new("creatorsname").set_operational(true));
        schema.register(AttrType::new("modifytimestamp").set_operational(true));
        schema
    }
}

impl Schema {
    pub fn register(&mut self, at: AttrType) -> &mut Self {
        self.attrs.insert(at.name.clone(), Arc::new(at));
        self
    }

    /// Return metadata for `name`, falling back to a default user
    /// attribute-type when unregistered.
    pub fn attr_type(&self, name: &str) -> Arc<AttrType> {
        let name = name.to_lowercase();
        match self.attrs.get(&name) {
            Some(at) => Arc::clone(at),
            None => Arc::new(AttrType::new(&name)),
        }
    }

    pub fn is_operational(&self, name: &str) -> bool {
        self.attr_type(name).operational
    }
}

lazy_static! {
    /// Process-wide default schema, used by tooling and tests.
    pub static ref DEFAULT_SCHEMA: Arc<Schema> = Arc::new(Schema::default());
}

#[cfg(test)]
#[path = "schema_test.rs"]
mod schema_test;
