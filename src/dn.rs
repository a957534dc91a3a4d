//! Module `dn` implement the distinguished-name type.
//!
//! A DN is an ordered list of relative-distinguished-names, leaf first,
//! like `cn=a,ou=b,dc=example`. Dirstore keeps a normalized rendition of
//! every DN, lower-cased with insignificant spaces removed, which is the
//! byte form used as `dn2id` key and for all ancestry computation.

use std::{fmt, result, str::FromStr};

use crate::{Error, Result};

/// A single `attribute=value` component of a [Dn].
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Rdn {
    pub attr: String,
    pub value: String,
}

impl fmt::Display for Rdn {
    fn fmt(&self, f: &mut fmt::Formatter) -> result::Result<(), fmt::Error> {
        write!(f, "{}={}", self.attr, self.value)
    }
}

/// Distinguished name, the hierarchical identifier of a directory entry.
///
/// Two Dn values compare equal when their normalized renditions are equal.
#[derive(Clone, Debug)]
pub struct Dn {
    rdns: Vec<Rdn>, // leaf first, normalized
    norm: String,
}

impl PartialEq for Dn {
    fn eq(&self, other: &Dn) -> bool {
        self.norm == other.norm
    }
}

impl Eq for Dn {}

impl std::hash::Hash for Dn {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.norm.hash(state)
    }
}

impl fmt::Display for Dn {
    fn fmt(&self, f: &mut fmt::Formatter) -> result::Result<(), fmt::Error> {
        write!(f, "{}", self.norm)
    }
}

impl FromStr for Dn {
    type Err = Error;

    fn from_str(s: &str) -> Result<Dn> {
        Dn::parse(s)
    }
}

impl Dn {
    /// Parse and normalize a DN from its string rendition. Escaped commas
    /// (`\,`) and equals (`\=`) within a value are honored.
    pub fn parse(text: &str) -> Result<Dn> {
        let text = text.trim();
        if text.is_empty() {
            return err_at!(InvalidInput, msg: "empty dn");
        }

        let mut rdns = vec![];
        for comp in split_unescaped(text, ',') {
            let comp = comp.trim();
            if comp.is_empty() {
                return err_at!(InvalidInput, msg: "empty rdn in {:?}", text);
            }
            let mut parts = split_unescaped(comp, '=');
            let (attr, value) = match (parts.next(), parts.next(), parts.next()) {
                (Some(a), Some(v), None) => (a.trim(), v.trim()),
                _ => return err_at!(InvalidInput, msg: "bad rdn {:?}", comp),
            };
            if attr.is_empty() || value.is_empty() {
                return err_at!(InvalidInput, msg: "bad rdn {:?}", comp);
            }
            rdns.push(Rdn {
                attr: attr.to_lowercase(),
                value: unescape(value).to_lowercase(),
            });
        }

        Ok(Dn::from_rdns(rdns))
    }

    fn from_rdns(rdns: Vec<Rdn>) -> Dn {
        let norm = rdns
            .iter()
            .map(|r| format!("{}={}", r.attr, escape(&r.value)))
            .collect::<Vec<String>>()
            .join(",");
        Dn { rdns, norm }
    }

    /// Return the leaf-most component.
    pub fn rdn(&self) -> &Rdn {
        &self.rdns[0]
    }

    /// Number of components.
    pub fn num_rdns(&self) -> usize {
        self.rdns.len()
    }

    /// Return the immediate parent, None for a single-component DN.
    pub fn parent(&self) -> Option<Dn> {
        if self.rdns.len() <= 1 {
            None
        } else {
            Some(Dn::from_rdns(self.rdns[1..].to_vec()))
        }
    }

    /// Iterate ancestors from the immediate parent up to the root
    /// component, excluding self.
    pub fn ancestors(&self) -> impl Iterator<Item = Dn> + '_ {
        (1..self.rdns.len()).map(move |n| Dn::from_rdns(self.rdns[n..].to_vec()))
    }

    /// Whether self is `base` itself or a descendant of `base`.
    pub fn is_under(&self, base: &Dn) -> bool {
        let (n, m) = (self.rdns.len(), base.rdns.len());
        n >= m && self.rdns[(n - m)..] == base.rdns[..]
    }

    /// Whether self is a strict descendant of `base`.
    pub fn is_descendant_of(&self, base: &Dn) -> bool {
        self.num_rdns() > base.num_rdns() && self.is_under(base)
    }

    /// The normalized string rendition.
    pub fn as_norm(&self) -> &str {
        &self.norm
    }

    /// The normalized rendition as `dn2id` key bytes.
    pub fn to_key(&self) -> Vec<u8> {
        self.norm.as_bytes().to_vec()
    }

    /// Deterministic namespace name derived from this DN, every
    /// non-alphanumeric byte replaced with `_`, so operational tooling can
    /// address the namespaces without a catalog lookup.
    pub fn to_namespace(&self) -> String {
        self.norm
            .chars()
            .map(|ch| if ch.is_ascii_alphanumeric() { ch } else { '_' })
            .collect()
    }
}

// split on `sep`, honoring backslash escapes.
fn split_unescaped(text: &str, sep: char) -> impl Iterator<Item = &str> {
    let mut parts = vec![];
    let (mut start, mut escaped) = (0_usize, false);
    for (i, ch) in text.char_indices() {
        if escaped {
            escaped = false;
        } else if ch == '\\' {
            escaped = true;
        } else if ch == sep {
            parts.push(&text[start..i]);
            start = i + ch.len_utf8();
        }
    }
    parts.push(&text[start..]);
    parts.into_iter()
}

fn unescape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut escaped = false;
    for ch in value.chars() {
        if escaped {
            out.push(ch);
            escaped = false;
        } else if ch == '\\' {
            escaped = true;
        } else {
            out.push(ch);
        }
    }
    out
}

fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        if ch == ',' || ch == '=' || ch == '\\' {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

#[cfg(test)]
#[path = "dn_test.rs"]
mod dn_test;
