//! Module `entry` implement the unit of storage, a DN plus its attributes.
//!
//! Decoded entries are private per-call copies. The storage core never
//! hands out a shared entry object, mutating a decoded entry has no
//! effect until it is written back through an explicit replace operation.

use cbordata::Cborize;

use std::{collections::BTreeSet, fmt, result};

use crate::{dn::Dn, Result};

const ENTRY_VER: u32 = 0x00010001;

/// One attribute, a type plus its ordered set of raw values.
#[derive(Clone, Debug, Eq, PartialEq, Cborize)]
pub struct Attr {
    pub name: String, // lower-cased attribute name
    pub values: Vec<Vec<u8>>,
}

impl Attr {
    const ID: u32 = ENTRY_VER;

    pub fn new(name: &str) -> Attr {
        Attr {
            name: name.to_lowercase(),
            values: vec![],
        }
    }

    pub fn add_value(mut self, value: &[u8]) -> Attr {
        self.values.push(value.to_vec());
        self
    }

    fn value_set(&self) -> BTreeSet<&[u8]> {
        self.values.iter().map(|v| v.as_slice()).collect()
    }
}

/// Entry type, the logical directory object.
#[derive(Clone, Debug, Cborize)]
pub struct Entry {
    pub dn: String,
    pub attrs: Vec<Attr>,
}

impl Entry {
    const ID: u32 = ENTRY_VER;
}

impl fmt::Display for Entry {
    fn fmt(&self, f: &mut fmt::Formatter) -> result::Result<(), fmt::Error> {
        write!(f, "entry<{}>", self.dn)
    }
}

// Equality is order-independent on attributes and values, entries decoded
// from the store may not preserve insertion order.
impl PartialEq for Entry {
    fn eq(&self, other: &Entry) -> bool {
        let dn_eq = match (Dn::parse(&self.dn), Dn::parse(&other.dn)) {
            (Ok(a), Ok(b)) => a == b,
            _ => self.dn == other.dn,
        };
        if !dn_eq || self.attrs.len() != other.attrs.len() {
            return false;
        }
        self.attrs.iter().all(|a| {
            other
                .attrs
                .iter()
                .any(|b| a.name == b.name && a.value_set() == b.value_set())
        })
    }
}

impl Eq for Entry {}

impl Entry {
    pub fn new(dn: &Dn) -> Entry {
        Entry {
            dn: dn.as_norm().to_string(),
            attrs: vec![],
        }
    }

    /// Parse this entry's DN.
    pub fn to_dn(&self) -> Result<Dn> {
        Dn::parse(&self.dn)
    }

    pub fn set_attr(mut self, attr: Attr) -> Entry {
        match self.attrs.iter_mut().find(|a| a.name == attr.name) {
            Some(a) => *a = attr,
            None => self.attrs.push(attr),
        }
        self
    }

    /// Convenience, set a single string-valued attribute.
    pub fn set_str(self, name: &str, value: &str) -> Entry {
        self.set_attr(Attr::new(name).add_value(value.as_bytes()))
    }

    pub fn attr(&self, name: &str) -> Option<&Attr> {
        let name = name.to_lowercase();
        self.attrs.iter().find(|a| a.name == name)
    }

    pub fn has_attr(&self, name: &str) -> bool {
        self.attr(name).is_some()
    }

    /// Apply a modification list and return the new entry. The original is
    /// untouched, index maintenance diffs the old/new pair.
    pub fn apply_mods(&self, mods: &[Modification]) -> Result<Entry> {
        let mut entry = self.clone();
        for m in mods.iter() {
            let name = m.attr.to_lowercase();
            match m.mtype {
                ModType::Add => {
                    let attr = match entry.attrs.iter_mut().find(|a| a.name == name) {
                        Some(attr) => attr,
                        None => {
                            entry.attrs.push(Attr::new(&name));
                            entry.attrs.last_mut().unwrap()
                        }
                    };
                    for v in m.values.iter() {
                        if !attr.values.contains(v) {
                            attr.values.push(v.clone());
                        }
                    }
                }
                ModType::Delete if m.values.is_empty() => {
                    entry.attrs.retain(|a| a.name != name);
                }
                ModType::Delete => {
                    if let Some(attr) = entry.attrs.iter_mut().find(|a| a.name == name) {
                        attr.values.retain(|v| !m.values.contains(v));
                    }
                    entry.attrs.retain(|a| a.name != name || !a.values.is_empty());
                }
                ModType::Replace if m.values.is_empty() => {
                    entry.attrs.retain(|a| a.name != name);
                }
                ModType::Replace => {
                    entry.attrs.retain(|a| a.name != name);
                    entry.attrs.push(Attr {
                        name: name.clone(),
                        values: m.values.clone(),
                    });
                }
            }
        }
        Ok(entry)
    }

    /// Return a copy of this entry relocated under `new_dn`, used by the
    /// rename path. Attribute values are carried over unchanged, callers
    /// wanting RDN attribute maintenance supply a modification list.
    pub fn with_dn(&self, new_dn: &Dn) -> Entry {
        let mut entry = self.clone();
        entry.dn = new_dn.as_norm().to_string();
        entry
    }
}

/// Modification semantics over a single attribute.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ModType {
    Add,
    Delete,
    Replace,
}

/// One element of a modify operation's modification list.
#[derive(Clone, Debug)]
pub struct Modification {
    pub mtype: ModType,
    pub attr: String,
    pub values: Vec<Vec<u8>>,
}

impl Modification {
    pub fn new(mtype: ModType, attr: &str, values: Vec<Vec<u8>>) -> Modification {
        Modification {
            mtype,
            attr: attr.to_string(),
            values,
        }
    }

    pub fn replace_str(attr: &str, values: &[&str]) -> Modification {
        Modification::new(
            ModType::Replace,
            attr,
            values.iter().map(|v| v.as_bytes().to_vec()).collect(),
        )
    }
}

#[cfg(test)]
#[path = "entry_test.rs"]
mod entry_test;
