//! Module `ldif` implement reading and writing the LDIF interchange
//! format, the import source and export target.
//!
//! The reader is line oriented and tolerant, a malformed record is
//! returned as an error item and the reader resynchronizes on the next
//! blank line, one bad record never aborts a bulk import.

use base64::{engine::general_purpose::STANDARD as B64, Engine};

use std::io::{self, BufRead, Write};

use crate::{
    entry::{Attr, Entry},
    Error, Result,
};

/// Fold emitted lines at this width, continuation lines get a leading
/// space per the format.
const FOLD_WIDTH: usize = 76;

/// Streaming LDIF reader over any buffered source.
///
/// Iterate to obtain entries. Each item is a `Result`, errors carry the
/// line number of the offending record.
pub struct LdifReader<R> {
    source: io::Lines<R>,
    lineno: usize,
    done: bool,
}

impl<R: BufRead> LdifReader<R> {
    pub fn new(source: R) -> LdifReader<R> {
        LdifReader {
            source: source.lines(),
            lineno: 0,
            done: false,
        }
    }

    fn next_line(&mut self) -> Result<Option<String>> {
        match self.source.next() {
            Some(Ok(line)) => {
                self.lineno += 1;
                Ok(Some(line))
            }
            Some(Err(err)) => err_at!(IOError, Err(err), "ldif line {}", self.lineno + 1),
            None => Ok(None),
        }
    }

    // logical lines of the next record, continuations unfolded, comments
    // dropped. None at end of input.
    fn next_record(&mut self) -> Result<Option<Vec<String>>> {
        let mut lines: Vec<String> = vec![];

        loop {
            let line = match self.next_line()? {
                Some(line) => line,
                None if lines.is_empty() => return Ok(None),
                None => return Ok(Some(lines)),
            };

            if line.is_empty() {
                if lines.is_empty() {
                    continue; // leading blank lines
                }
                return Ok(Some(lines));
            } else if let Some(cont) = line.strip_prefix(' ') {
                // continuation of the previous logical line
                match lines.last_mut() {
                    Some(last) => last.push_str(cont),
                    None => {
                        let lineno = self.lineno;
                        self.skip_record()?;
                        return err_at!(
                            InvalidFile, msg: "line {}: continuation without a line", lineno
                        );
                    }
                }
            } else if line.starts_with('#') {
                continue;
            } else if lines.is_empty() && line.to_lowercase().starts_with("version:") {
                continue;
            } else {
                lines.push(line);
            }
        }
    }

    // drain the rest of a bad record, up to the blank separator, so one
    // malformed record never poisons the records after it.
    fn skip_record(&mut self) -> Result<()> {
        while let Some(line) = self.next_line()? {
            if line.is_empty() {
                break;
            }
        }
        Ok(())
    }

    fn parse_record(&self, lines: Vec<String>) -> Result<Entry> {
        let mut attrs: Vec<Attr> = vec![];
        let mut dn: Option<String> = None;

        for line in lines.into_iter() {
            let (name, value) = parse_attr_line(&line)
                .ok_or_else(|| {
                    let prefix = format!("{}:{}", file!(), line!());
                    Error::InvalidFile(prefix, format!("near line {}: {:?}", self.lineno, line))
                })?;

            if name == "dn" {
                if dn.is_some() {
                    return err_at!(InvalidFile, msg: "near line {}: second dn", self.lineno);
                }
                let text = err_at!(FailConvert, String::from_utf8(value))?;
                dn = Some(text);
            } else {
                match attrs.iter_mut().find(|a| a.name == name) {
                    Some(attr) => attr.values.push(value),
                    None => attrs.push(Attr {
                        name,
                        values: vec![value],
                    }),
                }
            }
        }

        let dn = match dn {
            Some(dn) => dn,
            None => {
                return err_at!(InvalidFile, msg: "near line {}: record without dn", self.lineno)
            }
        };
        let entry = Entry {
            dn: dn.parse::<crate::dn::Dn>()?.as_norm().to_string(),
            attrs,
        };
        Ok(entry)
    }
}

impl<R: BufRead> Iterator for LdifReader<R> {
    type Item = Result<Entry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.next_record() {
            Ok(Some(lines)) => Some(self.parse_record(lines)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(err) => {
                // only an io failure terminates the stream
                if let Error::IOError(_, _) = err {
                    self.done = true;
                }
                Some(Err(err))
            }
        }
    }
}

// `attr: value`, `attr:: base64-value`, or `attr:` for an empty value.
fn parse_attr_line(line: &str) -> Option<(String, Vec<u8>)> {
    let colon = line.find(':')?;
    let name = line[..colon].trim().to_lowercase();
    if name.is_empty() {
        return None;
    }
    let rest = &line[colon + 1..];
    if let Some(b64_text) = rest.strip_prefix(':') {
        let value = B64.decode(b64_text.trim()).ok()?;
        Some((name, value))
    } else {
        Some((name, rest.trim_start().as_bytes().to_vec()))
    }
}

/// Streaming LDIF writer, the export path.
pub struct LdifWriter<W> {
    sink: W,
    entries: usize,
}

impl<W: Write> LdifWriter<W> {
    pub fn new(sink: W) -> LdifWriter<W> {
        LdifWriter { sink, entries: 0 }
    }

    /// Emit one entry followed by the blank record separator.
    pub fn write_entry(&mut self, entry: &Entry) -> Result<()> {
        self.write_attr_line("dn", entry.dn.as_bytes())?;
        for attr in entry.attrs.iter() {
            for value in attr.values.iter() {
                self.write_attr_line(&attr.name, value)?;
            }
        }
        err_at!(IOError, self.sink.write_all(b"\n"))?;
        self.entries += 1;
        Ok(())
    }

    /// Number of entries written so far.
    pub fn to_entries(&self) -> usize {
        self.entries
    }

    pub fn flush(&mut self) -> Result<()> {
        err_at!(IOError, self.sink.flush())
    }

    fn write_attr_line(&mut self, name: &str, value: &[u8]) -> Result<()> {
        let line = match needs_base64(value) {
            true => format!("{}:: {}", name, B64.encode(value)),
            false => {
                // safe by the needs_base64 check
                let text = String::from_utf8_lossy(value);
                format!("{}: {}", name, text)
            }
        };
        for folded in fold_line(&line).into_iter() {
            err_at!(IOError, self.sink.write_all(folded.as_bytes()))?;
            err_at!(IOError, self.sink.write_all(b"\n"))?;
        }
        Ok(())
    }
}

// values with leading/trailing space, a leading ':' or '<', or any byte
// outside printable ascii go out base64 encoded.
fn needs_base64(value: &[u8]) -> bool {
    if value.is_empty() {
        return false;
    }
    match (value.first(), value.last()) {
        (Some(b' '), _) | (Some(b':'), _) | (Some(b'<'), _) | (_, Some(b' ')) => return true,
        _ => (),
    }
    value.iter().any(|&b| !(0x20..0x7f).contains(&b))
}

// fold a logical line at FOLD_WIDTH, continuations lead with one space.
fn fold_line(line: &str) -> Vec<String> {
    if line.len() <= FOLD_WIDTH {
        return vec![line.to_string()];
    }
    let mut out = vec![];
    let bytes = line.as_bytes();
    let mut off = 0_usize;
    while off < bytes.len() {
        let (width, prefix) = match off {
            0 => (FOLD_WIDTH, ""),
            _ => (FOLD_WIDTH - 1, " "),
        };
        let end = (off + width).min(bytes.len());
        // folding is ascii-safe, base64 and printable ascii only
        out.push(format!("{}{}", prefix, String::from_utf8_lossy(&bytes[off..end])));
        off = end;
    }
    out
}

#[cfg(test)]
#[path = "ldif_test.rs"]
mod ldif_test;
