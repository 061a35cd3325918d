//! Run properties: an ordered (depth, key, value) list gathered while a
//! phase executes, dumped as XML into the storage and printed at high
//! verbosity.

use std::fmt::Write as _;

#[derive(Debug, Clone, Default)]
pub struct Properties {
    entries: Vec<(usize, String, String)>,
}

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry at `depth`; depth 0 entries are section headers.
    pub fn add(&mut self, depth: usize, key: impl Into<String>, value: impl ToString) {
        self.entries
            .push((depth, sanitize(&key.into()), value.to_string()));
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(_, k, _)| k == key)
            .map(|(_, _, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &str, &str)> {
        self.entries
            .iter()
            .map(|(d, k, v)| (*d, k.as_str(), v.as_str()))
    }

    /// Nested XML rendering; an entry encloses the deeper entries that
    /// follow it.
    pub fn to_xml(&self) -> String {
        let mut out = String::from("<properties>");
        let mut stack: Vec<&str> = Vec::new();
        for (depth, key, value) in self.iter() {
            while stack.len() > depth {
                let closed = stack.pop().expect("non-empty stack");
                let _ = write!(out, "</{closed}>");
            }
            let _ = write!(out, "<{key}>{}", escape(value));
            stack.push(key);
        }
        while let Some(closed) = stack.pop() {
            let _ = write!(out, "</{closed}>");
        }
        out.push_str("</properties>");
        out
    }

    /// Indented plain-text rendering for verbose terminal output.
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        for (depth, key, value) in self.iter() {
            let _ = writeln!(out, "{}{:<24} {}", "    ".repeat(depth), key, value);
        }
        out
    }
}

fn sanitize(key: &str) -> String {
    key.chars()
        .map(|c| if c.is_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

fn escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}
