//! Tree-shaped decode errors.
//!
//! A node holds the messages for its own location and one child per
//! field alias or index below it. Empty nodes are never materialized:
//! every constructor that could produce one drops it instead.
use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ErrorKey {
    Index(usize),
    Field(String),
}

impl fmt::Display for ErrorKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKey::Index(i) => write!(f, "{i}"),
            ErrorKey::Field(s) => f.write_str(s),
        }
    }
}

impl From<usize> for ErrorKey {
    fn from(i: usize) -> Self { ErrorKey::Index(i) }
}
impl From<&str> for ErrorKey {
    fn from(s: &str) -> Self { ErrorKey::Field(s.to_string()) }
}
impl From<String> for ErrorKey {
    fn from(s: String) -> Self { ErrorKey::Field(s) }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationError {
    pub messages: Vec<String>,
    pub children: IndexMap<ErrorKey, ValidationError>,
}

/// One flattened error: the path from the root and the message found there.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalizedError {
    pub loc: Vec<ErrorKey>,
    pub msg: String,
}

impl ValidationError {
    pub fn leaf<I, S>(messages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { messages: messages.into_iter().map(Into::into).collect(), children: IndexMap::new() }
    }

    pub fn message(msg: impl Into<String>) -> Self {
        Self::leaf([msg])
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty() && self.children.values().all(ValidationError::is_empty)
    }

    /// Attach `child` under `key`, combining with whatever is already there.
    /// An empty child is dropped.
    pub fn with_child(mut self, key: impl Into<ErrorKey>, child: ValidationError) -> Self {
        self.insert_child(key.into(), child);
        self
    }

    pub fn insert_child(&mut self, key: ErrorKey, child: ValidationError) {
        if child.is_empty() {
            return;
        }
        match self.children.shift_remove(&key) {
            Some(existing) => {
                self.children.insert(key, existing.merge(child));
            }
            None => {
                self.children.insert(key, child);
            }
        }
    }

    /// Messages concatenated, children merged key by key.
    pub fn merge(mut self, other: ValidationError) -> Self {
        self.messages.extend(other.messages);
        for (key, child) in other.children {
            self.insert_child(key, child);
        }
        self
    }

    /// `merge` lifted over absence.
    pub fn combine(a: Option<Self>, b: Option<Self>) -> Option<Self> {
        match (a, b) {
            (None, None) => None,
            (Some(x), None) | (None, Some(x)) => Some(x).filter(|x| !x.is_empty()),
            (Some(x), Some(y)) => Some(x.merge(y)).filter(|x| !x.is_empty()),
        }
    }

    /// Depth-first `(path, message)` pairs; own messages before children.
    pub fn flat(&self) -> Vec<LocalizedError> {
        let mut out = Vec::new();
        let mut path = Vec::new();
        self.flat_into(&mut path, &mut out);
        out
    }

    fn flat_into(&self, path: &mut Vec<ErrorKey>, out: &mut Vec<LocalizedError>) {
        for msg in &self.messages {
            out.push(LocalizedError { loc: path.clone(), msg: msg.clone() });
        }
        for (key, child) in &self.children {
            path.push(key.clone());
            child.flat_into(path, out);
            path.pop();
        }
    }

    /// Rebuild a tree from flattened records. `None` when there are none.
    pub fn from_flat<I>(errors: I) -> Option<Self>
    where
        I: IntoIterator<Item = LocalizedError>,
    {
        let mut root = ValidationError::default();
        for LocalizedError { loc, msg } in errors {
            let mut node = &mut root;
            for key in loc {
                node = node.children.entry(key).or_default();
            }
            node.messages.push(msg);
        }
        Some(root).filter(|r| !r.is_empty())
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, e) in self.flat().iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            if e.loc.is_empty() {
                write!(f, "{}", e.msg)?;
            } else {
                let loc = e.loc.iter().map(ToString::to_string).collect::<Vec<_>>().join(".");
                write!(f, "{loc}: {}", e.msg)?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}
