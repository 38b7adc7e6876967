//! Values bound into a rule session
//!
//! Context objects are a closed set of variants so the bindable shapes are
//! known statically. [`Record`] is a shared, mutable field map: a rule that
//! writes to a record is observed by the caller holding the same handle.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// A value that can be bound into a rule session by name
#[derive(Debug, Clone, PartialEq)]
pub enum ContextValue {
    Integer(i64),
    Text(String),
    Flag(bool),
    Path(PathBuf),
    Record(Record),
}

impl ContextValue {
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            ContextValue::Integer(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ContextValue::Text(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_record(&self) -> Option<&Record> {
        match self {
            ContextValue::Record(record) => Some(record),
            _ => None,
        }
    }

    /// Short name of the variant, used in evaluation messages
    pub fn kind(&self) -> &'static str {
        match self {
            ContextValue::Integer(_) => "integer",
            ContextValue::Text(_) => "text",
            ContextValue::Flag(_) => "flag",
            ContextValue::Path(_) => "path",
            ContextValue::Record(_) => "record",
        }
    }
}

impl fmt::Display for ContextValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContextValue::Integer(value) => write!(f, "{value}"),
            ContextValue::Text(value) => write!(f, "{value}"),
            ContextValue::Flag(value) => write!(f, "{value}"),
            ContextValue::Path(value) => write!(f, "{}", value.display()),
            ContextValue::Record(record) => write!(f, "record({} fields)", record.len()),
        }
    }
}

impl From<i64> for ContextValue {
    fn from(value: i64) -> Self {
        ContextValue::Integer(value)
    }
}

impl From<&str> for ContextValue {
    fn from(value: &str) -> Self {
        ContextValue::Text(value.to_string())
    }
}

impl From<String> for ContextValue {
    fn from(value: String) -> Self {
        ContextValue::Text(value)
    }
}

impl From<bool> for ContextValue {
    fn from(value: bool) -> Self {
        ContextValue::Flag(value)
    }
}

impl From<PathBuf> for ContextValue {
    fn from(value: PathBuf) -> Self {
        ContextValue::Path(value)
    }
}

impl From<Record> for ContextValue {
    fn from(value: Record) -> Self {
        ContextValue::Record(value)
    }
}

/// Shared mutable field map
#[derive(Clone, Default)]
pub struct Record {
    fields: Arc<Mutex<BTreeMap<String, ContextValue>>>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style field initialisation
    pub fn with_field(self, name: &str, value: impl Into<ContextValue>) -> Self {
        self.set(name, value);
        self
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, ContextValue>> {
        self.fields.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, name: &str) -> Option<ContextValue> {
        self.lock().get(name).cloned()
    }

    pub fn set(&self, name: &str, value: impl Into<ContextValue>) {
        self.lock().insert(name.to_string(), value.into());
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Copy of the current fields
    pub fn snapshot(&self) -> BTreeMap<String, ContextValue> {
        self.lock().clone()
    }

    pub fn same_record(&self, other: &Record) -> bool {
        Arc::ptr_eq(&self.fields, &other.fields)
    }
}

impl PartialEq for Record {
    fn eq(&self, other: &Self) -> bool {
        // Same handle compares equal without locking twice
        self.same_record(other) || self.snapshot() == other.snapshot()
    }
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.snapshot()).finish()
    }
}

/// Named context objects supplied to one rule execution
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuleContext {
    bindings: BTreeMap<String, ContextValue>,
}

impl RuleContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, value: impl Into<ContextValue>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: &str, value: impl Into<ContextValue>) {
        self.bindings.insert(name.to_string(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&ContextValue> {
        self.bindings.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ContextValue)> {
        self.bindings.iter()
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}
