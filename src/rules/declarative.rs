//! Built-in rule engine evaluating TOML rule definitions
//!
//! A definition is an ordered list of actions over the session bindings.
//! Fields of a bound [`Record`] are addressed as `Binding.Field`; a bare
//! `Binding` addresses the bound value itself.
//!
//! ```toml
//! description = "Stamp the filing record"
//!
//! [[actions]]
//! set = "TestObject.MyValue"
//! value = 5
//!
//! [[actions]]
//! increment = "Counters.Checked"
//!
//! [[actions]]
//! require = "Filing.Ticker"
//! equals = "adp"
//! message = "unexpected ticker"
//! ```
//!
//! The first failing `require`, or an action that cannot be applied to the
//! bound values, ends the run with a failed evaluation. A file that cannot be
//! read or parsed is a [`RuleError::Definition`].

use super::context::{ContextValue, Record};
use super::engine::{RuleEngine, RuleEvaluation, RuleSession};
use super::RuleError;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

#[derive(Debug, Deserialize)]
struct RuleDefinition {
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    actions: Vec<Action>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Action {
    Set {
        set: String,
        value: toml::Value,
    },
    Increment {
        increment: String,
        #[serde(default = "default_increment")]
        by: i64,
    },
    Require {
        require: String,
        #[serde(default)]
        equals: Option<toml::Value>,
        #[serde(default)]
        message: Option<String>,
    },
}

fn default_increment() -> i64 {
    1
}

/// Engine for `*.toml` rule definitions
#[derive(Debug, Default, Clone)]
pub struct DeclarativeRuleEngine;

impl DeclarativeRuleEngine {
    pub fn new() -> Self {
        Self
    }
}

impl RuleEngine for DeclarativeRuleEngine {
    fn open_session(&self) -> Box<dyn RuleSession> {
        Box::new(DeclarativeSession::default())
    }
}

#[derive(Debug, Default)]
struct DeclarativeSession {
    bindings: BTreeMap<String, ContextValue>,
}

/// Address of a value inside the session
enum Target<'a> {
    Binding(&'a str),
    Field { record: Record, field: &'a str },
}

impl RuleSession for DeclarativeSession {
    fn bind(&mut self, name: &str, value: ContextValue) {
        self.bindings.insert(name.to_string(), value);
    }

    fn run(
        &mut self,
        rule_file: &Path,
        on_result: &mut dyn FnMut(RuleEvaluation),
    ) -> Result<(), RuleError> {
        let definition = load_definition(rule_file)?;
        let mut messages = Vec::new();
        if let Some(description) = &definition.description {
            messages.push(description.clone());
        }

        for action in &definition.actions {
            if let Err(reason) = self.apply(action, &mut messages) {
                on_result(RuleEvaluation::failed(reason, messages));
                return Ok(());
            }
        }

        on_result(RuleEvaluation::passed(messages));
        Ok(())
    }
}

impl DeclarativeSession {
    fn apply(&mut self, action: &Action, messages: &mut Vec<String>) -> Result<(), String> {
        match action {
            Action::Set { set, value } => {
                let value = convert_value(value)?;
                messages.push(format!("{set} = {value}"));
                match self.resolve(set)? {
                    Target::Binding(name) => {
                        self.bindings.insert(name.to_string(), value);
                    }
                    Target::Field { record, field } => record.set(field, value),
                }
                Ok(())
            }
            Action::Increment { increment, by } => {
                let current = match self.lookup(increment)? {
                    None => 0,
                    Some(ContextValue::Integer(current)) => current,
                    Some(other) => {
                        return Err(format!(
                            "cannot increment {increment}: value is {}",
                            other.kind()
                        ))
                    }
                };
                let updated = current
                    .checked_add(*by)
                    .ok_or_else(|| format!("{increment} overflowed"))?;
                match self.resolve(increment)? {
                    Target::Binding(name) => {
                        self.bindings
                            .insert(name.to_string(), ContextValue::Integer(updated));
                    }
                    Target::Field { record, field } => record.set(field, updated),
                }
                Ok(())
            }
            Action::Require {
                require,
                equals,
                message,
            } => {
                let failure = |default: String| message.clone().unwrap_or(default);
                let actual = self
                    .lookup(require)?
                    .ok_or_else(|| failure(format!("{require} is not set")))?;
                if let Some(expected) = equals {
                    let expected = convert_value(expected)?;
                    if !values_match(&actual, &expected) {
                        return Err(failure(format!(
                            "{require} is {actual}, expected {expected}"
                        )));
                    }
                }
                Ok(())
            }
        }
    }

    fn resolve<'a>(&self, path: &'a str) -> Result<Target<'a>, String> {
        match path.split_once('.') {
            None => Ok(Target::Binding(path)),
            Some((binding, field)) => {
                let record = match self.bindings.get(binding) {
                    Some(ContextValue::Record(record)) => record.clone(),
                    Some(other) => {
                        return Err(format!("{binding} is {}, not a record", other.kind()))
                    }
                    None => return Err(format!("no context object named {binding}")),
                };
                Ok(Target::Field { record, field })
            }
        }
    }

    fn lookup(&self, path: &str) -> Result<Option<ContextValue>, String> {
        Ok(match self.resolve(path)? {
            Target::Binding(name) => self.bindings.get(name).cloned(),
            Target::Field { record, field } => record.get(field),
        })
    }
}

fn load_definition(rule_file: &Path) -> Result<RuleDefinition, RuleError> {
    let content = fs::read_to_string(rule_file).map_err(|e| RuleError::Definition {
        path: rule_file.to_path_buf(),
        message: e.to_string(),
    })?;
    toml::from_str(&content).map_err(|e| RuleError::Definition {
        path: rule_file.to_path_buf(),
        message: e.to_string(),
    })
}

fn convert_value(value: &toml::Value) -> Result<ContextValue, String> {
    match value {
        toml::Value::Integer(value) => Ok(ContextValue::Integer(*value)),
        toml::Value::String(value) => Ok(ContextValue::Text(value.clone())),
        toml::Value::Boolean(value) => Ok(ContextValue::Flag(*value)),
        other => Err(format!("unsupported value type {}", other.type_str())),
    }
}

// Paths compare against text by their display form.
fn values_match(actual: &ContextValue, expected: &ContextValue) -> bool {
    match (actual, expected) {
        (ContextValue::Path(path), ContextValue::Text(text)) => {
            path.to_string_lossy() == text.as_str()
        }
        _ => actual == expected,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use crate::rules::RuleOutcome;
    use tempfile::TempDir;

    fn write_rule(dir: &TempDir, name: &str, body: &str) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, body).unwrap();
        path
    }

    fn run(session: &mut Box<dyn RuleSession>, path: &Path) -> Vec<RuleEvaluation> {
        let mut results = Vec::new();
        session
            .run(path, &mut |evaluation| results.push(evaluation))
            .unwrap();
        results
    }

    #[test]
    fn test_set_value_writes_record_field() {
        let dir = TempDir::new().unwrap();
        let path = write_rule(
            &dir,
            "SetValue.toml",
            "[[actions]]\nset = \"TestObject.MyValue\"\nvalue = 5\n",
        );
        let record = Record::new();
        let mut session = DeclarativeRuleEngine::new().open_session();
        session.bind("TestObject", ContextValue::Record(record.clone()));

        let results = run(&mut session, &path);

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].outcome, RuleOutcome::Passed);
        assert_eq!(record.get("MyValue"), Some(ContextValue::Integer(5)));
    }

    #[test]
    fn test_increment_defaults_missing_field_to_zero() {
        let dir = TempDir::new().unwrap();
        let path = write_rule(
            &dir,
            "Count.toml",
            "[[actions]]\nincrement = \"Counters.Seen\"\n\n[[actions]]\nincrement = \"Counters.Seen\"\nby = 2\n",
        );
        let counters = Record::new();
        let mut session = DeclarativeRuleEngine::new().open_session();
        session.bind("Counters", counters.clone().into());

        run(&mut session, &path);

        assert_eq!(counters.get("Seen"), Some(ContextValue::Integer(3)));
    }

    #[test]
    fn test_require_failure_stops_run() {
        let dir = TempDir::new().unwrap();
        let path = write_rule(
            &dir,
            "Ticker.toml",
            r#"
[[actions]]
require = "Filing.Ticker"
equals = "ibm"
message = "unexpected ticker"

[[actions]]
set = "Filing.Checked"
value = true
"#,
        );
        let filing = Record::new().with_field("Ticker", "adp");
        let mut session = DeclarativeRuleEngine::new().open_session();
        session.bind("Filing", filing.clone().into());

        let results = run(&mut session, &path);

        assert_eq!(results.len(), 1);
        assert_eq!(
            results[0].outcome,
            RuleOutcome::Failed {
                reason: "unexpected ticker".to_string()
            }
        );
        assert_eq!(filing.get("Checked"), None);
    }

    #[test]
    fn test_require_on_bare_binding() {
        let dir = TempDir::new().unwrap();
        let path = write_rule(&dir, "Market.toml", "[[actions]]\nrequire = \"MarketId\"\nequals = 7\n");

        let mut session = DeclarativeRuleEngine::new().open_session();
        session.bind("MarketId", 7i64.into());
        assert_eq!(run(&mut session, &path)[0].outcome, RuleOutcome::Passed);

        let mut unbound = DeclarativeRuleEngine::new().open_session();
        let results = run(&mut unbound, &path);
        assert!(matches!(
            &results[0].outcome,
            RuleOutcome::Failed { reason } if reason.contains("not set")
        ));
    }

    #[test]
    fn test_type_mismatch_is_a_failed_evaluation() {
        let dir = TempDir::new().unwrap();
        let path = write_rule(&dir, "Bad.toml", "[[actions]]\nset = \"MarketId.Field\"\nvalue = 1\n");
        let mut session = DeclarativeRuleEngine::new().open_session();
        session.bind("MarketId", 7i64.into());

        let results = run(&mut session, &path);
        assert!(matches!(
            &results[0].outcome,
            RuleOutcome::Failed { reason } if reason.contains("not a record")
        ));
    }

    #[test]
    fn test_unparseable_definition_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = write_rule(&dir, "Broken.toml", "actions = [[[");
        let mut session = DeclarativeRuleEngine::new().open_session();

        let err = session.run(&path, &mut |_| {}).unwrap_err();
        assert!(matches!(err, RuleError::Definition { .. }));
    }

    #[test]
    fn test_path_binding_matches_text() {
        let dir = TempDir::new().unwrap();
        let path = write_rule(
            &dir,
            "Path.toml",
            "[[actions]]\nrequire = \"Instance\"\nequals = \"/data/adp.xml\"\n",
        );
        let mut session = DeclarativeRuleEngine::new().open_session();
        session.bind("Instance", PathBuf::from("/data/adp.xml").into());
        assert_eq!(run(&mut session, &path)[0].outcome, RuleOutcome::Passed);
    }
}
