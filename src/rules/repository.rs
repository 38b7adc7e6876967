//! File-backed named rule sets
//!
//! A repository owns an ordered list of [`Rule`]s keyed by friendly name. The
//! list is either read from the persisted `<name>.rul` manifest or
//! synthesized by scanning the source directory for rule definitions. Loads
//! build the new list completely before replacing the current one, so a
//! failed load leaves the repository unchanged.

use super::context::RuleContext;
use super::engine::{RuleEngine, RuleEvaluation, RuleExecutionResult};
use super::rule::{is_rule_definition, manifest_path, Rule};
use super::RuleError;
use crate::observability::{LogCategory, Logger};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

/// Named rule set bound to a source directory and an evaluation engine
pub struct RulesRepository {
    name: String,
    source_directory: PathBuf,
    rules: Vec<Rule>,
    index: HashMap<String, usize>,
    engine: Arc<dyn RuleEngine>,
    log: Logger,
}

impl std::fmt::Debug for RulesRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RulesRepository")
            .field("name", &self.name)
            .field("source_directory", &self.source_directory)
            .field("rules", &self.rules)
            .finish()
    }
}

impl RulesRepository {
    pub fn new(
        name: impl Into<String>,
        source_directory: impl Into<PathBuf>,
        engine: Arc<dyn RuleEngine>,
        log: Logger,
    ) -> Self {
        Self {
            name: name.into(),
            source_directory: source_directory.into(),
            rules: Vec::new(),
            index: HashMap::new(),
            engine,
            log,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source_directory(&self) -> &Path {
        &self.source_directory
    }

    pub fn manifest_path(&self) -> PathBuf {
        manifest_path(&self.source_directory, &self.name)
    }

    /// Load the persisted manifest, returning the number of rules loaded
    pub fn try_load_existing_rules_list(&mut self) -> Result<usize, RuleError> {
        self.ensure_directory()?;
        let path = self.manifest_path();
        if !path.is_file() {
            return Err(RuleError::ManifestNotFound(path));
        }

        let content = fs::read_to_string(&path)?;
        let rules: Vec<Rule> =
            serde_json::from_str(&content).map_err(|e| RuleError::ManifestParse {
                path: path.clone(),
                message: e.to_string(),
            })?;

        let count = self.replace_rules(rules)?;
        self.log.info(
            LogCategory::RuleExecution,
            format!("Loaded {count} rules for '{}' from {}", self.name, path.display()),
        );
        Ok(count)
    }

    /// Synthesize the rule list from the definition files in the source
    /// directory, in file-name order. Every synthesized rule is enabled and
    /// required.
    pub fn try_load_new_rules_list(&mut self) -> Result<usize, RuleError> {
        self.ensure_directory()?;

        let mut definitions = Vec::new();
        for entry in fs::read_dir(&self.source_directory)? {
            let path = entry?.path();
            if path.is_file() && is_rule_definition(&path) {
                definitions.push(path);
            }
        }
        definitions.sort();

        let rules = definitions
            .iter()
            .filter_map(|path| Rule::from_definition_file(path))
            .collect();

        let count = self.replace_rules(rules)?;
        self.log.info(
            LogCategory::RuleExecution,
            format!(
                "Scanned {count} rule definitions for '{}' in {}",
                self.name,
                self.source_directory.display()
            ),
        );
        Ok(count)
    }

    /// Persist the current list to `<name>.rul`, replacing any previous
    /// manifest
    pub fn try_save_rules_list(&self) -> Result<PathBuf, RuleError> {
        self.ensure_directory()?;
        let path = self.manifest_path();
        let write_error = |message: String| RuleError::ManifestWrite {
            path: path.clone(),
            message,
        };

        let content =
            serde_json::to_string_pretty(&self.rules).map_err(|e| write_error(e.to_string()))?;

        // Write beside the target and rename so readers never see a partial file
        let staging = path.with_extension(format!("{}.tmp", super::MANIFEST_EXTENSION));
        fs::write(&staging, content).map_err(|e| write_error(e.to_string()))?;
        fs::rename(&staging, &path).map_err(|e| write_error(e.to_string()))?;

        self.log.info(
            LogCategory::RuleExecution,
            format!("Saved {} rules to {}", self.rules.len(), path.display()),
        );
        Ok(path)
    }

    /// False for unknown names
    pub fn is_rule_enabled(&self, name: &str) -> bool {
        self.get(name).is_some_and(|rule| rule.enabled)
    }

    /// Execute one rule in a fresh engine session with `context` bound by
    /// name.
    ///
    /// The enabled flag is not consulted here; callers skip disabled rules
    /// through [`RulesRepository::is_rule_enabled`].
    pub fn process_rule(
        &self,
        name: &str,
        context: &RuleContext,
    ) -> Result<RuleExecutionResult, RuleError> {
        let rule = self
            .get(name)
            .ok_or_else(|| RuleError::UnknownRule(name.to_string()))?;
        let rule_file = rule.definition_path(&self.source_directory);

        let started = Instant::now();
        let mut session = self.engine.open_session();
        for (binding, value) in context.iter() {
            session.bind(binding, value.clone());
        }

        let mut captured: Option<RuleEvaluation> = None;
        session.run(&rule_file, &mut |evaluation| {
            // Only the first reported evaluation counts
            if captured.is_none() {
                captured = Some(evaluation);
            }
        })?;

        let evaluation = captured.ok_or_else(|| RuleError::NoResult(name.to_string()))?;
        let result = RuleExecutionResult {
            rule_name: rule.friendly_name.clone(),
            outcome: evaluation.outcome,
            messages: evaluation.messages,
            duration_ms: started.elapsed().as_millis() as u64,
        };

        self.log.debug(
            LogCategory::RuleExecution,
            format!(
                "Rule '{}' {} in {}ms",
                result.rule_name,
                if result.is_success() { "passed" } else { "failed" },
                result.duration_ms
            ),
        );
        Ok(result)
    }

    /// Rules in manifest order
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn get(&self, name: &str) -> Option<&Rule> {
        self.index.get(name).map(|&position| &self.rules[position])
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Returns false for unknown names
    pub fn set_enabled(&mut self, name: &str, enabled: bool) -> bool {
        self.update(name, |rule| rule.enabled = enabled)
    }

    /// Returns false for unknown names
    pub fn set_required(&mut self, name: &str, required: bool) -> bool {
        self.update(name, |rule| rule.is_required = required)
    }

    fn update(&mut self, name: &str, change: impl FnOnce(&mut Rule)) -> bool {
        match self.index.get(name) {
            Some(&position) => {
                change(&mut self.rules[position]);
                true
            }
            None => false,
        }
    }

    fn ensure_directory(&self) -> Result<(), RuleError> {
        if self.source_directory.is_dir() {
            Ok(())
        } else {
            Err(RuleError::DirectoryNotFound(self.source_directory.clone()))
        }
    }

    fn replace_rules(&mut self, rules: Vec<Rule>) -> Result<usize, RuleError> {
        let mut index = HashMap::with_capacity(rules.len());
        for (position, rule) in rules.iter().enumerate() {
            if index.insert(rule.friendly_name.clone(), position).is_some() {
                return Err(RuleError::DuplicateRule(rule.friendly_name.clone()));
            }
        }
        self.rules = rules;
        self.index = index;
        Ok(self.rules.len())
    }
}
