//! Rule records and manifest file conventions

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Extension of the persisted rule manifest (`<repositoryName>.rul`)
pub const MANIFEST_EXTENSION: &str = "rul";

/// Extension of rule-definition files recognized by a directory scan
pub const RULE_DEFINITION_EXTENSION: &str = "toml";

/// One entry of a rule set
///
/// Execution context is supplied per call and is never stored on the rule.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    /// Unique key within the repository
    pub friendly_name: String,
    /// Rule-definition file, relative to the repository directory
    pub rule_file: String,
    /// A failing required rule aborts processing of the filing
    pub is_required: bool,
    pub enabled: bool,
}

impl Rule {
    /// Rule synthesized from a definition file: named after the file with its
    /// extension stripped, enabled and required
    pub fn from_definition_file(path: &Path) -> Option<Self> {
        let file_name = path.file_name()?.to_str()?.to_string();
        let friendly_name = path.file_stem()?.to_str()?.to_string();
        if friendly_name.is_empty() {
            return None;
        }
        Some(Self {
            friendly_name,
            rule_file: file_name,
            is_required: true,
            enabled: true,
        })
    }

    /// Resolve the definition file against the repository directory
    pub fn definition_path(&self, source_directory: &Path) -> PathBuf {
        source_directory.join(&self.rule_file)
    }
}

/// Manifest path for a repository name inside its directory
pub fn manifest_path(source_directory: &Path, repository_name: &str) -> PathBuf {
    source_directory.join(format!("{repository_name}.{MANIFEST_EXTENSION}"))
}

/// Whether a path looks like a rule-definition file
pub fn is_rule_definition(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case(RULE_DEFINITION_EXTENSION))
}
