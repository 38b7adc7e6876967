//! Filesystem fixtures for processor and rule tests

use crate::config::{FolderSection, ProcessorSection, RulesSection};
use crate::protocol::messages::MarketId;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Accession number of the sample filing used across tests
pub const SAMPLE_ACCESSION: &str = "0000008670-08-000046";

/// Instance document name of the sample filing
pub const SAMPLE_INSTANCE: &str = "adp-20080331.xml";

/// Create `<root>/<market_id>/<accession>/<instance>` plus a matching schema
/// and return the filing folder
pub fn write_filing(
    root: &Path,
    market_id: MarketId,
    accession: &str,
    instance: &str,
) -> io::Result<PathBuf> {
    let folder = root.join(market_id.to_string()).join(accession);
    fs::create_dir_all(&folder)?;
    fs::write(folder.join(instance), "<xbrl/>")?;
    let schema = Path::new(instance).with_extension("xsd");
    fs::write(folder.join(schema), "<schema/>")?;
    Ok(folder)
}

/// Write `<dir>/<name>.toml` holding `definition`
pub fn write_rule(dir: &Path, name: &str, definition: &str) -> io::Result<PathBuf> {
    let path = dir.join(format!("{name}.toml"));
    fs::write(&path, definition)?;
    Ok(path)
}

/// Processor section rooted in `root`, with every dependent folder created
pub fn processor_section(root: &Path, server_key: &str) -> io::Result<ProcessorSection> {
    let folders = FolderSection {
        intake: root.join("intake"),
        processing: root.join("processing"),
        reports: root.join("reports"),
    };
    let rules_directory = root.join("rules");
    for dir in [
        &folders.intake,
        &folders.processing,
        &folders.reports,
        &rules_directory,
    ] {
        fs::create_dir_all(dir)?;
    }

    Ok(ProcessorSection {
        server_key: server_key.to_string(),
        public_uri: "http://127.0.0.1:9100".to_string(),
        bind_address: ([127, 0, 0, 1], 0).into(),
        dispatcher_url: "http://127.0.0.1:9000".to_string(),
        pool_size: 4,
        poll_interval_secs: 1,
        request_timeout_ms: 2000,
        folders,
        rules: RulesSection {
            directory: rules_directory,
            name: "default".to_string(),
        },
        export: Default::default(),
        markets: Vec::new(),
        unregister_on_shutdown: true,
    })
}
