//! Folders a processor depends on

use crate::config::FolderSection;
use crate::error::{CoordinatorError, CoordinatorResult};
use crate::protocol::messages::MarketId;
use std::path::{Path, PathBuf};

/// Verified intake, processing and report roots
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependentFolders {
    pub intake: PathBuf,
    pub processing: PathBuf,
    pub reports: PathBuf,
}

impl DependentFolders {
    /// Verify every configured folder exists. A missing folder is fatal for
    /// processor start-up.
    pub fn try_get_dependent_folder_configuration(
        config: &FolderSection,
    ) -> CoordinatorResult<Self> {
        for (role, path) in [
            ("intake", &config.intake),
            ("processing", &config.processing),
            ("reports", &config.reports),
        ] {
            if !path.is_dir() {
                return Err(CoordinatorError::MissingFolder {
                    role: role.to_string(),
                    path: path.clone(),
                });
            }
        }

        Ok(Self {
            intake: config.intake.clone(),
            processing: config.processing.clone(),
            reports: config.reports.clone(),
        })
    }

    pub fn intake_for(&self, market_id: MarketId) -> PathBuf {
        market_folder(&self.intake, market_id)
    }

    pub fn processing_for(&self, market_id: MarketId) -> PathBuf {
        market_folder(&self.processing, market_id)
    }

    pub fn reports_for(&self, market_id: MarketId) -> PathBuf {
        market_folder(&self.reports, market_id)
    }

    /// Create the per-market subfolders under every root
    pub fn prepare_market(&self, market_id: MarketId) -> CoordinatorResult<()> {
        for folder in [
            self.intake_for(market_id),
            self.processing_for(market_id),
            self.reports_for(market_id),
        ] {
            std::fs::create_dir_all(&folder)?;
        }
        Ok(())
    }
}

fn market_folder(root: &Path, market_id: MarketId) -> PathBuf {
    root.join(market_id.to_string())
}
