//! Read-only supplier of the active case: the metadata record handed to the
//! backend with `start_trial`, plus the ordered evidence list. Loaded once
//! at process start and never mutated.

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use serde::Deserialize;
use shared::domain::{CaseInfo, EvidenceItem, EvidenceProvider};

#[derive(Debug, Clone)]
pub struct CaseData {
    pub meta: CaseInfo,
    pub evidence: Vec<EvidenceItem>,
}

#[derive(Debug, Deserialize)]
struct CaseManifest {
    meta: CaseInfo,
    #[serde(default)]
    evidence: Vec<EvidenceEntry>,
}

#[derive(Debug, Deserialize)]
struct EvidenceEntry {
    id: String,
    name: String,
    provider: EvidenceProvider,
    /// Path of the evidence body, relative to the case directory.
    content_file: PathBuf,
}

impl CaseData {
    /// Reads `case.toml` and every evidence content file it references,
    /// all relative to `dir`.
    pub fn load(dir: &Path) -> Result<Self> {
        let manifest_path = dir.join("case.toml");
        let raw = fs::read_to_string(&manifest_path).with_context(|| {
            format!("failed to read case manifest '{}'", manifest_path.display())
        })?;
        let manifest: CaseManifest = toml::from_str(&raw)
            .with_context(|| format!("invalid case manifest '{}'", manifest_path.display()))?;

        let mut evidence = Vec::with_capacity(manifest.evidence.len());
        for entry in manifest.evidence {
            let content_path = dir.join(&entry.content_file);
            let content = fs::read_to_string(&content_path).with_context(|| {
                format!(
                    "failed to read evidence content '{}' for item '{}'",
                    content_path.display(),
                    entry.id
                )
            })?;
            evidence.push(EvidenceItem {
                id: entry.id,
                name: entry.name,
                content,
                provider: entry.provider,
            });
        }

        Ok(Self {
            meta: manifest.meta,
            evidence,
        })
    }
}
