// SPDX-License-Identifier: BSD-3-Clause
// Copyright (c) Qualcomm Technologies, Inc. and/or its subsidiaries.
//! On-disk engine configuration: VID/PID table overrides, default sector
//! sizes, and per-vendor auth-strategy defaults, loaded once by the
//! reference CLI and handed to whichever orchestrator needs a slice of it.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::types::PortKind;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EngineConfig {
    #[serde(default)]
    pub extra_vid_pids: HashMap<String, PortKindConfig>,
    #[serde(default)]
    pub default_sector_size: HashMap<String, usize>,
    #[serde(default)]
    pub loader_paths: HashMap<String, String>,
}

/// Mirrors [`PortKind`] but is `serde`-friendly for the on-disk profile
/// (`PortKind` itself stays a plain enum used on the hot path).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum PortKindConfig {
    QualcommEdl,
    QualcommDload,
    QualcommDiag,
    MtkBrom,
    MtkPreloader,
    MtkDa,
    SpreadtrumDownload,
    Fastboot,
}

impl From<PortKindConfig> for PortKind {
    fn from(k: PortKindConfig) -> Self {
        match k {
            PortKindConfig::QualcommEdl => PortKind::QualcommEdl,
            PortKindConfig::QualcommDload => PortKind::QualcommDload,
            PortKindConfig::QualcommDiag => PortKind::QualcommDiag,
            PortKindConfig::MtkBrom => PortKind::MtkBrom,
            PortKindConfig::MtkPreloader => PortKind::MtkPreloader,
            PortKindConfig::MtkDa => PortKind::MtkDa,
            PortKindConfig::SpreadtrumDownload => PortKind::SpreadtrumDownload,
            PortKindConfig::Fastboot => PortKind::Fastboot,
        }
    }
}

impl EngineConfig {
    pub fn load(path: &Path) -> anyhow::Result<EngineConfig> {
        let text = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&text)?)
    }
}
