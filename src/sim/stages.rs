/// Stage loader.
///
/// ## Sources (priority order):
///   1. `stages.json` found via the configured path (see `config.rs`)
///   2. Built-in embedded stages
///
/// A stage file that exists but cannot be read, parsed or validated is
/// reported and the embedded set is used instead, so the game always starts.
///
/// ## File format
///   A JSON array of stage objects, see [`Stage`] for the shape. Stages with
///   no `name` are called "Stage N" by position.

use std::fmt;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{error, info};

use crate::config::GameConfig;
use crate::domain::stage::{Stage, StageDefect};

const EMBEDDED_STAGES: &str = include_str!("../../stages.json");

#[derive(Debug, Error)]
pub enum StageError {
    #[error("could not read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{origin}: invalid stage document: {source}")]
    Parse {
        origin: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("{origin}: stage {number} ({name}): {defect}")]
    Invalid {
        origin: String,
        number: usize,
        name: String,
        #[source]
        defect: StageDefect,
    },
    #[error("{origin}: no stages defined")]
    Empty { origin: String },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StageSource {
    Embedded,
    File(PathBuf),
}

impl fmt::Display for StageSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageSource::Embedded => f.write_str("built-in stages"),
            StageSource::File(p) => write!(f, "{}", p.display()),
        }
    }
}

/// Read-only collection of canonical stages.
#[derive(Clone, Debug)]
pub struct StageSet {
    stages: Vec<Stage>,
    source: StageSource,
}

// ══════════════════════════════════════════════════════════════
// Public API
// ══════════════════════════════════════════════════════════════

impl StageSet {
    /// Stages from the configured file, falling back to the embedded set.
    pub fn load(config: &GameConfig) -> StageSet {
        let path = &config.stages_file;
        if path.is_file() {
            match StageSet::from_file(path) {
                Ok(set) => {
                    info!(path = %path.display(), count = set.len(), "stages loaded");
                    return set;
                }
                Err(e) => error!("{e}; using built-in stages"),
            }
        } else {
            info!(path = %path.display(), "no stage file, using built-in stages");
        }
        StageSet::embedded()
    }

    pub fn from_file(path: &Path) -> Result<StageSet, StageError> {
        let text = std::fs::read_to_string(path).map_err(|source| StageError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let stages = parse_stages(&text, &path.display().to_string())?;
        Ok(StageSet { stages, source: StageSource::File(path.to_path_buf()) })
    }

    pub fn embedded() -> StageSet {
        // The embedded document is covered by a unit test; an empty set here
        // would only mean a broken build.
        let stages = parse_stages(EMBEDDED_STAGES, "embedded").unwrap_or_else(|e| {
            error!("{e}");
            vec![]
        });
        StageSet { stages, source: StageSource::Embedded }
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn get(&self, index: usize) -> Option<&Stage> {
        self.stages.get(index)
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn source(&self) -> &StageSource {
        &self.source
    }

    /// Look a stage up by 1-based number ("3") or case-insensitive name.
    pub fn find(&self, key: &str) -> Option<(usize, &Stage)> {
        let key = key.trim();
        if let Ok(n) = key.parse::<usize>() {
            return n.checked_sub(1).and_then(|i| self.stages.get(i).map(|s| (i, s)));
        }
        self.stages
            .iter()
            .enumerate()
            .find(|(_, s)| s.name.eq_ignore_ascii_case(key))
    }
}

/// Parse and validate a stage document.
pub fn parse_stages(text: &str, origin: &str) -> Result<Vec<Stage>, StageError> {
    let mut stages: Vec<Stage> = serde_json::from_str(text).map_err(|source| StageError::Parse {
        origin: origin.to_string(),
        source,
    })?;
    if stages.is_empty() {
        return Err(StageError::Empty { origin: origin.to_string() });
    }
    for (i, stage) in stages.iter_mut().enumerate() {
        if stage.name.trim().is_empty() {
            stage.name = format!("Stage {}", i + 1);
        }
        stage.validate().map_err(|defect| StageError::Invalid {
            origin: origin.to_string(),
            number: i + 1,
            name: stage.name.clone(),
            defect,
        })?;
    }
    Ok(stages)
}
