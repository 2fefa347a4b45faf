use std::collections::HashSet;

use thiserror::Error;

use crate::model::ids::StageKey;

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum StageError {
    #[error("stage catalog cannot be empty")]
    EmptyCatalog,

    #[error("duplicate stage key: {key}")]
    DuplicateKey { key: StageKey },

    #[error("stage {key} has an oracle that does not match its kind")]
    OracleKindMismatch { key: StageKey },

    #[error("stage {key} targets unknown hotspot `{target}`")]
    UnknownTarget { key: StageKey, target: String },

    #[error("unknown stage: {key}")]
    UnknownStage { key: StageKey },
}

//
// ─── DESCRIPTORS ───────────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageKind {
    /// Solved by submitting program text.
    CodeChallenge,
    /// Solved by a single qualifying interaction.
    InteractionChallenge,
}

/// One clickable spot of an interaction stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hotspot {
    pub id: String,
    pub label: String,
}

impl Hotspot {
    #[must_use]
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
        }
    }
}

/// Fixed expected-behavior check for a stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Oracle {
    /// `function(lhs, rhs)` must return `expected`.
    SumFunction {
        function: String,
        lhs: i64,
        rhs: i64,
        expected: i64,
    },
    /// Numeric output entries must run from `first` to `last`.
    ///
    /// Non-strict mode only checks the count and both endpoints.
    Enumeration { first: i64, last: i64, strict: bool },
    /// `function(sample)` must render the sample dataset as CSV.
    CsvTransform { function: String },
    /// Exactly one of `hotspots` (the one with id `target`) solves the stage.
    Hotspot {
        hotspots: Vec<Hotspot>,
        target: String,
    },
}

impl Oracle {
    #[must_use]
    pub fn kind(&self) -> StageKind {
        match self {
            Oracle::SumFunction { .. } | Oracle::Enumeration { .. } | Oracle::CsvTransform { .. } => {
                StageKind::CodeChallenge
            }
            Oracle::Hotspot { .. } => StageKind::InteractionChallenge,
        }
    }
}

/// Immutable description of one stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageDescriptor {
    key: StageKey,
    kind: StageKind,
    title: String,
    prompt: String,
    starter_text: Option<String>,
    oracle: Oracle,
}

impl StageDescriptor {
    #[must_use]
    pub fn code(
        key: impl Into<StageKey>,
        title: impl Into<String>,
        prompt: impl Into<String>,
        starter_text: Option<String>,
        oracle: Oracle,
    ) -> Self {
        Self {
            key: key.into(),
            kind: StageKind::CodeChallenge,
            title: title.into(),
            prompt: prompt.into(),
            starter_text,
            oracle,
        }
    }

    #[must_use]
    pub fn interaction(
        key: impl Into<StageKey>,
        title: impl Into<String>,
        prompt: impl Into<String>,
        oracle: Oracle,
    ) -> Self {
        Self {
            key: key.into(),
            kind: StageKind::InteractionChallenge,
            title: title.into(),
            prompt: prompt.into(),
            starter_text: None,
            oracle,
        }
    }

    #[must_use]
    pub fn key(&self) -> &StageKey {
        &self.key
    }

    #[must_use]
    pub fn kind(&self) -> StageKind {
        self.kind
    }

    #[must_use]
    pub fn title(&self) -> &str {
        &self.title
    }

    #[must_use]
    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    #[must_use]
    pub fn starter_text(&self) -> Option<&str> {
        self.starter_text.as_deref()
    }

    #[must_use]
    pub fn oracle(&self) -> &Oracle {
        &self.oracle
    }

    #[must_use]
    pub fn is_code(&self) -> bool {
        self.kind == StageKind::CodeChallenge
    }

    fn validate(&self) -> Result<(), StageError> {
        if self.oracle.kind() != self.kind {
            return Err(StageError::OracleKindMismatch {
                key: self.key.clone(),
            });
        }
        if let Oracle::Hotspot { hotspots, target } = &self.oracle {
            if !hotspots.iter().any(|spot| &spot.id == target) {
                return Err(StageError::UnknownTarget {
                    key: self.key.clone(),
                    target: target.clone(),
                });
            }
        }
        Ok(())
    }
}

//
// ─── CATALOG ───────────────────────────────────────────────────────────────────
//

/// Ordered, immutable list of stages. Order defines navigation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageCatalog {
    stages: Vec<StageDescriptor>,
}

impl StageCatalog {
    /// Build a catalog from descriptors.
    ///
    /// # Errors
    ///
    /// Returns `StageError` if the list is empty, keys repeat, or a stage's oracle is inconsistent.
    pub fn new(stages: Vec<StageDescriptor>) -> Result<Self, StageError> {
        if stages.is_empty() {
            return Err(StageError::EmptyCatalog);
        }
        let mut seen = HashSet::with_capacity(stages.len());
        for stage in &stages {
            if !seen.insert(stage.key.clone()) {
                return Err(StageError::DuplicateKey {
                    key: stage.key.clone(),
                });
            }
            stage.validate()?;
        }
        Ok(Self { stages })
    }

    /// The four-stage room shipped with the app.
    #[must_use]
    pub fn standard() -> Self {
        Self {
            stages: vec![
                StageDescriptor::code(
                    "format",
                    "Fix the adder",
                    "The lock's keypad runs on a broken helper. Clean it up so that \
                     add(a, b) returns the sum of its two arguments.",
                    Some(FORMAT_STARTER.to_string()),
                    Oracle::SumFunction {
                        function: "add".to_string(),
                        lhs: 2,
                        rhs: 3,
                        expected: 5,
                    },
                ),
                StageDescriptor::code(
                    "enumerate",
                    "Count the tiles",
                    "Call record(n) for every whole number from 0 to 1000, in order.",
                    Some(ENUMERATE_STARTER.to_string()),
                    Oracle::Enumeration {
                        first: 0,
                        last: 1000,
                        strict: false,
                    },
                ),
                StageDescriptor::code(
                    "transform",
                    "Decode the ledger",
                    "Define toCsv(rows) that turns the sample records into CSV: a \
                     firstName,lastName,age header followed by one line per record.",
                    Some(TRANSFORM_STARTER.to_string()),
                    Oracle::CsvTransform {
                        function: "toCsv".to_string(),
                    },
                ),
                StageDescriptor::interaction(
                    "escape",
                    "Find the way out",
                    "Something in this room hides the exit key. Pick the right spot.",
                    Oracle::Hotspot {
                        hotspots: vec![
                            Hotspot::new("painting", "Crooked painting"),
                            Hotspot::new("bookshelf", "Dusty bookshelf"),
                            Hotspot::new("loose-brick", "Loose brick"),
                            Hotspot::new("rug", "Worn rug"),
                        ],
                        target: "loose-brick".to_string(),
                    },
                ),
            ],
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Always false for a validated catalog.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<&StageDescriptor> {
        self.stages.get(index)
    }

    #[must_use]
    pub fn position(&self, key: &StageKey) -> Option<usize> {
        self.stages.iter().position(|stage| &stage.key == key)
    }

    /// Look up a stage by key.
    ///
    /// # Errors
    ///
    /// Returns `StageError::UnknownStage` if no stage has this key.
    pub fn by_key(&self, key: &StageKey) -> Result<&StageDescriptor, StageError> {
        self.stages
            .iter()
            .find(|stage| &stage.key == key)
            .ok_or_else(|| StageError::UnknownStage { key: key.clone() })
    }

    pub fn iter(&self) -> impl Iterator<Item = &StageDescriptor> {
        self.stages.iter()
    }
}

const FORMAT_STARTER: &str = "\
-- Tidy this up: add(a, b) must return the sum of a and b.
function add(a,b)
return a-b end
";

const ENUMERATE_STARTER: &str = "\
-- record(n) appends n to the output log.
";

const TRANSFORM_STARTER: &str = "\
-- sample holds two records with firstName, lastName and age.
function toCsv(rows)
  return \"\"
end
";

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//
