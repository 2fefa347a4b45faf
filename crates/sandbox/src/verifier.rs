//! Per-stage oracles over sandbox results.

use room_core::model::{Hotspot, Oracle, StageDescriptor, StageKey};
use thiserror::Error;
use tracing::debug;

use crate::error::SandboxError;
use crate::executor::{Argument, Binding, Sandbox};
use crate::sample;
use crate::value::ScriptValue;

/// What the learner handed in for a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission<'a> {
    Code(&'a str),
    Hotspot(&'a str),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub passed: bool,
    pub message: String,
}

impl Verdict {
    #[must_use]
    pub fn pass(message: impl Into<String>) -> Self {
        Self {
            passed: true,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            passed: false,
            message: message.into(),
        }
    }
}

/// Why a submission did not satisfy its stage.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Mismatch {
    #[error(transparent)]
    Sandbox(#[from] SandboxError),

    #[error("function `{name}` not found")]
    MissingFunction { name: String },

    #[error("`{name}` is a {found}, not a function")]
    NotCallable { name: String, found: &'static str },

    #[error("wrong result: expected {expected}, got {actual}")]
    WrongValue { expected: String, actual: String },

    #[error("expected {expected} numbers to be recorded, got {actual}")]
    WrongCount { expected: usize, actual: usize },

    #[error("first recorded number should be {expected}, got {actual}")]
    WrongFirst { expected: i64, actual: String },

    #[error("last recorded number should be {expected}, got {actual}")]
    WrongLast { expected: i64, actual: String },

    #[error("recorded number #{position} should be {expected}, got {actual}")]
    NotContiguous {
        position: usize,
        expected: i64,
        actual: String,
    },

    #[error("expected text to be returned, got a {found}")]
    NotText { found: &'static str },

    #[error("line {line} differs: expected {expected:?}, got {actual:?}")]
    FormatMismatch {
        line: usize,
        expected: String,
        actual: String,
    },

    #[error("stage {key} expects {expected}")]
    WrongSubmission { key: StageKey, expected: &'static str },

    #[error("{label} hides nothing. Keep looking.")]
    Decoy { label: String },

    #[error("there is no `{id}` in this room")]
    UnknownHotspot { id: String },
}

/// Decides pass/fail for one stage. Never touches session state.
#[derive(Debug, Clone, Default)]
pub struct Verifier {
    sandbox: Sandbox,
}

impl Verifier {
    #[must_use]
    pub fn new(sandbox: Sandbox) -> Self {
        Self { sandbox }
    }

    /// Verdict for `submission`; failures are folded into the message.
    #[must_use]
    pub fn verify(&self, stage: &StageDescriptor, submission: Submission<'_>) -> Verdict {
        let verdict = match self.check(stage, submission) {
            Ok(message) => Verdict::pass(message),
            Err(mismatch) => Verdict::fail(mismatch.to_string()),
        };
        debug!(stage = %stage.key(), passed = verdict.passed, "verified submission");
        verdict
    }

    /// Typed form of [`Verifier::verify`].
    ///
    /// # Errors
    ///
    /// Returns the first `Mismatch` between the submission and the stage's oracle.
    pub fn check(
        &self,
        stage: &StageDescriptor,
        submission: Submission<'_>,
    ) -> Result<String, Mismatch> {
        match (stage.oracle(), submission) {
            (
                Oracle::SumFunction {
                    function,
                    lhs,
                    rhs,
                    expected,
                },
                Submission::Code(text),
            ) => self.check_sum(text, function, *lhs, *rhs, *expected),
            (
                Oracle::Enumeration {
                    first,
                    last,
                    strict,
                },
                Submission::Code(text),
            ) => self.check_enumeration(text, *first, *last, *strict),
            (Oracle::CsvTransform { function }, Submission::Code(text)) => {
                self.check_csv(text, function)
            }
            (Oracle::Hotspot { hotspots, target }, Submission::Hotspot(id)) => {
                check_hotspot(hotspots, target, id)
            }
            (Oracle::Hotspot { .. }, Submission::Code(_)) => Err(Mismatch::WrongSubmission {
                key: stage.key().clone(),
                expected: "a hotspot choice",
            }),
            (_, Submission::Hotspot(_)) => Err(Mismatch::WrongSubmission {
                key: stage.key().clone(),
                expected: "program text",
            }),
        }
    }

    fn check_sum(
        &self,
        text: &str,
        function: &str,
        lhs: i64,
        rhs: i64,
        expected: i64,
    ) -> Result<String, Mismatch> {
        let execution = self.sandbox.execute(text)?;
        require_function(execution.binding(function), function)?;
        let actual = execution.call(function, &[Argument::Integer(lhs), Argument::Integer(rhs)])?;

        #[allow(clippy::cast_precision_loss, clippy::float_cmp)]
        let matches = actual.as_number() == Some(expected as f64);
        if !matches {
            return Err(Mismatch::WrongValue {
                expected: expected.to_string(),
                actual: actual.to_string(),
            });
        }
        Ok(format!("{function}({lhs}, {rhs}) returned {expected}. The keypad clicks."))
    }

    fn check_enumeration(
        &self,
        text: &str,
        first: i64,
        last: i64,
        strict: bool,
    ) -> Result<String, Mismatch> {
        let execution = self.sandbox.execute(text)?;
        let numbers: Vec<ScriptValue> = execution
            .output()
            .into_iter()
            .filter(ScriptValue::is_number)
            .collect();

        let expected_count = usize::try_from(last - first + 1).unwrap_or(0);
        if numbers.len() != expected_count {
            return Err(Mismatch::WrongCount {
                expected: expected_count,
                actual: numbers.len(),
            });
        }
        if let Some(head) = numbers.first().filter(|value| !is_exactly(value, first)) {
            return Err(Mismatch::WrongFirst {
                expected: first,
                actual: head.to_string(),
            });
        }
        if let Some(tail) = numbers.last().filter(|value| !is_exactly(value, last)) {
            return Err(Mismatch::WrongLast {
                expected: last,
                actual: tail.to_string(),
            });
        }
        if strict {
            for (offset, (value, expected)) in numbers.iter().zip(first..=last).enumerate() {
                if !is_exactly(value, expected) {
                    return Err(Mismatch::NotContiguous {
                        position: offset + 1,
                        expected,
                        actual: value.to_string(),
                    });
                }
            }
        }
        Ok(format!("All {expected_count} tiles counted, {first} through {last}."))
    }

    fn check_csv(&self, text: &str, function: &str) -> Result<String, Mismatch> {
        let execution = self.sandbox.execute(text)?;
        require_function(execution.binding(function), function)?;
        let returned = execution.call(function, &[Argument::Sample])?;
        let Some(actual) = returned.as_text() else {
            return Err(Mismatch::NotText {
                found: returned.type_name(),
            });
        };

        let expected = sample::expected_csv();
        let actual = normalize_csv(actual);
        if actual != expected {
            return Err(first_differing_line(&expected, &actual));
        }
        Ok("The ledger decodes cleanly.".to_string())
    }
}

fn require_function(binding: Binding, name: &str) -> Result<(), Mismatch> {
    match binding {
        Binding::Function => Ok(()),
        Binding::Missing => Err(Mismatch::MissingFunction {
            name: name.to_string(),
        }),
        Binding::Other(found) => Err(Mismatch::NotCallable {
            name: name.to_string(),
            found,
        }),
    }
}

#[allow(clippy::cast_precision_loss, clippy::float_cmp)]
fn is_exactly(value: &ScriptValue, expected: i64) -> bool {
    value.as_number() == Some(expected as f64)
}

fn check_hotspot(hotspots: &[Hotspot], target: &str, id: &str) -> Result<String, Mismatch> {
    match hotspots.iter().find(|spot| spot.id == id) {
        Some(spot) if spot.id == target => Ok(format!(
            "Behind the {} lies the exit key!",
            spot.label.to_lowercase()
        )),
        Some(spot) => Err(Mismatch::Decoy {
            label: spot.label.clone(),
        }),
        None => Err(Mismatch::UnknownHotspot { id: id.to_string() }),
    }
}

/// Unifies line endings and trims surrounding whitespace.
#[must_use]
pub fn normalize_csv(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n").trim().to_string()
}

fn first_differing_line(expected: &str, actual: &str) -> Mismatch {
    let mut expected_lines = expected.lines();
    let mut actual_lines = actual.lines();
    let mut line = 1;
    loop {
        match (expected_lines.next(), actual_lines.next()) {
            (Some(want), Some(got)) if want == got => line += 1,
            (want, got) => {
                return Mismatch::FormatMismatch {
                    line,
                    expected: want.unwrap_or("<end of text>").to_string(),
                    actual: got.unwrap_or("<end of text>").to_string(),
                };
            }
        }
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//
