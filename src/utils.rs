use std::fmt;
use std::io::{self, Write};
use thiserror::Error;

use crate::grammar::{Grammar, Variable};

/// Custom error types for grammar normalization
#[derive(Error, Debug)]
pub enum GrammarError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid grammar: {0}")]
    InvalidGrammar(String),

    #[error("Config error: {0}")]
    Config(#[from] serde_json::Error),

    #[error(
        "Alternative holds {occurrences} occurrences of nullable variable {variable} (limit {limit})"
    )]
    NullableBlowup {
        variable: Variable,
        occurrences: usize,
        limit: usize,
    },

    #[error("Rule for {variable} grew past {limit} alternatives")]
    AlternativeBlowup { variable: Variable, limit: usize },

    #[error("{stage} did not reach a fixpoint within {limit} passes")]
    FixpointLimit { stage: Stage, limit: usize },

    #[error("Output error: {0}")]
    Output(String),
}

/// Result type for grammar operations
pub type Result<T> = std::result::Result<T, GrammarError>;

/// The rewrite stages of the CNF and GNF pipelines, in pipeline order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    StartIsolation,
    NullElimination,
    UnitElimination,
    Binarization,
    TerminalIsolation,
    Ordering,
    /// Raising leading references and removing immediate left recursion.
    ///
    /// The two run interleaved per rule, so they share one checkpoint: after
    /// it no alternative starts with its own rule's variable or a lower tag.
    LeadingReferences,
    BackSubstitution,
}

impl Stage {
    /// Every stage, in the order the pipelines run them
    pub const ALL: [Stage; 8] = [
        Stage::StartIsolation,
        Stage::NullElimination,
        Stage::UnitElimination,
        Stage::Binarization,
        Stage::TerminalIsolation,
        Stage::Ordering,
        Stage::LeadingReferences,
        Stage::BackSubstitution,
    ];

    /// Whether the grammar after this stage is an externally visible checkpoint.
    ///
    /// Terminal isolation completes CNF; every GNF stage is a checkpoint.
    pub fn is_checkpoint(self) -> bool {
        matches!(
            self,
            Stage::TerminalIsolation
                | Stage::Ordering
                | Stage::LeadingReferences
                | Stage::BackSubstitution
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            Stage::StartIsolation => "start isolation",
            Stage::NullElimination => "null-production elimination",
            Stage::UnitElimination => "unit-production elimination",
            Stage::Binarization => "binarization",
            Stage::TerminalIsolation => "terminal isolation",
            Stage::Ordering => "ordering assignment",
            Stage::LeadingReferences => "leading-reference and left-recursion elimination",
            Stage::BackSubstitution => "back-substitution",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Trait for anything that wants to see the grammar between pipeline stages
pub trait StageObserver: fmt::Debug {
    /// Called once after each stage completes
    fn observe(&mut self, stage: Stage, grammar: &Grammar) -> Result<()>;

    /// Get the name of this observer
    fn name(&self) -> &str;
}

/// An observer that ignores every stage
#[derive(Debug, Clone, Default)]
pub struct NoopObserver;

impl StageObserver for NoopObserver {
    fn observe(&mut self, _stage: Stage, _grammar: &Grammar) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &str {
        "noop"
    }
}

/// Writes the rule set as `Variable->alt|alt` lines followed by a blank line
pub struct DumpObserver<W: Write> {
    writer: W,
    every_stage: bool,
}

impl<W: Write> DumpObserver<W> {
    /// Dump only the checkpoint stages
    pub fn new(writer: W) -> Self {
        DumpObserver {
            writer,
            every_stage: false,
        }
    }

    /// Dump after every stage, not just the checkpoints
    pub fn every_stage(mut self, every_stage: bool) -> Self {
        self.every_stage = every_stage;
        self
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> fmt::Debug for DumpObserver<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DumpObserver")
            .field("every_stage", &self.every_stage)
            .finish_non_exhaustive()
    }
}

impl<W: Write> StageObserver for DumpObserver<W> {
    fn observe(&mut self, stage: Stage, grammar: &Grammar) -> Result<()> {
        if !self.every_stage && !stage.is_checkpoint() {
            return Ok(());
        }
        writeln!(self.writer, "{}", grammar)
            .and_then(|_| self.writer.flush())
            .map_err(|e| GrammarError::Output(format!("{}: {}", stage, e)))
    }

    fn name(&self) -> &str {
        "dump"
    }
}

/// Keeps a snapshot of the grammar after every stage
#[derive(Debug, Clone, Default)]
pub struct RecordingObserver {
    snapshots: Vec<(Stage, Grammar)>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        RecordingObserver::default()
    }

    /// All snapshots, in the order the stages ran
    pub fn snapshots(&self) -> &[(Stage, Grammar)] {
        &self.snapshots
    }

    /// The snapshot taken after `stage`, if that stage ran
    pub fn after(&self, stage: Stage) -> Option<&Grammar> {
        self.snapshots
            .iter()
            .find(|(s, _)| *s == stage)
            .map(|(_, g)| g)
    }
}

impl StageObserver for RecordingObserver {
    fn observe(&mut self, stage: Stage, grammar: &Grammar) -> Result<()> {
        self.snapshots.push((stage, grammar.clone()));
        Ok(())
    }

    fn name(&self) -> &str {
        "recording"
    }
}

/// Trait extension for Option<T> to convert to GrammarError
pub trait OptionExt<T> {
    fn ok_or_grammar_err<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_grammar_err<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.ok_or_else(|| GrammarError::InvalidGrammar(f()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grammar() -> Grammar {
        Grammar::parse("2 S->aA A->b|?").unwrap()
    }

    #[test]
    fn test_checkpoint_stages() {
        let checkpoints: Vec<Stage> = Stage::ALL
            .into_iter()
            .filter(|s| s.is_checkpoint())
            .collect();
        assert_eq!(
            checkpoints,
            vec![
                Stage::TerminalIsolation,
                Stage::Ordering,
                Stage::LeadingReferences,
                Stage::BackSubstitution
            ]
        );
    }

    #[test]
    fn test_stage_names() {
        assert_eq!(
            Stage::LeadingReferences.to_string(),
            "leading-reference and left-recursion elimination"
        );
        assert_eq!(Stage::NullElimination.to_string(), "null-production elimination");
    }

    #[test]
    fn test_alternative_blowup_message() {
        let err = GrammarError::AlternativeBlowup {
            variable: Variable::letter('S').tagged(2),
            limit: 10,
        };
        assert_eq!(err.to_string(), "Rule for S[2] grew past 10 alternatives");
    }

    #[test]
    fn test_dump_observer_skips_intermediate_stages() {
        let g = grammar();
        let mut dump = DumpObserver::new(Vec::new());
        dump.observe(Stage::NullElimination, &g).unwrap();
        assert!(dump.into_inner().is_empty());

        let mut dump = DumpObserver::new(Vec::new());
        dump.observe(Stage::TerminalIsolation, &g).unwrap();
        let text = String::from_utf8(dump.into_inner()).unwrap();
        assert_eq!(text, "S->aA\nA->b|?\n\n");
    }

    #[test]
    fn test_dump_observer_every_stage() {
        let g = grammar();
        let mut dump = DumpObserver::new(Vec::new()).every_stage(true);
        dump.observe(Stage::StartIsolation, &g).unwrap();
        dump.observe(Stage::UnitElimination, &g).unwrap();
        let text = String::from_utf8(dump.into_inner()).unwrap();
        assert_eq!(text.matches("S->aA").count(), 2);
    }

    #[test]
    fn test_recording_observer() {
        let g = grammar();
        let mut recorder = RecordingObserver::new();
        recorder.observe(Stage::Ordering, &g).unwrap();
        assert_eq!(recorder.snapshots().len(), 1);
        assert!(recorder.after(Stage::Ordering).is_some());
        assert!(recorder.after(Stage::Binarization).is_none());
    }

    #[test]
    fn test_option_ext() {
        let missing: Option<u8> = None;
        let err = missing.ok_or_grammar_err(|| "no start rule".to_string());
        assert!(format!("{}", err.unwrap_err()).contains("no start rule"));
    }
}
