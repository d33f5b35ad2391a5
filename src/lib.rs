//! Grammar-Norm rewrites context-free grammars into Chomsky and Greibach normal form.
//!
//! Grammars are read in a compact rule-count-prefixed format where every
//! symbol is a single character and `?` marks the empty alternative. The
//! result of each pipeline stage can be observed, which is how the
//! command-line tool prints its checkpoint dumps.
//!
//! # Example
//!
//! ```rust
//! use grammar_norm::{normalize, Grammar, NoopObserver};
//!
//! let grammar = Grammar::parse("1 S->aSb|ab").unwrap();
//! let normalized = normalize(grammar, &mut NoopObserver).unwrap();
//!
//! assert!(grammar_norm::cnf::is_chomsky(&normalized.cnf));
//! assert!(grammar_norm::gnf::is_greibach(&normalized.gnf));
//! ```

pub mod cnf;
pub mod fresh;
pub mod gnf;
pub mod grammar;
pub mod language;
pub mod utils;

pub use grammar::{Grammar, GrammarBuilder, GrammarConfig};
pub use utils::{
    DumpObserver, GrammarError, NoopObserver, RecordingObserver, Result, Stage, StageObserver,
};

// Re-export the data model
pub use grammar::{Alphabet, Alternative, Name, Rule, Symbol, Variable};

/// Both normal forms of one input grammar
#[derive(Debug, Clone, PartialEq)]
pub struct Normalized {
    pub cnf: Grammar,
    pub gnf: Grammar,
}

/// Convert `grammar` to CNF and then to GNF, notifying `observer` after every
/// stage of both pipelines.
#[tracing::instrument(skip_all, fields(observer = observer.name()))]
pub fn normalize(mut grammar: Grammar, observer: &mut dyn StageObserver) -> Result<Normalized> {
    cnf::to_cnf(&mut grammar, observer)?;
    let gnf = gnf::to_gnf(&grammar, observer)?;
    Ok(Normalized { cnf: grammar, gnf })
}
