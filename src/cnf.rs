//! Chomsky normal form.
//!
//! Every stage rewrites the grammar in place and finishes with
//! [`Grammar::refresh`], so the derived alphabets and reachability hold
//! between stages.

use std::collections::{HashMap, HashSet};
use tracing::{debug, trace, warn};

use crate::fresh::FreshNames;
use crate::grammar::{Alternative, AlternativeSet, Grammar, Name, Rule, Symbol, Variable};
use crate::utils::{GrammarError, Result, Stage, StageObserver};

/// Occurrence count above which null elimination logs the power-set size
const LARGE_POWER_SET: usize = 10;

/// Run the whole CNF pipeline, notifying `observer` after each stage
#[tracing::instrument(skip_all, fields(observer = observer.name()))]
pub fn to_cnf(grammar: &mut Grammar, observer: &mut dyn StageObserver) -> Result<()> {
    grammar.start_rule()?;

    isolate_start(grammar)?;
    observer.observe(Stage::StartIsolation, grammar)?;

    eliminate_null_productions(grammar)?;
    observer.observe(Stage::NullElimination, grammar)?;

    eliminate_unit_productions(grammar)?;
    observer.observe(Stage::UnitElimination, grammar)?;

    binarize(grammar)?;
    observer.observe(Stage::Binarization, grammar)?;

    isolate_terminals(grammar)?;
    observer.observe(Stage::TerminalIsolation, grammar)?;

    debug!(rules = grammar.rules().len(), "grammar is in chomsky normal form");
    Ok(())
}

/// Give the grammar a start variable that no right-hand side mentions.
///
/// Returns whether a new start rule was inserted.
pub fn isolate_start(grammar: &mut Grammar) -> Result<bool> {
    let start = grammar.start_variable()?;
    let referenced = grammar
        .rules()
        .iter()
        .flat_map(|r| r.alternatives.iter())
        .any(|alt| alt.variables().any(|v| v == start));
    if !referenced {
        return Ok(false);
    }

    let names = grammar.names_in_use();
    let preferred = Name::Letter(grammar.config().start_variable);
    let new_start = if names.contains(&preferred) {
        FreshNames::avoiding(names).allocate()
    } else {
        Variable {
            name: preferred,
            order: None,
        }
    };

    for rule in grammar.rules_mut() {
        rule.is_start = false;
    }
    grammar.insert_rule(
        0,
        Rule::start(new_start).with_alternative(Alternative::new(vec![Symbol::Variable(start)])),
    );
    grammar.refresh();
    debug!(%start, %new_start, "isolated start variable");
    Ok(true)
}

/// Remove epsilon alternatives from every rule but the start rule.
///
/// Each occurrence of a nullable variable may or may not be deleted, so an
/// alternative with `n` occurrences yields `2^n` variants. The cost is
/// exponential in `n`; `max_nullable_occurrences` bounds it.
pub fn eliminate_null_productions(grammar: &mut Grammar) -> Result<()> {
    let limit = grammar.config().max_iterations;
    let max_occurrences = grammar.config().max_nullable_occurrences;
    let max_alternatives = grammar.config().max_alternatives;
    // Variables whose epsilon has been removed; they never get it back
    let mut eliminated: HashSet<Variable> = HashSet::new();

    for _ in 0..limit {
        let nullable: Vec<Variable> = grammar
            .rules()
            .iter()
            .filter(|r| !r.is_start && r.has_epsilon())
            .map(|r| r.variable)
            .collect();
        if nullable.is_empty() {
            debug!(rules = grammar.rules().len(), "null productions eliminated");
            return Ok(());
        }

        for variable in nullable {
            if grammar.rule(&variable).is_none() {
                continue;
            }

            for rule in grammar.rules_mut() {
                let mut variants = Vec::new();
                for alt in &rule.alternatives {
                    let positions = alt.occurrences(variable);
                    if positions.is_empty() {
                        continue;
                    }
                    if positions.len() > max_occurrences {
                        return Err(GrammarError::NullableBlowup {
                            variable,
                            occurrences: positions.len(),
                            limit: max_occurrences,
                        });
                    }
                    if positions.len() > LARGE_POWER_SET {
                        warn!(
                            %variable,
                            occurrences = positions.len(),
                            "expanding a large power set of nullable occurrences"
                        );
                    }
                    variants.extend(deletion_variants(alt, &positions));
                }

                if variants.is_empty() {
                    continue;
                }
                let mut alternatives = AlternativeSet::for_rule(rule, max_alternatives)?;
                for variant in variants {
                    if variant.is_epsilon() && eliminated.contains(&rule.variable) {
                        continue;
                    }
                    alternatives.insert(variant)?;
                }
                rule.alternatives = alternatives.into_vec();
            }

            if let Some(rule) = grammar.rule_mut(&variable) {
                rule.remove_epsilon();
            }
            eliminated.insert(variable);
            trace!(%variable, "removed epsilon alternative");
            grammar.refresh();
        }
    }

    Err(GrammarError::FixpointLimit {
        stage: Stage::NullElimination,
        limit,
    })
}

/// Every way of deleting a subset of `positions` from `alt`
fn deletion_variants(alt: &Alternative, positions: &[usize]) -> Vec<Alternative> {
    (0u64..1 << positions.len())
        .map(|mask| {
            let dropped: Vec<usize> = positions
                .iter()
                .enumerate()
                .filter(|(bit, _)| mask & (1 << bit) != 0)
                .map(|(_, position)| *position)
                .collect();
            alt.symbols()
                .iter()
                .enumerate()
                .filter(|(i, _)| !dropped.contains(i))
                .map(|(_, s)| *s)
                .collect::<Vec<_>>()
                .into()
        })
        .collect()
}

/// Replace every single-variable alternative with the referenced rule's
/// alternatives.
///
/// A rule never inlines itself, nor the same variable twice, so unit cycles
/// such as `A->B`, `B->A` terminate.
pub fn eliminate_unit_productions(grammar: &mut Grammar) -> Result<()> {
    let limit = grammar.config().max_iterations;
    let max_alternatives = grammar.config().max_alternatives;
    let mut inlined: HashMap<Variable, HashSet<Variable>> = HashMap::new();

    for _ in 0..limit {
        let mut changed = false;
        for index in 0..grammar.rules().len() {
            let rule = &grammar.rules()[index];
            let owner = rule.variable;
            let (units, kept): (Vec<Alternative>, Vec<Alternative>) = rule
                .alternatives
                .iter()
                .cloned()
                .partition(|alt| alt.unit_variable().is_some());
            if units.is_empty() {
                continue;
            }
            changed = true;

            let mut alternatives = AlternativeSet::new(owner, max_alternatives);
            alternatives.extend(kept)?;
            let seen = inlined.entry(owner).or_default();
            for unit in units.iter().filter_map(Alternative::unit_variable) {
                if unit == owner || !seen.insert(unit) {
                    continue;
                }
                if let Some(target) = grammar.rule(&unit) {
                    alternatives.extend(target.alternatives.iter().cloned())?;
                }
                trace!(%owner, %unit, "inlined unit production");
            }
            grammar.rules_mut()[index].alternatives = alternatives.into_vec();
        }

        grammar.refresh();
        if !changed {
            debug!(rules = grammar.rules().len(), "unit productions eliminated");
            return Ok(());
        }
    }

    Err(GrammarError::FixpointLimit {
        stage: Stage::UnitElimination,
        limit,
    })
}

/// Split every alternative longer than two symbols into its first symbol and
/// a variable standing for the rest. Identical tails share one variable.
pub fn binarize(grammar: &mut Grammar) -> Result<()> {
    let limit = grammar.config().max_iterations;
    let mut fresh = FreshNames::for_grammar(grammar);

    for _ in 0..limit {
        let mut pending = Vec::new();
        let mut changed = false;
        for index in 0..grammar.rules().len() {
            for position in 0..grammar.rules()[index].alternatives.len() {
                let alt = &grammar.rules()[index].alternatives[position];
                if alt.len() <= 2 {
                    continue;
                }
                let head = alt.symbols()[0];
                let tail = Alternative::new(alt.suffix().to_vec());
                let variable = fresh.fragment_variable(&tail, grammar.rules(), &mut pending);
                grammar.rules_mut()[index].alternatives[position] =
                    Alternative::new(vec![head, Symbol::Variable(variable)]);
                changed = true;
            }
        }

        grammar.rules_mut().extend(pending);
        grammar.refresh();
        if !changed {
            debug!(rules = grammar.rules().len(), "alternatives binarized");
            return Ok(());
        }
    }

    Err(GrammarError::FixpointLimit {
        stage: Stage::Binarization,
        limit,
    })
}

/// Replace terminals inside two-symbol alternatives with variables that
/// derive exactly that terminal.
pub fn isolate_terminals(grammar: &mut Grammar) -> Result<()> {
    let limit = grammar.config().max_iterations;
    let mut fresh = FreshNames::for_grammar(grammar);

    for _ in 0..limit {
        let mut pending = Vec::new();
        let mut changed = false;
        for index in 0..grammar.rules().len() {
            for position in 0..grammar.rules()[index].alternatives.len() {
                let alt = &grammar.rules()[index].alternatives[position];
                if alt.len() != 2 || !alt.symbols().iter().any(Symbol::is_terminal) {
                    continue;
                }
                let mut symbols = alt.symbols().to_vec();
                for symbol in symbols.iter_mut() {
                    if let Symbol::Terminal(c) = *symbol {
                        let fragment = Alternative::new(vec![Symbol::Terminal(c)]);
                        let variable =
                            fresh.fragment_variable(&fragment, grammar.rules(), &mut pending);
                        *symbol = Symbol::Variable(variable);
                    }
                }
                grammar.rules_mut()[index].alternatives[position] = Alternative::new(symbols);
                changed = true;
            }
        }

        grammar.rules_mut().extend(pending);
        grammar.refresh();
        if !changed {
            debug!(rules = grammar.rules().len(), "terminals isolated");
            return Ok(());
        }
    }

    Err(GrammarError::FixpointLimit {
        stage: Stage::TerminalIsolation,
        limit,
    })
}

/// Whether every alternative is a terminal, two variables, or epsilon on the
/// start rule
pub fn is_chomsky(grammar: &Grammar) -> bool {
    grammar.rules().iter().all(|rule| {
        rule.alternatives.iter().all(|alt| match alt.symbols() {
            [] => rule.is_start,
            [Symbol::Terminal(_)] => true,
            [Symbol::Variable(_), Symbol::Variable(_)] => true,
            _ => false,
        })
    })
}
