//! Greibach normal form, starting from a grammar already in Chomsky normal form.
//!
//! Variables are first tagged with a total order. Rules are then processed in
//! ascending tag order so that no alternative starts with a lower-tagged
//! variable, left recursion is removed, and finally higher-tagged rules are
//! substituted back into lower ones until every alternative starts with a
//! terminal.

use std::collections::HashMap;
use tracing::{debug, trace};

use crate::cnf::is_chomsky;
use crate::fresh::FreshNames;
use crate::grammar::{Alternative, AlternativeSet, Grammar, Rule, Symbol, Variable};
use crate::utils::{GrammarError, Result, Stage, StageObserver};

/// Run the whole GNF pipeline on a CNF grammar, notifying `observer` after
/// each stage. The input is left untouched.
#[tracing::instrument(skip_all, fields(observer = observer.name()))]
pub fn to_gnf(cnf: &Grammar, observer: &mut dyn StageObserver) -> Result<Grammar> {
    cnf.start_rule()?;
    if !is_chomsky(cnf) {
        return Err(GrammarError::InvalidGrammar(
            "greibach conversion needs a grammar in chomsky normal form".to_string(),
        ));
    }

    let mut grammar = assign_ordering(cnf);
    observer.observe(Stage::Ordering, &grammar)?;

    normalize_leading_references(&mut grammar)?;
    observer.observe(Stage::LeadingReferences, &grammar)?;

    back_substitute(&mut grammar)?;
    observer.observe(Stage::BackSubstitution, &grammar)?;

    debug!(rules = grammar.rules().len(), "grammar is in greibach normal form");
    Ok(grammar)
}

/// Tag every variable with the position at which it is first seen, walking
/// rules in order and, within a rule, the left-hand side before the
/// alternatives.
pub fn assign_ordering(grammar: &Grammar) -> Grammar {
    let mut tags: HashMap<Variable, usize> = HashMap::new();
    let mut visit = |variable: Variable| {
        let next = tags.len();
        tags.entry(variable).or_insert(next);
    };
    for rule in grammar.rules() {
        visit(rule.variable);
        for alt in &rule.alternatives {
            alt.variables().for_each(&mut visit);
        }
    }

    let ordered = grammar.map_variables(|v| tags.get(&v).map_or(v, |order| v.tagged(*order)));
    debug!(variables = tags.len(), "assigned variable ordering");
    ordered
}

fn position_of_order(grammar: &Grammar, order: usize) -> Option<usize> {
    grammar
        .rules()
        .iter()
        .position(|r| r.variable.order == Some(order))
}

/// For every tagged rule in ascending order, substitute away leading
/// references to lower tags, then remove the rule's immediate left recursion.
///
/// Left recursion is removed per rule before the next tag is raised; a
/// left-recursive lower rule would otherwise be substituted forever.
pub fn normalize_leading_references(grammar: &mut Grammar) -> Result<()> {
    let mut fresh = FreshNames::for_grammar(grammar);
    let mut orders: Vec<usize> = grammar
        .rules()
        .iter()
        .filter_map(|r| r.variable.order)
        .collect();
    orders.sort_unstable();

    for order in orders {
        raise_leading_references(grammar, order)?;
        if let Some(auxiliary) = eliminate_left_recursion(grammar, order, &mut fresh)? {
            trace!(order, %auxiliary, "removed immediate left recursion");
        }
    }

    grammar.refresh();
    debug!(rules = grammar.rules().len(), "leading references normalized");
    Ok(())
}

/// Rewrite the rule tagged `order` until none of its alternatives starts
/// with a variable of a lower tag
pub fn raise_leading_references(grammar: &mut Grammar, order: usize) -> Result<()> {
    let Some(index) = position_of_order(grammar, order) else {
        return Ok(());
    };
    let limit = grammar.config().max_iterations;
    let max_alternatives = grammar.config().max_alternatives;

    for _ in 0..limit {
        let mut changed = false;
        let rule = &grammar.rules()[index];
        let mut raised = AlternativeSet::new(rule.variable, max_alternatives);
        for alt in &rule.alternatives {
            match alt.leading_variable() {
                Some(lead) if lead.order.is_some_and(|j| j < order) => {
                    changed = true;
                    if let Some(lower) = grammar.rule(&lead) {
                        for prefix in &lower.alternatives {
                            raised.insert(prefix.concat(alt.suffix()))?;
                        }
                    }
                }
                _ => {
                    raised.insert(alt.clone())?;
                }
            }
        }
        grammar.rules_mut()[index].alternatives = raised.into_vec();
        if !changed {
            return Ok(());
        }
    }

    Err(GrammarError::FixpointLimit {
        stage: Stage::LeadingReferences,
        limit,
    })
}

/// Remove immediate left recursion from the rule tagged `order`.
///
/// `A -> A a1 | .. | b1 | ..` becomes `A -> b | b A'` and `A' -> a | a A'`
/// for a fresh `A'`, which is returned. Returns `None` when the rule was not
/// left-recursive or only recursed into itself with nothing after it.
pub fn eliminate_left_recursion(
    grammar: &mut Grammar,
    order: usize,
    fresh: &mut FreshNames,
) -> Result<Option<Variable>> {
    let Some(index) = position_of_order(grammar, order) else {
        return Ok(None);
    };
    let max_alternatives = grammar.config().max_alternatives;
    let owner = grammar.rules()[index].variable;
    let (recursive, base): (Vec<Alternative>, Vec<Alternative>) = grammar.rules()[index]
        .alternatives
        .iter()
        .cloned()
        .partition(|alt| alt.leading_variable() == Some(owner));
    if recursive.is_empty() {
        return Ok(None);
    }

    // `A -> A` adds nothing
    let tails: Vec<&[Symbol]> = recursive
        .iter()
        .map(Alternative::suffix)
        .filter(|tail| !tail.is_empty())
        .collect();
    if tails.is_empty() {
        grammar.rules_mut()[index].alternatives = base;
        return Ok(None);
    }

    let auxiliary = fresh.allocate();
    let link = [Symbol::Variable(auxiliary)];

    let mut rewritten = AlternativeSet::new(owner, max_alternatives);
    for beta in &base {
        rewritten.insert(beta.clone())?;
        rewritten.insert(beta.concat(&link))?;
    }
    let mut repeated = AlternativeSet::new(auxiliary, max_alternatives);
    for alpha in tails {
        let alpha = Alternative::new(alpha.to_vec());
        repeated.insert(alpha.concat(&link))?;
        repeated.insert(alpha)?;
    }

    grammar.rules_mut()[index].alternatives = rewritten.into_vec();
    grammar.push_rule(Rule {
        alternatives: repeated.into_vec(),
        ..Rule::new(auxiliary)
    });
    Ok(Some(auxiliary))
}

/// Substitute leading variables until every alternative starts with a
/// terminal.
///
/// Tagged rules go in descending tag order, so each substitution uses rules
/// that are already resolved; auxiliary rules follow in creation order.
pub fn back_substitute(grammar: &mut Grammar) -> Result<()> {
    let limit = grammar.config().max_iterations;

    let mut tagged: Vec<(usize, Variable)> = grammar
        .rules()
        .iter()
        .filter_map(|r| r.variable.order.map(|order| (order, r.variable)))
        .collect();
    tagged.sort_unstable_by(|a, b| b.0.cmp(&a.0));
    let schedule: Vec<Variable> = tagged
        .into_iter()
        .map(|(_, v)| v)
        .chain(
            grammar
                .rules()
                .iter()
                .filter(|r| r.variable.order.is_none())
                .map(|r| r.variable),
        )
        .collect();

    for _ in 0..limit {
        for variable in &schedule {
            substitute_leading(grammar, variable)?;
        }
        if !has_leading_variable(grammar) {
            grammar.refresh();
            debug!(rules = grammar.rules().len(), "back-substitution complete");
            return Ok(());
        }
    }

    Err(GrammarError::FixpointLimit {
        stage: Stage::BackSubstitution,
        limit,
    })
}

fn substitute_leading(grammar: &mut Grammar, variable: &Variable) -> Result<()> {
    let Some(index) = grammar.position(variable) else {
        return Ok(());
    };

    let mut substituted = AlternativeSet::new(*variable, grammar.config().max_alternatives);
    for alt in &grammar.rules()[index].alternatives {
        match alt.leading_variable() {
            Some(lead) => {
                if let Some(target) = grammar.rule(&lead) {
                    for prefix in &target.alternatives {
                        substituted.insert(prefix.concat(alt.suffix()))?;
                    }
                }
            }
            None => {
                substituted.insert(alt.clone())?;
            }
        }
    }
    grammar.rules_mut()[index].alternatives = substituted.into_vec();
    Ok(())
}

fn has_leading_variable(grammar: &Grammar) -> bool {
    grammar
        .rules()
        .iter()
        .flat_map(|r| r.alternatives.iter())
        .any(|alt| alt.leading_variable().is_some())
}

/// Whether every alternative is a terminal followed only by variables, or
/// epsilon on the start rule
pub fn is_greibach(grammar: &Grammar) -> bool {
    grammar.rules().iter().all(|rule| {
        rule.alternatives.iter().all(|alt| match alt.symbols() {
            [] => rule.is_start,
            [Symbol::Terminal(_), rest @ ..] => rest.iter().all(|s| !s.is_terminal()),
            _ => false,
        })
    })
}
