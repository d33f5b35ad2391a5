//! Bounded views of the language a grammar generates, used to check that the
//! normal-form conversions preserve it.

use rand::Rng;
use std::collections::{BTreeSet, HashMap};

use crate::grammar::{Alternative, Grammar, Symbol, Variable};

/// Every word of at most `max_len` characters the grammar derives.
///
/// Computed as a least fixpoint over per-variable word sets, so it also
/// terminates for left-recursive and cyclic grammars. The sets grow with the
/// alphabet size to the power `max_len`; keep `max_len` small.
pub fn words_up_to(grammar: &Grammar, max_len: usize) -> BTreeSet<String> {
    let mut words: HashMap<Variable, BTreeSet<String>> = grammar
        .rules()
        .iter()
        .map(|r| (r.variable, BTreeSet::new()))
        .collect();

    loop {
        let mut changed = false;
        for rule in grammar.rules() {
            let mut found = BTreeSet::new();
            for alt in &rule.alternatives {
                found.extend(expand_alternative(alt, &words, max_len));
            }
            let known = words.entry(rule.variable).or_default();
            let before = known.len();
            known.extend(found);
            changed |= known.len() != before;
        }
        if !changed {
            break;
        }
    }

    grammar
        .start_variable()
        .ok()
        .and_then(|start| words.remove(&start))
        .unwrap_or_default()
}

fn expand_alternative(
    alt: &Alternative,
    words: &HashMap<Variable, BTreeSet<String>>,
    max_len: usize,
) -> BTreeSet<String> {
    let mut partial = BTreeSet::from([String::new()]);
    for symbol in alt.symbols() {
        let mut next = BTreeSet::new();
        for prefix in &partial {
            let prefix_len = prefix.chars().count();
            match symbol {
                Symbol::Terminal(c) => {
                    if prefix_len < max_len {
                        let mut word = prefix.clone();
                        word.push(*c);
                        next.insert(word);
                    }
                }
                Symbol::Variable(v) => {
                    let Some(known) = words.get(v) else { continue };
                    for suffix in known {
                        if prefix_len + suffix.chars().count() <= max_len {
                            next.insert(format!("{}{}", prefix, suffix));
                        }
                    }
                }
            }
        }
        partial = next;
        if partial.is_empty() {
            break;
        }
    }
    partial
}

/// Derive one random word from the start variable.
///
/// Returns `None` when the derivation nests deeper than
/// `max_recursion_depth` or reaches a variable without a rule.
pub fn sample<R: Rng>(grammar: &Grammar, rng: &mut R) -> Option<String> {
    let start = grammar.start_variable().ok()?;
    let mut word = String::new();
    expand_variable(grammar, start, 0, rng, &mut word)?;
    Some(word)
}

fn expand_variable<R: Rng>(
    grammar: &Grammar,
    variable: Variable,
    depth: usize,
    rng: &mut R,
    word: &mut String,
) -> Option<()> {
    if depth >= grammar.config().max_recursion_depth {
        return None;
    }

    let rule = grammar.rule(&variable)?;
    if rule.alternatives.is_empty() {
        return None;
    }
    let alt = &rule.alternatives[rng.gen_range(0..rule.alternatives.len())];
    for symbol in alt.symbols() {
        match symbol {
            Symbol::Terminal(c) => word.push(*c),
            Symbol::Variable(v) => expand_variable(grammar, *v, depth + 1, rng, word)?,
        }
    }
    Some(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn words(input: &str, max_len: usize) -> Vec<String> {
        words_up_to(&Grammar::parse(input).unwrap(), max_len)
            .into_iter()
            .collect()
    }

    #[test]
    fn test_words_up_to() {
        assert_eq!(words("1 S->aSb|ab", 6), vec!["aaabbb", "aabb", "ab"]);
        assert_eq!(words("1 S->aSb|ab", 3), vec!["ab"]);
    }

    #[test]
    fn test_words_include_empty_word() {
        assert_eq!(words("1 S->aSbS|?", 2), vec!["", "ab"]);
    }

    #[test]
    fn test_words_left_recursive() {
        assert_eq!(words("1 S->Sa|b", 3), vec!["b", "ba", "baa"]);
    }

    #[test]
    fn test_words_skip_unproductive_alternatives() {
        assert_eq!(words("2 S->a|A A->aA", 5), vec!["a"]);
    }

    #[test]
    fn test_sample_finite_language() {
        let grammar = Grammar::parse("2 S->aA|b A->c").unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..20 {
            let word = sample(&grammar, &mut rng).unwrap();
            assert!(word == "ac" || word == "b", "{}", word);
        }
    }

    #[test]
    fn test_sample_words_belong_to_language() {
        let grammar = Grammar::parse("1 S->aSb|ab").unwrap();
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..20 {
            if let Some(word) = sample(&grammar, &mut rng) {
                let n = word.len() / 2;
                assert_eq!(word, format!("{}{}", "a".repeat(n), "b".repeat(n)));
            }
        }
    }

    #[test]
    fn test_sample_depth_limit() {
        let grammar = Grammar::parse("1 S->aS").unwrap();
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(sample(&grammar, &mut rng), None);
    }
}
