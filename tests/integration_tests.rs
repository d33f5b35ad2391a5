use grammar_norm::cnf::{is_chomsky, to_cnf};
use grammar_norm::gnf::{is_greibach, to_gnf};
use grammar_norm::language::words_up_to;
use grammar_norm::{
    normalize, DumpObserver, Grammar, GrammarBuilder, GrammarConfig, GrammarError, NoopObserver,
    RecordingObserver, Stage, Symbol, Variable,
};
use pretty_assertions::assert_eq;
use std::collections::HashSet;
use std::io::Write;
use tempfile::NamedTempFile;

const GRAMMARS: &[&str] = &[
    "1 S->aSb|ab",
    "3 S->AB A->a|? B->b",
    "2 S->A A->a|b",
    "1 S->abcd",
    "1 S->aSbS|?",
    "3 E->E+T|T T->T*F|F F->(E)|a",
    "3 S->aA|B A->B|? B->A|b",
    "2 S->SS|a S->(S)",
    "4 S->ASB|? A->aAS|a B->SbS|A|bb",
];

fn alternatives(grammar: &Grammar, variable: char) -> HashSet<String> {
    grammar
        .rule(&Variable::letter(variable))
        .unwrap()
        .alternatives
        .iter()
        .map(|a| a.render('?'))
        .collect()
}

fn set(items: &[&str]) -> HashSet<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[test]
fn test_scenario_anbn() {
    let grammar = Grammar::parse("1 S->aSb|ab").unwrap();
    let normalized = normalize(grammar, &mut NoopObserver).unwrap();

    for rule in normalized.cnf.rules() {
        assert!(rule.alternatives.iter().all(|a| a.len() <= 2));
    }
    let words: Vec<String> = words_up_to(&normalized.cnf, 8).into_iter().collect();
    assert_eq!(words, vec!["aaaabbbb", "aaabbb", "aabb", "ab"]);

    assert!(is_greibach(&normalized.gnf));
    let start = normalized.gnf.start_rule().unwrap();
    for alt in &start.alternatives {
        assert_eq!(alt.first(), Some(&Symbol::Terminal('a')), "{}", normalized.gnf);
    }
}

#[test]
fn test_scenario_null_elimination() {
    let mut grammar = Grammar::parse("3 S->AB A->a|? B->b").unwrap();
    let mut recorder = RecordingObserver::new();
    to_cnf(&mut grammar, &mut recorder).unwrap();

    let after = recorder.after(Stage::NullElimination).unwrap();
    assert_eq!(alternatives(after, 'S'), set(&["AB", "B"]));
    assert_eq!(alternatives(after, 'A'), set(&["a"]));
}

#[test]
fn test_scenario_unit_elimination() {
    let mut grammar = Grammar::parse("2 S->A A->a|b").unwrap();
    let mut recorder = RecordingObserver::new();
    to_cnf(&mut grammar, &mut recorder).unwrap();

    let after = recorder.after(Stage::UnitElimination).unwrap();
    assert_eq!(alternatives(after, 'S'), set(&["a", "b"]));
    for rule in after.rules() {
        assert!(rule.alternatives.iter().all(|a| a.unit_variable().is_none()));
    }
}

#[test]
fn test_scenario_binarization() {
    let mut grammar = Grammar::parse("1 S->abcd").unwrap();
    let mut recorder = RecordingObserver::new();
    to_cnf(&mut grammar, &mut recorder).unwrap();

    let after = recorder.after(Stage::Binarization).unwrap();
    assert_eq!(after.rules().len(), 3);
    let fresh: Vec<Variable> = after
        .rules()
        .iter()
        .filter(|r| !r.is_start)
        .map(|r| r.variable)
        .collect();
    assert_eq!(fresh.len(), 2);
    for rule in after.rules() {
        assert!(rule.alternatives.iter().all(|a| a.len() == 2));
    }
    assert!(is_chomsky(&grammar));
}

#[test]
fn test_language_preserved() {
    for input in GRAMMARS {
        let grammar = Grammar::parse(input).unwrap();
        let normalized = normalize(grammar.clone(), &mut NoopObserver).unwrap();

        for max_len in [0, 1, 3, 5] {
            let expected = words_up_to(&grammar, max_len);
            assert_eq!(words_up_to(&normalized.cnf, max_len), expected, "CNF of {}", input);
            assert_eq!(words_up_to(&normalized.gnf, max_len), expected, "GNF of {}", input);
        }
    }
}

#[test]
fn test_output_shapes() {
    for input in GRAMMARS {
        let normalized = normalize(Grammar::parse(input).unwrap(), &mut NoopObserver).unwrap();
        assert!(is_chomsky(&normalized.cnf), "{} -> {}", input, normalized.cnf);
        assert!(is_greibach(&normalized.gnf), "{} -> {}", input, normalized.gnf);
    }
}

#[test]
fn test_invariants_after_every_stage() {
    for input in GRAMMARS {
        let mut recorder = RecordingObserver::new();
        normalize(Grammar::parse(input).unwrap(), &mut recorder).unwrap();

        let stages: Vec<Stage> = recorder.snapshots().iter().map(|(s, _)| *s).collect();
        assert_eq!(stages, Stage::ALL.to_vec());

        for (stage, grammar) in recorder.snapshots() {
            let context = format!("{} after {}:\n{}", input, stage, grammar);
            assert_eq!(
                grammar.rules().iter().filter(|r| r.is_start).count(),
                1,
                "{}",
                context
            );

            // Every referenced variable has a rule, every rule is reachable
            let defined: HashSet<Variable> = grammar.variables().into_iter().collect();
            for rule in grammar.rules() {
                for alt in &rule.alternatives {
                    assert!(alt.variables().all(|v| defined.contains(&v)), "{}", context);
                }
            }
            assert_eq!(grammar.reachable_variables(), defined, "{}", context);

            // Only the start rule may keep epsilon once nulls are gone
            if *stage != Stage::StartIsolation {
                for rule in grammar.rules().iter().filter(|r| !r.is_start) {
                    assert!(!rule.has_epsilon(), "{}", context);
                }
            }
        }
    }
}

#[test]
fn test_start_never_referenced_after_cnf() {
    for input in GRAMMARS {
        let normalized = normalize(Grammar::parse(input).unwrap(), &mut NoopObserver).unwrap();
        let start = normalized.gnf.start_variable().unwrap();
        for rule in normalized.gnf.rules() {
            for alt in &rule.alternatives {
                assert!(alt.variables().all(|v| v != start), "{}", normalized.gnf);
            }
        }
    }
}

#[test]
fn test_load_from_file() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "3").unwrap();
    writeln!(file, "S->aA").unwrap();
    writeln!(file, "A->b|?").unwrap();
    writeln!(file, "S->c").unwrap();

    let grammar = Grammar::from_file(file.path(), GrammarConfig::default()).unwrap();
    assert_eq!(format!("{}", grammar), "S->aA|c\nA->b|?\n");
}

#[test]
fn test_missing_file() {
    let result = Grammar::from_file("/nonexistent/grammar.txt", GrammarConfig::default());
    assert!(matches!(result, Err(GrammarError::Io(_))));
}

#[test]
fn test_config_file() {
    let mut file = NamedTempFile::new().unwrap();
    write!(file, r#"{{"epsilon": "e", "start_variable": "Y"}}"#).unwrap();
    let config = GrammarConfig::from_json_file(file.path()).unwrap();

    let grammar = Grammar::parse_with_config("1 S->aSb|e", config).unwrap();
    let normalized = normalize(grammar, &mut NoopObserver).unwrap();

    let start = normalized.cnf.start_rule().unwrap();
    assert_eq!(start.variable, Variable::letter('Y'));
    assert!(start.has_epsilon());
    let rendered = normalized.gnf.start_rule().unwrap().render('e');
    assert!(rendered.starts_with("Y[0]->"), "{}", rendered);
    assert!(rendered["Y[0]->".len()..].split('|').any(|alt| alt == "e"));
}

#[test]
fn test_fixpoint_limit() {
    let config = GrammarConfig {
        max_iterations: 1,
        ..GrammarConfig::default()
    };
    let grammar = Grammar::parse_with_config("1 S->abcd", config).unwrap();
    let result = normalize(grammar, &mut NoopObserver);
    assert!(matches!(
        result,
        Err(GrammarError::FixpointLimit {
            stage: Stage::Binarization,
            limit: 1
        })
    ));
}

#[test]
fn test_checkpoint_dump() {
    let grammar = Grammar::parse("1 S->ab").unwrap();
    let mut dump = DumpObserver::new(Vec::new());
    normalize(grammar, &mut dump).unwrap();

    let text = String::from_utf8(dump.into_inner()).unwrap();
    let blocks: Vec<&str> = text.split("\n\n").filter(|b| !b.is_empty()).collect();
    assert_eq!(
        blocks,
        vec![
            "S->AB\nA->a\nB->b",
            "S[0]->A[1]B[2]\nA[1]->a\nB[2]->b",
            "S[0]->A[1]B[2]\nA[1]->a\nB[2]->b",
            "S[0]->aB[2]\nB[2]->b",
        ]
    );
}

#[test]
fn test_many_fresh_variables() {
    // Binarizing 30 distinct tails exhausts the letter pool
    let alternatives: Vec<String> = (0..30)
        .map(|i| {
            let c = char::from_u32('a' as u32 + (i % 26)).unwrap();
            let d = char::from_u32('0' as u32 + (i / 26)).unwrap();
            format!("x{}{}y", c, d)
        })
        .collect();
    let grammar = GrammarBuilder::new()
        .rule(&format!("S->{}", alternatives.join("|")))
        .build()
        .unwrap();

    let normalized = normalize(grammar.clone(), &mut NoopObserver).unwrap();
    assert!(is_chomsky(&normalized.cnf));
    assert!(is_greibach(&normalized.gnf));
    assert!(format!("{}", normalized.cnf).contains('<'));
    assert_eq!(words_up_to(&normalized.gnf, 4), words_up_to(&grammar, 4));
}

#[test]
fn test_gnf_rejects_unnormalized_input() {
    let grammar = Grammar::parse("2 S->A A->a").unwrap();
    assert!(matches!(
        to_gnf(&grammar, &mut NoopObserver),
        Err(GrammarError::InvalidGrammar(_))
    ));
}
