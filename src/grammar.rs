use indexmap::IndexSet;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::Path;
use tracing::debug;

use crate::utils::{GrammarError, OptionExt, Result};

/// The identity of a variable, independent of any ordering tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Name {
    /// A single-character name, as read from input or drawn from the letter pool
    Letter(char),
    /// A generated name, issued once the letter pool is exhausted
    Synthetic(u32),
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Name::Letter(c) => write!(f, "{}", c),
            Name::Synthetic(n) => write!(f, "<{}>", n),
        }
    }
}

/// A grammar variable (non-terminal).
///
/// `order` is only set once the GNF ordering has been assigned. Two variables
/// with the same name but different tags are different variables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Variable {
    pub name: Name,
    pub order: Option<usize>,
}

impl Variable {
    pub fn letter(c: char) -> Self {
        Variable {
            name: Name::Letter(c),
            order: None,
        }
    }

    pub fn synthetic(n: u32) -> Self {
        Variable {
            name: Name::Synthetic(n),
            order: None,
        }
    }

    /// The same variable carrying an ordering tag
    pub fn tagged(self, order: usize) -> Self {
        Variable {
            order: Some(order),
            ..self
        }
    }
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.order {
            Some(order) => write!(f, "{}[{}]", self.name, order),
            None => write!(f, "{}", self.name),
        }
    }
}

/// Represents a symbol on the right-hand side of a rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Symbol {
    /// A single terminal character
    Terminal(char),
    /// A reference to another rule
    Variable(Variable),
}

impl Symbol {
    pub fn as_variable(&self) -> Option<Variable> {
        match self {
            Symbol::Variable(v) => Some(*v),
            Symbol::Terminal(_) => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Symbol::Terminal(_))
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Symbol::Terminal(c) => write!(f, "{}", c),
            Symbol::Variable(v) => write!(f, "{}", v),
        }
    }
}

/// One right-hand-side choice of a rule. The empty sequence is epsilon.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Alternative(Vec<Symbol>);

impl Alternative {
    pub fn new(symbols: Vec<Symbol>) -> Self {
        Alternative(symbols)
    }

    pub fn epsilon() -> Self {
        Alternative(Vec::new())
    }

    pub fn is_epsilon(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn symbols(&self) -> &[Symbol] {
        &self.0
    }

    pub fn first(&self) -> Option<&Symbol> {
        self.0.first()
    }

    /// The variable this alternative starts with, if it starts with one
    pub fn leading_variable(&self) -> Option<Variable> {
        self.first().and_then(Symbol::as_variable)
    }

    /// Everything after the first symbol
    pub fn suffix(&self) -> &[Symbol] {
        self.0.get(1..).unwrap_or(&[])
    }

    /// The referenced variable if this is a unit alternative
    pub fn unit_variable(&self) -> Option<Variable> {
        match self.0.as_slice() {
            [Symbol::Variable(v)] => Some(*v),
            _ => None,
        }
    }

    pub fn variables(&self) -> impl Iterator<Item = Variable> + '_ {
        self.0.iter().filter_map(Symbol::as_variable)
    }

    /// Positions at which `variable` occurs
    pub fn occurrences(&self, variable: Variable) -> Vec<usize> {
        self.0
            .iter()
            .enumerate()
            .filter(|(_, s)| s.as_variable() == Some(variable))
            .map(|(i, _)| i)
            .collect()
    }

    /// This alternative followed by `suffix`
    pub fn concat(&self, suffix: &[Symbol]) -> Alternative {
        let mut symbols = Vec::with_capacity(self.0.len() + suffix.len());
        symbols.extend_from_slice(&self.0);
        symbols.extend_from_slice(suffix);
        Alternative(symbols)
    }

    pub fn map_variables<F: Fn(Variable) -> Variable>(&self, f: F) -> Alternative {
        Alternative(
            self.0
                .iter()
                .map(|s| match s {
                    Symbol::Variable(v) => Symbol::Variable(f(*v)),
                    terminal => *terminal,
                })
                .collect(),
        )
    }

    pub fn render(&self, epsilon: char) -> String {
        if self.is_epsilon() {
            return epsilon.to_string();
        }
        self.0.iter().map(|s| s.to_string()).collect()
    }
}

impl From<Vec<Symbol>> for Alternative {
    fn from(symbols: Vec<Symbol>) -> Self {
        Alternative(symbols)
    }
}

/// The alternatives being built for one rule, in insertion order without
/// duplicates. Fails once more than `limit` distinct alternatives are held.
#[derive(Debug, Clone)]
pub struct AlternativeSet {
    variable: Variable,
    limit: usize,
    alternatives: IndexSet<Alternative>,
}

impl AlternativeSet {
    pub fn new(variable: Variable, limit: usize) -> Self {
        AlternativeSet {
            variable,
            limit,
            alternatives: IndexSet::new(),
        }
    }

    /// Start from the current alternatives of `rule`
    pub fn for_rule(rule: &Rule, limit: usize) -> Result<Self> {
        let mut set = AlternativeSet::new(rule.variable, limit);
        set.extend(rule.alternatives.iter().cloned())?;
        Ok(set)
    }

    /// Add `alternative`; returns whether it was new
    pub fn insert(&mut self, alternative: Alternative) -> Result<bool> {
        let added = self.alternatives.insert(alternative);
        if self.alternatives.len() > self.limit {
            return Err(GrammarError::AlternativeBlowup {
                variable: self.variable,
                limit: self.limit,
            });
        }
        Ok(added)
    }

    pub fn extend<I: IntoIterator<Item = Alternative>>(&mut self, alternatives: I) -> Result<()> {
        for alternative in alternatives {
            self.insert(alternative)?;
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.alternatives.len()
    }

    pub fn is_empty(&self) -> bool {
        self.alternatives.is_empty()
    }

    pub fn into_vec(self) -> Vec<Alternative> {
        self.alternatives.into_iter().collect()
    }
}

/// A production `variable -> alt1 | alt2 | ...`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    pub variable: Variable,
    pub is_start: bool,
    pub alternatives: Vec<Alternative>,
}

impl Rule {
    pub fn new(variable: Variable) -> Self {
        Rule {
            variable,
            is_start: false,
            alternatives: Vec::new(),
        }
    }

    pub fn start(variable: Variable) -> Self {
        Rule {
            is_start: true,
            ..Rule::new(variable)
        }
    }

    pub fn with_alternative(mut self, alternative: Alternative) -> Self {
        self.add_alternative(alternative);
        self
    }

    /// Add an alternative; duplicates collapse. Returns whether it was new.
    pub fn add_alternative(&mut self, alternative: Alternative) -> bool {
        if self.alternatives.contains(&alternative) {
            return false;
        }
        self.alternatives.push(alternative);
        true
    }

    pub fn has_epsilon(&self) -> bool {
        self.alternatives.iter().any(Alternative::is_epsilon)
    }

    pub fn remove_epsilon(&mut self) -> bool {
        let before = self.alternatives.len();
        self.alternatives.retain(|a| !a.is_epsilon());
        self.alternatives.len() != before
    }

    /// Drop repeated alternatives, keeping first occurrences in order
    pub fn dedup(&mut self) {
        let mut seen = HashSet::new();
        self.alternatives.retain(|a| seen.insert(a.clone()));
    }

    pub fn sole_alternative(&self) -> Option<&Alternative> {
        match self.alternatives.as_slice() {
            [only] => Some(only),
            _ => None,
        }
    }

    pub fn render(&self, epsilon: char) -> String {
        let alternatives: Vec<String> = self
            .alternatives
            .iter()
            .map(|a| a.render(epsilon))
            .collect();
        format!("{}->{}", self.variable, alternatives.join("|"))
    }
}

/// Configuration options for parsing and normalization
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GrammarConfig {
    /// Marker for the empty alternative in input and output
    pub epsilon: char,
    /// Preferred name for a newly isolated start variable
    pub start_variable: char,
    /// Maximum number of passes any fixpoint loop may take
    pub max_iterations: usize,
    /// Maximum occurrences of one nullable variable in a single alternative
    pub max_nullable_occurrences: usize,
    /// Maximum number of alternatives one rule may grow to during a rewrite
    pub max_alternatives: usize,
    /// Maximum derivation depth when sampling words
    pub max_recursion_depth: usize,
}

impl Default for GrammarConfig {
    fn default() -> Self {
        GrammarConfig {
            epsilon: '?',
            start_variable: 'Z',
            max_iterations: 10_000,
            max_nullable_occurrences: 20,
            max_alternatives: 500_000,
            max_recursion_depth: 64,
        }
    }
}

impl GrammarConfig {
    pub fn from_json_str(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }
}

/// The variable and terminal sets derived from a rule set
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Alphabet {
    pub variables: Vec<Variable>,
    pub terminals: Vec<char>,
}

/// An ordered collection of rules. Position 0 starts out as the start rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Grammar {
    rules: Vec<Rule>,
    #[serde(default)]
    config: GrammarConfig,
}

impl Default for Grammar {
    fn default() -> Self {
        Grammar::new()
    }
}

impl Grammar {
    /// Create a new empty grammar with the default configuration
    pub fn new() -> Self {
        Grammar::with_config(GrammarConfig::default())
    }

    /// Create a new empty grammar with custom configuration
    pub fn with_config(config: GrammarConfig) -> Self {
        Grammar {
            rules: Vec::new(),
            config,
        }
    }

    /// Build a grammar from already constructed rules, as is
    pub fn from_rules(rules: Vec<Rule>, config: GrammarConfig) -> Self {
        Grammar { rules, config }
    }

    /// Parse the rule-count-prefixed input format with the default configuration
    pub fn parse(text: &str) -> Result<Self> {
        Self::parse_with_config(text, GrammarConfig::default())
    }

    /// Parse `N rule1 rule2 ... ruleN`, tokens separated by whitespace
    pub fn parse_with_config(text: &str, config: GrammarConfig) -> Result<Self> {
        let mut tokens = text.split_whitespace();
        let count_token = tokens
            .next()
            .ok_or_else(|| GrammarError::Parse("missing rule count".to_string()))?;
        let count: usize = count_token
            .parse()
            .map_err(|_| GrammarError::Parse(format!("invalid rule count `{}`", count_token)))?;

        let lines: Vec<&str> = tokens.by_ref().take(count).collect();
        if lines.len() < count {
            return Err(GrammarError::Parse(format!(
                "expected {} rules, found {}",
                count,
                lines.len()
            )));
        }

        Self::parse_rule_lines(lines, config)
    }

    /// Read the input format from any reader
    pub fn from_reader<R: Read>(mut reader: R, config: GrammarConfig) -> Result<Self> {
        let mut text = String::new();
        reader.read_to_string(&mut text)?;
        Self::parse_with_config(&text, config)
    }

    /// Parse a grammar from a file
    pub fn from_file<P: AsRef<Path>>(path: P, config: GrammarConfig) -> Result<Self> {
        let file = File::open(path)?;
        Self::from_reader(io::BufReader::new(file), config)
    }

    /// Parse `X->alt|alt` lines. Lines for the same variable accumulate and
    /// the first variable seen becomes the start.
    pub fn parse_rule_lines<'a, I>(lines: I, config: GrammarConfig) -> Result<Self>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let rule_regex =
            Regex::new(r"^(.)->(.*)$").map_err(|e| GrammarError::Parse(e.to_string()))?;

        let mut raw: Vec<(char, Vec<String>)> = Vec::new();
        for line in lines {
            let captures = rule_regex.captures(line).ok_or_else(|| {
                GrammarError::Parse(format!("expected `Variable->alternatives`, found `{}`", line))
            })?;
            let head = captures[1]
                .chars()
                .next()
                .ok_or_else(|| GrammarError::Parse(format!("missing variable in `{}`", line)))?;
            if head == config.epsilon {
                return Err(GrammarError::Parse(format!(
                    "the epsilon marker `{}` cannot name a variable",
                    head
                )));
            }

            let alternatives = captures[2]
                .split('|')
                .filter(|alt| !alt.is_empty())
                .map(str::to_string);
            match raw.iter_mut().find(|(v, _)| *v == head) {
                Some((_, existing)) => existing.extend(alternatives),
                None => raw.push((head, alternatives.collect())),
            }
        }

        // A symbol is a variable exactly when some rule defines it
        let heads: HashSet<char> = raw.iter().map(|(v, _)| *v).collect();
        let epsilon = config.epsilon.to_string();
        let mut grammar = Grammar::with_config(config);
        for (index, (head, alternatives)) in raw.into_iter().enumerate() {
            let mut rule = Rule::new(Variable::letter(head));
            rule.is_start = index == 0;
            for alt in alternatives {
                if alt == epsilon {
                    rule.add_alternative(Alternative::epsilon());
                    continue;
                }
                let symbols = alt
                    .chars()
                    .filter(|c| *c != grammar.config.epsilon)
                    .map(|c| {
                        if heads.contains(&c) {
                            Symbol::Variable(Variable::letter(c))
                        } else {
                            Symbol::Terminal(c)
                        }
                    })
                    .collect();
                rule.add_alternative(Alternative::new(symbols));
            }
            grammar.rules.push(rule);
        }

        if grammar.rules.is_empty() {
            return Err(GrammarError::InvalidGrammar(
                "grammar has no rules".to_string(),
            ));
        }

        grammar.refresh();
        debug!(rules = grammar.rules.len(), "parsed grammar");
        Ok(grammar)
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn rules_mut(&mut self) -> &mut Vec<Rule> {
        &mut self.rules
    }

    pub fn push_rule(&mut self, rule: Rule) {
        self.rules.push(rule);
    }

    pub fn insert_rule(&mut self, index: usize, rule: Rule) {
        self.rules.insert(index, rule);
    }

    pub fn start_rule(&self) -> Result<&Rule> {
        self.rules
            .iter()
            .find(|r| r.is_start)
            .ok_or_grammar_err(|| "grammar has no start rule".to_string())
    }

    pub fn start_variable(&self) -> Result<Variable> {
        self.start_rule().map(|r| r.variable)
    }

    pub fn rule(&self, variable: &Variable) -> Option<&Rule> {
        self.rules.iter().find(|r| r.variable == *variable)
    }

    pub fn rule_mut(&mut self, variable: &Variable) -> Option<&mut Rule> {
        self.rules.iter_mut().find(|r| r.variable == *variable)
    }

    pub fn position(&self, variable: &Variable) -> Option<usize> {
        self.rules.iter().position(|r| r.variable == *variable)
    }

    /// Variables (all left-hand sides) and terminals (every other symbol),
    /// both in first-seen order
    pub fn alphabet(&self) -> Alphabet {
        let variables: Vec<Variable> = self.rules.iter().map(|r| r.variable).collect();
        let mut terminals = Vec::new();
        for rule in &self.rules {
            for alt in &rule.alternatives {
                for symbol in alt.symbols() {
                    if let Symbol::Terminal(c) = symbol {
                        if !terminals.contains(c) {
                            terminals.push(*c);
                        }
                    }
                }
            }
        }
        Alphabet {
            variables,
            terminals,
        }
    }

    pub fn variables(&self) -> Vec<Variable> {
        self.alphabet().variables
    }

    pub fn terminals(&self) -> Vec<char> {
        self.alphabet().terminals
    }

    /// Variables reachable from the start variable through right-hand sides
    pub fn reachable_variables(&self) -> HashSet<Variable> {
        let Some(start) = self.rules.iter().find(|r| r.is_start).map(|r| r.variable) else {
            return HashSet::new();
        };

        let mut reached = HashSet::from([start]);
        let mut stack = vec![start];
        while let Some(variable) = stack.pop() {
            if let Some(rule) = self.rule(&variable) {
                for alt in &rule.alternatives {
                    for next in alt.variables() {
                        if reached.insert(next) {
                            stack.push(next);
                        }
                    }
                }
            }
        }
        reached
    }

    /// Remove rules the start variable cannot reach. Returns how many went.
    pub fn prune_unreachable(&mut self) -> usize {
        let reached = self.reachable_variables();
        let before = self.rules.len();
        self.rules.retain(|r| reached.contains(&r.variable));
        before - self.rules.len()
    }

    /// Restore the structural invariants after a rewrite.
    ///
    /// Collapses duplicate alternatives, drops non-start rules left without
    /// alternatives along with every alternative that still references them,
    /// then prunes unreachable rules.
    pub fn refresh(&mut self) {
        loop {
            for rule in &mut self.rules {
                rule.dedup();
            }
            let before = self.size();

            self.rules
                .retain(|r| r.is_start || !r.alternatives.is_empty());
            let defined: HashSet<Variable> = self.rules.iter().map(|r| r.variable).collect();
            for rule in &mut self.rules {
                rule.alternatives
                    .retain(|alt| alt.variables().all(|v| defined.contains(&v)));
            }

            if self.size() == before {
                break;
            }
        }
        self.prune_unreachable();
    }

    fn size(&self) -> (usize, usize) {
        (
            self.rules.len(),
            self.rules.iter().map(|r| r.alternatives.len()).sum(),
        )
    }

    /// Every name currently in use, counting terminals as letters
    pub fn names_in_use(&self) -> HashSet<Name> {
        let mut names = HashSet::new();
        for rule in &self.rules {
            names.insert(rule.variable.name);
            for alt in &rule.alternatives {
                for symbol in alt.symbols() {
                    match symbol {
                        Symbol::Terminal(c) => names.insert(Name::Letter(*c)),
                        Symbol::Variable(v) => names.insert(v.name),
                    };
                }
            }
        }
        names
    }

    /// A copy with every variable, on either side, renamed through `f`
    pub fn map_variables<F: Fn(Variable) -> Variable>(&self, f: F) -> Grammar {
        let rules = self
            .rules
            .iter()
            .map(|rule| Rule {
                variable: f(rule.variable),
                is_start: rule.is_start,
                alternatives: rule
                    .alternatives
                    .iter()
                    .map(|alt| alt.map_variables(&f))
                    .collect(),
            })
            .collect();
        Grammar {
            rules,
            config: self.config.clone(),
        }
    }

    /// Get a reference to the grammar's configuration
    pub fn config(&self) -> &GrammarConfig {
        &self.config
    }
}

impl fmt::Display for Grammar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for rule in &self.rules {
            writeln!(f, "{}", rule.render(self.config.epsilon))?;
        }
        Ok(())
    }
}

/// Builder for constructing Grammar instances from rule lines
pub struct GrammarBuilder {
    lines: Vec<String>,
    config: GrammarConfig,
}

impl Default for GrammarBuilder {
    fn default() -> Self {
        GrammarBuilder::new()
    }
}

impl GrammarBuilder {
    /// Create a new grammar builder with default config
    pub fn new() -> Self {
        GrammarBuilder {
            lines: Vec::new(),
            config: GrammarConfig::default(),
        }
    }

    /// Set the configuration
    pub fn config(mut self, config: GrammarConfig) -> Self {
        self.config = config;
        self
    }

    /// Add a `X->alt|alt` rule line
    pub fn rule(mut self, line: &str) -> Self {
        self.lines.push(line.to_string());
        self
    }

    /// Build the grammar
    pub fn build(self) -> Result<Grammar> {
        Grammar::parse_rule_lines(self.lines.iter().map(String::as_str), self.config)
    }
}
