//! Issues variable names that are not yet used anywhere in a grammar.
//!
//! Names come from the uppercase letters first. Once those run out the
//! allocator switches to synthetic names, so it never fails.

use std::collections::{HashMap, HashSet, VecDeque};
use tracing::trace;

use crate::grammar::{Alternative, Grammar, Name, Rule, Variable};

#[derive(Debug, Clone)]
pub struct FreshNames {
    pool: VecDeque<char>,
    used: HashSet<Name>,
    next_synthetic: u32,
    fragments: HashMap<Alternative, Variable>,
}

impl FreshNames {
    /// An allocator avoiding every name (and terminal character) in `grammar`
    pub fn for_grammar(grammar: &Grammar) -> Self {
        Self::avoiding(grammar.names_in_use())
    }

    pub fn avoiding(used: HashSet<Name>) -> Self {
        let pool = ('A'..='Z')
            .filter(|c| !used.contains(&Name::Letter(*c)))
            .collect();
        let next_synthetic = used
            .iter()
            .filter_map(|name| match name {
                Name::Synthetic(n) => Some(n + 1),
                Name::Letter(_) => None,
            })
            .max()
            .unwrap_or(1);
        FreshNames {
            pool,
            used,
            next_synthetic,
            fragments: HashMap::new(),
        }
    }

    pub fn allocate(&mut self) -> Variable {
        while let Some(c) = self.pool.pop_front() {
            if self.used.insert(Name::Letter(c)) {
                return Variable::letter(c);
            }
        }
        loop {
            let name = Name::Synthetic(self.next_synthetic);
            self.next_synthetic += 1;
            if self.used.insert(name) {
                return Variable {
                    name,
                    order: None,
                };
            }
        }
    }

    /// The variable standing for `fragment`.
    ///
    /// Reuses a variable already allocated for an identical fragment, or an
    /// existing non-start rule whose only alternative is `fragment`. Otherwise
    /// allocates a new variable and queues its defining rule on `pending`.
    pub fn fragment_variable(
        &mut self,
        fragment: &Alternative,
        existing: &[Rule],
        pending: &mut Vec<Rule>,
    ) -> Variable {
        if let Some(variable) = self.fragments.get(fragment) {
            return *variable;
        }

        let found = existing
            .iter()
            .chain(pending.iter())
            .find(|r| !r.is_start && r.sole_alternative() == Some(fragment))
            .map(|r| r.variable);
        let variable = match found {
            Some(variable) => variable,
            None => {
                let variable = self.allocate();
                trace!(%variable, "allocated variable for fragment");
                pending.push(Rule::new(variable).with_alternative(fragment.clone()));
                variable
            }
        };
        self.fragments.insert(fragment.clone(), variable);
        variable
    }
}
