//! Interactive facade
//!
//! [`Interp`] bundles a fact database and a rule program behind the small
//! set of commands an exploratory session needs: load source files by
//! extension, list rules and facts, inspect a compiled function, and run
//! queries by symbol.
//!
//! File routing by extension:
//! - `.cfacts` — tab-separated fact lines;
//! - `.tlog` — plain rules;
//! - `.ppr` — weighted rules (`{f}` features); loading any `.ppr` file
//!   switches the program to weighted mode with uniform initial weights.

use std::collections::HashMap;
use std::path::Path;

use tracing::info;

use crate::db::MatrixDb;
use crate::dsl::{ModeDeclaration, RuleCollection, WEIGHTED_FUNCTOR};
use crate::program::Program;
use crate::{Result, TensorLogError};

pub struct Interp {
    prog: Program,
}

impl Interp {
    pub fn new(prog: Program) -> Self {
        Self { prog }
    }

    /// Build from in-memory rule and fact text.
    pub fn from_sources(rules_src: &str, facts_src: &str, weighted: bool) -> Result<Self> {
        let mut db = MatrixDb::new();
        db.load_fact_lines(facts_src)?;
        let rules = RuleCollection::parse(rules_src)?;
        let mut prog = if weighted {
            Program::proppr(db, rules)?
        } else {
            Program::new(db, rules)
        };
        if weighted && !prog.db().contains(WEIGHTED_FUNCTOR, 1) {
            let uniform = prog.db().ones();
            prog.set_weights(&uniform)?;
        }
        Ok(Self { prog })
    }

    /// Load a set of source files, routed by extension.
    pub fn load<P: AsRef<Path>>(paths: &[P]) -> Result<Self> {
        let mut rules_src = String::new();
        let mut facts_src = String::new();
        let mut weighted = false;
        for path in paths {
            let path = path.as_ref();
            let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
            let text = std::fs::read_to_string(path)?;
            match ext {
                "cfacts" => facts_src.push_str(&text),
                "tlog" => {
                    rules_src.push_str(&text);
                    rules_src.push('\n');
                }
                "ppr" => {
                    weighted = true;
                    rules_src.push_str(&text);
                    rules_src.push('\n');
                }
                _ => {
                    return Err(TensorLogError::Parse(format!(
                        "unrecognized source file '{}' (expected .ppr, .tlog or .cfacts)",
                        path.display()
                    )))
                }
            }
            info!(path = %path.display(), "loaded");
        }
        Self::from_sources(&rules_src, &facts_src, weighted)
    }

    pub fn program(&self) -> &Program {
        &self.prog
    }

    pub fn program_mut(&mut self) -> &mut Program {
        &mut self.prog
    }

    /// All rules, one line per clause.
    pub fn list_rules(&self) -> Vec<String> {
        self.prog.rules().listing()
    }

    /// All facts, one tab-separated line each.
    pub fn list_facts(&self) -> Vec<String> {
        self.prog.db().listing()
    }

    /// Compile a mode and render its function, one line per node.
    pub fn list_function(&mut self, mode_spec: &str) -> Result<Vec<String>> {
        let mode = ModeDeclaration::parse(mode_spec)?;
        let id = self.prog.compile(&mode)?;
        Ok(self.prog.function_listing(id))
    }

    /// Run one query: evaluate `mode_spec` on `symbol` and return the
    /// result distribution.
    pub fn eval(&mut self, mode_spec: &str, symbol: &str) -> Result<HashMap<String, f32>> {
        let mode = ModeDeclaration::parse(mode_spec)?;
        self.prog.eval_symbols(&mode, &[symbol])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FACTS: &str = "parent\tjoe\tsue\nparent\tjoe\tbob\nparent\tsue\tkim\n";

    #[test]
    fn test_from_sources_and_eval() {
        let mut interp = Interp::from_sources(
            "grandparent(X,Y) :- parent(X,Z), parent(Z,Y).",
            FACTS,
            false,
        )
        .unwrap();
        let out = interp.eval("grandparent(i,o)", "joe").unwrap();
        // kim is the only grandchild; everything else gets smoothing-level mass
        let kim = out.get("kim").copied().unwrap();
        let bob = out.get("bob").copied().unwrap();
        assert!(kim > bob);
    }

    #[test]
    fn test_listings() {
        let mut interp = Interp::from_sources(
            "grandparent(X,Y) :- parent(X,Z), parent(Z,Y).",
            FACTS,
            false,
        )
        .unwrap();
        assert_eq!(interp.list_rules().len(), 1);
        assert_eq!(interp.list_facts().len(), 3);
        let listing = interp.list_function("grandparent(i,o)").unwrap();
        assert_eq!(listing[0], "softmax");
        assert!(listing[1].contains("opseq"));
    }

    #[test]
    fn test_weighted_sources_get_uniform_weights() {
        let mut facts = String::from(FACTS);
        facts.push_str("f1\tf1\n"); // intern the feature symbol
        let interp =
            Interp::from_sources("kin(X,Y) :- parent(X,Y) {f1}.", &facts, true).unwrap();
        assert!(interp.program().db().contains(WEIGHTED_FUNCTOR, 1));
        assert_eq!(interp.program().db().params().len(), 1);
    }

    #[test]
    fn test_load_rejects_unknown_extension() {
        let dir = std::env::temp_dir().join("tensorlog-interp-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("rules.txt");
        std::fs::write(&path, "p(X,Y) :- q(X,Y).").unwrap();
        assert!(Interp::load(&[&path]).is_err());
    }
}
