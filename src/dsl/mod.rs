//! Rule and mode data model
//!
//! The in-memory representation consumed by the mode compiler:
//!
//! - [`ModeDeclaration`]: a predicate-call pattern (`p(i,o)`) usable as a
//!   map key — functor, arity, and per-argument input/output direction.
//! - [`Term`], [`Goal`], [`Rule`]: one clause `head :- body {feature}.`
//! - [`RuleCollection`]: rules indexed by `(functor, arity)`, preserving
//!   definition order (the order clause contributions are summed in).

pub mod parser;

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{Result, TensorLogError};

// =============================================================================
// MODE DECLARATIONS
// =============================================================================

/// Direction of one argument position in a mode declaration
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum ArgMode {
    /// Bound at call time (`i`)
    In,
    /// Produced by evaluation (`o`)
    Out,
}

impl fmt::Display for ArgMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgMode::In => write!(f, "i"),
            ArgMode::Out => write!(f, "o"),
        }
    }
}

/// Identity of a predicate-call pattern: functor, arity and per-argument
/// direction.
///
/// Two declarations are equal iff they denote the same predicate, arity and
/// direction pattern; `Ord` gives the deterministic ordering the
/// cross-compiler uses for its matrix argument list.
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct ModeDeclaration {
    functor: String,
    args: Vec<ArgMode>,
}

impl ModeDeclaration {
    pub fn new(functor: impl Into<String>, args: Vec<ArgMode>) -> Self {
        Self {
            functor: functor.into(),
            args,
        }
    }

    /// Parse a mode spec such as `p(i,o)`.
    pub fn parse(spec: &str) -> Result<Self> {
        parser::parse_mode(spec)
    }

    pub fn functor(&self) -> &str {
        &self.functor
    }

    pub fn arity(&self) -> usize {
        self.args.len()
    }

    pub fn arg(&self, i: usize) -> ArgMode {
        self.args[i]
    }

    pub fn is_input(&self, i: usize) -> bool {
        self.args[i] == ArgMode::In
    }

    /// Number of input argument positions
    pub fn input_arity(&self) -> usize {
        self.args.iter().filter(|a| **a == ArgMode::In).count()
    }
}

impl fmt::Display for ModeDeclaration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.functor)?;
        for (i, a) in self.args.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{}", a)?;
        }
        write!(f, ")")
    }
}

// =============================================================================
// TERMS, GOALS, RULES
// =============================================================================

/// An argument of a goal: a logic variable or an entity constant
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Term {
    /// Variable (uppercase start, e.g. `X`)
    Variable(String),
    /// Entity constant (lowercase start, e.g. `joe`)
    Constant(String),
}

impl Term {
    pub fn as_variable(&self) -> Option<&str> {
        match self {
            Term::Variable(v) => Some(v),
            Term::Constant(_) => None,
        }
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Term::Variable(v) => write!(f, "{}", v),
            Term::Constant(c) => write!(f, "{}", c),
        }
    }
}

/// One predicate application, `functor(arg1, ..., argN)`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Goal {
    pub functor: String,
    pub args: Vec<Term>,
}

impl Goal {
    pub fn new(functor: impl Into<String>, args: Vec<Term>) -> Self {
        Self {
            functor: functor.into(),
            args,
        }
    }

    pub fn arity(&self) -> usize {
        self.args.len()
    }
}

impl fmt::Display for Goal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.functor)?;
        for (i, a) in self.args.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{}", a)?;
        }
        write!(f, ")")
    }
}

/// One clause: `lhs :- rhs {features}.`
///
/// `features` is weighted-rule syntactic sugar: `{f}` attaches a learnable
/// weight named `f` to the clause, and the generator form
/// `{all(F) :- goals}` binds `F` per derivation through the generator
/// goals in `findall`. [`move_features_to_rhs`] rewrites both into
/// ordinary body goals against the `weighted/1` parameter predicate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    pub lhs: Goal,
    pub rhs: Vec<Goal>,
    pub features: Vec<Goal>,
    pub findall: Vec<Goal>,
}

impl Rule {
    pub fn new(lhs: Goal, rhs: Vec<Goal>) -> Self {
        Self {
            lhs,
            rhs,
            features: Vec::new(),
            findall: Vec::new(),
        }
    }

    pub fn with_features(mut self, features: Vec<Goal>) -> Self {
        self.features = features;
        self
    }

    pub fn with_findall(mut self, findall: Vec<Goal>) -> Self {
        self.findall = findall;
        self
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} :- ", self.lhs)?;
        for (i, g) in self.rhs.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{}", g)?;
        }
        if !self.features.is_empty() {
            write!(f, " {{")?;
            for (i, g) in self.features.iter().enumerate() {
                if i > 0 {
                    write!(f, ",")?;
                }
                write!(f, "{}", g)?;
            }
            if !self.findall.is_empty() {
                write!(f, " :- ")?;
                for (i, g) in self.findall.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{}", g)?;
                }
            }
            write!(f, "}}")?;
        }
        write!(f, ".")
    }
}

// =============================================================================
// RULE COLLECTION
// =============================================================================

/// Rules indexed by `(functor, arity)`, in definition order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleCollection {
    index: HashMap<(String, usize), Vec<Rule>>,
    order: Vec<(String, usize)>,
}

impl RuleCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a rule program from text.
    pub fn parse(source: &str) -> Result<Self> {
        parser::parse_rules(source)
    }

    pub fn add(&mut self, rule: Rule) {
        let key = (rule.lhs.functor.clone(), rule.lhs.arity());
        let entry = self.index.entry(key.clone()).or_default();
        if entry.is_empty() {
            self.order.push(key);
        }
        entry.push(rule);
    }

    /// The rules whose head matches the given mode's functor and arity,
    /// in definition order. Empty slice when the predicate is undefined.
    pub fn rules_for(&self, mode: &ModeDeclaration) -> &[Rule] {
        self.index
            .get(&(mode.functor().to_string(), mode.arity()))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Whether any rule defines `functor/arity`.
    pub fn defines(&self, functor: &str, arity: usize) -> bool {
        self.index.contains_key(&(functor.to_string(), arity))
    }

    /// Apply a fallible rewrite to every rule in place.
    pub fn map_rules<F>(&mut self, mut f: F) -> Result<()>
    where
        F: FnMut(&Rule) -> Result<Rule>,
    {
        for rules in self.index.values_mut() {
            for rule in rules.iter_mut() {
                *rule = f(rule)?;
            }
        }
        Ok(())
    }

    /// All rules, grouped by predicate in first-definition order.
    pub fn listing(&self) -> Vec<String> {
        let mut out = Vec::new();
        for key in &self.order {
            for rule in &self.index[key] {
                out.push(rule.to_string());
            }
        }
        out
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}

// =============================================================================
// WEIGHTED-RULE SUGAR
// =============================================================================

/// Functor of the reserved parameter predicate holding per-feature weights.
pub const WEIGHTED_FUNCTOR: &str = "weighted";

/// Functor of the constant-binding pseudo-goal `assign(V, c)`.
pub const ASSIGN_FUNCTOR: &str = "assign";

/// Rewrite a feature annotation into body goals.
///
/// The constant form `p(X,Y) :- q(X,Y) {f}.` becomes
/// `p(X,Y) :- q(X,Y), assign(Wf, f), weighted(Wf).`
///
/// The generator form `p(X,Y) :- q(X,Y) {all(F) :- r(X,F)}.` becomes
/// `p(X,Y) :- q(X,Y), r(X,F), weighted(F).`
///
/// Exactly one feature head is supported either way; any other shape is a
/// configuration error.
pub fn move_features_to_rhs(rule: &Rule) -> Result<Rule> {
    if rule.features.is_empty() {
        return Ok(rule.clone());
    }
    if rule.features.len() > 1 {
        return Err(TensorLogError::Compile(
            "multiple constant features not supported".into(),
        ));
    }
    let feature = &rule.features[0];
    let mut rewritten = Rule::new(rule.lhs.clone(), rule.rhs.clone());

    if rule.findall.is_empty() {
        if feature.arity() != 0 {
            return Err(TensorLogError::Compile(
                "non-constant features must be of the form {all(X):-...}".into(),
            ));
        }
        let const_feature = feature.functor.clone();
        let weight_var = format!("W_{}", const_feature.to_uppercase());
        rewritten.rhs.push(Goal::new(
            ASSIGN_FUNCTOR,
            vec![
                Term::Variable(weight_var.clone()),
                Term::Constant(const_feature),
            ],
        ));
        rewritten
            .rhs
            .push(Goal::new(WEIGHTED_FUNCTOR, vec![Term::Variable(weight_var)]));
    } else {
        // {all(F) :- goals}: bind F per derivation, then weight by it
        if feature.functor != "all" || feature.arity() != 1 {
            return Err(TensorLogError::Compile(
                "non-constant features must be of the form {all(X):-...}".into(),
            ));
        }
        let out_var = feature.args[0].as_variable().ok_or_else(|| {
            TensorLogError::Compile(
                "non-constant features must be of the form {all(X):-...}".into(),
            )
        })?;
        rewritten.rhs.extend(rule.findall.iter().cloned());
        rewritten.rhs.push(Goal::new(
            WEIGHTED_FUNCTOR,
            vec![Term::Variable(out_var.to_string())],
        ));
    }
    Ok(rewritten)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn var(s: &str) -> Term {
        Term::Variable(s.into())
    }

    #[test]
    fn test_mode_display_roundtrip() {
        let mode = ModeDeclaration::new("p", vec![ArgMode::In, ArgMode::Out]);
        assert_eq!(mode.to_string(), "p(i,o)");
        assert_eq!(ModeDeclaration::parse("p(i,o)").unwrap(), mode);
    }

    #[test]
    fn test_mode_equality_and_ordering() {
        let a = ModeDeclaration::new("p", vec![ArgMode::In, ArgMode::Out]);
        let b = ModeDeclaration::new("p", vec![ArgMode::In, ArgMode::Out]);
        let c = ModeDeclaration::new("p", vec![ArgMode::Out, ArgMode::In]);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a < c); // In < Out at the first differing position
    }

    #[test]
    fn test_mode_input_arity() {
        let mode = ModeDeclaration::parse("r(i,o,i)").unwrap();
        assert_eq!(mode.arity(), 3);
        assert_eq!(mode.input_arity(), 2);
        assert!(mode.is_input(0));
        assert!(!mode.is_input(1));
    }

    #[test]
    fn test_rules_for_preserves_order() {
        let mut rules = RuleCollection::new();
        rules.add(Rule::new(
            Goal::new("p", vec![var("X"), var("Y")]),
            vec![Goal::new("q", vec![var("X"), var("Y")])],
        ));
        rules.add(Rule::new(
            Goal::new("p", vec![var("X"), var("Y")]),
            vec![Goal::new("r", vec![var("X"), var("Y")])],
        ));

        let mode = ModeDeclaration::parse("p(i,o)").unwrap();
        let matched = rules.rules_for(&mode);
        assert_eq!(matched.len(), 2);
        assert_eq!(matched[0].rhs[0].functor, "q");
        assert_eq!(matched[1].rhs[0].functor, "r");
    }

    #[test]
    fn test_rules_for_arity_mismatch() {
        let mut rules = RuleCollection::new();
        rules.add(Rule::new(
            Goal::new("p", vec![var("X"), var("Y")]),
            vec![Goal::new("q", vec![var("X"), var("Y")])],
        ));
        let unary = ModeDeclaration::parse("p(i)").unwrap();
        assert!(rules.rules_for(&unary).is_empty());
    }

    #[test]
    fn test_move_features_to_rhs() {
        let rule = Rule::new(
            Goal::new("p", vec![var("X"), var("Y")]),
            vec![Goal::new("q", vec![var("X"), var("Y")])],
        )
        .with_features(vec![Goal::new("f1", vec![])]);

        let rewritten = move_features_to_rhs(&rule).unwrap();
        assert_eq!(rewritten.rhs.len(), 3);
        assert_eq!(rewritten.rhs[1].functor, ASSIGN_FUNCTOR);
        assert_eq!(rewritten.rhs[2].functor, WEIGHTED_FUNCTOR);
        assert!(rewritten.features.is_empty());
    }

    #[test]
    fn test_move_features_rejects_multiple() {
        let rule = Rule::new(
            Goal::new("p", vec![var("X"), var("Y")]),
            vec![Goal::new("q", vec![var("X"), var("Y")])],
        )
        .with_features(vec![Goal::new("f1", vec![]), Goal::new("f2", vec![])]);
        assert!(move_features_to_rhs(&rule).is_err());
    }

    #[test]
    fn test_move_features_generator() {
        let rule = Rule::new(
            Goal::new("p", vec![var("X"), var("Y")]),
            vec![Goal::new("q", vec![var("X"), var("Y")])],
        )
        .with_features(vec![Goal::new("all", vec![var("F")])])
        .with_findall(vec![Goal::new("mentions", vec![var("X"), var("F")])]);

        let rewritten = move_features_to_rhs(&rule).unwrap();
        assert_eq!(rewritten.rhs.len(), 3);
        assert_eq!(rewritten.rhs[1].functor, "mentions");
        assert_eq!(rewritten.rhs[2].functor, WEIGHTED_FUNCTOR);
        assert!(matches!(&rewritten.rhs[2].args[0], Term::Variable(v) if v == "F"));
        assert!(rewritten.findall.is_empty());
    }

    #[test]
    fn test_move_features_rejects_bad_generator_heads() {
        // arity-1 feature without a generator body
        let bare = Rule::new(
            Goal::new("p", vec![var("X"), var("Y")]),
            vec![Goal::new("q", vec![var("X"), var("Y")])],
        )
        .with_features(vec![Goal::new("all", vec![var("F")])]);
        assert!(move_features_to_rhs(&bare).is_err());

        // generator head must be all/1
        let wrong_head = Rule::new(
            Goal::new("p", vec![var("X"), var("Y")]),
            vec![Goal::new("q", vec![var("X"), var("Y")])],
        )
        .with_features(vec![Goal::new("any", vec![var("F")])])
        .with_findall(vec![Goal::new("mentions", vec![var("X"), var("F")])]);
        assert!(move_features_to_rhs(&wrong_head).is_err());
    }
}
