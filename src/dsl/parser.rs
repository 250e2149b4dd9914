//! Rule DSL parser
//!
//! Parses TensorLog-style rule programs and mode declarations from text.
//!
//! ## Supported syntax
//!
//! ```text
//! % transitive closure, two clauses
//! path(X,Y) :- edge(X,Y).
//! path(X,Y) :- edge(X,Z), path(Z,Y).
//!
//! % a weighted clause (ProPPR-style constant feature)
//! guess(X,Y) :- sim(X,Y) {bySim}.
//!
//! % a feature generator: one weight per binding of F
//! predict(X,Y) :- related(X,Y) {all(F) :- mentions(X,F)}.
//! ```
//!
//! Mode declarations are written `p(i,o)`: one direction letter per
//! argument position.

use nom::{
    branch::alt,
    bytes::complete::{tag, take_while, take_while1},
    character::complete::{char, multispace0, multispace1},
    combinator::{map, opt, recognize, value},
    multi::{many0, separated_list1},
    sequence::{delimited, pair, preceded, tuple},
    IResult,
};

use super::{ArgMode, Goal, ModeDeclaration, Rule, RuleCollection, Term};
use crate::{Result, TensorLogError};

// =============================================================================
// TOKEN PARSERS
// =============================================================================

/// Parse whitespace and `%` line comments
fn ws(input: &str) -> IResult<&str, ()> {
    value(
        (),
        many0(alt((
            value((), multispace1),
            value((), preceded(char('%'), take_while(|c| c != '\n'))),
        ))),
    )(input)
}

/// Parse optional whitespace (no comments)
fn ws0(input: &str) -> IResult<&str, ()> {
    value((), multispace0)(input)
}

/// Parse an atom (lowercase identifier)
fn atom(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        take_while1(|c: char| c.is_ascii_lowercase()),
        take_while(|c: char| c.is_alphanumeric() || c == '_'),
    ))(input)
}

/// Parse a variable (uppercase or underscore start)
fn variable(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        take_while1(|c: char| c.is_ascii_uppercase() || c == '_'),
        take_while(|c: char| c.is_alphanumeric() || c == '_'),
    ))(input)
}

/// Parse a term: variable or entity constant
fn term(input: &str) -> IResult<&str, Term> {
    alt((
        map(variable, |s: &str| Term::Variable(s.to_string())),
        map(atom, |s: &str| Term::Constant(s.to_string())),
    ))(input)
}

/// Parse an argument list: `(t1, t2, ...)`
fn term_list(input: &str) -> IResult<&str, Vec<Term>> {
    delimited(
        tuple((char('('), ws0)),
        separated_list1(tuple((ws0, char(','), ws0)), term),
        tuple((ws0, char(')'))),
    )(input)
}

// =============================================================================
// GOAL AND RULE PARSERS
// =============================================================================

/// Parse a goal: `functor(args)` or bare `functor`
fn goal(input: &str) -> IResult<&str, Goal> {
    let (input, functor) = atom(input)?;
    let (input, args) = opt(term_list)(input)?;
    Ok((
        input,
        Goal {
            functor: functor.to_string(),
            args: args.unwrap_or_default(),
        },
    ))
}

/// Parse a conjunction of goals
fn goal_list(input: &str) -> IResult<&str, Vec<Goal>> {
    separated_list1(tuple((ws0, char(','), ws0)), goal)(input)
}

/// Parse a feature annotation: `{f}`, `{f1,f2}` or the generator form
/// `{all(F) :- g1, g2}`
fn feature_block(input: &str) -> IResult<&str, (Vec<Goal>, Vec<Goal>)> {
    map(
        delimited(
            tuple((char('{'), ws0)),
            pair(
                separated_list1(tuple((ws0, char(','), ws0)), goal),
                opt(preceded(tuple((ws0, tag(":-"), ws0)), goal_list)),
            ),
            tuple((ws0, char('}'))),
        ),
        |(features, findall)| (features, findall.unwrap_or_default()),
    )(input)
}

/// Parse one rule: `head :- body {features}.`
fn rule(input: &str) -> IResult<&str, Rule> {
    let (input, _) = ws(input)?;
    let (input, lhs) = goal(input)?;
    let (input, _) = ws0(input)?;
    let (input, _) = tag(":-")(input)?;
    let (input, _) = ws0(input)?;
    let (input, rhs) = goal_list(input)?;
    let (input, _) = ws0(input)?;
    let (input, annotation) = opt(feature_block)(input)?;
    let (input, _) = ws0(input)?;
    let (input, _) = char('.')(input)?;

    let (features, findall) = annotation.unwrap_or_default();
    Ok((
        input,
        Rule {
            lhs,
            rhs,
            features,
            findall,
        },
    ))
}

/// Parse a whole rule program
fn rules(input: &str) -> IResult<&str, Vec<Rule>> {
    let (input, parsed) = many0(rule)(input)?;
    let (input, _) = ws(input)?;
    Ok((input, parsed))
}

// =============================================================================
// MODE PARSER
// =============================================================================

fn arg_mode(input: &str) -> IResult<&str, ArgMode> {
    alt((
        value(ArgMode::In, char('i')),
        value(ArgMode::Out, char('o')),
    ))(input)
}

fn mode(input: &str) -> IResult<&str, ModeDeclaration> {
    let (input, functor) = atom(input)?;
    let (input, args) = delimited(
        tuple((char('('), ws0)),
        separated_list1(tuple((ws0, char(','), ws0)), arg_mode),
        tuple((ws0, char(')'))),
    )(input)?;
    Ok((input, ModeDeclaration::new(functor, args)))
}

// =============================================================================
// PUBLIC API
// =============================================================================

/// Parse a rule program from a string.
pub fn parse_rules(source: &str) -> Result<RuleCollection> {
    match rules(source) {
        Ok((remaining, parsed)) => {
            let remaining = remaining.trim();
            if !remaining.is_empty() {
                return Err(TensorLogError::Parse(format!(
                    "unexpected input after rules: '{}'",
                    &remaining[..remaining.len().min(50)]
                )));
            }
            let mut collection = RuleCollection::new();
            for rule in parsed {
                collection.add(rule);
            }
            Ok(collection)
        }
        Err(e) => Err(TensorLogError::Parse(format!("rule parse error: {:?}", e))),
    }
}

/// Parse a mode declaration such as `p(i,o)`.
pub fn parse_mode(spec: &str) -> Result<ModeDeclaration> {
    match mode(spec.trim()) {
        Ok((remaining, parsed)) if remaining.trim().is_empty() => Ok(parsed),
        Ok((remaining, _)) => Err(TensorLogError::Parse(format!(
            "unexpected input after mode: '{}'",
            remaining.trim()
        ))),
        Err(e) => Err(TensorLogError::Parse(format!("mode parse error: {:?}", e))),
    }
}
