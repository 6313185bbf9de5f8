//! Dice evaluation.
//!
//! Supports the additive subset of dice notation used by attack and damage
//! cards: signed integers, `NdF` terms with `r=N` reroll and `kh`/`kl` keep
//! modifiers, and `@name` placeholders resolved from a [`RollContext`].

use crate::formula::{is_placeholder_char, join_parts, ContextValue, FormulaPart, JoinStyle, RollContext};
use rand::rngs::{StdRng, ThreadRng};
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tracing::debug;

/// Upper bound on dice in one term.
pub const MAX_DICE: u32 = 1000;

/// Upper bound on rerolls of a single die under [`RerollMode::UntilStable`].
const MAX_REROLLS: u32 = 100;

/// Placeholders may expand to formulas that reference other placeholders.
const MAX_PLACEHOLDER_DEPTH: usize = 8;

/// Error type for formula parsing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormulaError {
    #[error("Empty roll formula")]
    Empty,
    #[error("Invalid dice notation: {0}")]
    InvalidNotation(String),
    #[error("Invalid die size: {0}")]
    InvalidDieSize(u32),
    #[error("Cannot keep {keep} dice when only rolling {count} (in {notation})")]
    InvalidKeepCount {
        keep: u32,
        count: u32,
        notation: String,
    },
    #[error("Cannot roll {count} dice at once (limit {limit})")]
    TooManyDice { count: u32, limit: u32 },
    #[error("Formula ends with a dangling operator: {0}")]
    DanglingOperator(String),
    #[error("Placeholder @{name} has a value that is not a formula: {value}")]
    UnresolvedPlaceholder { name: String, value: String },
    #[error("Roll total is out of range: {0}")]
    Overflow(String),
}

/// How a reroll modifier (`r=1`) treats a reroll that lands on the same face.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RerollMode {
    /// Reroll exactly once and keep the second result.
    #[default]
    Once,
    /// Keep rerolling until the face no longer matches.
    UntilStable,
}

/// Keep-highest / keep-lowest reduction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Keep {
    Highest(u32),
    Lowest(u32),
}

impl Keep {
    pub fn count(&self) -> u32 {
        match self {
            Keep::Highest(k) | Keep::Lowest(k) => *k,
        }
    }
}

/// A parsed `NdF` term with its modifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiceSpec {
    pub count: u32,
    pub faces: u32,
    pub reroll: Option<u32>,
    pub keep: Option<Keep>,
}

impl DiceSpec {
    pub fn new(count: u32, faces: u32) -> Self {
        Self {
            count,
            faces,
            reroll: None,
            keep: None,
        }
    }

    /// Parse a single dice term such as `2d20kh` or `1d20r=1`.
    pub fn parse(notation: &str) -> Result<Self, FormulaError> {
        let s = notation.trim().to_lowercase();
        let invalid = || FormulaError::InvalidNotation(notation.to_string());

        let d_pos = s.find('d').ok_or_else(invalid)?;
        let count_str = &s[..d_pos];
        let count: u32 = if count_str.is_empty() {
            1
        } else {
            count_str.parse().map_err(|_| invalid())?
        };
        if count == 0 {
            return Err(invalid());
        }
        if count > MAX_DICE {
            return Err(FormulaError::TooManyDice {
                count,
                limit: MAX_DICE,
            });
        }

        let rest = &s[d_pos + 1..];
        let (faces_str, mut modifiers) = split_digits(rest);
        let faces: u32 = faces_str.parse().map_err(|_| invalid())?;
        if faces == 0 {
            return Err(FormulaError::InvalidDieSize(faces));
        }

        let mut spec = DiceSpec::new(count, faces);
        while !modifiers.is_empty() {
            if let Some(after) = modifiers.strip_prefix("kh") {
                let (n, tail) = split_digits(after);
                spec.keep = Some(Keep::Highest(parse_or_one(n).ok_or_else(invalid)?));
                modifiers = tail;
            } else if let Some(after) = modifiers.strip_prefix("kl") {
                let (n, tail) = split_digits(after);
                spec.keep = Some(Keep::Lowest(parse_or_one(n).ok_or_else(invalid)?));
                modifiers = tail;
            } else if let Some(after) = modifiers.strip_prefix('k') {
                let (n, tail) = split_digits(after);
                spec.keep = Some(Keep::Highest(parse_or_one(n).ok_or_else(invalid)?));
                modifiers = tail;
            } else if let Some(after) = modifiers.strip_prefix('r') {
                let after = after.strip_prefix('=').unwrap_or(after);
                let (n, tail) = split_digits(after);
                spec.reroll = Some(parse_or_one(n).ok_or_else(invalid)?);
                modifiers = tail;
            } else {
                return Err(invalid());
            }
        }

        // Validate keep count doesn't exceed dice count
        if let Some(keep) = spec.keep {
            if keep.count() > count || keep.count() == 0 {
                return Err(FormulaError::InvalidKeepCount {
                    keep: keep.count(),
                    count,
                    notation: notation.to_string(),
                });
            }
        }

        Ok(spec)
    }

    /// Largest possible result of the term before keep reduction.
    pub fn max(&self) -> i64 {
        self.count as i64 * self.faces as i64
    }
}

impl fmt::Display for DiceSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}d{}", self.count, self.faces)?;
        if let Some(value) = self.reroll {
            write!(f, "r={value}")?;
        }
        match self.keep {
            Some(Keep::Highest(1)) => write!(f, "kh"),
            Some(Keep::Highest(k)) => write!(f, "kh{k}"),
            Some(Keep::Lowest(1)) => write!(f, "kl"),
            Some(Keep::Lowest(k)) => write!(f, "kl{k}"),
            None => Ok(()),
        }
    }
}

fn split_digits(s: &str) -> (&str, &str) {
    let end = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    s.split_at(end)
}

fn parse_or_one(digits: &str) -> Option<u32> {
    if digits.is_empty() {
        Some(1)
    } else {
        digits.parse().ok()
    }
}

/// Source of individual die faces.
pub trait DieSource {
    /// Roll one die, returning a value in `1..=faces`.
    fn roll_die(&mut self, faces: u32) -> u32;
}

/// A [`DieSource`] backed by any `rand` generator.
#[derive(Debug, Clone)]
pub struct RngSource<R>(pub R);

impl<R: Rng> DieSource for RngSource<R> {
    fn roll_die(&mut self, faces: u32) -> u32 {
        self.0.gen_range(1..=faces)
    }
}

impl RngSource<ThreadRng> {
    pub fn thread() -> Self {
        RngSource(rand::thread_rng())
    }
}

impl RngSource<StdRng> {
    /// Reproducible source for replays and tests.
    pub fn seeded(seed: u64) -> Self {
        RngSource(StdRng::seed_from_u64(seed))
    }
}

/// Whether a die counts toward the total.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DieStatus {
    Active,
    /// Removed by a keep-highest/keep-lowest reduction.
    Dropped,
    /// Replaced by a reroll.
    Rerolled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DieResult {
    pub value: u32,
    pub status: DieStatus,
}

impl DieResult {
    pub fn is_active(&self) -> bool {
        self.status == DieStatus::Active
    }
}

/// An evaluated dice term.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DieTerm {
    /// `1` or `-1`.
    pub sign: i64,
    pub spec: DiceSpec,
    /// Every die rolled, in roll order, including rerolled and dropped ones.
    pub results: Vec<DieResult>,
}

impl DieTerm {
    pub fn faces(&self) -> u32 {
        self.spec.faces
    }

    pub fn count(&self) -> u32 {
        self.spec.count
    }

    pub fn active_values(&self) -> impl Iterator<Item = u32> + '_ {
        self.results.iter().filter(|r| r.is_active()).map(|r| r.value)
    }

    /// Signed sum of the active dice, `None` on overflow.
    pub fn subtotal(&self) -> Option<i64> {
        self.active_values()
            .try_fold(0i64, |acc, v| acc.checked_add(i64::from(v)))?
            .checked_mul(self.sign)
    }

    /// Re-derive active/dropped status from the keep modifier.
    fn apply_keep(&mut self) {
        let mut candidates: Vec<usize> = self
            .results
            .iter()
            .enumerate()
            .filter(|(_, r)| r.status != DieStatus::Rerolled)
            .map(|(i, _)| i)
            .collect();
        for &i in &candidates {
            self.results[i].status = DieStatus::Active;
        }

        let Some(keep) = self.spec.keep else {
            return;
        };
        // Stable sort: among equal faces the earlier die is kept.
        match keep {
            Keep::Highest(_) => candidates.sort_by(|&a, &b| self.results[b].value.cmp(&self.results[a].value)),
            Keep::Lowest(_) => candidates.sort_by(|&a, &b| self.results[a].value.cmp(&self.results[b].value)),
        }
        for &i in candidates.iter().skip(keep.count() as usize) {
            self.results[i].status = DieStatus::Dropped;
        }
    }
}

impl fmt::Display for DieTerm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shown: Vec<String> = self
            .results
            .iter()
            .map(|r| {
                if r.is_active() {
                    r.value.to_string()
                } else {
                    format!("({})", r.value)
                }
            })
            .collect();
        write!(f, "[{}]", shown.join(", "))
    }
}

/// One evaluated term of a roll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RollTerm {
    Dice(DieTerm),
    Constant { value: i64 },
}

impl RollTerm {
    pub fn value(&self) -> Option<i64> {
        match self {
            RollTerm::Dice(term) => term.subtotal(),
            RollTerm::Constant { value } => Some(*value),
        }
    }

    fn notation(&self) -> String {
        match self {
            RollTerm::Dice(term) => term.spec.to_string(),
            RollTerm::Constant { value } => value.abs().to_string(),
        }
    }

    fn is_negative(&self) -> bool {
        match self {
            RollTerm::Dice(term) => term.sign < 0,
            RollTerm::Constant { value } => *value < 0,
        }
    }
}

/// Complete result of evaluating a formula.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluatedRoll {
    pub formula: String,
    pub terms: Vec<RollTerm>,
    pub total: i64,
    #[serde(default)]
    pub is_critical: bool,
    #[serde(default)]
    pub is_fumble: bool,
}

impl EvaluatedRoll {
    /// Fails with [`FormulaError::Overflow`] when the total does not fit.
    pub fn new(formula: impl Into<String>, terms: Vec<RollTerm>) -> Result<Self, FormulaError> {
        let formula = formula.into();
        let total = terms
            .iter()
            .try_fold(0i64, |acc, term| acc.checked_add(term.value()?))
            .ok_or_else(|| FormulaError::Overflow(formula.clone()))?;
        Ok(Self {
            formula,
            terms,
            total,
            is_critical: false,
            is_fumble: false,
        })
    }

    /// Build a roll whose formula is rendered from its own terms.
    pub fn from_terms(terms: Vec<RollTerm>) -> Result<Self, FormulaError> {
        let formula = render_terms(&terms);
        Self::new(formula, terms)
    }

    pub fn dice(&self) -> impl Iterator<Item = &DieTerm> {
        self.terms.iter().filter_map(|t| match t {
            RollTerm::Dice(term) => Some(term),
            RollTerm::Constant { .. } => None,
        })
    }

    pub fn constants(&self) -> i64 {
        self.terms
            .iter()
            .filter_map(|t| match t {
                RollTerm::Constant { value } => Some(*value),
                RollTerm::Dice(_) => None,
            })
            .fold(0i64, i64::saturating_add)
    }

    /// Combine per-part rolls (one per damage type) into one.
    ///
    /// No rolls merge into an empty roll with a total of 0.
    pub fn merge(rolls: &[EvaluatedRoll]) -> Result<EvaluatedRoll, FormulaError> {
        let formula = rolls
            .iter()
            .map(|r| r.formula.as_str())
            .collect::<Vec<_>>()
            .join(" + ");
        let terms = rolls.iter().flat_map(|r| r.terms.iter().cloned()).collect();
        let mut merged = EvaluatedRoll::new(formula, terms)?;
        merged.is_critical = rolls.iter().any(|r| r.is_critical);
        merged.is_fumble = rolls.iter().any(|r| r.is_fumble);
        Ok(merged)
    }

    /// Format the individual dice results for display.
    pub fn dice_display(&self) -> String {
        let mut shown = String::new();
        for (i, term) in self.terms.iter().enumerate() {
            let body = match term {
                RollTerm::Dice(die) => die.to_string(),
                RollTerm::Constant { value } => value.abs().to_string(),
            };
            match (i, term.is_negative()) {
                (0, false) => {}
                (0, true) => shown.push('-'),
                (_, false) => shown.push_str(" + "),
                (_, true) => shown.push_str(" - "),
            }
            shown.push_str(&body);
        }
        shown
    }
}

impl fmt::Display for EvaluatedRoll {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} = {}", self.dice_display(), self.total)
    }
}

fn render_terms(terms: &[RollTerm]) -> String {
    let mut formula = String::new();
    for (i, term) in terms.iter().enumerate() {
        match (i, term.is_negative()) {
            (0, false) => {}
            (0, true) => formula.push('-'),
            (_, false) => formula.push_str(" + "),
            (_, true) => formula.push_str(" - "),
        }
        formula.push_str(&term.notation());
    }
    formula
}

#[derive(Debug, Clone)]
enum Token {
    Constant(i64),
    Dice(DiceSpec),
}

#[derive(Debug, Clone)]
struct SignedToken {
    sign: i64,
    token: Token,
}

/// Resolve placeholders and parse a formula into signed terms.
fn parse_formula(formula: &str, context: &RollContext, depth: usize) -> Result<Vec<SignedToken>, FormulaError> {
    let mut chunks: Vec<(i64, String)> = Vec::new();
    let mut current = String::new();
    let mut sign: i64 = 1;
    let mut pending_operator = false;

    for ch in formula.chars() {
        match ch {
            '+' | '-' => {
                if !current.is_empty() {
                    chunks.push((sign, std::mem::take(&mut current)));
                    sign = 1;
                }
                if ch == '-' {
                    sign = -sign;
                }
                pending_operator = true;
            }
            c if c.is_whitespace() => continue,
            c => {
                current.push(c);
                pending_operator = false;
            }
        }
    }
    if !current.is_empty() {
        chunks.push((sign, current));
    } else if pending_operator {
        return Err(FormulaError::DanglingOperator(formula.trim().to_string()));
    }

    let mut tokens = Vec::new();
    for (sign, chunk) in chunks {
        if let Some(name) = chunk.strip_prefix('@') {
            resolve_placeholder(name, sign, context, depth, &mut tokens)?;
        } else if chunk.contains(|c: char| c == 'd' || c == 'D') {
            tokens.push(SignedToken {
                sign,
                token: Token::Dice(DiceSpec::parse(&chunk)?),
            });
        } else {
            let value: i64 = chunk
                .parse()
                .map_err(|_| FormulaError::InvalidNotation(chunk.clone()))?;
            tokens.push(SignedToken {
                sign,
                token: Token::Constant(value),
            });
        }
    }
    Ok(tokens)
}

fn resolve_placeholder(
    name: &str,
    sign: i64,
    context: &RollContext,
    depth: usize,
    tokens: &mut Vec<SignedToken>,
) -> Result<(), FormulaError> {
    if name.is_empty() || !name.chars().all(is_placeholder_char) {
        return Err(FormulaError::InvalidNotation(format!("@{name}")));
    }
    match context.get(name) {
        None => {
            debug!(placeholder = name, "dropping placeholder with no context value");
        }
        Some(ContextValue::Number(n)) => tokens.push(SignedToken {
            sign,
            token: Token::Constant(*n),
        }),
        Some(ContextValue::Text(text)) => {
            let unresolved = || FormulaError::UnresolvedPlaceholder {
                name: name.to_string(),
                value: text.clone(),
            };
            if depth >= MAX_PLACEHOLDER_DEPTH || text.trim().is_empty() {
                return Err(unresolved());
            }
            let inner = parse_formula(text, context, depth + 1).map_err(|_| unresolved())?;
            tokens.extend(inner.into_iter().map(|t| SignedToken {
                sign: sign * t.sign,
                token: t.token,
            }));
        }
    }
    Ok(())
}

/// Evaluates formulas against a die source.
#[derive(Debug, Clone, Copy, Default)]
pub struct Evaluator {
    reroll_mode: RerollMode,
}

impl Evaluator {
    pub fn new(reroll_mode: RerollMode) -> Self {
        Self { reroll_mode }
    }

    pub fn reroll_mode(&self) -> RerollMode {
        self.reroll_mode
    }

    /// Join `parts` and evaluate the resulting formula.
    pub fn evaluate<D: DieSource + ?Sized>(
        &self,
        parts: &[FormulaPart],
        style: JoinStyle,
        context: &RollContext,
        dice: &mut D,
    ) -> Result<EvaluatedRoll, FormulaError> {
        let formula = join_parts(parts, style);
        self.evaluate_formula(&formula, context, dice)
    }

    pub fn evaluate_formula<D: DieSource + ?Sized>(
        &self,
        formula: &str,
        context: &RollContext,
        dice: &mut D,
    ) -> Result<EvaluatedRoll, FormulaError> {
        if formula.trim().is_empty() {
            return Err(FormulaError::Empty);
        }
        let formula = formula.trim();
        let tokens = parse_formula(formula, context, 0)?;
        let terms = tokens
            .into_iter()
            .map(|t| match t.token {
                Token::Constant(value) => value
                    .checked_mul(t.sign)
                    .map(|value| RollTerm::Constant { value })
                    .ok_or_else(|| FormulaError::Overflow(formula.to_string())),
                Token::Dice(spec) => self.roll_term(t.sign, spec, dice).map(RollTerm::Dice),
            })
            .collect::<Result<Vec<_>, _>>()?;
        EvaluatedRoll::new(formula, terms)
    }

    pub fn roll_term<D: DieSource + ?Sized>(
        &self,
        sign: i64,
        spec: DiceSpec,
        dice: &mut D,
    ) -> Result<DieTerm, FormulaError> {
        let mut term = DieTerm {
            sign,
            spec: DiceSpec { count: 0, ..spec },
            results: Vec::with_capacity(spec.count.min(MAX_DICE) as usize),
        };
        self.extend_term(&mut term, spec.count, dice)?;
        Ok(term)
    }

    /// Roll `extra` more dice into an already evaluated term, keeping its
    /// existing results.
    ///
    /// The term may not grow past [`MAX_DICE`]; nothing is rolled if it would.
    pub fn extend_term<D: DieSource + ?Sized>(
        &self,
        term: &mut DieTerm,
        extra: u32,
        dice: &mut D,
    ) -> Result<(), FormulaError> {
        let count = term
            .spec
            .count
            .checked_add(extra)
            .filter(|&count| count <= MAX_DICE)
            .ok_or(FormulaError::TooManyDice {
                count: term.spec.count.saturating_add(extra),
                limit: MAX_DICE,
            })?;
        for _ in 0..extra {
            self.roll_one(term, dice);
        }
        term.spec.count = count;
        term.apply_keep();
        Ok(())
    }

    fn roll_one<D: DieSource + ?Sized>(&self, term: &mut DieTerm, dice: &mut D) {
        let faces = term.spec.faces;
        let mut value = dice.roll_die(faces);
        if let Some(target) = term.spec.reroll {
            let attempts = match self.reroll_mode {
                RerollMode::Once => 1,
                RerollMode::UntilStable => MAX_REROLLS,
            };
            let mut rerolls = 0;
            while value == target && rerolls < attempts {
                term.results.push(DieResult {
                    value,
                    status: DieStatus::Rerolled,
                });
                value = dice.roll_die(faces);
                rerolls += 1;
            }
        }
        term.results.push(DieResult {
            value,
            status: DieStatus::Active,
        });
    }
}

/// Convenience function to evaluate a formula with the thread RNG.
pub fn roll(formula: &str, context: &RollContext) -> Result<EvaluatedRoll, FormulaError> {
    Evaluator::default().evaluate_formula(formula, context, &mut RngSource::thread())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedDice;

    #[test]
    fn test_parse_simple() {
        let spec = DiceSpec::parse("1d20").unwrap();
        assert_eq!(spec, DiceSpec::new(1, 20));

        let spec = DiceSpec::parse("d6").unwrap();
        assert_eq!(spec.count, 1);
        assert_eq!(spec.faces, 6);
    }

    #[test]
    fn test_parse_modifiers() {
        let spec = DiceSpec::parse("2d20kh").unwrap();
        assert_eq!(spec.keep, Some(Keep::Highest(1)));

        let spec = DiceSpec::parse("4d6kh3").unwrap();
        assert_eq!(spec.keep, Some(Keep::Highest(3)));

        let spec = DiceSpec::parse("2d20kl").unwrap();
        assert_eq!(spec.keep, Some(Keep::Lowest(1)));

        let spec = DiceSpec::parse("2d20r=1kh").unwrap();
        assert_eq!(spec.reroll, Some(1));
        assert_eq!(spec.keep, Some(Keep::Highest(1)));
        assert_eq!(spec.to_string(), "2d20r=1kh");
    }

    #[test]
    fn test_invalid_keep_count() {
        // Can't keep more dice than you roll
        let result = DiceSpec::parse("4d6kh5");
        assert!(matches!(
            result.unwrap_err(),
            FormulaError::InvalidKeepCount {
                keep: 5,
                count: 4,
                ..
            }
        ));

        assert!(DiceSpec::parse("2d20kl3").is_err());
        assert!(DiceSpec::parse("4d6kh4").is_ok());
    }

    #[test]
    fn test_invalid_notation() {
        assert!(matches!(DiceSpec::parse("2d0"), Err(FormulaError::InvalidDieSize(0))));
        assert!(DiceSpec::parse("0d6").is_err());
        assert!(DiceSpec::parse("2d6x").is_err());
        assert!(matches!(
            DiceSpec::parse("5000d6"),
            Err(FormulaError::TooManyDice { .. })
        ));
    }

    #[test]
    fn test_constant_totals() {
        let context = RollContext::new();
        let mut dice = ScriptedDice::new(vec![]);
        let roll = Evaluator::default()
            .evaluate_formula("3 + 4 - 2 + -1", &context, &mut dice)
            .unwrap();
        assert_eq!(roll.total, 4);
        assert_eq!(roll.dice().count(), 0);
    }

    #[test]
    fn test_placeholders_resolved() {
        let context = RollContext::new()
            .with("mod", 3)
            .with("prof", 2)
            .with("bonus", "1d4");
        let mut dice = ScriptedDice::new(vec![14, 3]);
        let roll = Evaluator::default()
            .evaluate_formula("1d20 + @mod + @prof + @bonus", &context, &mut dice)
            .unwrap();
        assert_eq!(roll.total, 14 + 3 + 2 + 3);
        assert_eq!(roll.formula, "1d20 + @mod + @prof + @bonus");
    }

    #[test]
    fn test_negative_placeholder() {
        let context = RollContext::new().with("mod", -1).with("pen", "1d4");
        let mut dice = ScriptedDice::new(vec![10, 2]);
        let roll = Evaluator::default()
            .evaluate_formula("1d20 + @mod - @pen", &context, &mut dice)
            .unwrap();
        assert_eq!(roll.total, 10 - 1 - 2);
    }

    #[test]
    fn test_missing_placeholder_dropped() {
        let context = RollContext::new().with("mod", 3);
        let mut dice = ScriptedDice::new(vec![7]);
        let roll = Evaluator::default()
            .evaluate_formula("1d20 + @mod + @prof", &context, &mut dice)
            .unwrap();
        assert_eq!(roll.total, 10);
        assert_eq!(roll.terms.len(), 2);
    }

    #[test]
    fn test_unparseable_formulas() {
        let context = RollContext::new().with("name", "sword");
        let mut dice = ScriptedDice::new(vec![]);
        let evaluator = Evaluator::default();

        assert_eq!(evaluator.evaluate_formula("  ", &context, &mut dice), Err(FormulaError::Empty));
        assert!(matches!(
            evaluator.evaluate_formula("1d20 +", &context, &mut dice),
            Err(FormulaError::DanglingOperator(_))
        ));
        assert!(matches!(
            evaluator.evaluate_formula("1d20 * 2", &context, &mut dice),
            Err(FormulaError::InvalidNotation(_))
        ));
        assert!(matches!(
            evaluator.evaluate_formula("1d20 + @name", &context, &mut dice),
            Err(FormulaError::UnresolvedPlaceholder { .. })
        ));
    }

    #[test]
    fn test_self_referencing_placeholder() {
        let context = RollContext::new().with("loop", "@loop");
        let mut dice = ScriptedDice::new(vec![]);
        let result = Evaluator::default().evaluate_formula("@loop", &context, &mut dice);
        assert!(matches!(result, Err(FormulaError::UnresolvedPlaceholder { .. })));
    }

    #[test]
    fn test_keep_highest_with_fixed_pair() {
        let evaluator = Evaluator::default();
        let context = RollContext::new().with("mod", 2);
        for (a, b) in [(3, 17), (17, 3), (9, 9)] {
            let mut dice = ScriptedDice::cycle(vec![a, b]);
            for _ in 0..1000 {
                let roll = evaluator
                    .evaluate_formula("2d20kh + @mod", &context, &mut dice)
                    .unwrap();
                let term = roll.dice().next().unwrap();
                let active: Vec<u32> = term.active_values().collect();
                assert_eq!(active, vec![a.max(b)]);
                assert_eq!(term.results.iter().filter(|r| r.status == DieStatus::Dropped).count(), 1);
                assert_eq!(roll.total, a.max(b) as i64 + 2);
            }
        }
    }

    #[test]
    fn test_keep_lowest() {
        let mut dice = ScriptedDice::new(vec![15, 4]);
        let roll = Evaluator::default()
            .evaluate_formula("2d20kl", &RollContext::new(), &mut dice)
            .unwrap();
        assert_eq!(roll.total, 4);
        assert_eq!(roll.dice().next().unwrap().results[0].status, DieStatus::Dropped);
    }

    #[test]
    fn test_reroll_once() {
        let mut dice = ScriptedDice::new(vec![1, 1]);
        let roll = Evaluator::new(RerollMode::Once)
            .evaluate_formula("1d20r=1", &RollContext::new(), &mut dice)
            .unwrap();
        let term = roll.dice().next().unwrap();
        assert_eq!(term.results.len(), 2);
        assert_eq!(term.results[0].status, DieStatus::Rerolled);
        // A second 1 stands.
        assert_eq!(roll.total, 1);
        assert_eq!(dice.consumed(), 2);
    }

    #[test]
    fn test_reroll_until_stable() {
        let mut dice = ScriptedDice::new(vec![1, 1, 1, 12]);
        let roll = Evaluator::new(RerollMode::UntilStable)
            .evaluate_formula("1d20r=1", &RollContext::new(), &mut dice)
            .unwrap();
        assert_eq!(roll.total, 12);
        assert_eq!(roll.dice().next().unwrap().results.len(), 4);
    }

    #[test]
    fn test_extend_term_keeps_results() {
        let evaluator = Evaluator::default();
        let mut dice = ScriptedDice::new(vec![4, 5, 2, 6]);
        let mut term = evaluator.roll_term(1, DiceSpec::new(2, 6), &mut dice).unwrap();
        evaluator.extend_term(&mut term, 2, &mut dice).unwrap();
        assert_eq!(term.spec.count, 4);
        assert_eq!(term.active_values().collect::<Vec<_>>(), vec![4, 5, 2, 6]);
        assert_eq!(term.subtotal(), Some(17));
    }

    #[test]
    fn test_extend_term_limit() {
        let evaluator = Evaluator::default();
        let mut dice = ScriptedDice::cycle(vec![3]);
        let mut term = evaluator.roll_term(1, DiceSpec::new(2, 6), &mut dice).unwrap();

        let err = evaluator.extend_term(&mut term, MAX_DICE, &mut dice).unwrap_err();
        assert_eq!(
            err,
            FormulaError::TooManyDice {
                count: MAX_DICE + 2,
                limit: MAX_DICE
            }
        );
        assert!(evaluator.extend_term(&mut term, u32::MAX, &mut dice).is_err());
        // Nothing was rolled into the term.
        assert_eq!(term.spec.count, 2);
        assert_eq!(dice.consumed(), 2);

        evaluator.extend_term(&mut term, MAX_DICE - 2, &mut dice).unwrap();
        assert_eq!(term.spec.count, MAX_DICE);
    }

    #[test]
    fn test_total_overflow() {
        let evaluator = Evaluator::default();
        let mut dice = ScriptedDice::cycle(vec![20]);

        let context = RollContext::new().with("mod", i64::MAX);
        let result = evaluator.evaluate_formula("1d20 + @mod", &context, &mut dice);
        assert_eq!(result, Err(FormulaError::Overflow("1d20 + @mod".to_string())));

        let context = RollContext::new().with("mod", i64::MIN);
        let result = evaluator.evaluate_formula("1d20 - @mod", &context, &mut dice);
        assert!(matches!(result, Err(FormulaError::Overflow(_))));

        let context = RollContext::new().with("mod", i64::MAX - 20);
        let roll = evaluator.evaluate_formula("1d20 + @mod", &context, &mut dice).unwrap();
        assert_eq!(roll.total, i64::MAX);
    }

    #[test]
    fn test_roll_range() {
        for _ in 0..100 {
            let result = roll("1d20+5", &RollContext::new()).unwrap();
            assert!(result.total >= 6 && result.total <= 25);
        }
    }

    #[test]
    fn test_seeded_source_reproducible() {
        let evaluator = Evaluator::default();
        let context = RollContext::new();
        let a = evaluator
            .evaluate_formula("4d6kh3", &context, &mut RngSource::seeded(7))
            .unwrap();
        let b = evaluator
            .evaluate_formula("4d6kh3", &context, &mut RngSource::seeded(7))
            .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_display() {
        let mut dice = ScriptedDice::new(vec![4, 2]);
        let roll = Evaluator::default()
            .evaluate_formula("2d6kh+3", &RollContext::new(), &mut dice)
            .unwrap();
        assert_eq!(roll.to_string(), "[4, (2)] + 3 = 7");
    }

    #[test]
    fn test_merge() {
        let evaluator = Evaluator::default();
        let context = RollContext::new();
        let mut dice = ScriptedDice::new(vec![3, 6]);
        let a = evaluator.evaluate_formula("1d8+2", &context, &mut dice).unwrap();
        let b = evaluator.evaluate_formula("1d6", &context, &mut dice).unwrap();
        let merged = EvaluatedRoll::merge(&[a, b]).unwrap();
        assert_eq!(merged.total, 11);
        assert_eq!(merged.formula, "1d8+2 + 1d6");
        assert_eq!(EvaluatedRoll::merge(&[]).unwrap().total, 0);

        let big = EvaluatedRoll::from_terms(vec![RollTerm::Constant { value: i64::MAX }]).unwrap();
        assert!(matches!(
            EvaluatedRoll::merge(&[big.clone(), big]),
            Err(FormulaError::Overflow(_))
        ));
    }
}
