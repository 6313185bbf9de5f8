//! Critical hit damage.
//!
//! Two interchangeable policies turn a normal damage roll into a critical one:
//! - `DoubleDice` rolls additional dice into every dice term of the existing
//!   roll (the original dice are kept), plus optional bonus dice on the first
//!   term.
//! - `MaxCritDice` re-rolls the formula and adds the maximum of every dice
//!   expression in it as a flat `@crit` bonus.

use crate::dice::{DieSource, EvaluatedRoll, Evaluator, FormulaError, RollTerm, MAX_DICE};
use crate::formula::{FormulaPart, JoinStyle, RollContext};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

lazy_static! {
    static ref DICE_EXPR: Regex = Regex::new(r"(?i)(\d*)d(\d+)").unwrap();
}

/// Critical damage policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CritPolicy {
    /// Roll double the number of dice.
    #[default]
    #[serde(alias = "default")]
    DoubleDice,
    /// Roll the normal dice and add the maximum of the crit dice.
    #[serde(alias = "maxCritDice")]
    MaxCritDice,
}

/// Sum of `N × F` over every `NdF` found in the literal parts.
pub fn max_dice_bonus(parts: &[FormulaPart]) -> i64 {
    parts
        .iter()
        .filter_map(|part| match part {
            FormulaPart::Literal(text) => Some(text.as_str()),
            FormulaPart::Placeholder(_) => None,
        })
        .flat_map(|text| DICE_EXPR.captures_iter(text))
        .map(|caps| {
            let count = caps
                .get(1)
                .map(|m| m.as_str())
                .filter(|s| !s.is_empty())
                .and_then(|s| s.parse::<i64>().ok())
                .unwrap_or(1);
            let faces = caps[2].parse::<i64>().unwrap_or(0);
            count.saturating_mul(faces)
        })
        .fold(0i64, i64::saturating_add)
}

/// Produces critical variants of damage rolls.
#[derive(Debug, Clone, Copy)]
pub struct CriticalExpander {
    evaluator: Evaluator,
    policy: CritPolicy,
    multiplier: u32,
}

impl CriticalExpander {
    pub fn new(evaluator: Evaluator, policy: CritPolicy, multiplier: u32) -> Self {
        Self {
            evaluator,
            policy,
            multiplier: multiplier.clamp(1, MAX_DICE),
        }
    }

    pub fn policy(&self) -> CritPolicy {
        self.policy
    }

    /// Expand `base`, the non-critical evaluation of `parts`.
    ///
    /// `bonus_dice` extra dice are added to the first term under
    /// `DoubleDice`, and only when that term is a dice term.
    pub fn expand<D: DieSource + ?Sized>(
        &self,
        parts: &[FormulaPart],
        context: &RollContext,
        base: &EvaluatedRoll,
        bonus_dice: u32,
        dice: &mut D,
    ) -> Result<EvaluatedRoll, FormulaError> {
        match self.policy {
            CritPolicy::DoubleDice => self.double_dice(base, bonus_dice, dice),
            CritPolicy::MaxCritDice => self.max_crit_dice(parts, context, dice),
        }
    }

    fn double_dice<D: DieSource + ?Sized>(
        &self,
        base: &EvaluatedRoll,
        bonus_dice: u32,
        dice: &mut D,
    ) -> Result<EvaluatedRoll, FormulaError> {
        let mut terms = base.terms.clone();
        for (i, term) in terms.iter_mut().enumerate() {
            let RollTerm::Dice(die) = term else {
                continue;
            };
            let bonus = if i == 0 { bonus_dice } else { 0 };
            let extra = die
                .count()
                .checked_mul(self.multiplier - 1)
                .and_then(|extra| extra.checked_add(bonus))
                .ok_or(FormulaError::TooManyDice {
                    count: die.count().saturating_mul(self.multiplier).saturating_add(bonus),
                    limit: MAX_DICE,
                })?;
            self.evaluator.extend_term(die, extra, dice)?;
        }
        let mut expanded = EvaluatedRoll::from_terms(terms)?;
        expanded.is_critical = base.is_critical;
        expanded.is_fumble = base.is_fumble;
        debug!(base = %base.formula, expanded = %expanded.formula, "doubled critical dice");
        Ok(expanded)
    }

    fn max_crit_dice<D: DieSource + ?Sized>(
        &self,
        parts: &[FormulaPart],
        context: &RollContext,
        dice: &mut D,
    ) -> Result<EvaluatedRoll, FormulaError> {
        let bonus = max_dice_bonus(parts);
        let mut crit_parts = parts.to_vec();
        crit_parts.push(FormulaPart::placeholder("crit"));
        let crit_context = context.clone().with("crit", bonus);
        debug!(bonus, "adding maximum crit dice");
        self.evaluator
            .evaluate(&crit_parts, JoinStyle::Compact, &crit_context, dice)
    }
}
