//! Critical and fumble detection on d20 terms.

use crate::dice::EvaluatedRoll;
use serde::{Deserialize, Serialize};

/// Faces that mark a d20 as critical or fumbled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Thresholds {
    /// Active d20 results at or above this are critical.
    pub critical: u32,
    /// Active d20 results equal to this are fumbles.
    pub fumble: u32,
}

impl Thresholds {
    pub fn new(critical: u32, fumble: u32) -> Self {
        Self { critical, fumble }
    }

    /// Expanded critical range, e.g. 19 for an improved-critical feature.
    pub fn with_critical(critical: u32) -> Self {
        Self {
            critical,
            ..Self::default()
        }
    }
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            critical: 20,
            fumble: 1,
        }
    }
}

/// Set `is_critical`/`is_fumble` from the active d20 results.
///
/// Flags are recomputed from scratch, so a reclassified roll never keeps a
/// stale flag. Only 20-sided terms are inspected.
pub fn classify(mut roll: EvaluatedRoll, thresholds: Thresholds) -> EvaluatedRoll {
    classify_in_place(&mut roll, thresholds);
    roll
}

pub fn classify_in_place(roll: &mut EvaluatedRoll, thresholds: Thresholds) {
    let mut is_critical = false;
    let mut is_fumble = false;

    for term in roll.dice().filter(|t| t.faces() == 20) {
        for value in term.active_values() {
            if value >= thresholds.critical {
                is_critical = true;
            } else if value == thresholds.fumble {
                is_fumble = true;
            }
        }
    }

    roll.is_critical = is_critical;
    roll.is_fumble = is_fumble;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dice::Evaluator;
    use crate::formula::RollContext;
    use crate::testing::ScriptedDice;

    fn evaluate(formula: &str, faces: Vec<u32>) -> EvaluatedRoll {
        let mut dice = ScriptedDice::new(faces);
        Evaluator::default()
            .evaluate_formula(formula, &RollContext::new(), &mut dice)
            .unwrap()
    }

    #[test]
    fn test_natural_twenty() {
        let roll = classify(evaluate("1d20+5", vec![20]), Thresholds::default());
        assert!(roll.is_critical);
        assert!(!roll.is_fumble);
    }

    #[test]
    fn test_natural_one() {
        let roll = classify(evaluate("1d20+5", vec![1]), Thresholds::default());
        assert!(!roll.is_critical);
        assert!(roll.is_fumble);
    }

    #[test]
    fn test_expanded_range() {
        let thresholds = Thresholds::with_critical(19);
        assert!(classify(evaluate("1d20", vec![19]), thresholds).is_critical);
        assert!(classify(evaluate("1d20", vec![20]), thresholds).is_critical);
        assert!(!classify(evaluate("1d20", vec![18]), thresholds).is_critical);
    }

    #[test]
    fn test_only_d20_terms_inspected() {
        let roll = classify(evaluate("1d20 + 1d100 + 1d4", vec![10, 20, 1]), Thresholds::default());
        assert!(!roll.is_critical);
        assert!(!roll.is_fumble);
    }

    #[test]
    fn test_dropped_die_ignored() {
        let roll = classify(evaluate("2d20kh", vec![1, 12]), Thresholds::default());
        assert!(!roll.is_fumble);

        let roll = classify(evaluate("2d20kl", vec![20, 5]), Thresholds::default());
        assert!(!roll.is_critical);
    }

    #[test]
    fn test_flags_reset_on_reclassify() {
        let mut roll = evaluate("1d20", vec![8]);
        roll.is_critical = true;
        roll.is_fumble = true;
        let roll = classify(roll, Thresholds::default());
        assert!(!roll.is_critical);
        assert!(!roll.is_fumble);
    }

    #[test]
    fn test_independent_terms() {
        let roll = classify(evaluate("1d20 + 1d20", vec![20, 1]), Thresholds::default());
        assert!(roll.is_critical);
        assert!(roll.is_fumble);
    }
}
