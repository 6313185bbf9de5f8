//! Advantage and disadvantage.
//!
//! A vantage roll is a second, independent evaluation of the attack formula.
//! The two totals are compared and one roll is retained; the primary roll wins
//! ties in either direction.

use crate::dice::EvaluatedRoll;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Advantage state for d20 rolls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Advantage {
    #[default]
    Normal,
    Advantage,
    Disadvantage,
}

impl Advantage {
    /// Combine two advantage states (advantage + disadvantage = normal).
    pub fn combine(self, other: Advantage) -> Advantage {
        match (self, other) {
            (Advantage::Normal, x) | (x, Advantage::Normal) => x,
            (Advantage::Advantage, Advantage::Disadvantage) => Advantage::Normal,
            (Advantage::Disadvantage, Advantage::Advantage) => Advantage::Normal,
            (Advantage::Advantage, Advantage::Advantage) => Advantage::Advantage,
            (Advantage::Disadvantage, Advantage::Disadvantage) => Advantage::Disadvantage,
        }
    }

    /// Host modifier-key convention: ctrl/meta selects disadvantage.
    pub fn from_modifier_keys(ctrl_or_meta: bool) -> Advantage {
        if ctrl_or_meta {
            Advantage::Disadvantage
        } else {
            Advantage::Advantage
        }
    }

    pub fn is_normal(&self) -> bool {
        *self == Advantage::Normal
    }
}

/// Which of the two attack evaluations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Slot {
    Primary,
    Secondary,
}

/// Outcome of comparing a primary roll with an optional vantage roll.
#[derive(Debug, Clone, Copy)]
pub struct VantageResolution<'a> {
    pub retained: &'a EvaluatedRoll,
    pub discarded: Option<&'a EvaluatedRoll>,
    pub winner: Slot,
}

/// Whether the primary total is kept over the secondary total.
///
/// Advantage keeps the higher total, disadvantage the lower; ties keep the
/// primary.
pub fn primary_wins(primary_total: i64, secondary_total: i64, direction: Advantage) -> bool {
    match direction {
        Advantage::Advantage => primary_total >= secondary_total,
        Advantage::Disadvantage => primary_total <= secondary_total,
        Advantage::Normal => true,
    }
}

/// Pick the retained roll.
///
/// With no secondary roll, or no direction to compare in, the primary is
/// retained.
pub fn resolve_vantage<'a>(
    primary: &'a EvaluatedRoll,
    secondary: Option<&'a EvaluatedRoll>,
    direction: Advantage,
) -> VantageResolution<'a> {
    let Some(secondary) = secondary else {
        if !direction.is_normal() {
            debug!(?direction, "vantage requested without a secondary roll");
        }
        return VantageResolution {
            retained: primary,
            discarded: None,
            winner: Slot::Primary,
        };
    };

    if direction.is_normal() {
        debug!("secondary roll present without a vantage direction; keeping primary");
    }

    if primary_wins(primary.total, secondary.total, direction) {
        VantageResolution {
            retained: primary,
            discarded: Some(secondary),
            winner: Slot::Primary,
        }
    } else {
        VantageResolution {
            retained: secondary,
            discarded: Some(primary),
            winner: Slot::Secondary,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dice::RollTerm;

    fn total(value: i64) -> EvaluatedRoll {
        EvaluatedRoll::from_terms(vec![RollTerm::Constant { value }]).unwrap()
    }

    #[test]
    fn test_advantage_combine() {
        assert_eq!(
            Advantage::Normal.combine(Advantage::Advantage),
            Advantage::Advantage
        );
        assert_eq!(
            Advantage::Advantage.combine(Advantage::Disadvantage),
            Advantage::Normal
        );
        assert_eq!(
            Advantage::Advantage.combine(Advantage::Advantage),
            Advantage::Advantage
        );
    }

    #[test]
    fn test_no_secondary() {
        let primary = total(12);
        let resolution = resolve_vantage(&primary, None, Advantage::Advantage);
        assert_eq!(resolution.winner, Slot::Primary);
        assert!(resolution.discarded.is_none());
        assert_eq!(resolution.retained.total, 12);
    }

    #[test]
    fn test_ties_keep_primary() {
        let primary = total(15);
        let secondary = total(15);
        for direction in [Advantage::Advantage, Advantage::Disadvantage] {
            let resolution = resolve_vantage(&primary, Some(&secondary), direction);
            assert_eq!(resolution.winner, Slot::Primary);
            assert!(std::ptr::eq(resolution.retained, &primary));
        }
    }

    #[test]
    fn test_direction() {
        let low = total(10);
        let high = total(15);

        let resolution = resolve_vantage(&low, Some(&high), Advantage::Advantage);
        assert_eq!(resolution.winner, Slot::Secondary);
        assert_eq!(resolution.retained.total, 15);
        assert_eq!(resolution.discarded.map(|r| r.total), Some(10));

        let resolution = resolve_vantage(&low, Some(&high), Advantage::Disadvantage);
        assert_eq!(resolution.winner, Slot::Primary);
        assert_eq!(resolution.retained.total, 10);
    }

    #[test]
    fn test_discarded_keeps_flags() {
        let primary = total(19);
        let mut secondary = total(3);
        secondary.is_fumble = true;
        let resolution = resolve_vantage(&primary, Some(&secondary), Advantage::Advantage);
        assert!(resolution.discarded.unwrap().is_fumble);
        assert!(!resolution.retained.is_fumble);
    }

    #[test]
    fn test_modifier_keys() {
        assert_eq!(Advantage::from_modifier_keys(true), Advantage::Disadvantage);
        assert_eq!(Advantage::from_modifier_keys(false), Advantage::Advantage);
    }
}
