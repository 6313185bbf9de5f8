//! Testing utilities.
//!
//! This module provides deterministic stand-ins for the host:
//! - `ScriptedDice` returns die faces from a script instead of an RNG
//! - `SampleItem` fixtures implement the roll capability traits
//! - `RecordingSink` captures everything sent to the presentation layer

use crate::card::{PresentationError, PresentationSink};
use crate::dice::DieSource;
use crate::formula::{AmmoSupply, DamagePart, RollContext};
use crate::render::RenderableOutcome;
use crate::roll::{
    Ability, ActionType, ActorFeatures, AttackProfile, AttackRollable, DamageProfile,
    DamageRollable, FormulaProfile, ItemKind,
};
use async_trait::async_trait;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use uuid::Uuid;

/// A die source that replays scripted faces.
///
/// Values are clamped to the die size. Once the script is exhausted every die
/// rolls 1, unless the script cycles.
#[derive(Debug, Clone)]
pub struct ScriptedDice {
    values: Vec<u32>,
    cursor: usize,
    cycle: bool,
}

impl ScriptedDice {
    pub fn new(values: Vec<u32>) -> Self {
        Self {
            values,
            cursor: 0,
            cycle: false,
        }
    }

    /// Repeat the script forever.
    pub fn cycle(values: Vec<u32>) -> Self {
        Self {
            cycle: true,
            ..Self::new(values)
        }
    }

    /// Number of dice rolled so far.
    pub fn consumed(&self) -> usize {
        self.cursor
    }

    /// Scripted values not yet used.
    pub fn remaining(&self) -> usize {
        if self.cycle {
            usize::MAX
        } else {
            self.values.len().saturating_sub(self.cursor)
        }
    }
}

impl DieSource for ScriptedDice {
    fn roll_die(&mut self, faces: u32) -> u32 {
        let value = if self.values.is_empty() {
            1
        } else if self.cycle {
            self.values[self.cursor % self.values.len()]
        } else {
            self.values.get(self.cursor).copied().unwrap_or(1)
        };
        self.cursor += 1;
        value.clamp(1, faces.max(1))
    }
}

/// An item fixture with plain profile data.
#[derive(Debug, Clone, Default)]
pub struct SampleItem {
    pub attack: Option<AttackProfile>,
    pub damage: Option<DamageProfile>,
    pub formula: Option<FormulaProfile>,
    pub privileged_only: bool,
}

impl SampleItem {
    /// Strength weapon, `1d8 + @mod` slashing, versatile `1d10 + @mod`.
    /// Modifier 3, proficiency 2.
    pub fn longsword() -> Self {
        let context = RollContext::new().with("mod", 3).with("prof", 2);
        Self {
            attack: Some(AttackProfile {
                kind: ItemKind::Weapon,
                action_type: ActionType::MeleeWeapon,
                ability: Some(Ability::Str),
                proficient: true,
                attack_bonus: None,
                actor_attack_bonus: None,
                ammo: None,
                context: context.clone(),
                features: ActorFeatures::default(),
            }),
            damage: Some(DamageProfile {
                action_type: ActionType::MeleeWeapon,
                parts: vec![DamagePart::new("1d8 + @mod", "slashing")],
                versatile: Some("1d10 + @mod".to_string()),
                actor_damage_bonus: None,
                is_healing: false,
                context,
                features: ActorFeatures::default(),
            }),
            formula: None,
            privileged_only: false,
        }
    }

    /// Dexterity bow with arrows (+1 to hit, +1 piercing) and elven accuracy.
    /// Modifier 4, proficiency 2.
    pub fn longbow(arrows: u32) -> Self {
        let context = RollContext::new().with("mod", 4).with("prof", 2);
        let features = ActorFeatures {
            elven_accuracy: true,
            ..Default::default()
        };
        Self {
            attack: Some(AttackProfile {
                kind: ItemKind::Weapon,
                action_type: ActionType::RangedWeapon,
                ability: Some(Ability::Dex),
                proficient: true,
                attack_bonus: None,
                actor_attack_bonus: None,
                ammo: Some(AmmoSupply {
                    quantity: arrows,
                    consume_amount: 1,
                    attack_bonus: Some("1".to_string()),
                    damage_parts: vec![DamagePart::new("1", "piercing")],
                }),
                context: context.clone(),
                features: features.clone(),
            }),
            damage: Some(DamageProfile {
                action_type: ActionType::RangedWeapon,
                parts: vec![DamagePart::new("1d8 + @mod", "piercing")],
                versatile: None,
                actor_damage_bonus: None,
                is_healing: false,
                context,
                features,
            }),
            formula: None,
            privileged_only: false,
        }
    }

    /// Intelligence cantrip, `1d10` fire. Modifier 4, proficiency 2.
    pub fn fire_bolt() -> Self {
        let context = RollContext::new().with("mod", 4).with("prof", 2);
        Self {
            attack: Some(AttackProfile {
                kind: ItemKind::Spell,
                action_type: ActionType::RangedSpell,
                ability: Some(Ability::Int),
                proficient: true,
                attack_bonus: None,
                actor_attack_bonus: None,
                ammo: None,
                context: context.clone(),
                features: ActorFeatures::default(),
            }),
            damage: Some(DamageProfile {
                action_type: ActionType::RangedSpell,
                parts: vec![DamagePart::new("1d10", "fire")],
                versatile: None,
                actor_damage_bonus: None,
                is_healing: false,
                context,
                features: ActorFeatures::default(),
            }),
            formula: None,
            privileged_only: false,
        }
    }

    /// No attack; heals `2d4 + 2`, with a `1d10` other formula.
    pub fn healing_potion() -> Self {
        Self {
            attack: None,
            damage: Some(DamageProfile {
                action_type: ActionType::Heal,
                parts: vec![DamagePart::new("2d4 + 2", "healing")],
                versatile: None,
                actor_damage_bonus: None,
                is_healing: true,
                context: RollContext::new(),
                features: ActorFeatures::default(),
            }),
            formula: Some(FormulaProfile {
                formula: "1d10".to_string(),
                context: RollContext::new(),
            }),
            privileged_only: false,
        }
    }

    /// Mark the owning actor as owned only by privileged users.
    pub fn privileged(mut self) -> Self {
        self.privileged_only = true;
        self
    }
}

impl AttackRollable for SampleItem {
    fn attack_profile(&self) -> Option<AttackProfile> {
        self.attack.clone()
    }
}

impl DamageRollable for SampleItem {
    fn damage_profile(&self) -> Option<DamageProfile> {
        self.damage.clone()
    }

    fn formula_profile(&self) -> Option<FormulaProfile> {
        self.formula.clone()
    }

    fn owned_only_by_privileged(&self) -> bool {
        self.privileged_only
    }
}

/// A presentation sink that records what it is given.
#[derive(Debug, Default)]
pub struct RecordingSink {
    outcomes: Mutex<Vec<RenderableOutcome>>,
    controls: Mutex<Vec<(Uuid, bool)>>,
    errors: Mutex<Vec<String>>,
    delay: Option<Duration>,
    failure: Option<String>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate a dice animation of the given length.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Fail every presentation with `message`.
    pub fn failing(mut self, message: impl Into<String>) -> Self {
        self.failure = Some(message.into());
        self
    }

    /// Outcomes presented so far, in order.
    pub fn outcomes(&self) -> Vec<RenderableOutcome> {
        self.outcomes.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Every control toggle as `(card, enabled)`.
    pub fn control_events(&self) -> Vec<(Uuid, bool)> {
        self.controls.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn errors(&self) -> Vec<String> {
        self.errors.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[async_trait]
impl PresentationSink for RecordingSink {
    async fn present(&self, outcome: &RenderableOutcome) -> Result<(), PresentationError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(message) = &self.failure {
            return Err(PresentationError::Failed(message.clone()));
        }
        self.outcomes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(outcome.clone());
        Ok(())
    }

    fn set_controls_enabled(&self, card: Uuid, enabled: bool) {
        self.controls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((card, enabled));
    }

    fn notify_error(&self, _card: Uuid, message: &str) {
        self.errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(message.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::HeaderLabel;
    use crate::session::{ActionKind, RollSession};

    #[test]
    fn test_scripted_dice() {
        let mut dice = ScriptedDice::new(vec![4, 9]);
        assert_eq!(dice.roll_die(6), 4);
        // Clamped to the die size.
        assert_eq!(dice.roll_die(6), 6);
        assert_eq!(dice.roll_die(6), 1);
        assert_eq!(dice.consumed(), 3);
        assert_eq!(dice.remaining(), 0);
    }

    #[test]
    fn test_cycling_dice() {
        let mut dice = ScriptedDice::cycle(vec![2, 5]);
        let rolled: Vec<u32> = (0..5).map(|_| dice.roll_die(20)).collect();
        assert_eq!(rolled, vec![2, 5, 2, 5, 2]);
    }

    #[test]
    fn test_sample_capabilities() {
        assert!(SampleItem::longsword().has_attack());
        assert!(SampleItem::longsword().has_damage());
        assert!(!SampleItem::healing_potion().has_attack());
        assert!(SampleItem::healing_potion().formula_profile().is_some());
        assert!(SampleItem::fire_bolt().privileged().owned_only_by_privileged());
    }

    #[tokio::test]
    async fn test_recording_sink() {
        let card = Uuid::new_v4();
        let outcome = RenderableOutcome::new(
            card,
            ActionKind::Attack,
            HeaderLabel::Attack,
            Vec::new(),
            &RollSession::new(),
        );

        let sink = RecordingSink::new();
        sink.present(&outcome).await.unwrap();
        sink.set_controls_enabled(card, false);
        assert_eq!(sink.outcomes(), vec![outcome.clone()]);
        assert_eq!(sink.control_events(), vec![(card, false)]);

        let failing = RecordingSink::new().failing("no canvas");
        assert!(failing.present(&outcome).await.is_err());
        assert!(failing.outcomes().is_empty());
    }
}
