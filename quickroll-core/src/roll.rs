//! Attack, damage and formula roll pipelines.
//!
//! The host's actor/item model plugs in through [`AttackRollable`] and
//! [`DamageRollable`], which hand over plain profile data. The [`Roller`]
//! assembles formulas, evaluates them, classifies attacks and expands
//! critical damage.

use crate::classify::{classify, Thresholds};
use crate::config::RollConfig;
use crate::critical::CriticalExpander;
use crate::dice::{DieSource, EvaluatedRoll, Evaluator, FormulaError};
use crate::formula::{
    assemble_damage_parts, assemble_parts, AmmoSupply, AttackModifiers, DamageModifiers,
    DamagePart, FormulaPart, JoinStyle, RollContext,
};
use crate::render::HeaderLabel;
use crate::session::ActionKind;
use crate::vantage::Advantage;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error};

/// The item cannot perform the requested roll.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PreconditionError {
    #[error("You may not place an Attack Roll with this Item.")]
    NoAttack,
    #[error("You may not make a Damage Roll with this Item.")]
    NoDamage,
    #[error("This Item does not have a formula to roll!")]
    NoFormula,
}

/// Error type for roll pipelines.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RollError {
    #[error("Dice roll evaluation failed: {0}")]
    Formula(#[from] FormulaError),
    #[error(transparent)]
    Precondition(#[from] PreconditionError),
}

/// Broad item categories that affect attack rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Weapon,
    Spell,
    Consumable,
    Equipment,
    Feat,
    Tool,
}

/// How an item is used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionType {
    #[serde(rename = "mwak")]
    MeleeWeapon,
    #[serde(rename = "rwak")]
    RangedWeapon,
    #[serde(rename = "msak")]
    MeleeSpell,
    #[serde(rename = "rsak")]
    RangedSpell,
    #[serde(rename = "save")]
    Save,
    #[serde(rename = "heal")]
    Heal,
    #[serde(rename = "util")]
    Utility,
    #[serde(rename = "other")]
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Ability {
    Str,
    Dex,
    Con,
    Int,
    Wis,
    Cha,
}

/// Actor features that change how rolls are made.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActorFeatures {
    /// Expanded critical range for weapon attacks.
    pub weapon_critical_threshold: Option<u32>,
    /// Expanded critical range for spell attacks.
    pub spell_critical_threshold: Option<u32>,
    /// Roll an extra die on advantage with dex/int/wis/cha attacks.
    pub elven_accuracy: bool,
    /// Reroll natural ones on the d20.
    pub halfling_lucky: bool,
    /// Extra dice on melee weapon critical hits.
    pub melee_critical_damage_dice: u32,
}

/// What the host supplies for an attack roll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttackProfile {
    pub kind: ItemKind,
    pub action_type: ActionType,
    pub ability: Option<Ability>,
    pub proficient: bool,
    pub attack_bonus: Option<String>,
    /// Actor-wide attack bonus for this action type.
    pub actor_attack_bonus: Option<String>,
    pub ammo: Option<AmmoSupply>,
    /// Seed values: `mod`, `prof`, and an optional situational `bonus`.
    pub context: RollContext,
    pub features: ActorFeatures,
}

/// What the host supplies for a damage roll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DamageProfile {
    pub action_type: ActionType,
    pub parts: Vec<DamagePart>,
    pub versatile: Option<String>,
    /// Actor-wide damage bonus for this action type.
    pub actor_damage_bonus: Option<String>,
    pub is_healing: bool,
    pub context: RollContext,
    pub features: ActorFeatures,
}

/// What the host supplies for an "other formula" roll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormulaProfile {
    pub formula: String,
    pub context: RollContext,
}

/// Implemented by host items that can make attack rolls.
pub trait AttackRollable {
    /// `None` when the item has no attack.
    fn attack_profile(&self) -> Option<AttackProfile>;

    fn has_attack(&self) -> bool {
        self.attack_profile().is_some()
    }
}

/// Implemented by host items that can roll damage or a free formula.
pub trait DamageRollable {
    /// `None` when the item has no damage parts.
    fn damage_profile(&self) -> Option<DamageProfile>;

    fn formula_profile(&self) -> Option<FormulaProfile> {
        None
    }

    fn has_damage(&self) -> bool {
        self.damage_profile().is_some_and(|p| !p.parts.is_empty())
    }

    /// Whether only privileged (GM) users own the actor.
    fn owned_only_by_privileged(&self) -> bool {
        false
    }
}

/// Ammunition damage carried from an attack to the following damage roll.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AmmoBonus {
    pub damage_parts: Vec<DamagePart>,
}

/// Parameters of one attack roll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttackRequest {
    /// `Normal` for the primary attack, a direction for the vantage roll.
    pub direction: Advantage,
    pub reroll: bool,
}

impl AttackRequest {
    pub fn attack() -> Self {
        Self {
            direction: Advantage::Normal,
            reroll: false,
        }
    }

    pub fn vantage(direction: Advantage) -> Self {
        Self {
            direction,
            reroll: false,
        }
    }

    pub fn rerolled(mut self) -> Self {
        self.reroll = true;
        self
    }

    pub fn action(&self) -> ActionKind {
        if self.direction.is_normal() {
            ActionKind::Attack
        } else {
            ActionKind::Vantage
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AttackOutcome {
    pub action: ActionKind,
    pub roll: EvaluatedRoll,
    pub header: HeaderLabel,
    /// Ammunition damage for the caller to pass to the damage roll.
    pub ammo: Option<AmmoBonus>,
    /// Rounds to deduct; only set on a first, non-vantage attack.
    pub consume_ammo: Option<u32>,
}

/// Parameters of one damage roll.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DamageRequest {
    pub versatile: bool,
    pub critical: bool,
    pub ammo: Option<AmmoBonus>,
}

impl DamageRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn versatile(mut self) -> Self {
        self.versatile = true;
        self
    }

    pub fn critical(mut self, critical: bool) -> Self {
        self.critical = critical;
        self
    }

    pub fn with_ammo(mut self, ammo: Option<AmmoBonus>) -> Self {
        self.ammo = ammo;
        self
    }
}

/// A roll for one damage type.
#[derive(Debug, Clone, PartialEq)]
pub struct TypedRoll {
    pub damage_type: Option<String>,
    pub roll: EvaluatedRoll,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DamageOutcome {
    pub action: ActionKind,
    pub parts: Vec<TypedRoll>,
    /// All parts merged into one roll, as recorded on the card.
    pub roll: EvaluatedRoll,
    pub header: HeaderLabel,
    pub is_critical: bool,
}

/// Runs roll pipelines under one configuration.
#[derive(Debug, Clone)]
pub struct Roller {
    config: RollConfig,
    evaluator: Evaluator,
    expander: CriticalExpander,
}

impl Roller {
    pub fn new(config: RollConfig) -> Self {
        let evaluator = Evaluator::new(config.reroll_mode);
        let expander = CriticalExpander::new(
            evaluator,
            config.crit_calculation,
            config.critical_multiplier,
        );
        Self {
            config,
            evaluator,
            expander,
        }
    }

    pub fn config(&self) -> &RollConfig {
        &self.config
    }

    /// Roll an attack or its vantage roll.
    pub fn roll_attack<I, D>(
        &self,
        item: &I,
        request: AttackRequest,
        dice: &mut D,
    ) -> Result<AttackOutcome, RollError>
    where
        I: AttackRollable + ?Sized,
        D: DieSource + ?Sized,
    {
        let profile = item.attack_profile().ok_or(PreconditionError::NoAttack)?;

        let modifiers = AttackModifiers {
            proficient: !matches!(profile.kind, ItemKind::Weapon | ItemKind::Consumable)
                || profile.proficient,
            item_bonus: profile.attack_bonus.clone(),
            actor_bonus: profile.actor_attack_bonus.clone(),
            ammo: profile.ammo.clone(),
        };
        let (mut parts, context) = assemble_parts(&modifiers, &profile.context);
        parts.insert(0, d20_part(&profile, request.direction));

        let roll = self
            .evaluator
            .evaluate(&parts, JoinStyle::Spaced, &context, dice)
            .map_err(|err| log_failure(&parts, err))?;
        let roll = classify(roll, thresholds(&profile));

        let usable_ammo = profile.ammo.as_ref().filter(|ammo| ammo.is_usable());
        let ammo = usable_ammo.map(|ammo| AmmoBonus {
            damage_parts: ammo.damage_parts.clone(),
        });
        let consume_ammo = usable_ammo
            .filter(|_| request.direction.is_normal() && !request.reroll)
            .map(|ammo| ammo.consume_amount);

        let header = match request.direction {
            Advantage::Advantage => HeaderLabel::Advantage,
            Advantage::Disadvantage => HeaderLabel::Disadvantage,
            Advantage::Normal => HeaderLabel::Attack,
        };

        debug!(
            formula = %roll.formula,
            total = roll.total,
            critical = roll.is_critical,
            fumble = roll.is_fumble,
            "attack rolled"
        );

        Ok(AttackOutcome {
            action: request.action(),
            roll,
            header,
            ammo,
            consume_ammo,
        })
    }

    /// Roll damage, one roll per damage type.
    pub fn roll_damage<I, D>(
        &self,
        item: &I,
        request: DamageRequest,
        dice: &mut D,
    ) -> Result<DamageOutcome, RollError>
    where
        I: DamageRollable + ?Sized,
        D: DieSource + ?Sized,
    {
        let profile = item
            .damage_profile()
            .filter(|p| !p.parts.is_empty())
            .ok_or(PreconditionError::NoDamage)?;

        let modifiers = DamageModifiers {
            versatile: profile.versatile.clone().filter(|_| request.versatile),
            actor_bonus: profile.actor_damage_bonus.clone(),
            ammo_parts: request
                .ammo
                .map(|ammo| ammo.damage_parts)
                .unwrap_or_default(),
            situational_bonus: profile
                .context
                .non_blank("bonus")
                .map(|bonus| bonus.to_string()),
        };
        let damage_parts = assemble_damage_parts(&profile.parts, &modifiers);

        let bonus_dice = if profile.action_type == ActionType::MeleeWeapon {
            profile.features.melee_critical_damage_dice
        } else {
            0
        };

        let mut parts = Vec::with_capacity(damage_parts.len());
        for part in damage_parts {
            let roll = self.roll_arbitrary(
                &[FormulaPart::parse(&part.formula)],
                &profile.context,
                request.critical,
                bonus_dice,
                dice,
            )?;
            parts.push(TypedRoll {
                damage_type: Some(part.damage_type),
                roll,
            });
        }

        let header = if profile.is_healing {
            HeaderLabel::Healing
        } else if request.versatile {
            HeaderLabel::Versatile
        } else {
            HeaderLabel::Damage
        };
        let action = if request.versatile {
            ActionKind::Versatile
        } else {
            ActionKind::Damage
        };

        damage_outcome(action, parts, header, request.critical)
    }

    /// Roll the item's free formula.
    pub fn roll_formula<I, D>(
        &self,
        item: &I,
        critical: bool,
        dice: &mut D,
    ) -> Result<DamageOutcome, RollError>
    where
        I: DamageRollable + ?Sized,
        D: DieSource + ?Sized,
    {
        let profile = item
            .formula_profile()
            .filter(|p| !p.formula.trim().is_empty())
            .ok_or(PreconditionError::NoFormula)?;

        let roll = self.roll_arbitrary(
            &[FormulaPart::parse(&profile.formula)],
            &profile.context,
            critical,
            0,
            dice,
        )?;
        let parts = vec![TypedRoll {
            damage_type: None,
            roll,
        }];
        damage_outcome(ActionKind::Formula, parts, HeaderLabel::OtherFormula, critical)
    }

    fn roll_arbitrary<D: DieSource + ?Sized>(
        &self,
        parts: &[FormulaPart],
        context: &RollContext,
        critical: bool,
        bonus_dice: u32,
        dice: &mut D,
    ) -> Result<EvaluatedRoll, RollError> {
        let base = self
            .evaluator
            .evaluate(parts, JoinStyle::Compact, context, dice)
            .map_err(|err| log_failure(parts, err))?;
        if !critical {
            return Ok(base);
        }
        let mut expanded = self
            .expander
            .expand(parts, context, &base, bonus_dice, dice)
            .map_err(|err| log_failure(parts, err))?;
        expanded.is_critical = true;
        Ok(expanded)
    }
}

fn d20_part(profile: &AttackProfile, direction: Advantage) -> FormulaPart {
    let mut count = 1;
    let mut modifiers = String::new();

    if profile.features.halfling_lucky {
        modifiers.push_str("r=1");
    }

    let elven_accuracy = profile.features.elven_accuracy
        && matches!(profile.kind, ItemKind::Weapon | ItemKind::Spell)
        && matches!(
            profile.ability,
            Some(Ability::Dex | Ability::Int | Ability::Wis | Ability::Cha)
        );
    if direction == Advantage::Advantage && elven_accuracy {
        count = 2;
        modifiers.push_str("kh");
    }

    FormulaPart::literal(format!("{count}d20{modifiers}"))
}

fn thresholds(profile: &AttackProfile) -> Thresholds {
    let expanded = match profile.kind {
        ItemKind::Weapon => profile.features.weapon_critical_threshold,
        ItemKind::Spell => profile.features.spell_critical_threshold,
        _ => None,
    };
    expanded.map(Thresholds::with_critical).unwrap_or_default()
}

fn damage_outcome(
    action: ActionKind,
    parts: Vec<TypedRoll>,
    header: HeaderLabel,
    is_critical: bool,
) -> Result<DamageOutcome, RollError> {
    let rolls: Vec<EvaluatedRoll> = parts.iter().map(|p| p.roll.clone()).collect();
    let roll = EvaluatedRoll::merge(&rolls).map_err(|err| {
        error!(%err, "damage parts could not be merged");
        err
    })?;
    Ok(DamageOutcome {
        action,
        parts,
        roll,
        header,
        is_critical,
    })
}

fn log_failure(parts: &[FormulaPart], err: FormulaError) -> FormulaError {
    let formula: Vec<String> = parts.iter().map(|p| p.to_string()).collect();
    error!(formula = ?formula, %err, "dice roll evaluation failed");
    err
}
