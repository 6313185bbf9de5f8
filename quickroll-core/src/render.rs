//! Structured presentation data.
//!
//! The host owns templating; this module only describes what to show.

use crate::dice::EvaluatedRoll;
use crate::session::{ActionKind, RollSession};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Header shown above a rolled action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeaderLabel {
    Attack,
    Advantage,
    Disadvantage,
    Damage,
    Healing,
    Versatile,
    OtherFormula,
}

impl HeaderLabel {
    pub fn title(&self) -> &'static str {
        match self {
            HeaderLabel::Attack => "Attack",
            HeaderLabel::Advantage => "Advantage",
            HeaderLabel::Disadvantage => "Disadvantage",
            HeaderLabel::Damage => "Damage",
            HeaderLabel::Healing => "Healing",
            HeaderLabel::Versatile => "Versatile",
            HeaderLabel::OtherFormula => "Other Formula",
        }
    }
}

/// One displayed roll; damage cards show one per damage type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderedRoll {
    pub label: Option<String>,
    pub roll: EvaluatedRoll,
    pub text: String,
}

impl RenderedRoll {
    pub fn new(label: Option<String>, roll: EvaluatedRoll) -> Self {
        let text = roll.to_string();
        Self { label, roll, text }
    }
}

/// Everything the presentation sink needs to replace an action button with
/// its roll.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderableOutcome {
    pub card: Uuid,
    pub action: ActionKind,
    pub header: HeaderLabel,
    /// Button identifier for re-rolling this action.
    pub reroll_action: String,
    pub rolls: Vec<RenderedRoll>,
    pub total: i64,
    pub is_critical: bool,
    pub is_fumble: bool,
    /// This roll lost the vantage comparison.
    pub discarded: bool,
    /// The attack-family roll the card currently retains.
    pub retained_attack: Option<ActionKind>,
    /// Ammunition the host should deduct for this roll.
    pub ammo_consumed: Option<u32>,
}

impl RenderableOutcome {
    pub fn new(
        card: Uuid,
        action: ActionKind,
        header: HeaderLabel,
        rolls: Vec<RenderedRoll>,
        session: &RollSession,
    ) -> Self {
        let total = rolls.iter().map(|r| r.roll.total).sum();
        let is_critical = rolls.iter().any(|r| r.roll.is_critical);
        let is_fumble = rolls.iter().any(|r| r.roll.is_fumble);
        Self {
            card,
            action,
            header,
            reroll_action: format!("{action}-reroll"),
            rolls,
            total,
            is_critical,
            is_fumble,
            discarded: session.is_discarded(action),
            retained_attack: session.retained_action(),
            ammo_consumed: None,
        }
    }

    pub fn with_ammo_consumed(mut self, amount: Option<u32>) -> Self {
        self.ammo_consumed = amount;
        self
    }
}
