//! RollSession - the per-chat-card record of rolled actions.
//!
//! Each card remembers the latest roll for every action it has made. Attack
//! and vantage rolls are compared to decide which one is retained, and the
//! card's critical/fumble state mirrors the retained roll. Damage-family
//! rolls are simply replaced on re-roll.

use crate::dice::EvaluatedRoll;
use crate::vantage::{resolve_vantage, Advantage, Slot};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tracing::debug;

/// Errors from session persistence.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// The named actions a card can roll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Attack,
    Vantage,
    Damage,
    Versatile,
    Formula,
}

impl ActionKind {
    pub const ALL: [ActionKind; 5] = [
        ActionKind::Attack,
        ActionKind::Vantage,
        ActionKind::Damage,
        ActionKind::Versatile,
        ActionKind::Formula,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ActionKind::Attack => "attack",
            ActionKind::Vantage => "vantage",
            ActionKind::Damage => "damage",
            ActionKind::Versatile => "versatile",
            ActionKind::Formula => "formula",
        }
    }

    /// Attack and vantage rolls compete for retention.
    pub fn is_attack_family(&self) -> bool {
        matches!(self, ActionKind::Attack | ActionKind::Vantage)
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for ActionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ActionKind::ALL
            .into_iter()
            .find(|a| a.name() == s)
            .ok_or_else(|| format!("Unknown action: {s}"))
    }
}

/// Key-value storage on a host chat entry.
pub trait SessionCarrier {
    fn get_flag(&self, key: &str) -> Option<Value>;
    fn set_flag(&mut self, key: &str, value: Value);
    fn unset_flag(&mut self, key: &str);
}

impl SessionCarrier for HashMap<String, Value> {
    fn get_flag(&self, key: &str) -> Option<Value> {
        self.get(key).cloned()
    }

    fn set_flag(&mut self, key: &str, value: Value) {
        self.insert(key.to_string(), value);
    }

    fn unset_flag(&mut self, key: &str) {
        self.remove(key);
    }
}

const DIRECTION_KEY: &str = "vantage-direction";

/// Rolls recorded on one chat card.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RollSession {
    rolls: BTreeMap<ActionKind, EvaluatedRoll>,
    direction: Advantage,
    retained: Option<ActionKind>,
    is_critical: bool,
    is_fumble: bool,
}

impl RollSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the latest roll for `action`.
    ///
    /// Attack-family rolls reset the card's derived flags and re-run the
    /// retention comparison; other actions replace their previous roll.
    pub fn record(&mut self, action: ActionKind, roll: EvaluatedRoll) {
        if action.is_attack_family() {
            self.reset_attack_flags();
            self.rolls.insert(action, roll);
            self.refresh_retained();
            debug!(
                %action,
                retained = ?self.retained,
                critical = self.is_critical,
                fumble = self.is_fumble,
                "recorded attack roll"
            );
        } else if let Some(previous) = self.rolls.insert(action, roll) {
            debug!(%action, previous = previous.total, "replaced previous roll");
        }
    }

    /// Set the comparison direction for the vantage roll.
    pub fn set_direction(&mut self, direction: Advantage) {
        self.direction = direction;
        self.refresh_retained();
    }

    /// Record a vantage roll together with its direction.
    pub fn record_vantage(&mut self, direction: Advantage, roll: EvaluatedRoll) {
        self.direction = direction;
        self.record(ActionKind::Vantage, roll);
    }

    pub fn get(&self, action: ActionKind) -> Option<&EvaluatedRoll> {
        self.rolls.get(&action)
    }

    /// The roll for `action` unless it lost the vantage comparison.
    pub fn get_retained(&self, action: ActionKind) -> Option<&EvaluatedRoll> {
        if self.is_discarded(action) {
            None
        } else {
            self.get(action)
        }
    }

    /// Whichever attack-family roll is currently retained.
    pub fn retained_attack(&self) -> Option<&EvaluatedRoll> {
        self.retained.and_then(|action| self.get(action))
    }

    pub fn retained_action(&self) -> Option<ActionKind> {
        self.retained
    }

    pub fn is_discarded(&self, action: ActionKind) -> bool {
        action.is_attack_family() && self.rolls.contains_key(&action) && self.retained != Some(action)
    }

    pub fn direction(&self) -> Advantage {
        self.direction
    }

    /// `Some(true)` for advantage, `Some(false)` for disadvantage.
    pub fn is_advantage(&self) -> Option<bool> {
        match self.direction {
            Advantage::Normal => None,
            Advantage::Advantage => Some(true),
            Advantage::Disadvantage => Some(false),
        }
    }

    pub fn is_critical(&self) -> bool {
        self.is_critical
    }

    pub fn is_fumble(&self) -> bool {
        self.is_fumble
    }

    pub fn is_empty(&self) -> bool {
        self.rolls.is_empty()
    }

    fn reset_attack_flags(&mut self) {
        self.retained = None;
        self.is_critical = false;
        self.is_fumble = false;
    }

    fn refresh_retained(&mut self) {
        let attack = self.rolls.get(&ActionKind::Attack);
        let vantage = self.rolls.get(&ActionKind::Vantage);

        self.retained = match (attack, vantage) {
            (Some(a), v) => match resolve_vantage(a, v, self.direction).winner {
                Slot::Primary => Some(ActionKind::Attack),
                Slot::Secondary => Some(ActionKind::Vantage),
            },
            (None, Some(_)) => Some(ActionKind::Vantage),
            (None, None) => None,
        };

        let (is_critical, is_fumble) = self
            .retained_attack()
            .map(|r| (r.is_critical, r.is_fumble))
            .unwrap_or((false, false));
        self.is_critical = is_critical;
        self.is_fumble = is_fumble;
    }

    /// Write every recorded action to `carrier`, keyed by action name.
    pub fn attach(&self, carrier: &mut dyn SessionCarrier) -> Result<(), SessionError> {
        for action in ActionKind::ALL {
            match self.rolls.get(&action) {
                Some(roll) => carrier.set_flag(action.name(), serde_json::to_value(roll)?),
                None => carrier.unset_flag(action.name()),
            }
        }
        carrier.set_flag(DIRECTION_KEY, serde_json::to_value(self.direction)?);
        Ok(())
    }

    /// Rebuild a session from `carrier`, recomputing derived flags.
    pub fn restore(carrier: &dyn SessionCarrier) -> Result<Self, SessionError> {
        let mut session = RollSession::new();
        if let Some(direction) = carrier.get_flag(DIRECTION_KEY) {
            session.direction = serde_json::from_value(direction)?;
        }
        for action in ActionKind::ALL {
            if let Some(value) = carrier.get_flag(action.name()) {
                let roll: EvaluatedRoll = serde_json::from_value(value)?;
                session.rolls.insert(action, roll);
            }
        }
        session.refresh_retained();
        Ok(session)
    }
}
