//! Install-wide roll settings.
//!
//! Built once at startup (usually from the host's stored settings JSON) and
//! handed to the [`Roller`](crate::roll::Roller) and
//! [`CardController`](crate::card::CardController).

use crate::critical::CritPolicy;
use crate::dice::RerollMode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Largest accepted critical dice multiplier.
pub const MAX_CRITICAL_MULTIPLIER: u32 = 10;

/// Errors from loading settings.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Critical multiplier must be between 1 and {max}, got {value}")]
    InvalidMultiplier { value: u32, max: u32 },
}

/// Who gets damage rolled automatically when an item with an attack is used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AutoRollDamage {
    None,
    /// Only for actors owned exclusively by privileged (GM) users.
    #[default]
    #[serde(alias = "dmOnly")]
    PrivilegedOnly,
    All,
}

impl AutoRollDamage {
    /// Whether damage follows the attack automatically.
    ///
    /// Items without an attack always roll damage straight away.
    pub fn applies(&self, has_attack: bool, owned_only_by_privileged: bool) -> bool {
        if !has_attack {
            return true;
        }
        match self {
            AutoRollDamage::None => false,
            AutoRollDamage::PrivilegedOnly => owned_only_by_privileged,
            AutoRollDamage::All => true,
        }
    }
}

/// Configuration for roll resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RollConfig {
    /// How critical damage is calculated.
    pub crit_calculation: CritPolicy,

    /// Who damage is auto rolled for.
    pub auto_roll_damage: AutoRollDamage,

    /// Behaviour of `r=1` style rerolls.
    pub reroll_mode: RerollMode,

    /// Dice multiplier for critical hits under the double-dice policy.
    pub critical_multiplier: u32,

    /// Wait for the presentation sink (dice animation) before returning.
    pub await_animation: bool,

    /// Upper bound on the presentation wait.
    pub presentation_timeout_ms: Option<u64>,
}

impl Default for RollConfig {
    fn default() -> Self {
        Self {
            crit_calculation: CritPolicy::DoubleDice,
            auto_roll_damage: AutoRollDamage::PrivilegedOnly,
            reroll_mode: RerollMode::Once,
            critical_multiplier: 2,
            await_animation: true,
            presentation_timeout_ms: None,
        }
    }
}

impl RollConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load settings stored by the host; missing keys take their defaults.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: RollConfig = serde_json::from_str(json)?;
        config.validate()?;
        debug!(?config, "loaded roll settings");
        Ok(config)
    }

    /// Check values that deserialize fine but cannot be rolled with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=MAX_CRITICAL_MULTIPLIER).contains(&self.critical_multiplier) {
            return Err(ConfigError::InvalidMultiplier {
                value: self.critical_multiplier,
                max: MAX_CRITICAL_MULTIPLIER,
            });
        }
        Ok(())
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Set the critical damage policy.
    pub fn with_crit_calculation(mut self, policy: CritPolicy) -> Self {
        self.crit_calculation = policy;
        self
    }

    /// Set who damage is auto rolled for.
    pub fn with_auto_roll_damage(mut self, auto: AutoRollDamage) -> Self {
        self.auto_roll_damage = auto;
        self
    }

    pub fn with_reroll_mode(mut self, mode: RerollMode) -> Self {
        self.reroll_mode = mode;
        self
    }

    pub fn with_critical_multiplier(mut self, multiplier: u32) -> Self {
        self.critical_multiplier = multiplier;
        self
    }

    pub fn with_await_animation(mut self, await_animation: bool) -> Self {
        self.await_animation = await_animation;
        self
    }

    pub fn with_presentation_timeout(mut self, timeout: Duration) -> Self {
        self.presentation_timeout_ms = Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
        self
    }

    pub fn presentation_timeout(&self) -> Option<Duration> {
        self.presentation_timeout_ms.map(Duration::from_millis)
    }
}
