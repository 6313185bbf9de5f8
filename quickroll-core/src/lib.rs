//! Attack, damage and critical-hit roll engine for tabletop chat cards.
//!
//! This crate provides:
//! - Roll formula assembly with `@name` placeholders
//! - Dice evaluation with keep-highest/lowest and reroll modifiers
//! - Critical/fumble classification and advantage resolution
//! - Critical damage expansion under interchangeable policies
//! - Per-card roll sessions with re-roll coordination
//!
//! # Quick Start
//!
//! ```ignore
//! use quickroll_core::{ActionEvent, CardAction, CardController, ChatCard, RollConfig, Roller};
//! use std::sync::Arc;
//! use tokio::sync::Mutex;
//!
//! let controller = CardController::new(Roller::new(RollConfig::default()), Arc::new(sink));
//! let card = Mutex::new(ChatCard::new());
//!
//! let outcomes = controller
//!     .display(&card, &item, Advantage::Normal, &mut RngSource::thread())
//!     .await?;
//!
//! let event = ActionEvent::new("damage-reroll".parse()?);
//! let damage = controller.handle(&card, &item, event, &mut RngSource::thread()).await?;
//! println!("{}", damage.total);
//! ```

pub mod card;
pub mod classify;
pub mod config;
pub mod critical;
pub mod dice;
pub mod formula;
pub mod render;
pub mod roll;
pub mod session;
pub mod testing;
pub mod vantage;

// Primary public API
pub use card::{ActionEvent, CardAction, CardController, CardError, ChatCard, PresentationSink};
pub use config::{AutoRollDamage, ConfigError, RollConfig};
pub use critical::CritPolicy;
pub use dice::{DieSource, EvaluatedRoll, Evaluator, FormulaError, RerollMode, RngSource};
pub use formula::{FormulaPart, RollContext};
pub use render::{HeaderLabel, RenderableOutcome};
pub use roll::{AttackRollable, DamageRollable, RollError, Roller};
pub use session::{ActionKind, RollSession, SessionCarrier};
pub use testing::{RecordingSink, SampleItem, ScriptedDice};
pub use vantage::Advantage;
