//! Chat card controller.
//!
//! A [`ChatCard`] is the host's chat entry for one item use. The host keeps it
//! behind a `tokio::sync::Mutex`; while an action resolves the lock is held
//! and the card's buttons are disabled, so a second click gets
//! [`CardError::Busy`] instead of a duplicate roll.

use crate::dice::DieSource;
use crate::render::{RenderableOutcome, RenderedRoll};
use crate::roll::{
    AmmoBonus, AttackRequest, AttackRollable, DamageOutcome, DamageRequest, DamageRollable,
    RollError, Roller,
};
use crate::session::{ActionKind, RollSession};
use crate::vantage::Advantage;
use async_trait::async_trait;
use futures::future::{AbortHandle, Abortable};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, PoisonError};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

/// Errors from card actions.
#[derive(Debug, Error)]
pub enum CardError {
    #[error("This card is already resolving an action")]
    Busy,
    #[error(transparent)]
    Roll(#[from] RollError),
}

/// Failure reported by the host's presentation layer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PresentationError {
    #[error("Presentation failed: {0}")]
    Failed(String),
}

/// The host's display layer.
#[async_trait]
pub trait PresentationSink: Send + Sync {
    /// Show the outcome, resolving once any dice animation has finished.
    async fn present(&self, outcome: &RenderableOutcome) -> Result<(), PresentationError>;

    fn set_controls_enabled(&self, card: Uuid, enabled: bool);

    fn notify_error(&self, card: Uuid, message: &str);
}

/// One chat entry and everything rolled on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatCard {
    pub id: Uuid,
    pub session: RollSession,
    /// Ammunition damage from the latest attack, for the next damage roll.
    pub pending_ammo: Option<AmmoBonus>,
}

impl ChatCard {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            session: RollSession::new(),
            pending_ammo: None,
        }
    }
}

impl Default for ChatCard {
    fn default() -> Self {
        Self::new()
    }
}

/// A button on the card, e.g. `damage` or `attack-reroll`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CardAction {
    pub kind: ActionKind,
    pub reroll: bool,
}

impl CardAction {
    pub fn new(kind: ActionKind) -> Self {
        Self {
            kind,
            reroll: false,
        }
    }

    pub fn reroll(kind: ActionKind) -> Self {
        Self { kind, reroll: true }
    }
}

impl fmt::Display for CardAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.reroll {
            write!(f, "{}-reroll", self.kind)
        } else {
            write!(f, "{}", self.kind)
        }
    }
}

impl FromStr for CardAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.strip_suffix("-reroll") {
            Some(kind) => Ok(CardAction::reroll(kind.parse()?)),
            None => Ok(CardAction::new(s.parse()?)),
        }
    }
}

/// A click on a card button.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActionEvent {
    pub action: CardAction,
    /// Vantage direction chosen for this click, if any.
    pub direction: Option<Advantage>,
    /// Force (`Some(true)`) or suppress (`Some(false)`) critical damage.
    pub critical: Option<bool>,
}

impl ActionEvent {
    pub fn new(action: CardAction) -> Self {
        Self {
            action,
            direction: None,
            critical: None,
        }
    }

    pub fn with_direction(mut self, direction: Advantage) -> Self {
        self.direction = Some(direction);
        self
    }

    pub fn with_critical(mut self, critical: bool) -> Self {
        self.critical = Some(critical);
        self
    }
}

impl From<CardAction> for ActionEvent {
    fn from(action: CardAction) -> Self {
        ActionEvent::new(action)
    }
}

/// Disables a card's controls until dropped.
struct ControlsGuard<'a, P: PresentationSink + ?Sized> {
    sink: &'a P,
    card: Uuid,
}

impl<'a, P: PresentationSink + ?Sized> ControlsGuard<'a, P> {
    fn new(sink: &'a P, card: Uuid) -> Self {
        sink.set_controls_enabled(card, false);
        Self { sink, card }
    }
}

impl<P: PresentationSink + ?Sized> Drop for ControlsGuard<'_, P> {
    fn drop(&mut self) {
        self.sink.set_controls_enabled(self.card, true);
    }
}

/// Resolves card actions and hands the results to a [`PresentationSink`].
pub struct CardController<P> {
    roller: Roller,
    sink: Arc<P>,
    presentations: std::sync::Mutex<HashMap<Uuid, AbortHandle>>,
}

impl<P: PresentationSink + 'static> CardController<P> {
    pub fn new(roller: Roller, sink: Arc<P>) -> Self {
        Self {
            roller,
            sink,
            presentations: std::sync::Mutex::new(HashMap::new()),
        }
    }

    pub fn roller(&self) -> &Roller {
        &self.roller
    }

    pub fn sink(&self) -> &Arc<P> {
        &self.sink
    }

    /// Stop waiting on a card's presentation. Returns false if nothing was
    /// pending.
    pub fn cancel_presentation(&self, card: Uuid) -> bool {
        let handle = self
            .presentations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&card);
        match handle {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    /// Resolve one button click on `card`.
    pub async fn handle<I, D>(
        &self,
        card: &Mutex<ChatCard>,
        item: &I,
        event: ActionEvent,
        dice: &mut D,
    ) -> Result<RenderableOutcome, CardError>
    where
        I: AttackRollable + DamageRollable + ?Sized,
        D: DieSource + ?Sized,
    {
        let mut card = card.try_lock().map_err(|_| {
            debug!(action = %event.action, "card busy, ignoring action");
            CardError::Busy
        })?;
        let _controls = ControlsGuard::new(self.sink.as_ref(), card.id);
        self.run(&mut card, item, &event, dice).await
    }

    /// Initial use of an item: attack, an optional vantage roll, then damage
    /// when it should be rolled automatically.
    ///
    /// The card stays locked and its controls disabled for the whole sequence.
    pub async fn display<I, D>(
        &self,
        card: &Mutex<ChatCard>,
        item: &I,
        direction: Advantage,
        dice: &mut D,
    ) -> Result<Vec<RenderableOutcome>, CardError>
    where
        I: AttackRollable + DamageRollable + ?Sized,
        D: DieSource + ?Sized,
    {
        let mut card = card.try_lock().map_err(|_| {
            debug!("card busy, ignoring display");
            CardError::Busy
        })?;
        let _controls = ControlsGuard::new(self.sink.as_ref(), card.id);

        let mut outcomes = Vec::new();
        let has_attack = item.has_attack();

        if has_attack {
            let attack = CardAction::new(ActionKind::Attack);
            outcomes.push(self.run(&mut card, item, &attack.into(), dice).await?);

            if !direction.is_normal() {
                let event = ActionEvent::new(CardAction::new(ActionKind::Vantage))
                    .with_direction(direction);
                outcomes.push(self.run(&mut card, item, &event, dice).await?);
            }
        }

        let auto_damage = self
            .roller
            .config()
            .auto_roll_damage
            .applies(has_attack, item.owned_only_by_privileged());
        if !auto_damage {
            return Ok(outcomes);
        }

        if item.has_damage() {
            let damage = CardAction::new(ActionKind::Damage);
            outcomes.push(self.run(&mut card, item, &damage.into(), dice).await?);
        } else if !has_attack && item.formula_profile().is_some() {
            let formula = CardAction::new(ActionKind::Formula);
            outcomes.push(self.run(&mut card, item, &formula.into(), dice).await?);
        }
        Ok(outcomes)
    }

    /// Resolve and present one action on an already locked card.
    async fn run<I, D>(
        &self,
        card: &mut ChatCard,
        item: &I,
        event: &ActionEvent,
        dice: &mut D,
    ) -> Result<RenderableOutcome, CardError>
    where
        I: AttackRollable + DamageRollable + ?Sized,
        D: DieSource + ?Sized,
    {
        let outcome = match self.resolve(card, item, event, dice) {
            Ok(outcome) => outcome,
            Err(err) => {
                self.sink.notify_error(card.id, &err.to_string());
                return Err(err.into());
            }
        };

        self.present(&outcome).await;
        Ok(outcome)
    }

    fn resolve<I, D>(
        &self,
        card: &mut ChatCard,
        item: &I,
        event: &ActionEvent,
        dice: &mut D,
    ) -> Result<RenderableOutcome, RollError>
    where
        I: AttackRollable + DamageRollable + ?Sized,
        D: DieSource + ?Sized,
    {
        let CardAction { kind, reroll } = event.action;
        let critical = event.critical.unwrap_or_else(|| card.session.is_critical());

        match kind {
            ActionKind::Attack | ActionKind::Vantage => {
                let mut request = if kind == ActionKind::Attack {
                    AttackRequest::attack()
                } else {
                    AttackRequest::vantage(vantage_direction(event, &card.session))
                };
                request.reroll = reroll;

                let outcome = self.roller.roll_attack(item, request, dice)?;
                if request.direction.is_normal() {
                    card.session.record(ActionKind::Attack, outcome.roll.clone());
                } else {
                    card.session.record_vantage(request.direction, outcome.roll.clone());
                }
                if outcome.ammo.is_some() || kind == ActionKind::Attack {
                    card.pending_ammo = outcome.ammo.clone();
                }

                let rolls = vec![RenderedRoll::new(None, outcome.roll)];
                Ok(
                    RenderableOutcome::new(card.id, kind, outcome.header, rolls, &card.session)
                        .with_ammo_consumed(outcome.consume_ammo),
                )
            }
            ActionKind::Damage | ActionKind::Versatile => {
                let mut request = DamageRequest::new()
                    .critical(critical)
                    .with_ammo(card.pending_ammo.clone());
                if kind == ActionKind::Versatile {
                    request = request.versatile();
                }
                let outcome = self.roller.roll_damage(item, request, dice)?;
                Ok(record_damage(card, outcome))
            }
            ActionKind::Formula => {
                let outcome = self.roller.roll_formula(item, critical, dice)?;
                Ok(record_damage(card, outcome))
            }
        }
    }

    async fn present(&self, outcome: &RenderableOutcome) {
        let card = outcome.card;

        if !self.roller.config().await_animation {
            let sink = Arc::clone(&self.sink);
            let outcome = outcome.clone();
            tokio::spawn(async move {
                if let Err(err) = sink.present(&outcome).await {
                    warn!(%card, %err, "presentation failed");
                }
            });
            return;
        }

        let (handle, registration) = AbortHandle::new_pair();
        self.presentations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(card, handle);

        let presentation = Abortable::new(self.sink.present(outcome), registration);
        let result = match self.roller.config().presentation_timeout() {
            Some(limit) => tokio::time::timeout(limit, presentation).await.ok(),
            None => Some(presentation.await),
        };

        self.presentations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&card);

        match result {
            Some(Ok(Ok(()))) => {}
            Some(Ok(Err(err))) => warn!(%card, %err, "presentation failed"),
            Some(Err(_)) => warn!(%card, "presentation cancelled"),
            None => warn!(%card, "presentation timed out"),
        }
    }
}

/// Direction for a vantage roll: the click's choice, then the card's stored
/// direction, then advantage.
fn vantage_direction(event: &ActionEvent, session: &RollSession) -> Advantage {
    [event.direction, Some(session.direction())]
        .into_iter()
        .flatten()
        .find(|direction| !direction.is_normal())
        .unwrap_or(Advantage::Advantage)
}

fn record_damage(card: &mut ChatCard, outcome: DamageOutcome) -> RenderableOutcome {
    card.session.record(outcome.action, outcome.roll.clone());
    let rolls = outcome
        .parts
        .into_iter()
        .map(|part| RenderedRoll::new(part.damage_type, part.roll))
        .collect();
    RenderableOutcome::new(card.id, outcome.action, outcome.header, rolls, &card.session)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_card_action_names() {
        let action: CardAction = "damage-reroll".parse().unwrap();
        assert_eq!(action, CardAction::reroll(ActionKind::Damage));
        assert_eq!(action.to_string(), "damage-reroll");

        let action: CardAction = "vantage".parse().unwrap();
        assert_eq!(action, CardAction::new(ActionKind::Vantage));
        assert_eq!(action.to_string(), "vantage");

        assert!("save".parse::<CardAction>().is_err());
        assert!("-reroll".parse::<CardAction>().is_err());
    }

    #[test]
    fn test_vantage_direction_fallback() {
        let mut session = RollSession::new();
        let event = ActionEvent::new(CardAction::new(ActionKind::Vantage));
        assert_eq!(vantage_direction(&event, &session), Advantage::Advantage);

        session.set_direction(Advantage::Disadvantage);
        assert_eq!(vantage_direction(&event, &session), Advantage::Disadvantage);

        let event = event.with_direction(Advantage::Advantage);
        assert_eq!(vantage_direction(&event, &session), Advantage::Advantage);
    }

    #[test]
    fn test_new_cards_are_distinct() {
        let a = ChatCard::new();
        let b = ChatCard::new();
        assert_ne!(a.id, b.id);
        assert!(a.session.is_empty());
        assert!(a.pending_ammo.is_none());
    }
}
