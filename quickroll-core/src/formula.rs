//! Roll formula assembly.
//!
//! A roll formula is an ordered list of [`FormulaPart`]s joined with `+`.
//! Parts are either literal dice notation (`"2d6"`, `"+3"`) or `@name`
//! placeholders that are looked up in a [`RollContext`] when the formula is
//! evaluated.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// One fragment of an additive roll formula.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum FormulaPart {
    /// Dice notation or a signed number, used verbatim.
    Literal(String),
    /// A named value resolved from the roll context (`@mod`).
    Placeholder(String),
}

impl FormulaPart {
    pub fn literal(text: impl Into<String>) -> Self {
        FormulaPart::Literal(text.into())
    }

    pub fn placeholder(name: impl Into<String>) -> Self {
        FormulaPart::Placeholder(name.into())
    }

    /// Parse host-supplied text, recognising a bare `@name` as a placeholder.
    pub fn parse(text: &str) -> Self {
        let trimmed = text.trim();
        match trimmed.strip_prefix('@') {
            Some(name) if !name.is_empty() && name.chars().all(is_placeholder_char) => {
                FormulaPart::Placeholder(name.to_string())
            }
            _ => FormulaPart::Literal(trimmed.to_string()),
        }
    }

    /// Whether the part starts with an explicit sign (`"+3"`, `"-1"`).
    fn is_signed(&self) -> bool {
        match self {
            FormulaPart::Literal(text) => text.starts_with('+') || text.starts_with('-'),
            FormulaPart::Placeholder(_) => false,
        }
    }
}

impl fmt::Display for FormulaPart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormulaPart::Literal(text) => write!(f, "{text}"),
            FormulaPart::Placeholder(name) => write!(f, "@{name}"),
        }
    }
}

pub(crate) fn is_placeholder_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '.'
}

/// How parts are joined into a formula string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JoinStyle {
    /// `1d20 + @mod + @prof`, used for attack rolls.
    #[default]
    Spaced,
    /// `2d6+3`; parts that carry their own sign are appended directly.
    Compact,
}

/// Join parts into the formula string shown to players.
pub fn join_parts(parts: &[FormulaPart], style: JoinStyle) -> String {
    let mut formula = String::new();
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            match style {
                JoinStyle::Spaced => formula.push_str(" + "),
                JoinStyle::Compact if part.is_signed() => {}
                JoinStyle::Compact => formula.push('+'),
            }
        }
        formula.push_str(&part.to_string());
    }
    formula
}

/// A value bound to a placeholder name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ContextValue {
    Number(i64),
    /// Substituted as a sub-formula, e.g. a `"1d4"` situational bonus.
    Text(String),
}

impl ContextValue {
    /// True for `0`, empty text, or text that parses to zero.
    pub fn is_blank(&self) -> bool {
        match self {
            ContextValue::Number(n) => *n == 0,
            ContextValue::Text(text) => {
                let text = text.trim();
                text.is_empty() || text.parse::<i64>() == Ok(0)
            }
        }
    }
}

impl fmt::Display for ContextValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContextValue::Number(n) => write!(f, "{n}"),
            ContextValue::Text(text) => write!(f, "{text}"),
        }
    }
}

impl From<i64> for ContextValue {
    fn from(n: i64) -> Self {
        ContextValue::Number(n)
    }
}

impl From<i32> for ContextValue {
    fn from(n: i32) -> Self {
        ContextValue::Number(n as i64)
    }
}

impl From<&str> for ContextValue {
    fn from(text: &str) -> Self {
        ContextValue::Text(text.to_string())
    }
}

impl From<String> for ContextValue {
    fn from(text: String) -> Self {
        ContextValue::Text(text)
    }
}

/// Placeholder values for a single roll.
///
/// Ordered so that two contexts built from the same inputs serialize
/// identically.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RollContext {
    values: BTreeMap<String, ContextValue>,
}

impl RollContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<ContextValue>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<ContextValue>) {
        self.values.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&ContextValue> {
        self.values.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    /// A value that is present and not blank.
    pub fn non_blank(&self, name: &str) -> Option<&ContextValue> {
        self.get(name).filter(|value| !value.is_blank())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ContextValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }
}

/// A typed damage formula, e.g. `("1d8 + @mod", "slashing")`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DamagePart {
    pub formula: String,
    pub damage_type: String,
}

impl DamagePart {
    pub fn new(formula: impl Into<String>, damage_type: impl Into<String>) -> Self {
        Self {
            formula: formula.into(),
            damage_type: damage_type.into(),
        }
    }
}

/// Linked ammunition as seen by the attack roll.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AmmoSupply {
    pub quantity: u32,
    /// How many rounds one attack consumes.
    #[serde(default)]
    pub consume_amount: u32,
    #[serde(default)]
    pub attack_bonus: Option<String>,
    #[serde(default)]
    pub damage_parts: Vec<DamagePart>,
}

impl AmmoSupply {
    /// Ammunition is usable when there is some and one attack's worth remains.
    pub fn is_usable(&self) -> bool {
        self.quantity > 0 && self.quantity >= self.consume_amount
    }
}

/// Conditional contributors to an attack formula.
///
/// The ability modifier (`@mod`) is always included; everything else adds a
/// part only when its predicate holds.
#[derive(Debug, Clone, Default)]
pub struct AttackModifiers {
    pub proficient: bool,
    pub item_bonus: Option<String>,
    pub actor_bonus: Option<String>,
    pub ammo: Option<AmmoSupply>,
}

/// Build the parts and context for an attack roll.
///
/// Order is fixed: ability modifier, proficiency, item bonus, actor bonus,
/// ammunition, situational bonus.
pub fn assemble_parts(
    modifiers: &AttackModifiers,
    seed: &RollContext,
) -> (Vec<FormulaPart>, RollContext) {
    let mut assembler = Assembler::new(seed.clone());

    assembler.contribute(true, FormulaPart::placeholder("mod"), None);
    assembler.contribute(modifiers.proficient, FormulaPart::placeholder("prof"), None);

    if let Some(bonus) = non_empty(modifiers.item_bonus.as_deref()) {
        assembler.contribute(true, FormulaPart::parse(bonus), None);
    }
    if let Some(bonus) = non_empty(modifiers.actor_bonus.as_deref()) {
        assembler.contribute(true, FormulaPart::parse(bonus), None);
    }

    let ammo_bonus = modifiers
        .ammo
        .as_ref()
        .filter(|ammo| ammo.is_usable())
        .and_then(|ammo| non_empty(ammo.attack_bonus.as_deref()));
    if let Some(bonus) = ammo_bonus {
        assembler.contribute(
            true,
            FormulaPart::placeholder("ammo"),
            Some(("ammo", ContextValue::Text(bonus.to_string()))),
        );
    }

    let has_bonus = seed.non_blank("bonus").is_some();
    assembler.contribute(has_bonus, FormulaPart::placeholder("bonus"), None);

    assembler.finish()
}

/// Conditional contributors to a set of damage formulas.
#[derive(Debug, Clone, Default)]
pub struct DamageModifiers {
    pub versatile: Option<String>,
    pub actor_bonus: Option<String>,
    pub ammo_parts: Vec<DamagePart>,
    pub situational_bonus: Option<String>,
}

/// Merge bonuses into an item's typed damage parts.
///
/// The versatile formula replaces the first part; actor and situational
/// bonuses extend the first part; ammunition damage joins the part of the same
/// damage type, or becomes a new part.
pub fn assemble_damage_parts(base: &[DamagePart], modifiers: &DamageModifiers) -> Vec<DamagePart> {
    let mut parts = base.to_vec();
    let Some(first) = parts.first_mut() else {
        return parts;
    };

    if let Some(versatile) = non_empty(modifiers.versatile.as_deref()) {
        first.formula = versatile.to_string();
    }

    let actor_bonus = non_empty(modifiers.actor_bonus.as_deref())
        .filter(|bonus| bonus.parse::<i64>() != Ok(0));
    if let Some(bonus) = actor_bonus {
        first.formula = format!("{} + {bonus}", first.formula);
    }

    for ammo in &modifiers.ammo_parts {
        match parts.iter_mut().find(|p| p.damage_type == ammo.damage_type) {
            Some(existing) => existing.formula = format!("{} + {}", existing.formula, ammo.formula),
            None => parts.push(ammo.clone()),
        }
    }

    if let Some(bonus) = non_empty(modifiers.situational_bonus.as_deref()) {
        parts[0].formula = format!("{} + {bonus}", parts[0].formula);
    }

    parts
}

fn non_empty(text: Option<&str>) -> Option<&str> {
    text.map(str::trim).filter(|t| !t.is_empty())
}

struct Assembler {
    parts: Vec<FormulaPart>,
    context: RollContext,
}

impl Assembler {
    fn new(context: RollContext) -> Self {
        Self {
            parts: Vec::new(),
            context,
        }
    }

    fn contribute(
        &mut self,
        enabled: bool,
        part: FormulaPart,
        entry: Option<(&str, ContextValue)>,
    ) {
        if !enabled {
            return;
        }
        self.parts.push(part);
        if let Some((name, value)) = entry {
            self.context.insert(name, value);
        }
    }

    fn finish(self) -> (Vec<FormulaPart>, RollContext) {
        (self.parts, self.context)
    }
}
