//! End-to-end roll scenarios through the public API.
//!
//! Run with: `cargo test -p quickroll-core --test roll_scenarios`

use quickroll_core::classify::{classify, Thresholds};
use quickroll_core::critical::CriticalExpander;
use quickroll_core::dice::DieStatus;
use quickroll_core::formula::{assemble_parts, AttackModifiers, JoinStyle};
use quickroll_core::roll::AttackRequest;
use quickroll_core::vantage::{primary_wins, resolve_vantage, Slot};
use quickroll_core::{
    Advantage, CritPolicy, EvaluatedRoll, Evaluator, FormulaPart, RollConfig, RollContext, Roller,
    SampleItem, ScriptedDice,
};

fn attack_context() -> RollContext {
    RollContext::new().with("mod", 3).with("prof", 2)
}

fn attack_parts() -> Vec<FormulaPart> {
    let modifiers = AttackModifiers {
        proficient: true,
        ..Default::default()
    };
    let (mut parts, _) = assemble_parts(&modifiers, &attack_context());
    parts.insert(0, FormulaPart::literal("1d20"));
    parts
}

fn evaluate_attack(d20: u32) -> EvaluatedRoll {
    let mut dice = ScriptedDice::new(vec![d20]);
    let roll = Evaluator::default()
        .evaluate(&attack_parts(), JoinStyle::Spaced, &attack_context(), &mut dice)
        .unwrap();
    classify(roll, Thresholds::default())
}

// =============================================================================
// Attack rolls
// =============================================================================

#[test]
fn test_plain_attack() {
    let roll = evaluate_attack(14);
    assert_eq!(roll.formula, "1d20 + @mod + @prof");
    assert_eq!(roll.total, 19);
    assert!(!roll.is_critical);
    assert!(!roll.is_fumble);

    // Same result through the item pipeline.
    let roller = Roller::new(RollConfig::default());
    let mut dice = ScriptedDice::new(vec![14]);
    let outcome = roller
        .roll_attack(&SampleItem::longsword(), AttackRequest::attack(), &mut dice)
        .unwrap();
    assert_eq!(outcome.roll, roll);
}

#[test]
fn test_advantage_keeps_higher_primary() {
    let primary = evaluate_attack(14);
    let secondary = evaluate_attack(8);
    assert_eq!(secondary.total, 13);

    let resolution = resolve_vantage(&primary, Some(&secondary), Advantage::Advantage);
    assert_eq!(resolution.winner, Slot::Primary);
    assert_eq!(resolution.retained.total, 19);
    assert_eq!(resolution.discarded.map(|r| r.total), Some(13));
}

#[test]
fn test_ties_favor_primary() {
    assert!(primary_wins(15, 15, Advantage::Advantage));
    assert!(primary_wins(15, 15, Advantage::Disadvantage));
    assert!(!primary_wins(10, 15, Advantage::Advantage));
    assert!(primary_wins(10, 15, Advantage::Disadvantage));
}

#[test]
fn test_assembly_is_repeatable() {
    let modifiers = AttackModifiers {
        proficient: true,
        item_bonus: Some("1".to_string()),
        actor_bonus: Some("1d4".to_string()),
        ammo: None,
    };
    let seed = attack_context().with("bonus", "2");
    let first = assemble_parts(&modifiers, &seed);
    for _ in 0..100 {
        assert_eq!(assemble_parts(&modifiers, &seed), first);
    }
}

// =============================================================================
// Evaluation and classification
// =============================================================================

#[test]
fn test_constant_formula_total() {
    let mut dice = ScriptedDice::new(vec![]);
    let roll = Evaluator::default()
        .evaluate_formula("5 + -2 + 10 - 3", &RollContext::new(), &mut dice)
        .unwrap();
    assert_eq!(roll.total, 10);
    assert_eq!(dice.consumed(), 0);
}

#[test]
fn test_keep_highest_thousand_times() {
    let evaluator = Evaluator::default();
    let context = RollContext::new().with("mod", 1);
    for (a, b) in [(2, 19), (19, 2), (11, 11), (20, 1)] {
        let mut dice = ScriptedDice::cycle(vec![a, b]);
        for _ in 0..1000 {
            let roll = evaluator
                .evaluate_formula("2d20kh + @mod", &context, &mut dice)
                .unwrap();
            let term = roll.dice().next().unwrap();
            assert_eq!(term.active_values().collect::<Vec<_>>(), vec![a.max(b)]);
            let dropped: Vec<_> = term
                .results
                .iter()
                .filter(|r| r.status == DieStatus::Dropped)
                .collect();
            assert_eq!(dropped.len(), 1);
            assert_eq!(dropped[0].value, a.min(b));
            assert_eq!(roll.total, a.max(b) as i64 + 1);
        }
    }
}

#[test]
fn test_classifier_only_reads_d20s() {
    let evaluator = Evaluator::default();
    let context = RollContext::new();

    let mut dice = ScriptedDice::new(vec![20, 1]);
    let roll = evaluator.evaluate_formula("1d20 + 1d6", &context, &mut dice).unwrap();
    let roll = classify(roll, Thresholds::default());
    assert!(roll.is_critical);
    assert!(!roll.is_fumble);

    let mut dice = ScriptedDice::new(vec![1, 20]);
    let roll = evaluator.evaluate_formula("1d20 + 1d100", &context, &mut dice).unwrap();
    let roll = classify(roll, Thresholds::default());
    assert!(!roll.is_critical);
    assert!(roll.is_fumble);
}

// =============================================================================
// Critical damage
// =============================================================================

fn damage_parts() -> Vec<FormulaPart> {
    vec![FormulaPart::literal("2d6"), FormulaPart::literal("+3")]
}

#[test]
fn test_critical_damage_double_dice() {
    let evaluator = Evaluator::default();
    let mut dice = ScriptedDice::new(vec![4, 5, 6, 2]);
    let base = evaluator
        .evaluate(&damage_parts(), JoinStyle::Compact, &RollContext::new(), &mut dice)
        .unwrap();
    assert_eq!(base.total, 12);

    let expander = CriticalExpander::new(evaluator, CritPolicy::DoubleDice, 2);
    let crit = expander
        .expand(&damage_parts(), &RollContext::new(), &base, 0, &mut dice)
        .unwrap();
    assert_eq!(crit.formula, "4d6 + 3");
    assert_eq!(crit.constants(), 3);
    assert_eq!(crit.total, 4 + 5 + 6 + 2 + 3);
}

#[test]
fn test_critical_damage_max_dice() {
    let evaluator = Evaluator::default();
    let mut dice = ScriptedDice::new(vec![4, 5, 1, 3]);
    let base = evaluator
        .evaluate(&damage_parts(), JoinStyle::Compact, &RollContext::new(), &mut dice)
        .unwrap();

    let expander = CriticalExpander::new(evaluator, CritPolicy::MaxCritDice, 2);
    let crit = expander
        .expand(&damage_parts(), &RollContext::new(), &base, 0, &mut dice)
        .unwrap();
    assert_eq!(crit.dice().next().unwrap().count(), 2);
    assert_eq!(crit.constants(), 3 + 12);
    assert_eq!(crit.total, 1 + 3 + 3 + 12);
}
