//! Roll a few formulas with the thread RNG

use quickroll_core::dice::roll;
use quickroll_core::RollContext;

fn main() {
    println!("=== Rolling Dice ===\n");

    let context = RollContext::new()
        .with("mod", 3)
        .with("prof", 2)
        .with("bonus", "1d4");

    show("1d20", &context, "Basic d20");
    show("2d6+3", &context, "2d6 with modifier");
    show("4d6kh3", &context, "4d6 keep highest 3");
    show("2d20kh + @mod + @prof", &context, "Attack with advantage");
    show("2d20kl + @mod + @prof", &context, "Attack with disadvantage");
    show("1d20r=1 + @mod + @bonus", &context, "Halfling luck and a situational bonus");
    show("1d20 * 2", &context, "Unsupported operator");
}

fn show(formula: &str, context: &RollContext, description: &str) {
    print!("Rolling {formula} ({description})... ");
    match roll(formula, context) {
        Ok(result) => println!("{result}"),
        Err(e) => println!("ERROR: {e}"),
    }
}
