//! Walk one chat card through an attack with advantage and its damage

use quickroll_core::card::{ActionEvent, CardAction};
use quickroll_core::{
    ActionKind, Advantage, CardController, ChatCard, RecordingSink, RngSource, RollConfig, Roller,
    SampleItem,
};
use std::sync::Arc;
use tokio::sync::Mutex;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== Chat Card ===\n");

    let controller = CardController::new(
        Roller::new(RollConfig::default()),
        Arc::new(RecordingSink::new()),
    );
    let card = Mutex::new(ChatCard::new());
    let item = SampleItem::longbow(20);
    let mut dice = RngSource::thread();

    println!("1. Using the longbow with advantage...");
    for outcome in controller.display(&card, &item, Advantage::Advantage, &mut dice).await? {
        println!(
            "   {}: {} {}",
            outcome.header.title(),
            outcome.rolls[0].text,
            if outcome.discarded { "(discarded)" } else { "" }
        );
    }

    println!("\n2. Rolling damage...");
    let damage = controller
        .handle(&card, &item, ActionEvent::new(CardAction::new(ActionKind::Damage)), &mut dice)
        .await?;
    for roll in &damage.rolls {
        println!("   {}: {}", roll.label.as_deref().unwrap_or("-"), roll.text);
    }
    if damage.is_critical {
        println!("   Critical hit!");
    }

    println!("\n3. Card state");
    let card = card.lock().await;
    println!("   Retained: {:?}", card.session.retained_action());
    println!("   Arrows used: {}", controller.sink().outcomes()[0].ammo_consumed.unwrap_or(0));
    Ok(())
}
