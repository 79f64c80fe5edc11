//! Sends one sample competition through the configured channels
//! (log only when no channel is configured). Handy for checking tokens.

use chrono::{Duration, Utc};
use contest_notify_bot::{
    build_notifier, BotConfig, CompetitionRecord, NotificationEvent, Notifier, Source,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt().with_target(false).init();

    let cfg = BotConfig::load()?;
    let mux = build_notifier(&cfg);

    let mut rec = CompetitionRecord::new(
        Source::Kaggle,
        "demo",
        "Demo Competition".into(),
        "https://www.kaggle.com/competitions".into(),
    )
    .with_meta("category", "Playground")
    .with_meta("reward", "Swag");
    rec.deadline = Some(Utc::now() + Duration::days(30));

    match mux.send(&NotificationEvent::new(rec, Utc::now())).await {
        Ok(()) => println!("notify-demo done"),
        Err(e) => println!("notify-demo failed: {e}"),
    }
    Ok(())
}
