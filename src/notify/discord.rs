use reqwest::Client;
use serde::Serialize;

use super::{post_json_with_retry, NotificationEvent, Notifier, NotifyError, SendPolicy};
use crate::ingest::types::{CompetitionRecord, Source};

const SINK: &str = "discord";

#[derive(Clone)]
pub struct DiscordNotifier {
    webhook: String,
    client: Client,
    policy: SendPolicy,
}

impl DiscordNotifier {
    pub fn new(webhook: String) -> Self {
        Self {
            webhook,
            client: Client::new(),
            policy: SendPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: SendPolicy) -> Self {
        self.policy = policy;
        self
    }
}

#[async_trait::async_trait]
impl Notifier for DiscordNotifier {
    async fn send(&self, ev: &NotificationEvent) -> Result<(), NotifyError> {
        let payload = DiscordWebhookPayload::for_record(&ev.record);
        post_json_with_retry(SINK, &self.client, &self.webhook, None, &payload, &self.policy)
            .await?;
        tracing::info!(id = %ev.record.id, "discord notification sent");
        Ok(())
    }

    fn name(&self) -> &'static str {
        SINK
    }
}

#[derive(Serialize)]
struct DiscordEmbed {
    title: String,
    url: String,
    description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    thumbnail: Option<DiscordImage>,
}

#[derive(Serialize)]
struct DiscordImage {
    url: String,
}

#[derive(Serialize)]
struct DiscordWebhookPayload {
    content: Option<String>,
    embeds: Vec<DiscordEmbed>,
}

impl DiscordWebhookPayload {
    fn for_record(rec: &CompetitionRecord) -> Self {
        let mut lines = vec![format!("**Source:** {}", rec.source)];
        let keys: &[(&str, &str)] = match rec.source {
            Source::Kaggle => &[("category", "Category"), ("reward", "Reward")],
            Source::Dacon => &[("keywords", "Keywords"), ("period", "Period")],
        };
        for (key, label) in keys {
            if let Some(v) = rec.meta(key) {
                lines.push(format!("**{label}:** {v}"));
            }
        }
        if let Some(d) = rec.deadline {
            lines.push(format!("**Deadline (UTC):** {}", d.format("%Y-%m-%d %H:%M")));
        }

        Self {
            content: Some(format!("New {} competition is open!", rec.source)),
            embeds: vec![DiscordEmbed {
                title: rec.title.clone(),
                url: rec.url.clone(),
                description: lines.join("\n"),
                thumbnail: rec.image_url.clone().map(|url| DiscordImage { url }),
            }],
        }
    }
}
