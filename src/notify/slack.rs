use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{post_json_with_retry, NotificationEvent, Notifier, NotifyError, SendPolicy};
use crate::ingest::types::{CompetitionRecord, Source};

pub const SLACK_API_BASE: &str = "https://slack.com/api";
pub const DEFAULT_CHANNEL: &str = "#contest-notify-bot";

const SINK: &str = "slack";
const NOT_AVAILABLE: &str = "n/a";

/// Posts Block Kit messages through `chat.postMessage` with a bot token.
pub struct SlackNotifier {
    token: String,
    channel: String,
    api_base: String,
    team_form_url: Option<String>,
    client: Client,
    policy: SendPolicy,
}

#[derive(Debug, Deserialize)]
struct SlackResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
}

impl SlackNotifier {
    pub fn new(token: String, channel: String) -> Self {
        Self {
            token,
            channel,
            api_base: SLACK_API_BASE.to_string(),
            team_form_url: None,
            client: Client::new(),
            policy: SendPolicy::default(),
        }
    }

    /// Override the Web API base (tests, Slack-compatible proxies).
    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into().trim_end_matches('/').to_string();
        self
    }

    /// Adds a "Find teammates" button linking to a sign-up form.
    pub fn with_team_form(mut self, url: Option<String>) -> Self {
        self.team_form_url = url.filter(|u| !u.trim().is_empty());
        self
    }

    pub fn with_policy(mut self, policy: SendPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn payload(&self, rec: &CompetitionRecord) -> Value {
        json!({
            "channel": self.channel,
            "text": fallback_text(rec),
            "blocks": build_blocks(rec, self.team_form_url.as_deref()),
            "unfurl_links": false,
            "unfurl_media": false,
        })
    }
}

#[async_trait::async_trait]
impl Notifier for SlackNotifier {
    async fn send(&self, ev: &NotificationEvent) -> Result<(), NotifyError> {
        let url = format!("{}/chat.postMessage", self.api_base);
        let body = self.payload(&ev.record);
        let raw = post_json_with_retry(SINK, &self.client, &url, Some(&self.token), &body, &self.policy)
            .await?;

        let rsp: SlackResponse = serde_json::from_str(&raw).map_err(|e| NotifyError::Rejected {
            sink: SINK,
            reason: format!("unexpected response: {e}"),
        })?;
        if !rsp.ok {
            return Err(NotifyError::Rejected {
                sink: SINK,
                reason: rsp.error.unwrap_or_else(|| "unknown_error".into()),
            });
        }
        tracing::info!(id = %ev.record.id, channel = %self.channel, "slack notification sent");
        Ok(())
    }

    fn name(&self) -> &'static str {
        SINK
    }
}

/// Plain-text fallback shown in push notifications and by clients without blocks.
pub fn fallback_text(rec: &CompetitionRecord) -> String {
    format!("New competition: {} ({}) {}", rec.title, rec.source, rec.url)
}

fn detail_lines(rec: &CompetitionRecord) -> String {
    let get = |k: &str| rec.meta(k).unwrap_or(NOT_AVAILABLE).to_string();
    match rec.source {
        Source::Kaggle => {
            let deadline = rec
                .deadline
                .map(|d| d.format("%Y-%m-%d %H:%M:%S UTC").to_string())
                .unwrap_or_else(|| NOT_AVAILABLE.to_string());
            format!(
                "Category: {}\nReward: {}\nDeadline: {}",
                get("category"),
                get("reward"),
                deadline
            )
        }
        Source::Dacon => format!("Keywords: {}\nPeriod: {}", get("keywords"), get("period")),
    }
}

fn context_text(rec: &CompetitionRecord) -> String {
    let text = match rec.source {
        Source::Kaggle => rec
            .meta("description")
            .map(|d| d.chars().take(100).collect::<String>()),
        Source::Dacon => rec.meta("keywords").map(str::to_string),
    };
    text.filter(|t| !t.trim().is_empty())
        .unwrap_or_else(|| rec.source.to_string())
}

/// Slack control characters (`&`, `<`, `>`) as entities, so scraped text
/// cannot break out of a `<url|title>` link.
pub fn mrkdwn_escape(s: &str) -> String {
    html_escape::encode_text(s).into_owned()
}

/// Block Kit layout: headline, linked title with details (and thumbnail),
/// a context line, then action buttons.
pub fn build_blocks(rec: &CompetitionRecord, team_form_url: Option<&str>) -> Vec<Value> {
    let mut section = json!({
        "type": "section",
        "text": {
            "type": "mrkdwn",
            "text": format!(
                "*<{}|{}>*\n{}",
                mrkdwn_escape(&rec.url),
                mrkdwn_escape(&rec.title),
                mrkdwn_escape(&detail_lines(rec)),
            ),
        }
    });
    if let Some(img) = &rec.image_url {
        section["accessory"] = json!({
            "type": "image",
            "image_url": img,
            "alt_text": "competition thumbnail",
        });
    }

    let mut buttons = Vec::new();
    if let Some(form) = team_form_url {
        buttons.push(json!({
            "type": "button",
            "text": { "type": "plain_text", "emoji": true, "text": "Find teammates 👋🏼" },
            "url": form,
            "value": "go_to_surveyform",
        }));
    }
    buttons.push(json!({
        "type": "button",
        "text": { "type": "plain_text", "emoji": true, "text": "Open competition" },
        "url": rec.url,
        "value": "go_to_competition",
    }));

    vec![
        json!({
            "type": "section",
            "text": {
                "type": "mrkdwn",
                "text": format!("🔥 A new *{}* competition is open!", rec.source),
            }
        }),
        json!({ "type": "divider" }),
        section,
        json!({
            "type": "context",
            "elements": [{ "type": "plain_text", "emoji": true, "text": context_text(rec) }]
        }),
        json!({ "type": "divider" }),
        json!({ "type": "actions", "elements": buttons }),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kaggle() -> CompetitionRecord {
        CompetitionRecord::new(
            Source::Kaggle,
            "456",
            "Comp B".into(),
            "https://www.kaggle.com/competitions/comp-b".into(),
        )
        .with_meta("category", "Featured")
        .with_meta("reward", "$10,000")
    }

    #[test]
    fn message_has_title_source_and_link() {
        let n = SlackNotifier::new("xoxb-test".into(), DEFAULT_CHANNEL.into());
        let p = n.payload(&kaggle());
        let text = p["text"].as_str().unwrap();
        assert!(text.contains("Comp B"));
        assert!(text.contains("Kaggle"));
        assert!(text.contains("https://www.kaggle.com/competitions/comp-b"));
        assert_eq!(p["channel"], DEFAULT_CHANNEL);
        assert_eq!(p["unfurl_links"], false);
    }

    #[test]
    fn blocks_include_details_and_optional_parts() {
        let mut rec = kaggle();
        let blocks = build_blocks(&rec, None);
        assert_eq!(blocks.len(), 6);
        let body = blocks[2]["text"]["text"].as_str().unwrap();
        assert!(body.starts_with("*<https://www.kaggle.com/competitions/comp-b|Comp B>*"));
        assert!(body.contains("Reward: $10,000"));
        assert!(body.contains("Deadline: n/a"));
        assert!(blocks[2].get("accessory").is_none());
        assert_eq!(blocks[5]["elements"].as_array().unwrap().len(), 1);
        // context falls back to the source name without a description
        assert_eq!(blocks[3]["elements"][0]["text"], "Kaggle");

        rec.image_url = Some("https://img/x.png".into());
        let blocks = build_blocks(&rec, Some("https://forms.example/team"));
        assert_eq!(blocks[2]["accessory"]["image_url"], "https://img/x.png");
        let buttons = blocks[5]["elements"].as_array().unwrap();
        assert_eq!(buttons.len(), 2);
        assert_eq!(buttons[0]["url"], "https://forms.example/team");
    }

    #[test]
    fn titles_with_slack_control_characters_are_escaped() {
        let rec = CompetitionRecord::new(
            Source::Kaggle,
            "9",
            "Q&A <LLM> | 2025".into(),
            "https://www.kaggle.com/competitions/qa?x=1&y=2".into(),
        );
        let blocks = build_blocks(&rec, None);
        let body = blocks[2]["text"]["text"].as_str().unwrap();
        assert!(body.starts_with(
            "*<https://www.kaggle.com/competitions/qa?x=1&amp;y=2|Q&amp;A &lt;LLM&gt; | 2025>*"
        ));
        // the link line holds exactly one `<` and one `>`
        let link = body.lines().next().unwrap();
        assert_eq!(link.matches('<').count(), 1);
        assert_eq!(link.matches('>').count(), 1);
    }

    #[test]
    fn dacon_details_use_keywords_and_period() {
        let rec = CompetitionRecord::new(
            Source::Dacon,
            "236000",
            "Dacon Comp".into(),
            "https://dacon.io/competitions/official/236000".into(),
        )
        .with_meta("keywords", "vision | classification")
        .with_meta("period", "2025.01.06 ~ 2025.02.28");
        let blocks = build_blocks(&rec, None);
        let body = blocks[2]["text"]["text"].as_str().unwrap();
        assert!(body.contains("Keywords: vision | classification"));
        assert!(body.contains("Period: 2025.01.06 ~ 2025.02.28"));
        assert_eq!(blocks[3]["elements"][0]["text"], "vision | classification");
    }
}
