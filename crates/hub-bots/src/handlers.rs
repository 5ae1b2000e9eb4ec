//! Content-matching reply rules.

use std::sync::Arc;

use async_trait::async_trait;

use crate::dispatch::{HandlerOutcome, MessageHandler, ReplyContext};
use crate::pipeline::Inbound;
use crate::weather::WeatherReporter;

pub const REPORT_PHRASE: &str = "Hi, I would like to report ";
pub const ONLINE_NOTICE: &str = "I'm online.";
pub const WELCOME_TEXT: &str =
    "Welcome to SkateConnect! If you have any questions or need help, feel free to ask.";
pub const WEATHER_COMMAND: &str = "!weather";

/// How a rule decides whether a message is for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Matcher {
    Exact(String),
    Contains(String),
}

impl Matcher {
    pub fn matches(&self, content: &str) -> bool {
        match self {
            Matcher::Exact(expected) => content == expected,
            Matcher::Contains(needle) => content.contains(needle.as_str()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Reply with fixed text.
    Reply(String),
    /// Ask for details about the reported user.
    ReportTemplate,
    /// Reply with fixed text and announce the sender to the channel.
    Welcome(String),
    /// Post the current weather report to the channel.
    Weather,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    pub matcher: Matcher,
    pub action: Action,
    pub trigger_plugins: bool,
}

impl Rule {
    pub fn new(matcher: Matcher, action: Action) -> Self {
        Self {
            matcher,
            action,
            trigger_plugins: false,
        }
    }

    pub fn triggering(mut self) -> Self {
        self.trigger_plugins = true;
        self
    }
}

/// Ordered rules; the first whose matcher accepts the content wins.
pub struct RuleHandler {
    rules: Vec<Rule>,
    weather: Option<Arc<dyn WeatherReporter>>,
}

impl RuleHandler {
    pub fn new(rules: Vec<Rule>) -> Self {
        Self {
            rules,
            weather: None,
        }
    }

    pub fn with_weather(mut self, reporter: Arc<dyn WeatherReporter>) -> Self {
        self.weather = Some(reporter);
        self
    }

    /// Direct-message support desk.
    pub fn support() -> Self {
        Self::new(vec![
            Rule::new(Matcher::Exact("🙂".to_string()), Action::Reply("🙃".to_string())),
            Rule::new(
                Matcher::Contains(REPORT_PHRASE.to_string()),
                Action::ReportTemplate,
            ),
            Rule::new(
                Matcher::Exact(ONLINE_NOTICE.to_string()),
                Action::Welcome(WELCOME_TEXT.to_string()),
            )
            .triggering(),
        ])
    }

    /// Group channel commands.
    pub fn group(reporter: Arc<dyn WeatherReporter>) -> Self {
        Self::new(vec![Rule::new(
            Matcher::Contains(WEATHER_COMMAND.to_string()),
            Action::Weather,
        )])
        .with_weather(reporter)
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    async fn run(&self, action: &Action, ctx: &ReplyContext, inbound: &Inbound) {
        match action {
            Action::Reply(text) => send(ctx, inbound, text).await,
            Action::ReportTemplate => {
                let text = report_reply(&inbound.message.content);
                send(ctx, inbound, &text).await;
            }
            Action::Welcome(text) => {
                send(ctx, inbound, text).await;
                if let Err(err) = ctx.announce(&inbound.sender).await {
                    tracing::warn!(event_id = %inbound.event_id, "announce failed: {err}");
                }
            }
            Action::Weather => self.post_weather(ctx, inbound).await,
        }
    }

    async fn post_weather(&self, ctx: &ReplyContext, inbound: &Inbound) {
        let Some(reporter) = &self.weather else {
            tracing::warn!("weather requested but no reporter configured");
            return;
        };
        let report = match reporter.report().await {
            Ok(report) => report,
            Err(err) => {
                tracing::warn!("weather lookup failed: {err}");
                return;
            }
        };
        if report.is_empty() {
            tracing::info!("no weather data, skipping report");
            return;
        }
        match ctx.publish_channel(&report).await {
            Ok(id) => tracing::info!(event_id = %id, requested_by = %inbound.event_id, "sent weather report"),
            Err(err) => tracing::warn!("failed to publish weather report: {err}"),
        }
    }
}

#[async_trait]
impl MessageHandler for RuleHandler {
    async fn handle_message(&self, ctx: &ReplyContext, inbound: &Inbound) -> HandlerOutcome {
        let content = inbound.message.content.as_str();
        let Some(rule) = self.rules.iter().find(|rule| rule.matcher.matches(content)) else {
            return HandlerOutcome::NoMatch;
        };
        self.run(&rule.action, ctx, inbound).await;
        if rule.trigger_plugins {
            HandlerOutcome::HandledTrigger
        } else {
            HandlerOutcome::Handled
        }
    }
}

async fn send(ctx: &ReplyContext, inbound: &Inbound, text: &str) {
    match ctx.reply(inbound, text).await {
        Ok(id) => tracing::debug!(event_id = %id, in_reply_to = %inbound.event_id, "reply sent"),
        Err(err) => tracing::warn!(in_reply_to = %inbound.event_id, "reply failed: {err}"),
    }
}

pub fn report_reply(content: &str) -> String {
    format!(
        "Could you elaborate on the problem you're encountering with {}? Additional details would greatly assist in resolving your issue. In the meanwhile, feel free to mute the user if that's necessary.",
        extract_username(content)
    )
}

/// Trailing identifier of a report: one trailing `.` removed, then at most the
/// last 10 characters.
pub fn extract_username(input: &str) -> String {
    let trimmed = input.strip_suffix('.').unwrap_or(input);
    let count = trimmed.chars().count();
    trimmed.chars().skip(count.saturating_sub(10)).collect()
}
