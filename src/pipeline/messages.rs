//! Message preparation and the hand-off between streaming phases.

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

use crate::llm::{Message, MessageContent, MessageRole};

/// Fixed system prompt for the trip-planning assistant.
pub const SYSTEM_PROMPT: &str = "\
You are a travel planning assistant. Help the user plan trips: suggest \
destinations, build day-by-day itineraries, compare transport and lodging \
options, and estimate costs.

Use the available tools whenever they can give a better answer than your own \
knowledge, for example to search for current information, read or save \
files, or look up bookings. Never invent booking references, prices, or \
opening hours; if a tool fails, say so and continue with what you know.

Keep answers well structured. Use short headings and bullet lists for \
itineraries, and mention the date and location context when it matters.";

/// Caller-supplied context rendered into the synthesized system message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestContext {
    /// Caller's local date and time.
    #[serde(default)]
    pub now: Option<DateTime<FixedOffset>>,
    #[serde(default)]
    pub location: Option<GeoLocation>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoLocation {
    pub latitude: f64,
    pub longitude: f64,
    /// Human-readable place name, if known.
    #[serde(default)]
    pub label: Option<String>,
}

impl RequestContext {
    /// Preamble lines, or an empty string when nothing was supplied.
    #[must_use]
    pub fn preamble(&self) -> String {
        let mut lines = Vec::new();
        if let Some(now) = &self.now {
            lines.push(format!(
                "Current date and time: {}",
                now.format("%A, %B %-d, %Y %H:%M (UTC%:z)")
            ));
        }
        if let Some(loc) = &self.location {
            let coords = format!("{:.4}, {:.4}", loc.latitude, loc.longitude);
            lines.push(match &loc.label {
                Some(label) => format!("User location: {label} ({coords})"),
                None => format!("User location: {coords}"),
            });
        }
        lines.join("\n")
    }
}

/// Filter, normalize, and ensure a system message.
///
/// Blank messages and unrecognized roles are dropped. Structured content is
/// serialized to text. Without a system message one is synthesized from the
/// context preamble and [`SYSTEM_PROMPT`].
#[must_use]
pub fn prepare_messages(messages: Vec<Message>, ctx: &RequestContext) -> Vec<Message> {
    let total = messages.len();
    let mut prepared: Vec<Message> = messages
        .into_iter()
        .filter(|m| m.role != MessageRole::Unknown && !m.content.is_blank())
        .map(|mut m| {
            if let MessageContent::Structured(_) = m.content {
                m.content = MessageContent::Text(m.content.to_text());
            }
            m
        })
        .collect();

    if total != prepared.len() {
        tracing::debug!(
            dropped = total - prepared.len(),
            kept = prepared.len(),
            "Dropped blank or unrecognized messages"
        );
    }

    if !prepared.iter().any(|m| m.role == MessageRole::System) {
        let preamble = ctx.preamble();
        let system = if preamble.is_empty() {
            SYSTEM_PROMPT.to_string()
        } else {
            format!("{preamble}\n\n{SYSTEM_PROMPT}")
        };
        prepared.insert(0, Message::system(system));
    }
    prepared
}

/// How phase-one messages are reshaped before they become phase-two input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IntermediatePolicy {
    /// Hand over assistant tool calls and tool messages unchanged.
    #[default]
    Passthrough,
    /// Rewrite tool messages as assistant messages marked `[Tool Result]`.
    DemoteToolMessages,
    /// Keep only system, user, and assistant text.
    ConversationRolesOnly,
}

impl IntermediatePolicy {
    #[must_use]
    pub fn apply(self, messages: Vec<Message>) -> Vec<Message> {
        match self {
            Self::Passthrough => messages,
            Self::DemoteToolMessages => messages
                .into_iter()
                .filter_map(|m| match m.role {
                    MessageRole::Tool => {
                        let label = m.name.as_deref().map_or_else(String::new, |n| format!(" {n}"));
                        Some(Message::assistant(format!(
                            "[Tool Result{label}] {}",
                            m.content.to_text()
                        )))
                    }
                    _ => text_only(m),
                })
                .collect(),
            Self::ConversationRolesOnly => messages.into_iter().filter_map(text_only).collect(),
        }
    }
}

fn text_only(mut m: Message) -> Option<Message> {
    if !matches!(
        m.role,
        MessageRole::System | MessageRole::User | MessageRole::Assistant
    ) {
        return None;
    }
    m.tool_calls = None;
    m.tool_call_id = None;
    (!m.content.is_blank()).then_some(m)
}
