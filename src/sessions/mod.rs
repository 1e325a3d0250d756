//! Conversation session derivation.
//!
//! Sessions are never stored. They are computed on read from the message
//! log: one session per (bot, user) pair, with activity status, duration,
//! and response-latency statistics derived from the message timestamps.
//!
//! Everything in this module is pure. Handlers fetch the caller-scoped
//! message rows plus bot/account lookup data, then call into here.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::db::Message;

/// Derived activity state of a conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Completed,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Completed => write!(f, "completed"),
        }
    }
}

impl std::str::FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "active" => Ok(Self::Active),
            "completed" => Ok(Self::Completed),
            _ => Err(format!("Unknown session status: {}", s)),
        }
    }
}

/// Relative date window applied to a session's last message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DateRange {
    Today,
    Week,
    Month,
    #[default]
    All,
}

impl DateRange {
    /// Inclusive lower bound for `ended_at`, or None for no bound
    fn cutoff(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Self::Today => now
                .date_naive()
                .and_hms_opt(0, 0, 0)
                .map(|start| start.and_utc()),
            Self::Week => Some(now - Duration::days(7)),
            Self::Month => Some(now - Duration::days(30)),
            Self::All => None,
        }
    }
}

impl std::str::FromStr for DateRange {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "today" => Ok(Self::Today),
            "week" => Ok(Self::Week),
            "month" => Ok(Self::Month),
            "all" => Ok(Self::All),
            _ => Err(format!("Unknown date range: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionSort {
    #[default]
    LastMessage,
    User,
    Bot,
}

impl std::str::FromStr for SessionSort {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "last_message" => Ok(Self::LastMessage),
            "user" => Ok(Self::User),
            "bot" => Ok(Self::Bot),
            _ => Err(format!("Unknown sort key: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl std::str::FromStr for SortOrder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "asc" => Ok(Self::Asc),
            "desc" => Ok(Self::Desc),
            _ => Err(format!("Unknown sort order: {}", s)),
        }
    }
}

/// Display data for the account on the user side of a conversation
#[derive(Debug, Clone)]
pub struct Counterpart {
    pub display_name: String,
    pub email: String,
}

/// One derived conversation between a bot and a user
#[derive(Debug, Clone, Serialize)]
pub struct ConversationSession {
    pub id: String,
    pub bot_id: String,
    pub bot_name: String,
    pub user_id: String,
    pub user_name: String,
    pub user_email: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub message_count: i64,
    pub status: SessionStatus,
    pub duration_minutes: i64,
    /// Accumulated user-to-bot reply gaps, kept for stats aggregation
    #[serde(skip_serializing)]
    pub response_gap_millis: i64,
    #[serde(skip_serializing)]
    pub response_gap_count: i64,
}

#[derive(Debug, Clone, Default)]
pub struct SessionFilter {
    pub bot_id: Option<String>,
    pub user_id: Option<String>,
    pub range: DateRange,
    pub status: Option<SessionStatus>,
}

/// Aggregate counts over a set of derived sessions
#[derive(Debug, Clone, Serialize)]
pub struct SessionStats {
    pub total: i64,
    pub active: i64,
    pub completed: i64,
    /// Mean user-to-bot reply latency, None when no reply pair exists
    pub avg_response_seconds: Option<f64>,
}

/// A conversation counts as active while its last message is younger than this
const ACTIVE_WINDOW_HOURS: i64 = 24;

/// Group messages into one session per (bot, user) pair.
///
/// Rows with an unparseable timestamp are skipped. Bots or accounts missing
/// from the lookup maps fall back to placeholder names; the message log has
/// no foreign keys, so rows can outlive what they reference.
pub fn derive_sessions(
    messages: &[Message],
    bot_names: &HashMap<String, String>,
    counterparts: &HashMap<String, Counterpart>,
    now: DateTime<Utc>,
) -> Vec<ConversationSession> {
    let mut groups: HashMap<(String, String), Vec<(DateTime<Utc>, &Message)>> = HashMap::new();

    for message in messages {
        let at = match DateTime::parse_from_rfc3339(&message.created_at) {
            Ok(at) => at.with_timezone(&Utc),
            Err(e) => {
                tracing::warn!(
                    message_id = %message.id,
                    "Skipping message with bad timestamp: {}",
                    e
                );
                continue;
            }
        };
        groups
            .entry((message.bot_id.clone(), message.user_id.clone()))
            .or_default()
            .push((at, message));
    }

    let mut sessions: Vec<ConversationSession> = groups
        .into_iter()
        .map(|((bot_id, user_id), mut group)| {
            group.sort_by_key(|(at, _)| *at);

            // Non-empty by construction.
            let started_at = group[0].0;
            let ended_at = group[group.len() - 1].0;

            let status = if now - ended_at < Duration::hours(ACTIVE_WINDOW_HOURS) {
                SessionStatus::Active
            } else {
                SessionStatus::Completed
            };

            let (gap_millis, gap_count) = response_gaps(&group);

            let bot_name = bot_names
                .get(&bot_id)
                .cloned()
                .unwrap_or_else(|| "Unknown bot".to_string());
            let (user_name, user_email) = match counterparts.get(&user_id) {
                Some(c) => (c.display_name.clone(), c.email.clone()),
                None => ("Unknown user".to_string(), String::new()),
            };

            ConversationSession {
                id: format!("{}:{}", bot_id, user_id),
                bot_id,
                bot_name,
                user_id,
                user_name,
                user_email,
                started_at,
                ended_at,
                message_count: group.len() as i64,
                status,
                duration_minutes: (ended_at - started_at).num_minutes(),
                response_gap_millis: gap_millis,
                response_gap_count: gap_count,
            }
        })
        .collect();

    // HashMap iteration order is arbitrary; pin the default ordering here.
    sort_sessions(&mut sessions, SessionSort::LastMessage, SortOrder::Desc);
    sessions
}

/// Sum the gaps between each user message and the bot message that follows it
fn response_gaps(group: &[(DateTime<Utc>, &Message)]) -> (i64, i64) {
    let mut awaiting: Vec<DateTime<Utc>> = Vec::new();
    let mut total_millis = 0i64;
    let mut count = 0i64;

    for (at, message) in group {
        match message.sender.as_str() {
            "user" => awaiting.push(*at),
            "bot" => {
                for asked in awaiting.drain(..) {
                    total_millis += (*at - asked).num_milliseconds();
                    count += 1;
                }
            }
            _ => {}
        }
    }

    (total_millis, count)
}

/// Apply caller-supplied filters to derived sessions
pub fn filter_sessions(
    sessions: Vec<ConversationSession>,
    filter: &SessionFilter,
    now: DateTime<Utc>,
) -> Vec<ConversationSession> {
    let cutoff = filter.range.cutoff(now);

    sessions
        .into_iter()
        .filter(|s| {
            if let Some(bot_id) = &filter.bot_id {
                if &s.bot_id != bot_id {
                    return false;
                }
            }
            if let Some(user_id) = &filter.user_id {
                if &s.user_id != user_id {
                    return false;
                }
            }
            if let Some(cutoff) = cutoff {
                if s.ended_at < cutoff {
                    return false;
                }
            }
            if let Some(status) = filter.status {
                if s.status != status {
                    return false;
                }
            }
            true
        })
        .collect()
}

/// Sort sessions by the requested key.
///
/// Ties always break on (bot_id, user_id) so the output order is total
/// regardless of input order.
pub fn sort_sessions(sessions: &mut [ConversationSession], sort: SessionSort, order: SortOrder) {
    sessions.sort_by(|a, b| {
        let primary = match sort {
            SessionSort::LastMessage => a.ended_at.cmp(&b.ended_at),
            SessionSort::User => a.user_email.cmp(&b.user_email),
            SessionSort::Bot => a.bot_name.cmp(&b.bot_name),
        };
        let primary = match order {
            SortOrder::Asc => primary,
            SortOrder::Desc => primary.reverse(),
        };
        primary
            .then_with(|| a.bot_id.cmp(&b.bot_id))
            .then_with(|| a.user_id.cmp(&b.user_id))
    });
}

/// Aggregate statistics over already-filtered sessions
pub fn session_stats(sessions: &[ConversationSession]) -> SessionStats {
    let active = sessions
        .iter()
        .filter(|s| s.status == SessionStatus::Active)
        .count() as i64;

    let gap_millis: i64 = sessions.iter().map(|s| s.response_gap_millis).sum();
    let gap_count: i64 = sessions.iter().map(|s| s.response_gap_count).sum();

    let avg_response_seconds = if gap_count > 0 {
        Some(gap_millis as f64 / gap_count as f64 / 1000.0)
    } else {
        None
    };

    SessionStats {
        total: sessions.len() as i64,
        active,
        completed: sessions.len() as i64 - active,
        avg_response_seconds,
    }
}
