//! Session state: everything the engine knows about one ongoing conversation.
//!
//! A session is created on first interaction, mutated by every turn, and torn
//! down on explicit reset or idle expiry. It is passed explicitly into the
//! assembler and only ever written by the state updater.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use uuid::Uuid;
use crate::message::Message;

/// Default number of messages kept in the recent-turn ring buffer.
pub const DEFAULT_TURN_CAPACITY: usize = 10;

/// Per-user conversational state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub user_id: String,

    /// Optional profile supplied by the host application.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<UserProfile>,

    /// Free-form key/value preferences (sorted for deterministic rendering).
    #[serde(default)]
    pub preferences: BTreeMap<String, String>,

    /// Running task list.
    #[serde(default)]
    pub tasks: Vec<Task>,

    /// Recent messages, oldest first, bounded by `turn_capacity`.
    #[serde(default)]
    pub recent_turns: VecDeque<Message>,

    #[serde(default = "default_turn_capacity")]
    pub turn_capacity: usize,

    /// Files attached to this session (content already extracted).
    #[serde(default)]
    pub attachments: Vec<Attachment>,

    /// Session-level rules appended to the default constraints.
    #[serde(default)]
    pub constraints: Vec<String>,

    /// Preferred response shape ("markdown", "json", ...), if the user set one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_format: Option<String>,

    pub created_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,

    #[serde(default)]
    pub turn_count: u64,
}

fn default_turn_capacity() -> usize {
    DEFAULT_TURN_CAPACITY
}

/// Descriptive profile of the user behind a session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expertise: Option<String>,
}

/// A unit of work the user and assistant are tracking across turns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub description: String,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
}

/// Status of a task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed(String),
}

impl TaskStatus {
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Pending | Self::InProgress)
    }
}

/// A file attached to a turn or session, with its extracted text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub id: String,
    pub name: String,
    #[serde(default = "default_mime")]
    pub mime_type: String,
    /// Text produced by the (external) content extractor.
    #[serde(default)]
    pub extracted_text: String,
}

fn default_mime() -> String {
    "text/plain".into()
}

impl Attachment {
    pub fn new(name: impl Into<String>, extracted_text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            mime_type: default_mime(),
            extracted_text: extracted_text.into(),
        }
    }

    pub fn has_content(&self) -> bool {
        !self.extracted_text.trim().is_empty()
    }
}

impl Session {
    /// Create a fresh session for a user.
    pub fn new(user_id: impl Into<String>, session_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.into(),
            user_id: user_id.into(),
            profile: None,
            preferences: BTreeMap::new(),
            tasks: Vec::new(),
            recent_turns: VecDeque::new(),
            turn_capacity: DEFAULT_TURN_CAPACITY,
            attachments: Vec::new(),
            constraints: Vec::new(),
            output_format: None,
            created_at: now,
            last_active_at: now,
            turn_count: 0,
        }
    }

    pub fn with_turn_capacity(mut self, capacity: usize) -> Self {
        self.turn_capacity = capacity.max(1);
        self
    }

    /// Append a message to the ring buffer, evicting the oldest beyond capacity.
    pub fn push_turn(&mut self, message: Message) {
        self.recent_turns.push_back(message);
        while self.recent_turns.len() > self.turn_capacity {
            self.recent_turns.pop_front();
        }
        self.last_active_at = Utc::now();
    }

    /// Add a pending task and return its id.
    pub fn add_task(&mut self, description: impl Into<String>) -> String {
        let id = Uuid::new_v4().to_string();
        self.tasks.push(Task {
            id: id.clone(),
            description: description.into(),
            status: TaskStatus::Pending,
            created_at: Utc::now(),
        });
        id
    }

    /// Update a task's status. Returns false if the id is unknown.
    pub fn set_task_status(&mut self, id: &str, status: TaskStatus) -> bool {
        match self.tasks.iter_mut().find(|t| t.id == id) {
            Some(task) => {
                task.status = status;
                true
            }
            None => false,
        }
    }

    /// Tasks that are pending or in progress.
    pub fn open_tasks(&self) -> impl Iterator<Item = &Task> {
        self.tasks.iter().filter(|t| t.status.is_open())
    }

    pub fn has_profile_data(&self) -> bool {
        self.profile.as_ref().is_some_and(|p| *p != UserProfile::default())
            || !self.preferences.is_empty()
    }

    /// Whether the session has been idle for longer than `idle_ttl`.
    pub fn is_idle(&self, now: DateTime<Utc>, idle_ttl: chrono::Duration) -> bool {
        now - self.last_active_at > idle_ttl
    }

    /// Drop conversational state, keeping identity, profile and preferences.
    pub fn clear_conversation(&mut self) {
        self.recent_turns.clear();
        self.tasks.clear();
        self.attachments.clear();
        self.turn_count = 0;
        self.last_active_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_buffer_evicts_oldest() {
        let mut session = Session::new("u", "s").with_turn_capacity(3);
        for i in 0..5 {
            session.push_turn(Message::user(format!("turn {i}")));
        }
        assert_eq!(session.recent_turns.len(), 3);
        assert_eq!(session.recent_turns[0].content, "turn 2");
        assert_eq!(session.recent_turns[2].content, "turn 4");
    }

    #[test]
    fn open_tasks_excludes_completed() {
        let mut session = Session::new("u", "s");
        let done = session.add_task("write report");
        session.add_task("review report");
        assert!(session.set_task_status(&done, TaskStatus::Completed));
        assert_eq!(session.open_tasks().count(), 1);
        assert!(!session.set_task_status("missing", TaskStatus::Completed));
    }

    #[test]
    fn profile_data_detection() {
        let mut session = Session::new("u", "s");
        assert!(!session.has_profile_data());
        session.profile = Some(UserProfile::default());
        assert!(!session.has_profile_data());
        session.preferences.insert("units".into(), "metric".into());
        assert!(session.has_profile_data());
    }

    #[test]
    fn attachment_content_check() {
        assert!(!Attachment::new("empty.txt", "   ").has_content());
        assert!(Attachment::new("notes.txt", "hello").has_content());
    }

    #[test]
    fn clear_conversation_keeps_identity() {
        let mut session = Session::new("u", "s");
        session.preferences.insert("tone".into(), "formal".into());
        session.push_turn(Message::user("hi"));
        session.add_task("t");
        session.clear_conversation();
        assert!(session.recent_turns.is_empty());
        assert!(session.tasks.is_empty());
        assert_eq!(session.preferences.len(), 1);
        assert_eq!(session.user_id, "u");
    }
}
