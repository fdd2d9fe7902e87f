use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Object type the platform stamps on webhook deliveries for page subscriptions.
pub const PAGE_OBJECT: &str = "page";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookBody {
    pub object: String,
    #[serde(default)]
    pub entry: Vec<WebhookEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEntry {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub messaging: Vec<MessagingEvent>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Participant {
    pub id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagingEvent {
    pub sender: Participant,
    #[serde(default)]
    pub recipient: Option<Participant>,
    #[serde(default)]
    pub message: Option<IncomingMessage>,
    #[serde(default)]
    pub postback: Option<IncomingPostback>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncomingMessage {
    #[serde(default)]
    pub is_echo: bool,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub quick_reply: Option<QuickReplyPayload>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuickReplyPayload {
    pub payload: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncomingPostback {
    pub payload: String,
    #[serde(default)]
    pub title: Option<String>,
}

/// Platform-independent shape of one inbound user action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InboundEvent {
    Text { sender_id: String, text: String },
    Postback { sender_id: String, payload: String },
}

impl InboundEvent {
    pub fn sender_id(&self) -> &str {
        match self {
            InboundEvent::Text { sender_id, .. } | InboundEvent::Postback { sender_id, .. } => {
                sender_id
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuickReply {
    pub content_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

/// Message body handed to the send API. Fields the bot does not interpret
/// (attachments, templates) ride along in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quick_replies: Option<Vec<QuickReply>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl OutboundMessage {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            quick_replies: None,
            extra: Map::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptResponse {
    pub message: OutboundMessage,
}

/// One node of the scripted conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptEntry {
    pub status: String,
    pub response: ScriptResponse,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_status: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptFile {
    #[serde(rename = "script entries")]
    pub entries: Vec<ScriptEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recipient {
    pub id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendRequest {
    pub recipient: Recipient,
    pub message: OutboundMessage,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SendResponse {
    #[serde(default)]
    pub recipient_id: Option<String>,
    #[serde(default)]
    pub message_id: Option<String>,
    #[serde(default)]
    pub error: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListItem {
    pub name: String,
    #[serde(default)]
    pub progress: f64,
    #[serde(default)]
    pub trend: f64,
}

impl ListItem {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            progress: 0.0,
            trend: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListField {
    Goals,
    Hobbies,
    Joys,
    Supporters,
}

impl ListField {
    pub const ALL: [ListField; 4] = [
        ListField::Goals,
        ListField::Hobbies,
        ListField::Joys,
        ListField::Supporters,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ListField::Goals => "goals",
            ListField::Hobbies => "hobbies",
            ListField::Joys => "joys",
            ListField::Supporters => "supporters",
        }
    }
}

/// Stored per-user conversation document. `name` and every list item name
/// hold ciphertext.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    pub user_id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub status: String,
    #[serde(default)]
    pub goals: Vec<ListItem>,
    #[serde(default)]
    pub hobbies: Vec<ListItem>,
    #[serde(default)]
    pub joys: Vec<ListItem>,
    #[serde(default)]
    pub supporters: Vec<ListItem>,
}

impl UserRecord {
    pub fn new(user_id: impl Into<String>, status: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            name: None,
            status: status.into(),
            goals: Vec::new(),
            hobbies: Vec::new(),
            joys: Vec::new(),
            supporters: Vec::new(),
        }
    }

    pub fn list(&self, field: ListField) -> &[ListItem] {
        match field {
            ListField::Goals => &self.goals,
            ListField::Hobbies => &self.hobbies,
            ListField::Joys => &self.joys,
            ListField::Supporters => &self.supporters,
        }
    }

    pub fn list_mut(&mut self, field: ListField) -> &mut Vec<ListItem> {
        match field {
            ListField::Goals => &mut self.goals,
            ListField::Hobbies => &mut self.hobbies,
            ListField::Joys => &mut self.joys,
            ListField::Supporters => &mut self.supporters,
        }
    }
}

/// Which fields of a record to read back, and how many random samples of
/// each list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectionSpec {
    pub name: bool,
    pub goals: usize,
    pub hobbies: usize,
    pub joys: usize,
    pub supporters: usize,
}

impl ProjectionSpec {
    pub fn count(&self, field: ListField) -> usize {
        match field {
            ListField::Goals => self.goals,
            ListField::Hobbies => self.hobbies,
            ListField::Joys => self.joys,
            ListField::Supporters => self.supporters,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Projection {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub goals: Vec<ListItem>,
    #[serde(default)]
    pub hobbies: Vec<ListItem>,
    #[serde(default)]
    pub joys: Vec<ListItem>,
    #[serde(default)]
    pub supporters: Vec<ListItem>,
}

impl Projection {
    pub fn list_mut(&mut self, field: ListField) -> &mut Vec<ListItem> {
        match field {
            ListField::Goals => &mut self.goals,
            ListField::Hobbies => &mut self.hobbies,
            ListField::Joys => &mut self.joys,
            ListField::Supporters => &mut self.supporters,
        }
    }

    pub fn list(&self, field: ListField) -> &[ListItem] {
        match field {
            ListField::Goals => &self.goals,
            ListField::Hobbies => &self.hobbies,
            ListField::Joys => &self.joys,
            ListField::Supporters => &self.supporters,
        }
    }
}
