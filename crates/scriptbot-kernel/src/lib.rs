use once_cell::sync::Lazy;
use regex::Regex;
use scriptbot_contracts::ListField;
use thiserror::Error;

mod catalog;
mod cipher;
mod placeholder;

pub use catalog::{CatalogError, CatalogIssue, ScriptCatalog};
pub use cipher::{CipherError, TextCipher};
pub use placeholder::{render, PlaceholderCounts, PlaceholderValues, Rendered, Tag};

/// Separator between the capture action and the trigger that follows it.
pub const STATUS_SEPARATOR: char = '-';

static ESCAPE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(help|delete)\b").expect("escape pattern compiles"));

/// Where a stored status places the user in the script.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationStatus<'a> {
    /// Waiting for a button press; the value is a catalog key.
    Simple(&'a str),
    /// Waiting for typed input, to be consumed by `action` before moving to `next`.
    Compound { action: &'a str, next: &'a str },
}

impl<'a> ConversationStatus<'a> {
    /// Splits at the first separator only, so `next` may itself be compound.
    pub fn parse(status: &'a str) -> Self {
        match status.split_once(STATUS_SEPARATOR) {
            Some((action, next)) => ConversationStatus::Compound { action, next },
            None => ConversationStatus::Simple(status),
        }
    }

    pub fn is_compound(&self) -> bool {
        matches!(self, ConversationStatus::Compound { .. })
    }

    /// The catalog key this status eventually leads to.
    pub fn final_trigger(&self) -> &'a str {
        match *self {
            ConversationStatus::Simple(trigger) => trigger,
            ConversationStatus::Compound { next, .. } => ConversationStatus::parse(next).final_trigger(),
        }
    }
}

pub fn is_compound(status: &str) -> bool {
    status.contains(STATUS_SEPARATOR)
}

/// Store mutation a compound status can request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreAction {
    UpdateName,
    AddGoal,
    AddHobby,
    AddJoy,
    AddSupport,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown store action `{raw}` (normalized `{normalized}`)")]
pub struct UnknownAction {
    pub raw: String,
    pub normalized: String,
}

impl StoreAction {
    pub fn from_action_name(raw: &str) -> Result<Self, UnknownAction> {
        let normalized = normalize_action_name(raw);
        match normalized.as_str() {
            "updateName" => Ok(StoreAction::UpdateName),
            "addGoal" => Ok(StoreAction::AddGoal),
            "addHobby" => Ok(StoreAction::AddHobby),
            "addJoy" => Ok(StoreAction::AddJoy),
            "addSupport" | "addSupporter" => Ok(StoreAction::AddSupport),
            _ => Err(UnknownAction {
                raw: raw.to_string(),
                normalized,
            }),
        }
    }

    /// `None` means the scalar `name` field.
    pub fn list_field(self) -> Option<ListField> {
        match self {
            StoreAction::UpdateName => None,
            StoreAction::AddGoal => Some(ListField::Goals),
            StoreAction::AddHobby => Some(ListField::Hobbies),
            StoreAction::AddJoy => Some(ListField::Joys),
            StoreAction::AddSupport => Some(ListField::Supporters),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StoreAction::UpdateName => "update_name",
            StoreAction::AddGoal => "add_goal",
            StoreAction::AddHobby => "add_hobby",
            StoreAction::AddJoy => "add_joy",
            StoreAction::AddSupport => "add_support",
        }
    }
}

/// `ADD_GOAL` and `add_goal` both become `addGoal`.
pub fn normalize_action_name(raw: &str) -> String {
    let lower = raw.trim().to_lowercase();
    let mut out = String::with_capacity(lower.len());
    let mut chars = lower.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '_' {
            if let Some(next) = chars.peek().copied().filter(|n| n.is_ascii_lowercase()) {
                out.push(next.to_ascii_uppercase());
                chars.next();
                continue;
            }
        }
        out.push(c);
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteTarget {
    Name,
    List(ListField),
    Everything,
    Unspecified,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscapeCommand {
    Help,
    Delete(DeleteTarget),
}

/// Finds the first whole-word `help` or `delete`, ignoring case.
pub fn detect_escape(text: &str) -> Option<EscapeCommand> {
    let lower = text.to_lowercase();
    let found = ESCAPE_RE.find(&lower)?;
    match found.as_str() {
        "help" => Some(EscapeCommand::Help),
        _ => Some(EscapeCommand::Delete(delete_target(&lower[found.end()..]))),
    }
}

fn delete_target(rest: &str) -> DeleteTarget {
    rest.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .find_map(|word| match word {
            "name" => Some(DeleteTarget::Name),
            "goal" | "goals" => Some(DeleteTarget::List(ListField::Goals)),
            "hobby" | "hobbies" => Some(DeleteTarget::List(ListField::Hobbies)),
            "joy" | "joys" => Some(DeleteTarget::List(ListField::Joys)),
            "supporter" | "supporters" => Some(DeleteTarget::List(ListField::Supporters)),
            "everything" | "all" | "me" => Some(DeleteTarget::Everything),
            _ => None,
        })
        .unwrap_or(DeleteTarget::Unspecified)
}
