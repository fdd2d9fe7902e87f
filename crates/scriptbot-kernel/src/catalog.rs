use std::collections::HashMap;

use scriptbot_contracts::ScriptEntry;
use thiserror::Error;

use crate::{ConversationStatus, StoreAction};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CatalogError {
    #[error("script has no entries")]
    Empty,
    #[error("duplicate script status `{0}`")]
    Duplicate(String),
    #[error("script status `{0}` must not contain a separator")]
    CompoundKey(String),
}

/// Problems that do not stop the catalog from loading but will abort a turn
/// if the conversation reaches them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogIssue {
    DanglingTrigger { from: String, trigger: String },
    UnknownAction { from: String, action: String },
}

/// Immutable lookup of script entries by status.
#[derive(Debug, Clone)]
pub struct ScriptCatalog {
    entries: HashMap<String, ScriptEntry>,
}

impl ScriptCatalog {
    pub fn new(entries: Vec<ScriptEntry>) -> Result<Self, CatalogError> {
        if entries.is_empty() {
            return Err(CatalogError::Empty);
        }
        let mut map = HashMap::with_capacity(entries.len());
        for entry in entries {
            if ConversationStatus::parse(&entry.status).is_compound() {
                return Err(CatalogError::CompoundKey(entry.status));
            }
            if map.contains_key(&entry.status) {
                return Err(CatalogError::Duplicate(entry.status));
            }
            map.insert(entry.status.clone(), entry);
        }
        Ok(Self { entries: map })
    }

    pub fn get(&self, status: &str) -> Option<&ScriptEntry> {
        self.entries.get(status)
    }

    pub fn contains(&self, status: &str) -> bool {
        self.entries.contains_key(status)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn issues(&self) -> Vec<CatalogIssue> {
        let mut out = Vec::new();
        let mut keys: Vec<&String> = self.entries.keys().collect();
        keys.sort();
        for key in keys {
            let Some(next) = self.entries[key].next_status.as_deref() else {
                continue;
            };
            let mut status = ConversationStatus::parse(next);
            while let ConversationStatus::Compound { action, next } = status {
                if StoreAction::from_action_name(action).is_err() {
                    out.push(CatalogIssue::UnknownAction {
                        from: key.clone(),
                        action: action.to_string(),
                    });
                }
                status = ConversationStatus::parse(next);
            }
            let trigger = status.final_trigger();
            if !self.contains(trigger) {
                out.push(CatalogIssue::DanglingTrigger {
                    from: key.clone(),
                    trigger: trigger.to_string(),
                });
            }
        }
        out
    }
}
