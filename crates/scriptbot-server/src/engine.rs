//! Conversation engine: resolves inbound events against the stored status,
//! runs the store mutation a compound status asks for, renders the next
//! script entry and chains follow-ups.

use std::sync::Arc;
use std::time::Duration;

use scriptbot_config::Config;
use scriptbot_contracts::{InboundEvent, ListField, OutboundMessage, Projection};
use scriptbot_kernel::{
    detect_escape, is_compound, render, CipherError, ConversationStatus, EscapeCommand,
    PlaceholderCounts, PlaceholderValues, ScriptCatalog, StoreAction, TextCipher,
};
use thiserror::Error;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::chain::{ChainScheduler, StepFuture};
use crate::messenger::{GatewayError, MessengerClient};
use crate::store::{Mutation, StoreError, UserStore};

#[derive(Debug, Error)]
pub enum TurnError {
    #[error("no script entry for status `{0}`")]
    Configuration(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error("cipher: {0}")]
    Cipher(#[from] CipherError),
}

impl TurnError {
    pub fn kind(&self) -> &'static str {
        match self {
            TurnError::Configuration(_) => "configuration",
            TurnError::Store(_) => "store",
            TurnError::Gateway(_) => "gateway",
            TurnError::Cipher(_) => "cipher",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IgnoreReason {
    OwnMessage,
    EmptySender,
}

/// What happens after an entry has been sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FollowUp {
    None,
    AwaitingInput(String),
    Chained(String),
    /// A newer event for the same user arrived first; nothing was written or scheduled.
    Superseded(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    Ignored(IgnoreReason),
    HelpSent,
    Sent { trigger: String, follow_up: FollowUp },
    AwaitingInput(String),
}

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub page_id: String,
    pub initial_trigger: String,
    pub chain_delay: Duration,
    pub help_text: String,
    pub salt: String,
}

impl EngineSettings {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            page_id: cfg.messenger.page_id.clone(),
            initial_trigger: cfg.conversation.initial_trigger.clone(),
            chain_delay: Duration::from_millis(cfg.conversation.chain_delay_ms),
            help_text: cfg.conversation.help_text.clone(),
            salt: cfg.crypto.salt.clone(),
        }
    }
}

struct EngineInner {
    settings: EngineSettings,
    catalog: ScriptCatalog,
    store: UserStore,
    messenger: MessengerClient,
    chains: Arc<ChainScheduler>,
}

#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Engine {
    pub fn new(
        settings: EngineSettings,
        catalog: ScriptCatalog,
        store: UserStore,
        messenger: MessengerClient,
    ) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                settings,
                catalog,
                store,
                messenger,
                chains: Arc::new(ChainScheduler::default()),
            }),
        }
    }

    pub async fn handle_inbound(&self, event: InboundEvent) -> Result<TurnOutcome, TurnError> {
        let user_id = event.sender_id().to_string();
        if user_id.is_empty() {
            return Ok(TurnOutcome::Ignored(IgnoreReason::EmptySender));
        }
        if user_id == self.inner.settings.page_id {
            debug!("ignoring event from own page");
            return Ok(TurnOutcome::Ignored(IgnoreReason::OwnMessage));
        }

        let span = info_span!("turn", turn_id = %Uuid::new_v4(), sender_id = %user_id);
        async {
            let (generation, dropped) = self.inner.chains.cancel(&user_id).await;
            if let Some(trigger) = dropped {
                info!(trigger = %trigger, "cancelled pending chained message");
            }
            match event {
                InboundEvent::Text { text, .. } => {
                    self.handle_text(&user_id, &text, generation).await
                }
                InboundEvent::Postback { payload, .. } => {
                    info!(payload = %payload, "postback received");
                    self.postback(&user_id, &payload, generation).await
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn handle_text(
        &self,
        user_id: &str,
        text: &str,
        generation: u64,
    ) -> Result<TurnOutcome, TurnError> {
        match detect_escape(text) {
            Some(EscapeCommand::Help) => {
                info!("help requested");
                self.send_help(user_id).await
            }
            Some(EscapeCommand::Delete(target)) => {
                info!(target = ?target, "delete requested but not supported");
                self.send_help(user_id).await
            }
            None => {
                let sealed = TextCipher::for_user(user_id, &self.inner.settings.salt).encrypt(text)?;
                let status = self.inner.store.get_status(user_id).await?;
                self.resolve_status(user_id, &status, sealed, generation)
                    .await
            }
        }
    }

    /// Routes typed input according to `status`. `sealed_text` is already encrypted.
    async fn resolve_status(
        &self,
        user_id: &str,
        status: &str,
        sealed_text: String,
        generation: u64,
    ) -> Result<TurnOutcome, TurnError> {
        let (action, next) = match ConversationStatus::parse(status) {
            ConversationStatus::Simple(_) => {
                info!(status, "free text while not waiting for input");
                return self.send_help(user_id).await;
            }
            ConversationStatus::Compound { action, next } => (action, next),
        };
        let action = match StoreAction::from_action_name(action) {
            Ok(v) => v,
            Err(err) => {
                warn!(status, error = %err, "status names no store action");
                return self.send_help(user_id).await;
            }
        };

        let mutation = match action.list_field() {
            None => Mutation::Name(sealed_text),
            Some(field) => Mutation::AddToList(field, sealed_text),
        };
        self.inner.store.mutate(user_id, mutation, next).await?;
        info!(action = action.as_str(), next, "input captured");
        self.render_and_send(user_id, next, generation).await
    }

    /// Writes `trigger` as the user's status, then renders it. Only the
    /// initial trigger may create a new user document.
    async fn postback(
        &self,
        user_id: &str,
        trigger: &str,
        generation: u64,
    ) -> Result<TurnOutcome, TurnError> {
        let create = trigger == self.inner.settings.initial_trigger;
        self.inner.store.set_status(user_id, trigger, create).await?;
        self.render_and_send(user_id, trigger, generation).await
    }

    async fn render_and_send(
        &self,
        user_id: &str,
        trigger: &str,
        generation: u64,
    ) -> Result<TurnOutcome, TurnError> {
        if is_compound(trigger) {
            debug!(trigger, "waiting for typed input");
            return Ok(TurnOutcome::AwaitingInput(trigger.to_string()));
        }
        let entry = self
            .inner
            .catalog
            .get(trigger)
            .ok_or_else(|| TurnError::Configuration(trigger.to_string()))?;

        let mut message = entry.response.message.clone();
        let counts = PlaceholderCounts::scan(&message.text);
        if !counts.is_empty() {
            let projection = self.inner.store.project(user_id, counts.projection()).await?;
            let values = self.decrypt_projection(user_id, projection);
            let rendered = render(&message.text, &values);
            if !rendered.unfilled.is_empty() {
                warn!(trigger, unfilled = ?rendered.unfilled, "not enough stored data for placeholders");
            }
            message.text = rendered.text;
        }

        self.inner.messenger.send(user_id, &message).await?;
        info!(trigger, "script entry sent");

        let follow_up = match entry.next_status.as_deref() {
            None => FollowUp::None,
            Some(next) if is_compound(next) => {
                if self.inner.chains.generation(user_id).await != generation {
                    FollowUp::Superseded(next.to_string())
                } else {
                    self.inner.store.set_status(user_id, next, false).await?;
                    FollowUp::AwaitingInput(next.to_string())
                }
            }
            Some(next) => {
                if self.schedule_chain(user_id, next, generation).await {
                    FollowUp::Chained(next.to_string())
                } else {
                    FollowUp::Superseded(next.to_string())
                }
            }
        };
        Ok(TurnOutcome::Sent {
            trigger: trigger.to_string(),
            follow_up,
        })
    }

    async fn send_help(&self, user_id: &str) -> Result<TurnOutcome, TurnError> {
        let help = OutboundMessage::text(self.inner.settings.help_text.clone());
        self.inner.messenger.send(user_id, &help).await?;
        Ok(TurnOutcome::HelpSent)
    }

    async fn schedule_chain(&self, user_id: &str, trigger: &str, generation: u64) -> bool {
        let step = self
            .clone()
            .chained_step(user_id.to_string(), trigger.to_string(), generation);
        let scheduled = self
            .inner
            .chains
            .schedule(
                user_id,
                trigger,
                self.inner.settings.chain_delay,
                generation,
                step,
            )
            .await;
        if scheduled {
            debug!(trigger, "chained message scheduled");
        } else {
            info!(trigger, "newer event arrived, chained message dropped");
        }
        scheduled
    }

    fn chained_step(self, user_id: String, trigger: String, generation: u64) -> StepFuture {
        let span = info_span!("chain", turn_id = %Uuid::new_v4(), sender_id = %user_id);
        Box::pin(
            async move {
                if self.inner.chains.generation(&user_id).await != generation {
                    info!(trigger = %trigger, "newer event arrived, chained message dropped");
                    return;
                }
                match self.postback(&user_id, &trigger, generation).await {
                    Ok(outcome) => debug!(outcome = ?outcome, "chained step finished"),
                    Err(err) => report_turn_error(&user_id, &err),
                }
            }
            .instrument(span),
        )
    }

    /// Decrypts projected fields. Values that fail to decrypt are dropped and
    /// their placeholders stay literal.
    fn decrypt_projection(&self, user_id: &str, projection: Projection) -> PlaceholderValues {
        let cipher = TextCipher::for_user(user_id, &self.inner.settings.salt);
        let mut values = PlaceholderValues {
            name: projection.name.as_deref().and_then(|sealed| {
                cipher
                    .decrypt(sealed)
                    .map_err(|err| warn!(field = "name", error = %err, "stored value unreadable"))
                    .ok()
            }),
            ..PlaceholderValues::default()
        };
        for field in ListField::ALL {
            for item in projection.list(field) {
                match cipher.decrypt(&item.name) {
                    Ok(plain) => values.list_mut(field).push(plain),
                    Err(err) => {
                        warn!(field = field.as_str(), error = %err, "stored value unreadable")
                    }
                }
            }
        }
        values
    }
}

pub fn report_turn_error(user_id: &str, err: &TurnError) {
    error!(sender_id = %user_id, kind = err.kind(), error = %err, "turn aborted");
}
