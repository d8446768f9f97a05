use std::sync::Arc;

use relay_audit::types::actions;
use relay_audit::AuditLog;
use relay_core::config::LimitsConfig;
use relay_identity::types::Session;
use relay_identity::{SessionManager, UserStore};
use relay_notify::types::{ChannelKind, NotificationRequest, Priority};
use relay_notify::Dispatcher;
use relay_presence::PresenceRegistry;
use relay_protocol::{ServerFrame, WireMessage};
use relay_store::types::{Cursor, Message, Page};
use relay_store::{mentions, ConversationStore, MessageStore};
use tracing::{debug, instrument, warn};

use crate::error::{PipelineError, Result};
use crate::ratelimit::SubmitLimiter;
use crate::validate::validate_content;

/// Default edit policy window.
pub const EDIT_WINDOW_SECS: u64 = 15 * 60;

/// Orchestrates the inbound message flow: auth touch, membership check,
/// rate limit, validation, mention resolution, transactional persist,
/// live fan-out, notification handoff, audit.
///
/// Publication order within a conversation follows persist order because
/// the store serializes appends and `submit` publishes before returning.
pub struct MessagePipeline {
    users: Arc<UserStore>,
    sessions: Arc<SessionManager>,
    conversations: Arc<ConversationStore>,
    messages: Arc<MessageStore>,
    presence: Arc<PresenceRegistry>,
    dispatcher: Arc<Dispatcher>,
    audit: AuditLog,
    limiter: SubmitLimiter,
    limits: LimitsConfig,
}

/// What `submit` hands back to the transport layer.
#[derive(Debug, Clone)]
pub struct SubmitOutcome {
    pub message: Message,
    /// False when an idempotency replay returned the original.
    pub created: bool,
}

impl MessagePipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        users: Arc<UserStore>,
        sessions: Arc<SessionManager>,
        conversations: Arc<ConversationStore>,
        messages: Arc<MessageStore>,
        presence: Arc<PresenceRegistry>,
        dispatcher: Arc<Dispatcher>,
        audit: AuditLog,
        limits: LimitsConfig,
    ) -> Self {
        Self {
            users,
            sessions,
            conversations,
            messages,
            presence,
            dispatcher,
            audit,
            limiter: SubmitLimiter::new(&limits),
            limits,
        }
    }

    /// The inbound submit operation (§ message flow). Returns the message
    /// and whether this call created it.
    #[instrument(skip(self, session, content, metadata), fields(conversation_id, user = session.user_id))]
    pub fn submit(
        &self,
        session: &Session,
        conversation_id: i64,
        content: &str,
        parent: Option<i64>,
        metadata: Option<serde_json::Value>,
        idempotency_key: Option<&str>,
    ) -> Result<SubmitOutcome> {
        let author = session.user_id;
        self.sessions.touch(&session.id)?;

        if !self.conversations.is_member(conversation_id, author)? {
            return Err(relay_store::StoreError::NotAMember(conversation_id).into());
        }

        self.limiter.check(author, conversation_id)?;
        validate_content(content, self.limits.max_content_chars)?;

        // Mentions resolve against the live handle index; unknown handles
        // are dropped silently.
        let handles = mentions::extract_handles(content);
        let mentioned: Vec<i64> = self
            .users
            .resolve_handles(&handles)?
            .into_iter()
            .map(|(_, id)| id)
            .collect();

        let appended = self.messages.append(
            conversation_id,
            author,
            content,
            metadata.unwrap_or(serde_json::Value::Null),
            parent,
            &mentioned,
            idempotency_key,
        )?;
        if !appended.created {
            debug!(message_id = appended.message.id, "idempotent replay; skipping fan-out");
            return Ok(SubmitOutcome {
                message: appended.message,
                created: false,
            });
        }
        let message = appended.message;

        // DM blocking: the message persists, but the blocker neither sees
        // the live frame nor receives a notification.
        let blocked_by = self.conversations.blocked_by(conversation_id)?;
        let skip: Vec<i64> = blocked_by.into_iter().collect();

        let frame = ServerFrame::Message(wire_message(&message)).to_json();
        self.presence.publish(conversation_id, &frame, &skip);

        self.notify_recipients(&message, &mentioned, blocked_by);

        if let Err(e) = self.audit.record(
            Some(author),
            actions::MESSAGE_CREATED,
            &format!("message:{}", message.id),
            serde_json::json!({ "conversation": conversation_id, "parent": parent }),
            true,
        ) {
            warn!(error = %e, "audit write failed for message create");
        }

        Ok(SubmitOutcome {
            message,
            created: true,
        })
    }

    /// Edit a message and fan the new content out to subscribers.
    #[instrument(skip(self, session, content))]
    pub fn edit(&self, session: &Session, message_id: i64, content: &str) -> Result<Message> {
        self.sessions.touch(&session.id)?;
        validate_content(content, self.limits.max_content_chars)?;

        let message = self
            .messages
            .edit(message_id, session.user_id, content, EDIT_WINDOW_SECS)?;

        let frame = ServerFrame::Edit {
            id: message.id,
            conversation: message.conversation_id,
            content: message.content.clone(),
            edited_at: message.edited_at.clone().unwrap_or_default(),
            edit_count: message.edit_count,
        }
        .to_json();
        let skip: Vec<i64> = self
            .conversations
            .blocked_by(message.conversation_id)?
            .into_iter()
            .collect();
        self.presence.publish(message.conversation_id, &frame, &skip);

        let _ = self.audit.record(
            Some(session.user_id),
            actions::MESSAGE_EDITED,
            &format!("message:{}", message.id),
            serde_json::json!({ "editCount": message.edit_count }),
            true,
        );
        Ok(message)
    }

    /// Add or remove a reaction; both directions are idempotent.
    #[instrument(skip(self, session))]
    pub fn react(
        &self,
        session: &Session,
        message_id: i64,
        emoji: &str,
        add: bool,
    ) -> Result<bool> {
        self.sessions.touch(&session.id)?;
        let message = self
            .messages
            .get(message_id)?
            .ok_or(relay_store::StoreError::MessageNotFound(message_id))?;
        if !self
            .conversations
            .is_member(message.conversation_id, session.user_id)?
        {
            return Err(relay_store::StoreError::NotAMember(message.conversation_id).into());
        }

        let changed = if add {
            self.messages.react(message_id, session.user_id, emoji)?
        } else {
            self.messages.unreact(message_id, session.user_id, emoji)?
        };

        if changed {
            let frame = ServerFrame::Reaction {
                message_id,
                user: session.user_id,
                emoji: emoji.to_string(),
                added: add,
            }
            .to_json();
            self.presence.publish(message.conversation_id, &frame, &[]);
        }
        Ok(changed)
    }

    /// Pin or unpin a message. Room staff only; in a DM either member may pin.
    #[instrument(skip(self, session))]
    pub fn set_pinned(&self, session: &Session, message_id: i64, pinned: bool) -> Result<Message> {
        self.sessions.touch(&session.id)?;
        let message = self
            .messages
            .get(message_id)?
            .ok_or(relay_store::StoreError::MessageNotFound(message_id))?;
        let conversation = message.conversation_id;

        let role = self.conversations.member_role(conversation, session.user_id)?;
        let conv = self
            .conversations
            .get(conversation)?
            .ok_or(relay_store::StoreError::ConversationNotFound(conversation))?;
        let allowed = match role {
            None => false,
            Some(r) if conv.kind.is_room() => {
                matches!(r, relay_core::types::ConversationRole::Owner
                    | relay_core::types::ConversationRole::Moderator)
            }
            Some(_) => true,
        };
        if !allowed {
            return Err(relay_store::StoreError::Forbidden(
                "pinning requires a moderator role in rooms".to_string(),
            )
            .into());
        }

        let message = self.messages.set_pinned(message_id, pinned)?;
        let frame = ServerFrame::Pin {
            message_id,
            conversation,
            pinned,
        }
        .to_json();
        self.presence.publish(conversation, &frame, &[]);

        let _ = self.audit.record(
            Some(session.user_id),
            if pinned { actions::MESSAGE_PINNED } else { actions::MESSAGE_UNPINNED },
            &format!("message:{}", message_id),
            serde_json::json!({ "conversation": conversation }),
            true,
        );
        Ok(message)
    }

    /// Transient typing signal; fans out to everyone else in the room.
    pub fn typing(&self, session: &Session, conversation_id: i64) -> Result<()> {
        if !self
            .conversations
            .is_member(conversation_id, session.user_id)?
        {
            return Err(relay_store::StoreError::NotAMember(conversation_id).into());
        }
        self.presence.typing(conversation_id, session.user_id);
        let frame = ServerFrame::Typing {
            conversation: conversation_id,
            user: session.user_id,
        }
        .to_json();
        self.presence
            .publish(conversation_id, &frame, &[session.user_id]);
        Ok(())
    }

    /// Membership-checked backwards pagination.
    pub fn history(
        &self,
        session: &Session,
        conversation_id: i64,
        before: Option<&Cursor>,
        limit: usize,
    ) -> Result<Page> {
        if !self
            .conversations
            .is_member(conversation_id, session.user_id)?
        {
            return Err(relay_store::StoreError::NotAMember(conversation_id).into());
        }
        Ok(self.messages.page(conversation_id, before, limit)?)
    }

    /// Step 9: a recipient gets a notification request when they are not
    /// watching the conversation live OR their preferences enable channels
    /// beyond the socket and the stored record; mentioned users get a
    /// high-priority mention regardless.
    fn notify_recipients(&self, message: &Message, mentioned: &[i64], blocked_by: Option<i64>) {
        let members = match self.conversations.member_ids(message.conversation_id) {
            Ok(m) => m,
            Err(e) => {
                warn!(error = %e, "member lookup failed; notifications skipped");
                return;
            }
        };
        let live = self.presence.users_subscribed(message.conversation_id);

        for user_id in members {
            if user_id == message.author || Some(user_id) == blocked_by {
                continue;
            }
            let is_mentioned = mentioned.contains(&user_id);
            if live.contains(&user_id) && !is_mentioned && !self.has_external_channels(user_id) {
                continue;
            }

            let request = NotificationRequest {
                kind: if is_mentioned {
                    "message.mention".to_string()
                } else {
                    "message.new".to_string()
                },
                title: "New message".to_string(),
                body: preview(&message.content),
                data: serde_json::json!({
                    "conversation": message.conversation_id,
                    "message": message.id,
                    "author": message.author,
                }),
                priority: if is_mentioned { Priority::High } else { Priority::Normal },
                channels: None,
                expires_in_secs: Some(7 * 24 * 3600),
                source: Some("pipeline".to_string()),
                tags: vec!["chat".to_string()],
            };
            match self.dispatcher.submit(user_id, &request) {
                Ok(_) => {}
                Err(relay_notify::NotifyError::Overloaded) => {
                    warn!(user_id, "notification queue overloaded; dropped");
                }
                Err(e) => warn!(user_id, error = %e, "notification submit failed"),
            }
        }
    }

    /// Whether this user has enabled any channel the live socket does not
    /// already cover (email, SMS, push, webhook). Such users are notified
    /// even while they watch the conversation live.
    fn has_external_channels(&self, user_id: i64) -> bool {
        self.dispatcher
            .preferences(user_id)
            .map(|prefs| {
                prefs
                    .enabled_channels
                    .iter()
                    .any(|c| !matches!(c, ChannelKind::Live | ChannelKind::InApp))
            })
            .unwrap_or(false)
    }
}

fn preview(content: &str) -> String {
    const MAX: usize = 140;
    if content.chars().count() <= MAX {
        content.to_string()
    } else {
        let cut: String = content.chars().take(MAX).collect();
        format!("{}…", cut)
    }
}

/// Project a stored message onto its wire shape.
pub fn wire_message(m: &Message) -> WireMessage {
    WireMessage {
        id: m.id,
        conversation: m.conversation_id,
        author: m.author,
        content: m.content.clone(),
        parent: m.parent_id,
        metadata: m.metadata.clone(),
        created_at: m.created_at.clone(),
        edited: m.edited,
        edit_count: m.edit_count,
        pinned: m.pinned,
        thread_reply_count: m.thread_reply_count,
    }
}
