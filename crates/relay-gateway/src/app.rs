use std::sync::Arc;

use axum::{
    routing::{get, post, put},
    Router,
};
use relay_audit::AuditLog;
use relay_core::config::RelayConfig;
use relay_identity::{SessionManager, UserStore};
use relay_magiclink::{LinkMailer, MagicLinkIssuer};
use relay_notify::{Dispatcher, NotificationStore};
use relay_pipeline::MessagePipeline;
use relay_presence::PresenceRegistry;
use relay_store::{ConversationStore, MessageStore};
use tokio_util::sync::CancellationToken;

use crate::ws::acks::PendingAcks;

/// Central shared state — passed as Arc<AppState> to all Axum handlers.
pub struct AppState {
    pub config: RelayConfig,
    pub users: Arc<UserStore>,
    pub sessions: Arc<SessionManager>,
    pub conversations: Arc<ConversationStore>,
    pub messages: Arc<MessageStore>,
    pub presence: Arc<PresenceRegistry>,
    pub notifications: Arc<NotificationStore>,
    pub dispatcher: Arc<Dispatcher>,
    pub magic_links: Arc<MagicLinkIssuer>,
    pub mailer: Arc<dyn LinkMailer>,
    pub audit: AuditLog,
    pub pipeline: MessagePipeline,
    /// Un-acked frames per session for replay on reconnect.
    pub pending_acks: PendingAcks,
    /// Root of the shutdown tree; child tokens hang off it.
    pub shutdown: CancellationToken,
}

/// Assemble the full Axum router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(crate::http::health::health_handler))
        .route("/ws", get(crate::ws::connection::ws_handler))
        .route("/auth/register", post(crate::http::auth::register_handler))
        .route("/auth/login", post(crate::http::auth::login_handler))
        .route("/auth/logout", post(crate::http::auth::logout_handler))
        .route(
            "/users/me",
            axum::routing::delete(crate::http::auth::delete_account_handler),
        )
        .route(
            "/auth/magic-link",
            post(crate::http::auth::magic_link_request_handler),
        )
        .route(
            "/auth/magic-link/validate",
            post(crate::http::auth::magic_link_validate_handler),
        )
        .route(
            "/auth/magic-link/consume",
            post(crate::http::auth::magic_link_consume_handler),
        )
        .route("/audit", get(crate::http::audit::audit_handler))
        .route(
            "/security-events",
            get(crate::http::audit::security_handler),
        )
        .route(
            "/conversations",
            post(crate::http::conversations::create_room_handler),
        )
        .route(
            "/conversations/dm",
            post(crate::http::conversations::open_dm_handler),
        )
        .route(
            "/conversations/{id}/members",
            post(crate::http::conversations::add_member_handler),
        )
        .route(
            "/conversations/{id}/leave",
            post(crate::http::conversations::leave_handler),
        )
        .route(
            "/conversations/{id}/block",
            post(crate::http::conversations::block_handler),
        )
        .route(
            "/conversations/{id}/unblock",
            post(crate::http::conversations::unblock_handler),
        )
        .route(
            "/conversations/{id}/messages",
            get(crate::http::messages::list_messages_handler)
                .post(crate::http::messages::post_message_handler),
        )
        .route(
            "/conversations/{id}/pins",
            get(crate::http::messages::list_pins_handler),
        )
        .route(
            "/messages/{id}",
            put(crate::http::messages::edit_message_handler)
                .delete(crate::http::messages::delete_message_handler),
        )
        .route(
            "/messages/{id}/reactions",
            post(crate::http::messages::add_reaction_handler),
        )
        .route(
            "/messages/{id}/reactions/{emoji}",
            axum::routing::delete(crate::http::messages::remove_reaction_handler),
        )
        .route(
            "/messages/{id}/pin",
            put(crate::http::messages::pin_message_handler),
        )
        .route(
            "/notifications/send",
            post(crate::http::notifications::send_handler),
        )
        .route(
            "/notifications",
            get(crate::http::notifications::list_handler),
        )
        .route(
            "/notifications/{id}/read",
            put(crate::http::notifications::mark_read_handler),
        )
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
