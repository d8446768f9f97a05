use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use relay_audit::AuditLog;
use relay_core::config::RelayConfig;
use relay_identity::{SessionManager, UserStore};
use relay_magiclink::{LogMailer, MagicLinkIssuer};
use relay_notify::sender::WebhookSender;
use relay_notify::{Dispatcher, NotificationStore};
use relay_pipeline::MessagePipeline;
use relay_presence::PresenceRegistry;
use relay_store::{ConversationStore, MessageStore};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

mod app;
mod http;
mod ws;

use app::AppState;

// Exit codes: 0 normal, 1 configuration error, 2 storage unavailable at
// boot, 3 fatal runtime.
#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "relay_gateway=info,tower_http=warn".into()),
        )
        .init();

    let config_path = std::env::var("RELAY_CONFIG").ok();
    let config = match RelayConfig::load(config_path.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            error!("configuration error: {}", e);
            return ExitCode::from(1);
        }
    };

    let state = match build_state(config).await {
        Ok(s) => s,
        Err(code) => return code,
    };

    let bind = state.config.server.bind.clone();
    let port = state.config.server.port;
    let addr: SocketAddr = match format!("{}:{}", bind, port).parse() {
        Ok(a) => a,
        Err(e) => {
            error!("invalid bind address {}:{}: {}", bind, port, e);
            return ExitCode::from(1);
        }
    };

    let router = app::build_router(state.clone());
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            error!("cannot bind {}: {}", addr, e);
            return ExitCode::from(3);
        }
    };
    info!("relay gateway listening on {}", addr);

    let shutdown = state.shutdown.clone();
    let serve = axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutdown signal received");
        shutdown.cancel();
    });

    match serve.await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("fatal runtime error: {}", e);
            ExitCode::from(3)
        }
    }
}

/// Open storage, run schema migrations, and wire every subsystem together.
async fn build_state(config: RelayConfig) -> Result<Arc<AppState>, ExitCode> {
    let db_path = config.database.path.clone();
    if let Some(parent) = std::path::Path::new(&db_path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    let conn = match rusqlite::Connection::open(&db_path) {
        Ok(c) => c,
        Err(e) => {
            error!("cannot open database {}: {}", db_path, e);
            return Err(ExitCode::from(2));
        }
    };
    if let Err(e) = conn.pragma_update(None, "journal_mode", "WAL") {
        warn!("could not enable WAL mode: {}", e);
    }
    if let Err(e) = conn.busy_timeout(Duration::from_secs(5)) {
        warn!("could not set busy timeout: {}", e);
    }
    if let Err(e) = relay_identity::db::init_db(&conn) {
        error!("identity schema init failed: {}", e);
        return Err(ExitCode::from(2));
    }
    if let Err(e) = relay_store::db::init_db(&conn) {
        error!("store schema init failed: {}", e);
        return Err(ExitCode::from(2));
    }
    let db = Arc::new(Mutex::new(conn));

    let audit = match AuditLog::new(db.clone()) {
        Ok(a) => a,
        Err(e) => {
            error!("audit schema init failed: {}", e);
            return Err(ExitCode::from(2));
        }
    };
    let users = Arc::new(UserStore::new(
        db.clone(),
        config.auth.lockout_threshold,
        config.auth.lockout_secs,
    ));
    let sessions = Arc::new(SessionManager::new(db.clone(), config.auth.clone()));
    let conversations = Arc::new(ConversationStore::new(db.clone()));
    let messages = Arc::new(MessageStore::new(db.clone()));
    let presence = Arc::new(PresenceRegistry::new(
        config.presence.queue_highwater,
        config.presence.typing_ttl_secs,
    ));
    let notifications = match NotificationStore::new(db.clone()) {
        Ok(n) => Arc::new(n),
        Err(e) => {
            error!("notification schema init failed: {}", e);
            return Err(ExitCode::from(2));
        }
    };
    let magic_links = match MagicLinkIssuer::new(db.clone(), config.magic_link.clone()) {
        Ok(m) => Arc::new(m),
        Err(e) => {
            error!("magic-link schema init failed: {}", e);
            return Err(ExitCode::from(2));
        }
    };

    let mut dispatcher = Dispatcher::new(notifications.clone(), audit.clone(), config.notify.clone())
        .with_sender(Arc::new(ws::live::LiveSender::new(presence.clone())));
    if config.notify.channels.webhook {
        dispatcher = dispatcher.with_sender(Arc::new(WebhookSender::new()));
    }
    let dispatcher = Arc::new(dispatcher);

    let pipeline = MessagePipeline::new(
        users.clone(),
        sessions.clone(),
        conversations.clone(),
        messages.clone(),
        presence.clone(),
        dispatcher.clone(),
        audit.clone(),
        config.limits.clone(),
    );

    let shutdown = CancellationToken::new();
    dispatcher.clone().start(shutdown.child_token()).await;

    let state = Arc::new(AppState {
        pending_acks: ws::acks::PendingAcks::new(
            config.presence.replay_window_messages,
            config.presence.replay_window_secs,
        ),
        config,
        users,
        sessions,
        conversations,
        messages,
        presence,
        notifications,
        dispatcher,
        magic_links,
        mailer: Arc::new(LogMailer),
        audit,
        pipeline,
        shutdown: shutdown.clone(),
    });

    spawn_janitor(state.clone(), shutdown.child_token());
    Ok(state)
}

/// Housekeeping loop: idempotency window, spent magic links, audit
/// retention, typing indicators, and the ack replay ledger.
fn spawn_janitor(state: Arc<AppState>, cancel: CancellationToken) {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(Duration::from_secs(60));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tick.tick() => {
                    if let Err(e) = state.messages.sweep_idempotency() {
                        warn!(error = %e, "idempotency sweep failed");
                    }
                    if let Err(e) = state.magic_links.sweep_expired(7 * 24 * 3600) {
                        warn!(error = %e, "magic-link sweep failed");
                    }
                    if let Err(e) = state.audit.sweep_retention(state.config.audit.retention_days) {
                        warn!(error = %e, "audit retention sweep failed");
                    }
                    state.presence.sweep_typing();
                    state.pending_acks.prune();
                }
            }
        }
    });
}
