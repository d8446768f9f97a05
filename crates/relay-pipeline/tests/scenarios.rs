// End-to-end flows across the store, presence, pipeline, and dispatcher,
// all on one in-memory database.

use std::sync::{Arc, Mutex};

use relay_audit::AuditLog;
use relay_core::config::{AuthConfig, LimitsConfig, NotifyConfig};
use relay_core::types::{ConnId, ConversationKind};
use relay_identity::types::Session;
use relay_identity::{SessionManager, UserStore};
use relay_notify::types::{ChannelKind, Preferences};
use relay_notify::{Dispatcher, NotificationStore};
use relay_pipeline::MessagePipeline;
use relay_presence::PresenceRegistry;
use relay_store::{ConversationStore, MessageStore};
use rusqlite::Connection;

struct Harness {
    users: Arc<UserStore>,
    sessions: Arc<SessionManager>,
    conversations: Arc<ConversationStore>,
    messages: Arc<MessageStore>,
    presence: Arc<PresenceRegistry>,
    notifications: Arc<NotificationStore>,
    pipeline: MessagePipeline,
}

fn harness() -> Harness {
    let conn = Connection::open_in_memory().unwrap();
    relay_identity::db::init_db(&conn).unwrap();
    relay_store::db::init_db(&conn).unwrap();
    let db = Arc::new(Mutex::new(conn));

    let users = Arc::new(UserStore::new(db.clone(), 5, 900));
    let sessions = Arc::new(SessionManager::new(db.clone(), AuthConfig::default()));
    let conversations = Arc::new(ConversationStore::new(db.clone()));
    let messages = Arc::new(MessageStore::new(db.clone()));
    let presence = Arc::new(PresenceRegistry::new(64, 5));
    let notifications = Arc::new(NotificationStore::new(db.clone()).unwrap());
    let audit = AuditLog::new(db.clone()).unwrap();
    let dispatcher = Arc::new(Dispatcher::new(
        notifications.clone(),
        audit.clone(),
        NotifyConfig::default(),
    ));

    let pipeline = MessagePipeline::new(
        users.clone(),
        sessions.clone(),
        conversations.clone(),
        messages.clone(),
        presence.clone(),
        dispatcher,
        audit,
        LimitsConfig::default(),
    );

    Harness {
        users,
        sessions,
        conversations,
        messages,
        presence,
        notifications,
        pipeline,
    }
}

impl Harness {
    fn user(&self, handle: &str) -> (i64, Session) {
        let user = self
            .users
            .register(handle, &format!("{}@example.com", handle), "password1")
            .unwrap();
        let (session, _) = self
            .sessions
            .issue(user.id, &user.uuid, None, None)
            .unwrap();
        (user.id, session)
    }
}

fn frame(json: &str) -> serde_json::Value {
    serde_json::from_str(json).unwrap()
}

#[tokio::test]
async fn room_echo_reaches_the_other_member() {
    let h = harness();
    let (alice, alice_session) = h.user("alice");
    let (bob, _) = h.user("bob");

    let room = h
        .conversations
        .create_room(alice, ConversationKind::PublicRoom, "general", None, None)
        .unwrap();
    h.conversations.join(room.id, bob).unwrap();

    let conn = ConnId::new();
    let mut out = h.presence.attach(&conn, bob);
    h.presence.subscribe(&conn, room.id);

    let outcome = h
        .pipeline
        .submit(&alice_session, room.id, "hello", None, None, None)
        .unwrap();
    assert!(outcome.created);
    assert_eq!(outcome.message.thread_reply_count, 0);

    let received = frame(&out.receiver.recv().await.unwrap());
    assert_eq!(received["type"], "message");
    assert_eq!(received["conversation"], room.id);
    assert_eq!(received["author"], alice);
    assert_eq!(received["content"], "hello");

    // exactly one message in the store
    let page = h.messages.page(room.id, None, 10).unwrap();
    assert_eq!(page.messages.len(), 1);
    assert_eq!(page.messages[0].author, alice);
}

#[tokio::test]
async fn threaded_reply_with_mention() {
    let h = harness();
    let (alice, alice_session) = h.user("alice");
    let (bob, bob_session) = h.user("bob");

    let room = h
        .conversations
        .create_room(alice, ConversationKind::PublicRoom, "general", None, None)
        .unwrap();
    h.conversations.join(room.id, bob).unwrap();

    let conn = ConnId::new();
    let mut alice_out = h.presence.attach(&conn, alice);
    h.presence.subscribe(&conn, room.id);

    let parent = h
        .pipeline
        .submit(&alice_session, room.id, "@bob status?", None, None, None)
        .unwrap()
        .message;
    // the mention row links the parent message to bob
    assert_eq!(h.messages.mentions(parent.id).unwrap(), vec![bob]);

    // alice's own echo
    let first = frame(&alice_out.receiver.recv().await.unwrap());
    assert_eq!(first["type"], "message");

    let reply = h
        .pipeline
        .submit(&bob_session, room.id, "done", Some(parent.id), None, None)
        .unwrap()
        .message;
    assert_eq!(reply.parent_id, Some(parent.id));
    assert_eq!(h.messages.get(parent.id).unwrap().unwrap().thread_reply_count, 1);

    // bob's reply arrives on alice's socket
    let received = frame(&alice_out.receiver.recv().await.unwrap());
    assert_eq!(received["type"], "message");
    assert_eq!(received["author"], bob);
    assert_eq!(received["parent"], parent.id);
}

#[tokio::test]
async fn reaction_is_idempotent_under_repeat() {
    let h = harness();
    let (alice, alice_session) = h.user("alice");
    let (carol, carol_session) = h.user("carol");

    let room = h
        .conversations
        .create_room(alice, ConversationKind::PublicRoom, "general", None, None)
        .unwrap();
    h.conversations.join(room.id, carol).unwrap();
    let message = h
        .pipeline
        .submit(&alice_session, room.id, "react to me", None, None, None)
        .unwrap()
        .message;

    // both calls succeed; the second reports no change
    assert!(h.pipeline.react(&carol_session, message.id, "👍", true).unwrap());
    assert!(!h.pipeline.react(&carol_session, message.id, "👍", true).unwrap());

    assert_eq!(
        h.messages.reaction_counts(message.id).unwrap(),
        vec![("👍".to_string(), 1)]
    );
}

#[tokio::test]
async fn dm_blocking_withholds_fanout_and_notifications() {
    let h = harness();
    let (a, a_session) = h.user("ann");
    let (b, b_session) = h.user("ben");

    let dm = h.conversations.get_or_create_dm(a, b).unwrap();

    let conn = ConnId::new();
    let mut a_out = h.presence.attach(&conn, a);
    h.presence.subscribe(&conn, dm.id);

    // sanity: before the block, B's messages reach A
    h.pipeline
        .submit(&b_session, dm.id, "hi", None, None, None)
        .unwrap();
    assert_eq!(frame(&a_out.receiver.recv().await.unwrap())["content"], "hi");

    h.conversations.block_dm(dm.id, a).unwrap();
    let blocked_msg = h
        .pipeline
        .submit(&b_session, dm.id, "are you there?", None, None, None)
        .unwrap()
        .message;

    // persisted for history on both sides
    let page = h.messages.page(dm.id, None, 10).unwrap();
    assert!(page.messages.iter().any(|m| m.id == blocked_msg.id));
    // but A's socket stays silent and A gets no notification record
    assert!(a_out.receiver.try_recv().is_err());
    assert!(h.notifications.list_for(a, false, 50).unwrap().is_empty());

    // after unblock, delivery resumes
    h.conversations.unblock_dm(dm.id, a).unwrap();
    h.pipeline
        .submit(&b_session, dm.id, "back again", None, None, None)
        .unwrap();
    assert_eq!(
        frame(&a_out.receiver.recv().await.unwrap())["content"],
        "back again"
    );

    // A posting into the blocked-interval history still sees everything
    let visible = h.pipeline.history(&a_session, dm.id, None, 50).unwrap();
    assert_eq!(visible.messages.len(), 3);
}

#[tokio::test]
async fn offline_member_gets_inapp_notification() {
    let h = harness();
    let (alice, alice_session) = h.user("alice");
    let (bob, _) = h.user("bob");

    let room = h
        .conversations
        .create_room(alice, ConversationKind::PublicRoom, "general", None, None)
        .unwrap();
    h.conversations.join(room.id, bob).unwrap();

    // bob is offline: no presence attach
    h.pipeline
        .submit(&alice_session, room.id, "anyone home?", None, None, None)
        .unwrap();

    let inbox = h.notifications.list_for(bob, true, 50).unwrap();
    assert_eq!(inbox.len(), 1);
    assert_eq!(inbox[0].kind, "message.new");
}

#[tokio::test]
async fn mention_outranks_live_suppression() {
    let h = harness();
    let (alice, alice_session) = h.user("alice");
    let (bob, _) = h.user("bob");

    let room = h
        .conversations
        .create_room(alice, ConversationKind::PublicRoom, "general", None, None)
        .unwrap();
    h.conversations.join(room.id, bob).unwrap();

    // bob is watching live, which normally suppresses notifications
    let conn = ConnId::new();
    let _out = h.presence.attach(&conn, bob);
    h.presence.subscribe(&conn, room.id);

    h.pipeline
        .submit(&alice_session, room.id, "@bob wake up", None, None, None)
        .unwrap();

    let inbox = h.notifications.list_for(bob, true, 50).unwrap();
    assert_eq!(inbox.len(), 1);
    assert_eq!(inbox[0].kind, "message.mention");
}

#[tokio::test]
async fn live_user_with_external_channels_is_still_notified() {
    let h = harness();
    let (alice, alice_session) = h.user("alice");
    let (bob, _) = h.user("bob");

    let room = h
        .conversations
        .create_room(alice, ConversationKind::PublicRoom, "general", None, None)
        .unwrap();
    h.conversations.join(room.id, bob).unwrap();

    // bob watches live, but keeps email delivery on even while connected
    let conn = ConnId::new();
    let _out = h.presence.attach(&conn, bob);
    h.presence.subscribe(&conn, room.id);
    let mut prefs = Preferences::defaults(bob);
    prefs.enabled_channels.push(ChannelKind::Email);
    h.notifications.set_preferences(&prefs).unwrap();

    h.pipeline
        .submit(&alice_session, room.id, "fyi", None, None, None)
        .unwrap();

    // being live no longer suppresses the request; the record is stored
    let inbox = h.notifications.list_for(bob, true, 50).unwrap();
    assert_eq!(inbox.len(), 1);
    assert_eq!(inbox[0].kind, "message.new");
}

#[tokio::test]
async fn non_member_submit_is_forbidden() {
    let h = harness();
    let (alice, _) = h.user("alice");
    let (_, mallory_session) = h.user("mallory");

    let room = h
        .conversations
        .create_room(alice, ConversationKind::PrivateRoom, "staff", None, None)
        .unwrap();

    let err = h
        .pipeline
        .submit(&mallory_session, room.id, "let me in", None, None, None)
        .unwrap_err();
    assert_eq!(err.kind(), relay_core::error::ErrorKind::Forbidden);
}

#[tokio::test]
async fn submit_idempotency_persists_once() {
    let h = harness();
    let (alice, alice_session) = h.user("alice");
    let room = h
        .conversations
        .create_room(alice, ConversationKind::PublicRoom, "general", None, None)
        .unwrap();

    let first = h
        .pipeline
        .submit(&alice_session, room.id, "once", None, None, Some("retry-key"))
        .unwrap();
    let second = h
        .pipeline
        .submit(&alice_session, room.id, "once", None, None, Some("retry-key"))
        .unwrap();

    assert!(first.created);
    assert!(!second.created);
    assert_eq!(first.message.id, second.message.id);
    assert_eq!(h.messages.page(room.id, None, 10).unwrap().messages.len(), 1);
}
