use std::sync::{Arc, Mutex};

use relay_core::types::{ConversationKind, ConversationRole};
use rusqlite::Connection;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::cache::ConversationCache;
use crate::error::{Result, StoreError};
use crate::types::{Conversation, Membership};

const CONVERSATION_SELECT: &str = "SELECT c.id, c.uuid, c.kind, c.owner, c.name, c.description,
            c.member_cap, d.blocked_by, c.created_at, c.updated_at
     FROM conversations c
     LEFT JOIN dm_conversations d ON d.conversation_id = c.id";

/// Store for conversations, DM pairs, and membership.
///
/// Rooms and DM pairs share one table; the `dm_conversations` side table
/// carries the canonical pair key and the block flag. Message-level
/// operations live in [`MessageStore`](crate::messages::MessageStore).
pub struct ConversationStore {
    db: Arc<Mutex<Connection>>,
    cache: ConversationCache,
}

impl ConversationStore {
    pub fn new(db: Arc<Mutex<Connection>>) -> Self {
        Self {
            db,
            cache: ConversationCache::new(),
        }
    }

    /// Create a room. The owner gets a live membership with the owner role.
    #[instrument(skip(self, description), fields(owner, name))]
    pub fn create_room(
        &self,
        owner: i64,
        kind: ConversationKind,
        name: &str,
        description: Option<&str>,
        member_cap: Option<u32>,
    ) -> Result<Conversation> {
        if !kind.is_room() {
            return Err(StoreError::Validation(
                "use get_or_create_dm for dm-pair conversations".to_string(),
            ));
        }
        if name.trim().is_empty() {
            return Err(StoreError::Validation("room name is required".to_string()));
        }

        let now = chrono::Utc::now().to_rfc3339();
        let uuid = Uuid::now_v7().to_string();
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO conversations (uuid, kind, owner, name, description, member_cap, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
            rusqlite::params![uuid, kind.to_string(), owner, name, description, member_cap, now],
        )?;
        let id = db.last_insert_rowid();
        db.execute(
            "INSERT INTO conversation_members (conversation_id, user_id, role, joined_at)
             VALUES (?1, ?2, 'owner', ?3)",
            rusqlite::params![id, owner, now],
        )?;
        info!(conversation_id = id, owner, "room created");
        self.load(&db, id)
    }

    /// Return the DM pair for two users, creating it on first use.
    ///
    /// The pair is stored in canonical (lower id, higher id) order so the
    /// same conversation is found regardless of who initiates.
    #[instrument(skip(self))]
    pub fn get_or_create_dm(&self, a: i64, b: i64) -> Result<Conversation> {
        if a == b {
            return Err(StoreError::Validation(
                "cannot open a dm-pair with yourself".to_string(),
            ));
        }
        let (lo, hi) = if a < b { (a, b) } else { (b, a) };

        let db = self.db.lock().unwrap();
        let existing: Option<i64> = match db.query_row(
            "SELECT conversation_id FROM dm_conversations WHERE user_lo = ?1 AND user_hi = ?2",
            rusqlite::params![lo, hi],
            |r| r.get(0),
        ) {
            Ok(id) => Some(id),
            Err(rusqlite::Error::QueryReturnedNoRows) => None,
            Err(e) => return Err(e.into()),
        };
        if let Some(id) = existing {
            return self.load(&db, id);
        }

        let now = chrono::Utc::now().to_rfc3339();
        let uuid = Uuid::now_v7().to_string();
        db.execute(
            "INSERT INTO conversations (uuid, kind, created_at, updated_at)
             VALUES (?1, 'dm-pair', ?2, ?2)",
            rusqlite::params![uuid, now],
        )?;
        let id = db.last_insert_rowid();
        db.execute(
            "INSERT INTO dm_conversations (conversation_id, user_lo, user_hi) VALUES (?1, ?2, ?3)",
            rusqlite::params![id, lo, hi],
        )?;
        for user in [lo, hi] {
            db.execute(
                "INSERT INTO conversation_members (conversation_id, user_id, role, joined_at)
                 VALUES (?1, ?2, 'member', ?3)",
                rusqlite::params![id, user, now],
            )?;
        }
        info!(conversation_id = id, lo, hi, "dm pair created");
        self.load(&db, id)
    }

    pub fn get(&self, id: i64) -> Result<Option<Conversation>> {
        if let Some(c) = self.cache.get(id) {
            return Ok(Some(c));
        }
        let db = self.db.lock().unwrap();
        let conv = self.query(&db, id)?;
        if let Some(c) = &conv {
            self.cache.put(c.clone());
        }
        Ok(conv)
    }

    /// Join a public room. Private rooms require `add_member` by staff.
    #[instrument(skip(self))]
    pub fn join(&self, conversation_id: i64, user_id: i64) -> Result<Membership> {
        let conv = self
            .get(conversation_id)?
            .ok_or(StoreError::ConversationNotFound(conversation_id))?;
        if conv.kind != ConversationKind::PublicRoom {
            return Err(StoreError::Forbidden(
                "only public rooms can be joined directly".to_string(),
            ));
        }
        self.insert_member(conversation_id, user_id, ConversationRole::Member, conv.member_cap)
    }

    /// Add a member to a room on behalf of `actor`, who must hold the
    /// owner or moderator role there.
    #[instrument(skip(self))]
    pub fn add_member(
        &self,
        conversation_id: i64,
        actor: i64,
        user_id: i64,
        role: ConversationRole,
    ) -> Result<Membership> {
        let conv = self
            .get(conversation_id)?
            .ok_or(StoreError::ConversationNotFound(conversation_id))?;
        if !conv.kind.is_room() {
            return Err(StoreError::Forbidden(
                "dm-pair membership is fixed".to_string(),
            ));
        }
        match self.member_role(conversation_id, actor)? {
            Some(ConversationRole::Owner) | Some(ConversationRole::Moderator) => {}
            _ => {
                return Err(StoreError::Forbidden(
                    "only owners and moderators can add members".to_string(),
                ))
            }
        }
        self.insert_member(conversation_id, user_id, role, conv.member_cap)
    }

    /// Leave a conversation: stamps left_at on the live membership.
    #[instrument(skip(self))]
    pub fn leave(&self, conversation_id: i64, user_id: i64) -> Result<()> {
        let now = chrono::Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        let n = db.execute(
            "UPDATE conversation_members SET left_at = ?1
             WHERE conversation_id = ?2 AND user_id = ?3 AND left_at IS NULL",
            rusqlite::params![now, conversation_id, user_id],
        )?;
        if n == 0 {
            return Err(StoreError::NotAMember(conversation_id));
        }
        Ok(())
    }

    pub fn is_member(&self, conversation_id: i64, user_id: i64) -> Result<bool> {
        Ok(self.member_role(conversation_id, user_id)?.is_some())
    }

    pub fn member_role(
        &self,
        conversation_id: i64,
        user_id: i64,
    ) -> Result<Option<ConversationRole>> {
        use std::str::FromStr;
        let db = self.db.lock().unwrap();
        match db.query_row(
            "SELECT role FROM conversation_members
             WHERE conversation_id = ?1 AND user_id = ?2 AND left_at IS NULL",
            rusqlite::params![conversation_id, user_id],
            |r| r.get::<_, String>(0),
        ) {
            Ok(role) => Ok(ConversationRole::from_str(&role).ok()),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn members(&self, conversation_id: i64) -> Result<Vec<Membership>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT conversation_id, user_id, role, joined_at, left_at
             FROM conversation_members
             WHERE conversation_id = ?1 AND left_at IS NULL
             ORDER BY joined_at, user_id",
        )?;
        let rows = stmt.query_map([conversation_id], row_to_membership)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    pub fn member_ids(&self, conversation_id: i64) -> Result<Vec<i64>> {
        Ok(self
            .members(conversation_id)?
            .into_iter()
            .map(|m| m.user_id)
            .collect())
    }

    /// All conversations a user currently belongs to.
    pub fn conversations_for(&self, user_id: i64) -> Result<Vec<i64>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT conversation_id FROM conversation_members
             WHERE user_id = ?1 AND left_at IS NULL",
        )?;
        let rows = stmt.query_map([user_id], |r| r.get(0))?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Block a DM pair. History is preserved; fan-out and notifications to
    /// the blocker stop until unblock. First blocker wins the slot.
    #[instrument(skip(self))]
    pub fn block_dm(&self, conversation_id: i64, blocker: i64) -> Result<()> {
        self.require_dm_member(conversation_id, blocker)?;
        let db = self.db.lock().unwrap();
        db.execute(
            "UPDATE dm_conversations SET blocked_by = ?1
             WHERE conversation_id = ?2 AND blocked_by IS NULL",
            rusqlite::params![blocker, conversation_id],
        )?;
        self.cache.invalidate(conversation_id);
        info!(conversation_id, blocker, "dm blocked");
        Ok(())
    }

    /// Unblock: only the user who blocked can clear the flag.
    #[instrument(skip(self))]
    pub fn unblock_dm(&self, conversation_id: i64, user_id: i64) -> Result<()> {
        self.require_dm_member(conversation_id, user_id)?;
        let db = self.db.lock().unwrap();
        let n = db.execute(
            "UPDATE dm_conversations SET blocked_by = NULL
             WHERE conversation_id = ?1 AND blocked_by = ?2",
            rusqlite::params![conversation_id, user_id],
        )?;
        if n == 0 {
            return Err(StoreError::Forbidden(
                "only the blocking user can unblock".to_string(),
            ));
        }
        self.cache.invalidate(conversation_id);
        info!(conversation_id, user_id, "dm unblocked");
        Ok(())
    }

    /// Who blocked this DM pair, if anyone.
    pub fn blocked_by(&self, conversation_id: i64) -> Result<Option<i64>> {
        Ok(self.get(conversation_id)?.and_then(|c| c.blocked_by))
    }

    fn require_dm_member(&self, conversation_id: i64, user_id: i64) -> Result<()> {
        let conv = self
            .get(conversation_id)?
            .ok_or(StoreError::ConversationNotFound(conversation_id))?;
        if conv.kind != ConversationKind::DmPair {
            return Err(StoreError::Forbidden(
                "blocking applies to dm-pair conversations only".to_string(),
            ));
        }
        if !self.is_member(conversation_id, user_id)? {
            return Err(StoreError::NotAMember(conversation_id));
        }
        Ok(())
    }

    fn insert_member(
        &self,
        conversation_id: i64,
        user_id: i64,
        role: ConversationRole,
        member_cap: Option<u32>,
    ) -> Result<Membership> {
        let now = chrono::Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();

        let existing: i64 = db.query_row(
            "SELECT COUNT(*) FROM conversation_members
             WHERE conversation_id = ?1 AND user_id = ?2 AND left_at IS NULL",
            rusqlite::params![conversation_id, user_id],
            |r| r.get(0),
        )?;
        if existing > 0 {
            // Joining twice is a no-op; return the live membership.
            return db
                .query_row(
                    "SELECT conversation_id, user_id, role, joined_at, left_at
                     FROM conversation_members
                     WHERE conversation_id = ?1 AND user_id = ?2 AND left_at IS NULL",
                    rusqlite::params![conversation_id, user_id],
                    row_to_membership,
                )
                .map_err(Into::into);
        }

        if let Some(cap) = member_cap {
            let count: u32 = db.query_row(
                "SELECT COUNT(*) FROM conversation_members
                 WHERE conversation_id = ?1 AND left_at IS NULL",
                [conversation_id],
                |r| r.get(0),
            )?;
            if count >= cap {
                return Err(StoreError::MemberCapReached(cap));
            }
        }

        db.execute(
            "INSERT INTO conversation_members (conversation_id, user_id, role, joined_at)
             VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![conversation_id, user_id, role.to_string(), now],
        )?;
        Ok(Membership {
            conversation_id,
            user_id,
            role,
            joined_at: now,
            left_at: None,
        })
    }

    fn load(&self, db: &Connection, id: i64) -> Result<Conversation> {
        self.query(db, id)?
            .ok_or(StoreError::ConversationNotFound(id))
    }

    fn query(&self, db: &Connection, id: i64) -> Result<Option<Conversation>> {
        match db.query_row(
            &format!("{} WHERE c.id = ?1", CONVERSATION_SELECT),
            [id],
            row_to_conversation,
        ) {
            Ok(c) => Ok(Some(c)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

fn row_to_conversation(row: &rusqlite::Row<'_>) -> rusqlite::Result<Conversation> {
    use std::str::FromStr;
    Ok(Conversation {
        id: row.get(0)?,
        uuid: row.get(1)?,
        kind: ConversationKind::from_str(&row.get::<_, String>(2)?)
            .unwrap_or(ConversationKind::PublicRoom),
        owner: row.get(3)?,
        name: row.get(4)?,
        description: row.get(5)?,
        member_cap: row.get(6)?,
        blocked_by: row.get(7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

fn row_to_membership(row: &rusqlite::Row<'_>) -> rusqlite::Result<Membership> {
    use std::str::FromStr;
    Ok(Membership {
        conversation_id: row.get(0)?,
        user_id: row.get(1)?,
        role: ConversationRole::from_str(&row.get::<_, String>(2)?).unwrap_or_default(),
        joined_at: row.get(3)?,
        left_at: row.get(4)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_db;

    fn store() -> ConversationStore {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        ConversationStore::new(Arc::new(Mutex::new(conn)))
    }

    #[test]
    fn create_room_with_owner_membership() {
        let store = store();
        let room = store
            .create_room(1, ConversationKind::PublicRoom, "general", None, None)
            .unwrap();
        assert_eq!(room.kind, ConversationKind::PublicRoom);
        assert_eq!(room.owner, Some(1));
        assert_eq!(
            store.member_role(room.id, 1).unwrap(),
            Some(ConversationRole::Owner)
        );
    }

    #[test]
    fn dm_pair_is_canonical() {
        let store = store();
        let ab = store.get_or_create_dm(7, 3).unwrap();
        let ba = store.get_or_create_dm(3, 7).unwrap();
        assert_eq!(ab.id, ba.id);
        assert_eq!(ab.kind, ConversationKind::DmPair);

        let mut ids = store.member_ids(ab.id).unwrap();
        ids.sort_unstable();
        assert_eq!(ids, vec![3, 7]);
    }

    #[test]
    fn dm_with_self_is_rejected() {
        let store = store();
        assert!(store.get_or_create_dm(5, 5).is_err());
    }

    #[test]
    fn rejoin_after_leave_is_single_live_membership() {
        let store = store();
        let room = store
            .create_room(1, ConversationKind::PublicRoom, "general", None, None)
            .unwrap();
        store.join(room.id, 2).unwrap();
        store.leave(room.id, 2).unwrap();
        assert!(!store.is_member(room.id, 2).unwrap());

        store.join(room.id, 2).unwrap();
        assert!(store.is_member(room.id, 2).unwrap());
        // joining again is a no-op, not a second live row
        store.join(room.id, 2).unwrap();
        assert_eq!(store.members(room.id).unwrap().len(), 2);
    }

    #[test]
    fn member_cap_is_enforced() {
        let store = store();
        let room = store
            .create_room(1, ConversationKind::PublicRoom, "tiny", None, Some(2))
            .unwrap();
        store.join(room.id, 2).unwrap();
        assert!(matches!(
            store.join(room.id, 3),
            Err(StoreError::MemberCapReached(2))
        ));
    }

    #[test]
    fn private_room_requires_staff_to_add() {
        let store = store();
        let room = store
            .create_room(1, ConversationKind::PrivateRoom, "staff", None, None)
            .unwrap();
        assert!(store.join(room.id, 2).is_err());

        store
            .add_member(room.id, 1, 2, ConversationRole::Member)
            .unwrap();
        assert!(store.is_member(room.id, 2).unwrap());
        // plain member cannot add others
        assert!(store.add_member(room.id, 2, 3, ConversationRole::Member).is_err());
    }

    #[test]
    fn block_and_unblock_dm() {
        let store = store();
        let dm = store.get_or_create_dm(1, 2).unwrap();
        store.block_dm(dm.id, 1).unwrap();
        assert_eq!(store.blocked_by(dm.id).unwrap(), Some(1));

        // the other side cannot clear it
        assert!(store.unblock_dm(dm.id, 2).is_err());
        store.unblock_dm(dm.id, 1).unwrap();
        assert_eq!(store.blocked_by(dm.id).unwrap(), None);
    }

    #[test]
    fn blocking_a_room_is_refused() {
        let store = store();
        let room = store
            .create_room(1, ConversationKind::PublicRoom, "general", None, None)
            .unwrap();
        assert!(store.block_dm(room.id, 1).is_err());
    }
}
