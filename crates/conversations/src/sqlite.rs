//! SQLite implementation of the persistence contracts.

use {
    async_trait::async_trait,
    parley_common::{Error, Result, now_ms},
    sqlx::SqlitePool,
    tracing::debug,
};

use crate::{
    model::{Attachment, Contact, Conversation, IdentityTuple, LastMessage, Message},
    store::{ContactStore, ConversationStore, MessageStore},
};

/// Map a sqlx failure onto the shared error type.
fn db_error(context: &'static str) -> impl FnOnce(sqlx::Error) -> Error {
    move |e| {
        let unique = e
            .as_database_error()
            .is_some_and(|db| db.is_unique_violation());
        if unique {
            return Error::conflict(format!("{context}: {e}"));
        }
        if matches!(e, sqlx::Error::PoolTimedOut | sqlx::Error::Io(_)) {
            Error::transient(context, e)
        } else {
            Error::external(context, e)
        }
    }
}

#[derive(sqlx::FromRow)]
struct ContactRow {
    id: String,
    organization_id: String,
    phone_number: String,
    name: Option<String>,
    created_at: i64,
}

impl From<ContactRow> for Contact {
    fn from(r: ContactRow) -> Self {
        Self {
            id: r.id,
            organization_id: r.organization_id,
            phone_number: r.phone_number,
            name: r.name,
            created_at: r.created_at,
        }
    }
}

const CONVERSATION_COLUMNS: &str = "id, organization_id, user_id, contact_id, channel, status, \
     priority, ai_enabled, ai_config, last_message_sender_id, last_message_sender_type, \
     last_message_sender_name, last_message_content, last_message_kind, \
     last_message_media_reference, last_message_at, active, archived, deleted, created_at, \
     updated_at";

#[derive(sqlx::FromRow)]
struct ConversationRow {
    id: String,
    organization_id: String,
    user_id: String,
    contact_id: String,
    channel: String,
    status: String,
    priority: String,
    ai_enabled: bool,
    ai_config: String,
    last_message_sender_id: Option<String>,
    last_message_sender_type: Option<String>,
    last_message_sender_name: Option<String>,
    last_message_content: Option<String>,
    last_message_kind: Option<String>,
    last_message_media_reference: Option<String>,
    last_message_at: Option<i64>,
    active: bool,
    archived: bool,
    deleted: bool,
    created_at: i64,
    updated_at: i64,
}

impl TryFrom<ConversationRow> for Conversation {
    type Error = Error;

    fn try_from(r: ConversationRow) -> Result<Self> {
        let last_message = match (r.last_message_at, r.last_message_sender_type, r.last_message_kind)
        {
            (Some(at), Some(sender_type), Some(kind)) => Some(LastMessage {
                sender_id: r.last_message_sender_id,
                sender_type: sender_type.parse()?,
                sender_name: r.last_message_sender_name,
                content: r.last_message_content.unwrap_or_default(),
                kind: kind.parse()?,
                media_reference: r.last_message_media_reference,
                at,
            }),
            _ => None,
        };
        Ok(Self {
            id: r.id,
            organization_id: r.organization_id,
            user_id: r.user_id,
            contact_id: r.contact_id,
            channel: r.channel.parse()?,
            status: r.status.parse()?,
            priority: r.priority.parse()?,
            ai_enabled: r.ai_enabled,
            ai_config: serde_json::from_str(&r.ai_config)
                .map_err(|e| Error::external("decoding conversation ai_config", e))?,
            last_message,
            active: r.active,
            archived: r.archived,
            deleted: r.deleted,
            created_at: r.created_at,
            updated_at: r.updated_at,
        })
    }
}

const MESSAGE_COLUMNS: &str = "id, organization_id, conversation_id, sender_type, sender_id, \
     direction, kind, content, media_reference, attachments, ai_generated, ai_confidence, status, \
     failure_reason, channel_message_id, created_at, updated_at";

#[derive(sqlx::FromRow)]
struct MessageRow {
    id: String,
    organization_id: String,
    conversation_id: String,
    sender_type: String,
    sender_id: Option<String>,
    direction: String,
    kind: String,
    content: String,
    media_reference: Option<String>,
    attachments: String,
    ai_generated: bool,
    ai_confidence: Option<f64>,
    status: String,
    failure_reason: Option<String>,
    channel_message_id: Option<String>,
    created_at: i64,
    updated_at: i64,
}

impl TryFrom<MessageRow> for Message {
    type Error = Error;

    fn try_from(r: MessageRow) -> Result<Self> {
        Ok(Self {
            id: r.id,
            organization_id: r.organization_id,
            conversation_id: r.conversation_id,
            sender_type: r.sender_type.parse()?,
            sender_id: r.sender_id,
            direction: r.direction.parse()?,
            kind: r.kind.parse()?,
            content: r.content,
            media_reference: r.media_reference,
            attachments: serde_json::from_str(&r.attachments)
                .map_err(|e| Error::external("decoding message attachments", e))?,
            ai_generated: r.ai_generated,
            ai_confidence: r.ai_confidence,
            status: r.status.parse()?,
            failure_reason: r.failure_reason,
            channel_message_id: r.channel_message_id,
            created_at: r.created_at,
            updated_at: r.updated_at,
        })
    }
}

/// SQLite-backed store for contacts, conversations and messages.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl ContactStore for SqliteStore {
    async fn find_by_phone(
        &self,
        organization_id: &str,
        phone_number: &str,
    ) -> Result<Option<Contact>> {
        let row = sqlx::query_as::<_, ContactRow>(
            "SELECT id, organization_id, phone_number, name, created_at FROM contacts \
             WHERE organization_id = ? AND phone_number = ?",
        )
        .bind(organization_id)
        .bind(phone_number)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("looking up contact by phone"))?;
        Ok(row.map(Into::into))
    }

    async fn find_contact(&self, id: &str) -> Result<Option<Contact>> {
        let row = sqlx::query_as::<_, ContactRow>(
            "SELECT id, organization_id, phone_number, name, created_at FROM contacts WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("looking up contact"))?;
        Ok(row.map(Into::into))
    }

    async fn create_contact(&self, contact: &Contact) -> Result<()> {
        sqlx::query(
            "INSERT INTO contacts (id, organization_id, phone_number, name, created_at) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&contact.id)
        .bind(&contact.organization_id)
        .bind(&contact.phone_number)
        .bind(&contact.name)
        .bind(contact.created_at)
        .execute(&self.pool)
        .await
        .map_err(db_error("creating contact"))?;
        debug!(contact_id = %contact.id, organization_id = %contact.organization_id, "contact created");
        Ok(())
    }

    async fn list_contacts(&self, organization_id: &str) -> Result<Vec<Contact>> {
        let rows = sqlx::query_as::<_, ContactRow>(
            "SELECT id, organization_id, phone_number, name, created_at FROM contacts \
             WHERE organization_id = ? ORDER BY created_at",
        )
        .bind(organization_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("listing contacts"))?;
        Ok(rows.into_iter().map(Into::into).collect())
    }
}

#[async_trait]
impl ConversationStore for SqliteStore {
    async fn find_conversation(&self, id: &str) -> Result<Option<Conversation>> {
        let sql = format!("SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id = ?");
        sqlx::query_as::<_, ConversationRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error("looking up conversation"))?
            .map(Conversation::try_from)
            .transpose()
    }

    async fn find_active(&self, tuple: &IdentityTuple) -> Result<Option<Conversation>> {
        let sql = format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations \
             WHERE organization_id = ? AND user_id = ? AND contact_id = ? AND channel = ? \
             AND active = 1 ORDER BY created_at DESC LIMIT 1"
        );
        sqlx::query_as::<_, ConversationRow>(&sql)
            .bind(&tuple.organization_id)
            .bind(&tuple.user_id)
            .bind(&tuple.contact_id)
            .bind(tuple.channel.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error("looking up active conversation"))?
            .map(Conversation::try_from)
            .transpose()
    }

    async fn create_conversation(&self, c: &Conversation) -> Result<()> {
        let snapshot = c.last_message.as_ref();
        let sql = format!(
            "INSERT INTO conversations ({CONVERSATION_COLUMNS}) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        );
        sqlx::query(&sql)
            .bind(&c.id)
            .bind(&c.organization_id)
            .bind(&c.user_id)
            .bind(&c.contact_id)
            .bind(c.channel.as_str())
            .bind(c.status.as_str())
            .bind(c.priority.as_str())
            .bind(c.ai_enabled)
            .bind(c.ai_config.to_string())
            .bind(snapshot.and_then(|s| s.sender_id.clone()))
            .bind(snapshot.map(|s| s.sender_type.as_str()))
            .bind(snapshot.and_then(|s| s.sender_name.clone()))
            .bind(snapshot.map(|s| s.content.clone()))
            .bind(snapshot.map(|s| s.kind.as_str()))
            .bind(snapshot.and_then(|s| s.media_reference.clone()))
            .bind(snapshot.map(|s| s.at))
            .bind(c.active)
            .bind(c.archived)
            .bind(c.deleted)
            .bind(c.created_at)
            .bind(c.updated_at)
            .execute(&self.pool)
            .await
            .map_err(db_error("creating conversation"))?;
        Ok(())
    }

    async fn deactivate_siblings(&self, tuple: &IdentityTuple, except_id: &str) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE conversations SET active = 0, updated_at = ? \
             WHERE organization_id = ? AND user_id = ? AND contact_id = ? AND channel = ? \
             AND id != ? AND active = 1",
        )
        .bind(now_ms())
        .bind(&tuple.organization_id)
        .bind(&tuple.user_id)
        .bind(&tuple.contact_id)
        .bind(tuple.channel.as_str())
        .bind(except_id)
        .execute(&self.pool)
        .await
        .map_err(db_error("deactivating sibling conversations"))?;
        Ok(result.rows_affected())
    }

    async fn update_last_message(
        &self,
        conversation_id: &str,
        snapshot: &LastMessage,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE conversations SET last_message_sender_id = ?, last_message_sender_type = ?, \
             last_message_sender_name = ?, last_message_content = ?, last_message_kind = ?, \
             last_message_media_reference = ?, last_message_at = ?, updated_at = ? WHERE id = ?",
        )
        .bind(&snapshot.sender_id)
        .bind(snapshot.sender_type.as_str())
        .bind(&snapshot.sender_name)
        .bind(&snapshot.content)
        .bind(snapshot.kind.as_str())
        .bind(&snapshot.media_reference)
        .bind(snapshot.at)
        .bind(now_ms())
        .bind(conversation_id)
        .execute(&self.pool)
        .await
        .map_err(db_error("updating last message snapshot"))?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found("conversation", conversation_id));
        }
        Ok(())
    }

    async fn list_by_identity(&self, tuple: &IdentityTuple) -> Result<Vec<Conversation>> {
        let sql = format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations \
             WHERE organization_id = ? AND user_id = ? AND contact_id = ? AND channel = ? \
             ORDER BY created_at"
        );
        sqlx::query_as::<_, ConversationRow>(&sql)
            .bind(&tuple.organization_id)
            .bind(&tuple.user_id)
            .bind(&tuple.contact_id)
            .bind(tuple.channel.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(db_error("listing conversations by identity"))?
            .into_iter()
            .map(Conversation::try_from)
            .collect()
    }

    async fn list_conversations(&self, organization_id: &str) -> Result<Vec<Conversation>> {
        let sql = format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE organization_id = ? \
             ORDER BY created_at"
        );
        sqlx::query_as::<_, ConversationRow>(&sql)
            .bind(organization_id)
            .fetch_all(&self.pool)
            .await
            .map_err(db_error("listing conversations"))?
            .into_iter()
            .map(Conversation::try_from)
            .collect()
    }
}

#[async_trait]
impl MessageStore for SqliteStore {
    async fn create_message(&self, m: &Message) -> Result<()> {
        let attachments = serde_json::to_string(&m.attachments)
            .map_err(|e| Error::external("encoding message attachments", e))?;
        let sql = format!(
            "INSERT INTO messages ({MESSAGE_COLUMNS}) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        );
        sqlx::query(&sql)
            .bind(&m.id)
            .bind(&m.organization_id)
            .bind(&m.conversation_id)
            .bind(m.sender_type.as_str())
            .bind(&m.sender_id)
            .bind(m.direction.as_str())
            .bind(m.kind.as_str())
            .bind(&m.content)
            .bind(&m.media_reference)
            .bind(attachments)
            .bind(m.ai_generated)
            .bind(m.ai_confidence)
            .bind(m.status.as_str())
            .bind(&m.failure_reason)
            .bind(&m.channel_message_id)
            .bind(m.created_at)
            .bind(m.updated_at)
            .execute(&self.pool)
            .await
            .map_err(db_error("creating message"))?;
        Ok(())
    }

    async fn find_message(&self, id: &str) -> Result<Option<Message>> {
        let sql = format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?");
        sqlx::query_as::<_, MessageRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error("looking up message"))?
            .map(Message::try_from)
            .transpose()
    }

    async fn attach_media(
        &self,
        message_id: &str,
        media_url: &str,
        attachment: &Attachment,
    ) -> Result<Message> {
        let attachment = serde_json::to_string(attachment)
            .map_err(|e| Error::external("encoding attachment", e))?;
        // json_insert at `$[#]` appends in a single statement.
        let result = sqlx::query(
            "UPDATE messages SET media_reference = ?, \
             attachments = json_insert(attachments, '$[#]', json(?)), updated_at = ? \
             WHERE id = ?",
        )
        .bind(media_url)
        .bind(attachment)
        .bind(now_ms())
        .bind(message_id)
        .execute(&self.pool)
        .await
        .map_err(db_error("attaching media to message"))?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found("message", message_id));
        }
        self.find_message(message_id)
            .await?
            .ok_or_else(|| Error::not_found("message", message_id))
    }

    async fn list_messages(&self, conversation_id: &str) -> Result<Vec<Message>> {
        let sql = format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE conversation_id = ? \
             ORDER BY created_at, rowid"
        );
        sqlx::query_as::<_, MessageRow>(&sql)
            .bind(conversation_id)
            .fetch_all(&self.pool)
            .await
            .map_err(db_error("listing messages"))?
            .into_iter()
            .map(Message::try_from)
            .collect()
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use parley_common::{ChannelType, MessageKind};

    use {
        super::*,
        crate::model::{AttachmentKind, DeliveryStatus, Direction, SenderType},
    };

    async fn store() -> SqliteStore {
        let pool = crate::connect("sqlite::memory:", 1).await.unwrap();
        crate::run_migrations(&pool).await.unwrap();
        SqliteStore::new(pool)
    }

    fn tuple() -> IdentityTuple {
        IdentityTuple::new("org-1", "bot-1", "contact-1", ChannelType::Whatsapp)
    }

    fn message(conversation: &Conversation) -> Message {
        let now = now_ms();
        Message {
            id: crate::model::new_id(),
            organization_id: conversation.organization_id.clone(),
            conversation_id: conversation.id.clone(),
            sender_type: SenderType::Customer,
            sender_id: Some(conversation.contact_id.clone()),
            direction: Direction::Inbound,
            kind: MessageKind::Image,
            content: "receipt".into(),
            media_reference: Some("media-1".into()),
            attachments: Vec::new(),
            ai_generated: false,
            ai_confidence: None,
            status: DeliveryStatus::Pending,
            failure_reason: None,
            channel_message_id: Some("wamid.1".into()),
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn duplicate_phone_is_a_conflict() {
        let store = store().await;
        store
            .create_contact(&Contact::new("org-1", "15550001", None))
            .await
            .unwrap();
        let err = store
            .create_contact(&Contact::new("org-1", "15550001", None))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 409);

        // Same phone in another organization is a different contact.
        store
            .create_contact(&Contact::new("org-2", "15550001", None))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn find_or_create_contact_is_idempotent() {
        let store = store().await;
        let first = store
            .find_or_create_contact("org-1", "15550001", Some("Ada"))
            .await
            .unwrap();
        let second = store
            .find_or_create_contact("org-1", " 15550001 ", None)
            .await
            .unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(second.name.as_deref(), Some("Ada"));
        assert_eq!(store.list_contacts("org-1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn empty_phone_is_rejected() {
        let store = store().await;
        let err = store
            .find_or_create_contact("org-1", "  ", None)
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 400);
        assert!(store.list_contacts("org-1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn second_active_row_for_tuple_is_rejected() {
        let store = store().await;
        store
            .create_conversation(&Conversation::open(&tuple()))
            .await
            .unwrap();
        let err = store
            .create_conversation(&Conversation::open(&tuple()))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict { .. }));

        let mut inactive = Conversation::open(&tuple());
        inactive.active = false;
        store.create_conversation(&inactive).await.unwrap();
        assert_eq!(store.list_by_identity(&tuple()).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn snapshot_round_trips_through_columns() {
        let store = store().await;
        let conversation = Conversation::open(&tuple());
        store.create_conversation(&conversation).await.unwrap();

        let snapshot = LastMessage {
            sender_id: Some("contact-1".into()),
            sender_type: SenderType::Customer,
            sender_name: Some("Ada".into()),
            content: "hello".into(),
            kind: MessageKind::Text,
            media_reference: None,
            at: 1_700_000_000_000,
        };
        store
            .update_last_message(&conversation.id, &snapshot)
            .await
            .unwrap();

        let loaded = store
            .find_conversation(&conversation.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.last_message, Some(snapshot));
        assert!(loaded.active);
    }

    #[tokio::test]
    async fn snapshot_on_unknown_conversation_is_not_found() {
        let store = store().await;
        let snapshot = LastMessage {
            sender_id: None,
            sender_type: SenderType::System,
            sender_name: None,
            content: String::new(),
            kind: MessageKind::Text,
            media_reference: None,
            at: 0,
        };
        let err = store
            .update_last_message("missing", &snapshot)
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 404);
    }

    #[tokio::test]
    async fn attachments_only_grow() {
        let store = store().await;
        let conversation = Conversation::open(&tuple());
        store.create_conversation(&conversation).await.unwrap();
        let msg = message(&conversation);
        store.create_message(&msg).await.unwrap();

        let first = Attachment::new(AttachmentKind::Image, "http://b/1.jpg", "1.jpg", 10, "image/jpeg");
        let second = Attachment::new(AttachmentKind::Image, "http://b/2.jpg", "2.jpg", 20, "image/jpeg");

        let after_first = store
            .attach_media(&msg.id, &first.url, &first)
            .await
            .unwrap();
        assert_eq!(after_first.attachments, vec![first.clone()]);

        let after_second = store
            .attach_media(&msg.id, &second.url, &second)
            .await
            .unwrap();
        assert_eq!(after_second.attachments, vec![first, second.clone()]);
        assert_eq!(after_second.media_reference.as_deref(), Some(second.url.as_str()));
        assert_eq!(after_second.content, msg.content);
    }

    #[tokio::test]
    async fn attach_to_unknown_message_is_not_found() {
        let store = store().await;
        let attachment =
            Attachment::new(AttachmentKind::Audio, "http://b/a.ogg", "a.ogg", 1, "audio/ogg");
        let err = store
            .attach_media("nope", &attachment.url, &attachment)
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 404);
    }
}
