//! Finds or opens the single active conversation for an identity tuple.
//!
//! Creation and sibling demotion are two separate writes. The store's
//! uniqueness guard turns a lost race into [`Error::Conflict`], which is
//! answered by re-reading the winning row.

use std::sync::Arc;

use {
    parley_common::{Error, Result},
    tracing::{debug, info, warn},
};

use crate::{
    model::{Conversation, IdentityTuple, LastMessage},
    store::ConversationStore,
};

/// Outcome of an operation whose failure never fails its caller.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub enum BestEffort {
    Applied,
    /// The write did not happen; the reason was logged.
    Skipped(String),
}

impl BestEffort {
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied)
    }
}

pub struct ConversationResolver {
    store: Arc<dyn ConversationStore>,
}

impl ConversationResolver {
    pub fn new(store: Arc<dyn ConversationStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn ConversationStore> {
        &self.store
    }

    /// Return the active conversation for `tuple`, opening one if none exists.
    pub async fn resolve(&self, tuple: &IdentityTuple) -> Result<Conversation> {
        if let Some(existing) = self.store.find_active(tuple).await? {
            return Ok(existing);
        }

        let conversation = Conversation::open(tuple);
        match self.store.create_conversation(&conversation).await {
            Ok(()) => {},
            Err(Error::Conflict { message }) => {
                debug!(
                    organization_id = %tuple.organization_id,
                    contact_id = %tuple.contact_id,
                    %message,
                    "active conversation created concurrently, re-reading"
                );
                return self
                    .store
                    .find_active(tuple)
                    .await?
                    .ok_or_else(|| Error::conflict("active conversation vanished during resolve"));
            },
            Err(e) => return Err(e),
        }
        info!(
            conversation_id = %conversation.id,
            organization_id = %tuple.organization_id,
            user_id = %tuple.user_id,
            contact_id = %tuple.contact_id,
            channel = %tuple.channel,
            "opened conversation"
        );

        let _ = self.deactivate_siblings(tuple, &conversation.id).await;
        Ok(conversation)
    }

    /// Demote every other conversation of `tuple`. Failures are logged.
    pub async fn deactivate_siblings(&self, tuple: &IdentityTuple, except_id: &str) -> BestEffort {
        match self.store.deactivate_siblings(tuple, except_id).await {
            Ok(0) => BestEffort::Applied,
            Ok(demoted) => {
                debug!(conversation_id = except_id, demoted, "deactivated sibling conversations");
                BestEffort::Applied
            },
            Err(e) => {
                warn!(conversation_id = except_id, error = %e, "failed to deactivate sibling conversations");
                BestEffort::Skipped(e.to_string())
            },
        }
    }

    /// Overwrite the conversation's last-message snapshot. Failures are logged.
    pub async fn record_last_message(
        &self,
        conversation_id: &str,
        snapshot: &LastMessage,
    ) -> BestEffort {
        match self.store.update_last_message(conversation_id, snapshot).await {
            Ok(()) => BestEffort::Applied,
            Err(e) => {
                warn!(conversation_id, error = %e, "failed to record last message");
                BestEffort::Skipped(e.to_string())
            },
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use {async_trait::async_trait, parley_common::ChannelType};

    use {
        super::*,
        crate::{
            model::SenderType,
            sqlite::SqliteStore,
        },
    };

    async fn sqlite() -> SqliteStore {
        let pool = crate::connect("sqlite::memory:", 1).await.unwrap();
        crate::run_migrations(&pool).await.unwrap();
        SqliteStore::new(pool)
    }

    fn tuple() -> IdentityTuple {
        IdentityTuple::new("org-1", "bot-1", "contact-1", ChannelType::Whatsapp)
    }

    async fn active_count(store: &SqliteStore, tuple: &IdentityTuple) -> usize {
        store
            .list_by_identity(tuple)
            .await
            .unwrap()
            .iter()
            .filter(|c| c.active)
            .count()
    }

    #[tokio::test]
    async fn sequential_resolves_keep_exactly_one_active() {
        let store = sqlite().await;
        let resolver = ConversationResolver::new(Arc::new(store.clone()));

        let first = resolver.resolve(&tuple()).await.unwrap();
        for _ in 0..5 {
            let again = resolver.resolve(&tuple()).await.unwrap();
            assert_eq!(again.id, first.id);
        }
        assert_eq!(active_count(&store, &tuple()).await, 1);
    }

    #[tokio::test]
    async fn other_tuples_get_their_own_conversation() {
        let store = sqlite().await;
        let resolver = ConversationResolver::new(Arc::new(store.clone()));
        let other = IdentityTuple::new("org-1", "agent-7", "contact-1", ChannelType::Whatsapp);

        let a = resolver.resolve(&tuple()).await.unwrap();
        let b = resolver.resolve(&other).await.unwrap();
        assert_ne!(a.id, b.id);
        assert_eq!(active_count(&store, &tuple()).await, 1);
        assert_eq!(active_count(&store, &other).await, 1);
    }

    #[tokio::test]
    async fn new_conversation_after_closing_demotes_nothing_twice() {
        let store = sqlite().await;
        let resolver = ConversationResolver::new(Arc::new(store.clone()));
        let first = resolver.resolve(&tuple()).await.unwrap();

        // Manual deactivation, as an agent archiving the thread would do.
        let demoted = store.deactivate_siblings(&tuple(), "none").await.unwrap();
        assert_eq!(demoted, 1);

        let second = resolver.resolve(&tuple()).await.unwrap();
        assert_ne!(second.id, first.id);
        assert_eq!(active_count(&store, &tuple()).await, 1);
        assert_eq!(store.list_by_identity(&tuple()).await.unwrap().len(), 2);
    }

    /// Wraps SQLite. Can miss the active row on its first lookup, as a racing
    /// resolver would, and can refuse sibling demotion.
    struct ScriptedStore {
        inner: SqliteStore,
        missed: AtomicBool,
        refuse_demotion: bool,
        demotions: AtomicUsize,
    }

    impl ScriptedStore {
        fn racing(inner: SqliteStore) -> Self {
            Self {
                inner,
                missed: AtomicBool::new(false),
                refuse_demotion: false,
                demotions: AtomicUsize::new(0),
            }
        }

        fn refusing_demotion(inner: SqliteStore) -> Self {
            Self {
                inner,
                missed: AtomicBool::new(true),
                refuse_demotion: true,
                demotions: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ConversationStore for ScriptedStore {
        async fn find_conversation(&self, id: &str) -> Result<Option<Conversation>> {
            self.inner.find_conversation(id).await
        }

        async fn find_active(&self, tuple: &IdentityTuple) -> Result<Option<Conversation>> {
            if !self.missed.swap(true, Ordering::SeqCst) {
                return Ok(None);
            }
            self.inner.find_active(tuple).await
        }

        async fn create_conversation(&self, conversation: &Conversation) -> Result<()> {
            self.inner.create_conversation(conversation).await
        }

        async fn deactivate_siblings(&self, tuple: &IdentityTuple, except_id: &str) -> Result<u64> {
            self.demotions.fetch_add(1, Ordering::SeqCst);
            if self.refuse_demotion {
                return Err(Error::message("database is locked"));
            }
            self.inner.deactivate_siblings(tuple, except_id).await
        }

        async fn update_last_message(&self, id: &str, snapshot: &LastMessage) -> Result<()> {
            self.inner.update_last_message(id, snapshot).await
        }

        async fn list_by_identity(&self, tuple: &IdentityTuple) -> Result<Vec<Conversation>> {
            self.inner.list_by_identity(tuple).await
        }

        async fn list_conversations(&self, organization_id: &str) -> Result<Vec<Conversation>> {
            self.inner.list_conversations(organization_id).await
        }
    }

    #[tokio::test]
    async fn lost_race_returns_the_winning_row() {
        let inner = sqlite().await;
        let winner = Conversation::open(&tuple());
        inner.create_conversation(&winner).await.unwrap();

        let resolver = ConversationResolver::new(Arc::new(ScriptedStore::racing(inner.clone())));
        let resolved = resolver.resolve(&tuple()).await.unwrap();

        assert_eq!(resolved.id, winner.id);
        assert_eq!(active_count(&inner, &tuple()).await, 1);
    }

    #[tokio::test]
    async fn failed_sibling_demotion_does_not_fail_resolve() {
        let inner = sqlite().await;
        let store = Arc::new(ScriptedStore::refusing_demotion(inner.clone()));
        let resolver = ConversationResolver::new(store.clone());

        let conversation = resolver.resolve(&tuple()).await.unwrap();

        assert!(conversation.active);
        assert_eq!(store.demotions.load(Ordering::SeqCst), 1);
        let persisted = inner.find_conversation(&conversation.id).await.unwrap().unwrap();
        assert!(persisted.active);
        assert_eq!(active_count(&inner, &tuple()).await, 1);
    }

    #[tokio::test]
    async fn sibling_demotion_failure_is_reported_as_skipped() {
        let store = sqlite().await;
        sqlx::query(
            "CREATE TRIGGER refuse_demotion BEFORE UPDATE OF active ON conversations \
             BEGIN SELECT RAISE(FAIL, 'demotion refused'); END",
        )
        .execute(store.pool())
        .await
        .unwrap();
        let resolver = ConversationResolver::new(Arc::new(store.clone()));
        resolver.resolve(&tuple()).await.unwrap();

        let outcome = resolver.deactivate_siblings(&tuple(), "other-id").await;
        assert!(matches!(outcome, BestEffort::Skipped(ref reason) if reason.contains("demotion refused")));
    }

    #[tokio::test]
    async fn record_last_message_reports_skips() {
        let store = sqlite().await;
        let resolver = ConversationResolver::new(Arc::new(store.clone()));
        let conversation = resolver.resolve(&tuple()).await.unwrap();
        let snapshot = LastMessage {
            sender_id: Some("contact-1".into()),
            sender_type: SenderType::Customer,
            sender_name: None,
            content: "hi".into(),
            kind: parley_common::MessageKind::Text,
            media_reference: None,
            at: 1,
        };

        assert!(
            resolver
                .record_last_message(&conversation.id, &snapshot)
                .await
                .is_applied()
        );
        assert!(matches!(
            resolver.record_last_message("missing", &snapshot).await,
            BestEffort::Skipped(_)
        ));
    }
}
