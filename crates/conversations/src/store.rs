//! Persistence contracts consumed by the resolver, normalizer and gateway.

use {
    async_trait::async_trait,
    parley_common::{Error, Result},
};

use crate::model::{Attachment, Contact, Conversation, IdentityTuple, LastMessage, Message};

#[async_trait]
pub trait ContactStore: Send + Sync {
    async fn find_by_phone(&self, organization_id: &str, phone_number: &str)
    -> Result<Option<Contact>>;

    async fn find_contact(&self, id: &str) -> Result<Option<Contact>>;

    /// Insert a contact. A duplicate (organization, phone) pair is [`Error::Conflict`].
    async fn create_contact(&self, contact: &Contact) -> Result<()>;

    async fn list_contacts(&self, organization_id: &str) -> Result<Vec<Contact>>;

    /// Look up a contact by phone, creating it on first sight.
    async fn find_or_create_contact(
        &self,
        organization_id: &str,
        phone_number: &str,
        name: Option<&str>,
    ) -> Result<Contact> {
        let phone_number = phone_number.trim();
        if phone_number.is_empty() {
            return Err(Error::validation("contact phone number is required"));
        }
        if let Some(existing) = self.find_by_phone(organization_id, phone_number).await? {
            return Ok(existing);
        }
        let contact = Contact::new(organization_id, phone_number, name.map(str::to_string));
        match self.create_contact(&contact).await {
            Ok(()) => Ok(contact),
            // Lost a race with a concurrent delivery for the same sender.
            Err(Error::Conflict { .. }) => self
                .find_by_phone(organization_id, phone_number)
                .await?
                .ok_or_else(|| Error::not_found("contact", phone_number)),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn find_conversation(&self, id: &str) -> Result<Option<Conversation>>;

    async fn find_active(&self, tuple: &IdentityTuple) -> Result<Option<Conversation>>;

    /// Insert a conversation. Another active row for the same tuple is
    /// [`Error::Conflict`].
    async fn create_conversation(&self, conversation: &Conversation) -> Result<()>;

    /// Set `active = false` on every conversation of `tuple` except `except_id`.
    /// Returns the number of rows demoted.
    async fn deactivate_siblings(&self, tuple: &IdentityTuple, except_id: &str) -> Result<u64>;

    /// Overwrite the last-message snapshot. Unknown ids are [`Error::NotFound`].
    async fn update_last_message(&self, conversation_id: &str, snapshot: &LastMessage)
    -> Result<()>;

    async fn list_by_identity(&self, tuple: &IdentityTuple) -> Result<Vec<Conversation>>;

    async fn list_conversations(&self, organization_id: &str) -> Result<Vec<Conversation>>;
}

#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn create_message(&self, message: &Message) -> Result<()>;

    async fn find_message(&self, id: &str) -> Result<Option<Message>>;

    /// Point the message at its resolved media URL and append `attachment`.
    /// Existing attachments are kept.
    async fn attach_media(
        &self,
        message_id: &str,
        media_url: &str,
        attachment: &Attachment,
    ) -> Result<Message>;

    /// Messages of a conversation, oldest first.
    async fn list_messages(&self, conversation_id: &str) -> Result<Vec<Message>>;
}
