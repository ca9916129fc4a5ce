//! Addressed record drop-off under the cluster MESSAGES namespace.
//!
//! This is only the storage boundary of the messaging collaborator:
//! framing, delivery tracking, and retry live elsewhere.

use shoal_model::{Message, PropertyType, is_valid_segment};
use shoal_store::PropertyStore;
use tracing::debug;

use crate::ManagerError;

/// Per-handle message drop-off and pickup.
#[derive(Clone, Debug)]
pub struct ClusterMessagingService<S: PropertyStore> {
    store: S,
    cluster: String,
    instance: String,
}

impl<S: PropertyStore> ClusterMessagingService<S> {
    pub(crate) fn new(store: S, cluster: &str, instance: &str) -> Self {
        Self {
            store,
            cluster: cluster.to_string(),
            instance: instance.to_string(),
        }
    }

    /// The instance this service sends on behalf of.
    #[must_use]
    pub fn instance(&self) -> &str {
        &self.instance
    }

    /// Drops a message off under the addressee's mailbox.
    ///
    /// # Errors
    ///
    /// [`ManagerError::InvalidArgument`] when the envelope is unaddressed
    /// or its id is not a usable path segment.
    pub async fn send(&self, message: Message) -> Result<(), ManagerError> {
        let Some(to) = message.to_instance().map(str::to_string) else {
            return Err(ManagerError::InvalidArgument(
                "message has no addressee".to_string(),
            ));
        };
        let id = message.id().to_string();
        if !is_valid_segment(&to) || !is_valid_segment(&id) {
            return Err(ManagerError::InvalidArgument(format!(
                "bad message address {to:?} or id {id:?}"
            )));
        }
        let path = PropertyType::Messages.path(&self.cluster, &[&to, &id]);
        self.store.create(&path, message.into_record()).await?;
        debug!(cluster = %self.cluster, to, id, "message dropped off");
        Ok(())
    }

    /// The messages waiting in an instance's mailbox.
    pub async fn pending(&self, instance: &str) -> Result<Vec<Message>, ManagerError> {
        let mailbox = PropertyType::Messages.path(&self.cluster, &[instance]);
        let mut messages = Vec::new();
        if !self.store.exists(&mailbox).await? {
            return Ok(messages);
        }
        for id in self.store.get_children(&mailbox).await? {
            let record = self.store.get(&format!("{mailbox}/{id}")).await?;
            messages.push(Message::from_record(record));
        }
        Ok(messages)
    }

    /// Removes a picked-up message from an instance's mailbox.
    pub async fn acknowledge(&self, instance: &str, id: &str) -> Result<(), ManagerError> {
        let path = PropertyType::Messages.path(&self.cluster, &[instance, id]);
        self.store.remove(&path).await?;
        Ok(())
    }
}
