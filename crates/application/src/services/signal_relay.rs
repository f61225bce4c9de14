use std::sync::Arc;

use domain::{MessageId, UserId};

use crate::{
    error::ApplicationError,
    frame::{MessageReadPayload, ServerFrame, TypingPayload},
    registry::{ConnectionRegistry, DeliveryReport},
    repository::MessageRepository,
    services::session::SessionIdentity,
};

/// 已读回执与输入状态中继
pub struct SignalRelay {
    registry: Arc<ConnectionRegistry>,
    message_repository: Arc<dyn MessageRepository>,
}

impl SignalRelay {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        message_repository: Arc<dyn MessageRepository>,
    ) -> Self {
        Self {
            registry,
            message_repository,
        }
    }

    /// 接收方标记已读。没有行被更新时静默返回 `None`，否则通知原发送方的全部连接
    pub async fn mark_read(
        &self,
        receiver_id: UserId,
        sender_id: UserId,
        message_id: MessageId,
    ) -> Result<Option<DeliveryReport>, ApplicationError> {
        let affected = self
            .message_repository
            .mark_message_read(message_id, sender_id, receiver_id)
            .await?;
        if affected == 0 {
            tracing::debug!(message_id = %message_id, receiver_id = %receiver_id, "mark_read matched no unread message");
            return Ok(None);
        }

        let frame = ServerFrame::MessageRead(MessageReadPayload {
            message_id,
            sender_id,
            receiver_id,
        })
        .encode()?;
        Ok(Some(self.registry.send_to_user(sender_id, &frame).await))
    }

    pub async fn typing(
        &self,
        sender: &SessionIdentity,
        receiver_id: UserId,
    ) -> Result<DeliveryReport, ApplicationError> {
        let frame = ServerFrame::Typing(Self::typing_payload(sender)).encode()?;
        Ok(self.registry.send_to_user(receiver_id, &frame).await)
    }

    pub async fn stop_typing(
        &self,
        sender: &SessionIdentity,
        receiver_id: UserId,
    ) -> Result<DeliveryReport, ApplicationError> {
        let frame = ServerFrame::StopTyping(Self::typing_payload(sender)).encode()?;
        Ok(self.registry.send_to_user(receiver_id, &frame).await)
    }

    fn typing_payload(sender: &SessionIdentity) -> TypingPayload {
        TypingPayload {
            sender_id: sender.user_id,
            sender_name: sender.nickname.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use crate::registry::Connection;
    use chrono::Utc;
    use domain::{MessageContent, PrivateMessage};

    async fn setup() -> (Arc<MemoryStore>, Arc<ConnectionRegistry>, SignalRelay) {
        let store = Arc::new(MemoryStore::new());
        let registry = Arc::new(ConnectionRegistry::new());
        let relay = SignalRelay::new(registry.clone(), store.clone());
        (store, registry, relay)
    }

    #[tokio::test]
    async fn read_receipt_goes_to_sender_connections_only() {
        let (store, registry, relay) = setup().await;
        let alice = store.insert_user("alice", None).await;
        let bob = store.insert_user("bob", None).await;
        let message = PrivateMessage::new(
            MessageId::generate(),
            alice,
            bob,
            MessageContent::from_stored("hi"),
            Utc::now(),
        );
        let message_id = message.id;
        store.insert_message(message).await.unwrap();
        let (a1, mut a1_rx) = Connection::new(alice, Utc::now());
        let (b1, mut b1_rx) = Connection::new(bob, Utc::now());
        registry.add(a1).await;
        registry.add(b1).await;

        let report = relay.mark_read(bob, alice, message_id).await.unwrap();

        assert_eq!(report.map(|r| r.delivered), Some(1));
        let frame: ServerFrame = serde_json::from_str(&a1_rx.try_recv().unwrap()).unwrap();
        assert_eq!(
            frame,
            ServerFrame::MessageRead(MessageReadPayload {
                message_id,
                sender_id: alice,
                receiver_id: bob,
            })
        );
        assert!(b1_rx.try_recv().is_err());
        assert!(store.messages().await[0].is_read);
    }

    #[tokio::test]
    async fn read_receipt_for_wrong_pair_is_silent() {
        let (store, registry, relay) = setup().await;
        let alice = store.insert_user("alice", None).await;
        let bob = store.insert_user("bob", None).await;
        let message = PrivateMessage::new(
            MessageId::generate(),
            alice,
            bob,
            MessageContent::from_stored("hi"),
            Utc::now(),
        );
        let message_id = message.id;
        store.insert_message(message).await.unwrap();
        let (a1, mut a1_rx) = Connection::new(alice, Utc::now());
        registry.add(a1).await;

        // alice 不能替 bob 标记已读
        assert!(relay.mark_read(alice, bob, message_id).await.unwrap().is_none());
        assert!(relay
            .mark_read(bob, alice, MessageId::generate())
            .await
            .unwrap()
            .is_none());
        assert!(a1_rx.try_recv().is_err());
        assert!(!store.messages().await[0].is_read);
    }

    #[tokio::test]
    async fn typing_reaches_every_receiver_tab_but_not_the_sender() {
        let (store, registry, relay) = setup().await;
        let alice = store.insert_user("alice", None).await;
        let bob = store.insert_user("bob", None).await;
        let (a1, mut a1_rx) = Connection::new(alice, Utc::now());
        let (b1, mut b1_rx) = Connection::new(bob, Utc::now());
        let (b2, mut b2_rx) = Connection::new(bob, Utc::now());
        registry.add(a1).await;
        registry.add(b1).await;
        registry.add(b2).await;
        let sender = SessionIdentity {
            user_id: alice,
            nickname: "alice".into(),
        };

        assert_eq!(relay.typing(&sender, bob).await.unwrap().delivered, 2);
        assert_eq!(relay.stop_typing(&sender, bob).await.unwrap().delivered, 2);

        for rx in [&mut b1_rx, &mut b2_rx] {
            let first: ServerFrame = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
            let second: ServerFrame = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
            assert!(matches!(first, ServerFrame::Typing(ref p) if p.sender_name == "alice"));
            assert!(matches!(second, ServerFrame::StopTyping(ref p) if p.sender_id == alice));
        }
        assert!(a1_rx.try_recv().is_err());
    }
}
