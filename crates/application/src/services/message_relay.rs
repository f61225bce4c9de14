use std::sync::Arc;

use domain::{ConnectionId, MessageContent, MessageId, PrivateMessage, DEFAULT_MAX_MESSAGE_CHARS};

use crate::{
    clock::Clock,
    error::ApplicationError,
    frame::{PrivateMessagePayload, PrivateMessageRequest, ServerFrame},
    registry::{ConnectionRegistry, DeliveryReport},
    repository::MessageRepository,
    services::session::SessionIdentity,
};

/// 持久化失败时回给发送连接的错误文本
pub const STORE_FAILURE_MESSAGE: &str = "failed to store message";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayPolicy {
    pub max_message_chars: usize,
    /// 持久化失败时是否给发送连接回一个 error 帧，默认静默
    pub report_persistence_errors: bool,
}

impl Default for RelayPolicy {
    fn default() -> Self {
        Self {
            max_message_chars: DEFAULT_MAX_MESSAGE_CHARS,
            report_persistence_errors: false,
        }
    }
}

pub struct MessageRelayDependencies {
    pub registry: Arc<ConnectionRegistry>,
    pub message_repository: Arc<dyn MessageRepository>,
    pub clock: Arc<dyn Clock>,
    pub policy: RelayPolicy,
}

/// 私信中继：校验、持久化，然后投递给收发双方的全部连接
pub struct MessageRelay {
    deps: MessageRelayDependencies,
}

impl MessageRelay {
    pub fn new(deps: MessageRelayDependencies) -> Self {
        Self { deps }
    }

    /// 持久化先于投递。校验失败只通知发起连接；持久化失败不做任何投递。
    pub async fn relay_private_message(
        &self,
        origin: ConnectionId,
        sender: &SessionIdentity,
        request: PrivateMessageRequest,
    ) -> Result<DeliveryReport, ApplicationError> {
        let content = match MessageContent::parse(&request.content, self.deps.policy.max_message_chars)
        {
            Ok(content) => content,
            Err(err) => {
                tracing::debug!(
                    connection_id = %origin,
                    user_id = %sender.user_id,
                    error = %err,
                    "rejected private message"
                );
                self.reply_error(origin, err.to_string()).await;
                return Err(err.into());
            }
        };

        let message = PrivateMessage::new(
            MessageId::generate(),
            sender.user_id,
            request.receiver_id,
            content,
            self.deps.clock.now(),
        );

        if let Err(err) = self
            .deps
            .message_repository
            .insert_message(message.clone())
            .await
        {
            tracing::error!(
                user_id = %sender.user_id,
                receiver_id = %request.receiver_id,
                error = %err,
                "failed to persist private message"
            );
            if self.deps.policy.report_persistence_errors {
                self.reply_error(origin, STORE_FAILURE_MESSAGE).await;
            }
            return Err(err.into());
        }

        let frame = ServerFrame::PrivateMessage(PrivateMessagePayload {
            message_id: message.id,
            client_message_id: request.client_message_id,
            sender_id: message.sender_id,
            sender_name: sender.nickname.clone(),
            receiver_id: message.receiver_id,
            content: message.content.as_str().to_owned(),
            timestamp: message.created_at,
            is_read: message.is_read,
        })
        .encode()?;

        let report = self
            .deps
            .registry
            .send_to_pair(message.sender_id, message.receiver_id, &frame)
            .await;
        tracing::debug!(
            message_id = %message.id,
            delivered = report.delivered,
            evicted = report.evicted.len(),
            "private message relayed"
        );
        Ok(report)
    }

    async fn reply_error(&self, origin: ConnectionId, message: impl Into<String>) {
        match ServerFrame::error(message).encode() {
            Ok(frame) => {
                self.deps.registry.send_to_connection(origin, &frame).await;
            }
            Err(err) => tracing::warn!(error = %err, "failed to encode error frame"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::memory::MemoryStore;
    use crate::registry::Connection;
    use crate::repository::MockMessageRepository;
    use chrono::Utc;
    use domain::{RepositoryError, UserId};
    use uuid::Uuid;

    fn identity(user_id: UserId, nickname: &str) -> SessionIdentity {
        SessionIdentity {
            user_id,
            nickname: nickname.into(),
        }
    }

    fn request(receiver: UserId, content: &str) -> PrivateMessageRequest {
        PrivateMessageRequest {
            receiver_id: receiver,
            content: content.into(),
            client_message_id: Some("tmp-1".into()),
        }
    }

    fn relay(
        registry: Arc<ConnectionRegistry>,
        repository: Arc<dyn MessageRepository>,
        policy: RelayPolicy,
    ) -> MessageRelay {
        MessageRelay::new(MessageRelayDependencies {
            registry,
            message_repository: repository,
            clock: Arc::new(FixedClock(Utc::now())),
            policy,
        })
    }

    fn decode(text: &str) -> ServerFrame {
        serde_json::from_str(text).unwrap()
    }

    #[tokio::test]
    async fn valid_message_is_persisted_once_and_fanned_out_to_both_users() {
        let store = Arc::new(MemoryStore::new());
        let alice = store.insert_user("alice", None).await;
        let bob = store.insert_user("bob", None).await;
        let registry = Arc::new(ConnectionRegistry::new());
        let (a1, mut a1_rx) = Connection::new(alice, Utc::now());
        let (a2, mut a2_rx) = Connection::new(alice, Utc::now());
        let (b1, mut b1_rx) = Connection::new(bob, Utc::now());
        let origin = a1.id();
        registry.add(a1).await;
        registry.add(a2).await;
        registry.add(b1).await;
        let relay = relay(registry, store.clone(), RelayPolicy::default());

        let report = relay
            .relay_private_message(origin, &identity(alice, "alice"), request(bob, "<b>hi</b>"))
            .await
            .unwrap();

        assert_eq!(report.delivered, 3);
        let stored = store.messages().await;
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].content.as_str(), "hi");
        for rx in [&mut a1_rx, &mut a2_rx, &mut b1_rx] {
            match decode(&rx.try_recv().unwrap()) {
                ServerFrame::PrivateMessage(payload) => {
                    assert_eq!(payload.message_id, stored[0].id);
                    assert_eq!(payload.client_message_id.as_deref(), Some("tmp-1"));
                    assert_eq!(payload.sender_name, "alice");
                    assert_eq!(payload.content, "hi");
                    assert!(!payload.is_read);
                }
                other => panic!("unexpected frame {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn offline_receiver_still_gets_message_persisted() {
        let store = Arc::new(MemoryStore::new());
        let alice = store.insert_user("alice", None).await;
        let bob = store.insert_user("bob", None).await;
        let registry = Arc::new(ConnectionRegistry::new());
        let (a1, _a1_rx) = Connection::new(alice, Utc::now());
        let origin = a1.id();
        registry.add(a1).await;
        let relay = relay(registry, store.clone(), RelayPolicy::default());

        let report = relay
            .relay_private_message(origin, &identity(alice, "alice"), request(bob, "later"))
            .await
            .unwrap();

        assert_eq!(report.delivered, 1);
        assert_eq!(store.messages().await.len(), 1);
        assert!(!store.messages().await[0].is_read);
    }

    #[tokio::test]
    async fn oversized_content_only_notifies_origin_and_never_persists() {
        let alice = UserId::from(Uuid::new_v4());
        let bob = UserId::from(Uuid::new_v4());
        let registry = Arc::new(ConnectionRegistry::new());
        let (a1, mut a1_rx) = Connection::new(alice, Utc::now());
        let (a2, mut a2_rx) = Connection::new(alice, Utc::now());
        let (b1, mut b1_rx) = Connection::new(bob, Utc::now());
        let origin = a1.id();
        registry.add(a1).await;
        registry.add(a2).await;
        registry.add(b1).await;

        let mut repository = MockMessageRepository::new();
        repository.expect_insert_message().never();
        let relay = relay(registry, Arc::new(repository), RelayPolicy::default());

        let result = relay
            .relay_private_message(origin, &identity(alice, "alice"), request(bob, &"x".repeat(31)))
            .await;

        assert!(matches!(result, Err(ApplicationError::Domain(_))));
        assert!(matches!(decode(&a1_rx.try_recv().unwrap()), ServerFrame::Error(_)));
        assert!(a2_rx.try_recv().is_err());
        assert!(b1_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn persistence_failure_is_silent_by_default() {
        let alice = UserId::from(Uuid::new_v4());
        let bob = UserId::from(Uuid::new_v4());
        let registry = Arc::new(ConnectionRegistry::new());
        let (a1, mut a1_rx) = Connection::new(alice, Utc::now());
        let (b1, mut b1_rx) = Connection::new(bob, Utc::now());
        let origin = a1.id();
        registry.add(a1).await;
        registry.add(b1).await;

        let mut repository = MockMessageRepository::new();
        repository
            .expect_insert_message()
            .times(1)
            .returning(|_| Err(RepositoryError::storage("disk full")));
        let relay = relay(registry, Arc::new(repository), RelayPolicy::default());

        let result = relay
            .relay_private_message(origin, &identity(alice, "alice"), request(bob, "hello"))
            .await;

        assert!(matches!(result, Err(ApplicationError::Repository(_))));
        assert!(a1_rx.try_recv().is_err());
        assert!(b1_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn persistence_failure_can_be_reported_to_origin() {
        let alice = UserId::from(Uuid::new_v4());
        let bob = UserId::from(Uuid::new_v4());
        let registry = Arc::new(ConnectionRegistry::new());
        let (a1, mut a1_rx) = Connection::new(alice, Utc::now());
        let (b1, mut b1_rx) = Connection::new(bob, Utc::now());
        let origin = a1.id();
        registry.add(a1).await;
        registry.add(b1).await;

        let mut repository = MockMessageRepository::new();
        repository
            .expect_insert_message()
            .returning(|_| Err(RepositoryError::storage("disk full")));
        let policy = RelayPolicy {
            report_persistence_errors: true,
            ..RelayPolicy::default()
        };
        let relay = relay(registry, Arc::new(repository), policy);

        let _ = relay
            .relay_private_message(origin, &identity(alice, "alice"), request(bob, "hello"))
            .await;

        assert_eq!(
            decode(&a1_rx.try_recv().unwrap()),
            ServerFrame::error(STORE_FAILURE_MESSAGE)
        );
        assert!(b1_rx.try_recv().is_err());
    }
}
