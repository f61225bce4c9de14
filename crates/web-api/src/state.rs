use std::sync::Arc;
use std::time::Duration;

use application::{
    Clock, ConnectionRegistry, MessageRelay, MessageRelayDependencies, MessageRepository,
    PresenceTracker, RelayPolicy, SessionService, SignalRelay, UserRepository,
};
use config::RelayConfig;

/// 构造 [`AppState`] 所需的外部协作方
pub struct AppStateDependencies {
    pub user_repository: Arc<dyn UserRepository>,
    pub message_repository: Arc<dyn MessageRepository>,
    pub clock: Arc<dyn Clock>,
    pub relay: RelayConfig,
}

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ConnectionRegistry>,
    pub presence: Arc<PresenceTracker>,
    pub sessions: Arc<SessionService>,
    pub message_relay: Arc<MessageRelay>,
    pub signal_relay: Arc<SignalRelay>,
    pub user_repository: Arc<dyn UserRepository>,
    pub message_repository: Arc<dyn MessageRepository>,
    pub clock: Arc<dyn Clock>,
    pub session_cookie: Arc<str>,
    pub idle_timeout: Option<Duration>,
}

impl AppState {
    pub fn new(deps: AppStateDependencies) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let presence = Arc::new(PresenceTracker::new(
            registry.clone(),
            deps.user_repository.clone(),
        ));
        let sessions = Arc::new(SessionService::new(deps.user_repository.clone()));
        let message_relay = Arc::new(MessageRelay::new(MessageRelayDependencies {
            registry: registry.clone(),
            message_repository: deps.message_repository.clone(),
            clock: deps.clock.clone(),
            policy: RelayPolicy {
                max_message_chars: deps.relay.max_message_chars,
                report_persistence_errors: deps.relay.report_persistence_errors,
            },
        }));
        let signal_relay = Arc::new(SignalRelay::new(
            registry.clone(),
            deps.message_repository.clone(),
        ));

        Self {
            registry,
            presence,
            sessions,
            message_relay,
            signal_relay,
            idle_timeout: deps.relay.idle_timeout(),
            session_cookie: Arc::from(deps.relay.session_cookie.as_str()),
            user_repository: deps.user_repository,
            message_repository: deps.message_repository,
            clock: deps.clock,
        }
    }
}
