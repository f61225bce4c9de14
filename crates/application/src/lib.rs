//! 应用层实现。
//!
//! 连接注册表、在线状态追踪、会话握手以及私信/信号中继。
//! 持久化通过 [`repository`] 中的接口抽象，由基础设施层或 [`memory`] 提供实现。

pub mod clock;
pub mod error;
pub mod frame;
pub mod memory;
pub mod presence;
pub mod registry;
pub mod repository;
pub mod services;

pub use clock::{Clock, FixedClock, SystemClock};
pub use error::ApplicationError;
pub use frame::{ClientFrame, FrameError, OutboundFrame, ServerFrame};
pub use memory::MemoryStore;
pub use presence::{PresenceChanges, PresenceTracker};
pub use registry::{Connection, ConnectionRegistry, DeliveryError, DeliveryReport};
pub use repository::{MessageRepository, UserRepository};
pub use services::{
    MessageRelay, MessageRelayDependencies, RelayPolicy, SessionIdentity, SessionService,
    SignalRelay, STORE_FAILURE_MESSAGE,
};
