mod message_relay;
mod session;
mod signal_relay;

pub use message_relay::{
    MessageRelay, MessageRelayDependencies, RelayPolicy, STORE_FAILURE_MESSAGE,
};
pub use session::{SessionIdentity, SessionService};
pub use signal_relay::SignalRelay;
