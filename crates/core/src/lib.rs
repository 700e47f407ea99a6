pub mod config;
pub mod event;
pub mod queue;

pub use config::{Config, ConfigError};
pub use event::{ChatState, MessageType, PresenceShow, RosterItem, Subscription};
pub use queue::{EventQueue, QueueName};
