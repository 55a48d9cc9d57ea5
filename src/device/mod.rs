mod config;
mod connection;
mod executor;
mod session;

pub use self::config::SessionConfig;
pub use self::connection::{ConnectionEvent, ConnectionState, InvalidTransition};
pub use self::session::{PendingCommand, SnoozDevice};
