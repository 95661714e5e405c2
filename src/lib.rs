/// Startup banner.
pub mod banner;
/// Broker assembly: channel registry, hub and status publishing.
pub mod broker;
/// Channels: versioned state, channel actors, registry and persistence.
pub mod channel;
/// Server configuration loading (file, environment, command line).
pub mod config;
/// Hub: subscribers, their feeds and change fan-out.
pub mod hub;
/// Flexible logging (formatting, filters, sinks).
pub mod logging;
/// Transports: HTTP long-poll and WebSocket.
pub mod transport;

// -----------------------------------------------------------------------------
//  Frequently used public types
// -----------------------------------------------------------------------------

/// Broker lifecycle.
pub use broker::{open_store, Broker};
/// Channel model and storage.
pub use channel::{
    ChangeEvent, Channel, ChannelEntry, ChannelStore, FileChannelStore, MemoryChannelStore,
    Operation, PersistenceFailurePolicy,
};
/// config
pub use config::{CliArgs, PersistenceSettings, Settings};
/// Hub API and subscriber responses.
pub use hub::{
    FeedCommand, HubConfig, HubHandle, HubStatus, ResponseStatus, SubscriberResponse, Subscription,
};
/// Logging bootstrap.
pub use logging::{init_logging, LoggingConfig, LoggingHandle};
/// Transport entry points.
pub use transport::{app, CommandContext, Reply, TransportState};
