//! Каналы: версионированное состояние, его акторы, реестр и хранилище.

pub mod actor;
pub mod model;
pub mod registry;
pub mod store;

pub use actor::{ChannelActorConfig, ChannelHandle};
pub use model::{
    is_reserved, private_channel_name, ChangeEvent, Channel, ChannelEntry, Operation,
    PRIVATE_PREFIX, SYSTEM_CHANNEL,
};
pub use registry::{RegistryConfig, RegistryHandle};
pub use store::{
    AbortSignal, AbortWatch, ChannelStore, FileChannelStore, MemoryChannelStore,
    PersistenceFailurePolicy,
};
