//! Hub: подписчики, их ленты и рассылка изменений каналов.

pub mod dispatcher;
pub mod feed;
pub mod id;
pub mod status;
pub mod subscriber;

pub use dispatcher::{ChannelCursor, HubConfig, HubHandle, SubscriberStatus, Subscription};
pub use feed::{resync_batch, FeedBatch, FeedCommand, ResponseStatus, SubscriberResponse};
pub use id::new_subscriber_id;
pub use status::{collect_status, publish_status, spawn_status_task, HubStatus};
pub use subscriber::{DeliveryConfig, FeedHandle, FeedPoll};
