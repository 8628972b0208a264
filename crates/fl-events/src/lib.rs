pub mod bus;
pub mod error;
pub mod feed;
pub mod source;
pub mod types;

pub use crate::bus::{Broadcaster, BroadcasterConfig, FanOut, SubscriberId, Subscription};
pub use crate::error::FeedError;
pub use crate::feed::{Delivery, LiveFeed};
pub use crate::source::{LiveSource, LiveSubscription};
pub use crate::types::{LiveEvent, RawMessage, canonical_json};

#[cfg(any(test, feature = "testing"))]
pub mod testing;
