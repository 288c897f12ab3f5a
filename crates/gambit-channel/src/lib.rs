//! Per-session broadcast channel for Gambit.
//!
//! Each session gets one topic. A topic is an actor task that owns the list
//! of subscribers and fans every published [`ChannelEvent`] out to them:
//!
//! ```text
//! SessionService ──publish──► BroadcastChannel ──► topic actor (S1) ──► subscriber alice
//!                                              │                    └─► subscriber bob
//!                                              └─► topic actor (S2) ──► ...
//! ```
//!
//! Publishers never wait: a topic's command queue and each subscriber's
//! queue are unbounded, so a slow reader only grows its own backlog. A
//! subscriber that went away is dropped on the next publish; there are no
//! retries, catching up is the client's job.

mod channel;
mod error;
mod event;
mod topic;

pub use channel::BroadcastChannel;
pub use error::ChannelError;
pub use event::{ChannelEvent, SubscriberId};
pub use topic::{SubscriptionHandle, TopicPublisher};
