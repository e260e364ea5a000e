//! # relay-engine
//!
//! The correlation and relay engine. Inbound events pass [`EventDeduplicator`], then a
//! [`HandlerChain`] of [`IgnoreFilter`] → [`CommandHandler`] → [`ReplyResolver`] → [`RelayRouter`].
//! Every outbound call goes through [`RateLimitedDispatcher`]; correlations go to a
//! [`storage::CorrelationStore`].

pub mod chain;
pub mod commands;
pub mod dedup;
pub mod dispatcher;
pub mod engine;
pub mod filter;
pub mod membership;
pub mod mention;
pub mod resolver;
pub mod router;

pub use chain::HandlerChain;
pub use commands::{Command, CommandHandler, MessageTarget};
pub use dedup::{EventDeduplicator, DEFAULT_CAPACITY};
pub use dispatcher::{DispatchError, RateLimitedDispatcher, RetryPolicy};
pub use engine::{EngineConfig, RelayEngine};
pub use filter::IgnoreFilter;
pub use membership::MembershipNotifier;
pub use mention::{is_mentioned, mentioned_user_ids, MentionPolicy};
pub use resolver::{Classification, Confirmation, ReplyResolver, ResolveOutcome};
pub use router::{RelayOutcome, RelayRouter, SkipReason};
