//! Interaction-pattern engine for MO services
//!
//! This crate turns independently arriving messages into correctly sequenced
//! interactions of the six MAL patterns:
//! - SEND, SUBMIT, REQUEST, INVOKE and PROGRESS calls
//! - publish/subscribe through a broker
//!
//! Replies are correlated by transaction id, stage order is enforced on both
//! sides, and a timeout supervisor ends interactions whose replies never
//! come. The engine is transport-agnostic and works with any implementation
//! of the `mal_transport::Transport` trait.
#![warn(missing_docs)]

pub mod access;
pub mod address;
pub mod broker;
mod callback;
pub mod config;
pub mod consumer;
pub mod context;
pub mod error;
pub mod handler;
pub mod interaction;
pub mod pattern;
pub mod provider;
pub mod publisher;
pub mod pubsub;
mod receive;
pub mod send;
pub mod supervisor;
pub mod table;
pub mod transaction_id;

// Re-export commonly used types
pub use access::{AccessControl, AllowAll};
pub use address::{Address, AddressRegistry, ServiceKey};
pub use broker::SimpleBroker;
pub use config::Config;
pub use consumer::Consumer;
pub use context::InteractionContext;
pub use error::{Error, Result};
pub use handler::{InteractionHandler, InteractionListener};
pub use interaction::ConsumerInteraction;
pub use pattern::Transition;
pub use provider::ProviderInteraction;
pub use publisher::Publisher;
pub use pubsub::PubSubTables;
pub use send::{MessageDetails, Operation};
pub use supervisor::TimeoutSupervisor;
pub use table::InteractionTable;
pub use transaction_id::TransactionIdGenerator;
