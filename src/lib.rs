//! Chat-client media controllers: a voice/music message queue player and a
//! unified chat/contact/message search core.
//!
//! The crate is organized around two controller threads — the queue
//! controller ([`queue::controller::QueueController`]) and the search
//! aggregator ([`search::aggregator::SearchController`]) — that own all
//! mutable state and drain a shared broadcast bus ([`protocol::Message`]).
//! List updates flow through the incremental reconciliation engine in
//! [`diff`]; external collaborators (player, content store, history and
//! search backends, recent-search persistence) are trait seams.

pub mod config;
pub mod diff;
pub mod error;
pub mod fetch;
pub mod player;
pub mod protocol;
pub mod queue;
pub mod search;

pub use config::{default_config_path, load_config, sanitize_config, store_config, Config};
pub use diff::{DiffEntry, PreparationQueue, Transition};
pub use error::{ConfigError, PlayerError};
pub use queue::controller::{
    ConsumptionTracker, QueueController, QueueDeps, QueueHandle, QueueListener, QueuePolicy,
    QueueSnapshot,
};
pub use search::aggregator::{SearchController, SearchHandle, SearchSources};
pub use search::recent::RecentSearchStore;
