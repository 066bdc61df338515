//! Unified chat/contact/message search core.

pub mod aggregator;
pub mod entry;
pub mod recent;
