//! StageLink GW - MIDI translation gateway
//!
//! Translates performance events (notes, control changes) through a
//! declarative mapping table and relays the results to a separate sender
//! process that owns the physical/virtual output port.

pub mod config;
pub mod gateway;
pub mod helper;
pub mod midi;
pub mod paths;
pub mod relay;
pub mod router;
pub mod rules;

pub use gateway::Gateway;
pub use helper::{HelperConfig, HelperState, HelperSupervisor};
pub use relay::RelayClient;
pub use router::Router;
pub use rules::TranslationTable;
