//! Bit routing: table, latch memory and the engine that applies them
//!
//! The engine maps each enabled input bit of a status frame onto its target
//! output bit, optionally through a rising-edge latch, and wraps the result
//! in a control frame.

pub mod engine;
pub mod latch;
pub mod table;

pub use engine::{route_frame, RoutingEngine};
pub use latch::{LatchState, LatchStates};
pub use table::{
    check_index, EntryRecord, RoutingDocument, RoutingEntry, RoutingError, RoutingFileError,
    RoutingTable,
};
