//! Shared infrastructure: string interning and cooperative deadlines.

pub mod bidirectional_map;
pub mod bitmap;
pub mod deadline;

pub use bidirectional_map::BidirectionalMap;
pub use deadline::QueryDeadline;
