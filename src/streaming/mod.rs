//! Per-connection streaming delivery
//!
//! `connections` tracks live client streams, `pipeline` pushes agent output
//! to them in order while recording every content event.

pub mod connections;
pub mod events;
pub mod pipeline;

pub use connections::{CloseReason, ConnectionHandle, ConnectionRegistry};
pub use events::{EventKind, StreamEvent};
pub use pipeline::{DeliveryContext, DeliveryPipeline, DeliveryReport, DeliveryStatus};
