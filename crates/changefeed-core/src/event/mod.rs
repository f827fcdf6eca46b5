//! Change events and stream identifiers
//!
//! This module contains the change-feed primitives:
//! - [`StreamKey`] identifies one ordered entity stream
//! - [`Action`] names the mutation that produced an event
//! - [`NewEvent`] is what collaborators hand to the bus
//! - [`Event`] is the immutable, sequenced record the bus hands back

mod action;
mod record;
mod stream_key;

pub use action::{actions, Action};
pub use record::{Event, NewEvent};
pub use stream_key::StreamKey;
