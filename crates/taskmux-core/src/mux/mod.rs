//! Terminal-multiplexer ownership: the low-level [`Multiplexer`] control
//! surface and the session-scoped [`MuxManager`].

pub mod control;
pub mod manager;

pub use control::{Multiplexer, Tmux};
pub use manager::{MAX_TASK_WINDOWS, MuxError, MuxManager, PaneTarget, PlacementRequest};
