//! # nodegate-kernel
//!
//! Primitives shared by the admission and consistency layers.
//!
//! This crate is deliberately small: it owns nothing that is specific to
//! admission control or read-after-write tracking. It only fixes how those
//! components observe time, name the entities they guard, and run their
//! background sweeps.
//!
//! ## Architecture
//!
//! ```text
//! Clock          ← now() + sleep(); TokioClock in production, ManualClock in tests
//!     │
//! EntityKey      ← identifier of the graph node a read/write targets
//!     │
//! PeriodicTask   ← stoppable interval loop used by component sweepers
//! ```

pub mod clock;
pub mod entity;
pub mod periodic;

pub use clock::{Clock, ManualClock, SharedClock, TokioClock};
pub use entity::EntityKey;
pub use periodic::PeriodicTask;
