//! Actors of the kernel.
//!
//! ```text
//! requester ─CreateCircle─► Dispatcher ─Allocate─► Podpool ─Create─► Pod
//!     ▲                        ▲                     │ ▲               │
//!     │                        │                     │ └──Release──────┤ (priority)
//!     └──CircleCreated─────────┴──CircleCreated──────┘                 │
//!                                                                      ▼
//! Branch ─Allocate(child)─► Podpool                               Branch::reasoning
//! ```
//!
//! Each actor owns its state and handles one message at a time. Teardown
//! travels Dispatcher → Podpool → every Pod; each stops after relaying it.

mod dispatcher;
mod pod;
mod podpool;

pub use dispatcher::Dispatcher;
pub use pod::Pod;
pub use podpool::Podpool;
