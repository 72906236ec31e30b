//! # rf-reels: Reel Strip Mechanics for Slot Game Clients
//!
//! Scrolls a set of reels over circular symbol strips and lands them on
//! server-dictated stops, keeping tall and mega symbols intact while they move.
//!
//! ## Features
//!
//! - **Symbol Grammar**: Parses composite names like `W-2A-3B` and caches the specs
//! - **Windowed Reels**: Visible rows plus buffers, repaired after every change
//! - **Splicing**: Jumps a spinning reel ahead of its stop index without a visible seam
//! - **Stop Sequencing**: Ordered stop entries, link groups, slam stop, anticipation
//! - **Validation**: Compares the landed windows with the server symbol matrix
//!
//! ## Architecture
//!
//! ```text
//! ReelEngine
//!     │
//!     ├── EngineConfig (reels, timing, stop order, data links)
//!     ├── StripLibrary (shared ReelStrips)
//!     ├── LinkGroups (override / outcome / data partitions)
//!     └── Vec<Reel>
//!           │  window of SymbolSlots, spin state machine, repair
//!           v
//!     SymbolPresenter  +  Vec<EngineEvent>
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod gate;
pub mod layout;
pub mod link;
pub mod outcome;
pub mod presenter;
pub mod reel;
pub mod stop_order;
pub mod strip;
pub mod symbols;
pub mod timing;
pub mod validation;

pub use config::*;
pub use engine::*;
pub use error::*;
pub use events::*;
pub use gate::*;
pub use layout::*;
pub use link::*;
pub use outcome::*;
pub use presenter::*;
pub use reel::{
    Reel, RepairReport, ReelSignal, SpinState, SpliceInfo, SpliceKind, StopTarget, SymbolSlot,
    repair_reels,
};
pub use stop_order::*;
pub use strip::*;
pub use symbols::*;
pub use timing::*;
pub use validation::*;
