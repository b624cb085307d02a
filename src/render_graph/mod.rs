//! Render Graph System
//!
//! Rendering code describes a frame as passes over logical resource
//! references. The graph tracks which pass uses what, packs short-lived
//! resources into shared memory, and replays the passes with the state
//! transitions they need.
//!
//! ```text
//! RenderGraphBuilder ──add_pass──► DependencyTracker
//!        │ compile(device, allocator)
//!        ▼
//!  lifetimes ──► aliasing::pack ──► reserve + bind ──► CompiledGraph
//!                                                        │ execute(commands, submit)
//!                                                        ▼
//!                                                   CommandStream
//! ```

pub mod aliasing;
pub mod builder;
pub mod compiled;
pub mod frames;
pub mod pass;
pub mod resource;
pub mod state;
pub mod tracker;

pub use aliasing::{pack, pack_unaliased, AliasBucket, AliasNode, PackedLayout, TransientInterval};
pub use builder::{ExternalBuffer, ExternalImage, RenderGraphBuilder};
pub use compiled::{CompiledGraph, CompiledPass, GraphStats};
pub use frames::FramesInFlight;
pub use pass::*;
pub use resource::*;
pub use state::{Access, ResourceState, StateTransition};
pub use tracker::{Declaration, DependencyTracker, ExternalMapping};
