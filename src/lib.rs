//! # RedLilium Render Graph
//!
//! Render graph core over abstract graphics backends.
//!
//! - [`RenderGraphBuilder`] - declare passes over transient and external resources
//! - [`render_graph::aliasing`] - pack transient resources into one memory block
//! - [`CompiledGraph`] - replay passes with automatic state transitions
//! - [`backend`] - `Device`, `MemoryAllocator` and `CommandStream` traits, plus a dummy backend
//!
//! ## Example
//!
//! ```
//! use redlilium_render_graph::backend::dummy::{CommandRecorder, DummyDevice};
//! use redlilium_render_graph::backend::{Format, ImageDescriptor, ImageUsage, SubmitInfo};
//! use redlilium_render_graph::{PassBindings, PassKind, RenderGraphBuilder};
//!
//! let device = DummyDevice::new();
//! let mut builder = RenderGraphBuilder::new();
//! let color = builder.create_transient_image(ImageDescriptor::new_2d(
//!     1280,
//!     720,
//!     Format::Rgba16Float,
//!     ImageUsage::RENDER_ATTACHMENT | ImageUsage::SAMPLED,
//! ));
//!
//! let mut bindings = PassBindings::new();
//! bindings.color_attachment("color", color);
//! builder.add_pass("main", &bindings, PassKind::Raster, |ctx| {
//!     ctx.commands().draw(3, 1, 0, 0);
//! });
//!
//! let graph = builder.compile(&device, &device).unwrap();
//! let mut commands = CommandRecorder::new();
//! graph.execute(&mut commands, &SubmitInfo::new()).unwrap();
//! graph.release(&device, &device);
//! ```

pub mod backend;
pub mod config;
pub mod error;
pub mod profiling;
pub mod render_graph;

pub use config::RenderGraphConfig;
pub use error::{GraphError, GraphResult};
pub use render_graph::{
    CompiledGraph, FramesInFlight, PassBindings, PassContext, PassKind, PassParameters,
    RenderGraphBuilder, ResourceRef, ResourceState,
};
