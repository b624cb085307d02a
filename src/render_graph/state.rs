//! Resource states and transition rules.
//!
//! Every image, buffer and acceleration structure is in exactly one
//! [`ResourceState`] between passes. A pass requires a state per resource it
//! touches; the builder compares it with the state the previous user left
//! behind and records a [`StateTransition`] when they differ.

use super::resource::ResourceRef;

/// Usage state of a resource.
///
/// Image states map onto image layouts in explicit APIs; buffer states only
/// select access masks and pipeline stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ResourceState {
    /// Contents undefined. Every transient starts here.
    #[default]
    Undefined,
    /// Least optimal, usable for anything.
    General,
    /// Written as color attachment.
    ColorAttachment,
    /// Written as depth/stencil attachment.
    DepthStencilAttachment,
    /// Depth test without writes, or sampling a depth image.
    DepthStencilReadOnly,
    /// Sampled in a shader.
    ShaderRead,
    /// Read as storage image or storage buffer.
    StorageRead,
    /// Written as storage image or storage buffer.
    StorageWrite,
    /// Read and written as storage image or storage buffer.
    StorageReadWrite,
    /// Source of a copy.
    TransferSrc,
    /// Destination of a copy.
    TransferDst,
    /// Handed to the presentation engine.
    Present,
    VertexBuffer,
    IndexBuffer,
    UniformRead,
    IndirectArgument,
    /// Read by ray queries or ray tracing shaders.
    AccelerationStructureRead,
}

impl ResourceState {
    /// Check if a resource in this state may be written.
    pub fn is_write(self) -> bool {
        matches!(
            self,
            Self::General
                | Self::ColorAttachment
                | Self::DepthStencilAttachment
                | Self::StorageWrite
                | Self::StorageReadWrite
                | Self::TransferDst
        )
    }

    /// Check if a resource in this state may be read.
    pub fn is_read(self) -> bool {
        matches!(
            self,
            Self::General
                | Self::DepthStencilAttachment
                | Self::DepthStencilReadOnly
                | Self::ShaderRead
                | Self::StorageRead
                | Self::StorageReadWrite
                | Self::TransferSrc
                | Self::Present
                | Self::VertexBuffer
                | Self::IndexBuffer
                | Self::UniformRead
                | Self::IndirectArgument
                | Self::AccelerationStructureRead
        )
    }

    /// Read/write classification used by the dependency tracker.
    pub fn access(self) -> Access {
        match (self.is_read(), self.is_write()) {
            (_, false) => Access::Read,
            (false, true) => Access::Write,
            (true, true) => Access::ReadWrite,
        }
    }
}

/// Whether a pass reads, writes, or does both to a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Access {
    Read,
    Write,
    ReadWrite,
}

impl Access {
    pub fn is_read(self) -> bool {
        matches!(self, Self::Read | Self::ReadWrite)
    }

    pub fn is_write(self) -> bool {
        matches!(self, Self::Write | Self::ReadWrite)
    }
}

/// A state change recorded before a pass (or at the end of the graph).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateTransition {
    /// Image, buffer or acceleration structure the transition applies to.
    pub resource: ResourceRef,
    pub before: ResourceState,
    pub after: ResourceState,
}

/// Last state a resource was left in while walking the pass list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct KnownState {
    pub state: ResourceState,
    /// `true` once a pass of this graph has used the resource.
    pub used_in_graph: bool,
}

impl KnownState {
    pub(crate) fn initial(state: ResourceState) -> Self {
        Self {
            state,
            used_in_graph: false,
        }
    }

    /// Transition needed to bring the resource into `required`, if any.
    ///
    /// Differing states always need one. Two consecutive in-graph uses in
    /// the same writing state need a same-state barrier; reads never do.
    pub(crate) fn transition_to(
        &self,
        resource: ResourceRef,
        required: ResourceState,
    ) -> Option<StateTransition> {
        let hazard = self.state != required || (self.used_in_graph && required.is_write());
        hazard.then_some(StateTransition {
            resource,
            before: self.state,
            after: required,
        })
    }

    pub(crate) fn advance(&mut self, state: ResourceState) {
        self.state = state;
        self.used_in_graph = true;
    }
}
