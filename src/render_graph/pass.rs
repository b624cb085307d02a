//! Pass declarations for the render graph
//!
//! A pass names the resources it touches through a [`PassParameters`]
//! implementation: usually a plain struct of references that pushes one
//! [`ResourceBinding`] per field, or an ad-hoc [`PassBindings`] list.
//!
//! ```ignore
//! struct LightingParams {
//!     albedo: TextureRef,
//!     depth: ImageRef,
//!     lights: UniformBufferRef,
//!     output: ImageViewRef,
//! }
//!
//! impl PassParameters for LightingParams {
//!     fn bindings(&self, out: &mut PassBindings) {
//!         out.sampled("albedo", self.albedo)
//!             .sampled("depth", self.depth)
//!             .uniform("lights", self.lights)
//!             .storage_image_write("output", self.output);
//!     }
//! }
//! ```
//!
//! Samplers are not graph resources; parameter structs simply leave them out.

use std::collections::HashMap;

use crate::backend::*;

use super::resource::*;
use super::state::{Access, ResourceState};

/// Kind of pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PassKind {
    /// Runs inside a render pass over a framebuffer built from its attachments.
    Raster,
    /// Runs outside any render pass.
    Compute,
}

/// How a pass uses one bound resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindingKind {
    ColorAttachment,
    DepthStencilAttachment,
    /// Depth test without depth writes.
    DepthStencilReadOnly,
    SampledImage,
    StorageImageRead,
    StorageImageWrite,
    StorageImageReadWrite,
    UniformBuffer,
    StorageBufferRead,
    StorageBufferWrite,
    StorageBufferReadWrite,
    VertexBuffer,
    IndexBuffer,
    IndirectBuffer,
    TransferSrc,
    TransferDst,
    AccelerationStructure,
}

impl BindingKind {
    /// State the bound resource must be in while the pass runs.
    pub fn required_state(self) -> ResourceState {
        match self {
            Self::ColorAttachment => ResourceState::ColorAttachment,
            Self::DepthStencilAttachment => ResourceState::DepthStencilAttachment,
            Self::DepthStencilReadOnly => ResourceState::DepthStencilReadOnly,
            Self::SampledImage => ResourceState::ShaderRead,
            Self::StorageImageRead | Self::StorageBufferRead => ResourceState::StorageRead,
            Self::StorageImageWrite | Self::StorageBufferWrite => ResourceState::StorageWrite,
            Self::StorageImageReadWrite | Self::StorageBufferReadWrite => {
                ResourceState::StorageReadWrite
            }
            Self::UniformBuffer => ResourceState::UniformRead,
            Self::VertexBuffer => ResourceState::VertexBuffer,
            Self::IndexBuffer => ResourceState::IndexBuffer,
            Self::IndirectBuffer => ResourceState::IndirectArgument,
            Self::TransferSrc => ResourceState::TransferSrc,
            Self::TransferDst => ResourceState::TransferDst,
            Self::AccelerationStructure => ResourceState::AccelerationStructureRead,
        }
    }

    pub fn access(self) -> Access {
        self.required_state().access()
    }

    /// Check if this binding is a render-target attachment.
    pub fn is_attachment(self) -> bool {
        matches!(
            self,
            Self::ColorAttachment | Self::DepthStencilAttachment | Self::DepthStencilReadOnly
        )
    }

    /// Check if this binding goes into the pass's resource group.
    pub fn is_shader_visible(self) -> bool {
        matches!(
            self,
            Self::SampledImage
                | Self::StorageImageRead
                | Self::StorageImageWrite
                | Self::StorageImageReadWrite
                | Self::UniformBuffer
                | Self::StorageBufferRead
                | Self::StorageBufferWrite
                | Self::StorageBufferReadWrite
                | Self::AccelerationStructure
        )
    }

    /// Check if a reference with `tag` can be bound this way.
    pub fn accepts(self, tag: ResourceTag) -> bool {
        match self {
            Self::ColorAttachment
            | Self::DepthStencilAttachment
            | Self::DepthStencilReadOnly
            | Self::SampledImage
            | Self::StorageImageRead
            | Self::StorageImageWrite
            | Self::StorageImageReadWrite => {
                matches!(tag, ResourceTag::Image | ResourceTag::ImageView)
            }
            Self::TransferSrc | Self::TransferDst => {
                matches!(tag, ResourceTag::Image | ResourceTag::Buffer)
            }
            Self::UniformBuffer
            | Self::StorageBufferRead
            | Self::StorageBufferWrite
            | Self::StorageBufferReadWrite
            | Self::VertexBuffer
            | Self::IndexBuffer
            | Self::IndirectBuffer => tag == ResourceTag::Buffer,
            Self::AccelerationStructure => tag == ResourceTag::AccelerationStructure,
        }
    }
}

/// One named resource used by a pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceBinding {
    pub name: String,
    pub resource: ResourceRef,
    pub kind: BindingKind,
}

/// A pass parameter type that can list the resources it references.
pub trait PassParameters {
    /// Push one binding per resource field, in a stable order.
    fn bindings(&self, out: &mut PassBindings);
}

/// Ordered list of bindings, filled by [`PassParameters::bindings`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassBindings {
    bindings: Vec<ResourceBinding>,
}

impl PassBindings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Collect the bindings of `params`.
    pub fn collect<P: PassParameters + ?Sized>(params: &P) -> Self {
        let mut out = Self::new();
        params.bindings(&mut out);
        out
    }

    pub fn bind(
        &mut self,
        name: impl Into<String>,
        resource: impl Into<ResourceRef>,
        kind: BindingKind,
    ) -> &mut Self {
        self.bindings.push(ResourceBinding {
            name: name.into(),
            resource: resource.into(),
            kind,
        });
        self
    }

    pub fn color_attachment(
        &mut self,
        name: impl Into<String>,
        target: impl Into<ResourceRef>,
    ) -> &mut Self {
        self.bind(name, target, BindingKind::ColorAttachment)
    }

    pub fn depth_stencil_attachment(
        &mut self,
        name: impl Into<String>,
        target: impl Into<ResourceRef>,
    ) -> &mut Self {
        self.bind(name, target, BindingKind::DepthStencilAttachment)
    }

    pub fn depth_stencil_read_only(
        &mut self,
        name: impl Into<String>,
        target: impl Into<ResourceRef>,
    ) -> &mut Self {
        self.bind(name, target, BindingKind::DepthStencilReadOnly)
    }

    pub fn sampled(&mut self, name: impl Into<String>, image: impl Into<ResourceRef>) -> &mut Self {
        self.bind(name, image, BindingKind::SampledImage)
    }

    pub fn storage_image_read(
        &mut self,
        name: impl Into<String>,
        image: impl Into<ResourceRef>,
    ) -> &mut Self {
        self.bind(name, image, BindingKind::StorageImageRead)
    }

    pub fn storage_image_write(
        &mut self,
        name: impl Into<String>,
        image: impl Into<ResourceRef>,
    ) -> &mut Self {
        self.bind(name, image, BindingKind::StorageImageWrite)
    }

    pub fn storage_image_read_write(
        &mut self,
        name: impl Into<String>,
        image: impl Into<ResourceRef>,
    ) -> &mut Self {
        self.bind(name, image, BindingKind::StorageImageReadWrite)
    }

    pub fn uniform(&mut self, name: impl Into<String>, buffer: impl Into<ResourceRef>) -> &mut Self {
        self.bind(name, buffer, BindingKind::UniformBuffer)
    }

    pub fn storage_buffer_read(
        &mut self,
        name: impl Into<String>,
        buffer: impl Into<ResourceRef>,
    ) -> &mut Self {
        self.bind(name, buffer, BindingKind::StorageBufferRead)
    }

    pub fn storage_buffer_write(
        &mut self,
        name: impl Into<String>,
        buffer: impl Into<ResourceRef>,
    ) -> &mut Self {
        self.bind(name, buffer, BindingKind::StorageBufferWrite)
    }

    pub fn storage_buffer_read_write(
        &mut self,
        name: impl Into<String>,
        buffer: impl Into<ResourceRef>,
    ) -> &mut Self {
        self.bind(name, buffer, BindingKind::StorageBufferReadWrite)
    }

    pub fn acceleration_structure(
        &mut self,
        name: impl Into<String>,
        tlas: AccelerationStructureRef,
    ) -> &mut Self {
        self.bind(name, tlas, BindingKind::AccelerationStructure)
    }

    pub fn as_slice(&self) -> &[ResourceBinding] {
        &self.bindings
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    pub(crate) fn into_vec(self) -> Vec<ResourceBinding> {
        self.bindings
    }
}

impl PassParameters for PassBindings {
    fn bindings(&self, out: &mut PassBindings) {
        out.bindings.extend_from_slice(&self.bindings);
    }
}

/// Pass body recorded at build time and invoked on every execute.
pub type PassCallback = Box<dyn Fn(&mut PassContext<'_>) + Send + Sync>;

/// Handle to a pass added to a builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PassHandle {
    index: usize,
    framebuffer: Option<FramebufferRef>,
    resource_group: Option<ResourceGroupRef>,
}

impl PassHandle {
    pub(crate) fn new(
        index: usize,
        framebuffer: Option<FramebufferRef>,
        resource_group: Option<ResourceGroupRef>,
    ) -> Self {
        Self {
            index,
            framebuffer,
            resource_group,
        }
    }

    /// Position of the pass in declaration order.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Framebuffer the graph builds for this pass (raster passes only).
    pub fn framebuffer(&self) -> Option<FramebufferRef> {
        self.framebuffer
    }

    /// Resource group the graph builds for this pass's shader-visible bindings.
    pub fn resource_group(&self) -> Option<ResourceGroupRef> {
        self.resource_group
    }
}

/// Concrete backend objects a pass's references resolved to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassResources {
    pub(crate) images: HashMap<ResourceRef, ImageHandle>,
    pub(crate) views: HashMap<ResourceRef, ImageViewHandle>,
    pub(crate) buffers: HashMap<ResourceRef, BufferHandle>,
    pub(crate) acceleration_structures: HashMap<ResourceRef, AccelerationStructureHandle>,
    pub(crate) framebuffer: Option<FramebufferHandle>,
    pub(crate) resource_group: Option<ResourceGroupHandle>,
    pub(crate) extent: Option<Extent3d>,
}

impl PassResources {
    /// Image behind an image or image-view reference.
    pub fn image(&self, image: impl Into<ResourceRef>) -> Option<ImageHandle> {
        self.images.get(&image.into()).copied()
    }

    /// View bound for an image-view reference, or the default view of an image.
    pub fn view(&self, view: impl Into<ResourceRef>) -> Option<ImageViewHandle> {
        self.views.get(&view.into()).copied()
    }

    pub fn buffer(&self, buffer: impl Into<BufferRef>) -> Option<BufferHandle> {
        self.buffers.get(&buffer.into().raw()).copied()
    }

    pub fn acceleration_structure(
        &self,
        tlas: AccelerationStructureRef,
    ) -> Option<AccelerationStructureHandle> {
        self.acceleration_structures.get(&tlas.raw()).copied()
    }

    pub fn framebuffer(&self) -> Option<FramebufferHandle> {
        self.framebuffer
    }

    pub fn resource_group(&self) -> Option<ResourceGroupHandle> {
        self.resource_group
    }

    /// Render area of a raster pass.
    pub fn extent(&self) -> Option<Extent3d> {
        self.extent
    }
}

/// What a pass callback gets to work with.
pub struct PassContext<'a> {
    pub(crate) name: &'a str,
    pub(crate) kind: PassKind,
    pub(crate) commands: &'a mut dyn CommandStream,
    pub(crate) resources: &'a PassResources,
}

impl<'a> PassContext<'a> {
    pub fn pass_name(&self) -> &str {
        self.name
    }

    pub fn kind(&self) -> PassKind {
        self.kind
    }

    /// Command stream to record draws or dispatches into.
    pub fn commands(&mut self) -> &mut dyn CommandStream {
        &mut *self.commands
    }

    pub fn resources(&self) -> &PassResources {
        self.resources
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct BlurParams {
        source: TextureRef,
        weights: UniformBufferRef,
        target: ImageViewRef,
    }

    impl PassParameters for BlurParams {
        fn bindings(&self, out: &mut PassBindings) {
            out.sampled("source", self.source)
                .uniform("weights", self.weights)
                .storage_image_write("target", self.target);
        }
    }

    #[test]
    fn test_parameter_struct_enumerates_fields() {
        let params = BlurParams {
            source: TextureRef::wrap(ImageRef::from_index(0)),
            weights: UniformBufferRef::wrap(BufferRef::from_index(1)),
            target: ImageViewRef::from_index(2),
        };
        let bindings = PassBindings::collect(&params);
        let names: Vec<_> = bindings.as_slice().iter().map(|b| b.name.as_str()).collect();
        assert_eq!(names, ["source", "weights", "target"]);
        assert_eq!(bindings.as_slice()[0].resource, ImageRef::from_index(0).raw());
        assert_eq!(bindings.as_slice()[2].kind, BindingKind::StorageImageWrite);
    }

    #[test]
    fn test_binding_states() {
        assert_eq!(
            BindingKind::ColorAttachment.required_state(),
            ResourceState::ColorAttachment
        );
        assert_eq!(
            BindingKind::SampledImage.required_state(),
            ResourceState::ShaderRead
        );
        assert_eq!(BindingKind::StorageBufferWrite.access(), Access::Write);
        assert_eq!(BindingKind::UniformBuffer.access(), Access::Read);
        assert!(BindingKind::DepthStencilReadOnly.is_attachment());
        assert!(!BindingKind::VertexBuffer.is_shader_visible());
    }

    #[test]
    fn test_binding_tags() {
        assert!(BindingKind::SampledImage.accepts(ResourceTag::ImageView));
        assert!(BindingKind::SampledImage.accepts(ResourceTag::Image));
        assert!(!BindingKind::SampledImage.accepts(ResourceTag::Buffer));
        assert!(BindingKind::TransferDst.accepts(ResourceTag::Buffer));
        assert!(!BindingKind::UniformBuffer.accepts(ResourceTag::Image));
        assert!(BindingKind::AccelerationStructure.accepts(ResourceTag::AccelerationStructure));
    }

    #[test]
    fn test_pass_bindings_forward_themselves() {
        let mut bindings = PassBindings::new();
        bindings.color_attachment("color", ImageRef::from_index(0));
        let collected = PassBindings::collect(&bindings);
        assert_eq!(collected, bindings);
        assert_eq!(collected.len(), 1);
    }
}
