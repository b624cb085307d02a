//! Capability traits the render graph drives.
//!
//! A renderer picks one backend at startup and hands the render graph a
//! [`Device`], a [`MemoryAllocator`] and, at execute time, a [`CommandStream`].
//! The render graph never knows which API sits behind them.

use thiserror::Error;

use crate::backend::types::*;

/// Backend error type
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    #[error("Out of device memory")]
    OutOfMemory,
    #[error("Failed to create {0}")]
    CreationFailed(String),
    #[error("Device lost")]
    DeviceLost,
    #[error("Submission failed: {0}")]
    SubmissionFailed(String),
    #[error("Unsupported: {0}")]
    Unsupported(String),
}

pub type DeviceResult<T> = Result<T, DeviceError>;

/// Resource creation and synchronization on a graphics device.
///
/// All methods take `&self`; implementations synchronize internally so a
/// device can be shared between the thread building graph N+1 and the one
/// still waiting on graph N.
pub trait Device: Send + Sync {
    /// Human-readable backend name.
    fn name(&self) -> &str;

    /// Create an image without backing memory.
    fn create_image(&self, descriptor: &ImageDescriptor) -> DeviceResult<ImageHandle>;

    /// Memory an image needs once bound.
    fn image_memory_requirements(&self, image: ImageHandle) -> MemoryRequirements;

    fn create_image_view(
        &self,
        image: ImageHandle,
        descriptor: &ImageViewDescriptor,
    ) -> DeviceResult<ImageViewHandle>;

    /// Create a buffer without backing memory.
    fn create_buffer(&self, descriptor: &BufferDescriptor) -> DeviceResult<BufferHandle>;

    /// Memory a buffer needs once bound.
    fn buffer_memory_requirements(&self, buffer: BufferHandle) -> MemoryRequirements;

    fn create_framebuffer(
        &self,
        descriptor: &FramebufferDescriptor,
    ) -> DeviceResult<FramebufferHandle>;

    fn create_resource_group(
        &self,
        layout: &ResourceGroupLayout,
    ) -> DeviceResult<ResourceGroupHandle>;

    fn create_fence(&self, signaled: bool) -> DeviceResult<FenceHandle>;

    /// Block until the fence is signaled.
    fn wait_fence(&self, fence: FenceHandle) -> DeviceResult<()>;

    fn is_fence_signaled(&self, fence: FenceHandle) -> bool;

    /// Return a signaled fence to the unsignaled state.
    fn reset_fence(&self, fence: FenceHandle) -> DeviceResult<()>;

    fn destroy_image(&self, image: ImageHandle);
    fn destroy_image_view(&self, view: ImageViewHandle);
    fn destroy_buffer(&self, buffer: BufferHandle);
    fn destroy_framebuffer(&self, framebuffer: FramebufferHandle);
    fn destroy_resource_group(&self, group: ResourceGroupHandle);
    fn destroy_fence(&self, fence: FenceHandle);
}

/// Device memory provider for transient resources.
///
/// The render graph reserves one block per compiled graph and binds every
/// transient resource into it at the offset chosen by the aliasing engine.
pub trait MemoryAllocator: Send + Sync {
    /// Reserve a block of at least `size` bytes whose start satisfies `alignment`.
    fn reserve(&self, size: u64, alignment: u64) -> DeviceResult<AllocationHandle>;

    fn bind_image(
        &self,
        image: ImageHandle,
        allocation: AllocationHandle,
        offset: u64,
    ) -> DeviceResult<()>;

    fn bind_buffer(
        &self,
        buffer: BufferHandle,
        allocation: AllocationHandle,
        offset: u64,
    ) -> DeviceResult<()>;

    fn release(&self, allocation: AllocationHandle);
}

/// A single logical command stream a compiled graph records into.
pub trait CommandStream {
    /// Emit a batch of resource-state transitions.
    fn transition(&mut self, transitions: &[ResourceTransition]);

    fn begin_render_pass(&mut self, begin: &RenderPassBegin<'_>);
    fn end_render_pass(&mut self);

    fn bind_pipeline(&mut self, pipeline: PipelineHandle);
    fn bind_resource_group(&mut self, index: u32, group: ResourceGroupHandle);

    fn draw(&mut self, vertex_count: u32, instance_count: u32, first_vertex: u32, first_instance: u32);
    fn dispatch(&mut self, x: u32, y: u32, z: u32);

    fn push_debug_group(&mut self, label: &str);
    fn pop_debug_group(&mut self);

    /// Submit everything recorded so far as one unit.
    fn submit(&mut self, info: &SubmitInfo) -> DeviceResult<()>;
}
