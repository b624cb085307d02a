//! Dummy backend for testing and development.
//!
//! [`DummyDevice`] hands out unique handles, keeps track of what is alive and
//! where things were bound, and can be told to fail specific calls.
//! [`CommandRecorder`] records every command instead of sending it to a GPU.
//! Work is considered complete as soon as it is submitted.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use super::traits::{CommandStream, Device, DeviceError, DeviceResult, MemoryAllocator};
use super::types::*;

/// Alignment the dummy device reports for images.
pub const DUMMY_IMAGE_ALIGNMENT: u64 = 256;
/// Alignment the dummy device reports for buffers.
pub const DUMMY_BUFFER_ALIGNMENT: u64 = 64;

/// Where a transient resource was bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DummyBinding {
    pub resource: TransitionTarget,
    pub allocation: AllocationHandle,
    pub offset: u64,
}

#[derive(Debug, Default)]
struct DummyState {
    images: HashMap<ImageHandle, ImageDescriptor>,
    views: HashSet<ImageViewHandle>,
    buffers: HashMap<BufferHandle, BufferDescriptor>,
    framebuffers: HashMap<FramebufferHandle, FramebufferDescriptor>,
    resource_groups: HashMap<ResourceGroupHandle, ResourceGroupLayout>,
    fences: HashMap<FenceHandle, bool>,
    allocations: HashMap<AllocationHandle, (u64, u64)>,
    reservations: Vec<(u64, u64)>,
    bindings: Vec<DummyBinding>,
    images_created: usize,
    fail_image_at: Option<usize>,
    fail_reserve: bool,
    fence_waits: usize,
}

/// Dummy device and memory allocator.
#[derive(Debug)]
pub struct DummyDevice {
    next_handle: AtomicU64,
    state: Mutex<DummyState>,
}

impl DummyDevice {
    /// Create a new dummy device.
    pub fn new() -> Self {
        Self {
            next_handle: AtomicU64::new(1),
            state: Mutex::new(DummyState::default()),
        }
    }

    fn next(&self) -> u64 {
        self.next_handle.fetch_add(1, Ordering::Relaxed)
    }

    /// Make the `index`-th call to `create_image` (counting from zero) fail.
    pub fn fail_image_creation_at(&self, index: usize) {
        self.state.lock().fail_image_at = Some(index);
    }

    /// Make every subsequent `reserve` call fail with `OutOfMemory`.
    pub fn fail_reservations(&self, fail: bool) {
        self.state.lock().fail_reserve = fail;
    }

    pub fn live_images(&self) -> usize {
        self.state.lock().images.len()
    }

    pub fn live_image_views(&self) -> usize {
        self.state.lock().views.len()
    }

    pub fn live_buffers(&self) -> usize {
        self.state.lock().buffers.len()
    }

    pub fn live_framebuffers(&self) -> usize {
        self.state.lock().framebuffers.len()
    }

    pub fn live_resource_groups(&self) -> usize {
        self.state.lock().resource_groups.len()
    }

    pub fn live_allocations(&self) -> usize {
        self.state.lock().allocations.len()
    }

    pub fn live_fences(&self) -> usize {
        self.state.lock().fences.len()
    }

    /// Every `(size, alignment)` passed to `reserve`, in call order.
    pub fn reservations(&self) -> Vec<(u64, u64)> {
        self.state.lock().reservations.clone()
    }

    /// Every bind call, in call order.
    pub fn bindings(&self) -> Vec<DummyBinding> {
        self.state.lock().bindings.clone()
    }

    /// Descriptor a live image was created with.
    pub fn image_descriptor(&self, image: ImageHandle) -> Option<ImageDescriptor> {
        self.state.lock().images.get(&image).cloned()
    }

    /// Descriptor a live framebuffer was created with.
    pub fn framebuffer_descriptor(
        &self,
        framebuffer: FramebufferHandle,
    ) -> Option<FramebufferDescriptor> {
        self.state.lock().framebuffers.get(&framebuffer).cloned()
    }

    /// Layout a live resource group was created with.
    pub fn resource_group_layout(&self, group: ResourceGroupHandle) -> Option<ResourceGroupLayout> {
        self.state.lock().resource_groups.get(&group).cloned()
    }

    /// Number of `wait_fence` calls so far.
    pub fn fence_waits(&self) -> usize {
        self.state.lock().fence_waits
    }

    /// Simulate the GPU finishing work guarded by `fence`.
    pub fn signal_fence(&self, fence: FenceHandle) {
        if let Some(signaled) = self.state.lock().fences.get_mut(&fence) {
            *signaled = true;
        }
    }
}

impl Default for DummyDevice {
    fn default() -> Self {
        Self::new()
    }
}

fn image_size(descriptor: &ImageDescriptor) -> u64 {
    let block = u64::from(descriptor.format.block_size());
    let layers = u64::from(descriptor.array_layer_count.max(1));
    let samples = u64::from(descriptor.sample_count.max(1));
    let mut total = 0u64;
    let (mut width, mut height, mut depth) = (
        u64::from(descriptor.size.width.max(1)),
        u64::from(descriptor.size.height.max(1)),
        u64::from(descriptor.size.depth.max(1)),
    );
    for _ in 0..descriptor.mip_level_count.max(1) {
        total += width * height * depth * block;
        width = (width / 2).max(1);
        height = (height / 2).max(1);
        depth = (depth / 2).max(1);
    }
    total * layers * samples
}

impl Device for DummyDevice {
    fn name(&self) -> &str {
        "Dummy Backend"
    }

    fn create_image(&self, descriptor: &ImageDescriptor) -> DeviceResult<ImageHandle> {
        let mut state = self.state.lock();
        let index = state.images_created;
        state.images_created += 1;
        if state.fail_image_at == Some(index) {
            return Err(DeviceError::CreationFailed(format!(
                "image {:?}",
                descriptor.label
            )));
        }
        let handle = ImageHandle::from_raw(self.next());
        log::trace!(
            "DummyDevice: creating image {:?} ({}x{}x{}) -> {:?}",
            descriptor.label,
            descriptor.size.width,
            descriptor.size.height,
            descriptor.size.depth,
            handle
        );
        state.images.insert(handle, descriptor.clone());
        Ok(handle)
    }

    fn image_memory_requirements(&self, image: ImageHandle) -> MemoryRequirements {
        let size = self
            .state
            .lock()
            .images
            .get(&image)
            .map(image_size)
            .unwrap_or(0);
        MemoryRequirements::new(size, DUMMY_IMAGE_ALIGNMENT)
    }

    fn create_image_view(
        &self,
        image: ImageHandle,
        descriptor: &ImageViewDescriptor,
    ) -> DeviceResult<ImageViewHandle> {
        let mut state = self.state.lock();
        if !state.images.contains_key(&image) {
            // External images are owned elsewhere; the dummy still accepts views of them.
            log::trace!("DummyDevice: view of foreign image {:?}", image);
        }
        let handle = ImageViewHandle::from_raw(self.next());
        log::trace!(
            "DummyDevice: creating image view {:?} of {:?} -> {:?}",
            descriptor.label,
            image,
            handle
        );
        state.views.insert(handle);
        Ok(handle)
    }

    fn create_buffer(&self, descriptor: &BufferDescriptor) -> DeviceResult<BufferHandle> {
        let handle = BufferHandle::from_raw(self.next());
        log::trace!(
            "DummyDevice: creating buffer {:?} (size: {}) -> {:?}",
            descriptor.label,
            descriptor.size,
            handle
        );
        self.state.lock().buffers.insert(handle, descriptor.clone());
        Ok(handle)
    }

    fn buffer_memory_requirements(&self, buffer: BufferHandle) -> MemoryRequirements {
        let size = self
            .state
            .lock()
            .buffers
            .get(&buffer)
            .map(|descriptor| descriptor.size)
            .unwrap_or(0);
        MemoryRequirements::new(size, DUMMY_BUFFER_ALIGNMENT)
    }

    fn create_framebuffer(
        &self,
        descriptor: &FramebufferDescriptor,
    ) -> DeviceResult<FramebufferHandle> {
        let handle = FramebufferHandle::from_raw(self.next());
        log::trace!(
            "DummyDevice: creating framebuffer {:?} ({} color, depth: {})",
            descriptor.label,
            descriptor.color_attachments.len(),
            descriptor.depth_stencil_attachment.is_some()
        );
        self.state
            .lock()
            .framebuffers
            .insert(handle, descriptor.clone());
        Ok(handle)
    }

    fn create_resource_group(
        &self,
        layout: &ResourceGroupLayout,
    ) -> DeviceResult<ResourceGroupHandle> {
        let handle = ResourceGroupHandle::from_raw(self.next());
        log::trace!(
            "DummyDevice: creating resource group {:?} ({} entries)",
            layout.label,
            layout.entries.len()
        );
        self.state.lock().resource_groups.insert(handle, layout.clone());
        Ok(handle)
    }

    fn create_fence(&self, signaled: bool) -> DeviceResult<FenceHandle> {
        let handle = FenceHandle::from_raw(self.next());
        self.state.lock().fences.insert(handle, signaled);
        Ok(handle)
    }

    fn wait_fence(&self, fence: FenceHandle) -> DeviceResult<()> {
        let mut state = self.state.lock();
        state.fence_waits += 1;
        match state.fences.get_mut(&fence) {
            // Submitted work completes immediately.
            Some(signaled) => {
                *signaled = true;
                Ok(())
            }
            None => Err(DeviceError::DeviceLost),
        }
    }

    fn is_fence_signaled(&self, fence: FenceHandle) -> bool {
        self.state.lock().fences.get(&fence).copied().unwrap_or(false)
    }

    fn reset_fence(&self, fence: FenceHandle) -> DeviceResult<()> {
        match self.state.lock().fences.get_mut(&fence) {
            Some(signaled) => {
                *signaled = false;
                Ok(())
            }
            None => Err(DeviceError::DeviceLost),
        }
    }

    fn destroy_image(&self, image: ImageHandle) {
        log::trace!("DummyDevice: destroying image {:?}", image);
        self.state.lock().images.remove(&image);
    }

    fn destroy_image_view(&self, view: ImageViewHandle) {
        self.state.lock().views.remove(&view);
    }

    fn destroy_buffer(&self, buffer: BufferHandle) {
        log::trace!("DummyDevice: destroying buffer {:?}", buffer);
        self.state.lock().buffers.remove(&buffer);
    }

    fn destroy_framebuffer(&self, framebuffer: FramebufferHandle) {
        self.state.lock().framebuffers.remove(&framebuffer);
    }

    fn destroy_resource_group(&self, group: ResourceGroupHandle) {
        self.state.lock().resource_groups.remove(&group);
    }

    fn destroy_fence(&self, fence: FenceHandle) {
        self.state.lock().fences.remove(&fence);
    }
}

impl MemoryAllocator for DummyDevice {
    fn reserve(&self, size: u64, alignment: u64) -> DeviceResult<AllocationHandle> {
        let mut state = self.state.lock();
        if state.fail_reserve {
            return Err(DeviceError::OutOfMemory);
        }
        let handle = AllocationHandle::from_raw(self.next());
        log::trace!(
            "DummyDevice: reserving {} bytes (alignment {}) -> {:?}",
            size,
            alignment,
            handle
        );
        state.reservations.push((size, alignment));
        state.allocations.insert(handle, (size, alignment));
        Ok(handle)
    }

    fn bind_image(
        &self,
        image: ImageHandle,
        allocation: AllocationHandle,
        offset: u64,
    ) -> DeviceResult<()> {
        let mut state = self.state.lock();
        let &(block_size, _) = state
            .allocations
            .get(&allocation)
            .ok_or_else(|| DeviceError::Unsupported(format!("unknown allocation {allocation:?}")))?;
        let size = state.images.get(&image).map(image_size).unwrap_or(0);
        if offset.checked_add(size).map_or(true, |end| end > block_size) {
            return Err(DeviceError::OutOfMemory);
        }
        state.bindings.push(DummyBinding {
            resource: TransitionTarget::Image(image),
            allocation,
            offset,
        });
        Ok(())
    }

    fn bind_buffer(
        &self,
        buffer: BufferHandle,
        allocation: AllocationHandle,
        offset: u64,
    ) -> DeviceResult<()> {
        let mut state = self.state.lock();
        let &(block_size, _) = state
            .allocations
            .get(&allocation)
            .ok_or_else(|| DeviceError::Unsupported(format!("unknown allocation {allocation:?}")))?;
        let size = state.buffers.get(&buffer).map(|d| d.size).unwrap_or(0);
        if offset.checked_add(size).map_or(true, |end| end > block_size) {
            return Err(DeviceError::OutOfMemory);
        }
        state.bindings.push(DummyBinding {
            resource: TransitionTarget::Buffer(buffer),
            allocation,
            offset,
        });
        Ok(())
    }

    fn release(&self, allocation: AllocationHandle) {
        log::trace!("DummyDevice: releasing {:?}", allocation);
        self.state.lock().allocations.remove(&allocation);
    }
}

/// A command captured by [`CommandRecorder`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Transition(Vec<ResourceTransition>),
    BeginRenderPass {
        label: String,
        framebuffer: FramebufferHandle,
        extent: Extent3d,
    },
    EndRenderPass,
    BindPipeline(PipelineHandle),
    BindResourceGroup {
        index: u32,
        group: ResourceGroupHandle,
    },
    Draw {
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    },
    Dispatch {
        x: u32,
        y: u32,
        z: u32,
    },
    PushDebugGroup(String),
    PopDebugGroup,
    Submit(SubmitInfo),
}

/// Command stream that records instead of executing.
#[derive(Debug, Default)]
pub struct CommandRecorder {
    commands: Vec<Command>,
    fail_submit: bool,
}

impl CommandRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `submit` fail.
    pub fn failing_submit() -> Self {
        Self {
            commands: Vec::new(),
            fail_submit: true,
        }
    }

    /// All recorded commands, in order.
    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    /// Transition batches in recording order.
    pub fn transition_batches(&self) -> Vec<&[ResourceTransition]> {
        self.commands
            .iter()
            .filter_map(|command| match command {
                Command::Transition(batch) => Some(batch.as_slice()),
                _ => None,
            })
            .collect()
    }

    /// Number of submissions recorded.
    pub fn submit_count(&self) -> usize {
        self.commands
            .iter()
            .filter(|command| matches!(command, Command::Submit(_)))
            .count()
    }

    pub fn clear(&mut self) {
        self.commands.clear();
    }
}

impl CommandStream for CommandRecorder {
    fn transition(&mut self, transitions: &[ResourceTransition]) {
        log::trace!("CommandRecorder: {} transitions", transitions.len());
        self.commands.push(Command::Transition(transitions.to_vec()));
    }

    fn begin_render_pass(&mut self, begin: &RenderPassBegin<'_>) {
        self.commands.push(Command::BeginRenderPass {
            label: begin.label.to_string(),
            framebuffer: begin.framebuffer,
            extent: begin.extent,
        });
    }

    fn end_render_pass(&mut self) {
        self.commands.push(Command::EndRenderPass);
    }

    fn bind_pipeline(&mut self, pipeline: PipelineHandle) {
        self.commands.push(Command::BindPipeline(pipeline));
    }

    fn bind_resource_group(&mut self, index: u32, group: ResourceGroupHandle) {
        self.commands
            .push(Command::BindResourceGroup { index, group });
    }

    fn draw(&mut self, vertex_count: u32, instance_count: u32, first_vertex: u32, first_instance: u32) {
        self.commands.push(Command::Draw {
            vertex_count,
            instance_count,
            first_vertex,
            first_instance,
        });
    }

    fn dispatch(&mut self, x: u32, y: u32, z: u32) {
        self.commands.push(Command::Dispatch { x, y, z });
    }

    fn push_debug_group(&mut self, label: &str) {
        self.commands.push(Command::PushDebugGroup(label.to_string()));
    }

    fn pop_debug_group(&mut self) {
        self.commands.push(Command::PopDebugGroup);
    }

    fn submit(&mut self, info: &SubmitInfo) -> DeviceResult<()> {
        if self.fail_submit {
            return Err(DeviceError::SubmissionFailed("dummy submit failure".into()));
        }
        log::trace!("CommandRecorder: submit ({} commands)", self.commands.len());
        self.commands.push(Command::Submit(info.clone()));
        Ok(())
    }
}
