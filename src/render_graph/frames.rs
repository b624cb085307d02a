//! Frames in flight.
//!
//! [`FramesInFlight`] keeps one compiled graph and one completion fence per
//! frame slot, so graph N+1 can be built and compiled while the backend is
//! still consuming graph N.
//!
//! ```text
//! frames_in_flight = 2
//!
//! Slot 0: [Frame 0] ──► [Frame 2] ──► [Frame 4] ──►
//! Slot 1: [Frame 1] ──► [Frame 3] ──► [Frame 5] ──►
//! ```
//!
//! Before a slot is reused its fence is waited on and the graph it held is
//! released, which returns the slot's transient memory to the allocator.
//!
//! ```ignore
//! let mut frames = FramesInFlight::new(&device, 2)?;
//! loop {
//!     let fence = frames.begin_frame(&device, &allocator)?;
//!     let graph = build_frame_graph().compile(&device, &allocator)?;
//!     graph.execute(&mut commands, &SubmitInfo::new().with_fence(fence))?;
//!     frames.end_frame(graph);
//! }
//! frames.destroy(&device, &allocator)?;
//! ```

use crate::backend::{Device, FenceHandle, MemoryAllocator};
use crate::config::RenderGraphConfig;
use crate::error::{GraphError, GraphResult};
use crate::frame_mark;

use super::compiled::CompiledGraph;

#[derive(Debug)]
struct FrameSlot {
    fence: FenceHandle,
    graph: Option<CompiledGraph>,
}

/// Compiled graphs and completion fences for N frame slots.
///
/// Not thread-safe; owned by the thread that drives the renderer.
#[derive(Debug)]
pub struct FramesInFlight {
    slots: Vec<FrameSlot>,
    current: usize,
    frame_count: u64,
}

impl FramesInFlight {
    /// Create `frames_in_flight` slots (at least one), each with a signaled fence.
    pub fn new(device: &dyn Device, frames_in_flight: usize) -> GraphResult<Self> {
        let mut slots: Vec<FrameSlot> = Vec::with_capacity(frames_in_flight.max(1));
        for _ in 0..frames_in_flight.max(1) {
            let fence = match device.create_fence(true) {
                Ok(fence) => fence,
                Err(err) => {
                    for slot in &slots {
                        device.destroy_fence(slot.fence);
                    }
                    return Err(GraphError::device("creating frame fence", err));
                }
            };
            slots.push(FrameSlot { fence, graph: None });
        }
        log::debug!("{} frames in flight on {}", slots.len(), device.name());
        Ok(Self {
            slots,
            current: 0,
            frame_count: 0,
        })
    }

    pub fn from_config(device: &dyn Device, config: &RenderGraphConfig) -> GraphResult<Self> {
        Self::new(device, config.frames_in_flight)
    }

    /// Wait for the current slot, release its previous graph and return the
    /// fence the new frame's submission must signal.
    pub fn begin_frame(
        &mut self,
        device: &dyn Device,
        allocator: &dyn MemoryAllocator,
    ) -> GraphResult<FenceHandle> {
        let current = self.current;
        let slot = &mut self.slots[current];
        device
            .wait_fence(slot.fence)
            .map_err(|err| GraphError::device("waiting for frame slot", err))?;
        if let Some(graph) = slot.graph.take() {
            graph.release(device, allocator);
        }
        device
            .reset_fence(slot.fence)
            .map_err(|err| GraphError::device("resetting frame fence", err))?;
        let fence = slot.fence;
        log::trace!("frame {} uses slot {}", self.frame_count, current);
        Ok(fence)
    }

    /// Hand the submitted graph to the current slot and advance.
    pub fn end_frame(&mut self, graph: CompiledGraph) {
        let slot = &mut self.slots[self.current];
        if slot.graph.replace(graph).is_some() {
            log::warn!("end_frame without begin_frame, slot {} still held a graph", self.current);
        }
        self.current = (self.current + 1) % self.slots.len();
        self.frame_count += 1;
        frame_mark!();
    }

    /// Wait for every slot and release every graph.
    pub fn wait_idle(
        &mut self,
        device: &dyn Device,
        allocator: &dyn MemoryAllocator,
    ) -> GraphResult<()> {
        for slot in &mut self.slots {
            device
                .wait_fence(slot.fence)
                .map_err(|err| GraphError::device("waiting for idle", err))?;
            if let Some(graph) = slot.graph.take() {
                graph.release(device, allocator);
            }
        }
        Ok(())
    }

    /// [`wait_idle`](Self::wait_idle), then destroy the fences.
    pub fn destroy(
        mut self,
        device: &dyn Device,
        allocator: &dyn MemoryAllocator,
    ) -> GraphResult<()> {
        self.wait_idle(device, allocator)?;
        for slot in self.slots.drain(..) {
            device.destroy_fence(slot.fence);
        }
        Ok(())
    }

    pub fn frames_in_flight(&self) -> usize {
        self.slots.len()
    }

    pub fn current_slot(&self) -> usize {
        self.current
    }

    /// Frames ended so far.
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Graph currently held by `slot`.
    pub fn graph(&self, slot: usize) -> Option<&CompiledGraph> {
        self.slots.get(slot).and_then(|slot| slot.graph.as_ref())
    }
}

static_assertions::assert_impl_all!(FramesInFlight: Send);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::dummy::{CommandRecorder, DummyDevice};
    use crate::backend::{BufferDescriptor, BufferUsage, SubmitInfo};
    use crate::render_graph::{PassBindings, PassKind, RenderGraphBuilder};

    fn frame_graph(device: &DummyDevice) -> CompiledGraph {
        let mut builder = RenderGraphBuilder::new();
        let buffer =
            builder.create_storage_buffer(BufferDescriptor::new(1024, BufferUsage::STORAGE));
        let mut bindings = PassBindings::new();
        bindings.storage_buffer_write("data", buffer);
        builder.add_pass("fill", &bindings, PassKind::Compute, |ctx| {
            ctx.commands().dispatch(4, 1, 1);
        });
        builder.compile(device, device).unwrap()
    }

    #[test]
    fn test_slots_rotate_and_release() {
        let device = DummyDevice::new();
        let mut frames = FramesInFlight::new(&device, 2).unwrap();
        let mut recorder = CommandRecorder::new();

        for frame in 0..5 {
            let fence = frames.begin_frame(&device, &device).unwrap();
            let graph = frame_graph(&device);
            graph
                .execute(&mut recorder, &SubmitInfo::new().with_fence(fence))
                .unwrap();
            frames.end_frame(graph);
            assert_eq!(frames.current_slot(), (frame + 1) % 2);
            // Never more than one graph per slot alive.
            assert!(device.live_allocations() <= 2);
        }
        assert_eq!(frames.frame_count(), 5);
        assert_eq!(device.live_allocations(), 2);

        frames.destroy(&device, &device).unwrap();
        assert_eq!(device.live_allocations(), 0);
        assert_eq!(device.live_buffers(), 0);
        assert_eq!(device.live_fences(), 0);
    }

    #[test]
    fn test_zero_frames_clamps_to_one() {
        let device = DummyDevice::new();
        let frames = FramesInFlight::new(&device, 0).unwrap();
        assert_eq!(frames.frames_in_flight(), 1);
    }

    #[test]
    fn test_from_config() {
        let device = DummyDevice::new();
        let config = RenderGraphConfig::default().with_frames_in_flight(3);
        let frames = FramesInFlight::from_config(&device, &config).unwrap();
        assert_eq!(frames.frames_in_flight(), 3);
        assert!(frames.graph(0).is_none());
    }
}
