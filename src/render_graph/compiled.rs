//! Compiled render graph: the executable result of [`RenderGraphBuilder::compile`].
//!
//! [`RenderGraphBuilder::compile`]: super::RenderGraphBuilder::compile

use std::collections::HashMap;
use std::fmt;

use crate::backend::*;
use crate::error::{GraphError, GraphResult};
use crate::{profile_scope, profile_scope_dynamic};

use super::aliasing::PackedLayout;
use super::pass::{PassCallback, PassContext, PassKind, PassResources};
use super::resource::{
    AccelerationStructureRef, BufferRef, FramebufferRef, ImageRef, ResourceGroupRef, ResourceRef,
};

/// Backend objects a compiled graph created and must destroy.
#[derive(Debug, Default)]
pub(crate) struct OwnedResources {
    pub images: Vec<ImageHandle>,
    pub views: Vec<ImageViewHandle>,
    pub buffers: Vec<BufferHandle>,
    pub framebuffers: Vec<FramebufferHandle>,
    pub resource_groups: Vec<ResourceGroupHandle>,
    pub allocation: Option<AllocationHandle>,
}

impl OwnedResources {
    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
            && self.views.is_empty()
            && self.buffers.is_empty()
            && self.framebuffers.is_empty()
            && self.resource_groups.is_empty()
            && self.allocation.is_none()
    }

    /// Destroy everything, dependents first.
    pub fn destroy(&mut self, device: &dyn Device, allocator: &dyn MemoryAllocator) {
        for group in self.resource_groups.drain(..) {
            device.destroy_resource_group(group);
        }
        for framebuffer in self.framebuffers.drain(..) {
            device.destroy_framebuffer(framebuffer);
        }
        for view in self.views.drain(..) {
            device.destroy_image_view(view);
        }
        for image in self.images.drain(..) {
            device.destroy_image(image);
        }
        for buffer in self.buffers.drain(..) {
            device.destroy_buffer(buffer);
        }
        if let Some(allocation) = self.allocation.take() {
            allocator.release(allocation);
        }
    }
}

/// A pass bound to concrete resources, with the transitions it needs.
pub struct CompiledPass {
    pub(crate) name: String,
    pub(crate) kind: PassKind,
    pub(crate) transitions: Vec<ResourceTransition>,
    pub(crate) resources: PassResources,
    pub(crate) callback: PassCallback,
}

impl CompiledPass {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> PassKind {
        self.kind
    }

    /// Transitions emitted before the pass body, in resource declaration order.
    pub fn transitions(&self) -> &[ResourceTransition] {
        &self.transitions
    }

    pub fn resources(&self) -> &PassResources {
        &self.resources
    }
}

impl fmt::Debug for CompiledPass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledPass")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("transitions", &self.transitions)
            .field("resources", &self.resources)
            .finish_non_exhaustive()
    }
}

/// Summary numbers of a compiled graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GraphStats {
    pub pass_count: usize,
    /// Transitions before passes plus final transitions.
    pub transition_count: usize,
    /// Transients actually created (unused ones are skipped).
    pub transient_count: usize,
    /// Size of the reserved transient block.
    pub transient_bytes: u64,
    /// Sum of transient sizes, what the block would need without aliasing.
    pub unaliased_bytes: u64,
    pub bucket_count: usize,
}

/// Immutable, executable render graph.
///
/// Executing the same compiled graph again is valid only while every
/// external resource is still in the input state it was registered with;
/// nothing re-checks this at execute time.
///
/// Call [`release`](Self::release) once the backend is done with the graph.
#[derive(Debug)]
pub struct CompiledGraph {
    pub(crate) passes: Vec<CompiledPass>,
    pub(crate) final_transitions: Vec<ResourceTransition>,
    pub(crate) layout: PackedLayout,
    pub(crate) images: HashMap<ResourceRef, ImageHandle>,
    pub(crate) buffers: HashMap<ResourceRef, BufferHandle>,
    pub(crate) acceleration_structures: HashMap<ResourceRef, AccelerationStructureHandle>,
    pub(crate) framebuffers: HashMap<FramebufferRef, FramebufferHandle>,
    pub(crate) resource_groups: HashMap<ResourceGroupRef, ResourceGroupHandle>,
    pub(crate) owned: OwnedResources,
    pub(crate) stats: GraphStats,
    pub(crate) debug_labels: bool,
}

impl CompiledGraph {
    /// Record every pass into `commands` and submit once.
    ///
    /// For each pass, in declaration order: its transitions, the render pass
    /// begin (raster), its resource group, the callback, the render pass end.
    /// Transitions to the externals' output states follow the last pass.
    pub fn execute(
        &self,
        commands: &mut dyn CommandStream,
        submit: &SubmitInfo,
    ) -> GraphResult<()> {
        profile_scope!("render_graph_execute");

        for pass in &self.passes {
            profile_scope_dynamic!(pass.name.as_str());

            if self.debug_labels {
                commands.push_debug_group(&pass.name);
            }
            if !pass.transitions.is_empty() {
                commands.transition(&pass.transitions);
            }

            let render_pass = match (pass.kind, pass.resources.framebuffer, pass.resources.extent) {
                (PassKind::Raster, Some(framebuffer), Some(extent)) => {
                    commands.begin_render_pass(&RenderPassBegin {
                        label: &pass.name,
                        framebuffer,
                        extent,
                    });
                    true
                }
                _ => false,
            };
            if let Some(group) = pass.resources.resource_group {
                commands.bind_resource_group(0, group);
            }

            let mut ctx = PassContext {
                name: &pass.name,
                kind: pass.kind,
                commands: &mut *commands,
                resources: &pass.resources,
            };
            (pass.callback)(&mut ctx);

            if render_pass {
                commands.end_render_pass();
            }
            if self.debug_labels {
                commands.pop_debug_group();
            }
        }

        if !self.final_transitions.is_empty() {
            commands.transition(&self.final_transitions);
        }

        commands.submit(submit).map_err(|err| {
            log::error!("render graph submission failed: {err}");
            GraphError::Submission(err)
        })
    }

    /// Destroy the transient resources, framebuffers and resource groups,
    /// and release the transient memory block.
    ///
    /// The caller must know the backend has finished with the graph.
    pub fn release(mut self, device: &dyn Device, allocator: &dyn MemoryAllocator) {
        log::debug!(
            "releasing compiled graph ({} passes, {} transient bytes)",
            self.passes.len(),
            self.stats.transient_bytes
        );
        self.owned.destroy(device, allocator);
    }

    pub fn passes(&self) -> &[CompiledPass] {
        &self.passes
    }

    pub fn pass(&self, index: usize) -> Option<&CompiledPass> {
        self.passes.get(index)
    }

    /// Transitions recorded before pass `index`; empty if out of range.
    pub fn transitions_before(&self, index: usize) -> &[ResourceTransition] {
        self.passes
            .get(index)
            .map(|pass| pass.transitions.as_slice())
            .unwrap_or(&[])
    }

    /// Transitions recorded after the last pass.
    pub fn final_transitions(&self) -> &[ResourceTransition] {
        &self.final_transitions
    }

    /// Placement of the transients in the memory block.
    pub fn layout(&self) -> &PackedLayout {
        &self.layout
    }

    pub fn stats(&self) -> GraphStats {
        self.stats
    }

    pub fn image(&self, image: impl Into<ImageRef>) -> Option<ImageHandle> {
        self.images.get(&image.into().raw()).copied()
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

    pub fn framebuffer(&self, framebuffer: FramebufferRef) -> Option<FramebufferHandle> {
        self.framebuffers.get(&framebuffer).copied()
    }

    pub fn resource_group(&self, group: ResourceGroupRef) -> Option<ResourceGroupHandle> {
        self.resource_groups.get(&group).copied()
    }
}

impl Drop for CompiledGraph {
    fn drop(&mut self) {
        if !self.owned.is_empty() {
            log::warn!(
                "compiled graph dropped without release(): {} images, {} buffers and the transient block leak",
                self.owned.images.len(),
                self.owned.buffers.len()
            );
        }
    }
}

static_assertions::assert_impl_all!(CompiledGraph: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::dummy::{Command, CommandRecorder, DummyDevice};
    use crate::render_graph::state::ResourceState;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn empty_graph(passes: Vec<CompiledPass>, debug_labels: bool) -> CompiledGraph {
        CompiledGraph {
            passes,
            final_transitions: Vec::new(),
            layout: PackedLayout::default(),
            images: HashMap::new(),
            buffers: HashMap::new(),
            acceleration_structures: HashMap::new(),
            framebuffers: HashMap::new(),
            resource_groups: HashMap::new(),
            owned: OwnedResources::default(),
            stats: GraphStats::default(),
            debug_labels,
        }
    }

    #[test]
    fn test_execute_invokes_callbacks_in_order_and_submits_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let make_pass = |name: &str, expected: usize| {
            let calls = calls.clone();
            CompiledPass {
                name: name.to_string(),
                kind: PassKind::Compute,
                transitions: Vec::new(),
                resources: PassResources::default(),
                callback: Box::new(move |ctx: &mut PassContext<'_>| {
                    assert_eq!(calls.fetch_add(1, Ordering::SeqCst), expected);
                    ctx.commands().dispatch(1, 1, 1);
                }),
            }
        };
        let graph = empty_graph(vec![make_pass("a", 0), make_pass("b", 1)], false);

        let mut recorder = CommandRecorder::new();
        graph.execute(&mut recorder, &SubmitInfo::new()).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(recorder.submit_count(), 1);
        assert_eq!(recorder.commands().last(), Some(&Command::Submit(SubmitInfo::new())));
    }

    #[test]
    fn test_execute_wraps_passes_in_debug_groups() {
        let pass = CompiledPass {
            name: "blit".to_string(),
            kind: PassKind::Compute,
            transitions: vec![ResourceTransition {
                resource: ImageRef::from_index(0).raw(),
                target: TransitionTarget::Image(ImageHandle::from_raw(9)),
                before: ResourceState::Undefined,
                after: ResourceState::TransferDst,
            }],
            resources: PassResources::default(),
            callback: Box::new(|_| {}),
        };
        let graph = empty_graph(vec![pass], true);
        let mut recorder = CommandRecorder::new();
        graph.execute(&mut recorder, &SubmitInfo::new()).unwrap();
        assert!(matches!(
            recorder.commands(),
            [
                Command::PushDebugGroup(_),
                Command::Transition(_),
                Command::PopDebugGroup,
                Command::Submit(_)
            ]
        ));
    }

    #[test]
    fn test_submission_failure_is_reported() {
        let graph = empty_graph(Vec::new(), false);
        let mut recorder = CommandRecorder::failing_submit();
        assert!(matches!(
            graph.execute(&mut recorder, &SubmitInfo::new()),
            Err(GraphError::Submission(_))
        ));
    }

    #[test]
    fn test_release_destroys_owned_resources() {
        let device = DummyDevice::new();
        let image = device.create_image(&ImageDescriptor::default()).unwrap();
        let allocation = device.reserve(1024, 256).unwrap();
        let mut graph = empty_graph(Vec::new(), false);
        graph.owned.images.push(image);
        graph.owned.allocation = Some(allocation);

        graph.release(&device, &device);
        assert_eq!(device.live_images(), 0);
        assert_eq!(device.live_allocations(), 0);
    }
}
