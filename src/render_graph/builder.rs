//! Render graph construction and compilation.
//!
//! The builder is the mutable half of the render graph: rendering code
//! registers external resources, declares transients and appends passes in
//! the order they must run. [`RenderGraphBuilder::compile`] then creates the
//! transients, packs them into one memory block and resolves every pass
//! into a [`CompiledGraph`].
//!
//! Passes are never reordered. State transitions are computed while passes
//! are added, from the state the previous user of each resource left it in.
//!
//! Mistakes in the description (unregistered references, wrong binding
//! kinds, conflicting states) are logged when the pass is added and make
//! [`compile`](RenderGraphBuilder::compile) fail with the first of them.

use std::collections::HashMap;

use crate::backend::*;
use crate::config::RenderGraphConfig;
use crate::error::{GraphError, GraphResult};
use crate::{profile_plot, profile_scope};

use super::aliasing::{pack, pack_unaliased, TransientInterval};
use super::compiled::{CompiledGraph, CompiledPass, GraphStats, OwnedResources};
use super::pass::*;
use super::resource::*;
use super::state::{KnownState, ResourceState, StateTransition};
use super::tracker::{DependencyTracker, ExternalMapping};

/// An image that exists outside the graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalImage {
    pub image: ImageHandle,
    /// View used for attachments and shader bindings of the image itself.
    pub view: Option<ImageViewHandle>,
    pub descriptor: ImageDescriptor,
}

impl ExternalImage {
    pub fn new(image: ImageHandle, descriptor: ImageDescriptor) -> Self {
        Self {
            image,
            view: None,
            descriptor,
        }
    }

    pub fn with_view(mut self, view: ImageViewHandle) -> Self {
        self.view = Some(view);
        self
    }
}

/// A buffer that exists outside the graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalBuffer {
    pub buffer: BufferHandle,
    pub descriptor: BufferDescriptor,
}

impl ExternalBuffer {
    pub fn new(buffer: BufferHandle, descriptor: BufferDescriptor) -> Self {
        Self { buffer, descriptor }
    }
}

#[derive(Debug, Clone)]
enum Origin<H> {
    Transient,
    External { handle: H, output: ResourceState },
}

#[derive(Debug, Clone)]
enum ResourceEntry {
    Image {
        descriptor: ImageDescriptor,
        view: Option<ImageViewHandle>,
        origin: Origin<ImageHandle>,
    },
    View {
        image: ImageRef,
        descriptor: ImageViewDescriptor,
    },
    Buffer {
        descriptor: BufferDescriptor,
        origin: Origin<BufferHandle>,
    },
    AccelerationStructure {
        handle: AccelerationStructureHandle,
    },
    Framebuffer,
    ResourceGroup,
}

impl ResourceEntry {
    fn tag(&self) -> ResourceTag {
        match self {
            Self::Image { .. } => ResourceTag::Image,
            Self::View { .. } => ResourceTag::ImageView,
            Self::Buffer { .. } => ResourceTag::Buffer,
            Self::AccelerationStructure { .. } => ResourceTag::AccelerationStructure,
            Self::Framebuffer => ResourceTag::Framebuffer,
            Self::ResourceGroup => ResourceTag::ResourceGroup,
        }
    }
}

struct PassNode {
    name: String,
    kind: PassKind,
    bindings: Vec<ResourceBinding>,
    transitions: Vec<StateTransition>,
    framebuffer: Option<FramebufferRef>,
    resource_group: Option<ResourceGroupRef>,
    callback: PassCallback,
}

/// Mutable construction phase of a render graph.
///
/// A builder is meant to live for one frame: build, compile, drop.
/// References it hands out carry its [`GraphId`]; any other builder treats
/// them as dangling.
pub struct RenderGraphBuilder {
    id: GraphId,
    config: RenderGraphConfig,
    /// Indexed by [`ResourceRef::index`].
    resources: Vec<ResourceEntry>,
    states: HashMap<ResourceRef, KnownState>,
    tracker: DependencyTracker,
    passes: Vec<PassNode>,
    errors: Vec<GraphError>,
}

impl Default for RenderGraphBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RenderGraphBuilder {
    pub fn new() -> Self {
        Self::with_config(RenderGraphConfig::default())
    }

    pub fn with_config(config: RenderGraphConfig) -> Self {
        Self {
            id: GraphId::next(),
            config,
            resources: Vec::new(),
            states: HashMap::new(),
            tracker: DependencyTracker::new(),
            passes: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn id(&self) -> GraphId {
        self.id
    }

    pub fn config(&self) -> &RenderGraphConfig {
        &self.config
    }

    pub fn tracker(&self) -> &DependencyTracker {
        &self.tracker
    }

    pub fn pass_count(&self) -> usize {
        self.passes.len()
    }

    /// Transitions computed so far for the pass behind `pass`.
    pub fn pass_transitions(&self, pass: PassHandle) -> &[StateTransition] {
        self.passes
            .get(pass.index())
            .map(|node| node.transitions.as_slice())
            .unwrap_or(&[])
    }

    /// Reference an external path was registered under.
    pub fn external(&self, path: &str) -> Option<ResourceRef> {
        self.tracker.external(path)
    }

    fn push_entry(&mut self, entry: ResourceEntry) -> u32 {
        let index = self.resources.len() as u32;
        self.resources.push(entry);
        index
    }

    fn entry(&self, resource: ResourceRef) -> Option<&ResourceEntry> {
        if resource.owner() != self.id {
            return None;
        }
        let tag = resource.tag()?;
        self.resources
            .get(resource.index() as usize)
            .filter(|entry| entry.tag() == tag)
    }

    fn defer(&mut self, err: GraphError) {
        log::error!("{err}");
        self.errors.push(err);
    }

    // -- External resources --------------------------------------------------

    /// Register an image that lives outside the graph under a logical `path`.
    ///
    /// The graph brings it from `input_state` into whatever its passes need
    /// and leaves it in `output_state`. Registering the same path again with
    /// the same image and states returns the same reference.
    pub fn register_external_image(
        &mut self,
        path: &str,
        image: ExternalImage,
        input_state: ResourceState,
        output_state: ResourceState,
    ) -> GraphResult<ImageRef> {
        let mapping = ExternalMapping {
            target: TransitionTarget::Image(image.image),
            input_state,
            output_state,
        };
        let id = self.id;
        let resources = &mut self.resources;
        let resource = self.tracker.map_external(path, mapping, || {
            let index = resources.len() as u32;
            resources.push(ResourceEntry::Image {
                descriptor: image.descriptor,
                view: image.view,
                origin: Origin::External {
                    handle: image.image,
                    output: output_state,
                },
            });
            ImageRef::new(id, index).raw()
        })?;
        self.states
            .entry(resource)
            .or_insert_with(|| KnownState::initial(input_state));
        typed(path, resource)
    }

    /// Register a buffer that lives outside the graph under a logical `path`.
    pub fn register_external_buffer(
        &mut self,
        path: &str,
        buffer: ExternalBuffer,
        input_state: ResourceState,
        output_state: ResourceState,
    ) -> GraphResult<BufferRef> {
        let mapping = ExternalMapping {
            target: TransitionTarget::Buffer(buffer.buffer),
            input_state,
            output_state,
        };
        let id = self.id;
        let resources = &mut self.resources;
        let resource = self.tracker.map_external(path, mapping, || {
            let index = resources.len() as u32;
            resources.push(ResourceEntry::Buffer {
                descriptor: buffer.descriptor,
                origin: Origin::External {
                    handle: buffer.buffer,
                    output: output_state,
                },
            });
            BufferRef::new(id, index).raw()
        })?;
        self.states
            .entry(resource)
            .or_insert_with(|| KnownState::initial(input_state));
        typed(path, resource)
    }

    /// Register a built acceleration structure. It stays in
    /// [`ResourceState::AccelerationStructureRead`] for the whole graph.
    pub fn register_external_acceleration_structure(
        &mut self,
        path: &str,
        handle: AccelerationStructureHandle,
    ) -> GraphResult<AccelerationStructureRef> {
        let mapping = ExternalMapping {
            target: TransitionTarget::AccelerationStructure(handle),
            input_state: ResourceState::AccelerationStructureRead,
            output_state: ResourceState::AccelerationStructureRead,
        };
        let id = self.id;
        let resources = &mut self.resources;
        let resource = self.tracker.map_external(path, mapping, || {
            let index = resources.len() as u32;
            resources.push(ResourceEntry::AccelerationStructure { handle });
            AccelerationStructureRef::new(id, index).raw()
        })?;
        self.states
            .entry(resource)
            .or_insert_with(|| KnownState::initial(ResourceState::AccelerationStructureRead));
        typed(path, resource)
    }

    // -- Transient resources -------------------------------------------------

    /// Declare an image created and destroyed within this graph.
    ///
    /// Nothing is allocated until [`compile`](Self::compile).
    pub fn create_transient_image(&mut self, descriptor: ImageDescriptor) -> ImageRef {
        let index = self.push_entry(ResourceEntry::Image {
            descriptor,
            view: None,
            origin: Origin::Transient,
        });
        let image = ImageRef::new(self.id, index);
        self.states
            .insert(image.raw(), KnownState::initial(ResourceState::Undefined));
        image
    }

    /// Transient image that will be sampled.
    pub fn create_texture(&mut self, mut descriptor: ImageDescriptor) -> TextureRef {
        descriptor.usage |= ImageUsage::SAMPLED;
        TextureRef::wrap(self.create_transient_image(descriptor))
    }

    /// Transient cube image; the descriptor is forced to six layers.
    pub fn create_cubemap(&mut self, mut descriptor: ImageDescriptor) -> CubemapRef {
        descriptor.array_layer_count = 6;
        CubemapRef::wrap(self.create_transient_image(descriptor))
    }

    /// Declare a buffer created and destroyed within this graph.
    pub fn create_transient_buffer(&mut self, descriptor: BufferDescriptor) -> BufferRef {
        let index = self.push_entry(ResourceEntry::Buffer {
            descriptor,
            origin: Origin::Transient,
        });
        let buffer = BufferRef::new(self.id, index);
        self.states
            .insert(buffer.raw(), KnownState::initial(ResourceState::Undefined));
        buffer
    }

    pub fn create_uniform_buffer(&mut self, mut descriptor: BufferDescriptor) -> UniformBufferRef {
        descriptor.usage |= BufferUsage::UNIFORM;
        UniformBufferRef::wrap(self.create_transient_buffer(descriptor))
    }

    pub fn create_storage_buffer(&mut self, mut descriptor: BufferDescriptor) -> StorageBufferRef {
        descriptor.usage |= BufferUsage::STORAGE;
        StorageBufferRef::wrap(self.create_transient_buffer(descriptor))
    }

    /// Declare a view of a transient or external image.
    ///
    /// The view shares its parent's state and lifetime; it is created at
    /// compile time if a pass uses it.
    ///
    /// State is tracked per image, not per mip level or array layer. One
    /// pass cannot read one view of an image and write another view of the
    /// same image: generating a mip chain by sampling mip N and writing mip
    /// N+1 in the same pass fails with [`GraphError::ConflictingUsage`].
    /// Split such work into one pass per level.
    pub fn create_image_view(
        &mut self,
        image: impl Into<ImageRef>,
        descriptor: ImageViewDescriptor,
    ) -> ImageViewRef {
        let index = self.push_entry(ResourceEntry::View {
            image: image.into(),
            descriptor,
        });
        ImageViewRef::new(self.id, index)
    }

    // -- Passes --------------------------------------------------------------

    /// Append a pass.
    ///
    /// Every binding of `params` is recorded in the dependency tracker and
    /// moves its resource's last known state forward; the transitions needed
    /// to reach the states this pass requires are stored with the pass.
    pub fn add_pass<P, F>(
        &mut self,
        name: impl Into<String>,
        params: &P,
        kind: PassKind,
        callback: F,
    ) -> PassHandle
    where
        P: PassParameters + ?Sized,
        F: Fn(&mut PassContext<'_>) + Send + Sync + 'static,
    {
        let name = name.into();
        let index = self.passes.len();
        let bindings = PassBindings::collect(params).into_vec();

        let mut required: Vec<(ResourceRef, ResourceState)> = Vec::new();
        let mut has_attachment = false;
        let mut shader_visible = false;
        for binding in &bindings {
            let key = match self.check_binding(&name, kind, binding) {
                Ok(key) => key,
                Err(err) => {
                    self.defer(err);
                    continue;
                }
            };
            has_attachment |= binding.kind.is_attachment();
            shader_visible |= binding.kind.is_shader_visible();

            let state = binding.kind.required_state();
            match required.iter().find(|(resource, _)| *resource == key) {
                Some(&(_, first)) if first != state => {
                    self.defer(GraphError::ConflictingUsage {
                        pass: name.clone(),
                        resource: key,
                        first,
                        second: state,
                    });
                    continue;
                }
                Some(_) => {}
                None => required.push((key, state)),
            }

            self.tracker
                .declare(index, &name, binding.resource, state.access());
            if key != binding.resource {
                self.tracker.declare(index, &name, key, state.access());
            }
        }

        if kind == PassKind::Raster && !has_attachment {
            self.defer(GraphError::MissingAttachments { pass: name.clone() });
        }

        let mut transitions = Vec::new();
        for (resource, state) in required {
            let known = self
                .states
                .entry(resource)
                .or_insert_with(|| KnownState::initial(ResourceState::Undefined));
            if let Some(transition) = known.transition_to(resource, state) {
                log::debug!(
                    "pass '{}': {} {:?} -> {:?}",
                    name,
                    resource,
                    transition.before,
                    transition.after
                );
                transitions.push(transition);
            }
            known.advance(state);
        }

        let id = self.id;
        let framebuffer = (kind == PassKind::Raster)
            .then(|| FramebufferRef::new(id, self.push_entry(ResourceEntry::Framebuffer)));
        let resource_group = shader_visible
            .then(|| ResourceGroupRef::new(id, self.push_entry(ResourceEntry::ResourceGroup)));

        self.passes.push(PassNode {
            name,
            kind,
            bindings,
            transitions,
            framebuffer,
            resource_group,
            callback: Box::new(callback),
        });
        PassHandle::new(index, framebuffer, resource_group)
    }

    /// Validate one binding and return the reference whose state it uses.
    fn check_binding(
        &self,
        pass: &str,
        kind: PassKind,
        binding: &ResourceBinding,
    ) -> GraphResult<ResourceRef> {
        let invalid = |reason: String| GraphError::InvalidBinding {
            pass: pass.to_string(),
            binding: binding.name.clone(),
            resource: binding.resource,
            reason,
        };
        let dangling = |resource: ResourceRef| GraphError::DanglingReference {
            pass: pass.to_string(),
            resource,
        };

        let entry = self
            .entry(binding.resource)
            .ok_or_else(|| dangling(binding.resource))?;
        let tag = entry.tag();
        if !binding.kind.accepts(tag) {
            return Err(invalid(format!("{:?} cannot be bound as {:?}", tag, binding.kind)));
        }
        if kind == PassKind::Compute && binding.kind.is_attachment() {
            return Err(invalid("attachments require a raster pass".to_string()));
        }

        let key = match entry {
            ResourceEntry::View { image, .. } => {
                self.entry(image.raw())
                    .ok_or_else(|| dangling(image.raw()))?;
                image.raw()
            }
            _ => binding.resource,
        };

        if binding.kind.is_attachment() {
            if let Some(ResourceEntry::Image { descriptor, .. }) = self.entry(key) {
                let depth = descriptor.format.is_depth_stencil();
                let wants_depth = binding.kind != BindingKind::ColorAttachment;
                if depth != wants_depth {
                    return Err(invalid(format!(
                        "format {:?} does not fit a {:?} binding",
                        descriptor.format, binding.kind
                    )));
                }
            }
        }
        Ok(key)
    }

    // -- Compilation ---------------------------------------------------------

    /// Turn the description into an executable graph.
    ///
    /// Creates every used transient, packs them with the aliasing engine,
    /// reserves one block from `allocator` and binds each transient at its
    /// offset, then resolves every pass to backend objects and builds its
    /// framebuffer and resource group.
    ///
    /// Fails with the first description error recorded while adding passes.
    /// On a backend failure everything created so far is destroyed before
    /// the error is returned.
    pub fn compile(
        self,
        device: &dyn Device,
        allocator: &dyn MemoryAllocator,
    ) -> GraphResult<CompiledGraph> {
        profile_scope!("render_graph_compile");

        if let Some(err) = self.errors.first() {
            log::error!(
                "render graph has {} description error(s), first: {err}",
                self.errors.len()
            );
            return Err(err.clone());
        }

        let mut owned = OwnedResources::default();
        match self.compile_into(&mut owned, device, allocator) {
            Ok(graph) => Ok(graph),
            Err(err) => {
                log::error!("render graph compilation failed: {err}");
                owned.destroy(device, allocator);
                Err(err)
            }
        }
    }

    fn compile_into(
        mut self,
        owned: &mut OwnedResources,
        device: &dyn Device,
        allocator: &dyn MemoryAllocator,
    ) -> GraphResult<CompiledGraph> {
        let mut images: HashMap<ResourceRef, ImageHandle> = HashMap::new();
        let mut views: HashMap<ResourceRef, ImageViewHandle> = HashMap::new();
        let mut buffers: HashMap<ResourceRef, BufferHandle> = HashMap::new();
        let mut acceleration_structures = HashMap::new();
        let mut intervals = Vec::new();

        for (index, entry) in self.resources.iter().enumerate() {
            let index = index as u32;
            match entry {
                ResourceEntry::Image {
                    descriptor,
                    view,
                    origin,
                } => {
                    let resource = ImageRef::new(self.id, index).raw();
                    let image = match origin {
                        Origin::External { handle, .. } => {
                            if let Some(view) = view {
                                views.insert(resource, *view);
                            }
                            *handle
                        }
                        Origin::Transient => {
                            let Some((first, last)) = self.tracker.interval(resource) else {
                                log::warn!(
                                    "transient image {resource} {:?} is never used, skipping",
                                    descriptor.label
                                );
                                continue;
                            };
                            let image = device.create_image(descriptor).map_err(|err| {
                                GraphError::device(
                                    format!("creating transient image {resource} {:?}", descriptor.label),
                                    err,
                                )
                            })?;
                            owned.images.push(image);
                            let requirements = device.image_memory_requirements(image);
                            intervals.push(TransientInterval::new(
                                resource,
                                first,
                                last,
                                requirements.size,
                                requirements.alignment.max(self.config.min_alignment),
                            ));
                            image
                        }
                    };
                    images.insert(resource, image);
                }
                ResourceEntry::Buffer { descriptor, origin } => {
                    let resource = BufferRef::new(self.id, index).raw();
                    let buffer = match origin {
                        Origin::External { handle, .. } => *handle,
                        Origin::Transient => {
                            let Some((first, last)) = self.tracker.interval(resource) else {
                                log::warn!(
                                    "transient buffer {resource} {:?} is never used, skipping",
                                    descriptor.label
                                );
                                continue;
                            };
                            let buffer = device.create_buffer(descriptor).map_err(|err| {
                                GraphError::device(
                                    format!("creating transient buffer {resource} {:?}", descriptor.label),
                                    err,
                                )
                            })?;
                            owned.buffers.push(buffer);
                            let requirements = device.buffer_memory_requirements(buffer);
                            intervals.push(TransientInterval::new(
                                resource,
                                first,
                                last,
                                requirements.size,
                                requirements.alignment.max(self.config.min_alignment),
                            ));
                            buffer
                        }
                    };
                    buffers.insert(resource, buffer);
                }
                ResourceEntry::AccelerationStructure { handle } => {
                    acceleration_structures
                        .insert(AccelerationStructureRef::new(self.id, index).raw(), *handle);
                }
                ResourceEntry::View { .. }
                | ResourceEntry::Framebuffer
                | ResourceEntry::ResourceGroup => {}
            }
        }

        let layout = if self.config.aliasing {
            pack(&intervals)?
        } else {
            pack_unaliased(&intervals)?
        };
        if self.config.validate_layout {
            layout.verify()?;
        }
        profile_plot!("transient_bytes", layout.total_size());

        if !layout.is_empty() {
            let allocation = allocator
                .reserve(layout.total_size(), layout.alignment())
                .map_err(|err| {
                    GraphError::device(
                        format!("reserving {} transient bytes", layout.total_size()),
                        err,
                    )
                })?;
            owned.allocation = Some(allocation);

            for node in layout.nodes() {
                let resource = node.interval.resource;
                let bound = if let Some(&image) = images.get(&resource) {
                    allocator.bind_image(image, allocation, node.offset)
                } else if let Some(&buffer) = buffers.get(&resource) {
                    allocator.bind_buffer(buffer, allocation, node.offset)
                } else {
                    continue;
                };
                bound.map_err(|err| {
                    GraphError::device(format!("binding {resource} at offset {}", node.offset), err)
                })?;
            }
        }

        // Default views of transients, then the explicit views passes use.
        for (index, entry) in self.resources.iter().enumerate() {
            let index = index as u32;
            let (image, descriptor, resource) = match entry {
                ResourceEntry::Image {
                    descriptor,
                    origin: Origin::Transient,
                    ..
                } => {
                    let resource = ImageRef::new(self.id, index).raw();
                    (resource, ImageViewDescriptor::full(descriptor), resource)
                }
                ResourceEntry::View { image, descriptor } => (
                    image.raw(),
                    descriptor.clone(),
                    ImageViewRef::new(self.id, index).raw(),
                ),
                _ => continue,
            };
            if !self.tracker.contains(resource) {
                continue;
            }
            let Some(&handle) = images.get(&image) else {
                continue;
            };
            let view = device
                .create_image_view(handle, &descriptor)
                .map_err(|err| GraphError::device(format!("creating view of {image}"), err))?;
            owned.views.push(view);
            views.insert(resource, view);
        }

        let resolve = |transition: &StateTransition| -> GraphResult<ResourceTransition> {
            let resource = transition.resource;
            let target = match resource.tag() {
                Some(ResourceTag::Image) => images.get(&resource).map(|&h| TransitionTarget::Image(h)),
                Some(ResourceTag::Buffer) => {
                    buffers.get(&resource).map(|&h| TransitionTarget::Buffer(h))
                }
                Some(ResourceTag::AccelerationStructure) => acceleration_structures
                    .get(&resource)
                    .map(|&h| TransitionTarget::AccelerationStructure(h)),
                _ => None,
            };
            let target = target.ok_or_else(|| GraphError::DanglingReference {
                pass: "<transition>".to_string(),
                resource,
            })?;
            Ok(ResourceTransition {
                resource,
                target,
                before: transition.before,
                after: transition.after,
            })
        };

        let mut framebuffers = HashMap::new();
        let mut resource_groups = HashMap::new();
        let mut passes = Vec::with_capacity(self.passes.len());
        let mut transition_count = 0;

        for node in std::mem::take(&mut self.passes) {
            let unresolved = |binding: &ResourceBinding, what: &str| GraphError::InvalidBinding {
                pass: node.name.clone(),
                binding: binding.name.clone(),
                resource: binding.resource,
                reason: format!("no {what} to bind"),
            };

            let mut resources = PassResources::default();
            let mut colors = Vec::new();
            let mut depth = None;
            let mut extent: Option<Extent3d> = None;
            let mut entries = Vec::new();

            for binding in &node.bindings {
                let resource = binding.resource;
                let image_key = self.image_of(resource);
                if let Some(&image) = image_key.and_then(|key| images.get(&key)) {
                    resources.images.insert(resource, image);
                }
                if let Some(&view) = views.get(&resource) {
                    resources.views.insert(resource, view);
                }
                if let Some(&buffer) = buffers.get(&resource) {
                    resources.buffers.insert(resource, buffer);
                }
                if let Some(&tlas) = acceleration_structures.get(&resource) {
                    resources.acceleration_structures.insert(resource, tlas);
                }

                if binding.kind.is_attachment() {
                    let view = resources
                        .view(resource)
                        .ok_or_else(|| unresolved(binding, "image view"))?;
                    let size = self
                        .attachment_extent(resource)
                        .ok_or_else(|| unresolved(binding, "image"))?;
                    match extent {
                        Some(expected) if expected != size => {
                            return Err(GraphError::InvalidBinding {
                                pass: node.name.clone(),
                                binding: binding.name.clone(),
                                resource,
                                reason: format!(
                                    "attachment is {}x{}, other attachments are {}x{}",
                                    size.width, size.height, expected.width, expected.height
                                ),
                            });
                        }
                        _ => extent = Some(size),
                    }
                    if binding.kind == BindingKind::ColorAttachment {
                        colors.push(view);
                    } else if depth.replace(view).is_some() {
                        return Err(GraphError::InvalidBinding {
                            pass: node.name.clone(),
                            binding: binding.name.clone(),
                            resource,
                            reason: "a pass has at most one depth/stencil attachment".to_string(),
                        });
                    }
                }

                if binding.kind.is_shader_visible() {
                    let bound = match binding.kind {
                        BindingKind::SampledImage => BoundResource::SampledImage(
                            resources
                                .view(resource)
                                .ok_or_else(|| unresolved(binding, "image view"))?,
                        ),
                        BindingKind::StorageImageRead
                        | BindingKind::StorageImageWrite
                        | BindingKind::StorageImageReadWrite => BoundResource::StorageImage(
                            resources
                                .view(resource)
                                .ok_or_else(|| unresolved(binding, "image view"))?,
                        ),
                        BindingKind::UniformBuffer => BoundResource::UniformBuffer(
                            buffers
                                .get(&resource)
                                .copied()
                                .ok_or_else(|| unresolved(binding, "buffer"))?,
                        ),
                        BindingKind::AccelerationStructure => BoundResource::AccelerationStructure(
                            acceleration_structures
                                .get(&resource)
                                .copied()
                                .ok_or_else(|| unresolved(binding, "acceleration structure"))?,
                        ),
                        _ => BoundResource::StorageBuffer {
                            buffer: buffers
                                .get(&resource)
                                .copied()
                                .ok_or_else(|| unresolved(binding, "buffer"))?,
                            writable: binding.kind.access().is_write(),
                        },
                    };
                    entries.push(ResourceGroupEntry {
                        binding: entries.len() as u32,
                        resource: bound,
                    });
                }
            }

            if let (Some(framebuffer_ref), Some(extent)) = (node.framebuffer, extent) {
                let framebuffer = device
                    .create_framebuffer(&FramebufferDescriptor {
                        label: Some(node.name.clone()),
                        color_attachments: colors,
                        depth_stencil_attachment: depth,
                        extent,
                    })
                    .map_err(|err| {
                        GraphError::device(format!("creating framebuffer for pass '{}'", node.name), err)
                    })?;
                owned.framebuffers.push(framebuffer);
                framebuffers.insert(framebuffer_ref, framebuffer);
                resources.framebuffer = Some(framebuffer);
                resources.extent = Some(extent);
            }

            if let Some(group_ref) = node.resource_group {
                let group = device
                    .create_resource_group(&ResourceGroupLayout {
                        label: Some(node.name.clone()),
                        entries,
                    })
                    .map_err(|err| {
                        GraphError::device(
                            format!("creating resource group for pass '{}'", node.name),
                            err,
                        )
                    })?;
                owned.resource_groups.push(group);
                resource_groups.insert(group_ref, group);
                resources.resource_group = Some(group);
            }

            let transitions = node
                .transitions
                .iter()
                .map(&resolve)
                .collect::<GraphResult<Vec<_>>>()?;
            transition_count += transitions.len();

            passes.push(CompiledPass {
                name: node.name,
                kind: node.kind,
                transitions,
                resources,
                callback: node.callback,
            });
        }

        let mut final_transitions = Vec::new();
        for (index, entry) in self.resources.iter().enumerate() {
            let index = index as u32;
            let (resource, output) = match entry {
                ResourceEntry::Image {
                    origin: Origin::External { output, .. },
                    ..
                } => (ImageRef::new(self.id, index).raw(), *output),
                ResourceEntry::Buffer {
                    origin: Origin::External { output, .. },
                    ..
                } => (BufferRef::new(self.id, index).raw(), *output),
                _ => continue,
            };
            let Some(known) = self.states.get(&resource) else {
                continue;
            };
            if known.state != output {
                final_transitions.push(resolve(&StateTransition {
                    resource,
                    before: known.state,
                    after: output,
                })?);
            }
        }
        transition_count += final_transitions.len();

        let stats = GraphStats {
            pass_count: passes.len(),
            transition_count,
            transient_count: intervals.len(),
            transient_bytes: layout.total_size(),
            unaliased_bytes: layout.unaliased_size(),
            bucket_count: layout.buckets().len(),
        };
        log::info!(
            "compiled render graph: {} passes, {} transitions, {} transients in {} bytes ({} unaliased, {} buckets)",
            stats.pass_count,
            stats.transition_count,
            stats.transient_count,
            stats.transient_bytes,
            stats.unaliased_bytes,
            stats.bucket_count
        );

        Ok(CompiledGraph {
            passes,
            final_transitions,
            layout,
            images,
            buffers,
            acceleration_structures,
            framebuffers,
            resource_groups,
            owned: std::mem::take(owned),
            stats,
            debug_labels: self.config.debug_labels,
        })
    }

    /// Image an image or image-view reference resolves to.
    fn image_of(&self, resource: ResourceRef) -> Option<ResourceRef> {
        match self.entry(resource)? {
            ResourceEntry::Image { .. } => Some(resource),
            ResourceEntry::View { image, .. } => Some(image.raw()),
            _ => None,
        }
    }

    /// Render area covered by an attachment, honoring a view's base mip.
    fn attachment_extent(&self, resource: ResourceRef) -> Option<Extent3d> {
        let (image, base_mip) = match self.entry(resource)? {
            ResourceEntry::View { image, descriptor } => (image.raw(), descriptor.base_mip_level),
            ResourceEntry::Image { .. } => (resource, 0),
            _ => return None,
        };
        match self.entry(image)? {
            ResourceEntry::Image { descriptor, .. } => Some(Extent3d::new_2d(
                (descriptor.size.width >> base_mip).max(1),
                (descriptor.size.height >> base_mip).max(1),
            )),
            _ => None,
        }
    }
}

fn typed<T>(path: &str, resource: ResourceRef) -> GraphResult<T>
where
    T: TryFrom<ResourceRef, Error = TagMismatch>,
{
    T::try_from(resource).map_err(|mismatch| {
        let err = GraphError::ExternalMappingMismatch {
            path: path.to_string(),
            existing: format!("{:?}", mismatch.resource),
            requested: format!("{:?}", mismatch.expected),
        };
        log::error!("{err}");
        err
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::dummy::DummyDevice;

    fn color_desc(width: u32, height: u32) -> ImageDescriptor {
        ImageDescriptor::new_2d(
            width,
            height,
            Format::Rgba16Float,
            ImageUsage::RENDER_ATTACHMENT | ImageUsage::SAMPLED,
        )
    }

    fn depth_desc(width: u32, height: u32) -> ImageDescriptor {
        ImageDescriptor::new_2d(
            width,
            height,
            Format::Depth32Float,
            ImageUsage::RENDER_ATTACHMENT,
        )
    }

    #[test]
    fn test_transitions_follow_previous_pass() {
        let mut builder = RenderGraphBuilder::new();
        let image = builder.create_transient_image(color_desc(64, 64));

        let mut write = PassBindings::new();
        write.color_attachment("color", image);
        let mut read = PassBindings::new();
        read.sampled("color", image);

        let first = builder.add_pass("draw", &write, PassKind::Raster, |_| {});
        let second = builder.add_pass("sample", &read, PassKind::Compute, |_| {});

        assert_eq!(
            builder.pass_transitions(first),
            &[StateTransition {
                resource: image.raw(),
                before: ResourceState::Undefined,
                after: ResourceState::ColorAttachment,
            }]
        );
        assert_eq!(
            builder.pass_transitions(second),
            &[StateTransition {
                resource: image.raw(),
                before: ResourceState::ColorAttachment,
                after: ResourceState::ShaderRead,
            }]
        );
    }

    #[test]
    fn test_view_shares_parent_state() {
        let mut builder = RenderGraphBuilder::new();
        let image = builder.create_transient_image(color_desc(64, 64).with_mip_levels(2));
        let mip1 = builder.create_image_view(image, ImageViewDescriptor::default().with_mip_range(1, 1));

        let mut write = PassBindings::new();
        write.color_attachment("color", image);
        builder.add_pass("draw", &write, PassKind::Raster, |_| {});

        let mut read = PassBindings::new();
        read.sampled("mip1", mip1);
        let pass = builder.add_pass("sample", &read, PassKind::Compute, |_| {});

        let transitions = builder.pass_transitions(pass);
        assert_eq!(transitions.len(), 1);
        assert_eq!(transitions[0].resource, image.raw());
        assert_eq!(transitions[0].before, ResourceState::ColorAttachment);
        assert_eq!(builder.tracker().interval(image.raw()), Some((0, 1)));
        assert!(builder.tracker().contains(mip1.raw()));
    }

    #[test]
    fn test_views_of_one_image_share_state_within_a_pass() {
        let mut builder = RenderGraphBuilder::new();
        let image = builder.create_transient_image(
            ImageDescriptor::new_2d(
                64,
                64,
                Format::Rgba8Unorm,
                ImageUsage::STORAGE | ImageUsage::SAMPLED,
            )
            .with_mip_levels(2),
        );
        let mip0 = builder.create_image_view(image, ImageViewDescriptor::default().with_mip_range(0, 1));
        let mip1 = builder.create_image_view(image, ImageViewDescriptor::default().with_mip_range(1, 1));

        let mut seed = PassBindings::new();
        seed.storage_image_write("mip0", mip0);
        builder.add_pass("seed", &seed, PassKind::Compute, |_| {});

        let mut downsample = PassBindings::new();
        downsample.sampled("src", mip0).storage_image_write("dst", mip1);
        builder.add_pass("downsample", &downsample, PassKind::Compute, |_| {});

        let device = DummyDevice::new();
        assert!(matches!(
            builder.compile(&device, &device),
            Err(GraphError::ConflictingUsage { pass, resource, .. })
                if pass == "downsample" && resource == image.raw()
        ));
    }

    #[test]
    fn test_texture_and_cubemap_descriptors() {
        let device = DummyDevice::new();
        let mut builder = RenderGraphBuilder::new();
        let texture = builder.create_texture(ImageDescriptor::new_2d(
            32,
            32,
            Format::Rgba8Unorm,
            ImageUsage::RENDER_ATTACHMENT,
        ));
        let cubemap = builder.create_cubemap(ImageDescriptor::new_2d(
            16,
            16,
            Format::Rgba16Float,
            ImageUsage::STORAGE,
        ));
        let face = builder.create_image_view(
            cubemap,
            ImageViewDescriptor::default().with_layer_range(2, 1),
        );

        let mut draw = PassBindings::new();
        draw.color_attachment("color", texture);
        builder.add_pass("draw", &draw, PassKind::Raster, |_| {});
        let mut bake = PassBindings::new();
        bake.sampled("source", texture).storage_image_write("face", face);
        let pass = builder.add_pass("bake", &bake, PassKind::Compute, |_| {});
        assert_eq!(builder.pass_transitions(pass)[1].resource, cubemap.raw());

        let graph = builder.compile(&device, &device).unwrap();
        let texture_desc = device.image_descriptor(graph.image(texture).unwrap()).unwrap();
        assert!(texture_desc.usage.contains(ImageUsage::SAMPLED));
        let cube_desc = device.image_descriptor(graph.image(cubemap).unwrap()).unwrap();
        assert_eq!(cube_desc.array_layer_count, 6);
        assert!(cube_desc.is_cube());

        let resources = graph.passes()[1].resources();
        assert!(resources.view(face).is_some());
        assert_eq!(resources.image(face), graph.image(cubemap));
        graph.release(&device, &device);
    }

    #[test]
    fn test_read_only_depth_after_depth_write() {
        let mut builder = RenderGraphBuilder::new();
        let depth = builder.create_transient_image(depth_desc(64, 64));
        let color = builder.create_transient_image(color_desc(64, 64));

        let mut prepass = PassBindings::new();
        prepass.depth_stencil_attachment("depth", depth);
        builder.add_pass("depth_prepass", &prepass, PassKind::Raster, |_| {});

        let mut shading = PassBindings::new();
        shading
            .color_attachment("color", color)
            .depth_stencil_read_only("depth", depth);
        let pass = builder.add_pass("shading", &shading, PassKind::Raster, |_| {});

        assert_eq!(
            builder.pass_transitions(pass)[1],
            StateTransition {
                resource: depth.raw(),
                before: ResourceState::DepthStencilAttachment,
                after: ResourceState::DepthStencilReadOnly,
            }
        );
    }

    #[test]
    fn test_conflicting_usage_fails_compile() {
        let device = DummyDevice::new();
        let mut builder = RenderGraphBuilder::new();
        let image = builder.create_transient_image(color_desc(64, 64));
        let mut bindings = PassBindings::new();
        bindings.color_attachment("out", image).sampled("in", image);
        builder.add_pass("feedback", &bindings, PassKind::Raster, |_| {});

        let err = builder.compile(&device, &device).unwrap_err();
        assert!(matches!(err, GraphError::ConflictingUsage { ref pass, .. } if pass == "feedback"));
    }

    #[test]
    fn test_wrong_tag_is_invalid_binding() {
        let device = DummyDevice::new();
        let mut builder = RenderGraphBuilder::new();
        let buffer = builder.create_transient_buffer(BufferDescriptor::new(64, BufferUsage::STORAGE));
        let mut bindings = PassBindings::new();
        bindings.sampled("not_an_image", buffer);
        builder.add_pass("bad", &bindings, PassKind::Compute, |_| {});

        assert!(matches!(
            builder.compile(&device, &device),
            Err(GraphError::InvalidBinding { .. })
        ));
    }

    #[test]
    fn test_attachment_on_compute_pass_is_rejected() {
        let device = DummyDevice::new();
        let mut builder = RenderGraphBuilder::new();
        let image = builder.create_transient_image(color_desc(8, 8));
        let mut bindings = PassBindings::new();
        bindings.color_attachment("color", image);
        builder.add_pass("compute", &bindings, PassKind::Compute, |_| {});
        assert!(matches!(
            builder.compile(&device, &device),
            Err(GraphError::InvalidBinding { .. })
        ));
    }

    #[test]
    fn test_depth_format_checked() {
        let device = DummyDevice::new();
        let mut builder = RenderGraphBuilder::new();
        let color = builder.create_transient_image(color_desc(8, 8));
        let mut bindings = PassBindings::new();
        bindings.depth_stencil_attachment("depth", color);
        builder.add_pass("draw", &bindings, PassKind::Raster, |_| {});
        assert!(matches!(
            builder.compile(&device, &device),
            Err(GraphError::InvalidBinding { .. })
        ));
    }

    #[test]
    fn test_raster_pass_without_attachments() {
        let device = DummyDevice::new();
        let mut builder = RenderGraphBuilder::new();
        builder.add_pass("empty", &PassBindings::new(), PassKind::Raster, |_| {});
        assert_eq!(
            builder.compile(&device, &device).unwrap_err(),
            GraphError::MissingAttachments {
                pass: "empty".to_string()
            }
        );
    }

    #[test]
    fn test_mismatched_attachment_extents() {
        let device = DummyDevice::new();
        let mut builder = RenderGraphBuilder::new();
        let color = builder.create_transient_image(color_desc(64, 64));
        let depth = builder.create_transient_image(depth_desc(32, 32));
        let mut bindings = PassBindings::new();
        bindings
            .color_attachment("color", color)
            .depth_stencil_attachment("depth", depth);
        builder.add_pass("draw", &bindings, PassKind::Raster, |_| {});

        assert!(matches!(
            builder.compile(&device, &device),
            Err(GraphError::InvalidBinding { ref binding, .. }) if binding == "depth"
        ));
        assert_eq!(device.live_images(), 0);
        assert_eq!(device.live_allocations(), 0);
    }

    #[test]
    fn test_unused_transient_is_skipped() {
        let device = DummyDevice::new();
        let mut builder = RenderGraphBuilder::new();
        builder.create_transient_image(color_desc(64, 64));
        let used = builder.create_storage_buffer(BufferDescriptor::new(256, BufferUsage::empty()));
        let mut bindings = PassBindings::new();
        bindings.storage_buffer_write("data", used);
        builder.add_pass("fill", &bindings, PassKind::Compute, |_| {});

        let graph = builder.compile(&device, &device).unwrap();
        assert_eq!(graph.stats().transient_count, 1);
        assert_eq!(device.live_images(), 0);
        assert_eq!(device.live_buffers(), 1);
        graph.release(&device, &device);
        assert_eq!(device.live_buffers(), 0);
    }

    #[test]
    fn test_external_re_registration() {
        let mut builder = RenderGraphBuilder::new();
        let external = ExternalImage::new(ImageHandle::from_raw(100), color_desc(16, 16));
        let a = builder
            .register_external_image(
                "swapchain",
                external.clone(),
                ResourceState::Undefined,
                ResourceState::Present,
            )
            .unwrap();
        let b = builder
            .register_external_image(
                "swapchain",
                external.clone(),
                ResourceState::Undefined,
                ResourceState::Present,
            )
            .unwrap();
        assert_eq!(a, b);
        assert_eq!(builder.external("swapchain"), Some(a.raw()));

        let err = builder
            .register_external_image(
                "swapchain",
                external,
                ResourceState::Undefined,
                ResourceState::ShaderRead,
            )
            .unwrap_err();
        assert!(matches!(err, GraphError::ExternalMappingMismatch { .. }));
    }

    #[test]
    fn test_compile_failure_cleans_up() {
        let device = DummyDevice::new();
        device.fail_image_creation_at(1);
        let mut builder = RenderGraphBuilder::new();
        let a = builder.create_transient_image(color_desc(16, 16));
        let b = builder.create_transient_image(color_desc(16, 16));
        let mut bindings = PassBindings::new();
        bindings.color_attachment("a", a).color_attachment("b", b);
        builder.add_pass("mrt", &bindings, PassKind::Raster, |_| {});

        let err = builder.compile(&device, &device).unwrap_err();
        assert!(matches!(err, GraphError::Device { .. }));
        assert_eq!(device.live_images(), 0);
        assert_eq!(device.live_allocations(), 0);
    }

    #[test]
    fn test_reserve_failure_is_device_error() {
        let device = DummyDevice::new();
        device.fail_reservations(true);
        let mut builder = RenderGraphBuilder::new();
        let image = builder.create_transient_image(color_desc(16, 16));
        let mut bindings = PassBindings::new();
        bindings.color_attachment("color", image);
        builder.add_pass("draw", &bindings, PassKind::Raster, |_| {});

        assert!(matches!(
            builder.compile(&device, &device),
            Err(GraphError::Device {
                source: DeviceError::OutOfMemory,
                ..
            })
        ));
        assert_eq!(device.live_images(), 0);
    }

    #[test]
    fn test_transients_past_address_space_fail_compile() {
        let device = DummyDevice::new();
        let mut builder = RenderGraphBuilder::new();
        let half = u64::MAX / 2 + 1;
        let input = builder.create_storage_buffer(BufferDescriptor::new(half, BufferUsage::empty()));
        let output = builder.create_storage_buffer(BufferDescriptor::new(half, BufferUsage::empty()));
        let mut bindings = PassBindings::new();
        bindings
            .storage_buffer_read("input", input)
            .storage_buffer_write("output", output);
        builder.add_pass("reduce", &bindings, PassKind::Compute, |_| {});

        assert!(matches!(
            builder.compile(&device, &device),
            Err(GraphError::LayoutOverflow { size, .. }) if size == half
        ));
        assert_eq!(device.live_buffers(), 0);
        assert_eq!(device.live_allocations(), 0);
    }
}
