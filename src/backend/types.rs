//! Common types shared between backends and the render graph.
//!
//! Everything here is plain data: opaque handles minted by a backend, the
//! descriptors the render graph hands to a [`Device`](super::Device), and the
//! resolved commands it records into a [`CommandStream`](super::CommandStream).

use bitflags::bitflags;

use crate::render_graph::{ResourceRef, ResourceState};

macro_rules! backend_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(u64);

        impl $name {
            /// Wrap a backend-specific raw value.
            pub const fn from_raw(raw: u64) -> Self {
                Self(raw)
            }

            /// The backend-specific raw value.
            pub const fn raw(self) -> u64 {
                self.0
            }
        }
    };
}

backend_handle!(
    /// Handle to a backend image.
    ImageHandle
);
backend_handle!(
    /// Handle to a backend image view.
    ImageViewHandle
);
backend_handle!(
    /// Handle to a backend buffer.
    BufferHandle
);
backend_handle!(
    /// Handle to a backend framebuffer (set of render-target attachments).
    FramebufferHandle
);
backend_handle!(
    /// Handle to a backend resource group (descriptor set / bind group).
    ResourceGroupHandle
);
backend_handle!(
    /// Handle to a backend acceleration structure.
    AccelerationStructureHandle
);
backend_handle!(
    /// Handle to a block of device memory reserved by a [`MemoryAllocator`](super::MemoryAllocator).
    AllocationHandle
);
backend_handle!(
    /// Handle to a CPU-waitable completion fence.
    FenceHandle
);
backend_handle!(
    /// Handle to a GPU-GPU semaphore.
    SemaphoreHandle
);
backend_handle!(
    /// Handle to a graphics or compute pipeline.
    PipelineHandle
);

/// Image format enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[non_exhaustive]
pub enum Format {
    R8Unorm,
    R16Float,
    R32Float,
    R32Uint,
    Rg16Float,
    Rg32Float,
    #[default]
    Rgba8Unorm,
    Rgba8UnormSrgb,
    Bgra8Unorm,
    Bgra8UnormSrgb,
    Rgba16Float,
    Rgba32Float,
    Depth16Unorm,
    Depth32Float,
    Depth24PlusStencil8,
    Depth32FloatStencil8,
}

impl Format {
    /// Returns true if this is a depth or depth/stencil format.
    pub fn is_depth_stencil(&self) -> bool {
        matches!(
            self,
            Self::Depth16Unorm
                | Self::Depth32Float
                | Self::Depth24PlusStencil8
                | Self::Depth32FloatStencil8
        )
    }

    /// Size in bytes of one texel.
    pub fn block_size(&self) -> u32 {
        match self {
            Self::R8Unorm => 1,
            Self::R16Float | Self::Depth16Unorm => 2,
            Self::R32Float
            | Self::R32Uint
            | Self::Rg16Float
            | Self::Rgba8Unorm
            | Self::Rgba8UnormSrgb
            | Self::Bgra8Unorm
            | Self::Bgra8UnormSrgb
            | Self::Depth32Float
            | Self::Depth24PlusStencil8 => 4,
            Self::Rg32Float | Self::Rgba16Float | Self::Depth32FloatStencil8 => 8,
            Self::Rgba32Float => 16,
        }
    }
}

bitflags! {
    /// Usage flags for images.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ImageUsage: u32 {
        /// Image can be copied from.
        const COPY_SRC = 1 << 0;
        /// Image can be copied to.
        const COPY_DST = 1 << 1;
        /// Image can be sampled in a shader.
        const SAMPLED = 1 << 2;
        /// Image can be used as a storage image.
        const STORAGE = 1 << 3;
        /// Image can be used as a color or depth/stencil attachment.
        const RENDER_ATTACHMENT = 1 << 4;
    }
}

bitflags! {
    /// Usage flags for buffers.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct BufferUsage: u32 {
        const VERTEX = 1 << 0;
        const INDEX = 1 << 1;
        const UNIFORM = 1 << 2;
        const STORAGE = 1 << 3;
        const INDIRECT = 1 << 4;
        const COPY_SRC = 1 << 5;
        const COPY_DST = 1 << 6;
    }
}

/// Three-dimensional extent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Extent3d {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
}

impl Extent3d {
    pub const fn new(width: u32, height: u32, depth: u32) -> Self {
        Self {
            width,
            height,
            depth,
        }
    }

    pub const fn new_2d(width: u32, height: u32) -> Self {
        Self::new(width, height, 1)
    }
}

impl Default for Extent3d {
    fn default() -> Self {
        Self::new(1, 1, 1)
    }
}

/// Descriptor for creating an image.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageDescriptor {
    pub label: Option<String>,
    pub size: Extent3d,
    pub mip_level_count: u32,
    pub array_layer_count: u32,
    pub sample_count: u32,
    pub format: Format,
    pub usage: ImageUsage,
}

impl ImageDescriptor {
    /// Create a 2D image descriptor.
    pub fn new_2d(width: u32, height: u32, format: Format, usage: ImageUsage) -> Self {
        Self {
            label: None,
            size: Extent3d::new_2d(width, height),
            mip_level_count: 1,
            array_layer_count: 1,
            sample_count: 1,
            format,
            usage,
        }
    }

    /// Create a cubemap descriptor (six square array layers).
    pub fn new_cube(size: u32, format: Format, usage: ImageUsage) -> Self {
        Self {
            array_layer_count: 6,
            ..Self::new_2d(size, size, format, usage)
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_mip_levels(mut self, count: u32) -> Self {
        self.mip_level_count = count;
        self
    }

    pub fn with_array_layers(mut self, count: u32) -> Self {
        self.array_layer_count = count;
        self
    }

    pub fn with_sample_count(mut self, count: u32) -> Self {
        self.sample_count = count;
        self
    }

    /// Returns true if this describes a cubemap.
    pub fn is_cube(&self) -> bool {
        self.array_layer_count == 6 && self.size.width == self.size.height
    }
}

impl Default for ImageDescriptor {
    fn default() -> Self {
        Self::new_2d(1, 1, Format::default(), ImageUsage::SAMPLED)
    }
}

/// How an image view interprets its image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ViewDimension {
    #[default]
    D2,
    D2Array,
    Cube,
    D3,
}

/// Descriptor for creating an image view.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct ImageViewDescriptor {
    pub label: Option<String>,
    pub dimension: ViewDimension,
    pub base_mip_level: u32,
    /// `None` means all remaining mip levels.
    pub mip_level_count: Option<u32>,
    pub base_array_layer: u32,
    /// `None` means all remaining array layers.
    pub array_layer_count: Option<u32>,
}

impl ImageViewDescriptor {
    /// A view covering the whole image, with the dimension inferred from the
    /// image descriptor.
    pub fn full(image: &ImageDescriptor) -> Self {
        let dimension = if image.size.depth > 1 {
            ViewDimension::D3
        } else if image.is_cube() {
            ViewDimension::Cube
        } else if image.array_layer_count > 1 {
            ViewDimension::D2Array
        } else {
            ViewDimension::D2
        };
        Self {
            label: image.label.clone(),
            dimension,
            ..Default::default()
        }
    }

    pub fn with_mip_range(mut self, base: u32, count: u32) -> Self {
        self.base_mip_level = base;
        self.mip_level_count = Some(count);
        self
    }

    pub fn with_layer_range(mut self, base: u32, count: u32) -> Self {
        self.base_array_layer = base;
        self.array_layer_count = Some(count);
        self
    }
}

/// Descriptor for creating a buffer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct BufferDescriptor {
    pub label: Option<String>,
    pub size: u64,
    pub usage: BufferUsage,
}

impl BufferDescriptor {
    pub fn new(size: u64, usage: BufferUsage) -> Self {
        Self {
            label: None,
            size,
            usage,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

/// Size and alignment a resource needs from the memory block it is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MemoryRequirements {
    pub size: u64,
    pub alignment: u64,
}

impl MemoryRequirements {
    pub const fn new(size: u64, alignment: u64) -> Self {
        Self { size, alignment }
    }
}

/// Descriptor for creating a framebuffer from attachment views.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FramebufferDescriptor {
    pub label: Option<String>,
    pub color_attachments: Vec<ImageViewHandle>,
    pub depth_stencil_attachment: Option<ImageViewHandle>,
    pub extent: Extent3d,
}

/// A concrete resource bound into a resource group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundResource {
    SampledImage(ImageViewHandle),
    StorageImage(ImageViewHandle),
    UniformBuffer(BufferHandle),
    StorageBuffer {
        buffer: BufferHandle,
        writable: bool,
    },
    AccelerationStructure(AccelerationStructureHandle),
}

/// One binding slot of a resource group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceGroupEntry {
    pub binding: u32,
    pub resource: BoundResource,
}

/// Layout and contents of a resource group created for one pass.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResourceGroupLayout {
    pub label: Option<String>,
    pub entries: Vec<ResourceGroupEntry>,
}

/// Synchronization wrapping one submission of a compiled graph.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SubmitInfo {
    pub wait_semaphores: Vec<SemaphoreHandle>,
    pub signal_semaphores: Vec<SemaphoreHandle>,
    /// Fence signaled once the whole submission has completed.
    pub signal_fence: Option<FenceHandle>,
}

impl SubmitInfo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_wait(mut self, semaphore: SemaphoreHandle) -> Self {
        self.wait_semaphores.push(semaphore);
        self
    }

    pub fn with_signal(mut self, semaphore: SemaphoreHandle) -> Self {
        self.signal_semaphores.push(semaphore);
        self
    }

    pub fn with_fence(mut self, fence: FenceHandle) -> Self {
        self.signal_fence = Some(fence);
        self
    }
}

/// Parameters for beginning a raster render pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderPassBegin<'a> {
    pub label: &'a str,
    pub framebuffer: FramebufferHandle,
    pub extent: Extent3d,
}

/// The backend object a state transition applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransitionTarget {
    Image(ImageHandle),
    Buffer(BufferHandle),
    AccelerationStructure(AccelerationStructureHandle),
}

/// A state transition resolved to a concrete backend object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceTransition {
    /// Graph reference the transition was computed for.
    pub resource: ResourceRef,
    pub target: TransitionTarget,
    pub before: ResourceState,
    pub after: ResourceState,
}
