//! Resource references for the render graph
//!
//! A [`ResourceRef`] is a tagged 64-bit identifier: the low 32 bits are an
//! index unique within one builder, bits 32..40 carry the [`ResourceTag`]
//! and bits 40..64 the [`GraphId`] of the builder that minted it.
//! Typed wrappers ([`ImageRef`], [`BufferRef`], ...) give call sites type
//! safety; sub-tags ([`TextureRef`], [`CubemapRef`], [`UniformBufferRef`],
//! [`StorageBufferRef`]) refine an image or buffer without changing its
//! identity.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

const INDEX_MASK: u64 = 0xFFFF_FFFF;
const TAG_SHIFT: u32 = 32;
const TAG_MASK: u64 = 0xFF;
const OWNER_SHIFT: u32 = 40;
const OWNER_MASK: u64 = 0xFF_FFFF;

/// Identity of one graph builder.
///
/// Ids wrap after 2^24 - 1 builders; zero is never handed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GraphId(u32);

impl GraphId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU32 = AtomicU32::new(0);
        let id = NEXT.fetch_add(1, Ordering::Relaxed);
        Self(id % OWNER_MASK as u32 + 1)
    }

    pub const fn get(self) -> u32 {
        self.0
    }
}

/// Kind of object a reference names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum ResourceTag {
    Image = 1,
    ImageView = 2,
    Buffer = 3,
    Framebuffer = 4,
    ResourceGroup = 5,
    AccelerationStructure = 6,
}

impl ResourceTag {
    fn from_bits(bits: u8) -> Option<Self> {
        Some(match bits {
            1 => Self::Image,
            2 => Self::ImageView,
            3 => Self::Buffer,
            4 => Self::Framebuffer,
            5 => Self::ResourceGroup,
            6 => Self::AccelerationStructure,
            _ => return None,
        })
    }
}

/// Opaque identifier of a resource within one graph build.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceRef(u64);

impl ResourceRef {
    /// Sentinel that never names a resource.
    pub const INVALID: Self = Self(u64::MAX);

    pub(crate) const fn new(tag: ResourceTag, owner: GraphId, index: u32) -> Self {
        Self(
            ((owner.0 as u64 & OWNER_MASK) << OWNER_SHIFT)
                | ((tag as u64) << TAG_SHIFT)
                | index as u64,
        )
    }

    /// Tag of this reference, `None` for [`ResourceRef::INVALID`].
    pub fn tag(self) -> Option<ResourceTag> {
        if !self.is_valid() {
            return None;
        }
        ResourceTag::from_bits(((self.0 >> TAG_SHIFT) & TAG_MASK) as u8)
    }

    /// Builder that minted this reference.
    pub const fn owner(self) -> GraphId {
        GraphId(((self.0 >> OWNER_SHIFT) & OWNER_MASK) as u32)
    }

    /// Builder-local index.
    pub const fn index(self) -> u32 {
        (self.0 & INDEX_MASK) as u32
    }

    pub const fn is_valid(self) -> bool {
        self.0 != Self::INVALID.0
    }

    pub const fn to_bits(self) -> u64 {
        self.0
    }

    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }
}

impl Default for ResourceRef {
    fn default() -> Self {
        Self::INVALID
    }
}

impl fmt::Debug for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.tag() {
            Some(tag) => write!(f, "{:?}#{}", tag, self.index()),
            None if !self.is_valid() => write!(f, "Invalid"),
            None => write!(f, "Unknown({:#x})", self.0),
        }
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A reference did not carry the expected tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TagMismatch {
    pub resource: ResourceRef,
    pub expected: ResourceTag,
}

macro_rules! typed_ref {
    ($(#[$meta:meta])* $name:ident => $tag:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(ResourceRef);

        impl $name {
            pub const INVALID: Self = Self(ResourceRef::INVALID);

            pub(crate) const fn new(owner: GraphId, index: u32) -> Self {
                Self(ResourceRef::new(ResourceTag::$tag, owner, index))
            }

            /// Reference owned by no builder.
            #[cfg(test)]
            pub(crate) const fn from_index(index: u32) -> Self {
                Self::new(GraphId(0), index)
            }

            /// The untyped reference.
            pub const fn raw(self) -> ResourceRef {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::INVALID
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Debug::fmt(&self.0, f)
            }
        }

        impl From<$name> for ResourceRef {
            fn from(typed: $name) -> Self {
                typed.0
            }
        }

        impl TryFrom<ResourceRef> for $name {
            type Error = TagMismatch;

            fn try_from(resource: ResourceRef) -> Result<Self, Self::Error> {
                if resource.tag() == Some(ResourceTag::$tag) {
                    Ok(Self(resource))
                } else {
                    Err(TagMismatch {
                        resource,
                        expected: ResourceTag::$tag,
                    })
                }
            }
        }
    };
}

macro_rules! sub_ref {
    ($(#[$meta:meta])* $name:ident : $base:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
        pub struct $name($base);

        impl $name {
            pub const INVALID: Self = Self($base::INVALID);

            pub(crate) const fn wrap(base: $base) -> Self {
                Self(base)
            }

            /// The base reference this refines.
            pub const fn base(self) -> $base {
                self.0
            }

            pub const fn raw(self) -> ResourceRef {
                self.0.raw()
            }
        }

        impl From<$name> for $base {
            fn from(sub: $name) -> Self {
                sub.0
            }
        }

        impl From<$name> for ResourceRef {
            fn from(sub: $name) -> Self {
                sub.0.raw()
            }
        }
    };
}

typed_ref!(
    /// Reference to an image.
    ImageRef => Image
);
typed_ref!(
    /// Reference to a view of an image.
    ImageViewRef => ImageView
);
typed_ref!(
    /// Reference to a buffer.
    BufferRef => Buffer
);
typed_ref!(
    /// Reference to the framebuffer the graph builds for a raster pass.
    FramebufferRef => Framebuffer
);
typed_ref!(
    /// Reference to the resource group the graph builds for a pass.
    ResourceGroupRef => ResourceGroup
);
typed_ref!(
    /// Reference to an acceleration structure.
    AccelerationStructureRef => AccelerationStructure
);

sub_ref!(
    /// A 2D image meant to be sampled.
    TextureRef: ImageRef
);
sub_ref!(
    /// A six-layer cube image.
    CubemapRef: ImageRef
);
sub_ref!(
    /// A buffer read as uniform data.
    UniformBufferRef: BufferRef
);
sub_ref!(
    /// A buffer accessed as shader storage.
    StorageBufferRef: BufferRef
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_and_index() {
        let image = ImageRef::from_index(7);
        assert_eq!(image.raw().tag(), Some(ResourceTag::Image));
        assert_eq!(image.raw().index(), 7);
        assert!(image.raw().is_valid());

        let bits = image.raw().to_bits();
        assert_eq!(ResourceRef::from_bits(bits), image.raw());

        let buffer = BufferRef::from_index(7);
        assert_ne!(ResourceRef::from(image), ResourceRef::from(buffer));
    }

    #[test]
    fn test_invalid_sentinel() {
        assert!(!ResourceRef::INVALID.is_valid());
        assert_eq!(ResourceRef::INVALID.tag(), None);
        assert_eq!(ImageRef::default().raw(), ResourceRef::INVALID);
        assert_eq!(format!("{:?}", ResourceRef::INVALID), "Invalid");
    }

    #[test]
    fn test_sub_tags_share_identity() {
        let image = ImageRef::from_index(3);
        let texture = TextureRef::wrap(image);
        let cubemap = CubemapRef::wrap(image);
        assert_eq!(ResourceRef::from(texture), image.raw());
        assert_eq!(ResourceRef::from(cubemap), image.raw());
        assert_eq!(ImageRef::from(texture), image);

        let storage = StorageBufferRef::wrap(BufferRef::from_index(4));
        assert_eq!(storage.raw().tag(), Some(ResourceTag::Buffer));
    }

    #[test]
    fn test_try_from_checks_tag() {
        let view = ImageViewRef::from_index(1);
        assert!(ImageViewRef::try_from(view.raw()).is_ok());
        let err = ImageRef::try_from(view.raw()).unwrap_err();
        assert_eq!(err.expected, ResourceTag::Image);
        assert!(ImageRef::try_from(ResourceRef::INVALID).is_err());
    }

    #[test]
    fn test_owner_bits() {
        let first = GraphId::next();
        let second = GraphId::next();
        assert_ne!(first, second);
        assert_ne!(first.get(), 0);

        let a = ImageRef::new(first, 3).raw();
        let b = ImageRef::new(second, 3).raw();
        assert_ne!(a, b);
        assert_eq!(a.owner(), first);
        assert_eq!(a.index(), b.index());
        assert_eq!(a.tag(), b.tag());
        assert_eq!(ImageRef::from_index(3).raw().owner().get(), 0);
    }

    #[test]
    fn test_debug_format() {
        assert_eq!(format!("{:?}", BufferRef::from_index(12)), "Buffer#12");
    }
}
