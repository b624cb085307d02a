//! Common utilities for render graph integration tests.

#![allow(dead_code)]

use redlilium_render_graph::backend::{
    BufferDescriptor, BufferUsage, Format, ImageDescriptor, ImageUsage,
};

/// Route `log` output through the test harness. Safe to call from every test.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

// ============================================================================
// Descriptors
// ============================================================================

pub fn color_desc(width: u32, height: u32) -> ImageDescriptor {
    ImageDescriptor::new_2d(
        width,
        height,
        Format::Rgba16Float,
        ImageUsage::RENDER_ATTACHMENT | ImageUsage::SAMPLED,
    )
    .with_label("color")
}

pub fn depth_desc(width: u32, height: u32) -> ImageDescriptor {
    ImageDescriptor::new_2d(
        width,
        height,
        Format::Depth32Float,
        ImageUsage::RENDER_ATTACHMENT,
    )
    .with_label("depth")
}

pub fn storage_image_desc(width: u32, height: u32) -> ImageDescriptor {
    ImageDescriptor::new_2d(
        width,
        height,
        Format::Rgba8Unorm,
        ImageUsage::STORAGE | ImageUsage::SAMPLED,
    )
    .with_label("output")
}

pub fn storage_buffer_desc(size: u64) -> BufferDescriptor {
    BufferDescriptor::new(size, BufferUsage::STORAGE).with_label("storage")
}
