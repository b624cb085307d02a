use criterion::{Criterion, black_box, criterion_group, criterion_main};

use redlilium_render_graph::backend::dummy::{CommandRecorder, DummyDevice};
use redlilium_render_graph::backend::{
    BufferDescriptor, BufferUsage, Format, ImageDescriptor, ImageUsage, SubmitInfo,
};
use redlilium_render_graph::render_graph::{
    pack, PassBindings, PassKind, RenderGraphBuilder, TransientInterval,
};
use redlilium_render_graph::ResourceRef;

fn color(width: u32, height: u32) -> ImageDescriptor {
    ImageDescriptor::new_2d(
        width,
        height,
        Format::Rgba16Float,
        ImageUsage::RENDER_ATTACHMENT | ImageUsage::SAMPLED,
    )
}

/// A post-processing chain: each pass renders into a new target and
/// samples the previous one.
fn chain(passes: usize) -> RenderGraphBuilder {
    let mut builder = RenderGraphBuilder::new();
    let mut previous = builder.create_transient_image(color(1920, 1080));
    let mut first = PassBindings::new();
    first.color_attachment("color", previous);
    builder.add_pass("pass_0", &first, PassKind::Raster, |_| {});

    for i in 1..passes {
        let target = builder.create_transient_image(color(1920, 1080));
        let mut bindings = PassBindings::new();
        bindings.color_attachment("color", target).sampled("input", previous);
        builder.add_pass(format!("pass_{i}"), &bindings, PassKind::Raster, |_| {});
        previous = target;
    }
    builder
}

fn intervals(count: usize) -> Vec<TransientInterval> {
    let mut builder = RenderGraphBuilder::new();
    (0..count)
        .map(|i| {
            let resource: ResourceRef = builder.create_transient_image(color(1, 1)).raw();
            let first = (i * 7) % 64;
            let size = 4096 * (1 + (i as u64 * 13) % 32);
            TransientInterval::new(resource, first, first + i % 5, size, 256)
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Transient packing
// ---------------------------------------------------------------------------

fn bench_pack_small(c: &mut Criterion) {
    let input = intervals(16);
    c.bench_function("pack_16_transients", |b| {
        b.iter(|| black_box(pack(black_box(&input)).unwrap()));
    });
}

fn bench_pack_large(c: &mut Criterion) {
    let input = intervals(256);
    c.bench_function("pack_256_transients", |b| {
        b.iter(|| black_box(pack(black_box(&input)).unwrap()));
    });
}

// ---------------------------------------------------------------------------
// Graph construction and compilation
// ---------------------------------------------------------------------------

fn bench_build_chain(c: &mut Criterion) {
    c.bench_function("render_graph_build_32_passes_chain", |b| {
        b.iter(|| black_box(chain(32)));
    });
}

fn bench_compile_chain(c: &mut Criterion) {
    let device = DummyDevice::new();
    c.bench_function("render_graph_compile_32_passes_chain", |b| {
        b.iter(|| {
            let graph = chain(32).compile(&device, &device).unwrap();
            black_box(graph.stats());
            graph.release(&device, &device);
        });
    });
}

fn bench_compile_compute(c: &mut Criterion) {
    let device = DummyDevice::new();
    c.bench_function("render_graph_compile_64_compute_passes", |b| {
        b.iter(|| {
            let mut builder = RenderGraphBuilder::new();
            let mut previous =
                builder.create_storage_buffer(BufferDescriptor::new(65536, BufferUsage::empty()));
            for i in 0..64 {
                let next =
                    builder.create_storage_buffer(BufferDescriptor::new(65536, BufferUsage::empty()));
                let mut bindings = PassBindings::new();
                bindings
                    .storage_buffer_read("input", previous)
                    .storage_buffer_write("output", next);
                builder.add_pass(format!("stage_{i}"), &bindings, PassKind::Compute, |_| {});
                previous = next;
            }
            let graph = builder.compile(&device, &device).unwrap();
            black_box(graph.stats());
            graph.release(&device, &device);
        });
    });
}

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

fn bench_execute_chain(c: &mut Criterion) {
    let device = DummyDevice::new();
    let graph = chain(32).compile(&device, &device).unwrap();
    let submit = SubmitInfo::new();
    c.bench_function("render_graph_execute_32_passes_chain", |b| {
        b.iter(|| {
            let mut recorder = CommandRecorder::new();
            graph.execute(&mut recorder, &submit).unwrap();
            black_box(recorder.commands().len());
        });
    });
    graph.release(&device, &device);
}

criterion_group!(
    benches,
    bench_pack_small,
    bench_pack_large,
    bench_build_chain,
    bench_compile_chain,
    bench_compile_compute,
    bench_execute_chain,
);
criterion_main!(benches);
