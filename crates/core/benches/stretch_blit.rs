use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use present_core::backend::software::{blit_rgb565, stretch_blit};
use present_core::geometry::{resolve, ScalingMode, ScalingPolicy};
use present_core::types::Size;

const LOGICAL: Size = Size::new(640, 480);

/// Gradient test pattern, one row per pitch
fn pattern(size: Size) -> Vec<u16> {
    let mut pixels = vec![0u16; size.area()];
    for (i, px) in pixels.iter_mut().enumerate() {
        let x = (i % size.width as usize) as u16;
        let y = (i / size.width as usize) as u16;
        *px = ((x & 0x1F) << 11) | ((y & 0x3F) << 5) | ((x ^ y) & 0x1F);
    }
    pixels
}

fn bench_unscaled_blit(c: &mut Criterion) {
    let src = pattern(LOGICAL);
    let mut dst = vec![0u32; LOGICAL.area()];

    c.bench_function("blit_rgb565_640x480", |b| {
        b.iter(|| {
            blit_rgb565(
                black_box(&src),
                LOGICAL.width as usize,
                LOGICAL,
                &mut dst,
                LOGICAL.width as usize,
            );
            black_box(dst[0]);
        });
    });
}

fn bench_stretch(c: &mut Criterion) {
    let mut group = c.benchmark_group("stretch_blit");
    let src = pattern(LOGICAL);

    for window in [Size::new(800, 600), Size::new(1280, 1024), Size::new(1920, 1080)] {
        for mode in [ScalingMode::AspectPreserve, ScalingMode::Windowbox] {
            let layout = resolve(LOGICAL, window, &ScalingPolicy::new(mode, None));
            let mut dst = vec![0u32; layout.target.area()];
            group.bench_with_input(
                BenchmarkId::new(format!("{:?}", mode), format!("{}x{}", window.width, window.height)),
                &layout,
                |b, layout| {
                    b.iter(|| {
                        stretch_blit(
                            black_box(&src),
                            LOGICAL.width as usize,
                            LOGICAL,
                            &mut dst,
                            layout.target.width as usize,
                            &layout.viewport,
                        );
                        black_box(dst[0]);
                    });
                },
            );
        }
    }

    group.finish();
}

criterion_group!(benches, bench_unscaled_blit, bench_stretch);
criterion_main!(benches);
