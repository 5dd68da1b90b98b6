//! Example showing how each scaling mode places a legacy surface in a window
//!
//! Run with: cargo run --example scaling_modes -p present_gui

use present_core::geometry::{resolve, ScalingMode, ScalingPolicy};
use present_core::types::Size;

fn main() {
    println!("Scaling Modes Example");
    println!("=====================\n");

    let logical = Size::new(640, 480);
    let windows = [
        Size::new(640, 480),
        Size::new(800, 600),
        Size::new(1280, 1024),
        Size::new(1920, 1080),
    ];
    let modes = [
        ScalingMode::None,
        ScalingMode::AspectPreserve,
        ScalingMode::Windowbox,
    ];

    println!("Surface: {}x{}\n", logical.width, logical.height);
    for window in windows {
        println!("Window {}x{}:", window.width, window.height);
        for mode in modes {
            let layout = resolve(logical, window, &ScalingPolicy::new(mode, None));
            let v = layout.viewport;
            println!(
                "  {:<15} viewport {:>4}x{:<4} at ({:>3}, {:>3})  scale {:.3} x {:.3}{}",
                format!("{:?}", mode),
                v.width,
                v.height,
                v.x,
                v.y,
                v.scale_w,
                v.scale_h,
                if v.stretched { "" } else { "  (1:1)" }
            );
        }
        println!();
    }

    let forced = resolve(
        logical,
        Size::new(800, 600),
        &ScalingPolicy::new(ScalingMode::None, Some(Size::new(1024, 768))),
    );
    println!(
        "Forced stretch to 1024x768: viewport {}x{}",
        forced.viewport.width, forced.viewport.height
    );
}
