//! Output geometry: where and how large the logical surface appears on the target.

use crate::logging::{log, LogCategory, LogLevel};
use crate::types::Size;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Largest integer multiplier tried when windowboxing.
pub const MAX_WINDOWBOX_SCALE: u32 = 19;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeometryError {
    #[error("Logical surface has zero size ({0}x{1})")]
    ZeroLogical(u32, u32),
    #[error("Target area has zero size ({0}x{1})")]
    ZeroTarget(u32, u32),
}

/// How the logical surface is fitted into the render target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ScalingMode {
    /// Native size at the top-left corner
    #[default]
    None,
    /// Largest size keeping the logical aspect ratio, centered
    AspectPreserve,
    /// Largest integer multiple of the logical size, centered
    Windowbox,
}

/// Scaling mode plus an optional forced stretch target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ScalingPolicy {
    pub mode: ScalingMode,
    /// Explicit render target size; never smaller than the logical surface
    pub stretch_to: Option<Size>,
}

impl ScalingPolicy {
    pub fn new(mode: ScalingMode, stretch_to: Option<Size>) -> Self {
        Self { mode, stretch_to }
    }

    pub fn is_none(&self) -> bool {
        self.mode == ScalingMode::None && self.stretch_to.is_none()
    }
}

/// Placement of the logical surface inside the render target.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Viewport {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    /// viewport width / logical width
    pub scale_w: f64,
    /// viewport height / logical height
    pub scale_h: f64,
    pub stretched: bool,
}

impl Viewport {
    pub fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }
}

/// Resolved geometry for one frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Layout {
    pub logical: Size,
    /// Size of the presentation target the viewport lives in
    pub target: Size,
    pub viewport: Viewport,
}

fn windowbox(logical: Size, target: Size) -> Size {
    (1..=MAX_WINDOWBOX_SCALE)
        .rev()
        .find(|&k| {
            logical.width.checked_mul(k).is_some_and(|w| w <= target.width)
                && logical.height.checked_mul(k).is_some_and(|h| h <= target.height)
        })
        .map(|k| Size::new(logical.width * k, logical.height * k))
        .unwrap_or(logical)
}

fn aspect_fit(logical: Size, target: Size) -> Size {
    let (lw, lh) = (logical.width as u64, logical.height as u64);
    let (tw, th) = (target.width as u64, target.height as u64);
    let height = lh * tw / lw;
    if height > th {
        Size::new((lw * th / lh) as u32, target.height)
    } else {
        Size::new(target.width, height as u32)
    }
}

/// Resolve the layout, rejecting zero-sized inputs.
pub fn try_resolve(
    logical: Size,
    available: Size,
    policy: &ScalingPolicy,
) -> Result<Layout, GeometryError> {
    if logical.is_empty() {
        return Err(GeometryError::ZeroLogical(logical.width, logical.height));
    }
    if available.is_empty() {
        return Err(GeometryError::ZeroTarget(available.width, available.height));
    }
    Ok(fit(logical, available, policy))
}

/// Layout for non-empty `logical` and `available` sizes
fn fit(logical: Size, available: Size, policy: &ScalingPolicy) -> Layout {
    let target = match (policy.mode, policy.stretch_to) {
        (_, Some(stretch)) => stretch.max(logical),
        (ScalingMode::None, None) => logical,
        (_, None) => available.max(logical),
    };

    let size = match policy.mode {
        ScalingMode::None if policy.stretch_to.is_some() => target,
        ScalingMode::None => logical,
        ScalingMode::AspectPreserve => aspect_fit(logical, target),
        ScalingMode::Windowbox => windowbox(logical, target),
    };

    let (x, y) = if policy.mode == ScalingMode::None {
        (0, 0)
    } else {
        (
            (target.width - size.width) / 2,
            (target.height - size.height) / 2,
        )
    };

    let stretched = size != logical || x != 0 || y != 0;
    Layout {
        logical,
        target,
        viewport: Viewport {
            x,
            y,
            width: size.width,
            height: size.height,
            scale_w: size.width as f64 / logical.width as f64,
            scale_h: size.height as f64 / logical.height as f64,
            stretched,
        },
    }
}

/// Resolve the layout, clamping zero-sized inputs to 1x1 instead of failing the frame.
pub fn resolve(logical: Size, available: Size, policy: &ScalingPolicy) -> Layout {
    match try_resolve(logical, available, policy) {
        Ok(layout) => layout,
        Err(err) => {
            log(LogCategory::Geometry, LogLevel::Warn, || {
                format!("{}, clamping to 1x1", err)
            });
            let clamp = |s: Size| Size::new(s.width.max(1), s.height.max(1));
            let policy = ScalingPolicy {
                stretch_to: policy.stretch_to.map(clamp),
                ..*policy
            };
            fit(clamp(logical), clamp(available), &policy)
        }
    }
}

/// Holds the geometry inputs and recomputes the layout when any of them change.
///
/// Every change raises the invalidated flag, which the render loop turns into a full
/// clear of the presentation target before the next composite.
#[derive(Debug, Clone)]
pub struct GeometryResolver {
    logical: Size,
    available: Size,
    policy: ScalingPolicy,
    layout: Layout,
    invalidated: bool,
}

impl GeometryResolver {
    pub fn new(logical: Size, available: Size, policy: ScalingPolicy) -> Self {
        let layout = resolve(logical, available, &policy);
        Self {
            logical,
            available,
            policy,
            layout,
            invalidated: true,
        }
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn logical(&self) -> Size {
        self.logical
    }

    pub fn available(&self) -> Size {
        self.available
    }

    pub fn policy(&self) -> ScalingPolicy {
        self.policy
    }

    pub fn set_available(&mut self, available: Size) {
        if available != self.available {
            self.available = available;
            self.recompute();
        }
    }

    /// Change the logical size, e.g. after a display mode switch
    pub fn set_logical(&mut self, logical: Size) {
        if logical != self.logical {
            self.logical = logical;
            self.recompute();
        }
    }

    pub fn set_policy(&mut self, policy: ScalingPolicy) {
        if policy != self.policy {
            self.policy = policy;
            self.recompute();
        }
    }

    /// Force a recompute and clear even when the inputs are unchanged
    pub fn invalidate(&mut self) {
        self.recompute();
    }

    /// Returns whether the layout changed since the last call, clearing the flag
    pub fn take_invalidated(&mut self) -> bool {
        std::mem::take(&mut self.invalidated)
    }

    fn recompute(&mut self) {
        self.layout = resolve(self.logical, self.available, &self.policy);
        self.invalidated = true;
        let layout = self.layout;
        log(LogCategory::Geometry, LogLevel::Debug, || {
            format!(
                "logical {}x{} in {}x{}: viewport {}x{}+{}+{} (stretched: {})",
                layout.logical.width,
                layout.logical.height,
                layout.target.width,
                layout.target.height,
                layout.viewport.width,
                layout.viewport.height,
                layout.viewport.x,
                layout.viewport.y,
                layout.viewport.stretched
            )
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MODES: [ScalingMode; 3] = [
        ScalingMode::None,
        ScalingMode::AspectPreserve,
        ScalingMode::Windowbox,
    ];

    fn aspect() -> ScalingPolicy {
        ScalingPolicy::new(ScalingMode::AspectPreserve, None)
    }

    #[test]
    fn test_aspect_fills_exact_ratio() {
        let layout = try_resolve(Size::new(320, 200), Size::new(1280, 800), &aspect()).unwrap();
        let vp = layout.viewport;
        assert_eq!((vp.x, vp.y, vp.width, vp.height), (0, 0, 1280, 800));
        assert!(vp.stretched);
        assert_eq!(vp.scale_w, 4.0);
        assert_eq!(vp.scale_h, 4.0);
    }

    #[test]
    fn test_none_is_native() {
        let policy = ScalingPolicy::default();
        let layout = try_resolve(Size::new(640, 480), Size::new(640, 480), &policy).unwrap();
        let vp = layout.viewport;
        assert_eq!((vp.x, vp.y, vp.width, vp.height), (0, 0, 640, 480));
        assert!(!vp.stretched);

        // A larger window does not change a None layout
        let layout = try_resolve(Size::new(640, 480), Size::new(1920, 1080), &policy).unwrap();
        assert_eq!(layout.viewport.size(), Size::new(640, 480));
        assert!(!layout.viewport.stretched);
    }

    #[test]
    fn test_aspect_clamps_by_height() {
        let layout = try_resolve(Size::new(320, 200), Size::new(1920, 1080), &aspect()).unwrap();
        let vp = layout.viewport;
        assert_eq!((vp.width, vp.height), (1728, 1080));
        assert_eq!((vp.x, vp.y), (96, 0));
    }

    #[test]
    fn test_windowbox_picks_largest_multiple() {
        let policy = ScalingPolicy::new(ScalingMode::Windowbox, None);
        let layout = try_resolve(Size::new(320, 200), Size::new(1920, 1080), &policy).unwrap();
        let vp = layout.viewport;
        assert_eq!((vp.width, vp.height), (1600, 1000));
        assert_eq!((vp.x, vp.y), (160, 40));
        assert!(vp.stretched);
    }

    #[test]
    fn test_windowbox_k1_when_more_than_half_filled() {
        let policy = ScalingPolicy::new(ScalingMode::Windowbox, None);
        let layout = try_resolve(Size::new(640, 300), Size::new(1000, 1000), &policy).unwrap();
        assert_eq!(layout.viewport.size(), Size::new(640, 300));
        assert_eq!((layout.viewport.x, layout.viewport.y), (180, 350));
        assert!(layout.viewport.stretched);
    }

    #[test]
    fn test_force_stretch_enlarges_target() {
        let policy = ScalingPolicy::new(ScalingMode::None, Some(Size::new(1024, 768)));
        let layout = try_resolve(Size::new(640, 480), Size::new(800, 600), &policy).unwrap();
        assert_eq!(layout.target, Size::new(1024, 768));
        assert_eq!(layout.viewport.size(), Size::new(1024, 768));
        assert!(layout.viewport.stretched);

        // Aspect is computed inside the stretch target, not the window
        let policy = ScalingPolicy::new(ScalingMode::AspectPreserve, Some(Size::new(1600, 900)));
        let layout = try_resolve(Size::new(640, 480), Size::new(800, 600), &policy).unwrap();
        assert_eq!(layout.viewport.size(), Size::new(1200, 900));
        assert_eq!((layout.viewport.x, layout.viewport.y), (200, 0));

        // Stretch target smaller than the surface is raised to it
        let policy = ScalingPolicy::new(ScalingMode::None, Some(Size::new(100, 100)));
        let layout = try_resolve(Size::new(640, 480), Size::new(800, 600), &policy).unwrap();
        assert_eq!(layout.target, Size::new(640, 480));
        assert!(!layout.viewport.stretched);
    }

    #[test]
    fn test_viewport_contained_and_stretched_flag() {
        let logicals = [(320, 200), (640, 480), (256, 224), (800, 600), (1, 1)];
        let targets = [(320, 200), (800, 600), (1280, 800), (1920, 1080), (3840, 2160)];
        for &(lw, lh) in &logicals {
            for &(tw, th) in &targets {
                if tw < lw || th < lh {
                    continue;
                }
                let logical = Size::new(lw, lh);
                let available = Size::new(tw, th);
                for mode in MODES {
                    for stretch in [None, Some(available)] {
                        let policy = ScalingPolicy::new(mode, stretch);
                        let layout = try_resolve(logical, available, &policy).unwrap();
                        let vp = layout.viewport;
                        assert!(vp.x + vp.width <= layout.target.width);
                        assert!(vp.y + vp.height <= layout.target.height);
                        assert!(vp.width >= lw && vp.height >= lh);
                        let expected = vp.size() != logical || vp.x != 0 || vp.y != 0;
                        assert_eq!(vp.stretched, expected, "{:?} {:?}", logical, policy);
                    }
                }
            }
        }
    }

    #[test]
    fn test_aspect_ratio_and_centering() {
        let cases = [
            ((320, 200), (1024, 768)),
            ((640, 480), (1920, 1080)),
            ((256, 240), (1366, 768)),
        ];
        for ((lw, lh), (tw, th)) in cases {
            let layout = try_resolve(Size::new(lw, lh), Size::new(tw, th), &aspect()).unwrap();
            let vp = layout.viewport;
            let logical_ratio = lw as f64 / lh as f64;
            let viewport_ratio = vp.width as f64 / vp.height as f64;
            // Integer rounding of one axis bounds the error by one pixel
            assert!((logical_ratio - viewport_ratio).abs() < logical_ratio / vp.height as f64 + 1e-9);
            assert_eq!(vp.x, (tw - vp.width) / 2);
            assert_eq!(vp.y, (th - vp.height) / 2);
        }
    }

    #[test]
    fn test_windowbox_largest_k() {
        let policy = ScalingPolicy::new(ScalingMode::Windowbox, None);
        for (lw, lh, tw, th) in [(320, 200, 1920, 1080), (100, 100, 2500, 2500), (640, 480, 1280, 720)] {
            let layout = try_resolve(Size::new(lw, lh), Size::new(tw, th), &policy).unwrap();
            let k = layout.viewport.width / lw;
            assert_eq!(layout.viewport.height, lh * k);
            let next = k + 1;
            assert!(next > MAX_WINDOWBOX_SCALE || lw * next > tw || lh * next > th);
        }
    }

    #[test]
    fn test_zero_sizes() {
        assert_eq!(
            try_resolve(Size::new(0, 200), Size::new(640, 480), &aspect()),
            Err(GeometryError::ZeroLogical(0, 200))
        );
        assert_eq!(
            try_resolve(Size::new(320, 200), Size::new(0, 0), &aspect()),
            Err(GeometryError::ZeroTarget(0, 0))
        );
        let layout = resolve(Size::new(320, 200), Size::new(0, 0), &aspect());
        assert_eq!(layout.viewport.size(), Size::new(320, 200));
        let layout = resolve(Size::new(0, 0), Size::new(0, 0), &aspect());
        assert_eq!(layout.viewport.size(), Size::new(1, 1));
    }

    #[test]
    fn test_resolve_clamps_zero_stretch_target() {
        let policy = ScalingPolicy::new(ScalingMode::Windowbox, Some(Size::new(0, 0)));
        let layout = resolve(Size::new(0, 4), Size::new(0, 0), &policy);
        assert_eq!(layout.logical, Size::new(1, 4));
        assert_eq!(layout.target, Size::new(1, 4));
        assert_eq!(layout.viewport.size(), Size::new(1, 4));
        assert!(!layout.viewport.stretched);
    }

    #[test]
    fn test_resolver_invalidates_on_change() {
        let mut resolver = GeometryResolver::new(Size::new(320, 200), Size::new(640, 400), aspect());
        assert!(resolver.take_invalidated());
        assert!(!resolver.take_invalidated());

        resolver.set_available(Size::new(640, 400));
        assert!(!resolver.take_invalidated());

        resolver.set_available(Size::new(1280, 800));
        assert!(resolver.take_invalidated());
        assert_eq!(resolver.layout().viewport.size(), Size::new(1280, 800));

        resolver.set_logical(Size::new(640, 400));
        assert!(resolver.take_invalidated());
        assert_eq!(resolver.layout().viewport.scale_w, 2.0);
    }
}
