// Viewport state
// The displayed image and the transform applied to it

use crate::image_loader::ImageData;
use clap::ValueEnum;

pub const MIN_OPACITY: f32 = 0.2;
pub const MAX_OPACITY: f32 = 1.0;
pub const DEFAULT_OPACITY: f32 = 0.7;

pub const MIN_SCALE: f64 = 0.1;
pub const MAX_SCALE: f64 = 10.0;

/// How drag and pinch gestures combine with the existing transform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum GestureMode {
    /// Each gesture overwrites the offset/scale with its cumulative value
    #[default]
    Absolute,
    /// Each gesture continues from where the previous one left off
    Accumulate,
}

/// Offset, scale and opacity applied to the displayed image
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub offset_x: f64,
    pub offset_y: f64,
    pub scale: f64,
    pub opacity: f32,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            offset_x: 0.0,
            offset_y: 0.0,
            scale: 1.0,
            opacity: DEFAULT_OPACITY,
        }
    }
}

impl Transform {
    pub fn set_opacity(&mut self, value: f32) {
        if value.is_nan() {
            return;
        }
        self.opacity = value.clamp(MIN_OPACITY, MAX_OPACITY);
    }

    /// Non-finite or non-positive scales are ignored
    pub fn set_scale(&mut self, value: f64) {
        if value.is_finite() && value > 0.0 {
            self.scale = value.clamp(MIN_SCALE, MAX_SCALE);
        }
    }

    pub fn reset_position(&mut self) {
        self.offset_x = 0.0;
        self.offset_y = 0.0;
        self.scale = 1.0;
    }

    /// Screen rectangle `(x, y, w, h)` of the image inside a view of the given
    /// size: fit, then offset, then scale about the view centre.
    pub fn image_rect(&self, image_size: (u32, u32), view_size: (u32, u32)) -> (f64, f64, f64, f64) {
        let (fit_w, fit_h) = fit_size(image_size, view_size);
        let cx = view_size.0 as f64 / 2.0;
        let cy = view_size.1 as f64 / 2.0;

        let w = fit_w * self.scale;
        let h = fit_h * self.scale;
        let x = cx + self.scale * (self.offset_x - fit_w / 2.0);
        let y = cy + self.scale * (self.offset_y - fit_h / 2.0);
        (x, y, w, h)
    }
}

/// Largest aspect-preserving size of `image` that fits in `view`
pub fn fit_size(image: (u32, u32), view: (u32, u32)) -> (f64, f64) {
    if image.0 == 0 || image.1 == 0 {
        return (0.0, 0.0);
    }
    let scale_x = view.0 as f64 / image.0 as f64;
    let scale_y = view.1 as f64 / image.1 as f64;
    let scale = scale_x.min(scale_y);
    (image.0 as f64 * scale, image.1 as f64 * scale)
}

/// Gesture state captured when a drag or pinch begins
#[derive(Debug, Clone, Copy, Default)]
struct GestureBase {
    drag: Option<(f64, f64)>,
    pinch: Option<f64>,
}

/// The controller's state: one image and its transform
#[derive(Debug)]
pub struct Viewport {
    image: Option<ImageData>,
    image_generation: u64,
    transform: Transform,
    gesture_mode: GestureMode,
    base: GestureBase,
}

impl Viewport {
    pub fn new(opacity: f32, gesture_mode: GestureMode) -> Self {
        let mut transform = Transform::default();
        transform.set_opacity(opacity);
        Self {
            image: None,
            image_generation: 0,
            transform,
            gesture_mode,
            base: GestureBase::default(),
        }
    }

    pub fn image(&self) -> Option<&ImageData> {
        self.image.as_ref()
    }

    pub fn has_image(&self) -> bool {
        self.image.is_some()
    }

    /// Bumped every time the image is replaced
    pub fn image_generation(&self) -> u64 {
        self.image_generation
    }

    pub fn transform(&self) -> Transform {
        self.transform
    }

    pub fn gesture_mode(&self) -> GestureMode {
        self.gesture_mode
    }

    /// Replace the displayed image and reset its position
    pub fn replace_image(&mut self, image: ImageData) {
        self.image = Some(image);
        self.image_generation += 1;
        self.base = GestureBase::default();
        self.transform.reset_position();
    }

    pub fn reset_position(&mut self) {
        self.base = GestureBase::default();
        self.transform.reset_position();
    }

    pub fn set_opacity(&mut self, value: f32) {
        self.transform.set_opacity(value);
    }

    /// `translation` is the cumulative pointer movement of the current drag,
    /// already converted to unscaled image space.
    pub fn on_drag(&mut self, translation: (f64, f64)) {
        let (base_x, base_y) = match self.gesture_mode {
            GestureMode::Absolute => (0.0, 0.0),
            GestureMode::Accumulate => *self
                .base
                .drag
                .get_or_insert((self.transform.offset_x, self.transform.offset_y)),
        };
        self.transform.offset_x = base_x + translation.0;
        self.transform.offset_y = base_y + translation.1;
    }

    pub fn end_drag(&mut self) {
        self.base.drag = None;
    }

    /// `magnification` is the cumulative factor of the current pinch
    pub fn on_pinch(&mut self, magnification: f64) {
        let base = match self.gesture_mode {
            GestureMode::Absolute => 1.0,
            GestureMode::Accumulate => *self.base.pinch.get_or_insert(self.transform.scale),
        };
        self.transform.set_scale(base * magnification);
    }

    pub fn end_pinch(&mut self) {
        self.base.pinch = None;
    }

    pub fn is_pinching(&self) -> bool {
        self.base.pinch.is_some()
    }

    /// Whether a view-space point lies on the displayed image
    pub fn hit_image(&self, view_size: (u32, u32), x: f64, y: f64) -> bool {
        match &self.image {
            Some(image) => {
                let (ix, iy, iw, ih) = self.transform.image_rect((image.width, image.height), view_size);
                x >= ix && x < ix + iw && y >= iy && y < iy + ih
            }
            None => false,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn solid_image(width: u32, height: u32) -> ImageData {
        ImageData {
            width,
            height,
            bgra_data: vec![255; (width * height * 4) as usize],
            mipmaps: Vec::new(),
        }
    }

    #[test]
    fn opacity_is_clamped_to_slider_range() {
        let mut viewport = Viewport::new(DEFAULT_OPACITY, GestureMode::Absolute);
        viewport.set_opacity(0.05);
        assert_eq!(viewport.transform().opacity, MIN_OPACITY);
        viewport.set_opacity(3.0);
        assert_eq!(viewport.transform().opacity, MAX_OPACITY);
        viewport.set_opacity(0.55);
        assert_eq!(viewport.transform().opacity, 0.55);
        viewport.set_opacity(f32::NAN);
        assert_eq!(viewport.transform().opacity, 0.55);
    }

    #[test]
    fn launch_opacity_is_clamped_too() {
        assert_eq!(Viewport::new(0.0, GestureMode::Absolute).transform().opacity, MIN_OPACITY);
    }

    #[test]
    fn absolute_gestures_overwrite() {
        let mut viewport = Viewport::new(0.8, GestureMode::Absolute);
        viewport.replace_image(solid_image(10, 10));

        viewport.on_drag((50.0, -20.0));
        viewport.end_drag();
        viewport.on_drag((5.0, 5.0));
        assert_eq!((viewport.transform().offset_x, viewport.transform().offset_y), (5.0, 5.0));

        viewport.on_pinch(2.0);
        viewport.end_pinch();
        viewport.on_pinch(1.5);
        assert_eq!(viewport.transform().scale, 1.5);
    }

    #[test]
    fn accumulated_gestures_continue_from_previous_session() {
        let mut viewport = Viewport::new(0.8, GestureMode::Accumulate);
        viewport.on_drag((10.0, 10.0));
        viewport.on_drag((20.0, -5.0));
        viewport.end_drag();
        viewport.on_drag((1.0, 1.0));
        assert_eq!((viewport.transform().offset_x, viewport.transform().offset_y), (21.0, -4.0));

        viewport.on_pinch(2.0);
        viewport.end_pinch();
        viewport.on_pinch(1.5);
        assert_eq!(viewport.transform().scale, 3.0);
    }

    #[test]
    fn pinch_ignores_degenerate_factors_and_clamps() {
        let mut viewport = Viewport::new(0.8, GestureMode::Absolute);
        viewport.on_pinch(0.0);
        viewport.on_pinch(f64::INFINITY);
        assert_eq!(viewport.transform().scale, 1.0);
        viewport.on_pinch(100.0);
        assert_eq!(viewport.transform().scale, MAX_SCALE);
    }

    #[test]
    fn reset_keeps_opacity() {
        let mut viewport = Viewport::new(0.4, GestureMode::Absolute);
        viewport.on_drag((3.0, 4.0));
        viewport.on_pinch(4.0);
        viewport.reset_position();
        let t = viewport.transform();
        assert_eq!((t.offset_x, t.offset_y, t.scale, t.opacity), (0.0, 0.0, 1.0, 0.4));
    }

    #[test]
    fn replacing_image_bumps_generation_and_resets() {
        let mut viewport = Viewport::new(0.9, GestureMode::Absolute);
        viewport.on_drag((7.0, 7.0));
        viewport.replace_image(solid_image(4, 4));
        assert_eq!(viewport.image_generation(), 1);
        assert_eq!(viewport.transform().offset_x, 0.0);
        assert_eq!(viewport.transform().opacity, 0.9);
    }

    #[test]
    fn image_rect_fits_then_offsets_then_scales() {
        let mut t = Transform::default();
        // 200x100 image in a 400x400 view fits to 400x200, centred
        assert_eq!(t.image_rect((200, 100), (400, 400)), (0.0, 100.0, 400.0, 200.0));

        t.offset_x = 10.0;
        t.scale = 2.0;
        let (x, y, w, h) = t.image_rect((200, 100), (400, 400));
        assert_eq!((w, h), (800.0, 400.0));
        assert_eq!(x, 200.0 + 2.0 * (10.0 - 200.0));
        assert_eq!(y, 0.0);
    }

    #[test]
    fn hit_image_follows_the_transform() {
        let mut viewport = Viewport::new(1.0, GestureMode::Absolute);
        assert!(!viewport.hit_image((100, 100), 50.0, 50.0));

        viewport.replace_image(solid_image(100, 50));
        assert!(viewport.hit_image((100, 100), 50.0, 50.0));
        assert!(!viewport.hit_image((100, 100), 50.0, 10.0));

        viewport.on_drag((0.0, -40.0));
        assert!(viewport.hit_image((100, 100), 50.0, 10.0));
    }
}
