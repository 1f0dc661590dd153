// CPU rendering
// Composites the transformed image, placeholder and overlays into a
// premultiplied BGRA shm canvas

use crate::image_loader::ImageData;
use crate::layout::{Rect, SettingsLayout, TitleBarLayout, TITLE_BAR_HEIGHT};
use crate::settings::SizeField;
use crate::text::{blend_pixel, TextRenderer};
use crate::viewport::Transform;
use crate::window::{WindowGeometry, RESIZE_MARGIN};

const PLACEHOLDER_TEXT: &str = "Tap to select an image";

// BGRA colours
const PLACEHOLDER_BACKDROP: [u8; 4] = [40, 40, 40, 90];
const TEXT_COLOR: [u8; 4] = [255, 255, 255, 255];
const TITLE_BAR_COLOR: [u8; 4] = [60, 60, 60, 200];
const PANEL_COLOR: [u8; 4] = [45, 45, 45, 235];
const PANEL_BORDER: [u8; 4] = [100, 100, 100, 255];
const CONTROL_COLOR: [u8; 4] = [80, 80, 80, 255];
const ACCENT_COLOR: [u8; 4] = [230, 140, 40, 255];
const FIELD_COLOR: [u8; 4] = [25, 25, 25, 255];
const CORNER_COLOR: [u8; 4] = [150, 150, 150, 100];

const BODY_TEXT_SIZE: f32 = 14.0;
const TITLE_TEXT_SIZE: f32 = 13.0;

/// What the settings panel needs to show
#[derive(Debug, Clone)]
pub struct SettingsView {
    pub opacity: f32,
    pub always_on_top: bool,
    pub width_text: String,
    pub height_text: String,
    pub focused: Option<SizeField>,
}

/// Everything drawn in one frame
#[derive(Debug, Clone)]
pub struct Scene<'a> {
    pub size: WindowGeometry,
    pub image: Option<&'a ImageData>,
    pub image_generation: u64,
    pub transform: Transform,
    /// Title text when the controls strip is shown
    pub title: Option<&'a str>,
    pub settings: Option<SettingsView>,
    /// Use nearest-neighbour sampling while the user is interacting
    pub fast: bool,
}

/// Image pixels of the last frame, rendered at full opacity
#[derive(Debug)]
struct CachedFrame {
    key: (u32, u32, u64, u64, u64, u64),
    data: Vec<u8>,
}

#[derive(Default)]
pub struct CpuRenderer {
    text: Option<TextRenderer>,
    cache: Option<CachedFrame>,
}

impl CpuRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    fn text(&mut self) -> &mut TextRenderer {
        self.text.get_or_insert_with(TextRenderer::new)
    }

    pub fn invalidate(&mut self) {
        self.cache = None;
    }

    pub fn render(&mut self, canvas: &mut [u8], scene: &Scene) {
        let (width, height) = scene.size.as_tuple();
        canvas.fill(0);

        match scene.image {
            Some(image) => self.render_image_cached(canvas, scene, image),
            None => self.render_placeholder(canvas, width, height),
        }

        if let Some(title) = scene.title {
            self.render_title_bar(canvas, scene.size, title);
            render_resize_corners(canvas, width, height);
        }

        if let Some(settings) = &scene.settings {
            self.render_settings(canvas, scene.size, settings);
        }
    }

    fn render_image_cached(&mut self, canvas: &mut [u8], scene: &Scene, image: &ImageData) {
        let (width, height) = scene.size.as_tuple();
        let t = scene.transform;
        let key = (
            width,
            height,
            scene.image_generation,
            t.offset_x.to_bits(),
            t.offset_y.to_bits(),
            t.scale.to_bits(),
        );

        if scene.fast {
            render_image(canvas, width, height, image, &t, true);
            return;
        }

        match &self.cache {
            Some(cached) if cached.key == key => {
                apply_opacity(&cached.data, canvas, t.opacity);
            }
            _ => {
                let full = Transform { opacity: 1.0, ..t };
                let mut data = vec![0u8; canvas.len()];
                render_image(&mut data, width, height, image, &full, false);
                apply_opacity(&data, canvas, t.opacity);
                self.cache = Some(CachedFrame { key, data });
            }
        }
    }

    fn render_placeholder(&mut self, canvas: &mut [u8], width: u32, height: u32) {
        fill_rect(
            canvas,
            width,
            height,
            Rect::new(0.0, 0.0, width as f64, height as f64),
            PLACEHOLDER_BACKDROP,
        );
        let center = (width as f64 / 2.0, height as f64 / 2.0);
        self.text()
            .draw_centered(canvas, width, height, center, PLACEHOLDER_TEXT, BODY_TEXT_SIZE, TEXT_COLOR);
    }

    fn render_title_bar(&mut self, canvas: &mut [u8], size: WindowGeometry, title: &str) {
        let (width, height) = size.as_tuple();
        let layout = TitleBarLayout::new(size);
        fill_rect(canvas, width, height, layout.bar, TITLE_BAR_COLOR);

        let (_, text_h) = self.text().measure(title, TITLE_TEXT_SIZE);
        let text_y = ((TITLE_BAR_HEIGHT - text_h as f64) / 2.0).round() as i32;
        self.text()
            .draw(canvas, width, height, 10, text_y, title, TITLE_TEXT_SIZE, TEXT_COLOR);

        // Settings button: three slider lines
        let s = layout.settings;
        fill_rect(canvas, width, height, s, CONTROL_COLOR);
        for (i, knob) in [0.3, 0.65, 0.45].iter().enumerate() {
            let y = s.y + 5.0 + i as f64 * 5.0;
            fill_rect(canvas, width, height, Rect::new(s.x + 4.0, y, s.w - 8.0, 1.0), TEXT_COLOR);
            fill_rect(
                canvas,
                width,
                height,
                Rect::new(s.x + 4.0 + knob * (s.w - 8.0) - 1.5, y - 1.0, 3.0, 3.0),
                TEXT_COLOR,
            );
        }

        // Close button: an X
        let c = layout.close;
        fill_rect(canvas, width, height, c, [70, 70, 200, 255]);
        for i in 0..12 {
            let d = i as f64;
            let px = (c.x + 4.0 + d) as i32;
            blend_pixel(canvas, width, height, px, (c.y + 4.0 + d) as i32, TEXT_COLOR);
            blend_pixel(canvas, width, height, px, (c.y + 15.0 - d) as i32, TEXT_COLOR);
        }
    }

    fn render_settings(&mut self, canvas: &mut [u8], size: WindowGeometry, view: &SettingsView) {
        let (width, height) = size.as_tuple();
        let layout = SettingsLayout::new(size);

        fill_rect(canvas, width, height, layout.panel, PANEL_COLOR);
        stroke_rect(canvas, width, height, layout.panel, PANEL_BORDER);

        // Opacity slider
        self.label(canvas, size, layout.opacity_label, "Opacity");
        let track = Rect::new(
            layout.slider.x + 8.0,
            layout.slider.y + layout.slider.h / 2.0 - 2.0,
            layout.slider.w - 16.0,
            4.0,
        );
        fill_rect(canvas, width, height, track, CONTROL_COLOR);
        let knob_x = layout.slider_knob_x(view.opacity);
        fill_rect(
            canvas,
            width,
            height,
            Rect::new(track.x, track.y, knob_x - track.x, track.h),
            ACCENT_COLOR,
        );
        fill_rect(
            canvas,
            width,
            height,
            Rect::new(knob_x - 6.0, layout.slider.y + layout.slider.h / 2.0 - 6.0, 12.0, 12.0),
            TEXT_COLOR,
        );

        // Always-on-top switch
        let row = layout.always_on_top;
        self.label(canvas, size, row, "Always on Top");
        let switch = Rect::new(row.x + row.w - 40.0, row.y + 8.0, 36.0, 16.0);
        let switch_color = if view.always_on_top { ACCENT_COLOR } else { CONTROL_COLOR };
        fill_rect(canvas, width, height, switch, switch_color);
        let knob_x = if view.always_on_top { switch.x + 20.0 } else { switch.x + 2.0 };
        fill_rect(canvas, width, height, Rect::new(knob_x, switch.y + 2.0, 14.0, 12.0), TEXT_COLOR);

        self.button(canvas, size, layout.reset, "Reset Image Position");

        // Size fields
        self.label(canvas, size, layout.width_label, "Width:");
        self.field(canvas, size, layout.width_field, &view.width_text, view.focused == Some(SizeField::Width));
        self.label(canvas, size, layout.height_label, "Height:");
        self.field(canvas, size, layout.height_field, &view.height_text, view.focused == Some(SizeField::Height));

        self.button(canvas, size, layout.close, "Close Settings");
    }

    fn label(&mut self, canvas: &mut [u8], size: WindowGeometry, rect: Rect, text: &str) {
        let (width, height) = size.as_tuple();
        let (_, text_h) = self.text().measure(text, BODY_TEXT_SIZE);
        let y = (rect.y + (rect.h - text_h as f64) / 2.0).round() as i32;
        self.text()
            .draw(canvas, width, height, rect.x as i32, y, text, BODY_TEXT_SIZE, TEXT_COLOR);
    }

    fn button(&mut self, canvas: &mut [u8], size: WindowGeometry, rect: Rect, text: &str) {
        let (width, height) = size.as_tuple();
        fill_rect(canvas, width, height, rect, CONTROL_COLOR);
        self.text()
            .draw_centered(canvas, width, height, rect.center(), text, BODY_TEXT_SIZE, TEXT_COLOR);
    }

    fn field(&mut self, canvas: &mut [u8], size: WindowGeometry, rect: Rect, text: &str, focused: bool) {
        let (width, height) = size.as_tuple();
        fill_rect(canvas, width, height, rect, FIELD_COLOR);
        let border = if focused { ACCENT_COLOR } else { PANEL_BORDER };
        stroke_rect(canvas, width, height, rect, border);

        let inner = Rect::new(rect.x + 6.0, rect.y, rect.w - 12.0, rect.h);
        self.label(canvas, size, inner, text);
        if focused {
            let (text_w, _) = self.text().measure(text, BODY_TEXT_SIZE);
            let caret = Rect::new(inner.x + text_w as f64 + 1.0, rect.y + 7.0, 1.0, rect.h - 14.0);
            fill_rect(canvas, width, height, caret, TEXT_COLOR);
        }
    }
}

/// Draw the image with the transform applied. Bilinear when `fast` is false,
/// nearest-neighbour otherwise. Output is premultiplied by alpha and opacity.
pub fn render_image(
    canvas: &mut [u8],
    width: u32,
    height: u32,
    image: &ImageData,
    transform: &Transform,
    fast: bool,
) {
    let (ix, iy, iw, ih) = transform.image_rect((image.width, image.height), (width, height));
    if iw <= 0.0 || ih <= 0.0 {
        return;
    }

    let (img_width, img_height, src_data) = image.level_for_scale(iw / image.width as f64);
    let scale_x = img_width as f64 / iw;
    let scale_y = img_height as f64 / ih;
    let opacity = transform.opacity.clamp(0.0, 1.0);

    // Clip the destination to the canvas
    let x_start = ix.max(0.0).floor() as u32;
    let y_start = iy.max(0.0).floor() as u32;
    let x_end = (ix + iw).min(width as f64).ceil().max(0.0) as u32;
    let y_end = (iy + ih).min(height as f64).ceil().max(0.0) as u32;

    let get_pixel = |px: u32, py: u32| -> [f32; 4] {
        let idx = ((py * img_width + px) * 4) as usize;
        [
            src_data[idx] as f32,
            src_data[idx + 1] as f32,
            src_data[idx + 2] as f32,
            src_data[idx + 3] as f32,
        ]
    };

    for y in y_start..y_end {
        let src_y = (y as f64 + 0.5 - iy) * scale_y - 0.5;
        if src_y < -0.5 || src_y > img_height as f64 - 0.5 {
            continue;
        }
        for x in x_start..x_end {
            let src_x = (x as f64 + 0.5 - ix) * scale_x - 0.5;
            if src_x < -0.5 || src_x > img_width as f64 - 0.5 {
                continue;
            }

            let pixel = if fast {
                let px = (src_x.round().max(0.0) as u32).min(img_width - 1);
                let py = (src_y.round().max(0.0) as u32).min(img_height - 1);
                get_pixel(px, py)
            } else {
                let sx = src_x.max(0.0);
                let sy = src_y.max(0.0);
                let x0 = (sx.floor() as u32).min(img_width - 1);
                let y0 = (sy.floor() as u32).min(img_height - 1);
                let x1 = (x0 + 1).min(img_width - 1);
                let y1 = (y0 + 1).min(img_height - 1);
                let fx = (sx - x0 as f64) as f32;
                let fy = (sy - y0 as f64) as f32;

                let p00 = get_pixel(x0, y0);
                let p10 = get_pixel(x1, y0);
                let p01 = get_pixel(x0, y1);
                let p11 = get_pixel(x1, y1);
                let mut out = [0.0f32; 4];
                for c in 0..4 {
                    let top = p00[c] * (1.0 - fx) + p10[c] * fx;
                    let bottom = p01[c] * (1.0 - fx) + p11[c] * fx;
                    out[c] = top * (1.0 - fy) + bottom * fy;
                }
                out
            };

            let dst_idx = ((y * width + x) * 4) as usize;
            if dst_idx + 3 < canvas.len() {
                let alpha = pixel[3] / 255.0 * opacity;
                canvas[dst_idx] = (pixel[0] * alpha).round().clamp(0.0, 255.0) as u8;
                canvas[dst_idx + 1] = (pixel[1] * alpha).round().clamp(0.0, 255.0) as u8;
                canvas[dst_idx + 2] = (pixel[2] * alpha).round().clamp(0.0, 255.0) as u8;
                canvas[dst_idx + 3] = (alpha * 255.0).round().clamp(0.0, 255.0) as u8;
            }
        }
    }
}

/// Scale a premultiplied full-opacity frame by `opacity`, rounding the same
/// way `render_image` does
fn apply_opacity(cached: &[u8], canvas: &mut [u8], opacity: f32) {
    let opacity = opacity.clamp(0.0, 1.0);
    let mut table = [0u8; 256];
    for (value, out) in table.iter_mut().enumerate() {
        *out = (value as f32 * opacity).round() as u8;
    }
    for (dst, src) in canvas.iter_mut().zip(cached) {
        *dst = table[*src as usize];
    }
}

fn fill_rect(canvas: &mut [u8], width: u32, height: u32, rect: Rect, color: [u8; 4]) {
    let x0 = rect.x.round().max(0.0) as i32;
    let y0 = rect.y.round().max(0.0) as i32;
    let x1 = (rect.x + rect.w).round().min(width as f64) as i32;
    let y1 = (rect.y + rect.h).round().min(height as f64) as i32;
    for y in y0..y1 {
        for x in x0..x1 {
            blend_pixel(canvas, width, height, x, y, color);
        }
    }
}

fn stroke_rect(canvas: &mut [u8], width: u32, height: u32, rect: Rect, color: [u8; 4]) {
    let (x, y, w, h) = (rect.x, rect.y, rect.w, rect.h);
    fill_rect(canvas, width, height, Rect::new(x, y, w, 1.0), color);
    fill_rect(canvas, width, height, Rect::new(x, y + h - 1.0, w, 1.0), color);
    fill_rect(canvas, width, height, Rect::new(x, y, 1.0, h), color);
    fill_rect(canvas, width, height, Rect::new(x + w - 1.0, y, 1.0, h), color);
}

/// Subtle corner marks showing where the window can be resized
fn render_resize_corners(canvas: &mut [u8], width: u32, height: u32) {
    let corner = RESIZE_MARGIN;
    let (w, h) = (width as f64, height as f64);
    for (x, y) in [(0.0, 0.0), (w - corner, 0.0), (0.0, h - corner), (w - corner, h - corner)] {
        stroke_rect(canvas, width, height, Rect::new(x, y, corner, corner), CORNER_COLOR);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::viewport::tests::solid_image;

    fn pixel(canvas: &[u8], width: u32, x: u32, y: u32) -> [u8; 4] {
        let idx = ((y * width + x) * 4) as usize;
        [canvas[idx], canvas[idx + 1], canvas[idx + 2], canvas[idx + 3]]
    }

    #[test]
    fn image_is_fitted_and_background_stays_clear() {
        // 2:1 image in a square view fills the middle band only
        let image = solid_image(20, 10);
        let mut canvas = vec![0u8; 40 * 40 * 4];
        render_image(&mut canvas, 40, 40, &image, &Transform { opacity: 1.0, ..Transform::default() }, false);

        assert_eq!(pixel(&canvas, 40, 20, 20), [255, 255, 255, 255]);
        assert_eq!(pixel(&canvas, 40, 20, 2), [0, 0, 0, 0]);
        assert_eq!(pixel(&canvas, 40, 20, 37), [0, 0, 0, 0]);
    }

    #[test]
    fn opacity_is_applied_exactly() {
        let image = solid_image(10, 10);
        let mut canvas = vec![0u8; 10 * 10 * 4];
        let transform = Transform { opacity: 0.5, ..Transform::default() };
        render_image(&mut canvas, 10, 10, &image, &transform, true);
        assert_eq!(pixel(&canvas, 10, 5, 5), [128, 128, 128, 128]);
    }

    #[test]
    fn offset_moves_image_out_of_view() {
        let image = solid_image(10, 10);
        let mut canvas = vec![0u8; 10 * 10 * 4];
        let transform = Transform { offset_x: 100.0, opacity: 1.0, ..Transform::default() };
        render_image(&mut canvas, 10, 10, &image, &transform, false);
        assert!(canvas.iter().all(|&b| b == 0));
    }

    #[test]
    fn cached_opacity_matches_direct_render() {
        let image = solid_image(10, 10);
        let mut cached = vec![0u8; 10 * 10 * 4];
        render_image(&mut cached, 10, 10, &image, &Transform { opacity: 1.0, ..Transform::default() }, false);
        let mut canvas = vec![0u8; cached.len()];
        apply_opacity(&cached, &mut canvas, 1.0);
        assert_eq!(canvas, cached);
    }

    #[test]
    fn cached_frame_at_half_opacity_matches_direct_render() {
        let image = solid_image(10, 10);
        let transform = Transform { opacity: 0.5, ..Transform::default() };
        let mut direct = vec![0u8; 400 * 400 * 4];
        render_image(&mut direct, 400, 400, &image, &transform, false);

        let scene = Scene {
            size: WindowGeometry::new(400, 400),
            image: Some(&image),
            image_generation: 1,
            transform,
            title: None,
            settings: None,
            fast: false,
        };
        let mut renderer = CpuRenderer::new();
        let mut canvas = vec![0u8; direct.len()];
        // First frame fills the cache, the second is served from it
        for _ in 0..2 {
            renderer.render(&mut canvas, &scene);
            assert_eq!(pixel(&canvas, 400, 200, 200), pixel(&direct, 400, 200, 200));
        }
        assert_eq!(pixel(&canvas, 400, 200, 200), [128, 128, 128, 128]);
    }
}
