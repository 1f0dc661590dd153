// Text rendering into BGRA canvases using cosmic-text

use cosmic_text::{Attrs, Buffer, Color, Family, FontSystem, Metrics, Shaping, SwashCache};

pub struct TextRenderer {
    font_system: FontSystem,
    swash_cache: SwashCache,
}

impl TextRenderer {
    pub fn new() -> Self {
        Self {
            font_system: FontSystem::new(),
            swash_cache: SwashCache::new(),
        }
    }

    fn layout(&mut self, text: &str, size: f32) -> Buffer {
        let mut buffer = Buffer::new(&mut self.font_system, Metrics::new(size, size * 1.25));
        buffer.set_size(&mut self.font_system, None, None);
        buffer.set_text(
            &mut self.font_system,
            text,
            Attrs::new().family(Family::SansSerif),
            Shaping::Advanced,
        );
        buffer.shape_until_scroll(&mut self.font_system, false);
        buffer
    }

    /// Width and line height of a single line of text
    pub fn measure(&mut self, text: &str, size: f32) -> (f32, f32) {
        let buffer = self.layout(text, size);
        let width = buffer
            .layout_runs()
            .map(|run| run.line_w)
            .fold(0.0f32, f32::max);
        (width, size * 1.25)
    }

    /// Draw `text` with its top-left corner at `(x, y)`. `color` is BGRA.
    #[allow(clippy::too_many_arguments)]
    pub fn draw(
        &mut self,
        canvas: &mut [u8],
        canvas_width: u32,
        canvas_height: u32,
        x: i32,
        y: i32,
        text: &str,
        size: f32,
        color: [u8; 4],
    ) {
        let buffer = self.layout(text, size);
        let text_color = Color::rgba(color[2], color[1], color[0], color[3]);

        buffer.draw(
            &mut self.font_system,
            &mut self.swash_cache,
            text_color,
            |gx, gy, gw, gh, c| {
                let alpha = c.a();
                if alpha == 0 {
                    return;
                }
                for py in (y + gy)..(y + gy + gh as i32) {
                    for px in (x + gx)..(x + gx + gw as i32) {
                        blend_pixel(canvas, canvas_width, canvas_height, px, py, [c.b(), c.g(), c.r(), alpha]);
                    }
                }
            },
        );
    }

    /// Draw `text` centred inside a rectangle
    #[allow(clippy::too_many_arguments)]
    pub fn draw_centered(
        &mut self,
        canvas: &mut [u8],
        canvas_width: u32,
        canvas_height: u32,
        center: (f64, f64),
        text: &str,
        size: f32,
        color: [u8; 4],
    ) {
        let (w, h) = self.measure(text, size);
        let x = (center.0 - w as f64 / 2.0).round() as i32;
        let y = (center.1 - h as f64 / 2.0).round() as i32;
        self.draw(canvas, canvas_width, canvas_height, x, y, text, size, color);
    }
}

/// Source-over blend of a straight-alpha BGRA colour into a premultiplied canvas
pub fn blend_pixel(canvas: &mut [u8], width: u32, height: u32, x: i32, y: i32, color: [u8; 4]) {
    if x < 0 || y < 0 || x >= width as i32 || y >= height as i32 {
        return;
    }
    let idx = ((y as u32 * width + x as u32) * 4) as usize;
    let Some(dst) = canvas.get_mut(idx..idx + 4) else {
        return;
    };

    let src_a = color[3] as u32;
    let inv_a = 255 - src_a;
    for c in 0..3 {
        dst[c] = ((color[c] as u32 * src_a + dst[c] as u32 * inv_a) / 255) as u8;
    }
    dst[3] = (src_a + dst[3] as u32 * inv_a / 255).min(255) as u8;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blend_over_transparent_takes_source() {
        let mut canvas = vec![0u8; 4];
        blend_pixel(&mut canvas, 1, 1, 0, 0, [10, 20, 30, 255]);
        assert_eq!(canvas, vec![10, 20, 30, 255]);
    }

    #[test]
    fn blend_half_alpha_mixes() {
        let mut canvas = vec![0, 0, 0, 255];
        blend_pixel(&mut canvas, 1, 1, 0, 0, [255, 255, 255, 128]);
        assert_eq!(canvas[0], 128);
        assert_eq!(canvas[3], 255);
    }

    #[test]
    fn blend_ignores_out_of_bounds() {
        let mut canvas = vec![0u8; 4];
        blend_pixel(&mut canvas, 1, 1, -1, 0, [255; 4]);
        blend_pixel(&mut canvas, 1, 1, 0, 1, [255; 4]);
        assert_eq!(canvas, vec![0; 4]);
    }
}
