// Overlay layout
// Positions of the title strip and settings panel controls, shared by the
// renderer and the pointer hit-testing

use crate::viewport::{MAX_OPACITY, MIN_OPACITY};
use crate::window::WindowGeometry;

pub const TITLE_BAR_HEIGHT: f64 = 28.0;
const TITLE_BUTTON_SIZE: f64 = 20.0;

const PANEL_WIDTH: f64 = 280.0;
const PANEL_PADDING: f64 = 12.0;
const ROW_HEIGHT: f64 = 32.0;
const ROW_GAP: f64 = 6.0;
const LABEL_WIDTH: f64 = 72.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
}

impl Rect {
    pub fn new(x: f64, y: f64, w: f64, h: f64) -> Self {
        Self { x, y, w, h }
    }

    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.x && x < self.x + self.w && y >= self.y && y < self.y + self.h
    }

    pub fn center(&self) -> (f64, f64) {
        (self.x + self.w / 2.0, self.y + self.h / 2.0)
    }
}

/// Buttons in the title strip
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TitleControl {
    Close,
    Settings,
}

#[derive(Debug, Clone, Copy)]
pub struct TitleBarLayout {
    pub bar: Rect,
    pub close: Rect,
    pub settings: Rect,
}

impl TitleBarLayout {
    pub fn new(view: WindowGeometry) -> Self {
        let width = view.width as f64;
        let inset = (TITLE_BAR_HEIGHT - TITLE_BUTTON_SIZE) / 2.0;
        let close_x = width - inset - TITLE_BUTTON_SIZE;
        let settings_x = close_x - inset - TITLE_BUTTON_SIZE;
        Self {
            bar: Rect::new(0.0, 0.0, width, TITLE_BAR_HEIGHT),
            close: Rect::new(close_x, inset, TITLE_BUTTON_SIZE, TITLE_BUTTON_SIZE),
            settings: Rect::new(settings_x, inset, TITLE_BUTTON_SIZE, TITLE_BUTTON_SIZE),
        }
    }

    pub fn hit(&self, x: f64, y: f64) -> Option<TitleControl> {
        if self.close.contains(x, y) {
            Some(TitleControl::Close)
        } else if self.settings.contains(x, y) {
            Some(TitleControl::Settings)
        } else {
            None
        }
    }
}

/// Controls of the settings panel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingsControl {
    OpacitySlider,
    AlwaysOnTop,
    ResetPosition,
    WidthField,
    HeightField,
    Close,
}

#[derive(Debug, Clone, Copy)]
pub struct SettingsLayout {
    pub panel: Rect,
    pub opacity_label: Rect,
    pub slider: Rect,
    pub always_on_top: Rect,
    pub reset: Rect,
    pub width_label: Rect,
    pub width_field: Rect,
    pub height_label: Rect,
    pub height_field: Rect,
    pub close: Rect,
}

impl SettingsLayout {
    /// Panel centred horizontally, just under the title strip
    pub fn new(view: WindowGeometry) -> Self {
        let panel_w = PANEL_WIDTH.min(view.width as f64 - 2.0 * PANEL_PADDING);
        let panel_h = 2.0 * PANEL_PADDING + 5.0 * ROW_HEIGHT + 4.0 * ROW_GAP;
        let panel = Rect::new(
            ((view.width as f64 - panel_w) / 2.0).floor(),
            TITLE_BAR_HEIGHT + 8.0,
            panel_w,
            panel_h,
        );

        let inner_x = panel.x + PANEL_PADDING;
        let inner_w = panel.w - 2.0 * PANEL_PADDING;
        let row = |i: f64| Rect::new(inner_x, panel.y + PANEL_PADDING + i * (ROW_HEIGHT + ROW_GAP), inner_w, ROW_HEIGHT);

        let opacity_row = row(0.0);
        let size_row = row(3.0);
        let half = inner_w / 2.0;
        let field_label_w = 52.0;

        Self {
            panel,
            opacity_label: Rect::new(opacity_row.x, opacity_row.y, LABEL_WIDTH, ROW_HEIGHT),
            slider: Rect::new(
                opacity_row.x + LABEL_WIDTH,
                opacity_row.y,
                inner_w - LABEL_WIDTH,
                ROW_HEIGHT,
            ),
            always_on_top: row(1.0),
            reset: row(2.0),
            width_label: Rect::new(size_row.x, size_row.y, field_label_w, ROW_HEIGHT),
            width_field: Rect::new(size_row.x + field_label_w, size_row.y, half - field_label_w - 4.0, ROW_HEIGHT),
            height_label: Rect::new(size_row.x + half, size_row.y, field_label_w, ROW_HEIGHT),
            height_field: Rect::new(size_row.x + half + field_label_w, size_row.y, half - field_label_w, ROW_HEIGHT),
            close: row(4.0),
        }
    }

    pub fn contains(&self, x: f64, y: f64) -> bool {
        self.panel.contains(x, y)
    }

    pub fn hit(&self, x: f64, y: f64) -> Option<SettingsControl> {
        [
            (self.slider, SettingsControl::OpacitySlider),
            (self.always_on_top, SettingsControl::AlwaysOnTop),
            (self.reset, SettingsControl::ResetPosition),
            (self.width_field, SettingsControl::WidthField),
            (self.height_field, SettingsControl::HeightField),
            (self.close, SettingsControl::Close),
        ]
        .into_iter()
        .find(|(rect, _)| rect.contains(x, y))
        .map(|(_, control)| control)
    }

    /// Horizontal extent of the slider track, inset so the knob stays inside
    fn track(&self) -> (f64, f64) {
        let inset = 8.0;
        (self.slider.x + inset, self.slider.x + self.slider.w - inset)
    }

    /// Opacity under a pointer x position, clamped to the slider range
    pub fn slider_value(&self, x: f64) -> f32 {
        let (start, end) = self.track();
        let t = ((x - start) / (end - start)).clamp(0.0, 1.0) as f32;
        (MIN_OPACITY + t * (MAX_OPACITY - MIN_OPACITY)).clamp(MIN_OPACITY, MAX_OPACITY)
    }

    pub fn slider_knob_x(&self, opacity: f32) -> f64 {
        let (start, end) = self.track();
        let t = ((opacity - MIN_OPACITY) / (MAX_OPACITY - MIN_OPACITY)).clamp(0.0, 1.0) as f64;
        start + t * (end - start)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn view() -> WindowGeometry {
        WindowGeometry::new(400, 400)
    }

    #[test]
    fn slider_maps_track_ends_to_opacity_range() {
        let layout = SettingsLayout::new(view());
        let (start, end) = layout.track();
        assert_eq!(layout.slider_value(start), MIN_OPACITY);
        assert_eq!(layout.slider_value(end), MAX_OPACITY);
        assert_eq!(layout.slider_value(start - 100.0), MIN_OPACITY);
        assert_eq!(layout.slider_value(end + 100.0), MAX_OPACITY);

        let knob = layout.slider_knob_x(0.6);
        assert!((layout.slider_value(knob) - 0.6).abs() < 1e-5);
    }

    #[test]
    fn every_control_is_hittable_at_its_centre() {
        let layout = SettingsLayout::new(view());
        let cases = [
            (layout.slider, SettingsControl::OpacitySlider),
            (layout.always_on_top, SettingsControl::AlwaysOnTop),
            (layout.reset, SettingsControl::ResetPosition),
            (layout.width_field, SettingsControl::WidthField),
            (layout.height_field, SettingsControl::HeightField),
            (layout.close, SettingsControl::Close),
        ];
        for (rect, control) in cases {
            let (x, y) = rect.center();
            assert_eq!(layout.hit(x, y), Some(control));
            assert!(layout.contains(x, y));
        }
        let (x, y) = layout.opacity_label.center();
        assert_eq!(layout.hit(x, y), None);
    }

    #[test]
    fn panel_fits_minimum_window() {
        let layout = SettingsLayout::new(WindowGeometry::new(300, 300));
        assert!(layout.panel.x >= 0.0);
        assert!(layout.panel.x + layout.panel.w <= 300.0);
        assert!(layout.panel.y + layout.panel.h <= 300.0);
    }

    #[test]
    fn title_buttons_sit_at_the_right() {
        let bar = TitleBarLayout::new(view());
        let (x, y) = bar.close.center();
        assert_eq!(bar.hit(x, y), Some(TitleControl::Close));
        let (x, y) = bar.settings.center();
        assert_eq!(bar.hit(x, y), Some(TitleControl::Settings));
        assert_eq!(bar.hit(20.0, 10.0), None);
        assert!(bar.settings.x < bar.close.x);
    }
}
