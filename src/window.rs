// Window shell module
// Launch-time chrome, stacking level and frame geometry of the floating window

use std::time::{Duration, Instant};

/// Minimum window size on either axis
pub const MIN_SIZE: u32 = 300;

/// Maximum window size to prevent buffer allocation failures
pub const MAX_SIZE: u32 = 4096;

/// Resize edge detection margin in pixels
pub const RESIZE_MARGIN: f64 = 10.0;

/// Duration of an animated frame resize
pub const RESIZE_ANIMATION: Duration = Duration::from_millis(150);

/// Fixed presentation applied once at start-up
#[derive(Debug, Clone, PartialEq)]
pub struct WindowChrome {
    pub title: &'static str,
    /// An opaque window paints its background; ours lets the desktop show through
    pub opaque: bool,
    /// Background fill as BGRA
    pub background: [u8; 4],
    pub shadow: bool,
    pub movable_by_background: bool,
    pub full_size_content: bool,
    pub show_controls: bool,
}

impl Default for WindowChrome {
    fn default() -> Self {
        Self {
            title: "ImageFloat",
            opaque: false,
            background: [0, 0, 0, 0],
            shadow: false,
            movable_by_background: true,
            full_size_content: true,
            show_controls: true,
        }
    }
}

/// Stacking policy of the window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WindowLevel {
    #[default]
    Normal,
    /// Kept above normal-level windows
    Floating,
}

impl WindowLevel {
    pub fn from_always_on_top(enabled: bool) -> Self {
        if enabled {
            WindowLevel::Floating
        } else {
            WindowLevel::Normal
        }
    }
}

/// Frame size of the window in surface pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowGeometry {
    pub width: u32,
    pub height: u32,
}

impl WindowGeometry {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }.clamped()
    }

    pub fn clamped(self) -> Self {
        Self {
            width: self.width.clamp(MIN_SIZE, MAX_SIZE),
            height: self.height.clamp(MIN_SIZE, MAX_SIZE),
        }
    }

    pub fn as_tuple(self) -> (u32, u32) {
        (self.width, self.height)
    }
}

/// Operations the controller needs from the windowing system
pub trait WindowManager {
    /// One-shot presentation setup
    fn apply_chrome(&mut self, chrome: &WindowChrome);
    fn set_level(&mut self, level: WindowLevel);
    fn level(&self) -> WindowLevel;
    fn set_frame_size(&mut self, size: WindowGeometry, animate: bool);
    fn frame_size(&self) -> WindowGeometry;
    /// Ask for the view to be re-rendered with the current state
    fn request_redraw(&mut self);
}

/// Linear interpolation between two frame sizes
#[derive(Debug, Clone, Copy)]
pub struct FrameAnimation {
    from: WindowGeometry,
    to: WindowGeometry,
    start: Instant,
    duration: Duration,
}

impl FrameAnimation {
    pub fn new(from: WindowGeometry, to: WindowGeometry, start: Instant) -> Self {
        Self {
            from,
            to,
            start,
            duration: RESIZE_ANIMATION,
        }
    }

    pub fn target(&self) -> WindowGeometry {
        self.to
    }

    /// Size at `now`, and whether the animation has finished
    pub fn sample(&self, now: Instant) -> (WindowGeometry, bool) {
        let elapsed = now.saturating_duration_since(self.start);
        if elapsed >= self.duration {
            return (self.to, true);
        }
        let t = elapsed.as_secs_f64() / self.duration.as_secs_f64();
        let lerp = |a: u32, b: u32| (a as f64 + (b as f64 - a as f64) * t).round() as u32;
        (
            WindowGeometry {
                width: lerp(self.from.width, self.to.width),
                height: lerp(self.from.height, self.to.height),
            },
            false,
        )
    }
}

/// Resize direction flags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResizeEdge {
    Top,
    Bottom,
    Left,
    Right,
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
}

/// Detect which resize edge a point is near
pub fn detect_resize_edge(size: WindowGeometry, x: f64, y: f64) -> Option<ResizeEdge> {
    let w = size.width as f64;
    let h = size.height as f64;

    let near_left = x < RESIZE_MARGIN;
    let near_right = x > w - RESIZE_MARGIN;
    let near_top = y < RESIZE_MARGIN;
    let near_bottom = y > h - RESIZE_MARGIN;

    match (near_left, near_right, near_top, near_bottom) {
        (true, false, true, false) => Some(ResizeEdge::TopLeft),
        (false, true, true, false) => Some(ResizeEdge::TopRight),
        (true, false, false, true) => Some(ResizeEdge::BottomLeft),
        (false, true, false, true) => Some(ResizeEdge::BottomRight),
        (true, false, false, false) => Some(ResizeEdge::Left),
        (false, true, false, false) => Some(ResizeEdge::Right),
        (false, false, true, false) => Some(ResizeEdge::Top),
        (false, false, false, true) => Some(ResizeEdge::Bottom),
        _ => None,
    }
}

/// New size and top-left margins after dragging `edge` by `(dx, dy)`.
/// The opposite edge stays put, also when the size hits its limits.
pub fn resize_geometry(
    edge: ResizeEdge,
    start_size: WindowGeometry,
    start_margin: (i32, i32),
    dx: i32,
    dy: i32,
) -> (WindowGeometry, (i32, i32)) {
    let (grow_left, grow_right, grow_top, grow_bottom) = match edge {
        ResizeEdge::Top => (false, false, true, false),
        ResizeEdge::Bottom => (false, false, false, true),
        ResizeEdge::Left => (true, false, false, false),
        ResizeEdge::Right => (false, true, false, false),
        ResizeEdge::TopLeft => (true, false, true, false),
        ResizeEdge::TopRight => (false, true, true, false),
        ResizeEdge::BottomLeft => (true, false, false, true),
        ResizeEdge::BottomRight => (false, true, false, true),
    };

    let mut width = start_size.width as i32;
    let mut height = start_size.height as i32;
    if grow_right {
        width += dx;
    } else if grow_left {
        width -= dx;
    }
    if grow_bottom {
        height += dy;
    } else if grow_top {
        height -= dy;
    }

    let size = WindowGeometry::new(width.max(0) as u32, height.max(0) as u32);

    let (mut margin_left, mut margin_top) = start_margin;
    if grow_left {
        margin_left += start_size.width as i32 - size.width as i32;
    }
    if grow_top {
        margin_top += start_size.height as i32 - size.height as i32;
    }

    (size, (margin_left, margin_top))
}

/// Calculate the display size limited to a fraction of the screen area
pub fn calculate_limited_size(
    img_width: u32,
    img_height: u32,
    screen_width: u32,
    screen_height: u32,
    max_screen_fraction: f32,
) -> (u32, u32) {
    let max_width = (screen_width as f32 * max_screen_fraction.sqrt()) as u32;
    let max_height = (screen_height as f32 * max_screen_fraction.sqrt()) as u32;

    if img_width <= max_width && img_height <= max_height {
        return (img_width, img_height);
    }

    let scale_x = max_width as f32 / img_width as f32;
    let scale_y = max_height as f32 / img_height as f32;
    let scale = scale_x.min(scale_y);

    let new_width = (img_width as f32 * scale) as u32;
    let new_height = (img_height as f32 * scale) as u32;

    (new_width.max(1), new_height.max(1))
}
