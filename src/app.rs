// Application context
// Owns the viewport state and drives the window shell; every mutating
// operation ends with an explicit redraw request

use crate::drop_loader::{DecodeOutcome, DropPayload, DropQueue};
use crate::image_loader::{self, ImageData, IMAGE_EXTENSIONS};
use crate::settings::SettingsPanel;
use crate::viewport::{GestureMode, Viewport};
use crate::window::{WindowChrome, WindowGeometry, WindowLevel, WindowManager};
use log::{debug, info};
use std::path::PathBuf;

/// Source of user-chosen image paths
pub trait FilePicker {
    /// `None` when the user cancelled
    fn pick_image(&mut self) -> Option<PathBuf>;
}

/// Native dialog via rfd
#[derive(Debug, Default)]
pub struct RfdPicker;

impl FilePicker for RfdPicker {
    fn pick_image(&mut self) -> Option<PathBuf> {
        rfd::FileDialog::new()
            .set_title("Select an image")
            .add_filter("Images", IMAGE_EXTENSIONS)
            .pick_file()
    }
}

/// Initial state handed over by the command line
#[derive(Debug, Clone, Copy)]
pub struct LaunchOptions {
    pub opacity: f32,
    pub always_on_top: bool,
    pub gesture_mode: GestureMode,
}

/// Everything the floating window needs, passed explicitly to the shell
pub struct AppContext<W: WindowManager, P: FilePicker> {
    viewport: Viewport,
    settings: SettingsPanel,
    always_on_top: bool,
    chrome: WindowChrome,
    drops: DropQueue,
    window: W,
    picker: P,
}

impl<W: WindowManager, P: FilePicker> AppContext<W, P> {
    pub fn new(window: W, picker: P, options: LaunchOptions) -> Self {
        Self {
            viewport: Viewport::new(options.opacity, options.gesture_mode),
            settings: SettingsPanel::default(),
            always_on_top: options.always_on_top,
            chrome: WindowChrome::default(),
            drops: DropQueue::default(),
            window,
            picker,
        }
    }

    /// Apply the launch chrome and stacking level. Called once.
    pub fn launch(&mut self) {
        info!(
            "Launching with opacity {:.2}, always on top: {}, gesture mode: {:?}",
            self.viewport.transform().opacity,
            self.always_on_top,
            self.viewport.gesture_mode()
        );
        self.window.apply_chrome(&self.chrome);
        self.window
            .set_level(WindowLevel::from_always_on_top(self.always_on_top));
        self.window.request_redraw();
    }

    pub fn viewport(&self) -> &Viewport {
        &self.viewport
    }

    pub fn settings(&self) -> &SettingsPanel {
        &self.settings
    }

    pub fn settings_mut(&mut self) -> &mut SettingsPanel {
        &mut self.settings
    }

    pub fn chrome(&self) -> &WindowChrome {
        &self.chrome
    }

    pub fn always_on_top(&self) -> bool {
        self.always_on_top
    }

    pub fn window(&self) -> &W {
        &self.window
    }

    pub fn window_mut(&mut self) -> &mut W {
        &mut self.window
    }

    /// Show a decoded image, as if it had been picked
    pub fn show_image(&mut self, image: ImageData) {
        info!("Displaying image: {}x{} pixels", image.width, image.height);
        self.viewport.replace_image(image);
        self.window.request_redraw();
    }

    /// Run the file picker. Cancel or decode failure leaves state untouched.
    pub fn select_image(&mut self) {
        // The dialog is an ordinary window; drop below it while it is open
        let level = self.window.level();
        if level != WindowLevel::Normal {
            self.window.set_level(WindowLevel::Normal);
        }
        let picked = self.picker.pick_image();
        if level != WindowLevel::Normal {
            self.window.set_level(level);
        }

        let Some(path) = picked else {
            debug!("File selection cancelled");
            return;
        };

        match image_loader::load_path(&path) {
            Ok(image) => {
                info!("Selected {}", path.display());
                self.show_image(image);
            }
            Err(e) => debug!("Ignoring {}: {}", path.display(), e),
        }
    }

    /// Start decoding a drop. The outcome must come back through
    /// [`AppContext::complete_drop`] on this thread.
    pub fn drop_image<F>(&mut self, payload: DropPayload, deliver: F) -> u64
    where
        F: FnOnce(DecodeOutcome) + Send + 'static,
    {
        if self.drops.in_flight() {
            debug!("New drop supersedes the one in flight");
        }
        let id = self.drops.submit(payload, deliver);
        debug!("Decoding drop {}", id);
        id
    }

    pub fn cancel_drop(&mut self) {
        self.drops.cancel();
    }

    /// Apply a finished drop if it is the newest one and decoded cleanly
    pub fn complete_drop(&mut self, outcome: DecodeOutcome) -> bool {
        if !self.drops.accept(&outcome) {
            debug!("Discarding stale drop {}", outcome.id);
            return false;
        }

        match outcome.result {
            Ok(image) => {
                if let Some(path) = &outcome.path {
                    info!("Dropped {}", path.display());
                }
                self.show_image(image);
                true
            }
            Err(e) => {
                debug!("Ignoring drop {}: {}", outcome.id, e);
                false
            }
        }
    }

    pub fn on_drag(&mut self, translation: (f64, f64)) {
        self.viewport.on_drag(translation);
        self.window.request_redraw();
    }

    pub fn end_drag(&mut self) {
        self.viewport.end_drag();
    }

    pub fn on_pinch(&mut self, magnification: f64) {
        self.viewport.on_pinch(magnification);
        self.window.request_redraw();
    }

    pub fn end_pinch(&mut self) {
        self.viewport.end_pinch();
    }

    pub fn set_opacity(&mut self, value: f32) {
        self.viewport.set_opacity(value);
        self.window.request_redraw();
    }

    pub fn adjust_opacity(&mut self, delta: f32) {
        let opacity = self.viewport.transform().opacity + delta;
        self.set_opacity(opacity);
        debug!("Opacity adjusted to: {:.2}", self.viewport.transform().opacity);
    }

    pub fn toggle_always_on_top(&mut self, enabled: bool) {
        self.always_on_top = enabled;
        let level = WindowLevel::from_always_on_top(enabled);
        info!("Window level: {:?}", level);
        self.window.set_level(level);
        self.window.request_redraw();
    }

    pub fn reset_transform_position(&mut self) {
        self.viewport.reset_position();
        self.window.request_redraw();
    }

    pub fn set_window_size(&mut self, width: u32, height: u32) {
        let size = WindowGeometry::new(width, height);
        info!("Resizing window to {}x{}", size.width, size.height);
        self.window.set_frame_size(size, true);
        self.window.request_redraw();
    }

    pub fn toggle_settings(&mut self) {
        self.settings.toggle();
        self.window.request_redraw();
    }

    pub fn close_settings(&mut self) {
        self.settings.close();
        self.window.request_redraw();
    }

    /// Commit the focused size field, resizing the window when it held a value
    pub fn commit_size_field(&mut self) {
        if let Some(size) = self.settings.commit_edit(self.window.frame_size()) {
            self.set_window_size(size.width, size.height);
        } else {
            self.window.request_redraw();
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::image_loader::tests::png_bytes;
    use crate::viewport::{DEFAULT_OPACITY, MAX_OPACITY};
    use std::collections::VecDeque;
    use std::sync::mpsc;
    use std::time::Duration;

    /// Records every window-manager call
    #[derive(Debug, Default)]
    pub(crate) struct FakeWindow {
        pub chrome: Option<WindowChrome>,
        pub levels: Vec<WindowLevel>,
        pub frames: Vec<(WindowGeometry, bool)>,
        pub size: Option<WindowGeometry>,
        pub redraws: usize,
    }

    impl WindowManager for FakeWindow {
        fn apply_chrome(&mut self, chrome: &WindowChrome) {
            self.chrome = Some(chrome.clone());
        }

        fn set_level(&mut self, level: WindowLevel) {
            self.levels.push(level);
        }

        fn level(&self) -> WindowLevel {
            self.levels.last().copied().unwrap_or_default()
        }

        fn set_frame_size(&mut self, size: WindowGeometry, animate: bool) {
            self.frames.push((size, animate));
            self.size = Some(size);
        }

        fn frame_size(&self) -> WindowGeometry {
            self.size.unwrap_or(WindowGeometry::new(400, 400))
        }

        fn request_redraw(&mut self) {
            self.redraws += 1;
        }
    }

    /// Hands out queued answers, `None` meaning "cancelled"
    #[derive(Debug, Default)]
    pub(crate) struct ScriptedPicker(pub VecDeque<Option<PathBuf>>);

    impl FilePicker for ScriptedPicker {
        fn pick_image(&mut self) -> Option<PathBuf> {
            self.0.pop_front().flatten()
        }
    }

    fn context(answers: Vec<Option<PathBuf>>) -> AppContext<FakeWindow, ScriptedPicker> {
        AppContext::new(
            FakeWindow::default(),
            ScriptedPicker(answers.into()),
            LaunchOptions {
                opacity: DEFAULT_OPACITY,
                always_on_top: true,
                gesture_mode: GestureMode::Absolute,
            },
        )
    }

    #[test]
    fn launch_applies_chrome_and_floating_level() {
        let mut ctx = context(vec![]);
        ctx.launch();
        assert_eq!(ctx.window().chrome.as_ref(), Some(&WindowChrome::default()));
        assert_eq!(ctx.window().level(), WindowLevel::Floating);
    }

    #[test]
    fn selecting_valid_image_replaces_and_resets() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.png");
        std::fs::write(&path, png_bytes(20, 10, [0, 0, 0, 255])).unwrap();

        let mut ctx = context(vec![Some(path)]);
        ctx.set_opacity(0.5);
        ctx.on_drag((9.0, 9.0));
        ctx.on_pinch(3.0);

        ctx.select_image();
        assert_eq!(ctx.viewport().image().unwrap().width, 20);
        let t = ctx.viewport().transform();
        assert_eq!((t.offset_x, t.offset_y, t.scale, t.opacity), (0.0, 0.0, 1.0, 0.5));
    }

    #[test]
    fn cancel_or_bad_file_keeps_prior_state() {
        let dir = tempfile::tempdir().unwrap();
        let notes = dir.path().join("notes.txt");
        std::fs::write(&notes, "not an image").unwrap();

        let mut ctx = context(vec![None, Some(notes)]);
        ctx.on_drag((4.0, 2.0));
        let before = ctx.viewport().transform();

        ctx.select_image();
        ctx.select_image();
        assert!(!ctx.viewport().has_image());
        assert_eq!(ctx.viewport().transform(), before);
    }

    #[test]
    fn drag_pinch_reset_scenario() {
        let mut ctx = context(vec![]);
        ctx.show_image(image_loader::load_bytes(&png_bytes(10, 10, [5, 5, 5, 255])).unwrap());

        ctx.on_drag((50.0, -20.0));
        let t = ctx.viewport().transform();
        assert_eq!((t.offset_x, t.offset_y), (50.0, -20.0));

        ctx.on_pinch(2.0);
        assert_eq!(ctx.viewport().transform().scale, 2.0);

        ctx.reset_transform_position();
        let t = ctx.viewport().transform();
        assert_eq!((t.offset_x, t.offset_y, t.scale, t.opacity), (0.0, 0.0, 1.0, DEFAULT_OPACITY));
    }

    #[test]
    fn picker_opens_with_window_lowered() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("c.png");
        std::fs::write(&path, png_bytes(8, 8, [2, 2, 2, 255])).unwrap();

        let mut ctx = context(vec![Some(path), None]);
        ctx.launch();

        ctx.select_image();
        assert!(ctx.viewport().has_image());
        assert_eq!(
            ctx.window().levels[1..],
            [WindowLevel::Normal, WindowLevel::Floating]
        );

        // Cancelling restores the level as well
        ctx.select_image();
        assert_eq!(
            ctx.window().levels[3..],
            [WindowLevel::Normal, WindowLevel::Floating]
        );
        assert_eq!(ctx.window().level(), WindowLevel::Floating);
    }

    #[test]
    fn picker_leaves_normal_level_alone() {
        let mut ctx = context(vec![None]);
        ctx.toggle_always_on_top(false);
        ctx.select_image();
        assert_eq!(ctx.window().levels, vec![WindowLevel::Normal]);
    }

    #[test]
    fn always_on_top_round_trip_returns_to_normal() {
        let mut ctx = context(vec![]);
        ctx.toggle_always_on_top(true);
        ctx.toggle_always_on_top(false);
        assert_eq!(ctx.window().levels, vec![WindowLevel::Floating, WindowLevel::Normal]);
        assert_eq!(ctx.window().level(), WindowLevel::Normal);
        assert!(!ctx.always_on_top());
    }

    #[test]
    fn every_mutation_requests_a_redraw() {
        let mut ctx = context(vec![]);
        ctx.set_opacity(0.3);
        ctx.adjust_opacity(1.0);
        assert_eq!(ctx.viewport().transform().opacity, MAX_OPACITY);
        ctx.on_drag((1.0, 1.0));
        ctx.on_pinch(1.2);
        ctx.reset_transform_position();
        ctx.toggle_settings();
        assert_eq!(ctx.window().redraws, 6);
    }

    #[test]
    fn set_window_size_is_clamped_and_animated() {
        let mut ctx = context(vec![]);
        ctx.set_window_size(100, 5000);
        assert_eq!(ctx.window().frames, vec![(WindowGeometry::new(300, 4096), true)]);
    }

    #[test]
    fn committing_size_field_resizes_window() {
        let mut ctx = context(vec![]);
        ctx.toggle_settings();
        let current = ctx.window().frame_size();
        ctx.settings_mut().begin_edit(crate::settings::SizeField::Width, current);
        ctx.settings_mut().push_char('0');
        ctx.commit_size_field();
        assert_eq!(ctx.window().frames, vec![(WindowGeometry::new(4000, 400), true)]);
    }

    #[test]
    fn dropping_text_file_keeps_placeholder() {
        let dir = tempfile::tempdir().unwrap();
        let notes = dir.path().join("notes.txt");
        std::fs::write(&notes, "plain text").unwrap();

        let mut ctx = context(vec![]);
        let (tx, rx) = mpsc::channel();
        ctx.drop_image(DropPayload::Uri(format!("file://{}", notes.display())), move |o| {
            let _ = tx.send(o);
        });
        let outcome = rx.recv_timeout(Duration::from_secs(10)).unwrap();
        assert!(!ctx.complete_drop(outcome));
        assert!(!ctx.viewport().has_image());
    }

    #[test]
    fn dropped_image_replaces_and_resets() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("b.png");
        std::fs::write(&path, png_bytes(6, 6, [1, 1, 1, 255])).unwrap();

        let mut ctx = context(vec![]);
        ctx.set_opacity(0.9);
        ctx.on_drag((30.0, 30.0));

        let (tx, rx) = mpsc::channel();
        ctx.drop_image(DropPayload::Uri(format!("file://{}", path.display())), move |o| {
            let _ = tx.send(o);
        });
        let outcome = rx.recv_timeout(Duration::from_secs(10)).unwrap();
        assert!(ctx.complete_drop(outcome));

        let t = ctx.viewport().transform();
        assert_eq!((t.offset_x, t.offset_y, t.scale, t.opacity), (0.0, 0.0, 1.0, 0.9));
        assert_eq!(ctx.viewport().image().unwrap().width, 6);
    }
}
