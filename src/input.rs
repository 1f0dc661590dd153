// Pointer input classification
// Turns raw press/motion/release into taps and drags

/// Distance in pixels a press must travel before it becomes a drag
pub const DRAG_THRESHOLD: f64 = 4.0;

/// Opacity adjustment step for scroll wheel and keys
pub const OPACITY_STEP: f32 = 0.05;

/// Zoom factor per scroll notch while Ctrl is held
pub const ZOOM_STEP: f64 = 1.1;

/// What a high-level pointer interaction turned out to be
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Gesture {
    Tap { x: f64, y: f64 },
    DragStart,
    /// Cumulative movement since the press
    DragMove { dx: f64, dy: f64 },
    DragEnd,
}

#[derive(Debug, Clone, Copy)]
struct Press<T> {
    target: T,
    origin: (f64, f64),
    dragging: bool,
}

/// Tracks one primary-button interaction at a time. `T` is whatever the
/// caller resolved the press position to.
#[derive(Debug, Clone, Copy)]
pub struct PointerTracker<T> {
    press: Option<Press<T>>,
}

impl<T: Copy> Default for PointerTracker<T> {
    fn default() -> Self {
        Self { press: None }
    }
}

impl<T: Copy> PointerTracker<T> {
    pub fn press(&mut self, target: T, x: f64, y: f64) {
        self.press = Some(Press {
            target,
            origin: (x, y),
            dragging: false,
        });
    }

    pub fn target(&self) -> Option<T> {
        self.press.map(|p| p.target)
    }

    pub fn is_dragging(&self) -> bool {
        self.press.is_some_and(|p| p.dragging)
    }

    /// Returns the gestures a motion event produces, at most two
    pub fn motion(&mut self, x: f64, y: f64) -> Vec<Gesture> {
        let Some(press) = self.press.as_mut() else {
            return Vec::new();
        };

        let dx = x - press.origin.0;
        let dy = y - press.origin.1;
        let mut gestures = Vec::new();

        if !press.dragging {
            if dx.hypot(dy) <= DRAG_THRESHOLD {
                return gestures;
            }
            press.dragging = true;
            gestures.push(Gesture::DragStart);
        }
        gestures.push(Gesture::DragMove { dx, dy });
        gestures
    }

    pub fn release(&mut self) -> Option<(T, Gesture)> {
        let press = self.press.take()?;
        let gesture = if press.dragging {
            Gesture::DragEnd
        } else {
            Gesture::Tap {
                x: press.origin.0,
                y: press.origin.1,
            }
        };
        Some((press.target, gesture))
    }

    /// Pointer left the surface: a drag in progress ends, a pending tap is dropped
    pub fn cancel(&mut self) -> Option<(T, Gesture)> {
        let press = self.press.take()?;
        press.dragging.then_some((press.target, Gesture::DragEnd))
    }
}

/// Opacity delta for one scroll event; wheel up raises opacity
pub fn scroll_opacity_delta(vertical: f64) -> f32 {
    if vertical > 0.0 {
        -OPACITY_STEP
    } else if vertical < 0.0 {
        OPACITY_STEP
    } else {
        0.0
    }
}

/// Zoom factor for one Ctrl+scroll event; wheel up zooms in
pub fn scroll_zoom_factor(vertical: f64) -> f64 {
    if vertical > 0.0 {
        1.0 / ZOOM_STEP
    } else if vertical < 0.0 {
        ZOOM_STEP
    } else {
        1.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_movement_is_still_a_tap() {
        let mut tracker = PointerTracker::default();
        tracker.press('a', 10.0, 10.0);
        assert!(tracker.motion(12.0, 11.0).is_empty());
        assert_eq!(tracker.release(), Some(('a', Gesture::Tap { x: 10.0, y: 10.0 })));
        assert_eq!(tracker.release(), None);
    }

    #[test]
    fn drag_reports_cumulative_translation() {
        let mut tracker = PointerTracker::default();
        tracker.press(1u8, 0.0, 0.0);
        assert_eq!(
            tracker.motion(30.0, -10.0),
            vec![Gesture::DragStart, Gesture::DragMove { dx: 30.0, dy: -10.0 }]
        );
        assert_eq!(tracker.motion(50.0, -20.0), vec![Gesture::DragMove { dx: 50.0, dy: -20.0 }]);
        assert!(tracker.is_dragging());
        assert_eq!(tracker.release(), Some((1, Gesture::DragEnd)));
    }

    #[test]
    fn cancel_only_ends_real_drags() {
        let mut tracker = PointerTracker::default();
        tracker.press((), 0.0, 0.0);
        assert_eq!(tracker.cancel(), None);

        tracker.press((), 0.0, 0.0);
        tracker.motion(20.0, 0.0);
        assert_eq!(tracker.cancel(), Some(((), Gesture::DragEnd)));
    }

    #[test]
    fn scroll_directions() {
        assert_eq!(scroll_opacity_delta(10.0), -OPACITY_STEP);
        assert_eq!(scroll_opacity_delta(-10.0), OPACITY_STEP);
        assert_eq!(scroll_opacity_delta(0.0), 0.0);
        assert!(scroll_zoom_factor(-1.0) > 1.0);
        assert!(scroll_zoom_factor(1.0) < 1.0);
    }
}
