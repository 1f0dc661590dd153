// Settings panel state
// Visibility and the in-progress edit of the width/height fields

use crate::window::WindowGeometry;

/// Longest value accepted by a size field
const MAX_FIELD_DIGITS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeField {
    Width,
    Height,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct FieldEdit {
    field: SizeField,
    text: String,
}

/// Modal settings panel
#[derive(Debug, Default)]
pub struct SettingsPanel {
    visible: bool,
    edit: Option<FieldEdit>,
    /// Slider is being dragged
    sliding: bool,
}

impl SettingsPanel {
    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn toggle(&mut self) {
        if self.visible {
            self.close();
        } else {
            self.visible = true;
        }
    }

    pub fn close(&mut self) {
        self.visible = false;
        self.edit = None;
        self.sliding = false;
    }

    pub fn set_sliding(&mut self, sliding: bool) {
        self.sliding = sliding;
    }

    pub fn is_sliding(&self) -> bool {
        self.sliding
    }

    pub fn focused(&self) -> Option<SizeField> {
        self.edit.as_ref().map(|e| e.field)
    }

    /// Focus a field, seeding it with the current value
    pub fn begin_edit(&mut self, field: SizeField, current: WindowGeometry) {
        let value = match field {
            SizeField::Width => current.width,
            SizeField::Height => current.height,
        };
        self.edit = Some(FieldEdit {
            field,
            text: value.to_string(),
        });
    }

    /// Digits only; anything else is ignored
    pub fn push_char(&mut self, c: char) -> bool {
        match self.edit.as_mut() {
            Some(edit) if c.is_ascii_digit() && edit.text.len() < MAX_FIELD_DIGITS => {
                edit.text.push(c);
                true
            }
            _ => false,
        }
    }

    pub fn backspace(&mut self) -> bool {
        self.edit.as_mut().and_then(|e| e.text.pop()).is_some()
    }

    pub fn cancel_edit(&mut self) -> bool {
        self.edit.take().is_some()
    }

    /// Finish the edit. Returns the requested geometry when the field held a
    /// usable number.
    pub fn commit_edit(&mut self, current: WindowGeometry) -> Option<WindowGeometry> {
        let edit = self.edit.take()?;
        let value: u32 = edit.text.parse().ok()?;
        let requested = match edit.field {
            SizeField::Width => WindowGeometry {
                width: value,
                ..current
            },
            SizeField::Height => WindowGeometry {
                height: value,
                ..current
            },
        };
        Some(requested.clamped())
    }

    /// Text shown in a field: the edit buffer while focused, else the live size
    pub fn field_text(&self, field: SizeField, current: WindowGeometry) -> String {
        match &self.edit {
            Some(edit) if edit.field == field => edit.text.clone(),
            _ => match field {
                SizeField::Width => current.width.to_string(),
                SizeField::Height => current.height.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::window::{MAX_SIZE, MIN_SIZE};

    fn size() -> WindowGeometry {
        WindowGeometry::new(640, 480)
    }

    #[test]
    fn toggle_flips_and_close_drops_edit() {
        let mut panel = SettingsPanel::default();
        panel.toggle();
        assert!(panel.is_visible());
        panel.begin_edit(SizeField::Width, size());
        panel.toggle();
        assert!(!panel.is_visible());
        assert_eq!(panel.focused(), None);
    }

    #[test]
    fn editing_replaces_one_axis() {
        let mut panel = SettingsPanel::default();
        panel.begin_edit(SizeField::Height, size());
        assert_eq!(panel.field_text(SizeField::Height, size()), "480");
        for _ in 0..3 {
            panel.backspace();
        }
        assert!(panel.push_char('5'));
        assert!(!panel.push_char('x'));
        assert!(panel.push_char('0'));
        assert!(panel.push_char('0'));
        assert_eq!(panel.field_text(SizeField::Height, size()), "500");
        assert_eq!(panel.field_text(SizeField::Width, size()), "640");

        assert_eq!(panel.commit_edit(size()), Some(WindowGeometry::new(640, 500)));
        assert_eq!(panel.focused(), None);
    }

    #[test]
    fn committed_sizes_are_clamped() {
        let mut panel = SettingsPanel::default();
        panel.begin_edit(SizeField::Width, size());
        panel.backspace();
        panel.backspace();
        assert_eq!(panel.commit_edit(size()).unwrap().width, MIN_SIZE);

        panel.begin_edit(SizeField::Width, size());
        panel.push_char('9');
        assert_eq!(panel.commit_edit(size()).unwrap().width, MAX_SIZE);
    }

    #[test]
    fn empty_field_or_cancel_changes_nothing() {
        let mut panel = SettingsPanel::default();
        panel.begin_edit(SizeField::Width, size());
        while panel.backspace() {}
        assert_eq!(panel.commit_edit(size()), None);

        panel.begin_edit(SizeField::Width, size());
        assert!(panel.cancel_edit());
        assert_eq!(panel.commit_edit(size()), None);
    }

    #[test]
    fn field_length_is_capped() {
        let mut panel = SettingsPanel::default();
        panel.begin_edit(SizeField::Width, size());
        assert!(panel.push_char('1'));
        assert!(!panel.push_char('1'));
    }
}
