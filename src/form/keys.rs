//! Form-wide keyboard shortcuts.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyChord {
    pub key: char,
    pub ctrl: bool,
    pub meta: bool,
    pub shift: bool,
    pub alt: bool,
}

impl KeyChord {
    pub fn new(key: char) -> Self {
        Self {
            key,
            ctrl: false,
            meta: false,
            shift: false,
            alt: false,
        }
    }

    pub fn ctrl(mut self) -> Self {
        self.ctrl = true;
        self
    }

    pub fn meta(mut self) -> Self {
        self.meta = true;
        self
    }

    pub fn shift(mut self) -> Self {
        self.shift = true;
        self
    }

    /// Ctrl on most platforms, Cmd on macOS.
    fn command(&self) -> bool {
        (self.ctrl || self.meta) && !self.alt
    }
}

/// Where keyboard focus is when a chord arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FocusTarget {
    #[default]
    Body,
    TextInput,
    TextArea,
    Select,
    Other,
}

impl FocusTarget {
    fn edits_text(&self) -> bool {
        matches!(self, Self::TextInput | Self::TextArea | Self::Select)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormAction {
    Submit,
    Duplicate,
}

/// Ctrl/Cmd+S submits, Ctrl/Cmd+Shift+D duplicates. Nothing fires while the
/// user is typing into a control.
pub fn shortcut(chord: KeyChord, focus: FocusTarget) -> Option<FormAction> {
    if focus.edits_text() || !chord.command() {
        return None;
    }
    match (chord.key.to_ascii_lowercase(), chord.shift) {
        ('s', false) => Some(FormAction::Submit),
        ('d', true) => Some(FormAction::Duplicate),
        _ => None,
    }
}
