use crossterm::event::KeyCode;
use crossterm::event::KeyEvent;
use crossterm::event::KeyEventKind;
use crossterm::event::KeyModifiers;
use unicode_width::UnicodeWidthStr;

use crate::app_event::UserAction;
use crate::slash_command::parse_submission;

/// Single-line input editor. Key bindings that act on the application rather
/// than the text are translated into [`UserAction`]s here.
#[derive(Debug, Default)]
pub(crate) struct Composer {
    text: String,
    /// Cursor position as a byte offset into `text`, always on a char
    /// boundary.
    cursor: usize,
}

impl Composer {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn text(&self) -> &str {
        &self.text
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// Display column of the cursor.
    pub(crate) fn cursor_column(&self) -> usize {
        self.text[..self.cursor].width()
    }

    pub(crate) fn handle_key_event(&mut self, key: KeyEvent) -> Option<UserAction> {
        if !matches!(key.kind, KeyEventKind::Press | KeyEventKind::Repeat) {
            return None;
        }
        if key.modifiers.contains(KeyModifiers::CONTROL) {
            return self.handle_control(key.code);
        }
        match key.code {
            KeyCode::Enter => {
                let submitted = std::mem::take(&mut self.text);
                self.cursor = 0;
                parse_submission(&submitted)
            }
            KeyCode::Char(c) => {
                self.insert_str(c.encode_utf8(&mut [0; 4]));
                None
            }
            KeyCode::Backspace => {
                if let Some(prev) = self.prev_boundary() {
                    self.text.replace_range(prev..self.cursor, "");
                    self.cursor = prev;
                }
                None
            }
            KeyCode::Delete => {
                self.delete_forward();
                None
            }
            KeyCode::Left => {
                if let Some(prev) = self.prev_boundary() {
                    self.cursor = prev;
                }
                None
            }
            KeyCode::Right => {
                if let Some(next) = self.next_boundary() {
                    self.cursor = next;
                }
                None
            }
            KeyCode::Home => {
                self.cursor = 0;
                None
            }
            KeyCode::End => {
                self.cursor = self.text.len();
                None
            }
            _ => None,
        }
    }

    fn handle_control(&mut self, code: KeyCode) -> Option<UserAction> {
        match code {
            KeyCode::Char('c') => {
                if self.is_empty() {
                    Some(UserAction::AbortStream)
                } else {
                    self.clear();
                    None
                }
            }
            KeyCode::Char('d') => {
                // Only quit from an empty composer so a stray Ctrl+D mid-edit
                // behaves like forward delete.
                if self.is_empty() {
                    Some(UserAction::Quit)
                } else {
                    self.delete_forward();
                    None
                }
            }
            KeyCode::Char('x') => Some(UserAction::CancelMostRecentRun),
            KeyCode::Char('r') => Some(UserAction::RefreshRuns),
            KeyCode::Char('a') => Some(UserAction::Reauthenticate),
            KeyCode::Char('u') => {
                self.clear();
                None
            }
            _ => None,
        }
    }

    /// Insert pasted text. Line breaks collapse to spaces.
    pub(crate) fn handle_paste(&mut self, pasted: &str) {
        let flattened: String = pasted
            .chars()
            .map(|c| if c == '\n' || c == '\r' { ' ' } else { c })
            .collect();
        self.insert_str(&flattened);
    }

    fn insert_str(&mut self, s: &str) {
        self.text.insert_str(self.cursor, s);
        self.cursor += s.len();
    }

    fn delete_forward(&mut self) {
        if let Some(next) = self.next_boundary() {
            self.text.replace_range(self.cursor..next, "");
        }
    }

    fn clear(&mut self) {
        self.text.clear();
        self.cursor = 0;
    }

    fn prev_boundary(&self) -> Option<usize> {
        self.text[..self.cursor]
            .char_indices()
            .next_back()
            .map(|(idx, _)| idx)
    }

    fn next_boundary(&self) -> Option<usize> {
        self.text[self.cursor..]
            .chars()
            .next()
            .map(|c| self.cursor + c.len_utf8())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    fn ctrl(c: char) -> KeyEvent {
        KeyEvent::new(KeyCode::Char(c), KeyModifiers::CONTROL)
    }

    fn type_str(composer: &mut Composer, s: &str) {
        for c in s.chars() {
            assert_eq!(composer.handle_key_event(key(KeyCode::Char(c))), None);
        }
    }

    #[test]
    fn enter_submits_prompt_and_clears() {
        let mut composer = Composer::new();
        type_str(&mut composer, "hello");
        assert_eq!(
            composer.handle_key_event(key(KeyCode::Enter)),
            Some(UserAction::SubmitPrompt("hello".to_string()))
        );
        assert!(composer.is_empty());
        assert_eq!(composer.handle_key_event(key(KeyCode::Enter)), None);
    }

    #[test]
    fn enter_on_slash_command() {
        let mut composer = Composer::new();
        type_str(&mut composer, "/run daily_report");
        assert_eq!(
            composer.handle_key_event(key(KeyCode::Enter)),
            Some(UserAction::TriggerWorkflow("daily_report".to_string()))
        );
    }

    #[test]
    fn editing_respects_multibyte_chars() {
        let mut composer = Composer::new();
        type_str(&mut composer, "héllo");
        composer.handle_key_event(key(KeyCode::Left));
        composer.handle_key_event(key(KeyCode::Left));
        composer.handle_key_event(key(KeyCode::Left));
        composer.handle_key_event(key(KeyCode::Backspace));
        assert_eq!(composer.text(), "hllo");
        assert_eq!(composer.cursor_column(), 1);
        composer.handle_key_event(key(KeyCode::Delete));
        assert_eq!(composer.text(), "hlo");
        composer.handle_key_event(key(KeyCode::End));
        type_str(&mut composer, "!");
        assert_eq!(composer.text(), "hlo!");
    }

    #[test]
    fn ctrl_c_clears_text_before_aborting() {
        let mut composer = Composer::new();
        type_str(&mut composer, "draft");
        assert_eq!(composer.handle_key_event(ctrl('c')), None);
        assert!(composer.is_empty());
        assert_eq!(
            composer.handle_key_event(ctrl('c')),
            Some(UserAction::AbortStream)
        );
    }

    #[test]
    fn ctrl_d_quits_only_when_empty() {
        let mut composer = Composer::new();
        type_str(&mut composer, "ab");
        composer.handle_key_event(key(KeyCode::Home));
        assert_eq!(composer.handle_key_event(ctrl('d')), None);
        assert_eq!(composer.text(), "b");
        composer.handle_key_event(ctrl('u'));
        assert_eq!(composer.handle_key_event(ctrl('d')), Some(UserAction::Quit));
    }

    #[test]
    fn global_bindings() {
        let mut composer = Composer::new();
        assert_eq!(
            composer.handle_key_event(ctrl('x')),
            Some(UserAction::CancelMostRecentRun)
        );
        assert_eq!(composer.handle_key_event(ctrl('r')), Some(UserAction::RefreshRuns));
        assert_eq!(
            composer.handle_key_event(ctrl('a')),
            Some(UserAction::Reauthenticate)
        );
    }

    #[test]
    fn paste_flattens_newlines() {
        let mut composer = Composer::new();
        composer.handle_paste("line one\nline two");
        assert_eq!(composer.text(), "line one line two");
    }
}
