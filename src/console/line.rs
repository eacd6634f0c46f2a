//! Minimal line editor for a raw-mode terminal channel.

/// What a single input byte produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineEvent {
    /// Nothing to act on yet (the byte may still have produced echo).
    Pending,
    /// A complete line, without its terminator.
    Line(String),
    /// Ctrl-C.
    Interrupt,
    /// Ctrl-D on an empty line.
    Eof,
}

#[derive(Debug, Default)]
pub struct LineEditor {
    buf: Vec<u8>,
}

impl LineEditor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one byte, appending any echo for the terminal to `echo`.
    pub fn push(&mut self, byte: u8, echo: &mut Vec<u8>) -> LineEvent {
        match byte {
            b'\r' | b'\n' => {
                echo.extend_from_slice(b"\r\n");
                let line = String::from_utf8_lossy(&self.buf).into_owned();
                self.buf.clear();
                LineEvent::Line(line)
            }
            // DEL and backspace
            127 | 8 => {
                if self.buf.pop().is_some() {
                    echo.extend_from_slice(b"\x08 \x08");
                }
                LineEvent::Pending
            }
            3 => {
                echo.extend_from_slice(b"^C\r\n");
                self.buf.clear();
                LineEvent::Interrupt
            }
            4 if self.buf.is_empty() => LineEvent::Eof,
            32..=126 => {
                self.buf.push(byte);
                echo.push(byte);
                LineEvent::Pending
            }
            _ => LineEvent::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(editor: &mut LineEditor, input: &[u8]) -> (Vec<LineEvent>, Vec<u8>) {
        let mut echo = Vec::new();
        let events = input
            .iter()
            .map(|b| editor.push(*b, &mut echo))
            .filter(|e| *e != LineEvent::Pending)
            .collect();
        (events, echo)
    }

    #[test]
    fn echoes_and_submits() {
        let mut editor = LineEditor::new();
        let (events, echo) = feed(&mut editor, b"repo list\r");
        assert_eq!(events, vec![LineEvent::Line("repo list".into())]);
        assert_eq!(echo, b"repo list\r\n");
    }

    #[test]
    fn backspace_erases() {
        let mut editor = LineEditor::new();
        let (events, echo) = feed(&mut editor, b"helpx\x7f\n");
        assert_eq!(events, vec![LineEvent::Line("help".into())]);
        assert!(echo.ends_with(b"\x08 \x08\r\n"));
    }

    #[test]
    fn backspace_on_empty_line_is_silent() {
        let mut editor = LineEditor::new();
        let (events, echo) = feed(&mut editor, b"\x08");
        assert!(events.is_empty());
        assert!(echo.is_empty());
    }

    #[test]
    fn control_bytes_are_dropped() {
        let mut editor = LineEditor::new();
        let (events, _) = feed(&mut editor, b"a\x1bb\tc\r");
        assert_eq!(events, vec![LineEvent::Line("abc".into())]);
    }

    #[test]
    fn ctrl_c_interrupts() {
        let mut editor = LineEditor::new();
        let (events, echo) = feed(&mut editor, b"abc\x03");
        assert_eq!(events, vec![LineEvent::Interrupt]);
        assert!(echo.ends_with(b"^C\r\n"));
    }

    #[test]
    fn ctrl_d_only_ends_on_empty_line() {
        let mut editor = LineEditor::new();
        let (events, _) = feed(&mut editor, b"ab\x04");
        assert!(events.is_empty());
        let (events, _) = feed(&mut editor, b"\r\x04");
        assert_eq!(events, vec![LineEvent::Line("ab".into()), LineEvent::Eof]);
    }
}
