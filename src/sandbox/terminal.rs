//! Turns raw TTY bytes into a `StepOutcome` via a VT100 emulator.

use super::StepOutcome;

const ROWS: u16 = 24;
const COLS: u16 = 80;
const SCROLLBACK_LEN: usize = 1000;

/// Fixed 80x24 terminal with scrollback, reset before every classification.
pub(crate) struct TerminalClassifier {
    parser: vt100::Parser,
    prompt_marker: String,
}

impl TerminalClassifier {
    /// `prompt_marker` is the substring that identifies an idle shell prompt.
    pub fn new(prompt_marker: impl Into<String>) -> Self {
        Self {
            parser: fresh_parser(),
            prompt_marker: prompt_marker.into(),
        }
    }

    pub fn reset(&mut self) {
        self.parser = fresh_parser();
    }

    /// Classify everything the terminal printed during one step.
    pub fn classify(&mut self, raw_output: Vec<u8>) -> StepOutcome {
        if raw_output.is_empty() {
            return StepOutcome::empty_output(raw_output);
        }

        self.reset();
        self.parser.process(&raw_output);

        // Scrolling back as far as possible reveals how much history exists.
        self.parser.set_scrollback(usize::MAX);
        let scrolled_screen = self.parser.screen().scrollback() > 0;
        self.parser.set_scrollback(0);

        let rows: Vec<String> = self.parser.screen().rows(0, COLS).collect();

        let Some(last_non_blank) = rows.iter().rposition(|row| !row.trim().is_empty()) else {
            return StepOutcome {
                scrolled_screen,
                ..StepOutcome::empty_output(raw_output)
            };
        };

        let visible_lines: Vec<String> = rows[..=last_non_blank]
            .iter()
            .map(|row| row.trim_end().to_string())
            .collect();

        let returned_to_bash = visible_lines
            .last()
            .is_some_and(|line| line.contains(&self.prompt_marker));

        StepOutcome {
            hung: false,
            scrolled_screen,
            returned_to_bash,
            input_was_empty: false,
            output_was_empty: false,
            raw_output,
            visible_lines,
        }
    }
}

fn fresh_parser() -> vt100::Parser {
    vt100::Parser::new(ROWS, COLS, SCROLLBACK_LEN)
}
