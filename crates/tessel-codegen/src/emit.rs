use tessel_syntax::Span;

use crate::host::INSTRUCTION_COLUMN;
use crate::position_map::PositionMap;

/// One line of a procedure body before it is placed in the module
#[derive(Debug, Clone)]
pub enum BodyLine {
    Instr(String, Span),
    Label(String),
}

/// Accumulates host module text together with its position map
#[derive(Debug, Default)]
pub struct HostWriter {
    lines: Vec<String>,
    positions: PositionMap,
}

impl HostWriter {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_line(&self) -> u32 {
        self.lines.len() as u32 + 1
    }

    pub fn directive(&mut self, text: String, src: Option<Span>) {
        if let Some(span) = src {
            let line = self.next_line();
            self.positions.record(line, 1, span);
        }
        self.lines.push(text);
    }

    pub fn body(&mut self, body: Vec<BodyLine>) {
        for line in body {
            match line {
                BodyLine::Instr(text, span) => {
                    let at = self.next_line();
                    self.positions.record(at, INSTRUCTION_COLUMN, span);
                    self.lines.push(format!("  {}", text));
                }
                BodyLine::Label(name) => self.lines.push(format!("{}:", name)),
            }
        }
    }

    pub fn finish(self) -> (String, PositionMap) {
        let mut text = self.lines.join("\n");
        text.push('\n');
        (text, self.positions)
    }
}
