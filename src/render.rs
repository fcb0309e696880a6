//! Terminal output for model responses.
//!
//! Plain mode writes fragments as they arrive. Formatted mode renders
//! markdown through a `termimad` skin.

use std::io::{self, Write};
use termimad::crossterm::style::Color;
use termimad::MadSkin;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Plain,
    Formatted,
}

/// Where response text ends up.
pub trait Renderer {
    fn mode(&self) -> OutputMode;

    /// Write text verbatim and flush, for the live-typing effect.
    fn write_plain(&mut self, text: &str) -> io::Result<()>;

    /// Render a complete markdown block.
    fn render_markdown(&mut self, markdown: &str) -> io::Result<()>;
}

pub struct TerminalRenderer<W: Write> {
    out: W,
    skin: MadSkin,
    mode: OutputMode,
}

impl TerminalRenderer<io::Stdout> {
    pub fn stdout(mode: OutputMode) -> Self {
        Self::new(io::stdout(), mode)
    }
}

impl<W: Write> TerminalRenderer<W> {
    pub fn new(out: W, mode: OutputMode) -> Self {
        Self {
            out,
            skin: create_markdown_skin(),
            mode,
        }
    }

    #[cfg(test)]
    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> Renderer for TerminalRenderer<W> {
    fn mode(&self) -> OutputMode {
        self.mode
    }

    fn write_plain(&mut self, text: &str) -> io::Result<()> {
        self.out.write_all(text.as_bytes())?;
        self.out.flush()
    }

    fn render_markdown(&mut self, markdown: &str) -> io::Result<()> {
        write!(self.out, "{}", self.skin.term_text(markdown))?;
        self.out.flush()
    }
}

fn create_markdown_skin() -> MadSkin {
    let mut skin = MadSkin::default();
    skin.headers[0].set_fg(Color::Cyan);
    skin.headers[1].set_fg(Color::Blue);
    skin.headers[2].set_fg(Color::Green);
    skin.code_block.set_fg(Color::Yellow);
    skin.inline_code.set_fg(Color::Yellow);
    skin.italic.set_fg(Color::Magenta);
    skin
}
