//! Streaming response processor.
//!
//! Consumes a completion, shows it on the terminal and, when a transcript is
//! attached, persists it. Two independent buffers are kept:
//! - the save buffer is flushed to the transcript once it holds at least
//!   [`SAVE_THRESHOLD`] characters, and once more (with a trailing newline)
//!   when the stream ends;
//! - the render buffer is only used in formatted mode and is rendered up to
//!   the last paragraph break whenever one shows up.
//!
//! Text after the last flush is lost if the process is interrupted.

use crate::conversation::TranscriptSink;
use crate::llm::CompletionResult;
use crate::protocol::{decode_chunk, StreamEvent};
use crate::render::{OutputMode, Renderer};
use anyhow::{Context, Result};
use futures::StreamExt;

/// Minimum number of characters written to the transcript at once.
pub const SAVE_THRESHOLD: usize = 100;

const PARAGRAPH_BREAK: &str = "\n\n";

pub struct ResponseProcessor<'a, R: Renderer + ?Sized> {
    renderer: &'a mut R,
    transcript: Option<&'a mut dyn TranscriptSink>,
    render_buffer: String,
    save_buffer: String,
}

impl<'a, R: Renderer + ?Sized> ResponseProcessor<'a, R> {
    pub fn new(renderer: &'a mut R, transcript: Option<&'a mut dyn TranscriptSink>) -> Self {
        Self {
            renderer,
            transcript,
            render_buffer: String::new(),
            save_buffer: String::new(),
        }
    }

    /// Drive a completion to the end.
    pub async fn process(mut self, result: CompletionResult) -> Result<()> {
        match result {
            CompletionResult::Single(content) => self.emit_single(&content),
            CompletionResult::Stream(mut chunks) => {
                while let Some(chunk) = chunks.next().await {
                    let chunk = chunk.context("Failed to read completion stream")?;
                    if !self.consume_chunk(&chunk)? {
                        break;
                    }
                }
                self.finish()
            }
        }
    }

    /// A non-streamed response is shown and saved in one piece.
    fn emit_single(&mut self, content: &str) -> Result<()> {
        if content.is_empty() {
            return Ok(());
        }
        match self.renderer.mode() {
            OutputMode::Plain => self.renderer.write_plain(content)?,
            OutputMode::Formatted => self.renderer.render_markdown(content)?,
        }
        if let Some(transcript) = self.transcript.as_mut() {
            transcript.append(&format!("{}\n", content))?;
        }
        Ok(())
    }

    /// Returns `false` once the end-of-stream marker was seen.
    fn consume_chunk(&mut self, chunk: &[u8]) -> Result<bool> {
        for event in decode_chunk(chunk) {
            match event {
                StreamEvent::Delta(fragment) => self.push_fragment(&fragment)?,
                StreamEvent::Done => return Ok(false),
            }
        }
        Ok(true)
    }

    fn push_fragment(&mut self, fragment: &str) -> Result<()> {
        self.save_buffer.push_str(fragment);
        match self.renderer.mode() {
            OutputMode::Plain => {
                if !fragment.is_empty() {
                    self.renderer.write_plain(fragment)?;
                }
            }
            OutputMode::Formatted => self.render_buffer.push_str(fragment),
        }

        if let Some(transcript) = self.transcript.as_mut() {
            if self.save_buffer.chars().count() >= SAVE_THRESHOLD {
                transcript.append(&self.save_buffer)?;
                self.save_buffer.clear();
            }
        }

        if let Some(pos) = self.render_buffer.rfind(PARAGRAPH_BREAK) {
            let block: String = self
                .render_buffer
                .drain(..pos + PARAGRAPH_BREAK.len())
                .collect();
            self.renderer.render_markdown(&block)?;
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        if let Some(transcript) = self.transcript.as_mut() {
            if !self.save_buffer.is_empty() {
                transcript.append(&format!("{}\n", self.save_buffer))?;
            }
        }
        self.save_buffer.clear();

        let rest = self.render_buffer.trim();
        if !rest.is_empty() {
            self.renderer.render_markdown(rest)?;
        }
        self.render_buffer.clear();
        Ok(())
    }
}
