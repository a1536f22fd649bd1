//! Output sinks.
//!
//! Results leave the runner on three line-oriented channels: the primary
//! value (one scalar per time step), formatted query results and
//! diagnostics. Lines are flushed at the end of every time step.

use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{PfResult, StreamError};

/// Logical output channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Value,
    Results,
    Diagnostics,
}

impl Channel {
    pub const ALL: [Self; 3] = [Self::Value, Self::Results, Self::Diagnostics];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Value => "value",
            Self::Results => "results",
            Self::Diagnostics => "diagnostics",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Destination for runner output.
pub trait OutputSink {
    /// Appends one line to `channel`. The line must not contain a newline.
    fn write_line(&mut self, channel: Channel, line: &str) -> PfResult<()>;

    /// Makes every line written so far visible to readers.
    fn flush(&mut self) -> PfResult<()>;
}

impl<T: OutputSink + ?Sized> OutputSink for &mut T {
    fn write_line(&mut self, channel: Channel, line: &str) -> PfResult<()> {
        (**self).write_line(channel, line)
    }

    fn flush(&mut self) -> PfResult<()> {
        (**self).flush()
    }
}

type BoxedWriter = Box<dyn Write + Send>;

/// Sink writing each channel to its own buffered writer.
pub struct WriterSink {
    value: BufWriter<BoxedWriter>,
    results: BufWriter<BoxedWriter>,
    diagnostics: BufWriter<BoxedWriter>,
}

impl fmt::Debug for WriterSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriterSink").finish_non_exhaustive()
    }
}

impl WriterSink {
    pub fn new(value: BoxedWriter, results: BoxedWriter, diagnostics: BoxedWriter) -> Self {
        Self {
            value: BufWriter::new(value),
            results: BufWriter::new(results),
            diagnostics: BufWriter::new(diagnostics),
        }
    }

    /// Value and results on stdout, diagnostics on stderr.
    #[must_use]
    pub fn stdio() -> Self {
        Self::new(
            Box::new(io::stdout()),
            Box::new(io::stdout()),
            Box::new(io::stderr()),
        )
    }

    fn writer(&mut self, channel: Channel) -> &mut BufWriter<BoxedWriter> {
        match channel {
            Channel::Value => &mut self.value,
            Channel::Results => &mut self.results,
            Channel::Diagnostics => &mut self.diagnostics,
        }
    }
}

/// Creates (or truncates) `path` for use as a channel writer.
pub fn create_file(path: &Path) -> PfResult<BoxedWriter> {
    let file = File::create(path).map_err(|source| StreamError::Open {
        path: path.display().to_string(),
        source,
    })?;
    Ok(Box::new(file))
}

fn write_error(channel: Channel) -> impl FnOnce(io::Error) -> StreamError {
    move |source| StreamError::Write {
        channel: channel.to_string(),
        source,
    }
}

impl OutputSink for WriterSink {
    fn write_line(&mut self, channel: Channel, line: &str) -> PfResult<()> {
        writeln!(self.writer(channel), "{line}").map_err(write_error(channel))?;
        Ok(())
    }

    fn flush(&mut self) -> PfResult<()> {
        for channel in Channel::ALL {
            self.writer(channel).flush().map_err(write_error(channel))?;
        }
        Ok(())
    }
}

/// In-memory sink.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    lines: HashMap<Channel, Vec<String>>,
    flushes: usize,
}

impl MemorySink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn lines(&self, channel: Channel) -> &[String] {
        match self.lines.get(&channel) {
            Some(lines) => lines.as_slice(),
            None => &[],
        }
    }

    /// Number of flushes, one per completed time step.
    #[must_use]
    pub const fn flushes(&self) -> usize {
        self.flushes
    }
}

impl OutputSink for MemorySink {
    fn write_line(&mut self, channel: Channel, line: &str) -> PfResult<()> {
        self.lines.entry(channel).or_default().push(line.to_string());
        Ok(())
    }

    fn flush(&mut self) -> PfResult<()> {
        self.flushes += 1;
        Ok(())
    }
}
