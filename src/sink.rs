//! Destinations for waveform samples

use crate::error::Result;
use std::{fmt, fs::File, io::Write, path::Path};

/// Anything that accepts an ordered run of samples
pub trait SampleSink {
    /// Append `samples`, in order
    /// # Errors
    /// Returns an error if the underlying writer fails
    fn write_samples(&mut self, samples: &[f32]) -> Result<()>;
}

/// One sample per line
pub struct CsvSink<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> fmt::Debug for CsvSink<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CsvSink").finish_non_exhaustive()
    }
}

impl CsvSink<File> {
    /// Create (or truncate) the file at `path`
    /// # Errors
    /// Returns an error if the file can't be created
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self {
            writer: csv::WriterBuilder::new()
                .has_headers(false)
                .from_path(path)?,
        })
    }
}

impl<W: Write> CsvSink<W> {
    pub fn new(inner: W) -> Self {
        Self {
            writer: csv::WriterBuilder::new()
                .has_headers(false)
                .from_writer(inner),
        }
    }

    /// Flush and hand back the inner writer
    /// # Errors
    /// Returns an error if flushing fails
    pub fn into_inner(self) -> Result<W> {
        self.writer
            .into_inner()
            .map_err(|e| e.into_error().into())
    }
}

impl<W: Write> SampleSink for CsvSink<W> {
    fn write_samples(&mut self, samples: &[f32]) -> Result<()> {
        for sample in samples {
            self.writer.serialize(sample)?;
        }
        self.writer.flush()?;
        Ok(())
    }
}

/// Keeps everything in memory
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    pub samples: Vec<f32>,
}

impl SampleSink for MemorySink {
    fn write_samples(&mut self, samples: &[f32]) -> Result<()> {
        self.samples.extend_from_slice(samples);
        Ok(())
    }
}
