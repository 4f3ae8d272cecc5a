use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

pub const LOSS_TAG: &str = "loss";
pub const VALIDATION_ACCURACY_TAG: &str = "validation_accuracy";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalarEvent {
    pub tag: String,
    pub step: usize,
    pub value: f32,
}

/// Append-only stream of (tag, step, value) scalars.
pub trait Summary {
    fn scalar(&mut self, tag: &str, step: usize, value: f32) -> Result<()>;
    fn flush(&mut self) -> Result<()>;
}

/// Keeps every event in memory.
#[derive(Debug, Clone, Default)]
pub struct MemorySummary {
    events: Vec<ScalarEvent>,
}

impl MemorySummary {
    pub fn new() -> MemorySummary {
        MemorySummary::default()
    }

    pub fn events(&self) -> &[ScalarEvent] {
        &self.events
    }

    /// (step, value) pairs recorded under `tag`, in write order.
    pub fn scalars(&self, tag: &str) -> Vec<(usize, f32)> {
        self.events
            .iter()
            .filter(|e| e.tag == tag)
            .map(|e| (e.step, e.value))
            .collect()
    }
}

impl Summary for MemorySummary {
    fn scalar(&mut self, tag: &str, step: usize, value: f32) -> Result<()> {
        self.events.push(ScalarEvent {
            tag: tag.to_string(),
            step,
            value,
        });
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Writes one JSON object per line.
#[derive(Debug)]
pub struct JsonlSummary {
    writer: BufWriter<File>,
}

impl JsonlSummary {
    /// Creates (or truncates) the file, creating parent folders if needed.
    pub fn create(path: &Path) -> Result<JsonlSummary> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?; // in case the folder does not exist
        }
        Ok(JsonlSummary {
            writer: BufWriter::new(File::create(path)?),
        })
    }
}

impl Summary for JsonlSummary {
    fn scalar(&mut self, tag: &str, step: usize, value: f32) -> Result<()> {
        let event = ScalarEvent {
            tag: tag.to_string(),
            step,
            value,
        };
        serde_json::to_writer(&mut self.writer, &event)?;
        self.writer.write_all(b"\n")?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}
