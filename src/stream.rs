//! Synthetic log streams and push batches.
//!
//! A [`StreamSynthesizer`] turns the label model into concrete streams whose
//! line payload lands inside a caller-provided byte window. Streams serialize
//! straight into the JSON push body expected by `/loki/api/v1/push`.

use crate::errors::SynthesisError;
use crate::generator::{create_line_generator, LineGenerator, LogFormat, LogfmtGenerator};
use crate::labels::{LabelModel, LabelSet, INSTANCE_LABEL};
use chrono::{DateTime, Utc};
use rand::{Rng, RngCore};
use serde::ser::SerializeTuple;
use serde::{Serialize, Serializer};
use std::collections::HashMap;
use std::sync::Arc;

/// A single timestamped line.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub timestamp: DateTime<Utc>,
    pub line: String,
}

impl Entry {
    /// Timestamp as unix nanoseconds.
    pub fn timestamp_nanos(&self) -> i64 {
        self.timestamp.timestamp_nanos_opt().unwrap_or_default()
    }
}

impl Serialize for Entry {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut tuple = serializer.serialize_tuple(2)?;
        tuple.serialize_element(&self.timestamp_nanos().to_string())?;
        tuple.serialize_element(&self.line)?;
        tuple.end()
    }
}

/// A labeled sequence of lines pushed as one unit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogStream {
    #[serde(rename = "stream")]
    pub labels: LabelSet,
    #[serde(rename = "values")]
    pub entries: Vec<Entry>,
}

impl LogStream {
    /// Sum of the byte lengths of all lines.
    pub fn size_bytes(&self) -> usize {
        self.entries.iter().map(|e| e.line.len()).sum()
    }

    pub fn format(&self) -> Option<LogFormat> {
        self.labels.format()
    }
}

/// Body of a push request.
#[derive(Debug, Clone, Serialize)]
pub struct PushRequest {
    pub streams: Vec<LogStream>,
}

impl PushRequest {
    pub fn new(streams: Vec<LogStream>) -> Self {
        Self { streams }
    }

    /// Total line bytes across all streams.
    pub fn size_bytes(&self) -> usize {
        self.streams.iter().map(LogStream::size_bytes).sum()
    }

    /// Total number of lines across all streams.
    pub fn line_count(&self) -> usize {
        self.streams.iter().map(|s| s.entries.len()).sum()
    }
}

/// Builds batches of byte-bounded streams from a [`LabelModel`].
pub struct StreamSynthesizer {
    model: Arc<LabelModel>,
    generators: HashMap<LogFormat, Box<dyn LineGenerator>>,
}

impl StreamSynthesizer {
    pub fn new(model: Arc<LabelModel>) -> Self {
        let generators = model
            .formats()
            .iter()
            .map(|&format| (format, create_line_generator(format)))
            .collect();
        Self { model, generators }
    }

    pub fn model(&self) -> &LabelModel {
        &self.model
    }

    /// Build `stream_count` streams, each carrying between `min_bytes` and
    /// `max_bytes` bytes of lines (inclusive).
    ///
    /// `instance` is attached as the `instance` label unless the model
    /// defines that label itself.
    pub fn build_batch<R: Rng>(
        &self,
        rng: &mut R,
        stream_count: usize,
        min_bytes: usize,
        max_bytes: usize,
        instance: Option<&str>,
    ) -> Result<Vec<LogStream>, SynthesisError> {
        if min_bytes > max_bytes {
            return Err(SynthesisError::InvalidByteWindow {
                min: min_bytes,
                max: max_bytes,
            });
        }
        if stream_count == 0 {
            return Err(SynthesisError::InvalidStreamCount);
        }

        let streams = (0..stream_count)
            .map(|_| {
                let mut labels = self.model.sample_label_set(rng);
                if let Some(instance) = instance {
                    labels = labels.with_default(INSTANCE_LABEL, instance);
                }
                let target = rng.random_range(min_bytes..=max_bytes);
                self.build_stream(rng, labels, target)
            })
            .collect();

        Ok(streams)
    }

    fn build_stream(&self, rng: &mut dyn RngCore, labels: LabelSet, target: usize) -> LogStream {
        // LabelModel guarantees every format value parses and has a generator
        let format = labels.format().unwrap_or(LogFormat::Logfmt);
        let generator = self
            .generators
            .get(&format)
            .map(|g| g.as_ref())
            .unwrap_or(&LogfmtGenerator as &dyn LineGenerator);

        let mut entries = Vec::new();
        let mut size = 0;
        while size < target {
            let remaining = target - size;
            let timestamp = Utc::now();
            let mut line = generator.generate(rng, timestamp);
            if line.len() > remaining {
                line = generator.generate_sized(rng, timestamp, remaining);
            }
            size += line.len();
            entries.push(Entry { timestamp, line });
        }

        LogStream { labels, entries }
    }
}

impl std::fmt::Debug for StreamSynthesizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut formats: Vec<_> = self.generators.keys().collect();
        formats.sort();
        f.debug_struct("StreamSynthesizer")
            .field("labels", &self.model.len())
            .field("formats", &formats)
            .finish()
    }
}
