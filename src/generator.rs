// =============================================================================
// generator.rs - THE SYNTHETIC PREDICTION FACTORY
// =============================================================================
//
// Produces the test corpus: millions of prediction records with random
// location/capability ids, sprinkled with deliberate duplicates so the two
// dedup strategies have something to find.
//
// Two kinds of deliberate duplicate:
//
// 1. Immediate repeats - with probability `duplicate_probability`, a record
//    is written twice in a row (the repeat counts toward `count`).
// 2. Appended copies - after the main run, `appended_copies` distinct
//    earlier records are written again at the end of the stream. They are
//    picked by reservoir sampling, so we never hold more than
//    `appended_copies` records in memory no matter how big the run is.
//
// All randomness comes from the RNG you hand in. Seed it and the output is
// byte-for-byte reproducible.
// =============================================================================

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use std::io::Write;
use tracing::info;

use crate::codec::RecordWriter;
use crate::error::{DedupError, Result};
use crate::metrics::crossed_interval;
use crate::models::Record;

/// Clock advance between consecutive generated records.
const NANOS_PER_RECORD: i64 = 1_000;

/// Number of distinct category codes the generator emits (0..=5).
const CATEGORY_COUNT: i32 = 6;

/// What to generate.
#[derive(Debug, Clone)]
pub struct GeneratorOptions {
    /// Records in the main run, immediate repeats included.
    pub count: u64,
    /// Chance that a record is immediately written a second time.
    pub duplicate_probability: f64,
    /// Exact copies of earlier records appended at the end.
    pub appended_copies: u64,
    /// Log progress every this many records. 0 disables.
    pub progress_interval: u64,
}

impl GeneratorOptions {
    fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.duplicate_probability) {
            return Err(DedupError::InvalidParameters(format!(
                "duplicate probability must be in [0, 1], got {}",
                self.duplicate_probability
            )));
        }
        Ok(())
    }
}

/// What actually got written.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GenerationReport {
    pub written: u64,
    pub intentional_duplicates: u64,
}

/// Source of fresh records. Owns its RNG and a monotonically advancing clock.
pub struct RecordGenerator<R> {
    rng: R,
    clock_base: DateTime<Utc>,
    produced: u64,
}

impl<R: Rng> RecordGenerator<R> {
    pub fn new(rng: R, clock_base: DateTime<Utc>) -> Self {
        Self {
            rng,
            clock_base,
            produced: 0,
        }
    }

    fn random_id(&mut self) -> String {
        uuid::Builder::from_random_bytes(self.rng.gen())
            .into_uuid()
            .to_string()
    }

    /// A brand new record, timestamped just after the previous one.
    pub fn next_record(&mut self) -> Record {
        let offset = Duration::nanoseconds(self.produced as i64 * NANOS_PER_RECORD);
        self.produced += 1;
        let location_id = self.random_id();
        let capability_id = self.random_id();
        let value = self.rng.gen();
        let category = self.rng.gen_range(0..CATEGORY_COUNT);
        Record::new(self.clock_base + offset, location_id, capability_id, value, category)
    }
}

/// Write a full corpus to `writer`.
pub fn generate<W: Write, R: Rng>(
    writer: &mut RecordWriter<W>,
    generator: &mut RecordGenerator<R>,
    options: &GeneratorOptions,
) -> Result<GenerationReport> {
    options.validate()?;
    info!(
        count = options.count,
        duplicate_probability = options.duplicate_probability,
        appended_copies = options.appended_copies,
        "Generating records"
    );

    let reservoir_cap = options.appended_copies as usize;
    let mut reservoir: Vec<Record> = Vec::with_capacity(reservoir_cap.min(1 << 16));
    let mut originals: u64 = 0;
    let mut report = GenerationReport::default();

    while report.written < options.count {
        let record = generator.next_record();
        writer.write(&record)?;
        report.written += 1;
        if crossed_interval(report.written - 1, report.written, options.progress_interval) {
            info!(written = report.written, "Generation progress");
        }

        let repeat = report.written < options.count
            && generator.rng.gen_bool(options.duplicate_probability);
        if repeat {
            writer.write(&record)?;
            report.written += 1;
            report.intentional_duplicates += 1;
        }

        // Algorithm R over the originals only.
        originals += 1;
        if reservoir.len() < reservoir_cap {
            reservoir.push(record);
        } else if reservoir_cap > 0 {
            let slot = generator.rng.gen_range(0..originals);
            if slot < reservoir_cap as u64 {
                reservoir[slot as usize] = record;
            }
        }
    }

    for record in &reservoir {
        writer.write(record)?;
        report.written += 1;
        report.intentional_duplicates += 1;
    }

    writer.flush()?;
    info!(
        written = report.written,
        intentional_duplicates = report.intentional_duplicates,
        "Generation complete"
    );
    Ok(report)
}
