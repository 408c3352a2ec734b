// src/transform/sanitize.rs
//! Cleaning of the `content_metrics` table.
//!
//! LinkedIn occasionally reports negative engagement counters. Each counter
//! is floored at zero, smoothed with a trailing three-row average in date
//! order, and every negative (or missing) original value is replaced by that
//! average. The engagement rate is then recomputed from the repaired
//! counters.

use anyhow::Result;
use tracing::{debug, info_span};

use crate::engine::{Fallback, TableEngine};
use crate::schema::EXTRACTION_RANGE;

pub const CONTENT_METRICS_TABLE: &str = "content_metrics";

const DATE: &str = "Date";
const IMPRESSIONS: &str = "Impressions (total)";
const ENGAGEMENT_RATE: &str = "Engagement Rate (total)";

/// Counters that get repaired.
const COUNTERS: [&str; 4] = [
    "Reactions (total)",
    "Comments (total)",
    "Shares (total)",
    "Clicks (total)",
];

/// Rate numerator, in summation order.
const RATE_TERMS: [&str; 4] = [
    "Reactions (total)",
    "Comments (total)",
    "Clicks (total)",
    "Shares (total)",
];

const WINDOW: usize = 3;

fn positive(counter: &str) -> String {
    format!("{} (positive)", counter.trim_end_matches(" (total)"))
}

fn moving_average(counter: &str) -> String {
    format!("{} (moving average)", counter.trim_end_matches(" (total)"))
}

fn final_value(counter: &str) -> String {
    format!("{} (final)", counter.trim_end_matches(" (total)"))
}

/// Repair the engagement counters of a dated `content_metrics` table and
/// project it onto its clean column set.
pub fn sanitize_content_metrics<E: TableEngine>(engine: &mut E, table: E::Table) -> Result<E::Table> {
    let span = info_span!("sanitize_content_metrics", engine = %engine.kind());
    let _guard = span.enter();

    // ─── 0) date order, ties keep input order ───
    let mut t = engine.sort_by(table, DATE)?;

    // ─── 1) floor at zero ───
    for counter in COUNTERS {
        t = engine.conditional_replace(t, counter, Fallback::Zero, &positive(counter))?;
    }

    // ─── 2) trailing average of the floored series ───
    for counter in COUNTERS {
        t = engine.window_average(t, &positive(counter), &moving_average(counter), WINDOW)?;
    }

    // ─── 3) keep non-negative originals, repair the rest ───
    for counter in COUNTERS {
        let avg = moving_average(counter);
        t = engine.conditional_replace(t, counter, Fallback::Column(&avg), &final_value(counter))?;
    }

    // ─── 4) engagement rate from the repaired counters ───
    let finals: Vec<String> = RATE_TERMS.iter().map(|c| final_value(c)).collect();
    let terms: Vec<&str> = finals.iter().map(String::as_str).collect();
    t = engine.ratio_of_sum(t, &terms, IMPRESSIONS, ENGAGEMENT_RATE)?;

    // ─── 5) clean projection ───
    let clicks = final_value("Clicks (total)");
    let reactions = final_value("Reactions (total)");
    let comments = final_value("Comments (total)");
    let shares = final_value("Shares (total)");
    let t = engine.project(
        t,
        &[
            (DATE, DATE),
            (IMPRESSIONS, IMPRESSIONS),
            (&clicks, "Clicks (total)"),
            (&reactions, "Reactions (total)"),
            (&comments, "Comments (total)"),
            (&shares, "Shares (total)"),
            (ENGAGEMENT_RATE, ENGAGEMENT_RATE),
            (EXTRACTION_RANGE, EXTRACTION_RANGE),
        ],
    )?;
    debug!(rows = engine.num_rows(&t)?, "content metrics sanitized");
    Ok(t)
}
