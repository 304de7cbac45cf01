//! Time-bucketed packet counts and the heavy traffic threshold.
use super::containers::{Capture, HistogramBucket, ProtocolId, TrafficGraph};
use super::utils::decode_frame;

/// A default interval splits the capture into this many buckets.
pub const TARGET_BUCKETS: f64 = 17.0;

/// Upper bound on buckets produced for one histogram; smaller intervals are widened.
pub const MAX_BUCKETS: usize = 100_000;

impl HistogramBucket {
    /// The `index`th window of width `interval` starting at `first`. Neighbouring windows share
    /// their boundary exactly.
    fn nth(first: f64, interval: f64, index: usize) -> Self {
        HistogramBucket {
            start: first + index as f64 * interval,
            end: first + (index + 1) as f64 * interval,
            count: 0,
        }
    }
}

fn span(timestamps: impl Iterator<Item = f64>) -> Option<(f64, f64)> {
    timestamps.fold(None, |span, ts| match span {
        None => Some((ts, ts)),
        Some((first, last)) => Some((f64::min(first, ts), f64::max(last, ts))),
    })
}

fn is_usable(interval: f64) -> bool {
    interval.is_finite() && interval > 0.0
}

/// Buckets of width `interval` needed to cover `span` seconds.
fn bucket_count(span: f64, interval: f64) -> usize {
    // float to int casts saturate
    ((span / interval).floor() as usize).saturating_add(1)
}

/// Widens `interval` when covering `span` seconds would take more than [MAX_BUCKETS] buckets.
pub fn fit_interval(span: f64, interval: f64) -> f64 {
    if !is_usable(interval) || bucket_count(span, interval) <= MAX_BUCKETS {
        return interval;
    }
    let widened = span / (MAX_BUCKETS - 1) as f64;
    log::warn!("Interval {interval}s would produce too many buckets, using {widened}s");
    widened
}

/// `(last - first) / 17` over every record, or `None` for an empty capture.
pub fn default_interval(capture: &Capture) -> Option<f64> {
    let (first, last) = span(capture.records.iter().map(|record| record.timestamp))?;
    Some((last - first) / TARGET_BUCKETS)
}

fn protocol_timestamps(capture: &Capture, protocol: Option<ProtocolId>) -> Vec<f64> {
    capture
        .records
        .iter()
        .filter(|record| protocol.map_or(true, |id| decode_frame(&record.raw).protocol_id() == id))
        .map(|record| record.timestamp)
        .collect()
}

pub fn bucket(capture: &Capture, interval: f64) -> Vec<HistogramBucket> {
    bucket_timestamps(protocol_timestamps(capture, None), interval)
}

/// Like [bucket], restricted to records of one protocol.
pub fn bucket_protocol(capture: &Capture, interval: f64, protocol: ProtocolId) -> Vec<HistogramBucket> {
    bucket_timestamps(protocol_timestamps(capture, Some(protocol)), interval)
}

/// Buckets timestamps into contiguous `[start, start + interval)` windows beginning at the
/// earliest timestamp. Input order does not matter.
///
/// An interval that is not a positive number, or too small to move past the first timestamp,
/// puts everything in one bucket. The interval is passed through [fit_interval] first.
pub fn bucket_timestamps(mut timestamps: Vec<f64>, interval: f64) -> Vec<HistogramBucket> {
    timestamps.retain(|ts| ts.is_finite());
    if timestamps.is_empty() {
        return Vec::new();
    }
    timestamps.sort_by(f64::total_cmp);

    let first = timestamps[0];
    let last = timestamps[timestamps.len() - 1];

    if !is_usable(interval) || first + interval <= first {
        return vec![HistogramBucket {
            start: first,
            end: first,
            count: timestamps.len(),
        }];
    }

    let interval = fit_interval(last - first, interval);
    let count = bucket_count(last - first, interval).min(MAX_BUCKETS);
    let mut buckets: Vec<HistogramBucket> = (0..count).map(|i| HistogramBucket::nth(first, interval, i)).collect();
    for timestamp in timestamps {
        let index = (((timestamp - first) / interval).floor() as usize).min(count - 1);
        buckets[index].count += 1;
    }

    buckets
}

/// `mean + 2 * stdev` of the bucket counts, rounded to two decimals.
///
/// Needs at least two buckets whose counts are not all equal.
pub fn threshold(counts: &[usize]) -> Option<f64> {
    if counts.len() < 2 || counts.iter().all(|&count| count == counts[0]) {
        log::error!("Graph - Error calculating threshold");
        return None;
    }

    let n = counts.len() as f64;
    let mean = counts.iter().sum::<usize>() as f64 / n;
    let variance = counts
        .iter()
        .map(|&count| (count as f64 - mean).powi(2))
        .sum::<f64>()
        / (n - 1.0);

    let threshold = mean + 2.0 * variance.sqrt();
    Some((threshold * 100.0).round() / 100.0)
}

/// Buckets plus threshold for plotting. `interval` falls back to [default_interval] and is
/// widened by [fit_interval]; the graph carries the interval its buckets were cut with.
pub fn traffic_graph(capture: &Capture, interval: Option<f64>, protocol: Option<ProtocolId>) -> Option<TrafficGraph> {
    log::info!("Generating graph data");
    let interval = interval.or_else(|| default_interval(capture))?;

    let timestamps = protocol_timestamps(capture, protocol);
    let (first, last) = span(timestamps.iter().copied())?;
    let interval = fit_interval(last - first, interval);

    let buckets = bucket_timestamps(timestamps, interval);
    if buckets.is_empty() {
        return None;
    }

    let counts: Vec<usize> = buckets.iter().map(|bucket| bucket.count).collect();
    Some(TrafficGraph {
        interval,
        protocol: protocol.map(|id| capture.registry.name(id).map_or_else(|| id.to_string(), str::to_string)),
        threshold: threshold(&counts),
        buckets,
    })
}
