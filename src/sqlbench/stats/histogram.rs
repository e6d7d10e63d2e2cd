use std::fmt::Write as _;
use std::time::Duration;

/// Number of power-of-two buckets; covers the full range of a u64
/// nanosecond latency.
const BUCKETS: usize = 65;

/// Width of the longest rendered bar, in characters.
const BAR_WIDTH: usize = 50;

const EIGHTHS: [&str; 8] = ["", "\u{258f}", "\u{258e}", "\u{258d}", "\u{258c}", "\u{258b}", "\u{258a}", "\u{2589}"];

/// Latency histogram with power-of-two buckets.
///
/// A value v lands in bucket ceil(log2(v)): bucket 0 holds zero and
/// one-unit values, bucket i holds the half-open range (2^(i-1), 2^i].
/// Values are nanoseconds; the bucket array never shrinks.
#[derive(Debug, Clone)]
pub struct StreamingHistogram {
    buckets: [u64; BUCKETS],
}

impl Default for StreamingHistogram {
    fn default() -> Self {
        Self {
            buckets: [0; BUCKETS],
        }
    }
}

impl StreamingHistogram {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, v: u64) {
        self.buckets[bucket_index(v)] += 1;
    }

    /// Total number of recorded values.
    pub fn total(&self) -> u64 {
        self.buckets.iter().sum()
    }

    pub fn bucket(&self, index: usize) -> u64 {
        self.buckets[index]
    }

    /// Render the populated bucket range as a text block, one line per
    /// bucket, each labelled with its latency range and drawn as a bar
    /// scaled so the fullest bucket spans the full width. Eighth-block
    /// glyphs give sub-character resolution; a nonzero bucket always
    /// renders at least one eighth so outliers stay visible.
    pub fn render(&self) -> String {
        let mut out = String::new();

        let mut min_bucket = None;
        let mut max_bucket = 0;
        for (i, &count) in self.buckets.iter().enumerate() {
            if count > 0 {
                max_bucket = i;
                min_bucket.get_or_insert(i);
            }
        }
        let min_bucket = match min_bucket {
            Some(b) => b,
            None => return out,
        };
        let max_count = self.buckets.iter().copied().max().unwrap_or(0);

        for bi in min_bucket..=max_bucket {
            let bottom = if bi == 0 { 0u128 } else { 1u128 << (bi - 1) };
            let top = 1u128 << bi;

            let _ = writeln!(
                out,
                "{:>12} - {:>12} [{:>5}]: {}",
                format_nanos(bottom),
                format_nanos(top),
                self.buckets[bi],
                bar(self.buckets[bi], max_count)
            );
        }
        out
    }
}

fn bucket_index(v: u64) -> usize {
    if v <= 1 {
        0
    } else {
        (u64::BITS - (v - 1).leading_zeros()) as usize
    }
}

fn bar(count: u64, max_count: u64) -> String {
    let mut width = ((BAR_WIDTH * 8) as f64 * count as f64 / max_count as f64) as usize;

    // Deliberately highlight outliers
    if width == 0 && count > 0 {
        width = 1;
    }

    let mut s = "\u{2588}".repeat(width / 8);
    s.push_str(EIGHTHS[width % 8]);
    s
}

fn format_nanos(nanos: u128) -> String {
    let nanos = u64::try_from(nanos).unwrap_or(u64::MAX);
    format!("{:?}", Duration::from_nanos(nanos))
}
