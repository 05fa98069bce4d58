//! Per-core CPU time sampler over a `/proc/stat`-shaped source.
//!
//! The source is read fresh on every scrape, so concurrent scrapes never
//! share state. Only the contiguous `cpu*` block after the aggregate header
//! line is scanned; the rest of the file is never read.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use super::metrics::{Meter, MetricsError, Observation};

/// Kernel ticks per second of CPU time (USER_HZ).
const TICKS_PER_SECOND: u64 = 100;

/// Register the CPU-time sampler as the `system.cpu.time` observable
/// counter, reading from the given stat source at every scrape.
pub fn register(meter: &Meter, stat_path: impl Into<PathBuf>) {
    let path = stat_path.into();
    meter.create_observable_counter(
        "system.cpu.time",
        move |_cx| cpu_time_observations(&path),
        "s",
        "CPU time",
    );
}

/// Read the stat source and convert the per-cpu block into observations.
///
/// Failures here fail only this instrument's collection; counters in the
/// same scrape are unaffected.
pub fn cpu_time_observations(path: &Path) -> Result<Vec<Observation>, MetricsError> {
    let file = File::open(path)?;
    read_cpu_times(BufReader::new(file))
}

fn read_cpu_times<R: BufRead>(source: R) -> Result<Vec<Observation>, MetricsError> {
    let mut observations = Vec::new();
    let mut lines = source.lines();

    // First line is the machine-wide aggregate; skip it.
    if lines.next().transpose()?.is_none() {
        return Ok(observations);
    }

    for line in lines {
        let line = line?;
        // The per-cpu block is contiguous; the first non-matching line ends it.
        if !line.starts_with("cpu") {
            break;
        }
        let mut fields = line.split_whitespace();
        let cpu = fields
            .next()
            .ok_or_else(|| MetricsError::Malformed(line.clone()))?
            .to_string();
        let user = parse_ticks(fields.next(), &line)?;
        let system = parse_ticks(fields.next(), &line)?;

        observations.push(
            Observation::new(user / TICKS_PER_SECOND)
                .with_label("cpu", cpu.clone())
                .with_label("state", "user"),
        );
        observations.push(
            Observation::new(system / TICKS_PER_SECOND)
                .with_label("cpu", cpu)
                .with_label("state", "system"),
        );
    }

    Ok(observations)
}

fn parse_ticks(field: Option<&str>, line: &str) -> Result<u64, MetricsError> {
    field
        .and_then(|raw| raw.parse().ok())
        .ok_or_else(|| MetricsError::Malformed(line.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::io::Write as _;

    fn observe(input: &str) -> Result<Vec<Observation>, MetricsError> {
        read_cpu_times(Cursor::new(input.to_string()))
    }

    #[test]
    fn test_skips_aggregate_and_truncates_ticks() {
        let observations =
            observe("cpu  100 200 300 400\ncpu0 10 20 30 40\ncpu1 30 40 50 60\n").unwrap();

        assert_eq!(observations.len(), 4);
        assert_eq!(
            observations[0],
            Observation::new(0)
                .with_label("cpu", "cpu0")
                .with_label("state", "user")
        );
        assert_eq!(
            observations[1],
            Observation::new(0)
                .with_label("cpu", "cpu0")
                .with_label("state", "system")
        );
        assert_eq!(
            observations[2],
            Observation::new(0)
                .with_label("cpu", "cpu1")
                .with_label("state", "user")
        );
        assert_eq!(
            observations[3],
            Observation::new(0)
                .with_label("cpu", "cpu1")
                .with_label("state", "system")
        );
    }

    #[test]
    fn test_division_truncates_not_rounds() {
        let observations = observe("cpu  1 1\ncpu0 500 600\ncpu1 199 99\n").unwrap();

        assert_eq!(observations[0].value, 5);
        assert_eq!(observations[1].value, 6);
        assert_eq!(observations[2].value, 1);
        assert_eq!(observations[3].value, 0);
    }

    #[test]
    fn test_stops_at_first_non_cpu_line() {
        let observations =
            observe("cpu  1 2\ncpu0 100 200\nintr 12345\ncpu1 300 400\n").unwrap();

        // cpu1 sits after the block terminator and must not be scanned.
        assert_eq!(observations.len(), 2);
        assert_eq!(observations[0].labels[0], ("cpu".to_string(), "cpu0".to_string()));
    }

    #[test]
    fn test_malformed_row_is_an_error() {
        let err = observe("cpu  1 2\ncpu0 100\n").unwrap_err();
        assert!(matches!(err, MetricsError::Malformed(_)));

        let err = observe("cpu  1 2\ncpu0 abc 200\n").unwrap_err();
        assert!(matches!(err, MetricsError::Malformed(_)));
    }

    #[test]
    fn test_empty_source_yields_nothing() {
        assert!(observe("").unwrap().is_empty());
        assert!(observe("cpu  1 2\n").unwrap().is_empty());
    }

    #[test]
    fn test_registered_sampler_feeds_collect() {
        let mut stat = tempfile::NamedTempFile::new().unwrap();
        writeln!(stat, "cpu  100 200").unwrap();
        writeln!(stat, "cpu0 500 600").unwrap();
        stat.flush().unwrap();

        let meter = Meter::new();
        register(&meter, stat.path());

        let output = meter.collect();
        assert!(output.contains("system_cpu_time{cpu=\"cpu0\",state=\"user\"} 5"));
        assert!(output.contains("system_cpu_time{cpu=\"cpu0\",state=\"system\"} 6"));
    }

    #[test]
    fn test_missing_source_fails_only_this_instrument() {
        let meter = Meter::new();
        let counter = meter.create_counter("requests", "", "1");
        counter.add(2);
        register(&meter, "/nonexistent/stat");

        let output = meter.collect();
        assert!(output.contains("requests 2"));
        assert!(!output.contains("system_cpu_time"));
        assert_eq!(meter.scrape_failures(), 1);
    }
}
