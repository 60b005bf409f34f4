//! Per-model benchmark statistics.

use std::fmt;
use std::time::Duration;

/// Measurements for one successful streamed request.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestMetrics {
    pub tokens: u64,
    pub total_time: Duration,
    /// Generation time reported by the backend, or wall time when it is missing.
    pub inference_time: Duration,
    pub time_to_first_token: Duration,
}

impl RequestMetrics {
    pub fn tokens_per_second(&self) -> Option<f64> {
        let secs = self.inference_time.as_secs_f64();
        (secs > 0.0).then(|| self.tokens as f64 / secs)
    }
}

#[derive(Debug, Clone)]
pub struct BenchmarkReport {
    pub model: String,
    pub planned: usize,
    pub results: Vec<RequestMetrics>,
    pub wall_time: Duration,
}

impl BenchmarkReport {
    pub fn successes(&self) -> usize {
        self.results.len()
    }

    fn tps(&self) -> Vec<f64> {
        self.results
            .iter()
            .filter_map(RequestMetrics::tokens_per_second)
            .collect()
    }

    pub fn mean_tps(&self) -> f64 {
        mean(&self.tps())
    }

    pub fn min_tps(&self) -> f64 {
        self.tps().into_iter().reduce(f64::min).unwrap_or(0.0)
    }

    pub fn max_tps(&self) -> f64 {
        self.tps().into_iter().reduce(f64::max).unwrap_or(0.0)
    }

    /// Total tokens over the wall time of the whole run.
    pub fn server_throughput(&self) -> f64 {
        let secs = self.wall_time.as_secs_f64();
        if secs <= 0.0 {
            return 0.0;
        }
        self.results.iter().map(|r| r.tokens).sum::<u64>() as f64 / secs
    }

    pub fn mean_ttft(&self) -> Duration {
        let ttft: Vec<f64> = self
            .results
            .iter()
            .map(|r| r.time_to_first_token.as_secs_f64())
            .collect();
        Duration::from_secs_f64(mean(&ttft))
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

impl fmt::Display for BenchmarkReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Results for {}", self.model)?;
        writeln!(f, "  successes:           {}/{}", self.successes(), self.planned)?;
        writeln!(f, "  total time:          {:.2}s", self.wall_time.as_secs_f64())?;
        writeln!(f, "  mean tps/request:    {:.2} t/s", self.mean_tps())?;
        writeln!(f, "  server throughput:   {:.2} t/s", self.server_throughput())?;
        writeln!(f, "  worst tps:           {:.2} t/s", self.min_tps())?;
        writeln!(f, "  best tps:            {:.2} t/s", self.max_tps())?;
        write!(f, "  mean ttft:           {:.3}s", self.mean_ttft().as_secs_f64())
    }
}
