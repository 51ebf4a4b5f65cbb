//! Load generator: document reads spread over several connections.

use colored::Colorize;
use rntbd_client::{Client, ClientError, ConnectionConfig};
use rntbd_protocol::{OperationType, ResourceType};
use std::time::{Duration, Instant};

/// Outcome of a benchmark run.
#[derive(Debug)]
pub struct Report {
    pub connections: usize,
    pub requests: usize,
    pub failures: usize,
    pub elapsed: Duration,
    /// Sorted per-request latencies of successful requests.
    pub latencies: Vec<Duration>,
}

impl Report {
    pub fn throughput(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs == 0.0 {
            return 0.0;
        }
        self.latencies.len() as f64 / secs
    }

    /// Nearest-rank percentile over the sorted latencies.
    pub fn percentile(&self, p: f64) -> Duration {
        if self.latencies.is_empty() {
            return Duration::ZERO;
        }
        let rank = ((p / 100.0) * self.latencies.len() as f64).ceil() as usize;
        self.latencies[rank.clamp(1, self.latencies.len()) - 1]
    }

    pub fn render(&self, json: bool) -> String {
        let micros = |d: Duration| d.as_micros() as u64;
        if json {
            return serde_json::json!({
                "connections": self.connections,
                "requests": self.requests,
                "failures": self.failures,
                "elapsed_ms": self.elapsed.as_millis() as u64,
                "throughput_rps": self.throughput(),
                "latency_us": {
                    "p50": micros(self.percentile(50.0)),
                    "p90": micros(self.percentile(90.0)),
                    "p99": micros(self.percentile(99.0)),
                    "max": micros(self.percentile(100.0)),
                },
            })
            .to_string();
        }

        let failures = if self.failures == 0 {
            "0".green()
        } else {
            self.failures.to_string().red()
        };
        format!(
            "{} {} requests over {} connections in {:.2?}\n  throughput  {:.0} req/s\n  failures    {}\n  p50         {:?}\n  p90         {:?}\n  p99         {:?}\n  max         {:?}",
            "Completed".green(),
            self.requests,
            self.connections,
            self.elapsed,
            self.throughput(),
            failures,
            self.percentile(50.0),
            self.percentile(90.0),
            self.percentile(99.0),
            self.percentile(100.0),
        )
    }
}

/// Splits `total` requests as evenly as possible over `workers`.
fn share(total: usize, workers: usize, index: usize) -> usize {
    total / workers + usize::from(index < total % workers)
}

/// Runs `requests` document reads over `connections` connections.
pub async fn run(
    config: ConnectionConfig,
    requests: usize,
    connections: usize,
) -> Result<Report, ClientError> {
    let connections = connections.max(1);

    let mut clients = Vec::with_capacity(connections);
    for _ in 0..connections {
        let client = Client::new(config.clone());
        client.connect().await?;
        clients.push(client);
    }

    let start = Instant::now();
    let mut tasks = Vec::with_capacity(connections);
    for (index, client) in clients.into_iter().enumerate() {
        let count = share(requests, connections, index);
        tasks.push(tokio::spawn(async move {
            let mut latencies = Vec::with_capacity(count);
            let mut failures = 0;
            for _ in 0..count {
                let sent = Instant::now();
                match client.request(ResourceType::DOCUMENT, OperationType::READ).await {
                    Ok(response) if response.is_success() => latencies.push(sent.elapsed()),
                    Ok(response) => {
                        tracing::debug!("read returned {}", response.status_code);
                        failures += 1;
                    }
                    Err(e) => {
                        tracing::debug!("read failed: {}", e);
                        failures += 1;
                        if !client.is_connected() {
                            // Requests not yet sent on a dead connection count as failed.
                            failures = count - latencies.len();
                            break;
                        }
                    }
                }
            }
            let _ = client.close().await;
            (latencies, failures)
        }));
    }

    let mut latencies = Vec::with_capacity(requests);
    let mut failures = 0;
    for task in tasks {
        match task.await {
            Ok((worker_latencies, worker_failures)) => {
                latencies.extend(worker_latencies);
                failures += worker_failures;
            }
            Err(e) => tracing::warn!("bench worker panicked: {}", e),
        }
    }
    let elapsed = start.elapsed();
    latencies.sort_unstable();

    Ok(Report {
        connections,
        requests,
        failures,
        elapsed,
        latencies,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(latencies_ms: &[u64]) -> Report {
        Report {
            connections: 1,
            requests: latencies_ms.len(),
            failures: 0,
            elapsed: Duration::from_secs(2),
            latencies: latencies_ms.iter().map(|ms| Duration::from_millis(*ms)).collect(),
        }
    }

    #[test]
    fn test_share_covers_total() {
        let total: usize = (0..3).map(|i| share(10, 3, i)).sum();
        assert_eq!(total, 10);
        assert_eq!(share(10, 3, 0), 4);
        assert_eq!(share(10, 3, 2), 3);
    }

    #[test]
    fn test_percentiles() {
        let report = report(&[1, 2, 3, 4, 5, 6, 7, 8, 9, 10]);
        assert_eq!(report.percentile(50.0), Duration::from_millis(5));
        assert_eq!(report.percentile(90.0), Duration::from_millis(9));
        assert_eq!(report.percentile(100.0), Duration::from_millis(10));
        assert_eq!(report.percentile(0.0), Duration::from_millis(1));
        assert_eq!(report.throughput(), 5.0);
    }

    #[test]
    fn test_empty_report() {
        let report = report(&[]);
        assert_eq!(report.percentile(99.0), Duration::ZERO);
        let value: serde_json::Value = serde_json::from_str(&report.render(true)).unwrap();
        assert_eq!(value["latency_us"]["p99"], 0);
    }
}
