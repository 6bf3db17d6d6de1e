use std::time::Duration;

use async_std::sync::Arc;
use bytes::Bytes;
use futures::StreamExt;
use futures::future::{BoxFuture, FutureExt};
use futures::stream::FuturesUnordered;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::time::{Instant, MissedTickBehavior, interval, sleep_until, timeout};
use tracing::{debug, info};

use crate::local::SimulatedCluster;
use crate::local::results::{ClientData, RequestRecord};
use crate::workload::{MIN_REQUEST_DELAY, NodeId, ReadConsistency, RequestInterval};

// Stand-in deadline for intervals ending too far out to be represented.
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

// Replays one client's request intervals against the simulated cluster.
pub struct SimulatedClient {
    id: NodeId,
    cluster: Arc<SimulatedCluster>,
    intervals: Vec<RequestInterval>,
    read_consistency: ReadConsistency,
    key_space: usize,
    drain: Duration,
    rng: StdRng,
    data: ClientData,
}

impl SimulatedClient {
    pub fn new(
        id: NodeId,
        cluster: Arc<SimulatedCluster>,
        intervals: Vec<RequestInterval>,
        read_consistency: ReadConsistency,
        key_space: usize,
        drain: Duration,
    ) -> Self {
        SimulatedClient {
            id,
            cluster,
            intervals,
            read_consistency,
            key_space: key_space.max(1),
            drain,
            rng: StdRng::seed_from_u64(id),
            data: ClientData::new(id),
        }
    }

    // Issues requests until every interval has elapsed, then waits up to the
    // drain period for outstanding responses. Returns what was collected.
    pub async fn run(mut self) -> ClientData {
        let start = Instant::now();
        let mut pending: FuturesUnordered<BoxFuture<'static, RequestRecord>> =
            FuturesUnordered::new();

        let intervals = self.intervals.clone();
        for (phase, current) in intervals.iter().enumerate() {
            debug!(
                phase,
                rate = current.requests_per_sec(),
                read_ratio = current.read_ratio(),
                "starting interval"
            );
            let now = Instant::now();
            let deadline = now
                .checked_add(current.duration())
                .unwrap_or(now + FAR_FUTURE);
            let expiry = sleep_until(deadline);
            tokio::pin!(expiry);

            let Some(delay) = current.request_delay() else {
                // Idle interval, but keep collecting responses.
                loop {
                    tokio::select! {
                        biased;
                        _ = &mut expiry => break,
                        Some(record) = pending.next(), if !pending.is_empty() => {
                            self.data.new_response(record);
                        }
                    }
                }
                continue;
            };

            // A delay longer than the interval itself sends one request at its start.
            let period = delay.min(current.duration()).max(MIN_REQUEST_DELAY);
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = &mut expiry => break,
                    Some(record) = pending.next(), if !pending.is_empty() => {
                        self.data.new_response(record);
                    }
                    _ = ticker.tick() => {
                        let is_write = self.rng.r#gen::<f64>() > current.read_ratio();
                        pending.push(self.send_request(is_write, start));
                    }
                }
            }
        }

        let drained = timeout(self.drain, async {
            while let Some(record) = pending.next().await {
                self.data.new_response(record);
            }
        })
        .await;
        if drained.is_err() {
            debug!(unanswered = pending.len(), "gave up waiting for responses");
        }

        info!(
            client = self.id,
            requests = self.data.request_count(),
            responses = self.data.response_count(),
            "client finished"
        );
        self.data
    }

    fn send_request(&mut self, is_write: bool, start: Instant) -> BoxFuture<'static, RequestRecord> {
        let request_id = self.data.new_request();
        let key = Bytes::from(format!("key:{}", self.rng.gen_range(0..self.key_space)));
        let cluster = self.cluster.clone();
        let client = self.id;
        let consistency = if is_write {
            // Writes always go through the leader.
            ReadConsistency::Leader
        } else {
            self.read_consistency
        };

        async move {
            let sent = Instant::now();
            let stale = if is_write {
                let value = Bytes::from(format!("{}:{}", client, request_id));
                cluster.write(key, value).await;
                false
            } else {
                cluster.read(client, &key, consistency).await.stale
            };
            RequestRecord {
                request_id,
                is_write,
                consistency,
                sent_ms: sent.duration_since(start).as_millis(),
                latency_us: sent.elapsed().as_micros(),
                stale,
            }
        }
        .boxed()
    }
}
