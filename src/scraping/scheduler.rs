//! Worker scheduler
//!
//! Fans the place list out over a fixed pool of workers. Each worker is
//! bound to at most one proxy for its whole lifetime, pulls places from a
//! shared queue, runs the retry controller for each, and streams the
//! resulting records to the sink before pulling the next place. The run
//! ends when every place has a terminal outcome or shutdown is signalled.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use rand::Rng;
use tokio::sync::{watch, Mutex};
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::types::{Place, PlaceOutcome, RunSummary};

use super::proxy::{ProxyEndpoint, ProxyPool};
use super::retry::RetryController;
use super::sink::ReviewSink;
use super::{PlaceError, PlaceScraper};

const PROBE_URL: &str = "https://www.google.com/generate_204";
const PROBE_TIMEOUT: Duration = Duration::from_secs(8);

/// Fan-out controller for one run.
pub struct Scheduler {
    scraper: Arc<dyn PlaceScraper>,
    sink: Arc<ReviewSink>,
    pool: ProxyPool,
    retry: RetryController,
    workers: usize,
    /// Keep a worker alive without its proxy when the preflight probe
    /// fails, instead of idling it for the whole run.
    fallback_no_proxy: bool,
    /// Probe each proxy with a cheap HTTP request before spending a
    /// browser launch on it. Disabled in tests.
    preflight_probe: bool,
}

impl Scheduler {
    pub fn new(
        scraper: Arc<dyn PlaceScraper>,
        sink: Arc<ReviewSink>,
        pool: ProxyPool,
        retry: RetryController,
        requested_threads: usize,
        fallback_no_proxy: bool,
    ) -> Self {
        let workers = pool.effective_workers(requested_threads);
        Self {
            scraper,
            sink,
            pool,
            retry,
            workers,
            fallback_no_proxy,
            preflight_probe: true,
        }
    }

    #[cfg(test)]
    pub fn without_preflight(mut self) -> Self {
        self.preflight_probe = false;
        self
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Process all places to a terminal outcome. Sink write failures abort
    /// the run; everything already flushed stays on disk.
    pub async fn run(
        &self,
        places: Vec<Place>,
        shutdown: watch::Receiver<bool>,
    ) -> Result<RunSummary> {
        let total = places.len();
        let queue: Arc<Mutex<VecDeque<(usize, Place)>>> =
            Arc::new(Mutex::new(places.into_iter().enumerate().collect()));
        let summary = Arc::new(Mutex::new(RunSummary {
            places_total: total,
            ..RunSummary::default()
        }));

        info!(
            places = total,
            workers = self.workers,
            proxies = self.pool.len(),
            "starting run"
        );

        let mut handles = Vec::with_capacity(self.workers);
        for worker_id in 0..self.workers {
            let scraper = Arc::clone(&self.scraper);
            let sink = Arc::clone(&self.sink);
            let queue = Arc::clone(&queue);
            let summary = Arc::clone(&summary);
            let retry = self.retry.clone();
            let proxy = self.pool.assign(worker_id).cloned();
            let shutdown = shutdown.clone();
            let fallback = self.fallback_no_proxy;
            let preflight = self.preflight_probe;

            handles.push(tokio::spawn(async move {
                worker_loop(
                    worker_id, scraper, sink, queue, summary, retry, proxy, shutdown, fallback,
                    preflight,
                )
                .await
            }));
        }

        for handle in handles {
            handle.await.context("worker task panicked")??;
        }

        // Workers exit early when their proxies fail preflight; anything
        // still queued then has no worker left to run it. Places abandoned
        // by a shutdown request are not failures and stay unreported.
        if !*shutdown.borrow() {
            let mut queue = queue.lock().await;
            let mut s = summary.lock().await;
            while let Some((_, place)) = queue.pop_front() {
                warn!(place = %place.name, "no usable worker left; place skipped");
                let reason =
                    PlaceError::ProxyUnusable("every worker's proxy failed preflight".to_string());
                s.record(
                    &place.name,
                    PlaceOutcome::Failure {
                        reason: reason.to_string(),
                    },
                );
            }
        }

        let summary = Arc::try_unwrap(summary)
            .map_err(|_| anyhow::anyhow!("summary still shared after workers exited"))?
            .into_inner();
        info!(
            succeeded = summary.places_succeeded,
            failed = summary.places_failed,
            records = summary.records_written,
            "run finished"
        );
        Ok(summary)
    }
}

#[allow(clippy::too_many_arguments)]
async fn worker_loop(
    worker_id: usize,
    scraper: Arc<dyn PlaceScraper>,
    sink: Arc<ReviewSink>,
    queue: Arc<Mutex<VecDeque<(usize, Place)>>>,
    summary: Arc<Mutex<RunSummary>>,
    retry: RetryController,
    mut proxy: Option<ProxyEndpoint>,
    shutdown: watch::Receiver<bool>,
    fallback_no_proxy: bool,
    preflight_probe: bool,
) -> Result<()> {
    if let Some(endpoint) = &proxy {
        if preflight_probe && !probe_proxy(endpoint).await {
            if fallback_no_proxy {
                warn!(worker_id, proxy = %endpoint.server_arg(), "proxy failed preflight; continuing unproxied");
                proxy = None;
            } else {
                warn!(worker_id, proxy = %endpoint.server_arg(), "proxy failed preflight; worker idle for this run");
                return Ok(());
            }
        }
    }

    // Stagger startup so one provider is not hit by every worker at once.
    let stagger_ms = rand::thread_rng().gen_range(50..600);
    sleep(Duration::from_millis(stagger_ms)).await;

    match &proxy {
        Some(p) => info!(worker_id, proxy = %p.server_arg(), "worker started"),
        None => info!(worker_id, "worker started unproxied"),
    }

    loop {
        if *shutdown.borrow() {
            info!(worker_id, "shutdown requested; worker stopping");
            return Ok(());
        }

        let Some((index, place)) = queue.lock().await.pop_front() else {
            return Ok(());
        };

        let outcome = match retry.run(scraper.as_ref(), &place, proxy.as_ref()).await {
            Ok(records) => {
                let written = sink
                    .write_batch(&records)
                    .await
                    .with_context(|| format!("writing records for '{}'", place.name))?;
                info!(worker_id, index, place = %place.name, records = written, "place done");
                PlaceOutcome::Success { records: written }
            }
            Err(e) => {
                error!(worker_id, index, place = %place.name, error = %e, "place failed permanently");
                PlaceOutcome::Failure {
                    reason: e.to_string(),
                }
            }
        };
        summary.lock().await.record(&place.name, outcome);

        // Micro-pause between places; some proxy providers drop tunnels
        // opened back to back.
        let pause_ms = rand::thread_rng().gen_range(150..350);
        sleep(Duration::from_millis(pause_ms)).await;
    }
}

/// Cheap reachability check for a proxy endpoint before a browser launch
/// is spent on it. Any 2xx from the no-content endpoint counts.
async fn probe_proxy(endpoint: &ProxyEndpoint) -> bool {
    let proxy = match reqwest::Proxy::all(endpoint.uri()) {
        Ok(p) => p,
        Err(e) => {
            warn!(proxy = %endpoint.server_arg(), error = %e, "proxy URI rejected by probe client");
            return false;
        }
    };
    let client = match reqwest::Client::builder()
        .proxy(proxy)
        .timeout(PROBE_TIMEOUT)
        .build()
    {
        Ok(c) => c,
        Err(e) => {
            warn!(proxy = %endpoint.server_arg(), error = %e, "failed to build probe client");
            return false;
        }
    };
    match client.get(PROBE_URL).send().await {
        Ok(resp) => resp.status().is_success(),
        Err(e) => {
            warn!(proxy = %endpoint.server_arg(), error = %e, "proxy preflight failed");
            false
        }
    }
}
