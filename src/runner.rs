use std::collections::BTreeMap;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use isahc::{ config::Configurable, HttpClient };
use tokio::runtime::{ Builder, Runtime };
use tokio::task::{ JoinError, JoinSet };
use tokio::time::{ interval, Instant, MissedTickBehavior };
use tokio_util::sync::CancellationToken;
use tracing::{ info, warn };

use crate::attacker::{ Attacker, RawResult, Transport };
use crate::chain::{ ChainQuery, HttpChain };
use crate::config::CampaignConfig;
use crate::error::CampaignError;
use crate::gate::AdmissionGate;
use crate::metrics::{ Aggregator, Metrics };
use crate::readiness::{ await_liveness, await_rpc_ready };
use crate::results::ResultWriter;
use crate::target::Targeter;
use crate::tracker::{ tx_ref, AnnotatedResult, Tracker };

const PROGRESS_INTERVAL: Duration = Duration::from_secs(2); // how often the running tally is logged

/// Drives one campaign from the first send to the frozen aggregate.
#[derive(Debug)]
pub struct Runner<T, C> {
    config: CampaignConfig,
    transport: Arc<T>, // endpoint the attacker sends to
    chain: Arc<C>, // endpoint the trackers poll
    shutdown: CancellationToken,
}

impl Runner<HttpClient, HttpChain> {
    /// Runner talking to `config.rpc` over HTTP for both sending and tracking.
    pub fn new_http(config: CampaignConfig) -> Result<Self, CampaignError> {
        let client = HttpClient::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connection_timeout)
            .build()?;
        let chain = HttpChain::new(client.clone(), config.rpc.clone());
        Ok(Self::new(config, Arc::new(client), Arc::new(chain)))
    }

    /// Waits for the endpoint to come up and answer JSON-RPC.
    pub async fn preflight(&self) -> Result<(), CampaignError> {
        if self.config.skip_ready {
            info!("readiness probes skipped");
            return Ok(());
        }

        let url = &self.config.rpc;
        let limit = self.config.ready_timeout;
        await_liveness(&self.transport, url, limit).await?;
        let chain_id = await_rpc_ready(&self.transport, url, limit).await?;
        if chain_id != self.config.chain_id {
            warn!(expected = self.config.chain_id, actual = chain_id, "endpoint reports a different chain id");
        }
        Ok(())
    }
}

impl<T: Transport, C: ChainQuery> Runner<T, C> {
    pub fn new(config: CampaignConfig, transport: Arc<T>, chain: Arc<C>) -> Self {
        Self { config, transport, chain, shutdown: CancellationToken::new() }
    }

    /// Cancelling this stops pacing and abandons every pending confirmation.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Runs the campaign.
    ///
    /// Every result that carries a transaction hash is handed to its own worker, which
    /// waits for an admission gate pass before polling. Everything else is recorded as
    /// soon as it arrives. Metrics are frozen only after the attack channel is closed
    /// and every worker has been joined. A worker that dies is counted as unconfirmed
    /// without disturbing its siblings.
    pub async fn run(&self) -> Result<Metrics, CampaignError> {
        let config = &self.config;
        let aggregator = Arc::new(Aggregator::new()?);
        let gate = AdmissionGate::new(config.gate);
        let tracker = Arc::new(Tracker::new(Arc::clone(&self.chain), config.poll_interval));
        let targeter = Arc::new(Targeter::new(config));

        let mut sink = match &config.results {
            Some(path) =>
                Some(
                    ResultWriter::create(path).map_err(|source| CampaignError::Results {
                        path: path.clone(),
                        source,
                    })?
                ),
            None => None,
        };

        info!(
            name = %config.name,
            rpc = %config.rpc,
            mode = ?config.mode,
            gate = gate.capacity(),
            "campaign started"
        );

        let attacker = Attacker::new(Arc::clone(&self.transport));
        let mut results = attacker.attack(targeter, config.rate, config.duration, self.shutdown.clone());
        let mut workers = JoinSet::new();
        let mut pending = BTreeMap::new(); // submissions whose worker has not reported back

        let mut progress = interval(PROGRESS_INTERVAL);
        progress.set_missed_tick_behavior(MissedTickBehavior::Delay);
        progress.tick().await;

        loop {
            tokio::select! {
                received = results.recv() => {
                    let Some(raw) = received else { break };
                    if tx_ref(&raw).is_none() {
                        let annotated = AnnotatedResult::pass_through(raw);
                        aggregator.append(&annotated);
                        self.record(&mut sink, &annotated)?;
                        continue;
                    }

                    pending.insert(raw.seq, raw.clone());
                    let gate = gate.clone();
                    let tracker = Arc::clone(&tracker);
                    let aggregator = Arc::clone(&aggregator);
                    let shutdown = self.shutdown.clone();
                    let confirm_timeout = config.confirm_timeout;
                    workers.spawn(async move {
                        let admitted = tokio::select! {
                            biased;
                            _ = shutdown.cancelled() => None,
                            pass = gate.acquire() => Some(pass?),
                        };
                        let annotated = match admitted {
                            Some(_pass) => {
                                // the confirmation clock starts once admitted
                                let deadline = confirm_timeout.map(|limit| Instant::now() + limit);
                                tracker.confirm(raw, deadline, &shutdown).await
                            }
                            None => AnnotatedResult::abandoned(raw),
                        };
                        aggregator.append(&annotated);
                        Ok::<_, CampaignError>(annotated)
                    });
                }
                Some(joined) = workers.join_next(), if !workers.is_empty() => {
                    self.settle(joined, &mut pending, &mut sink)?;
                }
                _ = progress.tick() => {
                    info!(
                        resolved = aggregator.requests(),
                        tracking = workers.len(),
                        admitted = gate.in_use(),
                        "campaign in progress"
                    );
                }
            }
        }

        info!(pending = workers.len(), "attack finished, waiting for confirmations");
        while let Some(joined) = workers.join_next().await {
            self.settle(joined, &mut pending, &mut sink)?;
        }

        for raw in pending.into_values() {
            let mut failed = AnnotatedResult::abandoned(raw);
            failed.raw.error = Some("confirmation worker failed".to_string());
            aggregator.append(&failed);
            self.record(&mut sink, &failed)?;
        }

        if let (Some(sink), Some(path)) = (sink, &config.results) {
            let written = sink.written();
            sink.finish().map_err(|source| CampaignError::Results { path: path.clone(), source })?;
            info!(path = %path.display(), written, "results written");
        }

        gate.close();
        drop(tracker);
        let aggregator = Arc::try_unwrap(aggregator).map_err(|shared|
            CampaignError::Outstanding(Arc::strong_count(&shared) - 1)
        )?;
        let metrics = aggregator.finalize();

        info!(
            requests = metrics.requests,
            successes = metrics.successes,
            success = metrics.success,
            p50 = ?metrics.latencies.p50,
            p99 = ?metrics.latencies.p99,
            "campaign finished"
        );
        Ok(metrics)
    }

    fn settle<W: io::Write>(
        &self,
        joined: Result<Result<AnnotatedResult, CampaignError>, JoinError>,
        pending: &mut BTreeMap<u64, RawResult>,
        sink: &mut Option<ResultWriter<W>>
    ) -> Result<(), CampaignError> {
        match joined {
            Ok(settled) => {
                let annotated = settled?;
                pending.remove(&annotated.raw.seq);
                self.record(sink, &annotated)
            }
            Err(err) => {
                warn!(error = %err, "confirmation worker failed");
                Ok(())
            }
        }
    }

    fn record<W: io::Write>(
        &self,
        sink: &mut Option<ResultWriter<W>>,
        result: &AnnotatedResult
    ) -> Result<(), CampaignError> {
        let (Some(sink), Some(path)) = (sink.as_mut(), &self.config.results) else {
            return Ok(());
        };
        sink.write(result).map_err(|source| CampaignError::Results { path: path.clone(), source })
    }
}

/// Multi-threaded runtime with `threads` workers.
pub fn build_runtime(threads: usize) -> io::Result<Runtime> {
    Builder::new_multi_thread().worker_threads(threads.max(1)).enable_all().build()
}
