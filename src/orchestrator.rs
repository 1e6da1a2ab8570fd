//! Binds both wire protocols concurrently and drives them to completion
//! (spec Component G). Grounded in
//! `original_source/ndrop/netdrop.py`'s `NetDropServer.wait_for_request`: a
//! `select.select(self._transport, [], [], 0.5)` readiness loop that hands
//! off to whichever transport's TCP listener is ready, while each
//! transport's UDP listener and hello loop run on their own thread.
//!
//! The UDP listener and hello loop become independent, separately
//! cancellable tokio tasks per engine; the TCP readiness loop becomes a
//! `tokio::select!` over `accept_once()` on whichever engines are bound,
//! polled on the same ~500ms cadence as the donor's `select` timeout so a
//! shutdown signal is never more than half a second late.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::dukto::{self, DuktoEngine};
use crate::nitroshare::{self, NitroShareEngine};
use crate::peer::Node;

const READINESS_POLL: Duration = Duration::from_millis(500);

/// Holds whichever engines are active for this run. A host can bind just
/// one protocol (`--mode dukto`/`--mode nitroshare`) or both (§6).
pub struct Orchestrator {
    dukto: Option<Arc<DuktoEngine>>,
    nitroshare: Option<Arc<NitroShareEngine>>,
}

impl Orchestrator {
    pub fn new(dukto: Option<Arc<DuktoEngine>>, nitroshare: Option<Arc<NitroShareEngine>>) -> Self {
        Self { dukto, nitroshare }
    }

    pub fn dukto(&self) -> Option<&Arc<DuktoEngine>> {
        self.dukto.as_ref()
    }

    pub fn nitroshare(&self) -> Option<&Arc<NitroShareEngine>> {
        self.nitroshare.as_ref()
    }

    /// All peers discovered across every bound protocol.
    pub fn peers(&self) -> Vec<Node> {
        let mut all = Vec::new();
        if let Some(engine) = &self.dukto {
            all.extend(engine.peers());
        }
        if let Some(engine) = &self.nitroshare {
            all.extend(engine.peers());
        }
        all
    }

    /// Runs until `shutdown` is signaled. Spawns one UDP-listener task and
    /// one hello-loop task per bound engine, then drives the serialized TCP
    /// accept loop on the calling task until shutdown.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) {
        let mut background = Vec::new();

        if let Some(engine) = self.dukto.clone() {
            background.push(tokio::spawn(udp_listener_loop(engine.clone(), shutdown.clone())));
            background.push(tokio::spawn(dukto_hello_loop(engine, shutdown.clone())));
        }
        if let Some(engine) = self.nitroshare.clone() {
            background.push(tokio::spawn(udp_listener_loop(engine.clone(), shutdown.clone())));
            background.push(tokio::spawn(nitroshare_hello_loop(engine, shutdown.clone())));
        }

        self.accept_loop(shutdown).await;

        for task in background {
            task.abort();
        }
    }

    async fn accept_loop(&self, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => return,
                result = accept_or_pending(&self.dukto) => {
                    if let Err(err) = result {
                        tracing::warn!(error = %err, "dukto accept failed");
                    }
                }
                result = accept_or_pending(&self.nitroshare) => {
                    if let Err(err) = result {
                        tracing::warn!(error = %err, "nitroshare accept failed");
                    }
                }
                _ = tokio::time::sleep(READINESS_POLL) => {}
            }
        }
    }
}

/// Awaits `engine.accept_once()` if bound, otherwise never resolves so the
/// surrounding `select!` falls through to its other branches. Mirrors the
/// donor skipping a transport that isn't in `select`'s ready set.
async fn accept_or_pending<T: Engine>(engine: &Option<Arc<T>>) -> std::io::Result<()> {
    match engine {
        Some(engine) => engine.accept_once().await,
        None => std::future::pending().await,
    }
}

async fn udp_listener_loop<T: Engine + Send + Sync + 'static>(engine: Arc<T>, mut shutdown: watch::Receiver<bool>) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => return,
            result = engine.handle_udp_once() => {
                if let Err(err) = result {
                    tracing::warn!(error = %err, "udp listener failed");
                    return;
                }
            }
        }
    }
}

async fn dukto_hello_loop(engine: Arc<DuktoEngine>, mut shutdown: watch::Receiver<bool>) {
    let mut interval = tokio::time::interval(dukto::default_hello_interval());
    interval.tick().await; // first tick fires immediately; consume it before the loop
    let _ = engine.say_hello().await;
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                let _ = engine.say_goodbye().await;
                return;
            }
            _ = interval.tick() => {
                let _ = engine.say_hello().await;
            }
        }
    }
}

async fn nitroshare_hello_loop(engine: Arc<NitroShareEngine>, mut shutdown: watch::Receiver<bool>) {
    let mut interval = tokio::time::interval(nitroshare::HELLO_INTERVAL);
    interval.tick().await;
    let _ = engine.say_hello().await;
    loop {
        tokio::select! {
            _ = shutdown.changed() => return,
            _ = interval.tick() => {
                let _ = engine.say_hello().await;
                engine.sweep_expired_peers();
            }
        }
    }
}

// Both engines expose the same `handle_udp_once`/`accept_once` shape but
// aren't generic over a shared trait in their own modules (they're used
// directly and concretely everywhere else); this thin trait lets the
// readiness loop and UDP listener loop above be written once instead of
// twice.
trait Engine {
    fn handle_udp_once(&self) -> impl std::future::Future<Output = std::io::Result<()>> + Send;
    fn accept_once(&self) -> impl std::future::Future<Output = std::io::Result<()>> + Send;
}

impl Engine for DuktoEngine {
    async fn handle_udp_once(&self) -> std::io::Result<()> {
        DuktoEngine::handle_udp_once(self).await
    }

    async fn accept_once(&self) -> std::io::Result<()> {
        DuktoEngine::accept_once(self).await
    }
}

impl Engine for NitroShareEngine {
    async fn handle_udp_once(&self) -> std::io::Result<()> {
        NitroShareEngine::handle_udp_once(self).await
    }

    async fn accept_once(&self) -> std::io::Result<()> {
        NitroShareEngine::accept_once(self).await
    }
}
