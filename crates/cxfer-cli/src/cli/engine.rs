//! Wires config, ledger store, transport and governor into a coordinator.

use anyhow::{Context, Result};
use cxfer_core::clock::{Clock, SystemClock};
use cxfer_core::config::EngineConfig;
use cxfer_core::events::{SharedSink, TracingSink};
use cxfer_core::governor::NetworkGovernor;
use cxfer_core::ledger::{SharedLedger, TransferLedger};
use cxfer_core::store::SqliteStore;
use cxfer_core::transport::{CurlTransport, SharedTransport};
use cxfer_core::Coordinator;
use std::sync::Arc;
use std::time::Duration;

pub struct Engine {
    pub config: EngineConfig,
    pub ledger: SharedLedger,
    pub coordinator: Coordinator,
    governor: Option<NetworkGovernor>,
}

impl Engine {
    /// Open the default ledger. With `adaptive`, start the governor and
    /// have the coordinator follow it.
    pub async fn open(config: EngineConfig, adaptive: bool) -> Result<Self> {
        let store = SqliteStore::open_default(config.ledger.max_total_bytes)
            .await
            .context("open ledger store")?;
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let sink: SharedSink = Arc::new(TracingSink);
        let ledger = Arc::new(TransferLedger::new(
            Arc::new(store),
            Arc::clone(&clock),
            config.ledger.clone(),
        ));
        let transport: SharedTransport = Arc::new(CurlTransport::new());

        let governor = adaptive.then(|| {
            let governor = NetworkGovernor::new(
                Arc::clone(&transport),
                config.governor.clone(),
                Arc::clone(&clock),
                Arc::clone(&sink),
            );
            governor.start(Duration::from_millis(config.governor.poll_interval_ms));
            governor
        });

        let mut builder = Coordinator::from_config(transport, Arc::clone(&ledger), &config)
            .clock(clock)
            .sink(sink);
        if let Some(governor) = &governor {
            builder = builder.governor(governor);
        }

        Ok(Self {
            config,
            ledger,
            coordinator: builder.build(),
            governor,
        })
    }

    /// Run the expiry sweep in the background while a transfer is in progress.
    pub fn start_sweeper(&self) {
        let interval = Duration::from_secs(self.config.ledger.sweep_interval_secs.max(1));
        self.ledger.start_sweeper(interval);
    }

    pub async fn shutdown(self) {
        if let Some(governor) = &self.governor {
            governor.stop().await;
        }
        self.ledger.stop_sweeper().await;
    }
}
