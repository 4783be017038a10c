//! `cxfer probe` – measure the link once and show the parameters it implies.

use anyhow::{bail, Result};
use cxfer_core::clock::SystemClock;
use cxfer_core::config::EngineConfig;
use cxfer_core::events::TracingSink;
use cxfer_core::governor::{NetworkGovernor, Prober};
use cxfer_core::transport::{CurlTransport, SharedTransport};
use std::sync::Arc;

pub async fn run_probe(cfg: &EngineConfig) -> Result<()> {
    let transport: SharedTransport = Arc::new(CurlTransport::new());
    if !Prober::new(Arc::clone(&transport), &cfg.governor).has_endpoints() {
        bail!("no probe endpoints configured (governor.ping_url, download_url, upload_url)");
    }
    let governor = NetworkGovernor::new(
        transport,
        cfg.governor.clone(),
        Arc::new(SystemClock),
        Arc::new(TracingSink),
    );
    let sample = governor.run_probe().await;
    if sample.is_offline() {
        println!("offline: no probe endpoint answered");
    } else {
        println!("upload:    {:.0} kbps", sample.upload_rate_kbps);
        println!("download:  {:.0} kbps", sample.download_rate_kbps);
        match sample.rtt_ms {
            Some(rtt) => println!("rtt:       {} ms", rtt),
            None => println!("rtt:       -"),
        }
    }
    let params = governor.current_parameters();
    println!("quality:   {}", params.quality_level.as_str());
    println!(
        "params:    concurrency {}, piece size {} bytes, max retries {}",
        params.concurrency, params.piece_size, params.max_retries
    );
    Ok(())
}
