//! Host information and state sampling.
//!
//! The state reporter is a background loop for the lifetime of the
//! process: it sends a sample per iteration, paced by the RPC round trip
//! (plus the minimum CPU sampling interval), sleeps the reconnect delay
//! on error, and resends the full host info every ten minutes.

use std::time::{Duration, Instant};

use sysinfo::{Networks, System};
use tokio::sync::watch;
use tracing::{debug, trace};

use crate::rpc::{proto, AgentClient};

use super::RECONNECT_DELAY;

const HOST_INFO_INTERVAL: Duration = Duration::from_secs(10 * 60);

/// Static host facts, sent on registration and every ten minutes after.
pub fn collect_host_info(version: &str) -> proto::HostInfo {
    let sys = System::new_all();
    proto::HostInfo {
        hostname: System::host_name().unwrap_or_default(),
        os: System::name().unwrap_or_default(),
        kernel_version: System::kernel_version().unwrap_or_default(),
        arch: System::cpu_arch().unwrap_or_default(),
        cpu_cores: sys.cpus().len() as u32,
        mem_total: sys.total_memory(),
        swap_total: sys.total_swap(),
        boot_time: System::boot_time(),
        version: version.to_string(),
    }
}

/// Rolling sampler: keeps sysinfo handles warm and derives network speeds
/// from successive deltas.
pub struct StateSampler {
    sys: System,
    networks: Networks,
    last_sampled: Instant,
    last_rx: u64,
    last_tx: u64,
}

impl Default for StateSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl StateSampler {
    pub fn new() -> Self {
        let networks = Networks::new_with_refreshed_list();
        let (last_rx, last_tx) = totals(&networks);
        Self {
            sys: System::new_all(),
            networks,
            last_sampled: Instant::now(),
            last_rx,
            last_tx,
        }
    }

    pub async fn sample(&mut self) -> proto::StateSample {
        self.sys.refresh_cpu_usage();
        // CPU usage needs two refreshes a minimum interval apart.
        tokio::time::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL).await;
        self.sys.refresh_cpu_usage();
        self.sys.refresh_memory();
        self.networks.refresh();

        let (rx_total, tx_total) = totals(&self.networks);
        let elapsed = self.last_sampled.elapsed().as_secs_f64().max(0.1);
        let net_in_speed = (rx_total.saturating_sub(self.last_rx) as f64 / elapsed) as u64;
        let net_out_speed = (tx_total.saturating_sub(self.last_tx) as f64 / elapsed) as u64;
        self.last_sampled = Instant::now();
        self.last_rx = rx_total;
        self.last_tx = tx_total;

        proto::StateSample {
            cpu_percent: self.sys.global_cpu_usage() as f64,
            mem_used: self.sys.used_memory(),
            swap_used: self.sys.used_swap(),
            net_in_speed,
            net_out_speed,
            net_in_transfer: rx_total,
            net_out_transfer: tx_total,
            uptime: System::uptime(),
            load_one: System::load_average().one,
        }
    }
}

fn totals(networks: &Networks) -> (u64, u64) {
    networks.iter().fold((0, 0), |(rx, tx), (_, data)| {
        (rx + data.total_received(), tx + data.total_transmitted())
    })
}

/// Background state reporter. Runs for the lifetime of the process; the
/// watch channel hands it whichever client the outer loop currently has.
pub async fn report_state(mut client_rx: watch::Receiver<Option<AgentClient>>, version: String) {
    let mut sampler = StateSampler::new();
    let mut last_host_info = Instant::now();

    loop {
        let client = client_rx.borrow_and_update().clone();
        let Some(mut client) = client else {
            // Not connected; wait until the outer loop establishes a channel.
            if client_rx.changed().await.is_err() {
                return;
            }
            continue;
        };

        let sample = sampler.sample().await;
        trace!(cpu = sample.cpu_percent, "sending state sample");
        if let Err(status) = client.report_system_state(sample).await {
            debug!("state report failed: {status}");
            tokio::time::sleep(RECONNECT_DELAY).await;
            continue;
        }

        if last_host_info.elapsed() >= HOST_INFO_INTERVAL {
            last_host_info = Instant::now();
            let _ = client
                .report_system_info(collect_host_info(&version))
                .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_info_is_populated() {
        let info = collect_host_info("1.2.3");
        assert_eq!(info.version, "1.2.3");
        assert!(info.cpu_cores > 0);
        assert!(info.mem_total > 0);
    }

    #[tokio::test]
    async fn sampler_produces_consistent_samples() {
        let mut sampler = StateSampler::new();
        let sample = sampler.sample().await;
        assert!(sample.cpu_percent >= 0.0);
        assert!(sample.mem_used > 0);
        let again = sampler.sample().await;
        assert!(again.net_in_transfer >= sample.net_in_transfer);
    }
}
