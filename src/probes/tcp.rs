//! TCP connect probe.

use std::time::Instant;

use anyhow::{anyhow, Result};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

use super::{elapsed_ms, ProbeReport, TCP_DIAL_TIMEOUT};

pub async fn probe(target: &str) -> ProbeReport {
    let start = Instant::now();
    match attempt(target).await {
        Ok(()) => ProbeReport {
            delay: elapsed_ms(start),
            successful: true,
            data: String::new(),
        },
        Err(err) => ProbeReport::failure(err.to_string()),
    }
}

async fn attempt(target: &str) -> Result<()> {
    let mut conn = tokio::time::timeout(TCP_DIAL_TIMEOUT, TcpStream::connect(target))
        .await
        .map_err(|_| anyhow!("connect {target}: timed out"))??;
    // The dial is the measurement; a failed write is not a probe failure.
    let _ = conn.write_all(b"ping\n").await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn open_port_succeeds_with_delay() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = listener.accept().await;
        });

        let report = probe(&addr.to_string()).await;
        assert!(report.successful);
        assert!(report.delay > 0.0);
        assert!(report.data.is_empty());
    }

    #[tokio::test]
    async fn closed_port_fails_with_error_text_and_no_delay() {
        // Port 1 is essentially never listening.
        let report = probe("127.0.0.1:1").await;
        assert!(!report.successful);
        assert!(!report.data.is_empty());
        assert_eq!(report.delay, 0.0);
    }
}
