//! HTTP GET probe.
//!
//! The first response is the subject: redirects are not followed, and TLS
//! chains are not verified. This is monitoring, not enforcement. For
//! https targets a successful fetch is followed by a plain TLS handshake
//! that extracts the certificate descriptor reported to the sentinel.

use std::sync::OnceLock;
use std::time::Instant;

use reqwest::redirect::Policy;

use super::{elapsed_ms, tls, ProbeReport};

/// Prefix carried in `data` when the HTTP status is outside [200, 399].
pub const APPLICATION_ERROR_PREFIX: &str = "应用错误：";

/// Prefix carried in `data` when certificate inspection fails.
pub const SSL_ERROR_PREFIX: &str = "SSL证书错误：";

fn http_client() -> &'static reqwest::Client {
    static CLIENT: OnceLock<reqwest::Client> = OnceLock::new();
    CLIENT.get_or_init(|| {
        reqwest::Client::builder()
            .redirect(Policy::none())
            .danger_accept_invalid_certs(true)
            .build()
            .expect("failed to build probe HTTP client")
    })
}

pub async fn probe(target: &str) -> ProbeReport {
    let start = Instant::now();

    let response = match http_client().get(target).send().await {
        Ok(response) => response,
        Err(err) => return ProbeReport::failure(err.to_string()),
    };
    // Headers are in; the body is not part of the measurement.
    let delay = elapsed_ms(start);

    let status = response.status();
    if status.as_u16() < 200 || status.as_u16() > 399 {
        return ProbeReport {
            delay,
            successful: false,
            data: format!("{APPLICATION_ERROR_PREFIX}{status}"),
        };
    }

    let url = response.url().clone();
    if url.scheme() != "https" {
        return ProbeReport {
            delay,
            successful: true,
            data: String::new(),
        };
    }

    match tls::inspect_certificate(&url).await {
        Ok(cert) => ProbeReport {
            delay,
            successful: true,
            data: cert.wire_descriptor(),
        },
        Err(err) => ProbeReport {
            delay,
            successful: false,
            data: format!("{SSL_ERROR_PREFIX}{err}"),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn plain_http_success_has_empty_data() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(200).set_body_string("OK"))
            .mount(&server)
            .await;

        let report = probe(&format!("{}/health", server.uri())).await;
        assert!(report.successful);
        assert!(report.data.is_empty());
        assert!(report.delay > 0.0);
    }

    #[tokio::test]
    async fn server_error_reports_application_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let report = probe(&format!("{}/health", server.uri())).await;
        assert!(!report.successful);
        assert!(report.data.starts_with(APPLICATION_ERROR_PREFIX));
        assert!(report.data.contains("500"));
    }

    #[tokio::test]
    async fn redirect_is_not_followed_and_counts_as_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/moved"))
            .respond_with(
                ResponseTemplate::new(301).insert_header("Location", "http://example.invalid/"),
            )
            .mount(&server)
            .await;

        // 301 sits inside [200, 399]; the first response is the subject.
        let report = probe(&format!("{}/moved", server.uri())).await;
        assert!(report.successful);
        assert!(report.data.is_empty());
    }

    #[tokio::test]
    async fn transport_error_carries_message_and_no_delay() {
        let report = probe("http://127.0.0.1:1/unreachable").await;
        assert!(!report.successful);
        assert!(!report.data.is_empty());
        assert_eq!(report.delay, 0.0);
    }
}
