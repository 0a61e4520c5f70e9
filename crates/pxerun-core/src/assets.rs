//! Pre-flight HEAD checks of the boot assets.
//!
//! A machine that cannot fetch its kernel never boots, so both URLs are
//! checked before anything is provisioned.

use tracing::info;

use crate::boot::AssetUrls;
use crate::error::CoreError;

/// HEAD `url`, failing on transport errors and on any status >= 400.
pub async fn head_status(http: &reqwest::Client, url: &str) -> Result<u16, CoreError> {
    info!("Validating URL: {url}");

    let resp = http
        .head(url)
        .send()
        .await
        .map_err(|e| CoreError::AssetUnreachable {
            url: url.to_owned(),
            reason: e.to_string(),
        })?;

    let status = resp.status().as_u16();
    if status >= 400 {
        return Err(CoreError::AssetStatus {
            url: url.to_owned(),
            status,
        });
    }

    info!("OK: {status} response code");
    Ok(status)
}

/// Check the kernel, then the initrd.
pub async fn validate(http: &reqwest::Client, urls: &AssetUrls) -> Result<(), CoreError> {
    for url in urls.iter() {
        head_status(http, url).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    #[tokio::test]
    async fn redirect_class_status_passes() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/x"))
            .respond_with(ResponseTemplate::new(304))
            .mount(&server)
            .await;

        let status = head_status(&reqwest::Client::new(), &format!("{}/x", server.uri()))
            .await
            .unwrap();
        assert_eq!(status, 304);
    }

    #[tokio::test]
    async fn missing_initrd_fails_with_status() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/demo-kernel"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("HEAD"))
            .and(path("/demo-initrd.img"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let urls = AssetUrls::new(&server.uri(), "demo");
        match validate(&reqwest::Client::new(), &urls).await {
            Err(CoreError::AssetStatus { url, status }) => {
                assert_eq!(status, 404);
                assert!(url.ends_with("/demo-initrd.img"));
            }
            other => panic!("expected AssetStatus, got: {other:?}"),
        }
    }

    #[tokio::test]
    async fn kernel_failure_skips_initrd_check() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/demo-kernel"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        Mock::given(method("HEAD"))
            .and(path("/demo-initrd.img"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let urls = AssetUrls::new(&server.uri(), "demo");
        assert!(validate(&reqwest::Client::new(), &urls).await.is_err());
    }

    #[tokio::test]
    async fn unreachable_host_is_transport_error() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let url = format!("http://127.0.0.1:{port}/demo-kernel");
        let result = head_status(&reqwest::Client::new(), &url).await;
        assert!(
            matches!(result, Err(CoreError::AssetUnreachable { .. })),
            "expected AssetUnreachable, got: {result:?}"
        );
    }
}
