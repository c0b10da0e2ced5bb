use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;

use crate::error::{ClientError, ClientResult};
use crate::tls::CertConfig;

/// Byte stream fed into the asset service; produced by the framework's
/// log pipe.
pub type LogStream = BoxStream<'static, std::io::Result<Bytes>>;

/// Client to the asset service, which archives build logs keyed by run
/// id.
#[async_trait]
pub trait AssetClient: Send + Sync + 'static {
    /// Stream the run's console output to the archive until EOF.
    async fn write_log(&self, run_id: i64, stream: LogStream) -> ClientResult<()>;
}

/// HTTP implementation of [`AssetClient`]; the body is streamed
/// chunked, so the archive receives output while the run is still
/// going.
pub struct HttpAssetClient {
    base: String,
    http: reqwest::Client,
}

impl HttpAssetClient {
    pub fn new(addr: &str, tls: &CertConfig) -> ClientResult<Self> {
        Ok(Self {
            base: tls.base_url(addr),
            http: tls.client()?,
        })
    }
}

#[async_trait]
impl AssetClient for HttpAssetClient {
    async fn write_log(&self, run_id: i64, stream: LogStream) -> ClientResult<()> {
        self.http
            .put(format!("{}/logs/{run_id}", self.base))
            .body(reqwest::Body::wrap_stream(stream))
            .send()
            .await?
            .error_for_status()?;

        Ok(())
    }
}
