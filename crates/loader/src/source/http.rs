//! # HTTP WASMソース
//!
//! 固定URLへのGETでWASMバイナリを取得する。
//! ステータスが2xx以外の場合はステータスコードと理由句を返す。

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use super::{ModuleBinary, ModuleSource};
use crate::error::{ConfigError, FetchError};

/// URL経由でWASMバイナリを取得するソース。
pub struct HttpSource {
    client: reqwest::Client,
    /// WASMバイナリのURL
    url: String,
}

impl HttpSource {
    /// 新しいHttpSourceを作成する。
    ///
    /// # 引数
    /// - `url`: WASMバイナリのURL（例: "https://example.com/main.wasm"）
    /// - `timeout`: リクエスト全体のタイムアウト
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, ConfigError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ConfigError::HttpClient(e.to_string()))?;
        Ok(Self::with_client(client, url))
    }

    /// 既存のHTTPクライアントを使うHttpSourceを作成する。
    pub fn with_client(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

impl ModuleSource for HttpSource {
    fn location(&self) -> String {
        self.url.clone()
    }

    fn fetch(&self) -> Pin<Box<dyn Future<Output = Result<ModuleBinary, FetchError>> + Send + '_>> {
        Box::pin(async move {
            let url = &self.url;
            tracing::debug!(%url, "WASMバイナリを取得中");
            let response = self
                .client
                .get(url)
                .send()
                .await
                .map_err(|e| FetchError::Transport(format!("{url}: {e}")))?;

            let status = response.status();
            tracing::debug!(status = status.as_u16(), %url, "レスポンスを受信しました");
            if !status.is_success() {
                return Err(FetchError::Status {
                    status: status.as_u16(),
                    reason: status.canonical_reason().unwrap_or_default().to_string(),
                    location: url.clone(),
                });
            }

            let bytes = response
                .bytes()
                .await
                .map_err(|e| FetchError::Body(format!("{url}: {e}")))?
                .to_vec();
            if bytes.is_empty() {
                return Err(FetchError::EmptyBody(url.clone()));
            }
            Ok(ModuleBinary {
                bytes,
                location: url.clone(),
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::start_mock_server;

    fn source(port: u16, path: &str) -> HttpSource {
        HttpSource::new(format!("http://127.0.0.1:{port}{path}"), Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_fetch_success() {
        let port = start_mock_server("/main.wasm", b"\0asm\x01\0\0\0".to_vec()).await;
        let binary = source(port, "/main.wasm").fetch().await.unwrap();
        assert_eq!(binary.bytes, b"\0asm\x01\0\0\0");
        assert_eq!(binary.location, format!("http://127.0.0.1:{port}/main.wasm"));
    }

    #[tokio::test]
    async fn test_fetch_not_found() {
        let port = start_mock_server("/main.wasm", b"\0asm\x01\0\0\0".to_vec()).await;
        let err = source(port, "/other.wasm").fetch().await.unwrap_err();
        match err {
            FetchError::Status { status, reason, .. } => {
                assert_eq!(status, 404);
                assert_eq!(reason, "Not Found");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_fetch_empty_body() {
        let port = start_mock_server("/main.wasm", Vec::new()).await;
        let err = source(port, "/main.wasm").fetch().await.unwrap_err();
        assert!(matches!(err, FetchError::EmptyBody(_)), "{err:?}");
    }

    #[tokio::test]
    async fn test_connection_refused() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = source(port, "/main.wasm").fetch().await.unwrap_err();
        assert!(matches!(err, FetchError::Transport(_)), "{err:?}");
    }
}
