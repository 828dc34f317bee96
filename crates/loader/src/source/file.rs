//! # ファイルシステム WASMソース
//!
//! ローカルファイルからWASMバイナリを読み込む。
//! 開発・テスト環境用。

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;

use super::{ModuleBinary, ModuleSource};
use crate::error::FetchError;

/// ローカルファイルからWASMバイナリを読み込むソース。
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    /// 新しいFileSourceを作成する。
    ///
    /// # 引数
    /// - `path`: WASMバイナリのパス
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ModuleSource for FileSource {
    fn location(&self) -> String {
        format!("file://{}", self.path.display())
    }

    fn fetch(&self) -> Pin<Box<dyn Future<Output = Result<ModuleBinary, FetchError>> + Send + '_>> {
        Box::pin(async move {
            let location = self.location();
            let bytes = tokio::fs::read(&self.path)
                .await
                .map_err(|e| FetchError::Transport(format!("{location}: {e}")))?;
            if bytes.is_empty() {
                return Err(FetchError::EmptyBody(location));
            }
            Ok(ModuleBinary { bytes, location })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_read_file() {
        let path = std::env::temp_dir().join(format!("modboot-file-{}.wasm", std::process::id()));
        std::fs::write(&path, b"\0asm\x01\0\0\0").unwrap();

        let binary = FileSource::new(&path).fetch().await.unwrap();
        assert_eq!(binary.bytes, b"\0asm\x01\0\0\0");
        assert!(binary.location.starts_with("file://"));

        std::fs::remove_file(&path).unwrap();
    }

    #[tokio::test]
    async fn test_missing_file() {
        let source = FileSource::new("/nonexistent/modboot/main.wasm");
        let err = source.fetch().await.unwrap_err();
        assert!(matches!(err, FetchError::Transport(_)), "{err:?}");
    }

    #[tokio::test]
    async fn test_empty_file() {
        let path = std::env::temp_dir().join(format!("modboot-empty-{}.wasm", std::process::id()));
        std::fs::write(&path, b"").unwrap();

        let err = FileSource::new(&path).fetch().await.unwrap_err();
        assert!(matches!(err, FetchError::EmptyBody(_)), "{err:?}");

        std::fs::remove_file(&path).unwrap();
    }
}
