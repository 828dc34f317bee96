//! # WASMバイナリソース
//!
//! モジュールバイナリの取得を抽象化する。
//!
//! ## ソース実装
//! - `FileSource`: ローカルファイルからWASMを読み込む（開発・テスト用）
//! - `HttpSource`: URL経由でWASMを取得する（本番用）

pub mod file;
pub mod http;

pub use file::FileSource;
pub use http::HttpSource;

use std::future::Future;
use std::pin::Pin;

use crate::error::FetchError;

/// WASMバイナリの取得結果。
#[derive(Debug, Clone)]
pub struct ModuleBinary {
    /// WASMバイナリデータ
    pub bytes: Vec<u8>,
    /// 取得元（URLまたは `file://` パス）
    pub location: String,
}

/// 固定の取得先からWASMバイナリを読み込むトレイト。
pub trait ModuleSource: Send + Sync {
    /// 取得先の表示名（ログ用）。
    fn location(&self) -> String;

    /// WASMバイナリ全体をメモリに読み込む。
    fn fetch(&self) -> Pin<Box<dyn Future<Output = Result<ModuleBinary, FetchError>> + Send + '_>>;
}
