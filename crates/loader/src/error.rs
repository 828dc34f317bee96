//! # ローダーエラー型

use modboot_wasm_host::WasmError;

/// WASMバイナリ取得のエラー型。
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    /// 成功以外のステータス
    #[error("WASM取得でHTTPエラー: ステータス {status} {reason} ({location})")]
    Status {
        /// HTTPステータスコード
        status: u16,
        /// ステータスの理由句
        reason: String,
        /// 取得先URL
        location: String,
    },
    /// 接続・読み込みの失敗
    #[error("WASM取得に失敗: {0}")]
    Transport(String),
    /// レスポンスボディの読み取り失敗
    #[error("WASMバイナリの読み取りに失敗: {0}")]
    Body(String),
    /// 空のレスポンス
    #[error("WASM取得: 空のレスポンス ({0})")]
    EmptyBody(String),
}

/// `ModuleLoader::load` のエラー型。
///
/// 同時に待機している全ての呼び出し元へ同じ結果を返すため `Clone` を実装する。
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LoadError {
    /// ブリッジコンストラクタが存在しない、または利用できない
    #[error("実行環境エラー: {0}")]
    Environment(String),
    /// WASMバイナリの取得失敗
    #[error(transparent)]
    Fetch(#[from] FetchError),
    /// 不正なバイナリ、またはインポート不足
    #[error("インスタンス化に失敗: {0}")]
    Instantiation(WasmError),
    /// エントリポイントの実行失敗
    #[error("モジュールの起動に失敗: {0}")]
    Execution(WasmError),
    /// ロード中に `unload` が呼ばれた
    #[error("ロードはアンロードにより中断されました")]
    Aborted,
}

/// 設定読み込みのエラー型。
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// 環境変数の値が不正
    #[error("環境変数 {key} の値が不正です ({value}): {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
    /// HTTPクライアントの構築失敗
    #[error("HTTPクライアントの構築に失敗: {0}")]
    HttpClient(String),
}
