//! # modboot WASM実行環境
//!
//! WASMモジュールをインスタンス化・実行するホストブリッジをwasmtimeで実装する。
//!
//! ## 構成
//! - [`RuntimeBridge`] / [`BridgeConstructor`]: ローダーから見たブリッジの抽象
//! - [`WasmtimeBridge`]: wasmtimeによる実装（インポートテーブル、実行、終了）
//! - [`ExportRegistry`]: モジュールが関数を公開する共有名前空間
//!
//! ## 安全性確保
//! - Fuel制限: 命令実行数の上限（エントリポイントが戻らない場合の防止）
//! - Memory制限: 線形メモリの上限（OOM防止）
//! - catch_unwind: パニックをキャッチし、ホスト側への影響を遮断
//!
//! ## ホスト関数 (モジュール `env`)
//! - `register_export`: 関数名をエクスポートレジストリへ登録する
//! - `debug_log`: モジュールからの診断メッセージを出力する

pub mod bridge;
pub mod registry;
pub mod wasmtime_bridge;

pub use bridge::{BridgeConstructor, RuntimeBridge};
pub use registry::{ExportRegistry, ExportedFunction};
pub use wasmtime_bridge::{WasmtimeBridge, WasmtimeBridgeConstructor};

/// WASM実行環境のエラー型
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WasmError {
    /// ブリッジを生成できない（エンジン初期化失敗等）
    #[error("ブリッジが利用できません: {0}")]
    Unavailable(String),
    /// WASMモジュールのコンパイルエラー（不正なバイナリ）
    #[error("WASMコンパイルエラー: {0}")]
    CompileError(String),
    /// インスタンス化エラー（インポート不足、Memory制限超過）
    #[error("WASMインスタンス化エラー: {0}")]
    InstantiationError(String),
    /// WASMモジュールの実行エラー
    #[error("WASM実行エラー: {0}")]
    ExecutionError(String),
    /// Fuel制限超過
    #[error("Fuel制限を超過しました")]
    FuelExhausted,
    /// WASMパニック
    #[error("WASMモジュールがパニックしました: {0}")]
    Panic(String),
    /// ホスト関数エラー
    #[error("ホスト関数エラー: {0}")]
    HostFunctionError(String),
    /// インスタンスが存在しない（未インスタンス化、または終了済み）
    #[error("モジュールがインスタンス化されていません")]
    NotInstantiated,
    /// 登録されていないエクスポート
    #[error("エクスポートが見つかりません: {0}")]
    ExportNotFound(String),
    /// 引数の数・型が関数シグネチャと一致しない
    #[error("不正な引数: {0}")]
    InvalidArgument(String),
}

/// Fuel制限のデフォルト値: 1億命令
pub const DEFAULT_FUEL_LIMIT: u64 = 100_000_000;

/// Memory制限のデフォルト値: 64MB
pub const DEFAULT_MEMORY_LIMIT: usize = 64 * 1024 * 1024;

/// エントリポイントのデフォルト名。
pub const DEFAULT_ENTRY_POINT: &str = "_start";
