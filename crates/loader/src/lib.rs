//! # modboot モジュールローダー
//!
//! コンパイル済みWASMモジュールを取得し、ホストブリッジ上でインスタンス化・実行する。
//! ロード/アンロードのライフサイクルを [`ModuleLoader`] が管理する。
//!
//! ## ロードシーケンス
//! 1. 注入されたコンストラクタからブリッジを生成
//! 2. [`ModuleSource`] 経由でWASMバイナリを取得（HTTPまたはファイル）
//! 3. ブリッジのインポートテーブルに対してインスタンス化
//! 4. エントリポイントを実行（エクスポートを登録して制御を返す）
//! 5. Ready状態に遷移し、ブリッジを保持

pub mod config;
pub mod error;
pub mod loader;
pub mod source;

#[cfg(test)]
mod test_helpers;

pub use config::LoaderConfig;
pub use error::{ConfigError, FetchError, LoadError};
pub use loader::{LoaderStatus, ModuleLoader};
pub use source::{FileSource, HttpSource, ModuleBinary, ModuleSource};

pub use modboot_wasm_host::{
    BridgeConstructor, ExportRegistry, RuntimeBridge, WasmError, WasmtimeBridgeConstructor,
};
