//! # ランタイムブリッジ抽象化
//!
//! ローダーはこのトレイト越しにのみモジュールを扱う。
//! テストでは任意の実装に差し替えられる。

use crate::WasmError;

/// インスタンス化・実行・終了を提供するブリッジ。
///
/// 1つのブリッジは高々1つのモジュールインスタンスを保持する。
pub trait RuntimeBridge: Send {
    /// インスタンス化時に提供するインポートテーブルのキー（`module.name`形式）。
    fn import_names(&self) -> Vec<String>;

    /// WASMバイナリをコンパイルし、インポートテーブルに対してインスタンス化する。
    fn instantiate(&mut self, wasm_bytes: &[u8]) -> Result<(), WasmError>;

    /// インスタンス化済みモジュールのエントリポイントを実行する。
    ///
    /// エントリポイントはエクスポートを登録した後に制御を返すことが期待される。
    fn run(&mut self) -> Result<(), WasmError>;

    /// `run` 中に登録されたエクスポートを名前空間へ公開し、公開した関数名を返す。
    ///
    /// ローダーは自身のロードが有効であることを確認した後にのみ呼び出す。
    /// 公開するものを持たないブリッジは何もしない。
    fn publish(&mut self) -> Result<Vec<String>, WasmError> {
        Ok(Vec::new())
    }

    /// モジュールを終了する。
    ///
    /// 終了機能を持たないブリッジは `None` を返す。
    fn exit(&mut self) -> Option<Result<(), WasmError>>;
}

/// ブリッジのコンストラクタ。ローダーに注入される。
pub trait BridgeConstructor: Send + Sync {
    /// 新しいブリッジを生成する。
    fn construct(&self) -> Result<Box<dyn RuntimeBridge>, WasmError>;
}
