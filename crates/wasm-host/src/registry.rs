//! # エクスポートレジストリ
//!
//! 実行中のモジュールが呼び出し可能な関数を公開する共有名前空間。
//! 複数のローダー・ブリッジで同じレジストリを共有できる。
//!
//! 同名の関数を別の登録元が登録すると、以前の関数は隠されるだけで保持される。
//! 後から登録した側が削除されると、隠されていた関数が再び有効になる。

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use serde_json::Value;

use crate::WasmError;

/// レジストリに公開される関数。引数・戻り値はJSON数値で受け渡す。
pub type ExportedFunction = Arc<dyn Fn(&[Value]) -> Result<Vec<Value>, WasmError> + Send + Sync>;

static NEXT_OWNER_ID: AtomicU64 = AtomicU64::new(1);

struct Entry {
    /// 登録元ブリッジのID
    owner: u64,
    function: ExportedFunction,
}

/// 関数名から公開関数への共有マップ。
///
/// 各名前のエントリは登録順に並び、末尾が有効な関数。
#[derive(Clone, Default)]
pub struct ExportRegistry {
    entries: Arc<RwLock<HashMap<String, Vec<Entry>>>>,
}

impl ExportRegistry {
    /// 空のレジストリを作成する。
    pub fn new() -> Self {
        Self::default()
    }

    /// 登録元を識別するIDを払い出す。
    pub fn allocate_owner() -> u64 {
        NEXT_OWNER_ID.fetch_add(1, Ordering::Relaxed)
    }

    /// 関数を登録する。
    ///
    /// 同じ登録元の同名関数は置き換え、別の登録元の関数は削除されるまで隠す。
    pub fn register(&self, name: impl Into<String>, owner: u64, function: ExportedFunction) {
        let name = name.into();
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let stack = entries.entry(name.clone()).or_default();
        stack.retain(|entry| entry.owner != owner);
        if !stack.is_empty() {
            tracing::warn!(export = %name, "既存のエクスポートを別のモジュールが隠しました");
        }
        stack.push(Entry { owner, function });
    }

    /// 指定した登録元の関数を全て削除し、削除件数を返す。
    ///
    /// 削除した関数に隠されていた関数は再び有効になる。
    pub fn remove_owner(&self, owner: u64) -> usize {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let mut removed = 0;
        entries.retain(|_, stack| {
            let before = stack.len();
            stack.retain(|entry| entry.owner != owner);
            removed += before - stack.len();
            !stack.is_empty()
        });
        removed
    }

    /// 登録済みの関数名（昇順）。
    pub fn names(&self) -> Vec<String> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = entries.keys().cloned().collect();
        names.sort();
        names
    }

    /// 指定した登録元の関数が有効になっている名前（昇順）。
    pub fn names_owned_by(&self, owner: u64) -> Vec<String> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = entries
            .iter()
            .filter(|(_, stack)| stack.last().is_some_and(|entry| entry.owner == owner))
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    pub fn contains(&self, name: &str) -> bool {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 関数を取得する。
    pub fn get(&self, name: &str) -> Option<ExportedFunction> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries
            .get(name)
            .and_then(|stack| stack.last())
            .map(|entry| Arc::clone(&entry.function))
    }

    /// 関数を呼び出す。呼び出し中はレジストリのロックを保持しない。
    pub fn call(&self, name: &str, args: &[Value]) -> Result<Vec<Value>, WasmError> {
        let function = self
            .get(name)
            .ok_or_else(|| WasmError::ExportNotFound(name.to_string()))?;
        function(args)
    }
}

impl fmt::Debug for ExportRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExportRegistry")
            .field("names", &self.names())
            .finish()
    }
}
