//! # ローダー設定
//!
//! 環境変数からの設定読み込みと、ソース・ブリッジコンストラクタの構築。
//!
//! | 環境変数 | デフォルト |
//! |---|---|
//! | `MODULE_URL` | なし（指定時はHTTP取得） |
//! | `MODULE_PATH` | `main.wasm` |
//! | `WASM_ENTRY_POINT` | `_start` |
//! | `WASM_FUEL_LIMIT` | `100000000` |
//! | `WASM_MEMORY_LIMIT` | `67108864` |
//! | `FETCH_TIMEOUT_SECS` | `120` |

use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use modboot_wasm_host::{
    ExportRegistry, WasmtimeBridgeConstructor, DEFAULT_ENTRY_POINT, DEFAULT_FUEL_LIMIT,
    DEFAULT_MEMORY_LIMIT,
};

use crate::error::ConfigError;
use crate::source::{FileSource, HttpSource, ModuleSource};

/// ローカルファイルのデフォルトパス
pub const DEFAULT_MODULE_PATH: &str = "main.wasm";

/// HTTP取得のデフォルトタイムアウト（秒）
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 120;

/// ローダー設定。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoaderConfig {
    /// WASMバイナリのURL。指定時はファイルより優先する。
    pub module_url: Option<String>,
    /// WASMバイナリのローカルパス
    pub module_path: PathBuf,
    /// インスタンス化後に実行するエクスポート名
    pub entry_point: String,
    /// Fuel制限
    pub fuel_limit: u64,
    /// Memory制限（バイト）
    pub memory_limit: usize,
    /// HTTP取得のタイムアウト
    pub fetch_timeout: Duration,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            module_url: None,
            module_path: PathBuf::from(DEFAULT_MODULE_PATH),
            entry_point: DEFAULT_ENTRY_POINT.to_string(),
            fuel_limit: DEFAULT_FUEL_LIMIT,
            memory_limit: DEFAULT_MEMORY_LIMIT,
            fetch_timeout: Duration::from_secs(DEFAULT_FETCH_TIMEOUT_SECS),
        }
    }
}

impl LoaderConfig {
    /// プロセスの環境変数から設定を読み込む。
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// 任意のキー検索関数から設定を読み込む。空文字列は未設定として扱う。
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let defaults = Self::default();

        Ok(Self {
            module_url: get("MODULE_URL"),
            module_path: get("MODULE_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.module_path),
            entry_point: get("WASM_ENTRY_POINT").unwrap_or(defaults.entry_point),
            fuel_limit: parse_var(&get, "WASM_FUEL_LIMIT", defaults.fuel_limit)?,
            memory_limit: parse_var(&get, "WASM_MEMORY_LIMIT", defaults.memory_limit)?,
            fetch_timeout: Duration::from_secs(parse_var(
                &get,
                "FETCH_TIMEOUT_SECS",
                DEFAULT_FETCH_TIMEOUT_SECS,
            )?),
        })
    }

    /// 設定に応じたWASMソースを構築する。
    pub fn build_source(&self) -> Result<Arc<dyn ModuleSource>, ConfigError> {
        match &self.module_url {
            Some(url) => Ok(Arc::new(HttpSource::new(url.clone(), self.fetch_timeout)?)),
            None => Ok(Arc::new(FileSource::new(self.module_path.clone()))),
        }
    }

    /// 設定に応じたwasmtimeブリッジのコンストラクタを構築する。
    pub fn build_constructor(&self, registry: ExportRegistry) -> WasmtimeBridgeConstructor {
        WasmtimeBridgeConstructor::new(self.fuel_limit, self.memory_limit, registry)
            .with_entry_point(self.entry_point.clone())
    }
}

fn parse_var<T>(
    get: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    match get(key) {
        None => Ok(default),
        Some(value) => match value.trim().parse::<T>() {
            Ok(parsed) => Ok(parsed),
            Err(e) => Err(ConfigError::Invalid {
                key,
                reason: e.to_string(),
                value,
            }),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = LoaderConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, LoaderConfig::default());
        assert_eq!(config.module_path, PathBuf::from("main.wasm"));
        assert_eq!(config.entry_point, "_start");
    }

    #[test]
    fn test_overrides() {
        let config = LoaderConfig::from_lookup(lookup(&[
            ("MODULE_URL", "https://example.com/main.wasm"),
            ("WASM_ENTRY_POINT", "main"),
            ("WASM_FUEL_LIMIT", "5000"),
            ("WASM_MEMORY_LIMIT", "131072"),
            ("FETCH_TIMEOUT_SECS", " 3 "),
        ]))
        .unwrap();
        assert_eq!(config.module_url.as_deref(), Some("https://example.com/main.wasm"));
        assert_eq!(config.entry_point, "main");
        assert_eq!(config.fuel_limit, 5000);
        assert_eq!(config.memory_limit, 131072);
        assert_eq!(config.fetch_timeout, Duration::from_secs(3));
    }

    #[test]
    fn test_empty_value_is_unset() {
        let config = LoaderConfig::from_lookup(lookup(&[("MODULE_URL", "  ")])).unwrap();
        assert_eq!(config.module_url, None);
    }

    #[test]
    fn test_invalid_number() {
        let err = LoaderConfig::from_lookup(lookup(&[("WASM_FUEL_LIMIT", "lots")])).unwrap_err();
        match err {
            ConfigError::Invalid { key, value, .. } => {
                assert_eq!(key, "WASM_FUEL_LIMIT");
                assert_eq!(value, "lots");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_build_source_prefers_url() {
        let config = LoaderConfig {
            module_url: Some("http://127.0.0.1:1/main.wasm".to_string()),
            ..LoaderConfig::default()
        };
        assert_eq!(config.build_source().unwrap().location(), "http://127.0.0.1:1/main.wasm");

        let config = LoaderConfig::default();
        assert_eq!(config.build_source().unwrap().location(), "file://main.wasm");
    }
}
