//! # wasmtimeブリッジ
//!
//! wasmtimeでモジュールをインスタンス化・実行し、登録されたエクスポートを
//! [`ExportRegistry`] に公開する。
//!
//! `run` は登録された名前を保持するだけで、名前空間への反映は `publish` で行う。

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::Value;
use wasmtime::{
    Caller, Config, Engine, Func, Instance, Linker, Module, Store, StoreLimits,
    StoreLimitsBuilder, Trap, Val, ValType,
};

use crate::bridge::{BridgeConstructor, RuntimeBridge};
use crate::registry::ExportRegistry;
use crate::{WasmError, DEFAULT_ENTRY_POINT, DEFAULT_FUEL_LIMIT, DEFAULT_MEMORY_LIMIT};

/// ホスト関数を提供するインポートモジュール名
const IMPORT_MODULE: &str = "env";

/// インポートテーブルに含まれる関数名
const IMPORT_FUNCTIONS: [&str; 2] = ["register_export", "debug_log"];

/// 終了時に呼び出すゲスト関数名（任意）
pub const SHUTDOWN_EXPORT: &str = "shutdown";

/// `shutdown` 呼び出しのFuel上限。`unload` は呼び出し元スレッドで同期的に終了を待つ。
pub const SHUTDOWN_FUEL_LIMIT: u64 = 1_000_000;

/// ホスト関数がアクセスするWASM実行時の状態。
struct HostState {
    /// Memory制限
    limits: StoreLimits,
    /// `register_export` で登録され、まだ公開されていない関数名
    registered: Vec<String>,
}

impl HostState {
    fn new(memory_limit: usize) -> Self {
        Self {
            limits: StoreLimitsBuilder::new().memory_size(memory_limit).build(),
            registered: Vec::new(),
        }
    }
}

/// 実行中のインスタンス。公開関数とブリッジで共有する。
struct LiveInstance {
    store: Store<HostState>,
    instance: Instance,
}

type LiveSlot = Arc<Mutex<Option<LiveInstance>>>;

/// wasmtimeによる [`RuntimeBridge`] 実装。
pub struct WasmtimeBridge {
    engine: Engine,
    linker: Linker<HostState>,
    /// Fuel制限（エントリポイント・各関数呼び出しごと）
    fuel_limit: u64,
    /// Memory制限（バイト）
    memory_limit: usize,
    entry_point: String,
    registry: ExportRegistry,
    /// レジストリ上の登録元ID
    owner: u64,
    live: LiveSlot,
}

impl WasmtimeBridge {
    /// 新しいWasmtimeBridgeを作成する。
    ///
    /// # 引数
    /// - `fuel_limit`: 命令実行数の上限
    /// - `memory_limit`: 線形メモリの上限（バイト）
    /// - `entry_point`: `run` で呼び出すエクスポート名
    /// - `registry`: エクスポートの公開先
    pub fn new(
        fuel_limit: u64,
        memory_limit: usize,
        entry_point: impl Into<String>,
        registry: ExportRegistry,
    ) -> Result<Self, WasmError> {
        let mut config = Config::new();
        config.consume_fuel(true);
        let engine = Engine::new(&config)
            .map_err(|e| WasmError::Unavailable(format!("wasmtimeエンジンの初期化に失敗: {e:#}")))?;
        let linker = build_linker(&engine)?;
        Ok(Self {
            engine,
            linker,
            fuel_limit,
            memory_limit,
            entry_point: entry_point.into(),
            registry,
            owner: ExportRegistry::allocate_owner(),
            live: Arc::new(Mutex::new(None)),
        })
    }

    /// このブリッジが公開し、現在有効な関数名。
    pub fn published_exports(&self) -> Vec<String> {
        self.registry.names_owned_by(self.owner)
    }
}

impl RuntimeBridge for WasmtimeBridge {
    fn import_names(&self) -> Vec<String> {
        IMPORT_FUNCTIONS
            .iter()
            .map(|name| format!("{IMPORT_MODULE}.{name}"))
            .collect()
    }

    fn instantiate(&mut self, wasm_bytes: &[u8]) -> Result<(), WasmError> {
        let mut guard = self.live.lock().unwrap_or_else(PoisonError::into_inner);
        if guard.is_some() {
            return Err(WasmError::InstantiationError(
                "このブリッジは既にモジュールをインスタンス化しています".to_string(),
            ));
        }

        let module = Module::new(&self.engine, wasm_bytes)
            .map_err(|e| WasmError::CompileError(format!("{e:#}")))?;

        let mut store = Store::new(&self.engine, HostState::new(self.memory_limit));
        store.limiter(|state| &mut state.limits);
        // start関数もFuelを消費する
        store
            .set_fuel(self.fuel_limit)
            .map_err(|e| WasmError::InstantiationError(format!("Fuelの設定に失敗: {e:#}")))?;

        let instance = self
            .linker
            .instantiate(&mut store, &module)
            .map_err(|e| match classify_trap(&e) {
                Some(err) => err,
                None => WasmError::InstantiationError(format!("{e:#}")),
            })?;

        *guard = Some(LiveInstance { store, instance });
        Ok(())
    }

    fn run(&mut self) -> Result<(), WasmError> {
        let mut guard = self.live.lock().unwrap_or_else(PoisonError::into_inner);
        let live = guard.as_mut().ok_or(WasmError::NotInstantiated)?;

        let entry = live
            .instance
            .get_typed_func::<(), ()>(&mut live.store, &self.entry_point)
            .map_err(|e| {
                WasmError::ExecutionError(format!(
                    "エントリポイント {} を取得できません: {e:#}",
                    self.entry_point
                ))
            })?;

        live.store
            .set_fuel(self.fuel_limit)
            .map_err(|e| WasmError::ExecutionError(format!("Fuelの設定に失敗: {e:#}")))?;

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| entry.call(&mut live.store, ())));
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(execution_error(e)),
            Err(_) => {
                return Err(WasmError::Panic(
                    "エントリポイントの実行中にパニックが発生しました".to_string(),
                ))
            }
        }

        tracing::debug!(
            exports = ?live.store.data().registered,
            "エントリポイントが制御を返しました"
        );
        Ok(())
    }

    fn publish(&mut self) -> Result<Vec<String>, WasmError> {
        let mut guard = self.live.lock().unwrap_or_else(PoisonError::into_inner);
        let live = guard.as_mut().ok_or(WasmError::NotInstantiated)?;
        let names = std::mem::take(&mut live.store.data_mut().registered);

        let mut published = Vec::with_capacity(names.len());
        for name in names {
            if live.instance.get_func(&mut live.store, &name).is_none() {
                tracing::warn!(export = %name, "登録された名前の関数がエクスポートされていません");
                continue;
            }
            published.push(name);
        }
        drop(guard);

        for name in &published {
            let live = Arc::clone(&self.live);
            let fuel_limit = self.fuel_limit;
            let export_name = name.clone();
            self.registry.register(
                name.clone(),
                self.owner,
                Arc::new(move |args: &[Value]| call_export(&live, &export_name, fuel_limit, args)),
            );
        }
        Ok(published)
    }

    fn exit(&mut self) -> Option<Result<(), WasmError>> {
        let taken = self.live.lock().unwrap_or_else(PoisonError::into_inner).take();
        let result = match taken {
            None => Ok(()),
            Some(mut live) => shutdown(&mut live, self.fuel_limit),
        };
        let removed = self.registry.remove_owner(self.owner);
        tracing::debug!(removed, "エクスポートを名前空間から削除しました");
        Some(result)
    }
}

impl Drop for WasmtimeBridge {
    fn drop(&mut self) {
        self.live.lock().unwrap_or_else(PoisonError::into_inner).take();
        self.registry.remove_owner(self.owner);
    }
}

/// [`WasmtimeBridge`] のコンストラクタ。
#[derive(Debug, Clone)]
pub struct WasmtimeBridgeConstructor {
    fuel_limit: u64,
    memory_limit: usize,
    entry_point: String,
    registry: ExportRegistry,
}

impl WasmtimeBridgeConstructor {
    /// 新しいコンストラクタを作成する。エントリポイントは `_start`。
    pub fn new(fuel_limit: u64, memory_limit: usize, registry: ExportRegistry) -> Self {
        Self {
            fuel_limit,
            memory_limit,
            entry_point: DEFAULT_ENTRY_POINT.to_string(),
            registry,
        }
    }

    /// エントリポイント名を変更する。
    pub fn with_entry_point(mut self, entry_point: impl Into<String>) -> Self {
        self.entry_point = entry_point.into();
        self
    }

    pub fn registry(&self) -> &ExportRegistry {
        &self.registry
    }
}

impl Default for WasmtimeBridgeConstructor {
    fn default() -> Self {
        Self::new(DEFAULT_FUEL_LIMIT, DEFAULT_MEMORY_LIMIT, ExportRegistry::new())
    }
}

impl BridgeConstructor for WasmtimeBridgeConstructor {
    fn construct(&self) -> Result<Box<dyn RuntimeBridge>, WasmError> {
        let bridge = WasmtimeBridge::new(
            self.fuel_limit,
            self.memory_limit,
            self.entry_point.clone(),
            self.registry.clone(),
        )?;
        Ok(Box::new(bridge))
    }
}

// ---------------------------------------------------------------------------
// ホスト関数
// ---------------------------------------------------------------------------

fn build_linker(engine: &Engine) -> Result<Linker<HostState>, WasmError> {
    let mut linker = Linker::new(engine);
    linker
        .func_wrap(
            IMPORT_MODULE,
            "register_export",
            |mut caller: Caller<'_, HostState>, ptr: i32, len: i32| -> wasmtime::Result<()> {
                let name = read_guest_str(&mut caller, ptr, len)?;
                tracing::debug!(export = %name, "モジュールがエクスポートを登録しました");
                caller.data_mut().registered.push(name);
                Ok(())
            },
        )
        .map_err(|e| WasmError::HostFunctionError(format!("register_export: {e:#}")))?;
    linker
        .func_wrap(
            IMPORT_MODULE,
            "debug_log",
            |mut caller: Caller<'_, HostState>, ptr: i32, len: i32| -> wasmtime::Result<()> {
                let message = read_guest_str(&mut caller, ptr, len)?;
                tracing::info!(target: "modboot::guest", "{message}");
                Ok(())
            },
        )
        .map_err(|e| WasmError::HostFunctionError(format!("debug_log: {e:#}")))?;
    Ok(linker)
}

/// ゲストの線形メモリからUTF-8文字列を読み取る。
fn read_guest_str(
    caller: &mut Caller<'_, HostState>,
    ptr: i32,
    len: i32,
) -> wasmtime::Result<String> {
    let memory = caller
        .get_export("memory")
        .and_then(|export| export.into_memory())
        .ok_or_else(|| wasmtime::Error::msg("memoryがエクスポートされていません"))?;
    let start = ptr as u32 as usize;
    let end = start
        .checked_add(len as u32 as usize)
        .ok_or_else(|| wasmtime::Error::msg("文字列の範囲が不正です"))?;
    let bytes = memory
        .data(&*caller)
        .get(start..end)
        .ok_or_else(|| wasmtime::Error::msg("文字列がゲストメモリの範囲外です"))?;
    Ok(std::str::from_utf8(bytes)?.to_string())
}

// ---------------------------------------------------------------------------
// 関数呼び出し
// ---------------------------------------------------------------------------

fn call_export(
    live: &LiveSlot,
    name: &str,
    fuel_limit: u64,
    args: &[Value],
) -> Result<Vec<Value>, WasmError> {
    let mut guard = live.lock().unwrap_or_else(PoisonError::into_inner);
    let live = guard.as_mut().ok_or(WasmError::NotInstantiated)?;
    let func = live
        .instance
        .get_func(&mut live.store, name)
        .ok_or_else(|| WasmError::ExportNotFound(name.to_string()))?;

    let ty = func.ty(&live.store);
    if ty.params().len() != args.len() {
        return Err(WasmError::InvalidArgument(format!(
            "{name} は{}個の引数を取りますが、{}個渡されました",
            ty.params().len(),
            args.len()
        )));
    }
    let params = ty
        .params()
        .zip(args)
        .map(|(ty, value)| json_to_val(&ty, value))
        .collect::<Result<Vec<_>, _>>()?;
    let mut results = vec![Val::I32(0); ty.results().len()];

    live.store
        .set_fuel(fuel_limit)
        .map_err(|e| WasmError::ExecutionError(format!("Fuelの設定に失敗: {e:#}")))?;
    invoke(func, &mut live.store, &params, &mut results)?;

    results.iter().map(val_to_json).collect()
}

fn invoke(
    func: Func,
    store: &mut Store<HostState>,
    params: &[Val],
    results: &mut [Val],
) -> Result<(), WasmError> {
    match panic::catch_unwind(AssertUnwindSafe(|| func.call(&mut *store, params, results))) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(execution_error(e)),
        Err(_) => Err(WasmError::Panic(
            "関数の実行中にパニックが発生しました".to_string(),
        )),
    }
}

/// ゲストの `shutdown` を呼び出す。エクスポートがなければ何もしない。
fn shutdown(live: &mut LiveInstance, fuel_limit: u64) -> Result<(), WasmError> {
    let Some(func) = live.instance.get_func(&mut live.store, SHUTDOWN_EXPORT) else {
        return Ok(());
    };
    if func.ty(&live.store).params().len() != 0 {
        return Err(WasmError::ExecutionError(format!(
            "{SHUTDOWN_EXPORT} は引数を取れません"
        )));
    }
    let mut results = vec![Val::I32(0); func.ty(&live.store).results().len()];
    live.store
        .set_fuel(fuel_limit.min(SHUTDOWN_FUEL_LIMIT))
        .map_err(|e| WasmError::ExecutionError(format!("Fuelの設定に失敗: {e:#}")))?;
    invoke(func, &mut live.store, &[], &mut results)
}

fn json_to_val(ty: &ValType, value: &Value) -> Result<Val, WasmError> {
    let converted = match ty {
        ValType::I32 => value
            .as_i64()
            .and_then(|n| i32::try_from(n).ok())
            .map(Val::I32),
        ValType::I64 => value.as_i64().map(Val::I64),
        ValType::F32 => value.as_f64().map(|n| Val::F32((n as f32).to_bits())),
        ValType::F64 => value.as_f64().map(|n| Val::F64(n.to_bits())),
        other => {
            return Err(WasmError::InvalidArgument(format!(
                "未対応の引数型です: {other:?}"
            )))
        }
    };
    converted.ok_or_else(|| WasmError::InvalidArgument(format!("{value} を {ty:?} に変換できません")))
}

fn val_to_json(val: &Val) -> Result<Value, WasmError> {
    match val {
        Val::I32(n) => Ok(Value::from(*n)),
        Val::I64(n) => Ok(Value::from(*n)),
        Val::F32(bits) => Ok(Value::from(f64::from(f32::from_bits(*bits)))),
        Val::F64(bits) => Ok(Value::from(f64::from_bits(*bits))),
        other => Err(WasmError::ExecutionError(format!(
            "未対応の戻り値型です: {other:?}"
        ))),
    }
}

fn classify_trap(err: &wasmtime::Error) -> Option<WasmError> {
    match err.downcast_ref::<Trap>() {
        Some(Trap::OutOfFuel) => Some(WasmError::FuelExhausted),
        _ => None,
    }
}

fn execution_error(err: wasmtime::Error) -> WasmError {
    classify_trap(&err).unwrap_or_else(|| WasmError::ExecutionError(format!("{err:#}")))
}
