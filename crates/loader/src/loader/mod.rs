//! # モジュールローダー
//!
//! WASMモジュールのロード/アンロードのライフサイクルを管理する。
//!
//! ## 状態遷移
//! ```text
//! Unloaded --load()--> Loading --成功--> Ready
//!                         |                |
//!                    失敗/unload()      unload()
//!                         v                v
//!                      Unloaded         Unloaded
//! ```
//!
//! Loading中の `load()` は新たにシーケンスを開始せず、進行中のロード結果を共有して待機する。
//!
//! エクスポートの公開は状態ロックの下で世代番号を確認してから行う。
//! `unload()` に追い越されたロードは名前空間に触れない。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::{BoxFuture, FutureExt, Shared};

use modboot_wasm_host::{BridgeConstructor, ExportRegistry, RuntimeBridge, WasmError};

use crate::config::LoaderConfig;
use crate::error::{ConfigError, LoadError};
use crate::source::ModuleSource;


/// 進行中のロード。全ての待機者が同じ結果を受け取る。
type PendingLoad = Shared<BoxFuture<'static, Result<(), LoadError>>>;

/// ローダーの外部から観測できる状態。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoaderStatus {
    /// 未ロード（初期状態、失敗後、アンロード後）
    Unloaded,
    /// ロードシーケンス実行中
    Loading,
    /// インスタンス化と起動が完了
    Ready,
}

enum LoaderState {
    Unloaded,
    Loading {
        pending: PendingLoad,
        /// このロードの世代番号
        epoch: u64,
    },
    Ready {
        /// 実行中のブリッジ（終了要求に使う）
        bridge: Box<dyn RuntimeBridge>,
    },
}

impl LoaderState {
    fn status(&self) -> LoaderStatus {
        match self {
            LoaderState::Unloaded => LoaderStatus::Unloaded,
            LoaderState::Loading { .. } => LoaderStatus::Loading,
            LoaderState::Ready { .. } => LoaderStatus::Ready,
        }
    }

    fn is_loading(&self, epoch: u64) -> bool {
        matches!(self, LoaderState::Loading { epoch: current, .. } if *current == epoch)
    }
}

struct Inner {
    source: Arc<dyn ModuleSource>,
    /// `None` はブリッジコンストラクタが実行環境に存在しないことを表す
    constructor: Option<Arc<dyn BridgeConstructor>>,
    registry: ExportRegistry,
    state: Mutex<LoaderState>,
    next_epoch: AtomicU64,
}

/// WASMモジュールのローダー。
///
/// クローンは同じ状態を共有する。
#[derive(Clone)]
pub struct ModuleLoader {
    inner: Arc<Inner>,
}

impl ModuleLoader {
    /// 新しいModuleLoaderを作成する。
    ///
    /// # 引数
    /// - `source`: WASMバイナリの取得先
    /// - `constructor`: ブリッジコンストラクタ（`None` の場合 `load` は実行環境エラーになる）
    /// - `registry`: モジュールがエクスポートを公開する名前空間
    pub fn new(
        source: Arc<dyn ModuleSource>,
        constructor: Option<Arc<dyn BridgeConstructor>>,
        registry: ExportRegistry,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                source,
                constructor,
                registry,
                state: Mutex::new(LoaderState::Unloaded),
                next_epoch: AtomicU64::new(1),
            }),
        }
    }

    /// 設定からwasmtimeブリッジを使うローダーを作成する。
    pub fn from_config(config: &LoaderConfig) -> Result<Self, ConfigError> {
        let registry = ExportRegistry::new();
        let source = config.build_source()?;
        let constructor: Arc<dyn BridgeConstructor> =
            Arc::new(config.build_constructor(registry.clone()));
        Ok(Self::new(source, Some(constructor), registry))
    }

    /// モジュールを取得・インスタンス化・実行する。
    ///
    /// 既にReadyの場合は何もしない。Loading中の場合は進行中のロード結果を待つ。
    /// 失敗した場合は状態をUnloadedに戻し、ブリッジを保持しない。
    pub async fn load(&self) -> Result<(), LoadError> {
        let pending = {
            let mut state = self.inner.lock_state();
            match &*state {
                LoaderState::Ready { .. } => {
                    tracing::debug!("モジュールは既にロード済みです");
                    return Ok(());
                }
                LoaderState::Loading { pending, epoch } => {
                    tracing::debug!(epoch, "進行中のロードを待機します");
                    pending.clone()
                }
                LoaderState::Unloaded => {
                    let epoch = self.inner.next_epoch.fetch_add(1, Ordering::Relaxed);
                    let pending = Inner::load_sequence(Arc::clone(&self.inner), epoch)
                        .boxed()
                        .shared();
                    *state = LoaderState::Loading {
                        pending: pending.clone(),
                        epoch,
                    };
                    pending
                }
            }
        };
        pending.await
    }

    /// モジュールを終了し、状態を破棄する。
    ///
    /// ブリッジに終了機能があれば呼び出す。終了の失敗はログに記録するのみで、
    /// 状態は常にUnloadedになる。何もロードされていない場合は何もしない。
    ///
    /// 終了処理（wasmtimeブリッジではゲストの `shutdown`）は呼び出し元のスレッドで
    /// 同期的に実行される。wasmtimeブリッジは `shutdown` のFuelを
    /// [`SHUTDOWN_FUEL_LIMIT`](modboot_wasm_host::wasmtime_bridge::SHUTDOWN_FUEL_LIMIT)
    /// に制限する。
    pub fn unload(&self) {
        let previous = std::mem::replace(&mut *self.inner.lock_state(), LoaderState::Unloaded);
        match previous {
            LoaderState::Ready { mut bridge } => match bridge.exit() {
                Some(Ok(())) => tracing::info!("モジュールを終了しました"),
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "モジュールの終了に失敗しました。状態は破棄します")
                }
                None => tracing::debug!("ブリッジに終了機能がないため、状態のみ破棄します"),
            },
            LoaderState::Loading { epoch, .. } => {
                tracing::info!(epoch, "進行中のロードを中断しました");
            }
            LoaderState::Unloaded => tracing::debug!("ロード済みのモジュールはありません"),
        }
    }

    /// インスタンス化と起動が完了しているか。
    pub fn is_ready(&self) -> bool {
        self.status() == LoaderStatus::Ready
    }

    pub fn status(&self) -> LoaderStatus {
        self.inner.lock_state().status()
    }

    /// 実行中のブリッジを保持しているか。Readyの場合に限り `true`。
    pub fn has_instance(&self) -> bool {
        matches!(&*self.inner.lock_state(), LoaderState::Ready { .. })
    }

    /// モジュールがエクスポートを公開する名前空間。
    pub fn exports(&self) -> &ExportRegistry {
        &self.inner.registry
    }
}

impl Inner {
    fn lock_state(&self) -> MutexGuard<'_, LoaderState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_current(&self, epoch: u64) -> bool {
        self.lock_state().is_loading(epoch)
    }

    async fn load_sequence(inner: Arc<Inner>, epoch: u64) -> Result<(), LoadError> {
        tracing::info!(epoch, source = %inner.source.location(), "モジュールのロードを開始します");
        let result = inner.start(epoch).await;

        let mut state = inner.lock_state();
        let current = state.is_loading(epoch);
        match result {
            Ok(mut bridge) if current => match bridge.publish() {
                Ok(exports) => {
                    *state = LoaderState::Ready { bridge };
                    drop(state);
                    tracing::info!(epoch, ?exports, "モジュールのロードが完了し、実行中です");
                    Ok(())
                }
                Err(e) => {
                    *state = LoaderState::Unloaded;
                    drop(state);
                    tracing::error!(epoch, error = %e, "エクスポートの公開に失敗しました");
                    if let Some(Err(exit_err)) = bridge.exit() {
                        tracing::warn!(error = %exit_err, "モジュールの終了に失敗しました");
                    }
                    Err(LoadError::Execution(e))
                }
            },
            Ok(mut bridge) => {
                drop(state);
                tracing::warn!(epoch, "ロード中にアンロードされたため、起動したモジュールを終了します");
                if let Some(Err(e)) = bridge.exit() {
                    tracing::warn!(error = %e, "モジュールの終了に失敗しました");
                }
                Err(LoadError::Aborted)
            }
            Err(e) => {
                if current {
                    *state = LoaderState::Unloaded;
                }
                drop(state);
                tracing::error!(epoch, error = %e, "モジュールのロードに失敗しました");
                Err(e)
            }
        }
    }

    /// ブリッジ生成から起動までを実行し、起動済みのブリッジを返す。
    async fn start(&self, epoch: u64) -> Result<Box<dyn RuntimeBridge>, LoadError> {
        // Step 1: ブリッジ生成（取得より前に実行環境を確認する）
        let constructor = self.constructor.as_ref().ok_or_else(|| {
            LoadError::Environment("ブリッジコンストラクタが見つかりません".to_string())
        })?;
        let mut bridge = constructor
            .construct()
            .map_err(|e| LoadError::Environment(e.to_string()))?;
        tracing::debug!(imports = ?bridge.import_names(), "ブリッジを生成しました");

        // Step 2-3: 取得とボディ読み込み
        let binary = self.source.fetch().await?;
        tracing::info!(
            location = %binary.location,
            size = binary.bytes.len(),
            "WASMバイナリを取得しました"
        );

        if !self.is_current(epoch) {
            return Err(LoadError::Aborted);
        }

        // Step 4-5: インスタンス化と起動（同期処理のためブロッキングスレッドで実行）
        tokio::task::spawn_blocking(move || -> Result<Box<dyn RuntimeBridge>, LoadError> {
            bridge
                .instantiate(&binary.bytes)
                .map_err(LoadError::Instantiation)?;
            tracing::debug!("モジュールをインスタンス化しました");
            bridge.run().map_err(LoadError::Execution)?;
            Ok(bridge)
        })
        .await
        .map_err(|e| LoadError::Execution(WasmError::Panic(e.to_string())))?
    }
}
