//! # modbootゲストモジュール
//!
//! `_start` で `goTest` と `goAdd` をホストの名前空間に登録し、制御を返す。
//!
//! ## ターゲット
//! `wasm32-unknown-unknown`
//!
//! ## ビルド
//! ```text
//! cargo build --release --target wasm32-unknown-unknown
//! modboot --path target/wasm32-unknown-unknown/release/modboot_hello.wasm --call goAdd --arg 1 --arg 2
//! ```

#![no_std]

#[panic_handler]
fn panic(_info: &core::panic::PanicInfo) -> ! {
    core::arch::wasm32::unreachable()
}

// ---------------------------------------------------------------------------
// ホスト関数宣言（modbootホストが提供）
// ---------------------------------------------------------------------------

#[link(wasm_import_module = "env")]
extern "C" {
    /// エクスポート関数名をホストの名前空間へ登録する。
    fn register_export(name_ptr: *const u8, name_len: usize);

    /// 診断メッセージを出力する。
    fn debug_log(ptr: *const u8, len: usize);
}

fn register(name: &str) {
    unsafe { register_export(name.as_ptr(), name.len()) }
}

fn log(message: &str) {
    unsafe { debug_log(message.as_ptr(), message.len()) }
}

/// エントリポイント。エクスポートを登録して即座に戻る。
#[no_mangle]
pub extern "C" fn _start() {
    log("modboot-hello: starting");
    register("goTest");
    register("goAdd");
    log("modboot-hello: all functions registered");
}

#[no_mangle]
#[allow(non_snake_case)]
pub extern "C" fn goTest() -> i32 {
    42
}

#[no_mangle]
#[allow(non_snake_case)]
pub extern "C" fn goAdd(a: i32, b: i32) -> i32 {
    a.wrapping_add(b)
}

/// アンロード時にホストから呼ばれる。
#[no_mangle]
pub extern "C" fn shutdown() {
    log("modboot-hello: shutting down");
}
