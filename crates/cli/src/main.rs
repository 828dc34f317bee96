//! # modboot CLI
//!
//! WASMモジュールをロードし、公開されたエクスポートを確認・呼び出す。
//!
//! ## 実行例
//! ```text
//! modboot --path main.wasm
//! modboot --url https://example.com/main.wasm --call goAdd --arg 1 --arg 2
//! modboot --path main.wasm --wait
//! ```
//!
//! 未指定のオプションは環境変数（`MODULE_URL`, `MODULE_PATH` 等）から読み込む。

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use modboot_loader::{LoaderConfig, ModuleLoader};

#[derive(Parser, Debug)]
#[command(name = "modboot", version, about = "WASMモジュールのブートストラップローダー")]
struct Cli {
    /// WASMバイナリのURL（指定時はHTTPで取得）
    #[arg(long)]
    url: Option<String>,

    /// WASMバイナリのローカルパス
    #[arg(long)]
    path: Option<PathBuf>,

    /// インスタンス化後に実行するエクスポート名
    #[arg(long)]
    entry_point: Option<String>,

    /// Fuel制限
    #[arg(long)]
    fuel_limit: Option<u64>,

    /// Memory制限（バイト）
    #[arg(long)]
    memory_limit: Option<usize>,

    /// ロード後に呼び出すエクスポート名
    #[arg(long)]
    call: Option<String>,

    /// `--call` に渡す引数（JSON数値、複数指定可）
    #[arg(long = "arg", value_name = "JSON")]
    args: Vec<String>,

    /// Ctrl-Cを受け取るまでモジュールを実行したままにする
    #[arg(long)]
    wait: bool,
}

impl Cli {
    /// 環境変数の設定にコマンドライン引数を上書きする。
    fn apply(&self, config: &mut LoaderConfig) {
        if let Some(url) = &self.url {
            config.module_url = Some(url.clone());
        }
        if let Some(path) = &self.path {
            config.module_path = path.clone();
            if self.url.is_none() {
                config.module_url = None;
            }
        }
        if let Some(entry_point) = &self.entry_point {
            config.entry_point = entry_point.clone();
        }
        if let Some(fuel_limit) = self.fuel_limit {
            config.fuel_limit = fuel_limit;
        }
        if let Some(memory_limit) = self.memory_limit {
            config.memory_limit = memory_limit;
        }
    }

    fn call_args(&self) -> anyhow::Result<Vec<serde_json::Value>> {
        self.args
            .iter()
            .map(|arg| {
                serde_json::from_str(arg).with_context(|| format!("引数をJSONとして解釈できません: {arg}"))
            })
            .collect()
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = LoaderConfig::from_env()?;
    cli.apply(&mut config);
    let call_args = cli.call_args()?;

    let loader = ModuleLoader::from_config(&config)?;
    loader.load().await?;

    let exports = loader.exports().names();
    tracing::info!(?exports, "公開されたエクスポート");

    let outcome = match &cli.call {
        Some(name) => loader
            .exports()
            .call(name, &call_args)
            .map(|results| println!("{}", serde_json::Value::from(results)))
            .with_context(|| format!("{name} の呼び出しに失敗しました")),
        None => Ok(()),
    };

    if outcome.is_ok() && cli.wait {
        tracing::info!("Ctrl-Cで終了します");
        tokio::signal::ctrl_c().await?;
    }

    loader.unload();
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_overrides_env_url() {
        let cli = Cli::parse_from(["modboot", "--path", "local.wasm", "--fuel-limit", "10"]);
        let mut config = LoaderConfig {
            module_url: Some("https://example.com/main.wasm".to_string()),
            ..LoaderConfig::default()
        };
        cli.apply(&mut config);
        assert_eq!(config.module_url, None);
        assert_eq!(config.module_path, PathBuf::from("local.wasm"));
        assert_eq!(config.fuel_limit, 10);
    }

    #[test]
    fn test_call_args() {
        let cli = Cli::parse_from(["modboot", "--call", "goAdd", "--arg", "1", "--arg", "2.5"]);
        let args = cli.call_args().unwrap();
        assert_eq!(args, vec![serde_json::json!(1), serde_json::json!(2.5)]);

        let cli = Cli::parse_from(["modboot", "--arg", "one"]);
        assert!(cli.call_args().is_err());
    }
}
