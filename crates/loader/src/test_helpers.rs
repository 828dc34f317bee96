//! # テスト用共通ヘルパー
//!
//! source, loaderテストで共有するモックサーバー。

/// テスト用モックHTTPサーバーを起動し、指定パスで指定データを返す。
/// それ以外のパスは404を返す。
pub async fn start_mock_server(path: &str, data: Vec<u8>) -> u16 {
    use axum::routing::get;

    let app = axum::Router::new().route(
        path,
        get(move || {
            let d = data.clone();
            async move { d }
        }),
    );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    port
}
