// 测试用本地上游：把 axum Router 挂到 127.0.0.1 随机端口。
use axum::Router;
use tokio::net::TcpListener;

pub(crate) async fn spawn(app: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind mock upstream");
    let addr = listener.local_addr().expect("mock upstream addr");
    tokio::spawn(async move {
        if let Err(err) = axum::serve(listener, app).await {
            eprintln!("mock upstream failed: {err}");
        }
    });
    format!("http://{addr}")
}
