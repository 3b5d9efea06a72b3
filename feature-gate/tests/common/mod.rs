use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::Lazy;
use reqwest::header::CONTENT_TYPE;
use reqwest::Method;
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::Notify;

use feature_gate::config::Config;
use feature_gate::server::serve;

// Fast ticks so the kill switch reacts within a test's patience
pub static DEFAULT_CONFIG: Lazy<Config> = Lazy::new(|| Config {
    monitor_interval_ms: 20,
    ..Config::default_test_config()
});

pub struct ServerHandle {
    pub addr: SocketAddr,
    client: reqwest::Client,
    shutdown: Arc<Notify>,
}

impl ServerHandle {
    pub async fn for_config(config: Config) -> ServerHandle {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let notify = Arc::new(Notify::new());
        let shutdown = notify.clone();

        tokio::spawn(async move {
            serve(config, listener, async move { notify.notified().await }).await
        });
        ServerHandle {
            addr,
            client: reqwest::Client::new(),
            shutdown,
        }
    }

    pub async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> reqwest::Response {
        let mut request = self
            .client
            .request(method, format!("http://{:?}{}", self.addr, path));
        if let Some(body) = body {
            request = request
                .body(body.to_string())
                .header(CONTENT_TYPE, "application/json");
        }
        request.send().await.expect("failed to send request")
    }

    pub async fn get(&self, path: &str) -> reqwest::Response {
        self.send(Method::GET, path, None).await
    }

    pub async fn identify(&self, key: &str, role: &str) -> reqwest::Response {
        self.send(
            Method::POST,
            "/subjects",
            Some(serde_json::json!({"key": key, "attributes": {"role": role}})),
        )
        .await
    }

    pub async fn gate(&self, flag_key: &str, subject_key: &str) -> Value {
        self.get(&format!("/gates/{flag_key}/{subject_key}"))
            .await
            .json::<Value>()
            .await
            .expect("gate response is not json")
    }

    pub async fn set_mode(&self, mode: &str) -> reqwest::Response {
        self.send(
            Method::POST,
            "/performance/mode",
            Some(serde_json::json!({ "mode": mode })),
        )
        .await
    }

    pub async fn performance(&self) -> Value {
        self.get("/performance")
            .await
            .json::<Value>()
            .await
            .expect("performance response is not json")
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.shutdown.notify_one()
    }
}

/// Retries `check` until it returns true, giving up after a few seconds.
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..250 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}
