//! End-to-end transfer flow over HTTP.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{Value, json};
use sureroute_event_server::EventBus;
use sureroute_ingest::{Ingest, router, serve};
use sureroute_netsim::{ConditionsClient, DEFAULT_TTL};
use sureroute_scheduler::Scheduler;
use sureroute_transfer::{TransferStore, checksum_bytes};
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

const MIB: usize = 1024 * 1024;

struct TestServer {
    base: String,
    http: reqwest::Client,
    cancel: CancellationToken,
    _dir: TempDir,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl TestServer {
    async fn start(conditions: ConditionsClient) -> Self {
        let dir = TempDir::new().unwrap();
        let cancel = CancellationToken::new();
        let store = TransferStore::open(dir.path()).await.unwrap();
        let ingest = Arc::new(Ingest::new(
            store,
            Scheduler::spawn(cancel.child_token()),
            conditions,
            EventBus::new(),
        ));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let app = router(ingest, 64 * MIB);
        tokio::spawn(serve(listener, app, cancel.child_token()));

        Self {
            base: format!("http://127.0.0.1:{port}"),
            http: reqwest::Client::new(),
            cancel,
            _dir: dir,
        }
    }

    async fn post_json(&self, path: &str, body: &Value) -> (u16, Value) {
        let resp = self
            .http
            .post(format!("{}{path}", self.base))
            .json(body)
            .send()
            .await
            .unwrap();
        let status = resp.status().as_u16();
        (status, resp.json().await.unwrap())
    }

    async fn post_chunk(&self, id: &str, index: usize, hash: &str, body: Vec<u8>) -> (u16, Value) {
        let resp = self
            .http
            .post(format!("{}/transfer/{id}/chunk/{index}", self.base))
            .header("X-Chunk-Hash", hash)
            .header("Content-Type", "application/octet-stream")
            .body(body)
            .send()
            .await
            .unwrap();
        let status = resp.status().as_u16();
        (status, resp.json().await.unwrap())
    }

    async fn get(&self, path: &str) -> (u16, Value) {
        let resp = self
            .http
            .get(format!("{}{path}", self.base))
            .send()
            .await
            .unwrap();
        let status = resp.status().as_u16();
        (status, resp.json().await.unwrap())
    }
}

/// Three 1 MiB chunks of distinct fill bytes.
fn three_chunks() -> Vec<Vec<u8>> {
    vec![vec![0xCD; MIB], vec![0x11; MIB], vec![0x22; MIB]]
}

fn manifest_for(id: &str, parts: &[Vec<u8>]) -> Value {
    json!({
        "transfer_id": id,
        "file_name": "payload.bin",
        "file_size": 3 * MIB,
        "chunk_size": MIB,
        "chunks": parts.iter().map(|p| checksum_bytes(p)).collect::<Vec<_>>(),
        "global_sha256": checksum_bytes(&parts.concat()),
        "priority": "medium",
    })
}

/// Mock simulator answering every `GET /conditions` with `body`.
async fn mock_simulator(body: &'static str) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buf = vec![0u8; 8192];
                let _ = stream.read(&mut buf).await;
                let resp = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = stream.write_all(resp.as_bytes()).await;
                let _ = stream.shutdown().await;
            });
        }
    });
    format!("http://127.0.0.1:{port}")
}

#[tokio::test]
async fn full_transfer_scenarios() {
    let server = TestServer::start(ConditionsClient::disabled()).await;
    let parts = three_chunks();

    // A: fresh manifest, everything missing.
    let (status, body) = server
        .post_json("/transfer/manifest", &manifest_for("scn", &parts))
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["transfer_id"], "scn");
    assert_eq!(body["missing_chunks"], json!([0, 1, 2]));

    // B: chunk 0 with the right hash.
    let (status, body) = server
        .post_chunk("scn", 0, &checksum_bytes(&parts[0]), parts[0].clone())
        .await;
    assert_eq!(status, 200);
    assert_eq!(body, json!({"index": 0, "success": true}));
    let (_, st) = server.get("/transfer/scn/status").await;
    assert_eq!(st["received_chunks"], json!([true, false, false]));
    assert!(st.get("chunks").is_none(), "status must not expose digests");

    // C: chunk 1 with a wrong hash header.
    let (status, body) = server
        .post_chunk("scn", 1, &checksum_bytes(b"wrong"), parts[1].clone())
        .await;
    assert_eq!(status, 400);
    assert_eq!(body, json!({"error": "chunk hash mismatch"}));
    let (_, st) = server.get("/transfer/scn/status").await;
    assert_eq!(st["received_chunks"], json!([true, false, false]));

    // Completing early is refused.
    let (status, body) = server.post_json("/transfer/scn/complete", &json!({})).await;
    assert_eq!(status, 400);
    assert_eq!(body["error"], "missing chunks");

    // D: finish and complete.
    for i in [2, 1] {
        let (status, _) = server
            .post_chunk("scn", i, &checksum_bytes(&parts[i]), parts[i].clone())
            .await;
        assert_eq!(status, 200);
    }
    let (status, body) = server.post_json("/transfer/scn/complete", &json!({})).await;
    assert_eq!(status, 200);
    assert_eq!(body["ok"], true);
    assert_eq!(body["checksum"], checksum_bytes(&parts.concat()));
    let path = body["assembled_path"].as_str().unwrap();
    assert_eq!(std::fs::metadata(path).unwrap().len(), (3 * MIB) as u64);

    // Uploads after completion are rejected.
    let (status, body) = server
        .post_chunk("scn", 0, &checksum_bytes(&parts[0]), parts[0].clone())
        .await;
    assert_eq!(status, 400);
    assert_eq!(body["error"], "transfer already completed");
}

#[tokio::test]
async fn link_down_rejects_without_state_change() {
    let url = mock_simulator(r#"{"latency_ms":0,"jitter_ms":0,"packet_loss":0,"down":true}"#).await;
    let server = TestServer::start(ConditionsClient::new(Some(url), DEFAULT_TTL).unwrap()).await;
    let parts = three_chunks();
    server
        .post_json("/transfer/manifest", &manifest_for("down", &parts))
        .await;

    // E: 503 after a short pause, nothing recorded.
    let started = Instant::now();
    let (status, body) = server
        .post_chunk("down", 0, &checksum_bytes(&parts[0]), parts[0].clone())
        .await;
    assert_eq!(status, 503);
    assert_eq!(body, json!({"error": "link down (simulated)"}));
    assert!(started.elapsed() >= Duration::from_millis(100));

    let (_, st) = server.get("/transfer/down/status").await;
    assert_eq!(st["received_chunks"], json!([false, false, false]));

    // The slot went back to the pool.
    let (_, sched) = server.get("/scheduler").await;
    assert_eq!(sched["usage"]["medium"], 0);
}

#[tokio::test]
async fn total_packet_loss_is_500() {
    let url = mock_simulator(r#"{"latency_ms":0,"jitter_ms":0,"packet_loss":1,"down":false}"#).await;
    let server = TestServer::start(ConditionsClient::new(Some(url), DEFAULT_TTL).unwrap()).await;
    let parts = three_chunks();
    server
        .post_json("/transfer/manifest", &manifest_for("lossy", &parts))
        .await;

    let (status, body) = server
        .post_chunk("lossy", 2, &checksum_bytes(&parts[2]), parts[2].clone())
        .await;
    assert_eq!(status, 500);
    assert_eq!(body["error"], "simulated packet loss");
}

#[tokio::test]
async fn request_errors_use_error_bodies() {
    let server = TestServer::start(ConditionsClient::disabled()).await;

    let (status, body) = server.get("/transfer/ghost/status").await;
    assert_eq!(status, 404);
    assert_eq!(body["error"], "transfer not found");

    let (status, body) = server
        .post_json("/transfer/manifest", &json!({"file_name": "x", "chunks": []}))
        .await;
    assert_eq!(status, 400);
    assert!(body["error"].as_str().unwrap().starts_with("invalid manifest"));

    let parts = three_chunks();
    let mut bad = manifest_for("p", &parts);
    bad["priority"] = json!("urgent");
    let (status, body) = server.post_json("/transfer/manifest", &bad).await;
    assert_eq!(status, 400);
    assert!(body["error"].as_str().unwrap().contains("invalid priority"));

    server
        .post_json("/transfer/manifest", &manifest_for("p2", &parts))
        .await;
    let (status, body) = server
        .post_chunk("p2", 7, &checksum_bytes(&parts[0]), parts[0].clone())
        .await;
    assert_eq!(status, 400);
    assert_eq!(body["error"], "invalid chunk index");

    let resp = server
        .http
        .post(format!("{}/transfer/p2/chunk/0", server.base))
        .body(parts[0].clone())
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "missing X-Chunk-Hash header");
}

#[tokio::test]
async fn resume_after_partial_upload() {
    let server = TestServer::start(ConditionsClient::disabled()).await;
    let parts = three_chunks();
    let manifest = manifest_for("resume", &parts);
    server.post_json("/transfer/manifest", &manifest).await;
    server
        .post_chunk("resume", 1, &checksum_bytes(&parts[1]), parts[1].clone())
        .await;

    let (status, body) = server.post_json("/transfer/manifest", &manifest).await;
    assert_eq!(status, 200);
    assert_eq!(body["missing_chunks"], json!([0, 2]));
}

#[tokio::test]
async fn health_and_scheduler_endpoints() {
    let server = TestServer::start(ConditionsClient::disabled()).await;
    let (status, body) = server.get("/health").await;
    assert_eq!(status, 200);
    assert_eq!(body, json!({"ok": true}));

    let (status, body) = server.get("/scheduler").await;
    assert_eq!(status, 200);
    assert_eq!(body["limits"], json!({"high": 6, "medium": 4, "low": 2}));
    assert_eq!(body["high_active"], false);
}

#[tokio::test]
async fn global_checksum_mismatch_reports_both_digests() {
    let server = TestServer::start(ConditionsClient::disabled()).await;
    let parts = three_chunks();
    let wrong = checksum_bytes(b"something else");
    let mut manifest = manifest_for("gsum", &parts);
    manifest["global_sha256"] = json!(wrong);
    server.post_json("/transfer/manifest", &manifest).await;

    for (i, part) in parts.iter().enumerate() {
        let (status, _) = server
            .post_chunk("gsum", i, &checksum_bytes(part), part.clone())
            .await;
        assert_eq!(status, 200);
    }

    let (status, body) = server.post_json("/transfer/gsum/complete", &json!({})).await;
    assert_eq!(status, 400);
    assert_eq!(
        body,
        json!({
            "error": "global checksum mismatch",
            "checksum": checksum_bytes(&parts.concat()),
            "expected": wrong,
        })
    );

    let (_, st) = server.get("/transfer/gsum/status").await;
    assert_eq!(st["completed"], false);
    assert_eq!(st["received_chunks"], json!([true, true, true]));
}

#[tokio::test]
async fn simulator_controls_are_forwarded() {
    let url = mock_simulator(
        r#"{"ok":true,"down":true,"conditions":{"latency_ms":120,"jitter_ms":30,"packet_loss":0.1,"down":false}}"#,
    )
    .await;
    let server = TestServer::start(ConditionsClient::new(Some(url), DEFAULT_TTL).unwrap()).await;

    let (status, body) = server
        .post_json("/simulator/conditions", &json!({"latency_ms": 120}))
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["latency_ms"], 120.0);
    assert_eq!(body["jitter_ms"], 30.0);

    let (status, body) = server.post_json("/simulator/down/on", &json!({})).await;
    assert_eq!(status, 200);
    assert_eq!(body["down"], true);

    let (status, body) = server.post_json("/simulator/down/sideways", &json!({})).await;
    assert_eq!(status, 400);
    assert_eq!(body["error"], "link state must be on or off");
}

#[tokio::test]
async fn simulator_controls_need_a_simulator() {
    let server = TestServer::start(ConditionsClient::disabled()).await;
    let (status, body) = server.post_json("/simulator/down/off", &json!({})).await;
    assert_eq!(status, 503);
    assert_eq!(body["error"], "no simulator configured");
}
