mod common;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tokio_tungstenite::tungstenite::Message;

use backend::app::create_app;
use backend::modules::transcode::model::TranscodeRequest;
use common::{FakeEncoder, Harness};

async fn serve(h: &Harness) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = create_app(h.state.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

/// Collect every progress frame until the server closes the socket.
/// The gate, when given, is opened after the first frame arrives.
async fn collect_frames(addr: SocketAddr, video_id: &str, gate: Option<Arc<Semaphore>>) -> Vec<Value> {
    let url = format!("ws://{addr}/ws/transcode/{video_id}");
    let (mut socket, _) = tokio_tungstenite::connect_async(url).await.unwrap();

    let mut frames = Vec::new();
    let mut closed = false;
    tokio::time::timeout(Duration::from_secs(15), async {
        while let Some(msg) = socket.next().await {
            match msg.unwrap() {
                Message::Text(text) => {
                    frames.push(serde_json::from_str::<Value>(text.as_str()).unwrap());
                    if frames.len() == 1 {
                        if let Some(gate) = &gate {
                            gate.add_permits(1);
                        }
                    }
                }
                Message::Close(_) => {
                    closed = true;
                    break;
                }
                _ => {}
            }
        }
    })
    .await
    .expect("socket never closed");

    assert!(closed, "stream ended without a close frame");
    frames
}

#[tokio::test]
async fn pushes_progress_until_done_then_closes() {
    let gate = Arc::new(Semaphore::new(0));
    let h = Harness::new(FakeEncoder::Gated(gate.clone())).await;
    h.add_video("v1").await;
    let job = h.coordinator().submit("v1", TranscodeRequest::default()).await.unwrap();
    let addr = serve(&h).await;

    let frames = collect_frames(addr, "v1", Some(gate)).await;

    assert!(frames.len() >= 2, "{frames:?}");
    let progress: Vec<u64> = frames.iter().map(|f| f["progress"].as_u64().unwrap()).collect();
    assert!(progress.windows(2).all(|w| w[0] <= w[1]), "{progress:?}");
    assert!(progress[0] <= 99);

    let last = frames.last().unwrap();
    assert_eq!(last["progress"], 100);
    assert_eq!(last["status"], "succeeded");
    assert_eq!(last["jobId"], job.id);
    assert!(frames.iter().all(|f| f["videoId"] == "v1"));
}

#[tokio::test]
async fn failed_job_ends_the_stream() {
    let h = Harness::new(FakeEncoder::Fail).await;
    h.add_video("v1").await;
    let job = h.coordinator().submit("v1", TranscodeRequest::default()).await.unwrap();
    h.wait_terminal(job.id).await;
    let addr = serve(&h).await;

    let frames = collect_frames(addr, "v1", None).await;

    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0]["status"], "failed");
    assert_eq!(frames[0]["errorKind"], "encode_failure");
    assert_eq!(frames[0]["progress"], 0);
}
