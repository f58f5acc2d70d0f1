use std::convert::Infallible;

use axum::response::IntoResponse;
use axum::response::sse::{Event, Sse};
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;

use crate::core::progress::ProgressSink;
use crate::core::workflow::WorkflowRun;

/// Terminal SSE frame derived from the finished run: `result` on success,
/// `error` otherwise.
pub fn final_frame(run: &WorkflowRun) -> serde_json::Value {
    if run.success {
        serde_json::json!({ "step": "result", "data": run })
    } else {
        serde_json::json!({
            "step": "error",
            "error": run.error.clone().unwrap_or_else(|| "workflow failed".to_string()),
        })
    }
}

/// Run a workflow while streaming its progress events to the client as
/// `text/event-stream`, one JSON object per `data:` line, flushed per
/// event. Client disconnect closes the sink, which cancels the workflow at
/// its next stage boundary.
pub fn stream_workflow<F, Fut>(run_fn: F) -> axum::response::Response
where
    F: FnOnce(ProgressSink) -> Fut + Send + 'static,
    Fut: Future<Output = WorkflowRun> + Send + 'static,
{
    let (sink, mut events) = ProgressSink::channel(64);
    let (frames_tx, frames_rx) = mpsc::channel::<serde_json::Value>(64);

    // Forward progress events until the sink side closes.
    let event_frames = frames_tx.clone();
    let forwarder = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let frame = serde_json::to_value(&event).unwrap_or(serde_json::Value::Null);
            if event_frames.send(frame).await.is_err() {
                // Client gone; dropping the receiver closes the sink and
                // cancels the run.
                break;
            }
        }
    });

    tokio::spawn(async move {
        let run = run_fn(sink).await;
        // All buffered events flush before the terminal frame.
        let _ = forwarder.await;
        let _ = frames_tx.send(final_frame(&run)).await;
    });

    let stream = ReceiverStream::new(frames_rx)
        .map(|frame| Ok::<_, Infallible>(Event::default().data(frame.to_string())));

    let mut response = Sse::new(stream).into_response();
    let headers = response.headers_mut();
    headers.insert(
        axum::http::header::CACHE_CONTROL,
        axum::http::HeaderValue::from_static("no-cache"),
    );
    headers.insert(
        axum::http::header::CONTENT_ENCODING,
        axum::http::HeaderValue::from_static("identity"),
    );
    response
}

/// Single-event variant for handlers that fail before a workflow starts.
pub fn error_stream(message: String) -> axum::response::Response {
    stream_workflow(move |_sink| async move {
        let mut run = WorkflowRun::new(crate::core::workflow::WorkflowKind::SimpleSite);
        run.fail(message);
        run
    })
}
