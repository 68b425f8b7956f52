//! Atlas worker
//!
//! Builds run on a dedicated thread with its own tokio runtime,
//! communicating with the owning thread via mpsc channels. Requests carry a
//! correlation id so callers can queue several without blocking; the worker
//! still executes them one at a time, in arrival order, because every build
//! resets the shared bitmap arena.

use anyhow::{anyhow, Result};
use log::{debug, info, warn};
use serde::Serialize;
use std::sync::mpsc;
use std::time::{Duration, Instant};

use crate::atlas::{AtlasBuilder, AtlasManifest, AtlasOutput, AtlasRequest};
use crate::constants::{WORKER_QUEUE_CAPACITY, WORKER_STARTUP_TIMEOUT_SECS};
use crate::error::AtlasError;
use crate::font::FontIdentifier;

/// Build an atlas; arguments are an `AtlasRequest`
pub const OP_MAKE_ATLAS: &str = "make_atlas";

/// Resolve one font ahead of a build; argument is an encoded identifier
pub const OP_RESOLVE_FONT: &str = "resolve_font";

/// Request from the owning thread
#[derive(Debug, Clone)]
pub struct Request {
    pub correlation_id: u64,
    pub operation: String,
    pub arguments: serde_json::Value,
}

/// Successful operation result
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Atlas(Box<AtlasOutput>),
    Font { name: String },
}

/// Response to one request
#[derive(Debug, Clone)]
pub struct Response {
    pub correlation_id: u64,
    pub outcome: std::result::Result<Reply, AtlasError>,
}

/// Wire form: `{correlation_id, ok: true, result}` or `{correlation_id, ok: false, error}`
#[derive(Serialize)]
struct WireResponse<'a> {
    correlation_id: u64,
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<WireResult<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum WireResult<'a> {
    Atlas(AtlasManifest),
    Font { face: &'a str },
}

impl Response {
    /// JSON message for this response (atlas pixels are not included)
    pub fn to_json(&self) -> serde_json::Value {
        let wire = match &self.outcome {
            Ok(reply) => WireResponse {
                correlation_id: self.correlation_id,
                ok: true,
                result: Some(match reply {
                    Reply::Atlas(output) => WireResult::Atlas(output.manifest()),
                    Reply::Font { name } => WireResult::Font { face: name },
                }),
                error: None,
            },
            Err(e) => WireResponse {
                correlation_id: self.correlation_id,
                ok: false,
                result: None,
                error: Some(e.to_string()),
            },
        };
        serde_json::to_value(wire).unwrap_or(serde_json::Value::Null)
    }
}

/// Execute one request against `builder`
///
/// Unknown operations are answered without touching the builder.
pub async fn handle_request(builder: &mut AtlasBuilder, request: Request) -> Response {
    let Request {
        correlation_id,
        operation,
        arguments,
    } = request;
    debug!("Request {}: {}", correlation_id, operation);

    let outcome = match operation.as_str() {
        OP_MAKE_ATLAS => match serde_json::from_value::<AtlasRequest>(arguments) {
            Ok(req) => builder.build(&req).await.map(|out| Reply::Atlas(Box::new(out))),
            Err(e) => Err(AtlasError::InvalidArguments(format!("{}: {}", OP_MAKE_ATLAS, e))),
        },
        OP_RESOLVE_FONT => match arguments.as_str() {
            Some(encoded) => match FontIdentifier::decode(encoded) {
                Ok(id) => builder.font_cache().resolve(&id).await.map(|face| Reply::Font {
                    name: face.name().to_string(),
                }),
                Err(e) => Err(e),
            },
            None => Err(AtlasError::InvalidArguments(format!(
                "{} expects a font identifier string",
                OP_RESOLVE_FONT
            ))),
        },
        other => Err(AtlasError::UnknownOperation(other.to_string())),
    };

    if let Err(e) = &outcome {
        warn!("Request {} ({}) failed: {}", correlation_id, operation, e);
    }
    Response {
        correlation_id,
        outcome,
    }
}

/// Handle to the worker thread
///
/// Held by the owning thread; submits requests and collects responses.
pub struct AtlasWorker {
    /// Request sender channel
    request_tx: tokio::sync::mpsc::Sender<Request>,
    /// Response receiver channel
    response_rx: mpsc::Receiver<Response>,
    /// Responses received while waiting for another id
    pending: Vec<Response>,
    next_id: u64,
    /// Worker thread (exits once the request channel closes)
    thread: std::thread::JoinHandle<()>,
}

impl AtlasWorker {
    /// Start the worker thread with `builder`
    ///
    /// Returns Err if the thread or its runtime cannot start.
    /// 3 second timeout.
    pub fn spawn(builder: AtlasBuilder) -> Result<Self> {
        let (response_tx, response_rx) = mpsc::channel::<Response>();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<()>>();
        let (request_tx, request_rx) = tokio::sync::mpsc::channel::<Request>(WORKER_QUEUE_CAPACITY);

        let thread = std::thread::Builder::new()
            .name("atlas-worker".into())
            .spawn(move || {
                worker_thread(builder, request_rx, response_tx, ready_tx);
            })
            .map_err(|e| anyhow!("Failed to start atlas worker thread: {}", e))?;

        match ready_rx.recv_timeout(Duration::from_secs(WORKER_STARTUP_TIMEOUT_SECS)) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(anyhow!("Atlas worker start-up timeout")),
        }

        Ok(Self {
            request_tx,
            response_rx,
            pending: Vec::new(),
            next_id: 0,
            thread,
        })
    }

    /// Queue a request (non-blocking); returns its correlation id
    pub fn submit(&mut self, operation: &str, arguments: serde_json::Value) -> Result<u64> {
        self.next_id += 1;
        let correlation_id = self.next_id;
        self.request_tx
            .try_send(Request {
                correlation_id,
                operation: operation.to_string(),
                arguments,
            })
            .map_err(|e| anyhow!("Failed to queue {} request: {}", operation, e))?;
        Ok(correlation_id)
    }

    /// Get all responses received so far
    pub fn poll_responses(&mut self) -> Vec<Response> {
        let mut responses = std::mem::take(&mut self.pending);
        while let Ok(response) = self.response_rx.try_recv() {
            responses.push(response);
        }
        responses
    }

    /// Block until the response for `correlation_id` arrives
    ///
    /// Responses for other ids are kept for `poll_responses`/`wait_for`.
    pub fn wait_for(&mut self, correlation_id: u64, timeout: Duration) -> Result<Response> {
        if let Some(i) = self.pending.iter().position(|r| r.correlation_id == correlation_id) {
            return Ok(self.pending.remove(i));
        }

        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.response_rx.recv_timeout(remaining) {
                Ok(response) if response.correlation_id == correlation_id => return Ok(response),
                Ok(response) => self.pending.push(response),
                Err(mpsc::RecvTimeoutError::Timeout) => {
                    return Err(anyhow!("Timed out waiting for response {}", correlation_id))
                }
                Err(mpsc::RecvTimeoutError::Disconnected) => {
                    return Err(anyhow!("Atlas worker terminated"))
                }
            }
        }
    }

    /// Close the request queue and wait for the thread to finish
    pub fn shutdown(self) -> Result<()> {
        let Self {
            request_tx, thread, ..
        } = self;
        drop(request_tx);
        thread
            .join()
            .map_err(|_| anyhow!("Atlas worker thread panicked"))
    }
}

/// Worker thread main function
fn worker_thread(
    builder: AtlasBuilder,
    request_rx: tokio::sync::mpsc::Receiver<Request>,
    response_tx: mpsc::Sender<Response>,
    ready_tx: mpsc::Sender<Result<()>>,
) {
    let rt = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            let _ = ready_tx.send(Err(anyhow!("Failed to create tokio runtime: {}", e)));
            return;
        }
    };

    let _ = ready_tx.send(Ok(()));
    info!("Atlas worker started");
    rt.block_on(worker_main(builder, request_rx, response_tx));
    info!("Atlas worker terminated");
}

/// Worker thread async main
async fn worker_main(
    mut builder: AtlasBuilder,
    mut request_rx: tokio::sync::mpsc::Receiver<Request>,
    response_tx: mpsc::Sender<Response>,
) {
    while let Some(request) = request_rx.recv().await {
        let response = handle_request(&mut builder, request).await;
        if response_tx.send(response).is_err() {
            debug!("Response receiver dropped, stopping worker");
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atlas::AtlasSettings;
    use crate::engine::BitmapEngine;
    use crate::font::{FaceHandle, FontCache, FontLoader};
    use futures_util::future::BoxFuture;
    use futures_util::FutureExt;
    use serde_json::json;
    use std::sync::Arc;

    /// Every load fails
    struct NoFonts;

    impl FontLoader for NoFonts {
        fn load_url(&self, url: &str, _face_name: String) -> BoxFuture<'static, anyhow::Result<FaceHandle>> {
            let url = url.to_string();
            async move { Err(anyhow!("unreachable: {}", url)) }.boxed()
        }

        fn load_face(&self, family: &str, face_name: String) -> BoxFuture<'static, anyhow::Result<FaceHandle>> {
            self.load_url(family, face_name)
        }
    }

    fn builder() -> AtlasBuilder {
        AtlasBuilder::new(
            BitmapEngine::new(0),
            Arc::new(FontCache::new(Box::new(NoFonts))),
            AtlasSettings::default(),
        )
    }

    fn empty_request() -> serde_json::Value {
        json!({ "fonts": [], "codepoint_ranges": [[32, 126]], "halo_passes": [] })
    }

    #[tokio::test]
    async fn test_unknown_operation() {
        let mut b = builder();
        let response = handle_request(
            &mut b,
            Request {
                correlation_id: 7,
                operation: "explode".to_string(),
                arguments: json!(null),
            },
        )
        .await;
        assert_eq!(response.correlation_id, 7);
        assert_eq!(
            response.outcome.unwrap_err(),
            AtlasError::UnknownOperation("explode".to_string())
        );
        assert!(b.font_cache().is_empty());
    }

    #[tokio::test]
    async fn test_make_atlas_bad_arguments() {
        let mut b = builder();
        let response = handle_request(
            &mut b,
            Request {
                correlation_id: 1,
                operation: OP_MAKE_ATLAS.to_string(),
                arguments: json!({ "fonts": 12 }),
            },
        )
        .await;
        assert!(matches!(response.outcome, Err(AtlasError::InvalidArguments(_))));
    }

    #[tokio::test]
    async fn test_empty_font_set_builds_blank_atlas() {
        let mut b = builder();
        let response = handle_request(
            &mut b,
            Request {
                correlation_id: 2,
                operation: OP_MAKE_ATLAS.to_string(),
                arguments: empty_request(),
            },
        )
        .await;
        let Ok(Reply::Atlas(output)) = response.outcome else {
            panic!("expected an atlas");
        };
        assert_eq!((output.image.width, output.image.height), (128, 128));
        assert!(output.lookup.is_empty());
    }

    #[test]
    fn test_wire_format() {
        let ok = Response {
            correlation_id: 3,
            outcome: Ok(Reply::Font {
                name: "FontFace1".to_string(),
            }),
        };
        assert_eq!(
            ok.to_json(),
            json!({ "correlation_id": 3, "ok": true, "result": { "face": "FontFace1" } })
        );

        let err = Response {
            correlation_id: 4,
            outcome: Err(AtlasError::UnknownOperation("x".to_string())),
        };
        assert_eq!(
            err.to_json(),
            json!({ "correlation_id": 4, "ok": false, "error": "No such function: x" })
        );
    }

    #[test]
    fn test_worker_answers_in_order() {
        let mut worker = AtlasWorker::spawn(builder()).unwrap();
        let a = worker.submit(OP_MAKE_ATLAS, empty_request()).unwrap();
        let b = worker.submit("nope", json!([])).unwrap();
        let c = worker
            .submit(OP_RESOLVE_FONT, json!("12###url###gone.ttf"))
            .unwrap();
        assert!(a < b && b < c);

        // Waiting for the last one buffers the earlier two
        let last = worker.wait_for(c, Duration::from_secs(10)).unwrap();
        assert!(matches!(last.outcome, Err(AtlasError::FontResolution { .. })));

        let earlier = worker.poll_responses();
        let ids: Vec<u64> = earlier.iter().map(|r| r.correlation_id).collect();
        assert_eq!(ids, vec![a, b]);
        assert!(matches!(earlier[0].outcome, Ok(Reply::Atlas(_))));
        assert!(matches!(earlier[1].outcome, Err(AtlasError::UnknownOperation(_))));

        worker.shutdown().unwrap();
    }
}
