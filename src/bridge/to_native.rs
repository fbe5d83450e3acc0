//! Consumes a protocol app as if it were a native handler.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use futures_util::stream::{self, Stream, StreamExt};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, warn};

use super::task::{PumpTask, join_result};
use crate::Error;
use crate::http::{Body, Request, Response, StatusCode};
use crate::protocol::{self, App, Message, Scope, ZERO_COPY_SEND};
use crate::socket::{CLOSE_NORMAL, Payload, SessionState, Socket, Transport};
use crate::stream::{ByteStream, Chunk, SendFile};

/// A protocol app behind a native `handle(Request) -> Response` / `connect(Socket)` surface.
///
/// Every call runs the app on its own task, connected to the caller through two
/// unbounded queues. The tasks live exactly as long as the exchange: they are
/// aborted once the response body is drained or dropped.
#[derive(Clone)]
pub struct ProtocolToNative {
    app: Arc<dyn App>,
}

impl ProtocolToNative {
    pub fn new(app: impl App) -> Self {
        Self::from_arc(Arc::new(app))
    }

    pub fn from_arc(app: Arc<dyn App>) -> Self {
        Self { app }
    }

    pub fn app(&self) -> &Arc<dyn App> {
        &self.app
    }

    pub fn into_app(self) -> Arc<dyn App> {
        self.app
    }

    /// Runs the app for one request.
    ///
    /// Resolves once the app has sent `http.response.start`; the body streams in
    /// afterwards as the caller reads it.
    pub async fn handle(&self, request: Request) -> Result<Response, Error> {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

        let pump = PumpTask::spawn(pump_request_body(request.stream().clone(), inbound_tx));

        let scope = Scope::http(request.method().clone(), request.path())
            .with_query_string(request.query().encode())
            .with_headers(request.headers().clone())
            .with_extension(ZERO_COPY_SEND);
        debug!(method = %scope.method, path = %scope.path, "calling protocol app");

        // The pump owns the only inbound sender: once it is done and the queue is
        // drained, the app reads `http.disconnect`.
        let receive = protocol::receiver(inbound_rx, Some(Message::HttpDisconnect));
        let send = protocol::sender(outbound_tx);
        let app = PumpTask::spawn(self.app.call(scope, receive, send));

        let mut output = Output {
            messages: outbound_rx,
            app: Some(app),
            _pump: pump,
        };

        let (status, headers) = match output.next().await? {
            Some(Message::HttpResponseStart { status, headers }) => (status, headers),
            Some(other) => {
                warn!(kind = other.kind(), "app did not start its response");
                return Err(Error::unexpected(&other));
            }
            None => {
                return Err(Error::Protocol(
                    "app finished without sending http.response.start".into(),
                ));
            }
        };

        let body = ByteStream::from_stream(response_body(output));
        Ok(Response::new(StatusCode::from_u16(status))
            .with_headers(headers)
            .with_body(Body::Stream(body)))
    }

    /// Runs a session-shaped app against a native socket.
    ///
    /// The app's `websocket.accept`, `websocket.send` and `websocket.close` are
    /// applied to `socket`, so its state machine validates them. Usage errors abort
    /// the app and are returned. A session the app leaves open is closed with
    /// [`CLOSE_NORMAL`].
    pub async fn connect(&self, mut socket: Socket) -> Result<(), Error> {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel();

        let scope = Scope::websocket(socket.path())
            .with_query_string(socket.query().encode())
            .with_headers(socket.headers().clone());
        debug!(path = %scope.path, "connecting protocol app");

        let _ = inbound_tx.send(Message::WebsocketConnect);
        let receive = protocol::receiver(inbound_rx, None);
        let send = protocol::sender(outbound_tx);
        let mut app = PumpTask::spawn(self.app.call(scope, receive, send));

        let peer_gone = Arc::new(AtomicBool::new(false));
        let mut inbound_tx = Some(inbound_tx);
        let mut input = None;
        let mut finished = None;

        let stepped = loop {
            let message = tokio::select! {
                biased;
                Some(message) = outbound_rx.recv() => message,
                joined = &mut app => {
                    finished = Some(join_result(joined));
                    break Ok(());
                }
            };

            let step = match message {
                Message::WebsocketAccept { headers } => {
                    let accepted = socket.accept_with_headers(headers).await;
                    if accepted.is_ok() {
                        if let Some(tx) = inbound_tx.take() {
                            input = Some(PumpTask::spawn(pump_socket_input(
                                socket.transport(),
                                tx,
                                Arc::clone(&peer_gone),
                            )));
                        }
                    }
                    accepted
                }
                Message::WebsocketSend { bytes, text } => match Payload::from_parts(bytes, text) {
                    Ok(payload) => socket.send(payload).await,
                    Err(e) => Err(e),
                },
                Message::WebsocketClose { code } => socket.close(code).await,
                other => Err(Error::unexpected(&other)),
            };
            if let Err(e) = step {
                break Err(e);
            }
        };

        // Cut the app off from both queues so it cannot wait on us forever.
        drop(input);
        drop(inbound_tx);
        drop(outbound_rx);

        let result = match (stepped, finished) {
            (Err(e), _) if !e.is_disconnect() => {
                warn!(error = %e, "session app misbehaved, aborting it");
                return Err(e);
            }
            (Err(_), _) => {
                peer_gone.store(true, Ordering::SeqCst);
                join_result(app.await)
            }
            (Ok(()), Some(result)) => result,
            (Ok(()), None) => join_result(app.await),
        };

        match result {
            Ok(()) | Err(Error::Disconnect) => {}
            Err(e) => return Err(e),
        }

        if socket.state() != SessionState::Closed && !peer_gone.load(Ordering::SeqCst) {
            debug!("session app returned without closing, closing normally");
            socket.close(CLOSE_NORMAL).await?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for ProtocolToNative {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolToNative").finish_non_exhaustive()
    }
}

// Feeds the request body to the app. A broken body reads as a client disconnect.
async fn pump_request_body(body: ByteStream, inbound: UnboundedSender<Message>) {
    let mut chunks = body.chunks();
    while let Some(chunk) = chunks.next().await {
        let message = match chunk {
            Ok(body) => Message::HttpRequest {
                body,
                more_body: true,
            },
            Err(e) => {
                if !e.is_disconnect() {
                    warn!(error = %e, "request body failed, reporting a disconnect");
                }
                let _ = inbound.send(Message::HttpDisconnect);
                return;
            }
        };
        if inbound.send(message).is_err() {
            debug!("app stopped reading the request body");
            return;
        }
    }
    let _ = inbound.send(Message::HttpRequest {
        body: Bytes::new(),
        more_body: false,
    });
}

// Moves peer input into the app's queue until the peer goes away.
async fn pump_socket_input(
    transport: Arc<dyn Transport>,
    inbound: UnboundedSender<Message>,
    peer_gone: Arc<AtomicBool>,
) {
    loop {
        match transport.receive().await {
            Ok(payload) => {
                let (bytes, text) = payload.into_parts();
                if inbound.send(Message::WebsocketReceive { bytes, text }).is_err() {
                    return;
                }
            }
            Err(e) => {
                if !e.is_disconnect() {
                    warn!(error = %e, "session input failed, reporting a disconnect");
                }
                peer_gone.store(true, Ordering::SeqCst);
                let _ = inbound.send(Message::WebsocketDisconnect { code: CLOSE_NORMAL });
                return;
            }
        }
    }
}

/// The outbound side of a running app. Dropping it aborts the app and the body pump.
struct Output {
    messages: UnboundedReceiver<Message>,
    app: Option<PumpTask<Result<(), Error>>>,
    _pump: PumpTask<()>,
}

impl Output {
    /// The next outbound message, `None` once the app is done and the queue drained.
    ///
    /// Queued messages win over app completion, so nothing the app sent before
    /// returning is lost. An app failure surfaces here once the queue is empty.
    async fn next(&mut self) -> Result<Option<Message>, Error> {
        loop {
            let Some(app) = self.app.as_mut() else {
                return Ok(self.messages.try_recv().ok());
            };
            tokio::select! {
                biased;
                Some(message) = self.messages.recv() => return Ok(Some(message)),
                joined = app => {
                    self.app = None;
                    join_result(joined)?;
                }
            }
        }
    }
}

// Pulls `http.response.body` messages into a body stream. Empty chunks are
// skipped.
fn response_body(output: Output) -> impl Stream<Item = Result<Chunk, Error>> + Send {
    stream::unfold(Some(output), |state| async move {
        let mut output = state?;
        loop {
            let (chunk, more_body) = match output.next().await {
                Ok(Some(Message::HttpResponseBody { body, more_body })) => {
                    (Chunk::Bytes(body), more_body)
                }
                Ok(Some(Message::HttpResponseZeroCopySend {
                    file,
                    offset,
                    count,
                    more_body,
                })) => (
                    Chunk::File(SendFile::new(file).offset(offset).size(count)),
                    more_body,
                ),
                Ok(Some(other)) => return Some((Err(Error::unexpected(&other)), None)),
                Ok(None) | Err(Error::Disconnect) => return None,
                Err(e) => return Some((Err(e), None)),
            };
            if chunk.is_empty() {
                if more_body {
                    continue;
                }
                return None;
            }
            return Some((Ok(chunk), more_body.then_some(output)));
        }
    })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures_util::StreamExt;
    use serde_json::json;

    use super::*;
    use crate::http::{Headers, Method, Query};
    use crate::protocol::{ReceiveFn, SendFn};
    use crate::socket::testing::{Event, pair};

    fn hello_world() -> ProtocolToNative {
        ProtocolToNative::new(|scope: Scope, _receive: ReceiveFn, send: SendFn| async move {
            let query = Query::parse(&scope.query_string);
            let name = query.get("name").unwrap_or("World").to_owned();
            send(Message::start(200, Headers::new())).await?;
            send(Message::HttpResponseBody {
                body: format!("Hello, {name}!").into(),
                more_body: false,
            })
            .await
        })
    }

    #[tokio::test]
    async fn hello_world_response() {
        let view = hello_world();

        let response = view.handle(Request::new(Method::Get, "/")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().is_empty());
        assert_eq!(response.body().await.unwrap(), "Hello, World!");

        let request = Request::new(Method::Get, "/").with_query(Query::parse("name=Jack"));
        let response = view.handle(request).await.unwrap();
        assert_eq!(response.body().await.unwrap(), "Hello, Jack!");
    }

    #[tokio::test]
    async fn request_body_reaches_the_app() {
        let echo = ProtocolToNative::new(|_scope: Scope, receive: ReceiveFn, send: SendFn| async move {
            let mut body = Vec::new();
            loop {
                match receive().await? {
                    Message::HttpRequest { body: chunk, more_body } => {
                        body.extend_from_slice(&chunk);
                        if !more_body {
                            break;
                        }
                    }
                    other => return Err(Error::unexpected(&other)),
                }
            }
            send(Message::start(200, Headers::new())).await?;
            send(Message::body(body, true)).await?;
            send(Message::body(Bytes::new(), false)).await
        });

        let request = Request::new(Method::Post, "/").with_body(ByteStream::from_chunks(["ab", "cd"]));
        let response = echo.handle(request).await.unwrap();
        assert_eq!(response.body().await.unwrap(), "abcd");
    }

    #[tokio::test]
    async fn disconnecting_request_body_does_not_block() {
        let app = ProtocolToNative::new(|_scope: Scope, receive: ReceiveFn, send: SendFn| async move {
            send(Message::start(200, Headers::new())).await?;
            send(Message::body("foo", true)).await?;
            // Wait for the client to go away.
            loop {
                if let Message::HttpDisconnect = receive().await? {
                    return Ok(());
                }
            }
        });

        let body = stream::iter(vec![Ok("partial"), Err(Error::Disconnect)]);
        let request = Request::new(Method::Post, "/").with_body(ByteStream::from_stream(body));
        let response = app.handle(request).await.unwrap();
        let body = tokio::time::timeout(Duration::from_secs(1), response.body())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(body, "foo");
    }

    #[tokio::test]
    async fn app_sees_disconnect_after_body_end() {
        let app = ProtocolToNative::new(|_scope: Scope, receive: ReceiveFn, send: SendFn| async move {
            let first = receive().await?;
            let second = receive().await?;
            let seen = json!([first.kind(), second.kind()]).to_string();
            send(Message::start(200, Headers::new())).await?;
            send(Message::body(seen, false)).await
        });
        let response = app.handle(Request::new(Method::Get, "/")).await.unwrap();
        assert_eq!(
            response.body().await.unwrap(),
            r#"["http.request","http.disconnect"]"#
        );
    }

    #[tokio::test]
    async fn first_message_must_start_the_response() {
        let app = ProtocolToNative::new(|_scope: Scope, _receive: ReceiveFn, send: SendFn| async move {
            send(Message::body("too early", false)).await
        });
        let err = app.handle(Request::new(Method::Get, "/")).await.unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[tokio::test]
    async fn app_finishing_silently_is_a_protocol_error() {
        let app = ProtocolToNative::new(|_scope: Scope, _receive: ReceiveFn, _send: SendFn| async move {
            Ok::<(), Error>(())
        });
        let err = app.handle(Request::new(Method::Get, "/")).await.unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[tokio::test]
    async fn app_error_before_start_is_forwarded() {
        let app = ProtocolToNative::new(|_scope: Scope, _receive: ReceiveFn, _send: SendFn| async move {
            Err::<(), _>(Error::app(std::io::Error::other("no backend")))
        });
        let err = app.handle(Request::new(Method::Get, "/")).await.unwrap_err();
        assert_eq!(err.to_string(), "no backend");
    }

    #[tokio::test]
    async fn app_error_mid_body_is_reraised() {
        let app = ProtocolToNative::new(|_scope: Scope, _receive: ReceiveFn, send: SendFn| async move {
            send(Message::start(200, Headers::new())).await?;
            send(Message::body("partial", true)).await?;
            Err(Error::app(std::io::Error::other("stream broke")))
        });
        let response = app.handle(Request::new(Method::Get, "/")).await.unwrap();
        let mut chunks = response.stream().chunks();
        assert_eq!(chunks.next().await.unwrap().unwrap(), "partial");
        let err = chunks.next().await.unwrap().unwrap_err();
        assert_eq!(err.to_string(), "stream broke");
    }

    #[tokio::test]
    async fn zero_copy_messages_become_file_chunks() {
        let app = ProtocolToNative::new(|scope: Scope, _receive: ReceiveFn, send: SendFn| async move {
            assert!(scope.supports(ZERO_COPY_SEND));
            send(Message::start(200, Headers::new())).await?;
            send(Message::HttpResponseZeroCopySend {
                file: "/srv/static/app.js".into(),
                offset: 10,
                count: Some(20),
                more_body: false,
            })
            .await
        });
        let response = app.handle(Request::new(Method::Get, "/app.js")).await.unwrap();
        let chunks: Vec<_> = response.stream().raw_chunks().collect().await;
        let expected = SendFile::new("/srv/static/app.js").offset(10).size(Some(20));
        assert!(matches!(chunks.as_slice(), [Ok(Chunk::File(file))] if *file == expected));
    }

    // An app that sets the returned flag if it is still running 50ms after its
    // first body chunk.
    fn lingering_app(more_body: bool) -> (ProtocolToNative, Arc<AtomicBool>) {
        let ran_on = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran_on);
        let app = ProtocolToNative::new(move |_scope: Scope, _receive: ReceiveFn, send: SendFn| {
            let flag = Arc::clone(&flag);
            async move {
                send(Message::start(200, Headers::new())).await?;
                send(Message::body("first", more_body)).await?;
                tokio::time::sleep(Duration::from_millis(50)).await;
                flag.store(true, Ordering::SeqCst);
                send(Message::body("second", false)).await
            }
        });
        (app, ran_on)
    }

    #[tokio::test]
    async fn dropping_the_response_cancels_the_app() {
        let (app, ran_on) = lingering_app(true);
        let response = app.handle(Request::new(Method::Get, "/")).await.unwrap();
        let mut chunks = response.stream().chunks();
        assert_eq!(chunks.next().await.unwrap().unwrap(), "first");
        drop(chunks);
        drop(response);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!ran_on.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn draining_the_response_cancels_the_app() {
        let (app, ran_on) = lingering_app(false);
        let response = app.handle(Request::new(Method::Get, "/")).await.unwrap();
        assert_eq!(response.body().await.unwrap(), "first");

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!ran_on.load(Ordering::SeqCst));
        drop(response);
    }

    #[tokio::test]
    async fn empty_chunks_are_skipped() {
        let app = ProtocolToNative::new(|_scope: Scope, _receive: ReceiveFn, send: SendFn| async move {
            send(Message::start(200, Headers::new())).await?;
            send(Message::body(Bytes::new(), true)).await?;
            send(Message::HttpResponseZeroCopySend {
                file: "/srv/empty".into(),
                offset: 0,
                count: Some(0),
                more_body: true,
            })
            .await?;
            send(Message::body("tail", false)).await
        });
        let response = app.handle(Request::new(Method::Get, "/")).await.unwrap();
        let chunks: Vec<_> = response.stream().raw_chunks().collect().await;
        assert!(matches!(chunks.as_slice(), [Ok(Chunk::Bytes(tail))] if tail == "tail"));
    }

    fn session_app() -> ProtocolToNative {
        ProtocolToNative::new(|scope: Scope, receive: ReceiveFn, send: SendFn| async move {
            assert_eq!(receive().await?, Message::WebsocketConnect);
            let mut headers = Headers::new();
            headers.insert("set-cookie", format!("path={}", scope.path));
            send(Message::WebsocketAccept { headers }).await?;
            loop {
                match receive().await? {
                    Message::WebsocketReceive { bytes, text } => {
                        send(Message::WebsocketSend { bytes, text }).await?;
                    }
                    Message::WebsocketDisconnect { .. } => return Ok(()),
                    other => return Err(Error::unexpected(&other)),
                }
            }
        })
    }

    #[tokio::test]
    async fn session_echo_until_peer_leaves() {
        let (transport, mut peer) = pair();
        let socket = Socket::new(transport).with_path("/chat");

        let bridge = session_app();
        let session = tokio::spawn(async move { bridge.connect(socket).await });

        let Some(Event::Accept(headers)) = peer.events.recv().await else {
            panic!("expected accept");
        };
        assert_eq!(headers.get("set-cookie"), Some("path=/chat"));

        peer.input.send(Ok(Payload::Text("foo".into()))).unwrap();
        assert_eq!(
            peer.events.recv().await,
            Some(Event::Send(Payload::Text("foo".into())))
        );
        peer.input.send(Ok(Payload::Bytes("baz".into()))).unwrap();
        assert_eq!(
            peer.events.recv().await,
            Some(Event::Send(Payload::Bytes("baz".into())))
        );

        peer.input.send(Err(Error::Disconnect)).unwrap();
        session.await.unwrap().unwrap();
        // No close after the peer is gone.
        assert!(peer.events.recv().await.is_none());
    }

    #[tokio::test]
    async fn session_left_open_is_closed_normally() {
        let app = ProtocolToNative::new(|_scope: Scope, receive: ReceiveFn, send: SendFn| async move {
            receive().await?;
            send(Message::WebsocketAccept {
                headers: Headers::new(),
            })
            .await?;
            send(Message::WebsocketSend {
                bytes: None,
                text: Some("bye".into()),
            })
            .await
        });
        let (transport, mut peer) = pair();
        app.connect(Socket::new(transport)).await.unwrap();

        assert!(matches!(peer.events.recv().await, Some(Event::Accept(_))));
        assert_eq!(
            peer.events.recv().await,
            Some(Event::Send(Payload::Text("bye".into())))
        );
        assert_eq!(peer.events.recv().await, Some(Event::Close(CLOSE_NORMAL)));
    }

    #[tokio::test]
    async fn session_send_before_accept_is_a_usage_error() {
        let app = ProtocolToNative::new(|_scope: Scope, _receive: ReceiveFn, send: SendFn| async move {
            send(Message::WebsocketSend {
                bytes: Some("early".into()),
                text: None,
            })
            .await
        });
        let (transport, _peer) = pair();
        let err = app.connect(Socket::new(transport)).await.unwrap_err();
        assert!(err.is_usage());
    }

    #[tokio::test]
    async fn session_rejects_http_messages() {
        let app = ProtocolToNative::new(|_scope: Scope, _receive: ReceiveFn, send: SendFn| async move {
            send(Message::start(200, Headers::new())).await
        });
        let (transport, _peer) = pair();
        let err = app.connect(Socket::new(transport)).await.unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[tokio::test]
    async fn session_closed_by_app() {
        let app = ProtocolToNative::new(|_scope: Scope, _receive: ReceiveFn, send: SendFn| async move {
            send(Message::WebsocketClose { code: 4403 }).await
        });
        let (transport, mut peer) = pair();
        app.connect(Socket::new(transport)).await.unwrap();
        assert_eq!(peer.events.recv().await, Some(Event::Close(4403)));
        assert!(peer.events.try_recv().is_err());
    }
}
