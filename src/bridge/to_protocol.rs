//! Exposes native handlers as a protocol app.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use futures_util::stream::{self, Stream, StreamExt};
use tracing::debug;

use super::{Handlers, HttpHandler, SocketHandler};
use crate::Error;
use crate::http::{Headers, Query, Request, Response};
use crate::protocol::{Message, ReceiveFn, Scope, ScopeKind, SendFn, ZERO_COPY_SEND};
use crate::socket::{CLOSE_NORMAL, Payload, Socket, Transport};
use crate::stream::{ByteStream, Chunk};

/// Native handlers wearing the `(scope, receive, send)` signature.
///
/// For `http` scopes the request body is pulled from `receive` on demand and the
/// response is framed as one `http.response.start`, one `http.response.body` per
/// chunk (`more_body: true`), and a final empty `http.response.body`
/// (`more_body: false`). A disconnect at any point ends the exchange quietly.
///
/// For `websocket` scopes the session handler gets a [`Socket`] bound to the
/// connection's queues.
#[derive(Clone, Debug)]
pub struct NativeToProtocol {
    handlers: Handlers,
}

impl NativeToProtocol {
    pub fn new(handlers: Handlers) -> Self {
        Self { handlers }
    }

    pub fn handlers(&self) -> &Handlers {
        &self.handlers
    }

    pub fn into_handlers(self) -> Handlers {
        self.handlers
    }

    /// Serves one connection.
    pub fn call(
        &self,
        scope: Scope,
        receive: ReceiveFn,
        send: SendFn,
    ) -> Pin<Box<dyn Future<Output = Result<(), Error>> + Send>> {
        let handlers = self.handlers.clone();
        Box::pin(async move {
            match scope.kind {
                ScopeKind::Http => match handlers.http {
                    Some(handler) => serve_http(handler, scope, receive, send).await,
                    None => Err(Error::UnsupportedScope(scope.kind.as_str().into())),
                },
                ScopeKind::Websocket => match handlers.websocket {
                    Some(handler) => serve_session(handler, scope, receive, send).await,
                    None => Err(Error::UnsupportedScope(scope.kind.as_str().into())),
                },
                ScopeKind::Lifespan => Err(Error::UnsupportedScope(scope.kind.as_str().into())),
            }
        })
    }
}

async fn serve_http(
    handler: HttpHandler,
    scope: Scope,
    receive: ReceiveFn,
    send: SendFn,
) -> Result<(), Error> {
    let zero_copy = scope.supports(ZERO_COPY_SEND);
    let request = Request::new(scope.method, scope.path)
        .with_query(Query::parse(&scope.query_string))
        .with_headers(scope.headers)
        .with_body(ByteStream::from_stream(request_body(receive)));

    debug!(method = %request.method(), path = %request.path(), "dispatching request");

    let exchange = async {
        let response = handler(request).await?;
        send_response(response, &send, zero_copy).await
    };
    match exchange.await {
        Err(Error::Disconnect) => {
            debug!("client disconnected");
            Ok(())
        }
        other => other,
    }
}

// Pulls `http.request` messages until `more_body` is false.
fn request_body(receive: ReceiveFn) -> impl Stream<Item = Result<Bytes, Error>> + Send {
    stream::unfold(Some(receive), |state| async move {
        let receive = state?;
        loop {
            match receive().await {
                Ok(Message::HttpRequest { body, more_body }) => {
                    if body.is_empty() {
                        if more_body {
                            continue;
                        }
                        return None;
                    }
                    let next = more_body.then_some(receive);
                    return Some((Ok(body), next));
                }
                Ok(Message::HttpDisconnect) => return Some((Err(Error::Disconnect), None)),
                Ok(other) => return Some((Err(Error::unexpected(&other)), None)),
                Err(e) => return Some((Err(e), None)),
            }
        }
    })
}

async fn send_response(response: Response, send: &SendFn, zero_copy: bool) -> Result<(), Error> {
    let (status, headers, body) = response.into_parts();
    debug!(status = status.as_u16(), "sending response");
    send(Message::start(status.as_u16(), headers)).await?;

    if zero_copy {
        let mut chunks = body.raw_chunks();
        while let Some(chunk) = chunks.next().await {
            let message = match chunk? {
                Chunk::Bytes(bytes) => Message::body(bytes, true),
                Chunk::File(file) => Message::HttpResponseZeroCopySend {
                    file: file.path().to_path_buf(),
                    offset: file.start(),
                    count: file.count(),
                    more_body: true,
                },
            };
            send(message).await?;
        }
    } else {
        let mut chunks = body.chunks();
        while let Some(chunk) = chunks.next().await {
            send(Message::body(chunk?, true)).await?;
        }
    }

    send(Message::body(Bytes::new(), false)).await
}

async fn serve_session(
    handler: SocketHandler,
    scope: Scope,
    receive: ReceiveFn,
    send: SendFn,
) -> Result<(), Error> {
    let transport = Arc::new(ProtocolTransport::new(receive, send.clone()));
    let socket = Socket::from_arc(transport.clone())
        .with_path(scope.path)
        .with_query(Query::parse(&scope.query_string))
        .with_headers(scope.headers);

    debug!(path = %socket.path(), "dispatching session");

    match handler(socket).await {
        Ok(()) if transport.is_finished() => Ok(()),
        Ok(()) => {
            debug!("session handler returned without closing, closing normally");
            match send(Message::WebsocketClose { code: CLOSE_NORMAL }).await {
                Err(Error::Disconnect) => Ok(()),
                other => other,
            }
        }
        Err(Error::Disconnect) => {
            debug!("peer disconnected");
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// Session primitives over the protocol queues.
struct ProtocolTransport {
    receive: ReceiveFn,
    send: SendFn,
    connected: AtomicBool,
    finished: AtomicBool,
}

impl ProtocolTransport {
    fn new(receive: ReceiveFn, send: SendFn) -> Self {
        Self {
            receive,
            send,
            connected: AtomicBool::new(false),
            finished: AtomicBool::new(false),
        }
    }

    // Closed locally or by the peer.
    fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    fn disconnected(&self) -> Error {
        self.finished.store(true, Ordering::SeqCst);
        Error::Disconnect
    }

    // The first inbound message of a session is `websocket.connect`.
    async fn handshake(&self) -> Result<(), Error> {
        if self.connected.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        match (self.receive)().await? {
            Message::WebsocketConnect => Ok(()),
            Message::WebsocketDisconnect { .. } | Message::WebsocketClose { .. } => {
                Err(self.disconnected())
            }
            other => Err(Error::unexpected(&other)),
        }
    }
}

impl Transport for ProtocolTransport {
    fn accept(&self, headers: Headers) -> Pin<Box<dyn Future<Output = Result<(), Error>> + Send + '_>> {
        Box::pin(async move {
            self.handshake().await?;
            (self.send)(Message::WebsocketAccept { headers }).await
        })
    }

    fn close(&self, code: u16) -> Pin<Box<dyn Future<Output = Result<(), Error>> + Send + '_>> {
        Box::pin(async move {
            // Rejecting a fresh session still consumes its `websocket.connect`.
            self.handshake().await?;
            self.finished.store(true, Ordering::SeqCst);
            (self.send)(Message::WebsocketClose { code }).await
        })
    }

    fn receive(&self) -> Pin<Box<dyn Future<Output = Result<Payload, Error>> + Send + '_>> {
        Box::pin(async move {
            match (self.receive)().await {
                Ok(Message::WebsocketReceive { bytes, text }) => Payload::from_parts(bytes, text),
                Ok(Message::WebsocketDisconnect { .. } | Message::WebsocketClose { .. })
                | Err(Error::Disconnect) => {
                    Err(self.disconnected())
                }
                Ok(other) => Err(Error::unexpected(&other)),
                Err(e) => Err(e),
            }
        })
    }

    fn send(&self, payload: Payload) -> Pin<Box<dyn Future<Output = Result<(), Error>> + Send + '_>> {
        Box::pin(async move {
            let (bytes, text) = payload.into_parts();
            (self.send)(Message::WebsocketSend { bytes, text }).await
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures_util::FutureExt;
    use serde_json::json;

    use super::*;
    use crate::http::{Method, StatusCode};
    use crate::protocol;
    use crate::stream::SendFile;

    // Drives `bridge` with the given inbound messages and collects everything it sends.
    async fn run(
        bridge: &NativeToProtocol,
        scope: Scope,
        inbound: Vec<Message>,
    ) -> (Result<(), Error>, Vec<Message>) {
        let (to_app, receive) = protocol::queue();
        let (send, from_app) = protocol::queue();
        for message in inbound {
            to_app(message).await.unwrap();
        }
        let result = bridge.call(scope, receive, send).await;
        let mut sent = Vec::new();
        while let Some(Ok(message)) = from_app().now_or_never() {
            sent.push(message);
        }
        (result, sent)
    }

    fn hello() -> NativeToProtocol {
        NativeToProtocol::new(Handlers::new().http(|request: Request| async move {
            let name = request.query().get("name").unwrap_or("World").to_owned();
            Ok(Response::text(format!("Hello, {name}!")))
        }))
    }

    #[tokio::test]
    async fn hello_world_framing() {
        let (result, sent) = run(&hello(), Scope::http(Method::Get, "/"), vec![]).await;
        result.unwrap();

        let mut headers = Headers::new();
        headers.insert("content-type", "text/plain; charset=utf-8");
        assert_eq!(
            sent,
            vec![
                Message::start(200, headers),
                Message::body("Hello, World!", true),
                Message::body(Bytes::new(), false),
            ]
        );
    }

    #[tokio::test]
    async fn query_string_reaches_the_handler() {
        let scope = Scope::http(Method::Get, "/").with_query_string("name=Jack");
        let (_, sent) = run(&hello(), scope, vec![]).await;
        assert_eq!(sent[1], Message::body("Hello, Jack!", true));
    }

    #[tokio::test]
    async fn request_body_is_pulled_from_receive() {
        let echo = NativeToProtocol::new(Handlers::new().http(|request: Request| async move {
            let body = request.body().await?;
            Ok(Response::new(StatusCode::CREATED).with_body(body))
        }));
        let inbound = vec![
            Message::HttpRequest {
                body: "foo".into(),
                more_body: true,
            },
            Message::HttpRequest {
                body: Bytes::new(),
                more_body: true,
            },
            Message::HttpRequest {
                body: "bar".into(),
                more_body: false,
            },
        ];
        let (result, sent) = run(&echo, Scope::http(Method::Post, "/echo"), inbound).await;
        result.unwrap();
        assert_eq!(sent[0], Message::start(201, Default::default()));
        assert_eq!(sent[1], Message::body("foobar", true));
        assert_eq!(sent.len(), 3);
    }

    #[tokio::test]
    async fn disconnect_mid_handler_sends_nothing() {
        let bridge = NativeToProtocol::new(Handlers::new().http(|request: Request| async move {
            request.body().await?;
            Ok(Response::text("unreachable"))
        }));
        let inbound = vec![
            Message::HttpRequest {
                body: "partial".into(),
                more_body: true,
            },
            Message::HttpDisconnect,
        ];
        let (result, sent) = run(&bridge, Scope::http(Method::Post, "/"), inbound).await;
        result.unwrap();
        assert!(sent.is_empty());
    }

    #[tokio::test]
    async fn unexpected_request_message_is_a_protocol_error() {
        let bridge = NativeToProtocol::new(Handlers::new().http(|request: Request| async move {
            request.body().await?;
            Ok(Response::default())
        }));
        let inbound = vec![Message::WebsocketConnect];
        let (result, sent) = run(&bridge, Scope::http(Method::Post, "/"), inbound).await;
        assert!(matches!(result, Err(Error::Protocol(_))));
        assert!(sent.is_empty());
    }

    #[tokio::test]
    async fn handler_error_is_forwarded() {
        let bridge = NativeToProtocol::new(Handlers::new().http(|_request: Request| async move {
            Err::<Response, _>(Error::app(std::io::Error::other("database down")))
        }));
        let (result, sent) = run(&bridge, Scope::http(Method::Get, "/"), vec![]).await;
        assert_eq!(result.unwrap_err().to_string(), "database down");
        assert!(sent.is_empty());
    }

    #[tokio::test]
    async fn file_chunks_use_zero_copy_when_advertised() {
        let path = std::env::temp_dir().join("wirebridge-zero-copy.txt");
        let bridge = NativeToProtocol::new(Handlers::new().http({
            let path = path.clone();
            move |_request: Request| {
                let path = path.clone();
                async move {
                    let body = ByteStream::from_chunks([SendFile::new(path).offset(3).size(Some(4))]);
                    Ok(Response::from_body(body))
                }
            }
        }));
        let scope = Scope::http(Method::Get, "/file").with_extension(ZERO_COPY_SEND);
        let (result, sent) = run(&bridge, scope, vec![]).await;
        result.unwrap();
        assert_eq!(
            sent[1],
            Message::HttpResponseZeroCopySend {
                file: path,
                offset: 3,
                count: Some(4),
                more_body: true,
            }
        );
        assert_eq!(sent[2], Message::body(Bytes::new(), false));
    }

    #[tokio::test]
    async fn unsupported_scopes() {
        let (result, _) = run(&hello(), Scope::lifespan(), vec![]).await;
        assert!(matches!(result, Err(Error::UnsupportedScope(kind)) if kind == "lifespan"));

        let (result, _) = run(&hello(), Scope::websocket("/ws"), vec![]).await;
        assert!(matches!(result, Err(Error::UnsupportedScope(kind)) if kind == "websocket"));
    }

    fn echo_session() -> NativeToProtocol {
        NativeToProtocol::new(Handlers::new().websocket(|mut socket: Socket| async move {
            socket.accept().await?;
            let text = socket.receive_text().await?;
            socket.send_text(text.to_uppercase()).await?;
            let value: serde_json::Value = socket.receive_json().await?;
            socket.send_json(&value).await?;
            socket.send_bytes(&b"baz"[..]).await?;
            Ok(())
        }))
    }

    #[tokio::test]
    async fn session_round_trip_and_auto_close() {
        let inbound = vec![
            Message::WebsocketConnect,
            Message::WebsocketReceive {
                bytes: None,
                text: Some("foo".into()),
            },
            Message::WebsocketReceive {
                bytes: Some(r#"{"a":1}"#.into()),
                text: None,
            },
        ];
        let (result, sent) = run(&echo_session(), Scope::websocket("/ws"), inbound).await;
        result.unwrap();
        assert_eq!(
            sent,
            vec![
                Message::WebsocketAccept {
                    headers: Default::default()
                },
                Message::WebsocketSend {
                    bytes: None,
                    text: Some("FOO".into())
                },
                Message::WebsocketSend {
                    bytes: None,
                    text: Some(json!({"a": 1}).to_string())
                },
                Message::WebsocketSend {
                    bytes: Some(Bytes::from_static(b"baz")),
                    text: None
                },
                Message::WebsocketClose { code: 1000 },
            ]
        );
    }

    #[tokio::test]
    async fn session_peer_disconnect_is_quiet() {
        let inbound = vec![
            Message::WebsocketConnect,
            Message::WebsocketDisconnect { code: 1001 },
        ];
        let (result, sent) = run(&echo_session(), Scope::websocket("/ws"), inbound).await;
        result.unwrap();
        assert_eq!(
            sent,
            vec![Message::WebsocketAccept {
                headers: Default::default()
            }]
        );
    }

    #[tokio::test]
    async fn session_closed_by_handler_is_not_closed_twice() {
        let bridge = NativeToProtocol::new(Handlers::new().websocket(|mut socket: Socket| async move {
            socket.close(4000).await
        }));
        let (result, sent) = run(&bridge, Scope::websocket("/ws"), vec![Message::WebsocketConnect]).await;
        result.unwrap();
        assert_eq!(sent, vec![Message::WebsocketClose { code: 4000 }]);
    }

    #[tokio::test]
    async fn session_peer_close_reads_as_disconnect() {
        let inbound = vec![
            Message::WebsocketConnect,
            Message::WebsocketClose { code: 1000 },
        ];
        let (result, sent) = run(&echo_session(), Scope::websocket("/ws"), inbound).await;
        result.unwrap();
        // The peer already closed, so no close is sent back.
        assert_eq!(
            sent,
            vec![Message::WebsocketAccept {
                headers: Default::default()
            }]
        );
    }

    #[tokio::test]
    async fn close_before_accept_consumes_the_handshake() {
        let bridge = NativeToProtocol::new(Handlers::new().websocket(|mut socket: Socket| async move {
            socket.close(CLOSE_NORMAL).await
        }));
        let (to_app, receive) = protocol::queue();
        let (send, from_app) = protocol::queue();
        to_app(Message::WebsocketConnect).await.unwrap();

        let leftover = Arc::clone(&receive);
        bridge
            .call(Scope::websocket("/missing"), receive, send)
            .await
            .unwrap();

        assert_eq!(
            from_app().now_or_never().unwrap().unwrap(),
            Message::WebsocketClose { code: CLOSE_NORMAL }
        );
        // `websocket.connect` was read before the close went out.
        assert!(leftover().now_or_never().is_none());
    }

    #[tokio::test]
    async fn session_usage_error_reaches_the_caller() {
        let bridge = NativeToProtocol::new(Handlers::new().websocket(|mut socket: Socket| async move {
            socket.accept().await?;
            socket.accept().await
        }));
        let inbound = vec![Message::WebsocketConnect];
        let (result, _) = tokio::time::timeout(
            Duration::from_secs(1),
            run(&bridge, Scope::websocket("/ws"), inbound),
        )
        .await
        .unwrap();
        assert!(result.unwrap_err().is_usage());
    }
}
