//! Drives a native handler through the protocol, then a protocol app natively.
//!
//! ```text
//! RUST_LOG=debug cargo run --example hello_world
//! ```

use tracing_subscriber::EnvFilter;
use wirebridge::bridge::{Handlers, Native, Protocol};
use wirebridge::http::{Headers, Method, Query};
use wirebridge::protocol::{self, Message, ReceiveFn, Scope, SendFn};
use wirebridge::{Error, Request, Response};

async fn hello(request: Request) -> Result<Response, Error> {
    let name = request.query().get("name").unwrap_or("World").to_owned();
    Ok(Response::text(format!("Hello, {name}!")))
}

async fn hello_app(scope: Scope, _receive: ReceiveFn, send: SendFn) -> Result<(), Error> {
    let query = Query::parse(&scope.query_string);
    let name = query.get("name").unwrap_or("World");
    send(Message::start(200, Headers::new())).await?;
    send(Message::body(format!("Hello from the protocol side, {name}!"), false)).await
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Native handler, driven with protocol messages.
    let app = Native::from(Handlers::new().http(hello)).into_protocol();
    let (to_app, receive) = protocol::queue();
    let (send, from_app) = protocol::queue();
    to_app(Message::HttpRequest {
        body: Default::default(),
        more_body: false,
    })
    .await?;
    app.call(
        Scope::http(Method::Get, "/").with_query_string("name=Jack"),
        receive,
        send,
    )
    .await?;
    while let Ok(message) = from_app().await {
        tracing::info!(kind = message.kind(), "app sent {message:?}");
    }

    // Protocol app, called like a native handler.
    let native = Protocol::new(hello_app).into_native();
    let request = Request::new(Method::Get, "/").with_query(Query::parse("name=Jill"));
    let response = native.handle(request).await?;
    tracing::info!(status = %response.status(), "{}", response.text_body().await?);

    Ok(())
}
