//! The two bridge directions and the sum types that pick between them.
//!
//! - [`NativeToProtocol`] exposes native [`Handlers`] as a protocol app.
//! - [`ProtocolToNative`] exposes a protocol [`App`] as native `handle`/`connect` calls.
//!
//! [`Native`] and [`Protocol`] name "whatever speaks this side". Converting one
//! into the other wraps it in the matching bridge, except when it already is a
//! bridge in the opposite direction: then the wrapper is peeled off and the
//! original comes back untouched.
//!
//! ```
//! use wirebridge::bridge::{Handlers, Native};
//! use wirebridge::{Request, Response};
//!
//! let native = Native::from(Handlers::new().http(|_req: Request| async {
//!     Ok(Response::text("Hello, World!"))
//! }));
//! let protocol = native.into_protocol();
//! // Wrapping back yields the original handlers, not a double bridge.
//! assert!(matches!(protocol.into_native(), Native::Handlers(_)));
//! ```

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures_util::FutureExt;

mod task;
mod to_native;
mod to_protocol;

pub use to_native::ProtocolToNative;
pub use to_protocol::NativeToProtocol;

use crate::Error;
use crate::http::{Request, Response};
use crate::protocol::{App, ReceiveFn, Scope, SendFn};
use crate::socket::Socket;

/// Type-erased native request handler.
pub type HttpHandler = Arc<
    dyn Fn(Request) -> Pin<Box<dyn Future<Output = Result<Response, Error>> + Send>>
        + Send
        + Sync
        + 'static,
>;

/// Type-erased native session handler.
pub type SocketHandler = Arc<
    dyn Fn(Socket) -> Pin<Box<dyn Future<Output = Result<(), Error>> + Send>>
        + Send
        + Sync
        + 'static,
>;

/// The native handlers of one endpoint: at most one per connection kind.
#[derive(Clone, Default)]
pub struct Handlers {
    http: Option<HttpHandler>,
    websocket: Option<SocketHandler>,
}

impl Handlers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the request/response handler.
    #[must_use]
    pub fn http<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Request) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Response, Error>> + Send + 'static,
    {
        let handler: HttpHandler = Arc::new(move |request: Request| f(request).boxed());
        self.http = Some(handler);
        self
    }

    /// Sets the session handler.
    #[must_use]
    pub fn websocket<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Socket) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), Error>> + Send + 'static,
    {
        let handler: SocketHandler = Arc::new(move |socket: Socket| f(socket).boxed());
        self.websocket = Some(handler);
        self
    }

    pub fn http_handler(&self) -> Option<&HttpHandler> {
        self.http.as_ref()
    }

    pub fn websocket_handler(&self) -> Option<&SocketHandler> {
        self.websocket.as_ref()
    }

    pub async fn handle(&self, request: Request) -> Result<Response, Error> {
        match &self.http {
            Some(handler) => handler(request).await,
            None => Err(Error::UnsupportedScope("http".into())),
        }
    }

    pub async fn connect(&self, socket: Socket) -> Result<(), Error> {
        match &self.websocket {
            Some(handler) => handler(socket).await,
            None => Err(Error::UnsupportedScope("websocket".into())),
        }
    }
}

impl fmt::Debug for Handlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handlers")
            .field("http", &self.http.is_some())
            .field("websocket", &self.websocket.is_some())
            .finish()
    }
}

/// Anything callable natively.
#[derive(Clone, Debug)]
pub enum Native {
    Handlers(Handlers),
    Bridged(ProtocolToNative),
}

impl Native {
    pub async fn handle(&self, request: Request) -> Result<Response, Error> {
        match self {
            Self::Handlers(handlers) => handlers.handle(request).await,
            Self::Bridged(bridge) => bridge.handle(request).await,
        }
    }

    pub async fn connect(&self, socket: Socket) -> Result<(), Error> {
        match self {
            Self::Handlers(handlers) => handlers.connect(socket).await,
            Self::Bridged(bridge) => bridge.connect(socket).await,
        }
    }

    /// Exposes this as a protocol app, unwrapping a [`ProtocolToNative`] instead
    /// of bridging it twice.
    pub fn into_protocol(self) -> Protocol {
        match self {
            Self::Handlers(handlers) => Protocol::Bridged(NativeToProtocol::new(handlers)),
            Self::Bridged(bridge) => Protocol::App(bridge.into_app()),
        }
    }
}

impl From<Handlers> for Native {
    fn from(handlers: Handlers) -> Self {
        Self::Handlers(handlers)
    }
}

impl From<ProtocolToNative> for Native {
    fn from(bridge: ProtocolToNative) -> Self {
        Self::Bridged(bridge)
    }
}

/// Anything callable as a protocol app.
#[derive(Clone)]
pub enum Protocol {
    App(Arc<dyn App>),
    Bridged(NativeToProtocol),
}

impl Protocol {
    pub fn new(app: impl App) -> Self {
        Self::App(Arc::new(app))
    }

    pub fn call(
        &self,
        scope: Scope,
        receive: ReceiveFn,
        send: SendFn,
    ) -> Pin<Box<dyn Future<Output = Result<(), Error>> + Send>> {
        match self {
            Self::App(app) => app.call(scope, receive, send),
            Self::Bridged(bridge) => bridge.call(scope, receive, send),
        }
    }

    /// Exposes this natively, unwrapping a [`NativeToProtocol`] instead of
    /// bridging it twice.
    pub fn into_native(self) -> Native {
        match self {
            Self::App(app) => Native::Bridged(ProtocolToNative::from_arc(app)),
            Self::Bridged(bridge) => Native::Handlers(bridge.into_handlers()),
        }
    }

    /// Erases the variant into a plain app, e.g. to hand it to a server.
    pub fn into_app(self) -> Arc<dyn App> {
        match self {
            Self::App(app) => app,
            Self::Bridged(bridge) => Arc::new(move |scope: Scope, receive: ReceiveFn, send: SendFn| {
                bridge.call(scope, receive, send)
            }),
        }
    }
}

impl fmt::Debug for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::App(_) => f.write_str("Protocol::App(..)"),
            Self::Bridged(bridge) => f.debug_tuple("Protocol::Bridged").field(bridge).finish(),
        }
    }
}

impl From<NativeToProtocol> for Protocol {
    fn from(bridge: NativeToProtocol) -> Self {
        Self::Bridged(bridge)
    }
}
