//! # wirebridge
//!
//! A bidirectional bridge between native async request handlers and an
//! event-driven message protocol (`scope`, `receive`, `send`).
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use wirebridge::bridge::{Handlers, Native};
//! use wirebridge::protocol::{self, Message, Scope};
//! use wirebridge::http::Method;
//! use wirebridge::{Request, Response};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), wirebridge::Error> {
//!     let app = Native::from(Handlers::new().http(|_req: Request| async {
//!         Ok(Response::text("Hello, World!"))
//!     }))
//!     .into_protocol();
//!
//!     let (to_app, receive) = protocol::queue();
//!     let (send, from_app) = protocol::queue();
//!     to_app(Message::HttpRequest { body: Default::default(), more_body: false }).await?;
//!     app.call(Scope::http(Method::Get, "/"), receive, send).await?;
//!
//!     while let Ok(message) = from_app().await {
//!         println!("{message:?}");
//!     }
//!     Ok(())
//! }
//! ```

// ── Building blocks ───────────────────────────────────────────────────────────
pub mod error;
pub mod http;
pub mod protocol;
pub mod socket;
pub mod stream;

// ── Bridge directions ─────────────────────────────────────────────────────────
pub mod bridge;

// ── Convenience re-exports ────────────────────────────────────────────────────
pub use bridge::{Handlers, Native, NativeToProtocol, Protocol, ProtocolToNative};
pub use error::Error;
pub use http::{Headers, Method, Request, Response, StatusCode};
pub use socket::{Socket, Transport};
pub use stream::{ByteStream, Chunk};
