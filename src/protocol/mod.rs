//! The event-driven side of the bridge.
//!
//! A protocol app is an async entry point `app(scope, receive, send)`: it learns
//! about the connection from a [`Scope`], pulls inbound [`Message`]s by calling
//! `receive()`, and emits outbound ones by calling `send(message)`.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

mod message;
mod queue;
mod scope;

pub use message::Message;
pub use queue::queue;
pub(crate) use queue::{receiver, sender};
pub use scope::{Scope, ScopeKind, ZERO_COPY_SEND};

use crate::Error;

/// Pulls the next inbound message.
pub type ReceiveFn =
    Arc<dyn Fn() -> Pin<Box<dyn Future<Output = Result<Message, Error>> + Send>> + Send + Sync>;

/// Emits one outbound message.
pub type SendFn =
    Arc<dyn Fn(Message) -> Pin<Box<dyn Future<Output = Result<(), Error>> + Send>> + Send + Sync>;

/// A protocol-driven entry point.
///
/// Any `Fn(Scope, ReceiveFn, SendFn) -> impl Future<Output = Result<(), Error>>` that is
/// `Send + Sync + 'static` implements this trait through the blanket impl below.
pub trait App: Send + Sync + 'static {
    fn call(
        &self,
        scope: Scope,
        receive: ReceiveFn,
        send: SendFn,
    ) -> Pin<Box<dyn Future<Output = Result<(), Error>> + Send>>;
}

impl<T, F> App for T
where
    T: Fn(Scope, ReceiveFn, SendFn) -> F + Send + Sync + 'static,
    F: Future<Output = Result<(), Error>> + Send + 'static,
{
    fn call(
        &self,
        scope: Scope,
        receive: ReceiveFn,
        send: SendFn,
    ) -> Pin<Box<dyn Future<Output = Result<(), Error>> + Send>> {
        Box::pin((self)(scope, receive, send))
    }
}
