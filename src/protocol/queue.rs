use std::sync::Arc;

use futures_util::FutureExt;
use futures_util::future;
use tokio::sync::Mutex;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use super::{Message, ReceiveFn, SendFn};
use crate::Error;

/// An in-memory message queue exposed as a protocol `send`/`receive` pair.
///
/// Useful for driving a protocol app without a transport. Once every clone of the
/// `send` half is dropped and the queue is drained, `receive` fails with
/// [`Error::Disconnect`]; sending after the `receive` half is gone fails the same way.
///
/// ```
/// use wirebridge::protocol::{self, Message};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let (send, receive) = protocol::queue();
/// send(Message::WebsocketConnect).await.unwrap();
/// assert_eq!(receive().await.unwrap(), Message::WebsocketConnect);
/// # }
/// ```
pub fn queue() -> (SendFn, ReceiveFn) {
    let (tx, rx) = mpsc::unbounded_channel();
    (sender(tx), receiver(rx, None))
}

pub(crate) fn sender(tx: UnboundedSender<Message>) -> SendFn {
    Arc::new(move |message| {
        let sent = tx.send(message).map_err(|_| Error::Disconnect);
        future::ready(sent).boxed()
    })
}

/// Wraps the receiving half. A closed and drained queue yields `end` if given,
/// otherwise [`Error::Disconnect`].
pub(crate) fn receiver(rx: UnboundedReceiver<Message>, end: Option<Message>) -> ReceiveFn {
    let rx = Arc::new(Mutex::new(rx));
    Arc::new(move || {
        let rx = Arc::clone(&rx);
        let end = end.clone();
        async move {
            match rx.lock().await.recv().await {
                Some(message) => Ok(message),
                None => end.ok_or(Error::Disconnect),
            }
        }
        .boxed()
    })
}
