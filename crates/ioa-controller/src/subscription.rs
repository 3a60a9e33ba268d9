use ioa::property::{PropertyState, PushMessage};

use futures_util::StreamExt;

use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use tokio_util::sync::CancellationToken;

use tracing::{debug, error, info, warn};

use crate::error::Result;

// The capacity of the bounded asynchronous channel.
const ASYNC_CHANNEL_CAPACITY: usize = 10;

type UpdatesStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A subscription to the update channel of a thing.
///
/// A subscription yields a [`PropertyState`] for each property status
/// message pushed by a thing, in arrival order. All other message kinds are
/// skipped.
///
/// The sequence of states ends when the thing closes the channel, when the
/// channel breaks, or when the subscription is cancelled. A subscription is
/// never reopened: once it ends, a new one must be created.
///
/// Dropping a subscription cancels it.
#[derive(Debug)]
pub struct Subscription {
    thing_index: usize,
    receiver: mpsc::Receiver<PropertyState>,
    cancellation_token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl Subscription {
    pub(crate) async fn open(url: &str, thing_index: usize) -> Result<Self> {
        let (stream, _) = connect_async(url).await.map_err(|e| {
            error!("Impossible to open the update channel `{url}` for thing {thing_index}: {e}");
            e
        })?;
        info!("Connected to the update channel `{url}` of thing {thing_index}");

        let (sender, receiver) = mpsc::channel(ASYNC_CHANNEL_CAPACITY);
        let cancellation_token = CancellationToken::new();

        let handle = tokio::spawn(run_subscriber(
            stream,
            thing_index,
            cancellation_token.clone(),
            sender,
        ));

        Ok(Self {
            thing_index,
            receiver,
            cancellation_token,
            handle: Some(handle),
        })
    }

    /// Returns the position of the subscribed thing.
    #[must_use]
    #[inline]
    pub const fn thing_index(&self) -> usize {
        self.thing_index
    }

    /// Waits for the next [`PropertyState`].
    ///
    /// Returns [`None`] when the subscription has ended.
    pub async fn next(&mut self) -> Option<PropertyState> {
        if self.cancellation_token.is_cancelled() {
            return None;
        }

        tokio::select! {
            biased;
            () = self.cancellation_token.cancelled() => None,
            state = self.receiver.recv() => state,
        }
    }

    /// Returns a token which cancels the subscription from another task.
    #[must_use]
    #[inline]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }

    /// Cancels the subscription.
    ///
    /// No further states are yielded after this call.
    #[inline]
    pub fn cancel(&self) {
        self.cancellation_token.cancel();
    }

    /// Checks whether the subscription has been cancelled.
    #[must_use]
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }

    /// Cancels the subscription and waits for the channel to be closed.
    pub async fn close(mut self) {
        self.cancellation_token.cancel();
        if let Some(handle) = self.handle.take()
            && let Err(e) = handle.await
        {
            error!("Failed to await the subscription task: {e}");
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancellation_token.cancel();
    }
}

#[cfg(feature = "stream")]
impl futures_core::Stream for Subscription {
    type Item = PropertyState;

    fn poll_next(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Self::Item>> {
        if self.cancellation_token.is_cancelled() {
            return std::task::Poll::Ready(None);
        }
        self.receiver.poll_recv(cx)
    }
}

#[inline]
fn parse_update(thing_index: usize, payload: &[u8]) -> Option<PropertyState> {
    let message = match serde_json::from_slice::<PushMessage>(payload) {
        Ok(message) => message,
        Err(e) => {
            warn!("Undecodable message from thing {thing_index}, discard it: {e}");
            return None;
        }
    };

    if !message.is_property_status() {
        debug!(
            "Message `{}` from thing {thing_index} ignored",
            message.message_type
        );
        return None;
    }

    let state = message.into_property_state();
    if state.is_none() {
        warn!("Property status from thing {thing_index} without a state, discard it");
    }
    state
}

async fn run_subscriber(
    mut stream: UpdatesStream,
    thing_index: usize,
    cancellation_token: CancellationToken,
    sender: mpsc::Sender<PropertyState>,
) {
    loop {
        let message = tokio::select! {
            // Use the cancellation token to stop the loop
            () = cancellation_token.cancelled() => {
                if let Err(e) = stream.close(None).await {
                    debug!("Update channel of thing {thing_index} not closed cleanly: {e}");
                }
                break;
            }
            // Wait for the next message pushed by the thing
            message = stream.next() => message,
        };

        let message = match message {
            Some(Ok(message)) => message,
            Some(Err(e)) => {
                error!("Update channel of thing {thing_index} dropped: {e}");
                break;
            }
            None => {
                info!("Update channel of thing {thing_index} closed");
                break;
            }
        };

        let state = match message {
            Message::Text(text) => parse_update(thing_index, text.as_bytes()),
            Message::Binary(bytes) => parse_update(thing_index, &bytes),
            Message::Close(frame) => {
                info!("Update channel of thing {thing_index} closed by the peer: {frame:?}");
                break;
            }
            Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => None,
        };

        let Some(state) = state else {
            continue;
        };

        tokio::select! {
            () = cancellation_token.cancelled() => {}
            result = sender.send(state) => {
                if let Err(e) = result {
                    warn!("Stop forwarding the updates of thing {thing_index}: {e}");
                    break;
                }
            }
        }
    }
    drop(sender);
    drop(stream);
}
