//! Stream types for subscription and event delivery.

use crate::message::RoonResponse;
use futures::stream::Stream;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;

type CancelFn = Box<dyn FnOnce() + Send>;

/// A long-lived server-push stream keyed by the request id that opened
/// it.
///
/// Yields one `RoonResponse` per CONTINUE frame; a COMPLETE frame is
/// yielded and then the stream ends. Dropping the stream cancels the
/// subscription upstream (the id is released and an unsubscribe request
/// is fired without waiting for a reply).
pub struct Subscription {
    id: i64,
    receiver: mpsc::UnboundedReceiver<RoonResponse>,
    completed: bool,
    cancel: Option<CancelFn>,
}

impl Subscription {
    pub(crate) fn new(
        id: i64,
        receiver: mpsc::UnboundedReceiver<RoonResponse>,
        cancel: CancelFn,
    ) -> Self {
        Self {
            id,
            receiver,
            completed: false,
            cancel: Some(cancel),
        }
    }

    /// Request id this subscription is keyed by.
    pub fn request_id(&self) -> i64 {
        self.id
    }
}

impl Stream for Subscription {
    type Item = RoonResponse;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.completed {
            return Poll::Ready(None);
        }
        match self.receiver.poll_recv(cx) {
            Poll::Ready(Some(response)) => {
                if response.is_final {
                    self.completed = true;
                }
                Poll::Ready(Some(response))
            }
            Poll::Ready(None) => {
                self.completed = true;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

/// A typed event stream backed by an unbounded channel.
///
/// The producer finishes the stream by dropping its sender; consumers
/// observe the end as the stream yielding `None`.
pub struct EventStream<T> {
    receiver: mpsc::UnboundedReceiver<T>,
}

impl<T> EventStream<T> {
    pub(crate) fn new(receiver: mpsc::UnboundedReceiver<T>) -> Self {
        Self { receiver }
    }
}

impl<T> Stream for EventStream<T> {
    type Item = T;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}
