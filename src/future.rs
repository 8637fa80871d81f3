//! `await` support for completion events.

use crate::error::CommandError;
use crate::event::CompletionEvent;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

/// Future resolving when its event does. Obtained from
/// [`CompletionEvent::completed`].
#[derive(Debug)]
pub struct EventFuture {
    event: CompletionEvent,
}

impl CompletionEvent {
    /// Await this event's outcome instead of registering a callback.
    ///
    /// Polling starts the event's waiter the same way `then` does, so an
    /// awaited event needs no other registrant.
    pub fn completed(&self) -> EventFuture {
        EventFuture {
            event: self.clone(),
        }
    }
}

impl Future for EventFuture {
    type Output = std::result::Result<(), CommandError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match self.event.poll_completion(cx.waker()) {
            Some(None) => Poll::Ready(Ok(())),
            Some(Some(error)) => Poll::Ready(Err(error)),
            None => Poll::Pending,
        }
    }
}
