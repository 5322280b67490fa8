//! Concurrent settlement of handler futures.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::task::{Context, Poll};

use super::handler::{HandlerFailure, HandlerFuture};

enum Slot {
    Pending(HandlerFuture),
    Done(Result<(), HandlerFailure>),
    Taken,
}

/// Future that drives every handler future to settlement.
///
/// All handlers make progress on every poll; a panicking handler is
/// caught at its poll site and recorded as a failure, so it cannot
/// suppress the remaining handlers.
pub(crate) struct JoinHandlers {
    slots: Vec<Slot>,
    remaining: usize,
}

pub(crate) fn join_handlers(futures: Vec<HandlerFuture>) -> JoinHandlers {
    let remaining = futures.len();
    JoinHandlers {
        slots: futures.into_iter().map(Slot::Pending).collect(),
        remaining,
    }
}

impl Future for JoinHandlers {
    type Output = Vec<Result<(), HandlerFailure>>;

    fn poll(self: Pin<&mut Self>, ctx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        for slot in &mut this.slots {
            if let Slot::Pending(fut) = slot {
                let outcome =
                    std::panic::catch_unwind(AssertUnwindSafe(|| fut.as_mut().poll(ctx)));
                match outcome {
                    Ok(Poll::Pending) => {}
                    Ok(Poll::Ready(result)) => {
                        *slot = Slot::Done(result.map_err(HandlerFailure::Failed));
                        this.remaining -= 1;
                    }
                    Err(payload) => {
                        let payload_ref: &(dyn std::any::Any + Send) = &*payload;
                        *slot = Slot::Done(Err(HandlerFailure::Panicked(panic_text(payload_ref))));
                        this.remaining -= 1;
                    }
                }
            }
        }
        if this.remaining > 0 {
            return Poll::Pending;
        }
        let results = this
            .slots
            .iter_mut()
            .map(|slot| match std::mem::replace(slot, Slot::Taken) {
                Slot::Done(result) => result,
                Slot::Pending(_) | Slot::Taken => unreachable!("handler slot not settled"),
            })
            .collect();
        Poll::Ready(results)
    }
}

fn panic_text(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "opaque panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::block_on;

    fn ok_handler() -> HandlerFuture {
        Box::pin(async { Ok(()) })
    }

    fn failing_handler() -> HandlerFuture {
        Box::pin(async { Err("deliberate".into()) })
    }

    fn panicking_handler() -> HandlerFuture {
        Box::pin(async { panic!("deliberate panic") })
    }

    #[test]
    fn settles_all_in_order() {
        let results = block_on(join_handlers(vec![
            failing_handler(),
            ok_handler(),
            ok_handler(),
        ]));
        assert_eq!(results.len(), 3);
        assert!(results[0].is_err());
        assert!(results[1].is_ok());
        assert!(results[2].is_ok());
    }

    #[test]
    fn empty_join_settles_immediately() {
        let results = block_on(join_handlers(Vec::new()));
        assert!(results.is_empty());
    }

    #[test]
    fn panicking_handler_does_not_suppress_others() {
        let results = block_on(join_handlers(vec![panicking_handler(), ok_handler()]));
        assert_eq!(results.len(), 2);
        match &results[0] {
            Err(HandlerFailure::Panicked(text)) => assert!(text.contains("deliberate")),
            other => panic!("expected panic failure, got {other:?}"),
        }
        assert!(results[1].is_ok());
    }
}
