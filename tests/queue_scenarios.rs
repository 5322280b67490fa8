//! End-to-end bounded queue and consuming stream scenarios.

use std::time::Duration;

use crossbeam_queue::SegQueue;
use fairsync::test_utils::{block_on, init_test_logging};
use fairsync::{BoundedQueue, CancelSource, CancelToken, TakeError};

fn prefilled(values: &[u32]) -> SegQueue<u32> {
    let backing = SegQueue::new();
    for &v in values {
        backing.push(v);
    }
    backing
}

#[test]
fn full_queue_applies_backpressure_until_cancel() {
    init_test_logging();
    let queue =
        BoundedQueue::with_backing(prefilled(&[1, 2, 3]), Some(3)).expect("construct");
    assert_eq!(queue.len(), 3);

    let source = CancelSource::new();
    source.cancel_after(Duration::from_secs(1));
    let token = source.token();
    let result = block_on(queue.add(0, &token));
    assert!(result.is_err(), "add into a full queue must cancel");
    assert_eq!(queue.len(), 3, "failed add must not consume capacity");
}

#[test]
fn consuming_stream_yields_prefill_then_cancels() {
    init_test_logging();
    let queue =
        BoundedQueue::with_backing(prefilled(&[1, 2, 3]), Some(3)).expect("construct");
    let mut stream = queue.consuming_stream().expect("stream");

    block_on(async {
        for expected in [1, 2, 3] {
            let got = stream.next(&CancelToken::never()).await.expect("next failed");
            assert_eq!(got, expected);
        }

        let source = CancelSource::new();
        source.cancel_after(Duration::from_secs(1));
        let token = source.token();
        assert_eq!(stream.next(&token).await, Err(TakeError::Cancelled));
    });
}

#[test]
fn elements_are_conserved_across_producers_and_consumers() {
    init_test_logging();
    use std::sync::Arc;

    const PRODUCERS: usize = 4;
    const PER_PRODUCER: usize = 100;

    let queue = Arc::new(BoundedQueue::bounded(5).expect("construct"));
    let producers: Vec<_> = (0..PRODUCERS)
        .map(|p| {
            let queue = Arc::clone(&queue);
            std::thread::spawn(move || {
                let cancel = CancelToken::never();
                for i in 0..PER_PRODUCER {
                    let value = (p * PER_PRODUCER + i) as u32;
                    block_on(queue.add(value, &cancel)).expect("add failed");
                }
            })
        })
        .collect();

    let mut seen = std::collections::BTreeSet::new();
    let cancel = CancelToken::never();
    for _ in 0..PRODUCERS * PER_PRODUCER {
        let value = block_on(queue.take(&cancel)).expect("take failed");
        assert!(seen.insert(value), "duplicate element {value}");
    }
    assert_eq!(seen.len(), PRODUCERS * PER_PRODUCER);
    assert!(queue.is_empty());

    for producer in producers {
        producer.join().expect("producer panicked");
    }
}
