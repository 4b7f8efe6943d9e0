//! Channel capacity, close and ordering behaviour across threads and jobs.

use proptest::prelude::*;
use scopeline::runtime::ThreadPerTask;
use scopeline::test_utils::{init_test_logging, wait_until};
use scopeline::{assert_with_log, test_complete, test_phase, Channel, RecvError, Scope};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[test]
fn full_channel_blocks_the_next_send_until_a_receive() {
    init_test_logging();
    test_phase!("full_channel_blocks_the_next_send_until_a_receive");
    let channel = Channel::bounded(2);
    channel.send(1).expect("room");
    channel.send(2).expect("room");

    let sent = Arc::new(AtomicUsize::new(0));
    let sender = {
        let channel = channel.clone();
        let sent = Arc::clone(&sent);
        std::thread::spawn(move || {
            for value in 3..=4 {
                channel.send(value).expect("eventually room");
                sent.fetch_add(1, Ordering::SeqCst);
            }
        })
    };

    std::thread::sleep(Duration::from_millis(50));
    assert_with_log!(
        sent.load(Ordering::SeqCst) == 0,
        "send on a full channel waits",
        0,
        sent.load(Ordering::SeqCst)
    );
    assert_eq!(channel.len(), 2);

    assert_eq!(channel.receive().expect("value"), 1);
    assert!(wait_until(Duration::from_secs(2), || sent.load(Ordering::SeqCst) == 1));
    assert_eq!(channel.receive().expect("value"), 2);
    sender.join().expect("sender finished");
    assert_eq!(sent.load(Ordering::SeqCst), 2);
    test_complete!("full_channel_blocks_the_next_send_until_a_receive");
}

#[test]
fn close_drains_backlog_before_reporting_closed() {
    init_test_logging();
    let channel = Channel::bounded(4);
    for value in ["a", "b", "c"] {
        channel.send(value).expect("room");
    }
    assert!(channel.close());
    assert!(!channel.close());
    assert!(channel.try_send("d").is_err());

    let drained: Vec<_> = channel.iter().collect();
    assert_eq!(drained, vec!["a", "b", "c"]);
    assert!(matches!(channel.receive(), Err(RecvError::Closed)));
}

#[test]
fn producer_and_consumer_jobs_hand_off_through_rendezvous() {
    init_test_logging();
    let scope = Scope::with_dispatcher(Arc::new(ThreadPerTask::new()));
    let channel: Channel<u32> = Channel::rendezvous();
    let producer = {
        let channel = channel.clone();
        scope
            .launch(move |_| {
                for value in 0..5 {
                    channel.send(value)?;
                }
                channel.close();
                Ok(())
            })
            .expect("launch")
    };
    let consumer = {
        let channel = channel.clone();
        scope
            .spawn(move |_| {
                let mut sum = 0;
                channel.consume_each(|value| {
                    sum += value;
                    Ok(())
                })?;
                Ok(sum)
            })
            .expect("spawn")
    };
    assert_eq!(consumer.join().expect("consumer"), 10);
    producer.wait().expect("producer");
}

#[test]
fn closing_the_scope_unblocks_a_stuck_sender() {
    init_test_logging();
    let scope = Scope::with_dispatcher(Arc::new(ThreadPerTask::new()));
    let channel = Channel::bounded(1);
    channel.send(0).expect("room");
    let stuck = {
        let channel = channel.clone();
        scope.launch(move |_| Ok(channel.send(1)?)).expect("launch")
    };
    std::thread::sleep(Duration::from_millis(20));
    scope.close();
    let err = stuck.wait().expect_err("cancelled while blocked");
    assert!(err.is_cancelled());
    assert_eq!(channel.len(), 1);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn single_sender_order_is_receive_order(
        values in proptest::collection::vec(any::<u32>(), 0..64),
        capacity in 0usize..8,
    ) {
        let channel = if capacity == 0 {
            Channel::rendezvous()
        } else {
            Channel::bounded(capacity)
        };
        let sender = {
            let channel = channel.clone();
            let values = values.clone();
            std::thread::spawn(move || {
                for value in values {
                    channel.send(value).expect("open");
                }
                channel.close();
            })
        };
        let received: Vec<u32> = channel.iter().collect();
        sender.join().expect("sender finished");
        prop_assert_eq!(received, values);
    }
}
