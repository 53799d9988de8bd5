use evoke::{EventDispatcher, Message, ReceiverId, Selector};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::channel;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[test]
fn per_producer_fifo_is_preserved() {
    let selector = Arc::new(Selector::new("fifo").expect("Failed to start selector"));

    let (tx, rx) = channel();
    selector.register_handler(
        1,
        ReceiverId::new(1),
        Arc::new(move |msg: &Arc<Message>| {
            let &(producer, seq) = msg
                .payload::<(u32, u32)>()
                .expect("Message carried no sequence payload");
            let _ = tx.send((producer, seq));
        }),
    );

    let mut producers = Vec::new();
    for producer in 0..2u32 {
        let dispatcher = Arc::clone(&selector);
        producers.push(thread::spawn(move || {
            for seq in 0..100u32 {
                dispatcher
                    .post_message(Message::with_payload(1, (producer, seq)))
                    .expect("Post failed");
            }
        }));
    }
    for producer in producers {
        producer.join().expect("Producer thread panicked");
    }

    let mut next_seq = [0u32; 2];
    for _ in 0..200 {
        let (producer, seq) = rx
            .recv_timeout(Duration::from_secs(2))
            .expect("Dispatch stalled before draining every message");
        assert_eq!(
            seq, next_seq[producer as usize],
            "Messages from one producer arrived out of order"
        );
        next_seq[producer as usize] += 1;
    }

    selector.shutdown().expect("Shutdown failed");
}

#[test]
fn directed_messages_reach_only_their_receiver() {
    let selector = Arc::new(Selector::new("directed").expect("Failed to start selector"));

    let first = ReceiverId::new(1);
    let second = ReceiverId::new(2);

    let (tx, rx) = channel();
    for (name, receiver) in [("first", first), ("second", second)] {
        let tx = tx.clone();
        selector.register_handler(
            5,
            receiver,
            Arc::new(move |_msg| {
                let _ = tx.send(name);
            }),
        );
    }

    selector
        .post_message(Message::directed(5, second))
        .expect("Post failed");
    assert_eq!(
        rx.recv_timeout(Duration::from_secs(1))
            .expect("Directed message was not delivered"),
        "second"
    );
    assert!(
        rx.recv_timeout(Duration::from_millis(200)).is_err(),
        "Directed message reached a foreign receiver"
    );

    // An undirected message of the same kind reaches both, in
    // registration order.
    selector
        .post_message(Message::new(5))
        .expect("Post failed");
    assert_eq!(rx.recv_timeout(Duration::from_secs(1)).unwrap(), "first");
    assert_eq!(rx.recv_timeout(Duration::from_secs(1)).unwrap(), "second");

    selector.shutdown().expect("Shutdown failed");
}

#[test]
fn handler_may_post_into_the_same_drain() {
    let selector = Arc::new(Selector::new("repost").expect("Failed to start selector"));

    let reposted = Arc::new(AtomicBool::new(false));
    let from_handler = Arc::clone(&selector);
    let reposted_flag = Arc::clone(&reposted);
    selector.register_handler(
        1,
        ReceiverId::new(1),
        Arc::new(move |_msg| {
            if !reposted_flag.swap(true, Ordering::SeqCst) {
                from_handler
                    .post_message(Message::new(2))
                    .expect("Re-entrant post failed");
            }
        }),
    );

    let (tx, rx) = channel();
    selector.register_handler(
        2,
        ReceiverId::new(1),
        Arc::new(move |_msg| {
            let _ = tx.send(());
        }),
    );

    selector
        .post_message(Message::new(1))
        .expect("Post failed");
    rx.recv_timeout(Duration::from_secs(1))
        .expect("Re-entrantly posted message never arrived");

    selector.shutdown().expect("Shutdown failed");
}

#[test]
fn unregistered_handlers_are_not_invoked() {
    let selector = Arc::new(Selector::new("unregister").expect("Failed to start selector"));
    let receiver = ReceiverId::new(9);

    let (tx, rx) = channel();
    selector.register_handler(
        3,
        receiver,
        Arc::new(move |_msg| {
            let _ = tx.send(());
        }),
    );

    selector.post_message(Message::new(3)).expect("Post failed");
    rx.recv_timeout(Duration::from_secs(1))
        .expect("Bound handler never ran");

    selector.unregister_handler(3, receiver);
    selector.post_message(Message::new(3)).expect("Post failed");
    assert!(
        rx.recv_timeout(Duration::from_millis(200)).is_err(),
        "Unregistered handler still ran"
    );

    selector.shutdown().expect("Shutdown failed");
}

#[test]
fn unregister_receiver_clears_every_kind() {
    let selector = Arc::new(Selector::new("clear-receiver").expect("Failed to start selector"));
    let receiver = ReceiverId::new(4);
    let other = ReceiverId::new(5);

    let (tx, rx) = channel();
    for kind in [10, 11] {
        let tx = tx.clone();
        selector.register_handler(
            kind,
            receiver,
            Arc::new(move |_msg| {
                let _ = tx.send("cleared");
            }),
        );
    }
    let other_tx = tx.clone();
    selector.register_handler(
        10,
        other,
        Arc::new(move |_msg| {
            let _ = other_tx.send("kept");
        }),
    );

    selector.unregister_receiver(receiver);

    selector.post_message(Message::new(10)).expect("Post failed");
    selector.post_message(Message::new(11)).expect("Post failed");

    assert_eq!(
        rx.recv_timeout(Duration::from_secs(1))
            .expect("Surviving binding never ran"),
        "kept"
    );
    assert!(
        rx.recv_timeout(Duration::from_millis(200)).is_err(),
        "Cleared receiver still ran"
    );

    selector.shutdown().expect("Shutdown failed");
}
