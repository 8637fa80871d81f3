//! Load tests: many in-flight events across several queues.

use rand::Rng;
use silica::dispatch::{self, Dispatcher};
use silica::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn pump_until<F: Fn() -> bool>(d: &Dispatcher, done: F) {
    let deadline = Instant::now() + Duration::from_secs(30);
    while !done() {
        assert!(Instant::now() < deadline, "timed out");
        d.run_one(Duration::from_millis(20));
    }
}

#[test]
fn many_events_across_mixed_queues() {
    let ctx = Context::host(Config::builder().device_lanes(4).build().unwrap()).unwrap();
    let device = ctx.default_device();

    let queues = vec![
        device.new_queue(QueueProps::default()).unwrap(),
        device.new_queue(QueueProps::default()).unwrap(),
        device.new_queue(QueueProps::default().out_of_order()).unwrap(),
        device.new_queue(QueueProps::default().out_of_order()).unwrap(),
    ];

    let mut rng = rand::thread_rng();
    let d = Dispatcher::new();
    let delivered = Arc::new(AtomicUsize::new(0));

    const PER_QUEUE: usize = 50;
    let total = queues.len() * PER_QUEUE;

    dispatch::with_thread_default(&d, || {
        for queue in &queues {
            let buffer = ctx.create_buffer(MemFlags::ReadWrite, 256).unwrap();
            for _ in 0..PER_QUEUE {
                let offset = rng.gen_range(0..128usize);
                let len = rng.gen_range(1..=128usize);
                let data = vec![0xAB; len];

                let event = buffer.write(queue, &data, offset, &[]);
                let counter = Arc::clone(&delivered);
                event.then(move |_, error| {
                    assert!(error.is_none());
                    counter.fetch_add(1, Ordering::SeqCst);
                });
            }
        }
    });

    pump_until(&d, || delivered.load(Ordering::SeqCst) == total);
}

#[test]
fn long_dependency_chain_executes_in_order() {
    let ctx = Context::host(Config::builder().device_lanes(4).build().unwrap()).unwrap();
    let queue = ctx
        .default_device()
        .new_queue(QueueProps::default().out_of_order())
        .unwrap();
    let buffer = ctx.create_buffer(MemFlags::ReadWrite, 1).unwrap();

    // Each link overwrites the single byte; the chain forces sequencing
    // even on an out-of-order queue.
    let mut previous: Option<CompletionEvent> = None;
    for value in 1..=50u8 {
        let event = match &previous {
            None => buffer.write(&queue, &[value], 0, &[]),
            Some(prev) => buffer.write(&queue, &[value], 0, &[prev]),
        };
        assert!(event.error().is_none());
        previous = Some(event);
    }

    let mut out = [0u8; 1];
    buffer
        .read_sync(&queue, &mut out, 0, &[previous.as_ref().unwrap()])
        .unwrap();
    assert_eq!(out[0], 50);
}

#[test]
fn concurrent_registrants_from_many_threads_all_fire() {
    let ctx = Context::host(Config::default()).unwrap();
    let queue = ctx
        .default_device()
        .new_queue(QueueProps::default())
        .unwrap();

    // Hold the lane so every registration below lands on a pending event.
    let gate = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let flag = Arc::clone(&gate);
    let source = ProgramSource::new().define("hold", move |_, _| {
        while !flag.load(Ordering::Acquire) {
            std::thread::sleep(Duration::from_millis(1));
        }
    });
    let kernel = ctx.build_program(source).unwrap().kernel("hold").unwrap();
    let event = kernel.run(&queue, 1, 0, &[]);

    let delivered = Arc::new(AtomicUsize::new(0));
    let mut handles = Vec::new();
    for _ in 0..8 {
        let event = event.clone();
        let counter = Arc::clone(&delivered);
        handles.push(std::thread::spawn(move || {
            // Each registrant thread delivers on the global dispatcher.
            event.then(move |_, error| {
                assert!(error.is_none());
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(event.waiter_count(), 1);

    gate.store(true, Ordering::Release);
    pump_until(&Dispatcher::global(), || {
        delivered.load(Ordering::SeqCst) == 8
    });
}
