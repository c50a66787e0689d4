//! Admission order through the ticket queue, driven from real threads.

use std::sync::{Arc, Mutex, Once};
use std::thread;
use std::time::Duration;

use minstant::Instant;
use serial_test::serial;

use imbridge::sync::Timeout;
use imbridge::sync::ticket::{Ticket, TicketQueue};

static INIT_TRACING: Once = Once::new();

fn init_test_tracing() {
    INIT_TRACING.call_once(|| {
        imbridge::init_tracing();
    });
}

const SLICE: Duration = Duration::from_millis(50);

/// Waits in 50 ms slices, records admission, holds the head briefly, then pops.
fn contender(
    queue: Arc<TicketQueue>,
    ticket: Ticket,
    name: &'static str,
    admitted: Arc<Mutex<Vec<&'static str>>>,
) -> thread::JoinHandle<u32> {
    thread::spawn(move || {
        let mut slices = 0;
        while !queue.wait(ticket, SLICE) {
            slices += 1;
            assert!(slices < 100, "{name} never admitted");
        }
        admitted.lock().unwrap().push(name);
        thread::sleep(Duration::from_millis(80));
        assert_eq!(queue.pop(), Some(ticket));
        slices
    })
}

#[test]
#[serial]
fn a_b_c_are_admitted_in_push_order() {
    init_test_tracing();
    let queue = Arc::new(TicketQueue::new());
    let (a, b, c) = (Ticket::from(1), Ticket::from(2), Ticket::from(3));
    queue.push(a);
    queue.push(b);
    queue.push(c);

    let admitted = Arc::new(Mutex::new(Vec::new()));
    let tb = contender(Arc::clone(&queue), b, "B", Arc::clone(&admitted));
    let tc = contender(Arc::clone(&queue), c, "C", Arc::clone(&admitted));

    // A holds the head for a few slices.
    assert!(queue.is_ready(a));
    thread::sleep(Duration::from_millis(130));
    assert!(admitted.lock().unwrap().is_empty());
    assert_eq!(queue.pop(), Some(a));

    let b_slices = tb.join().unwrap();
    let c_slices = tc.join().unwrap();

    assert_eq!(*admitted.lock().unwrap(), ["B", "C"]);
    assert!(b_slices >= 1, "B must have re-waited while A held the head");
    assert!(c_slices > b_slices, "C must outwait B");
    assert!(queue.is_empty());
}

#[test]
#[serial]
fn pop_wakes_the_next_head_promptly() {
    init_test_tracing();
    let queue = Arc::new(TicketQueue::new());
    let (first, second) = (Ticket::generate(), Ticket::from(0));
    queue.push(first);
    queue.push(second);

    let waiter = {
        let queue = Arc::clone(&queue);
        thread::spawn(move || {
            let ready = queue.wait(second, Duration::from_secs(5));
            (ready, Instant::now())
        })
    };

    thread::sleep(Duration::from_millis(50));
    let popped_at = Instant::now();
    queue.pop();

    let (ready, woke_at) = waiter.join().unwrap();
    assert!(ready);
    assert!(woke_at.duration_since(popped_at) < Duration::from_millis(200));
}

#[test]
#[serial]
fn stuck_head_starves_each_waiter_until_its_own_timeout() {
    init_test_tracing();
    let queue = Arc::new(TicketQueue::new());
    let stuck = Ticket::generate();
    queue.push(stuck);

    let waiters: Vec<_> = [60u64, 120]
        .into_iter()
        .map(|ms| {
            let queue = Arc::clone(&queue);
            let ticket = Ticket::from(ms);
            queue.push(ticket);
            thread::spawn(move || {
                let start = Instant::now();
                let ready = queue.wait_turn(ticket, SLICE, Timeout::Duration(Duration::from_millis(ms)));
                (ready, start.elapsed(), ms)
            })
        })
        .collect();

    for waiter in waiters {
        let (ready, elapsed, ms) = waiter.join().unwrap();
        assert!(!ready);
        assert!(elapsed >= Duration::from_millis(ms - 5), "{ms}: {elapsed:?}");
        assert!(elapsed < Duration::from_millis(ms + 150), "{ms}: {elapsed:?}");
    }
    assert!(queue.is_ready(stuck));
    assert_eq!(queue.len(), 3);
}
