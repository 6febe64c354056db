use std::sync::Arc;
use std::thread;
use std::time::Duration;

use edgecam_camera::{Frame, FrameChannel, Submission, Take};

#[test]
fn fast_producer_slow_consumer() {
    const TOTAL: u64 = 500;
    let ch = Arc::new(FrameChannel::new(1).unwrap());

    let producer = {
        let ch = ch.clone();
        thread::spawn(move || {
            let mut last_dropped = 0;
            for seq in 0..TOTAL {
                let outcome = ch.submit(Frame::nv21(vec![0u8; 24], 4, 4, seq));
                assert_ne!(outcome, Submission::Closed);
                // drop counter never goes backwards
                let dropped = ch.dropped();
                assert!(dropped >= last_dropped);
                last_dropped = dropped;
            }
        })
    };

    let mut taken = Vec::new();
    loop {
        match ch.take(Duration::from_millis(50)) {
            Take::Frame(f) => {
                taken.push(f.sequence);
                thread::sleep(Duration::from_micros(200));
            }
            Take::Empty if producer.is_finished() => break,
            Take::Empty => {}
            Take::Shutdown => unreachable!(),
        }
    }
    producer.join().unwrap();
    while let Take::Frame(f) = ch.take(Duration::from_millis(5)) {
        taken.push(f.sequence);
    }

    // arrival order preserved among retained frames
    assert!(taken.windows(2).all(|w| w[0] < w[1]));
    // the last frame submitted is never the one lost
    assert_eq!(taken.last().copied(), Some(TOTAL - 1));
    assert_eq!(taken.len() as u64 + ch.dropped(), TOTAL);
}
