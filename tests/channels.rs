use rstest::{fixture, rstest};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use wrapbuf::{CopyChannel, DirectChannel, WrapBufError};

const TIMEOUT: Duration = Duration::from_millis(100);
const FLOATS_PER_RECORD: usize = 1234;

#[fixture]
fn direct_channel() -> DirectChannel {
    // Records of 1234 f32s, up to 3 records per op, slack of 2.
    DirectChannel::new(FLOATS_PER_RECORD * 4, 3, 3, 2).unwrap()
}

fn write_record(ptr: *mut u8, value: f32) {
    unsafe {
        let floats = ptr as *mut f32;
        for i in 0..FLOATS_PER_RECORD {
            floats.add(i).write(value);
        }
    }
}

fn record_bounds(ptr: *const u8, record: usize) -> (f32, f32) {
    unsafe {
        let floats = (ptr as *const f32).add(record * FLOATS_PER_RECORD);
        (floats.read(), floats.add(FLOATS_PER_RECORD - 1).read())
    }
}

#[rstest]
fn direct_channel_sizing(direct_channel: DirectChannel) {
    assert!(direct_channel.region_bytes() >= FLOATS_PER_RECORD * 4 * 9);
    assert!(direct_channel.num_elems() >= direct_channel.max_elems_per_write());
    assert!(direct_channel.num_elems() >= direct_channel.max_elems_per_read());
    if direct_channel.layout().page_size() == 4096 {
        assert_eq!(direct_channel.num_elems(), 9);
    }
}

#[rstest]
fn direct_fill_drain_and_straddle(direct_channel: DirectChannel) {
    let channel = direct_channel;
    let n = channel.num_elems();
    let max_write = channel.max_elems_per_write();

    // Grab before any reader registration: the writer record exists, but
    // reader ids do not.
    assert!(matches!(
        channel.grab_read(1, 1, Duration::from_millis(1)).unwrap_err(),
        WrapBufError::UnknownId(1)
    ));

    // Fill the buffer one record at a time, reading each span back through
    // the grab pointer before releasing it.
    for i in 0..n {
        let ptr = channel.grab_write(1).unwrap();
        write_record(ptr.as_ptr(), i as f32);
        let (first, last) = record_bounds(ptr.as_ptr(), 0);
        assert_eq!(first, i as f32);
        assert_eq!(last, i as f32);
        channel.release_write().unwrap();
    }
    assert!(matches!(
        channel.grab_write(1).unwrap_err(),
        WrapBufError::NoSpace { .. }
    ));

    // Drain and verify.
    let reader = channel.add_reader();
    for i in 0..n {
        let ptr = channel.grab_read(reader, 1, TIMEOUT).unwrap();
        let (first, last) = record_bounds(ptr.as_ptr(), 0);
        assert_eq!(first, i as f32);
        assert_eq!(last, i as f32);
        channel.release_read(reader).unwrap();
    }

    // Nearly fill again, then free just enough for a max-sized write whose
    // byte range straddles the region end.
    for i in 0..n - 1 {
        let ptr = channel.grab_write(1).unwrap();
        write_record(ptr.as_ptr(), i as f32);
        channel.release_write().unwrap();
    }
    channel.grab_read(reader, max_write - 1, TIMEOUT).unwrap();
    channel.release_read(reader).unwrap();

    let ptr = channel.grab_write(max_write).unwrap();
    for k in 0..max_write {
        write_record(unsafe { ptr.as_ptr().add(k * FLOATS_PER_RECORD * 4) }, -(k as f32));
    }
    channel.release_write().unwrap();

    for _ in 0..n - max_write {
        channel.grab_read(reader, 1, TIMEOUT).unwrap();
        channel.release_read(reader).unwrap();
    }

    let ptr = channel.grab_read(reader, max_write, TIMEOUT).unwrap();
    for k in 0..max_write {
        let (first, last) = record_bounds(ptr.as_ptr(), k);
        assert_eq!(first, -(k as f32));
        assert_eq!(last, -(k as f32));
    }
    channel.release_read(reader).unwrap();
}

#[rstest]
fn direct_backdoor_sees_the_overlap(direct_channel: DirectChannel) {
    let region = direct_channel.region_bytes();
    unsafe {
        direct_channel.direct(region).write(0x7E);
        assert_eq!(direct_channel.direct(0).read(), 0x7E);
    }
}

#[test]
fn copy_channel_threaded_round_trip() {
    let channel = Arc::new(CopyChannel::new(8, 4, 4, 8).unwrap());
    let total: u64 = 10_000;

    let producer = {
        let channel = Arc::clone(&channel);
        thread::spawn(move || {
            let mut next: u64 = 0;
            while next < total {
                let burst = (1 + next % 4).min(total - next);
                let mut src = Vec::with_capacity(burst as usize * 8);
                for i in 0..burst {
                    src.extend_from_slice(&(next + i).to_ne_bytes());
                }
                match channel.write(&src) {
                    Ok(()) => next += burst,
                    Err(WrapBufError::NoSpace { .. }) => thread::yield_now(),
                    Err(other) => panic!("unexpected write error: {other}"),
                }
            }
        })
    };

    let mut dst = [0u8; 8];
    for expected in 0..total {
        channel.read(&mut dst, Duration::from_secs(5), None).unwrap();
        assert_eq!(u64::from_ne_bytes(dst), expected);
    }

    producer.join().unwrap();
    assert_eq!(channel.write_index(), channel.read_index());
}

#[test]
fn direct_channel_readers_compete_for_records() {
    let channel = Arc::new(DirectChannel::new(8, 4, 2, 8).unwrap());
    let total: u64 = 5_000;
    let done = Arc::new(AtomicBool::new(false));

    let writer = {
        let channel = Arc::clone(&channel);
        let done = Arc::clone(&done);
        thread::spawn(move || {
            let mut next: u64 = 0;
            while next < total {
                match channel.grab_write(1) {
                    Ok(ptr) => {
                        unsafe { (ptr.as_ptr() as *mut u64).write_unaligned(next) };
                        channel.release_write().unwrap();
                        next += 1;
                    }
                    Err(WrapBufError::NoSpace { .. }) => thread::yield_now(),
                    Err(other) => panic!("unexpected grab_write error: {other}"),
                }
            }
            done.store(true, Ordering::Release);
        })
    };

    let mut readers = Vec::new();
    for _ in 0..2 {
        let channel = Arc::clone(&channel);
        let done = Arc::clone(&done);
        let id = channel.add_reader();
        readers.push(thread::spawn(move || {
            let mut seen = Vec::new();
            loop {
                match channel.grab_read(id, 1, Duration::from_millis(20)) {
                    Ok(ptr) => {
                        seen.push(unsafe { (ptr.as_ptr() as *const u64).read_unaligned() });
                        channel.release_read(id).unwrap();
                    }
                    Err(WrapBufError::Empty) => {
                        if done.load(Ordering::Acquire) && channel.elems_available_to_read() == 0 {
                            break;
                        }
                    }
                    Err(other) => panic!("unexpected grab_read error: {other}"),
                }
            }
            seen
        }));
    }

    writer.join().unwrap();
    let mut all: Vec<u64> = readers
        .into_iter()
        .flat_map(|handle| handle.join().unwrap())
        .collect();
    all.sort_unstable();

    // Each record was claimed by exactly one reader, and every reader saw
    // its claimed records in increasing order by construction of the shared
    // cursor; the union covers the whole stream.
    assert_eq!(all, (0..total).collect::<Vec<_>>());
}

#[test]
fn copy_channel_lookahead_supports_decoder_style_reads() {
    let channel = CopyChannel::new(4, 8, 8, 4).unwrap();

    for value in 0..8u32 {
        channel.write(&value.to_ne_bytes()).unwrap();
    }

    // A decoder peeks at a 4-element window but consumes 2 per step.
    let mut window = [0u8; 16];
    for step in 0..3 {
        channel.read(&mut window, TIMEOUT, Some(2)).unwrap();
        let first = u32::from_ne_bytes(window[..4].try_into().unwrap());
        assert_eq!(first as usize, step * 2);
    }
    assert_eq!(channel.read_index(), 6);
}
