use clap::Parser;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use wrapbuf::{DirectChannel, WrapBufError};

#[derive(Parser, Debug)]
#[clap(name = "direct_stream")]
#[clap(about = "Stream records through a direct channel with competing readers", long_about = None)]
struct Args {
    #[clap(short, long, default_value_t = 1024)]
    elem_size: usize,

    #[clap(short, long, default_value_t = 100_000)]
    records: u64,

    #[clap(long, default_value_t = 2)]
    readers: usize,

    #[clap(short, long, default_value_t = 8)]
    slack: usize,
}

fn main() -> wrapbuf::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    info!(?args, "starting direct stream");

    let channel = Arc::new(DirectChannel::new(args.elem_size, 4, 4, args.slack)?);
    info!(
        num_elems = channel.num_elems(),
        region_bytes = channel.region_bytes(),
        "channel created"
    );

    let total = args.records;
    let done = Arc::new(AtomicBool::new(false));
    let start = Instant::now();

    let mut reader_handles = Vec::new();
    for _ in 0..args.readers {
        let channel = Arc::clone(&channel);
        let done = Arc::clone(&done);
        let id = channel.add_reader();
        reader_handles.push(thread::spawn(move || {
            let mut claimed = 0u64;
            loop {
                match channel.grab_read(id, 1, Duration::from_millis(20)) {
                    Ok(ptr) => {
                        let _sequence = unsafe { (ptr.as_ptr() as *const u64).read_unaligned() };
                        channel.release_read(id).expect("release_read failed");
                        claimed += 1;
                    }
                    Err(WrapBufError::Empty) => {
                        if done.load(Ordering::Acquire) && channel.elems_available_to_read() == 0 {
                            break;
                        }
                    }
                    Err(other) => {
                        warn!(id, error = %other, "grab_read failed");
                        break;
                    }
                }
            }
            info!(id, claimed, "reader finished");
            claimed
        }));
    }

    let mut full_retries = 0u64;
    for sequence in 0..total {
        loop {
            match channel.grab_write(1) {
                Ok(ptr) => {
                    unsafe { (ptr.as_ptr() as *mut u64).write_unaligned(sequence) };
                    channel.release_write()?;
                    break;
                }
                Err(WrapBufError::NoSpace { .. }) => {
                    full_retries += 1;
                    thread::yield_now();
                }
                Err(other) => return Err(other.into()),
            }
        }
    }
    done.store(true, Ordering::Release);
    info!(full_retries, "writer finished");

    let claimed: u64 = reader_handles
        .into_iter()
        .map(|handle| handle.join().expect("reader panicked"))
        .sum();
    let elapsed = start.elapsed();

    assert_eq!(claimed, total);
    info!(
        records = total,
        readers = args.readers,
        elapsed_ms = elapsed.as_millis() as u64,
        records_per_sec = format!("{:.0}", total as f64 / elapsed.as_secs_f64()),
        "done"
    );
    Ok(())
}
