use clap::Parser;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use wrapbuf::{CopyChannel, WrapBufError};

#[derive(Parser, Debug)]
#[clap(name = "copy_stream")]
#[clap(about = "Stream fixed-size records through a copy channel", long_about = None)]
struct Args {
    #[clap(short, long, default_value_t = 1024)]
    elem_size: usize,

    #[clap(short, long, default_value_t = 100_000)]
    records: u64,

    #[clap(long, default_value_t = 4)]
    max_elems_per_write: usize,

    #[clap(long, default_value_t = 4)]
    max_elems_per_read: usize,

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
    info!(?args, "starting copy stream");

    let channel = Arc::new(CopyChannel::new(
        args.elem_size,
        args.max_elems_per_write,
        args.max_elems_per_read,
        args.slack,
    )?);
    info!(
        num_elems = channel.num_elems(),
        region_bytes = channel.region_bytes(),
        "channel created"
    );

    let total = args.records;
    let elem_size = args.elem_size;

    let producer = {
        let channel = Arc::clone(&channel);
        thread::spawn(move || {
            let mut record = vec![0u8; elem_size];
            let mut full_retries = 0u64;
            for sequence in 0..total {
                record[..8].copy_from_slice(&sequence.to_ne_bytes());
                loop {
                    match channel.write(&record) {
                        Ok(()) => break,
                        Err(WrapBufError::NoSpace { .. }) => {
                            full_retries += 1;
                            thread::yield_now();
                        }
                        Err(other) => {
                            warn!(error = %other, "write failed");
                            return;
                        }
                    }
                }
            }
            info!(full_retries, "producer finished");
        })
    };

    let start = Instant::now();
    let mut dst = vec![0u8; elem_size];
    for expected in 0..total {
        channel
            .read(&mut dst, Duration::from_secs(5), None)
            .expect("read timed out");
        let sequence = u64::from_ne_bytes(dst[..8].try_into().unwrap());
        assert_eq!(sequence, expected);
        if expected > 0 && expected % 10_000 == 0 {
            info!(records = expected, "progress");
        }
    }
    let elapsed = start.elapsed();

    producer.join().expect("producer panicked");
    info!(
        records = total,
        elapsed_ms = elapsed.as_millis() as u64,
        records_per_sec = format!("{:.0}", total as f64 / elapsed.as_secs_f64()),
        "done"
    );
    Ok(())
}
