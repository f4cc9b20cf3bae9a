// Copyright (C) 2025 Category Labs, Inc.
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

use std::hint::black_box;
use std::time::Duration;

use wrapbuf::{CopyChannel, DirectChannel};

fn main() {
    divan::main();
}

const TIMEOUT: Duration = Duration::from_millis(100);
const BATCH: usize = 1000;

#[divan::bench(args = [64, 1024, 16384])]
fn copy_write_read_cycle(bencher: divan::Bencher, elem_size: usize) {
    let record = vec![0u8; elem_size];
    bencher
        .with_inputs(|| {
            (
                CopyChannel::new(elem_size, 4, 4, 4).unwrap(),
                vec![0u8; elem_size],
            )
        })
        .bench_values(|(channel, mut dst)| {
            for _ in 0..BATCH {
                channel.write(&record).unwrap();
                channel.read(&mut dst, TIMEOUT, None).unwrap();
                black_box(&mut dst);
            }
        });
}

#[divan::bench(args = [64, 1024, 16384])]
fn direct_grab_release_cycle(bencher: divan::Bencher, elem_size: usize) {
    bencher
        .with_inputs(|| {
            let channel = DirectChannel::new(elem_size, 4, 4, 4).unwrap();
            let reader = channel.add_reader();
            (channel, reader)
        })
        .bench_values(|(channel, reader)| {
            for _ in 0..BATCH {
                let ptr = channel.grab_write(1).unwrap();
                unsafe { ptr.as_ptr().write(0xAB) };
                channel.release_write().unwrap();

                let ptr = channel.grab_read(reader, 1, TIMEOUT).unwrap();
                black_box(unsafe { ptr.as_ptr().read() });
                channel.release_read(reader).unwrap();
            }
        });
}
