#[macro_use]
extern crate criterion;
extern crate netnext_core;

use criterion::black_box;
use criterion::Criterion;
use netnext_core::wire::filter::{advanced_filter, basic_filter, write_filter_bytes};
use std::net::Ipv4Addr;

/// Runs on every received datagram before the AEAD header codec, so its cost sets a floor on
/// per-packet overhead.
fn basic_filter_bench(c: &mut Criterion) {
    let from = netnext_core::address::Address::V4(Ipv4Addr::new(127, 0, 0, 1), 40000);
    let to = netnext_core::address::Address::V4(Ipv4Addr::new(127, 0, 0, 1), 50000);
    let mut packet = vec![0u8; 1200];
    packet[0] = 1;
    write_filter_bytes(&mut packet, &from, &to, &[0u8; 8]);

    c.bench_function("basic_filter accept", move |b| {
        b.iter(|| black_box(basic_filter(&packet, &from, &to)))
    });
}

fn advanced_filter_bench(c: &mut Criterion) {
    let from = netnext_core::address::Address::V4(Ipv4Addr::new(127, 0, 0, 1), 40000);
    let to = netnext_core::address::Address::V4(Ipv4Addr::new(127, 0, 0, 1), 50000);
    let current = [1u8; 8];
    let upcoming = [2u8; 8];
    let previous = [3u8; 8];
    let mut packet = vec![0u8; 1200];
    packet[0] = 1;
    write_filter_bytes(&mut packet, &from, &to, &previous);

    c.bench_function("advanced_filter worst-case magic", move |b| {
        b.iter(|| black_box(advanced_filter(&packet, &from, &to, &[current, upcoming, previous])))
    });
}

criterion_group!(benches, basic_filter_bench, advanced_filter_bench);
criterion_main!(benches);
