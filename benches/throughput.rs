//! Throughput Benchmark for tinyweb
//!
//! This benchmark measures the building blocks the reactor leans on for
//! every request: buffers, timers, the task queue and HTTP parsing.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tinyweb::buffer::Buffer;
use tinyweb::pool::{BoundedQueue, WorkerPool};
use tinyweb::protocol::parse_request;
use tinyweb::storage::UserStore;
use tinyweb::timer::{EvictReason, TimerHeap};

const REQUEST: &[u8] = b"GET /index.html HTTP/1.1\r\n\
Host: 127.0.0.1:1316\r\n\
User-Agent: bench\r\n\
Accept: */*\r\n\
Connection: keep-alive\r\n\r\n";

/// Benchmark buffer append / retrieve cycles
fn bench_buffer(c: &mut Criterion) {
    let mut group = c.benchmark_group("buffer");

    group.throughput(Throughput::Bytes(REQUEST.len() as u64));
    group.bench_function("append_retrieve_small", |b| {
        let mut buf = Buffer::new();
        b.iter(|| {
            buf.append(black_box(REQUEST));
            buf.retrieve(REQUEST.len());
        });
    });

    let chunk = vec![b'x'; 64 * 1024]; // 64KB
    group.throughput(Throughput::Bytes(chunk.len() as u64));
    group.bench_function("append_retrieve_large", |b| {
        let mut buf = Buffer::new();
        b.iter(|| {
            buf.append(black_box(&chunk));
            black_box(buf.peek().len());
            buf.retrieve_all();
        });
    });

    group.bench_function("compacting_partial_retrieve", |b| {
        let mut buf = Buffer::with_capacity(4096);
        b.iter(|| {
            buf.append(black_box(&chunk[..1000]));
            buf.retrieve(900);
            if buf.readable_bytes() > 2000 {
                buf.retrieve_all();
            }
        });
    });

    group.finish();
}

/// Benchmark timer heap operations
fn bench_timer(c: &mut Criterion) {
    let mut group = c.benchmark_group("timer");
    group.throughput(Throughput::Elements(1));

    group.bench_function("adjust_10k", |b| {
        let mut heap = TimerHeap::with_capacity(10_000);
        for id in 0..10_000 {
            heap.add(id, Duration::from_secs(60), EvictReason::IdleTimeout);
        }
        let mut i = 0u64;
        b.iter(|| {
            heap.adjust(black_box(i % 10_000), Duration::from_secs(60));
            i += 1;
        });
    });

    group.bench_function("add_cancel", |b| {
        let mut heap = TimerHeap::new();
        let mut i = 0u64;
        b.iter(|| {
            heap.add(i, Duration::from_secs(60), EvictReason::IdleTimeout);
            heap.cancel(i.wrapping_sub(32));
            i += 1;
        });
    });

    group.bench_function("tick_1k_expired", |b| {
        let mut expired = Vec::with_capacity(1000);
        b.iter(|| {
            let mut heap = TimerHeap::with_capacity(1000);
            let now = Instant::now();
            for id in 0..1000 {
                heap.add_at(id, now, EvictReason::IdleTimeout);
            }
            heap.tick(now, &mut expired);
            black_box(expired.len());
            expired.clear();
        });
    });

    group.finish();
}

/// Benchmark queue handoff between threads
fn bench_queue(c: &mut Criterion) {
    use std::thread;

    let mut group = c.benchmark_group("queue");
    group.measurement_time(Duration::from_secs(10));

    group.bench_function("spsc_10k", |b| {
        b.iter(|| {
            let queue = Arc::new(BoundedQueue::new(1024));
            let consumer = {
                let queue = Arc::clone(&queue);
                thread::spawn(move || {
                    let mut sum = 0u64;
                    while let Some(v) = queue.pop() {
                        sum += v;
                    }
                    sum
                })
            };
            for i in 0..10_000u64 {
                queue.push_back(i).unwrap();
            }
            while !queue.is_empty() {
                thread::yield_now();
            }
            queue.close();
            black_box(consumer.join().unwrap());
        });
    });

    group.bench_function("worker_pool_10k_tasks", |b| {
        let pool = WorkerPool::new(4, 1024).unwrap();
        b.iter(|| {
            let done = Arc::new(AtomicU64::new(0));
            for _ in 0..10_000 {
                let done = Arc::clone(&done);
                pool.add_task(move || {
                    done.fetch_add(1, Ordering::Relaxed);
                })
                .unwrap();
            }
            while done.load(Ordering::Relaxed) < 10_000 {
                thread::yield_now();
            }
        });
    });

    group.finish();
}

/// Benchmark HTTP request parsing
fn bench_parse(c: &mut Criterion) {
    let mut group = c.benchmark_group("http");
    group.throughput(Throughput::Bytes(REQUEST.len() as u64));

    group.bench_function("parse_get", |b| {
        b.iter(|| black_box(parse_request(black_box(REQUEST))));
    });

    group.bench_function("parse_partial", |b| {
        let partial = &REQUEST[..REQUEST.len() - 10];
        b.iter(|| black_box(parse_request(black_box(partial))));
    });

    group.finish();
}

/// Benchmark credential lookups
fn bench_store(c: &mut Criterion) {
    let store = UserStore::new();
    for i in 0..10_000 {
        store
            .register(&format!("user{}", i), "password")
            .unwrap();
    }

    let mut group = c.benchmark_group("store");
    group.throughput(Throughput::Elements(1));

    group.bench_function("verify", |b| {
        let mut i = 0u64;
        b.iter(|| {
            let name = format!("user{}", i % 10_000);
            black_box(store.verify(&name, "password"));
            i += 1;
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_buffer,
    bench_timer,
    bench_queue,
    bench_parse,
    bench_store,
);

criterion_main!(benches);
