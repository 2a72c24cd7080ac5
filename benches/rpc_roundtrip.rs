//! Bridge round-trip benchmark suite.
//!
//! Benchmarks request/response latency over an in-process transport:
//! - Concurrency: 1, 16, 256 calls in flight
//! - Payloads: bare value, 64 KiB transferable
//!
//! Run with: cargo bench --bench rpc_roundtrip
//! Results saved to: target/criterion/

use std::sync::Arc;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use extension_host::protocol::Transferable;
use extension_host::rpc::{Bridge, HandlerTable};
use extension_host::{Payload, transport};
use serde_json::json;
use tokio::runtime::Runtime;

// ============================================================================
// Benchmark Parameters
// ============================================================================

const CONCURRENCY: &[usize] = &[1, 16, 256];
const TRANSFER_SIZE: usize = 64 * 1024;

// ============================================================================
// Setup
// ============================================================================

/// Two bridges joined by an in-process pair; the daemon side echoes.
fn bridges(rt: &Runtime) -> (Bridge, Bridge) {
    let _guard = rt.enter();
    let (daemon_end, extension_end) = transport::pair();

    let table = HandlerTable::new()
        .method("echo", |param: Payload| async move { Ok(param) })
        .method("getFile", |_| async {
            Ok(Payload::transfer(
                json!({ "type": "application/octet-stream", "length": TRANSFER_SIZE, "body": 0 }),
                vec![Transferable::new(vec![7; TRANSFER_SIZE])],
            ))
        });

    let daemon = Bridge::new(daemon_end, Arc::new(table));
    let extension = Bridge::new(extension_end, Arc::new(HandlerTable::new()));
    (daemon, extension)
}

// ============================================================================
// Benchmark: Value Round Trip
// ============================================================================

fn bench_value_round_trip(c: &mut Criterion) {
    let rt = Runtime::new().expect("runtime");
    let (_daemon, extension) = bridges(&rt);

    let mut group = c.benchmark_group("value_round_trip");

    for &concurrency in CONCURRENCY {
        group.throughput(Throughput::Elements(concurrency as u64));
        group.bench_with_input(
            BenchmarkId::new("echo", concurrency),
            &concurrency,
            |b, &in_flight| {
                b.to_async(&rt).iter(|| {
                    let extension = extension.clone();
                    async move {
                        let calls = (0..in_flight).map(|i| {
                            extension.execute("echo", Payload::value(json!({ "seq": i })))
                        });
                        for result in futures_util::future::join_all(calls).await {
                            result.expect("echo");
                        }
                    }
                });
            },
        );
    }

    group.finish();
}

// ============================================================================
// Benchmark: Transferable Round Trip
// ============================================================================

fn bench_transfer_round_trip(c: &mut Criterion) {
    let rt = Runtime::new().expect("runtime");
    let (_daemon, extension) = bridges(&rt);

    let mut group = c.benchmark_group("transfer_round_trip");
    group.throughput(Throughput::Bytes(TRANSFER_SIZE as u64));

    group.bench_function("get_file", |b| {
        b.to_async(&rt).iter(|| {
            let extension = extension.clone();
            async move {
                let payload = extension
                    .execute("getFile", Payload::value(json!("https://cdn.example/a.bin")))
                    .await
                    .expect("getFile");
                assert_eq!(payload.transferables.len(), 1);
            }
        });
    });

    group.finish();
}

// ============================================================================
// Criterion Setup
// ============================================================================

criterion_group!(benches, bench_value_round_trip, bench_transfer_round_trip);
criterion_main!(benches);
