//! Throughput benchmarks for the KTS client against an in-process calendar

use std::sync::Arc;

use criterion::{criterion_group, criterion_main, Criterion};
use kts_calendar::testutil::TestServer;
use kts_client::{
    ClientConfig, HttpServiceClient, KtsClient, PinMode, PublicationCache, TrustedPublications,
};
use tokio::runtime::Runtime;

fn client_for(server: &TestServer) -> KtsClient {
    let config = ClientConfig::for_base_url(&server.url()).expect("valid URL");
    let service = Arc::new(HttpServiceClient::new(&config).expect("client builds"));
    KtsClient::new(
        service,
        Arc::new(TrustedPublications::new(PinMode::None)),
        Arc::new(PublicationCache::new()),
    )
}

fn bench_single_sign(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let server = rt.block_on(TestServer::start());
    let client = client_for(&server);

    c.bench_function("single_sign", |b| {
        b.iter(|| {
            rt.block_on(async {
                client.sign_data(b"benchmark").await.expect("sign failed");
            })
        })
    });
}

fn bench_concurrent_signs(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let server = rt.block_on(TestServer::start());
    let client = Arc::new(client_for(&server));

    let mut group = c.benchmark_group("concurrent_signs");

    for count in [10u32, 50] {
        group.bench_function(format!("n={}", count), |b| {
            b.iter(|| {
                rt.block_on(async {
                    let mut handles = Vec::new();
                    for i in 0..count {
                        let client = client.clone();
                        handles.push(tokio::spawn(async move {
                            client.sign_data(&i.to_be_bytes()).await.expect("sign failed");
                        }));
                    }
                    for handle in handles {
                        handle.await.expect("task panicked");
                    }
                })
            })
        });
    }

    group.finish();
}

fn bench_verify(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let server = rt.block_on(TestServer::start());
    let client = client_for(&server);

    let old = rt.block_on(client.sign_data(b"old")).expect("sign failed");
    server.publish().expect("publish failed");
    let fresh = rt.block_on(client.sign_data(b"fresh")).expect("sign failed");
    rt.block_on(client.load_publications()).expect("load failed");

    let mut group = c.benchmark_group("verify");

    group.bench_function("cached_publication", |b| {
        b.iter(|| {
            rt.block_on(client.verify_data(b"old", &old))
                .expect("verify failed")
        })
    });

    group.bench_function("with_extension", |b| {
        b.iter(|| {
            rt.block_on(client.verify_data(b"fresh", &fresh))
                .expect("verify failed")
        })
    });

    group.finish();
}

criterion_group!(benches, bench_single_sign, bench_concurrent_signs, bench_verify);
criterion_main!(benches);
