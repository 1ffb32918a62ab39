use criterion::{black_box, criterion_group, criterion_main, Criterion};
use ja3net::{classify, NetError};
use std::error::Error;
use std::io;

fn benchmark_classify(c: &mut Criterion) {
    let refused = NetError::io(
        "dial",
        "example.com:443",
        io::Error::from(io::ErrorKind::ConnectionRefused),
    );
    let tls = io::Error::new(
        io::ErrorKind::Other,
        "x509: certificate signed by unknown authority",
    );
    let rejected = NetError::ProxyRejected {
        code: 407,
        text: "Proxy Authentication Required".to_string(),
    };

    c.bench_function("classify_net_error", |b| {
        b.iter(|| classify(Some(black_box(&refused as &(dyn Error + 'static)))))
    });
    c.bench_function("classify_tls_marker", |b| {
        b.iter(|| classify(Some(black_box(&tls as &(dyn Error + 'static)))))
    });
    c.bench_function("classify_proxy_rejected", |b| {
        b.iter(|| classify(Some(black_box(&rejected as &(dyn Error + 'static)))))
    });
    c.bench_function("classify_missing", |b| b.iter(|| classify(black_box(None))));
}

criterion_group!(benches, benchmark_classify);
criterion_main!(benches);
