use chatrelay::config::{Family, ProviderConfig};
use chatrelay::providers::registry::Registry;
use chatrelay::providers::{build_adapter, line_json, prefixed, sse_delta, sse_text};
use criterion::{black_box, criterion_group, criterion_main, Criterion};

fn create_registry() -> Registry {
    let deepai = ProviderConfig::new("deepai", Family::OneShot, "http://127.0.0.1:1/chat");
    let mut registry = Registry::new("deepai", build_adapter(&deepai, None));

    for (id, family) in [
        ("venice", Family::LineJson),
        ("blackbox", Family::SseDelta),
        ("phind", Family::SseText),
        ("vercel", Family::Prefixed),
        ("horde", Family::JobPoll),
        ("pi", Family::Duplex),
    ] {
        let config = ProviderConfig::new(id, family, "ws://127.0.0.1:1/");
        registry.register(id, build_adapter(&config, None));
        for suffix in ["fast", "large", "uncensored"] {
            registry
                .register_variant(id, suffix, build_adapter(&config, Some(suffix)))
                .unwrap();
        }
    }
    registry
}

fn bench_registry_resolve(c: &mut Criterion) {
    let registry = create_registry();

    c.bench_function("resolve_exact", |b| {
        b.iter(|| registry.resolve(black_box("venice")))
    });

    c.bench_function("resolve_variant", |b| {
        b.iter(|| registry.resolve(black_box("vercel-uncensored")))
    });

    c.bench_function("resolve_unknown_suffix", |b| {
        b.iter(|| registry.resolve(black_box("horde-llama-3-70b")))
    });

    c.bench_function("resolve_default", |b| {
        b.iter(|| registry.resolve(black_box("gpt-99")))
    });
}

fn bench_line_decoders(c: &mut Criterion) {
    c.bench_function("decode_line_json", |b| {
        b.iter(|| line_json::decode_line(black_box(r#"{"kind":"content","content":"Hello, how can I help?"}"#)))
    });

    c.bench_function("decode_sse_delta", |b| {
        b.iter(|| {
            sse_delta::decode_line(
                black_box(r#"data: {"choices":[{"delta":{"content":"Hello"}}]}"#),
                black_box(sse_delta::DEFAULT_CONTENT_POINTER),
            )
        })
    });

    let filter = sse_text::TextFilter::default();
    c.bench_function("decode_sse_text", |b| {
        b.iter(|| filter.decode_line(black_box("data: Hello there")))
    });

    c.bench_function("decode_prefixed", |b| {
        b.iter(|| prefixed::decode_line(black_box(r#"0:"Hello \"quoted\" text""#)))
    });

    c.bench_function("decode_malformed", |b| {
        b.iter(|| line_json::decode_line(black_box("<html>502 Bad Gateway</html>")))
    });
}

criterion_group!(benches, bench_registry_resolve, bench_line_decoders);
criterion_main!(benches);
