//! Purpose: Concurrency contract for decoder resolution.
//! Exports: Integration tests only (no runtime exports).
//! Role: Verify singleflight generation, shared decoder identity, and extension precedence.
//! Invariants: N threads resolving one key observe exactly one generation pass.
//! Invariants: Extension-supplied decoders bypass default resolution entirely.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

use castite::api::{
    Binding, ClassDescriptor, Config, DecoderCache, Decoder, Error, Extension, SchemaRegistry,
    TokenStream, TypeDescriptor,
};
use serde_json::{Value, json};

fn ty(expr: &str) -> TypeDescriptor {
    TypeDescriptor::parse(expr).expect(expr)
}

struct CountingExtension {
    target: String,
    consults: Arc<AtomicUsize>,
}

impl Extension for CountingExtension {
    fn provide(&self, key: &str, _descriptor: &TypeDescriptor) -> Option<Arc<dyn Decoder>> {
        if key == self.target {
            self.consults.fetch_add(1, Ordering::SeqCst);
        }
        None
    }
}

struct SentinelDecoder;

impl Decoder for SentinelDecoder {
    fn decode(&self, stream: &mut TokenStream<'_>) -> Result<Value, Error> {
        stream.skip_value()?;
        Ok(Value::String("sentinel".to_string()))
    }
}

struct SentinelExtension {
    target: String,
}

impl Extension for SentinelExtension {
    fn provide(&self, key: &str, _descriptor: &TypeDescriptor) -> Option<Arc<dyn Decoder>> {
        (key == self.target).then(|| Arc::new(SentinelDecoder) as Arc<dyn Decoder>)
    }
}

struct RewriteExtension {
    from: String,
    to: TypeDescriptor,
}

impl Extension for RewriteExtension {
    fn rewrite(&self, descriptor: &TypeDescriptor) -> Option<TypeDescriptor> {
        (descriptor.cache_key() == self.from).then(|| self.to.clone())
    }
}

#[test]
fn concurrent_resolution_runs_one_generation_pass() {
    let schemas = SchemaRegistry::new().with_struct(
        "demo.Big",
        ClassDescriptor::new()
            .with_binding(Binding::new("id", ty("int")).with_required(true))
            .with_binding(Binding::new("tags", ty("vec[str]")))
            .with_binding(Binding::new("attrs", ty("map[str,any]"))),
    );
    let consults = Arc::new(AtomicUsize::new(0));
    let cache = Arc::new(
        DecoderCache::new(Config::new(), schemas).with_extension(CountingExtension {
            target: "demo.Big".to_string(),
            consults: consults.clone(),
        }),
    );

    let workers = 16;
    let barrier = Arc::new(Barrier::new(workers));
    let mut handles = Vec::new();
    for _ in 0..workers {
        let cache = cache.clone();
        let barrier = barrier.clone();
        handles.push(thread::spawn(move || {
            barrier.wait();
            cache.resolve(&ty("demo.Big")).expect("resolve")
        }));
    }

    let decoders: Vec<_> = handles
        .into_iter()
        .map(|handle| handle.join().expect("join"))
        .collect();

    // Extensions run inside the generation pass, so one consult means one pass.
    assert_eq!(consults.load(Ordering::SeqCst), 1);
    for decoder in &decoders[1..] {
        assert!(Arc::ptr_eq(&decoders[0], decoder));
    }
}

#[test]
fn extension_supplied_decoders_bypass_default_resolution() {
    // `demo.Custom` is deliberately absent from the schema: if normalization,
    // the native table, or the emitter ran, resolution would fail.
    let cache = DecoderCache::new(Config::new(), SchemaRegistry::new()).with_extension(
        SentinelExtension {
            target: "demo.Custom".to_string(),
        },
    );

    let value = cache
        .decode_str(&ty("demo.Custom"), r#"{"anything": [1, 2]}"#)
        .expect("decode");
    assert_eq!(value, json!("sentinel"));
    assert!(cache.get("demo.Custom").is_some());
}

#[test]
fn rewrite_extensions_redirect_resolution() {
    let cache = DecoderCache::new(Config::new(), SchemaRegistry::new()).with_extension(
        RewriteExtension {
            from: "demo.Alias".to_string(),
            to: ty("vec[int]"),
        },
    );

    let value = cache
        .decode_str(&ty("demo.Alias"), "[1, 2, 3]")
        .expect("decode");
    assert_eq!(value, json!([1, 2, 3]));
    // Published under the requested key, not the rewritten one.
    assert!(cache.get("demo.Alias").is_some());
}

#[test]
fn distinct_types_resolve_from_many_threads() {
    let cache = Arc::new(DecoderCache::new(Config::new(), SchemaRegistry::new()));
    let exprs = [
        "vec[int]",
        "map[str,any]",
        "set[str]",
        "array[float]",
        "map[int,vec[bool]]",
    ];

    let barrier = Arc::new(Barrier::new(exprs.len()));
    let handles: Vec<_> = exprs
        .iter()
        .map(|expr| {
            let cache = cache.clone();
            let barrier = barrier.clone();
            let expr = expr.to_string();
            thread::spawn(move || {
                barrier.wait();
                cache.resolve(&ty(&expr)).expect("resolve");
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("join");
    }

    for expr in exprs {
        assert!(cache.get(expr).is_some(), "missing decoder for `{expr}`");
    }
}
