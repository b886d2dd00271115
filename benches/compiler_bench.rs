use criterion::{black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use strc::*;

// Resolution benchmark scenarios.
// All scenarios resolve cleanly with the connector library loaded.

const CONNECTOR_LIB: &str = r#"
module AudioToOsc { ports: [ propertyInputPort bridge {} ] }
module OscFromAudio { ports: [ propertyInputPort bridge {} ] }
"#;

const CONNECTORS: &str = r#"{ "connectors": [ {
    "source": "AudioDomain", "destination": "OSCDomain",
    "source_module": "AudioToOsc", "destination_module": "OscFromAudio"
} ] }"#;

const SIMPLE_STREAM: &str = r#"
_domainDefinition AudioDomain { rate: 44100 }
signal In { domain: AudioDomain }
signal Out {}
In >> Out;
"#;

const CONSTANT_BUNDLES: &str = r#"
constant Voices { value: 4 }
constant Banks { value: Voices * 2 }
_domainDefinition AudioDomain { rate: 48000 }
signal Osc[Banks] { domain: AudioDomain }
signal Mix[Banks] {}
Osc >> Mix;
"#;

const MODULE_CHAIN: &str = r#"
_domainDefinition AudioDomain { rate: 44100 }
constant Unity { value: 1.0 }
signal In { domain: AudioDomain }
signal Out {}
module Gain {
    ports: [ mainInputPort Input { block: X }, mainOutputPort Output { block: X },
             propertyInputPort gain { default: Unity, types: ["int", "real"] } ]
    blocks: [ signal X {} ]
    streams: [ Input >> Output; ]
}
In >> Gain(gain: 0.5) >> Gain() >> Gain() >> Out;
"#;

const DOMAIN_CHANGE: &str = r#"
import Conn
_domainDefinition AudioDomain { rate: 44100 }
_domainDefinition OSCDomain { rate: 0 }
signal Tone { domain: AudioDomain }
signal Control { domain: OSCDomain }
Tone >> Control;
"#;

fn scenarios() -> [(&'static str, &'static str); 4] {
    [
        ("simple", SIMPLE_STREAM),
        ("constants", CONSTANT_BUNDLES),
        ("modules", MODULE_CHAIN),
        ("domain_change", DOMAIN_CHANGE),
    ]
}

/// Program with `n_streams` independent two-member streams alternating
/// between two domains.
fn generate_scaling_program(n_streams: usize) -> String {
    let mut src = String::from(
        "_domainDefinition AudioDomain { rate: 44100 }\n_domainDefinition OSCDomain { rate: 0 }\n",
    );

    for s in 0..n_streams {
        let domain = if s % 2 == 0 { "AudioDomain" } else { "OSCDomain" };
        src.push_str(&format!("signal Src{} {{ domain: {} }}\n", s, domain));
        src.push_str(&format!("signal Dst{} {{}}\n", s));
        src.push_str(&format!("Src{} >> Dst{};\n", s, s));
    }

    src
}

fn create_loaded_registry() -> registry::Registry {
    let mut reg = registry::Registry::new();
    reg.load_library("Conn", CONNECTOR_LIB)
        .expect("connector library must parse");
    reg.resolve().expect("registry must resolve");
    reg
}

fn connector_table() -> connect::ConnectorTable {
    connect::ConnectorTable::from_json(CONNECTORS).expect("connector table must parse")
}

fn compile_to(source: &str, terminal: pass::PassId) {
    let state = pipeline::compile(source, create_loaded_registry(), connector_table(), terminal)
        .expect("benchmark scenario must parse");
    assert!(!state.has_error, "{:?}", state.diagnostics);
    black_box(state.tree);
}

// Parser latency for representative scenarios.
fn bench_parse_latency(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse_latency");

    for (name, source) in scenarios() {
        group.bench_with_input(BenchmarkId::from_parameter(name), source, |b, source| {
            b.iter(|| {
                let result = parser::parse(black_box(source));
                black_box(&result.tree);
            });
        });
    }

    group.finish();
}

// Full resolution latency (parse -> inject -> ... -> validate).
fn bench_full_resolve_latency(c: &mut Criterion) {
    let mut group = c.benchmark_group("full_resolve_latency");

    for (name, source) in scenarios() {
        group.bench_with_input(BenchmarkId::from_parameter(name), source, |b, source| {
            b.iter(|| compile_to(black_box(source), pass::PassId::Validate));
        });
    }

    group.finish();
}

// Pass-level latency on the module chain: each group runs the pipeline up
// to one more terminal pass, so differences isolate the added pass.
fn bench_pass_latency(c: &mut Criterion) {
    let source = MODULE_CHAIN;

    for terminal in pass::ALL_PASSES {
        let name = pass::descriptor(terminal).name;
        let mut group = c.benchmark_group(format!("pass_latency/{}", name));
        group.bench_function("modules", |b| {
            b.iter_batched(
                || (create_loaded_registry(), connector_table()),
                |(registry, connectors)| {
                    let state = pipeline::compile(black_box(source), registry, connectors, terminal)
                        .expect("benchmark scenario must parse");
                    black_box(&state.passes);
                },
                BatchSize::SmallInput,
            );
        });
        group.finish();
    }
}

// Domain annotation alone (setup: parse + earlier passes).
fn bench_annotate(c: &mut Criterion) {
    let mut group = c.benchmark_group("annotate");
    group.bench_function("modules", |b| {
        b.iter_batched(
            || {
                pipeline::compile(
                    MODULE_CHAIN,
                    create_loaded_registry(),
                    connector_table(),
                    pass::PassId::Fold,
                )
                .expect("benchmark scenario must parse")
                .tree
            },
            |mut tree| {
                let stats = annotate::annotate(black_box(&mut tree));
                black_box(stats);
            },
            BatchSize::SmallInput,
        );
    });
    group.finish();
}

// Resolution scaling vs number of streams.
fn bench_resolve_scaling(c: &mut Criterion) {
    let mut group = c.benchmark_group("resolve_scaling");

    for n_streams in [1_usize, 10, 50, 100, 200] {
        let source = generate_scaling_program(n_streams);
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{}streams", n_streams)),
            &source,
            |b, source| {
                b.iter(|| compile_to(black_box(source.as_str()), pass::PassId::Validate));
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_parse_latency,
    bench_full_resolve_latency,
    bench_pass_latency,
    bench_annotate,
    bench_resolve_scaling,
);
criterion_main!(benches);
