//! Benchmarks for scenario assembly and input resolution.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use stagechain::core::{ScenarioOutputs, StageOutputs};
use stagechain::pipeline::StageChain;
use stagechain::scenarios::{assemble, AssemblyContext, ScenarioKind, TemplatePaths};
use std::path::Path;

fn assembly_benchmark(c: &mut Criterion) {
    let ctx = AssemblyContext::new(TemplatePaths::under(Path::new("/repo")));

    c.bench_function("assemble_external_network", |b| {
        b.iter(|| {
            assemble(black_box(ScenarioKind::ExternalNetwork), black_box("abcdef123456"), &ctx)
        })
    });

    let Ok(scenario) = assemble(ScenarioKind::Complete, "ab12cd34", &ctx) else {
        return;
    };
    let mut captured = ScenarioOutputs::new();
    captured.record(
        "prerequisites",
        StageOutputs::new()
            .with("local_cidr", "198.51.100.4/32")
            .with("bastion_ssh_public_key", "ssh-ed25519 AAAA")
            .with("bastion_ssh_private_key", "key"),
    );

    if let Some(cluster) = scenario.chain.stage("cluster") {
        c.bench_function("resolve_cluster_inputs", |b| {
            b.iter(|| StageChain::resolve_inputs(black_box(cluster), &captured))
        });
    }
}

criterion_group!(benches, assembly_benchmark);
criterion_main!(benches);
