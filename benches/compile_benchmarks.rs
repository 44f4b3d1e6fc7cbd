use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::prelude::*;

use nnapi_graph_compiler::{
    memory::MemoryPoolSet,
    model::{FusedActivation, Model, OperandType, OperationType, PaddingScheme},
    CompilerOptions, GraphBuilder, ModelBuilder, OperandTable,
};

const F32: OperandType = OperandType::TensorFloat32;

fn random_weights(rng: &mut StdRng, count: usize) -> Vec<f32> {
    (0..count).map(|_| rng.gen_range(-1.0f32..1.0)).collect()
}

/// Alternating CONV_2D / DEPTHWISE_CONV_2D stack over a channel-last input
fn conv_stack(layers: usize, channels: u32, size: u32) -> Model {
    let mut rng = StdRng::seed_from_u64(7);
    let mut builder = ModelBuilder::new();

    let scheme = builder.add_i32(PaddingScheme::Same as i32);
    let stride = builder.add_i32(1);
    let multiplier = builder.add_i32(1);
    let relu6 = builder.add_i32(FusedActivation::Relu6 as i32);

    let dims = [1, size, size, channels];
    let mut current = builder.add_input(F32, &dims);

    for layer in 0..layers {
        let output = if layer + 1 == layers {
            builder.add_output(F32, &dims)
        } else {
            builder.add_temporary(F32, &dims)
        };
        let bias = builder.add_constant(F32, &[channels], &random_weights(&mut rng, channels as usize));

        if layer % 2 == 0 {
            let filter_dims = [channels, 3, 3, channels];
            let count = (channels * 9 * channels) as usize;
            let filter = builder.add_constant(F32, &filter_dims, &random_weights(&mut rng, count));
            builder.add_operation(
                OperationType::Conv2d,
                &[current, filter, bias, scheme, stride, stride, relu6],
                &[output],
            );
        } else {
            let filter_dims = [1, 3, 3, channels];
            let count = (9 * channels) as usize;
            let filter = builder.add_constant(F32, &filter_dims, &random_weights(&mut rng, count));
            builder.add_operation(
                OperationType::DepthwiseConv2d,
                &[current, filter, bias, scheme, stride, stride, multiplier, relu6],
                &[output],
            );
        }
        current = output;
    }

    builder.build()
}

fn compile(model: &Model, options: &CompilerOptions) -> usize {
    let operands = OperandTable::resolve(model, &MemoryPoolSet::new()).expect("operands resolve");
    let graph = GraphBuilder::new(&operands, options)
        .compile(&model.operations)
        .expect("model compiles");
    graph.dataflow().node_count()
}

fn criterion_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("compile");

    for &layers in &[4usize, 16, 64] {
        let model = conv_stack(layers, 32, 28);

        group.bench_with_input(BenchmarkId::new("folded", layers), &model, |b, model| {
            let options = CompilerOptions::default();
            b.iter(|| compile(black_box(model), &options));
        });

        group.bench_with_input(BenchmarkId::new("unfolded", layers), &model, |b, model| {
            let options = CompilerOptions::default().fold_constant_layouts(false);
            b.iter(|| compile(black_box(model), &options));
        });
    }

    let model = conv_stack(16, 32, 28);
    group.bench_function("resolve_operands", |b| {
        b.iter(|| OperandTable::resolve(black_box(&model), &MemoryPoolSet::new()).map(|table| table.len()))
    });

    group.finish();
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
