use std::sync::Arc;
use std::time::{Duration, Instant};

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use dasp_signal::Signal;
use funkwelle::resample::Resampler;
use funkwelle::{
    OutputCallback, PcmBlock, PlayerContext, SpectrumAnalyzer, SpectrumConfig, TransportRing,
};

fn sine_i16(frames: usize) -> Vec<i16> {
    let mut sine = dasp_signal::rate(44_100.0).const_hz(440.0).sine();
    (0..frames)
        .flat_map(|_| {
            let s = (sine.next() * 0.5 * i16::MAX as f64) as i16;
            [s, s]
        })
        .collect()
}

pub fn criterion_benchmark(c: &mut Criterion) {
    c.bench_function("TransportRing write+read 4 KiB", |b| {
        let ring = TransportRing::new(1 << 16);
        let input = vec![0x5au8; 4096];
        let mut output = vec![0u8; 4096];

        b.iter(|| {
            ring.write(black_box(&input));
            ring.read(black_box(&mut output))
        })
    });

    c.bench_function("OutputCallback.render() 512 frames", |b| {
        let ring = Arc::new(TransportRing::new(1 << 16));
        let context = Arc::new(PlayerContext::new());
        context.volume.set(0.5);
        let mut callback =
            OutputCallback::new(ring.clone(), Arc::new(SpectrumAnalyzer::default()), context);
        let samples = sine_i16(512);
        let mut out = vec![0i16; 1024];

        b.iter(|| {
            ring.write(bytemuck::cast_slice(&samples));
            callback.render(black_box(&mut out))
        })
    });

    c.bench_function("SpectrumAnalyzer.process_samples()", |b| {
        let analyzer = SpectrumAnalyzer::new(SpectrumConfig {
            update_interval: Duration::ZERO,
            ..SpectrumConfig::default()
        });
        let samples = sine_i16(1024);

        b.iter(|| {
            analyzer.push_samples(&samples);
            analyzer.process_samples_at(black_box(Instant::now()))
        })
    });

    c.bench_function("Resampler.process() 48k -> 44.1k", |b| {
        let mut resampler = Resampler::new(48_000, 2).unwrap();
        let block = PcmBlock {
            samples: vec![0.25; 2304],
            sample_rate: 48_000,
            channels: 2,
        };

        b.iter(|| resampler.process(black_box(&block)).len())
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
