use criterion::{black_box, criterion_group, criterion_main, Criterion};
use stegim::builder::{parse_mode, StegBuilder};
use stegim::crypto::StaticPasswords;
use stegim::raster::{ImageRef, MemoryProvider, PixelBuf};
use stegim::transform::Compression;

fn provider_with(w: u32, h: u32) -> MemoryProvider {
    let mut p = MemoryProvider::new();
    p.insert("in.png", PixelBuf::filled(w, h, [120, 130, 140, 255]));
    p
}

fn no_passwords() -> StaticPasswords {
    StaticPasswords::new(Vec::<String>::new())
}

fn bench_pack(c: &mut Criterion) {
    let data = vec![42u8; 16 * 1024];

    c.bench_function("pack_16k_sequential", |b| {
        let builder = StegBuilder::new()
            .input(ImageRef::new("in.png"))
            .output(ImageRef::new("out.png"))
            .add_file_bytes("bench.bin", data.clone());
        b.iter(|| {
            let mut p = provider_with(256, 256);
            black_box(builder.save(&mut p, &mut no_passwords()).unwrap())
        })
    });

    c.bench_function("pack_16k_rand_shuffle", |b| {
        let builder = StegBuilder::new()
            .input(ImageRef::new("in.png"))
            .output(ImageRef::new("out.png"))
            .global_rand("bench phrase")
            .global_shuffle("bench phrase")
            .add_file_bytes("bench.bin", data.clone());
        b.iter(|| {
            let mut p = provider_with(256, 256);
            black_box(builder.save(&mut p, &mut no_passwords()).unwrap())
        })
    });

    c.bench_function("pack_16k_deep_mode", |b| {
        let builder = StegBuilder::new()
            .input(ImageRef::new("in.png"))
            .output(ImageRef::new("out.png"))
            .set_mode_section(parse_mode("15/15").unwrap())
            .add_file_bytes("bench.bin", data.clone());
        b.iter(|| {
            let mut p = provider_with(128, 128);
            black_box(builder.save(&mut p, &mut no_passwords()).unwrap())
        })
    });
}

fn bench_unpack(c: &mut Criterion) {
    let data = vec![42u8; 16 * 1024];
    let mut p = provider_with(256, 256);
    let out = StegBuilder::new()
        .input(ImageRef::new("in.png"))
        .output(ImageRef::new("out.png"))
        .add_file_bytes("bench.bin", data)
        .save(&mut p, &mut no_passwords())
        .unwrap();
    let saved = out.images.into_iter().next().unwrap().pixels;

    c.bench_function("unpack_16k_sequential", |b| {
        b.iter(|| {
            let mut p = MemoryProvider::new();
            p.insert("out.png", saved.clone());
            let (mut proto, loaded) = StegBuilder::new()
                .input(ImageRef::new("out.png"))
                .load(&mut p, &mut no_passwords())
                .unwrap();
            black_box(proto.extract_file(&loaded.files[0]).unwrap())
        })
    });
}

fn bench_transform(c: &mut Criterion) {
    let data: Vec<u8> = std::iter::repeat(b"steganography ".as_slice())
        .take(8 * 1024)
        .flatten()
        .copied()
        .collect();

    c.bench_function("gzip_compress_112k", |b| {
        let comp = Compression::Gzip { level: 6 };
        b.iter(|| comp.compress(black_box(&data)).unwrap())
    });
    c.bench_function("brotli_compress_112k", |b| {
        let comp = Compression::Brotli { level: 5, text: true };
        b.iter(|| comp.compress(black_box(&data)).unwrap())
    });
}

criterion_group!(benches, bench_pack, bench_unpack, bench_transform);
criterion_main!(benches);
