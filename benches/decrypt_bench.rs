use criterion::{black_box, criterion_group, criterion_main, Criterion};
use drdiags::decrypt::decrypt_v2;
use drdiags::keystream::{rotate_right_8, Keystream};

fn encrypt(plain: &[u8]) -> Vec<u8> {
    let mut ks = Keystream::new();
    plain
        .iter()
        .map(|&b| {
            let (xor_val, rot_val) = ks.next_pair();
            rotate_right_8(b ^ xor_val, rot_val)
        })
        .collect()
}

fn bench_keystream(c: &mut Criterion) {
    c.bench_function("keystream_1m_pairs", |b| {
        b.iter(|| {
            let mut ks = Keystream::new();
            let mut acc = 0u32;
            for _ in 0..1_000_000 {
                let (x, r) = ks.next_pair();
                acc = acc.wrapping_add(u32::from(x) ^ u32::from(r));
            }
            black_box(acc)
        })
    });
}

fn bench_decrypt_clean(c: &mut Criterion) {
    let plain: Vec<u8> = (b' '..=b'~').cycle().take(1024 * 1024).collect();
    let cipher = encrypt(&plain);

    c.bench_function("decrypt_1mb_clean", |b| {
        b.iter(|| {
            let mut buf = cipher.clone();
            decrypt_v2(black_box(&mut buf), 0)
        })
    });
}

fn bench_decrypt_with_resync(c: &mut Criterion) {
    // One top-bit byte forces a full (failing) resync walk.
    let mut plain: Vec<u8> = (b' '..=b'~').cycle().take(64 * 1024).collect();
    plain[32 * 1024] = 0x80;
    let cipher = encrypt(&plain);

    c.bench_function("decrypt_64kb_one_resync", |b| {
        b.iter(|| {
            let mut buf = cipher.clone();
            decrypt_v2(black_box(&mut buf), 0)
        })
    });
}

criterion_group!(
    benches,
    bench_keystream,
    bench_decrypt_clean,
    bench_decrypt_with_resync
);
criterion_main!(benches);
