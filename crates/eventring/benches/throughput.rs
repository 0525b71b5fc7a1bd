use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use eventring::{Channel, Config};
use std::sync::Arc;
use std::thread;

const EVENTS_PER_PRODUCER: u64 = 1_000_000;

fn bench_spsc(c: &mut Criterion) {
    let mut group = c.benchmark_group("spsc");
    group.throughput(Throughput::Elements(EVENTS_PER_PRODUCER));

    group.bench_function("try_push_consume", |b| {
        b.iter(|| {
            let channel = Arc::new(Channel::<u64>::new(Config::new(14, 1, false)));
            let producer = channel.register().unwrap();

            let producer_handle = thread::spawn(move || {
                let mut sent = 0u64;
                while sent < EVENTS_PER_PRODUCER {
                    match producer.try_push(sent) {
                        Ok(()) => sent += 1,
                        Err(_) => std::hint::spin_loop(),
                    }
                }
            });

            let ch = Arc::clone(&channel);
            let mut count = 0u64;
            while count < EVENTS_PER_PRODUCER {
                count += ch.consume_all(|item| {
                    black_box(item);
                }) as u64;
                if count < EVENTS_PER_PRODUCER {
                    std::hint::spin_loop();
                }
            }

            producer_handle.join().unwrap();
        });
    });

    group.finish();
}

fn bench_mpsc(c: &mut Criterion) {
    let mut group = c.benchmark_group("mpsc");

    for num_producers in [2usize, 4, 8] {
        let total = EVENTS_PER_PRODUCER * num_producers as u64;
        group.throughput(Throughput::Elements(total));

        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{num_producers}P_1C")),
            &num_producers,
            |b, &n| {
                b.iter(|| {
                    let channel = Arc::new(Channel::<u64>::new(Config::new(14, n.max(16), false)));

                    let mut handles = vec![];
                    for _ in 0..n {
                        let producer = channel.register().unwrap();
                        handles.push(thread::spawn(move || {
                            let mut sent = 0u64;
                            while sent < EVENTS_PER_PRODUCER {
                                match producer.push_with_backoff(sent) {
                                    Ok(()) => sent += 1,
                                    Err(_) => std::hint::spin_loop(),
                                }
                            }
                        }));
                    }

                    let ch = Arc::clone(&channel);
                    let mut count = 0u64;
                    while count < total {
                        count += ch.consume_all(|item| {
                            black_box(item);
                        }) as u64;
                        if count < total {
                            std::hint::spin_loop();
                        }
                    }

                    for h in handles {
                        h.join().unwrap();
                    }
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_spsc, bench_mpsc);
criterion_main!(benches);
