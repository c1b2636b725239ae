//! Throughput of a full tick on a busy battlefield.

use criterion::{criterion_group, criterion_main, Criterion};
use tss_sim::actions::{ActionData, PlayerAction};
use tss_sim::api::fixture_world;
use tss_sim::data::orders;
use tss_sim::fixed::Xy;
use tss_sim::fixtures;

fn bench_step(c: &mut Criterion) {
    c.bench_function("step_200_marines", |b| {
        let mut sim = fixture_world(128, 128, 7);
        let data = sim.data();
        let mut blue = Vec::new();
        {
            let mut state = sim.state_mut();
            for i in 0..100 {
                blue.push(
                    state
                        .place_completed_unit(
                            &data,
                            fixtures::MARINE,
                            0,
                            Xy::new(200 + (i % 10) * 40, 200 + (i / 10) * 40),
                        )
                        .unwrap(),
                );
            }
            for i in 0..100 {
                state
                    .place_completed_unit(
                        &data,
                        fixtures::MARINE,
                        1,
                        Xy::new(2600 + (i % 10) * 40, 200 + (i / 10) * 40),
                    )
                    .unwrap();
            }
        }
        sim.step(vec![
            PlayerAction { player: 0, data: ActionData::Select(blue[..12.min(blue.len())].to_vec()) },
            PlayerAction {
                player: 0,
                data: ActionData::Order {
                    pos: Xy::new(2600, 400),
                    target: None,
                    target_type: None,
                    order: orders::ATTACK_MOVE,
                    queued: false,
                },
            },
        ])
        .unwrap();
        b.iter(|| {
            sim.step(Vec::new()).unwrap();
        });
    });
}

criterion_group!(benches, bench_step);
criterion_main!(benches);
