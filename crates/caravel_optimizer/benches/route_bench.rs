use criterion::{criterion_group, criterion_main, Criterion};

use caravel_optimizer::problem::amount::Amount;
use caravel_optimizer::problem::job::JobBuilder;
use caravel_optimizer::problem::travel_cost_matrix::TravelMatrices;
use caravel_optimizer::problem::vehicle::VehicleBuilder;
use caravel_optimizer::problem::vehicle_routing_problem::{
    VehicleRoutingProblem, VehicleRoutingProblemBuilder,
};
use caravel_optimizer::solver::solution::tw_route::TwRoute;

const NB_JOBS: usize = 100;

fn build_problem() -> VehicleRoutingProblem {
    let n = NB_JOBS + 1;
    let durations = (0..n as i64)
        .map(|i| (0..n as i64).map(|j| (i - j).abs() * 30).collect())
        .collect();

    let mut builder = VehicleRoutingProblemBuilder::default();
    for i in 0..NB_JOBS {
        let mut job = JobBuilder::default();
        job.set_external_id(format!("job_{i}"));
        job.set_location_id(i + 1);
        job.set_delivery(Amount::from_vec(vec![1]));
        builder.add_job(job.build());
    }
    let mut vehicle = VehicleBuilder::default();
    vehicle.set_external_id("vehicle");
    vehicle.set_profile("car");
    vehicle.set_start_location(0);
    vehicle.set_end_location(0);
    vehicle.set_capacity(Amount::from_vec(vec![NB_JOBS as i64]));
    builder.add_vehicle(vehicle.build());
    builder.set_matrix("car", TravelMatrices::from_durations(durations));

    builder.build().expect("bench problem must build")
}

fn bench_route_updates(c: &mut Criterion) {
    let problem = build_problem();

    c.bench_function("tw_route_insertions", |b| {
        b.iter(|| {
            let mut route = TwRoute::new(&problem, 0).unwrap();
            for i in 0..NB_JOBS {
                route.add(&problem, i, i);
            }
            route
        })
    });

    let mut route = TwRoute::new(&problem, 0).unwrap();
    for i in 0..NB_JOBS {
        route.add(&problem, i, i);
    }

    c.bench_function("tw_route_validity_sweep", |b| {
        b.iter(|| {
            let mut feasible = 0usize;
            for rank in 0..=route.route.len() {
                if route.is_valid_addition_for_tw(&problem, NB_JOBS / 2, rank) {
                    feasible += 1;
                }
            }
            feasible
        })
    });
}

criterion_group!(benches, bench_route_updates);
criterion_main!(benches);
