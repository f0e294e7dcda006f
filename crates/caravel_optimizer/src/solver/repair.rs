use fxhash::{FxHashMap, FxHashSet};
use tracing::{debug, warn};

use crate::problem::{
    eval::Cost,
    job::JobRank,
    vehicle::VehicleRank,
    vehicle_routing_problem::VehicleRoutingProblem,
};
use crate::solver::insertion::{
    action_cost_from_duration, action_time_delta_pd_general, action_time_delta_single,
    addition_cost_travel, addition_cost_travel_pd, job_budget, route_action_time_duration,
    route_budget_sum, route_eval_for_vehicle,
};
use crate::solver::output::{format_route, Solution, Summary};
use crate::solver::solution::tw_route::TwRoute;

/// Route cost as the budget check sees it: travel plus fixed cost, plus
/// priced action time when configured.
fn total_internal_cost(
    problem: &VehicleRoutingProblem,
    v_rank: VehicleRank,
    ranks: &[JobRank],
) -> Cost {
    let eval = route_eval_for_vehicle(problem, v_rank, ranks);
    let mut cost = eval
        .cost
        .saturating_add(problem.vehicle(v_rank).fixed_cost());
    if problem.include_action_time_in_budget() {
        let action = route_action_time_duration(problem, v_rank, ranks);
        cost = cost.saturating_add(action_cost_from_duration(problem, v_rank, action));
    }
    cost
}

struct Candidate {
    job_rank: JobRank,
    is_shipment: bool,
    budget: Cost,
}

struct DensifyPick {
    new_ranks: Vec<JobRank>,
    added_pickup: JobRank,
    added_delivery: Option<JobRank>,
}

/// Enforces per-route monetary budgets after the search: each kept route's
/// internal cost must be covered by the budgets of its tasks. Under-budget
/// routes are densified with unassigned work when possible, stripped of
/// their lowest-yield tasks otherwise, and dropped as a last resort. Pinned
/// tasks are never removed.
pub fn repair_budget(problem: &VehicleRoutingProblem, solution: &mut Solution) {
    let mut kept_routes = Vec::with_capacity(solution.routes.len());
    let mut extra_unassigned: Vec<JobRank> = Vec::new();
    let mut remove_from_unassigned: FxHashSet<JobRank> = FxHashSet::default();
    let mut changed = false;

    let unassigned_set: FxHashSet<JobRank> = solution.unassigned.iter().copied().collect();

    for route in &solution.routes {
        let v_rank = route.v_rank;
        let ranks = route.job_ranks();

        let cur_cost = total_internal_cost(problem, v_rank, &ranks);
        let cur_budget = route_budget_sum(problem, &ranks);

        // Routes whose tasks bring no budget at all are exempt.
        let has_any_budget = ranks.iter().any(|&r| job_budget(problem.job(r)) > 0);
        if !has_any_budget || cur_budget >= cur_cost {
            kept_routes.push(route.clone());
            continue;
        }

        let Ok(mut tw_route) = TwRoute::new(problem, v_rank) else {
            warn!(v_rank, "skipping budget repair for vehicle with inconsistent breaks");
            kept_routes.push(route.clone());
            continue;
        };
        tw_route.seed_relaxed_from_job_ranks(problem, ranks.clone());

        // Densify with the best-funded unassigned candidates.
        if let Some(pick) = densify(
            problem,
            &tw_route,
            &unassigned_set,
            &remove_from_unassigned,
            cur_cost,
            cur_budget,
        ) {
            debug!(
                v_rank,
                added = pick.added_pickup,
                "budget repair densified route"
            );
            remove_from_unassigned.insert(pick.added_pickup);
            if let Some(delivery) = pick.added_delivery {
                remove_from_unassigned.insert(delivery);
            }

            tw_route.seed_relaxed_from_job_ranks(problem, pick.new_ranks);
            kept_routes.push(format_route(problem, &tw_route));
            changed = true;
            continue;
        }

        // Greedy removal of the lowest-yield tasks.
        let (ranks_local, removed_ranks) = strip_lowest_yield(problem, v_rank, ranks);

        let final_cost = total_internal_cost(problem, v_rank, &ranks_local);
        let final_budget = route_budget_sum(problem, &ranks_local);
        if !ranks_local.is_empty() && final_budget >= final_cost {
            debug!(
                v_rank,
                removed = removed_ranks.len(),
                "budget repair removed tasks from route"
            );
            tw_route.seed_relaxed_from_job_ranks(problem, ranks_local);
            kept_routes.push(format_route(problem, &tw_route));
            extra_unassigned.extend(removed_ranks);
        } else {
            debug!(v_rank, "budget repair dropped route");
            extra_unassigned.extend(route.job_ranks());
        }
        changed = true;
    }

    if !changed {
        return;
    }

    // Rebuild the unassigned pool and the summary, keeping the computing
    // times stamp.
    let mut merged_unassigned: Vec<JobRank> = solution
        .unassigned
        .iter()
        .copied()
        .filter(|rank| !remove_from_unassigned.contains(rank))
        .collect();
    merged_unassigned.extend(extra_unassigned);

    let computing_times = solution.summary.computing_times;
    solution.routes = kept_routes;
    solution.unassigned = merged_unassigned;

    let mut summary = Summary::new(
        problem,
        solution.routes.len() as u32,
        solution.unassigned.len() as u32,
    );
    for route in &solution.routes {
        summary.aggregate_route(route);
    }
    summary.computing_times = computing_times;
    solution.summary = summary;
}

/// Tries up to K unassigned candidates, best budget first; returns the
/// insertion with the largest positive gain that brings the route back
/// within budget.
fn densify(
    problem: &VehicleRoutingProblem,
    tw_route: &TwRoute,
    unassigned_set: &FxHashSet<JobRank>,
    already_taken: &FxHashSet<JobRank>,
    cur_cost: Cost,
    cur_budget: Cost,
) -> Option<DensifyPick> {
    let v_rank = tw_route.v_rank;

    let mut candidates: Vec<Candidate> = unassigned_set
        .iter()
        .copied()
        .filter(|rank| !already_taken.contains(rank))
        .filter(|&rank| problem.vehicle_ok_with_job(v_rank, rank))
        .filter_map(|rank| {
            let job = problem.job(rank);
            if job.is_pickup() {
                // Both shipment halves must still be unassigned.
                let delivery = rank + 1;
                if !unassigned_set.contains(&delivery) || already_taken.contains(&delivery) {
                    return None;
                }
                Some(Candidate {
                    job_rank: rank,
                    is_shipment: true,
                    budget: job_budget(job),
                })
            } else if job.is_single() {
                Some(Candidate {
                    job_rank: rank,
                    is_shipment: false,
                    budget: job_budget(job),
                })
            } else {
                None
            }
        })
        .collect();

    candidates.sort_by(|a, b| b.budget.cmp(&a.budget).then(a.job_rank.cmp(&b.job_rank)));
    candidates.truncate(problem.budget_densify_candidates_k() as usize);

    let route_len = tw_route.route.len();
    let mut best_gain: Cost = 0;
    let mut best_pick: Option<DensifyPick> = None;

    for candidate in &candidates {
        let budget_added = candidate.budget;

        if candidate.is_shipment {
            let pickup_rank = candidate.job_rank;
            let delivery_rank = pickup_rank + 1;

            for pickup_pos in 0..=route_len {
                for delivery_pos in pickup_pos..=route_len {
                    // Candidate range: pickup, the jobs currently in between,
                    // then the delivery.
                    let mut replaced = Vec::with_capacity(delivery_pos - pickup_pos + 2);
                    replaced.push(pickup_rank);
                    let mut between_deliveries = problem.zero_amount().clone();
                    for &between in &tw_route.route[pickup_pos..delivery_pos] {
                        replaced.push(between);
                        let between_job = problem.job(between);
                        if between_job.is_single() {
                            between_deliveries += between_job.delivery();
                        }
                    }
                    replaced.push(delivery_rank);

                    if !tw_route.is_valid_addition_for_capacity_inclusion(
                        problem,
                        between_deliveries.clone(),
                        replaced.iter().copied(),
                        pickup_pos,
                        delivery_pos,
                    ) {
                        continue;
                    }
                    if !tw_route.is_valid_range_addition_for_tw(
                        problem,
                        &between_deliveries,
                        replaced.iter().copied(),
                        pickup_pos,
                        delivery_pos,
                        true,
                    ) {
                        continue;
                    }

                    // Delivery rank counted in the route holding the pickup.
                    let delivery_after = if delivery_pos == pickup_pos {
                        pickup_pos + 1
                    } else {
                        delivery_pos + 1
                    };
                    let delta_eval = addition_cost_travel_pd(
                        problem,
                        pickup_rank,
                        v_rank,
                        &tw_route.route,
                        pickup_pos,
                        delivery_after,
                    );
                    let mut delta_cost = delta_eval.cost;
                    if problem.include_action_time_in_budget() {
                        let action = action_time_delta_pd_general(
                            problem,
                            v_rank,
                            &tw_route.route,
                            pickup_pos,
                            delivery_pos,
                            pickup_rank,
                        );
                        delta_cost = delta_cost
                            .saturating_add(action_cost_from_duration(problem, v_rank, action));
                    }

                    let new_cost = cur_cost.saturating_add(delta_cost);
                    let new_budget = cur_budget.saturating_add(budget_added);
                    let gain = (new_budget - new_cost) - (cur_budget - cur_cost);
                    if new_budget >= new_cost && gain > best_gain {
                        let mut new_ranks = tw_route.route.clone();
                        new_ranks.insert(pickup_pos, pickup_rank);
                        new_ranks.insert(delivery_after, delivery_rank);
                        best_gain = gain;
                        best_pick = Some(DensifyPick {
                            new_ranks,
                            added_pickup: pickup_rank,
                            added_delivery: Some(delivery_rank),
                        });
                    }
                }
            }
        } else {
            let job_rank = candidate.job_rank;
            let job = problem.job(job_rank);

            for position in 0..=route_len {
                if !tw_route.is_valid_addition_for_capacity(
                    problem,
                    job.pickup(),
                    job.delivery(),
                    position,
                ) || !tw_route.is_valid_addition_for_tw(problem, job_rank, position)
                {
                    continue;
                }

                let delta_eval =
                    addition_cost_travel(problem, job_rank, v_rank, &tw_route.route, position);
                let mut delta_cost = delta_eval.cost;
                if problem.include_action_time_in_budget() {
                    let action = action_time_delta_single(
                        problem,
                        v_rank,
                        &tw_route.route,
                        job_rank,
                        position,
                    );
                    delta_cost = delta_cost
                        .saturating_add(action_cost_from_duration(problem, v_rank, action));
                }

                let new_cost = cur_cost.saturating_add(delta_cost);
                let new_budget = cur_budget.saturating_add(budget_added);
                let gain = (new_budget - new_cost) - (cur_budget - cur_cost);
                if new_budget >= new_cost && gain > best_gain {
                    let mut new_ranks = tw_route.route.clone();
                    new_ranks.insert(position, job_rank);
                    best_gain = gain;
                    best_pick = Some(DensifyPick {
                        new_ranks,
                        added_pickup: job_rank,
                        added_delivery: None,
                    });
                }
            }
        }
    }

    best_pick
}

/// Greedily removes the non-pinned task (or shipment pair) that most
/// improves budget slack, until the route is feasible or nothing improves.
fn strip_lowest_yield(
    problem: &VehicleRoutingProblem,
    v_rank: VehicleRank,
    ranks: Vec<JobRank>,
) -> (Vec<JobRank>, Vec<JobRank>) {
    let mut ranks_local = ranks;
    let mut removed_ranks: Vec<JobRank> = Vec::new();

    while !ranks_local.is_empty() {
        let cur_cost = total_internal_cost(problem, v_rank, &ranks_local);
        let cur_budget = route_budget_sum(problem, &ranks_local);
        if cur_budget >= cur_cost {
            break;
        }

        let position_by_rank: FxHashMap<JobRank, usize> = ranks_local
            .iter()
            .enumerate()
            .map(|(position, &rank)| (rank, position))
            .collect();

        let mut best_delta: Cost = 0;
        let mut best_new_ranks: Option<Vec<JobRank>> = None;
        let mut best_removed: Vec<JobRank> = Vec::new();

        for (position, &job_rank) in ranks_local.iter().enumerate() {
            let job = problem.job(job_rank);
            if job.pinned() {
                continue;
            }

            let candidate_ranks = if job.is_single() {
                let mut candidate = ranks_local.clone();
                candidate.remove(position);
                Some((candidate, vec![job_rank]))
            } else if job.is_pickup() {
                let delivery_rank = job_rank + 1;
                match position_by_rank.get(&delivery_rank) {
                    Some(&delivery_position) if !problem.job(delivery_rank).pinned() => {
                        let candidate = ranks_local
                            .iter()
                            .enumerate()
                            .filter(|&(q, _)| q != position && q != delivery_position)
                            .map(|(_, &rank)| rank)
                            .collect();
                        Some((candidate, vec![job_rank, delivery_rank]))
                    }
                    _ => None,
                }
            } else {
                None
            };

            let Some((candidate, removed)) = candidate_ranks else {
                continue;
            };

            let new_cost = total_internal_cost(problem, v_rank, &candidate);
            let new_budget = route_budget_sum(problem, &candidate);
            let delta = (new_budget - new_cost) - (cur_budget - cur_cost);
            if delta > best_delta {
                best_delta = delta;
                best_new_ranks = Some(candidate);
                best_removed = removed;
            }
        }

        let Some(new_ranks) = best_new_ranks else {
            break;
        };
        removed_ranks.extend(best_removed);
        ranks_local = new_ranks;
    }

    (ranks_local, removed_ranks)
}

#[cfg(test)]
mod tests {

    use super::*;
    use crate::problem::amount::Amount;
    use crate::solver::output::format_solution;
    use crate::test_utils::ProblemFixture;

    fn formatted(problem: &VehicleRoutingProblem, ranks: Vec<JobRank>) -> Solution {
        let mut tw_route = TwRoute::new(problem, 0).unwrap();
        tw_route.seed_relaxed_from_job_ranks(problem, ranks);
        format_solution(problem, &[tw_route], vec![])
    }

    #[test]
    fn test_budget_covering_route_is_kept() {
        // Travel 0 -> job -> 0 costs 200; budget 250 covers it.
        let problem = ProblemFixture::new(2)
            .travel_secs(100)
            .include_action_time_in_budget()
            .job(|j| {
                j.set_budget(250);
            })
            .vehicle(|_| {})
            .build();

        let mut solution = formatted(&problem, vec![0]);
        repair_budget(&problem, &mut solution);

        assert_eq!(solution.routes.len(), 1);
        assert!(solution.unassigned.is_empty());
    }

    #[test]
    fn test_route_without_budgets_is_exempt() {
        let problem = ProblemFixture::new(2)
            .travel_secs(100)
            .job(|_| {})
            .vehicle(|_| {})
            .build();

        let mut solution = formatted(&problem, vec![0]);
        repair_budget(&problem, &mut solution);

        assert_eq!(solution.routes.len(), 1);
    }

    #[test]
    fn test_short_budget_route_is_dropped() {
        let problem = ProblemFixture::new(2)
            .travel_secs(100)
            .job(|j| {
                j.set_budget(199);
            })
            .vehicle(|_| {})
            .build();

        let mut solution = formatted(&problem, vec![0]);
        repair_budget(&problem, &mut solution);

        assert!(solution.routes.is_empty());
        assert_eq!(solution.unassigned, vec![0]);
        assert_eq!(solution.summary.routes, 0);
        assert_eq!(solution.summary.unassigned, 1);
    }

    #[test]
    fn test_densify_rescues_route() {
        // Locations on a line, 100s per unit. The route serves job_0 at
        // location 1 with budget 150 (cost 200: 50 short). job_1 sits at the
        // same location with budget 300: inserting it adds no travel and
        // covers the deficit.
        let problem = ProblemFixture::new(3)
            .durations(vec![
                vec![0, 100, 100],
                vec![100, 0, 0],
                vec![100, 0, 0],
            ])
            .job(|j| {
                j.set_budget(150);
            })
            .job(|j| {
                j.set_budget(300);
            })
            .vehicle(|_| {})
            .build();

        let mut solution = formatted(&problem, vec![0]);
        solution.unassigned = vec![1];
        solution.summary.unassigned = 1;

        repair_budget(&problem, &mut solution);

        assert_eq!(solution.routes.len(), 1);
        assert_eq!(solution.routes[0].job_ranks().len(), 2);
        assert!(solution.routes[0].job_ranks().contains(&1));
        assert!(solution.unassigned.is_empty());
        assert_eq!(solution.summary.unassigned, 0);
    }

    #[test]
    fn test_removal_keeps_funded_tasks() {
        // job_0 pays for its own detour, job_1 does not: stripping job_1
        // makes the route feasible again.
        let problem = ProblemFixture::new(3)
            .durations(vec![
                vec![0, 100, 300],
                vec![100, 0, 300],
                vec![300, 300, 0],
            ])
            .job(|j| {
                j.set_budget(250);
            })
            .job(|j| {
                j.set_budget(10);
            })
            .vehicle(|_| {})
            .build();

        let mut solution = formatted(&problem, vec![0, 1]);
        repair_budget(&problem, &mut solution);

        assert_eq!(solution.routes.len(), 1);
        assert_eq!(solution.routes[0].job_ranks(), vec![0]);
        assert_eq!(solution.unassigned, vec![1]);
    }

    #[test]
    fn test_pinned_tasks_survive_removal() {
        // The pinned job does not cover its cost, but it may not be removed,
        // and removing job_1 alone does not make the route feasible: the
        // whole route is dropped.
        let problem = ProblemFixture::new(3)
            .travel_secs(1000)
            .job(|j| {
                j.set_budget(10);
                j.set_pinned(true);
            })
            .job(|j| {
                j.set_budget(10);
            })
            .vehicle(|v| {
                v.set_steps(vec!["job_0".into()]);
            })
            .build();

        let mut solution = formatted(&problem, vec![0, 1]);
        repair_budget(&problem, &mut solution);

        assert!(solution.routes.is_empty());
        let mut unassigned = solution.unassigned.clone();
        unassigned.sort_unstable();
        assert_eq!(unassigned, vec![0, 1]);
    }

    #[test]
    fn test_shipments_are_removed_as_pairs() {
        // One funded single job plus an unfunded shipment detour.
        let problem = ProblemFixture::new(4)
            .durations(vec![
                vec![0, 100, 500, 500],
                vec![100, 0, 500, 500],
                vec![500, 500, 0, 100],
                vec![500, 500, 100, 0],
            ])
            .job(|j| {
                j.set_budget(250);
            })
            .shipment(
                |p| {
                    p.set_amount(Amount::from_vec(vec![1]));
                    p.set_budget(5);
                },
                |d| {
                    d.set_amount(Amount::from_vec(vec![1]));
                },
            )
            .vehicle(|v| {
                v.set_capacity(Amount::from_vec(vec![1]));
            })
            .build();

        let mut solution = formatted(&problem, vec![0, 1, 2]);
        repair_budget(&problem, &mut solution);

        assert_eq!(solution.routes.len(), 1);
        assert_eq!(solution.routes[0].job_ranks(), vec![0]);
        let mut unassigned = solution.unassigned.clone();
        unassigned.sort_unstable();
        assert_eq!(unassigned, vec![1, 2]);
    }
}
