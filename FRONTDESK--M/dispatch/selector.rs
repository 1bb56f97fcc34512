//! Workload-balanced choice of the employee who receives an offer.
//!
//! Ranking is recomputed from current workloads on every call, so there is no
//! rotation pointer to keep in sync when staff join or leave a department:
//!
//! 1. Employees with nothing in progress ("free") are preferred; among them only
//!    those with the fewest completed tasks stay in the running.
//! 2. When everyone is busy, the fewest in-progress tasks wins, then the fewest
//!    completed tasks within that group.
//! 3. Remaining ties are broken uniformly at random.

use rand::{seq::SliceRandom, Rng};
use serde::{Deserialize, Serialize};

use crate::{model::Employee, workload::Workload};

/// Employee paired with their current workload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankedEmployee {
    /// Roster entry.
    pub employee: Employee,
    /// Snapshot taken just before selection.
    pub workload: Workload,
}

/// Which partition the winner was drawn from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Pool {
    /// Someone had nothing in progress.
    Free,
    /// Everyone was busy; least-loaded employees competed.
    Busy,
}

/// Outcome of a selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    /// Chosen employee.
    pub employee: Employee,
    /// Their workload at selection time.
    pub workload: Workload,
    /// Partition the choice came from.
    pub pool: Pool,
    /// Size of the final tie set the random pick was made over.
    pub candidates: usize,
}

fn keep_minimum<'a, F>(pool: Vec<&'a RankedEmployee>, key: F) -> Vec<&'a RankedEmployee>
where
    F: Fn(&Workload) -> usize,
{
    let Some(minimum) = pool.iter().map(|ranked| key(&ranked.workload)).min() else {
        return pool;
    };
    pool.into_iter()
        .filter(|ranked| key(&ranked.workload) == minimum)
        .collect()
}

/// Narrows the roster to the final tie set. `None` for an empty roster.
#[must_use]
pub fn candidates(roster: &[RankedEmployee]) -> Option<(Pool, Vec<&RankedEmployee>)> {
    if roster.is_empty() {
        return None;
    }
    let free: Vec<_> = roster
        .iter()
        .filter(|ranked| ranked.workload.is_free())
        .collect();
    if !free.is_empty() {
        return Some((Pool::Free, keep_minimum(free, |w| w.completed)));
    }
    let least_busy = keep_minimum(roster.iter().collect(), |w| w.in_progress);
    Some((Pool::Busy, keep_minimum(least_busy, |w| w.completed)))
}

/// Picks one employee. `None` only when the roster is empty.
pub fn select<R>(roster: &[RankedEmployee], rng: &mut R) -> Option<Selection>
where
    R: Rng + ?Sized,
{
    let (pool, tied) = candidates(roster)?;
    let winner = tied.choose(rng)?;
    Some(Selection {
        employee: winner.employee.clone(),
        workload: winner.workload,
        pool,
        candidates: tied.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::SmallRng, SeedableRng};
    use std::collections::HashSet;

    fn ranked(id: &str, completed: usize, in_progress: usize) -> RankedEmployee {
        RankedEmployee {
            employee: Employee {
                id: id.into(),
                name: id.to_uppercase(),
            },
            workload: Workload {
                completed,
                in_progress,
            },
        }
    }

    fn rng() -> SmallRng {
        SmallRng::seed_from_u64(7)
    }

    #[test]
    fn empty_roster_has_no_selection() {
        assert!(select(&[], &mut rng()).is_none());
    }

    #[test]
    fn unique_minimum_among_free_is_deterministic() {
        let roster = [ranked("a", 0, 0), ranked("b", 3, 0)];
        for seed in 0..32 {
            let pick = select(&roster, &mut SmallRng::seed_from_u64(seed)).unwrap();
            assert_eq!(pick.employee.id, "a");
            assert_eq!(pick.pool, Pool::Free);
            assert_eq!(pick.candidates, 1);
        }
    }

    #[test]
    fn free_employee_beats_less_experienced_busy_one() {
        let roster = [ranked("busy", 0, 1), ranked("idle", 9, 0)];
        let pick = select(&roster, &mut rng()).unwrap();
        assert_eq!(pick.employee.id, "idle");
    }

    #[test]
    fn all_busy_excludes_the_most_loaded() {
        let roster = [ranked("a", 4, 1), ranked("b", 2, 1), ranked("c", 0, 2)];
        let (pool, tied) = candidates(&roster).unwrap();
        assert_eq!(pool, Pool::Busy);
        let ids: Vec<_> = tied.iter().map(|r| r.employee.id.as_str()).collect();
        assert_eq!(ids, ["b"]);
    }

    #[test]
    fn busy_ties_keep_everyone_at_both_minimums() {
        let roster = [
            ranked("a", 1, 1),
            ranked("b", 1, 1),
            ranked("c", 0, 3),
            ranked("d", 2, 1),
        ];
        let (_, tied) = candidates(&roster).unwrap();
        let ids: HashSet<_> = tied.iter().map(|r| r.employee.id.as_str()).collect();
        assert_eq!(ids, HashSet::from(["a", "b"]));
    }

    #[test]
    fn random_pick_reaches_every_true_tie() {
        let roster = [ranked("a", 1, 0), ranked("b", 1, 0), ranked("c", 1, 0), ranked("d", 5, 0)];
        let mut rng = rng();
        let seen: HashSet<_> = (0..200)
            .map(|_| select(&roster, &mut rng).unwrap().employee.id)
            .collect();
        assert_eq!(seen.len(), 3);
        assert!(!seen.contains("d"));
    }

    #[test]
    fn single_employee_is_always_chosen() {
        let roster = [ranked("solo", 12, 4)];
        let pick = select(&roster, &mut rng()).unwrap();
        assert_eq!(pick.employee.id, "solo");
        assert_eq!(pick.pool, Pool::Busy);
    }
}
