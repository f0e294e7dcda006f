use std::ops::{Add, AddAssign, Neg, Sub, SubAssign};

use jiff::SignedDuration;

pub type Cost = i64;
pub type Distance = i64;

fn saturating_neg_duration(value: SignedDuration) -> SignedDuration {
    match value.checked_neg() {
        Some(neg) => neg,
        None => SignedDuration::MAX,
    }
}

/// Objective triple ordered lexicographically by (cost, duration, distance).
/// Arithmetic saturates so the `NO_EVAL` / `NO_GAIN` sentinels stay
/// well-behaved under composition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Eval {
    pub cost: Cost,
    pub duration: SignedDuration,
    pub distance: Distance,
}

/// Unreachable candidate marker.
pub const NO_EVAL: Eval = Eval {
    cost: Cost::MAX,
    duration: SignedDuration::ZERO,
    distance: 0,
};

/// Unimproving candidate marker.
pub const NO_GAIN: Eval = Eval {
    cost: Cost::MIN,
    duration: SignedDuration::ZERO,
    distance: 0,
};

impl Eval {
    pub const fn new(cost: Cost, duration: SignedDuration, distance: Distance) -> Self {
        Eval {
            cost,
            duration,
            distance,
        }
    }

    pub const fn cost_only(cost: Cost) -> Self {
        Eval {
            cost,
            duration: SignedDuration::ZERO,
            distance: 0,
        }
    }
}

impl AddAssign for Eval {
    fn add_assign(&mut self, rhs: Eval) {
        self.cost = self.cost.saturating_add(rhs.cost);
        self.duration = self.duration.saturating_add(rhs.duration);
        self.distance = self.distance.saturating_add(rhs.distance);
    }
}

impl SubAssign for Eval {
    fn sub_assign(&mut self, rhs: Eval) {
        self.cost = self.cost.saturating_sub(rhs.cost);
        self.duration = self.duration.saturating_sub(rhs.duration);
        self.distance = self.distance.saturating_sub(rhs.distance);
    }
}

impl Add for Eval {
    type Output = Eval;

    fn add(mut self, rhs: Eval) -> Eval {
        self += rhs;
        self
    }
}

impl Sub for Eval {
    type Output = Eval;

    fn sub(mut self, rhs: Eval) -> Eval {
        self -= rhs;
        self
    }
}

impl Neg for Eval {
    type Output = Eval;

    fn neg(self) -> Eval {
        Eval {
            cost: if self.cost == Cost::MIN {
                Cost::MAX
            } else if self.cost == Cost::MAX {
                Cost::MIN
            } else {
                -self.cost
            },
            duration: saturating_neg_duration(self.duration),
            distance: if self.distance == Distance::MIN {
                Distance::MAX
            } else if self.distance == Distance::MAX {
                Distance::MIN
            } else {
                -self.distance
            },
        }
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    fn eval(cost: Cost, secs: i64, distance: Distance) -> Eval {
        Eval::new(cost, SignedDuration::from_secs(secs), distance)
    }

    #[test]
    fn test_add_sub() {
        let a = eval(10, 100, 1000);
        let b = eval(1, 2, 3);

        assert_eq!(a + b, eval(11, 102, 1003));
        assert_eq!(a - b, eval(9, 98, 997));
    }

    #[test]
    fn test_ordering_is_lexicographic() {
        assert!(eval(1, 100, 100) < eval(2, 0, 0));
        assert!(eval(1, 1, 100) < eval(1, 2, 0));
        assert!(eval(1, 1, 1) < eval(1, 1, 2));
        assert_eq!(eval(1, 1, 1), eval(1, 1, 1));
    }

    #[test]
    fn test_sentinels_saturate() {
        let gain = eval(500, 0, 0);

        assert_eq!((NO_EVAL + gain).cost, Cost::MAX);
        assert_eq!((NO_GAIN - gain).cost, Cost::MIN);
        assert_eq!((-NO_GAIN).cost, Cost::MAX);
        assert_eq!((-NO_EVAL).cost, Cost::MIN);
    }

    #[test]
    fn test_any_candidate_beats_no_eval() {
        assert!(eval(Cost::MAX - 1, 0, 0) < NO_EVAL);
        assert!(NO_GAIN < eval(Cost::MIN + 1, 0, 0));
    }
}
