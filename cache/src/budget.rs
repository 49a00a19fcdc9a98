use std::time::Duration;

/// Remaining synchronous wait time per priority lane for one frame.
///
/// Budgets are kept non-increasing in the lane index: a more urgent lane never
/// has less time left than a less urgent one. Time used at lane `p` is charged
/// to every lane up to and including `p`, since it was spent by the same
/// consumer within the same frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IoTimeBudget {
  budget: Box<[i64]>,
}

impl IoTimeBudget {
  /// Creates an exhausted budget for `num_lanes` lanes.
  pub fn new(num_lanes: usize) -> Self {
    Self {
      budget: vec![0; num_lanes].into_boxed_slice(),
    }
  }

  /// Resets the budget from a per-lane schedule in nanoseconds.
  ///
  /// A short schedule is padded with its last value, a long one truncated.
  /// Values that would increase with the lane index are clamped down.
  pub fn reset(&mut self, schedule: &[u64]) {
    let mut last = 0i64;
    for (lane, slot) in self.budget.iter_mut().enumerate() {
      let nanos = match schedule.get(lane) {
        Some(&ns) => i64::try_from(ns).unwrap_or(i64::MAX),
        None => last,
      };
      *slot = if lane == 0 { nanos } else { nanos.min(last) };
      last = *slot;
    }
  }

  /// Drops all remaining time.
  pub fn clear(&mut self) {
    self.budget.iter_mut().for_each(|slot| *slot = 0);
  }

  #[inline]
  pub fn num_lanes(&self) -> usize {
    self.budget.len()
  }

  /// Remaining time for `priority` in nanoseconds; zero or negative means the
  /// lane is exhausted.
  #[inline]
  pub fn time_left(&self, priority: usize) -> i64 {
    self.budget[priority]
  }

  /// Charges `elapsed` to lanes `0..=priority`.
  pub fn use_time(&mut self, elapsed: Duration, priority: usize) {
    let nanos = i64::try_from(elapsed.as_nanos()).unwrap_or(i64::MAX);
    for slot in &mut self.budget[..=priority] {
      *slot = slot.saturating_sub(nanos);
    }
    for lane in priority + 1..self.budget.len() {
      if self.budget[lane] > self.budget[lane - 1] {
        self.budget[lane] = self.budget[lane - 1];
      }
    }
  }

  pub fn as_slice(&self) -> &[i64] {
    &self.budget
  }
}

#[cfg(test)]
mod test {
  use super::*;

  fn is_non_increasing(budget: &IoTimeBudget) -> bool {
    budget.as_slice().windows(2).all(|w| w[0] >= w[1])
  }

  #[test]
  fn starts_exhausted() {
    let budget = IoTimeBudget::new(3);
    assert_eq!(budget.as_slice(), &[0, 0, 0]);
  }

  #[test]
  fn reset_clamps_increasing_schedule() {
    let mut budget = IoTimeBudget::new(4);
    budget.reset(&[100, 200, 50, 80]);
    assert_eq!(budget.as_slice(), &[100, 100, 50, 50]);
    assert!(is_non_increasing(&budget));
  }

  #[test]
  fn reset_pads_and_truncates() {
    let mut budget = IoTimeBudget::new(3);
    budget.reset(&[30, 10]);
    assert_eq!(budget.as_slice(), &[30, 10, 10]);

    budget.reset(&[5, 4, 3, 2, 1]);
    assert_eq!(budget.as_slice(), &[5, 4, 3]);

    budget.reset(&[]);
    assert_eq!(budget.as_slice(), &[0, 0, 0]);
  }

  #[test]
  fn use_time_charges_more_urgent_lanes_and_clamps_the_rest() {
    let mut budget = IoTimeBudget::new(3);
    budget.reset(&[1_000, 800, 600]);

    budget.use_time(Duration::from_nanos(300), 1);
    assert_eq!(budget.as_slice(), &[700, 500, 500]);

    budget.use_time(Duration::from_nanos(600), 0);
    assert_eq!(budget.as_slice(), &[100, 100, 100]);
    assert!(is_non_increasing(&budget));

    budget.use_time(Duration::from_nanos(250), 2);
    assert_eq!(budget.as_slice(), &[-150, -150, -150]);
  }

  #[test]
  fn clear_exhausts_all_lanes() {
    let mut budget = IoTimeBudget::new(2);
    budget.reset(&[10, 5]);
    budget.clear();
    assert_eq!(budget.as_slice(), &[0, 0]);
  }
}
