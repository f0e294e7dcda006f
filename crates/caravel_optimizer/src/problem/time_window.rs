use jiff::Timestamp;
use serde::Serialize;
use smallvec::SmallVec;

/// Closed service window. A missing bound in the input maps to the matching
/// `Timestamp` extreme, so schedule propagation never deals with options.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    start: Timestamp,
    end: Timestamp,
}

impl TimeWindow {
    pub fn new(start: Option<Timestamp>, end: Option<Timestamp>) -> Self {
        TimeWindow {
            start: start.unwrap_or(Timestamp::MIN),
            end: end.unwrap_or(Timestamp::MAX),
        }
    }

    pub fn from_iso(start: Option<&str>, end: Option<&str>) -> Self {
        TimeWindow::new(
            start.map(|s| s.parse().expect("Error parsing ISO")),
            end.map(|e| e.parse().expect("Error parsing ISO")),
        )
    }

    pub fn full() -> Self {
        TimeWindow::new(None, None)
    }

    pub fn start(&self) -> Timestamp {
        self.start
    }

    pub fn end(&self) -> Timestamp {
        self.end
    }

    pub fn contains(&self, instant: Timestamp) -> bool {
        self.start <= instant && instant <= self.end
    }

    /// An arrival is satisfied as long as it does not overshoot the window.
    /// Arriving early means waiting, not a violation.
    pub fn is_satisfied(&self, arrival: Timestamp) -> bool {
        arrival <= self.end
    }
}

impl Default for TimeWindow {
    fn default() -> Self {
        TimeWindow::full()
    }
}

/// Ordered, non-overlapping list of windows. Always non-empty: a job or break
/// without explicit windows gets the full one.
#[derive(Serialize, Debug, Clone)]
pub struct TimeWindows(SmallVec<[TimeWindow; 1]>);

impl TimeWindows {
    pub fn from_vec(time_windows: Vec<TimeWindow>) -> Self {
        if time_windows.is_empty() {
            return TimeWindows::default();
        }
        let mut windows = SmallVec::from_vec(time_windows);
        windows.sort_by_key(|tw: &TimeWindow| (tw.start(), tw.end()));
        TimeWindows(windows)
    }

    pub fn single(time_window: TimeWindow) -> Self {
        TimeWindows(SmallVec::from_elem(time_window, 1))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, TimeWindow> {
        self.0.iter()
    }

    pub fn back(&self) -> &TimeWindow {
        self.0.last().expect("time window list is never empty")
    }

    pub fn is_satisfied(&self, arrival: Timestamp) -> bool {
        self.0.iter().any(|tw| tw.is_satisfied(arrival))
    }

    /// First window whose end is not before the given instant, i.e. the
    /// earliest window a forward sweep arriving at `instant` can still use.
    pub fn first_fitting(&self, instant: Timestamp) -> Option<&TimeWindow> {
        self.0.iter().find(|tw| instant <= tw.end())
    }

    /// Last window whose start is not after the given instant, i.e. the
    /// latest window a backward sweep leaving at `instant` can still use.
    pub fn last_fitting(&self, instant: Timestamp) -> Option<&TimeWindow> {
        self.0.iter().rev().find(|tw| tw.start() <= instant)
    }
}

impl Default for TimeWindows {
    fn default() -> Self {
        TimeWindows::single(TimeWindow::full())
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    fn two_windows() -> TimeWindows {
        TimeWindows::from_vec(vec![
            TimeWindow::from_iso(
                Some("2025-06-10T08:00:00+02:00"),
                Some("2025-06-10T10:00:00+02:00"),
            ),
            TimeWindow::from_iso(
                Some("2025-06-10T14:00:00+02:00"),
                Some("2025-06-10T16:00:00+02:00"),
            ),
        ])
    }

    #[test]
    fn test_is_satisfied() {
        let tw = TimeWindow::from_iso(
            Some("2025-06-10T08:00:00+02:00"),
            Some("2025-06-10T10:00:00+02:00"),
        );

        assert!(tw.is_satisfied("2025-06-10T07:00:00+02:00".parse().unwrap()));
        assert!(tw.is_satisfied("2025-06-10T10:00:00+02:00".parse().unwrap()));
        assert!(!tw.is_satisfied("2025-06-10T10:00:01+02:00".parse().unwrap()));
    }

    #[test]
    fn test_missing_bounds_are_extreme() {
        let tw = TimeWindow::new(None, None);

        assert_eq!(tw.start(), Timestamp::MIN);
        assert_eq!(tw.end(), Timestamp::MAX);
        assert!(tw.contains("2025-06-10T10:00:00+02:00".parse().unwrap()));
    }

    #[test]
    fn test_first_fitting() {
        let tws = two_windows();

        let early = tws
            .first_fitting("2025-06-10T07:00:00+02:00".parse().unwrap())
            .unwrap();
        assert_eq!(early.end(), "2025-06-10T10:00:00+02:00".parse().unwrap());

        let between = tws
            .first_fitting("2025-06-10T11:00:00+02:00".parse().unwrap())
            .unwrap();
        assert_eq!(between.start(), "2025-06-10T14:00:00+02:00".parse().unwrap());

        assert!(tws
            .first_fitting("2025-06-10T17:00:00+02:00".parse().unwrap())
            .is_none());
    }

    #[test]
    fn test_last_fitting() {
        let tws = two_windows();

        let late = tws
            .last_fitting("2025-06-10T18:00:00+02:00".parse().unwrap())
            .unwrap();
        assert_eq!(late.start(), "2025-06-10T14:00:00+02:00".parse().unwrap());

        let between = tws
            .last_fitting("2025-06-10T11:00:00+02:00".parse().unwrap())
            .unwrap();
        assert_eq!(between.end(), "2025-06-10T10:00:00+02:00".parse().unwrap());

        assert!(tws
            .last_fitting("2025-06-10T06:00:00+02:00".parse().unwrap())
            .is_none());
    }

    #[test]
    fn test_from_vec_sorts_and_defaults() {
        let tws = TimeWindows::from_vec(vec![]);
        assert_eq!(tws.len(), 1);
        assert_eq!(tws.back().end(), Timestamp::MAX);

        let tws = TimeWindows::from_vec(vec![
            TimeWindow::from_iso(Some("2025-06-10T14:00:00+02:00"), None),
            TimeWindow::from_iso(
                Some("2025-06-10T08:00:00+02:00"),
                Some("2025-06-10T10:00:00+02:00"),
            ),
        ]);
        assert_eq!(
            tws.iter().next().unwrap().start(),
            "2025-06-10T08:00:00+02:00".parse().unwrap()
        );
    }
}
