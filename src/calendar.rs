use ulid::Ulid;

use crate::model::*;

/// Booking store for one schedulable resource (a room, a speaker's agenda).
///
/// Bookings are kept sorted by `range.start`. `book` does not check for
/// conflicts; the no-overlap guarantee comes from [`crate::CalendarManager`],
/// which checks and books under one lock.
#[derive(Debug, Clone)]
pub struct Calendar {
    /// All bookings, sorted by `range.start`.
    bookings: Vec<Booking>,
    /// True while no two stored bookings overlap. Raw `book` calls may clear it.
    disjoint: bool,
}

impl Default for Calendar {
    fn default() -> Self {
        Self::new()
    }
}

impl Calendar {
    pub fn new() -> Self {
        Self {
            bookings: Vec::new(),
            disjoint: true,
        }
    }

    /// Build a calendar from a stored booking set, in any order.
    pub fn from_bookings(bookings: impl IntoIterator<Item = Booking>) -> Self {
        let mut cal = Self::new();
        for b in bookings {
            cal.book(b.subject_id, b.range);
        }
        cal
    }

    pub fn len(&self) -> usize {
        self.bookings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bookings.is_empty()
    }

    /// True iff `candidate` overlaps some existing booking.
    pub fn has_conflict(&self, candidate: &TimeRange) -> bool {
        self.conflicting(candidate).is_some()
    }

    /// A booking that overlaps `candidate`, if any.
    pub fn conflicting(&self, candidate: &TimeRange) -> Option<&Booking> {
        // Everything at index >= right_bound starts at or after candidate.end.
        let right_bound = self
            .bookings
            .partition_point(|b| b.range.start() < candidate.end());
        let before = &self.bookings[..right_bound];
        if self.disjoint {
            // Sorted and disjoint means ends increase with starts, so the last
            // booking starting before candidate.end reaches furthest right.
            before
                .last()
                .filter(|b| b.range.end() > candidate.start())
        } else {
            before.iter().find(|b| b.range.end() > candidate.start())
        }
    }

    /// Bookings whose range overlaps `window`, in start order.
    pub fn overlapping(&self, window: &TimeRange) -> impl Iterator<Item = &Booking> {
        let right_bound = self
            .bookings
            .partition_point(|b| b.range.start() < window.end());
        let start = window.start();
        self.bookings[..right_bound]
            .iter()
            .filter(move |b| b.range.end() > start)
    }

    /// Insert a booking, keeping start order. Unconditional.
    pub fn book(&mut self, subject_id: Ulid, range: TimeRange) {
        let pos = self
            .bookings
            .partition_point(|b| b.range.start() <= range.start());
        if self.disjoint {
            let clashes_prev = pos > 0 && self.bookings[pos - 1].range.overlaps(&range);
            let clashes_next = self
                .bookings
                .get(pos)
                .is_some_and(|b| b.range.overlaps(&range));
            if clashes_prev || clashes_next {
                self.disjoint = false;
            }
        }
        self.bookings.insert(pos, Booking::new(subject_id, range));
    }

    /// Remove the booking for `subject_id`. `None` if the subject has none.
    pub fn unbook(&mut self, subject_id: &Ulid) -> Option<Booking> {
        let pos = self
            .bookings
            .iter()
            .position(|b| b.subject_id == *subject_id)?;
        let removed = self.bookings.remove(pos);
        if !self.disjoint {
            self.disjoint = self
                .bookings
                .windows(2)
                .all(|w| w[0].range.end() <= w[1].range.start());
        }
        Some(removed)
    }

    pub fn get(&self, subject_id: &Ulid) -> Option<&Booking> {
        self.bookings.iter().find(|b| b.subject_id == *subject_id)
    }

    pub fn contains_subject(&self, subject_id: &Ulid) -> bool {
        self.get(subject_id).is_some()
    }

    /// Snapshot of every booking. Order is unspecified.
    pub fn all_bookings(&self) -> Vec<Booking> {
        self.bookings.clone()
    }

    /// Gaps inside `window` that no booking covers, in order.
    pub fn free_within(&self, window: &TimeRange) -> Vec<TimeRange> {
        let mut free = Vec::new();
        let mut cursor = window.start();
        for b in self.overlapping(window) {
            if let Ok(gap) = TimeRange::new(cursor, b.range.start().min(window.end())) {
                free.push(gap);
            }
            cursor = cursor.max(b.range.end());
        }
        if let Ok(tail) = TimeRange::new(cursor, window.end()) {
            free.push(tail);
        }
        free
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn r(start: Ms, end: Ms) -> TimeRange {
        TimeRange::new(start, end).unwrap()
    }

    fn calendar(ranges: &[(Ms, Ms)]) -> Calendar {
        let mut cal = Calendar::new();
        for &(s, e) in ranges {
            cal.book(Ulid::new(), r(s, e));
        }
        cal
    }

    fn exhaustive(cal: &Calendar, candidate: &TimeRange) -> bool {
        cal.all_bookings().iter().any(|b| b.range.overlaps(candidate))
    }

    #[test]
    fn bookings_kept_in_start_order() {
        let cal = calendar(&[(300, 400), (100, 200), (200, 300)]);
        let starts: Vec<Ms> = cal.bookings.iter().map(|b| b.range.start()).collect();
        assert_eq!(starts, vec![100, 200, 300]);
        assert!(cal.disjoint);
    }

    #[test]
    fn empty_calendar_has_no_conflict() {
        let cal = Calendar::new();
        assert!(!cal.has_conflict(&r(0, 1000)));
        assert!(cal.is_empty());
    }

    #[test]
    fn conflict_against_neighbours() {
        let cal = calendar(&[(100, 200), (300, 400), (500, 600)]);
        assert!(cal.has_conflict(&r(150, 160)));
        assert!(cal.has_conflict(&r(399, 450)));
        assert!(cal.has_conflict(&r(250, 301)));
        assert!(cal.has_conflict(&r(0, 10_000)));
        assert!(!cal.has_conflict(&r(200, 300)));
        assert!(!cal.has_conflict(&r(400, 500)));
        assert!(!cal.has_conflict(&r(600, 700)));
        assert!(!cal.has_conflict(&r(0, 100)));
    }

    #[test]
    fn conflicting_reports_the_holder() {
        let mut cal = Calendar::new();
        let a = Ulid::new();
        cal.book(a, r(100, 200));
        cal.book(Ulid::new(), r(300, 400));
        assert_eq!(cal.conflicting(&r(150, 250)).map(|b| b.subject_id), Some(a));
        assert!(cal.conflicting(&r(200, 300)).is_none());
    }

    #[test]
    fn raw_book_overlap_falls_back_to_scan() {
        // A long booking followed by a short one inside it: the last booking
        // starting before the candidate's end is not the one reaching furthest.
        let cal = calendar(&[(0, 1000), (100, 200)]);
        assert!(!cal.disjoint);
        assert!(cal.has_conflict(&r(500, 600)));
        assert!(!cal.has_conflict(&r(1000, 1100)));
    }

    #[test]
    fn unbook_restores_fast_path() {
        let mut cal = Calendar::new();
        let long = Ulid::new();
        cal.book(long, r(0, 1000));
        cal.book(Ulid::new(), r(100, 200));
        assert!(!cal.disjoint);
        cal.unbook(&long).unwrap();
        assert!(cal.disjoint);
        assert!(!cal.has_conflict(&r(500, 600)));
        assert!(cal.has_conflict(&r(150, 600)));
    }

    #[test]
    fn fast_path_matches_exhaustive_scan() {
        // Deterministic pseudo-random layouts, both disjoint and overlapping.
        let mut seed: u64 = 0x9E37_79B9_7F4A_7C15;
        let mut next = |m: i64| {
            seed ^= seed << 13;
            seed ^= seed >> 7;
            seed ^= seed << 17;
            (seed % m as u64) as i64
        };
        for _ in 0..50 {
            let mut cal = Calendar::new();
            for _ in 0..20 {
                let s = next(1000);
                let len = 1 + next(60);
                let candidate = r(s, s + len);
                if next(4) == 0 || !cal.has_conflict(&candidate) {
                    cal.book(Ulid::new(), candidate);
                }
            }
            for s in (0..1100).step_by(7) {
                for len in [1, 5, 30, 200] {
                    let q = r(s, s + len);
                    assert_eq!(cal.has_conflict(&q), exhaustive(&cal, &q), "query {q}");
                }
            }
        }
    }

    #[test]
    fn unbook_missing_returns_none() {
        let mut cal = calendar(&[(100, 200)]);
        assert!(cal.unbook(&Ulid::new()).is_none());
        assert_eq!(cal.len(), 1);
    }

    #[test]
    fn unbook_middle_preserves_order() {
        let mut cal = Calendar::new();
        let ids: Vec<Ulid> = (0..3).map(|_| Ulid::new()).collect();
        for (i, &id) in ids.iter().enumerate() {
            cal.book(id, r(i as Ms * 100, i as Ms * 100 + 50));
        }
        let removed = cal.unbook(&ids[1]).unwrap();
        assert_eq!(removed.range, r(100, 150));
        assert_eq!(cal.bookings[0].subject_id, ids[0]);
        assert_eq!(cal.bookings[1].subject_id, ids[2]);
        assert!(!cal.contains_subject(&ids[1]));
    }

    #[test]
    fn overlapping_window() {
        let cal = calendar(&[(100, 200), (450, 600), (1000, 1100)]);
        let hits: Vec<_> = cal.overlapping(&r(500, 800)).collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].range, r(450, 600));

        // Ending exactly at window start is excluded.
        assert_eq!(cal.overlapping(&r(200, 300)).count(), 0);
    }

    #[test]
    fn free_within_window() {
        let cal = calendar(&[(100, 200), (300, 400)]);
        assert_eq!(
            cal.free_within(&r(0, 500)),
            vec![r(0, 100), r(200, 300), r(400, 500)]
        );
        assert_eq!(cal.free_within(&r(150, 350)), vec![r(200, 300)]);
        assert!(cal.free_within(&r(120, 180)).is_empty());
        assert_eq!(Calendar::new().free_within(&r(0, 10)), vec![r(0, 10)]);
    }

    #[test]
    fn free_within_back_to_back_leaves_no_gap() {
        let cal = calendar(&[(0, 100), (100, 200)]);
        assert_eq!(cal.free_within(&r(0, 300)), vec![r(200, 300)]);
    }

    #[test]
    fn from_bookings_sorts() {
        let a = Booking::new(Ulid::new(), r(500, 600));
        let b = Booking::new(Ulid::new(), r(0, 100));
        let cal = Calendar::from_bookings([a, b]);
        assert_eq!(cal.bookings, vec![b, a]);
        assert_eq!(cal.get(&a.subject_id), Some(&a));
    }
}
