use ulid::Ulid;

use crate::model::{ReservationInfo, Span};

/// Closed-interval overlap: `[s1, e1]` and `[s2, e2]` overlap iff
/// `s1 <= e2 && s2 <= e1`. A reservation ending exactly when another
/// starts is a conflict.
pub fn overlaps(candidate: &Span, existing: &Span) -> bool {
    candidate.start <= existing.end && existing.start <= candidate.end
}

/// First reservation in `existing` that overlaps `candidate`, skipping `exclude`.
pub fn first_conflict<'a, I>(candidate: &Span, existing: I, exclude: Option<Ulid>) -> Option<Ulid>
where
    I: IntoIterator<Item = (Ulid, &'a Span)>,
{
    existing
        .into_iter()
        .filter(|(id, _)| Some(*id) != exclude)
        .find(|(_, span)| overlaps(candidate, span))
        .map(|(id, _)| id)
}

/// `first_conflict` over reservation records.
pub fn first_conflicting_reservation(
    candidate: &Span,
    existing: &[ReservationInfo],
    exclude: Option<Ulid>,
) -> Option<Ulid> {
    first_conflict(candidate, existing.iter().map(|r| (r.id, &r.span)), exclude)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Timestamp;
    use chrono::NaiveDate;

    fn at(h: u32, m: u32) -> Timestamp {
        NaiveDate::from_ymd_opt(2025, 1, 10)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    fn span(sh: u32, sm: u32, eh: u32, em: u32) -> Span {
        Span::new(at(sh, sm), at(eh, em))
    }

    #[test]
    fn overlap_is_symmetric() {
        let spans = [
            span(8, 0, 9, 0),
            span(8, 30, 10, 0),
            span(9, 0, 10, 0),
            span(10, 30, 12, 0),
            span(7, 0, 13, 0),
            span(11, 0, 11, 30),
        ];
        for a in &spans {
            for b in &spans {
                assert_eq!(overlaps(a, b), overlaps(b, a), "{a:?} vs {b:?}");
            }
        }
    }

    #[test]
    fn overlap_is_reflexive() {
        for s in [span(8, 0, 9, 0), span(0, 0, 23, 30), span(12, 0, 12, 0)] {
            assert!(overlaps(&s, &s));
        }
    }

    #[test]
    fn touching_endpoints_overlap() {
        assert!(overlaps(&span(10, 0, 11, 0), &span(11, 0, 12, 0)));
        assert!(overlaps(&span(11, 0, 12, 0), &span(10, 0, 11, 0)));
    }

    #[test]
    fn partial_and_containment_overlap() {
        let existing = span(10, 0, 11, 0);
        assert!(overlaps(&span(10, 30, 11, 30), &existing)); // candidate start inside
        assert!(overlaps(&span(9, 0, 10, 30), &existing)); // existing start inside
        assert!(overlaps(&span(9, 0, 12, 0), &existing)); // candidate contains
        assert!(overlaps(&span(10, 0, 10, 30), &existing)); // existing contains
    }

    #[test]
    fn disjoint_spans_do_not_overlap() {
        assert!(!overlaps(&span(8, 0, 9, 0), &span(9, 30, 10, 30)));
        assert!(!overlaps(&span(12, 0, 13, 0), &span(10, 0, 11, 30)));
    }

    #[test]
    fn first_conflict_skips_excluded() {
        let own = Ulid::new();
        let other = Ulid::new();
        let own_span = span(10, 0, 11, 0);
        let other_span = span(13, 0, 14, 0);
        let existing = vec![(own, &own_span), (other, &other_span)];

        let candidate = span(10, 0, 11, 0);
        assert_eq!(first_conflict(&candidate, existing.clone(), None), Some(own));
        assert_eq!(first_conflict(&candidate, existing.clone(), Some(own)), None);

        let candidate = span(12, 0, 13, 0);
        assert_eq!(first_conflict(&candidate, existing, Some(own)), Some(other));
    }

    #[test]
    fn first_conflict_empty_collection() {
        let candidate = span(10, 0, 11, 0);
        assert_eq!(first_conflicting_reservation(&candidate, &[], None), None);
    }
}
