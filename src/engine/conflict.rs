use crate::limits::*;
use crate::model::*;

use super::EngineError;

/// True iff any span in `existing` overlaps `candidate`.
///
/// Half-open semantics: `[s1, e1)` and `[s2, e2)` are disjoint iff
/// `e1 <= s2 || e2 <= s1`. Order of `existing` does not matter. The caller
/// rejects malformed candidates first (see [`validate_span`]).
pub fn conflicts<'a, I>(existing: I, candidate: &HourSpan) -> bool
where
    I: IntoIterator<Item = &'a HourSpan>,
{
    existing.into_iter().any(|span| span.overlaps(candidate))
}

/// Reject intervals that are empty, inverted, or outside the daily schedule.
pub fn validate_span(span: &HourSpan) -> Result<(), EngineError> {
    if !span.is_well_formed() {
        return Err(EngineError::Invalid("start hour must be before end hour"));
    }
    if span.start < FIRST_HOUR || span.end > LAST_HOUR {
        return Err(EngineError::Invalid("hours must fall within the daily schedule"));
    }
    Ok(())
}

/// Check `span` against the room's bookings, ignoring `exclude`.
/// Returns the id of the first overlapping booking as the error.
pub(crate) fn check_no_conflict(
    rs: &RoomState,
    span: &HourSpan,
    exclude: Option<ulid::Ulid>,
) -> Result<(), EngineError> {
    match rs
        .bookings
        .values()
        .find(|b| Some(b.id) != exclude && b.span.overlaps(span))
    {
        Some(clash) => {
            metrics::counter!(crate::observability::BOOKING_CONFLICTS_TOTAL).increment(1);
            tracing::debug!(room_id = %rs.id, %span, clash = %clash.id, "booking conflict");
            Err(EngineError::Conflict(clash.id))
        }
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    fn s(start: Hour, end: Hour) -> HourSpan {
        HourSpan::new(start, end)
    }

    #[test]
    fn empty_existing_never_conflicts() {
        assert!(!conflicts(&[], &s(0, 24)));
    }

    #[test]
    fn touching_does_not_conflict() {
        assert!(!conflicts(&[s(9, 11)], &s(11, 13)));
        assert!(!conflicts(&[s(11, 13)], &s(9, 11)));
    }

    #[test]
    fn partial_and_containing_overlaps_conflict() {
        assert!(conflicts(&[s(9, 11)], &s(10, 12)));
        assert!(conflicts(&[s(9, 11)], &s(8, 10)));
        assert!(conflicts(&[s(9, 11)], &s(9, 10)));
        assert!(conflicts(&[s(9, 11)], &s(0, 24)));
        assert!(conflicts(&[s(0, 24)], &s(12, 13)));
    }

    #[test]
    fn any_member_conflicting_is_enough() {
        let existing = [s(1, 2), s(5, 6), s(14, 18)];
        assert!(conflicts(&existing, &s(17, 19)));
        assert!(!conflicts(&existing, &s(6, 14)));
    }

    #[test]
    fn order_of_existing_irrelevant() {
        let a = [s(1, 3), s(8, 9), s(20, 22)];
        let b = [s(20, 22), s(1, 3), s(8, 9)];
        for start in 0..24 {
            for end in (start + 1)..=24 {
                let c = s(start, end);
                assert_eq!(conflicts(&a, &c), conflicts(&b, &c), "{c}");
            }
        }
    }

    #[test]
    fn symmetric_over_hour_domain() {
        for s1 in 0..24 {
            for e1 in (s1 + 1)..=24 {
                for s2 in 0..24 {
                    for e2 in (s2 + 1)..=24 {
                        let (a, b) = (s(s1, e1), s(s2, e2));
                        assert_eq!(conflicts(&[a], &b), conflicts(&[b], &a), "{a} vs {b}");
                    }
                }
            }
        }
    }

    #[test]
    fn non_degenerate_span_conflicts_with_itself() {
        for start in 0..24 {
            for end in (start + 1)..=24 {
                let a = s(start, end);
                assert!(conflicts(&[a], &a), "{a}");
            }
        }
    }

    #[test]
    fn validate_rejects_malformed() {
        assert!(matches!(validate_span(&s(10, 10)), Err(EngineError::Invalid(_))));
        assert!(matches!(validate_span(&s(11, 10)), Err(EngineError::Invalid(_))));
        assert!(matches!(validate_span(&s(-1, 3)), Err(EngineError::Invalid(_))));
        assert!(matches!(validate_span(&s(20, 25)), Err(EngineError::Invalid(_))));
        assert!(validate_span(&s(0, 24)).is_ok());
        assert!(validate_span(&s(23, 24)).is_ok());
    }

    #[test]
    fn check_no_conflict_excludes_self() {
        let mut rs = RoomState::new(
            Ulid::new(),
            NewRoom {
                name: "A".into(),
                capacity: 4,
                amenities: Default::default(),
                price: 0,
            },
        );
        let mine = Booking {
            id: Ulid::new(),
            room_id: rs.id,
            booked_by: Ulid::new(),
            span: s(9, 11),
        };
        let other = Booking {
            id: Ulid::new(),
            room_id: rs.id,
            booked_by: Ulid::new(),
            span: s(12, 14),
        };
        let (mine_id, other_id) = (mine.id, other.id);
        rs.insert_booking(mine);
        rs.insert_booking(other);

        // Shifting my own booking by an hour overlaps only myself.
        assert!(check_no_conflict(&rs, &s(10, 12), Some(mine_id)).is_ok());
        assert!(matches!(
            check_no_conflict(&rs, &s(10, 12), None),
            Err(EngineError::Conflict(id)) if id == mine_id
        ));
        assert!(matches!(
            check_no_conflict(&rs, &s(11, 13), Some(mine_id)),
            Err(EngineError::Conflict(id)) if id == other_id
        ));
    }
}
