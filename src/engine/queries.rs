use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::*;

use super::Engine;

/// Narrowing applied by `list_reservations`. Empty filter lists everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReservationFilter {
    pub id: Option<Ulid>,
    pub laboratory_id: Option<Ulid>,
    pub day: Option<NaiveDate>,
}

impl Engine {
    pub async fn get_laboratory(&self, id: Ulid) -> Option<LaboratoryInfo> {
        let ls = self.get_laboratory_state(&id)?;
        let guard = ls.read().await;
        Some(guard.info())
    }

    /// Laboratories ordered by name, optionally only those with `active`.
    pub async fn list_laboratories(&self, active: Option<bool>) -> Vec<LaboratoryInfo> {
        let labs: Vec<_> = self.state.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::with_capacity(labs.len());
        for ls in labs {
            let guard = ls.read().await;
            if active.is_none_or(|a| guard.active == a) {
                out.push(guard.info());
            }
        }
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    pub async fn get_reservation(&self, id: Ulid) -> Option<ReservationInfo> {
        let lab_id = self.laboratory_for_reservation(&id)?;
        let ls = self.get_laboratory_state(&lab_id)?;
        let guard = ls.read().await;
        guard.reservation(id).map(|r| guard.reservation_info(r))
    }

    /// Reservations of one laboratory starting on `day`, ordered by start.
    pub async fn reservations_on_day(&self, laboratory_id: Ulid, day: NaiveDate) -> Vec<ReservationInfo> {
        let Some(ls) = self.get_laboratory_state(&laboratory_id) else {
            return vec![];
        };
        let guard = ls.read().await;
        guard
            .on_day(day)
            .iter()
            .map(|r| guard.reservation_info(r))
            .collect()
    }

    /// Reservations matching `filter`, ordered by start.
    pub async fn list_reservations(&self, filter: &ReservationFilter) -> Vec<ReservationInfo> {
        if let Some(id) = filter.id {
            return self
                .get_reservation(id)
                .await
                .filter(|r| filter.laboratory_id.is_none_or(|l| r.laboratory_id == l))
                .filter(|r| filter.day.is_none_or(|d| r.span.day() == d))
                .into_iter()
                .collect();
        }

        let labs: Vec<_> = match filter.laboratory_id {
            Some(lab_id) => self.get_laboratory_state(&lab_id).into_iter().collect(),
            None => self.state.iter().map(|e| e.value().clone()).collect(),
        };

        let mut out = Vec::new();
        for ls in labs {
            let guard = ls.read().await;
            let rows = match filter.day {
                Some(day) => guard.on_day(day),
                None => &guard.reservations[..],
            };
            out.extend(rows.iter().map(|r| guard.reservation_info(r)));
        }
        out.sort_by_key(|r| (r.span.start, r.id));
        out
    }
}
