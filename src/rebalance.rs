//! Payment-window rebalancing for individual-lesson plans.
//!
//! A plan sells a fixed number of prepaid slots and payments always cover the
//! soonest scheduled lessons. When a session is inserted before some paid
//! session, the credit of the latest-dated paid session (the donor) moves to
//! the new session. Everything here works on an in-memory snapshot; the
//! store applies the decision.

use crate::model::LessonSession;
use serde::Serialize;
use serde_json::json;
use std::cmp::Ordering;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentTransfer {
    pub session_id: String,
    pub donor_id: String,
    pub payment_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum NoTransferReason {
    /// The inserted id is not in the snapshot at all.
    InsertedMissing,
    /// The inserted session is cancelled, completed or rescheduled.
    InsertedNotScheduled,
    EmptyWindow,
    OutsideWindow,
    AlreadyPaid,
    DonorUnavailable,
}

impl NoTransferReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InsertedMissing => "insertedMissing",
            Self::InsertedNotScheduled => "insertedNotScheduled",
            Self::EmptyWindow => "emptyWindow",
            Self::OutsideWindow => "outsideWindow",
            Self::AlreadyPaid => "alreadyPaid",
            Self::DonorUnavailable => "donorUnavailable",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RebalanceResult {
    Transfer(PaymentTransfer),
    NoTransfer(NoTransferReason),
}

impl RebalanceResult {
    pub fn transferred(&self) -> bool {
        matches!(self, Self::Transfer(_))
    }

    pub fn transfer(&self) -> Option<&PaymentTransfer> {
        match self {
            Self::Transfer(t) => Some(t),
            Self::NoTransfer(_) => None,
        }
    }

    /// Applies the decision to a snapshot. The donor is cleared before the
    /// inserted session is assigned, matching the store's write order.
    #[cfg_attr(not(test), allow(dead_code))]
    pub fn apply(&self, sessions: &mut [LessonSession]) {
        let Some(t) = self.transfer() else {
            return;
        };
        if let Some(donor) = sessions.iter_mut().find(|s| s.id == t.donor_id) {
            donor.payment_id = None;
        }
        if let Some(inserted) = sessions.iter_mut().find(|s| s.id == t.session_id) {
            inserted.payment_id = Some(t.payment_id.clone());
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Transfer(t) => json!({
                "transferred": true,
                "sessionId": t.session_id,
                "donorId": t.donor_id,
                "paymentId": t.payment_id,
            }),
            Self::NoTransfer(reason) => json!({
                "transferred": false,
                "reason": reason.as_str(),
            }),
        }
    }
}

fn by_date_then_seq(a: &&LessonSession, b: &&LessonSession) -> Ordering {
    a.lesson_date
        .cmp(&b.lesson_date)
        .then_with(|| a.seq.cmp(&b.seq))
}

/// Scheduled sessions in window order. `sort_by` is stable, so any remaining
/// ties keep the caller's order.
pub fn scheduled_sorted(sessions: &[LessonSession]) -> Vec<&LessonSession> {
    let mut out: Vec<&LessonSession> = sessions.iter().filter(|s| s.is_scheduled()).collect();
    out.sort_by(by_date_then_seq);
    out
}

pub fn rebalance_on_insert(sessions: &[LessonSession], inserted_id: &str) -> RebalanceResult {
    let Some(inserted) = sessions.iter().find(|s| s.id == inserted_id) else {
        return RebalanceResult::NoTransfer(NoTransferReason::InsertedMissing);
    };

    let sorted = scheduled_sorted(sessions);
    let paid: Vec<(usize, &LessonSession)> = sorted
        .iter()
        .enumerate()
        .filter(|(_, s)| s.is_paid())
        .map(|(idx, s)| (idx, *s))
        .collect();
    let window_size = paid.len();

    let Some(inserted_idx) = sorted.iter().position(|s| s.id == inserted_id) else {
        return RebalanceResult::NoTransfer(NoTransferReason::InsertedNotScheduled);
    };
    if window_size == 0 {
        return RebalanceResult::NoTransfer(NoTransferReason::EmptyWindow);
    }
    if inserted.is_paid() {
        return RebalanceResult::NoTransfer(NoTransferReason::AlreadyPaid);
    }
    if inserted_idx >= window_size {
        return RebalanceResult::NoTransfer(NoTransferReason::OutsideWindow);
    }

    // Indices are distinct, so the first maximum is the only one.
    let mut donor: Option<(usize, &LessonSession)> = None;
    for (idx, s) in paid.iter().copied() {
        if donor.map(|(best, _)| idx > best).unwrap_or(true) {
            donor = Some((idx, s));
        }
    }
    let Some((_, donor)) = donor else {
        return RebalanceResult::NoTransfer(NoTransferReason::EmptyWindow);
    };
    let Some(payment_id) = donor.payment_id.as_ref() else {
        return RebalanceResult::NoTransfer(NoTransferReason::DonorUnavailable);
    };
    if donor.id == inserted_id {
        return RebalanceResult::NoTransfer(NoTransferReason::DonorUnavailable);
    }

    RebalanceResult::Transfer(PaymentTransfer {
        session_id: inserted_id.to_string(),
        donor_id: donor.id.clone(),
        payment_id: payment_id.clone(),
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowReport {
    pub window_size: usize,
    pub holds: bool,
    pub paid_outside_window: Vec<String>,
    pub unpaid_inside_window: Vec<String>,
}

/// Checks that the paid scheduled sessions are exactly the earliest K.
pub fn window_violations(sessions: &[LessonSession]) -> WindowReport {
    let sorted = scheduled_sorted(sessions);
    let window_size = sorted.iter().filter(|s| s.is_paid()).count();
    let mut paid_outside_window = Vec::new();
    let mut unpaid_inside_window = Vec::new();
    for (idx, s) in sorted.iter().enumerate() {
        if idx < window_size && !s.is_paid() {
            unpaid_inside_window.push(s.id.clone());
        } else if idx >= window_size && s.is_paid() {
            paid_outside_window.push(s.id.clone());
        }
    }
    WindowReport {
        window_size,
        holds: paid_outside_window.is_empty() && unpaid_inside_window.is_empty(),
        paid_outside_window,
        unpaid_inside_window,
    }
}
