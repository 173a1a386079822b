//! Drives the rebalancer through long insertion sequences and checks the
//! payment window after every step.

#[path = "../src/model.rs"]
mod model;
#[path = "../src/rebalance.rs"]
mod rebalance;

use chrono::{Duration, NaiveDate};
use model::{LessonSession, SessionStatus};
use rebalance::{rebalance_on_insert, window_violations, NoTransferReason, RebalanceResult};

/// Small deterministic generator so failures reproduce.
struct XorShift(u64);

impl XorShift {
    fn next(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        x
    }

    fn below(&mut self, n: u64) -> u64 {
        self.next() % n
    }
}

fn base() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 1, 5).expect("base date")
}

fn seeded_plan(rng: &mut XorShift, sessions: usize, paid: usize) -> Vec<LessonSession> {
    let mut out = Vec::new();
    for i in 0..sessions {
        let mut s = LessonSession::new(
            format!("s{i}"),
            base() + Duration::days(7 * i as i64),
            i as i64,
        );
        if i < paid {
            s.payment_id = Some(format!("pay{i}"));
        }
        if rng.below(10) == 0 {
            s.status = None;
        }
        out.push(s);
    }
    out
}

#[test]
fn window_invariant_survives_random_insertions() {
    for seed in 1..=40u64 {
        let mut rng = XorShift(seed.wrapping_mul(0x9E37_79B9_7F4A_7C15));
        let count = 3 + rng.below(8) as usize;
        let paid = rng.below(count as u64 + 1) as usize;
        let mut sessions = seeded_plan(&mut rng, count, paid);
        let window = window_violations(&sessions).window_size;
        assert!(window_violations(&sessions).holds);

        let mut taken: Vec<NaiveDate> = sessions.iter().map(|s| s.lesson_date).collect();
        for step in 0..25 {
            let date = base() + Duration::days(rng.below(120) as i64 - 20);
            if taken.contains(&date) {
                continue;
            }
            taken.push(date);
            let id = format!("ins{seed}-{step}");
            let seq = sessions.len() as i64 + 1000;
            sessions.push(LessonSession::new(id.clone(), date, seq));

            let result = rebalance_on_insert(&sessions, &id);
            if let RebalanceResult::NoTransfer(reason) = &result {
                assert!(
                    matches!(
                        reason,
                        NoTransferReason::EmptyWindow | NoTransferReason::OutsideWindow
                    ),
                    "seed {seed} step {step}: unexpected reason {reason:?}"
                );
            }
            result.apply(&mut sessions);

            let report = window_violations(&sessions);
            assert!(report.holds, "seed {seed} step {step}: {report:?}");
            assert_eq!(report.window_size, window, "window size must not change");

            // Applied decisions are final.
            assert!(
                !rebalance_on_insert(&sessions, &id).transferred(),
                "seed {seed} step {step}: second call transferred"
            );
        }
    }
}

#[test]
fn sessions_outside_scheduled_set_keep_their_payments() {
    let mut sessions = vec![
        LessonSession::new("a", base(), 0),
        LessonSession::new("b", base() + Duration::days(7), 1),
        LessonSession::new("c", base() + Duration::days(14), 2),
    ];
    sessions[0].payment_id = Some("p-done".into());
    sessions[0].status = Some(SessionStatus::Completed);
    sessions[1].payment_id = Some("p-b".into());
    sessions[2].status = Some(SessionStatus::RescheduledOut);
    sessions[2].payment_id = Some("p-moved".into());

    sessions.push(LessonSession::new("new", base() + Duration::days(3), 3));
    let result = rebalance_on_insert(&sessions, "new");
    let t = result.transfer().expect("transfer");
    assert_eq!(t.donor_id, "b");
    result.apply(&mut sessions);

    assert_eq!(sessions[0].payment_id.as_deref(), Some("p-done"));
    assert_eq!(sessions[2].payment_id.as_deref(), Some("p-moved"));
    assert_eq!(sessions[3].payment_id.as_deref(), Some("p-b"));
    assert_eq!(sessions[1].payment_id, None);
}
