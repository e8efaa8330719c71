//! Lead lifecycle state machine
//!
//! `apply` is the single authority for legal transitions. It is pure: the
//! caller injects `now`, and the result describes what to append to the
//! participant sets and which side effects followed. Both the action gateway
//! and the auto-expiry sweeper go through it.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::model::{BankUserId, IgnoreOverride, Lead, LeadStatus, ParticipantSet, Relation};
use crate::error::LeadError;

/// Something that happened to a lead
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeadEvent {
    UserOpened(BankUserId),
    UserPurchased(BankUserId),
    UserIgnored(BankUserId),
    SweepExpire(Vec<BankUserId>),
}

/// Observable consequence of a transition
#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SideEffect {
    StatusChanged { from: LeadStatus, to: LeadStatus },
    ParticipantsAdded {
        set: ParticipantSet,
        users: Vec<BankUserId>,
    },
}

/// Configuration-driven checks applied on top of the set invariants
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LifecycleRules {
    /// Distinct purchasers allowed per lead; `None` is unbounded
    pub max_purchasers: Option<usize>,
    pub ignore_override: IgnoreOverride,
}

/// Result of applying one event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub lead: Lead,
    pub additions: Vec<(ParticipantSet, Vec<BankUserId>)>,
    pub effects: Vec<SideEffect>,
}

impl Transition {
    pub fn changed(&self) -> bool {
        self.additions.iter().any(|(_, users)| !users.is_empty())
    }

    pub fn status(&self, now: DateTime<Utc>) -> LeadStatus {
        self.lead.status_at(now)
    }
}

/// Apply `event` to `lead` at `now`
pub fn apply(
    lead: &Lead,
    event: &LeadEvent,
    now: DateTime<Utc>,
    rules: &LifecycleRules,
) -> Result<Transition, LeadError> {
    if now < lead.created_at {
        return Err(LeadError::StaleEvent { lead_id: lead.id });
    }

    let before = lead.status_at(now);
    let mut next = lead.clone();

    let (set, added) = match event {
        LeadEvent::UserOpened(user_id) => {
            ensure_window_open(lead, user_id, now)?;
            let changed = next
                .participants
                .add(ParticipantSet::Opened, user_id, rules.ignore_override)?;
            (ParticipantSet::Opened, added_if(changed, user_id))
        }
        LeadEvent::UserPurchased(user_id) => {
            ensure_window_open(lead, user_id, now)?;
            let purchasers = &lead.participants.purchased_by;
            if let Some(cap) = rules.max_purchasers {
                if !purchasers.contains(user_id) && purchasers.len() >= cap {
                    return Err(LeadError::CapacityExceeded {
                        lead_id: lead.id,
                        cap,
                    });
                }
            }
            let changed = next
                .participants
                .add(ParticipantSet::Purchased, user_id, rules.ignore_override)?;
            (ParticipantSet::Purchased, added_if(changed, user_id))
        }
        LeadEvent::UserIgnored(user_id) => {
            let changed = next
                .participants
                .add(ParticipantSet::Ignored, user_id, rules.ignore_override)?;
            (ParticipantSet::Ignored, added_if(changed, user_id))
        }
        LeadEvent::SweepExpire(candidates) => {
            if !lead.is_past_deadline(now) {
                return Err(LeadError::ConflictingState(format!(
                    "lead {} is still inside its exposure window",
                    lead.id
                )));
            }
            let mut added = Vec::new();
            for user_id in candidates {
                // Anyone who acted since the candidate scan keeps their relation
                if next.participants.classify(user_id) != Relation::None {
                    continue;
                }
                if next
                    .participants
                    .add(ParticipantSet::Ignored, user_id, rules.ignore_override)?
                {
                    added.push(user_id.clone());
                }
            }
            (ParticipantSet::Ignored, added)
        }
    };

    let mut effects = Vec::new();
    let mut additions = Vec::new();
    if !added.is_empty() {
        effects.push(SideEffect::ParticipantsAdded {
            set,
            users: added.clone(),
        });
        additions.push((set, added));
    }

    let after = next.status_at(now);
    if after != before {
        effects.push(SideEffect::StatusChanged {
            from: before,
            to: after,
        });
    }

    Ok(Transition {
        lead: next,
        additions,
        effects,
    })
}

fn ensure_window_open(lead: &Lead, user_id: &str, now: DateTime<Utc>) -> Result<(), LeadError> {
    if lead.is_past_deadline(now) && lead.participants.classify(user_id) == Relation::None {
        return Err(LeadError::ExposureWindowClosed { lead_id: lead.id });
    }
    Ok(())
}

fn added_if(changed: bool, user_id: &str) -> Vec<BankUserId> {
    if changed {
        vec![user_id.to_string()]
    } else {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use uuid::Uuid;

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-03-01T09:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn lead() -> Lead {
        Lead::new(Uuid::new_v4(), t0(), Duration::hours(48))
    }

    fn rules() -> LifecycleRules {
        LifecycleRules::default()
    }

    fn user(id: &str) -> BankUserId {
        id.to_string()
    }

    #[test]
    fn test_first_open_moves_submitted_to_open() {
        let lead = lead();
        let t = apply(&lead, &LeadEvent::UserOpened(user("a")), t0() + Duration::hours(1), &rules())
            .unwrap();

        assert!(t.changed());
        assert!(t.lead.participants.opened_by.contains("a"));
        assert_eq!(
            t.effects,
            vec![
                SideEffect::ParticipantsAdded {
                    set: ParticipantSet::Opened,
                    users: vec![user("a")],
                },
                SideEffect::StatusChanged {
                    from: LeadStatus::Submitted,
                    to: LeadStatus::Open,
                },
            ]
        );
    }

    #[test]
    fn test_purchase_moves_to_purchased() {
        let now = t0() + Duration::hours(2);
        let opened = apply(&lead(), &LeadEvent::UserOpened(user("a")), now, &rules()).unwrap();
        let bought = apply(&opened.lead, &LeadEvent::UserPurchased(user("b")), now, &rules()).unwrap();

        assert_eq!(bought.status(now), LeadStatus::Purchased);
        assert!(bought.effects.contains(&SideEffect::StatusChanged {
            from: LeadStatus::Open,
            to: LeadStatus::Purchased,
        }));
    }

    #[test]
    fn test_repeated_action_is_noop() {
        let now = t0() + Duration::hours(1);
        let once = apply(&lead(), &LeadEvent::UserPurchased(user("a")), now, &rules()).unwrap();
        let twice = apply(&once.lead, &LeadEvent::UserPurchased(user("a")), now, &rules()).unwrap();

        assert!(!twice.changed());
        assert!(twice.effects.is_empty());
        assert_eq!(twice.lead, once.lead);
    }

    #[test]
    fn test_event_before_creation_is_stale() {
        let lead = lead();
        let err = apply(
            &lead,
            &LeadEvent::UserOpened(user("a")),
            t0() - Duration::seconds(1),
            &rules(),
        )
        .unwrap_err();
        assert_eq!(err, LeadError::StaleEvent { lead_id: lead.id });
    }

    #[test]
    fn test_purchaser_cap() {
        let rules = LifecycleRules {
            max_purchasers: Some(1),
            ..LifecycleRules::default()
        };
        let now = t0() + Duration::hours(1);
        let first = apply(&lead(), &LeadEvent::UserPurchased(user("a")), now, &rules).unwrap();

        let err = apply(&first.lead, &LeadEvent::UserPurchased(user("b")), now, &rules).unwrap_err();
        assert!(matches!(err, LeadError::CapacityExceeded { cap: 1, .. }));

        // the existing purchaser repeating the action is still fine
        let again = apply(&first.lead, &LeadEvent::UserPurchased(user("a")), now, &rules).unwrap();
        assert!(!again.changed());
    }

    #[test]
    fn test_multiple_purchasers_without_cap() {
        let now = t0() + Duration::hours(1);
        let a = apply(&lead(), &LeadEvent::UserPurchased(user("a")), now, &rules()).unwrap();
        let b = apply(&a.lead, &LeadEvent::UserPurchased(user("b")), now, &rules()).unwrap();
        assert_eq!(b.lead.participants.purchased_by.len(), 2);
    }

    #[test]
    fn test_window_closed_for_users_who_never_acted() {
        let late = t0() + Duration::hours(50);
        let opened = apply(&lead(), &LeadEvent::UserOpened(user("a")), t0(), &rules()).unwrap();

        let err = apply(&opened.lead, &LeadEvent::UserOpened(user("b")), late, &rules()).unwrap_err();
        assert!(matches!(err, LeadError::ExposureWindowClosed { .. }));

        let bought = apply(&opened.lead, &LeadEvent::UserPurchased(user("a")), late, &rules()).unwrap();
        assert!(bought.lead.participants.purchased_by.contains("a"));
    }

    #[test]
    fn test_sweep_only_ignores_unrelated_users() {
        let mut lead = lead();
        lead.participants.opened_by.insert(user("a"));
        lead.participants.purchased_by.insert(user("p"));

        let t = apply(
            &lead,
            &LeadEvent::SweepExpire(vec![user("a"), user("b"), user("p")]),
            t0() + Duration::hours(49),
            &rules(),
        )
        .unwrap();

        assert_eq!(t.additions, vec![(ParticipantSet::Ignored, vec![user("b")])]);
        assert_eq!(t.lead.participants.opened_by, lead.participants.opened_by);
        assert_eq!(t.lead.participants.purchased_by, lead.participants.purchased_by);
    }

    #[test]
    fn test_sweep_inside_window_is_rejected() {
        let err = apply(
            &lead(),
            &LeadEvent::SweepExpire(vec![user("b")]),
            t0() + Duration::hours(47),
            &rules(),
        )
        .unwrap_err();
        assert!(matches!(err, LeadError::ConflictingState(_)));
    }

    #[test]
    fn test_explicit_ignore_of_purchaser_conflicts() {
        let now = t0() + Duration::hours(1);
        let bought = apply(&lead(), &LeadEvent::UserPurchased(user("a")), now, &rules()).unwrap();
        let err = apply(&bought.lead, &LeadEvent::UserIgnored(user("a")), now, &rules()).unwrap_err();
        assert!(matches!(err, LeadError::ConflictingState(_)));
    }

    #[test]
    fn test_union_never_shrinks_across_events() {
        let events = vec![
            (LeadEvent::UserOpened(user("a")), Duration::hours(1)),
            (LeadEvent::UserIgnored(user("c")), Duration::hours(2)),
            (LeadEvent::UserPurchased(user("a")), Duration::hours(3)),
            (LeadEvent::SweepExpire(vec![user("a"), user("b"), user("c")]), Duration::hours(49)),
        ];

        let mut current = lead();
        let mut seen = current.participants.union_len();
        for (event, offset) in events {
            current = apply(&current, &event, t0() + offset, &rules()).unwrap().lead;
            let size = current.participants.union_len();
            assert!(size >= seen);
            seen = size;
        }
        assert_eq!(seen, 3);
    }
}
