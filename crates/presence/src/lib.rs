use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use tracing::debug;

use parley_core::event::PresenceShow;
use parley_xmpp::stanza::{presence_show, presence_status};
use parley_xmpp::xmpp_parsers::jid::BareJid;
use parley_xmpp::xmpp_parsers::presence::{Presence, Type as PresenceType};

/// A contact's presence changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceUpdate {
    pub jid: BareJid,
    pub presence: PresenceShow,
    pub status: Option<String>,
}

/// Presence kind of an inbound presence stanza, or `None` for types that do
/// not describe availability (subscriptions, probes, errors).
pub fn classify(presence: &Presence) -> Option<PresenceShow> {
    match presence.type_ {
        PresenceType::None => Some(
            presence
                .show
                .as_ref()
                .map_or(PresenceShow::Online, presence_show),
        ),
        PresenceType::Unavailable => Some(PresenceShow::Unavailable),
        _ => None,
    }
}

/// Last presence seen per contact, used to suppress repeats.
#[derive(Debug, Default)]
pub struct PresenceTracker {
    last_seen: Mutex<HashMap<BareJid, (PresenceShow, Option<String>)>>,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an inbound presence stanza. Returns `true` if `emit` was
    /// called with an update.
    pub fn observe<F>(&self, presence: &Presence, emit: F) -> bool
    where
        F: FnOnce(PresenceUpdate),
    {
        let Some(kind) = classify(presence) else {
            return false;
        };
        let Some(from) = presence.from.as_ref() else {
            debug!("Ignoring presence without sender");
            return false;
        };
        self.record(from.to_bare(), kind, presence_status(presence), emit)
    }

    /// Record `(kind, status)` for `jid` and call `emit` only if it differs
    /// from the last recorded pair.
    ///
    /// `emit` runs while the bookkeeping lock is held, so per-contact updates
    /// reach the consumer in the order they were recorded.
    pub fn record<F>(
        &self,
        jid: BareJid,
        kind: PresenceShow,
        status: Option<String>,
        emit: F,
    ) -> bool
    where
        F: FnOnce(PresenceUpdate),
    {
        let mut last_seen = self
            .last_seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let current = (kind, status);
        if last_seen.get(&jid) == Some(&current) {
            debug!(jid = %jid, presence = %kind, "Presence unchanged");
            return false;
        }

        let (presence, status) = current.clone();
        last_seen.insert(jid.clone(), current);
        debug!(jid = %jid, presence = %presence, "Presence changed");
        emit(PresenceUpdate {
            jid,
            presence,
            status,
        });
        true
    }

    pub fn last_seen(&self, jid: &BareJid) -> Option<(PresenceShow, Option<String>)> {
        self.last_seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(jid)
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use parley_test_support::fixtures;
    use parley_xmpp::Stanza;
    use parley_xmpp::xmpp_parsers::presence::Show;

    use super::*;

    fn bare(jid: &str) -> BareJid {
        jid.parse().unwrap()
    }

    fn presence_fixture(name: &str) -> Presence {
        match Stanza::parse(fixtures::stanza(name).as_bytes()).unwrap() {
            Stanza::Presence(presence) => *presence,
            other => panic!("expected presence fixture, got {}", other.name()),
        }
    }

    #[test]
    fn classifies_by_type_and_show() {
        let mut presence = Presence::new(PresenceType::None);
        assert_eq!(classify(&presence), Some(PresenceShow::Online));

        presence.show = Some(Show::Dnd);
        assert_eq!(classify(&presence), Some(PresenceShow::Dnd));

        assert_eq!(
            classify(&Presence::new(PresenceType::Unavailable)),
            Some(PresenceShow::Unavailable)
        );
        assert_eq!(classify(&Presence::new(PresenceType::Subscribe)), None);
        assert_eq!(classify(&Presence::new(PresenceType::Probe)), None);
    }

    #[test]
    fn emits_once_per_run_of_identical_presence() {
        let tracker = PresenceTracker::new();
        let mut emitted = Vec::new();
        let sequence = [
            (PresenceShow::Online, None),
            (PresenceShow::Online, None),
            (PresenceShow::Away, Some("lunch")),
            (PresenceShow::Away, Some("lunch")),
            (PresenceShow::Away, Some("meeting")),
            (PresenceShow::Online, None),
        ];

        for (kind, status) in sequence {
            tracker.record(
                bare("alice@example.com"),
                kind,
                status.map(str::to_string),
                |update| emitted.push(update),
            );
        }

        let kinds: Vec<_> = emitted
            .iter()
            .map(|update| (update.presence, update.status.as_deref()))
            .collect();
        assert_eq!(
            kinds,
            vec![
                (PresenceShow::Online, None),
                (PresenceShow::Away, Some("lunch")),
                (PresenceShow::Away, Some("meeting")),
                (PresenceShow::Online, None),
            ]
        );
    }

    #[test]
    fn contacts_are_tracked_independently() {
        let tracker = PresenceTracker::new();
        let mut count = 0;

        for jid in ["a@example.com", "b@example.com", "a@example.com"] {
            tracker.record(bare(jid), PresenceShow::Online, None, |_| count += 1);
        }

        assert_eq!(count, 2);
        assert_eq!(
            tracker.last_seen(&bare("b@example.com")),
            Some((PresenceShow::Online, None))
        );
    }

    #[test]
    fn observe_keys_on_bare_sender() {
        let tracker = PresenceTracker::new();
        let mut updates = Vec::new();

        assert!(tracker.observe(&presence_fixture("presence-away.xml"), |u| updates.push(u)));
        assert!(!tracker.observe(&presence_fixture("presence-away.xml"), |u| updates.push(u)));
        assert!(tracker.observe(&presence_fixture("presence-unavailable.xml"), |u| updates.push(u)));
        assert!(!tracker.observe(&presence_fixture("presence-subscribe.xml"), |u| updates.push(u)));

        assert_eq!(updates.len(), 2);
        assert_eq!(updates[0].jid, bare("alice@example.com"));
        assert_eq!(updates[0].presence, PresenceShow::Away);
        assert_eq!(updates[0].status.as_deref(), Some("lunch"));
        assert_eq!(updates[1].presence, PresenceShow::Unavailable);
    }
}
