use proptest::prelude::*;

use phosaic_proto::{payload_from_value, DisplayGeometry, SessionId, Signal};

use crate::session::{SessionState, SubordinateSession};

#[derive(Debug, Clone)]
enum Event {
    Load(bool),
    FullscreenEntered,
    GeometryCaptured,
    Registered,
    Offer(u8),
    AnswerCreated,
    NegotiationFailed,
    RemoteCandidate(u8),
    LocalCandidate,
    DataChannelOpen,
    TransportClosed,
}

fn event() -> impl Strategy<Value = Event> {
    prop_oneof![
        any::<bool>().prop_map(Event::Load),
        Just(Event::FullscreenEntered),
        Just(Event::GeometryCaptured),
        Just(Event::Registered),
        (0u8..3).prop_map(Event::Offer),
        Just(Event::AnswerCreated),
        Just(Event::NegotiationFailed),
        (0u8..3).prop_map(Event::RemoteCandidate),
        Just(Event::LocalCandidate),
        Just(Event::DataChannelOpen),
        Just(Event::TransportClosed),
    ]
}

fn apply(session: &mut SubordinateSession, event: &Event) -> bool {
    let body = payload_from_value(&serde_json::json!({"k": 1})).unwrap();
    let peer = |n: u8| SessionId::new(format!("coord{}", n));
    let result = match event {
        Event::Load(full) => session.load(*full),
        Event::FullscreenEntered => session.fullscreen_entered(),
        Event::GeometryCaptured => session.geometry_captured(DisplayGeometry::new(1280, 720).unwrap()),
        Event::Registered => session.registered("abc123".into()),
        Event::Offer(n) => session.offer_received(Signal::new("abc123".into(), body).with_source(peer(*n))),
        Event::AnswerCreated => session.answer_created(body),
        Event::NegotiationFailed => session.negotiation_failed("test"),
        Event::RemoteCandidate(n) => {
            session.remote_candidate(Signal::new("abc123".into(), body).with_source(peer(*n)))
        }
        Event::LocalCandidate => session.local_candidate(body),
        Event::DataChannelOpen => session.data_channel_open(),
        Event::TransportClosed => session.transport_closed(),
    };
    result.is_ok()
}

proptest! {
    #[test]
    fn rejected_events_leave_state_untouched(events in prop::collection::vec(event(), 0..40)) {
        let mut session = SubordinateSession::new();
        for event in &events {
            let before = session.state().clone();
            let stalled = session.is_stalled();
            if !apply(&mut session, event) {
                prop_assert_eq!(session.state(), &before);
                prop_assert_eq!(session.is_stalled(), stalled);
            }
        }
    }

    #[test]
    fn stall_and_coordinator_are_sticky(events in prop::collection::vec(event(), 0..40)) {
        let mut session = SubordinateSession::new();
        let mut coordinator: Option<SessionId> = None;
        let mut stalled = false;

        for event in &events {
            apply(&mut session, event);

            if stalled {
                prop_assert!(session.is_stalled());
            }
            stalled = session.is_stalled();

            if *session.state() == SessionState::Disconnected {
                break;
            }
            match (&coordinator, session.coordinator()) {
                (Some(fixed), Some(now)) => prop_assert_eq!(fixed, now),
                (None, Some(now)) => coordinator = Some(now.clone()),
                _ => {}
            }
        }
    }
}
