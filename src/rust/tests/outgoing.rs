//
// Copyright 2024 FieldRTC Contributors
// SPDX-License-Identifier: AGPL-3.0-only
//

//! Tests for outgoing calls

// Requires the 'sim' feature

#[macro_use]
mod common;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use common::{endpoint, peer_target, random_contact, TestContext};

use fieldrtc::common::units::DataRate;
use fieldrtc::common::{CallState, EndReason, VolumeSample};
use fieldrtc::core::signaling::{Accept, Busy, RingConfirm};
use fieldrtc::error::FieldRtcError;
use fieldrtc::media::{MediaConstraint, MediaKind, MediaSink};

#[derive(Debug)]
struct TestSink(&'static str);
impl MediaSink for TestSink {}

// Simple test that:
// -- creates a call session
// -- shuts down the call session
#[test]
fn create_session() {
    let context = TestContext::new();
    context.session.close().expect(error_line!());
}

// Drive an outbound 1:1 call up to Connected:
//
// - make_call
// - check invite sent, InProgress fired, state is Dialing
// - inject ring confirmation, check Ringing
// - inject accept, check Connected and the two-party roster
fn connect_outbound_call(context: &TestContext, callee: &str) -> fieldrtc::common::CallId {
    let session = &context.session;

    let call_id = session
        .make_call(peer_target(callee), MediaConstraint::audio_video())
        .expect(error_line!());
    session.synchronize().expect(error_line!());

    assert_eq!(session.state().expect(error_line!()), CallState::Dialing);
    assert_eq!(context.signaler.invites_sent(), 1);
    assert_eq!(context.observer.event_count("InProgress"), 1);
    assert_eq!(context.media.captures_opened(), 1);

    session.received_ring(RingConfirm { call_id });
    session.synchronize().expect(error_line!());

    assert_eq!(session.state().expect(error_line!()), CallState::Ringing);
    assert_eq!(context.observer.event_count("Ringing"), 1);

    session.received_accept(Accept {
        call_id,
        callee: callee.to_string(),
        callee_endpoint: endpoint(callee),
    });
    session.synchronize().expect(error_line!());

    assert_eq!(session.state().expect(error_line!()), CallState::Connected);
    assert_eq!(context.observer.event_count("Connected"), 1);
    assert_eq!(context.observer.event_count("Arrived"), 1);
    assert_eq!(context.media.connections_created(), 1);

    let field = session
        .get_active_field()
        .expect(error_line!())
        .expect(error_line!());
    let roster: Vec<&str> = field
        .endpoints
        .iter()
        .map(|ep| ep.contact.as_str())
        .collect();
    assert_eq!(roster, vec![context.self_contact.as_str(), callee]);

    call_id
}

#[test]
fn outgoing_call_connects_and_hangs_up() {
    let context = TestContext::new();
    let callee = random_contact("CALLEE");
    connect_outbound_call(&context, &callee);

    // Connected cancelled the deadlines; nothing may fire late.
    thread::sleep(Duration::from_millis(300));
    context.session.synchronize().expect(error_line!());
    assert_eq!(context.observer.event_count("Timeout"), 0);
    assert_eq!(
        context.session.state().expect(error_line!()),
        CallState::Connected
    );

    context.session.hangup_call().expect(error_line!());
    context.session.synchronize().expect(error_line!());

    assert_eq!(
        context.session.state().expect(error_line!()),
        CallState::Idle
    );
    assert!(context
        .session
        .get_active_field()
        .expect(error_line!())
        .is_none());
    assert_eq!(context.signaler.hangups_sent(), 1);
    assert_eq!(context.observer.event_count("Bye"), 1);
    assert_eq!(context.observer.ended(), vec![EndReason::LocalHangup]);

    // Hanging up again is a no-op.
    context.session.hangup_call().expect(error_line!());
    context.session.synchronize().expect(error_line!());
    assert_eq!(context.observer.event_count("Bye"), 1);
    assert_eq!(context.observer.ended().len(), 1);

    // Teardown left no timers behind.
    thread::sleep(Duration::from_millis(300));
    context.session.synchronize().expect(error_line!());
    assert_eq!(context.observer.ended().len(), 1);
}

#[test]
fn second_call_is_rejected_without_touching_the_first() {
    let context = TestContext::new();
    let callee = random_contact("CALLEE");
    context
        .session
        .make_call(peer_target(&callee), MediaConstraint::audio())
        .expect(error_line!());
    context.session.synchronize().expect(error_line!());

    let result = context
        .session
        .make_call(peer_target("someone-else"), MediaConstraint::audio());
    let err = result.err().expect(error_line!());
    assert!(matches!(
        err.downcast_ref::<FieldRtcError>(),
        Some(FieldRtcError::CallAlreadyInProgress(_))
    ));

    // The first call is untouched.
    context.session.synchronize().expect(error_line!());
    assert_eq!(
        context.session.state().expect(error_line!()),
        CallState::Dialing
    );
    assert_eq!(context.signaler.invites_sent(), 1);
    assert_eq!(context.observer.event_count("InProgress"), 1);
}

#[test]
fn ringing_times_out_and_converges_to_idle() {
    let context = TestContext::new();
    let callee = random_contact("CALLEE");
    let call_id = context
        .session
        .make_call(peer_target(&callee), MediaConstraint::audio())
        .expect(error_line!());
    context.session.received_ring(RingConfirm { call_id });
    context.session.synchronize().expect(error_line!());
    assert_eq!(
        context.session.state().expect(error_line!()),
        CallState::Ringing
    );

    // ring_timeout is 100ms in the test config.
    thread::sleep(Duration::from_millis(300));
    context.session.synchronize().expect(error_line!());

    assert_eq!(
        context.session.state().expect(error_line!()),
        CallState::Idle
    );
    assert!(context
        .session
        .get_active_field()
        .expect(error_line!())
        .is_none());
    assert_eq!(context.observer.event_count("Timeout"), 1);
    assert_eq!(context.observer.ended(), vec![EndReason::Timeout]);
}

#[test]
fn unanswered_dialing_hits_the_answer_deadline() {
    let context = TestContext::new();
    let callee = random_contact("CALLEE");
    context
        .session
        .make_call(peer_target(&callee), MediaConstraint::audio())
        .expect(error_line!());

    // answer_timeout is 400ms in the test config; no ring, no accept.
    thread::sleep(Duration::from_millis(700));
    context.session.synchronize().expect(error_line!());

    assert_eq!(
        context.session.state().expect(error_line!()),
        CallState::Idle
    );
    assert_eq!(context.observer.ended(), vec![EndReason::Timeout]);
}

#[test]
fn remote_busy_ends_the_call() {
    let context = TestContext::new();
    let callee = random_contact("CALLEE");
    let call_id = context
        .session
        .make_call(peer_target(&callee), MediaConstraint::audio())
        .expect(error_line!());
    context.session.synchronize().expect(error_line!());

    context.session.received_busy(Busy { call_id });
    context.session.synchronize().expect(error_line!());

    assert_eq!(
        context.session.state().expect(error_line!()),
        CallState::Idle
    );
    assert_eq!(context.observer.event_count("Busy"), 1);
    assert_eq!(context.observer.ended(), vec![EndReason::RemoteBusy]);
    assert!(context
        .session
        .get_active_field()
        .expect(error_line!())
        .is_none());
}

#[test]
fn negotiation_failure_tears_the_call_down() {
    let context = TestContext::new();
    context.media.set_should_fail_negotiation(true);
    let callee = random_contact("CALLEE");
    let call_id = context
        .session
        .make_call(peer_target(&callee), MediaConstraint::audio())
        .expect(error_line!());
    context.session.received_accept(Accept {
        call_id,
        callee: callee.clone(),
        callee_endpoint: endpoint(&callee),
    });
    context.session.synchronize().expect(error_line!());

    assert_eq!(
        context.session.state().expect(error_line!()),
        CallState::Idle
    );
    assert_eq!(context.observer.event_count("CallFailed"), 1);
    assert_eq!(
        context.observer.ended(),
        vec![EndReason::NegotiationFailure]
    );
    // The failed device was released.
    assert_eq!(context.media.live_connections(), 0);
}

#[test]
fn transport_failure_after_accept_tears_the_call_down() {
    let context = TestContext::new();
    context.media.set_auto_connect(false);
    let callee = random_contact("CALLEE");
    let call_id = context
        .session
        .make_call(peer_target(&callee), MediaConstraint::audio())
        .expect(error_line!());
    context.session.received_accept(Accept {
        call_id,
        callee: callee.clone(),
        callee_endpoint: endpoint(&callee),
    });
    context.session.synchronize().expect(error_line!());

    // Negotiation is in flight; the call is still being set up.
    assert_eq!(
        context.session.state().expect(error_line!()),
        CallState::Dialing
    );
    assert_eq!(context.media.connections_created(), 1);

    context.media.fail_connection(&callee, "ice failed");
    context.session.synchronize().expect(error_line!());

    assert_eq!(
        context.session.state().expect(error_line!()),
        CallState::Idle
    );
    assert_eq!(
        context.observer.ended(),
        vec![EndReason::NegotiationFailure]
    );
}

#[test]
fn hangup_can_cancel_a_call_mid_negotiation() {
    let context = TestContext::new();
    context.media.set_auto_connect(false);
    let callee = random_contact("CALLEE");
    let call_id = context
        .session
        .make_call(peer_target(&callee), MediaConstraint::audio())
        .expect(error_line!());
    context.session.received_accept(Accept {
        call_id,
        callee: callee.clone(),
        callee_endpoint: endpoint(&callee),
    });
    context.session.synchronize().expect(error_line!());

    // The answer never completes; hang up while it is pending.
    context.session.hangup_call().expect(error_line!());
    context.session.synchronize().expect(error_line!());

    assert_eq!(
        context.session.state().expect(error_line!()),
        CallState::Idle
    );
    assert_eq!(context.observer.ended(), vec![EndReason::LocalHangup]);
    assert_eq!(context.media.live_connections(), 0);

    // A late connect callback for the torn-down call is ignored.
    context.media.connect(&callee);
    context.session.synchronize().expect(error_line!());
    assert_eq!(
        context.session.state().expect(error_line!()),
        CallState::Idle
    );
    assert_eq!(context.observer.event_count("Connected"), 0);
}

#[test]
fn missing_capture_device_fails_before_any_field_exists() {
    let context = TestContext::new();
    context.media.set_should_fail_capture(true);
    let callee = random_contact("CALLEE");
    context
        .session
        .make_call(peer_target(&callee), MediaConstraint::audio())
        .expect(error_line!());
    context.session.synchronize().expect(error_line!());

    assert_eq!(
        context.session.state().expect(error_line!()),
        CallState::Idle
    );
    assert_eq!(context.observer.ended(), vec![EndReason::DeviceFailure]);
    // No field, no invite, no connection was ever created.
    assert!(context
        .session
        .get_active_field()
        .expect(error_line!())
        .is_none());
    assert_eq!(context.signaler.invites_sent(), 0);
    assert_eq!(context.media.connections_created(), 0);

    // The session is reusable afterwards.
    context.media.set_should_fail_capture(false);
    context.observer.clear();
    connect_outbound_call(&context, &random_contact("CALLEE"));
}

#[test]
fn failed_invite_send_is_not_swallowed() {
    let context = TestContext::new();
    context.signaler.set_should_fail(true);
    let callee = random_contact("CALLEE");
    context
        .session
        .make_call(peer_target(&callee), MediaConstraint::audio())
        .expect(error_line!());
    context.session.synchronize().expect(error_line!());

    assert_eq!(
        context.session.state().expect(error_line!()),
        CallState::Idle
    );
    assert_eq!(context.observer.event_count("CallFailed"), 1);
    assert_eq!(context.observer.ended(), vec![EndReason::SignalingFailure]);
}

#[test]
fn stats_snapshot_updates_bandwidth_and_invokes_callbacks() {
    let context = TestContext::new();
    let callee = random_contact("CALLEE");
    connect_outbound_call(&context, &callee);

    let collected_out = Arc::new(Mutex::new(Vec::new()));
    let collected_in = Arc::new(Mutex::new(Vec::new()));
    let out = collected_out.clone();
    let inn = collected_in.clone();
    context
        .session
        .snapshoot_stats_report(
            Box::new(move |streams| out.lock().unwrap().push(streams)),
            Box::new(move |streams| inn.lock().unwrap().push(streams)),
        )
        .expect(error_line!());
    context.session.synchronize().expect(error_line!());

    // One report per bound device.
    assert_eq!(collected_out.lock().unwrap().len(), 1);
    assert_eq!(collected_in.lock().unwrap().len(), 1);
    assert_eq!(collected_out.lock().unwrap()[0].len(), 2);

    let field = context
        .session
        .get_active_field()
        .expect(error_line!())
        .expect(error_line!());
    let remote = field
        .endpoints
        .iter()
        .find(|ep| ep.contact == callee)
        .expect(error_line!());
    assert_eq!(remote.audio_upstream_bandwidth, DataRate::from_kbps(32));
    assert_eq!(remote.audio_downstream_bandwidth, DataRate::from_kbps(24));
    assert_eq!(remote.video_upstream_bandwidth, DataRate::from_kbps(800));
    assert_eq!(remote.video_downstream_bandwidth, DataRate::from_kbps(600));
}

#[test]
fn periodic_stats_refresh_runs_while_connected() {
    let context = TestContext::new();
    let callee = random_contact("CALLEE");
    connect_outbound_call(&context, &callee);

    // stats_interval is 50ms in the test config.
    thread::sleep(Duration::from_millis(200));
    context.session.synchronize().expect(error_line!());

    let field = context
        .session
        .get_active_field()
        .expect(error_line!())
        .expect(error_line!());
    let remote = field
        .endpoints
        .iter()
        .find(|ep| ep.contact == callee)
        .expect(error_line!());
    assert_eq!(remote.audio_upstream_bandwidth, DataRate::from_kbps(32));
}

#[test]
fn volume_samples_flow_for_remote_and_local_audio() {
    let context = TestContext::new();
    let callee = random_contact("CALLEE");
    connect_outbound_call(&context, &callee);

    context
        .media
        .inject_remote_audio(&callee, vec![0.5; 4800]);
    context.media.inject_local_audio(vec![0.25; 4800]);
    thread::sleep(Duration::from_millis(100));
    context.session.synchronize().expect(error_line!());

    let samples = context.observer.volume_samples();
    let remote_sample = samples
        .iter()
        .find(|sample| sample.contact == callee)
        .expect(error_line!());
    assert!((remote_sample.volume - 0.5).abs() < 1e-5);
    assert!(!remote_sample.clipping);

    let local_sample = samples
        .iter()
        .find(|sample| sample.contact == context.self_contact)
        .expect(error_line!());
    assert!((local_sample.volume - 0.25).abs() < 1e-5);

    // The field retains only the latest sample per endpoint.
    let field = context
        .session
        .get_active_field()
        .expect(error_line!())
        .expect(error_line!());
    let stored: &VolumeSample = field.volumes.get(&callee).expect(error_line!());
    assert!(stored.volume > 0.0);
}

#[test]
fn clipping_input_is_flagged() {
    let context = TestContext::new();
    let callee = random_contact("CALLEE");
    connect_outbound_call(&context, &callee);

    context
        .media
        .inject_remote_audio(&callee, vec![0.99; 4800]);
    thread::sleep(Duration::from_millis(100));
    context.session.synchronize().expect(error_line!());

    let samples = context.observer.volume_samples();
    let sample = samples
        .iter()
        .find(|sample| sample.contact == callee)
        .expect(error_line!());
    assert!(sample.clipping);
}

#[test]
fn device_toggles_reach_the_transport_and_the_roster() {
    let context = TestContext::new();
    let callee = random_contact("CALLEE");
    connect_outbound_call(&context, &callee);
    let session = &context.session;

    session.enable_outbound_audio(false);
    session.enable_inbound_video(false);
    session.synchronize().expect(error_line!());

    assert_eq!(
        context.media.toggle("local", MediaKind::Audio, "out"),
        Some(false)
    );
    assert_eq!(
        context.media.toggle(&callee, MediaKind::Audio, "out"),
        Some(false)
    );
    assert_eq!(
        context.media.toggle(&callee, MediaKind::Video, "in"),
        Some(false)
    );

    let field = session
        .get_active_field()
        .expect(error_line!())
        .expect(error_line!());
    let local = field.endpoints.first().expect(error_line!());
    assert!(!local.outbound_audio_enabled());
    assert!(local.outbound_video_enabled());
    let remote = field
        .endpoints
        .iter()
        .find(|ep| ep.contact == callee)
        .expect(error_line!());
    assert!(!remote.inbound_video_enabled());
    assert!(remote.inbound_audio_enabled());
}

#[test]
fn toggles_while_idle_are_harmless() {
    let context = TestContext::new();
    context.session.enable_outbound_audio(false);
    context.session.enable_inbound_video(true);
    context.session.synchronize().expect(error_line!());

    assert_eq!(context.media.toggle("local", MediaKind::Audio, "out"), None);
    assert_eq!(
        context.session.state().expect(error_line!()),
        CallState::Idle
    );
}

#[test]
fn sinks_are_rebound_per_call() {
    let context = TestContext::new();
    context.session.set_local_sink(Box::new(TestSink("local-1")));
    context
        .session
        .set_remote_sink(Box::new(TestSink("remote-1")));

    let first = random_contact("CALLEE");
    connect_outbound_call(&context, &first);
    assert_eq!(context.media.local_sinks_bound(), 1);
    assert_eq!(context.media.remote_sinks_bound(), 1);

    context.session.hangup_call().expect(error_line!());
    context.session.synchronize().expect(error_line!());
    context.observer.clear();

    // A fresh pair of sinks for the next call, as the embedder would do.
    context.session.set_local_sink(Box::new(TestSink("local-2")));
    context
        .session
        .set_remote_sink(Box::new(TestSink("remote-2")));

    let second = random_contact("CALLEE");
    let call_id = context
        .session
        .make_call(peer_target(&second), MediaConstraint::audio_video())
        .expect(error_line!());
    context.session.received_accept(Accept {
        call_id,
        callee: second.clone(),
        callee_endpoint: endpoint(&second),
    });
    context.session.synchronize().expect(error_line!());

    assert_eq!(context.media.local_sinks_bound(), 2);
    assert_eq!(context.media.remote_sinks_bound(), 2);
}
