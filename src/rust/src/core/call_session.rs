//
// Copyright 2024 FieldRTC Contributors
// SPDX-License-Identifier: AGPL-3.0-only
//

//! The per-client call session state machine.
//!
//! One `CallSession` supervises at most one call at a time:
//! `Idle -> Dialing -> Ringing -> Connected -> Idle` on the normal path,
//! with Busy/Timeout/Failed as alternate exits.  Every terminal
//! transition funnels through [`SessionState::conclude`] so timers,
//! field, and devices are released exactly once no matter which path
//! fired.
//!
//! All state lives on an actor thread; the public API only enqueues work
//! and can therefore be called from any thread, including while a
//! negotiation is in flight.

use std::sync::{mpsc, Arc, Mutex};
use std::time::{Duration, Instant};

use vumeter::{LevelSample, LevelWorker, LevelWorkerConfig, MeterConfig};

use crate::common::actor::{Actor, Stopper};
use crate::common::{
    CallDirection, CallId, CallState, ContactId, EndReason, FieldId, GroupId, Result,
    SessionConfig, VolumeSample,
};
use crate::core::call_mutex::CallMutex;
use crate::core::endpoint::{Endpoint, FieldEndpoint};
use crate::core::field::{Field, FieldSnapshot};
use crate::core::observer::{SessionEvent, SessionObserver};
use crate::core::rtc_device::RtcDevice;
use crate::core::signaling::{Accept, Arrival, Busy, Departure, Hangup, Invite, RingConfirm, Signaler};
use crate::error::FieldRtcError;
use crate::media::{
    CaptureDevice, ConnectionObserver, ConnectionStats, MediaBackend, MediaConstraint, MediaKind,
    MediaSink, StreamStats,
};

/// Who a call is addressed to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CallTarget {
    /// A single callee.
    Peer {
        contact: ContactId,
        endpoint: Endpoint,
    },
    /// Everyone sharing a group conversation id.
    Group(GroupId),
}

/// The top-level call API handle.  Cheap operations run inline; state
/// mutations run on the session's actor thread.
pub struct CallSession {
    actor: Actor<SessionState>,
    /// Id of the active (non-terminal) call, shared with the actor so
    /// the single-active-call invariant is checked synchronously at the
    /// API boundary.
    active: Arc<CallMutex<Option<CallId>>>,
    /// Id of an inbound invite waiting for `answer_call`.
    pending: Arc<CallMutex<Option<CallId>>>,
    stopper: Stopper,
}

impl CallSession {
    pub fn new(
        self_contact: ContactId,
        self_endpoint: Endpoint,
        config: SessionConfig,
        backend: Box<dyn MediaBackend>,
        signaler: Box<dyn Signaler>,
        observer: Box<dyn SessionObserver>,
    ) -> Result<Self> {
        info!("CallSession::new(): contact: {}", self_contact);
        let stopper = Stopper::new();
        let active = Arc::new(CallMutex::new(None, "active call id"));
        let pending = Arc::new(CallMutex::new(None, "pending call id"));
        let active_for_state = active.clone();
        let pending_for_state = pending.clone();
        let tick_interval = config.tick_interval;

        let actor = Actor::start("call-session", stopper.clone(), move |actor| {
            Ok(SessionState {
                config,
                self_contact,
                self_endpoint,
                state: CallState::Idle,
                direction: None,
                call_id: None,
                remote: None,
                group: None,
                constraint: None,
                field: None,
                pending_invite: None,
                ring_deadline: None,
                answer_deadline: None,
                next_stats_time: None,
                local_meter: None,
                local_sink: None,
                remote_sink: None,
                backend,
                signaler,
                observer,
                active: active_for_state,
                pending: pending_for_state,
                actor,
            })
        })?;
        actor.send_delayed(tick_interval, SessionState::tick);

        Ok(Self {
            actor,
            active,
            pending,
            stopper,
        })
    }

    /// Starts an outgoing call.  Rejected synchronously, with no state
    /// touched, if another call is active or an invite is pending.
    pub fn make_call(&self, target: CallTarget, constraint: MediaConstraint) -> Result<CallId> {
        let call_id = {
            let mut active = self.active.lock()?;
            let pending = self.pending.lock()?;
            if let Some(existing) = (*active).or(*pending) {
                return Err(FieldRtcError::CallAlreadyInProgress(existing).into());
            }
            let call_id = CallId::random();
            *active = Some(call_id);
            call_id
        };
        info!("API: make_call(): call_id: {}", call_id);
        self.actor
            .send(move |state| state.start_outgoing(call_id, target, constraint));
        Ok(call_id)
    }

    /// Accepts the pending inbound call.
    pub fn answer_call(&self, constraint: MediaConstraint) -> Result<()> {
        let call_id = {
            let mut active = self.active.lock()?;
            let mut pending = self.pending.lock()?;
            if let Some(existing) = *active {
                return Err(FieldRtcError::CallAlreadyInProgress(existing).into());
            }
            match pending.take() {
                Some(call_id) => {
                    *active = Some(call_id);
                    call_id
                }
                None => return Err(FieldRtcError::NoPendingCall.into()),
            }
        };
        info!("API: answer_call(): call_id: {}", call_id);
        self.actor
            .send(move |state| state.start_answering(call_id, constraint));
        Ok(())
    }

    /// Requests teardown of the active or pending call.  A no-op once
    /// the session is already idle.
    pub fn hangup_call(&self) -> Result<()> {
        {
            let active = self.active.lock()?;
            let pending = self.pending.lock()?;
            if active.is_none() && pending.is_none() {
                info!("API: hangup_call(): already idle");
                return Ok(());
            }
        }
        info!("API: hangup_call():");
        self.actor.send(|state| state.local_hangup());
        Ok(())
    }

    /// Binds the sink previewing local capture.  May be called any time;
    /// applied when capture exists.
    pub fn set_local_sink(&self, sink: Box<dyn MediaSink>) {
        self.actor.send(move |state| state.bind_local_sink(sink));
    }

    /// Binds the sink rendering the 1:1 peer's media.
    pub fn set_remote_sink(&self, sink: Box<dyn MediaSink>) {
        self.actor.send(move |state| state.bind_remote_sink(sink));
    }

    pub fn enable_outbound_audio(&self, enabled: bool) {
        self.actor
            .send(move |state| state.set_outbound(MediaKind::Audio, enabled));
    }

    pub fn enable_outbound_video(&self, enabled: bool) {
        self.actor
            .send(move |state| state.set_outbound(MediaKind::Video, enabled));
    }

    pub fn enable_inbound_audio(&self, enabled: bool) {
        self.actor
            .send(move |state| state.set_inbound(MediaKind::Audio, enabled));
    }

    pub fn enable_inbound_video(&self, enabled: bool) {
        self.actor
            .send(move |state| state.set_inbound(MediaKind::Video, enabled));
    }

    /// Asynchronously pulls a statistics report per bound device.  The
    /// callbacks run on the session thread; bandwidth counters are
    /// refreshed as a side effect.
    pub fn snapshoot_stats_report(
        &self,
        outbound: Box<dyn FnMut(Vec<StreamStats>) + Send>,
        inbound: Box<dyn FnMut(Vec<StreamStats>) + Send>,
    ) -> Result<()> {
        info!("API: snapshoot_stats_report():");
        let outbound = Arc::new(Mutex::new(outbound));
        let inbound = Arc::new(Mutex::new(inbound));
        self.actor.send(move |state| {
            let Some(field) = &state.field else {
                info!("snapshoot_stats_report(): no active field");
                return;
            };
            for (contact, device) in field.devices() {
                let actor = state.actor.clone();
                let contact = contact.clone();
                let outbound = outbound.clone();
                let inbound = inbound.clone();
                device.snapshoot_stats(Box::new(move |stats| {
                    actor.send(move |state| {
                        state.apply_connection_stats(contact, stats.clone());
                        if let Ok(mut callback) = outbound.lock() {
                            callback(stats.outbound.clone());
                        }
                        if let Ok(mut callback) = inbound.lock() {
                            callback(stats.inbound);
                        }
                    });
                }));
            }
        });
        Ok(())
    }

    // Inbound signaling, injected by the embedding transport.

    pub fn received_invite(&self, invite: Invite) {
        self.actor.send(move |state| state.handle_invite(invite));
    }

    pub fn received_ring(&self, ring: RingConfirm) {
        self.actor.send(move |state| state.handle_ring(ring));
    }

    pub fn received_accept(&self, accept: Accept) {
        self.actor.send(move |state| state.handle_accept(accept));
    }

    pub fn received_hangup(&self, hangup: Hangup) {
        self.actor.send(move |state| state.handle_hangup(hangup));
    }

    pub fn received_busy(&self, busy: Busy) {
        self.actor.send(move |state| state.handle_busy(busy));
    }

    pub fn received_arrival(&self, arrival: Arrival) {
        self.actor.send(move |state| state.handle_arrival(arrival));
    }

    pub fn received_departure(&self, departure: Departure) {
        self.actor
            .send(move |state| state.handle_departure(departure));
    }

    // Queries.

    pub fn state(&self) -> Result<CallState> {
        self.round_trip(|state| state.state)
    }

    /// The active field, or `None` while idle.
    pub fn get_active_field(&self) -> Result<Option<FieldSnapshot>> {
        self.round_trip(|state| state.field.as_ref().map(Field::snapshot))
    }

    /// Blocks until work queued so far (including work it queued in
    /// turn) has run.  Test hook.
    pub fn synchronize(&self) -> Result<()> {
        for _ in 0..3 {
            self.round_trip(|_| ())?;
        }
        Ok(())
    }

    /// Hangs up if needed and shuts the session down.
    pub fn close(&self) -> Result<()> {
        info!("API: close():");
        let _ = self.hangup_call();
        let _ = self.synchronize();
        self.stopper.stop_all_and_join();
        Ok(())
    }

    fn round_trip<T: Send + 'static>(
        &self,
        query: impl FnOnce(&mut SessionState) -> T + Send + 'static,
    ) -> Result<T> {
        let (sender, receiver) = mpsc::channel();
        self.actor.send(move |state| {
            let _ = sender.send(query(state));
        });
        receiver
            .recv_timeout(Duration::from_secs(5))
            .map_err(|_| FieldRtcError::SessionShutdown.into())
    }
}

impl Drop for CallSession {
    fn drop(&mut self) {
        self.stopper.stop_all_and_join();
    }
}

/// Forwards transport callbacks onto the session thread.
struct ActorConnectionObserver {
    actor: Actor<SessionState>,
}

impl ConnectionObserver for ActorConnectionObserver {
    fn on_media_connected(&self, remote: &ContactId) {
        let remote = remote.clone();
        self.actor
            .send(move |state| state.handle_media_connected(remote));
    }

    fn on_negotiation_failed(&self, remote: &ContactId, reason: String) {
        let remote = remote.clone();
        self.actor
            .send(move |state| state.handle_negotiation_failed(remote, reason));
    }
}

struct SessionState {
    config: SessionConfig,
    self_contact: ContactId,
    self_endpoint: Endpoint,

    state: CallState,
    direction: Option<CallDirection>,
    call_id: Option<CallId>,
    /// The 1:1 peer, or the inviter for an incoming group call.
    remote: Option<ContactId>,
    group: Option<GroupId>,
    constraint: Option<MediaConstraint>,
    field: Option<Field>,
    pending_invite: Option<Invite>,

    ring_deadline: Option<Instant>,
    answer_deadline: Option<Instant>,
    next_stats_time: Option<Instant>,

    local_meter: Option<LevelWorker>,
    local_sink: Option<Box<dyn MediaSink>>,
    remote_sink: Option<Box<dyn MediaSink>>,

    backend: Box<dyn MediaBackend>,
    signaler: Box<dyn Signaler>,
    observer: Box<dyn SessionObserver>,

    active: Arc<CallMutex<Option<CallId>>>,
    pending: Arc<CallMutex<Option<CallId>>>,
    actor: Actor<SessionState>,
}

impl SessionState {
    // Entry points.

    fn start_outgoing(&mut self, call_id: CallId, target: CallTarget, constraint: MediaConstraint) {
        info!("start_outgoing(): call_id: {}", call_id);
        if self.state != CallState::Idle {
            error!("start_outgoing(): not idle, state: {}", self.state);
            return;
        }
        self.call_id = Some(call_id);
        self.direction = Some(CallDirection::OutGoing);
        self.constraint = Some(constraint.clone());
        self.state = CallState::Dialing;
        self.observer
            .handle_event(SessionEvent::InProgress { call_id });

        // Capture first: a device error must surface before any field
        // exists.
        let capture = match self.open_capture_with_meter(&constraint) {
            Ok(capture) => capture,
            Err(e) => {
                error!("open_capture() failed: {}", e);
                self.conclude(EndReason::DeviceFailure);
                return;
            }
        };

        let (owner_id, remote, group) = match &target {
            CallTarget::Peer { contact, .. } => (contact.clone(), Some(contact.clone()), None),
            CallTarget::Group(group) => (group.clone(), None, Some(group.clone())),
        };
        let mut field = Field::new(
            FieldId::random(),
            owner_id,
            self.local_field_endpoint(&constraint),
        );
        field.set_capture(capture);
        self.field = Some(field);
        self.remote = remote;
        self.group = group.clone();

        let invite = Invite {
            call_id,
            caller: self.self_contact.clone(),
            caller_endpoint: self.self_endpoint.clone(),
            media_type: constraint.media_type(),
            age: Duration::ZERO,
            group,
        };
        let sent = match &target {
            CallTarget::Peer { contact, .. } => self.signaler.send_invite(contact, invite),
            CallTarget::Group(group) => self.signaler.send_group_invite(group, invite),
        };
        if let Err(e) = sent {
            error!("send_invite() failed: {}", e);
            self.conclude(EndReason::SignalingFailure);
            return;
        }
        self.answer_deadline = Some(Instant::now() + self.config.answer_timeout);
    }

    fn start_answering(&mut self, call_id: CallId, constraint: MediaConstraint) {
        info!("start_answering(): call_id: {}", call_id);
        let invite = match self.pending_invite.take() {
            Some(invite) if invite.call_id == call_id => invite,
            other => {
                error!("start_answering(): no matching pending invite");
                self.pending_invite = other;
                self.conclude(EndReason::InternalFailure);
                return;
            }
        };
        self.ring_deadline = None;
        self.call_id = Some(call_id);
        self.direction = Some(CallDirection::InComing);
        self.constraint = Some(constraint.clone());
        self.state = CallState::Dialing;
        self.remote = Some(invite.caller.clone());
        self.group = invite.group.clone();
        self.observer
            .handle_event(SessionEvent::InProgress { call_id });

        let capture = match self.open_capture_with_meter(&constraint) {
            Ok(capture) => capture,
            Err(e) => {
                error!("open_capture() failed: {}", e);
                self.conclude(EndReason::DeviceFailure);
                return;
            }
        };
        let owner_id = invite
            .group
            .clone()
            .unwrap_or_else(|| invite.caller.clone());
        let mut field = Field::new(
            FieldId::random(),
            owner_id,
            self.local_field_endpoint(&constraint),
        );
        field.set_capture(capture);
        self.field = Some(field);

        if let Err(e) = self.attach_remote(invite.caller.clone(), invite.caller_endpoint.clone()) {
            error!("attach_remote() failed: {}", e);
            self.conclude(EndReason::NegotiationFailure);
            return;
        }
        let accept = Accept {
            call_id,
            callee: self.self_contact.clone(),
            callee_endpoint: self.self_endpoint.clone(),
        };
        if let Err(e) = self.signaler.send_accept(&invite.caller, accept) {
            error!("send_accept() failed: {}", e);
            self.conclude(EndReason::SignalingFailure);
            return;
        }
        self.answer_deadline = Some(Instant::now() + self.config.answer_timeout);
    }

    fn local_hangup(&mut self) {
        if self.state != CallState::Idle {
            let mut recipients: Vec<ContactId> = Vec::new();
            if let Some(field) = &self.field {
                recipients.extend(
                    field
                        .endpoints()
                        .iter()
                        .skip(1)
                        .map(|ep| ep.contact.clone()),
                );
            }
            if recipients.is_empty() {
                if let Some(remote) = &self.remote {
                    recipients.push(remote.clone());
                }
            }
            if let Some(call_id) = self.call_id {
                for to in recipients {
                    if let Err(e) = self.signaler.send_hangup(&to, Hangup { call_id }) {
                        warn!("send_hangup() failed: {}", e);
                    }
                }
            }
            self.conclude(EndReason::LocalHangup);
        } else if let Some(invite) = &self.pending_invite {
            // Declining an unanswered invite.
            let hangup = Hangup {
                call_id: invite.call_id,
            };
            let caller = invite.caller.clone();
            if let Err(e) = self.signaler.send_hangup(&caller, hangup) {
                warn!("send_hangup() failed: {}", e);
            }
            self.conclude(EndReason::LocalHangup);
        } else {
            info!("local_hangup(): already idle");
        }
    }

    // Inbound signaling.

    fn handle_invite(&mut self, invite: Invite) {
        info!(
            "handle_invite(): call_id: {}, caller: {}",
            invite.call_id, invite.caller
        );
        if self.state != CallState::Idle || self.pending_invite.is_some() {
            info!("handle_invite(): busy, declining");
            let busy = Busy {
                call_id: invite.call_id,
            };
            if let Err(e) = self.signaler.send_busy(&invite.caller, busy) {
                warn!("send_busy() failed: {}", e);
            }
            return;
        }
        if invite.age > self.config.max_invite_age {
            warn!(
                "handle_invite(): invite expired, age: {:?}, call_id: {}",
                invite.age, invite.call_id
            );
            self.observer.handle_event(SessionEvent::CallFailed {
                reason: EndReason::ReceivedInviteExpired,
            });
            self.observer
                .handle_ended(EndReason::ReceivedInviteExpired);
            return;
        }

        if let Ok(mut pending) = self.pending.lock() {
            *pending = Some(invite.call_id);
        }
        self.ring_deadline = Some(Instant::now() + self.config.ring_timeout);
        self.observer.handle_event(SessionEvent::NewCall {
            call_id: invite.call_id,
            caller: invite.caller.clone(),
            caller_endpoint: invite.caller_endpoint.clone(),
            media_type: invite.media_type,
        });
        let ring = RingConfirm {
            call_id: invite.call_id,
        };
        let caller = invite.caller.clone();
        self.pending_invite = Some(invite);
        if let Err(e) = self.signaler.send_ring(&caller, ring) {
            error!("send_ring() failed: {}", e);
            self.conclude(EndReason::SignalingFailure);
        }
    }

    fn handle_ring(&mut self, ring: RingConfirm) {
        if self.call_id != Some(ring.call_id)
            || self.state != CallState::Dialing
            || self.direction != Some(CallDirection::OutGoing)
        {
            info!("handle_ring(): ignoring, state: {}", self.state);
            return;
        }
        info!("handle_ring(): call_id: {}", ring.call_id);
        self.state = CallState::Ringing;
        self.ring_deadline = Some(Instant::now() + self.config.ring_timeout);
        let field_id = match &self.field {
            Some(field) => field.field_id(),
            None => {
                error!("handle_ring(): no field");
                self.conclude(EndReason::InternalFailure);
                return;
            }
        };
        self.observer
            .handle_event(SessionEvent::Ringing { field_id });
    }

    fn handle_accept(&mut self, accept: Accept) {
        if self.call_id != Some(accept.call_id)
            || self.direction != Some(CallDirection::OutGoing)
            || !matches!(self.state, CallState::Dialing | CallState::Ringing)
        {
            info!("handle_accept(): ignoring, state: {}", self.state);
            return;
        }
        info!(
            "handle_accept(): call_id: {}, callee: {}",
            accept.call_id, accept.callee
        );
        self.remote = Some(accept.callee.clone());
        if let Err(e) = self.attach_remote(accept.callee, accept.callee_endpoint) {
            error!("attach_remote() failed: {}", e);
            self.conclude(EndReason::NegotiationFailure);
        }
    }

    fn handle_hangup(&mut self, hangup: Hangup) {
        if self.call_id == Some(hangup.call_id) && self.state != CallState::Idle {
            info!("handle_hangup(): call_id: {}", hangup.call_id);
            self.conclude(EndReason::RemoteHangup);
        } else if self
            .pending_invite
            .as_ref()
            .map(|invite| invite.call_id == hangup.call_id)
            .unwrap_or(false)
        {
            // The caller cancelled before we answered.
            info!("handle_hangup(): pending call_id: {}", hangup.call_id);
            self.conclude(EndReason::RemoteHangup);
        } else {
            info!("handle_hangup(): ignoring, call_id: {}", hangup.call_id);
        }
    }

    fn handle_busy(&mut self, busy: Busy) {
        if self.call_id != Some(busy.call_id)
            || self.direction != Some(CallDirection::OutGoing)
            || !matches!(self.state, CallState::Dialing | CallState::Ringing)
        {
            info!("handle_busy(): ignoring, call_id: {}", busy.call_id);
            return;
        }
        info!("handle_busy(): call_id: {}", busy.call_id);
        self.conclude(EndReason::RemoteBusy);
    }

    fn handle_arrival(&mut self, arrival: Arrival) {
        if self.call_id != Some(arrival.call_id) || self.field.is_none() {
            info!("handle_arrival(): ignoring, call_id: {}", arrival.call_id);
            return;
        }
        if arrival.contact == self.self_contact {
            return;
        }
        let already_present = self
            .field
            .as_ref()
            .map(|field| field.endpoint_for(&arrival.contact).is_some())
            .unwrap_or(false);
        if already_present {
            info!("handle_arrival(): {} already present", arrival.contact);
            return;
        }
        info!("handle_arrival(): {}", arrival.contact);
        if let Err(e) = self.attach_remote(arrival.contact.clone(), arrival.endpoint) {
            error!("attach_remote() failed: {}", e);
            if self.state == CallState::Connected {
                // One bad participant must not take down a live call.
                if let Some(field) = &mut self.field {
                    field.left(&arrival.contact);
                }
            } else {
                self.conclude(EndReason::NegotiationFailure);
            }
        }
    }

    fn handle_departure(&mut self, departure: Departure) {
        if self.call_id != Some(departure.call_id) {
            info!("handle_departure(): ignoring, call_id: {}", departure.call_id);
            return;
        }
        let endpoint = self
            .field
            .as_mut()
            .and_then(|field| field.left(&departure.contact));
        if let Some(endpoint) = endpoint {
            self.observer.handle_event(SessionEvent::Left { endpoint });
        }
    }

    // Transport callbacks.

    fn handle_media_connected(&mut self, remote: ContactId) {
        if self.state == CallState::Idle {
            info!("handle_media_connected(): ignoring, idle");
            return;
        }
        info!("handle_media_connected(): remote: {}", remote);
        let was_connected = self.state == CallState::Connected;
        let worker_config = self.worker_config();
        let forwarder = self.level_forwarder(remote.clone());
        let (field_id, endpoint) = {
            let field = match self.field.as_mut() {
                Some(field) => field,
                None => {
                    error!("handle_media_connected(): no field");
                    return;
                }
            };
            if !was_connected {
                if let Some(local) = field.endpoint_mut() {
                    local.mark_negotiated();
                }
            }
            if let Some(ep) = field.endpoint_for_mut(&remote) {
                ep.mark_negotiated();
            }
            if let Some(device) = field.device_mut(&remote) {
                device.start_metering(worker_config, forwarder);
            }
            (field.field_id(), field.endpoint_for(&remote).cloned())
        };
        if !was_connected {
            self.state = CallState::Connected;
            self.ring_deadline = None;
            self.answer_deadline = None;
            self.next_stats_time = Some(Instant::now() + self.config.stats_interval);
            self.observer.handle_event(SessionEvent::Connected {
                field_id,
                peer: remote.clone(),
            });
        }
        if let Some(endpoint) = endpoint {
            self.observer.handle_event(SessionEvent::Arrived { endpoint });
        }
    }

    fn handle_negotiation_failed(&mut self, remote: ContactId, reason: String) {
        if self.state == CallState::Idle {
            info!("handle_negotiation_failed(): ignoring, idle");
            return;
        }
        error!(
            "handle_negotiation_failed(): remote: {}, reason: {}",
            remote, reason
        );
        let multi_party = self
            .field
            .as_ref()
            .map(|field| field.endpoints().len() > 2)
            .unwrap_or(false);
        if multi_party && self.state == CallState::Connected {
            let endpoint = self
                .field
                .as_mut()
                .and_then(|field| field.left(&remote));
            if let Some(endpoint) = endpoint {
                self.observer.handle_event(SessionEvent::Left { endpoint });
            }
        } else {
            self.conclude(EndReason::NegotiationFailure);
        }
    }

    fn handle_level(&mut self, contact: ContactId, level: LevelSample) {
        if self.state != CallState::Connected {
            return;
        }
        if let Some(field) = &mut self.field {
            let sample = VolumeSample {
                contact,
                volume: level.volume,
                clipping: level.clipping,
            };
            field.set_volume(sample.clone());
            self.observer
                .handle_event(SessionEvent::MicrophoneVolume { sample });
        }
    }

    fn apply_connection_stats(&mut self, contact: ContactId, stats: ConnectionStats) {
        if let Some(field) = &mut self.field {
            if let Some(ep) = field.endpoint_for_mut(&contact) {
                ep.apply_stats(&stats);
            }
        }
    }

    // Toggles and sinks.

    fn set_outbound(&mut self, kind: MediaKind, enabled: bool) {
        info!("set_outbound(): {}: {}", kind, enabled);
        match &mut self.field {
            Some(field) => field.set_outbound_enabled(kind, enabled),
            None => info!("set_outbound(): no active field"),
        }
    }

    fn set_inbound(&mut self, kind: MediaKind, enabled: bool) {
        info!("set_inbound(): {}: {}", kind, enabled);
        match &mut self.field {
            Some(field) => field.set_inbound_enabled(kind, enabled),
            None => info!("set_inbound(): no active field"),
        }
    }

    fn bind_local_sink(&mut self, sink: Box<dyn MediaSink>) {
        match self.field.as_mut().and_then(Field::capture_mut) {
            Some(capture) => capture.set_preview_sink(sink),
            None => self.local_sink = Some(sink),
        }
    }

    fn bind_remote_sink(&mut self, sink: Box<dyn MediaSink>) {
        let device = self.field.as_mut().and_then(|field| {
            let primary = field.get_rtc_device().map(|d| d.remote().clone())?;
            field.device_mut(&primary)
        });
        match device {
            Some(device) => device.set_remote_sink(sink),
            None => self.remote_sink = Some(sink),
        }
    }

    // Timers.

    fn tick(&mut self) {
        let now = Instant::now();
        if let Some(deadline) = self.ring_deadline {
            if now >= deadline {
                info!("tick(): ring deadline elapsed");
                self.conclude(EndReason::Timeout);
            }
        }
        if let Some(deadline) = self.answer_deadline {
            if now >= deadline {
                info!("tick(): answer deadline elapsed");
                self.conclude(EndReason::Timeout);
            }
        }
        if self.state == CallState::Connected {
            if let Some(at) = self.next_stats_time {
                if now >= at {
                    self.refresh_stats();
                    self.next_stats_time = Some(now + self.config.stats_interval);
                }
            }
        }
        let interval = self.config.tick_interval;
        self.actor.send_delayed(interval, SessionState::tick);
    }

    fn refresh_stats(&mut self) {
        let Some(field) = &self.field else {
            return;
        };
        for (contact, device) in field.devices() {
            let actor = self.actor.clone();
            let contact = contact.clone();
            device.snapshoot_stats(Box::new(move |stats| {
                actor.send(move |state| state.apply_connection_stats(contact, stats));
            }));
        }
    }

    // Helpers.

    fn local_field_endpoint(&self, constraint: &MediaConstraint) -> FieldEndpoint {
        let mut local =
            FieldEndpoint::new(self.self_contact.clone(), self.self_endpoint.clone());
        local.enable_outbound_audio(None, constraint.wants_audio);
        local.enable_outbound_video(None, constraint.wants_video);
        local
    }

    fn open_capture_with_meter(
        &mut self,
        constraint: &MediaConstraint,
    ) -> Result<Box<dyn CaptureDevice>> {
        let mut capture = self.backend.open_capture(constraint)?;
        if let Some(sink) = self.local_sink.take() {
            capture.set_preview_sink(sink);
        }
        let worker = LevelWorker::start(
            self.worker_config(),
            self.level_forwarder(self.self_contact.clone()),
        );
        if let Ok(feed) = worker.feed() {
            capture.set_audio_sink(Box::new(move |block| feed.process(block)));
        }
        if let Some(mut old) = self.local_meter.replace(worker) {
            old.disconnect();
        }
        Ok(capture)
    }

    fn attach_remote(&mut self, contact: ContactId, endpoint: Endpoint) -> Result<()> {
        let constraint = match &self.constraint {
            Some(constraint) => constraint.clone(),
            None => {
                return Err(FieldRtcError::OptionValueNotSet(
                    "attach_remote()".to_string(),
                    "constraint".to_string(),
                )
                .into())
            }
        };
        let observer = Box::new(ActorConnectionObserver {
            actor: self.actor.clone(),
        });
        let connection = self.backend.create_peer_connection(&contact, observer)?;
        let mut device = RtcDevice::new(contact.clone(), connection);
        if let Some(sink) = self.remote_sink.take() {
            device.set_remote_sink(sink);
        }
        device.start_negotiation(&constraint)?;

        let mut ep = FieldEndpoint::new(contact, endpoint);
        ep.enable_outbound_audio(None, true);
        ep.enable_outbound_video(None, constraint.wants_video);

        let field = match self.field.as_mut() {
            Some(field) => field,
            None => {
                return Err(FieldRtcError::OptionValueNotSet(
                    "attach_remote()".to_string(),
                    "field".to_string(),
                )
                .into())
            }
        };
        field.arrived(ep);
        field.attach_device(device);
        Ok(())
    }

    fn worker_config(&self) -> LevelWorkerConfig {
        LevelWorkerConfig {
            meter: MeterConfig {
                clip_level: self.config.clip_level,
                smoothing_factor: self.config.smoothing_factor,
                clip_lag: self.config.clip_lag,
                sample_rate: self.config.sample_rate,
            },
            report_lag: self.config.level_report_lag,
        }
    }

    fn level_forwarder(&self, contact: ContactId) -> Box<dyn FnMut(LevelSample) + Send> {
        let actor = self.actor.clone();
        Box::new(move |level| {
            let contact = contact.clone();
            actor.send(move |state| state.handle_level(contact, level));
        })
    }

    /// The single teardown convergence point.  Cancels every timer,
    /// disposes the field, resets to Idle, and emits exactly one terminal
    /// event followed by the final `handle_ended`.  Idempotent.
    fn conclude(&mut self, reason: EndReason) {
        let had_pending = self.pending_invite.is_some();
        if self.state == CallState::Idle && !had_pending && self.field.is_none() {
            return;
        }
        info!("conclude(): reason: {}", reason);

        self.ring_deadline = None;
        self.answer_deadline = None;
        self.next_stats_time = None;
        self.pending_invite = None;
        if let Some(mut meter) = self.local_meter.take() {
            meter.disconnect();
        }
        let field_id = self.field.as_ref().map(Field::field_id);
        if let Some(mut field) = self.field.take() {
            field.dispose();
        }
        self.state = CallState::Idle;
        self.direction = None;
        self.call_id = None;
        self.remote = None;
        self.group = None;
        self.constraint = None;
        if let Ok(mut active) = self.active.lock() {
            *active = None;
        }
        if let Ok(mut pending) = self.pending.lock() {
            *pending = None;
        }

        let event = match reason {
            EndReason::LocalHangup | EndReason::RemoteHangup => SessionEvent::Bye { field_id },
            EndReason::RemoteBusy => SessionEvent::Busy,
            EndReason::Timeout => SessionEvent::Timeout,
            other => SessionEvent::CallFailed { reason: other },
        };
        self.observer.handle_event(event);
        self.observer.handle_ended(reason);
    }
}
