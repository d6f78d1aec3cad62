//
// Copyright 2024 FieldRTC Contributors
// SPDX-License-Identifier: AGPL-3.0-only
//

//! The call/conference context.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::common::{ContactId, FieldId, VolumeSample};
use crate::core::endpoint::FieldEndpoint;
use crate::core::rtc_device::RtcDevice;
use crate::media::{CaptureDevice, MediaKind};

/// Read-only copy of a field's observable state, for the embedding layer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FieldSnapshot {
    pub field_id: FieldId,
    pub owner_id: String,
    /// Arrival order; the local endpoint is first.
    pub endpoints: Vec<FieldEndpoint>,
    pub volumes: HashMap<ContactId, VolumeSample>,
}

/// Holds all participants of one active or pending call: the roster, one
/// RtcDevice per remote peer, the local capture, and the latest volume
/// sample per endpoint.
///
/// A field exists only while its session is Dialing, Ringing, or
/// Connected; `dispose` must run before a field for another call may be
/// created.
pub struct Field {
    field_id: FieldId,
    /// The contact or group id this call belongs to.
    owner_id: String,
    /// Arrival order, local endpoint first.  Membership is keyed by
    /// contact id and unique.
    roster: Vec<FieldEndpoint>,
    devices: HashMap<ContactId, RtcDevice>,
    /// The first remote a device was attached for; the 1:1 device.
    primary_remote: Option<ContactId>,
    capture: Option<Box<dyn CaptureDevice>>,
    volumes: HashMap<ContactId, VolumeSample>,
}

impl Field {
    pub fn new(field_id: FieldId, owner_id: String, local: FieldEndpoint) -> Self {
        info!("Field::new(): id: {}, owner: {}", field_id, owner_id);
        Self {
            field_id,
            owner_id,
            roster: vec![local],
            devices: HashMap::new(),
            primary_remote: None,
            capture: None,
            volumes: HashMap::new(),
        }
    }

    pub fn field_id(&self) -> FieldId {
        self.field_id
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    /// The local self-endpoint.
    pub fn endpoint(&self) -> Option<&FieldEndpoint> {
        self.roster.first()
    }

    pub fn endpoint_mut(&mut self) -> Option<&mut FieldEndpoint> {
        self.roster.first_mut()
    }

    /// Full participant roster in arrival order.
    pub fn endpoints(&self) -> &[FieldEndpoint] {
        &self.roster
    }

    pub fn endpoint_for(&self, contact: &ContactId) -> Option<&FieldEndpoint> {
        self.roster.iter().find(|ep| &ep.contact == contact)
    }

    pub fn endpoint_for_mut(&mut self, contact: &ContactId) -> Option<&mut FieldEndpoint> {
        self.roster.iter_mut().find(|ep| &ep.contact == contact)
    }

    /// Adds a participant.  Re-adding a contact that is already present
    /// is a no-op; returns whether the roster changed.
    pub fn arrived(&mut self, endpoint: FieldEndpoint) -> bool {
        if self.endpoint_for(&endpoint.contact).is_some() {
            info!("arrived(): {} already present", endpoint.contact);
            return false;
        }
        info!("arrived(): {}", endpoint.contact);
        self.roster.push(endpoint);
        true
    }

    /// Removes a participant, disposing their device.  Removing a
    /// non-member is a no-op.
    pub fn left(&mut self, contact: &ContactId) -> Option<FieldEndpoint> {
        let index = self.roster.iter().position(|ep| &ep.contact == contact)?;
        info!("left(): {}", contact);
        if let Some(mut device) = self.devices.remove(contact) {
            device.dispose();
        }
        if self.primary_remote.as_ref() == Some(contact) {
            self.primary_remote = None;
        }
        self.volumes.remove(contact);
        Some(self.roster.remove(index))
    }

    pub fn attach_device(&mut self, device: RtcDevice) {
        let contact = device.remote().clone();
        if self.primary_remote.is_none() {
            self.primary_remote = Some(contact.clone());
        }
        if let Some(mut old) = self.devices.insert(contact, device) {
            old.dispose();
        }
    }

    pub fn device(&self, contact: &ContactId) -> Option<&RtcDevice> {
        self.devices.get(contact)
    }

    pub fn device_mut(&mut self, contact: &ContactId) -> Option<&mut RtcDevice> {
        self.devices.get_mut(contact)
    }

    /// The device bound for the local endpoint's 1:1 peer, if any.
    /// `None` is the normal idle/pre-connection condition, not an error.
    pub fn get_rtc_device(&self) -> Option<&RtcDevice> {
        self.devices.get(self.primary_remote.as_ref()?)
    }

    pub fn devices(&self) -> impl Iterator<Item = (&ContactId, &RtcDevice)> {
        self.devices.iter()
    }

    pub fn set_capture(&mut self, capture: Box<dyn CaptureDevice>) {
        self.capture = Some(capture);
    }

    pub fn capture_mut(&mut self) -> Option<&mut Box<dyn CaptureDevice>> {
        self.capture.as_mut()
    }

    /// Applies an outbound toggle: capture, local record, every device.
    pub fn set_outbound_enabled(&mut self, kind: MediaKind, enabled: bool) {
        if let Some(capture) = &self.capture {
            capture.set_enabled(kind, enabled);
        }
        if let Some(local) = self.roster.first_mut() {
            match kind {
                MediaKind::Audio => local.enable_outbound_audio(None, enabled),
                MediaKind::Video => local.enable_outbound_video(None, enabled),
            }
        }
        for device in self.devices.values() {
            device.set_outgoing_enabled(kind, enabled);
        }
    }

    /// Applies an inbound toggle to every remote participant.
    pub fn set_inbound_enabled(&mut self, kind: MediaKind, enabled: bool) {
        let devices = &self.devices;
        for ep in self.roster.iter_mut().skip(1) {
            let device = devices.get(&ep.contact);
            match kind {
                MediaKind::Audio => ep.enable_inbound_audio(device, enabled),
                MediaKind::Video => ep.enable_inbound_video(device, enabled),
            }
        }
    }

    /// Stores the latest volume sample for one endpoint, replacing any
    /// earlier one.
    pub fn set_volume(&mut self, sample: VolumeSample) {
        self.volumes.insert(sample.contact.clone(), sample);
    }

    pub fn volume(&self, contact: &ContactId) -> Option<&VolumeSample> {
        self.volumes.get(contact)
    }

    pub fn snapshot(&self) -> FieldSnapshot {
        FieldSnapshot {
            field_id: self.field_id,
            owner_id: self.owner_id.clone(),
            endpoints: self.roster.clone(),
            volumes: self.volumes.clone(),
        }
    }

    /// Releases every device and the capture, then clears the roster.
    /// Device release happens first so no callback can observe a device
    /// on an emptied field.
    pub fn dispose(&mut self) {
        info!("Field::dispose(): id: {}", self.field_id);
        for (_, mut device) in self.devices.drain() {
            device.dispose();
        }
        self.primary_remote = None;
        if let Some(mut capture) = self.capture.take() {
            capture.close();
        }
        self.roster.clear();
        self.volumes.clear();
    }
}
