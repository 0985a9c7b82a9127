//! Application-service dispatch.
//!
//! Unwraps the NPDU, decodes the APDU, and maps the closed service set onto
//! the point table, live snapshot, and override store. Replies come back as
//! encoded NPDU bytes for the session to wrap; `None` means no reply, which
//! is only ever the outcome for unconfirmed or unparseable traffic —
//! confirmed services always get an ACK, Error, or Reject.

use log::{debug, info, warn};

use crate::overrides::{OverrideStore, StoreError, MAX_PRIORITY, MIN_PRIORITY};
use crate::points::{LiveTable, PointTable};
use crate::wire::apdu::{
    Apdu, ConfirmedService, ObjectId, ObjectType, PropertyId, PropertyValue, UnconfirmedService,
    ERROR_CLASS_OBJECT, ERROR_CLASS_PROPERTY, ERROR_CODE_INVALID_DATA_TYPE,
    ERROR_CODE_UNKNOWN_OBJECT, ERROR_CODE_UNKNOWN_PROPERTY, ERROR_CODE_VALUE_OUT_OF_RANGE,
    ERROR_CODE_WRITE_ACCESS_DENIED, REJECT_INVALID_TAG, REJECT_UNRECOGNIZED_SERVICE,
    SERVICE_READ_PROPERTY,
};
use crate::wire::{CodecError, Cursor, Npdu};

use super::HubIdentity;

/// Everything a service needs to answer one request.
pub(crate) struct ServiceContext<'a> {
    pub identity: &'a HubIdentity,
    pub points: &'a PointTable,
    pub live: &'a LiveTable,
    pub store: &'a OverrideStore,
    /// Override source label for writes arriving on this session.
    pub source: &'a str,
}

impl ServiceContext<'_> {
    /// Handle one inbound NPDU; returns the encoded reply NPDU, if any.
    pub fn handle_npdu(&self, raw: &[u8]) -> Option<Vec<u8>> {
        let npdu = match Npdu::decode(raw) {
            Ok(npdu) => npdu,
            Err(e) => {
                debug!("dropped bad NPDU from {}: {}", self.source, e);
                return None;
            }
        };

        let reply = match Apdu::decode(&npdu.apdu) {
            Ok(apdu) => self.dispatch(apdu)?,
            // Confirmed services contractually require some reply, so an
            // unrecognized choice gets a Reject instead of silence.
            Err(CodecError::UnknownServiceChoice(choice)) => {
                match confirmed_invoke_id(&npdu.apdu) {
                    Some(invoke_id) => {
                        warn!(
                            "rejecting unrecognized confirmed service 0x{:02X} from {}",
                            choice, self.source
                        );
                        Apdu::Reject {
                            invoke_id,
                            reason: REJECT_UNRECOGNIZED_SERVICE,
                        }
                    }
                    None => {
                        debug!(
                            "ignored unknown unconfirmed service 0x{:02X} from {}",
                            choice, self.source
                        );
                        return None;
                    }
                }
            }
            // A recognized confirmed service with garbled parameters still
            // owes the client a reply.
            Err(e) => match confirmed_invoke_id(&npdu.apdu) {
                Some(invoke_id) => {
                    warn!(
                        "rejecting malformed confirmed request from {}: {}",
                        self.source, e
                    );
                    Apdu::Reject {
                        invoke_id,
                        reason: REJECT_INVALID_TAG,
                    }
                }
                None => {
                    debug!("dropped bad APDU from {}: {}", self.source, e);
                    return None;
                }
            },
        };

        Some(Npdu::local(reply.encode()).encode().to_vec())
    }

    fn dispatch(&self, apdu: Apdu) -> Option<Apdu> {
        match apdu {
            Apdu::UnconfirmedRequest(UnconfirmedService::WhoIs { range }) => self.who_is(range),
            Apdu::UnconfirmedRequest(UnconfirmedService::IAm { device, .. }) => {
                debug!("peer {} announced device {}", self.source, device.instance);
                None
            }
            Apdu::ConfirmedRequest { invoke_id, service } => match service {
                ConfirmedService::ReadProperty { object, property } => {
                    Some(self.read_property(invoke_id, object, property))
                }
                ConfirmedService::WriteProperty {
                    object,
                    property,
                    value,
                    priority,
                } => Some(self.write_property(invoke_id, object, property, value, priority)),
            },
            // ACKs and errors addressed to us carry nothing to act on.
            other => {
                debug!("ignored inbound {:?} from {}", pdu_kind(&other), self.source);
                None
            }
        }
    }

    fn who_is(&self, range: Option<(u32, u32)>) -> Option<Apdu> {
        if let Some((low, high)) = range {
            if !(low..=high).contains(&self.identity.device_id) {
                return None;
            }
        }
        info!("Who-Is from {}: answering I-Am", self.source);
        Some(Apdu::UnconfirmedRequest(UnconfirmedService::IAm {
            device: ObjectId::new(ObjectType::Device, self.identity.device_id),
            max_apdu: u32::from(self.identity.max_apdu),
            segmentation: 3,
            vendor_id: u32::from(self.identity.vendor_id),
        }))
    }

    fn read_property(&self, invoke_id: u8, object: ObjectId, property: PropertyId) -> Apdu {
        let ack = |value| Apdu::ComplexAck {
            invoke_id,
            service_choice: SERVICE_READ_PROPERTY,
            object,
            property,
            value,
        };

        match property {
            PropertyId::ObjectName => {
                let name = if object.object_type == ObjectType::Device {
                    Some(self.identity.device_name.clone())
                } else {
                    self.points.name_of(object.instance).map(str::to_string)
                };
                match name {
                    Some(name) => ack(PropertyValue::CharacterString(name)),
                    None => error(invoke_id, SERVICE_READ_PROPERTY, ERROR_CLASS_OBJECT, ERROR_CODE_UNKNOWN_OBJECT),
                }
            }
            PropertyId::PresentValue => {
                if object.object_type == ObjectType::Device {
                    return error(
                        invoke_id,
                        SERVICE_READ_PROPERTY,
                        ERROR_CLASS_PROPERTY,
                        ERROR_CODE_UNKNOWN_PROPERTY,
                    );
                }
                match self.points.resolve_path(object.instance) {
                    // Reads answer from the tick's published snapshot; a
                    // pending override is invisible until the next tick.
                    Some(path) => {
                        let value = self.live.read_live(path).unwrap_or(0.0);
                        ack(PropertyValue::Real(value as f32))
                    }
                    None => error(invoke_id, SERVICE_READ_PROPERTY, ERROR_CLASS_OBJECT, ERROR_CODE_UNKNOWN_OBJECT),
                }
            }
            PropertyId::Other(id) => {
                debug!("read of unsupported property {} from {}", id, self.source);
                error(
                    invoke_id,
                    SERVICE_READ_PROPERTY,
                    ERROR_CLASS_PROPERTY,
                    ERROR_CODE_UNKNOWN_PROPERTY,
                )
            }
        }
    }

    fn write_property(
        &self,
        invoke_id: u8,
        object: ObjectId,
        property: PropertyId,
        value: PropertyValue,
        priority: Option<u8>,
    ) -> Apdu {
        use crate::wire::apdu::SERVICE_WRITE_PROPERTY;

        if property != PropertyId::PresentValue {
            return error(
                invoke_id,
                SERVICE_WRITE_PROPERTY,
                ERROR_CLASS_PROPERTY,
                ERROR_CODE_WRITE_ACCESS_DENIED,
            );
        }

        let path = match self.points.resolve_path(object.instance) {
            Some(path) => path,
            None => {
                return error(
                    invoke_id,
                    SERVICE_WRITE_PROPERTY,
                    ERROR_CLASS_OBJECT,
                    ERROR_CODE_UNKNOWN_OBJECT,
                )
            }
        };

        // An absent priority commands the weakest slot.
        let priority = priority.unwrap_or(MAX_PRIORITY);

        match value {
            PropertyValue::Real(v) => {
                match self
                    .store
                    .set_override(path, f64::from(v), priority, None, self.source)
                {
                    Ok(()) => {
                        info!(
                            "write from {}: {} = {} @ priority {}",
                            self.source, path, v, priority
                        );
                        simple_ack(invoke_id)
                    }
                    Err(StoreError::InvalidPriority(p)) => {
                        warn!("write from {} rejected: priority {} out of range", self.source, p);
                        error(
                            invoke_id,
                            SERVICE_WRITE_PROPERTY,
                            ERROR_CLASS_PROPERTY,
                            ERROR_CODE_VALUE_OUT_OF_RANGE,
                        )
                    }
                }
            }
            // Writing Null relinquishes the priority slot.
            PropertyValue::Null => {
                if !(MIN_PRIORITY..=MAX_PRIORITY).contains(&priority) {
                    return error(
                        invoke_id,
                        SERVICE_WRITE_PROPERTY,
                        ERROR_CLASS_PROPERTY,
                        ERROR_CODE_VALUE_OUT_OF_RANGE,
                    );
                }
                let released = self.store.release_override(path, Some(priority));
                info!(
                    "relinquish from {}: {} priority {} (released: {})",
                    self.source, path, priority, released
                );
                simple_ack(invoke_id)
            }
            PropertyValue::CharacterString(_) => error(
                invoke_id,
                SERVICE_WRITE_PROPERTY,
                ERROR_CLASS_PROPERTY,
                ERROR_CODE_INVALID_DATA_TYPE,
            ),
        }
    }
}

fn simple_ack(invoke_id: u8) -> Apdu {
    Apdu::SimpleAck {
        invoke_id,
        service_choice: crate::wire::apdu::SERVICE_WRITE_PROPERTY,
    }
}

fn error(invoke_id: u8, service_choice: u8, class: u8, code: u8) -> Apdu {
    Apdu::Error {
        invoke_id,
        service_choice,
        class,
        code,
    }
}

/// Invoke id of a confirmed request, when the APDU is one and long enough.
fn confirmed_invoke_id(apdu: &[u8]) -> Option<u8> {
    let mut cur = Cursor::new(apdu);
    let first = cur.u8().ok()?;
    if first >> 4 != 0 {
        return None;
    }
    let _max_segments_apdu = cur.u8().ok()?;
    cur.u8().ok()
}

fn pdu_kind(apdu: &Apdu) -> &'static str {
    match apdu {
        Apdu::ConfirmedRequest { .. } => "confirmed request",
        Apdu::UnconfirmedRequest(_) => "unconfirmed request",
        Apdu::SimpleAck { .. } => "simple ack",
        Apdu::ComplexAck { .. } => "complex ack",
        Apdu::Error { .. } => "error",
        Apdu::Reject { .. } => "reject",
    }
}
