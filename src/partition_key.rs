//! Partition-key derivation from the request envelope.
//!
//! Every attributes row is keyed on a string derived from the inbound
//! envelope. Three derivations cover the platform's identity fields; hosts
//! with other needs can supply their own [`PartitionKeyGenerator`].

use crate::envelope::RequestEnvelope;
use crate::error::{PersistenceError, PersistenceResult};

/// Derives the partition key for an attributes row from a request envelope.
pub type PartitionKeyGenerator = fn(&RequestEnvelope) -> PersistenceResult<String>;

/// Derive the partition key from the user id.
pub fn user_id(envelope: &RequestEnvelope) -> PersistenceResult<String> {
    envelope
        .context
        .as_ref()
        .and_then(|context| context.system.as_ref())
        .and_then(|system| system.user.as_ref())
        .and_then(|user| user.user_id.clone())
        .ok_or(PersistenceError::PartitionKey { field: "user id" })
}

/// Derive the partition key from the device id.
pub fn device_id(envelope: &RequestEnvelope) -> PersistenceResult<String> {
    envelope
        .context
        .as_ref()
        .and_then(|context| context.system.as_ref())
        .and_then(|system| system.device.as_ref())
        .and_then(|device| device.device_id.clone())
        .ok_or(PersistenceError::PartitionKey { field: "device id" })
}

/// Derive the partition key from the person id, falling back to the user id
/// when the request carries no recognized speaker.
pub fn person_id(envelope: &RequestEnvelope) -> PersistenceResult<String> {
    let person = envelope
        .context
        .as_ref()
        .and_then(|context| context.system.as_ref())
        .and_then(|system| system.person.as_ref())
        .and_then(|person| person.person_id.clone());

    match person {
        Some(id) => Ok(id),
        None => user_id(envelope),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{Context, Device, Person, SystemContext, User};

    fn envelope(
        user: Option<&str>,
        device: Option<&str>,
        person: Option<&str>,
    ) -> RequestEnvelope {
        RequestEnvelope {
            version: "1.0".to_string(),
            context: Some(Context {
                system: Some(SystemContext {
                    user: user.map(|id| User {
                        user_id: Some(id.to_string()),
                    }),
                    device: device.map(|id| Device {
                        device_id: Some(id.to_string()),
                    }),
                    person: person.map(|id| Person {
                        person_id: Some(id.to_string()),
                    }),
                    ..Default::default()
                }),
            }),
            ..Default::default()
        }
    }

    #[test]
    fn user_id_from_envelope() {
        let envelope = envelope(Some("user-1"), None, None);
        assert_eq!(user_id(&envelope).unwrap(), "user-1");
    }

    #[test]
    fn user_id_missing() {
        let envelope = envelope(None, Some("device-1"), None);
        let err = user_id(&envelope).unwrap_err();
        assert_eq!(
            err.to_string(),
            "cannot retrieve user id from request envelope"
        );
    }

    #[test]
    fn user_id_missing_context() {
        let err = user_id(&RequestEnvelope::default()).unwrap_err();
        assert!(matches!(err, PersistenceError::PartitionKey { .. }));
    }

    #[test]
    fn device_id_from_envelope() {
        let envelope = envelope(None, Some("device-1"), None);
        assert_eq!(device_id(&envelope).unwrap(), "device-1");
    }

    #[test]
    fn device_id_missing() {
        let envelope = envelope(Some("user-1"), None, None);
        assert!(device_id(&envelope).is_err());
    }

    #[test]
    fn person_id_from_envelope() {
        let envelope = envelope(Some("user-1"), None, Some("person-1"));
        assert_eq!(person_id(&envelope).unwrap(), "person-1");
    }

    #[test]
    fn person_id_falls_back_to_user_id() {
        let envelope = envelope(Some("user-1"), None, None);
        assert_eq!(person_id(&envelope).unwrap(), "user-1");
    }

    #[test]
    fn person_id_without_person_or_user() {
        let envelope = envelope(None, Some("device-1"), None);
        let err = person_id(&envelope).unwrap_err();
        assert_eq!(
            err.to_string(),
            "cannot retrieve user id from request envelope"
        );
    }
}
