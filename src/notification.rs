//! Notification endpoint messages.
//!
//! The wallet tells the issuer what became of an issued credential. Errors here are
//! surfaced to the caller but have no bearing on the issuance itself.

use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;

use crate::types::NotificationId;

/// What happened to the credential, carrying the `notification_id` the issuer assigned
/// to the issuance.
#[derive(Clone, Debug, PartialEq)]
pub enum NotificationEvent {
    CredentialAccepted {
        notification_id: NotificationId,
    },
    CredentialFailure {
        notification_id: NotificationId,
        description: Option<String>,
    },
    CredentialDeleted {
        notification_id: NotificationId,
    },
}

impl From<NotificationEvent> for NotificationRequest {
    fn from(event: NotificationEvent) -> Self {
        match event {
            NotificationEvent::CredentialAccepted { notification_id } => Self {
                notification_id,
                event: NotificationRequestEvent::CredentialAccepted,
                event_description: None,
            },
            NotificationEvent::CredentialFailure {
                notification_id,
                description,
            } => Self {
                notification_id,
                event: NotificationRequestEvent::CredentialFailure,
                event_description: description,
            },
            NotificationEvent::CredentialDeleted { notification_id } => Self {
                notification_id,
                event: NotificationRequestEvent::CredentialDeleted,
                event_description: None,
            },
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub enum NotificationRequestEvent {
    #[serde(rename = "credential_accepted")]
    CredentialAccepted,
    #[serde(rename = "credential_failure")]
    CredentialFailure,
    #[serde(rename = "credential_deleted")]
    CredentialDeleted,
}

#[skip_serializing_none]
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct NotificationRequest {
    pub notification_id: NotificationId,
    pub event: NotificationRequestEvent,
    pub event_description: Option<String>,
}
