//! Characteristic registry
//! Maps the fixed characteristic UUIDs to their roles and tracks which roles
//! have been resolved for the current connection.

use std::collections::BTreeMap;

use uuid::Uuid;

use crate::core::bluetooth::constants::{
    UUID_CONTROL_CHAR, UUID_MENU_CHAR, UUID_PREVIEW_INFO_CHAR, UUID_SERVICE_METRICS_CHAR,
    UUID_SERVICE_STATUS_CHAR, UUID_STATUS_CHAR,
};
use crate::core::bluetooth::types::{
    CharacteristicHandle, CharacteristicRole, PlatformHandle, SubscriptionState,
};

const ROLE_TABLE: [(Uuid, CharacteristicRole); 6] = [
    (UUID_CONTROL_CHAR, CharacteristicRole::Control),
    (UUID_STATUS_CHAR, CharacteristicRole::Status),
    (UUID_PREVIEW_INFO_CHAR, CharacteristicRole::PreviewInfo),
    (UUID_MENU_CHAR, CharacteristicRole::Menu),
    (UUID_SERVICE_STATUS_CHAR, CharacteristicRole::ServiceStatus),
    (UUID_SERVICE_METRICS_CHAR, CharacteristicRole::ServiceMetrics),
];

/// Returns the role for a known characteristic UUID.
pub fn role_for_uuid(uuid: Uuid) -> Option<CharacteristicRole> {
    ROLE_TABLE
        .iter()
        .find(|(known, _)| *known == uuid)
        .map(|(_, role)| *role)
}

/// Returns the fixed UUID for a role.
pub fn uuid_for_role(role: CharacteristicRole) -> Uuid {
    ROLE_TABLE
        .iter()
        .find(|(_, known)| *known == role)
        .map(|(uuid, _)| *uuid)
        .unwrap_or_default()
}

/// Whether a role delivers data through notifications.
pub fn subscription_required(role: CharacteristicRole) -> bool {
    matches!(
        role,
        CharacteristicRole::Status
            | CharacteristicRole::PreviewInfo
            | CharacteristicRole::ServiceStatus
            | CharacteristicRole::ServiceMetrics
    )
}

/// Whether a role is read once right after discovery.
pub fn read_on_connect(role: CharacteristicRole) -> bool {
    role == CharacteristicRole::Menu
}

#[derive(Debug, Default)]
pub struct CharacteristicRegistry {
    handles: BTreeMap<CharacteristicRole, CharacteristicHandle>,
}

impl CharacteristicRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a discovered characteristic for `role`.
    ///
    /// Resolving a role again with the same platform handle is a no-op.
    ///
    /// # Panics
    /// Panics if the role is already bound to a different platform handle
    /// without an intervening [`clear`](Self::clear); that can only happen if
    /// two connections share one registry.
    pub fn resolve(&mut self, role: CharacteristicRole, handle: PlatformHandle) -> CharacteristicHandle {
        if let Some(existing) = self.handles.get(&role) {
            assert_eq!(
                existing.handle, handle,
                "characteristic role {} resolved to two different handles",
                role
            );
            return *existing;
        }

        let resolved = CharacteristicHandle {
            role,
            uuid: uuid_for_role(role),
            handle,
            subscription: SubscriptionState::None,
        };
        self.handles.insert(role, resolved);
        resolved
    }

    pub fn lookup(&self, role: CharacteristicRole) -> Option<CharacteristicHandle> {
        self.handles.get(&role).copied()
    }

    pub fn set_subscription(&mut self, role: CharacteristicRole, state: SubscriptionState) {
        if let Some(handle) = self.handles.get_mut(&role) {
            handle.subscription = state;
        }
    }

    /// Roles that still have a subscription request in flight.
    pub fn pending_subscriptions(&self) -> impl Iterator<Item = CharacteristicRole> + '_ {
        self.handles
            .values()
            .filter(|h| h.subscription == SubscriptionState::Subscribing)
            .map(|h| h.role)
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn resolved(&self) -> impl Iterator<Item = &CharacteristicHandle> {
        self.handles.values()
    }

    pub fn clear(&mut self) {
        self.handles.clear();
    }
}
