//! Runtime permissions and location-services status that gate START.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Mutex;

use crate::error::{lock_poisoned, TrackerResult};
use crate::observable::{Observable, Subscription};

/// Android 10, first version with a separate background location permission
pub const API_LEVEL_Q: u32 = 29;
/// Android 13, first version with a notification permission
pub const API_LEVEL_TIRAMISU: u32 = 33;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Capability {
    LocationForeground,
    LocationBackground,
    PostNotifications,
}

impl Capability {
    pub const ALL: [Capability; 3] = [
        Capability::LocationForeground,
        Capability::LocationBackground,
        Capability::PostNotifications,
    ];

    /// Platform permission string, or `None` where the platform version
    /// predates the permission.
    pub fn platform_permission(&self, api_level: u32) -> Option<&'static str> {
        match self {
            Capability::LocationForeground => Some("android.permission.ACCESS_FINE_LOCATION"),
            Capability::LocationBackground if api_level >= API_LEVEL_Q => {
                Some("android.permission.ACCESS_BACKGROUND_LOCATION")
            }
            Capability::PostNotifications if api_level >= API_LEVEL_TIRAMISU => {
                Some("android.permission.POST_NOTIFICATIONS")
            }
            _ => None,
        }
    }

    pub fn is_required(&self, api_level: u32) -> bool {
        self.platform_permission(api_level).is_some()
    }
}

/// Host-side permission checks. Capabilities the platform does not have
/// count as granted and are never requested.
pub trait PermissionHandler {
    fn api_level(&self) -> u32;

    fn has_permission(&self, permission: &str) -> bool;

    fn launch_request(&self, permission: &str);

    fn is_granted(&self, capability: Capability) -> bool {
        match capability.platform_permission(self.api_level()) {
            Some(permission) => self.has_permission(permission),
            None => true,
        }
    }

    fn request(&self, capability: Capability) {
        if let Some(permission) = capability.platform_permission(self.api_level()) {
            self.launch_request(permission);
        }
    }
}

/// What still has to be granted before tracking may start.
pub fn missing_capabilities<H: PermissionHandler + ?Sized>(handler: &H) -> Vec<Capability> {
    Capability::ALL
        .into_iter()
        .filter(|capability| !handler.is_granted(*capability))
        .collect()
}

/// Permission handler backed by an explicit grant set. Requests are recorded
/// and granted immediately when `auto_grant` is set.
#[derive(Debug)]
pub struct GrantSet {
    api_level: u32,
    auto_grant: bool,
    granted: Mutex<HashSet<String>>,
    requested: Mutex<Vec<String>>,
}

impl GrantSet {
    pub fn new(api_level: u32) -> Self {
        Self {
            api_level,
            auto_grant: false,
            granted: Mutex::new(HashSet::new()),
            requested: Mutex::new(Vec::new()),
        }
    }

    /// Everything the platform asks for is already granted (desktop, Termux).
    pub fn all_granted(api_level: u32) -> Self {
        let set = Self::new(api_level);
        for capability in Capability::ALL {
            set.grant(capability);
        }
        set
    }

    pub fn with_auto_grant(mut self) -> Self {
        self.auto_grant = true;
        self
    }

    pub fn grant(&self, capability: Capability) {
        if let (Some(permission), Ok(mut granted)) = (
            capability.platform_permission(self.api_level),
            self.granted.lock(),
        ) {
            granted.insert(permission.to_string());
        }
    }

    pub fn requested(&self) -> Vec<String> {
        self.requested.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

impl PermissionHandler for GrantSet {
    fn api_level(&self) -> u32 {
        self.api_level
    }

    fn has_permission(&self, permission: &str) -> bool {
        self.granted
            .lock()
            .map(|granted| granted.contains(permission))
            .unwrap_or(false)
    }

    fn launch_request(&self, permission: &str) {
        if let Ok(mut requested) = self.requested.lock() {
            requested.push(permission.to_string());
        }
        if self.auto_grant {
            if let Ok(mut granted) = self.granted.lock() {
                granted.insert(permission.to_string());
            }
        }
    }
}

/// Whether any location provider (GPS or network) is switched on.
pub struct LocationServices {
    enabled: Mutex<Observable<bool>>,
}

impl LocationServices {
    pub fn new(initially_enabled: bool) -> Self {
        Self {
            enabled: Mutex::new(Observable::new(initially_enabled)),
        }
    }

    /// Record the current provider switches; observers are only notified on change.
    pub fn update(&self, gps_enabled: bool, network_enabled: bool) -> TrackerResult<bool> {
        let enabled = gps_enabled || network_enabled;
        let mut observable = self
            .enabled
            .lock()
            .map_err(|_| lock_poisoned("location services"))?;
        observable.update_if(|current| {
            let changed = *current != enabled;
            *current = enabled;
            changed
        });
        Ok(enabled)
    }

    pub fn is_enabled(&self) -> TrackerResult<bool> {
        Ok(*self
            .enabled
            .lock()
            .map_err(|_| lock_poisoned("location services"))?
            .get())
    }

    pub fn subscribe(&self) -> TrackerResult<Subscription<bool>> {
        Ok(self
            .enabled
            .lock()
            .map_err(|_| lock_poisoned("location services"))?
            .subscribe())
    }
}

impl Default for LocationServices {
    fn default() -> Self {
        Self::new(false)
    }
}
