//! GAP configuration
//!
//! The capabilities of the controller are read once when the host starts and placed into a
//! [`GapConfig`]. Every decision of the [`GapController`](crate::controller::GapController) that
//! depends on what the controller supports is made from this.

use crate::hci::OwnAddressType;
use crate::topology::LeSupportedStates;
use alloc::string::String;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// The LE privacy mode of the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum PrivacyMode {
    #[default]
    Disabled,
    /// Host based privacy
    V1_1,
    /// Controller based privacy with the resolving list
    V1_2,
    /// Controller based privacy while some peers only support host based privacy
    Mixed,
}

impl PrivacyMode {
    pub fn is_enabled(&self) -> bool {
        *self != PrivacyMode::Disabled
    }

    /// Check if the resolving list of the controller is used
    pub fn uses_resolving_list(&self) -> bool {
        matches!(self, PrivacyMode::V1_2 | PrivacyMode::Mixed)
    }
}

/// Configuration of the GAP controller
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct GapConfig {
    /// The controller supports LE
    pub supports_ble: bool,
    /// The LE supported states of the controller
    pub le_supported_states: LeSupportedStates,
    /// The controller supports simultaneous LE and BR/EDR to the same device
    pub simultaneous_le_bredr: bool,
    pub privacy: PrivacyMode,
    /// The own address type used when privacy is disabled
    pub own_address_type: OwnAddressType,
    /// The name placed within advertising data
    pub device_name: String,
}

impl Default for GapConfig {
    fn default() -> Self {
        GapConfig {
            supports_ble: true,
            le_supported_states: LeSupportedStates::ALL,
            simultaneous_le_bredr: false,
            privacy: PrivacyMode::Disabled,
            own_address_type: OwnAddressType::PublicDeviceAddress,
            device_name: String::new(),
        }
    }
}
