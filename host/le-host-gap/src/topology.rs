//! Link layer topology
//!
//! A controller reports which link layer states, and which combinations of two states, it can be
//! in at the same time through the *LE Supported States* bitmap. The [`TopologyTracker`] keeps a
//! mask of the states the controller is currently in and uses that bitmap to refuse entering a
//! state that cannot be combined with the current ones.

use core::ops::{BitOr, BitOrAssign};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A link layer state
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TopologyState {
    ConnectableAdvertising,
    Initiating,
    Master,
    Slave,
    LowDutyDirectedAdvertising,
    HighDutyDirectedAdvertising,
    NonConnectableAdvertising,
    PassiveScan,
    ActiveScan,
    ScannableAdvertising,
}

impl TopologyState {
    pub const ALL: [TopologyState; 10] = [
        TopologyState::ConnectableAdvertising,
        TopologyState::Initiating,
        TopologyState::Master,
        TopologyState::Slave,
        TopologyState::LowDutyDirectedAdvertising,
        TopologyState::HighDutyDirectedAdvertising,
        TopologyState::NonConnectableAdvertising,
        TopologyState::PassiveScan,
        TopologyState::ActiveScan,
        TopologyState::ScannableAdvertising,
    ];

    const fn position(self) -> u16 {
        match self {
            TopologyState::ConnectableAdvertising => 0,
            TopologyState::Initiating => 1,
            TopologyState::Master => 2,
            TopologyState::Slave => 3,
            TopologyState::LowDutyDirectedAdvertising => 4,
            TopologyState::HighDutyDirectedAdvertising => 5,
            TopologyState::NonConnectableAdvertising => 6,
            TopologyState::PassiveScan => 7,
            TopologyState::ActiveScan => 8,
            TopologyState::ScannableAdvertising => 9,
        }
    }

    fn from_position(position: u32) -> Option<Self> {
        Self::ALL.get(position as usize).copied()
    }

    pub const fn mask(self) -> TopologyMask {
        TopologyMask(1 << self.position())
    }

    /// The bit within the LE supported states for being in only this state
    ///
    /// The master role has no bit of its own, entering the master role requires the initiating
    /// state.
    const fn single_state_bit(self) -> u8 {
        match self {
            TopologyState::NonConnectableAdvertising => 0,
            TopologyState::ScannableAdvertising => 1,
            TopologyState::ConnectableAdvertising => 2,
            TopologyState::HighDutyDirectedAdvertising => 3,
            TopologyState::PassiveScan => 4,
            TopologyState::ActiveScan => 5,
            TopologyState::Initiating | TopologyState::Master => 6,
            TopologyState::Slave => 7,
            TopologyState::LowDutyDirectedAdvertising => 29,
        }
    }
}

/// Get the LE supported states bit for being in two states at once
///
/// `None` is returned for combinations the controller does not report on. These are two
/// advertising states, two scanning states, or the same state twice.
fn combination_bit(a: TopologyState, b: TopologyState) -> Option<u8> {
    use TopologyState::*;

    let (first, second) = if a <= b { (a, b) } else { (b, a) };

    let bit = match (first, second) {
        (ConnectableAdvertising, Initiating) => 32,
        (ConnectableAdvertising, Master) => 35,
        (ConnectableAdvertising, Slave) => 38,
        (ConnectableAdvertising, PassiveScan) => 10,
        (ConnectableAdvertising, ActiveScan) => 14,
        (Initiating, Master) => 28,
        (Initiating, Slave) => 41,
        (Initiating, LowDutyDirectedAdvertising) => 34,
        (Initiating, HighDutyDirectedAdvertising) => 33,
        (Initiating, NonConnectableAdvertising) => 16,
        (Initiating, PassiveScan) => 22,
        (Initiating, ActiveScan) => 23,
        (Initiating, ScannableAdvertising) => 17,
        (Master, Slave) => 41,
        (Master, LowDutyDirectedAdvertising) => 37,
        (Master, HighDutyDirectedAdvertising) => 36,
        (Master, NonConnectableAdvertising) => 18,
        (Master, PassiveScan) => 24,
        (Master, ActiveScan) => 25,
        (Master, ScannableAdvertising) => 19,
        (Slave, LowDutyDirectedAdvertising) => 40,
        (Slave, HighDutyDirectedAdvertising) => 39,
        (Slave, NonConnectableAdvertising) => 20,
        (Slave, PassiveScan) => 26,
        (Slave, ActiveScan) => 27,
        (Slave, ScannableAdvertising) => 21,
        (LowDutyDirectedAdvertising, PassiveScan) => 30,
        (LowDutyDirectedAdvertising, ActiveScan) => 31,
        (HighDutyDirectedAdvertising, PassiveScan) => 11,
        (HighDutyDirectedAdvertising, ActiveScan) => 15,
        (NonConnectableAdvertising, PassiveScan) => 8,
        (NonConnectableAdvertising, ActiveScan) => 12,
        (PassiveScan, ScannableAdvertising) => 9,
        (ActiveScan, ScannableAdvertising) => 13,
        _ => return None,
    };

    Some(bit)
}

/// A set of link layer states
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct TopologyMask(u16);

impl TopologyMask {
    /// Every advertising state
    pub const ADVERTISING: Self = TopologyMask(
        TopologyState::ConnectableAdvertising.mask().0
            | TopologyState::LowDutyDirectedAdvertising.mask().0
            | TopologyState::HighDutyDirectedAdvertising.mask().0
            | TopologyState::NonConnectableAdvertising.mask().0
            | TopologyState::ScannableAdvertising.mask().0,
    );

    /// Both scanning states
    pub const SCANNING: Self =
        TopologyMask(TopologyState::PassiveScan.mask().0 | TopologyState::ActiveScan.mask().0);

    /// Both connection roles
    pub const CONNECTION: Self = TopologyMask(TopologyState::Master.mask().0 | TopologyState::Slave.mask().0);

    pub const fn empty() -> Self {
        TopologyMask(0)
    }

    pub const fn from_bits(bits: u16) -> Self {
        TopologyMask(bits)
    }

    pub const fn bits(&self) -> u16 {
        self.0
    }

    pub const fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub const fn contains(&self, state: TopologyState) -> bool {
        self.0 & state.mask().0 != 0
    }

    pub const fn intersects(&self, other: TopologyMask) -> bool {
        self.0 & other.0 != 0
    }

    /// Iterate over the states within this mask
    pub fn iter(&self) -> impl Iterator<Item = TopologyState> + '_ {
        TopologyState::ALL.into_iter().filter(|state| self.contains(*state))
    }

    /// Get the single state of this mask
    ///
    /// `None` is returned if this mask is empty, has more than one bit set, or has a bit set that
    /// is not a state.
    pub fn single_state(&self) -> Option<TopologyState> {
        if self.0.count_ones() == 1 {
            TopologyState::from_position(self.0.trailing_zeros())
        } else {
            None
        }
    }
}

impl From<TopologyState> for TopologyMask {
    fn from(state: TopologyState) -> Self {
        state.mask()
    }
}

impl BitOr for TopologyMask {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        TopologyMask(self.0 | rhs.0)
    }
}

impl BitOrAssign for TopologyMask {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0
    }
}

/// The LE supported states reported by the controller
///
/// This is the 64 bit bitmap returned by the *LE Read Supported States* command in little endian
/// octet order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LeSupportedStates(pub [u8; 8]);

impl LeSupportedStates {
    /// Every state and combination defined by the Bluetooth Core Specification
    pub const ALL: Self = LeSupportedStates([0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x03, 0, 0]);

    pub fn is_supported(&self, bit: u8) -> bool {
        let offset = (bit / 8) as usize;

        let mask = 1 << (bit % 8);

        self.0.get(offset).map_or(false, |octet| octet & mask != 0)
    }

    /// Set a bit
    pub fn set(&mut self, bit: u8, supported: bool) {
        if let Some(octet) = self.0.get_mut((bit / 8) as usize) {
            if supported {
                *octet |= 1 << (bit % 8)
            } else {
                *octet &= !(1 << (bit % 8))
            }
        }
    }
}

impl Default for LeSupportedStates {
    fn default() -> Self {
        Self::ALL
    }
}

/// Tracker of the current link layer states
#[derive(Debug, Clone)]
pub struct TopologyTracker {
    supported: LeSupportedStates,
    current: TopologyMask,
}

impl TopologyTracker {
    pub fn new(supported: LeSupportedStates) -> Self {
        TopologyTracker {
            supported,
            current: TopologyMask::empty(),
        }
    }

    /// Get the current states
    pub fn current(&self) -> TopologyMask {
        self.current
    }

    /// Add a state
    ///
    /// This does not validate the state, use [`check_state`] before entering a state.
    ///
    /// [`check_state`]: TopologyTracker::check_state
    pub fn set_state(&mut self, state: TopologyState) -> bool {
        self.current |= state.mask();

        true
    }

    /// Remove states
    pub fn clear_state(&mut self, mask: TopologyMask) {
        self.current.0 &= !mask.0;
    }

    /// Check if a state can be entered
    ///
    /// `requested` must be exactly one state. The controller must support being in that state on
    /// its own and in combination with every state currently set.
    pub fn check_state(&self, requested: TopologyMask) -> bool {
        let state = match requested.single_state() {
            Some(state) => state,
            None => {
                log::debug!("(GAP) invalid topology request {:#x}", requested.bits());
                return false;
            }
        };

        if !self.supported.is_supported(state.single_state_bit()) {
            log::debug!("(GAP) state {:?} is not supported by the controller", state);
            return false;
        }

        for current in self.current.iter() {
            if let Some(bit) = combination_bit(state, current) {
                if !self.supported.is_supported(bit) {
                    log::debug!(
                        "(GAP) state {:?} cannot be combined with current state {:?}",
                        state,
                        current
                    );
                    return false;
                }
            }
        }

        true
    }
}
