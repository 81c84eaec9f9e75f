//! A Bluetooth Low Energy host core
//!
//! This is the Generic Access Profile and the Security Manager of a BLE host. Both are event
//! driven cores that do not talk to a Bluetooth controller on their own. The user passes events
//! from the controller into them and forwards the commands, PDUs, and requests they produce.
//!
//! Everything here is available without the standard library, only
//! [`alloc`](https://doc.rust-lang.org/alloc/) is required.

#![cfg_attr(not(feature = "std"), no_std)]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

pub use le_host_core::*;

#[cfg(feature = "gap")]
pub use le_host_gap as gap;

#[cfg(feature = "sm")]
pub use le_host_sm as sm;
