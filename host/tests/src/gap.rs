//! A recording GAP environment

use core::time::Duration;
use le_host_core::errors::Error as ControllerError;
use le_host_core::{AddressType, BluetoothDeviceAddress};
use le_host_gap::cache::InquiryResult;
use le_host_gap::controller::{GapEnvironment, GapTimer, ResolvingListUsage, ResultKind, SendError};
use le_host_gap::hci::Command;

/// Something the GAP controller did with its environment
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    Command(Command),
    StartTimer(GapTimer, Duration),
    StopTimer(GapTimer),
    Result {
        kind: ResultKind,
        result: InquiryResult,
        data: Vec<u8>,
    },
    Complete {
        kind: ResultKind,
        status: ControllerError,
        num_responses: u16,
    },
    EnableResolvingList(ResolvingListUsage),
    DisableResolvingList(ResolvingListUsage),
    SelectiveConnectionCandidate {
        address: BluetoothDeviceAddress,
        name: Option<Vec<u8>>,
    },
}

/// A GAP environment that records every interaction
///
/// Commands are never sent anywhere. When `fail_commands` is set every command fails to send.
#[derive(Debug, Default)]
pub struct RecordingEnvironment {
    pub records: Vec<Record>,
    pub fail_commands: bool,
    /// Entries of the resolving list as (peer address, identity type, identity address)
    pub resolving_list: Vec<(BluetoothDeviceAddress, AddressType, BluetoothDeviceAddress)>,
}

impl RecordingEnvironment {
    pub fn commands(&self) -> impl Iterator<Item = &Command> + '_ {
        self.records.iter().filter_map(|record| match record {
            Record::Command(command) => Some(command),
            _ => None,
        })
    }

    pub fn last_command(&self) -> Option<&Command> {
        self.commands().last()
    }

    /// Get the addresses of the results of `kind` in the order they were reported
    pub fn results(&self, kind: ResultKind) -> Vec<BluetoothDeviceAddress> {
        self.records
            .iter()
            .filter_map(|record| match record {
                Record::Result { kind: k, result, .. } if *k == kind => Some(result.address),
                _ => None,
            })
            .collect()
    }

    /// Get the number of responses of every completion of `kind`
    pub fn completions(&self, kind: ResultKind) -> Vec<u16> {
        self.records
            .iter()
            .filter_map(|record| match record {
                Record::Complete {
                    kind: k, num_responses, ..
                } if *k == kind => Some(*num_responses),
                _ => None,
            })
            .collect()
    }

    pub fn is_timer_running(&self, timer: GapTimer) -> bool {
        self.records
            .iter()
            .rev()
            .find_map(|record| match record {
                Record::StartTimer(t, _) if *t == timer => Some(true),
                Record::StopTimer(t) if *t == timer => Some(false),
                _ => None,
            })
            .unwrap_or_default()
    }

    pub fn clear(&mut self) {
        self.records.clear()
    }
}

impl GapEnvironment for RecordingEnvironment {
    fn send_command(&mut self, command: Command) -> Result<(), SendError> {
        if self.fail_commands {
            log::debug!("failing command {:#06x}", command.opcode());

            return Err(SendError);
        }

        self.records.push(Record::Command(command));

        Ok(())
    }

    fn start_timer(&mut self, timer: GapTimer, duration: Duration) {
        self.records.push(Record::StartTimer(timer, duration))
    }

    fn stop_timer(&mut self, timer: GapTimer) {
        self.records.push(Record::StopTimer(timer))
    }

    fn on_result(&mut self, kind: ResultKind, result: &InquiryResult, data: &[u8]) {
        self.records.push(Record::Result {
            kind,
            result: *result,
            data: data.to_vec(),
        })
    }

    fn on_complete(&mut self, kind: ResultKind, status: ControllerError, num_responses: u16) {
        self.records.push(Record::Complete {
            kind,
            status,
            num_responses,
        })
    }

    fn resolving_list_identity(
        &mut self,
        address: &BluetoothDeviceAddress,
    ) -> Option<(AddressType, BluetoothDeviceAddress)> {
        self.resolving_list
            .iter()
            .find(|(peer, _, identity)| peer == address || identity == address)
            .map(|(_, address_type, identity)| (*address_type, *identity))
    }

    fn first_resolving_list_entry(&mut self) -> Option<(AddressType, BluetoothDeviceAddress)> {
        self.resolving_list
            .first()
            .map(|(_, address_type, identity)| (*address_type, *identity))
    }

    fn enable_resolving_list(&mut self, usage: ResolvingListUsage) {
        self.records.push(Record::EnableResolvingList(usage))
    }

    fn disable_resolving_list(&mut self, usage: ResolvingListUsage) {
        self.records.push(Record::DisableResolvingList(usage))
    }

    fn map_to_identity(&mut self, address: BluetoothDeviceAddress, address_type: u8) -> (BluetoothDeviceAddress, u8) {
        match self.resolving_list.iter().find(|(peer, _, _)| *peer == address) {
            Some((_, identity_type, identity)) => (*identity, identity_type.into_val()),
            None => (address, address_type),
        }
    }

    fn on_selective_connection_candidate(&mut self, address: &BluetoothDeviceAddress, name: Option<&[u8]>) {
        self.records.push(Record::SelectiveConnectionCandidate {
            address: *address,
            name: name.map(|name| name.to_vec()),
        })
    }
}
