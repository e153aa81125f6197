//! Bus address negotiation.
//!
//! Every node on the bus answers every poll byte with its configured id, so
//! the coordinator can enumerate the bus and resolve duplicate ids out of
//! band. A terminator byte closes the exchange; a bus reset aborts it.

use core::fmt;

use crate::hal::{LedOutput, NvStorage, SerialPort};
use crate::led::{COLOR_FAULT, COLOR_NEGOTIATING, COLOR_READY};

/// Poll byte sent by the coordinator during negotiation.
pub const POLL_BYTE: u8 = b'?';
/// Byte that ends negotiation successfully.
pub const NEGOTIATION_TERMINATOR: u8 = 0xFF;

/// Configured bus address in `1..=254`.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct NodeId(u8);

impl NodeId {
    /// Storage value of a node that was never configured.
    pub const UNCONFIGURED: u8 = 0x00;
    /// Reserved for the broadcast destination.
    pub const BROADCAST: u8 = 0xFF;

    #[must_use]
    pub const fn get(self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for NodeId {
    type Error = u8;

    fn try_from(raw: u8) -> Result<Self, Self::Error> {
        match raw {
            Self::UNCONFIGURED | Self::BROADCAST => Err(raw),
            id => Ok(Self(id)),
        }
    }
}

impl From<NodeId> for u8 {
    fn from(id: NodeId) -> Self {
        id.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Reasons a node cannot take part in negotiation.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AddressError<E> {
    /// The id slot holds a reserved value.
    Unconfigured(u8),
    /// The id slot could not be read.
    Storage(E),
}

impl<E: fmt::Debug> fmt::Display for AddressError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressError::Unconfigured(raw) => write!(f, "node id {raw:#04x} is reserved"),
            AddressError::Storage(err) => write!(f, "node id unreadable: {err:?}"),
        }
    }
}

/// Result of a negotiation pass.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum NegotiationOutcome {
    Assigned(NodeId),
    /// A bus reset arrived before the terminator.
    Reset,
}

/// Per-epoch negotiation driver.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct AddressNegotiator {
    id: NodeId,
}

impl AddressNegotiator {
    #[must_use]
    pub const fn new(id: NodeId) -> Self {
        Self { id }
    }

    /// Reads the configured id and prepares a negotiator for it.
    pub fn load<N: NvStorage>(storage: &mut N) -> Result<Self, AddressError<N::Error>> {
        let raw = storage.read_node_id().map_err(AddressError::Storage)?;
        let id = NodeId::try_from(raw).map_err(AddressError::Unconfigured)?;
        Ok(Self::new(id))
    }

    #[must_use]
    pub const fn id(&self) -> NodeId {
        self.id
    }

    /// Shows the negotiating colour.
    pub fn begin<L: LedOutput>(&self, led: &mut L) {
        led.set_color(COLOR_NEGOTIATING);
    }

    /// Processes every byte currently available on `serial`.
    ///
    /// Returns `None` while the coordinator is still polling.
    pub fn step<S: SerialPort>(&self, serial: &mut S, reset_latched: bool) -> Option<NegotiationOutcome> {
        if reset_latched {
            return Some(NegotiationOutcome::Reset);
        }

        while let Some(byte) = serial.read_byte() {
            match byte {
                NEGOTIATION_TERMINATOR => return Some(NegotiationOutcome::Assigned(self.id)),
                POLL_BYTE => serial.write_byte(self.id.get()),
                _ => {}
            }
        }
        None
    }

    /// Shows the ready colour once the terminator has been seen.
    pub fn finish<L: LedOutput>(&self, led: &mut L) {
        led.set_color(COLOR_READY);
    }

    /// Shows the fatal colour for an unusable id slot.
    pub fn signal_unconfigured<L: LedOutput>(led: &mut L) {
        led.set_color(COLOR_FAULT);
    }
}
