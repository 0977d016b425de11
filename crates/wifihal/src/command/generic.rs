//! Typed replies for the QCA "generic" vendor queries.

use super::event::WifiEvent;
use super::vendor::VendorCommand;
use super::{CommandCore, EventStatus, WifiCommand};
use crate::error::{Error, Result};
use crate::netlink::attr::{AttrTable, get};
use crate::nl80211::qca::attr::{self, concurrency, packet_filter};
use crate::nl80211::qca::subcmd;

/// A decoded reply, selected by vendor subcmd.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenericReply {
    /// `GET_SUPPORTED_FEATURES`: feature bitmask.
    SupportedFeatures(u64),
    /// `GET_FEATURES`: driver feature flag bytes.
    DriverFeatures(Vec<u8>),
    /// `GET_CONCURRENCY_MATRIX`: feature sets, at most the requested count.
    ConcurrencyMatrix(Vec<u64>),
    /// `GET_BUS_SIZE`: firmware bus transfer limit in bytes.
    BusSize(u32),
    /// `PACKET_FILTER` / GET: interpreter version and program memory size.
    PacketFilterCapabilities { version: u32, max_len: u32 },
    /// `PACKET_FILTER` / READ: bytes read from filter memory.
    PacketFilterMemory(Vec<u8>),
}

/// A vendor query whose reply is decoded into a [`GenericReply`].
#[derive(Debug)]
pub struct GenericCommand {
    inner: VendorCommand,
    set_size_max: usize,
    read_len: usize,
    reply: Option<GenericReply>,
}

impl GenericCommand {
    pub fn new(inner: VendorCommand) -> Self {
        Self {
            inner,
            set_size_max: 0,
            read_len: 0,
            reply: None,
        }
    }

    /// Cap on concurrency matrix entries kept from the reply.
    pub fn set_max_set_size(&mut self, max: usize) {
        self.set_size_max = max;
    }

    /// Expect a packet filter memory read of `len` bytes.
    pub fn set_read_len(&mut self, len: usize) {
        self.read_len = len;
    }

    pub fn reply(&self) -> Option<&GenericReply> {
        self.reply.as_ref()
    }

    pub fn into_reply(self) -> Option<GenericReply> {
        self.reply
    }

    fn decode(&self, data: &[u8]) -> Result<Option<GenericReply>> {
        let attrs = AttrTable::parse(data)?;
        let reply = match self.inner.subcmd() {
            subcmd::GET_SUPPORTED_FEATURES => {
                let set = required(&attrs, attr::FEATURE_SET, "feature set")?;
                let value = match set.len() {
                    n if n >= 8 => get::u64_ne(set)?,
                    _ => u64::from(get::u32_ne(set)?),
                };
                GenericReply::SupportedFeatures(value)
            }
            subcmd::GET_FEATURES => {
                let flags = required(&attrs, attr::FEATURE_FLAGS, "feature flags")?;
                GenericReply::DriverFeatures(flags.to_vec())
            }
            subcmd::GET_CONCURRENCY_MATRIX => {
                let size = get::u32_ne(required(
                    &attrs,
                    concurrency::RESULTS_SET_SIZE,
                    "concurrency set size",
                )?)? as usize;
                let count = size.min(self.set_size_max);
                let set = attrs.get(concurrency::RESULTS_SET).unwrap_or(&[]);
                let needed = count * std::mem::size_of::<u64>();
                if set.len() < needed {
                    return Err(Error::Truncated {
                        expected: needed,
                        actual: set.len(),
                    });
                }
                let sets = set[..needed]
                    .chunks_exact(8)
                    .map(get::u64_ne)
                    .collect::<Result<Vec<_>>>()?;
                GenericReply::ConcurrencyMatrix(sets)
            }
            subcmd::GET_BUS_SIZE => {
                let size = required(&attrs, attr::DRV_INFO_BUS_SIZE, "bus size")?;
                GenericReply::BusSize(get::u32_ne(size)?)
            }
            subcmd::PACKET_FILTER if self.read_len > 0 => {
                let program = required(&attrs, packet_filter::PROGRAM, "filter memory")?;
                if program.len() < self.read_len {
                    return Err(Error::Truncated {
                        expected: self.read_len,
                        actual: program.len(),
                    });
                }
                GenericReply::PacketFilterMemory(program[..self.read_len].to_vec())
            }
            subcmd::PACKET_FILTER => GenericReply::PacketFilterCapabilities {
                version: attrs.u32(packet_filter::VERSION),
                max_len: attrs.u32(packet_filter::SIZE),
            },
            other => {
                tracing::debug!(subcmd = other, "no decoder for vendor reply");
                return Ok(None);
            }
        };
        Ok(Some(reply))
    }
}

fn required<'a>(attrs: &AttrTable<'a>, attr: u16, what: &str) -> Result<&'a [u8]> {
    attrs
        .get(attr)
        .ok_or_else(|| Error::InvalidMessage(format!("reply is missing {}", what)))
}

impl WifiCommand for GenericCommand {
    fn core(&self) -> &CommandCore {
        self.inner.core()
    }

    fn core_mut(&mut self) -> &mut CommandCore {
        self.inner.core_mut()
    }

    fn create(&mut self) -> Result<()> {
        self.reply = None;
        self.inner.create()
    }

    fn handle_response(&mut self, reply: &mut WifiEvent<'_>) -> Result<()> {
        self.inner.handle_response(reply)?;
        let Some(data) = reply.vendor_data() else {
            tracing::error!(subcmd = self.inner.subcmd(), "vendor reply without data");
            return Err(Error::InvalidMessage("vendor reply without data".into()));
        };
        self.reply = self.decode(data)?;
        Ok(())
    }

    fn handle_event(&mut self, event: &mut WifiEvent<'_>) -> Result<EventStatus> {
        self.inner.handle_event(event)
    }
}
