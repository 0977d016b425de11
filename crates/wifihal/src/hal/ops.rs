//! Vendor operations built on the command layer.

use std::sync::atomic::Ordering;
use std::time::Duration;

use super::{WifiHal, WifiInterface, lock};
use crate::command::{
    GenericCommand, GenericReply, RequestId, VendorCommand, WifiCommand, WifiRequest,
    next_request_id,
};
use crate::config::HalConfig;
use crate::error::{Error, Result};
use crate::nl80211::NL80211_ATTR_VENDOR_DATA;
use crate::nl80211::qca::attr::{self, concurrency, offloaded_packets, packet_filter};
use crate::nl80211::qca::{OUI_QCA, subcmd};

/// Attempts at writing the driver state control file.
const DRIVER_STATE_RETRIES: u32 = 5;
const DRIVER_STATE_RETRY_DELAY: Duration = Duration::from_millis(200);

/// A packet the firmware transmits periodically on the host's behalf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OffloadedPacket {
    /// Ethertype of the frame, e.g. `0x0800`.
    pub ether_type: u16,
    /// IP packet carried by the frame.
    pub ip_packet: Vec<u8>,
    pub src_mac: [u8; 6],
    pub dst_mac: [u8; 6],
    /// Transmit interval in milliseconds.
    pub period_msec: u32,
}

impl WifiHal {
    fn vendor_command(&self, iface: &WifiInterface, id: RequestId, subcmd: u32) -> Result<VendorCommand> {
        let mut cmd = VendorCommand::with_id(self.nl80211_id, Some(iface.index()), id, OUI_QCA, subcmd)
            .max_message_size(self.config.max_message_size);
        cmd.create()?;
        Ok(cmd)
    }

    fn generic_command(&self, iface: &WifiInterface, subcmd: u32) -> Result<GenericCommand> {
        let mut cmd = GenericCommand::new(VendorCommand::with_id(
            self.nl80211_id,
            Some(iface.index()),
            0,
            OUI_QCA,
            subcmd,
        )
        .max_message_size(self.config.max_message_size));
        cmd.create()?;
        Ok(cmd)
    }

    async fn query(&self, mut cmd: GenericCommand) -> Result<GenericReply> {
        self.channel.request_response(&mut cmd).await?;
        cmd.into_reply()
            .ok_or_else(|| Error::InvalidMessage("driver sent no reply data".into()))
    }

    async fn send_vendor<F>(&self, iface: &WifiInterface, id: RequestId, subcmd: u32, build: F) -> Result<()>
    where
        F: FnOnce(&mut WifiRequest) -> Result<()>,
    {
        let mut cmd = self.vendor_command(iface, id, subcmd)?;
        put_vendor_data(cmd.request_mut(), build)?;
        self.channel.request_response(&mut cmd).await
    }

    /// Query the driver's supported feature bitmask.
    ///
    /// A failed query answers with the value cached at initialization.
    pub async fn get_supported_feature_set(&self, iface: &WifiInterface) -> Result<u64> {
        match self.query_supported_features(iface).await {
            Ok(set) => {
                self.supported_features.store(set, Ordering::Relaxed);
                Ok(set)
            }
            Err(e) => {
                let cached = self.supported_features.load(Ordering::Relaxed);
                tracing::debug!(error = %e, cached = format_args!("{:#x}", cached), "using cached feature set");
                Ok(cached)
            }
        }
    }

    async fn query_supported_features(&self, iface: &WifiInterface) -> Result<u64> {
        let cmd = self.generic_command(iface, subcmd::GET_SUPPORTED_FEATURES)?;
        match self.query(cmd).await? {
            GenericReply::SupportedFeatures(set) => Ok(set),
            other => Err(unexpected(&other)),
        }
    }

    /// Driver feature flag bytes cached at initialization.
    pub fn driver_features(&self) -> Vec<u8> {
        lock(&self.driver_features).clone()
    }

    async fn query_driver_features(&self, iface: &WifiInterface) -> Result<Vec<u8>> {
        let cmd = self.generic_command(iface, subcmd::GET_FEATURES)?;
        match self.query(cmd).await? {
            GenericReply::DriverFeatures(flags) => Ok(flags),
            other => Err(unexpected(&other)),
        }
    }

    async fn query_bus_size(&self, iface: &WifiInterface) -> Result<u32> {
        let cmd = self.generic_command(iface, subcmd::GET_BUS_SIZE)?;
        match self.query(cmd).await? {
            GenericReply::BusSize(size) => Ok(size),
            other => Err(unexpected(&other)),
        }
    }

    /// Populate feature and bus size caches from the primary interface.
    pub(crate) async fn query_capabilities(&self) {
        let Ok(iface) = self.get_iface_handle(&self.config.primary_iface) else {
            return;
        };

        match self.query_supported_features(iface).await {
            Ok(set) => self.supported_features.store(set, Ordering::Relaxed),
            Err(e) => tracing::warn!(error = %e, "could not query supported features"),
        }
        match self.query_driver_features(iface).await {
            Ok(flags) => *lock(&self.driver_features) = flags,
            Err(e) => tracing::warn!(error = %e, "could not query driver features"),
        }
        match self.query_bus_size(iface).await {
            Ok(size) => self.fw_bus_size.store(size, Ordering::Relaxed),
            Err(e) => tracing::info!(
                error = %e,
                default = self.config.default_bus_size,
                "bus size unavailable, using default"
            ),
        }
    }

    /// Largest chunk the firmware accepts in one transfer.
    pub fn firmware_bus_size(&self) -> u32 {
        self.fw_bus_size.load(Ordering::Relaxed)
    }

    fn chunk_size(&self) -> usize {
        match self.firmware_bus_size() {
            0 => self.config.default_bus_size.max(1) as usize,
            size => size as usize,
        }
    }

    /// Whether the packet filter is currently enabled in firmware.
    pub fn apf_enabled(&self) -> bool {
        self.apf_enabled.load(Ordering::Relaxed)
    }

    /// Query up to `set_size_max` concurrency combinations.
    pub async fn get_concurrency_matrix(&self, iface: &WifiInterface, set_size_max: u32) -> Result<Vec<u64>> {
        let mut cmd = self.generic_command(iface, subcmd::GET_CONCURRENCY_MATRIX)?;
        cmd.set_max_set_size(set_size_max as usize);
        put_vendor_data(cmd.request_mut(), |req| {
            req.put_u32(concurrency::CONFIG_PARAM_SET_SIZE_MAX, set_size_max)
        })?;
        match self.query(cmd).await? {
            GenericReply::ConcurrencyMatrix(sets) => Ok(sets),
            other => Err(unexpected(&other)),
        }
    }

    /// Tell the driver whether DFS channels may be used.
    pub async fn set_nodfs_flag(&self, iface: &WifiInterface, nodfs: u32) -> Result<()> {
        self.send_vendor(iface, 0, subcmd::NO_DFS_FLAG, |req| {
            req.put_u32(attr::SET_NO_DFS_FLAG, nodfs)
        })
        .await
    }

    /// Start periodic transmission of `packet` under request id `id`.
    pub async fn start_sending_offloaded_packet(
        &self,
        id: RequestId,
        iface: &WifiInterface,
        packet: &OffloadedPacket,
    ) -> Result<()> {
        if packet.ip_packet.len() > usize::from(u16::MAX) {
            return Err(Error::InvalidArgs(format!(
                "offloaded packet of {} bytes",
                packet.ip_packet.len()
            )));
        }
        let request_id = u32::try_from(id)
            .map_err(|_| Error::InvalidArgs(format!("request id {}", id)))?;

        self.send_vendor(iface, id, subcmd::OFFLOADED_PACKETS, |req| {
            req.put_u32(offloaded_packets::SENDING_CONTROL, offloaded_packets::SENDING_START)?;
            req.put_u32(offloaded_packets::REQUEST_ID, request_id)?;
            req.put_u16(offloaded_packets::ETHER_PROTO_TYPE, packet.ether_type)?;
            req.put_bytes(offloaded_packets::IP_PACKET_DATA, &packet.ip_packet)?;
            req.put_addr(offloaded_packets::SRC_MAC_ADDR, &packet.src_mac)?;
            req.put_addr(offloaded_packets::DST_MAC_ADDR, &packet.dst_mac)?;
            req.put_u32(offloaded_packets::PERIOD, packet.period_msec)
        })
        .await
        .inspect_err(|e| tracing::error!(id, error = %e, "start sending offloaded packet failed"))
    }

    /// Stop the transmission started under `id`.
    pub async fn stop_sending_offloaded_packet(&self, id: RequestId, iface: &WifiInterface) -> Result<()> {
        let request_id = u32::try_from(id)
            .map_err(|_| Error::InvalidArgs(format!("request id {}", id)))?;

        self.send_vendor(iface, id, subcmd::OFFLOADED_PACKETS, |req| {
            req.put_u32(offloaded_packets::SENDING_CONTROL, offloaded_packets::SENDING_STOP)?;
            req.put_u32(offloaded_packets::REQUEST_ID, request_id)
        })
        .await
        .inspect_err(|e| tracing::error!(id, error = %e, "stop sending offloaded packet failed"))
    }

    /// Install a packet filter program, in bus-sized chunks.
    ///
    /// An empty program disables filtering.
    pub async fn set_packet_filter(&self, iface: &WifiInterface, program: &[u8]) -> Result<()> {
        let total = u32::try_from(program.len())
            .map_err(|_| Error::InvalidArgs(format!("filter program of {} bytes", program.len())))?;
        let chunk = self.chunk_size();

        let mut offset = 0;
        loop {
            let end = (offset + chunk).min(program.len());
            let part = &program[offset..end];
            let current = offset as u32;
            self.send_vendor(iface, next_request_id(), subcmd::PACKET_FILTER, |req| {
                req.put_u32(packet_filter::SUB_CMD, packet_filter::SET)?;
                req.put_u32(packet_filter::ID, 0)?;
                req.put_u32(packet_filter::SIZE, total)?;
                req.put_u32(packet_filter::CURRENT_OFFSET, current)?;
                if total > 0 {
                    req.put_bytes(packet_filter::PROGRAM, part)?;
                }
                Ok(())
            })
            .await
            .inspect_err(|e| tracing::error!(offset, error = %e, "set packet filter failed"))?;

            offset = end;
            if offset >= program.len() {
                break;
            }
        }

        self.apf_enabled.store(total != 0, Ordering::Relaxed);
        Ok(())
    }

    /// Packet filter interpreter version and memory size.
    ///
    /// A driver without packet filter support reports `(0, 0)`.
    pub async fn get_packet_filter_capabilities(&self, iface: &WifiInterface) -> Result<(u32, u32)> {
        let mut cmd = self.generic_command(iface, subcmd::PACKET_FILTER)?;
        put_vendor_data(cmd.request_mut(), |req| {
            req.put_u32(packet_filter::SUB_CMD, packet_filter::GET)
        })?;
        match self.query(cmd).await {
            Ok(GenericReply::PacketFilterCapabilities { version, max_len }) => Ok((version, max_len)),
            Ok(other) => Err(unexpected(&other)),
            Err(e) if e.is_not_supported() => {
                tracing::debug!("packet filter not supported");
                Ok((0, 0))
            }
            Err(e) => Err(e),
        }
    }

    /// Write `program` into filter memory at `dst_offset`.
    ///
    /// `program_length` is the length of the whole program the written
    /// bytes belong to.
    pub async fn write_packet_filter(
        &self,
        iface: &WifiInterface,
        dst_offset: u32,
        program: &[u8],
        program_length: u32,
    ) -> Result<()> {
        let total = u32::try_from(program.len())
            .map_err(|_| Error::InvalidArgs(format!("filter write of {} bytes", program.len())))?;
        let out_of_range = || {
            Error::InvalidArgs(format!(
                "filter write of {} bytes at offset {}",
                program.len(),
                dst_offset
            ))
        };
        dst_offset.checked_add(total).ok_or_else(out_of_range)?;
        let chunk = self.chunk_size();

        for (i, part) in program.chunks(chunk).enumerate() {
            let current = u32::try_from(i * chunk)
                .ok()
                .and_then(|skip| dst_offset.checked_add(skip))
                .ok_or_else(out_of_range)?;
            self.send_vendor(iface, next_request_id(), subcmd::PACKET_FILTER, |req| {
                req.put_u32(packet_filter::SUB_CMD, packet_filter::WRITE)?;
                req.put_u32(packet_filter::ID, 0)?;
                req.put_u32(packet_filter::SIZE, total)?;
                req.put_u32(packet_filter::CURRENT_OFFSET, current)?;
                req.put_u32(packet_filter::PROG_LENGTH, program_length)?;
                req.put_bytes(packet_filter::PROGRAM, part)
            })
            .await
            .inspect_err(|e| tracing::error!(offset = current, error = %e, "write packet filter failed"))?;
        }
        Ok(())
    }

    /// Enable or disable the installed filter.
    pub async fn enable_packet_filter(&self, iface: &WifiInterface, enable: bool) -> Result<()> {
        let sub_cmd = if enable {
            packet_filter::ENABLE
        } else {
            packet_filter::DISABLE
        };
        self.send_vendor(iface, next_request_id(), subcmd::PACKET_FILTER, |req| {
            req.put_u32(packet_filter::SUB_CMD, sub_cmd)
        })
        .await?;
        self.apf_enabled.store(enable, Ordering::Relaxed);
        Ok(())
    }

    /// Read `length` bytes of filter memory from `src_offset`.
    ///
    /// An enabled filter is disabled for the read and re-enabled afterwards.
    /// A read failure takes precedence over a failure to re-enable.
    pub async fn read_packet_filter(
        &self,
        iface: &WifiInterface,
        src_offset: u32,
        length: u32,
    ) -> Result<Vec<u8>> {
        if length == 0 {
            return Err(Error::InvalidArgs("zero length filter read".into()));
        }
        if src_offset.checked_add(length).is_none() {
            return Err(Error::InvalidArgs(format!(
                "filter read of {} bytes at offset {}",
                length, src_offset
            )));
        }

        let was_enabled = self.apf_enabled();
        if was_enabled {
            self.enable_packet_filter(iface, false).await?;
        }

        let read = self.read_filter_memory(iface, src_offset, length).await;

        if was_enabled {
            let restored = self
                .enable_packet_filter(iface, true)
                .await
                .inspect_err(|e| tracing::error!(error = %e, "could not re-enable packet filter"));
            return read.and_then(|data| restored.map(|()| data));
        }
        read
    }

    async fn read_filter_memory(&self, iface: &WifiInterface, mut src_offset: u32, length: u32) -> Result<Vec<u8>> {
        let chunk = self.chunk_size() as u32;
        let mut data = Vec::with_capacity(length as usize);
        let mut remaining = length;

        while remaining > 0 {
            let current = remaining.min(chunk);
            let mut cmd = self.generic_command(iface, subcmd::PACKET_FILTER)?;
            cmd.set_read_len(current as usize);
            put_vendor_data(cmd.request_mut(), |req| {
                req.put_u32(packet_filter::SUB_CMD, packet_filter::READ)?;
                req.put_u32(packet_filter::SIZE, current)?;
                req.put_u32(packet_filter::CURRENT_OFFSET, src_offset)
            })?;
            match self.query(cmd).await? {
                GenericReply::PacketFilterMemory(bytes) => data.extend_from_slice(&bytes),
                other => return Err(unexpected(&other)),
            }
            src_offset = src_offset
                .checked_add(current)
                .ok_or_else(|| Error::InvalidArgs(format!("filter read past offset {}", src_offset)))?;
            remaining -= current;
        }
        Ok(data)
    }

    /// Turn neighbor discovery offload on or off.
    pub async fn configure_nd_offload(&self, iface: &WifiInterface, enable: bool) -> Result<()> {
        self.send_vendor(iface, next_request_id(), subcmd::ND_OFFLOAD, |req| {
            req.put_u8(attr::ND_OFFLOAD_FLAG, u8::from(enable))
        })
        .await
    }

    /// Multicast group id of `group` in generic netlink `family`.
    pub async fn get_multicast_id(&self, family: &str, group: &str) -> Result<u32> {
        let info = self.channel.resolve_family(family).await?;
        info.mcast_group(group).ok_or_else(|| {
            Error::NotSupported(format!("family {} has no multicast group {}", family, group))
        })
    }
}

fn put_vendor_data<F>(req: &mut WifiRequest, build: F) -> Result<()>
where
    F: FnOnce(&mut WifiRequest) -> Result<()>,
{
    let nest = req.attr_start(NL80211_ATTR_VENDOR_DATA)?;
    build(req)?;
    req.attr_end(nest)
}

fn unexpected(reply: &GenericReply) -> Error {
    Error::InvalidMessage(format!("unexpected reply {:?}", reply))
}

/// Ask the driver to come up and wait for the primary interface to appear.
///
/// With `driver_state_ctrl_param` set, its file is written with
/// `driver_state_on` first, waiting briefly for the file to exist.
pub async fn wait_for_driver_ready(config: &HalConfig) -> Result<()> {
    if let Some(param) = &config.driver_state_ctrl_param {
        let mut written = false;
        for attempt in 1..=DRIVER_STATE_RETRIES {
            match std::fs::write(param, &config.driver_state_on) {
                Ok(()) => {
                    written = true;
                    break;
                }
                Err(e) => {
                    tracing::debug!(attempt, path = %param.display(), error = %e, "driver state write failed");
                    tokio::time::sleep(DRIVER_STATE_RETRY_DELAY).await;
                }
            }
        }
        if !written {
            tracing::error!(path = %param.display(), "could not signal driver state");
            return Err(Error::NotSupported(format!(
                "driver state control {} unavailable",
                param.display()
            )));
        }
    }

    let iface = config.sysfs_net_dir.join(&config.primary_iface);
    let deadline = tokio::time::Instant::now() + config.driver_ready_timeout();
    loop {
        if iface.exists() {
            tracing::debug!(iface = %config.primary_iface, "driver ready");
            return Ok(());
        }
        if tokio::time::Instant::now() >= deadline {
            tracing::error!(iface = %config.primary_iface, "timed out waiting for driver");
            return Err(Error::TimedOut);
        }
        tokio::time::sleep(config.driver_ready_poll()).await;
    }
}
