// MrcSleuth - core/store.rs
//
// Hierarchical memory record: socket -> channel -> device -> attributes.
//
// Every level is an ordered map, so iteration order (and therefore the
// report and inventory) is deterministic. Writes auto-create intermediate
// nodes; reads of absent nodes yield an empty node and never create one.
// Socket and channel keys are canonicalised on both paths, so `Ch0`,
// `CH0` and `Channel 0` all address the same channel.

use crate::core::model::{Component, NodeConfig};
use regex::Regex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::OnceLock;

/// Attribute name -> value.
pub type Attributes = BTreeMap<String, String>;

/// Value of `DIMM vendor` for an empty slot.
pub const NOT_INSTALLED: &str = "Not installed";

static EMPTY_SOCKET: SocketNode = SocketNode {
    attributes: BTreeMap::new(),
    channels: BTreeMap::new(),
};
static EMPTY_CHANNEL: ChannelNode = ChannelNode {
    attributes: BTreeMap::new(),
    devices: BTreeMap::new(),
};
static EMPTY_DEVICE: DeviceNode = DeviceNode {
    attributes: BTreeMap::new(),
};

// =============================================================================
// Key canonicalisation
// =============================================================================

fn key_patterns() -> &'static (Regex, Regex) {
    static PATTERNS: OnceLock<(Regex, Regex)> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        (
            Regex::new(r"(?i)^\s*(?:socket|skt|s)\s*_?(\d+)\s*$").expect("socket key regex"),
            Regex::new(r"(?i)^\s*(?:channel|ch)\s*_?(\d+)\s*$").expect("channel key regex"),
        )
    })
}

/// Index named by a socket or channel spelling, if it is one.
fn key_index(re: &Regex, raw: &str) -> Option<u32> {
    let trimmed = raw.trim();
    if let Ok(n) = trimmed.parse::<u32>() {
        return Some(n);
    }
    re.captures(trimmed)?.get(1)?.as_str().parse().ok()
}

fn canonical(re: &Regex, prefix: &str, raw: &str) -> String {
    match key_index(re, raw) {
        Some(n) => format!("{prefix} {n}"),
        None => raw.trim().to_string(),
    }
}

/// Canonical socket key: `Socket N` for `0`, `S0`, `Socket0`, `socket 0`.
pub fn socket_key(raw: &str) -> String {
    canonical(&key_patterns().0, "Socket", raw)
}

/// Canonical channel key: `Channel N` for `Ch0`, `CH0`, `Channel 0`.
pub fn channel_key(raw: &str) -> String {
    canonical(&key_patterns().1, "Channel", raw)
}

/// True when `raw` names a socket (`Total` or `Misc` do not).
pub fn is_socket_key(raw: &str) -> bool {
    key_index(&key_patterns().0, raw).is_some()
}

/// True when `raw` names a channel (`Chipkill` or `Checksum` do not).
pub fn is_channel_key(raw: &str) -> bool {
    key_index(&key_patterns().1, raw).is_some()
}

// =============================================================================
// Nodes
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeviceNode {
    pub attributes: Attributes,
}

impl DeviceNode {
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.attributes.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    /// A device with no attributes is an artefact of a partial table, not a
    /// module.
    pub fn is_populated(&self) -> bool {
        !self.attributes.is_empty()
    }

    pub fn is_installed(&self) -> bool {
        self.is_populated() && self.get("DIMM vendor") != Some(NOT_INSTALLED)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChannelNode {
    pub attributes: Attributes,
    pub devices: BTreeMap<String, DeviceNode>,
}

impl ChannelNode {
    pub fn device_mut(&mut self, name: &str) -> &mut DeviceNode {
        self.devices.entry(name.trim().to_string()).or_default()
    }

    pub fn device(&self, name: &str) -> &DeviceNode {
        self.devices.get(name.trim()).unwrap_or(&EMPTY_DEVICE)
    }

    pub fn installed_devices(&self) -> usize {
        self.devices.values().filter(|d| d.is_installed()).count()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SocketNode {
    pub attributes: Attributes,
    pub channels: BTreeMap<String, ChannelNode>,
}

impl SocketNode {
    pub fn channel_mut(&mut self, raw: &str) -> &mut ChannelNode {
        self.channels.entry(channel_key(raw)).or_default()
    }

    pub fn channel(&self, raw: &str) -> &ChannelNode {
        self.channels.get(&channel_key(raw)).unwrap_or(&EMPTY_CHANNEL)
    }
}

// =============================================================================
// Record
// =============================================================================

/// The whole extracted memory picture of one boot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MemoryRecord {
    pub sockets: BTreeMap<String, SocketNode>,
}

/// Counts observed in (or expected of) a memory record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PopulationCounts {
    pub sockets: usize,
    /// Channels per socket, keyed by canonical socket key.
    pub channels: BTreeMap<String, usize>,
    pub dimms: usize,
}

/// Outcome of comparing a record against the node configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Completeness {
    pub complete: bool,
    pub expected_sockets: usize,
    pub expected_channels_per_socket: usize,
    pub expected_dimms: usize,
    pub observed: PopulationCounts,
}

impl Completeness {
    /// One-line description of the first mismatch, for the report.
    pub fn describe(&self) -> String {
        if self.complete {
            return "memory population matches node configuration".to_string();
        }
        if self.observed.sockets != self.expected_sockets {
            return format!(
                "expected {} sockets, found {}",
                self.expected_sockets, self.observed.sockets
            );
        }
        if let Some((socket, n)) = self
            .observed
            .channels
            .iter()
            .find(|(_, n)| **n != self.expected_channels_per_socket)
        {
            return format!(
                "expected {} channels on {socket}, found {n}",
                self.expected_channels_per_socket
            );
        }
        format!(
            "expected {} installed DIMMs, found {}",
            self.expected_dimms, self.observed.dimms
        )
    }
}

impl MemoryRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn socket_mut(&mut self, raw: &str) -> &mut SocketNode {
        self.sockets.entry(socket_key(raw)).or_default()
    }

    pub fn socket(&self, raw: &str) -> &SocketNode {
        self.sockets.get(&socket_key(raw)).unwrap_or(&EMPTY_SOCKET)
    }

    pub fn is_empty(&self) -> bool {
        self.sockets.is_empty()
    }

    /// Count what is actually present. Only keys that name a socket or a
    /// channel are counted; other entries are free-form attributes that
    /// ended up at those levels.
    pub fn counts(&self) -> PopulationCounts {
        let mut counts = PopulationCounts::default();
        for (key, socket) in self.sockets.iter().filter(|(k, _)| is_socket_key(k)) {
            counts.sockets += 1;
            let channels: Vec<&ChannelNode> = socket
                .channels
                .iter()
                .filter(|(k, _)| is_channel_key(k))
                .map(|(_, c)| c)
                .collect();
            counts.channels.insert(key.clone(), channels.len());
            counts.dimms += channels
                .iter()
                .map(|c| c.installed_devices())
                .sum::<usize>();
        }
        counts
    }

    /// Compare the record against the expected population. Both missing and
    /// surplus entries make the record incomplete.
    pub fn completeness(&self, node: &NodeConfig) -> Completeness {
        let observed = self.counts();
        let complete = observed.sockets == node.sockets_count
            && observed
                .channels
                .values()
                .all(|n| *n == node.channels_count)
            && observed.dimms == node.dimms_count;
        Completeness {
            complete,
            expected_sockets: node.sockets_count,
            expected_channels_per_socket: node.channels_count,
            expected_dimms: node.dimms_count,
            observed,
        }
    }

    /// Installed modules in socket/channel/slot order, under counted keys only.
    pub fn inventory(&self) -> Vec<Component> {
        let mut out = Vec::new();
        for (socket_name, socket) in self.sockets.iter().filter(|(k, _)| is_socket_key(k)) {
            for (channel_name, channel) in socket.channels.iter().filter(|(k, _)| is_channel_key(k)) {
                for (slot, device) in &channel.devices {
                    if !device.is_installed() {
                        continue;
                    }
                    let attr = |name: &str| device.get(name).map(str::to_string);
                    out.push(Component {
                        kind: "RAM".to_string(),
                        socket: socket_name.clone(),
                        channel: channel_name.clone(),
                        slot: slot.clone(),
                        model: attr("PN"),
                        vendor: attr("DRAM vendor"),
                        size: attr("Organisation"),
                        form_factor: attr("Form factor"),
                        speed: attr("Freq"),
                        timings: attr("Timings"),
                    });
                }
            }
        }
        out
    }
}
