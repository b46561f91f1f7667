//! Connector hotplug detection
//!
//! udev delivers a "change" event with HOTPLUG=1 on the drm subsystem
//! when a connector's state changes. The monitor only says *something*
//! changed; callers re-enumerate and diff the old topology against the
//! new one to find out what.

use anyhow::{Context, Result};
use log::{debug, info, warn};
use std::os::unix::io::{AsRawFd, RawFd};

use crate::topology::{ConnectorType, ModeTiming, OutputId, Topology};

/// udev-based hotplug monitor for DRM devices
pub struct HotplugMonitor {
    socket: udev::MonitorSocket,
}

impl HotplugMonitor {
    pub fn new() -> Result<Self> {
        let socket = udev::MonitorBuilder::new()
            .context("Failed to create udev monitor builder")?
            .match_subsystem("drm")
            .context("Failed to match drm subsystem")?
            .listen()
            .context("Failed to start udev monitor")?;

        info!("DRM hotplug monitor initialized");
        Ok(Self { socket })
    }

    /// Raw file descriptor for polling
    pub fn as_raw_fd(&self) -> RawFd {
        self.socket.as_raw_fd()
    }

    /// Drain available udev events (non-blocking); `true` when at least
    /// one of them was a connector hotplug.
    pub fn poll(&mut self) -> bool {
        let mut hotplugged = false;
        for event in self.socket.iter() {
            if event.action().map(|a| a == "change").unwrap_or(false)
                && event.property_value("HOTPLUG").map_or(false, |v| v == "1")
            {
                debug!("DRM hotplug event: {:?}", event.devpath().to_string_lossy());
                hotplugged = true;
            }
        }
        hotplugged
    }
}

/// One output's identity in a change report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputChange {
    pub id: OutputId,
    pub name: String,
    pub connector_type: ConnectorType,
}

impl OutputChange {
    pub fn is_internal(&self) -> bool {
        self.connector_type.is_internal()
    }
}

/// Summary of what a re-enumeration changed.
#[derive(Debug, Default)]
pub struct TopologyChanges {
    pub connected: Vec<OutputChange>,
    pub disconnected: Vec<OutputChange>,
    /// Outputs present in both snapshots whose mode list changed.
    pub mode_changed: Vec<OutputChange>,
}

impl TopologyChanges {
    pub fn has_changes(&self) -> bool {
        !self.connected.is_empty() || !self.disconnected.is_empty() || !self.mode_changed.is_empty()
    }

    pub fn log(&self) {
        for change in &self.connected {
            info!("Output connected: {}", change.name);
        }
        for change in &self.disconnected {
            warn!("Output disconnected: {}", change.name);
        }
        for change in &self.mode_changed {
            info!("Output mode list changed: {}", change.name);
        }
    }

    /// Whether any external (non-panel) output appeared.
    pub fn external_connected(&self) -> bool {
        self.connected.iter().any(|c| !c.is_internal())
    }

    pub fn external_disconnected(&self) -> bool {
        self.disconnected.iter().any(|c| !c.is_internal())
    }
}

fn timings_of(topology: &Topology, id: OutputId) -> Vec<ModeTiming> {
    topology
        .output(id)
        .map(|output| {
            output
                .modes
                .iter()
                .filter_map(|&m| topology.mode(m))
                .map(|m| m.timing)
                .collect()
        })
        .unwrap_or_default()
}

/// Compare two topology snapshots by output identity. Mode lists are
/// compared by timing, not by id, since mode ids are per-snapshot.
pub fn diff_topologies(old: &Topology, new: &Topology) -> TopologyChanges {
    let mut changes = TopologyChanges::default();

    for output in &new.outputs {
        let change = OutputChange {
            id: output.id,
            name: output.name.clone(),
            connector_type: output.connector_type,
        };
        match old.output(output.id) {
            None => changes.connected.push(change),
            Some(_) => {
                if timings_of(old, output.id) != timings_of(new, output.id) {
                    changes.mode_changed.push(change);
                }
            }
        }
    }

    for output in &old.outputs {
        if new.output(output.id).is_none() {
            changes.disconnected.push(OutputChange {
                id: output.id,
                name: output.name.clone(),
                connector_type: output.connector_type,
            });
        }
    }

    changes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::{Mode, ModeId, Output};

    fn topology_with(outputs: Vec<(u32, &str, ConnectorType, Vec<u32>)>, clocks: &[u32]) -> Topology {
        let modes = clocks
            .iter()
            .enumerate()
            .map(|(i, &clock)| Mode {
                id: ModeId(i as u32),
                name: format!("m{}", i),
                timing: ModeTiming {
                    clock,
                    ..Default::default()
                },
            })
            .collect();
        let outputs = outputs
            .into_iter()
            .map(|(id, name, connector_type, mode_ids)| {
                let mut o = Output::new(OutputId(id), name.to_string());
                o.connector_type = connector_type;
                o.modes = mode_ids.into_iter().map(ModeId).collect();
                o
            })
            .collect();
        Topology {
            modes,
            outputs,
            ..Default::default()
        }
    }

    #[test]
    fn detects_connect_and_disconnect() {
        let old = topology_with(vec![(1, "eDP-1", ConnectorType::Edp, vec![0])], &[100]);
        let new = topology_with(
            vec![
                (1, "eDP-1", ConnectorType::Edp, vec![0]),
                (2, "HDMI-1", ConnectorType::HdmiA, vec![0]),
            ],
            &[100],
        );

        let changes = diff_topologies(&old, &new);
        assert_eq!(changes.connected.len(), 1);
        assert_eq!(changes.connected[0].name, "HDMI-1");
        assert!(changes.external_connected());
        assert!(changes.disconnected.is_empty());

        let back = diff_topologies(&new, &old);
        assert_eq!(back.disconnected.len(), 1);
        assert!(back.external_disconnected());
    }

    #[test]
    fn mode_lists_compared_by_timing_across_snapshots() {
        let old = topology_with(vec![(1, "DP-1", ConnectorType::DisplayPort, vec![0])], &[100]);
        // Same timing under a different mode id: no change
        let renumbered = topology_with(vec![(1, "DP-1", ConnectorType::DisplayPort, vec![1])], &[50, 100]);
        assert!(!diff_topologies(&old, &renumbered).has_changes());

        let grown = topology_with(
            vec![(1, "DP-1", ConnectorType::DisplayPort, vec![0, 1])],
            &[100, 200],
        );
        let changes = diff_topologies(&old, &grown);
        assert_eq!(changes.mode_changed.len(), 1);
        assert!(changes.connected.is_empty());
    }

    #[test]
    fn internal_panels_do_not_count_as_external() {
        let old = topology_with(vec![], &[]);
        let new = topology_with(vec![(1, "eDP-1", ConnectorType::Edp, vec![])], &[]);
        let changes = diff_topologies(&old, &new);
        assert!(changes.has_changes());
        assert!(!changes.external_connected());
    }
}
