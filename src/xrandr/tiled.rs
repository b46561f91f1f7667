//! RandR 1.5 monitor objects for tiled displays
//!
//! A tiled display (DP MST 4k/5k panels) shows up as several outputs
//! sharing a TILE group. Publishing a RandR monitor object spanning the
//! group makes X clients treat the tiles as one logical monitor. The
//! registry tracks which groups we have published so vanished groups
//! get their monitor deleted again.

use anyhow::{Context, Result};
use log::{debug, info};
use x11rb::protocol::randr::{self, ConnectionExt as _};
use x11rb::protocol::xproto::{Atom, ConnectionExt as _, Window};
use x11rb::rust_connection::RustConnection;

use crate::topology::Topology;

/// One tile group observed in the current topology.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct TileGroup {
    pub group_id: u32,
    /// Product name from the EDID, when any tile has one.
    pub product: Option<String>,
    pub outputs: Vec<randr::Output>,
}

impl TileGroup {
    fn monitor_name(&self) -> String {
        match &self.product {
            Some(product) => format!("{}-{}", product, self.group_id),
            None => format!("Tiled-{}", self.group_id),
        }
    }
}

/// Group the topology's tiled outputs by tile group id, preserving
/// output order within a group.
pub(super) fn collect_tile_groups(topology: &Topology) -> Vec<TileGroup> {
    let mut groups: Vec<TileGroup> = Vec::new();
    for output in &topology.outputs {
        let tile = match &output.tile_info {
            Some(tile) => tile,
            None => continue,
        };
        let product = output.edid.as_ref().map(|e| e.product());
        match groups.iter_mut().find(|g| g.group_id == tile.group_id) {
            Some(group) => {
                group.outputs.push(output.id.0);
                if group.product.is_none() {
                    group.product = product;
                }
            }
            None => groups.push(TileGroup {
                group_id: tile.group_id,
                product,
                outputs: vec![output.id.0],
            }),
        }
    }
    groups
}

struct PublishedMonitor {
    group_id: u32,
    name_atom: Atom,
    outputs: Vec<randr::Output>,
}

#[derive(Default)]
pub(super) struct TiledMonitorRegistry {
    published: Vec<PublishedMonitor>,
}

impl TiledMonitorRegistry {
    /// Delete monitor objects left behind by a previous session. Only
    /// multi-output monitors qualify; single-output ones are the
    /// server's own automatic monitors.
    pub fn clear_stale(conn: &RustConnection, root: Window) -> Result<()> {
        let reply = conn
            .randr_get_monitors(root, false)
            .context("Failed to query RandR monitors")?
            .reply()
            .context("GetMonitors failed")?;
        for monitor in &reply.monitors {
            if !monitor.automatic && monitor.outputs.len() > 1 {
                debug!("Deleting stale tiled monitor {}", monitor.name);
                conn.randr_delete_monitor(root, monitor.name)
                    .context("Failed to delete stale monitor")?
                    .check()
                    .context("DeleteMonitor failed")?;
            }
        }
        Ok(())
    }

    /// Publish monitors for new groups, refresh changed ones, delete
    /// monitors whose group disappeared.
    pub fn sync(
        &mut self,
        conn: &RustConnection,
        root: Window,
        groups: &[TileGroup],
    ) -> Result<()> {
        self.published.retain(|published| {
            if groups.iter().any(|g| g.group_id == published.group_id) {
                return true;
            }
            info!("Tile group {} gone, deleting its monitor", published.group_id);
            if let Ok(cookie) = conn.randr_delete_monitor(root, published.name_atom) {
                let _ = cookie.check();
            }
            false
        });

        for group in groups {
            // Lone tiles don't need a monitor object
            if group.outputs.len() < 2 {
                continue;
            }
            let existing = self
                .published
                .iter_mut()
                .find(|p| p.group_id == group.group_id);
            if let Some(existing) = existing {
                if existing.outputs == group.outputs {
                    continue;
                }
            }
            let name = group.monitor_name();
            let name_atom = conn
                .intern_atom(false, name.as_bytes())
                .context("Failed to intern monitor name atom")?
                .reply()
                .context("InternAtom failed")?
                .atom;
            let monitor = randr::MonitorInfo {
                name: name_atom,
                primary: false,
                automatic: true,
                x: 0,
                y: 0,
                width: 0,
                height: 0,
                width_in_millimeters: 0,
                height_in_millimeters: 0,
                outputs: group.outputs.clone(),
            };
            info!(
                "Publishing tiled monitor {} over {} outputs",
                name,
                group.outputs.len()
            );
            conn.randr_set_monitor(root, monitor)
                .context("Failed to set RandR monitor")?
                .check()
                .context("SetMonitor failed")?;
            match self
                .published
                .iter_mut()
                .find(|p| p.group_id == group.group_id)
            {
                Some(p) => {
                    p.name_atom = name_atom;
                    p.outputs = group.outputs.clone();
                }
                None => self.published.push(PublishedMonitor {
                    group_id: group.group_id,
                    name_atom,
                    outputs: group.outputs.clone(),
                }),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edid::EdidInfo;
    use crate::topology::{Output, OutputId, TileInfo};

    fn tiled_output(id: u32, name: &str, group: u32, product: Option<&str>) -> Output {
        let mut output = Output::new(OutputId(id), name.to_string());
        output.tile_info = Some(TileInfo {
            group_id: group,
            flags: 0,
            max_h_tiles: 2,
            max_v_tiles: 1,
            loc_h_tile: 0,
            loc_v_tile: 0,
            tile_w: 1920,
            tile_h: 2160,
        });
        if let Some(product) = product {
            output.edid = Some(EdidInfo {
                vendor: "DEL".to_string(),
                product_code: 0x4143,
                serial_number: 1,
                name: Some(product.to_string()),
                serial: None,
                data: Vec::new(),
            });
        }
        output
    }

    #[test]
    fn groups_by_tile_group_id() {
        let topology = Topology {
            outputs: vec![
                tiled_output(1, "DP-1", 7, Some("UP2715K")),
                tiled_output(2, "DP-2", 7, None),
                tiled_output(3, "DP-3", 9, None),
                Output::new(OutputId(4), "HDMI-1".to_string()),
            ],
            ..Default::default()
        };
        let groups = collect_tile_groups(&topology);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].group_id, 7);
        assert_eq!(groups[0].outputs, vec![1, 2]);
        assert_eq!(groups[0].monitor_name(), "UP2715K-7");
        assert_eq!(groups[1].monitor_name(), "Tiled-9");
    }

    #[test]
    fn product_comes_from_any_tile_in_the_group() {
        let topology = Topology {
            outputs: vec![
                tiled_output(1, "DP-1", 3, None),
                tiled_output(2, "DP-2", 3, Some("UP3218K")),
            ],
            ..Default::default()
        };
        let groups = collect_tile_groups(&topology);
        assert_eq!(groups[0].monitor_name(), "UP3218K-3");
    }
}
