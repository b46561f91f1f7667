//! RandR output properties
//!
//! Everything beyond the core GetOutputInfo reply lives in output
//! properties: EDID blobs, the connector type atom, tiling geometry,
//! backlight control, underscan and the presentation flag.

use anyhow::{Context, Result};
use log::debug;
use x11rb::protocol::randr::{self, ConnectionExt as _};
use x11rb::protocol::xproto::{Atom, AtomEnum, ConnectionExt as _, PropMode};
use x11rb::rust_connection::RustConnection;

use crate::edid::{self, EdidInfo};
use crate::topology::{ConnectorType, TileInfo};

use super::gpu::Atoms;

const EDID_BLOCK_SIZE: usize = 128;

fn get_property(
    conn: &RustConnection,
    output: randr::Output,
    property: Atom,
    long_length: u32,
) -> Option<randr::GetOutputPropertyReply> {
    let reply = conn
        .randr_get_output_property(output, property, x11rb::NONE, 0, long_length, false, false)
        .ok()?
        .reply()
        .ok()?;
    if reply.num_items == 0 {
        None
    } else {
        Some(reply)
    }
}

fn cardinal32(reply: &randr::GetOutputPropertyReply) -> Option<u32> {
    if reply.format != 32 || reply.data.len() < 4 {
        return None;
    }
    let bytes: [u8; 4] = reply.data[..4].try_into().ok()?;
    Some(u32::from_ne_bytes(bytes))
}

/// EDID from the "EDID" property, falling back to the older
/// "EDID_DATA" name some drivers use. Anything that is not a whole
/// number of 128-byte blocks is discarded.
pub(super) fn read_edid(
    conn: &RustConnection,
    atoms: &Atoms,
    output: randr::Output,
) -> Option<EdidInfo> {
    for &property in &[atoms.EDID, atoms.EDID_DATA] {
        if let Some(reply) = get_property(conn, output, property, 256) {
            let data = reply.data;
            if !data.is_empty() && data.len() % EDID_BLOCK_SIZE == 0 {
                return edid::parse(&data);
            }
            debug!("Ignoring malformed EDID of {} bytes", data.len());
        }
    }
    None
}

/// Connector type from the ConnectorType atom property, with a
/// name-prefix heuristic for servers that do not set it.
pub(super) fn read_connector_type(
    conn: &RustConnection,
    atoms: &Atoms,
    output: randr::Output,
    output_name: &str,
) -> ConnectorType {
    if let Some(reply) = get_property(conn, output, atoms.ConnectorType, 1) {
        if reply.format == 32 {
            if let Some(atom) = cardinal32(&reply) {
                let name_reply = conn
                    .get_atom_name(atom)
                    .ok()
                    .and_then(|cookie| cookie.reply().ok());
                if let Some(name_reply) = name_reply {
                    let name = String::from_utf8_lossy(&name_reply.name).into_owned();
                    if let Some(kind) = connector_type_from_atom_name(&name) {
                        return kind;
                    }
                }
            }
        }
    }
    connector_type_from_output_name(output_name)
}

fn connector_type_from_atom_name(name: &str) -> Option<ConnectorType> {
    match name {
        "DisplayPort" => Some(ConnectorType::DisplayPort),
        "HDMI" => Some(ConnectorType::HdmiA),
        "VGA" => Some(ConnectorType::Vga),
        "Panel" => Some(ConnectorType::Lvds),
        "DVI" | "DVI-I" => Some(ConnectorType::DviI),
        "DVI-A" => Some(ConnectorType::DviA),
        "DVI-D" => Some(ConnectorType::DviD),
        _ => None,
    }
}

pub(super) fn connector_type_from_output_name(name: &str) -> ConnectorType {
    // eDP before DP: both share the prefix
    if name.starts_with("eDP") {
        ConnectorType::Edp
    } else if name.starts_with("DP") {
        ConnectorType::DisplayPort
    } else if name.starts_with("HDMI") {
        ConnectorType::HdmiA
    } else if name.starts_with("VGA") {
        ConnectorType::Vga
    } else if name.starts_with("LVDS") {
        ConnectorType::Lvds
    } else if name.starts_with("DVI") {
        ConnectorType::DviI
    } else if name.starts_with("DSI") {
        ConnectorType::Dsi
    } else if name.starts_with("Virtual") {
        ConnectorType::Virtual
    } else {
        ConnectorType::Unknown
    }
}

/// TILE property: eight CARD32s describing the tile group and this
/// output's position in it.
pub(super) fn read_tile_info(
    conn: &RustConnection,
    atoms: &Atoms,
    output: randr::Output,
) -> Option<TileInfo> {
    let reply = get_property(conn, output, atoms.TILE, 8)?;
    if reply.format != 32 || reply.num_items != 8 {
        return None;
    }
    let mut values = reply
        .data
        .chunks_exact(4)
        .map(|c| u32::from_ne_bytes([c[0], c[1], c[2], c[3]]));
    let mut next = || values.next();
    Some(TileInfo {
        group_id: next()?,
        flags: next()?,
        max_h_tiles: next()?,
        max_v_tiles: next()?,
        loc_h_tile: next()?,
        loc_v_tile: next()?,
        tile_w: next()?,
        tile_h: next()?,
    })
}

/// "suggested X" / "suggested Y" placement hints from the driver,
/// -1 when absent.
pub(super) fn read_suggested_position(
    conn: &RustConnection,
    atoms: &Atoms,
    output: randr::Output,
) -> (i32, i32) {
    let read = |property| {
        get_property(conn, output, property, 1)
            .as_ref()
            .and_then(cardinal32)
            .map_or(-1, |v| v as i32)
    };
    (read(atoms.suggested_x), read(atoms.suggested_y))
}

/// Servers set this on outputs whose mode list must be re-read on
/// every hotplug (docks, MST branches).
pub(super) fn read_hotplug_mode_update(
    conn: &RustConnection,
    atoms: &Atoms,
    output: randr::Output,
) -> bool {
    get_property(conn, output, atoms.hotplug_mode_update, 1)
        .as_ref()
        .and_then(cardinal32)
        .map_or(false, |v| v != 0)
}

pub(super) fn read_is_presentation(
    conn: &RustConnection,
    atoms: &Atoms,
    output: randr::Output,
) -> bool {
    get_property(conn, output, atoms._MUTTER_PRESENTATION_OUTPUT, 1)
        .as_ref()
        .and_then(cardinal32)
        .map_or(false, |v| v != 0)
}

pub(super) fn set_presentation(
    conn: &RustConnection,
    atoms: &Atoms,
    output: randr::Output,
    presentation: bool,
) -> Result<()> {
    let value: u32 = presentation.into();
    conn.randr_change_output_property(
        output,
        atoms._MUTTER_PRESENTATION_OUTPUT,
        u32::from(AtomEnum::CARDINAL),
        32,
        PropMode::REPLACE,
        1,
        &value.to_ne_bytes(),
    )
    .context("Failed to set presentation property")?
    .check()
    .context("Presentation property change rejected")?;
    Ok(())
}

/// Whether "underscan" is set to the "on" atom right now.
pub(super) fn read_is_underscanning(
    conn: &RustConnection,
    atoms: &Atoms,
    output: randr::Output,
) -> bool {
    get_property(conn, output, atoms.underscan, 1)
        .as_ref()
        .and_then(cardinal32)
        .map_or(false, |atom| atom == atoms.on)
}

/// Whether the driver's "underscan" property accepts the "on" value.
pub(super) fn read_supports_underscanning(
    conn: &RustConnection,
    atoms: &Atoms,
    output: randr::Output,
) -> bool {
    conn.randr_query_output_property(output, atoms.underscan)
        .ok()
        .and_then(|cookie| cookie.reply().ok())
        .map_or(false, |reply| {
            reply.valid_values.contains(&(atoms.on as i32))
        })
}

/// Underscan borders are 5% of the active mode.
pub(super) fn set_underscan(
    conn: &RustConnection,
    atoms: &Atoms,
    output: randr::Output,
    enable: bool,
    mode_size: Option<(u16, u16)>,
) -> Result<()> {
    let value = if enable { atoms.on } else { atoms.off };
    conn.randr_change_output_property(
        output,
        atoms.underscan,
        u32::from(AtomEnum::ATOM),
        32,
        PropMode::REPLACE,
        1,
        &value.to_ne_bytes(),
    )
    .context("Failed to set underscan property")?
    .check()
    .context("Underscan property change rejected")?;

    if enable {
        if let Some((width, height)) = mode_size {
            for (atom, dimension) in [
                (atoms.underscan_hborder, width),
                (atoms.underscan_vborder, height),
            ] {
                let border = (f64::from(dimension) * 0.05).round() as i32;
                conn.randr_change_output_property(
                    output,
                    atom,
                    u32::from(AtomEnum::INTEGER),
                    32,
                    PropMode::REPLACE,
                    1,
                    &border.to_ne_bytes(),
                )
                .context("Failed to set underscan border")?
                .check()
                .context("Underscan border change rejected")?;
            }
        }
    }
    Ok(())
}

/// Current backlight plus its hardware range, when the driver exposes
/// one. "Backlight" is the modern name, "BACKLIGHT" the legacy one.
pub(super) fn read_backlight(
    conn: &RustConnection,
    atoms: &Atoms,
    output: randr::Output,
) -> Option<(i32, i32, i32)> {
    for &property in &[atoms.Backlight, atoms.BACKLIGHT] {
        let query = conn
            .randr_query_output_property(output, property)
            .ok()
            .and_then(|cookie| cookie.reply().ok());
        let query = match query {
            Some(q) if q.range && q.valid_values.len() == 2 => q,
            _ => continue,
        };
        let (min, max) = (query.valid_values[0], query.valid_values[1]);
        if max <= min {
            continue;
        }
        let value = get_property(conn, output, property, 1)
            .as_ref()
            .and_then(cardinal32)
            .map(|v| v as i32)?;
        return Some((value, min, max));
    }
    None
}

pub(super) fn set_backlight(
    conn: &RustConnection,
    atoms: &Atoms,
    output: randr::Output,
    min: i32,
    max: i32,
    percent: i32,
) -> Result<()> {
    let value = denormalize_backlight(min, max, percent);
    conn.randr_change_output_property(
        output,
        atoms.Backlight,
        u32::from(AtomEnum::INTEGER),
        32,
        PropMode::REPLACE,
        1,
        &value.to_ne_bytes(),
    )
    .context("Failed to set backlight property")?
    .check()
    .context("Backlight property change rejected")?;
    Ok(())
}

/// Map a raw backlight value onto 0..=100.
pub(super) fn normalize_backlight(min: i32, max: i32, value: i32) -> i32 {
    let span = f64::from(max - min);
    (f64::from(value.clamp(min, max) - min) / span * 100.0).round() as i32
}

fn denormalize_backlight(min: i32, max: i32, percent: i32) -> i32 {
    let span = f64::from(max - min);
    min + (f64::from(percent.clamp(0, 100)) / 100.0 * span).round() as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_heuristics_cover_common_prefixes() {
        assert_eq!(
            connector_type_from_output_name("eDP-1"),
            ConnectorType::Edp
        );
        assert_eq!(
            connector_type_from_output_name("DP-2"),
            ConnectorType::DisplayPort
        );
        assert_eq!(
            connector_type_from_output_name("HDMI-A-0"),
            ConnectorType::HdmiA
        );
        assert_eq!(
            connector_type_from_output_name("LVDS1"),
            ConnectorType::Lvds
        );
        assert_eq!(
            connector_type_from_output_name("DVI-I-1"),
            ConnectorType::DviI
        );
        assert_eq!(
            connector_type_from_output_name("None-1"),
            ConnectorType::Unknown
        );
    }

    #[test]
    fn atom_names_map_to_connector_types() {
        assert_eq!(
            connector_type_from_atom_name("DisplayPort"),
            Some(ConnectorType::DisplayPort)
        );
        assert_eq!(
            connector_type_from_atom_name("Panel"),
            Some(ConnectorType::Lvds)
        );
        assert_eq!(connector_type_from_atom_name("unknown-thing"), None);
    }

    #[test]
    fn backlight_normalization_round_trips_the_endpoints() {
        assert_eq!(normalize_backlight(0, 255, 0), 0);
        assert_eq!(normalize_backlight(0, 255, 255), 100);
        assert_eq!(normalize_backlight(0, 255, 128), 50);
        // Out-of-range raw values clamp
        assert_eq!(normalize_backlight(10, 20, 5), 0);
        assert_eq!(normalize_backlight(10, 20, 25), 100);

        assert_eq!(denormalize_backlight(0, 255, 100), 255);
        assert_eq!(denormalize_backlight(0, 255, 0), 0);
        assert_eq!(denormalize_backlight(10, 20, 50), 15);
    }
}
