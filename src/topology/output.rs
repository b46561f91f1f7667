//! Output (connector) state

use crate::edid::EdidInfo;

use super::crtc::CrtcId;
use super::mode::ModeId;

/// Stable identifier of an output; the hardware connector id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct OutputId(pub u32);

/// Physical connector kind, matching the kernel's connector type table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectorType {
    #[default]
    Unknown,
    Vga,
    DviI,
    DviD,
    DviA,
    Composite,
    SVideo,
    Lvds,
    Component,
    NinePinDin,
    DisplayPort,
    HdmiA,
    HdmiB,
    Tv,
    Edp,
    Virtual,
    Dsi,
    Dpi,
}

impl ConnectorType {
    /// Short name used as the prefix of an output name ("HDMI-1").
    pub fn name(self) -> &'static str {
        match self {
            ConnectorType::Unknown => "None",
            ConnectorType::Vga => "VGA",
            ConnectorType::DviI => "DVI-I",
            ConnectorType::DviD => "DVI-D",
            ConnectorType::DviA => "DVI-A",
            ConnectorType::Composite => "Composite",
            ConnectorType::SVideo => "SVIDEO",
            ConnectorType::Lvds => "LVDS",
            ConnectorType::Component => "Component",
            ConnectorType::NinePinDin => "DIN",
            ConnectorType::DisplayPort => "DP",
            ConnectorType::HdmiA => "HDMI",
            ConnectorType::HdmiB => "HDMI-B",
            ConnectorType::Tv => "TV",
            ConnectorType::Edp => "eDP",
            ConnectorType::Virtual => "Virtual",
            ConnectorType::Dsi => "DSI",
            ConnectorType::Dpi => "DPI",
        }
    }

    /// Built-in panels (laptop displays) as opposed to external ports.
    pub fn is_internal(self) -> bool {
        matches!(
            self,
            ConnectorType::Lvds | ConnectorType::Edp | ConnectorType::Dsi | ConnectorType::Dpi
        )
    }
}

/// Tiling metadata for outputs that form part of a larger logical
/// monitor (e.g. high-resolution panels driven as two halves).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TileInfo {
    pub group_id: u32,
    pub flags: u32,
    pub max_h_tiles: u32,
    pub max_v_tiles: u32,
    pub loc_h_tile: u32,
    pub loc_v_tile: u32,
    pub tile_w: u32,
    pub tile_h: u32,
}

/// A physical connector and everything known about it.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Output {
    pub id: OutputId,
    pub name: String,
    pub connector_type: ConnectorType,
    /// CRTC currently driving this output, if any.
    pub crtc: Option<CrtcId>,
    pub modes: Vec<ModeId>,
    pub preferred_mode: Option<ModeId>,
    /// CRTCs every encoder of this output agrees it can be driven by.
    pub possible_crtcs: Vec<CrtcId>,
    /// Outputs this one can share a CRTC with (mirror the same region).
    pub clones: Vec<OutputId>,
    pub tile_info: Option<TileInfo>,
    pub is_primary: bool,
    pub is_presentation: bool,
    pub is_underscanning: bool,
    pub supports_underscanning: bool,
    /// Normalized backlight level 0..=100, or -1 if not controllable.
    pub backlight: i32,
    pub backlight_min: i32,
    pub backlight_max: i32,
    pub width_mm: u32,
    pub height_mm: u32,
    /// Position hint from the firmware/server, -1 when absent.
    pub suggested_x: i32,
    pub suggested_y: i32,
    /// Connector re-reads its mode list on every hotplug event
    /// (docking stations, MST).
    pub hotplug_mode_update: bool,
    pub edid: Option<EdidInfo>,
}

impl Output {
    pub fn new(id: OutputId, name: String) -> Self {
        Self {
            id,
            name,
            backlight: -1,
            suggested_x: -1,
            suggested_y: -1,
            ..Default::default()
        }
    }

    pub fn is_usable(&self) -> bool {
        !self.modes.is_empty() && !self.possible_crtcs.is_empty()
    }
}
