//! Screen-change event classification
//!
//! RRScreenChangeNotify fires for hotplugs, for configurations this
//! process requested, and for configurations other X clients applied.
//! The server's two timestamps tell the cases apart: a resources
//! timestamp older than the config timestamp means the hardware itself
//! changed, and a resources timestamp equal to the one our last
//! SetCrtcConfig returned means the change was ours.

use x11rb::protocol::xproto::Timestamp;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeClass {
    /// Hardware appeared or disappeared; a new default configuration
    /// should be computed.
    Hotplug,
    /// Our own configuration echoed back; nothing to recompute.
    OwnConfiguration,
    /// Another X client reconfigured the screen.
    External,
}

pub fn classify_screen_change(
    resources_timestamp: Timestamp,
    config_timestamp: Timestamp,
    last_set_timestamp: Timestamp,
) -> ChangeClass {
    if resources_timestamp < config_timestamp {
        ChangeClass::Hotplug
    } else if resources_timestamp == last_set_timestamp {
        ChangeClass::OwnConfiguration
    } else {
        ChangeClass::External
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn newer_config_timestamp_means_hotplug() {
        assert_eq!(classify_screen_change(100, 200, 0), ChangeClass::Hotplug);
        // Even if the timestamp would match our own last set
        assert_eq!(classify_screen_change(100, 200, 100), ChangeClass::Hotplug);
    }

    #[test]
    fn matching_set_timestamp_is_ours() {
        assert_eq!(
            classify_screen_change(300, 250, 300),
            ChangeClass::OwnConfiguration
        );
    }

    #[test]
    fn anything_else_is_external() {
        assert_eq!(classify_screen_change(300, 250, 200), ChangeClass::External);
        assert_eq!(classify_screen_change(300, 300, 0), ChangeClass::External);
    }
}
