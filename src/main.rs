//! headctl - inspect and drive Linux display topology
//!
//! Talks KMS directly when run on a VT, or RandR when `DISPLAY` is set
//! (overridable with --kms / --x11).

use anyhow::{anyhow, bail, Context, Result};
use log::info;

use headctl::kms::hotplug::{diff_topologies, HotplugMonitor};
use headctl::kms::GpuKms;
use headctl::xrandr::GpuXrandr;
use headctl::{Gpu, PowerSave, Topology};

fn print_help() {
    println!("headctl - inspect and drive Linux display topology");
    println!();
    println!("Usage: headctl [OPTIONS] [COMMAND]");
    println!();
    println!("Commands:");
    println!("  list                     Show outputs, CRTCs and modes (default)");
    println!("  watch                    Log topology changes as they happen");
    println!("  power <on|standby|suspend|off>");
    println!("                           Set the DPMS power level");
    println!("  backlight <OUTPUT> <0-100>");
    println!("                           Set an output's backlight (X11 only)");
    println!();
    println!("Options:");
    println!("  --kms                    Force the DRM/KMS backend");
    println!("  --x11                    Force the RandR backend");
    println!("  --device=PATH            DRM device node (default: first card)");
    println!("  -h, --help               Show this help");
    println!("  -V, --version            Show version");
}

fn first_drm_device() -> Result<std::path::PathBuf> {
    let mut cards: Vec<_> = std::fs::read_dir("/dev/dri")
        .context("Cannot read /dev/dri")?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .map_or(false, |n| n.starts_with("card"))
        })
        .collect();
    cards.sort();
    cards
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("No DRM devices in /dev/dri"))
}

enum BackendChoice {
    Kms,
    Xrandr,
}

fn choose_backend(args: &[String]) -> BackendChoice {
    if args.iter().any(|a| a == "--kms") {
        BackendChoice::Kms
    } else if args.iter().any(|a| a == "--x11") {
        BackendChoice::Xrandr
    } else if std::env::var_os("DISPLAY").is_some() {
        BackendChoice::Xrandr
    } else {
        BackendChoice::Kms
    }
}

fn open_kms(args: &[String]) -> Result<GpuKms> {
    let device = match args.iter().find_map(|a| a.strip_prefix("--device=")) {
        Some(path) => std::path::PathBuf::from(path),
        None => first_drm_device()?,
    };
    GpuKms::new(device)
}

fn print_topology(topology: &Topology) {
    if let Some((w, h)) = topology.max_screen_size {
        println!("max screen size: {}x{}", w, h);
    }
    for crtc in &topology.crtcs {
        if crtc.is_active() {
            println!(
                "crtc {}: {}x{}+{}+{} {:?}",
                crtc.id.0, crtc.rect.width, crtc.rect.height, crtc.rect.x, crtc.rect.y,
                crtc.transform
            );
        } else {
            println!("crtc {}: off", crtc.id.0);
        }
    }
    for output in &topology.outputs {
        let mut flags = Vec::new();
        if output.is_primary {
            flags.push("primary");
        }
        if output.is_presentation {
            flags.push("presentation");
        }
        if output.is_underscanning {
            flags.push("underscan");
        }
        let flags = if flags.is_empty() {
            String::new()
        } else {
            format!(" [{}]", flags.join(", "))
        };
        let monitor = output
            .edid
            .as_ref()
            .map(|e| format!(" \"{}\"", e.product()))
            .unwrap_or_default();
        println!(
            "output {} ({}){}{} {}mm x {}mm",
            output.name,
            output.connector_type.name(),
            monitor,
            flags,
            output.width_mm,
            output.height_mm
        );
        for &mode_id in &output.modes {
            let mode = match topology.mode(mode_id) {
                Some(mode) => mode,
                None => continue,
            };
            let current = output
                .crtc
                .and_then(|c| topology.crtc(c))
                .and_then(|c| c.current_mode)
                == Some(mode_id);
            let marker = match (current, output.preferred_mode == Some(mode_id)) {
                (true, true) => "*+",
                (true, false) => "* ",
                (false, true) => " +",
                (false, false) => "  ",
            };
            println!("  {} {} {:.2} Hz", marker, mode.name, mode.refresh_rate());
        }
    }
}

fn watch_kms(mut gpu: GpuKms) -> Result<()> {
    let mut monitor = HotplugMonitor::new()?;
    info!("Watching for hotplug events, Ctrl-C to stop");
    loop {
        let mut pollfd = libc::pollfd {
            fd: monitor.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        };
        let ret = unsafe { libc::poll(&mut pollfd, 1, -1) };
        if ret < 0 {
            let err = std::io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::EINTR) {
                continue;
            }
            return Err(err).context("poll on udev monitor failed");
        }
        if !monitor.poll() {
            continue;
        }
        let before = gpu.topology().clone();
        gpu.read_current()?;
        let changes = diff_topologies(&before, gpu.topology());
        if changes.has_changes() {
            changes.log();
            print_topology(gpu.topology());
        }
    }
}

fn watch_x11(mut gpu: GpuXrandr) -> Result<()> {
    gpu.select_screen_change_events()?;
    info!("Watching for screen changes, Ctrl-C to stop");
    loop {
        let class = match gpu.wait_event()? {
            Some(class) => class,
            None => continue,
        };
        let before = gpu.topology().clone();
        gpu.read_current()?;
        let changes = diff_topologies(&before, gpu.topology());
        println!("screen change: {:?}", class);
        if changes.has_changes() {
            changes.log();
        }
        print_topology(gpu.topology());
    }
}

fn parse_power_mode(word: &str) -> Result<PowerSave> {
    match word {
        "on" => Ok(PowerSave::On),
        "standby" => Ok(PowerSave::Standby),
        "suspend" => Ok(PowerSave::Suspend),
        "off" => Ok(PowerSave::Off),
        other => bail!("Unknown power mode '{}'", other),
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let args: Vec<String> = std::env::args().skip(1).collect();

    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_help();
        return Ok(());
    }
    if args.iter().any(|a| a == "--version" || a == "-V") {
        println!("headctl {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let command = args
        .iter()
        .find(|a| !a.starts_with('-'))
        .map(String::as_str)
        .unwrap_or("list");
    let positional: Vec<&String> = args.iter().filter(|a| !a.starts_with('-')).collect();

    match command {
        "list" => match choose_backend(&args) {
            BackendChoice::Kms => print_topology(open_kms(&args)?.topology()),
            BackendChoice::Xrandr => print_topology(GpuXrandr::new(None)?.topology()),
        },
        "watch" => match choose_backend(&args) {
            BackendChoice::Kms => watch_kms(open_kms(&args)?)?,
            BackendChoice::Xrandr => watch_x11(GpuXrandr::new(None)?)?,
        },
        "power" => {
            let mode = positional
                .get(1)
                .ok_or_else(|| anyhow!("power needs a mode, e.g. 'headctl power off'"))
                .and_then(|w| parse_power_mode(w.as_str()))?;
            match choose_backend(&args) {
                BackendChoice::Kms => open_kms(&args)?.set_power_save_mode(mode)?,
                BackendChoice::Xrandr => GpuXrandr::new(None)?.set_power_save_mode(mode)?,
            }
            info!("Power save mode set to {:?}", mode);
        }
        "backlight" => {
            let name = positional
                .get(1)
                .ok_or_else(|| anyhow!("backlight needs an output name"))?;
            let percent: i32 = positional
                .get(2)
                .ok_or_else(|| anyhow!("backlight needs a percentage"))?
                .parse()
                .context("Backlight percentage must be a number")?;
            let mut gpu = GpuXrandr::new(None)?;
            let output = gpu
                .topology()
                .outputs
                .iter()
                .find(|o| &o.name == *name)
                .map(|o| o.id)
                .ok_or_else(|| anyhow!("No output named {}", name))?;
            gpu.set_backlight(output, percent)?;
        }
        other => {
            bail!("Unknown command '{}', try --help", other);
        }
    }
    Ok(())
}
