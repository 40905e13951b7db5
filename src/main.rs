#![cfg_attr(not(debug_assertions), windows_subsystem = "windows")]

use anyhow::Result;

fn main() -> Result<()> {
    let result = run_app();
    deskbridge::logger::finalize_logs();
    result
}

#[cfg(windows)]
fn run_app() -> Result<()> {
    use deskbridge::error::{FrameStatus, PresentError};
    use deskbridge::exclusive::RING_SIZE;
    use deskbridge::pointer::pointer_channel;
    use deskbridge::window::{self, WindowSignals};
    use deskbridge::{d3d, log_error, log_info, log_warn};
    use deskbridge::{Config, OutputSession, PresentMode, SessionOptions};
    use std::sync::atomic::Ordering;
    use std::sync::Arc;
    use std::time::Duration;
    use windows::Win32::System::Com::{CoInitializeEx, COINIT_MULTITHREADED};

    let config = Config::new()?;
    let app_config = config.load()?;
    deskbridge::logger::init_logger(
        config.log_dir.clone(),
        "deskbridge",
        app_config.log_retention_count,
    )?;
    config.save(&app_config)?;

    unsafe {
        let _ = CoInitializeEx(None, COINIT_MULTITHREADED);
    }

    let signals = Arc::new(WindowSignals::default());
    let hwnd = window::create_presentation_window(1280, 720, Arc::clone(&signals))?;

    // Capture threads clone the sender and stream cursor updates in; the
    // render loop folds them into the latest snapshot each tick.
    let (_pointer_tx, mut pointer_feed) = pointer_channel();

    let options = SessionOptions {
        acquire_timeout_ms: app_config.acquire_timeout_ms,
        vsync: app_config.vsync,
    };

    'rebuild: loop {
        let (device, context) = d3d::create_device()?;

        let mut session = loop {
            match OutputSession::init_output(&device, &context, hwnd, app_config.output, options) {
                Ok(session) => break session,
                Err(PresentError::NoOutputs) => {
                    // Topology transition in progress; wait and re-enumerate.
                    log_warn!("no outputs available, retrying shortly");
                    if !window::pump_messages() {
                        return Ok(());
                    }
                    spin_sleep::sleep(Duration::from_millis(500));
                }
                Err(PresentError::CanvasTooLarge) => {
                    log_warn!("combined canvas too large, falling back to a single output");
                    break OutputSession::init_output(&device, &context, hwnd, Some(0), options)?;
                }
                Err(e) => return Err(e.into()),
            }
        };

        let bounds = session.desktop_bounds();
        log_info!(
            "mirroring {} output(s), desktop ({}, {}) to ({}, {})",
            session.output_count(),
            bounds.left,
            bounds.top,
            bounds.right,
            bounds.bottom
        );

        let mut exclusive_active = false;
        if app_config.mode == PresentMode::Exclusive {
            match session.init_exclusive(app_config.exclusive_display, app_config.exclusive_mode) {
                Ok(()) => exclusive_active = true,
                Err(e) => log_error!("exclusive display unavailable, staying windowed: {}", e),
            }
        }

        let mut occluded = false;
        let mut frame_index = 0usize;

        loop {
            if !window::pump_messages() {
                let _ = session.release_exclusive();
                return Ok(());
            }

            if signals.resized.swap(false, Ordering::AcqRel) {
                session.on_resize();
            }
            if signals.occlusion_changed.swap(false, Ordering::AcqRel) {
                log_info!("occlusion status changed");
            }

            let pointer = pointer_feed.latest().clone();
            match session.update_frame(&pointer) {
                Ok(FrameStatus::Presented) => {
                    if occluded {
                        log_info!("window visible again");
                    }
                    occluded = false;
                }
                Ok(FrameStatus::Occluded) => {
                    if !occluded {
                        log_info!("window occluded, throttling presentation");
                    }
                    occluded = true;
                }
                Ok(FrameStatus::SkippedBusy) => {}
                Err(e) if e.is_device_lost() => {
                    log_error!("{}; rebuilding device and session", e);
                    let _ = session.release_exclusive();
                    continue 'rebuild;
                }
                Err(e) => {
                    let _ = session.release_exclusive();
                    return Err(e.into());
                }
            }

            if exclusive_active {
                if let Err(e) = session.present_exclusive(frame_index % RING_SIZE) {
                    log_error!("exclusive present failed: {}", e);
                    let _ = session.release_exclusive();
                    exclusive_active = false;
                }
            }
            frame_index = frame_index.wrapping_add(1);

            // Occluded output still ticks, just slower.
            if occluded {
                spin_sleep::sleep(Duration::from_millis(100));
            }
        }
    }
}

#[cfg(not(windows))]
fn run_app() -> Result<()> {
    anyhow::bail!("deskbridge presents through DXGI and only runs on Windows")
}
