// Thin windowing glue: a plain presentation window whose procedure only
// records notifications for the render thread to pick up.

use crate::error::{PresentError, PresentResult};
use crate::surface::OCCLUSION_STATUS_MSG;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use windows::core::w;
use windows::Win32::Foundation::{HINSTANCE, HWND, LPARAM, LRESULT, WPARAM};
use windows::Win32::System::LibraryLoader::GetModuleHandleW;
use windows::Win32::UI::WindowsAndMessaging::{
    CreateWindowExW, DefWindowProcW, DispatchMessageW, GetWindowLongPtrW, PeekMessageW,
    PostQuitMessage, RegisterClassW, SetWindowLongPtrW, ShowWindow, TranslateMessage,
    CREATESTRUCTW, CS_HREDRAW, CS_VREDRAW, GWLP_USERDATA, MSG, PM_REMOVE, SW_SHOW, WM_DESTROY,
    WM_NCCREATE, WM_QUIT, WM_SIZE, WNDCLASSW, WS_OVERLAPPEDWINDOW,
};

/// Notifications the window thread leaves for the render thread. Plain
/// atomic stores: the window thread may race the render thread reading
/// them at tick start.
#[derive(Default)]
pub struct WindowSignals {
    pub resized: AtomicBool,
    pub occlusion_changed: AtomicBool,
}

pub fn create_presentation_window(
    width: i32,
    height: i32,
    signals: Arc<WindowSignals>,
) -> PresentResult<HWND> {
    let class_name = w!("DeskBridgeWindow");
    let hinstance = unsafe { GetModuleHandleW(None) }
        .map_err(|e| PresentError::device("querying module handle", e))?;

    let wc = WNDCLASSW {
        lpfnWndProc: Some(window_proc),
        hInstance: hinstance.into(),
        lpszClassName: class_name,
        style: CS_HREDRAW | CS_VREDRAW,
        ..Default::default()
    };
    unsafe { RegisterClassW(&wc) };

    // The signals pointer travels through CREATESTRUCT into the window
    // user data; the window holds one strong reference until destroyed.
    let signals_ptr = Arc::into_raw(signals) as *const std::ffi::c_void;

    let hwnd = unsafe {
        CreateWindowExW(
            Default::default(),
            class_name,
            w!("DeskBridge"),
            WS_OVERLAPPEDWINDOW,
            100,
            100,
            width,
            height,
            None,
            None,
            Some(HINSTANCE(hinstance.0)),
            Some(signals_ptr),
        )
    }
    .map_err(|e| PresentError::device("creating presentation window", e))?;

    let _ = unsafe { ShowWindow(hwnd, SW_SHOW) };
    Ok(hwnd)
}

fn signals_of(hwnd: HWND) -> Option<&'static WindowSignals> {
    let ptr = unsafe { GetWindowLongPtrW(hwnd, GWLP_USERDATA) } as *const WindowSignals;
    if ptr.is_null() {
        None
    } else {
        Some(unsafe { &*ptr })
    }
}

unsafe extern "system" fn window_proc(
    hwnd: HWND,
    msg: u32,
    wparam: WPARAM,
    lparam: LPARAM,
) -> LRESULT {
    match msg {
        WM_NCCREATE => {
            let create = &*(lparam.0 as *const CREATESTRUCTW);
            SetWindowLongPtrW(hwnd, GWLP_USERDATA, create.lpCreateParams as isize);
            DefWindowProcW(hwnd, msg, wparam, lparam)
        }
        WM_SIZE => {
            if let Some(signals) = signals_of(hwnd) {
                signals.resized.store(true, Ordering::Release);
            }
            LRESULT(0)
        }
        OCCLUSION_STATUS_MSG => {
            if let Some(signals) = signals_of(hwnd) {
                signals.occlusion_changed.store(true, Ordering::Release);
            }
            LRESULT(0)
        }
        WM_DESTROY => {
            let ptr = GetWindowLongPtrW(hwnd, GWLP_USERDATA) as *const WindowSignals;
            if !ptr.is_null() {
                SetWindowLongPtrW(hwnd, GWLP_USERDATA, 0);
                drop(Arc::from_raw(ptr));
            }
            PostQuitMessage(0);
            LRESULT(0)
        }
        _ => DefWindowProcW(hwnd, msg, wparam, lparam),
    }
}

/// Drain pending window messages. Returns `false` once WM_QUIT arrived.
pub fn pump_messages() -> bool {
    let mut msg = MSG::default();
    unsafe {
        while PeekMessageW(&mut msg, None, 0, 0, PM_REMOVE).as_bool() {
            if msg.message == WM_QUIT {
                return false;
            }
            let _ = TranslateMessage(&msg);
            DispatchMessageW(&msg);
        }
    }
    true
}
