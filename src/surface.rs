// The windowed presentation target: swapchain, render target view and
// viewport, plus the resize/occlusion plumbing around them.
//
// Resize notifications arrive from the window thread and only flip an
// atomic flag; the actual rebuild happens on the render thread at the
// start of the next tick, because it has to drop and remake the render
// target view.

use crate::d3d::created;
use crate::error::{FrameStatus, PresentError, PresentResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use windows::core::Interface;
use windows::Win32::Foundation::{E_FAIL, HWND, RECT};
use windows::Win32::Graphics::Direct3D11::{
    ID3D11Device, ID3D11DeviceContext, ID3D11RenderTargetView, ID3D11Texture2D, D3D11_VIEWPORT,
};
use windows::Win32::Graphics::Dxgi::Common::{DXGI_FORMAT_B8G8R8A8_UNORM, DXGI_SAMPLE_DESC};
use windows::Win32::Graphics::Dxgi::{
    IDXGIDevice, IDXGIFactory2, IDXGISwapChain1, DXGI_MWA_NO_ALT_ENTER, DXGI_PRESENT,
    DXGI_STATUS_OCCLUDED, DXGI_SWAP_CHAIN_DESC1, DXGI_SWAP_CHAIN_FLAG,
    DXGI_SWAP_EFFECT_FLIP_SEQUENTIAL, DXGI_USAGE_RENDER_TARGET_OUTPUT,
};
use windows::Win32::UI::WindowsAndMessaging::{GetClientRect, WM_USER};

/// Window message the factory posts on occlusion status changes.
pub const OCCLUSION_STATUS_MSG: u32 = WM_USER;

const BUFFER_COUNT: u32 = 2;

pub struct PresentationSurface {
    device: ID3D11Device,
    context: ID3D11DeviceContext,
    swap_chain: IDXGISwapChain1,
    factory: IDXGIFactory2,
    rtv: Option<ID3D11RenderTargetView>,
    hwnd: HWND,
    occlusion_cookie: u32,
    needs_resize: Arc<AtomicBool>,
    width: u32,
    height: u32,
}

fn client_size(hwnd: HWND) -> PresentResult<(u32, u32)> {
    let mut rect = RECT::default();
    unsafe { GetClientRect(hwnd, &mut rect) }
        .map_err(|e| PresentError::device("querying window client area", e))?;
    Ok((
        (rect.right - rect.left).max(0) as u32,
        (rect.bottom - rect.top).max(0) as u32,
    ))
}

impl PresentationSurface {
    pub fn new(
        device: &ID3D11Device,
        context: &ID3D11DeviceContext,
        hwnd: HWND,
    ) -> PresentResult<Self> {
        let dxgi_device: IDXGIDevice = device
            .cast()
            .map_err(|e| PresentError::device("querying DXGI device", e))?;
        let adapter = unsafe { dxgi_device.GetAdapter() }
            .map_err(|e| PresentError::device("querying DXGI adapter", e))?;
        let factory: IDXGIFactory2 = unsafe { adapter.GetParent() }
            .map_err(|e| PresentError::device("querying DXGI factory", e))?;

        let occlusion_cookie =
            unsafe { factory.RegisterOcclusionStatusWindow(hwnd, OCCLUSION_STATUS_MSG) }
                .map_err(|e| PresentError::device("registering occlusion status window", e))?;

        let (width, height) = client_size(hwnd)?;

        let desc = DXGI_SWAP_CHAIN_DESC1 {
            Width: width,
            Height: height,
            Format: DXGI_FORMAT_B8G8R8A8_UNORM,
            SampleDesc: DXGI_SAMPLE_DESC { Count: 1, Quality: 0 },
            BufferUsage: DXGI_USAGE_RENDER_TARGET_OUTPUT,
            BufferCount: BUFFER_COUNT,
            SwapEffect: DXGI_SWAP_EFFECT_FLIP_SEQUENTIAL,
            ..Default::default()
        };

        let swap_chain = unsafe { factory.CreateSwapChainForHwnd(device, hwnd, &desc, None, None) }
            .map_err(|e| PresentError::device("creating window swapchain", e))?;

        // Fullscreen transitions go through the exclusive session instead.
        unsafe { factory.MakeWindowAssociation(hwnd, DXGI_MWA_NO_ALT_ENTER) }
            .map_err(|e| PresentError::device("configuring window association", e))?;

        let mut surface = Self {
            device: device.clone(),
            context: context.clone(),
            swap_chain,
            factory,
            rtv: None,
            hwnd,
            occlusion_cookie,
            needs_resize: Arc::new(AtomicBool::new(false)),
            width,
            height,
        };
        surface.make_rtv()?;
        surface.set_viewport();
        Ok(surface)
    }

    /// Flag shared with the window layer; its message handler stores into
    /// it, the render thread swaps it at tick start.
    pub fn resize_signal(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.needs_resize)
    }

    pub fn notify_resize(&self) {
        self.needs_resize.store(true, Ordering::Release);
    }

    /// Rebuild the target if a resize notification arrived since the last
    /// tick. Called at the start of every draw; failure is fatal for the
    /// session.
    pub fn apply_pending_resize(&mut self) -> PresentResult<()> {
        if !self.needs_resize.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        self.rebuild()
    }

    fn rebuild(&mut self) -> PresentResult<()> {
        // The view holds a reference on the backbuffer; it must go before
        // the buffers can resize in place.
        self.rtv = None;

        let (width, height) = client_size(self.hwnd)?;
        unsafe {
            self.swap_chain.ResizeBuffers(
                BUFFER_COUNT,
                width,
                height,
                DXGI_FORMAT_B8G8R8A8_UNORM,
                DXGI_SWAP_CHAIN_FLAG(0),
            )
        }
        .map_err(|e| PresentError::device("resizing swapchain buffers", e))?;

        self.width = width;
        self.height = height;
        self.make_rtv()?;
        self.set_viewport();
        crate::log_info!("presentation target resized to {}x{}", width, height);
        Ok(())
    }

    fn make_rtv(&mut self) -> PresentResult<()> {
        let back_buffer: ID3D11Texture2D = unsafe { self.swap_chain.GetBuffer(0) }
            .map_err(|e| PresentError::device("querying swapchain backbuffer", e))?;

        let mut rtv: Option<ID3D11RenderTargetView> = None;
        unsafe {
            self.device
                .CreateRenderTargetView(&back_buffer, None, Some(&mut rtv))
        }
        .map_err(|e| PresentError::device("creating render target view", e))?;

        self.rtv = Some(created(rtv, "creating render target view")?);
        Ok(())
    }

    fn set_viewport(&self) {
        let viewport = D3D11_VIEWPORT {
            TopLeftX: 0.0,
            TopLeftY: 0.0,
            Width: self.width as f32,
            Height: self.height as f32,
            MinDepth: 0.0,
            MaxDepth: 1.0,
        };
        unsafe { self.context.RSSetViewports(Some(&[viewport])) };
    }

    pub fn render_target(&self) -> PresentResult<&ID3D11RenderTargetView> {
        self.rtv.as_ref().ok_or(PresentError::Graphics {
            context: "render target view not built",
            source: windows::core::Error::from(E_FAIL),
        })
    }

    /// Flip the composed frame to the window. `Occluded` is a status, not
    /// an error: the caller keeps ticking, possibly throttled.
    pub fn present(&self, vsync: bool) -> PresentResult<FrameStatus> {
        let interval = if vsync { 1 } else { 0 };
        let hr = unsafe { self.swap_chain.Present(interval, DXGI_PRESENT(0)) };

        if hr == DXGI_STATUS_OCCLUDED {
            return Ok(FrameStatus::Occluded);
        }
        if hr.is_err() {
            return Err(PresentError::device(
                "presenting frame",
                windows::core::Error::from(hr),
            ));
        }
        Ok(FrameStatus::Presented)
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

impl Drop for PresentationSurface {
    fn drop(&mut self) {
        if self.occlusion_cookie != 0 {
            unsafe { self.factory.UnregisterOcclusionStatus(self.occlusion_cookie) };
        }
    }
}
