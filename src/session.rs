// Top-level presentation session: owns the canvas, the windowed target
// and the compositor, and exposes the exclusive path beside them.

use crate::canvas::SharedCanvas;
use crate::compositor::FrameCompositor;
use crate::error::{ExclusiveError, ExclusiveResult, FrameStatus, PresentResult};
use crate::exclusive::{DxgiDirectDisplay, ExclusiveDisplaySession};
use crate::output::{select_outputs, Bounds};
use crate::pointer::PointerState;
use crate::surface::PresentationSurface;
use windows::Win32::Foundation::{HANDLE, HWND};
use windows::Win32::Graphics::Direct3D11::{ID3D11Device, ID3D11DeviceContext};

#[derive(Debug, Clone, Copy)]
pub struct SessionOptions {
    pub acquire_timeout_ms: u32,
    pub vsync: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            acquire_timeout_ms: 100,
            vsync: true,
        }
    }
}

pub struct OutputSession {
    device: ID3D11Device,
    context: ID3D11DeviceContext,
    compositor: FrameCompositor,
    surface: PresentationSurface,
    canvas: SharedCanvas,
    output_count: usize,
    desktop_bounds: Bounds,
    exclusive: Option<ExclusiveDisplaySession<DxgiDirectDisplay>>,
}

impl OutputSession {
    /// Build the windowed presentation path: enumerate the requested
    /// outputs, allocate the shared canvas spanning them, and stand up
    /// the swapchain target plus draw pipeline.
    ///
    /// `NoOutputs` is recoverable (topology transition; retry after a
    /// delay) and `CanvasTooLarge` asks for a narrower output selection;
    /// everything else is fatal for the session.
    pub fn init_output(
        device: &ID3D11Device,
        context: &ID3D11DeviceContext,
        window: HWND,
        single_output: Option<usize>,
        options: SessionOptions,
    ) -> PresentResult<Self> {
        let selection = select_outputs(device, single_output)?;
        let canvas = SharedCanvas::new(device, &selection.bounds, selection.count)?;
        let surface = PresentationSurface::new(device, context, window)?;
        let compositor =
            FrameCompositor::new(device, context, options.acquire_timeout_ms, options.vsync)?;

        crate::log_info!(
            "output session ready: {} output(s), canvas {}x{}",
            selection.count,
            canvas.width(),
            canvas.height()
        );

        Ok(Self {
            device: device.clone(),
            context: context.clone(),
            compositor,
            surface,
            canvas,
            output_count: selection.count,
            desktop_bounds: selection.bounds,
            exclusive: None,
        })
    }

    /// Compose and present one frame. Timeouts and occlusion come back as
    /// success-shaped statuses; errors are session-ending and must reach
    /// the owner undamped.
    pub fn update_frame(&mut self, pointer: &PointerState) -> PresentResult<FrameStatus> {
        self.compositor
            .compose(&self.canvas, &mut self.surface, pointer)
    }

    /// Handle other processes can open to map the shared canvas.
    pub fn shared_handle(&self) -> PresentResult<HANDLE> {
        self.canvas.shared_handle()
    }

    /// Asynchronous resize notification; the rebuild happens lazily at
    /// the start of the next tick.
    pub fn on_resize(&self) {
        self.surface.notify_resize();
    }

    /// Flag for the window layer to store resize notifications into.
    pub fn resize_signal(&self) -> std::sync::Arc<std::sync::atomic::AtomicBool> {
        self.surface.resize_signal()
    }

    /// Recreate the canvas after an output topology change, optionally
    /// with a narrower output selection.
    pub fn recreate_canvas(&mut self, single_output: Option<usize>) -> PresentResult<()> {
        let selection = select_outputs(&self.device, single_output)?;
        self.canvas = SharedCanvas::new(&self.device, &selection.bounds, selection.count)?;
        self.output_count = selection.count;
        self.desktop_bounds = selection.bounds;
        crate::log_info!(
            "canvas recreated: {} output(s), {}x{}",
            selection.count,
            self.canvas.width(),
            self.canvas.height()
        );
        Ok(())
    }

    pub fn output_count(&self) -> usize {
        self.output_count
    }

    pub fn desktop_bounds(&self) -> Bounds {
        self.desktop_bounds
    }

    /// Acquire an exclusive display and build its surface ring.
    pub fn init_exclusive(&mut self, display_index: usize, mode_index: usize) -> ExclusiveResult<()> {
        let backend = DxgiDirectDisplay::new(&self.device, &self.context);
        let mut session = ExclusiveDisplaySession::new(backend);
        session.init(display_index, mode_index)?;
        self.exclusive = Some(session);
        Ok(())
    }

    /// Queue the ring surface at `buffer_index` for scanout; the caller
    /// owns the rotation policy.
    pub fn present_exclusive(&mut self, buffer_index: usize) -> ExclusiveResult<()> {
        match &mut self.exclusive {
            Some(session) => session.present(buffer_index),
            None => Err(ExclusiveError::NotAcquired),
        }
    }

    /// Relinquish the exclusive display. Safe to call during teardown
    /// regardless of how far acquisition got.
    pub fn release_exclusive(&mut self) -> ExclusiveResult<()> {
        match &mut self.exclusive {
            Some(session) => session.release(),
            None => Ok(()),
        }
    }
}
