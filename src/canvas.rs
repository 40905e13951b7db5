// The shared desktop canvas and its cross-process lock.
//
// Capture threads (possibly in other processes, via the shared handle)
// blit into this one texture; the compositor reads it back out. The
// keyed mutex embedded in the texture is the only synchronization
// between them.

use crate::d3d::created;
use crate::error::{PresentError, PresentResult};
use crate::output::Bounds;
use windows::core::Interface;
use windows::Win32::Foundation::HANDLE;
use windows::Win32::Graphics::Direct3D11::{
    ID3D11Device, ID3D11Texture2D, D3D11_BIND_RENDER_TARGET, D3D11_BIND_SHADER_RESOURCE,
    D3D11_RESOURCE_MISC_SHARED_KEYEDMUTEX, D3D11_TEXTURE2D_DESC, D3D11_USAGE_DEFAULT,
};
use windows::Win32::Graphics::Dxgi::Common::{DXGI_FORMAT_B8G8R8A8_UNORM, DXGI_SAMPLE_DESC};
use windows::Win32::Graphics::Dxgi::{IDXGIKeyedMutex, IDXGIResource};

/// Key the capture side acquires with and the compositor releases with.
pub const KEY_CAPTURE: u64 = 0;
/// Key the compositor acquires with and the capture side releases with.
pub const KEY_COMPOSE: u64 = 1;

/// `WAIT_TIMEOUT` as an HRESULT. A timed-out `AcquireSync` is a success
/// status code, so the generated `Result` signature cannot surface it.
const HR_WAIT_TIMEOUT: windows::core::HRESULT = windows::core::HRESULT(0x0000_0102);

pub struct SharedCanvas {
    texture: ID3D11Texture2D,
    keyed_mutex: IDXGIKeyedMutex,
    width: u32,
    height: u32,
}

impl SharedCanvas {
    /// Allocate the canvas sized to the union of the selected outputs.
    ///
    /// The GPU always supports a texture the size of any single output,
    /// but a rectangle spanning several outputs can exceed its limit —
    /// that failure is reported as `CanvasTooLarge` so the caller can
    /// retry with a narrower selection.
    pub fn new(device: &ID3D11Device, bounds: &Bounds, output_count: usize) -> PresentResult<Self> {
        let desc = D3D11_TEXTURE2D_DESC {
            Width: bounds.width(),
            Height: bounds.height(),
            MipLevels: 1,
            ArraySize: 1,
            Format: DXGI_FORMAT_B8G8R8A8_UNORM,
            SampleDesc: DXGI_SAMPLE_DESC { Count: 1, Quality: 0 },
            Usage: D3D11_USAGE_DEFAULT,
            BindFlags: (D3D11_BIND_RENDER_TARGET.0 | D3D11_BIND_SHADER_RESOURCE.0) as u32,
            CPUAccessFlags: 0,
            MiscFlags: D3D11_RESOURCE_MISC_SHARED_KEYEDMUTEX.0 as u32,
        };

        let mut texture: Option<ID3D11Texture2D> = None;
        if let Err(e) = unsafe { device.CreateTexture2D(&desc, None, Some(&mut texture)) } {
            if output_count > 1 {
                crate::log_warn!(
                    "canvas allocation failed spanning {} outputs ({}x{}): {:?}",
                    output_count,
                    bounds.width(),
                    bounds.height(),
                    e
                );
                return Err(PresentError::CanvasTooLarge);
            }
            return Err(PresentError::device("creating shared canvas texture", e));
        }
        let texture = created(texture, "creating shared canvas texture")?;

        let keyed_mutex: IDXGIKeyedMutex = texture
            .cast()
            .map_err(|e| PresentError::device("querying canvas keyed mutex", e))?;

        Ok(Self {
            texture,
            keyed_mutex,
            width: bounds.width(),
            height: bounds.height(),
        })
    }

    /// Wait up to `timeout_ms` for exclusive access to the canvas.
    ///
    /// `Ok(None)` means a capture thread still holds it — the expected
    /// contended outcome; skip the tick, don't spin. The returned guard
    /// releases on drop, on every exit path, so the canvas can never be
    /// left locked by an error return. A timed-out call produces no guard
    /// and therefore nothing to release.
    pub fn acquire(&self, timeout_ms: u32) -> PresentResult<Option<CanvasGuard<'_>>> {
        // Raw vtable call: the generated AcquireSync wrapper folds every
        // success HRESULT into Ok(()), hiding WAIT_TIMEOUT.
        let hr = unsafe {
            (Interface::vtable(&self.keyed_mutex).AcquireSync)(
                Interface::as_raw(&self.keyed_mutex),
                KEY_COMPOSE,
                timeout_ms,
            )
        };

        if hr == HR_WAIT_TIMEOUT {
            return Ok(None);
        }
        if hr.is_err() {
            return Err(PresentError::device(
                "acquiring canvas lock",
                windows::core::Error::from(hr),
            ));
        }
        Ok(Some(CanvasGuard {
            keyed_mutex: &self.keyed_mutex,
        }))
    }

    /// OS-level handle other processes can open to map this canvas.
    pub fn shared_handle(&self) -> PresentResult<HANDLE> {
        let resource: IDXGIResource = self
            .texture
            .cast()
            .map_err(|e| PresentError::device("querying canvas shared resource", e))?;
        unsafe { resource.GetSharedHandle() }
            .map_err(|e| PresentError::device("querying canvas shared handle", e))
    }

    pub fn texture(&self) -> &ID3D11Texture2D {
        &self.texture
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }
}

/// Exclusive access to the canvas for the duration of one compose pass.
/// The underlying mutex is not reentrant: acquiring again while a guard
/// is live deadlocks, so exactly one guard may exist per tick.
pub struct CanvasGuard<'a> {
    keyed_mutex: &'a IDXGIKeyedMutex,
}

impl Drop for CanvasGuard<'_> {
    fn drop(&mut self) {
        // Hand the canvas back to the capture side. A failed release means
        // the device is already gone; the next acquire will surface it.
        if let Err(e) = unsafe { self.keyed_mutex.ReleaseSync(KEY_CAPTURE) } {
            crate::log_error!("failed to release canvas lock: {:?}", e);
        }
    }
}
