// One presentation tick: lock the canvas, draw it into the window
// target, overlay the decoded cursor, unlock, present.

use crate::canvas::SharedCanvas;
use crate::d3d::created;
use crate::error::{FrameStatus, PresentError, PresentResult};
use crate::pipeline::{vertex_buffer, RenderPipeline};
use crate::pointer::{
    self, clip_to_canvas, pointer_quad, Placement, PointerShape, PointerState, ShapeKind, Vertex,
    BYTES_PER_PIXEL, FULL_TARGET_QUAD,
};
use crate::surface::PresentationSurface;
use windows::Win32::Graphics::Direct3D::D3D_PRIMITIVE_TOPOLOGY_TRIANGLELIST;
use windows::Win32::Graphics::Direct3D11::{
    ID3D11Device, ID3D11DeviceContext, ID3D11ShaderResourceView, ID3D11Texture2D,
    D3D11_BIND_SHADER_RESOURCE, D3D11_BOX, D3D11_CPU_ACCESS_READ, D3D11_MAPPED_SUBRESOURCE,
    D3D11_MAP_READ, D3D11_SUBRESOURCE_DATA, D3D11_TEXTURE2D_DESC, D3D11_USAGE_DEFAULT,
    D3D11_USAGE_STAGING,
};
use windows::Win32::Graphics::Dxgi::Common::{DXGI_FORMAT_B8G8R8A8_UNORM, DXGI_SAMPLE_DESC};

const BLEND_FACTOR: [f32; 4] = [0.0, 0.0, 0.0, 0.0];

pub struct FrameCompositor {
    device: ID3D11Device,
    context: ID3D11DeviceContext,
    pipeline: RenderPipeline,
    acquire_timeout_ms: u32,
    vsync: bool,
}

impl FrameCompositor {
    pub fn new(
        device: &ID3D11Device,
        context: &ID3D11DeviceContext,
        acquire_timeout_ms: u32,
        vsync: bool,
    ) -> PresentResult<Self> {
        Ok(Self {
            device: device.clone(),
            context: context.clone(),
            pipeline: RenderPipeline::new(device)?,
            acquire_timeout_ms,
            vsync,
        })
    }

    /// Run one tick against the shared canvas.
    ///
    /// A capture thread holding the canvas past the timeout is the normal
    /// contended case: the tick is skipped whole — no stale redraw, no
    /// present. The lock is released before presenting and on every error
    /// path out of the draw, so a failed tick can never starve the
    /// capture threads.
    pub fn compose(
        &self,
        canvas: &SharedCanvas,
        surface: &mut PresentationSurface,
        pointer: &PointerState,
    ) -> PresentResult<FrameStatus> {
        let Some(guard) = canvas.acquire(self.acquire_timeout_ms)? else {
            return Ok(FrameStatus::SkippedBusy);
        };

        let drawn = self.draw_locked(canvas, surface, pointer);
        drop(guard);
        drawn?;

        surface.present(self.vsync)
    }

    fn draw_locked(
        &self,
        canvas: &SharedCanvas,
        surface: &mut PresentationSurface,
        pointer: &PointerState,
    ) -> PresentResult<()> {
        surface.apply_pending_resize()?;

        self.draw_canvas(canvas, surface)?;

        if pointer.visible {
            if let Some(shape) = &pointer.shape {
                self.draw_pointer(canvas, surface, pointer, shape)?;
            }
        }
        Ok(())
    }

    /// Base layer: the whole canvas as one opaque quad, blending off.
    fn draw_canvas(
        &self,
        canvas: &SharedCanvas,
        surface: &PresentationSurface,
    ) -> PresentResult<()> {
        let mut srv: Option<ID3D11ShaderResourceView> = None;
        unsafe {
            self.device
                .CreateShaderResourceView(canvas.texture(), None, Some(&mut srv))
        }
        .map_err(|e| PresentError::device("creating canvas shader resource", e))?;
        let srv = created(srv, "creating canvas shader resource")?;

        self.draw_quad(surface, &srv, &FULL_TARGET_QUAD, false)
    }

    /// Cursor overlay: decode if needed, upload, draw with blending.
    fn draw_pointer(
        &self,
        canvas: &SharedCanvas,
        surface: &PresentationSurface,
        pointer: &PointerState,
        shape: &PointerShape,
    ) -> PresentResult<()> {
        let (placement, decoded) = match shape.kind {
            ShapeKind::Color => {
                // Geometry passes through untouched; the quad itself may
                // hang off the canvas edge and clips in the rasterizer.
                let placement = Placement {
                    left: pointer.x,
                    top: pointer.y,
                    width: shape.width as i32,
                    height: shape.height as i32,
                    skip_x: 0,
                    skip_y: 0,
                };
                (placement, None)
            }
            ShapeKind::Monochrome | ShapeKind::MaskedColor => {
                let placement = clip_to_canvas(
                    pointer.x,
                    pointer.y,
                    shape.width,
                    shape.logical_height(),
                    canvas.width(),
                    canvas.height(),
                );
                if placement.is_empty() {
                    return Ok(());
                }

                let desktop = self.copy_desktop_region(canvas, &placement)?;
                let pitch = placement.width as usize;
                let decoded = match shape.kind {
                    ShapeKind::Monochrome => {
                        pointer::decode_monochrome(shape, &placement, &desktop, pitch)?
                    }
                    _ => pointer::decode_masked_color(shape, &placement, &desktop, pitch)?,
                };
                (placement, Some(decoded))
            }
        };

        let texture = match &decoded {
            Some(pixels) => self.pointer_texture(
                placement.width as u32,
                placement.height as u32,
                pixels.as_ptr() as *const u8,
                placement.width as u32 * BYTES_PER_PIXEL as u32,
            )?,
            None => self.pointer_texture(
                shape.width,
                shape.height,
                shape.data.as_ptr(),
                shape.pitch,
            )?,
        };

        let mut srv: Option<ID3D11ShaderResourceView> = None;
        unsafe {
            self.device
                .CreateShaderResourceView(&texture, None, Some(&mut srv))
        }
        .map_err(|e| PresentError::device("creating pointer shader resource", e))?;
        let srv = created(srv, "creating pointer shader resource")?;

        let quad = pointer_quad(
            placement.left,
            placement.top,
            placement.width,
            placement.height,
            canvas.width(),
            canvas.height(),
        );

        self.draw_quad(surface, &srv, &quad, true)
    }

    fn pointer_texture(
        &self,
        width: u32,
        height: u32,
        data: *const u8,
        pitch: u32,
    ) -> PresentResult<ID3D11Texture2D> {
        let desc = D3D11_TEXTURE2D_DESC {
            Width: width,
            Height: height,
            MipLevels: 1,
            ArraySize: 1,
            Format: DXGI_FORMAT_B8G8R8A8_UNORM,
            SampleDesc: DXGI_SAMPLE_DESC { Count: 1, Quality: 0 },
            Usage: D3D11_USAGE_DEFAULT,
            BindFlags: D3D11_BIND_SHADER_RESOURCE.0 as u32,
            CPUAccessFlags: 0,
            MiscFlags: 0,
        };
        let init = D3D11_SUBRESOURCE_DATA {
            pSysMem: data as *const _,
            SysMemPitch: pitch,
            SysMemSlicePitch: 0,
        };

        let mut texture: Option<ID3D11Texture2D> = None;
        unsafe {
            self.device
                .CreateTexture2D(&desc, Some(&init), Some(&mut texture))
        }
        .map_err(|e| PresentError::device("creating pointer texture", e))?;
        created(texture, "creating pointer texture")
    }

    /// Pull the canvas pixels underneath the cursor back to the CPU so the
    /// mask decoders can combine them with the shape planes. Runs under
    /// the canvas lock.
    fn copy_desktop_region(
        &self,
        canvas: &SharedCanvas,
        placement: &Placement,
    ) -> PresentResult<Vec<u32>> {
        let width = placement.width as u32;
        let height = placement.height as u32;

        let desc = D3D11_TEXTURE2D_DESC {
            Width: width,
            Height: height,
            MipLevels: 1,
            ArraySize: 1,
            Format: DXGI_FORMAT_B8G8R8A8_UNORM,
            SampleDesc: DXGI_SAMPLE_DESC { Count: 1, Quality: 0 },
            Usage: D3D11_USAGE_STAGING,
            BindFlags: 0,
            CPUAccessFlags: D3D11_CPU_ACCESS_READ.0 as u32,
            MiscFlags: 0,
        };
        let mut staging: Option<ID3D11Texture2D> = None;
        unsafe { self.device.CreateTexture2D(&desc, None, Some(&mut staging)) }
            .map_err(|e| PresentError::device("creating pointer staging texture", e))?;
        let staging = created(staging, "creating pointer staging texture")?;

        let src_box = D3D11_BOX {
            left: placement.left as u32,
            top: placement.top as u32,
            front: 0,
            right: (placement.left + placement.width) as u32,
            bottom: (placement.top + placement.height) as u32,
            back: 1,
        };
        unsafe {
            self.context.CopySubresourceRegion(
                &staging,
                0,
                0,
                0,
                0,
                canvas.texture(),
                0,
                Some(&src_box),
            )
        };

        let mut mapped = D3D11_MAPPED_SUBRESOURCE::default();
        unsafe {
            self.context
                .Map(&staging, 0, D3D11_MAP_READ, 0, Some(&mut mapped))
        }
        .map_err(|e| PresentError::device("mapping pointer staging texture", e))?;

        let mut pixels = vec![0u32; width as usize * height as usize];
        let row_bytes = width as usize * BYTES_PER_PIXEL;
        for row in 0..height as usize {
            unsafe {
                std::ptr::copy_nonoverlapping(
                    (mapped.pData as *const u8).add(row * mapped.RowPitch as usize),
                    pixels.as_mut_ptr().add(row * width as usize) as *mut u8,
                    row_bytes,
                );
            }
        }

        unsafe { self.context.Unmap(&staging, 0) };
        Ok(pixels)
    }

    fn draw_quad(
        &self,
        surface: &PresentationSurface,
        srv: &ID3D11ShaderResourceView,
        vertices: &[Vertex; 6],
        blend: bool,
    ) -> PresentResult<()> {
        let buffer = vertex_buffer(&self.device, vertices)?;
        let rtv = surface.render_target()?;

        let stride = std::mem::size_of::<Vertex>() as u32;
        let offset = 0u32;

        unsafe {
            let ctx = &self.context;
            ctx.IASetInputLayout(&self.pipeline.input_layout);
            ctx.IASetVertexBuffers(0, 1, Some(&Some(buffer)), Some(&stride), Some(&offset));
            ctx.IASetPrimitiveTopology(D3D_PRIMITIVE_TOPOLOGY_TRIANGLELIST);
            if blend {
                ctx.OMSetBlendState(
                    Some(&self.pipeline.blend_state),
                    Some(&BLEND_FACTOR),
                    0xFFFF_FFFF,
                );
            } else {
                ctx.OMSetBlendState(None, Some(&BLEND_FACTOR), 0xFFFF_FFFF);
            }
            ctx.OMSetRenderTargets(Some(&[Some(rtv.clone())]), None);
            ctx.VSSetShader(&self.pipeline.vertex_shader, None);
            ctx.PSSetShader(&self.pipeline.pixel_shader, None);
            ctx.PSSetShaderResources(0, Some(&[Some(srv.clone())]));
            ctx.PSSetSamplers(0, Some(&[Some(self.pipeline.sampler.clone())]));
            ctx.Draw(6, 0);
        }
        Ok(())
    }
}
