// Quad-drawing pipeline objects, built once per device: shaders compiled
// from `shaders.hlsl`, input layout, linear sampler and the straight
// alpha blend state the cursor overlay draws with.

use crate::d3d::created;
use crate::error::{PresentError, PresentResult};
use crate::pointer::Vertex;
use windows::core::PCSTR;
use windows::Win32::Graphics::Direct3D::Fxc::{D3DCompile, D3DCOMPILE_ENABLE_STRICTNESS};
use windows::Win32::Graphics::Direct3D::ID3DBlob;
use windows::Win32::Graphics::Direct3D11::{
    ID3D11BlendState, ID3D11Buffer, ID3D11Device, ID3D11InputLayout, ID3D11PixelShader,
    ID3D11SamplerState, ID3D11VertexShader, D3D11_BIND_VERTEX_BUFFER, D3D11_BLEND_DESC,
    D3D11_BLEND_INV_SRC_ALPHA, D3D11_BLEND_ONE, D3D11_BLEND_OP_ADD, D3D11_BLEND_SRC_ALPHA,
    D3D11_BLEND_ZERO, D3D11_BUFFER_DESC, D3D11_COLOR_WRITE_ENABLE_ALL, D3D11_COMPARISON_NEVER,
    D3D11_FILTER_MIN_MAG_MIP_LINEAR, D3D11_INPUT_ELEMENT_DESC, D3D11_INPUT_PER_VERTEX_DATA,
    D3D11_RENDER_TARGET_BLEND_DESC, D3D11_SAMPLER_DESC, D3D11_SUBRESOURCE_DATA,
    D3D11_TEXTURE_ADDRESS_CLAMP, D3D11_USAGE_DEFAULT,
};
use windows::Win32::Graphics::Dxgi::Common::{DXGI_FORMAT_R32G32B32_FLOAT, DXGI_FORMAT_R32G32_FLOAT};

const SHADER_SOURCE: &str = include_str!("shaders.hlsl");

pub struct RenderPipeline {
    pub vertex_shader: ID3D11VertexShader,
    pub pixel_shader: ID3D11PixelShader,
    pub input_layout: ID3D11InputLayout,
    pub sampler: ID3D11SamplerState,
    pub blend_state: ID3D11BlendState,
}

impl RenderPipeline {
    pub fn new(device: &ID3D11Device) -> PresentResult<Self> {
        let vs_blob = compile_shader(SHADER_SOURCE, "VS_Main", "vs_5_0")?;
        let ps_blob = compile_shader(SHADER_SOURCE, "PS_Main", "ps_5_0")?;

        let vs_bytes = blob_bytes(&vs_blob);
        let ps_bytes = blob_bytes(&ps_blob);

        let mut vertex_shader: Option<ID3D11VertexShader> = None;
        unsafe { device.CreateVertexShader(vs_bytes, None, Some(&mut vertex_shader)) }
            .map_err(|e| PresentError::device("creating vertex shader", e))?;

        let mut pixel_shader: Option<ID3D11PixelShader> = None;
        unsafe { device.CreatePixelShader(ps_bytes, None, Some(&mut pixel_shader)) }
            .map_err(|e| PresentError::device("creating pixel shader", e))?;

        let input_elements = [
            D3D11_INPUT_ELEMENT_DESC {
                SemanticName: windows::core::s!("POSITION"),
                SemanticIndex: 0,
                Format: DXGI_FORMAT_R32G32B32_FLOAT,
                InputSlot: 0,
                AlignedByteOffset: 0,
                InputSlotClass: D3D11_INPUT_PER_VERTEX_DATA,
                InstanceDataStepRate: 0,
            },
            D3D11_INPUT_ELEMENT_DESC {
                SemanticName: windows::core::s!("TEXCOORD"),
                SemanticIndex: 0,
                Format: DXGI_FORMAT_R32G32_FLOAT,
                InputSlot: 0,
                AlignedByteOffset: 12,
                InputSlotClass: D3D11_INPUT_PER_VERTEX_DATA,
                InstanceDataStepRate: 0,
            },
        ];

        let mut input_layout: Option<ID3D11InputLayout> = None;
        unsafe { device.CreateInputLayout(&input_elements, vs_bytes, Some(&mut input_layout)) }
            .map_err(|e| PresentError::device("creating input layout", e))?;

        let sampler_desc = D3D11_SAMPLER_DESC {
            Filter: D3D11_FILTER_MIN_MAG_MIP_LINEAR,
            AddressU: D3D11_TEXTURE_ADDRESS_CLAMP,
            AddressV: D3D11_TEXTURE_ADDRESS_CLAMP,
            AddressW: D3D11_TEXTURE_ADDRESS_CLAMP,
            MipLODBias: 0.0,
            MaxAnisotropy: 1,
            ComparisonFunc: D3D11_COMPARISON_NEVER,
            BorderColor: [0.0, 0.0, 0.0, 0.0],
            MinLOD: 0.0,
            MaxLOD: f32::MAX,
        };
        let mut sampler: Option<ID3D11SamplerState> = None;
        unsafe { device.CreateSamplerState(&sampler_desc, Some(&mut sampler)) }
            .map_err(|e| PresentError::device("creating sampler state", e))?;

        // Straight (non-premultiplied) alpha; only the cursor draw enables it.
        let blend_desc = D3D11_BLEND_DESC {
            AlphaToCoverageEnable: false.into(),
            IndependentBlendEnable: false.into(),
            RenderTarget: [
                D3D11_RENDER_TARGET_BLEND_DESC {
                    BlendEnable: true.into(),
                    SrcBlend: D3D11_BLEND_SRC_ALPHA,
                    DestBlend: D3D11_BLEND_INV_SRC_ALPHA,
                    BlendOp: D3D11_BLEND_OP_ADD,
                    SrcBlendAlpha: D3D11_BLEND_ONE,
                    DestBlendAlpha: D3D11_BLEND_ZERO,
                    BlendOpAlpha: D3D11_BLEND_OP_ADD,
                    RenderTargetWriteMask: D3D11_COLOR_WRITE_ENABLE_ALL.0 as u8,
                },
                Default::default(),
                Default::default(),
                Default::default(),
                Default::default(),
                Default::default(),
                Default::default(),
                Default::default(),
            ],
        };
        let mut blend_state: Option<ID3D11BlendState> = None;
        unsafe { device.CreateBlendState(&blend_desc, Some(&mut blend_state)) }
            .map_err(|e| PresentError::device("creating blend state", e))?;

        Ok(Self {
            vertex_shader: created(vertex_shader, "creating vertex shader")?,
            pixel_shader: created(pixel_shader, "creating pixel shader")?,
            input_layout: created(input_layout, "creating input layout")?,
            sampler: created(sampler, "creating sampler state")?,
            blend_state: created(blend_state, "creating blend state")?,
        })
    }
}

/// Build a one-draw vertex buffer. Both quads are tiny and rebuilt per
/// draw because the cursor rectangle changes every frame.
pub fn vertex_buffer(device: &ID3D11Device, vertices: &[Vertex]) -> PresentResult<ID3D11Buffer> {
    let desc = D3D11_BUFFER_DESC {
        ByteWidth: std::mem::size_of_val(vertices) as u32,
        Usage: D3D11_USAGE_DEFAULT,
        BindFlags: D3D11_BIND_VERTEX_BUFFER.0 as u32,
        CPUAccessFlags: 0,
        MiscFlags: 0,
        StructureByteStride: 0,
    };
    let init = D3D11_SUBRESOURCE_DATA {
        pSysMem: vertices.as_ptr() as *const _,
        SysMemPitch: 0,
        SysMemSlicePitch: 0,
    };

    let mut buffer: Option<ID3D11Buffer> = None;
    unsafe { device.CreateBuffer(&desc, Some(&init), Some(&mut buffer)) }
        .map_err(|e| PresentError::device("creating quad vertex buffer", e))?;
    created(buffer, "creating quad vertex buffer")
}

fn blob_bytes(blob: &ID3DBlob) -> &[u8] {
    unsafe { std::slice::from_raw_parts(blob.GetBufferPointer() as *const u8, blob.GetBufferSize()) }
}

fn compile_shader(source: &str, entry_point: &str, target: &str) -> PresentResult<ID3DBlob> {
    let entry_cstr = std::ffi::CString::new(entry_point).expect("static entry point");
    let target_cstr = std::ffi::CString::new(target).expect("static target profile");

    let mut blob: Option<ID3DBlob> = None;
    let mut error_blob: Option<ID3DBlob> = None;

    let result = unsafe {
        D3DCompile(
            source.as_ptr() as *const _,
            source.len(),
            None,
            None,
            None,
            PCSTR(entry_cstr.as_ptr() as *const u8),
            PCSTR(target_cstr.as_ptr() as *const u8),
            D3DCOMPILE_ENABLE_STRICTNESS,
            0,
            &mut blob,
            Some(&mut error_blob),
        )
    };

    if let Err(e) = result {
        if let Some(error_blob) = error_blob {
            let message = String::from_utf8_lossy(blob_bytes(&error_blob)).into_owned();
            crate::log_error!("shader compilation failed: {}", message);
        }
        return Err(PresentError::device("compiling quad shaders", e));
    }

    created(blob, "compiling quad shaders")
}
