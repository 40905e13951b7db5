// Device-creation glue. The rest of the crate treats the device and
// context as opaque pre-built handles.

use crate::error::{PresentError, PresentResult};
use windows::Win32::Foundation::E_FAIL;
use windows::Win32::Graphics::Direct3D::{
    D3D_DRIVER_TYPE_HARDWARE, D3D_DRIVER_TYPE_REFERENCE, D3D_DRIVER_TYPE_WARP,
    D3D_FEATURE_LEVEL_10_0, D3D_FEATURE_LEVEL_10_1, D3D_FEATURE_LEVEL_11_0, D3D_FEATURE_LEVEL_9_1,
};
use windows::Win32::Graphics::Direct3D11::{
    D3D11CreateDevice, ID3D11Device, ID3D11DeviceContext, D3D11_CREATE_DEVICE_BGRA_SUPPORT,
    D3D11_SDK_VERSION,
};

/// Unwrap a COM out-parameter that the preceding successful call is
/// documented to have filled in.
pub(crate) fn created<T>(value: Option<T>, context: &'static str) -> PresentResult<T> {
    value.ok_or(PresentError::Graphics {
        context,
        source: windows::core::Error::from(E_FAIL),
    })
}

/// Create a device, walking down the driver types until one succeeds.
pub fn create_device() -> PresentResult<(ID3D11Device, ID3D11DeviceContext)> {
    let driver_types = [
        D3D_DRIVER_TYPE_HARDWARE,
        D3D_DRIVER_TYPE_WARP,
        D3D_DRIVER_TYPE_REFERENCE,
    ];
    let feature_levels = [
        D3D_FEATURE_LEVEL_11_0,
        D3D_FEATURE_LEVEL_10_1,
        D3D_FEATURE_LEVEL_10_0,
        D3D_FEATURE_LEVEL_9_1,
    ];

    let mut last_error = None;
    for driver_type in driver_types {
        let mut device: Option<ID3D11Device> = None;
        let mut context: Option<ID3D11DeviceContext> = None;

        let result = unsafe {
            D3D11CreateDevice(
                None,
                driver_type,
                None,
                D3D11_CREATE_DEVICE_BGRA_SUPPORT,
                Some(&feature_levels),
                D3D11_SDK_VERSION,
                Some(&mut device),
                None,
                Some(&mut context),
            )
        };

        match result {
            Ok(()) => {
                let device = created(device, "creating D3D11 device")?;
                let context = created(context, "creating D3D11 device context")?;
                return Ok((device, context));
            }
            Err(e) => last_error = Some(e),
        }
    }

    Err(PresentError::device(
        "creating D3D11 device",
        last_error.unwrap_or_else(|| windows::core::Error::from(E_FAIL)),
    ))
}
