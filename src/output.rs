// Adapter output enumeration and desktop bounds.

use crate::error::{PresentError, PresentResult};

/// Desktop-space rectangle. Coordinates may be negative for outputs left
/// of or above the primary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bounds {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl Bounds {
    pub fn width(&self) -> u32 {
        (self.right - self.left).max(0) as u32
    }

    pub fn height(&self) -> u32 {
        (self.bottom - self.top).max(0) as u32
    }

    pub fn union(&self, other: &Bounds) -> Bounds {
        Bounds {
            left: self.left.min(other.left),
            top: self.top.min(other.top),
            right: self.right.max(other.right),
            bottom: self.bottom.max(other.bottom),
        }
    }
}

/// Bounding rectangle spanning every given output rectangle. `None` when
/// no outputs were supplied.
pub fn union_bounds(rects: impl IntoIterator<Item = Bounds>) -> Option<Bounds> {
    rects.into_iter().reduce(|acc, r| acc.union(&r))
}

#[derive(Debug, Clone, Copy)]
pub struct OutputSelection {
    pub count: usize,
    pub bounds: Bounds,
}

#[cfg(windows)]
mod enumerate {
    use super::*;
    use windows::core::Interface;
    use windows::Win32::Graphics::Direct3D11::ID3D11Device;
    use windows::Win32::Graphics::Dxgi::{IDXGIAdapter, IDXGIDevice, IDXGIOutput};

    fn output_bounds(output: &IDXGIOutput) -> PresentResult<Bounds> {
        let desc = unsafe { output.GetDesc() }
            .map_err(|e| PresentError::device("querying output description", e))?;
        let rc = desc.DesktopCoordinates;
        Ok(Bounds {
            left: rc.left,
            top: rc.top,
            right: rc.right,
            bottom: rc.bottom,
        })
    }

    fn adapter_of(device: &ID3D11Device) -> PresentResult<IDXGIAdapter> {
        let dxgi_device: IDXGIDevice = device
            .cast()
            .map_err(|e| PresentError::device("querying DXGI device", e))?;
        unsafe { dxgi_device.GetAdapter() }
            .map_err(|e| PresentError::device("querying DXGI adapter", e))
    }

    /// Walk the adapter's outputs and produce the count plus bounding
    /// rectangle of the selection. The walk is repeated from scratch on
    /// every call: output topology can change between retries, so a stale
    /// count must never be reused.
    pub fn select_outputs(
        device: &ID3D11Device,
        single: Option<usize>,
    ) -> PresentResult<OutputSelection> {
        let adapter = adapter_of(device)?;

        if let Some(index) = single {
            let output = unsafe { adapter.EnumOutputs(index as u32) }
                .map_err(|_| PresentError::NoOutputs)?;
            return Ok(OutputSelection {
                count: 1,
                bounds: output_bounds(&output)?,
            });
        }

        let mut rects = Vec::new();
        let mut index = 0u32;
        loop {
            match unsafe { adapter.EnumOutputs(index) } {
                Ok(output) => rects.push(output_bounds(&output)?),
                // DXGI_ERROR_NOT_FOUND ends the walk; anything else is a
                // real failure mid-enumeration and the walk restarts on
                // the caller's next retry anyway.
                Err(_) => break,
            }
            index += 1;
        }

        match union_bounds(rects.iter().copied()) {
            Some(bounds) => Ok(OutputSelection {
                count: rects.len(),
                bounds,
            }),
            None => Err(PresentError::NoOutputs),
        }
    }
}

#[cfg(windows)]
pub use enumerate::select_outputs;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn union_spans_two_side_by_side_monitors() {
        let a = Bounds { left: 0, top: 0, right: 1920, bottom: 1080 };
        let b = Bounds { left: 1920, top: 0, right: 3840, bottom: 1080 };

        let union = union_bounds([a, b]).unwrap();
        assert_eq!(union, Bounds { left: 0, top: 0, right: 3840, bottom: 1080 });
        assert_eq!(union.width(), 3840);
        assert_eq!(union.height(), 1080);
    }

    #[test]
    fn union_handles_negative_coordinates() {
        let left_of_primary = Bounds { left: -2560, top: -400, right: 0, bottom: 1040 };
        let primary = Bounds { left: 0, top: 0, right: 1920, bottom: 1080 };

        let union = union_bounds([left_of_primary, primary]).unwrap();
        assert_eq!(union.left, -2560);
        assert_eq!(union.top, -400);
        assert_eq!(union.width(), 4480);
        assert_eq!(union.height(), 1480);
    }

    #[test]
    fn union_of_nothing_is_none() {
        assert_eq!(union_bounds([]), None);
    }
}
