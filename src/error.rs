use thiserror::Error;

/// Outcome of one presentation tick. All three variants are success-shaped:
/// a skipped or occluded tick keeps the session running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    /// The composed frame was handed to the display layer.
    Presented,
    /// Presented, but the output is currently not visible. The caller may
    /// throttle its tick rate while this persists; it must keep ticking.
    Occluded,
    /// A capture thread held the canvas past the acquire timeout. Nothing
    /// was drawn or presented this tick.
    SkippedBusy,
}

/// Errors raised by the windowed presentation path.
#[derive(Debug, Error)]
pub enum PresentError {
    /// Zero outputs were enumerated. The display topology is mid-transition
    /// (monitor hotplug, resolution change); retry after a short delay.
    #[error("no active outputs found (display topology in transition)")]
    NoOutputs,

    /// The canvas spanning every requested output exceeded what a single
    /// texture can hold on this device. Retry with a single output.
    #[error("combined desktop canvas exceeds the device's maximum texture size")]
    CanvasTooLarge,

    /// Output buffer allocation for a decoded pointer shape failed. Fatal
    /// for the current draw call, reported upward, never retried.
    #[error("failed to allocate pointer shape buffer ({width}x{height})")]
    PointerAlloc { width: u32, height: u32 },

    /// The graphics device was removed or reset. Every GPU resource owned
    /// by the session is dead; tear down and reinitialize from scratch.
    #[cfg(windows)]
    #[error("graphics device lost while {context}")]
    DeviceLost {
        context: &'static str,
        #[source]
        source: windows::core::Error,
    },

    /// Any other device-level failure. Ends the session.
    #[cfg(windows)]
    #[error("{context}")]
    Graphics {
        context: &'static str,
        #[source]
        source: windows::core::Error,
    },
}

impl PresentError {
    /// Wrap a raw device error, separating device-removed conditions from
    /// generic failures so the owner knows whether the whole device (and
    /// everything created from it) must be rebuilt.
    #[cfg(windows)]
    pub fn device(context: &'static str, source: windows::core::Error) -> Self {
        use windows::Win32::Graphics::Dxgi::{
            DXGI_ERROR_ACCESS_LOST, DXGI_ERROR_DEVICE_HUNG, DXGI_ERROR_DEVICE_REMOVED,
            DXGI_ERROR_DEVICE_RESET, DXGI_ERROR_DRIVER_INTERNAL_ERROR,
        };

        let lost = matches!(
            source.code(),
            c if c == DXGI_ERROR_DEVICE_REMOVED
                || c == DXGI_ERROR_DEVICE_RESET
                || c == DXGI_ERROR_DEVICE_HUNG
                || c == DXGI_ERROR_DRIVER_INTERNAL_ERROR
                || c == DXGI_ERROR_ACCESS_LOST
        );
        if lost {
            Self::DeviceLost { context, source }
        } else {
            Self::Graphics { context, source }
        }
    }

    /// True when recovery requires rebuilding the device and every resource
    /// created from it, rather than just the current session objects.
    pub fn is_device_lost(&self) -> bool {
        #[cfg(windows)]
        {
            matches!(self, Self::DeviceLost { .. })
        }
        #[cfg(not(windows))]
        {
            false
        }
    }

    /// True for the expected, retry-after-delay conditions.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::NoOutputs | Self::CanvasTooLarge)
    }
}

pub type PresentResult<T> = Result<T, PresentError>;

/// Errors raised by the exclusive-display path.
#[derive(Debug, Error)]
pub enum ExclusiveError {
    #[error("display index {requested} out of range ({available} exclusive displays found)")]
    NoSuchDisplay { requested: usize, available: usize },

    #[error("mode index {requested} out of range ({available} modes supported)")]
    NoSuchMode { requested: usize, available: usize },

    #[error("present index {requested} out of range (surface ring holds {ring})")]
    NoSuchSurface { requested: usize, ring: usize },

    #[error("exclusive display session is not acquired")]
    NotAcquired,

    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

pub type ExclusiveResult<T> = Result<T, ExclusiveError>;
