use crate::error::RuntimeError;
use ferry_fs::{VerifierKind, VerifyLevel};
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

/// Lower bound the runtime applies to the scheduler time slice.
pub const MIN_OPERATION_TIME_SLICE: Duration = Duration::from_millis(30);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayMode {
    /// Read the manifest from disk and load straight from the asset root.
    /// Nothing is downloaded.
    EditorSimulate {
        manifest_path: PathBuf,
        asset_root: PathBuf,
    },
    /// Built-in content only.
    Offline,
    /// Remote updates from a main and a fallback host.
    Host {
        default_host: String,
        fallback_host: String,
    },
}

impl PlayMode {
    pub fn name(&self) -> &'static str {
        match self {
            PlayMode::EditorSimulate { .. } => "editor simulate",
            PlayMode::Offline => "offline",
            PlayMode::Host { .. } => "host",
        }
    }
}

#[derive(Debug, Clone)]
pub struct InitializeParameters {
    pub package_name: String,
    pub play_mode: PlayMode,
    /// Sandbox root. Each package gets its own directory below.
    pub cache_root: PathBuf,
    /// Built-in content shipped next to the application.
    pub buildin_root: PathBuf,
    pub operation_max_time_slice: Duration,
    /// Providers that may be loading at the same time.
    pub asset_loading_max_number: usize,
    /// Bundles at least this large resume partial downloads.
    pub breakpoint_resume_file_size: u64,
    pub verify_level: VerifyLevel,
    pub verifier_kind: VerifierKind,
    /// Wait between two download attempts.
    pub retry_delay: Duration,
    pub request_timeout: Duration,
    pub location_to_lower: bool,
    /// Append `?{unix millis}` to package version requests.
    pub append_time_ticks: bool,
    /// Retries of raw file and asset bundle downloads.
    pub download_failed_try_again: usize,
}

impl Default for InitializeParameters {
    fn default() -> Self {
        Self {
            package_name: "DefaultPackage".to_string(),
            play_mode: PlayMode::Offline,
            cache_root: PathBuf::from("./ferry_cache"),
            buildin_root: PathBuf::from("./buildin"),
            operation_max_time_slice: Duration::MAX,
            asset_loading_max_number: usize::MAX,
            breakpoint_resume_file_size: u64::MAX,
            verify_level: VerifyLevel::High,
            verifier_kind: VerifierKind::Auto,
            retry_delay: Duration::from_millis(500),
            request_timeout: Duration::from_secs(60),
            location_to_lower: false,
            append_time_ticks: false,
            download_failed_try_again: 3,
        }
    }
}

impl InitializeParameters {
    /// Rejects unusable values and clamps the ones with a lower bound.
    pub(crate) fn validated(mut self) -> Result<Self, RuntimeError> {
        if self.package_name.trim().is_empty() {
            return Err(RuntimeError::InvalidParameters("package name is empty".into()));
        }
        if let PlayMode::Host {
            default_host,
            fallback_host,
        } = &self.play_mode
        {
            if default_host.is_empty() || fallback_host.is_empty() {
                return Err(RuntimeError::InvalidParameters("host url is empty".into()));
            }
        }

        if self.operation_max_time_slice < MIN_OPERATION_TIME_SLICE {
            warn!(
                "Operation max time slice {:?} is below the minimum, using {:?}",
                self.operation_max_time_slice, MIN_OPERATION_TIME_SLICE
            );
            self.operation_max_time_slice = MIN_OPERATION_TIME_SLICE;
        }
        if self.asset_loading_max_number < 1 {
            warn!("Asset loading max number must be at least 1");
            self.asset_loading_max_number = 1;
        }
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamps_and_rejects() {
        let params = InitializeParameters {
            operation_max_time_slice: Duration::from_millis(1),
            asset_loading_max_number: 0,
            ..Default::default()
        }
        .validated()
        .unwrap();
        assert_eq!(params.operation_max_time_slice, MIN_OPERATION_TIME_SLICE);
        assert_eq!(params.asset_loading_max_number, 1);

        let empty = InitializeParameters {
            package_name: " ".into(),
            ..Default::default()
        };
        assert!(matches!(empty.validated(), Err(RuntimeError::InvalidParameters(_))));

        let hostless = InitializeParameters {
            play_mode: PlayMode::Host { default_host: String::new(), fallback_host: "x".into() },
            ..Default::default()
        };
        assert!(hostless.validated().is_err());
    }
}
