use crate::context::PackageContext;
use crate::task::{BackgroundTask, Polled};
use ferry_client::ClientError;
use ferry_core::naming;
use ferry_core::operation::{AsyncOperation, OperationBase, OperationSystem};
use std::rc::Rc;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Steps {
    None,
    DownloadPackageVersion,
    CheckPackageVersion,
    Done,
}

/// Asks the host for the latest package version.
///
/// Outside host mode the version of the active manifest is reported.
pub struct UpdatePackageVersionOperation {
    base: OperationBase,
    steps: Steps,
    context: Rc<PackageContext>,
    url: String,
    request: Option<BackgroundTask<Result<String, ClientError>>>,
    package_version: String,
}

impl UpdatePackageVersionOperation {
    pub fn new(context: Rc<PackageContext>) -> Self {
        Self {
            base: OperationBase::default(),
            steps: Steps::None,
            context,
            url: String::new(),
            request: None,
            package_version: String::new(),
        }
    }

    pub fn package_version(&self) -> &str {
        &self.package_version
    }

    fn request_url(&self) -> Option<String> {
        let file_name = naming::package_version_file_name(self.context.package_name());
        let url = self.context.next_request_url(&file_name).ok()?;
        if self.context.params().append_time_ticks {
            Some(format!("{url}?{}", chrono::Utc::now().timestamp_millis()))
        } else {
            Some(url)
        }
    }
}

impl AsyncOperation for UpdatePackageVersionOperation {
    fn base(&self) -> &OperationBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut OperationBase {
        &mut self.base
    }

    fn on_start(&mut self, _system: &OperationSystem) {
        if self.context.hosts().is_some() {
            self.steps = Steps::DownloadPackageVersion;
            return;
        }

        if let Some(manifest) = self.context.active_manifest() {
            self.package_version = manifest.human_readable_version.clone();
        }
        self.steps = Steps::Done;
        self.base.succeed();
    }

    fn on_update(&mut self, _system: &OperationSystem) {
        if self.steps == Steps::DownloadPackageVersion {
            let Some(url) = self.request_url() else {
                self.steps = Steps::Done;
                self.base.fail("Package has no remote host");
                return;
            };
            info!("Beginning to request package version : {url}");
            let client = self.context.client().clone();
            let request_url = url.clone();
            self.request = Some(BackgroundTask::spawn(self.context.runtime(), async move {
                client.fetch_text(&request_url).await
            }));
            self.url = url;
            self.steps = Steps::CheckPackageVersion;
        }

        if self.steps == Steps::CheckPackageVersion {
            let Some(request) = self.request.as_mut() else {
                return;
            };
            let result = match request.poll() {
                Polled::Pending => return,
                Polled::Ready(result) => result.map_err(|e| e.to_string()),
                Polled::Lost => Err("Request task ended without a result".to_string()),
            };
            self.request = None;
            self.steps = Steps::Done;

            match result {
                Ok(text) if text.trim().is_empty() => {
                    self.base.fail(format!("Package version is empty : {}", self.url));
                }
                Ok(text) => {
                    self.package_version = text.trim().to_string();
                    self.base.succeed();
                }
                Err(e) => self.base.fail(e),
            }
        }
    }
}
