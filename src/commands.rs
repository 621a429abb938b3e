//! Remote command templates for the bootstrap steps.
//!
//! Each step executes a fixed shell string with explicit parameter slots,
//! rendered at call time. Keeping them in one place avoids ad hoc string
//! interpolation at the call sites.

use crate::config::{APP_PORT, HOST_PORT};

/// Container and image name on the remote host
pub const APP_NAME: &str = "app";

/// A parameterized remote operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteCommand {
    /// Install the container runtime via snap, restarting snapd first so it
    /// is ready to use on a freshly booted instance.
    InstallRuntime,
    /// Extract the pushed archive and build the container image.
    BuildImage,
    /// Remove any previous container of the same name and start a new one,
    /// publishing the app port and passing the per-instance number.
    StartContainer { instance_number: u32 },
}

impl RemoteCommand {
    /// Render the shell string for this command.
    pub fn render(&self) -> String {
        match self {
            RemoteCommand::InstallRuntime => {
                "sudo systemctl restart snapd.seeded.service && sudo snap install docker"
                    .to_string()
            }
            RemoteCommand::BuildImage => format!(
                "mkdir -p src && tar xzf src.tar.gz -C src/ && \
                 sudo docker build -t {APP_NAME} -f src/app/Dockerfile src/"
            ),
            RemoteCommand::StartContainer { instance_number } => format!(
                "sudo docker rm -f {APP_NAME} >/dev/null 2>&1 || true && \
                 sudo docker run -d --name {APP_NAME} -p {HOST_PORT}:{APP_PORT} \
                 -e INSTANCE_NUMBER={instance_number} {APP_NAME}"
            ),
        }
    }

    /// Short name for logging
    pub fn name(&self) -> &'static str {
        match self {
            RemoteCommand::InstallRuntime => "install runtime",
            RemoteCommand::BuildImage => "build image",
            RemoteCommand::StartContainer { .. } => "start container",
        }
    }
}
