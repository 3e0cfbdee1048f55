//! Error types for vkernel-core

use nix::errno::Errno;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VkernelError {
    #[error("failed to query kernel identity: {0}")]
    IdentityQuery(#[source] Errno),

    #[error("module file {} unavailable: {source}", path.display())]
    ModuleFileUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("kernel rejected loading module {name}: {source}")]
    ModuleLoadRejected {
        name: String,
        #[source]
        source: Errno,
    },

    #[error("kernel rejected unloading module {name}: {source}")]
    ModuleUnloadRejected {
        name: String,
        #[source]
        source: Errno,
    },

    #[error("invalid module parameters: {0}")]
    InvalidParams(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl VkernelError {
    /// The OS error number behind this failure, if there is one.
    ///
    /// Kernel refusals are opaque to this crate; callers that want to treat
    /// e.g. `ENOENT` on unload as benign must decide that themselves.
    #[must_use]
    pub fn errno(&self) -> Option<Errno> {
        match self {
            Self::IdentityQuery(errno)
            | Self::ModuleLoadRejected { source: errno, .. }
            | Self::ModuleUnloadRejected { source: errno, .. } => Some(*errno),
            Self::ModuleFileUnavailable { source, .. } | Self::Io(source) => {
                source.raw_os_error().map(Errno::from_raw)
            }
            Self::InvalidParams(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errno_of_kernel_refusal() {
        let err = VkernelError::ModuleUnloadRejected {
            name: "vkernel".into(),
            source: Errno::ENOENT,
        };
        assert_eq!(err.errno(), Some(Errno::ENOENT));
        assert!(err.to_string().contains("vkernel"));
    }

    #[test]
    fn errno_of_missing_file() {
        let err = VkernelError::ModuleFileUnavailable {
            path: PathBuf::from("/nope/vkernel.ko"),
            source: std::io::Error::from_raw_os_error(libc::ENOENT),
        };
        assert_eq!(err.errno(), Some(Errno::ENOENT));
        assert!(err.to_string().contains("/nope/vkernel.ko"));
    }

    #[test]
    fn no_errno_without_os_cause() {
        let io = VkernelError::Io(std::io::Error::other("synthetic"));
        assert_eq!(io.errno(), None);
        assert_eq!(VkernelError::InvalidParams("nul".into()).errno(), None);
    }
}
