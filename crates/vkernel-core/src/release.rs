//! Running kernel release

use crate::kernel::Kernel;
use crate::{Result, VkernelError};
use std::ffi::{OsStr, OsString};
use std::fmt;
use std::os::unix::ffi::OsStrExt;

/// Release string of the running kernel, e.g. `5.15.0-generic`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KernelRelease(OsString);

impl KernelRelease {
    /// Query the kernel identity record and decode its release field
    pub fn resolve<K: Kernel>(kernel: &K) -> Result<Self> {
        let field = kernel
            .release_field()
            .map_err(VkernelError::IdentityQuery)?;
        let release = decode_release(&field);
        tracing::debug!(release = ?release.as_os_str(), "resolved kernel release");
        Ok(release)
    }

    /// Release bytes exactly as the kernel reported them
    #[must_use]
    pub fn as_os_str(&self) -> &OsStr {
        &self.0
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Display for KernelRelease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.to_string_lossy())
    }
}

impl AsRef<OsStr> for KernelRelease {
    fn as_ref(&self) -> &OsStr {
        &self.0
    }
}

/// Decode a fixed-size release field.
///
/// The string ends at the first NUL byte, or at the end of the buffer when the
/// release fills it completely. Bytes are kept as-is, valid UTF-8 or not.
#[must_use]
pub fn decode_release(field: &[u8]) -> KernelRelease {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    KernelRelease(OsStr::from_bytes(&field[..end]).to_os_string())
}
