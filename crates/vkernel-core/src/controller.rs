//! Module lifecycle controller
//!
//! One controller owns one [`ModuleDescriptor`]. The runtime drives it in a
//! fixed order: construct, contribute the mount, load once the container can
//! see the module, unload at teardown.

use crate::config::ControllerConfig;
use crate::kernel::{HostKernel, Kernel, table_lists};
use crate::mounts::MountEntry;
use crate::release::KernelRelease;
use crate::{Result, VkernelError};
use nix::kmod::{DeleteModuleFlags, ModuleInitFlags};
use std::ffi::{CStr, CString, OsString};
use std::fmt;
use std::fs::File;
use std::os::fd::AsFd;
use std::path::{Path, PathBuf};

/// Name the module registers with the kernel
pub const MODULE_NAME: &str = "vkernel";

const MODULE_NAME_C: &CStr = c"vkernel";

/// Location of the vkernel module for one kernel release
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleDescriptor {
    name: &'static str,
    host_path: PathBuf,
}

impl ModuleDescriptor {
    /// `<modules_root>/<release>/extra/vkernel`, concatenated as-is
    #[must_use]
    pub fn new(modules_root: &Path, release: &KernelRelease) -> Self {
        let mut host_path = OsString::from(modules_root.as_os_str());
        host_path.push("/");
        host_path.push(release.as_os_str());
        host_path.push("/extra/");
        host_path.push(MODULE_NAME);

        Self {
            name: MODULE_NAME,
            host_path: PathBuf::from(host_path),
        }
    }

    #[must_use]
    pub const fn name(&self) -> &str {
        self.name
    }

    /// Directory holding the module image
    #[must_use]
    pub fn host_path(&self) -> &Path {
        &self.host_path
    }

    /// `<host_path>/vkernel.ko`
    #[must_use]
    pub fn module_file(&self) -> PathBuf {
        let mut file = OsString::from(self.host_path.as_os_str());
        file.push("/");
        file.push(self.name);
        file.push(".ko");
        PathBuf::from(file)
    }
}

/// Arguments for a single `finit_module(2)` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadRequest {
    /// Module image, as seen from inside the container
    pub path: PathBuf,
    /// Module parameters, passed to the kernel verbatim
    pub params: String,
    /// `MODULE_INIT_*` bits, passed through unchanged
    pub flags: u32,
}

impl LoadRequest {
    #[must_use]
    pub const fn init_flags(&self) -> ModuleInitFlags {
        ModuleInitFlags::from_bits_retain(self.flags)
    }
}

/// Whether the kernel currently has the module loaded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleState {
    Absent,
    Present,
}

impl fmt::Display for ModuleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Absent => f.write_str("absent"),
            Self::Present => f.write_str("present"),
        }
    }
}

/// Lifecycle of the vkernel module for one container
#[derive(Debug)]
pub struct ModuleController<K = HostKernel> {
    kernel: K,
    release: KernelRelease,
    descriptor: ModuleDescriptor,
}

impl ModuleController<HostKernel> {
    /// Controller for the running kernel with modules under `/lib/modules`
    pub fn new() -> Result<Self> {
        Self::with_kernel(HostKernel)
    }
}

impl<K: Kernel> ModuleController<K> {
    pub fn with_kernel(kernel: K) -> Result<Self> {
        Self::with_config(kernel, &ControllerConfig::default())
    }

    /// Resolves the release once; nothing on disk or in the module table is
    /// touched.
    pub fn with_config(kernel: K, config: &ControllerConfig) -> Result<Self> {
        let release = KernelRelease::resolve(&kernel)?;
        let descriptor = ModuleDescriptor::new(&config.modules_root, &release);
        tracing::debug!(
            name = descriptor.name(),
            host_path = ?descriptor.host_path(),
            "module controller ready"
        );

        Ok(Self {
            kernel,
            release,
            descriptor,
        })
    }

    #[must_use]
    pub const fn release(&self) -> &KernelRelease {
        &self.release
    }

    #[must_use]
    pub const fn descriptor(&self) -> &ModuleDescriptor {
        &self.descriptor
    }

    #[must_use]
    pub fn host_path(&self) -> &Path {
        self.descriptor.host_path()
    }

    /// Same-path recursive bind of the module directory
    #[must_use]
    pub fn mount_entry(&self) -> MountEntry {
        MountEntry::same_path_rbind(self.descriptor.host_path())
    }

    /// Append the module mount to the runtime's mount list.
    ///
    /// Existing entries are kept as they are, in order.
    #[must_use]
    pub fn contribute_mount(&self, mut mounts: Vec<MountEntry>) -> Vec<MountEntry> {
        let entry = self.mount_entry();
        tracing::debug!(path = ?entry.destination, existing = mounts.len(), "contributing mount");
        mounts.push(entry);
        mounts
    }

    #[must_use]
    pub fn load_request(&self, params: &str, flags: u32) -> LoadRequest {
        LoadRequest {
            path: self.descriptor.module_file(),
            params: params.to_string(),
            flags,
        }
    }

    /// Insert the module into the kernel.
    ///
    /// Failures come back as-is and are never retried: a missing image gives
    /// [`VkernelError::ModuleFileUnavailable`] without calling into the
    /// kernel, a kernel refusal gives [`VkernelError::ModuleLoadRejected`].
    pub fn load(&self, params: &str, flags: u32) -> Result<()> {
        self.insert(&self.load_request(params, flags))
    }

    fn insert(&self, request: &LoadRequest) -> Result<()> {
        let params = CString::new(request.params.as_str())
            .map_err(|e| VkernelError::InvalidParams(e.to_string()))?;

        let file = File::open(&request.path).map_err(|source| {
            VkernelError::ModuleFileUnavailable {
                path: request.path.clone(),
                source,
            }
        })?;

        tracing::debug!(path = ?request.path, flags = request.flags, "finit_module");

        self.kernel
            .finit_module(file.as_fd(), &params, request.init_flags())
            .map_err(|source| VkernelError::ModuleLoadRejected {
                name: self.descriptor.name().to_string(),
                source,
            })
    }

    /// Remove the module from the kernel.
    ///
    /// Not idempotent: unloading a module that is not loaded fails.
    pub fn unload(&self) -> Result<()> {
        tracing::debug!(name = self.descriptor.name(), "delete_module");

        self.kernel
            .delete_module(MODULE_NAME_C, DeleteModuleFlags::empty())
            .map_err(|source| VkernelError::ModuleUnloadRejected {
                name: self.descriptor.name().to_string(),
                source,
            })
    }

    /// Look the module up in the kernel's loaded module table
    pub fn state(&self) -> Result<ModuleState> {
        let table = self.kernel.module_table()?;
        if table_lists(&table, self.descriptor.name()) {
            Ok(ModuleState::Present)
        } else {
            Ok(ModuleState::Absent)
        }
    }
}
