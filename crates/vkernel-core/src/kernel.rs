//! Outbound kernel interface
//!
//! Everything that crosses into the running kernel goes through [`Kernel`]:
//! - `uname(2)` for the release field
//! - `finit_module(2)` and `delete_module(2)`
//! - `/proc/modules` for the loaded module table

use nix::errno::Errno;
use nix::kmod::{DeleteModuleFlags, ModuleInitFlags};
use std::ffi::CStr;
use std::os::fd::BorrowedFd;

/// Path of the kernel's loaded module table
pub const PROC_MODULES: &str = "/proc/modules";

/// System calls the module controller depends on
pub trait Kernel {
    /// Raw `release` field of the identity record, full fixed-size buffer
    fn release_field(&self) -> nix::Result<Vec<u8>>;

    /// Insert a module from an open file
    fn finit_module(
        &self,
        fd: BorrowedFd<'_>,
        params: &CStr,
        flags: ModuleInitFlags,
    ) -> nix::Result<()>;

    /// Remove a module by name
    fn delete_module(&self, name: &CStr, flags: DeleteModuleFlags) -> nix::Result<()>;

    /// Contents of the loaded module table
    fn module_table(&self) -> std::io::Result<String>;
}

impl<K: Kernel + ?Sized> Kernel for &K {
    fn release_field(&self) -> nix::Result<Vec<u8>> {
        (**self).release_field()
    }

    fn finit_module(
        &self,
        fd: BorrowedFd<'_>,
        params: &CStr,
        flags: ModuleInitFlags,
    ) -> nix::Result<()> {
        (**self).finit_module(fd, params, flags)
    }

    fn delete_module(&self, name: &CStr, flags: DeleteModuleFlags) -> nix::Result<()> {
        (**self).delete_module(name, flags)
    }

    fn module_table(&self) -> std::io::Result<String> {
        (**self).module_table()
    }
}

/// The kernel this process is running on
#[derive(Debug, Clone, Copy, Default)]
pub struct HostKernel;

impl Kernel for HostKernel {
    fn release_field(&self) -> nix::Result<Vec<u8>> {
        // SAFETY: utsname is plain old data, all-zero is a valid value
        let mut uts: libc::utsname = unsafe { std::mem::zeroed() };

        // SAFETY: uname writes into the struct we own
        let ret = unsafe { libc::uname(&raw mut uts) };
        Errno::result(ret)?;

        Ok(uts
            .release
            .iter()
            .map(|c| u8::from_ne_bytes(c.to_ne_bytes()))
            .collect())
    }

    fn finit_module(
        &self,
        fd: BorrowedFd<'_>,
        params: &CStr,
        flags: ModuleInitFlags,
    ) -> nix::Result<()> {
        nix::kmod::finit_module(&fd, params, flags)
    }

    fn delete_module(&self, name: &CStr, flags: DeleteModuleFlags) -> nix::Result<()> {
        nix::kmod::delete_module(name, flags)
    }

    fn module_table(&self) -> std::io::Result<String> {
        std::fs::read_to_string(PROC_MODULES)
    }
}

/// Whether `name` is listed in a `/proc/modules` style table.
///
/// The first whitespace-separated field of each line is the module name.
#[must_use]
pub fn table_lists(table: &str, name: &str) -> bool {
    table
        .lines()
        .filter_map(|line| line.split_whitespace().next())
        .any(|module| module == name)
}
