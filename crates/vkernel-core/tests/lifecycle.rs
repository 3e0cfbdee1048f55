//! Module lifecycle against a recording kernel

use nix::errno::Errno;
use nix::kmod::{DeleteModuleFlags, ModuleInitFlags};
use std::cell::{Cell, RefCell};
use std::ffi::CStr;
use std::fs;
use std::os::fd::BorrowedFd;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use vkernel_core::{
    ControllerConfig, HostKernel, Kernel, ModuleController, ModuleState, MountEntry,
    VkernelError,
};

#[derive(Debug, PartialEq, Eq)]
enum Call {
    Insert { params: String, flags: u32 },
    Delete { name: String, flags: i32 },
}

/// Kernel double that keeps module presence the way the real one does
#[derive(Debug)]
struct RecordingKernel {
    release: &'static str,
    loaded: Cell<bool>,
    calls: RefCell<Vec<Call>>,
}

impl RecordingKernel {
    fn new(release: &'static str) -> Self {
        Self {
            release,
            loaded: Cell::new(false),
            calls: RefCell::new(Vec::new()),
        }
    }
}

impl Kernel for RecordingKernel {
    fn release_field(&self) -> nix::Result<Vec<u8>> {
        let mut field = vec![0u8; 65];
        field[..self.release.len()].copy_from_slice(self.release.as_bytes());
        Ok(field)
    }

    fn finit_module(
        &self,
        _fd: BorrowedFd<'_>,
        params: &CStr,
        flags: ModuleInitFlags,
    ) -> nix::Result<()> {
        self.calls.borrow_mut().push(Call::Insert {
            params: params.to_string_lossy().into_owned(),
            flags: flags.bits(),
        });
        if self.loaded.replace(true) {
            return Err(Errno::EEXIST);
        }
        Ok(())
    }

    fn delete_module(&self, name: &CStr, flags: DeleteModuleFlags) -> nix::Result<()> {
        self.calls.borrow_mut().push(Call::Delete {
            name: name.to_string_lossy().into_owned(),
            flags: flags.bits(),
        });
        if !self.loaded.replace(false) {
            return Err(Errno::ENOENT);
        }
        Ok(())
    }

    fn module_table(&self) -> std::io::Result<String> {
        if self.loaded.get() {
            Ok("vkernel 40960 0 - Live 0x0000000000000000 (OE)\n".to_string())
        } else {
            Ok("overlay 151552 2 - Live 0x0000000000000000\n".to_string())
        }
    }
}

/// Temporary modules root holding `<release>/extra/vkernel/vkernel.ko`
fn staged_module(release: &str) -> (TempDir, PathBuf) {
    let temp = TempDir::new().unwrap();
    let dir = temp.path().join(release).join("extra/vkernel");
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("vkernel.ko"), b"\x7fELF").unwrap();
    let root = temp.path().to_path_buf();
    (temp, root)
}

#[test]
fn stubbed_release_end_to_end() {
    let kernel = RecordingKernel::new("5.10.0-test");
    let controller = ModuleController::with_kernel(&kernel).unwrap();

    assert_eq!(
        controller.host_path(),
        Path::new("/lib/modules/5.10.0-test/extra/vkernel")
    );

    let mounts = controller.contribute_mount(Vec::new());
    assert_eq!(mounts.len(), 1);
    assert_eq!(mounts[0].source, controller.host_path());
    assert_eq!(mounts[0].destination, controller.host_path());
    assert!(mounts[0].is_recursive_bind());

    assert!(kernel.calls.borrow().is_empty());
}

#[test]
fn contribution_preserves_runtime_mounts() {
    let kernel = RecordingKernel::new("5.10.0-test");
    let controller = ModuleController::with_kernel(&kernel).unwrap();
    let existing: Vec<MountEntry> = serde_json::from_str(
        r#"[
            {"source":"proc","destination":"/proc","device":"proc","flags":14},
            {"source":"/etc/resolv.conf","destination":"/etc/resolv.conf","device":"bind","flags":20480}
        ]"#,
    )
    .unwrap();

    let mounts = controller.contribute_mount(existing.clone());

    assert_eq!(mounts.len(), 3);
    assert_eq!(mounts[..2], existing[..]);
    assert_eq!(mounts[2], controller.mount_entry());
}

#[test]
fn load_without_visible_module_skips_kernel() {
    let kernel = RecordingKernel::new("5.10.0-test");
    let temp = TempDir::new().unwrap();
    let config = ControllerConfig::builder().modules_root(temp.path()).build();
    let controller = ModuleController::with_config(&kernel, &config).unwrap();

    let err = controller.load("", 0).unwrap_err();

    match &err {
        VkernelError::ModuleFileUnavailable { path, .. } => {
            assert_eq!(path, &controller.descriptor().module_file());
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(err.errno(), Some(Errno::ENOENT));
    assert!(kernel.calls.borrow().is_empty());
}

#[test]
fn load_passes_params_and_flags_through() {
    let (_temp, root) = staged_module("5.10.0-test");
    let kernel = RecordingKernel::new("5.10.0-test");
    let config = ControllerConfig::builder().modules_root(&root).build();
    let controller = ModuleController::with_config(&kernel, &config).unwrap();

    controller.load("verbose=1 ns=\"a b\"", 3).unwrap();

    assert_eq!(
        *kernel.calls.borrow(),
        vec![Call::Insert {
            params: "verbose=1 ns=\"a b\"".into(),
            flags: 3,
        }]
    );
}

#[test]
fn presence_follows_load_and_unload() {
    let (_temp, root) = staged_module("6.1.0-test");
    let kernel = RecordingKernel::new("6.1.0-test");
    let config = ControllerConfig::builder().modules_root(&root).build();
    let controller = ModuleController::with_config(&kernel, &config).unwrap();

    assert_eq!(controller.state().unwrap(), ModuleState::Absent);
    controller.load("", 0).unwrap();
    assert_eq!(controller.state().unwrap(), ModuleState::Present);
    controller.unload().unwrap();
    assert_eq!(controller.state().unwrap(), ModuleState::Absent);
}

#[test]
fn second_load_is_rejected() {
    let (_temp, root) = staged_module("6.1.0-test");
    let kernel = RecordingKernel::new("6.1.0-test");
    let config = ControllerConfig::builder().modules_root(&root).build();
    let controller = ModuleController::with_config(&kernel, &config).unwrap();

    controller.load("", 0).unwrap();
    let err = controller.load("", 0).unwrap_err();

    assert!(matches!(
        err,
        VkernelError::ModuleLoadRejected { source: Errno::EEXIST, .. }
    ));
    assert_eq!(kernel.calls.borrow().len(), 2);
}

#[test]
fn unload_before_load_fails() {
    let kernel = RecordingKernel::new("5.10.0-test");
    let controller = ModuleController::with_kernel(&kernel).unwrap();

    let err = controller.unload().unwrap_err();

    assert!(matches!(
        err,
        VkernelError::ModuleUnloadRejected { ref name, source: Errno::ENOENT } if name == "vkernel"
    ));
    assert_eq!(
        *kernel.calls.borrow(),
        vec![Call::Delete {
            name: "vkernel".into(),
            flags: 0,
        }]
    );
}

#[test]
fn host_unload_of_absent_module_fails() {
    let controller = ModuleController::with_kernel(HostKernel).unwrap();
    // Never touch a live module on the machine running the tests.
    if !matches!(controller.state(), Ok(ModuleState::Absent)) {
        eprintln!("skipping: vkernel is loaded or /proc/modules is unreadable");
        return;
    }

    // Either ENOENT (root) or EPERM (unprivileged); never silent success.
    let err = controller.unload().unwrap_err();
    assert!(matches!(err, VkernelError::ModuleUnloadRejected { .. }));
}
