//! # vkernel-core
//!
//! Lifecycle of the `vkernel` kernel module for containers.
//!
//! This crate covers:
//! - Resolving the running kernel release and the module's host directory
//! - Contributing a same-path recursive bind mount to the runtime's mount list
//! - Loading the module by file descriptor and unloading it by name
//!
//! It never applies mounts or creates namespaces; the container runtime does.

#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod controller;
pub mod error;
pub mod kernel;
pub mod mounts;
pub mod release;

pub use config::ControllerConfig;
pub use controller::{LoadRequest, ModuleController, ModuleDescriptor, ModuleState};
pub use error::VkernelError;
pub use kernel::{HostKernel, Kernel};
pub use mounts::{MountEntry, PremountCommand};
pub use release::KernelRelease;

pub use nix::kmod::ModuleInitFlags;

/// Crate-level result type
pub type Result<T> = std::result::Result<T, VkernelError>;
