//! Mount entries contributed to the container runtime
//!
//! Entries only describe a mount. The runtime's mount pipeline runs the
//! pre-mount commands and performs the mount itself.

use nix::mount::MsFlags;
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Device string the runtime uses for bind mounts
pub const BIND_DEVICE: &str = "bind";

/// A single mount the runtime should apply inside the container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountEntry {
    /// Host path
    pub source: PathBuf,
    /// Path inside the container
    pub destination: PathBuf,
    /// Mount type
    pub device: String,
    /// `mount(2)` flags
    #[serde(with = "ms_flags")]
    pub flags: MsFlags,
    /// Commands the runtime runs before mounting
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub premount_cmds: Vec<PremountCommand>,
}

impl MountEntry {
    /// Recursive bind mount of `path` onto the same path in the container,
    /// touching the destination first so the mount point exists.
    #[must_use]
    pub fn same_path_rbind(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let touch = PremountCommand::touch(&path);
        Self::rbind(path.clone(), path).premount(touch)
    }

    /// Recursive bind mount
    #[must_use]
    pub fn rbind(src: impl Into<PathBuf>, dst: impl Into<PathBuf>) -> Self {
        Self {
            source: src.into(),
            destination: dst.into(),
            device: BIND_DEVICE.to_string(),
            flags: MsFlags::MS_BIND | MsFlags::MS_REC,
            premount_cmds: Vec::new(),
        }
    }

    /// Add a pre-mount command
    #[must_use]
    pub fn premount(mut self, cmd: PremountCommand) -> Self {
        self.premount_cmds.push(cmd);
        self
    }

    #[must_use]
    pub fn is_recursive_bind(&self) -> bool {
        self.device == BIND_DEVICE && self.flags.contains(MsFlags::MS_BIND | MsFlags::MS_REC)
    }
}

/// Command executed by the runtime before a mount is attempted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PremountCommand {
    pub path: String,
    #[serde(default, with = "os_args")]
    pub args: Vec<OsString>,
}

impl PremountCommand {
    /// `touch <path>`
    #[must_use]
    pub fn touch(path: &Path) -> Self {
        Self {
            path: "touch".to_string(),
            args: vec![path.as_os_str().to_os_string()],
        }
    }
}

// Arguments keep their raw bytes in memory; like PathBuf, they only reach
// JSON when they are valid UTF-8.
mod os_args {
    use serde::ser::{Error as _, SerializeSeq};
    use serde::{Deserialize, Deserializer, Serializer};
    use std::ffi::OsString;

    pub fn serialize<S: Serializer>(args: &[OsString], serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(args.len()))?;
        for arg in args {
            let arg = arg
                .to_str()
                .ok_or_else(|| S::Error::custom("argument is not valid UTF-8"))?;
            seq.serialize_element(arg)?;
        }
        seq.end()
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<OsString>, D::Error> {
        let args = Vec::<String>::deserialize(deserializer)?;
        Ok(args.into_iter().map(OsString::from).collect())
    }
}

// MsFlags has no serde support; mount flags travel as their raw bits.
mod ms_flags {
    use nix::mount::MsFlags;
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    #[allow(clippy::useless_conversion)]
    pub fn serialize<S: Serializer>(flags: &MsFlags, serializer: S) -> Result<S::Ok, S::Error> {
        u64::from(flags.bits()).serialize(serializer)
    }

    #[allow(clippy::useless_conversion)]
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<MsFlags, D::Error> {
        let bits = u64::deserialize(deserializer)?;
        let bits = libc::c_ulong::try_from(bits).map_err(D::Error::custom)?;
        Ok(MsFlags::from_bits_retain(bits))
    }
}
