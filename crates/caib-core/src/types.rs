//! Core type definitions for the build API

use crate::error::{CaibError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Declares a closed, lowercase-serialized enumeration of request values
/// that can be parsed case-insensitively from user input.
macro_rules! closed_enum {
    (
        $(#[$meta:meta])*
        $name:ident, $kind:literal {
            $($variant:ident => $text:literal $(| $alias:literal)*),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(#[serde(rename = $text)] $variant),+
        }

        impl $name {
            /// All accepted values
            pub fn all() -> &'static [$name] {
                &[$($name::$variant),+]
            }

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = CaibError;

            fn from_str(s: &str) -> Result<Self> {
                let lower = s.trim().to_lowercase();
                match lower.as_str() {
                    $($text $(| $alias)* => Ok($name::$variant),)+
                    _ => Err(CaibError::InvalidValue {
                        kind: $kind,
                        value: s.to_string(),
                        expected: $name::all()
                            .iter()
                            .map(|v| v.as_str())
                            .collect::<Vec<_>>()
                            .join(", "),
                    }),
                }
            }
        }
    };
}

closed_enum! {
    /// Distribution to build
    Distro, "distro" {
        Autosd => "autosd",
        Autosd9 => "autosd9",
        Autosd10 => "autosd10",
        Cs9 => "cs9",
        Cs10 => "cs10",
        Eln => "eln",
        F40 => "f40",
        Rhivos => "rhivos",
    }
}

closed_enum! {
    /// Hardware target the image is built for
    Target, "target" {
        Qemu => "qemu",
        AbootQemu => "abootqemu",
        AbootQemuKvm => "abootqemukvm",
        Rpi4 => "rpi4",
        RideSx4 => "ridesx4",
        RideSx4R3 => "ridesx4_r3",
        Am62Sk => "am62sk",
        J784s4Evm => "j784s4evm",
        Tda4vmSk => "tda4vm_sk",
        S32gVnpRdb3 => "s32g_vnp_rdb3",
        BeaglePlay => "beagleplay",
        Ebbr => "ebbr",
        Pc => "pc",
    }
}

closed_enum! {
    /// CPU architecture
    Architecture, "architecture" {
        Amd64 => "amd64" | "x86_64",
        Arm64 => "arm64" | "aarch64",
    }
}

closed_enum! {
    /// Format the built image is exported as
    ExportFormat, "export format" {
        Image => "image",
        Qcow2 => "qcow2",
        Container => "container",
        Rootfs => "rootfs",
        Ext4 => "ext4",
        Simg => "simg",
        Tar => "tar",
        Aboot => "aboot",
    }
}

closed_enum! {
    /// Build mode
    Mode, "mode" {
        Image => "image",
        Package => "package",
    }
}

closed_enum! {
    /// Compression applied to served artifacts
    Compression, "compression" {
        Gzip => "gzip",
        Lz4 => "lz4",
    }
}

/// Lifecycle phase reported by the build API.
///
/// The server owns this set, so unknown values are kept rather than
/// rejected.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Phase {
    Accepted,
    Pending,
    Uploading,
    Building,
    Pushing,
    Completed,
    Failed,
    Other(String),
}

impl Phase {
    pub fn as_str(&self) -> &str {
        match self {
            Phase::Accepted => "Accepted",
            Phase::Pending => "Pending",
            Phase::Uploading => "Uploading",
            Phase::Building => "Building",
            Phase::Pushing => "Pushing",
            Phase::Completed => "Completed",
            Phase::Failed => "Failed",
            Phase::Other(s) => s,
        }
    }

    /// Completed and Failed end polling
    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Completed | Phase::Failed)
    }
}

impl From<String> for Phase {
    fn from(s: String) -> Self {
        match s.as_str() {
            "Accepted" => Phase::Accepted,
            "Pending" => Phase::Pending,
            "Uploading" => Phase::Uploading,
            "Building" => Phase::Building,
            "Pushing" => Phase::Pushing,
            "Completed" => Phase::Completed,
            "Failed" => Phase::Failed,
            _ => Phase::Other(s),
        }
    }
}

impl From<Phase> for String {
    fn from(p: Phase) -> Self {
        p.as_str().to_string()
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Build submission payload
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildRequest {
    pub name: String,
    pub manifest: String,
    pub manifest_file_name: String,
    pub distro: Distro,
    pub target: Target,
    pub architecture: Architecture,
    pub export_format: ExportFormat,
    pub mode: Mode,
    pub automotive_image_builder: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub storage_class: String,
    #[serde(default)]
    pub custom_defs: Vec<String>,
    #[serde(default)]
    pub aib_extra_args: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aib_override_args: Option<Vec<String>>,
    pub serve_artifact: bool,
    pub compression: Compression,
}

/// Acceptance response for a submitted build
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildResponse {
    pub name: String,
    pub phase: Phase,
    #[serde(default)]
    pub message: String,
}

/// Read-only status snapshot of a build
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildStatus {
    pub name: String,
    pub phase: Phase,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completion_time: Option<DateTime<Utc>>,
}

/// Entry of the build list
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildSummary {
    pub name: String,
    pub phase: Phase,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// A manifest entry that points at a file on this machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalFileReference {
    /// Destination path inside the image
    pub image_path: String,
    /// Source path as written in the manifest
    pub source: String,
    /// Source path after anchoring under the workspace root
    pub resolved: String,
    /// Where the file lives locally
    pub local_path: PathBuf,
}

impl LocalFileReference {
    /// Destination of the upload, relative to the shared workspace root
    pub fn upload(&self, workspace_root: &str) -> Upload {
        let dest = self
            .resolved
            .strip_prefix(workspace_root)
            .unwrap_or(&self.resolved)
            .trim_start_matches('/')
            .to_string();
        Upload {
            source_path: self.local_path.clone(),
            dest_path: dest,
        }
    }
}

/// One file transfer of an upload batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upload {
    pub source_path: PathBuf,
    pub dest_path: String,
}

/// Response metadata accompanying an artifact body
#[derive(Debug, Clone, Default)]
pub struct ArtifactInfo {
    pub content_type: Option<String>,
    pub content_length: Option<u64>,
    pub content_disposition: Option<String>,
    pub artifact_type: Option<String>,
    pub compression: Option<String>,
    pub archive_root: Option<String>,
}

impl ArtifactInfo {
    /// Filename from a `Content-Disposition` header.
    ///
    /// Only the last path component is kept so the server cannot direct the
    /// write outside the output directory.
    pub fn suggested_filename(&self) -> Option<String> {
        let cd = self.content_disposition.as_deref()?;
        let idx = cd.find("filename=")?;
        let raw = cd[idx + "filename=".len()..]
            .split(';')
            .next()
            .unwrap_or("")
            .trim()
            .trim_matches('"')
            .trim();
        let name = raw.rsplit(['/', '\\']).next().unwrap_or("");
        if name.is_empty() || name == "." || name == ".." {
            None
        } else {
            Some(name.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_enums_case_insensitive() {
        assert_eq!("ARM64".parse::<Architecture>().unwrap(), Architecture::Arm64);
        assert_eq!("x86_64".parse::<Architecture>().unwrap(), Architecture::Amd64);
        assert_eq!(" qemu ".parse::<Target>().unwrap(), Target::Qemu);
        assert_eq!("Package".parse::<Mode>().unwrap(), Mode::Package);
        assert_eq!("lz4".parse::<Compression>().unwrap(), Compression::Lz4);
    }

    #[test]
    fn test_unknown_value_lists_alternatives() {
        let err = "riscv".parse::<Architecture>().unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("architecture"));
        assert!(msg.contains("riscv"));
        assert!(msg.contains("amd64, arm64"));
    }

    #[test]
    fn test_phase_keeps_unknown_values() {
        let status: BuildStatus =
            serde_json::from_str(r#"{"name":"b1","phase":"Flashing","message":"x"}"#).unwrap();
        assert_eq!(status.phase, Phase::Other("Flashing".to_string()));
        assert!(!status.phase.is_terminal());
        assert!(Phase::from("Failed".to_string()).is_terminal());
    }

    #[test]
    fn test_request_serializes_camel_case() {
        let req = BuildRequest {
            name: "demo".to_string(),
            manifest: "content: {}".to_string(),
            manifest_file_name: "demo.aib.yml".to_string(),
            distro: Distro::Autosd,
            target: Target::Qemu,
            architecture: Architecture::Arm64,
            export_format: ExportFormat::Qcow2,
            mode: Mode::Image,
            automotive_image_builder: "quay.io/aib:1".to_string(),
            storage_class: String::new(),
            custom_defs: vec!["A=1".to_string()],
            aib_extra_args: vec![],
            aib_override_args: None,
            serve_artifact: true,
            compression: Compression::Gzip,
        };
        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(value["manifestFileName"], "demo.aib.yml");
        assert_eq!(value["exportFormat"], "qcow2");
        assert_eq!(value["architecture"], "arm64");
        assert!(value.get("storageClass").is_none());
        assert!(value.get("aibOverrideArgs").is_none());
    }

    #[test]
    fn test_suggested_filename_strips_directories() {
        let mut info = ArtifactInfo {
            content_disposition: Some(r#"attachment; filename="disk.qcow2""#.to_string()),
            ..Default::default()
        };
        assert_eq!(info.suggested_filename().as_deref(), Some("disk.qcow2"));

        info.content_disposition = Some("attachment; filename=../../etc/passwd".to_string());
        assert_eq!(info.suggested_filename().as_deref(), Some("passwd"));

        info.content_disposition = Some("attachment".to_string());
        assert_eq!(info.suggested_filename(), None);
    }

    #[test]
    fn test_upload_destination_is_workspace_relative() {
        let reference = LocalFileReference {
            image_path: "/etc/app.conf".to_string(),
            source: "files/app.conf".to_string(),
            resolved: "/workspace/shared/files/app.conf".to_string(),
            local_path: PathBuf::from("/home/me/files/app.conf"),
        };
        let upload = reference.upload("/workspace/shared");
        assert_eq!(upload.dest_path, "files/app.conf");
        assert_eq!(upload.source_path, PathBuf::from("/home/me/files/app.conf"));
    }
}
