// Device facts providers.
//
// The pipeline consumes immutable DeviceFacts; where they come from is a
// collaborator concern. Two providers ship with the tool: an lsblk-backed
// one for real block devices and a sandbox one that exposes image files as
// virtual media. Neither performs any write.

use crate::certificate::extract_manufacturer;
use crate::{CoreError, CoreResult, DeviceFacts, MediaType, Transport};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, warn};

/// Source of device descriptors.
pub trait DeviceFactsProvider {
    fn list_devices(&self) -> CoreResult<Vec<DeviceFacts>>;

    /// Describe one device by path. Fails with
    /// [`CoreError::DeviceNotFound`] for paths the provider does not know.
    fn describe_device(&self, path: &str) -> CoreResult<DeviceFacts>;
}

/// Block-device provider backed by `lsblk -J -b`.
///
/// `encryption_always_on` is operator attestation and is never inferred
/// here; callers set it explicitly after describing the device.
pub struct LsblkProvider;

const LSBLK_COLUMNS: &str = "NAME,TYPE,MODEL,SERIAL,SIZE,TRAN,ROTA,FSTYPE";

impl LsblkProvider {
    pub fn new() -> Self {
        Self
    }

    fn run_lsblk(extra: Option<&str>) -> CoreResult<String> {
        let mut command = Command::new("lsblk");
        command.args(["-J", "-b", "-o", LSBLK_COLUMNS]);
        if let Some(path) = extra {
            command.arg(path);
        }
        let output = command.output()?;
        if !output.status.success() {
            let detail = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(CoreError::DeviceNotFound(if detail.is_empty() {
                "lsblk reported no such device".to_string()
            } else {
                detail
            }));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Non-physical block devices that are never sanitization targets.
    fn should_skip(name: &str) -> bool {
        name.starts_with("loop")
            || name.starts_with("ram")
            || name.starts_with("dm-")
            || name.starts_with("sr")
            || name.starts_with("zram")
    }
}

impl Default for LsblkProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceFactsProvider for LsblkProvider {
    fn list_devices(&self) -> CoreResult<Vec<DeviceFacts>> {
        let raw = Self::run_lsblk(None)?;
        parse_lsblk_json(&raw)
    }

    fn describe_device(&self, path: &str) -> CoreResult<DeviceFacts> {
        let raw = Self::run_lsblk(Some(path))?;
        parse_lsblk_json(&raw)?
            .into_iter()
            .next()
            .ok_or_else(|| CoreError::DeviceNotFound(path.to_string()))
    }
}

/// Turn lsblk's JSON into device facts. Split out from the command so the
/// parse rules are testable without block devices present.
pub(crate) fn parse_lsblk_json(raw: &str) -> CoreResult<Vec<DeviceFacts>> {
    let root: Value = serde_json::from_str(raw)?;
    let mut devices = Vec::new();

    let block_devices = root
        .get("blockdevices")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    for entry in block_devices {
        if entry.get("type").and_then(Value::as_str) != Some("disk") {
            continue;
        }
        let name = str_field(&entry, "name");
        if name.is_empty() || LsblkProvider::should_skip(&name) {
            continue;
        }

        let model = str_field(&entry, "model");
        let transport_raw = str_field(&entry, "tran");
        let rotational = bool_field(&entry, "rota");
        let fstype = str_field(&entry, "fstype");
        let media_type = infer_media_type(rotational, &transport_raw, &model);

        let facts = DeviceFacts {
            device_path: format!("/dev/{name}"),
            manufacturer: extract_manufacturer(&model).unwrap_or_default(),
            model,
            serial_number: str_field(&entry, "serial"),
            size_bytes: u64_field(&entry, "size"),
            transport: map_transport(&transport_raw),
            media_type,
            is_encrypted: fstype.eq_ignore_ascii_case("crypto_LUKS"),
            encryption_always_on: false,
        };
        debug!(device = %facts.device_path, media = %facts.media_type, "device detected");
        devices.push(facts);
    }

    Ok(devices)
}

fn str_field(entry: &Value, key: &str) -> String {
    entry
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .trim()
        .to_string()
}

// lsblk emits SIZE as a number with -b on current versions, as a string on
// older ones; ROTA is likewise a bool or "1"/"0".
fn u64_field(entry: &Value, key: &str) -> u64 {
    match entry.get(key) {
        Some(Value::Number(n)) => n.as_u64().unwrap_or(0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0),
        _ => 0,
    }
}

fn bool_field(entry: &Value, key: &str) -> bool {
    match entry.get(key) {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s.trim() == "1" || s.eq_ignore_ascii_case("true"),
        Some(Value::Number(n)) => n.as_u64() == Some(1),
        _ => false,
    }
}

fn map_transport(tran: &str) -> Transport {
    match tran.to_ascii_lowercase().as_str() {
        "nvme" => Transport::Nvme,
        "ata" | "sata" => Transport::Ata,
        "scsi" | "sas" => Transport::Scsi,
        "" => Transport::Other,
        _ => Transport::Other,
    }
}

fn infer_media_type(rotational: bool, tran: &str, model: &str) -> MediaType {
    if rotational {
        return MediaType::Magnetic;
    }
    let tran = tran.to_ascii_lowercase();
    if tran == "nvme" || model.to_ascii_lowercase().contains("ssd") {
        return MediaType::Flash;
    }
    // Non-rotational but otherwise unidentified: do not guess flash, the
    // decision engine treats unknown media conservatively.
    MediaType::Unknown
}

/// Sandbox provider: every `*.img` file in a directory is a virtual device.
///
/// This is the safe path for exercising the whole pipeline; the sandbox
/// executor only ever writes to regular files.
pub struct SandboxProvider {
    dir: PathBuf,
}

impl SandboxProvider {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn facts_for(path: &Path) -> CoreResult<DeviceFacts> {
        let metadata = std::fs::metadata(path)?;
        if !metadata.is_file() {
            return Err(CoreError::DeviceNotFound(path.display().to_string()));
        }
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("vdisk")
            .to_string();
        Ok(DeviceFacts {
            device_path: path.display().to_string(),
            manufacturer: String::new(),
            model: "Sandbox Virtual Disk".to_string(),
            serial_number: format!("SBX-{stem}"),
            size_bytes: metadata.len(),
            transport: Transport::File,
            media_type: MediaType::Virtual,
            is_encrypted: false,
            encryption_always_on: false,
        })
    }
}

impl DeviceFactsProvider for SandboxProvider {
    fn list_devices(&self) -> CoreResult<Vec<DeviceFacts>> {
        let mut devices = Vec::new();
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(dir = %self.dir.display(), error = %e, "sandbox directory unreadable");
                return Ok(devices);
            }
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("img") {
                if let Ok(facts) = Self::facts_for(&path) {
                    devices.push(facts);
                }
            }
        }
        devices.sort_by(|a, b| a.device_path.cmp(&b.device_path));
        Ok(devices)
    }

    fn describe_device(&self, path: &str) -> CoreResult<DeviceFacts> {
        let candidate = Path::new(path);
        if !candidate.exists() {
            return Err(CoreError::DeviceNotFound(path.to_string()));
        }
        Self::facts_for(candidate)
    }
}
