//! Hard drive temperature source
//!
//! Spin state comes from `hdparm -C`, the temperature from the SMART
//! attribute table printed by `smartctl -A`. Drives in standby are not woken
//! up for a temperature reading unless `measure_in_idle` is set. Activity is
//! 1.0 when the kernel I/O counters of the block device changed since the
//! previous refresh.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use qf_error::{QuietfanError, Result};
use qf_protocol::SensorKind;
use tracing::{debug, trace};

use super::sensor::{Sensor, TemperatureLimits};
use crate::constants::{commands, paths};

/// SMART attribute id of the drive temperature
const SMART_TEMPERATURE_ID: &str = "194";
const SMART_TEMPERATURE_NAME: &str = "Temperature_Celsius";
/// Column of the raw value in `smartctl -A` attribute rows
const SMART_RAW_VALUE_COLUMN: usize = 9;

pub struct Harddrive {
    name: String,
    device: PathBuf,
    stat_path: Option<PathBuf>,
    limits: TemperatureLimits,
    measure_in_idle: bool,
    temperature: Option<f32>,
    spinning: Option<bool>,
    activity: f32,
    last_stat: Option<String>,
}

impl Harddrive {
    pub fn new(name: impl Into<String>, device: impl Into<PathBuf>, limits: TemperatureLimits) -> Self {
        let device = device.into();
        let stat_path = block_stat_path(&device);
        Self {
            name: name.into(),
            device,
            stat_path,
            limits,
            measure_in_idle: false,
            temperature: None,
            spinning: None,
            activity: 0.0,
            last_stat: None,
        }
    }

    /// Query the temperature even when the drive is in standby
    pub fn with_measure_in_idle(mut self, measure_in_idle: bool) -> Self {
        self.measure_in_idle = measure_in_idle;
        self
    }

    pub fn with_stat_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.stat_path = Some(path.into());
        self
    }

    pub fn device(&self) -> &Path {
        &self.device
    }

    fn query_spinning(&self) -> Result<bool> {
        let output = run(commands::HDPARM, &["-C"], &self.device)?;
        parse_hdparm_state(&output).map_err(|reason| QuietfanError::Command {
            command: format!("{} -C {}", commands::HDPARM, self.device.display()),
            reason,
        })
    }

    fn query_temperature(&self) -> Result<f32> {
        let output = run(commands::SMARTCTL, &["-A"], &self.device)?;
        parse_smart_temperature(&output).ok_or_else(|| {
            QuietfanError::sensor_read(&self.name, "no temperature attribute in SMART data")
        })
    }

    fn update_activity(&mut self) {
        let Some(stat_path) = &self.stat_path else {
            self.activity = 0.0;
            return;
        };
        match fs::read_to_string(stat_path) {
            Ok(stat) => {
                let changed = self.last_stat.as_deref().is_some_and(|prev| prev != stat);
                self.activity = if changed { 1.0 } else { 0.0 };
                self.last_stat = Some(stat);
            }
            Err(e) => {
                debug!(sensor = %self.name, path = %stat_path.display(), error = %e, "Block device stat unavailable");
                self.activity = 0.0;
            }
        }
    }
}

impl Sensor for Harddrive {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> SensorKind {
        SensorKind::Harddrive
    }

    fn refresh(&mut self, _dt: Duration) -> Result<()> {
        let spinning = self.query_spinning()?;
        self.spinning = Some(spinning);

        self.temperature = if spinning || self.measure_in_idle {
            Some(self.query_temperature()?)
        } else {
            trace!(sensor = %self.name, "Drive in standby, skipping temperature");
            None
        };

        self.update_activity();
        Ok(())
    }

    fn cached_temperature(&self) -> Option<f32> {
        self.temperature
    }

    fn cached_activity(&self) -> f32 {
        self.activity
    }

    fn limits(&self) -> &TemperatureLimits {
        &self.limits
    }

    fn spinning(&self) -> Option<bool> {
        self.spinning
    }
}

fn run(program: &str, args: &[&str], device: &Path) -> Result<String> {
    let command_line = format!("{} {} {}", program, args.join(" "), device.display());
    let output = Command::new(program)
        .args(args)
        .arg(device)
        .output()
        .map_err(|e| QuietfanError::Command {
            command: command_line.clone(),
            reason: e.to_string(),
        })?;

    if !output.status.success() {
        return Err(QuietfanError::Command {
            command: command_line,
            reason: format!(
                "exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// `/sys/block/<dev>/stat` for a device node, following `/dev/disk/by-*` links
fn block_stat_path(device: &Path) -> Option<PathBuf> {
    let resolved = fs::canonicalize(device).unwrap_or_else(|_| device.to_path_buf());
    let kernel_name = resolved.file_name()?.to_str()?;
    Some(Path::new(paths::BLOCK_STAT_DIR).join(kernel_name).join("stat"))
}

/// Parse `hdparm -C` output. `Ok(true)` when the drive is spinning.
pub fn parse_hdparm_state(output: &str) -> std::result::Result<bool, String> {
    let state = output
        .lines()
        .find_map(|line| line.split_once("drive state is:").map(|(_, s)| s.trim()))
        .ok_or_else(|| "no drive state in hdparm output".to_string())?;

    // Power-saving substates (idle_a, active_b, ...) still spin; any other
    // reported state (standby_y, sleeping, NVcache_spindown, ...) does not
    match state {
        "unknown" => Err(format!("drive state is '{}'", state)),
        s if s.starts_with("active") || s.starts_with("idle") => Ok(true),
        _ => Ok(false),
    }
}

/// Extract the drive temperature from `smartctl -A` output
pub fn parse_smart_temperature(output: &str) -> Option<f32> {
    for line in output.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() > SMART_RAW_VALUE_COLUMN
            && (fields[0] == SMART_TEMPERATURE_ID || fields[1] == SMART_TEMPERATURE_NAME)
        {
            if let Ok(t) = fields[SMART_RAW_VALUE_COLUMN].parse::<f32>() {
                return Some(t);
            }
        }

        // NVMe health log: "Temperature:                        35 Celsius"
        if let Some(rest) = line.strip_prefix("Temperature:") {
            let mut parts = rest.split_whitespace();
            if let (Some(value), Some("Celsius")) = (parts.next(), parts.next()) {
                if let Ok(t) = value.parse::<f32>() {
                    return Some(t);
                }
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const SMART_ATA: &str = "\
smartctl 7.3 2022-02-28 r5338 [x86_64-linux-6.1.0] (local build)
=== START OF READ SMART DATA SECTION ===
SMART Attributes Data Structure revision number: 16
ID# ATTRIBUTE_NAME          FLAG     VALUE WORST THRESH TYPE      UPDATED  WHEN_FAILED RAW_VALUE
  1 Raw_Read_Error_Rate     0x002f   200   200   051    Pre-fail  Always       -       0
  9 Power_On_Hours          0x0032   074   074   000    Old_age   Always       -       19344
194 Temperature_Celsius     0x0022   114   098   000    Old_age   Always       -       36 (Min/Max 21/53)
";

    const SMART_NVME: &str = "\
=== START OF SMART DATA SECTION ===
SMART/Health Information (NVMe Log 0x02)
Critical Warning:                   0x00
Temperature:                        41 Celsius
Available Spare:                    100%
";

    #[test]
    fn test_parse_hdparm_state() {
        assert_eq!(parse_hdparm_state("\n/dev/sda:\n drive state is:  active/idle\n"), Ok(true));
        assert_eq!(parse_hdparm_state("\n/dev/sdb:\n drive state is:  standby\n"), Ok(false));
        assert!(parse_hdparm_state("\n/dev/sdc:\n drive state is:  unknown\n").is_err());

        let state = |s: &str| parse_hdparm_state(&format!("\n/dev/sdd:\n drive state is:  {}\n", s));
        for spinning in ["active", "idle", "idle_a", "idle_b", "idle_c"] {
            assert_eq!(state(spinning), Ok(true), "{}", spinning);
        }
        for stopped in ["standby_y", "standby_z", "sleeping", "NVcache_spindown", "NVcache_spinup"] {
            assert_eq!(state(stopped), Ok(false), "{}", stopped);
        }
        assert!(parse_hdparm_state("").is_err());
    }

    #[test]
    fn test_parse_smart_temperature() {
        assert_eq!(parse_smart_temperature(SMART_ATA), Some(36.0));
        assert_eq!(parse_smart_temperature(SMART_NVME), Some(41.0));
        assert_eq!(parse_smart_temperature("nothing useful"), None);
    }

    #[test]
    fn test_activity_follows_stat_changes() {
        let dir = TempDir::new().unwrap();
        let stat = dir.path().join("stat");
        fs::write(&stat, "100 0 200 0").unwrap();

        let mut drive = Harddrive::new("sda", "/dev/sda", TemperatureLimits::new(40.0, 5.0))
            .with_stat_path(&stat);

        drive.update_activity();
        assert_eq!(drive.cached_activity(), 0.0);

        drive.update_activity();
        assert_eq!(drive.cached_activity(), 0.0);

        fs::write(&stat, "101 0 208 0").unwrap();
        drive.update_activity();
        assert_eq!(drive.cached_activity(), 1.0);

        drive.update_activity();
        assert_eq!(drive.cached_activity(), 0.0);
    }

    #[test]
    fn test_stat_path_from_device_name() {
        assert_eq!(
            block_stat_path(Path::new("/nonexistent/sdq")),
            Some(PathBuf::from("/sys/block/sdq/stat"))
        );
    }
}
