use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use chrono::Local;
use kairos_core::{io::append_text, rez::render_value, Rez};
use serde_json::{json, Map, Value};
use tracing::{debug, info};

use super::{param_bool, param_f64, param_str, param_u32};
use crate::{context::ActionContext, error::ActionError};

type Flds = Map<String, Value>;

/// Relative targets land under the output directory when one is configured.
fn resolve_output_path(file: &str, output_dir: Option<PathBuf>) -> PathBuf {
    let path = Path::new(file);
    match output_dir {
        Some(dir) if path.is_relative() => dir.join(path),
        _ => path.to_path_buf(),
    }
}

pub(super) fn file_append(
    tag: &str,
    flds: &Flds,
    rez: Option<Rez>,
    ctx: &dyn ActionContext,
) -> Result<Rez, ActionError> {
    let file = param_str(flds, "file")
        .ok_or_else(|| ActionError::failed("FileAppend: no file given"))?;
    let path = resolve_output_path(&file, ctx.output_dir());

    // a non-null incoming result wins over the static payload
    let content = rez
        .as_ref()
        .and_then(Rez::result_value)
        .cloned()
        .or_else(|| flds.get("payload").filter(|v| !v.is_null()).cloned());

    let mut text = String::new();
    if let Some(header) = param_str(flds, "header") {
        text.push_str(&format!(
            "==== {header} [{tag}] {} ====\n",
            Local::now().format("%Y-%m-%d %H:%M:%S")
        ));
    }
    if let Some(v) = &content {
        text.push_str(&render_value(v));
    }
    text.push('\n');

    append_text(&path, &text)
        .map_err(|e| ActionError::failed(format!("FileAppend to {}: {e}", path.display())))?;
    debug!(%tag, file = %path.display(), bytes = text.len(), "appended");

    let mut out = Rez::passthrough(rez).info(json!({
        "action": "FileAppend",
        "file": path.display().to_string(),
    }));
    if let Some(v) = content {
        out.result = Some(v);
    }
    Ok(out)
}

fn gpio_failed(op: &str, pin: u32, e: std::io::Error) -> ActionError {
    ActionError::failed(format!("{op} gpio{pin}: {e}"))
}

fn pin_param(op: &str, flds: &Flds) -> Result<u32, ActionError> {
    param_u32(flds, "pin").ok_or_else(|| ActionError::failed(format!("{op}: no pin given")))
}

/// Export `pin` (if needed) and configure it as an output.
fn gpio_prepare(root: &Path, pin: u32) -> std::io::Result<PathBuf> {
    let dir = root.join(format!("gpio{pin}"));
    if !dir.exists() {
        fs::write(root.join("export"), pin.to_string())?;
    }
    fs::write(dir.join("direction"), "out")?;
    Ok(dir)
}

fn gpio_write(root: &Path, pin: u32, high: bool) -> std::io::Result<()> {
    let dir = gpio_prepare(root, pin)?;
    fs::write(dir.join("value"), if high { "1" } else { "0" })
}

pub(super) fn gpio_set(
    flds: &Flds,
    rez: Option<Rez>,
    ctx: &dyn ActionContext,
) -> Result<Rez, ActionError> {
    let pin = pin_param("GpioSet", flds)?;
    let high = param_bool(flds, "value").unwrap_or(true);
    gpio_write(&ctx.gpio_root(), pin, high).map_err(|e| gpio_failed("GpioSet", pin, e))?;
    info!(pin, value = high, "gpio set");
    Ok(Rez::successor(rez).result(json!({"pin": pin, "value": high})))
}

pub(super) fn gpio_toggle(
    flds: &Flds,
    rez: Option<Rez>,
    ctx: &dyn ActionContext,
) -> Result<Rez, ActionError> {
    let pin = pin_param("GpioToggle", flds)?;
    let root = ctx.gpio_root();
    let dir = gpio_prepare(&root, pin).map_err(|e| gpio_failed("GpioToggle", pin, e))?;
    let current = fs::read_to_string(dir.join("value"))
        .map(|s| s.trim() == "1")
        .unwrap_or(false);
    fs::write(dir.join("value"), if current { "0" } else { "1" })
        .map_err(|e| gpio_failed("GpioToggle", pin, e))?;
    info!(pin, value = !current, "gpio toggled");
    Ok(Rez::successor(rez).result(json!({"pin": pin, "value": !current})))
}

fn exported_pins(root: &Path) -> std::io::Result<Vec<u32>> {
    let mut pins: Vec<u32> = fs::read_dir(root)?
        .filter_map(|e| e.ok())
        .filter_map(|e| {
            e.file_name()
                .to_str()
                .and_then(|n| n.strip_prefix("gpio"))
                .and_then(|n| n.parse().ok())
        })
        .collect();
    pins.sort_unstable();
    Ok(pins)
}

pub(super) fn gpio_cleanup(
    flds: &Flds,
    rez: Option<Rez>,
    ctx: &dyn ActionContext,
) -> Result<Rez, ActionError> {
    let root = ctx.gpio_root();
    let pins: Vec<u32> = match flds.get("pins") {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_u64().and_then(|p| u32::try_from(p).ok()))
            .collect(),
        _ => exported_pins(&root)
            .map_err(|e| ActionError::failed(format!("GpioCleanup: {e}")))?,
    };
    for pin in &pins {
        if root.join(format!("gpio{pin}")).exists() {
            fs::write(root.join("unexport"), pin.to_string())
                .map_err(|e| gpio_failed("GpioCleanup", *pin, e))?;
        }
    }
    info!(?pins, "gpio cleaned up");
    Ok(Rez::successor(rez).result(json!({"unexported": pins})))
}

pub(super) fn sleep(flds: &Flds, rez: Option<Rez>) -> Result<Rez, ActionError> {
    let seconds = param_f64(flds, "seconds").unwrap_or(1.0).max(0.0);
    let pause = Duration::try_from_secs_f64(seconds)
        .map_err(|e| ActionError::failed(format!("Sleep: seconds {seconds}: {e}")))?;
    thread::sleep(pause);
    Ok(Rez::passthrough(rez))
}

fn hostname() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.is_empty())
        .or_else(|| {
            fs::read_to_string("/etc/hostname")
                .ok()
                .map(|s| s.trim().to_string())
                .filter(|h| !h.is_empty())
        })
        .unwrap_or_else(|| "unknown".to_string())
}

pub(super) fn sys_info(rez: Option<Rez>) -> Rez {
    let cpus = thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
    Rez::successor(rez).result(json!({
        "hostname": hostname(),
        "os": std::env::consts::OS,
        "family": std::env::consts::FAMILY,
        "arch": std::env::consts::ARCH,
        "cpus": cpus,
        "pid": std::process::id(),
        "time": Local::now().to_rfc3339(),
    }))
}

#[cfg(test)]
mod tests {
    use super::super::{testing::Bare, Action};
    use super::*;

    #[test]
    fn sleep_rejects_unrepresentable_pauses() {
        let ctx = Bare::default();
        let forever = Action::Sleep { seconds: Some(1e20) };
        assert!(forever.execute("t", None, &ctx).is_err());

        let mut flds = serde_json::Map::new();
        flds.insert("seconds".into(), json!("inf"));
        let late = Action::Sleep { seconds: None };
        assert!(late.execute("t", Some(Rez::with_flds(flds)), &ctx).is_err());

        let brief = Action::Sleep { seconds: Some(0.0) };
        assert!(brief.execute("t", None, &ctx).is_ok());
    }

    #[test]
    fn appends_payload_when_no_result() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("o.txt");
        let action = Action::FileAppend {
            file: Some(file.display().to_string()),
            payload: Some(json!({"k": "v"})),
            header: None,
        };
        let ctx = Bare::default();
        action.execute("bar:foo", None, &ctx).unwrap();
        action.execute("bar:foo", None, &ctx).unwrap();

        let text = fs::read_to_string(&file).unwrap();
        assert_eq!(text.lines().count(), 2);
        assert!(text.lines().all(|l| l == r#"{"k":"v"}"#));
    }

    #[test]
    fn incoming_result_overrides_payload_and_header_carries_tag() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = Bare {
            output: Some(dir.path().to_path_buf()),
            ..Bare::default()
        };
        let action = Action::FileAppend {
            file: Some("rel.txt".into()),
            payload: Some(json!("static")),
            header: Some("run".into()),
        };
        let rez = Rez::with_result(json!("dynamic"));
        let out = action.execute("bar:foo", Some(rez), &ctx).unwrap();
        assert_eq!(out.result, Some(json!("dynamic")));

        let text = fs::read_to_string(dir.path().join("rel.txt")).unwrap();
        let mut lines = text.lines();
        let header = lines.next().unwrap();
        assert!(header.starts_with("==== run [bar:foo]"));
        assert_eq!(lines.next(), Some("dynamic"));
    }

    #[test]
    fn file_may_come_from_field_bag() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("late.txt");
        let mut flds = Map::new();
        flds.insert("file".into(), json!(file.display().to_string()));
        let action = Action::FileAppend {
            file: None,
            payload: Some(json!("x")),
            header: None,
        };
        action
            .execute("t", Some(Rez::with_flds(flds)), &Bare::default())
            .unwrap();
        assert_eq!(fs::read_to_string(file).unwrap(), "x\n");
    }

    #[test]
    fn missing_file_fails() {
        let action = Action::FileAppend {
            file: None,
            payload: None,
            header: None,
        };
        assert!(action.execute("t", None, &Bare::default()).is_err());
    }

    fn fake_sysfs(pin: u32) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let pin_dir = dir.path().join(format!("gpio{pin}"));
        fs::create_dir(&pin_dir).unwrap();
        fs::write(pin_dir.join("value"), "0").unwrap();
        dir
    }

    #[test]
    fn gpio_set_and_toggle_write_sysfs_files() {
        let sysfs = fake_sysfs(17);
        let ctx = Bare {
            gpio: Some(sysfs.path().to_path_buf()),
            ..Bare::default()
        };
        let value = sysfs.path().join("gpio17/value");

        Action::GpioSet {
            pin: Some(17),
            value: Some(true),
        }
        .execute("t", None, &ctx)
        .unwrap();
        assert_eq!(fs::read_to_string(&value).unwrap(), "1");
        assert_eq!(
            fs::read_to_string(sysfs.path().join("gpio17/direction")).unwrap(),
            "out"
        );

        let out = Action::GpioToggle { pin: Some(17) }
            .execute("t", None, &ctx)
            .unwrap();
        assert_eq!(fs::read_to_string(&value).unwrap(), "0");
        assert_eq!(out.result, Some(json!({"pin": 17, "value": false})));
    }

    #[test]
    fn gpio_cleanup_unexports_listed_pins() {
        let sysfs = fake_sysfs(4);
        let ctx = Bare {
            gpio: Some(sysfs.path().to_path_buf()),
            ..Bare::default()
        };
        Action::GpioCleanup { pins: None }
            .execute("t", None, &ctx)
            .unwrap();
        assert_eq!(
            fs::read_to_string(sysfs.path().join("unexport")).unwrap(),
            "4"
        );
    }

    #[test]
    fn sys_info_reports_platform() {
        let out = sys_info(None);
        let result = out.result.unwrap();
        assert_eq!(result["os"], json!(std::env::consts::OS));
        assert!(result["cpus"].as_u64().unwrap() >= 1);
    }
}
