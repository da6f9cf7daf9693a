//! One-time install of the forwarding hook into Claude Code's config.
//!
//! Writes a small shell script under `~/.claude/hooks/` and registers
//! it in `settings.json` for the four lifecycle events the daemon
//! understands. Pure file I/O; the daemon works without it, it just
//! receives no events until the hook is wired up.

use fs_err as fs;
use serde_json::{json, Map, Value};
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use thiserror::Error;
use tracing::info;

pub const HOOK_SCRIPT_NAME: &str = "perch-hook.sh";

const HOOK_COMMAND: &str = "~/.claude/hooks/perch-hook.sh";

// (hook event, wants a "*" tool matcher)
const HOOK_EVENTS: [(&str, bool); 4] = [
    ("SessionStart", false),
    ("PreToolUse", true),
    ("PostToolUse", true),
    ("SessionEnd", false),
];

const HOOK_SCRIPT: &str = r#"#!/bin/sh
# Forwards lifecycle JSON from stdin to the perch daemon socket.
SOCKET="${PERCH_SOCKET:-/tmp/perch.sock}"
PAYLOAD=$(cat)
[ -S "$SOCKET" ] || exit 0
if command -v nc >/dev/null 2>&1; then
    printf '%s' "$PAYLOAD" | nc -U "$SOCKET" >/dev/null 2>&1
elif command -v socat >/dev/null 2>&1; then
    printf '%s' "$PAYLOAD" | socat - "UNIX-CONNECT:$SOCKET" >/dev/null 2>&1
fi
exit 0
"#;

#[derive(Debug, Error)]
pub enum InstallError {
    #[error("claude config directory not found at {0}")]
    ClaudeDirMissing(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("settings.json is not usable JSON: {0}")]
    Settings(#[from] serde_json::Error),
}

/// Installs the hook script and settings entries. Idempotent: an
/// entry already referencing the script is not duplicated, and
/// unrelated hooks are preserved.
pub fn install(claude_dir: &Path) -> Result<(), InstallError> {
    if !claude_dir.exists() {
        return Err(InstallError::ClaudeDirMissing(
            claude_dir.display().to_string(),
        ));
    }

    let hooks_dir = claude_dir.join("hooks");
    fs::create_dir_all(&hooks_dir)?;

    let script_path = hooks_dir.join(HOOK_SCRIPT_NAME);
    fs::write(&script_path, HOOK_SCRIPT)?;
    fs::set_permissions(&script_path, std::fs::Permissions::from_mode(0o755))?;
    info!(path = %script_path.display(), "Installed hook script");

    update_settings(&claude_dir.join("settings.json"))?;
    Ok(())
}

/// Whether any hook entry in settings.json references our script.
pub fn is_installed(claude_dir: &Path) -> bool {
    let Ok(data) = fs::read(claude_dir.join("settings.json")) else {
        return false;
    };
    let Ok(root) = serde_json::from_slice::<Value>(&data) else {
        return false;
    };
    root.get("hooks")
        .and_then(Value::as_object)
        .map(|hooks| {
            hooks.values().any(|value| {
                value
                    .as_array()
                    .map(|entries| entries.iter().any(entry_references_hook))
                    .unwrap_or(false)
            })
        })
        .unwrap_or(false)
}

/// Removes the hook script and strips our entries from settings.json,
/// deleting emptied event arrays and an emptied `hooks` object.
pub fn uninstall(claude_dir: &Path) -> Result<(), InstallError> {
    let script_path = claude_dir.join("hooks").join(HOOK_SCRIPT_NAME);
    if script_path.exists() {
        fs::remove_file(&script_path)?;
    }

    let settings_path = claude_dir.join("settings.json");
    if !settings_path.exists() {
        return Ok(());
    }
    let mut root = load_settings(&settings_path)?;

    let mut hooks_empty = false;
    if let Some(hooks) = root.get_mut("hooks").and_then(Value::as_object_mut) {
        let events: Vec<String> = hooks.keys().cloned().collect();
        for event in events {
            if let Some(entries) = hooks.get_mut(&event).and_then(Value::as_array_mut) {
                entries.retain(|entry| !entry_references_hook(entry));
                if entries.is_empty() {
                    hooks.remove(&event);
                }
            }
        }
        hooks_empty = hooks.is_empty();
    } else {
        return Ok(());
    }
    if hooks_empty {
        root.remove("hooks");
    }

    write_settings(&settings_path, &root)?;
    info!("Uninstalled perch hooks");
    Ok(())
}

fn update_settings(settings_path: &Path) -> Result<(), InstallError> {
    let mut root = load_settings(settings_path)?;

    let hooks_value = root
        .entry("hooks".to_string())
        .or_insert_with(|| json!({}));
    if !hooks_value.is_object() {
        *hooks_value = json!({});
    }
    let Some(hooks) = hooks_value.as_object_mut() else {
        return Ok(());
    };

    for (event, wants_matcher) in HOOK_EVENTS {
        let Some(entries) = hooks
            .entry(event.to_string())
            .or_insert_with(|| json!([]))
            .as_array_mut()
        else {
            continue;
        };
        if entries.iter().any(entry_references_hook) {
            continue;
        }
        entries.push(hook_entry(wants_matcher));
    }

    write_settings(settings_path, &root)?;
    info!(path = %settings_path.display(), "Registered perch hooks in settings");
    Ok(())
}

fn hook_entry(wants_matcher: bool) -> Value {
    let hooks = json!([{ "type": "command", "command": HOOK_COMMAND }]);
    if wants_matcher {
        json!({ "matcher": "*", "hooks": hooks })
    } else {
        json!({ "hooks": hooks })
    }
}

fn entry_references_hook(entry: &Value) -> bool {
    entry
        .get("hooks")
        .and_then(Value::as_array)
        .map(|hooks| {
            hooks.iter().any(|hook| {
                hook.get("command")
                    .and_then(Value::as_str)
                    .map(|command| command.contains(HOOK_SCRIPT_NAME))
                    .unwrap_or(false)
            })
        })
        .unwrap_or(false)
}

fn load_settings(settings_path: &Path) -> Result<Map<String, Value>, InstallError> {
    if !settings_path.exists() {
        return Ok(Map::new());
    }
    let data = fs::read(settings_path)?;
    // Refuse to clobber a settings file we cannot parse.
    Ok(serde_json::from_slice(&data)?)
}

fn write_settings(settings_path: &Path, root: &Map<String, Value>) -> Result<(), InstallError> {
    let mut data = serde_json::to_vec_pretty(root)?;
    data.push(b'\n');
    fs::write(settings_path, data)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claude_dir(dir: &tempfile::TempDir) -> std::path::PathBuf {
        let path = dir.path().join(".claude");
        std::fs::create_dir_all(&path).expect("claude dir");
        path
    }

    fn read_settings(claude_dir: &Path) -> Value {
        let data = std::fs::read(claude_dir.join("settings.json")).expect("settings");
        serde_json::from_slice(&data).expect("settings json")
    }

    #[test]
    fn install_creates_script_and_settings() {
        let dir = tempfile::tempdir().expect("temp dir");
        let claude = claude_dir(&dir);

        install(&claude).expect("install");

        let script = claude.join("hooks").join(HOOK_SCRIPT_NAME);
        assert!(script.exists());
        let mode = std::fs::metadata(&script)
            .expect("metadata")
            .permissions()
            .mode();
        assert_eq!(mode & 0o755, 0o755);

        let settings = read_settings(&claude);
        for (event, wants_matcher) in HOOK_EVENTS {
            let entries = settings["hooks"][event].as_array().expect("entries");
            assert_eq!(entries.len(), 1);
            assert_eq!(entries[0].get("matcher").is_some(), wants_matcher);
        }
        assert!(is_installed(&claude));
    }

    #[test]
    fn install_is_idempotent() {
        let dir = tempfile::tempdir().expect("temp dir");
        let claude = claude_dir(&dir);

        install(&claude).expect("first install");
        install(&claude).expect("second install");

        let settings = read_settings(&claude);
        for (event, _) in HOOK_EVENTS {
            assert_eq!(settings["hooks"][event].as_array().expect("entries").len(), 1);
        }
    }

    #[test]
    fn install_preserves_existing_hooks() {
        let dir = tempfile::tempdir().expect("temp dir");
        let claude = claude_dir(&dir);
        let existing = json!({
            "model": "whatever",
            "hooks": {
                "PreToolUse": [
                    { "matcher": "*", "hooks": [{ "type": "command", "command": "other-tool.sh" }] }
                ]
            }
        });
        std::fs::write(
            claude.join("settings.json"),
            serde_json::to_vec_pretty(&existing).expect("serialize"),
        )
        .expect("seed settings");

        install(&claude).expect("install");

        let settings = read_settings(&claude);
        assert_eq!(settings["model"], "whatever");
        let pre = settings["hooks"]["PreToolUse"].as_array().expect("entries");
        assert_eq!(pre.len(), 2);

        uninstall(&claude).expect("uninstall");
        let settings = read_settings(&claude);
        let pre = settings["hooks"]["PreToolUse"].as_array().expect("entries");
        assert_eq!(pre.len(), 1);
        assert!(pre[0]["hooks"][0]["command"]
            .as_str()
            .expect("command")
            .contains("other-tool.sh"));
    }

    #[test]
    fn uninstall_removes_entries_and_script() {
        let dir = tempfile::tempdir().expect("temp dir");
        let claude = claude_dir(&dir);

        install(&claude).expect("install");
        uninstall(&claude).expect("uninstall");

        assert!(!claude.join("hooks").join(HOOK_SCRIPT_NAME).exists());
        assert!(!is_installed(&claude));
        let settings = read_settings(&claude);
        assert!(settings.get("hooks").is_none());
    }

    #[test]
    fn missing_claude_dir_errors() {
        let dir = tempfile::tempdir().expect("temp dir");
        let missing = dir.path().join(".claude");
        assert!(matches!(
            install(&missing),
            Err(InstallError::ClaudeDirMissing(_))
        ));
    }

    #[test]
    fn is_installed_false_without_settings() {
        let dir = tempfile::tempdir().expect("temp dir");
        let claude = claude_dir(&dir);
        assert!(!is_installed(&claude));
    }
}
