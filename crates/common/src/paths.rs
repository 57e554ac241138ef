use anyhow::Result;
use std::path::{Path, PathBuf};

pub const PTYEXEC_DIR_NAME: &str = ".ptyexec";
pub const SETTINGS_FILE_NAME: &str = "settings.toml";

pub fn ptyexec_home() -> Result<PathBuf> {
    if let Ok(override_home) = std::env::var("PTYEXEC_HOME") {
        let trimmed = override_home.trim();
        if !trimmed.is_empty() {
            return Ok(PathBuf::from(trimmed));
        }
    }
    Ok(dirs::home_dir()
        .ok_or_else(|| anyhow::anyhow!("No home directory found"))?
        .join(PTYEXEC_DIR_NAME))
}

/// Global settings file (`$PTYEXEC_HOME/settings.toml`).
pub fn settings_file() -> Result<PathBuf> {
    Ok(ptyexec_home()?.join(SETTINGS_FILE_NAME))
}

/// Per-directory settings file (`<dir>/.ptyexec/settings.toml`).
pub fn directory_settings_file(dir: &Path) -> PathBuf {
    dir.join(PTYEXEC_DIR_NAME).join(SETTINGS_FILE_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_home_honors_override() {
        std::env::set_var("PTYEXEC_HOME", "/tmp/ptyexec-home");
        let home = ptyexec_home().unwrap();
        let settings = settings_file().unwrap();
        std::env::remove_var("PTYEXEC_HOME");

        assert_eq!(home, PathBuf::from("/tmp/ptyexec-home"));
        assert_eq!(settings, PathBuf::from("/tmp/ptyexec-home/settings.toml"));
    }

    #[test]
    #[serial]
    fn test_blank_override_falls_back_to_home_dir() {
        std::env::set_var("PTYEXEC_HOME", "   ");
        let home = ptyexec_home();
        std::env::remove_var("PTYEXEC_HOME");

        if let Ok(path) = home {
            assert!(path.ends_with(PTYEXEC_DIR_NAME));
        }
    }

    #[test]
    fn test_directory_settings_file() {
        let path = directory_settings_file(Path::new("/work/project"));
        assert_eq!(path, PathBuf::from("/work/project/.ptyexec/settings.toml"));
    }

    #[test]
    #[serial]
    fn test_paths_are_consistent() {
        let Ok(home) = ptyexec_home() else {
            return;
        };
        assert!(settings_file().unwrap().starts_with(&home));
        assert!(directory_settings_file(&home).starts_with(&home));
    }
}
