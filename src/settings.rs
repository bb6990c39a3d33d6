use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

const DEFAULT_SETTINGS_TOML: &str = include_str!("../settings.toml");

#[derive(Debug, Clone)]
pub struct Settings {
    pub api_base_url: String,
    pub image_proxy: Option<String>,
    pub watermark: String,
    pub file_prefix: String,
    pub output_dir: Option<String>,
    pub caption_color: String,
    pub caption_font_size: f32,
    pub caption_font_path: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_base_url: "https://api.kidscolor.app".to_string(),
            image_proxy: None,
            watermark: "kidscolor.app".to_string(),
            file_prefix: "kidscolor".to_string(),
            output_dir: None,
            caption_color: "black".to_string(),
            caption_font_size: 36.0,
            caption_font_path: None,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct SettingsFile {
    api: Option<ApiSettings>,
    export: Option<ExportSettings>,
    caption: Option<CaptionSettings>,
}

#[derive(Debug, Default, Deserialize)]
struct ApiSettings {
    base_url: Option<String>,
    image_proxy: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ExportSettings {
    watermark: Option<String>,
    file_prefix: Option<String>,
    output_dir: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct CaptionSettings {
    color: Option<String>,
    font_size: Option<f32>,
    font_path: Option<String>,
}

/// Loads settings by merging, in order: the working directory's
/// `settings.toml` / `settings.local.toml`, the home configuration, and any
/// explicitly requested extra file. Later files win per key.
pub fn load_settings(extra_path: Option<&Path>) -> Result<Settings> {
    let mut settings = Settings::default();
    ensure_home_settings_file()?;

    let mut ordered_paths = Vec::new();
    ordered_paths.push(PathBuf::from("settings.toml"));
    ordered_paths.push(PathBuf::from("settings.local.toml"));

    if let Some(home) = home_dir() {
        ordered_paths.push(home.join("settings.toml"));
        ordered_paths.push(home.join("settings.local.toml"));
    }

    if let Some(extra) = extra_path {
        if !extra.exists() {
            return Err(anyhow!("settings file not found: {}", extra.display()));
        }
        ordered_paths.push(extra.to_path_buf());
    }

    for path in ordered_paths {
        if path.exists() {
            let content = fs::read_to_string(&path)
                .with_context(|| format!("failed to read settings: {}", path.display()))?;
            let parsed: SettingsFile = toml::from_str(&content)
                .with_context(|| format!("failed to parse settings: {}", path.display()))?;
            settings.merge(parsed);
        }
    }

    Ok(settings)
}

impl Settings {
    fn merge(&mut self, incoming: SettingsFile) {
        if let Some(api) = incoming.api {
            if let Some(url) = api.base_url {
                if !url.trim().is_empty() {
                    self.api_base_url = url.trim_end_matches('/').to_string();
                }
            }
            if let Some(proxy) = api.image_proxy {
                if !proxy.trim().is_empty() {
                    self.image_proxy = Some(proxy);
                }
            }
        }
        if let Some(export) = incoming.export {
            if let Some(watermark) = export.watermark {
                if !watermark.trim().is_empty() {
                    self.watermark = watermark;
                }
            }
            if let Some(prefix) = export.file_prefix {
                if !prefix.trim().is_empty() {
                    self.file_prefix = prefix;
                }
            }
            if let Some(dir) = export.output_dir {
                if !dir.trim().is_empty() {
                    self.output_dir = Some(dir);
                }
            }
        }
        if let Some(caption) = incoming.caption {
            if let Some(color) = caption.color {
                if !color.trim().is_empty() {
                    self.caption_color = color;
                }
            }
            if let Some(size) = caption.font_size {
                if size > 0.0 {
                    self.caption_font_size = size;
                }
            }
            if let Some(path) = caption.font_path {
                if !path.trim().is_empty() {
                    self.caption_font_path = Some(path);
                }
            }
        }
    }
}

fn ensure_home_settings_file() -> Result<()> {
    let Some(home) = home_dir() else {
        return Ok(());
    };
    fs::create_dir_all(&home)
        .with_context(|| format!("failed to create settings directory: {}", home.display()))?;
    let path = home.join("settings.toml");
    if !path.exists() {
        fs::write(&path, DEFAULT_SETTINGS_TOML)
            .with_context(|| format!("failed to write settings: {}", path.display()))?;
    }
    Ok(())
}

pub(crate) fn home_dir() -> Option<PathBuf> {
    std::env::var("HOME").ok().and_then(|home| {
        let home = home.trim();
        if home.is_empty() {
            None
        } else {
            Some(Path::new(home).join(".kidscolor"))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::with_temp_home;

    #[test]
    fn extra_file_overrides_defaults() {
        with_temp_home(|_| {
            let dir = tempfile::tempdir().expect("tempdir");
            let path = dir.path().join("override.toml");
            fs::write(
                &path,
                "[api]\nbase_url = \"http://localhost:3000/\"\n[caption]\nfont_size = 48.0\n",
            )
            .expect("write settings");

            let settings = load_settings(Some(&path)).expect("load settings");
            assert_eq!(settings.api_base_url, "http://localhost:3000");
            assert_eq!(settings.caption_font_size, 48.0);
            assert_eq!(settings.file_prefix, "kidscolor");
        });
    }

    #[test]
    fn missing_extra_file_is_an_error() {
        with_temp_home(|_| {
            let err = load_settings(Some(Path::new("/nonexistent/settings.toml")))
                .expect_err("should fail");
            assert!(err.to_string().contains("settings file not found"));
        });
    }

    #[test]
    fn home_settings_file_is_seeded_with_defaults() {
        with_temp_home(|home| {
            load_settings(None).expect("load settings");
            assert!(home.join(".kidscolor").join("settings.toml").exists());
        });
    }
}
