use anyhow::{anyhow, Context, Result};
use directories::ProjectDirs;
use std::path::PathBuf;

pub const DEFAULT_PAGE_SIZE: usize = 10;

/// Runtime settings, taken from the command line first, then the
/// environment, then defaults.
#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: PathBuf,
    pub session_user: Option<String>,
    pub page_size: usize,
    pub json: bool,
}

/// Values given on the command line.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub db_file: Option<PathBuf>,
    pub user: Option<String>,
    pub page_size: Option<usize>,
    pub json: bool,
}

fn find_default_db_file() -> Option<PathBuf> {
    let base_dirs = ProjectDirs::from("com", "gozque", "taskdesk")?;
    let root_dir = base_dirs.data_dir();
    if !root_dir.exists() {
        if let Err(err) = std::fs::create_dir_all(root_dir) {
            tracing::warn!(error = %err, dir = %root_dir.display(), "failed to create data directory");
            return None;
        }
    }
    let mut path = PathBuf::from(root_dir);
    path.push("taskdesk.sqlite");
    Some(path)
}

impl Config {
    pub fn resolve(overrides: Overrides) -> Result<Config> {
        Config::resolve_with(overrides, |key| std::env::var(key).ok())
    }

    /// Resolve against an arbitrary environment lookup.
    pub fn resolve_with<F>(overrides: Overrides, env: F) -> Result<Config>
    where
        F: Fn(&str) -> Option<String>,
    {
        let db_path = overrides
            .db_file
            .or_else(|| env("TASKDESK_DB").map(PathBuf::from))
            .or_else(find_default_db_file)
            .ok_or(anyhow!("Failed to find database file."))?;

        let session_user = overrides
            .user
            .or_else(|| env("TASKDESK_USER"))
            .filter(|user| !user.trim().is_empty());

        let page_size = match overrides.page_size {
            Some(size) => size,
            None => match env("TASKDESK_PAGE_SIZE") {
                Some(raw) => raw
                    .trim()
                    .parse::<usize>()
                    .with_context(|| format!("TASKDESK_PAGE_SIZE is not a number: '{}'", raw))?,
                None => DEFAULT_PAGE_SIZE,
            },
        };
        if page_size == 0 {
            return Err(anyhow!("Page size must be at least 1."));
        }

        Ok(Config {
            db_path,
            session_user,
            page_size,
            json: overrides.json,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn flags_win_over_environment() {
        let overrides = Overrides {
            db_file: Some(PathBuf::from("/tmp/flag.sqlite")),
            user: Some("alice".to_string()),
            page_size: Some(25),
            json: true,
        };
        let config = Config::resolve_with(
            overrides,
            env(&[("TASKDESK_DB", "/tmp/env.sqlite"), ("TASKDESK_USER", "bob")]),
        )
        .expect("config");
        assert_eq!(config.db_path, PathBuf::from("/tmp/flag.sqlite"));
        assert_eq!(config.session_user.as_deref(), Some("alice"));
        assert_eq!(config.page_size, 25);
        assert!(config.json);
    }

    #[test]
    fn environment_fills_the_gaps() {
        let config = Config::resolve_with(
            Overrides::default(),
            env(&[
                ("TASKDESK_DB", "/tmp/env.sqlite"),
                ("TASKDESK_USER", "bob"),
                ("TASKDESK_PAGE_SIZE", "5"),
            ]),
        )
        .expect("config");
        assert_eq!(config.db_path, PathBuf::from("/tmp/env.sqlite"));
        assert_eq!(config.session_user.as_deref(), Some("bob"));
        assert_eq!(config.page_size, 5);
    }

    #[test]
    fn bad_page_size_is_an_error() {
        let overrides = Overrides {
            db_file: Some(PathBuf::from("/tmp/x.sqlite")),
            ..Overrides::default()
        };
        assert!(Config::resolve_with(overrides.clone(), env(&[("TASKDESK_PAGE_SIZE", "ten")])).is_err());
        assert!(Config::resolve_with(overrides, env(&[("TASKDESK_PAGE_SIZE", "0")])).is_err());
    }
}
