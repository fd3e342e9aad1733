use std::env;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

pub const HISTORY_FILE: &str = "chronofile.jsonl";
pub const CONFIG_FILE: &str = "chronofile.toml";

const HISTORY_ENV: &str = "CHRONOFILE_HISTORY";
const CONFIG_ENV: &str = "CHRONOFILE_CONFIG";
const DATA_DIR_ENV: &str = "CHRONOFILE_DATA_DIR";

/// Picks the history file: `--history`, then `CHRONOFILE_HISTORY`, then the data dir.
pub fn resolve_history_path(cli_path: Option<PathBuf>) -> PathBuf {
	resolve(cli_path, env::var_os(HISTORY_ENV), &data_dir(), HISTORY_FILE)
}

/// Picks the config file: `--config`, then `CHRONOFILE_CONFIG`, then the data dir.
pub fn resolve_config_path(cli_path: Option<PathBuf>) -> PathBuf {
	resolve(cli_path, env::var_os(CONFIG_ENV), &data_dir(), CONFIG_FILE)
}

fn resolve(
	cli_path: Option<PathBuf>,
	env_path: Option<OsString>,
	data_dir: &Path,
	file_name: &str,
) -> PathBuf {
	if let Some(path) = cli_path {
		return absolutize(path);
	}

	if let Some(path) = env_path {
		let path = PathBuf::from(path);
		if !path.as_os_str().is_empty() {
			return absolutize(path);
		}
	}

	absolutize(data_dir.join(file_name))
}

pub fn data_dir() -> PathBuf {
	if let Some(path) = env::var_os(DATA_DIR_ENV) {
		if !path.is_empty() {
			return PathBuf::from(path);
		}
	}

	#[cfg(target_os = "windows")]
	{
		if let Some(path) = env::var_os("APPDATA") {
			return PathBuf::from(path).join("chronofile");
		}
	}

	if let Some(path) = env::var_os("XDG_DATA_HOME") {
		return PathBuf::from(path).join("chronofile");
	}

	if let Some(path) = env::var_os("HOME") {
		return PathBuf::from(path)
			.join(".local")
			.join("share")
			.join("chronofile");
	}

	PathBuf::from(".chronofile")
}

fn absolutize(path: PathBuf) -> PathBuf {
	if path.is_absolute() {
		return path;
	}

	match env::current_dir() {
		Ok(cwd) => cwd.join(path),
		Err(_) => path,
	}
}
