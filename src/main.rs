use std::collections::BTreeSet;
use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, Subcommand};

use chronofile::config::Config;
use chronofile::domain::{format_duration, format_local_time, to_local};
use chronofile::history::History;
use chronofile::logging::init_logging;
use chronofile::paths::{resolve_config_path, resolve_history_path};
use chronofile::store::{Action, ActionStore, Notice, Subscription};

#[derive(Debug, Parser)]
#[command(name = "chronofile", about = "Log what you are doing now; keep a gapless timeline")]
struct Cli {
	#[arg(long, global = true)]
	history: Option<PathBuf>,
	#[arg(long, global = true)]
	config: Option<PathBuf>,
	#[arg(long, global = true)]
	log_level: Option<String>,
	#[arg(long, global = true, default_value_t = 20)]
	slow_reduction_ms: u64,
	#[command(subcommand)]
	command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
	/// Close the open interval under ACTIVITY and start a new one now
	Add {
		activity: String,
		#[arg(long)]
		note: Option<String>,
		#[arg(long = "lat", requires = "longitude", allow_hyphen_values = true)]
		latitude: Option<f64>,
		#[arg(long = "long", requires = "latitude", allow_hyphen_values = true)]
		longitude: Option<f64>,
	},
	Edit {
		start_time: i64,
		new_start_time: String,
		activity: String,
		#[arg(long, default_value = "")]
		note: String,
	},
	Remove {
		#[arg(required = true)]
		start_times: Vec<i64>,
	},
	List {
		#[arg(long, default_value_t = 20)]
		limit: usize,
	},
	Status,
	/// Re-read history and config from disk, rewriting the history canonically
	Reload,
	Config {
		#[command(subcommand)]
		command: ConfigCommand,
	},
}

#[derive(Debug, Subcommand)]
enum ConfigCommand {
	Show,
	/// Validate FILE and install it as the config
	Set { file: PathBuf },
}

fn main() {
	if let Err(err) = run() {
		eprintln!("error: {err}");
		std::process::exit(1);
	}
}

fn run() -> Result<(), Box<dyn Error>> {
	let cli = Cli::parse();
	let _logger = init_logging(cli.log_level.as_deref())?;

	let history_path = resolve_history_path(cli.history);
	let config_path = resolve_config_path(cli.config);
	let mut store = ActionStore::new()
		.with_slow_reduction_threshold(Duration::from_millis(cli.slow_reduction_ms));
	let notices = store.notices();
	hydrate(&mut store, &history_path, &config_path)?;

	match cli.command.unwrap_or(Command::Status) {
		Command::Add {
			activity,
			note,
			latitude,
			longitude,
		} => {
			let lat_long = latitude.zip(longitude);
			store.dispatch(Action::AddEntry {
				activity: activity.clone(),
				note,
				lat_long,
			});
			flush_notices(&notices)?;
			println!("logged {activity}");
		}
		Command::Edit {
			start_time,
			new_start_time,
			activity,
			note,
		} => {
			store.dispatch(Action::EditEntry {
				old_start_time: start_time,
				new_start_time,
				activity: activity.clone(),
				note,
			});
			flush_notices(&notices)?;
			println!("updated {activity}");
		}
		Command::Remove { start_times } => {
			let start_times = start_times.into_iter().collect::<BTreeSet<_>>();
			store.dispatch(Action::RemoveEntries(start_times));
			flush_notices(&notices)?;
			println!("removed entries");
		}
		Command::List { limit } => {
			print_history(loaded_history(&store)?, limit);
		}
		Command::Status => {
			print_status(loaded_history(&store)?);
		}
		Command::Reload => {
			let history = loaded_history(&store)?;
			println!(
				"reloaded {} entries from {} and config from {}",
				history.entries().len(),
				history_path.display(),
				config_path.display()
			);
		}
		Command::Config { command } => match command {
			ConfigCommand::Show => {
				let config = store.current_state().config.clone().unwrap_or_default();
				print!("{}", config.to_text()?);
			}
			ConfigCommand::Set { file } => {
				let text = fs::read_to_string(&file)?;
				store.dispatch(Action::SetConfigFromText(text.clone()));
				flush_notices(&notices)?;
				write_config(&config_path, &text)?;
			}
		},
	}

	flush_notices(&notices)
}

fn hydrate(store: &mut ActionStore, history_path: &Path, config_path: &Path) -> Result<(), Box<dyn Error>> {
	store.dispatch(Action::SetConfigFromFile(Config::load(config_path)?));
	store.dispatch(Action::SetHistory(History::load(history_path)?));
	Ok(())
}

fn loaded_history(store: &ActionStore) -> Result<&History, Box<dyn Error>> {
	store
		.current_state()
		.history
		.as_ref()
		.ok_or_else(|| "history is not loaded".into())
}

fn flush_notices(notices: &Subscription<Notice>) -> Result<(), Box<dyn Error>> {
	let mut failures = Vec::new();
	for notice in notices.drain() {
		match notice {
			Notice::Info(message) => println!("{message}"),
			Notice::Failure(message) => failures.push(message),
		}
	}

	if failures.is_empty() {
		Ok(())
	} else {
		Err(failures.join("; ").into())
	}
}

fn write_config(path: &Path, text: &str) -> Result<(), Box<dyn Error>> {
	if let Some(parent) = path.parent() {
		if !parent.as_os_str().is_empty() {
			fs::create_dir_all(parent)?;
		}
	}
	fs::write(path, text)?;
	Ok(())
}

fn print_history(history: &History, limit: usize) {
	let skip = history.entries().len().saturating_sub(limit);
	let mut current_day = None;

	for interval in history.intervals().skip(skip) {
		let entry = interval.entry;
		let day = to_local(entry.start_time).map(|local| local.date_naive());
		if day != current_day {
			match day {
				Some(day) => println!("\n{}", day.format("%A %Y-%m-%d")),
				None => println!("\n(unknown date)"),
			}
			current_day = day;
		}

		let mut line = format!(
			"  {} {} | {} | {}",
			format_local_time(entry.start_time),
			format_duration(interval.duration_seconds()),
			entry.start_time,
			entry.activity
		);
		if let Some(note) = &entry.note {
			line.push_str(&format!(" ({note})"));
		}
		if let Some((latitude, longitude)) = entry.lat_long {
			line.push_str(&format!(" @ {latitude:.5},{longitude:.5}"));
		}
		println!("{line}");
	}

	if history.entries().is_empty() {
		println!("no entries yet");
	}
	println!();
	print_status(history);
}

fn print_status(history: &History) {
	println!(
		"current activity started at {} ({} ago)",
		format_local_time(history.current_activity_start_time()),
		history.fuzzy_elapsed()
	);
}
