use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{errors::Error, plugins::json_feed::JSON_FEED_PLUGIN_PATH, Result};

/// Typed configuration for the notifier bot.
#[derive(Clone, Debug)]
pub struct Config {
    // Chat transport
    pub telegram_bot_token: String,
    pub telegram_allowed_users: Vec<i64>,
    pub command_prefix: Option<String>,

    // Plugins
    pub plugins: Vec<String>,
    pub scrape_timeout: Duration,

    // Storage
    pub data_dir: PathBuf,

    // Polling
    pub poll_interval: Duration,
    pub poll_stagger: Duration,

    // Interactions
    pub reaction_handler_ttl: Duration,
    pub error_diagnostic_limit: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            telegram_bot_token: String::new(),
            telegram_allowed_users: Vec::new(),
            command_prefix: Some("$".to_string()),
            plugins: vec![JSON_FEED_PLUGIN_PATH.to_string()],
            scrape_timeout: Duration::from_secs(30),
            data_dir: PathBuf::from("./hyacinth-data"),
            poll_interval: Duration::from_secs(600),
            poll_stagger: Duration::from_secs(15),
            reaction_handler_ttl: Duration::from_secs(7 * 24 * 3600),
            error_diagnostic_limit: 1900,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));
        let defaults = Self::default();

        let telegram_bot_token = env_str("TELEGRAM_BOT_TOKEN").unwrap_or_default();
        if telegram_bot_token.trim().is_empty() {
            return Err(Error::Config(
                "TELEGRAM_BOT_TOKEN environment variable is required".to_string(),
            ));
        }
        // Unset or blank admits everyone; a malformed entry is fatal rather than dropped.
        let telegram_allowed_users =
            parse_csv_i64("TELEGRAM_ALLOWED_USERS", env_str("TELEGRAM_ALLOWED_USERS"))?;

        // An explicitly empty prefix disables prefix commands (mentions still work).
        let command_prefix = match env::var("COMMAND_PREFIX") {
            Ok(v) => non_empty(v.trim().to_string()),
            Err(_) => defaults.command_prefix,
        };

        let plugins = parse_csv(env_str("HYACINTH_PLUGINS")).unwrap_or(defaults.plugins);
        let scrape_timeout = env_u64("SCRAPE_TIMEOUT_SECS")
            .map(Duration::from_secs)
            .unwrap_or(defaults.scrape_timeout);

        let data_dir = env_str("HYACINTH_DATA_DIR")
            .and_then(non_empty)
            .map(PathBuf::from)
            .unwrap_or(defaults.data_dir);

        let poll_interval = env_u64("POLL_INTERVAL_SECS")
            .map(|s| Duration::from_secs(s.max(1)))
            .unwrap_or(defaults.poll_interval);
        let poll_stagger = env_u64("POLL_STAGGER_SECS")
            .map(Duration::from_secs)
            .unwrap_or(defaults.poll_stagger);

        let reaction_handler_ttl = env_u64("REACTION_HANDLER_TTL_SECS")
            .map(Duration::from_secs)
            .unwrap_or(defaults.reaction_handler_ttl);
        let error_diagnostic_limit = env_usize("ERROR_DIAGNOSTIC_LIMIT")
            .unwrap_or(defaults.error_diagnostic_limit)
            .max(100);

        Ok(Self {
            telegram_bot_token,
            telegram_allowed_users,
            command_prefix,
            plugins,
            scrape_timeout,
            data_dir,
            poll_interval,
            poll_stagger,
            reaction_handler_ttl,
            error_diagnostic_limit,
        })
    }
}

fn env_str(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }
        if env::var_os(key).is_some() {
            continue; // do not override existing env
        }

        let mut val = v.trim().to_string();
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }

        env::set_var(key, val);
    }
}

fn env_u64(key: &str) -> Option<u64> {
    env_str(key).and_then(|s| s.trim().parse::<u64>().ok())
}

fn env_usize(key: &str) -> Option<usize> {
    env_str(key).and_then(|s| s.trim().parse::<usize>().ok())
}

fn parse_csv_i64(key: &str, v: Option<String>) -> Result<Vec<i64>> {
    v.unwrap_or_default()
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<i64>()
                .map_err(|_| Error::Config(format!("{key} contains an invalid user id: {s:?}")))
        })
        .collect()
}

fn parse_csv(v: Option<String>) -> Option<Vec<String>> {
    let out = v?
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect::<Vec<_>>();
    if out.is_empty() {
        None
    } else {
        Some(out)
    }
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}
