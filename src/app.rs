use crate::batch::{BatchDriver, BatchSummary};
use crate::config::{RowFilter, RunConfig};
use crate::gate::{AutoAckPrompt, ConsolePrompt, InteractionGate, OperatorPrompt};
use crate::ledger::{ensure_ledger_columns, make_working_copy, JsonTableStore};
use crate::session::{BrowserOptions, DryRunSession, WebDriverSession};
use crate::shared::logging::RunLog;
use std::path::{Path, PathBuf};

pub fn cli_help_lines() -> Vec<String> {
    vec![
        "Usage: formrelay [--config <path>] [options]".to_string(),
        String::new(),
        "Options:".to_string(),
        "  --config <path>          YAML run configuration".to_string(),
        "  --source <path>          source table (JSON column/row grid)".to_string(),
        "  --password <value>       password typed into new accounts".to_string(),
        "  --start-url <url>        login page opened before the batch".to_string(),
        "  --filter <value>         only process rows whose filter column matches".to_string(),
        "  --filter-field <name>    column the filter compares against (default Creator)"
            .to_string(),
        "  --webdriver-url <url>    WebDriver endpoint (default http://localhost:9515)"
            .to_string(),
        "  --user-data-dir <path>   browser profile directory to reuse".to_string(),
        "  --profile-dir <name>     profile name inside the user data dir".to_string(),
        "  --interactive            block at every conditional pause".to_string(),
        "  --headless               run the browser headless".to_string(),
        "  --dry-run                record UI actions without a browser".to_string(),
        "  --help                   print this help".to_string(),
    ]
}

fn take_value(
    args: &mut std::vec::IntoIter<String>,
    flag: &str,
) -> Result<String, String> {
    args.next()
        .filter(|v| !v.starts_with("--"))
        .ok_or_else(|| format!("{flag} requires a value"))
}

/// Builds the run configuration from an optional YAML file plus flag
/// overrides. Flags win over the file.
fn build_config(args: Vec<String>) -> Result<Option<RunConfig>, String> {
    let mut args = args.into_iter();
    let mut config: Option<RunConfig> = None;
    let mut source: Option<PathBuf> = None;
    let mut password: Option<String> = None;
    let mut start_url: Option<String> = None;
    let mut filter_value: Option<String> = None;
    let mut filter_field: Option<String> = None;
    let mut webdriver_url: Option<String> = None;
    let mut user_data_dir: Option<String> = None;
    let mut profile_dir: Option<String> = None;
    let mut interactive = false;
    let mut headless = false;
    let mut dry_run = false;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--help" | "-h" => return Ok(None),
            "--config" => {
                let path = take_value(&mut args, "--config")?;
                let loaded =
                    RunConfig::from_path(Path::new(&path)).map_err(|e| e.to_string())?;
                config = Some(loaded);
            }
            "--source" => source = Some(PathBuf::from(take_value(&mut args, "--source")?)),
            "--password" => password = Some(take_value(&mut args, "--password")?),
            "--start-url" => start_url = Some(take_value(&mut args, "--start-url")?),
            "--filter" => filter_value = Some(take_value(&mut args, "--filter")?),
            "--filter-field" => filter_field = Some(take_value(&mut args, "--filter-field")?),
            "--webdriver-url" => webdriver_url = Some(take_value(&mut args, "--webdriver-url")?),
            "--user-data-dir" => user_data_dir = Some(take_value(&mut args, "--user-data-dir")?),
            "--profile-dir" => profile_dir = Some(take_value(&mut args, "--profile-dir")?),
            "--interactive" => interactive = true,
            "--headless" => headless = true,
            "--dry-run" => dry_run = true,
            other => return Err(format!("unknown argument `{other}` (see --help)")),
        }
    }

    let mut config = match (config, source) {
        (Some(mut config), source) => {
            if let Some(source) = source {
                config.source_path = source;
            }
            config
        }
        (None, Some(source)) => RunConfig::new(source),
        (None, None) => {
            return Err("either --config or --source is required (see --help)".to_string())
        }
    };

    if let Some(password) = password {
        config.password = password;
    }
    if let Some(start_url) = start_url {
        config.start_url = start_url;
    }
    if let Some(value) = filter_value {
        let field = filter_field
            .or_else(|| config.filter.as_ref().map(|f| f.field.clone()))
            .unwrap_or_else(|| "Creator".to_string());
        config.filter = Some(RowFilter { field, value });
    } else if let (Some(field), Some(filter)) = (filter_field, config.filter.as_mut()) {
        filter.field = field;
    }
    if let Some(url) = webdriver_url {
        config.browser.webdriver_url = url;
    }
    if let Some(dir) = user_data_dir {
        config.browser.user_data_dir = Some(dir);
    }
    if let Some(dir) = profile_dir {
        config.browser.profile_dir = Some(dir);
    }
    config.interactive = config.interactive || interactive;
    config.browser.headless = config.browser.headless || headless;
    config.dry_run = config.dry_run || dry_run;

    config.validate().map_err(|e| e.to_string())?;
    Ok(Some(config))
}

fn run_batch<P: OperatorPrompt>(
    config: &RunConfig,
    store: &JsonTableStore,
    gate: &mut InteractionGate<P>,
    log: &mut RunLog,
) -> Result<BatchSummary, String> {
    let driver = BatchDriver::new(config, store, gate, log);
    if config.dry_run {
        driver
            .run_with(|| Ok(DryRunSession::new()))
            .map_err(|e| e.to_string())
    } else {
        let options = BrowserOptions {
            headless: config.browser.headless,
            user_data_dir: config.browser.user_data_dir.clone(),
            profile_dir: config.browser.profile_dir.clone(),
        };
        driver
            .run_with(|| {
                WebDriverSession::connect(
                    &config.browser.webdriver_url,
                    &options,
                    config.timeouts.ui_wait(),
                    config.timeouts.settle(),
                )
            })
            .map_err(|e| e.to_string())
    }
}

pub fn run_cli(args: Vec<String>) -> Result<String, String> {
    let Some(config) = build_config(args)? else {
        return Ok(cli_help_lines().join("\n"));
    };

    let (working_path, fresh) =
        make_working_copy(&config.source_path).map_err(|e| e.to_string())?;
    let mut log = RunLog::create(&working_path).map_err(|e| e.to_string())?;
    log.info(&format!(
        "working copy {} ({})",
        working_path.display(),
        if fresh { "created" } else { "resumed" }
    ));

    let store = JsonTableStore::new(&working_path);
    ensure_ledger_columns(&store).map_err(|e| e.to_string())?;

    let summary = if config.dry_run {
        let mut gate = InteractionGate::new(false, AutoAckPrompt);
        run_batch(&config, &store, &mut gate, &mut log)?
    } else {
        let mut gate = InteractionGate::new(config.interactive, ConsolePrompt);
        run_batch(&config, &store, &mut gate, &mut log)?
    };

    Ok(format!(
        "{}\nworking table: {}\nrun log: {}",
        summary.render(),
        working_path.display(),
        log.path().display()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{TableStore, WorkingTable};
    use std::fs;
    use tempfile::tempdir;

    fn seed_source(dir: &Path) -> PathBuf {
        let source = dir.join("users.json");
        let table = WorkingTable {
            columns: vec![
                "Agent User Name".to_string(),
                "Name".to_string(),
                "Last Name".to_string(),
                "Email".to_string(),
                "Role".to_string(),
            ],
            rows: vec![vec![
                "ada".to_string(),
                "Ada".to_string(),
                "Lovelace".to_string(),
                "ada@example.com".to_string(),
                "agent".to_string(),
            ]],
        };
        JsonTableStore::new(&source).save(&table).expect("seed");
        source
    }

    #[test]
    fn help_flag_prints_usage_without_touching_disk() {
        let output = run_cli(vec!["--help".to_string()]).expect("help");
        assert!(output.contains("Usage: formrelay"));
    }

    #[test]
    fn unknown_flags_are_rejected() {
        let err = run_cli(vec!["--bogus".to_string()]).expect_err("reject");
        assert!(err.contains("--bogus"));
    }

    #[test]
    fn flag_values_override_config_file() {
        let dir = tempdir().expect("tempdir");
        let config_path = dir.path().join("run.yaml");
        fs::write(
            &config_path,
            "source_path: /tmp/ignored.json\npassword: from-file\nstart_url: https://a.example\n",
        )
        .expect("write config");

        let config = build_config(vec![
            "--config".to_string(),
            config_path.display().to_string(),
            "--source".to_string(),
            "/tmp/other.json".to_string(),
            "--password".to_string(),
            "from-flag".to_string(),
            "--filter".to_string(),
            "Rushikesh".to_string(),
        ])
        .expect("build")
        .expect("not help");

        assert_eq!(config.source_path, PathBuf::from("/tmp/other.json"));
        assert_eq!(config.password, "from-flag");
        let filter = config.filter.expect("filter");
        assert_eq!(filter.field, "Creator");
        assert_eq!(filter.value, "Rushikesh");
    }

    #[test]
    fn missing_flag_value_is_an_error() {
        let err = build_config(vec!["--source".to_string()]).expect_err("must fail");
        assert!(err.contains("--source requires a value"));
    }

    #[test]
    fn dry_run_processes_rows_without_a_browser() {
        let dir = tempdir().expect("tempdir");
        let source = seed_source(dir.path());

        let output = run_cli(vec![
            "--source".to_string(),
            source.display().to_string(),
            "--dry-run".to_string(),
        ])
        .expect("dry run");
        assert!(output.contains("1 completed"));

        let store = JsonTableStore::new(dir.path().join("users_working.json"));
        let table = store.load().expect("working table");
        assert!(table.status_of(0).is_done());
    }
}
