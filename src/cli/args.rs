//! CLI argument parsing

use crate::config::CollectConfig;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct CliArgs {
    pub command: Command,
}

#[derive(Debug, Clone)]
pub enum Command {
    Collect(CollectArgs),
    Unpack(UnpackArgs),
}

/// Flags given to `collect`. Unset values keep the configured default.
#[derive(Debug, Clone, Default)]
pub struct CollectArgs {
    pub output: Option<PathBuf>,
    pub coordinators: Option<String>,
    pub executors: Option<String>,
    pub conf_dir: Option<String>,
    pub log_dir: Option<String>,
    pub gc_log_dir: Option<String>,
    pub log_age_days: Option<u32>,
    pub excludes: Vec<String>,
    pub staging_dir: Option<PathBuf>,
    pub job_profiles: Option<usize>,
    pub slow_exec: Option<usize>,
    pub slow_planning: Option<usize>,
    pub high_cost: Option<usize>,
    pub recent_errors: Option<usize>,
    pub profile_workers: Option<usize>,
    pub queries_age_days: Option<u32>,
    pub url: Option<String>,
    pub jvm_process: Option<String>,
    pub transport: Option<String>,
    pub quiet: bool,
}

#[derive(Debug, Clone)]
pub struct UnpackArgs {
    pub archive: PathBuf,
    pub to: PathBuf,
}

impl CollectArgs {
    /// Overlay these flags on `config` (which already holds defaults and
    /// environment overrides).
    pub fn apply_to(&self, config: &mut CollectConfig) {
        if let Some(output) = &self.output {
            config.output.clone_from(output);
        }
        if let Some(v) = &self.coordinators {
            config.coordinators.clone_from(v);
        }
        if let Some(v) = &self.executors {
            config.executors.clone_from(v);
        }
        if let Some(v) = &self.conf_dir {
            config.conf_dir.clone_from(v);
        }
        if let Some(v) = &self.log_dir {
            config.log_dir.clone_from(v);
        }
        if self.gc_log_dir.is_some() {
            config.gc_log_dir.clone_from(&self.gc_log_dir);
        }
        if let Some(v) = self.log_age_days {
            config.log_age_days = v;
        }
        config.excludes.extend(self.excludes.iter().cloned());
        if self.staging_dir.is_some() {
            config.staging_dir.clone_from(&self.staging_dir);
        }
        if let Some(v) = self.job_profiles {
            config.job_profiles = v;
        }
        let overrides = &mut config.budget_overrides;
        overrides.slow_exec = self.slow_exec.or(overrides.slow_exec);
        overrides.slow_planning = self.slow_planning.or(overrides.slow_planning);
        overrides.high_cost = self.high_cost.or(overrides.high_cost);
        overrides.recent_errors = self.recent_errors.or(overrides.recent_errors);
        if let Some(v) = self.profile_workers {
            config.profile_workers = v;
        }
        if let Some(v) = self.queries_age_days {
            config.queries_age_days = v;
        }
        if let Some(v) = &self.url {
            config.url.clone_from(v);
        }
        if let Some(v) = &self.jvm_process {
            config.jvm_process.clone_from(v);
        }
        if let Some(v) = &self.transport {
            config.transport.clone_from(v);
        }
        config.quiet = self.quiet;
    }
}

/// Parse command line arguments
pub fn parse_args(args: &[String]) -> Result<CliArgs, String> {
    if args.len() < 2 {
        return Err("No command specified".to_string());
    }

    let command = match args[1].as_str() {
        "collect" => Command::Collect(parse_collect_args(&args[2..])?),
        "unpack" => Command::Unpack(parse_unpack_args(&args[2..])?),
        _ => return Err(format!("Unknown command: {}", args[1])),
    };

    Ok(CliArgs { command })
}

fn value<'a>(args: &'a [String], i: &mut usize, flag: &str) -> Result<&'a str, String> {
    *i += 1;
    args.get(*i)
        .map(String::as_str)
        .ok_or_else(|| format!("{flag} requires a value"))
}

fn number<T: std::str::FromStr>(args: &[String], i: &mut usize, flag: &str) -> Result<T, String> {
    value(args, i, flag)?
        .parse()
        .map_err(|_| format!("{flag} must be a non-negative integer"))
}

fn parse_collect_args(args: &[String]) -> Result<CollectArgs, String> {
    let mut out = CollectArgs::default();
    let mut i = 0;

    while i < args.len() {
        let flag = args[i].as_str();
        match flag {
            "--output" | "-o" => out.output = Some(PathBuf::from(value(args, &mut i, flag)?)),
            "--coordinators" => out.coordinators = Some(value(args, &mut i, flag)?.to_string()),
            "--executors" => out.executors = Some(value(args, &mut i, flag)?.to_string()),
            "--conf-dir" => out.conf_dir = Some(value(args, &mut i, flag)?.to_string()),
            "--log-dir" => out.log_dir = Some(value(args, &mut i, flag)?.to_string()),
            "--gc-log-dir" => out.gc_log_dir = Some(value(args, &mut i, flag)?.to_string()),
            "--log-age" => out.log_age_days = Some(number(args, &mut i, flag)?),
            "--exclude" => out.excludes.push(value(args, &mut i, flag)?.to_string()),
            "--staging-dir" => {
                out.staging_dir = Some(PathBuf::from(value(args, &mut i, flag)?));
            }
            "--job-profiles" => out.job_profiles = Some(number(args, &mut i, flag)?),
            "--slow-exec" => out.slow_exec = Some(number(args, &mut i, flag)?),
            "--slow-planning" => out.slow_planning = Some(number(args, &mut i, flag)?),
            "--high-cost" => out.high_cost = Some(number(args, &mut i, flag)?),
            "--recent-errors" => out.recent_errors = Some(number(args, &mut i, flag)?),
            "--profile-workers" => {
                let workers: usize = number(args, &mut i, flag)?;
                if workers == 0 {
                    return Err("--profile-workers must be at least 1".to_string());
                }
                out.profile_workers = Some(workers);
            }
            "--queries-age" => out.queries_age_days = Some(number(args, &mut i, flag)?),
            "--url" => out.url = Some(value(args, &mut i, flag)?.to_string()),
            "--jvm-process" => out.jvm_process = Some(value(args, &mut i, flag)?.to_string()),
            "--transport" => out.transport = Some(value(args, &mut i, flag)?.to_string()),
            "--quiet" | "-q" => out.quiet = true,
            "--token" => {
                return Err("--token is not accepted; set DIAGCAP_TOKEN instead".to_string());
            }
            arg if !arg.starts_with('-') => return Err(format!("Unexpected argument: {arg}")),
            _ => return Err(format!("Unknown option: {flag}")),
        }
        i += 1;
    }

    if out.output.is_none() {
        return Err("Missing required option: --output <FILE>".to_string());
    }

    Ok(out)
}

fn parse_unpack_args(args: &[String]) -> Result<UnpackArgs, String> {
    let mut archive = None;
    let mut to = None;
    let mut i = 0;

    while i < args.len() {
        let flag = args[i].as_str();
        match flag {
            "--to" => to = Some(PathBuf::from(value(args, &mut i, flag)?)),
            arg if !arg.starts_with('-') => {
                if archive.is_some() {
                    return Err(format!("Unexpected argument: {arg}"));
                }
                archive = Some(PathBuf::from(arg));
            }
            _ => return Err(format!("Unknown option: {flag}")),
        }
        i += 1;
    }

    Ok(UnpackArgs {
        archive: archive.ok_or_else(|| "Missing required argument: ARCHIVE".to_string())?,
        to: to.ok_or_else(|| "Missing required option: --to <DIR>".to_string())?,
    })
}
