//! 命令行定义
//!
//! 过时的参数名在交给 clap 之前统一改写：仍可用的给出警告，已移除的直接报错。

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "marinesync", version, about = "Download and sync files from the marine data lake")]
pub struct Cli {
    /// 配置目录（config.json 与凭据文件所在位置）
    #[arg(long, global = true, env = crate::config::ENV_CONFIG_DIR)]
    pub config_dir: Option<PathBuf>,

    /// 覆盖配置中的日志级别
    #[arg(
        long,
        global = true,
        value_parser = ["trace", "debug", "info", "warn", "error", "quiet"],
        ignore_case = true
    )]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Download original files of a dataset
    Get(GetArgs),
    /// Store credentials in the configuration directory
    Login(LoginArgs),
}

#[derive(Debug, Clone, Default, Args)]
pub struct CredentialArgs {
    #[arg(long)]
    pub username: Option<String>,
    #[arg(long)]
    pub password: Option<String>,
}

#[derive(Debug, Clone, Default, Args)]
pub struct GetArgs {
    /// https://<host>/<bucket>/<root>/<product>/<dataset>
    #[arg(long, short = 'u')]
    pub dataset_url: Option<String>,

    #[command(flatten)]
    pub credentials: CredentialArgs,

    #[arg(long, short = 'o')]
    pub output_directory: Option<PathBuf>,

    /// JSON request file; command line flags take precedence
    #[arg(long)]
    pub request_file: Option<PathBuf>,

    /// Text file with one file name or url per line
    #[arg(long)]
    pub file_list: Option<PathBuf>,

    /// Glob pattern applied to the object url
    #[arg(long)]
    pub filter: Option<String>,

    /// Regular expression applied to the object url
    #[arg(long)]
    pub regex: Option<String>,

    #[arg(long, short = 'n')]
    pub no_directories: bool,

    #[arg(long)]
    pub show_outputnames: bool,

    /// Skip the confirmation prompt
    #[arg(long, short = 'f')]
    pub force_download: bool,

    #[arg(long)]
    pub overwrite: bool,

    #[arg(long)]
    pub sync: bool,

    #[arg(long)]
    pub sync_delete: bool,

    /// Only list the dataset root
    #[arg(long)]
    pub index_parts: bool,

    #[arg(long)]
    pub dry_run: bool,

    /// Write the matched file list to <name> (.txt or .csv) instead of downloading
    #[arg(long)]
    pub create_file_list: Option<String>,

    /// 0 downloads one file at a time
    #[arg(long)]
    pub max_concurrent_requests: Option<usize>,
}

#[derive(Debug, Clone, Default, Args)]
pub struct LoginArgs {
    #[command(flatten)]
    pub credentials: CredentialArgs,

    /// Replace an existing credentials file without asking
    #[arg(long)]
    pub force_overwrite: bool,

    /// Only check the stored or given credentials
    #[arg(long)]
    pub check_credentials_valid: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Removed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeprecatedOption {
    pub old_name: &'static str,
    pub new_name: &'static str,
    pub commands: &'static [&'static str],
    pub severity: Severity,
}

pub const DEPRECATED_OPTIONS: &[DeprecatedOption] = &[
    DeprecatedOption {
        old_name: "overwrite-output-data",
        new_name: "overwrite",
        commands: &["get"],
        severity: Severity::Warning,
    },
    DeprecatedOption {
        old_name: "download-file-list",
        new_name: "create-file-list",
        commands: &["get"],
        severity: Severity::Warning,
    },
    DeprecatedOption {
        old_name: "filter-with-globbing-pattern",
        new_name: "filter",
        commands: &["get"],
        severity: Severity::Warning,
    },
    DeprecatedOption {
        old_name: "filter-with-regular-expression",
        new_name: "regex",
        commands: &["get"],
        severity: Severity::Warning,
    },
    DeprecatedOption {
        old_name: "no-directory",
        new_name: "no-directories",
        commands: &["get"],
        severity: Severity::Warning,
    },
    DeprecatedOption {
        old_name: "overwrite-configuration-file",
        new_name: "force-overwrite",
        commands: &["login"],
        severity: Severity::Warning,
    },
    DeprecatedOption {
        old_name: "motu-api-request",
        new_name: "request-file",
        commands: &["get"],
        severity: Severity::Removed,
    },
];

/// 查找过时参数；`--no_directory`、`no-directory` 等写法都能命中
pub fn deprecated_option(name: &str, command: &str) -> Option<&'static DeprecatedOption> {
    let normalized = name.trim_start_matches("--").replace('_', "-");
    DEPRECATED_OPTIONS
        .iter()
        .find(|o| o.old_name == normalized && o.commands.contains(&command))
}

/// 改写后的参数和需要在日志初始化后输出的警告
#[derive(Debug, Default, PartialEq, Eq)]
pub struct RewrittenArgs {
    pub args: Vec<String>,
    pub warnings: Vec<String>,
}

/// 把过时的长参数改写成新名字；遇到已移除的参数返回错误信息
pub fn rewrite_deprecated_args<I>(args: I) -> Result<RewrittenArgs, String>
where
    I: IntoIterator<Item = String>,
{
    let mut out = RewrittenArgs::default();
    let mut command: Option<String> = None;

    for (index, arg) in args.into_iter().enumerate() {
        if index > 0 && command.is_none() && matches!(arg.as_str(), "get" | "login") {
            command = Some(arg.clone());
        }

        let (Some(command), Some(flag)) = (command.as_deref(), arg.strip_prefix("--")) else {
            out.args.push(arg);
            continue;
        };

        let (name, value) = match flag.split_once('=') {
            Some((name, value)) => (name, Some(value)),
            None => (flag, None),
        };
        let Some(option) = deprecated_option(name, command) else {
            out.args.push(arg);
            continue;
        };

        match option.severity {
            Severity::Removed => {
                return Err(format!(
                    "'--{}' has been removed, use '--{}' instead",
                    option.old_name, option.new_name
                ));
            }
            Severity::Warning => {
                out.warnings.push(format!(
                    "'--{}' has been deprecated, use '--{}' instead",
                    option.old_name, option.new_name
                ));
                out.args.push(match value {
                    Some(value) => format!("--{}={}", option.new_name, value),
                    None => format!("--{}", option.new_name),
                });
            }
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn lookup_normalizes_separators() {
        assert_eq!(
            deprecated_option("--no_directory", "get").map(|o| o.new_name),
            Some("no-directories")
        );
        assert_eq!(
            deprecated_option("filter_with_globbing_pattern", "get").map(|o| o.new_name),
            Some("filter")
        );
        // 只对声明过的子命令生效
        assert!(deprecated_option("overwrite-configuration-file", "get").is_none());
        assert!(deprecated_option("overwrite", "get").is_none());
    }

    #[test]
    fn deprecated_flags_are_rewritten_with_warnings() {
        let rewritten = rewrite_deprecated_args(args(&[
            "marinesync",
            "get",
            "--overwrite-output-data",
            "--filter-with-globbing-pattern=*.nc",
            "--dataset-url",
            "https://h/b/p/d",
        ]))
        .unwrap();

        assert_eq!(
            rewritten.args,
            args(&[
                "marinesync",
                "get",
                "--overwrite",
                "--filter=*.nc",
                "--dataset-url",
                "https://h/b/p/d",
            ])
        );
        assert_eq!(rewritten.warnings.len(), 2);
    }

    #[test]
    fn removed_flags_are_rejected() {
        let err = rewrite_deprecated_args(args(&["marinesync", "get", "--motu-api-request", "x"]))
            .unwrap_err();
        assert!(err.contains("--motu-api-request"));
    }

    #[test]
    fn rewritten_args_parse() {
        use clap::Parser;

        let rewritten = rewrite_deprecated_args(args(&[
            "marinesync",
            "--log-level",
            "debug",
            "get",
            "-u",
            "https://h/b/p/d",
            "--no-directory",
            "--sync",
        ]))
        .unwrap();
        let cli = Cli::try_parse_from(rewritten.args).unwrap();

        assert_eq!(cli.log_level.as_deref(), Some("debug"));
        match cli.command {
            Command::Get(get) => {
                assert!(get.no_directories);
                assert!(get.sync);
                assert_eq!(get.dataset_url.as_deref(), Some("https://h/b/p/d"));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }
}
