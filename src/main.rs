use clap::Parser;
use marinesync_lib::cli::{rewrite_deprecated_args, Cli, Command};
use marinesync_lib::config::{default_config_dir, ClientConfig};
use marinesync_lib::logging::init_logging;
use marinesync_lib::{commands, Client};
use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    // 过时参数先改写，警告等日志初始化后再输出（配置文件的解析警告同理）
    let rewritten = match rewrite_deprecated_args(std::env::args()) {
        Ok(rewritten) => rewritten,
        Err(message) => {
            eprintln!("error: {}", message);
            return ExitCode::from(2);
        }
    };
    let cli = Cli::parse_from(rewritten.args);

    let config_dir = cli.config_dir.clone().unwrap_or_else(default_config_dir);
    let (mut config, config_warning) = ClientConfig::load(&config_dir);
    if let Some(level) = &cli.log_level {
        if level.eq_ignore_ascii_case("quiet") {
            config.log.enabled = false;
        } else {
            config.log.level = level.clone();
        }
    }

    // guard 必须活到进程结束，否则缓冲中的日志会丢失
    let _guard = init_logging(&config.log, &config_dir);
    for warning in config_warning.iter().chain(&rewritten.warnings) {
        tracing::warn!("{}", warning);
    }

    let logging_enabled = config.log.enabled;
    let client = Client::new(config);
    let result = match cli.command {
        Command::Get(args) => commands::get::run(client, args).await,
        Command::Login(args) => commands::login::run(client, args).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if logging_enabled {
                tracing::error!("{:#}", e);
            } else {
                eprintln!("error: {:#}", e);
            }
            ExitCode::FAILURE
        }
    }
}
