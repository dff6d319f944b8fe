mod cli;
mod commands;
mod logging;
mod settings;

use std::process::ExitCode;

use clap::Parser;
use log::{error, info};

use sysdeck_backend::{AdminError, ErrorKind};
use sysdeck_exec::ExecutionGateway;
use sysdeck_managers::{HostPaths, Managers};
use sysdeck_platform::{LocalHost, SystemCapabilities};

use cli::Cli;
use commands::SecretInput;
use settings::Settings;

fn report_error(kind: &str, message: &str) -> ExitCode {
    eprintln!("error[{kind}]: {message}");
    ExitCode::FAILURE
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let settings = Settings::load();
    logging::init_logging(cli.debug || settings.debug_logging, settings.max_log_size_bytes);

    let caps = match SystemCapabilities::detect() {
        Ok(caps) => caps,
        Err(e) => return report_error(ErrorKind::UnsupportedBackend.as_str(), &e.to_string()),
    };
    info!("Detected {caps:?}");

    let gateway = ExecutionGateway::system(settings.timeout_policy());
    let managers = Managers::new(&caps, &gateway, &HostPaths::detect(&LocalHost));

    let password_stdin = cli.password_stdin;
    let mut secrets = SecretInput::new(std::io::stdin().lock());
    let cred = if password_stdin {
        match secrets.next("credential") {
            Ok(cred) => Some(cred),
            Err(e) => return report_error(e.kind().as_str(), &e.to_string()),
        }
    } else {
        None
    };

    let result =
        commands::run(cli.command, &caps, &managers, &settings, cred, &mut secrets).await;
    match result {
        Ok(report) => {
            match serde_json::to_string_pretty(&report.value) {
                Ok(json) => println!("{json}"),
                Err(e) => return report_error("io", &e.to_string()),
            }
            if report.success {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Err(e) => {
            error!("{e}");
            if matches!(e, AdminError::Privilege(_)) && !password_stdin {
                eprintln!("hint: rerun with --password-stdin");
            }
            report_error(e.kind().as_str(), &e.to_string())
        }
    }
}
