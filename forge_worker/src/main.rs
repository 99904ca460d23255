use std::path::Path;
use std::thread;
use std::time::Duration;

use clap::{App, Arg};
use log::{error, info, warn};

use forge_core::config::JudgeConfig;
use forge_core::error::Result;
use forge_core::judge;
use forge_core::sandbox::Sandbox;
use forge_core::task::{JudgeResult, Task};
use forge_core::JudgeStatus;

mod client;

use client::ApiClient;

fn main() {
    env_logger::init();

    let cmd = App::new("forge_worker")
        .version("0.1.0")
        .about("Polling judge worker")
        .arg(
            Arg::with_name("config")
                .long("config")
                .short("c")
                .help("path to the YAML config file")
                .takes_value(true),
        )
        .get_matches();

    let config = match cmd.value_of("config") {
        Some(path) => match JudgeConfig::from_file(Path::new(path)) {
            Ok(config) => config,
            Err(e) => {
                error!("cannot load config {}: {}", path, e);
                std::process::exit(1);
            }
        },
        None => JudgeConfig::default(),
    };

    if let Err(e) = serve(&config) {
        error!("worker stopped: {}", e);
        std::process::exit(1);
    }
}

fn serve(config: &JudgeConfig) -> Result<()> {
    let client = ApiClient::new(&config.server_url, &config.judge_token)?;
    let mut sandbox = Sandbox::new(config)?;
    let delay = Duration::from_millis(config.delay);
    info!("polling {} every {:?}", config.server_url, delay);

    loop {
        let task = match client.fetch_task() {
            Ok(task) => task,
            Err(e) => {
                warn!("poll failed: {}", e);
                thread::sleep(delay);
                continue;
            }
        };
        let task = match task {
            Some(task) => task,
            None => {
                thread::sleep(delay);
                continue;
            }
        };

        info!("judging task {} ({})", task.judge_id, task.language);
        judge_one(&client, config, &mut sandbox, &task);
    }
}

/// Runs one task through the pipeline; a pipeline fault is reported
/// to the server as a flat System Error record so the submission
/// never hangs in Waiting.
fn judge_one(client: &ApiClient, config: &JudgeConfig, sandbox: &mut Sandbox, task: &Task) {
    let mut upload = |result: &JudgeResult| client.upload(task.judge_id, result);
    if let Err(e) = judge::judge_task(task, config, sandbox, &mut upload) {
        error!("task {} failed: {}", task.judge_id, e);
        let mut result = JudgeResult::new();
        result.status = JudgeStatus::SystemError;
        result.pending = false;
        if let Err(e) = client.upload(task.judge_id, &result) {
            error!("cannot report system error for {}: {}", task.judge_id, e);
        }
    }
}
