mod cli;

use std::path::Path;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use tokio::sync::broadcast::error::RecvError;

use cli::{Cli, Command};
use splatforge::{load_config, logging, PipelineService, WorkStatus};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> splatforge::Result<ExitCode> {
    let config = load_config(&cli.config)?;
    logging::init(&config.logging);
    let service = PipelineService::from_config(config)?;
    let user = cli.user;

    match cli.command {
        Command::Upload { file, title } => {
            let title = title.unwrap_or_else(|| file_stem(&file));
            let video_id = service.upload_video_file(user, &title, &file).await?;
            println!("{video_id}");
        }
        Command::Start {
            video_id,
            name,
            iterations,
        } => {
            let handle = service.start_work(user, video_id, &name, iterations).await?;
            let work_id = handle.work_id();
            println!("{work_id}");
            let status = handle.wait().await?;
            return report_final(&service, work_id, status).await;
        }
        Command::Run {
            video_id,
            name,
            iterations,
            follow,
        } => {
            let mut events = service.progress().subscribe();
            let handle = service.start_work(user, video_id, &name, iterations).await?;
            let work_id = handle.work_id();
            println!("work {work_id}");
            let printer = tokio::spawn(async move {
                loop {
                    match events.recv().await {
                        Ok(event) if event.work_id != work_id => {}
                        Ok(event) => {
                            match &event.line {
                                Some(line) if follow => println!("  | {line}"),
                                Some(_) => {}
                                None => println!("[{}] {}", event.phase, event.message),
                            }
                            if event.is_final() {
                                break;
                            }
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            eprintln!("... {skipped} events skipped")
                        }
                        Err(RecvError::Closed) => break,
                    }
                }
            });
            let status = handle.wait().await?;
            // Let the printer drain events already queued.
            let _ = tokio::time::timeout(Duration::from_secs(1), printer).await;
            return report_final(&service, work_id, status).await;
        }
        Command::Import { file, name } => {
            let name = name.unwrap_or_else(|| file_stem(&file));
            let reader = tokio::fs::File::open(&file)
                .await
                .map_err(|source| splatforge::StoreError::Staging {
                    op: "open",
                    key: name.clone(),
                    path: file.clone(),
                    source,
                })?;
            let size = reader.metadata().await.ok().map(|m| m.len());
            let work_id = service.import_work(user, &name, reader, size).await?;
            println!("{work_id}");
        }
        Command::Status { work_id } => {
            let report = service.work_status(work_id).await?;
            println!(
                "{}",
                serde_json::to_string_pretty(&report).unwrap_or_default()
            );
        }
        Command::Fetch { work_id, output } => {
            let staged = service.fetch_artifact(work_id).await?;
            tokio::fs::copy(staged.path(), &output).await.map_err(|source| {
                splatforge::StoreError::Staging {
                    op: "copy",
                    key: format!("work{work_id}"),
                    path: output.clone(),
                    source,
                }
            })?;
            println!("{}", output.display());
        }
        Command::List { works } => {
            if works {
                for work in service.list_works(user).await? {
                    println!(
                        "{}\t{}\t{}\t{}",
                        work.id,
                        work.status,
                        work.name,
                        work.process_time
                            .map(|s| format!("{s}s"))
                            .unwrap_or_else(|| "-".to_string())
                    );
                }
            } else {
                for video in service.list_videos(user).await? {
                    println!(
                        "{}\t{}\t{}\t{}",
                        video.id, video.status, video.title, video.filename
                    );
                }
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}

async fn report_final(
    service: &PipelineService,
    work_id: i64,
    status: WorkStatus,
) -> splatforge::Result<ExitCode> {
    let report = service.work_status(work_id).await?;
    if status == WorkStatus::Completed {
        println!(
            "completed: {}",
            report.artifact_key.as_deref().unwrap_or_default()
        );
        return Ok(ExitCode::SUCCESS);
    }
    match report.error_log {
        Some(error) => eprintln!("{status}: {error}"),
        None => eprintln!("{status}"),
    }
    Ok(ExitCode::FAILURE)
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("upload")
        .to_string()
}
