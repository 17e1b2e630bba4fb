use std::{path::PathBuf, sync::Arc};

use anyhow::Result;
use casedata::CaseData;
use clap::Parser;
use client_core::{SessionEvent, TrialChannel, TrialClient, WsTrialChannel};
use shared::{
    domain::InputKind,
    protocol::{EvidenceSubmission, UserInput},
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::warn;

#[derive(Parser, Debug)]
struct Args {
    /// Backend base URL.
    #[arg(long, default_value = "http://localhost:8000")]
    server_url: String,
    /// Directory holding case.toml and its evidence files.
    #[arg(long, default_value = "cases/demo")]
    case_dir: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().init();
    let args = Args::parse();

    let case = CaseData::load(&args.case_dir)?;
    println!(
        "已加载案件 {} ({}), 证据 {} 份",
        case.meta.case_id,
        case.meta.crime,
        case.evidence.len()
    );

    let channel = Arc::new(WsTrialChannel::new(&args.server_url)?);
    let client = TrialClient::new(channel as Arc<dyn TrialChannel>);

    let mut events = client.subscribe_events();
    let printer = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                SessionEvent::Connected { thread_id } => {
                    println!("-- 会话 {thread_id} --");
                }
                SessionEvent::TranscriptAppended(entry) => {
                    println!(
                        "[{}] {}: {}",
                        entry.timestamp.format("%H:%M"),
                        entry.display_name,
                        entry.content
                    );
                }
                SessionEvent::AwaitingInput(interrupt) => {
                    println!(">> 等待输入: {}", interrupt.prompt);
                    if let Some(options) = &interrupt.options {
                        println!(">> 可选项: {}", options.join(" / "));
                    }
                }
                SessionEvent::ProgressChanged { phase, progress } => {
                    println!("-- {} {progress:.1}% --", phase.label());
                }
                SessionEvent::TrialEnded => println!("-- 庭审结束 --"),
                SessionEvent::Disconnected => {
                    println!("-- 连接已断开 --");
                    break;
                }
            }
        }
    });

    client.connect(case.meta.clone(), case.evidence.clone()).await?;

    // Answers go to the pending interrupt: y/n for boolean prompts, free
    // text otherwise. /retry restores the last prompt, /quit exits.
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match line {
            "/quit" => break,
            "/retry" => client.retry().await,
            _ => {
                let state = client.snapshot().await;
                let Some(pending) = state.pending_interrupt else {
                    warn!("no pending prompt; input ignored");
                    continue;
                };
                let input = match pending.input_type {
                    InputKind::Boolean => match line {
                        "y" | "yes" | "是" => UserInput::Decision(true),
                        "n" | "no" | "否" => UserInput::Decision(false),
                        _ => {
                            warn!("boolean prompt: answer y or n");
                            continue;
                        }
                    },
                    InputKind::Text => UserInput::Text(line.to_string()),
                    InputKind::Evidence => UserInput::Evidence(EvidenceSubmission {
                        current_evidence: state.evidence_list.clone(),
                        messages: line.to_string(),
                    }),
                };
                client.respond(input).await;
            }
        }
    }

    client.disconnect().await;
    printer.abort();
    Ok(())
}
