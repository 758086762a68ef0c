//! The interactive REPL (SS6 `chat(text) -> text`): reads lines from stdin,
//! drives one turn per line through `AgentCore::chat`, and races each turn
//! against Ctrl-C so `stop_current_request` (SS4.H) actually has something
//! to cancel. Grounded on `aigent-runtime`'s `interactive.rs` read-eval-print
//! loop shape, stripped of the TUI/raw-mode machinery the core's minimal
//! CLI surface doesn't need.

use std::sync::Arc;

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, BufReader};

use core_agent::AgentCore;

pub async fn run_chat_repl(agent: Arc<AgentCore>) -> Result<()> {
    println!("aigent interactive session — type a message, /exit to quit, Ctrl-C to cancel an in-flight turn.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        use std::io::Write;
        std::io::stdout().flush().ok();

        let Some(line) = lines.next_line().await? else { break };
        let text = line.trim();
        if text.is_empty() {
            continue;
        }
        if text == "/exit" || text == "/quit" {
            break;
        }

        tokio::select! {
            result = agent.chat(text) => {
                match result {
                    Ok(reply) => println!("{reply}"),
                    Err(err) => eprintln!("error: {err}"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                agent.stop_current_request().await;
                println!("\n(cancelled the in-flight turn)");
            }
        }
    }

    agent.shutdown().await;
    Ok(())
}
