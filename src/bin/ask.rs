use finance_sql_agent::{
    agent::{CancellationToken, Supervisor},
    config::AgentConfig,
    db::PgDatabase,
    models::{Message, UserId},
    tools::{Tool, ToolCall},
};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn usage() -> String {
    let mut text = String::from(
        "usage: ask <user_id> <question...>\n       ask tool <name> [input]\n\ntools:",
    );
    for tool in Tool::ALL {
        text.push_str(&format!("\n  {:<16} {}", tool.name(), tool.description()));
    }
    text
}

enum Command {
    Ask { user_id: UserId, question: String },
    Tool { tool: Tool, input: String },
}

fn parse_args(args: &[String]) -> Option<Command> {
    let (first, rest) = args.split_first()?;
    if first == "tool" {
        let (name, input) = rest.split_first()?;
        return Some(Command::Tool {
            tool: Tool::from_name(name)?,
            input: input.join(" "),
        });
    }

    let user_id = first.parse::<i64>().ok()?;
    let question = rest.join(" ");
    if question.trim().is_empty() {
        return None;
    }
    Some(Command::Ask {
        user_id: UserId(user_id),
        question,
    })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = parse_args(&args) else {
        eprintln!("{}", usage());
        std::process::exit(2);
    };

    let config = AgentConfig::from_env()?;
    let db = PgDatabase::connect(
        config.require_database_url()?,
        config.db_max_connections,
        config.db_timeout,
    )
    .await?;

    let supervisor = Supervisor::from_config(&config, Arc::new(db))?;
    supervisor.tools().sync_registry().await?;

    match command {
        Command::Ask { user_id, question } => {
            info!(user_id = %user_id, "Asking: {}", question);
            let run = supervisor
                .run(vec![Message::User(question)], user_id, &CancellationToken::new())
                .await;

            println!("{}", run.answer);
            if let Some(warning) = &run.warning {
                eprintln!("warning: {}", warning);
            }
            info!(
                status = ?run.status,
                attempts = run.attempts,
                sql = %run.last_query,
                "Run finished"
            );
        }
        Command::Tool { tool, input } => {
            info!(tool = tool.name(), "Invoking tool directly");
            let output = supervisor
                .tools()
                .invoke(ToolCall::from_text(tool, &input))
                .await?;
            println!("{}", output.to_text());
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_args() {
        match parse_args(&args(&["7", "how", "much?"])) {
            Some(Command::Ask { user_id, question }) => {
                assert_eq!(user_id, UserId(7));
                assert_eq!(question, "how much?");
            }
            _ => panic!("expected ask command"),
        }

        match parse_args(&args(&["tool", "describe-schema", "accounts,", "budgets"])) {
            Some(Command::Tool { tool, input }) => {
                assert_eq!(tool, Tool::DescribeSchema);
                assert_eq!(input, "accounts, budgets");
            }
            _ => panic!("expected tool command"),
        }

        assert!(parse_args(&args(&["seven", "how much?"])).is_none());
        assert!(parse_args(&args(&["7"])).is_none());
        assert!(parse_args(&args(&["tool", "drop_everything"])).is_none());
    }

    #[test]
    fn test_usage_lists_every_tool() {
        let text = usage();
        for tool in Tool::ALL {
            assert!(text.contains(tool.name()));
            assert!(text.contains(tool.description()));
        }
    }
}
