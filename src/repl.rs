// repl.rs — Terminal chat loop: reads a line per turn, renders replies,
// history and the stats panel. The only controls are messages and /reset.

use anyhow::{Context, Result};
use colored::Colorize;
use dialoguer::{theme::ColorfulTheme, Confirm, Input};
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;
use tracing::debug;

use crate::app::{TurnOutcome, Tutor};
use crate::config::Config;
use crate::error::TutorError;
use crate::network::{CompletionApi, OpenAiClient};
use crate::reply;
use crate::session::Role;
use crate::tracking::{self, SessionStats};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    Help,
    History,
    Stats,
    Reset,
    Quit,
    Unknown(String),
    Message(String),
}

fn parse_command(line: &str) -> Command {
    let trimmed = line.trim();
    if !trimmed.starts_with('/') {
        return Command::Message(line.to_string());
    }
    match trimmed.to_lowercase().as_str() {
        "/help" | "/?" => Command::Help,
        "/history" => Command::History,
        "/stats" => Command::Stats,
        "/reset" => Command::Reset,
        "/quit" | "/exit" => Command::Quit,
        other => Command::Unknown(other.to_string()),
    }
}

/// Run the interactive chat until `/quit` or end of input.
pub async fn run(config: Config) -> Result<()> {
    let client = OpenAiClient::new(&config)?;
    let mut tutor = Tutor::new(client, config.system_prompt(), &config.model);
    let theme = ColorfulTheme::default();

    print_welcome(&config);

    loop {
        let line = match Input::<String>::with_theme(&theme)
            .with_prompt("你")
            .allow_empty(true)
            .interact_text()
        {
            Ok(l) => l,
            // EOF or closed terminal ends the session like /quit.
            Err(e) => {
                debug!(%e, "Input closed");
                break;
            }
        };

        match parse_command(&line) {
            Command::Quit => break,
            Command::Help => print_help(),
            Command::History => print_history(&tutor),
            Command::Stats => print_stats(&tutor.stats(), &config.currency),
            Command::Reset => {
                let confirmed = Confirm::with_theme(&theme)
                    .with_prompt("Reset the conversation and usage stats?")
                    .default(false)
                    .interact()
                    .context("Failed to read confirmation")?;
                if confirmed {
                    tutor.reset();
                    println!("  {} Conversation reset.\n", "✔".green().bold());
                } else {
                    println!("  Reset cancelled.\n");
                }
            }
            Command::Unknown(cmd) => {
                println!("  {} Unknown command {}. Try /help.\n", "?".yellow().bold(), cmd);
            }
            Command::Message(text) => turn(&mut tutor, &text).await,
        }
    }

    print_stats(&tutor.stats(), &config.currency);
    println!("  再见! 👋\n");
    Ok(())
}

/// Submit one message and render whatever comes back.
async fn turn<C: CompletionApi>(tutor: &mut Tutor<C>, text: &str) {
    let estimate = tutor.estimate_tokens(text);
    if let Some(warning) = &estimate.warning {
        println!("  {}", warning.yellow());
    } else {
        println!("  {}", format!("~{} tokens", estimate.tokens).dimmed());
    }

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.cyan} {msg}")
            .expect("invalid spinner template"),
    );
    spinner.set_message("Thinking...");
    spinner.enable_steady_tick(Duration::from_millis(80));

    let result = tutor.submit(text).await;
    spinner.finish_and_clear();

    match result {
        Ok(TurnOutcome::Replied(parsed)) => {
            print_assistant(&reply::format(&parsed));
            tutor.finish_turn();
        }
        Ok(TurnOutcome::Failed { error, advise_reset }) => {
            println!("  {} {}\n", "✘".red().bold(), error.to_string().red());
            if advise_reset {
                println!(
                    "  {} Several requests have failed this session. Consider {}.\n",
                    "⚠".yellow().bold(),
                    "/reset".bold()
                );
            }
        }
        Err(TutorError::InvalidInput(_)) => {
            println!("  {}\n", "Please type a message first.".yellow());
        }
        Err(e) => {
            println!("  {} {}\n", "✘".red().bold(), e);
        }
    }
}

fn print_welcome(config: &Config) {
    println!();
    println!(
        "{}",
        format!("  HSK {} Chinese Language Tutor 🎓", config.hsk_level).cyan().bold()
    );
    println!();
    println!("  Welcome to your Chinese language tutor! Feel free to:");
    println!("   • Ask questions in English or Chinese");
    println!("   • Practice writing Chinese sentences");
    println!("   • Request explanations of grammar points");
    println!("   • Get vocabulary help");
    println!();
    println!("  {}", format!("Model: {} · /help for commands", config.model).dimmed());
    println!();
}

fn print_help() {
    println!();
    println!("  /history   Show the conversation so far");
    println!("  /stats     Show token and cost statistics");
    println!("  /reset     Start over (asks for confirmation)");
    println!("  /quit      Leave the tutor");
    println!();
}

fn print_assistant(text: &str) {
    println!();
    println!("{}", "  老师".magenta().bold());
    for line in text.lines() {
        println!("  {}", line);
    }
    println!();
}

fn print_history<C: CompletionApi>(tutor: &Tutor<C>) {
    let history = tutor.session().conversation.history();
    if history.is_empty() {
        println!("\n  No messages yet.\n");
        return;
    }
    for message in history {
        match message.role() {
            Role::User => {
                println!("\n{}", "  你".green().bold());
                println!("  {}", message.content());
            }
            // Always re-parsed from the stored raw text.
            Role::Assistant => print_assistant(&reply::format(&reply::parse(message.content()))),
            Role::System => {}
        }
    }
    println!();
}

fn print_stats(stats: &SessionStats, currency: &str) {
    println!();
    println!("  {}", "📊 Conversation Stats".bold());
    println!("     Session length:     {}", tracking::format_duration(stats.duration));
    println!("     Interactions:       {}", stats.interactions);
    if let Some(at) = stats.last_interaction {
        println!("     Last reply:         {}", at.with_timezone(&chrono::Local).format("%H:%M:%S"));
    }
    println!(
        "     Tokens used:        {} (prompt {}, completion {})",
        stats.total_tokens, stats.prompt_tokens, stats.completion_tokens
    );
    println!(
        "     Avg tokens / turn:  {:.1}",
        stats.average_tokens_per_interaction
    );
    println!(
        "     {}",
        format!("Estimated cost:     {}", tracking::format_cost(stats.total_cost, currency)).bold()
    );
    println!(
        "     Avg cost / turn:    {}",
        tracking::format_cost(stats.average_cost_per_interaction, currency)
    );
    println!();
}
