use std::io::Write;

use anyhow::Result;
use console::style;
use tokio::io::{AsyncBufReadExt, BufReader};

use mcp_bridge::Bridge;

#[derive(Debug, PartialEq)]
enum Input<'i> {
    Message(&'i str),
    Exit,
    Empty,
}

fn parse_input(line: &str) -> Input<'_> {
    let text = line.trim();
    match text.to_lowercase().as_str() {
        "" => Input::Empty,
        "quit" | "exit" | "q" => Input::Exit,
        _ => Input::Message(text),
    }
}

/// Interactive loop over one bridge
pub struct Session<'a> {
    bridge: Bridge<'a>,
}

impl<'a> Session<'a> {
    pub fn new(bridge: Bridge<'a>) -> Self {
        Session { bridge }
    }

    pub async fn start(&mut self) -> Result<()> {
        self.bridge.open().await?;
        println!(
            "{} {}",
            style("Connected.").green().bold(),
            style(format!(
                "{} tools available - type \"exit\" to end the session",
                self.bridge.tools().len()
            ))
            .dim()
        );

        let outcome = self.run().await;
        // a lost tool backend has already closed the bridge
        if self.bridge.is_open() {
            self.bridge.close().await?;
        }
        println!("{}", style("Session closed.").dim());
        outcome
    }

    async fn run(&mut self) -> Result<()> {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();

        loop {
            print!("{} ", style("You:").cyan().bold());
            std::io::stdout().flush()?;

            // ctrl-c at the prompt ends the session like end of input
            let line = tokio::select! {
                line = lines.next_line() => line?,
                _ = tokio::signal::ctrl_c() => None,
            };
            let Some(line) = line else {
                println!();
                break;
            };

            match parse_input(&line) {
                Input::Exit => break,
                Input::Empty => continue,
                Input::Message(text) => self.process(text).await,
            }
            if !self.bridge.is_open() {
                break;
            }
        }
        Ok(())
    }

    async fn process(&mut self, text: &str) {
        tokio::select! {
            result = self.bridge.process_message(text) => match result {
                Ok(answer) => println!("{} {}\n", style("Assistant:").green().bold(), answer),
                Err(e) => eprintln!("{} {}\n", style("Error:").red().bold(), e),
            },
            _ = tokio::signal::ctrl_c() => {
                // dropping the request rolls the conversation back
                println!(
                    "\n{}\n",
                    style("Interrupted: conversation reset to before the last message.").yellow()
                );
            }
        }
    }
}
