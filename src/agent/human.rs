//! A person at the keyboard stands in for the model.

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader, Stdin};

use super::Agent;
use crate::error::RunError;
use crate::transcript::ChatMessage;

/// Prints each environment message and reads one reply line from stdin.
pub(crate) struct HumanAgent {
    stdin: BufReader<Stdin>,
}

impl HumanAgent {
    pub fn new() -> Self {
        Self {
            stdin: BufReader::new(tokio::io::stdin()),
        }
    }
}

#[async_trait]
impl Agent for HumanAgent {
    fn reset(&mut self) {}

    fn premember(&mut self, _messages: &[ChatMessage]) {}

    async fn act(&mut self, environment_message: &str) -> Result<String> {
        println!("{environment_message}");

        let mut line = String::new();
        let read = self
            .stdin
            .read_line(&mut line)
            .await
            .context("Failed to read reply from stdin")?;
        if read == 0 {
            return Err(RunError::refused("stdin closed").into());
        }
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }

    fn identify(&self) -> String {
        "human".to_string()
    }
}
