//! Interactive operator confirmation

use std::io::{BufRead, Write};

use async_trait::async_trait;

#[cfg(test)]
use mockall::automock;

use keelson_common::{Error, Result};

/// Asks the operator a yes/no question
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Confirmer: Send + Sync {
    /// True when the operator agreed
    async fn confirm(&self, prompt: &str) -> Result<bool>;
}

/// Prompts on stderr and reads the answer from stdin
#[derive(Debug, Clone, Copy, Default)]
pub struct StdinConfirmer;

impl StdinConfirmer {
    /// Create a stdin confirmer
    pub fn new() -> Self {
        Self
    }
}

/// Only an explicit yes counts as agreement
pub fn is_affirmative(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

#[async_trait]
impl Confirmer for StdinConfirmer {
    async fn confirm(&self, prompt: &str) -> Result<bool> {
        let prompt = prompt.to_string();
        tokio::task::spawn_blocking(move || -> Result<bool> {
            let mut stderr = std::io::stderr().lock();
            write!(stderr, "{} [y/N]: ", prompt)?;
            stderr.flush()?;

            let mut answer = String::new();
            std::io::stdin().lock().read_line(&mut answer)?;
            Ok(is_affirmative(&answer))
        })
        .await
        .map_err(|e| Error::internal_with_context("confirm", e.to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("y", true)]
    #[case("YES\n", true)]
    #[case(" yes ", true)]
    #[case("", false)]
    #[case("n", false)]
    #[case("yep", false)]
    fn only_explicit_yes_confirms(#[case] answer: &str, #[case] expected: bool) {
        assert_eq!(is_affirmative(answer), expected);
    }
}
